//! GIS 要素模型：几何类型系统、要素来源、图层输出与属性表结构。

use serde::{Deserialize, Serialize};

use crate::document::EntityId;
use crate::geometry::{Bounds2D, Point2};

/// 输出几何类型，单个 `LayerOutput` 内保持一致。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    Point,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
}

impl GeometryKind {
    #[inline]
    pub fn family(self) -> GeometryFamily {
        match self {
            GeometryKind::Point => GeometryFamily::Point,
            GeometryKind::LineString | GeometryKind::MultiLineString => GeometryFamily::Line,
            GeometryKind::Polygon | GeometryKind::MultiPolygon => GeometryFamily::Polygon,
        }
    }

    #[inline]
    pub fn is_multi(self) -> bool {
        matches!(self, GeometryKind::MultiLineString | GeometryKind::MultiPolygon)
    }

    /// OGC 几何类型名（GeoPackage `geometry_type_name` 使用）。
    pub fn ogc_name(self) -> &'static str {
        match self {
            GeometryKind::Point => "POINT",
            GeometryKind::LineString => "LINESTRING",
            GeometryKind::MultiLineString => "MULTILINESTRING",
            GeometryKind::Polygon => "POLYGON",
            GeometryKind::MultiPolygon => "MULTIPOLYGON",
        }
    }
}

/// 兼容类别：同一类别内单/多几何可互相提升，不同类别必须拆分输出。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GeometryFamily {
    Point,
    Line,
    Polygon,
}

impl GeometryFamily {
    /// 拆分输出时附加到图层名后的后缀。
    pub fn suffix(self) -> &'static str {
        match self {
            GeometryFamily::Point => "point",
            GeometryFamily::Line => "line",
            GeometryFamily::Polygon => "polygon",
        }
    }

    /// 同类别混合出现时统一提升到的类型。
    pub fn promoted_kind(self) -> GeometryKind {
        match self {
            GeometryFamily::Point => GeometryKind::Point,
            GeometryFamily::Line => GeometryKind::MultiLineString,
            GeometryFamily::Polygon => GeometryKind::MultiPolygon,
        }
    }
}

/// 多边形环：首尾点相同。第一个环为外环，其余为洞。
pub type Ring = Vec<Point2>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point(Point2),
    LineString(Vec<Point2>),
    MultiLineString(Vec<Vec<Point2>>),
    Polygon(Vec<Ring>),
    MultiPolygon(Vec<Vec<Ring>>),
}

impl Geometry {
    pub fn kind(&self) -> GeometryKind {
        match self {
            Geometry::Point(_) => GeometryKind::Point,
            Geometry::LineString(_) => GeometryKind::LineString,
            Geometry::MultiLineString(_) => GeometryKind::MultiLineString,
            Geometry::Polygon(_) => GeometryKind::Polygon,
            Geometry::MultiPolygon(_) => GeometryKind::MultiPolygon,
        }
    }

    #[inline]
    pub fn family(&self) -> GeometryFamily {
        self.kind().family()
    }

    pub fn envelope(&self) -> Bounds2D {
        let mut bounds = Bounds2D::empty();
        self.for_each_point(|point| bounds.include_point(point));
        bounds
    }

    pub fn vertex_count(&self) -> usize {
        let mut count = 0;
        self.for_each_point(|_| count += 1);
        count
    }

    pub fn for_each_point(&self, mut visit: impl FnMut(Point2)) {
        match self {
            Geometry::Point(point) => visit(*point),
            Geometry::LineString(points) => points.iter().copied().for_each(&mut visit),
            Geometry::MultiLineString(lines) | Geometry::Polygon(lines) => {
                lines.iter().flatten().copied().for_each(&mut visit)
            }
            Geometry::MultiPolygon(polygons) => polygons
                .iter()
                .flatten()
                .flatten()
                .copied()
                .for_each(&mut visit),
        }
    }

    /// 逐点映射坐标，保持点序、环与成员关系不变。
    pub fn try_map_points<E>(
        &self,
        mut map: impl FnMut(Point2) -> Result<Point2, E>,
    ) -> Result<Geometry, E> {
        let mut map_line = |points: &[Point2]| -> Result<Vec<Point2>, E> {
            points.iter().map(|point| map(*point)).collect()
        };
        Ok(match self {
            Geometry::Point(point) => Geometry::Point(map_line(std::slice::from_ref(point))?[0]),
            Geometry::LineString(points) => Geometry::LineString(map_line(points)?),
            Geometry::MultiLineString(lines) => Geometry::MultiLineString(
                lines
                    .iter()
                    .map(|line| map_line(line))
                    .collect::<Result<_, _>>()?,
            ),
            Geometry::Polygon(rings) => Geometry::Polygon(
                rings
                    .iter()
                    .map(|ring| map_line(ring))
                    .collect::<Result<_, _>>()?,
            ),
            Geometry::MultiPolygon(polygons) => Geometry::MultiPolygon(
                polygons
                    .iter()
                    .map(|rings| {
                        rings
                            .iter()
                            .map(|ring| map_line(ring))
                            .collect::<Result<Vec<_>, _>>()
                    })
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// 提升为同类别的多几何；点几何保持原样。
    pub fn into_multi(self) -> Geometry {
        match self {
            Geometry::LineString(points) => Geometry::MultiLineString(vec![points]),
            Geometry::Polygon(rings) => Geometry::MultiPolygon(vec![rings]),
            other => other,
        }
    }
}

/// 要素来源：顶层实体编号、DXF 类型名与（如有）所在块名。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub entity_id: EntityId,
    pub entity_type: String,
    pub block_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedGeometry {
    pub layer_name: String,
    pub geometry: Geometry,
    pub source: SourceRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Integer { width: u8 },
    Text { width: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
}

/// 输出属性表结构，字段顺序即写出顺序。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSchema {
    fields: Vec<FieldDef>,
}

impl AttributeSchema {
    pub const FID: &'static str = "fid";
    pub const LAYER: &'static str = "layer";
    pub const ENT_TYPE: &'static str = "ent_type";
    pub const BLK_NAME: &'static str = "blk_name";
    pub const SRC_ID: &'static str = "src_id";

    /// 所有图层共用的标准字段。
    pub fn standard() -> Self {
        let field = |name: &str, field_type, nullable| FieldDef {
            name: name.to_string(),
            field_type,
            nullable,
        };
        Self {
            fields: vec![
                field(Self::FID, FieldType::Integer { width: 18 }, false),
                field(Self::LAYER, FieldType::Text { width: 254 }, false),
                field(Self::ENT_TYPE, FieldType::Text { width: 32 }, false),
                field(Self::BLK_NAME, FieldType::Text { width: 100 }, true),
                field(Self::SRC_ID, FieldType::Integer { width: 18 }, false),
            ],
        }
    }

    #[inline]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }
}

impl Default for AttributeSchema {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Integer(i64),
    Text(String),
    Null,
}

/// 一个输出数据集（Shapefile 图层或 GeoPackage 要素表）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerOutput {
    pub name: String,
    pub source_layer: String,
    pub kind: GeometryKind,
    pub features: Vec<ResolvedGeometry>,
    pub schema: AttributeSchema,
}

impl LayerOutput {
    #[inline]
    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// 第 `index` 个要素的属性值，顺序与 [`AttributeSchema::standard`] 一致；fid 从 1 开始。
    pub fn attributes(&self, index: usize) -> Vec<AttributeValue> {
        let Some(feature) = self.features.get(index) else {
            return Vec::new();
        };
        vec![
            AttributeValue::Integer(index as i64 + 1),
            AttributeValue::Text(feature.layer_name.clone()),
            AttributeValue::Text(feature.source.entity_type.clone()),
            feature
                .source
                .block_name
                .clone()
                .map(AttributeValue::Text)
                .unwrap_or(AttributeValue::Null),
            AttributeValue::Integer(feature.source.entity_id.get() as i64),
        ]
    }

    pub fn envelope(&self) -> Bounds2D {
        let mut bounds = Bounds2D::empty();
        for feature in &self.features {
            bounds.include_bounds(&feature.geometry.envelope());
        }
        bounds
    }
}

/// 坐标参考系描述，来自 EPSG 注册表。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialReference {
    pub epsg: u32,
    pub name: String,
    pub proj4: String,
    pub wkt: String,
}

impl SpatialReference {
    /// proj4 定义是否为地理坐标（经纬度）。
    pub fn is_geographic(&self) -> bool {
        self.proj4
            .split_whitespace()
            .any(|token| matches!(token, "+proj=longlat" | "+proj=latlong" | "+proj=lonlat" | "+proj=latlon"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(id: u64) -> SourceRef {
        SourceRef {
            entity_id: EntityId::new(id),
            entity_type: "LINE".to_string(),
            block_name: None,
        }
    }

    #[test]
    fn promotion_stays_within_family() {
        let line = Geometry::LineString(vec![Point2::new(0.0, 0.0), Point2::new(1.0, 0.0)]);
        assert_eq!(line.clone().into_multi().kind(), GeometryKind::MultiLineString);
        assert_eq!(line.family(), GeometryFamily::Line);
        let point = Geometry::Point(Point2::new(1.0, 2.0));
        assert_eq!(point.into_multi().kind(), GeometryKind::Point);
        assert_eq!(GeometryFamily::Polygon.promoted_kind(), GeometryKind::MultiPolygon);
    }

    #[test]
    fn point_mapping_preserves_structure() {
        let polygon = Geometry::MultiPolygon(vec![vec![
            vec![
                Point2::new(0.0, 0.0),
                Point2::new(4.0, 0.0),
                Point2::new(4.0, 4.0),
                Point2::new(0.0, 0.0),
            ],
            vec![
                Point2::new(1.0, 1.0),
                Point2::new(2.0, 1.0),
                Point2::new(2.0, 2.0),
                Point2::new(1.0, 1.0),
            ],
        ]]);
        let shifted = polygon
            .try_map_points(|p| Ok::<_, ()>(Point2::new(p.x() + 10.0, p.y())))
            .expect("mapping never fails");
        let Geometry::MultiPolygon(polygons) = &shifted else {
            panic!("kind must be preserved");
        };
        assert_eq!(polygons[0].len(), 2);
        assert_eq!(polygons[0][1][2], Point2::new(12.0, 2.0));
        assert_eq!(shifted.vertex_count(), 8);
        let envelope = shifted.envelope();
        assert_eq!(envelope.min(), Point2::new(10.0, 0.0));
        assert_eq!(envelope.max(), Point2::new(14.0, 4.0));
    }

    #[test]
    fn attributes_follow_schema_order_with_one_based_fid() {
        let output = LayerOutput {
            name: "ROAD".to_string(),
            source_layer: "ROAD".to_string(),
            kind: GeometryKind::LineString,
            features: vec![ResolvedGeometry {
                layer_name: "ROAD".to_string(),
                geometry: Geometry::LineString(vec![Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)]),
                source: source(7),
            }],
            schema: AttributeSchema::standard(),
        };
        let values = output.attributes(0);
        assert_eq!(values.len(), output.schema.fields().len());
        assert_eq!(values[0], AttributeValue::Integer(1));
        assert_eq!(values[2], AttributeValue::Text("LINE".to_string()));
        assert_eq!(values[3], AttributeValue::Null);
        assert_eq!(values[4], AttributeValue::Integer(7));
        assert!(output.attributes(5).is_empty());
    }

    #[test]
    fn geographic_detection_reads_proj4_tokens() {
        let wgs84 = SpatialReference {
            epsg: 4326,
            name: "WGS 84".to_string(),
            proj4: "+proj=longlat +datum=WGS84 +no_defs".to_string(),
            wkt: String::new(),
        };
        assert!(wgs84.is_geographic());
        let twd97 = SpatialReference {
            proj4: "+proj=tmerc +lat_0=0 +lon_0=121 +k=0.9999 +x_0=250000".to_string(),
            ..wgs84
        };
        assert!(!twd97.is_geographic());
    }
}
