//! 坐标参考系查询与坐标转换。

use std::fmt;

use dxf2gis_core::features::{Geometry, SpatialReference};
use dxf2gis_core::geometry::{Bounds2D, Point2};
use proj4rs::proj::Proj;
use thiserror::Error;
use tracing::debug;

use crate::errors::EngineError;

pub const WGS84_EPSG: u32 = 4326;

/// 按 EPSG 编号查询坐标参考系定义。查询是只读的，可在线程间共享。
pub trait SpatialReferenceRegistry: Send + Sync {
    fn lookup(&self, epsg: u32) -> Option<SpatialReference>;
}

/// 内置 EPSG 表（proj4 与 WKT 字符串）。
#[derive(Debug, Default, Clone, Copy)]
pub struct EpsgRegistry;

impl SpatialReferenceRegistry for EpsgRegistry {
    fn lookup(&self, epsg: u32) -> Option<SpatialReference> {
        let code = u16::try_from(epsg).ok()?;
        let definition = crs_definitions::from_code(code)?;
        Some(SpatialReference {
            epsg,
            name: wkt_name(definition.wkt).unwrap_or_else(|| format!("EPSG:{epsg}")),
            proj4: definition.proj4.to_string(),
            wkt: definition.wkt.to_string(),
        })
    }
}

/// WKT 第一个带引号的字符串即坐标系名称。
fn wkt_name(wkt: &str) -> Option<String> {
    let start = wkt.find('"')? + 1;
    let length = wkt[start..].find('"')?;
    Some(wkt[start..start + length].to_string())
}

#[derive(Debug, Error)]
pub enum CrsError {
    #[error("坐标 ({x}, {y}) 转换失败: {message}")]
    Point { x: f64, y: f64, message: String },
}

struct Projection {
    from: Proj,
    to: Proj,
    from_geographic: bool,
    to_geographic: bool,
}

impl Projection {
    fn new(source: &SpatialReference, target: &SpatialReference) -> Result<Self, EngineError> {
        let parse = |srs: &SpatialReference| {
            Proj::from_proj_string(&srs.proj4).map_err(|err| {
                debug!(epsg = srs.epsg, error = ?err, "proj 定义无法解析");
                EngineError::UnknownCrs(srs.epsg)
            })
        };
        Ok(Self {
            from: parse(source)?,
            to: parse(target)?,
            from_geographic: source.is_geographic(),
            to_geographic: target.is_geographic(),
        })
    }

    /// 地理坐标系以度交换（x = 经度，y = 纬度），内部换算为弧度。
    fn apply(&self, point: Point2) -> Result<Point2, CrsError> {
        let (mut x, mut y) = (point.x(), point.y());
        if self.from_geographic {
            x = x.to_radians();
            y = y.to_radians();
        }
        let mut coordinate = (x, y, 0.0);
        proj4rs::transform::transform(&self.from, &self.to, &mut coordinate).map_err(|err| {
            CrsError::Point {
                x: point.x(),
                y: point.y(),
                message: format!("{err:?}"),
            }
        })?;
        let (mut x, mut y, _) = coordinate;
        if self.to_geographic {
            x = x.to_degrees();
            y = y.to_degrees();
        }
        if !x.is_finite() || !y.is_finite() {
            return Err(CrsError::Point {
                x: point.x(),
                y: point.y(),
                message: "结果不是有限数值".to_string(),
            });
        }
        Ok(Point2::new(x, y))
    }
}

/// 源坐标系 → 目标坐标系。未指定目标或目标与源相同时原样返回坐标。
pub struct CrsTransformer {
    source: SpatialReference,
    target: SpatialReference,
    projection: Option<Projection>,
}

impl fmt::Debug for CrsTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrsTransformer")
            .field("source", &self.source.epsg)
            .field("target", &self.target.epsg)
            .field("identity", &self.projection.is_none())
            .finish()
    }
}

impl CrsTransformer {
    /// 两个编号都必须能在注册表中找到，否则返回 `UnknownCrs`。
    pub fn new(
        registry: &dyn SpatialReferenceRegistry,
        source_epsg: u32,
        target_epsg: Option<u32>,
    ) -> Result<Self, EngineError> {
        let source = registry
            .lookup(source_epsg)
            .ok_or(EngineError::UnknownCrs(source_epsg))?;
        let target = match target_epsg {
            Some(code) if code != source_epsg => {
                registry.lookup(code).ok_or(EngineError::UnknownCrs(code))?
            }
            _ => source.clone(),
        };
        let projection = if target.epsg == source.epsg {
            None
        } else {
            Some(Projection::new(&source, &target)?)
        };
        debug!(
            source = source.epsg,
            target = target.epsg,
            identity = projection.is_none(),
            "坐标转换已就绪"
        );
        Ok(Self {
            source,
            target,
            projection,
        })
    }

    #[inline]
    pub fn source(&self) -> &SpatialReference {
        &self.source
    }

    /// 输出数据集标注的坐标系。
    #[inline]
    pub fn target(&self) -> &SpatialReference {
        &self.target
    }

    #[inline]
    pub fn is_identity(&self) -> bool {
        self.projection.is_none()
    }

    pub fn transform_point(&self, point: Point2) -> Result<Point2, CrsError> {
        match &self.projection {
            Some(projection) => projection.apply(point),
            None => Ok(point),
        }
    }

    /// 逐顶点转换，保持点序与环的归属。
    pub fn transform(&self, geometry: &Geometry) -> Result<Geometry, CrsError> {
        match &self.projection {
            Some(projection) => geometry.try_map_points(|point| projection.apply(point)),
            None => Ok(geometry.clone()),
        }
    }
}

/// WGS84 经纬度范围过滤：几何包络与范围相交才保留。
#[derive(Debug)]
pub struct BboxFilter {
    to_wgs84: CrsTransformer,
    bbox: Bounds2D,
}

impl BboxFilter {
    /// `bbox` 为 `[min_lon, min_lat, max_lon, max_lat]`。
    pub fn new(
        registry: &dyn SpatialReferenceRegistry,
        source_epsg: u32,
        bbox: [f64; 4],
    ) -> Result<Self, EngineError> {
        let [min_lon, min_lat, max_lon, max_lat] = bbox;
        Ok(Self {
            to_wgs84: CrsTransformer::new(registry, source_epsg, Some(WGS84_EPSG))?,
            bbox: Bounds2D::new(
                Point2::new(min_lon.min(max_lon), min_lat.min(max_lat)),
                Point2::new(min_lon.max(max_lon), min_lat.max(max_lat)),
            ),
        })
    }

    pub fn accepts(&self, geometry: &Geometry) -> Result<bool, CrsError> {
        let wgs84 = self.to_wgs84.transform(geometry)?;
        Ok(wgs84.envelope().intersects(&self.bbox))
    }
}
