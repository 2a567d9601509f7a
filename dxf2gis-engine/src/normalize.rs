//! 实体到 GIS 几何类型的映射。

use dxf2gis_core::document::{Entity, Face, Hatch, Polyline};
use dxf2gis_core::features::{Geometry, ResolvedGeometry, Ring};
use dxf2gis_core::geometry::{Flattening, Point2};
use thiserror::Error;

use crate::errors::Diagnostic;
use crate::merge::assemble_polygons;
use crate::resolve::{ResolvedEntity, Shape};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error("实体类型 {0} 没有对应的几何类型")]
    Unsupported(String),
    #[error("{entity_type} 几何退化: {reason}")]
    Degenerate {
        entity_type: String,
        reason: &'static str,
    },
}

impl NormalizeError {
    fn degenerate(entity: &Entity, reason: &'static str) -> Self {
        Self::Degenerate {
            entity_type: entity.dxf_type().to_string(),
            reason,
        }
    }
}

/// 把单个实体（世界坐标）映射为几何。块参照本身映射为插入点。
pub fn entity_geometries(
    entity: &Entity,
    flattening: &Flattening,
) -> Result<Vec<Geometry>, NormalizeError> {
    let geometry = match entity {
        Entity::Point(point) => Geometry::Point(point.location),
        Entity::BlockInsert(insert) => Geometry::Point(insert.insert),
        Entity::Line(line) => {
            if line.start == line.end {
                return Err(NormalizeError::degenerate(entity, "零长度线段"));
            }
            Geometry::LineString(vec![line.start, line.end])
        }
        Entity::Polyline(polyline) => polyline_geometry(polyline, flattening)
            .ok_or_else(|| NormalizeError::degenerate(entity, "多段线没有顶点"))?,
        Entity::Arc(arc) => {
            if arc.radius <= 0.0 {
                return Err(NormalizeError::degenerate(entity, "圆弧半径不为正"));
            }
            Geometry::LineString(dedup(arc.points(flattening)))
        }
        Entity::Circle(circle) => {
            if circle.radius <= 0.0 {
                return Err(NormalizeError::degenerate(entity, "圆半径不为正"));
            }
            Geometry::Polygon(vec![circle.points(flattening)])
        }
        Entity::Ellipse(ellipse) => {
            if ellipse.major_axis.length() <= 0.0 || ellipse.ratio <= 0.0 {
                return Err(NormalizeError::degenerate(entity, "椭圆轴长不为正"));
            }
            let points = dedup(ellipse.points(flattening));
            if ellipse.is_full() {
                Geometry::Polygon(vec![points])
            } else {
                Geometry::LineString(points)
            }
        }
        Entity::Hatch(hatch) => hatch_geometry(hatch, flattening)
            .ok_or_else(|| NormalizeError::degenerate(entity, "填充边界没有有效的环"))?,
        Entity::Face(face) => face_geometry(face)
            .ok_or_else(|| NormalizeError::degenerate(entity, "面片少于三个不同顶点"))?,
        Entity::Unsupported(unsupported) => {
            return Err(NormalizeError::Unsupported(unsupported.kind.clone()));
        }
    };
    Ok(vec![geometry])
}

/// 解析结果 → 要素几何。复合形状直接展开为已组装好的几何。
pub fn normalize(
    resolved: ResolvedEntity,
    flattening: &Flattening,
) -> Result<Vec<ResolvedGeometry>, Diagnostic> {
    let ResolvedEntity {
        layer,
        shape,
        source,
    } = resolved;
    let geometries = match shape {
        Shape::Composite(geometries) => geometries,
        Shape::Entity(entity) => match entity_geometries(&entity, flattening) {
            Ok(geometries) => geometries,
            Err(NormalizeError::Unsupported(kind)) => {
                return Err(Diagnostic::UnsupportedEntity {
                    layer,
                    entity_type: kind,
                    entity_id: source.entity_id,
                });
            }
            Err(err) => {
                return Err(Diagnostic::Geometry {
                    message: format!("实体 #{}: {err}", source.entity_id.get()),
                    layer,
                });
            }
        },
    };
    Ok(geometries
        .into_iter()
        .map(|geometry| ResolvedGeometry {
            layer_name: layer.clone(),
            geometry,
            source: source.clone(),
        })
        .collect())
}

fn dedup(mut points: Vec<Point2>) -> Vec<Point2> {
    points.dedup();
    points
}

fn distinct_count(ring: &[Point2]) -> usize {
    let open = match (ring.first(), ring.last()) {
        (Some(first), Some(last)) if ring.len() > 1 && first == last => &ring[..ring.len() - 1],
        _ => ring,
    };
    let mut distinct: Vec<Point2> = Vec::with_capacity(open.len());
    for point in open {
        if !distinct.contains(point) {
            distinct.push(*point);
        }
    }
    distinct.len()
}

/// 首尾补齐成闭合环，少于三个不同顶点时返回 `None`。
fn close_ring(points: Vec<Point2>) -> Option<Ring> {
    let mut ring = dedup(points);
    if distinct_count(&ring) < 3 {
        return None;
    }
    if ring.first() != ring.last() {
        let first = ring[0];
        ring.push(first);
    }
    Some(ring)
}

fn polyline_geometry(polyline: &Polyline, flattening: &Flattening) -> Option<Geometry> {
    let first = polyline.vertices.first()?;
    let mut points = dedup(polyline.points(flattening));
    if points.len() < 2 {
        return Some(Geometry::Point(first.position));
    }
    let positions: Vec<Point2> = polyline.vertices.iter().map(|vertex| vertex.position).collect();
    // 顶点不足三个时按开放线处理，即使 bulge 能展开出面积
    if polyline.is_closed && distinct_count(&positions) >= 3 {
        if points.first() != points.last() {
            points.push(first.position);
        }
        return Some(Geometry::Polygon(vec![points]));
    }
    Some(Geometry::LineString(points))
}

fn hatch_geometry(hatch: &Hatch, flattening: &Flattening) -> Option<Geometry> {
    let rings: Vec<Ring> = hatch
        .loops
        .iter()
        .filter_map(|boundary| close_ring(boundary.points(flattening)))
        .collect();
    let mut polygons = assemble_polygons(rings);
    match polygons.len() {
        0 => None,
        1 => Some(Geometry::Polygon(polygons.remove(0))),
        _ => Some(Geometry::MultiPolygon(polygons)),
    }
}

fn face_geometry(face: &Face) -> Option<Geometry> {
    close_ring(face.vertices.to_vec()).map(|ring| Geometry::Polygon(vec![ring]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dxf2gis_core::document::{
        Arc, Circle, Drawing, EntityId, HatchEdge, HatchLoop, Line, PolylineVertex, Unsupported,
    };
    use dxf2gis_core::features::{GeometryKind, SourceRef};
    use std::f64::consts::PI;

    fn p(x: f64, y: f64) -> Point2 {
        Point2::new(x, y)
    }

    fn polyline(points: &[(f64, f64)], is_closed: bool) -> Entity {
        Entity::Polyline(Polyline {
            vertices: points
                .iter()
                .map(|&(x, y)| PolylineVertex::new(p(x, y)))
                .collect(),
            is_closed,
            layer: "A".to_string(),
        })
    }

    fn kinds(entity: &Entity) -> Vec<GeometryKind> {
        entity_geometries(entity, &Flattening::default())
            .expect("应能映射几何")
            .iter()
            .map(Geometry::kind)
            .collect()
    }

    #[test]
    fn basic_entities_map_to_expected_kinds() {
        let line = Entity::Line(Line {
            start: p(0.0, 0.0),
            end: p(1.0, 0.0),
            layer: "A".to_string(),
        });
        assert_eq!(kinds(&line), vec![GeometryKind::LineString]);
        assert_eq!(
            kinds(&polyline(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)], false)),
            vec![GeometryKind::LineString]
        );
        assert_eq!(
            kinds(&polyline(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)], true)),
            vec![GeometryKind::Polygon]
        );
        let circle = Entity::Circle(Circle {
            center: p(0.0, 0.0),
            radius: 2.0,
            layer: "A".to_string(),
        });
        assert_eq!(kinds(&circle), vec![GeometryKind::Polygon]);
        let arc = Entity::Arc(Arc {
            center: p(0.0, 0.0),
            radius: 2.0,
            start_angle: 0.0,
            end_angle: PI,
            layer: "A".to_string(),
        });
        assert_eq!(kinds(&arc), vec![GeometryKind::LineString]);
    }

    #[test]
    fn closed_polyline_with_two_vertices_falls_back_to_line() {
        assert_eq!(
            kinds(&polyline(&[(0.0, 0.0), (1.0, 0.0)], true)),
            vec![GeometryKind::LineString]
        );
        assert_eq!(kinds(&polyline(&[(5.0, 5.0)], false)), vec![GeometryKind::Point]);
    }

    #[test]
    fn closed_polyline_ring_is_explicitly_closed() {
        let geometries =
            entity_geometries(&polyline(&[(0.0, 0.0), (4.0, 0.0), (4.0, 3.0)], true), &Flattening::default())
                .expect("应能映射几何");
        let Geometry::Polygon(rings) = &geometries[0] else {
            panic!("应为面");
        };
        assert_eq!(rings[0].len(), 4);
        assert_eq!(rings[0].first(), rings[0].last());
    }

    #[test]
    fn hatch_with_inner_loop_becomes_polygon_with_hole() {
        let square = |min: f64, max: f64| HatchLoop {
            edges: vec![
                HatchEdge::Line { start: p(min, min), end: p(max, min) },
                HatchEdge::Line { start: p(max, min), end: p(max, max) },
                HatchEdge::Line { start: p(max, max), end: p(min, max) },
                HatchEdge::Line { start: p(min, max), end: p(min, min) },
            ],
        };
        let hatch = Entity::Hatch(Hatch {
            loops: vec![square(0.0, 10.0), square(3.0, 6.0)],
            layer: "A".to_string(),
        });
        let geometries = entity_geometries(&hatch, &Flattening::default()).expect("应能映射几何");
        let Geometry::Polygon(rings) = &geometries[0] else {
            panic!("应为面");
        };
        assert_eq!(rings.len(), 2);
    }

    #[test]
    fn unsupported_entity_becomes_diagnostic() {
        let resolved = ResolvedEntity {
            layer: "NOTES".to_string(),
            shape: Shape::Entity(Entity::Unsupported(Unsupported {
                kind: "TEXT".to_string(),
                layer: "NOTES".to_string(),
            })),
            source: SourceRef {
                entity_id: EntityId::new(7),
                entity_type: "TEXT".to_string(),
                block_name: None,
            },
        };
        let diagnostic = normalize(resolved, &Flattening::default()).unwrap_err();
        assert_eq!(
            diagnostic,
            Diagnostic::UnsupportedEntity {
                layer: "NOTES".to_string(),
                entity_type: "TEXT".to_string(),
                entity_id: EntityId::new(7),
            }
        );
    }

    #[test]
    fn zero_length_line_is_reported_as_geometry_problem() {
        let mut drawing = Drawing::new();
        let id = drawing.add_line(p(1.0, 1.0), p(1.0, 1.0), "A");
        let entity = drawing.entity(id).cloned().expect("实体应存在");
        let resolved = ResolvedEntity {
            layer: "A".to_string(),
            shape: Shape::Entity(entity),
            source: SourceRef {
                entity_id: id,
                entity_type: "LINE".to_string(),
                block_name: None,
            },
        };
        let diagnostic = normalize(resolved, &Flattening::default()).unwrap_err();
        assert!(matches!(diagnostic, Diagnostic::Geometry { .. }), "{diagnostic:?}");
    }
}
