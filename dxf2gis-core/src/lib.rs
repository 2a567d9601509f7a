pub mod features;

pub mod geometry {
    use std::f64::consts::TAU;

    use glam::{DAffine2, DVec2};
    use serde::{Deserialize, Serialize};

    /// 二维点，内部以 `glam::DVec2` 表示，保持与 DXF 双精度坐标一致。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Point2(pub DVec2);

    impl Point2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn from_vec(vec: DVec2) -> Self {
            Self(vec)
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }

        #[inline]
        pub fn distance(self, other: Point2) -> f64 {
            self.0.distance(other.0)
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }
    }

    impl From<DVec2> for Point2 {
        fn from(value: DVec2) -> Self {
            Self::from_vec(value)
        }
    }

    /// 二维向量，用于缩放系数、椭圆主轴等。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Vector2(pub DVec2);

    impl Vector2 {
        #[inline]
        pub fn new(x: f64, y: f64) -> Self {
            Self(DVec2::new(x, y))
        }

        #[inline]
        pub fn length(self) -> f64 {
            self.0.length()
        }

        #[inline]
        pub fn length_squared(self) -> f64 {
            self.0.length_squared()
        }

        #[inline]
        pub fn as_vec2(self) -> DVec2 {
            self.0
        }

        #[inline]
        pub fn x(self) -> f64 {
            self.0.x
        }

        #[inline]
        pub fn y(self) -> f64 {
            self.0.y
        }
    }

    impl From<DVec2> for Vector2 {
        fn from(value: DVec2) -> Self {
            Self(value)
        }
    }

    /// 轴对齐边界框，用于要素范围与 WGS84 范围过滤。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Bounds2D {
        min: Point2,
        max: Point2,
    }

    impl Bounds2D {
        #[inline]
        pub fn new(min: Point2, max: Point2) -> Self {
            Self { min, max }
        }

        #[inline]
        pub fn empty() -> Self {
            Self {
                min: Point2::new(f64::INFINITY, f64::INFINITY),
                max: Point2::new(f64::NEG_INFINITY, f64::NEG_INFINITY),
            }
        }

        #[inline]
        pub fn is_empty(&self) -> bool {
            self.min.x() > self.max.x() || self.min.y() > self.max.y()
        }

        #[inline]
        pub fn min(&self) -> Point2 {
            self.min
        }

        #[inline]
        pub fn max(&self) -> Point2 {
            self.max
        }

        pub fn include_point(&mut self, point: Point2) {
            if self.is_empty() {
                self.min = point;
                self.max = point;
                return;
            }
            let min_vec = self.min.as_vec2().min(point.as_vec2());
            let max_vec = self.max.as_vec2().max(point.as_vec2());
            self.min = Point2::from_vec(min_vec);
            self.max = Point2::from_vec(max_vec);
        }

        pub fn include_bounds(&mut self, other: &Bounds2D) {
            if other.is_empty() {
                return;
            }
            self.include_point(other.min);
            self.include_point(other.max);
        }

        /// 闭区间相交判定，边界接触也算相交。
        pub fn intersects(&self, other: &Bounds2D) -> bool {
            if self.is_empty() || other.is_empty() {
                return false;
            }
            self.min.x() <= other.max.x()
                && other.min.x() <= self.max.x()
                && self.min.y() <= other.max.y()
                && other.min.y() <= self.max.y()
        }
    }

    const SIMILARITY_EPSILON: f64 = 1e-9;

    /// 块插入的放置变换：先缩放、再旋转、最后平移（均相对块基点）。
    ///
    /// 嵌套插入通过 [`Placement::then`] 组合，父变换在外层。
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct Placement(DAffine2);

    impl Placement {
        pub const IDENTITY: Placement = Placement(DAffine2::IDENTITY);

        pub fn for_insert(insert: Point2, scale: Vector2, rotation: f64, base_point: Point2) -> Self {
            let placed = DAffine2::from_scale_angle_translation(scale.0, rotation, insert.0);
            Self(placed * DAffine2::from_translation(-base_point.0))
        }

        /// 返回 `self ∘ child`：先应用子变换，再应用当前变换。
        #[inline]
        pub fn then(&self, child: &Placement) -> Placement {
            Placement(self.0 * child.0)
        }

        #[inline]
        pub fn apply(&self, point: Point2) -> Point2 {
            Point2(self.0.transform_point2(point.0))
        }

        #[inline]
        pub fn apply_vector(&self, vector: Vector2) -> Vector2 {
            Vector2(self.0.transform_vector2(vector.0))
        }

        /// 若线性部分是相似变换（等比缩放 + 旋转，可含镜像），返回缩放系数。
        pub fn similarity_scale(&self) -> Option<f64> {
            let x_axis = self.0.matrix2.x_axis;
            let y_axis = self.0.matrix2.y_axis;
            let sx = x_axis.length();
            let sy = y_axis.length();
            if sx <= SIMILARITY_EPSILON || sy <= SIMILARITY_EPSILON {
                return None;
            }
            let tolerance = SIMILARITY_EPSILON * sx.max(sy).max(1.0);
            if (sx - sy).abs() > tolerance || x_axis.dot(y_axis).abs() > tolerance * sx.max(sy) {
                return None;
            }
            Some(sx)
        }

        #[inline]
        pub fn is_mirrored(&self) -> bool {
            self.0.matrix2.determinant() < 0.0
        }

        /// X 轴经变换后的方向角（弧度）。
        #[inline]
        pub fn rotation(&self) -> f64 {
            let x_axis = self.0.matrix2.x_axis;
            x_axis.y.atan2(x_axis.x)
        }
    }

    impl Default for Placement {
        fn default() -> Self {
            Self::IDENTITY
        }
    }

    /// 曲线离散化参数：弦高容差与每整圆最少分段数。
    #[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
    pub struct Flattening {
        pub chord_tolerance: f64,
        pub min_segments_per_turn: usize,
        pub max_segments: usize,
    }

    impl Flattening {
        pub const DEFAULT_TOLERANCE: f64 = 0.2;

        pub fn with_tolerance(chord_tolerance: f64) -> Self {
            Self {
                chord_tolerance,
                ..Self::default()
            }
        }

        /// 给定半径与扫掠角（弧度，可为负）所需的分段数。
        pub fn segments_for(&self, radius: f64, sweep: f64) -> usize {
            let sweep = sweep.abs();
            if sweep <= f64::EPSILON {
                return 1;
            }
            let turns = sweep / TAU;
            let minimum = (self.min_segments_per_turn as f64 * turns).ceil().max(1.0);
            let radius = radius.abs();
            let by_tolerance = if self.chord_tolerance > 0.0 && radius > self.chord_tolerance {
                let step = 2.0 * (1.0 - self.chord_tolerance / radius).acos();
                if step > f64::EPSILON {
                    (sweep / step).ceil()
                } else {
                    minimum
                }
            } else {
                minimum
            };
            let count = by_tolerance.max(minimum) as usize;
            count.clamp(1, self.max_segments.max(1))
        }
    }

    impl Default for Flattening {
        fn default() -> Self {
            Self {
                chord_tolerance: Self::DEFAULT_TOLERANCE,
                min_segments_per_turn: 24,
                max_segments: 4096,
            }
        }
    }

    pub fn normalize_angle(angle: f64) -> f64 {
        let mut result = angle % TAU;
        if result < 0.0 {
            result += TAU;
        }
        result
    }

    /// 将起止角规整到 `[start, end]`，且 `0 < end - start <= TAU`；起止相同视为整圆。
    pub fn canonical_interval(start: f64, end: f64) -> (f64, f64) {
        let start = normalize_angle(start);
        let mut end = normalize_angle(end);
        if (end - start).abs() < 1e-9 {
            end = start + TAU;
        } else if end < start {
            end += TAU;
        }
        (start, end)
    }

    /// 沿圆弧采样，结果包含起点与终点；`sweep` 为负表示顺时针。
    pub fn arc_points(
        center: Point2,
        radius: f64,
        start_angle: f64,
        sweep: f64,
        flattening: &Flattening,
    ) -> Vec<Point2> {
        let radius = radius.abs();
        let segments = flattening.segments_for(radius, sweep);
        (0..=segments)
            .map(|i| {
                let angle = start_angle + sweep * (i as f64 / segments as f64);
                Point2::new(
                    center.x() + radius * angle.cos(),
                    center.y() + radius * angle.sin(),
                )
            })
            .collect()
    }

    /// 多段线 bulge 段离散化，结果不含起点、包含终点。
    pub fn bulge_points(start: Point2, end: Point2, bulge: f64, flattening: &Flattening) -> Vec<Point2> {
        let chord = end.as_vec2() - start.as_vec2();
        let chord_len = chord.length();
        if bulge.abs() <= 1e-9 || chord_len <= f64::EPSILON {
            return vec![end];
        }

        let sweep = 4.0 * bulge.atan();
        let midpoint = (start.as_vec2() + end.as_vec2()) * 0.5;
        let left = DVec2::new(-chord.y, chord.x) / chord_len;
        let offset = chord_len * 0.5 * (1.0 - bulge * bulge) / (2.0 * bulge);
        let center = midpoint + left * offset;
        let start_dir = start.as_vec2() - center;
        let radius = start_dir.length();
        let start_angle = start_dir.y.atan2(start_dir.x);

        let mut points = arc_points(Point2::from_vec(center), radius, start_angle, sweep, flattening);
        points.remove(0);
        if let Some(last) = points.last_mut() {
            *last = end;
        }
        points
    }

    /// 椭圆（弧）采样，参数区间按逆时针方向规整，结果包含两端点。
    pub fn ellipse_points(
        center: Point2,
        major_axis: Vector2,
        ratio: f64,
        start_parameter: f64,
        end_parameter: f64,
        flattening: &Flattening,
    ) -> Vec<Point2> {
        let major = major_axis.as_vec2();
        let minor = DVec2::new(-major.y, major.x) * ratio;
        let (start, end) = canonical_interval(start_parameter, end_parameter);
        let sweep = end - start;
        let segments = flattening.segments_for(major.length(), sweep);
        (0..=segments)
            .map(|i| {
                let t = start + sweep * (i as f64 / segments as f64);
                Point2::from_vec(center.as_vec2() + major * t.cos() + minor * t.sin())
            })
            .collect()
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::f64::consts::{FRAC_PI_2, PI};

        #[test]
        fn placement_scales_then_rotates_then_translates() {
            let placement = Placement::for_insert(
                Point2::new(100.0, 200.0),
                Vector2::new(2.0, 2.0),
                FRAC_PI_2,
                Point2::new(0.0, 0.0),
            );
            let mapped = placement.apply(Point2::new(1.0, 0.0));
            assert!((mapped.x() - 100.0).abs() < 1e-9);
            assert!((mapped.y() - 202.0).abs() < 1e-9);
            assert_eq!(placement.similarity_scale().map(|s| (s * 1e6).round()), Some(2e6));
            assert!(!placement.is_mirrored());
        }

        #[test]
        fn placement_honours_block_base_point() {
            let placement = Placement::for_insert(
                Point2::new(10.0, 10.0),
                Vector2::new(1.0, 1.0),
                0.0,
                Point2::new(5.0, 5.0),
            );
            let mapped = placement.apply(Point2::new(5.0, 5.0));
            assert!((mapped.x() - 10.0).abs() < 1e-9);
            assert!((mapped.y() - 10.0).abs() < 1e-9);
        }

        #[test]
        fn nested_placements_compose_parent_outside() {
            let parent = Placement::for_insert(
                Point2::new(10.0, 0.0),
                Vector2::new(1.0, 1.0),
                FRAC_PI_2,
                Point2::new(0.0, 0.0),
            );
            let child = Placement::for_insert(
                Point2::new(1.0, 0.0),
                Vector2::new(3.0, 3.0),
                0.0,
                Point2::new(0.0, 0.0),
            );
            let composed = parent.then(&child);
            let mapped = composed.apply(Point2::new(1.0, 0.0));
            // 子变换：(1,0) -> (4,0)；父变换：旋转 90° 后平移 -> (10,4)
            assert!((mapped.x() - 10.0).abs() < 1e-9);
            assert!((mapped.y() - 4.0).abs() < 1e-9);
        }

        #[test]
        fn non_uniform_and_mirrored_placements_are_detected() {
            let stretched = Placement::for_insert(
                Point2::new(0.0, 0.0),
                Vector2::new(2.0, 1.0),
                0.3,
                Point2::new(0.0, 0.0),
            );
            assert!(stretched.similarity_scale().is_none());

            let mirrored = Placement::for_insert(
                Point2::new(0.0, 0.0),
                Vector2::new(-1.0, 1.0),
                0.0,
                Point2::new(0.0, 0.0),
            );
            assert!(mirrored.is_mirrored());
            assert!(mirrored.similarity_scale().is_some());
        }

        #[test]
        fn flattening_respects_minimum_segments() {
            let flattening = Flattening::default();
            assert_eq!(flattening.segments_for(0.01, TAU), 24);
            assert!(flattening.segments_for(1_000.0, TAU) > 24);
            assert_eq!(flattening.segments_for(1.0, 0.0), 1);
        }

        #[test]
        fn semicircle_bulge_passes_through_apex() {
            let points = bulge_points(
                Point2::new(0.0, 0.0),
                Point2::new(10.0, 0.0),
                1.0,
                &Flattening::default(),
            );
            let last = points.last().copied().expect("bulge segment should end at end point");
            assert_eq!(last, Point2::new(10.0, 0.0));
            // bulge 为正表示逆时针，从 (0,0) 到 (10,0) 的半圆位于下方
            let min_y = points.iter().map(|p| p.y()).fold(f64::INFINITY, f64::min);
            assert!((min_y + 5.0).abs() < 0.2);
            for point in &points {
                assert!((point.distance(Point2::new(5.0, 0.0)) - 5.0).abs() < 1e-9);
            }
        }

        #[test]
        fn arc_points_stay_within_chord_tolerance() {
            let flattening = Flattening::with_tolerance(0.01);
            let points = arc_points(Point2::new(0.0, 0.0), 10.0, 0.0, PI, &flattening);
            for pair in points.windows(2) {
                let mid = (pair[0].as_vec2() + pair[1].as_vec2()) * 0.5;
                assert!(10.0 - mid.length() <= 0.01 + 1e-9);
            }
        }

        #[test]
        fn bounds_intersection_includes_touching_edges() {
            let a = Bounds2D::new(Point2::new(0.0, 0.0), Point2::new(1.0, 1.0));
            let b = Bounds2D::new(Point2::new(1.0, 1.0), Point2::new(2.0, 2.0));
            let c = Bounds2D::new(Point2::new(1.5, 1.5), Point2::new(2.0, 2.0));
            assert!(a.intersects(&b));
            assert!(!a.intersects(&c));
            assert!(!Bounds2D::empty().intersects(&a));
        }
    }
}

pub mod document {
    use std::f64::consts::TAU;

    use indexmap::IndexMap;
    use serde::{Deserialize, Serialize};

    use crate::geometry::{
        Flattening, Placement, Point2, Vector2, arc_points, bulge_points, canonical_interval,
        ellipse_points,
    };

    /// DXF 的 0 图层：块内位于该图层的实体随插入所在图层。
    pub const DEFAULT_LAYER: &str = "0";

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    pub struct EntityId(u64);

    impl EntityId {
        #[inline]
        pub fn new(raw: u64) -> Self {
            Self(raw)
        }

        /// 提供原始数值，便于序列化或日志输出。
        #[inline]
        pub fn get(self) -> u64 {
            self.0
        }
    }

    /// 图纸实体。封闭枚举：新增图元必须同步扩展所有 `match`。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum Entity {
        Line(Line),
        Polyline(Polyline),
        Arc(Arc),
        Circle(Circle),
        Point(Point),
        Ellipse(Ellipse),
        Hatch(Hatch),
        Face(Face),
        BlockInsert(BlockInsert),
        Unsupported(Unsupported),
    }

    impl Entity {
        #[inline]
        pub fn layer_name(&self) -> &str {
            match self {
                Entity::Line(line) => &line.layer,
                Entity::Polyline(polyline) => &polyline.layer,
                Entity::Arc(arc) => &arc.layer,
                Entity::Circle(circle) => &circle.layer,
                Entity::Point(point) => &point.layer,
                Entity::Ellipse(ellipse) => &ellipse.layer,
                Entity::Hatch(hatch) => &hatch.layer,
                Entity::Face(face) => &face.layer,
                Entity::BlockInsert(insert) => &insert.layer,
                Entity::Unsupported(other) => &other.layer,
            }
        }

        pub fn set_layer(&mut self, layer: impl Into<String>) {
            let slot = match self {
                Entity::Line(line) => &mut line.layer,
                Entity::Polyline(polyline) => &mut polyline.layer,
                Entity::Arc(arc) => &mut arc.layer,
                Entity::Circle(circle) => &mut circle.layer,
                Entity::Point(point) => &mut point.layer,
                Entity::Ellipse(ellipse) => &mut ellipse.layer,
                Entity::Hatch(hatch) => &mut hatch.layer,
                Entity::Face(face) => &mut face.layer,
                Entity::BlockInsert(insert) => &mut insert.layer,
                Entity::Unsupported(other) => &mut other.layer,
            };
            *slot = layer.into();
        }

        /// 块内实体位于 0 图层（或未指定图层）时随插入图层。
        #[inline]
        pub fn inherits_layer(&self) -> bool {
            let layer = self.layer_name();
            layer.is_empty() || layer == DEFAULT_LAYER
        }

        /// DXF 实体类型名，用于属性表与诊断信息。
        pub fn dxf_type(&self) -> &str {
            match self {
                Entity::Line(_) => "LINE",
                Entity::Polyline(_) => "POLYLINE",
                Entity::Arc(_) => "ARC",
                Entity::Circle(_) => "CIRCLE",
                Entity::Point(_) => "POINT",
                Entity::Ellipse(_) => "ELLIPSE",
                Entity::Hatch(_) => "HATCH",
                Entity::Face(face) => {
                    if face.is_solid {
                        "SOLID"
                    } else {
                        "3DFACE"
                    }
                }
                Entity::BlockInsert(_) => "INSERT",
                Entity::Unsupported(other) => &other.kind,
            }
        }

        /// 按放置变换生成新实体。相似变换下保留圆弧等解析形式，
        /// 非均匀缩放或镜像无法精确表达时先离散化为多段线再映射。
        pub fn transformed(&self, placement: &Placement, flattening: &Flattening) -> Entity {
            let scale = placement.similarity_scale();
            let mirrored = placement.is_mirrored();
            match self {
                Entity::Line(line) => Entity::Line(Line {
                    start: placement.apply(line.start),
                    end: placement.apply(line.end),
                    layer: line.layer.clone(),
                }),
                Entity::Point(point) => Entity::Point(Point {
                    location: placement.apply(point.location),
                    layer: point.layer.clone(),
                }),
                Entity::Face(face) => Entity::Face(Face {
                    vertices: face.vertices.map(|vertex| placement.apply(vertex)),
                    is_solid: face.is_solid,
                    layer: face.layer.clone(),
                }),
                Entity::Polyline(polyline) => {
                    if scale.is_some() {
                        let sign = if mirrored { -1.0 } else { 1.0 };
                        Entity::Polyline(Polyline {
                            vertices: polyline
                                .vertices
                                .iter()
                                .map(|vertex| {
                                    PolylineVertex::with_bulge(
                                        placement.apply(vertex.position),
                                        vertex.bulge * sign,
                                    )
                                })
                                .collect(),
                            is_closed: polyline.is_closed,
                            layer: polyline.layer.clone(),
                        })
                    } else {
                        let mut points = polyline.points(flattening);
                        if polyline.is_closed && points.len() > 1 {
                            points.pop();
                        }
                        flattened_polyline(points, polyline.is_closed, &polyline.layer, placement)
                    }
                }
                Entity::Circle(circle) => match scale {
                    Some(scale) => Entity::Circle(Circle {
                        center: placement.apply(circle.center),
                        radius: circle.radius * scale,
                        layer: circle.layer.clone(),
                    }),
                    None => {
                        let mut points = circle.points(flattening);
                        points.pop();
                        flattened_polyline(points, true, &circle.layer, placement)
                    }
                },
                Entity::Arc(arc) => match scale {
                    Some(scale) => {
                        let rotation = placement.rotation();
                        let (start_angle, end_angle) = if mirrored {
                            (rotation - arc.end_angle, rotation - arc.start_angle)
                        } else {
                            (arc.start_angle + rotation, arc.end_angle + rotation)
                        };
                        Entity::Arc(Arc {
                            center: placement.apply(arc.center),
                            radius: arc.radius * scale,
                            start_angle,
                            end_angle,
                            layer: arc.layer.clone(),
                        })
                    }
                    None => flattened_polyline(arc.points(flattening), false, &arc.layer, placement),
                },
                Entity::Ellipse(ellipse) => {
                    if scale.is_some() && !mirrored {
                        Entity::Ellipse(Ellipse {
                            center: placement.apply(ellipse.center),
                            major_axis: placement.apply_vector(ellipse.major_axis),
                            ratio: ellipse.ratio,
                            start_parameter: ellipse.start_parameter,
                            end_parameter: ellipse.end_parameter,
                            layer: ellipse.layer.clone(),
                        })
                    } else {
                        let closed = ellipse.is_full();
                        let mut points = ellipse.points(flattening);
                        if closed {
                            points.pop();
                        }
                        flattened_polyline(points, closed, &ellipse.layer, placement)
                    }
                }
                Entity::Hatch(hatch) => Entity::Hatch(Hatch {
                    loops: hatch
                        .loops
                        .iter()
                        .map(|boundary| boundary.transformed(placement, flattening))
                        .collect(),
                    layer: hatch.layer.clone(),
                }),
                Entity::BlockInsert(insert) => {
                    // 非均匀缩放下单个 INSERT 无法表达组合结果，块解析应直接组合 Placement。
                    let rotation = placement.rotation();
                    let (scale_factor, rotation) = match scale {
                        Some(scale) if mirrored => (
                            Vector2::new(insert.scale.x() * scale, -insert.scale.y() * scale),
                            rotation - insert.rotation,
                        ),
                        Some(scale) => (
                            Vector2::new(insert.scale.x() * scale, insert.scale.y() * scale),
                            rotation + insert.rotation,
                        ),
                        None => (insert.scale, insert.rotation),
                    };
                    Entity::BlockInsert(BlockInsert {
                        block_name: insert.block_name.clone(),
                        insert: placement.apply(insert.insert),
                        scale: scale_factor,
                        rotation,
                        layer: insert.layer.clone(),
                    })
                }
                Entity::Unsupported(other) => Entity::Unsupported(other.clone()),
            }
        }
    }

    fn flattened_polyline(
        points: Vec<Point2>,
        is_closed: bool,
        layer: &str,
        placement: &Placement,
    ) -> Entity {
        Entity::Polyline(Polyline {
            vertices: points
                .into_iter()
                .map(|point| PolylineVertex::new(placement.apply(point)))
                .collect(),
            is_closed,
            layer: layer.to_string(),
        })
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Line {
        pub start: Point2,
        pub end: Point2,
        pub layer: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Circle {
        pub center: Point2,
        pub radius: f64,
        pub layer: String,
    }

    impl Circle {
        /// 整圆离散点，首尾重合。
        pub fn points(&self, flattening: &Flattening) -> Vec<Point2> {
            let mut points = arc_points(self.center, self.radius, 0.0, TAU, flattening);
            if let (Some(first), Some(last)) = (points.first().copied(), points.last_mut()) {
                *last = first;
            }
            points
        }
    }

    /// 圆弧实体，角度以弧度形式储存，遵循数学正方向。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Arc {
        pub center: Point2,
        pub radius: f64,
        pub start_angle: f64,
        pub end_angle: f64,
        pub layer: String,
    }

    impl Arc {
        pub fn points(&self, flattening: &Flattening) -> Vec<Point2> {
            let (start, end) = canonical_interval(self.start_angle, self.end_angle);
            arc_points(self.center, self.radius, start, end - start, flattening)
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Point {
        pub location: Point2,
        pub layer: String,
    }

    /// 椭圆实体，记录主轴向量与参数范围（单位为弧度）。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Ellipse {
        pub center: Point2,
        pub major_axis: Vector2,
        pub ratio: f64,
        pub start_parameter: f64,
        pub end_parameter: f64,
        pub layer: String,
    }

    impl Ellipse {
        pub fn is_full(&self) -> bool {
            let (start, end) = canonical_interval(self.start_parameter, self.end_parameter);
            end - start >= TAU - 1e-9
        }

        pub fn points(&self, flattening: &Flattening) -> Vec<Point2> {
            let mut points = ellipse_points(
                self.center,
                self.major_axis,
                self.ratio,
                self.start_parameter,
                self.end_parameter,
                flattening,
            );
            if self.is_full() {
                if let (Some(first), Some(last)) = (points.first().copied(), points.last_mut()) {
                    *last = first;
                }
            }
            points
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Polyline {
        pub vertices: Vec<PolylineVertex>,
        pub is_closed: bool,
        pub layer: String,
    }

    impl Polyline {
        /// 展开 bulge 后的顶点序列；闭合多段线以首点收尾。
        pub fn points(&self, flattening: &Flattening) -> Vec<Point2> {
            let mut points = Vec::with_capacity(self.vertices.len());
            let Some(first) = self.vertices.first() else {
                return points;
            };
            points.push(first.position);
            for pair in self.vertices.windows(2) {
                points.extend(bulge_points(
                    pair[0].position,
                    pair[1].position,
                    pair[0].bulge,
                    flattening,
                ));
            }
            if self.is_closed && self.vertices.len() > 1 {
                if let Some(last) = self.vertices.last() {
                    points.extend(bulge_points(last.position, first.position, last.bulge, flattening));
                }
            }
            points
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct PolylineVertex {
        pub position: Point2,
        pub bulge: f64,
    }

    impl PolylineVertex {
        #[inline]
        pub fn new(position: Point2) -> Self {
            Self {
                position,
                bulge: 0.0,
            }
        }

        #[inline]
        pub fn with_bulge(position: Point2, bulge: f64) -> Self {
            Self { position, bulge }
        }
    }

    /// 填充边界的一条边。圆弧/椭圆角度为弧度，顺时针边仍记录几何意义上的起止角。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum HatchEdge {
        Line {
            start: Point2,
            end: Point2,
        },
        PolylineSegment {
            start: Point2,
            end: Point2,
            bulge: f64,
        },
        Arc {
            center: Point2,
            radius: f64,
            start_angle: f64,
            end_angle: f64,
            is_counter_clockwise: bool,
        },
        Ellipse {
            center: Point2,
            major_axis: Vector2,
            minor_ratio: f64,
            start_angle: f64,
            end_angle: f64,
            is_counter_clockwise: bool,
        },
    }

    impl HatchEdge {
        /// 边上的离散点，包含起点与终点。
        pub fn points(&self, flattening: &Flattening) -> Vec<Point2> {
            match self {
                HatchEdge::Line { start, end } => vec![*start, *end],
                HatchEdge::PolylineSegment { start, end, bulge } => {
                    let mut points = vec![*start];
                    points.extend(bulge_points(*start, *end, *bulge, flattening));
                    points
                }
                HatchEdge::Arc {
                    center,
                    radius,
                    start_angle,
                    end_angle,
                    is_counter_clockwise,
                } => {
                    if *is_counter_clockwise {
                        let (start, end) = canonical_interval(*start_angle, *end_angle);
                        arc_points(*center, *radius, start, end - start, flattening)
                    } else {
                        let (start, end) = canonical_interval(*end_angle, *start_angle);
                        let mut points = arc_points(*center, *radius, start, end - start, flattening);
                        points.reverse();
                        points
                    }
                }
                HatchEdge::Ellipse {
                    center,
                    major_axis,
                    minor_ratio,
                    start_angle,
                    end_angle,
                    is_counter_clockwise,
                } => {
                    if *is_counter_clockwise {
                        ellipse_points(*center, *major_axis, *minor_ratio, *start_angle, *end_angle, flattening)
                    } else {
                        let mut points = ellipse_points(
                            *center,
                            *major_axis,
                            *minor_ratio,
                            *end_angle,
                            *start_angle,
                            flattening,
                        );
                        points.reverse();
                        points
                    }
                }
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct HatchLoop {
        pub edges: Vec<HatchEdge>,
    }

    impl HatchLoop {
        /// 依次拼接各边的离散点，去除衔接处重复点。结果未强制闭合。
        pub fn points(&self, flattening: &Flattening) -> Vec<Point2> {
            let mut points: Vec<Point2> = Vec::new();
            for edge in &self.edges {
                for point in edge.points(flattening) {
                    if points.last() != Some(&point) {
                        points.push(point);
                    }
                }
            }
            points
        }

        fn transformed(&self, placement: &Placement, flattening: &Flattening) -> HatchLoop {
            if placement.similarity_scale().is_some() && !placement.is_mirrored() {
                let edges = self
                    .edges
                    .iter()
                    .map(|edge| transform_edge(edge, placement))
                    .collect();
                return HatchLoop { edges };
            }
            let points: Vec<Point2> = self
                .points(flattening)
                .into_iter()
                .map(|point| placement.apply(point))
                .collect();
            let edges = points
                .windows(2)
                .map(|pair| HatchEdge::Line {
                    start: pair[0],
                    end: pair[1],
                })
                .collect();
            HatchLoop { edges }
        }
    }

    fn transform_edge(edge: &HatchEdge, placement: &Placement) -> HatchEdge {
        let scale = placement.similarity_scale().unwrap_or(1.0);
        let rotation = placement.rotation();
        match edge {
            HatchEdge::Line { start, end } => HatchEdge::Line {
                start: placement.apply(*start),
                end: placement.apply(*end),
            },
            HatchEdge::PolylineSegment { start, end, bulge } => HatchEdge::PolylineSegment {
                start: placement.apply(*start),
                end: placement.apply(*end),
                bulge: *bulge,
            },
            HatchEdge::Arc {
                center,
                radius,
                start_angle,
                end_angle,
                is_counter_clockwise,
            } => HatchEdge::Arc {
                center: placement.apply(*center),
                radius: radius * scale,
                start_angle: start_angle + rotation,
                end_angle: end_angle + rotation,
                is_counter_clockwise: *is_counter_clockwise,
            },
            HatchEdge::Ellipse {
                center,
                major_axis,
                minor_ratio,
                start_angle,
                end_angle,
                is_counter_clockwise,
            } => HatchEdge::Ellipse {
                center: placement.apply(*center),
                major_axis: placement.apply_vector(*major_axis),
                minor_ratio: *minor_ratio,
                start_angle: *start_angle,
                end_angle: *end_angle,
                is_counter_clockwise: *is_counter_clockwise,
            },
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Hatch {
        pub loops: Vec<HatchLoop>,
        pub layer: String,
    }

    /// 3DFACE / SOLID 四边面，顶点已按环顺序排列（三角形时末两点重合）。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Face {
        pub vertices: [Point2; 4],
        pub is_solid: bool,
        pub layer: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct BlockInsert {
        pub block_name: String,
        pub insert: Point2,
        pub scale: Vector2,
        pub rotation: f64,
        pub layer: String,
    }

    impl BlockInsert {
        #[inline]
        pub fn placement(&self, base_point: Point2) -> Placement {
            Placement::for_insert(self.insert, self.scale, self.rotation, base_point)
        }
    }

    /// 无几何映射的实体（TEXT、DIMENSION 等），保留类型名以便上报。
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Unsupported {
        pub kind: String,
        pub layer: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct BlockDefinition {
        pub name: String,
        pub base_point: Point2,
        pub entities: Vec<Entity>,
    }

    /// 图纸根容器：图层 → 顶层实体（保持读取顺序），块名 → 块定义。
    ///
    /// 加载完成后只以只读方式交给转换流程。
    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    pub struct Drawing {
        layers: IndexMap<String, Vec<(EntityId, Entity)>>,
        blocks: IndexMap<String, BlockDefinition>,
        next_entity_id: u64,
    }

    impl Drawing {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_entity(&mut self, entity: Entity) -> EntityId {
            let id = self.next_id();
            let layer = entity.layer_name().to_string();
            self.layers.entry(layer).or_default().push((id, entity));
            id
        }

        pub fn add_line(&mut self, start: Point2, end: Point2, layer: impl Into<String>) -> EntityId {
            self.add_entity(Entity::Line(Line {
                start,
                end,
                layer: layer.into(),
            }))
        }

        pub fn add_polyline<I>(&mut self, points: I, is_closed: bool, layer: impl Into<String>) -> EntityId
        where
            I: IntoIterator<Item = Point2>,
        {
            self.add_polyline_with_vertices(points.into_iter().map(PolylineVertex::new), is_closed, layer)
        }

        pub fn add_polyline_with_vertices<I>(
            &mut self,
            vertices: I,
            is_closed: bool,
            layer: impl Into<String>,
        ) -> EntityId
        where
            I: IntoIterator<Item = PolylineVertex>,
        {
            self.add_entity(Entity::Polyline(Polyline {
                vertices: vertices.into_iter().collect(),
                is_closed,
                layer: layer.into(),
            }))
        }

        pub fn add_circle(&mut self, center: Point2, radius: f64, layer: impl Into<String>) -> EntityId {
            self.add_entity(Entity::Circle(Circle {
                center,
                radius,
                layer: layer.into(),
            }))
        }

        pub fn add_arc(
            &mut self,
            center: Point2,
            radius: f64,
            start_angle: f64,
            end_angle: f64,
            layer: impl Into<String>,
        ) -> EntityId {
            self.add_entity(Entity::Arc(Arc {
                center,
                radius,
                start_angle,
                end_angle,
                layer: layer.into(),
            }))
        }

        pub fn add_point(&mut self, location: Point2, layer: impl Into<String>) -> EntityId {
            self.add_entity(Entity::Point(Point {
                location,
                layer: layer.into(),
            }))
        }

        pub fn add_block_insert(
            &mut self,
            block_name: impl Into<String>,
            insert: Point2,
            scale: Vector2,
            rotation: f64,
            layer: impl Into<String>,
        ) -> EntityId {
            self.add_entity(Entity::BlockInsert(BlockInsert {
                block_name: block_name.into(),
                insert,
                scale,
                rotation,
                layer: layer.into(),
            }))
        }

        pub fn add_block_definition(&mut self, definition: BlockDefinition) {
            self.blocks.insert(definition.name.clone(), definition);
        }

        #[inline]
        pub fn block(&self, name: &str) -> Option<&BlockDefinition> {
            self.blocks.get(name)
        }

        #[inline]
        pub fn blocks(&self) -> impl Iterator<Item = &BlockDefinition> {
            self.blocks.values()
        }

        /// 按首次出现顺序返回图层名。
        #[inline]
        pub fn layer_names(&self) -> impl Iterator<Item = &str> {
            self.layers.keys().map(String::as_str)
        }

        #[inline]
        pub fn has_layer(&self, name: &str) -> bool {
            self.layers.contains_key(name)
        }

        /// 指定图层的顶层实体；图层不存在时返回空切片。
        pub fn layer_entities(&self, name: &str) -> &[(EntityId, Entity)] {
            self.layers.get(name).map(Vec::as_slice).unwrap_or(&[])
        }

        #[inline]
        pub fn entities(&self) -> impl Iterator<Item = &(EntityId, Entity)> {
            self.layers.values().flatten()
        }

        #[inline]
        pub fn entity_count(&self) -> usize {
            self.layers.values().map(Vec::len).sum()
        }

        pub fn entity(&self, id: EntityId) -> Option<&Entity> {
            self.entities()
                .find(|(entity_id, _)| *entity_id == id)
                .map(|(_, entity)| entity)
        }

        #[inline]
        fn next_id(&mut self) -> EntityId {
            let id = self.next_entity_id;
            self.next_entity_id += 1;
            EntityId(id)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::f64::consts::{FRAC_PI_2, PI};

        #[test]
        fn drawing_groups_entities_by_layer_in_load_order() {
            let mut drawing = Drawing::new();
            let road = drawing.add_line(Point2::new(0.0, 0.0), Point2::new(10.0, 0.0), "ROAD");
            let parcel = drawing.add_polyline(
                [
                    Point2::new(0.0, 0.0),
                    Point2::new(5.0, 0.0),
                    Point2::new(5.0, 5.0),
                ],
                true,
                "PARCEL",
            );
            let road2 = drawing.add_arc(Point2::new(0.0, 0.0), 3.0, 0.0, FRAC_PI_2, "ROAD");
            let tree = drawing.add_circle(Point2::new(8.0, 8.0), 1.5, "TREE");
            let tag = drawing.add_point(Point2::new(8.0, 8.0), "TREE");

            assert_eq!(road.get(), 0);
            assert_eq!(parcel.get(), 1);
            assert_eq!(road2.get(), 2);
            assert_eq!((tree.get(), tag.get()), (3, 4));
            let layers: Vec<_> = drawing.layer_names().collect();
            assert_eq!(layers, vec!["ROAD", "PARCEL", "TREE"]);
            let ids: Vec<u64> = drawing
                .layer_entities("ROAD")
                .iter()
                .map(|(id, _)| id.get())
                .collect();
            assert_eq!(ids, vec![0, 2]);
            assert!(drawing.layer_entities("MISSING").is_empty());
            assert_eq!(drawing.entity_count(), 5);
            assert!(matches!(drawing.entity(parcel), Some(Entity::Polyline(_))));
        }

        #[test]
        fn zero_layer_children_inherit() {
            let child = Entity::Point(Point {
                location: Point2::new(0.0, 0.0),
                layer: DEFAULT_LAYER.to_string(),
            });
            assert!(child.inherits_layer());
            let mut other = child.clone();
            other.set_layer("SYMBOL");
            assert!(!other.inherits_layer());
            assert_eq!(other.layer_name(), "SYMBOL");
        }

        #[test]
        fn mirrored_arc_keeps_its_points_on_the_mirrored_circle() {
            let arc = Arc {
                center: Point2::new(2.0, 0.0),
                radius: 1.0,
                start_angle: 0.0,
                end_angle: FRAC_PI_2,
                layer: "0".to_string(),
            };
            let mirror = Placement::for_insert(
                Point2::new(0.0, 0.0),
                Vector2::new(-1.0, 1.0),
                0.0,
                Point2::new(0.0, 0.0),
            );
            let flattening = Flattening::default();
            let expected: Vec<Point2> = arc
                .points(&flattening)
                .into_iter()
                .map(|p| mirror.apply(p))
                .collect();
            let Entity::Arc(mirrored) = Entity::Arc(arc).transformed(&mirror, &flattening) else {
                panic!("similarity transform should keep the arc analytic");
            };
            assert!((mirrored.center.x() + 2.0).abs() < 1e-9);
            let points = mirrored.points(&flattening);
            let first = points.first().copied().expect("arc has points");
            let last = points.last().copied().expect("arc has points");
            // 镜像后方向反转：新起点对应原终点
            assert!(first.distance(*expected.last().expect("points")) < 1e-9);
            assert!(last.distance(expected[0]) < 1e-9);
        }

        #[test]
        fn non_uniform_scale_flattens_circle_into_closed_polyline() {
            let circle = Entity::Circle(Circle {
                center: Point2::new(0.0, 0.0),
                radius: 1.0,
                layer: "0".to_string(),
            });
            let stretch = Placement::for_insert(
                Point2::new(0.0, 0.0),
                Vector2::new(2.0, 1.0),
                0.0,
                Point2::new(0.0, 0.0),
            );
            match circle.transformed(&stretch, &Flattening::default()) {
                Entity::Polyline(polyline) => {
                    assert!(polyline.is_closed);
                    assert!(polyline.vertices.len() >= 24);
                    let max_x = polyline
                        .vertices
                        .iter()
                        .map(|v| v.position.x())
                        .fold(f64::NEG_INFINITY, f64::max);
                    assert!((max_x - 2.0).abs() < 1e-9);
                }
                other => panic!("expected polyline, got {other:?}"),
            }
        }

        #[test]
        fn mirrored_polyline_negates_bulges() {
            let polyline = Entity::Polyline(Polyline {
                vertices: vec![
                    PolylineVertex::with_bulge(Point2::new(0.0, 0.0), 1.0),
                    PolylineVertex::new(Point2::new(10.0, 0.0)),
                ],
                is_closed: false,
                layer: "0".to_string(),
            });
            let mirror = Placement::for_insert(
                Point2::new(0.0, 0.0),
                Vector2::new(1.0, -1.0),
                0.0,
                Point2::new(0.0, 0.0),
            );
            let Entity::Polyline(result) = polyline.transformed(&mirror, &Flattening::default()) else {
                panic!("expected polyline");
            };
            assert!((result.vertices[0].bulge + 1.0).abs() < 1e-12);
        }

        #[test]
        fn closed_polyline_points_end_at_first_vertex() {
            let polyline = Polyline {
                vertices: vec![
                    PolylineVertex::new(Point2::new(0.0, 0.0)),
                    PolylineVertex::new(Point2::new(4.0, 0.0)),
                    PolylineVertex::new(Point2::new(4.0, 3.0)),
                ],
                is_closed: true,
                layer: "0".to_string(),
            };
            let points = polyline.points(&Flattening::default());
            assert_eq!(points.len(), 4);
            assert_eq!(points.first(), points.last());
        }

        #[test]
        fn clockwise_hatch_arc_runs_from_start_to_end() {
            let edge = HatchEdge::Arc {
                center: Point2::new(0.0, 0.0),
                radius: 1.0,
                start_angle: PI,
                end_angle: 0.0,
                is_counter_clockwise: false,
            };
            let points = edge.points(&Flattening::default());
            let first = points.first().copied().expect("edge has points");
            let last = points.last().copied().expect("edge has points");
            assert!(first.distance(Point2::new(-1.0, 0.0)) < 1e-9);
            assert!(last.distance(Point2::new(1.0, 0.0)) < 1e-9);
            // 顺时针从 180° 到 0° 经过上半圆
            assert!(points.iter().all(|p| p.y() >= -1e-9));
        }
    }
}
