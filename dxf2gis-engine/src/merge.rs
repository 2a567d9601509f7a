//! keep-merge 的几何合并：线段按端点串接，闭合环按包含关系组装成面。

use dxf2gis_core::features::{Geometry, Ring};
use dxf2gis_core::geometry::Point2;
use indexmap::IndexMap;
use tracing::warn;

type NodeKey = (i64, i64);

fn snap_key(point: Point2, tolerance: f64) -> NodeKey {
    if tolerance > 0.0 {
        (
            (point.x() / tolerance).round() as i64,
            (point.y() / tolerance).round() as i64,
        )
    } else {
        (point.x().to_bits() as i64, point.y().to_bits() as i64)
    }
}

struct Edge {
    from: NodeKey,
    to: NodeKey,
    points: Vec<Point2>,
}

struct LineGraph {
    edges: Vec<Edge>,
    nodes: IndexMap<NodeKey, Vec<usize>>,
    used: Vec<bool>,
}

impl LineGraph {
    fn new(lines: Vec<Vec<Point2>>, tolerance: f64) -> Self {
        let mut edges = Vec::with_capacity(lines.len());
        let mut nodes: IndexMap<NodeKey, Vec<usize>> = IndexMap::new();
        for points in lines {
            let (Some(first), Some(last)) = (points.first().copied(), points.last().copied()) else {
                continue;
            };
            if points.len() < 2 {
                continue;
            }
            let from = snap_key(first, tolerance);
            let to = snap_key(last, tolerance);
            let index = edges.len();
            nodes.entry(from).or_default().push(index);
            nodes.entry(to).or_default().push(index);
            edges.push(Edge { from, to, points });
        }
        let used = vec![false; edges.len()];
        Self { edges, nodes, used }
    }

    fn degree(&self, node: NodeKey) -> usize {
        self.nodes.get(&node).map_or(0, Vec::len)
    }

    fn next_unused(&self, node: NodeKey) -> Option<usize> {
        self.nodes
            .get(&node)?
            .iter()
            .copied()
            .find(|&edge| !self.used[edge])
    }

    /// 从 `node` 出发沿未使用的边前进，穿过度为 2 的节点，直到端点或分叉。
    fn walk(&mut self, start: NodeKey, first_edge: usize) -> Vec<Point2> {
        let mut path: Vec<Point2> = Vec::new();
        let mut current = start;
        let mut next = Some(first_edge);
        while let Some(index) = next {
            self.used[index] = true;
            let edge = &self.edges[index];
            let forward = edge.from == current;
            let other = if forward { edge.to } else { edge.from };
            // 衔接点已在路径末尾，新段跳过首点
            let skip = usize::from(!path.is_empty());
            if forward {
                path.extend(edge.points.iter().skip(skip).copied());
            } else {
                path.extend(edge.points.iter().rev().skip(skip).copied());
            }
            if self.degree(other) != 2 || other == start {
                break;
            }
            current = other;
            next = self.next_unused(current);
        }
        path
    }

    fn into_lines(mut self) -> Vec<Vec<Point2>> {
        let mut merged = Vec::new();
        let branch_nodes: Vec<NodeKey> = self
            .nodes
            .iter()
            .filter(|(_, edges)| edges.len() != 2)
            .map(|(node, _)| *node)
            .collect();
        for node in branch_nodes {
            while let Some(edge) = self.next_unused(node) {
                let path = self.walk(node, edge);
                if path.len() >= 2 {
                    merged.push(path);
                }
            }
        }
        // 剩余的边都位于闭合链上
        for index in 0..self.edges.len() {
            if self.used[index] {
                continue;
            }
            let start = self.edges[index].from;
            let path = self.walk(start, index);
            if path.len() >= 2 {
                merged.push(path);
            }
        }
        merged
    }
}

/// 端点按 `tolerance` 网格吸附后，经由度为 2 的节点把线串首尾相接。
pub fn merge_lines(lines: Vec<Vec<Point2>>, tolerance: f64) -> Vec<Vec<Point2>> {
    LineGraph::new(lines, tolerance).into_lines()
}

fn ring_area(ring: &[Point2]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for pair in ring.windows(2) {
        sum += pair[0].x() * pair[1].y() - pair[1].x() * pair[0].y();
    }
    if let (Some(first), Some(last)) = (ring.first(), ring.last()) {
        if first != last {
            sum += last.x() * first.y() - first.x() * last.y();
        }
    }
    (sum * 0.5).abs()
}

/// 射线法判断点是否在环内（边界上的点结果不定）。
pub fn point_in_ring(point: Point2, ring: &[Point2]) -> bool {
    let mut inside = false;
    let count = ring.len();
    if count < 3 {
        return false;
    }
    let mut j = count - 1;
    for i in 0..count {
        let (a, b) = (ring[i], ring[j]);
        if (a.y() > point.y()) != (b.y() > point.y()) {
            let x = (b.x() - a.x()) * (point.y() - a.y()) / (b.y() - a.y()) + a.x();
            if point.x() < x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// 多数顶点落在 `outer` 内即视为被包含，容忍共享边界的顶点。
fn ring_inside(inner: &[Point2], outer: &[Point2]) -> bool {
    let inside = inner
        .iter()
        .filter(|point| point_in_ring(**point, outer))
        .count();
    inside * 2 > inner.len()
}

/// 按包含深度组装面：偶数深度为外环，奇数深度的环作为最小包含外环的洞。
///
/// 返回的面按外环输入顺序排列，每个面的第一个环是外环。
pub fn assemble_polygons(rings: Vec<Ring>) -> Vec<Vec<Ring>> {
    let areas: Vec<f64> = rings.iter().map(|ring| ring_area(ring)).collect();
    let containers: Vec<Vec<usize>> = (0..rings.len())
        .map(|i| {
            (0..rings.len())
                .filter(|&j| j != i && areas[j] > areas[i] && ring_inside(&rings[i], &rings[j]))
                .collect()
        })
        .collect();

    let mut shell_slot: Vec<Option<usize>> = vec![None; rings.len()];
    let mut polygons: Vec<Vec<Ring>> = Vec::new();
    for (i, ring) in rings.iter().enumerate() {
        if containers[i].len() % 2 == 0 {
            shell_slot[i] = Some(polygons.len());
            polygons.push(vec![ring.clone()]);
        }
    }
    for (i, ring) in rings.into_iter().enumerate() {
        if containers[i].len() % 2 == 0 {
            continue;
        }
        let owner = containers[i]
            .iter()
            .copied()
            .filter(|&j| containers[j].len() % 2 == 0)
            .min_by(|&a, &b| areas[a].total_cmp(&areas[b]));
        match owner.and_then(|j| shell_slot[j]) {
            Some(slot) => polygons[slot].push(ring),
            None => polygons.push(vec![ring]),
        }
    }
    polygons
}

/// 合并一个块参照的全部叶子几何。不同类别互不合并；点逐个保留。
pub fn merge_instance(
    geometries: Vec<Geometry>,
    line_tolerance: f64,
    explode_limit: usize,
) -> Vec<Geometry> {
    let mut points = Vec::new();
    let mut lines: Vec<Vec<Point2>> = Vec::new();
    let mut rings: Vec<Ring> = Vec::new();
    for geometry in geometries {
        match geometry {
            Geometry::Point(point) => points.push(point),
            Geometry::LineString(line) => lines.push(line),
            Geometry::MultiLineString(parts) => lines.extend(parts),
            Geometry::Polygon(polygon) => rings.extend(polygon),
            Geometry::MultiPolygon(polygons) => rings.extend(polygons.into_iter().flatten()),
        }
    }

    let mut merged = Vec::new();
    if !rings.is_empty() {
        let mut polygons = assemble_polygons(rings);
        merged.push(if polygons.len() == 1 {
            Geometry::Polygon(polygons.remove(0))
        } else {
            Geometry::MultiPolygon(polygons)
        });
    }
    if !lines.is_empty() {
        let segments: usize = lines.iter().map(|line| line.len().saturating_sub(1)).sum();
        if segments > explode_limit {
            warn!(segments, limit = explode_limit, "块内线段过多，跳过合并直接逐条输出");
            merged.extend(lines.into_iter().map(Geometry::LineString));
        } else {
            let mut chained = merge_lines(lines, line_tolerance);
            match chained.len() {
                0 => {}
                1 => merged.push(Geometry::LineString(chained.remove(0))),
                _ => merged.push(Geometry::MultiLineString(chained)),
            }
        }
    }
    merged.extend(points.into_iter().map(Geometry::Point));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> Point2 {
        Point2::new(x, y)
    }

    fn square(min: f64, max: f64) -> Ring {
        vec![p(min, min), p(max, min), p(max, max), p(min, max), p(min, min)]
    }

    #[test]
    fn lines_chain_through_snapped_endpoints() {
        let lines = vec![
            vec![p(0.0, 0.0), p(1.0, 0.0)],
            vec![p(2.0, 0.0), p(1.05, 0.02)],
            vec![p(2.0, 0.0), p(3.0, 1.0)],
        ];
        let merged = merge_lines(lines, 0.2);
        assert_eq!(merged.len(), 1);
        let line = &merged[0];
        assert_eq!(line.len(), 4);
        assert_eq!(line[0], p(0.0, 0.0));
        assert_eq!(line[3], p(3.0, 1.0));
    }

    #[test]
    fn branching_node_splits_lines() {
        let lines = vec![
            vec![p(0.0, 0.0), p(1.0, 0.0)],
            vec![p(1.0, 0.0), p(2.0, 0.0)],
            vec![p(1.0, 0.0), p(1.0, 1.0)],
        ];
        let merged = merge_lines(lines, 0.2);
        assert_eq!(merged.len(), 3);
        let total: usize = merged.iter().map(Vec::len).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn closed_chain_becomes_one_line() {
        let lines = vec![
            vec![p(0.0, 0.0), p(1.0, 0.0)],
            vec![p(1.0, 0.0), p(1.0, 1.0)],
            vec![p(1.0, 1.0), p(0.0, 0.0)],
        ];
        let merged = merge_lines(lines, 0.2);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].len(), 4);
        assert_eq!(merged[0].first(), merged[0].last());
    }

    #[test]
    fn nested_rings_become_shells_and_holes() {
        let polygons = assemble_polygons(vec![
            square(2.0, 8.0),
            square(0.0, 10.0),
            square(4.0, 6.0),
            square(20.0, 30.0),
        ]);
        assert_eq!(polygons.len(), 3);
        assert_eq!(polygons[0], vec![square(0.0, 10.0), square(2.0, 8.0)]);
        assert_eq!(polygons[1], vec![square(4.0, 6.0)]);
        assert_eq!(polygons[2], vec![square(20.0, 30.0)]);
    }

    #[test]
    fn instance_merge_keeps_families_apart() {
        let merged = merge_instance(
            vec![
                Geometry::Point(p(0.0, 0.0)),
                Geometry::LineString(vec![p(-1.0, 0.0), p(0.0, 0.0)]),
                Geometry::LineString(vec![p(0.0, 0.0), p(1.0, 0.0)]),
                Geometry::Polygon(vec![square(0.0, 1.0)]),
                Geometry::Polygon(vec![square(5.0, 6.0)]),
            ],
            0.2,
            2_000,
        );
        assert_eq!(merged.len(), 3);
        assert!(matches!(&merged[0], Geometry::MultiPolygon(polygons) if polygons.len() == 2));
        assert!(matches!(&merged[1], Geometry::LineString(line) if line.len() == 3));
        assert_eq!(merged[2], Geometry::Point(p(0.0, 0.0)));
    }

    #[test]
    fn segment_budget_falls_back_to_unmerged_lines() {
        let lines: Vec<Geometry> = (0..5)
            .map(|i| Geometry::LineString(vec![p(i as f64, 0.0), p(i as f64 + 1.0, 0.0)]))
            .collect();
        let merged = merge_instance(lines, 0.2, 3);
        assert_eq!(merged.len(), 5);
        assert!(merged.iter().all(|g| matches!(g, Geometry::LineString(_))));
    }
}
