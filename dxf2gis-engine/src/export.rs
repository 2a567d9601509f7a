//! 按图层分组、拆分几何类别、命名并写出数据集。

use std::collections::HashSet;
use std::path::PathBuf;

use dxf2gis_core::features::{
    AttributeSchema, Geometry, GeometryFamily, GeometryKind, LayerOutput, ResolvedGeometry,
    SpatialReference,
};
use dxf2gis_io::{DatasetWriter, GeoPackageWriter, ShapefileWriter, WrittenLayer};
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::errors::{Diagnostic, EngineError};
use crate::progress::{CancellationToken, ProgressReporter, Stage};

const MAX_NAME_LEN: usize = 100;
const FALLBACK_NAME: &str = "layer";
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// 数据集名只保留 `[A-Za-z0-9 _.-]`，其余替换为 `_`。
pub fn sanitize_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, ' ' | '_' | '.' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = replaced.trim_matches(|ch| ch == ' ' || ch == '.');
    let mut sanitized = if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    };
    if RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(&sanitized))
    {
        sanitized = format!("_{sanitized}_");
    }
    // 结果只含 ASCII，按字节截断安全
    sanitized.truncate(MAX_NAME_LEN);
    sanitized
}

/// 分配不区分大小写唯一的数据集名，冲突时追加 `_2`、`_3`…
#[derive(Debug, Default)]
struct NameAllocator {
    used: HashSet<String>,
}

impl NameAllocator {
    fn allocate(&mut self, raw: &str) -> String {
        let base = sanitize_name(raw);
        if self.used.insert(base.to_ascii_lowercase()) {
            return base;
        }
        let mut index = 2;
        loop {
            let suffix = format!("_{index}");
            let mut candidate = base.clone();
            candidate.truncate(MAX_NAME_LEN - suffix.len());
            candidate.push_str(&suffix);
            if self.used.insert(candidate.to_ascii_lowercase()) {
                return candidate;
            }
            index += 1;
        }
    }
}

const FAMILY_ORDER: [GeometryFamily; 3] = [
    GeometryFamily::Point,
    GeometryFamily::Line,
    GeometryFamily::Polygon,
];

/// 按图层分组（先按 `layer_order`，其余按首次出现），跨类别的图层拆成
/// `<图层>_<point|line|polygon>`，同类别单/多几何混合时统一提升为多几何。
pub fn build_layer_outputs(
    geometries: Vec<ResolvedGeometry>,
    layer_order: &[String],
) -> Vec<LayerOutput> {
    let mut groups: IndexMap<String, Vec<ResolvedGeometry>> = layer_order
        .iter()
        .map(|layer| (layer.clone(), Vec::new()))
        .collect();
    for geometry in geometries {
        groups
            .entry(geometry.layer_name.clone())
            .or_default()
            .push(geometry);
    }

    let mut names = NameAllocator::default();
    let mut outputs = Vec::new();
    for (layer, features) in groups {
        if features.is_empty() {
            continue;
        }
        let mut by_family: IndexMap<GeometryFamily, Vec<ResolvedGeometry>> = IndexMap::new();
        for feature in features {
            by_family
                .entry(feature.geometry.family())
                .or_default()
                .push(feature);
        }
        let split = by_family.len() > 1;
        for family in FAMILY_ORDER {
            let Some(mut features) = by_family.shift_remove(&family) else {
                continue;
            };
            let kind = homogeneous_kind(&mut features, family);
            let raw_name = if split {
                format!("{layer}_{}", family.suffix())
            } else {
                layer.clone()
            };
            outputs.push(LayerOutput {
                name: names.allocate(&raw_name),
                source_layer: layer.clone(),
                kind,
                features,
                schema: AttributeSchema::standard(),
            });
        }
    }
    outputs
}

fn homogeneous_kind(features: &mut [ResolvedGeometry], family: GeometryFamily) -> GeometryKind {
    let first = features[0].geometry.kind();
    if features.iter().all(|feature| feature.geometry.kind() == first) {
        return first;
    }
    for feature in features.iter_mut() {
        let geometry = std::mem::replace(&mut feature.geometry, Geometry::MultiLineString(Vec::new()));
        feature.geometry = geometry.into_multi();
    }
    family.promoted_kind()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    /// 目录，每个图层一组 `.shp/.shx/.dbf/.prj/.cpg`。
    Shapefile { directory: PathBuf },
    /// `.gpkg` 文件，或目录（写入其中的 `bundle.gpkg`）。
    GeoPackage { location: PathBuf },
}

#[derive(Debug, Clone, Default)]
pub struct ExportOutcome {
    pub written: Vec<WrittenLayer>,
    pub diagnostics: Vec<Diagnostic>,
}

fn open_writer(
    target: &ExportTarget,
    overwrite: bool,
) -> Result<Box<dyn DatasetWriter>, EngineError> {
    match target {
        ExportTarget::Shapefile { directory } => ShapefileWriter::create(directory.clone(), overwrite)
            .map(|writer| Box::new(writer) as Box<dyn DatasetWriter>)
            .map_err(|source| EngineError::Write {
                path: directory.clone(),
                source,
            }),
        ExportTarget::GeoPackage { location } => GeoPackageWriter::create(location, overwrite)
            .map(|writer| Box::new(writer) as Box<dyn DatasetWriter>)
            .map_err(|source| EngineError::Write {
                path: location.clone(),
                source,
            }),
    }
}

/// 依次写出各图层。输出位置不可用时整体失败；单个图层失败记为诊断并继续。
///
/// 写出器在同一线程上顺序使用，Shapefile 同名文件组不会并发写入。
pub fn export_layers(
    outputs: &[LayerOutput],
    target: &ExportTarget,
    overwrite: bool,
    srs: &SpatialReference,
    cancel: &CancellationToken,
    progress: &ProgressReporter,
) -> Result<ExportOutcome, EngineError> {
    let mut outcome = ExportOutcome::default();
    if outputs.is_empty() {
        return Ok(outcome);
    }
    let mut writer = open_writer(target, overwrite)?;
    for layer in outputs {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled {
                written: outcome.written,
            });
        }
        match writer.write_layer(layer, srs) {
            Ok(written) => {
                info!(
                    layer = %written.name,
                    kind = written.kind.ogc_name(),
                    features = written.feature_count,
                    "图层已写出"
                );
                progress.advance(
                    Stage::Export,
                    Some(&layer.source_layer),
                    0,
                    format!("{} 已写出 {} 个要素", written.name, written.feature_count),
                );
                outcome.written.push(written);
            }
            Err(err) => {
                warn!(layer = %layer.name, error = %err, "图层写出失败");
                outcome.diagnostics.push(Diagnostic::Write {
                    layer: layer.source_layer.clone(),
                    message: err.to_string(),
                });
            }
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dxf2gis_core::document::EntityId;
    use dxf2gis_core::features::SourceRef;
    use dxf2gis_core::geometry::Point2;

    fn feature(layer: &str, geometry: Geometry) -> ResolvedGeometry {
        ResolvedGeometry {
            layer_name: layer.to_string(),
            geometry,
            source: SourceRef {
                entity_id: EntityId::new(1),
                entity_type: "LINE".to_string(),
                block_name: None,
            },
        }
    }

    fn line() -> Geometry {
        Geometry::LineString(vec![Point2::new(0.0, 0.0), Point2::new(1.0, 1.0)])
    }

    #[test]
    fn names_are_sanitized_for_filesystems() {
        assert_eq!(sanitize_name("道路/中心线"), "______");
        assert_eq!(sanitize_name("ROAD:EDGE"), "ROAD_EDGE");
        assert_eq!(sanitize_name("  .hidden. "), "hidden");
        assert_eq!(sanitize_name(" .. "), "layer");
        assert_eq!(sanitize_name("con"), "_con_");
        assert_eq!(sanitize_name("COM1"), "_COM1_");
        assert_eq!(sanitize_name(&"A".repeat(150)).len(), 100);
    }

    #[test]
    fn collisions_get_numeric_suffixes_case_insensitively() {
        let mut names = NameAllocator::default();
        assert_eq!(names.allocate("Road"), "Road");
        assert_eq!(names.allocate("ROAD"), "ROAD_2");
        assert_eq!(names.allocate("road?"), "road_");
        assert_eq!(names.allocate("road/"), "road__2");
        let long = "B".repeat(120);
        assert_eq!(names.allocate(&long).len(), 100);
        let second = names.allocate(&long);
        assert_eq!(second.len(), 100);
        assert!(second.ends_with("_2"));
    }

    #[test]
    fn mixed_families_are_split_and_kinds_promoted() {
        let polygon = Geometry::Polygon(vec![vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 0.0),
        ]]);
        let outputs = build_layer_outputs(
            vec![
                feature("MIX", line()),
                feature("MIX", Geometry::Point(Point2::new(0.0, 0.0))),
                feature("MIX", Geometry::MultiLineString(vec![vec![
                    Point2::new(0.0, 0.0),
                    Point2::new(2.0, 0.0),
                ]])),
                feature("ONLY", polygon),
            ],
            &["ONLY".to_string(), "MIX".to_string(), "EMPTY".to_string()],
        );
        let summary: Vec<(&str, GeometryKind, usize)> = outputs
            .iter()
            .map(|output| (output.name.as_str(), output.kind, output.feature_count()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("ONLY", GeometryKind::Polygon, 1),
                ("MIX_point", GeometryKind::Point, 1),
                ("MIX_line", GeometryKind::MultiLineString, 2),
            ]
        );
        for output in &outputs {
            assert!(output.features.iter().all(|f| f.geometry.kind() == output.kind));
        }
        assert_eq!(outputs[2].source_layer, "MIX");
    }
}
