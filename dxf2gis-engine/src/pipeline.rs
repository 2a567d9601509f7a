//! 转换流程编排：读取 → 扫描 → 块展开 → 几何映射 → 坐标转换 → 写出。

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use dxf2gis_core::document::Drawing;
use dxf2gis_core::features::ResolvedGeometry;
use dxf2gis_core::geometry::Flattening;
use dxf2gis_io::{DrawingFileLoader, DrawingLoader, WrittenLayer};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::crs::{BboxFilter, CrsTransformer, EpsgRegistry, SpatialReferenceRegistry};
use crate::errors::{Diagnostic, EngineError};
use crate::export::{ExportTarget, build_layer_outputs, export_layers};
use crate::normalize::normalize;
use crate::progress::{CancellationToken, ConversionEvent, EventSink, ProgressReporter, Stage};
use crate::resolve::{
    BlockMode, DEFAULT_KEEP_MERGE_EXPLODE_LIMIT, DEFAULT_LINE_MERGE_TOLERANCE, ResolveOptions,
    resolve_layer,
};
use crate::scan::{LayerSummary, scan_layers, scan_path};

/// 台湾 TWD97 / TM2 121°E。
pub const DEFAULT_SOURCE_EPSG: u32 = 3826;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputDriver {
    #[default]
    Shapefile,
    GeoPackage,
}

impl OutputDriver {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputDriver::Shapefile => "shapefile",
            OutputDriver::GeoPackage => "geopackage",
        }
    }

    fn target(self, location: &Path) -> ExportTarget {
        match self {
            OutputDriver::Shapefile => ExportTarget::Shapefile {
                directory: location.to_path_buf(),
            },
            OutputDriver::GeoPackage => ExportTarget::GeoPackage {
                location: location.to_path_buf(),
            },
        }
    }
}

impl fmt::Display for OutputDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次转换的全部参数。
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    pub drawing_path: PathBuf,
    /// 参与转换的图层，按此顺序输出；为空时取扫描到的全部图层。
    pub selected_layers: Vec<String>,
    pub driver: OutputDriver,
    pub output_location: PathBuf,
    pub source_epsg: u32,
    pub target_epsg: Option<u32>,
    pub block_mode: BlockMode,
    pub overwrite: bool,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub bbox_wgs84: Option<[f64; 4]>,
    pub flatten_tolerance: f64,
    pub line_merge_tolerance: f64,
    pub keep_merge_explode_limit: usize,
}

impl ConversionRequest {
    pub fn new(drawing_path: impl Into<PathBuf>, output_location: impl Into<PathBuf>) -> Self {
        Self {
            drawing_path: drawing_path.into(),
            selected_layers: Vec::new(),
            driver: OutputDriver::default(),
            output_location: output_location.into(),
            source_epsg: DEFAULT_SOURCE_EPSG,
            target_epsg: None,
            block_mode: BlockMode::default(),
            overwrite: false,
            bbox_wgs84: None,
            flatten_tolerance: Flattening::DEFAULT_TOLERANCE,
            line_merge_tolerance: DEFAULT_LINE_MERGE_TOLERANCE,
            keep_merge_explode_limit: DEFAULT_KEEP_MERGE_EXPLODE_LIMIT,
        }
    }

    fn resolve_options(&self, selection: &[String]) -> ResolveOptions {
        ResolveOptions {
            mode: self.block_mode,
            flattening: Flattening::with_tolerance(self.flatten_tolerance),
            line_merge_tolerance: self.line_merge_tolerance,
            keep_merge_explode_limit: self.keep_merge_explode_limit,
            selected_layers: Some(selection.iter().cloned().collect()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversionReport {
    pub written: Vec<WrittenLayer>,
    pub diagnostics: Vec<Diagnostic>,
    /// 因不在 WGS84 范围内而丢弃的几何数。
    pub skipped_by_bbox: usize,
}

impl ConversionReport {
    /// 有图层写出但存在诊断。没有任何图层写出时转换以 `NothingWritten` 失败，不会得到报告。
    pub fn is_partial(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

/// 单个源图层的展开与映射结果。
struct LayerJob {
    geometries: Vec<ResolvedGeometry>,
    diagnostics: Vec<Diagnostic>,
}

pub struct Converter {
    loader: Box<dyn DrawingLoader>,
    registry: Box<dyn SpatialReferenceRegistry>,
    events: EventSink,
    cancel: CancellationToken,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(DrawingFileLoader::default())
    }
}

impl Converter {
    pub fn new(loader: impl DrawingLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            registry: Box::new(EpsgRegistry),
            events: EventSink::disabled(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_registry(mut self, registry: impl SpatialReferenceRegistry + 'static) -> Self {
        self.registry = Box::new(registry);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 与转换共享的取消标记，可交给其他线程。
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 按 `mode` 统计图层；keep-merge 下块参照计入其所在图层。
    pub fn scan(&self, path: &Path, mode: BlockMode) -> Result<Vec<LayerSummary>, EngineError> {
        scan_path(self.loader.as_ref(), path, mode).map(|(_, layers)| layers)
    }

    /// 读取 `request.drawing_path` 并完成转换。结束时发送一个终止事件。
    pub fn convert(&self, request: &ConversionRequest) -> Result<ConversionReport, EngineError> {
        let reporter = ProgressReporter::new(self.events.clone());
        let result = self.run(request, None, &reporter);
        finish(&reporter, &result);
        result
    }

    /// 对已读取的图纸执行转换，`request.drawing_path` 仅用于日志。
    pub fn convert_drawing(
        &self,
        drawing: &Drawing,
        request: &ConversionRequest,
    ) -> Result<ConversionReport, EngineError> {
        let reporter = ProgressReporter::new(self.events.clone());
        let result = self.run(request, Some(drawing), &reporter);
        finish(&reporter, &result);
        result
    }

    fn run(
        &self,
        request: &ConversionRequest,
        drawing: Option<&Drawing>,
        reporter: &ProgressReporter,
    ) -> Result<ConversionReport, EngineError> {
        let registry = self.registry.as_ref();
        let transformer = CrsTransformer::new(registry, request.source_epsg, request.target_epsg)?;
        let bbox = request
            .bbox_wgs84
            .map(|bbox| BboxFilter::new(registry, request.source_epsg, bbox))
            .transpose()?;

        reporter.stage(Stage::Load, format!("读取 {}", request.drawing_path.display()));
        let loaded;
        let drawing = match drawing {
            Some(drawing) => drawing,
            None => {
                loaded = self
                    .loader
                    .load(&request.drawing_path)
                    .map_err(|source| EngineError::DrawingRead {
                        path: request.drawing_path.clone(),
                        source,
                    })?;
                &loaded
            }
        };
        self.check_cancelled()?;

        reporter.stage(Stage::Scan, "扫描图层");
        let scanned = scan_layers(drawing, request.block_mode)?;
        let selection: Vec<String> = if request.selected_layers.is_empty() {
            scanned.iter().map(|layer| layer.name.clone()).collect()
        } else {
            let mut seen = HashSet::new();
            request
                .selected_layers
                .iter()
                .filter(|layer| seen.insert(layer.as_str()))
                .cloned()
                .collect()
        };
        // 未指定图层时展开全部源图层，与扫描结果一致；指定时只展开所选图层上的顶层实体
        let source_layers: Vec<&str> = if request.selected_layers.is_empty() {
            drawing.layer_names().collect()
        } else {
            selection
                .iter()
                .map(String::as_str)
                .filter(|layer| drawing.has_layer(layer))
                .collect()
        };
        reporter.set_total(
            source_layers
                .iter()
                .map(|layer| drawing.layer_entities(layer).len())
                .sum(),
        );
        info!(
            path = %request.drawing_path.display(),
            layers = selection.len(),
            mode = %request.block_mode,
            driver = %request.driver,
            "开始转换"
        );

        let mut report = ConversionReport::default();
        let geometries =
            self.resolve_all(drawing, request, &source_layers, &selection, reporter, &mut report)?;
        let geometries =
            self.transform_all(geometries, &transformer, bbox.as_ref(), reporter, &mut report)?;

        let outputs = build_layer_outputs(geometries, &selection);
        for layer in &selection {
            if !outputs.iter().any(|output| &output.source_layer == layer) {
                warn!(layer = %layer, "图层没有可输出的几何");
                report.diagnostics.push(Diagnostic::EmptyLayer {
                    layer: layer.clone(),
                });
            }
        }

        reporter.stage(Stage::Export, format!("写出 {} 个数据集", outputs.len()));
        let outcome = export_layers(
            &outputs,
            &request.driver.target(&request.output_location),
            request.overwrite,
            transformer.target(),
            &self.cancel,
            reporter,
        )?;
        report.written = outcome.written;
        report.diagnostics.extend(outcome.diagnostics);
        if report.written.is_empty() {
            warn!(diagnostics = report.diagnostics.len(), "没有写出任何图层");
            return Err(EngineError::NothingWritten {
                diagnostics: report.diagnostics,
            });
        }
        info!(
            written = report.written.len(),
            diagnostics = report.diagnostics.len(),
            skipped_by_bbox = report.skipped_by_bbox,
            "转换完成"
        );
        Ok(report)
    }

    /// 源图层并行展开与映射，结果按顶层实体在图纸中的顺序排列。
    ///
    /// explode 出的叶子落在未选图层上时丢弃。
    fn resolve_all(
        &self,
        drawing: &Drawing,
        request: &ConversionRequest,
        source_layers: &[&str],
        selection: &[String],
        reporter: &ProgressReporter,
        report: &mut ConversionReport,
    ) -> Result<Vec<ResolvedGeometry>, EngineError> {
        let options = request.resolve_options(selection);
        let flattening = options.flattening;
        let wanted: HashSet<&str> = selection.iter().map(String::as_str).collect();
        let cancel = &self.cancel;

        let jobs: Vec<Result<LayerJob, EngineError>> = source_layers
            .par_iter()
            .map(|&layer| {
                let resolution = resolve_layer(drawing, layer, &options, cancel)?;
                reporter.advance(
                    Stage::Resolve,
                    Some(layer),
                    drawing.layer_entities(layer).len(),
                    format!("{layer} 展开完成"),
                );
                let mut job = LayerJob {
                    geometries: Vec::new(),
                    diagnostics: resolution.diagnostics,
                };
                for resolved in resolution.entities {
                    if !wanted.contains(resolved.layer.as_str()) {
                        continue;
                    }
                    if cancel.is_cancelled() {
                        return Err(EngineError::Cancelled {
                            written: Vec::new(),
                        });
                    }
                    match normalize(resolved, &flattening) {
                        Ok(geometries) => job.geometries.extend(geometries),
                        Err(diagnostic) => job.diagnostics.push(diagnostic),
                    }
                }
                Ok(job)
            })
            .collect();

        let mut geometries = Vec::new();
        for (layer, job) in source_layers.iter().copied().zip(jobs) {
            let job = job?;
            debug!(
                layer,
                geometries = job.geometries.len(),
                diagnostics = job.diagnostics.len(),
                "图层几何映射完成"
            );
            reporter.advance(
                Stage::Normalize,
                Some(layer),
                0,
                format!("{layer} 得到 {} 个几何", job.geometries.len()),
            );
            geometries.extend(job.geometries);
            report.diagnostics.extend(job.diagnostics);
        }
        // 稳定排序：同一参照展开出的叶子保持遍历顺序
        geometries.sort_by_key(|geometry| geometry.source.entity_id);
        Ok(geometries)
    }

    fn transform_all(
        &self,
        geometries: Vec<ResolvedGeometry>,
        transformer: &CrsTransformer,
        bbox: Option<&BboxFilter>,
        reporter: &ProgressReporter,
        report: &mut ConversionReport,
    ) -> Result<Vec<ResolvedGeometry>, EngineError> {
        reporter.stage(
            Stage::Transform,
            format!(
                "EPSG:{} → EPSG:{}",
                transformer.source().epsg,
                transformer.target().epsg
            ),
        );
        let mut transformed = Vec::with_capacity(geometries.len());
        for mut feature in geometries {
            self.check_cancelled()?;
            if let Some(filter) = bbox {
                match filter.accepts(&feature.geometry) {
                    Ok(true) => {}
                    Ok(false) => {
                        report.skipped_by_bbox += 1;
                        continue;
                    }
                    Err(err) => {
                        report.diagnostics.push(Diagnostic::Geometry {
                            layer: feature.layer_name,
                            message: err.to_string(),
                        });
                        continue;
                    }
                }
            }
            match transformer.transform(&feature.geometry) {
                Ok(geometry) => {
                    feature.geometry = geometry;
                    transformed.push(feature);
                }
                Err(err) => report.diagnostics.push(Diagnostic::Geometry {
                    layer: feature.layer_name,
                    message: err.to_string(),
                }),
            }
        }
        Ok(transformed)
    }

    /// 写出开始前的取消：尚无已写出的图层。
    fn check_cancelled(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled {
                written: Vec::new(),
            });
        }
        Ok(())
    }
}

fn finish(reporter: &ProgressReporter, result: &Result<ConversionReport, EngineError>) {
    let event = match result {
        Ok(report) => ConversionEvent::Completed {
            written_layers: report.written.clone(),
            diagnostics: report.diagnostics.clone(),
        },
        Err(err) => ConversionEvent::Failed {
            error_kind: err.kind(),
            message: err.to_string(),
        },
    };
    reporter.finish(event);
}
