use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam::channel::Receiver;
use dxf2gis_config::{AppConfig, BlockModeSetting, DriverSetting};
use dxf2gis_engine::errors::{Diagnostic, EngineError};
use dxf2gis_engine::{ConversionEvent, ConversionReport, ConversionRequest, EventSink};
use tracing::{debug, info, warn};

use crate::errors::FrontendError;
use crate::loader;

/// `convert` 命令的参数。未给出的选项取配置文件中的值。
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    pub drawing: PathBuf,
    pub output: PathBuf,
    pub layers: Vec<String>,
    pub driver: Option<DriverSetting>,
    pub source_epsg: Option<u32>,
    pub target_epsg: Option<u32>,
    pub block_mode: Option<BlockModeSetting>,
    /// `min_lon,min_lat,max_lon,max_lat`
    pub bbox: Option<String>,
    pub overwrite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    /// 部分图层写出，存在诊断。
    Partial,
}

pub fn parse_bbox(text: &str) -> Result<[f64; 4], FrontendError> {
    let invalid = |message: String| FrontendError::InvalidArgument {
        argument: "--bbox",
        message,
    };
    let values = text
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .map_err(|err| invalid(format!("{part:?}: {err}")))
        })
        .collect::<Result<Vec<f64>, _>>()?;
    let [min_lon, min_lat, max_lon, max_lat] = values[..] else {
        return Err(invalid(format!("需要 4 个数值，实际为 {}", values.len())));
    };
    if min_lon > max_lon || min_lat > max_lat {
        return Err(invalid("最小值大于最大值".to_string()));
    }
    Ok([min_lon, min_lat, max_lon, max_lat])
}

pub fn build_request(
    options: &ConvertOptions,
    config: &AppConfig,
) -> Result<ConversionRequest, FrontendError> {
    let conversion = &config.conversion;
    let mut request = ConversionRequest::new(&options.drawing, &options.output);
    request.selected_layers = options
        .layers
        .iter()
        .map(|layer| layer.trim().to_string())
        .filter(|layer| !layer.is_empty())
        .collect();
    request.driver = loader::output_driver(options.driver.unwrap_or(conversion.driver));
    request.source_epsg = options.source_epsg.unwrap_or(conversion.source_epsg);
    request.target_epsg = options.target_epsg.or(conversion.target_epsg);
    request.block_mode = loader::block_mode(options.block_mode.unwrap_or(conversion.block_mode));
    request.overwrite = options.overwrite || config.output.overwrite;
    request.bbox_wgs84 = options.bbox.as_deref().map(parse_bbox).transpose()?;
    request.flatten_tolerance = conversion.flatten_tolerance;
    request.line_merge_tolerance = conversion.line_merge_tolerance;
    request.keep_merge_explode_limit = conversion.keep_merge_explode_limit;
    Ok(request)
}

/// 列出图纸中的图层及实体数。计数方式随块模式而定，未给出时取配置中的值。
pub fn run_layers(
    drawing: &Path,
    block_mode: Option<BlockModeSetting>,
    config: &AppConfig,
    out: &mut dyn Write,
) -> Result<CommandOutcome, FrontendError> {
    let mode = loader::block_mode(block_mode.unwrap_or(config.conversion.block_mode));
    let converter = loader::converter(config, EventSink::disabled());
    let layers = converter.scan(drawing, mode)?;
    writeln!(out, "{} 共 {} 个图层：", drawing.display(), layers.len())?;
    for layer in &layers {
        writeln!(out, "  - {} ({} 个实体)", layer.name, layer.entity_count)?;
    }
    Ok(CommandOutcome::Success)
}

pub fn run_convert(
    options: &ConvertOptions,
    config: &AppConfig,
    out: &mut dyn Write,
) -> Result<CommandOutcome, FrontendError> {
    let request = build_request(options, config)?;
    info!(
        drawing = %request.drawing_path.display(),
        output = %request.output_location.display(),
        driver = %request.driver,
        mode = %request.block_mode,
        "执行转换"
    );
    let (sink, receiver) = EventSink::bounded(config.conversion.event_buffer);
    let result = thread::scope(|scope| {
        scope.spawn(move || log_progress(receiver));
        loader::converter(config, sink).convert(&request)
    });
    let report = match result {
        Ok(report) => report,
        Err(EngineError::NothingWritten { diagnostics }) => {
            writeln!(out, "没有写出任何图层")?;
            print_diagnostics(&diagnostics, out)?;
            return Err(EngineError::NothingWritten { diagnostics }.into());
        }
        Err(err) => return Err(err.into()),
    };
    print_report(&report, out)?;
    if report.is_partial() {
        Ok(CommandOutcome::Partial)
    } else {
        Ok(CommandOutcome::Success)
    }
}

/// 转换器释放后发送端全部关闭，循环随之结束。
fn log_progress(receiver: Receiver<ConversionEvent>) {
    for event in receiver {
        match event {
            ConversionEvent::Progress {
                stage,
                layer,
                entities_processed,
                entities_total,
                message,
            } => info!(
                stage = %stage,
                layer = layer.as_deref().unwrap_or("-"),
                processed = entities_processed,
                total = entities_total,
                "{message}"
            ),
            ConversionEvent::Completed {
                written_layers,
                diagnostics,
            } => debug!(
                written = written_layers.len(),
                diagnostics = diagnostics.len(),
                "转换结束"
            ),
            ConversionEvent::Failed {
                error_kind,
                message,
            } => warn!(kind = %error_kind, "转换失败: {message}"),
        }
    }
}

fn print_report(report: &ConversionReport, out: &mut dyn Write) -> std::io::Result<()> {
    writeln!(out, "已写出 {} 个图层：", report.written.len())?;
    for layer in &report.written {
        writeln!(
            out,
            "  - {} ({}, {} 个要素) -> {}",
            layer.name,
            layer.kind.ogc_name(),
            layer.feature_count,
            layer.path.display()
        )?;
    }
    if report.skipped_by_bbox > 0 {
        writeln!(out, "范围过滤丢弃 {} 个几何", report.skipped_by_bbox)?;
    }
    print_diagnostics(&report.diagnostics, out)
}

fn print_diagnostics(diagnostics: &[Diagnostic], out: &mut dyn Write) -> std::io::Result<()> {
    if !diagnostics.is_empty() {
        writeln!(out, "诊断 {} 条：", diagnostics.len())?;
        for diagnostic in diagnostics {
            writeln!(out, "  - {diagnostic}")?;
        }
    }
    Ok(())
}
