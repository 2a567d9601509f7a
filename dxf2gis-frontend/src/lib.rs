pub mod cli;
pub mod errors;
pub mod loader;

pub use cli::{CommandOutcome, ConvertOptions};
pub use errors::FrontendError;

use std::io;
use std::path::Path;

use dxf2gis_config::{AppConfig, BlockModeSetting};
use tracing::info;

/// 打印图纸的图层列表。
pub fn list_layers(
    drawing: &Path,
    block_mode: Option<BlockModeSetting>,
    config: &AppConfig,
) -> Result<CommandOutcome, FrontendError> {
    info!(drawing = %drawing.display(), "扫描图层");
    cli::run_layers(drawing, block_mode, config, &mut io::stdout().lock())
}

/// 执行转换并打印结果摘要。
pub fn convert(options: &ConvertOptions, config: &AppConfig) -> Result<CommandOutcome, FrontendError> {
    cli::run_convert(options, config, &mut io::stdout().lock())
}
