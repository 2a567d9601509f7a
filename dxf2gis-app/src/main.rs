use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use dxf2gis_config::{AppConfig, BlockModeSetting, ConfigError, DriverSetting};
use dxf2gis_frontend::{CommandOutcome, ConvertOptions};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// CAD 图纸（DXF/DWG）转 GIS 数据集。
#[derive(Parser, Debug)]
#[command(name = "dxf2gis", version, about)]
struct Cli {
    /// 配置文件路径（默认读取 `DXF2GIS_CONFIG` 或 `./config/default.toml`）。
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 列出图层及实体数。
    Layers {
        /// DXF 或 DWG 图纸。
        drawing: PathBuf,
        /// 计数方式：explode 按展开后的叶子计，keep-merge 按块参照计。
        #[arg(long, value_enum)]
        block_mode: Option<BlockModeArg>,
    },
    /// 转换为 Shapefile 或 GeoPackage。
    Convert {
        drawing: PathBuf,
        /// 输出目录（Shapefile）或 `.gpkg` 文件/目录（GeoPackage）。
        output: PathBuf,
        /// 逗号分隔的图层列表，缺省为全部图层。
        #[arg(long, value_delimiter = ',')]
        layers: Vec<String>,
        #[arg(long, value_enum)]
        driver: Option<DriverArg>,
        #[arg(long)]
        source_epsg: Option<u32>,
        #[arg(long)]
        target_epsg: Option<u32>,
        #[arg(long, value_enum)]
        block_mode: Option<BlockModeArg>,
        /// WGS84 范围 `min_lon,min_lat,max_lon,max_lat`。
        #[arg(long, allow_hyphen_values = true)]
        bbox: Option<String>,
        /// 覆盖已存在的输出。
        #[arg(long)]
        overwrite: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DriverArg {
    Shp,
    Gpkg,
}

impl From<DriverArg> for DriverSetting {
    fn from(arg: DriverArg) -> Self {
        match arg {
            DriverArg::Shp => DriverSetting::Shapefile,
            DriverArg::Gpkg => DriverSetting::Geopackage,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BlockModeArg {
    Explode,
    KeepMerge,
}

impl From<BlockModeArg> for BlockModeSetting {
    fn from(arg: BlockModeArg) -> Self {
        match arg {
            BlockModeArg::Explode => BlockModeSetting::Explode,
            BlockModeArg::KeepMerge => BlockModeSetting::KeepMerge,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let (config, config_error) = match load_configuration(cli.config.as_deref()) {
        Ok(config) => (config, None),
        Err(err) => (AppConfig::default(), Some(err)),
    };
    // 订阅器就绪后才能记录配置加载失败
    init_logging(&config);
    if let Some(err) = config_error {
        report_config_error(&err);
    }
    info!("启动 dxf2gis");

    let result = match cli.command {
        Commands::Layers {
            drawing,
            block_mode,
        } => dxf2gis_frontend::list_layers(&drawing, block_mode.map(Into::into), &config),
        Commands::Convert {
            drawing,
            output,
            layers,
            driver,
            source_epsg,
            target_epsg,
            block_mode,
            bbox,
            overwrite,
        } => {
            let options = ConvertOptions {
                drawing,
                output,
                layers,
                driver: driver.map(Into::into),
                source_epsg,
                target_epsg,
                block_mode: block_mode.map(Into::into),
                bbox,
                overwrite,
            };
            dxf2gis_frontend::convert(&options, &config)
        }
    };

    match result {
        Ok(CommandOutcome::Success) => ExitCode::SUCCESS,
        Ok(CommandOutcome::Partial) => {
            warn!("部分图层未写出，详见诊断");
            ExitCode::from(2)
        }
        Err(err) => {
            error!(error = %err, "执行失败");
            eprintln!("错误: {err}");
            ExitCode::from(1)
        }
    }
}

fn load_configuration(override_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match override_path {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::discover(),
    }
}

fn report_config_error(err: &ConfigError) {
    match err {
        ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
            warn!(path = %path.display(), error = %err, "加载配置失败，使用内建默认值");
        }
        ConfigError::Invalid { .. } | ConfigError::Context { .. } => {
            warn!(error = %err, "加载配置失败，使用内建默认值");
        }
    }
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_returned_for_logging_after_init() {
        let dir = tempfile::tempdir().expect("创建临时目录失败");
        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[conversion\n").expect("写入配置失败");
        let err = load_configuration(Some(broken.as_path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        let err = load_configuration(Some(dir.path().join("missing.toml").as_path())).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
