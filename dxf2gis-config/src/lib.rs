use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

const CONFIG_ENV: &str = "DXF2GIS_CONFIG";

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub conversion: ConversionConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub dwg: DwgConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 自动发现配置文件：优先读取环境变量 `DXF2GIS_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// 数值参数必须为正。
    pub fn validate(&self) -> Result<(), ConfigError> {
        let conversion = &self.conversion;
        let positive = [
            ("conversion.flatten_tolerance", conversion.flatten_tolerance),
            ("conversion.line_merge_tolerance", conversion.line_merge_tolerance),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid {
                    field,
                    message: format!("必须是正数，实际为 {value}"),
                });
            }
        }
        if conversion.event_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "conversion.event_buffer",
                message: "不能为 0".to_string(),
            });
        }
        Ok(())
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockModeSetting {
    Explode,
    #[default]
    KeepMerge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverSetting {
    #[default]
    #[serde(alias = "shp")]
    Shapefile,
    #[serde(alias = "gpkg")]
    Geopackage,
}

/// 转换参数的默认值，命令行参数可逐项覆盖。
#[derive(Debug, Clone, Deserialize)]
pub struct ConversionConfig {
    #[serde(default = "ConversionConfig::default_source_epsg")]
    pub source_epsg: u32,
    #[serde(default)]
    pub target_epsg: Option<u32>,
    #[serde(default)]
    pub block_mode: BlockModeSetting,
    #[serde(default)]
    pub driver: DriverSetting,
    #[serde(default = "ConversionConfig::default_tolerance")]
    pub flatten_tolerance: f64,
    #[serde(default = "ConversionConfig::default_tolerance")]
    pub line_merge_tolerance: f64,
    #[serde(default = "ConversionConfig::default_explode_limit")]
    pub keep_merge_explode_limit: usize,
    /// 进度事件通道容量。
    #[serde(default = "ConversionConfig::default_event_buffer")]
    pub event_buffer: usize,
}

impl ConversionConfig {
    fn default_source_epsg() -> u32 {
        3826
    }

    fn default_tolerance() -> f64 {
        0.2
    }

    fn default_explode_limit() -> usize {
        20_000
    }

    fn default_event_buffer() -> usize {
        256
    }
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            source_epsg: Self::default_source_epsg(),
            target_epsg: None,
            block_mode: BlockModeSetting::default(),
            driver: DriverSetting::default(),
            flatten_tolerance: Self::default_tolerance(),
            line_merge_tolerance: Self::default_tolerance(),
            keep_merge_explode_limit: Self::default_explode_limit(),
            event_buffer: Self::default_event_buffer(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DwgConverterSetting {
    #[default]
    Auto,
    Oda,
    Libredwg,
}

/// DWG 外部转换器设置。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DwgConfig {
    #[serde(default)]
    pub converter: DwgConverterSetting,
    /// ODA File Converter 可执行文件路径，未设置时查找 `ODA_CONVERTER` 与 PATH。
    #[serde(default)]
    pub oda_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("配置项 {field} 无效: {message}")]
    Invalid { field: &'static str, message: String },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "{content}").expect("write temp file");
        file
    }

    #[test]
    fn defaults_are_returned_when_file_missing() {
        let cfg = AppConfig::discover().expect("discover should succeed");
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.conversion.source_epsg, 3826);
        assert_eq!(cfg.conversion.target_epsg, None);
        assert_eq!(cfg.conversion.block_mode, BlockModeSetting::KeepMerge);
        assert_eq!(cfg.conversion.driver, DriverSetting::Shapefile);
        assert_eq!(cfg.conversion.keep_merge_explode_limit, 20_000);
        assert!(!cfg.output.overwrite);
        assert_eq!(cfg.dwg.converter, DwgConverterSetting::Auto);
        assert!(cfg.dwg.oda_path.is_none());
    }

    #[test]
    fn load_from_temp_file() {
        let file = write_config(
            r#"
            [logging]
            level = "debug"

            [conversion]
            source_epsg = 3825
            target_epsg = 4326
            block_mode = "explode"
            driver = "gpkg"
            flatten_tolerance = 0.05
            event_buffer = 32

            [output]
            overwrite = true

            [dwg]
            converter = "libredwg"
            oda_path = "/opt/oda/ODAFileConverter"
            "#,
        );

        let cfg = AppConfig::from_file(file.path()).expect("load config");
        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.conversion.source_epsg, 3825);
        assert_eq!(cfg.conversion.target_epsg, Some(4326));
        assert_eq!(cfg.conversion.block_mode, BlockModeSetting::Explode);
        assert_eq!(cfg.conversion.driver, DriverSetting::Geopackage);
        assert_eq!(cfg.conversion.flatten_tolerance, 0.05);
        assert_eq!(cfg.conversion.line_merge_tolerance, 0.2);
        assert_eq!(cfg.conversion.event_buffer, 32);
        assert!(cfg.output.overwrite);
        assert_eq!(cfg.dwg.converter, DwgConverterSetting::Libredwg);
        assert_eq!(
            cfg.dwg
                .oda_path
                .as_deref()
                .map(|p| p.to_string_lossy().to_string()),
            Some("/opt/oda/ODAFileConverter".to_string())
        );
    }

    #[test]
    fn unknown_block_mode_is_a_parse_error() {
        let file = write_config("[conversion]\nblock_mode = \"merge\"");
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }), "{err}");
    }

    #[test]
    fn non_positive_tolerance_is_rejected() {
        let file = write_config("[conversion]\nline_merge_tolerance = 0.0");
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "conversion.line_merge_tolerance",
                ..
            }
        ));
    }

    #[test]
    fn missing_explicit_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let err = AppConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
