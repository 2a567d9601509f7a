use std::path::{Path, PathBuf};

use dxf2gis_core::{
    document::Drawing,
    features::{GeometryKind, LayerOutput, SpatialReference},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod code_page;
pub mod dwg;
mod dxf;
pub mod geopackage;
mod prj;
pub mod shapefile;
pub mod wkb;

pub use dwg::{ConverterPreference, DwgFacade};
pub use dxf::DxfFacade;
pub use geopackage::GeoPackageWriter;
pub use shapefile::ShapefileWriter;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("failed to read file {path:?}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write file {path:?}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid document structure: {0}")]
    InvalidDocument(String),
    #[error("GeoPackage {path:?} 操作失败: {source}")]
    Sqlite {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    #[error("DWG 转换失败: {0}")]
    Converter(String),
    #[error("输出目标已存在且未启用覆盖: {0:?}")]
    AlreadyExists(PathBuf),
}

/// 从磁盘读取图纸。
pub trait DrawingLoader {
    fn load(&self, path: &Path) -> Result<Drawing, IoError>;
}

/// 按扩展名分派：`.dxf` 直接解析，`.dwg` 先经外部转换器转为临时 DXF。
#[derive(Debug, Clone, Default)]
pub struct DrawingFileLoader {
    dxf: DxfFacade,
    dwg: DwgFacade,
}

impl DrawingFileLoader {
    pub fn new(dwg: DwgFacade) -> Self {
        Self {
            dxf: DxfFacade::new(),
            dwg,
        }
    }
}

impl DrawingLoader for DrawingFileLoader {
    fn load(&self, path: &Path) -> Result<Drawing, IoError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("dxf") => self.dxf.load(path),
            Some("dwg") => self.dwg.load(path),
            _ => Err(IoError::UnsupportedFeature(format!(
                "无法识别的图纸格式: {}",
                path.display()
            ))),
        }
    }
}

/// 一个已写出的数据集。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrittenLayer {
    pub name: String,
    pub source_layer: String,
    pub kind: GeometryKind,
    pub feature_count: usize,
    pub path: PathBuf,
}

/// 数据集写出器。每次调用写一个图层，失败只影响该图层。
pub trait DatasetWriter {
    fn write_layer(
        &mut self,
        layer: &LayerOutput,
        srs: &SpatialReference,
    ) -> Result<WrittenLayer, IoError>;
}
