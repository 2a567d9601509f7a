pub mod crs;
pub mod export;
pub mod merge;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod resolve;
pub mod scan;

pub use pipeline::{ConversionReport, ConversionRequest, Converter, OutputDriver};
pub use progress::{CancellationToken, ConversionEvent, EventSink, Stage};
pub use resolve::BlockMode;
pub use scan::LayerSummary;

pub mod errors {
    use std::fmt;
    use std::path::PathBuf;

    use dxf2gis_core::document::EntityId;
    use dxf2gis_io::{IoError, WrittenLayer};
    use thiserror::Error;

    /// 中止整个转换的错误。可恢复的问题记录为 [`Diagnostic`]。
    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("无法读取图纸 {path:?}: {source}")]
        DrawingRead {
            path: PathBuf,
            #[source]
            source: IoError,
        },
        #[error("块 {block} 存在循环引用: {}", path.join(" -> "))]
        CyclicBlockReference { block: String, path: Vec<String> },
        #[error("未知的坐标参考系 EPSG:{0}")]
        UnknownCrs(u32),
        #[error("输出位置 {path:?} 不可用: {source}")]
        Write {
            path: PathBuf,
            #[source]
            source: IoError,
        },
        #[error("转换已取消，已写出 {} 个图层", written.len())]
        Cancelled { written: Vec<WrittenLayer> },
        /// 全部所选图层为空或写出失败。
        #[error("没有写出任何图层（{} 条诊断）", diagnostics.len())]
        NothingWritten { diagnostics: Vec<Diagnostic> },
    }

    impl EngineError {
        pub fn kind(&self) -> ErrorKind {
            match self {
                EngineError::DrawingRead { .. } => ErrorKind::DrawingRead,
                EngineError::CyclicBlockReference { .. } => ErrorKind::CyclicBlockReference,
                EngineError::UnknownCrs(_) => ErrorKind::UnknownCrs,
                EngineError::Write { .. } => ErrorKind::Write,
                EngineError::Cancelled { .. } => ErrorKind::Cancelled,
                EngineError::NothingWritten { .. } => ErrorKind::NothingWritten,
            }
        }
    }

    /// 事件流中使用的稳定错误标签。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum ErrorKind {
        DrawingRead,
        CyclicBlockReference,
        UnknownCrs,
        Write,
        Cancelled,
        NothingWritten,
    }

    impl ErrorKind {
        pub fn as_str(self) -> &'static str {
            match self {
                ErrorKind::DrawingRead => "drawing_read",
                ErrorKind::CyclicBlockReference => "cyclic_block_reference",
                ErrorKind::UnknownCrs => "unknown_crs",
                ErrorKind::Write => "write",
                ErrorKind::Cancelled => "cancelled",
                ErrorKind::NothingWritten => "nothing_written",
            }
        }
    }

    impl fmt::Display for ErrorKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// 不中止转换的问题，随报告一并返回。
    #[derive(Debug, Clone, PartialEq)]
    pub enum Diagnostic {
        UnsupportedEntity {
            layer: String,
            entity_type: String,
            entity_id: EntityId,
        },
        EmptyLayer {
            layer: String,
        },
        Write {
            layer: String,
            message: String,
        },
        Geometry {
            layer: String,
            message: String,
        },
    }

    impl Diagnostic {
        pub fn layer(&self) -> &str {
            match self {
                Diagnostic::UnsupportedEntity { layer, .. }
                | Diagnostic::EmptyLayer { layer }
                | Diagnostic::Write { layer, .. }
                | Diagnostic::Geometry { layer, .. } => layer,
            }
        }
    }

    impl fmt::Display for Diagnostic {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Diagnostic::UnsupportedEntity {
                    layer,
                    entity_type,
                    entity_id,
                } => write!(
                    f,
                    "图层 {layer}: 实体 #{} ({entity_type}) 没有对应的几何类型，已跳过",
                    entity_id.get()
                ),
                Diagnostic::EmptyLayer { layer } => write!(f, "图层 {layer}: 没有可输出的几何"),
                Diagnostic::Write { layer, message } => write!(f, "图层 {layer}: 写出失败: {message}"),
                Diagnostic::Geometry { layer, message } => write!(f, "图层 {layer}: {message}"),
            }
        }
    }
}
