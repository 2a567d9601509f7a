use dxf2gis_engine::errors::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("参数 {argument} 无效: {message}")]
    InvalidArgument {
        argument: &'static str,
        message: String,
    },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("写出命令结果失败: {0}")]
    Output(#[from] std::io::Error),
}
