use scholia_engine::errors::EngineError;
use scholia_io::IoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("加载文档失败: {0}")]
    Load(#[from] IoError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("命令 `{name}` 执行失败: {message}")]
    Command { name: String, message: String },
}
