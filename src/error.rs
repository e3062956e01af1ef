use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// 索引与服务层的错误类型
#[derive(Debug, Error)]
pub enum Error {
    #[error("向量维度不匹配：期望 {expected}，实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("向量与元数据数量不一致：{vectors} 个向量，{metadata} 条元数据")]
    LengthMismatch { vectors: usize, metadata: usize },

    #[error("无法解码图片：{0}")]
    InvalidImage(String),

    #[error("服务尚未就绪：{0}")]
    NotReady(&'static str),

    #[error("读写 {} 失败: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("持久化状态已损坏：{0}")]
    CorruptState(String),

    #[error("找不到图片：{0}")]
    NotFound(String),

    #[error("没有任何图片被成功处理（跳过 {skipped} 张）")]
    NoItemsProcessed { skipped: usize },

    #[error("模型调用失败：{0}")]
    Provider(String),
}

/// 错误分类，传输层据此选择不同的状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 调用方错误，不应重试
    Validation,
    /// 依赖尚未初始化，稍后重试
    NotReady,
    Io,
    Corrupt,
    NotFound,
    /// 批量构建中单个条目失败
    ItemFailure,
    Provider,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DimensionMismatch { .. } | Self::LengthMismatch { .. } | Self::InvalidImage(_) => {
                ErrorKind::Validation
            }
            Self::NotReady(_) => ErrorKind::NotReady,
            Self::Io { .. } => ErrorKind::Io,
            Self::CorruptState(_) => ErrorKind::Corrupt,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NoItemsProcessed { .. } => ErrorKind::ItemFailure,
            Self::Provider(_) => ErrorKind::Provider,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }
}
