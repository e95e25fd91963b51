//! 错误分类
//!
//! 所有连接器、分发引擎和批量执行器共用同一套错误类型。
//! 远端错误只在连接器边界翻译一次，之后原样向上传播。

use crate::BatchAction;
use std::fmt;
use thiserror::Error;

/// 错误种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotSupported,
    IsDirectory,
    PermissionDenied,
    InvalidArgument,
    NotFound,
    IoError,
    Batch,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotSupported => "NotSupported",
            ErrorKind::IsDirectory => "IsDirectory",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::IoError => "IOError",
            ErrorKind::Batch => "BatchError",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("不支持的操作: {0}")]
    NotSupported(String),

    #[error("目标是目录: {0}")]
    IsDirectory(String),

    #[error("权限不足: {0}")]
    PermissionDenied(String),

    #[error("无效参数: {0}")]
    InvalidArgument(String),

    #[error("未找到: {0}")]
    NotFound(String),

    #[error("IO 错误: {0}")]
    Io(String),

    /// 批量计划中第 `index` 个动作失败，`completed` 为已执行（不会回滚）的动作
    #[error("批量操作第 {index} 步 ({action}) 失败: {source}")]
    Batch {
        index: usize,
        action: BatchAction,
        completed: Vec<BatchAction>,
        source: Box<BridgeError>,
    },
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::NotSupported(_) => ErrorKind::NotSupported,
            BridgeError::IsDirectory(_) => ErrorKind::IsDirectory,
            BridgeError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            BridgeError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            BridgeError::NotFound(_) => ErrorKind::NotFound,
            BridgeError::Io(_) => ErrorKind::IoError,
            BridgeError::Batch { .. } => ErrorKind::Batch,
        }
    }

    /// 穿透 `Batch` 包装后的底层错误种类
    pub fn root_kind(&self) -> ErrorKind {
        match self {
            BridgeError::Batch { source, .. } => source.root_kind(),
            other => other.kind(),
        }
    }

    /// 包装批量计划中某一步的失败
    pub fn batch(
        index: usize,
        action: BatchAction,
        completed: Vec<BatchAction>,
        source: BridgeError,
    ) -> Self {
        BridgeError::Batch {
            index,
            action,
            completed,
            source: Box::new(source),
        }
    }

    /// 连接器未实现某个方法
    pub fn unimplemented(connector: &str, method: impl fmt::Display) -> Self {
        BridgeError::InvalidArgument(format!("连接器 {} 未实现方法 {}", connector, method))
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let message = err.to_string();
        match err.kind() {
            Io::NotFound => BridgeError::NotFound(message),
            Io::PermissionDenied => BridgeError::PermissionDenied(message),
            Io::AlreadyExists => BridgeError::InvalidArgument(format!("已存在: {}", message)),
            Io::IsADirectory => BridgeError::IsDirectory(message),
            Io::InvalidInput => BridgeError::InvalidArgument(message),
            Io::Unsupported => BridgeError::NotSupported(message),
            _ => BridgeError::Io(message),
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Io(format!("响应解析失败: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
