//! Silent Bridge 核心类型
//!
//! 本 crate 提供各连接器共享的核心结构，包括：
//! - 文件元数据与批量动作模型
//! - 按连接器切片的会话
//! - 错误分类
//! - 连接器 trait 与统一方法集合
//! - 通用批量执行器

pub mod batch;
mod connector;
mod error;
mod models;
mod session;
pub mod stream;

pub use batch::BatchReport;
pub use connector::{Connector, Method};
pub use error::{BridgeError, ErrorKind, Result};
pub use models::*;
pub use session::*;
pub use stream::{BufferedSink, ByteStream, WriteSink};
