// Silent-Bridge 库接口
// 供命令行、测试和外部集成使用

pub mod config;
pub mod connectors;
pub mod engine;
pub mod http;

pub use config::Config;
pub use engine::{ConnectorRegistry, Engine, Request, Response};

// 重新导出核心类型
pub use silent_bridge_core as core;
pub use silent_bridge_core::{
    ActionKind, BatchAction, BridgeError, Connector, ConnectorInfo, ConnectorSession, ErrorKind,
    FileInfo, LoginInfo, Method, Result, Session,
};
