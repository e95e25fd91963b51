//! 分发引擎
//!
//! 唯一入口：按名称解析连接器，检查方法是否实现，对需要认证的方法
//! 统一执行登录检查，然后把调用原样转发给连接器。

use crate::config::Config;
use crate::connectors::{
    DropboxConnector, FsConnector, GithubConnector, WebDavConnector, ftp, sftp,
};
use crate::http::{HttpClient, ReqwestClient};
use bytes::Bytes;
use silent_bridge_core::{
    BatchAction, BridgeError, ByteStream, Connector, ConnectorInfo, ConnectorSession, FileInfo,
    LoginInfo, Method, Result, Session, WriteSink,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 连接器注册表
///
/// 启动时构建一次，交给 [`Engine`] 后不再变化。
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册连接器，名称统一转为小写；同名注册会覆盖之前的连接器
    pub fn register(&mut self, connector: Arc<dyn Connector>) -> Result<&mut Self> {
        let name = connector.name().trim().to_lowercase();
        if name.is_empty() {
            return Err(BridgeError::InvalidArgument("连接器缺少名称".to_string()));
        }
        if self.connectors.insert(name.clone(), connector).is_some() {
            warn!("连接器 {} 已存在，覆盖旧的注册", name);
        } else {
            debug!("注册连接器: {}", name);
        }
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Connector>> {
        self.connectors.get(&name.trim().to_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connectors.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

/// 动态调用的参数
pub enum Request {
    GetInfos,
    GetAuthorizeUrl,
    SetAccessToken { token: String },
    ClearAccessToken,
    Login { info: LoginInfo },
    Readdir { path: String },
    Stat { path: String },
    Mkdir { path: String },
    WriteFile { path: String, content: Bytes },
    CreateWriteStream { path: String },
    ReadFile { path: String },
    CreateReadStream { path: String },
    Rename { src: String, dest: String },
    Unlink { path: String },
    Rmdir { path: String },
    Batch {
        plan: Vec<BatchAction>,
        message: Option<String>,
    },
}

impl Request {
    pub fn method(&self) -> Method {
        match self {
            Request::GetInfos => Method::GetInfos,
            Request::GetAuthorizeUrl => Method::GetAuthorizeUrl,
            Request::SetAccessToken { .. } => Method::SetAccessToken,
            Request::ClearAccessToken => Method::ClearAccessToken,
            Request::Login { .. } => Method::Login,
            Request::Readdir { .. } => Method::Readdir,
            Request::Stat { .. } => Method::Stat,
            Request::Mkdir { .. } => Method::Mkdir,
            Request::WriteFile { .. } => Method::WriteFile,
            Request::CreateWriteStream { .. } => Method::CreateWriteStream,
            Request::ReadFile { .. } => Method::ReadFile,
            Request::CreateReadStream { .. } => Method::CreateReadStream,
            Request::Rename { .. } => Method::Rename,
            Request::Unlink { .. } => Method::Unlink,
            Request::Rmdir { .. } => Method::Rmdir,
            Request::Batch { .. } => Method::Batch,
        }
    }
}

/// 动态调用的结果，连接器的返回值原样转交
pub enum Response {
    Infos(ConnectorInfo),
    Url(String),
    Token(String),
    LoginResult(Option<String>),
    Entries(Vec<FileInfo>),
    Entry(FileInfo),
    Content(Bytes),
    ReadStream(ByteStream),
    WriteStream(Box<dyn WriteSink>),
    Done,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Infos(i) => f.debug_tuple("Infos").field(i).finish(),
            Response::Url(u) => f.debug_tuple("Url").field(u).finish(),
            Response::Token(_) => f.write_str("Token(..)"),
            Response::LoginResult(_) => f.write_str("LoginResult(..)"),
            Response::Entries(e) => f.debug_tuple("Entries").field(e).finish(),
            Response::Entry(e) => f.debug_tuple("Entry").field(e).finish(),
            Response::Content(c) => write!(f, "Content({} bytes)", c.len()),
            Response::ReadStream(_) => f.write_str("ReadStream"),
            Response::WriteStream(_) => f.write_str("WriteStream"),
            Response::Done => f.write_str("Done"),
        }
    }
}

/// 分发引擎
#[derive(Clone)]
pub struct Engine {
    registry: Arc<ConnectorRegistry>,
}

impl Engine {
    pub fn new(registry: ConnectorRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// 按配置注册启用的连接器
    pub fn from_config(config: &Config) -> Result<Self> {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(&config.http)?);
        Self::with_http_client(config, http)
    }

    /// 使用指定的 HTTP 客户端构建（测试中注入内存实现）
    pub fn with_http_client(config: &Config, http: Arc<dyn HttpClient>) -> Result<Self> {
        let mut registry = ConnectorRegistry::new();
        if config.fs.enable {
            registry.register(Arc::new(FsConnector::new(&config.fs)))?;
        }
        if config.webdav.enable {
            registry.register(Arc::new(WebDavConnector::new(&config.webdav, http.clone())))?;
        }
        if config.github.enable {
            registry.register(Arc::new(GithubConnector::new(&config.github, http.clone())))?;
        }
        if config.dropbox.enable {
            registry.register(Arc::new(DropboxConnector::new(&config.dropbox, http)))?;
        }
        if config.ftp.enable {
            registry.register(Arc::new(ftp::connector(&config.ftp)))?;
        }
        if config.sftp.enable {
            registry.register(Arc::new(sftp::connector(&config.sftp)))?;
        }
        info!("分发引擎已初始化: connectors={:?}", registry.names());
        Ok(Self::new(registry))
    }

    pub fn registry(&self) -> &ConnectorRegistry {
        &self.registry
    }

    /// 解析连接器并执行前置检查
    ///
    /// 返回连接器和它在会话中的切片（不存在时创建空切片）。
    fn resolve<'s>(
        &self,
        session: &'s mut Session,
        name: &str,
        method: Method,
    ) -> Result<(Arc<dyn Connector>, &'s mut ConnectorSession)> {
        if name.trim().is_empty() {
            return Err(BridgeError::InvalidArgument("未指定连接器".to_string()));
        }
        let connector = self
            .registry
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::InvalidArgument(format!("未知连接器: {}", name)))?;
        if !connector.supports(method) {
            return Err(BridgeError::unimplemented(connector.name(), method));
        }

        let slot = session.slot_mut(&name.trim().to_lowercase());
        if method.requires_auth() && !connector.get_infos(slot).is_logged_in {
            debug!("拒绝未登录的调用: connector={}, method={}", name, method);
            return Err(BridgeError::PermissionDenied(format!(
                "调用 {}.{} 需要先登录",
                connector.name(),
                method
            )));
        }
        Ok((connector, slot))
    }

    /// 动态分发入口
    pub async fn invoke(&self, session: &mut Session, connector: &str, request: Request) -> Result<Response> {
        let (c, slot) = self.resolve(session, connector, request.method())?;
        let response = match request {
            Request::GetInfos => Response::Infos(c.get_infos(slot)),
            Request::GetAuthorizeUrl => Response::Url(c.get_authorize_url(slot).await?),
            Request::SetAccessToken { token } => Response::Token(c.set_access_token(slot, &token).await?),
            Request::ClearAccessToken => {
                c.clear_access_token(slot).await?;
                Response::Done
            }
            Request::Login { info } => Response::LoginResult(c.login(slot, info).await?),
            Request::Readdir { path } => Response::Entries(c.readdir(slot, &path).await?),
            Request::Stat { path } => Response::Entry(c.stat(slot, &path).await?),
            Request::Mkdir { path } => {
                c.mkdir(slot, &path).await?;
                Response::Done
            }
            Request::WriteFile { path, content } => {
                c.write_file(slot, &path, content).await?;
                Response::Done
            }
            Request::CreateWriteStream { path } => Response::WriteStream(c.create_write_stream(slot, &path).await?),
            Request::ReadFile { path } => Response::Content(c.read_file(slot, &path).await?),
            Request::CreateReadStream { path } => Response::ReadStream(c.create_read_stream(slot, &path).await?),
            Request::Rename { src, dest } => {
                c.rename(slot, &src, &dest).await?;
                Response::Done
            }
            Request::Unlink { path } => {
                c.unlink(slot, &path).await?;
                Response::Done
            }
            Request::Rmdir { path } => {
                c.rmdir(slot, &path).await?;
                Response::Done
            }
            Request::Batch { plan, message } => {
                c.batch(slot, &plan, message.as_deref()).await?;
                Response::Done
            }
        };
        Ok(response)
    }

    /// 按方法名分发，方法名与请求不一致时拒绝
    pub async fn invoke_named(
        &self,
        session: &mut Session,
        connector: &str,
        method_name: &str,
        request: Request,
    ) -> Result<Response> {
        let method: Method = method_name.parse()?;
        if method != request.method() {
            return Err(BridgeError::InvalidArgument(format!(
                "方法 {} 与参数 {} 不匹配",
                method,
                request.method()
            )));
        }
        self.invoke(session, connector, request).await
    }

    pub fn get_infos(&self, session: &mut Session, connector: &str) -> Result<ConnectorInfo> {
        let (c, slot) = self.resolve(session, connector, Method::GetInfos)?;
        Ok(c.get_infos(slot))
    }

    pub async fn get_authorize_url(&self, session: &mut Session, connector: &str) -> Result<String> {
        let (c, slot) = self.resolve(session, connector, Method::GetAuthorizeUrl)?;
        c.get_authorize_url(slot).await
    }

    pub async fn set_access_token(&self, session: &mut Session, connector: &str, token: &str) -> Result<String> {
        let (c, slot) = self.resolve(session, connector, Method::SetAccessToken)?;
        c.set_access_token(slot, token).await
    }

    pub async fn clear_access_token(&self, session: &mut Session, connector: &str) -> Result<()> {
        let (c, slot) = self.resolve(session, connector, Method::ClearAccessToken)?;
        c.clear_access_token(slot).await
    }

    pub async fn login(&self, session: &mut Session, connector: &str, info: LoginInfo) -> Result<Option<String>> {
        let (c, slot) = self.resolve(session, connector, Method::Login)?;
        c.login(slot, info).await
    }

    pub async fn readdir(&self, session: &mut Session, connector: &str, path: &str) -> Result<Vec<FileInfo>> {
        let (c, slot) = self.resolve(session, connector, Method::Readdir)?;
        c.readdir(slot, path).await
    }

    pub async fn stat(&self, session: &mut Session, connector: &str, path: &str) -> Result<FileInfo> {
        let (c, slot) = self.resolve(session, connector, Method::Stat)?;
        c.stat(slot, path).await
    }

    pub async fn mkdir(&self, session: &mut Session, connector: &str, path: &str) -> Result<()> {
        let (c, slot) = self.resolve(session, connector, Method::Mkdir)?;
        c.mkdir(slot, path).await
    }

    pub async fn write_file(
        &self,
        session: &mut Session,
        connector: &str,
        path: &str,
        content: impl Into<Bytes>,
    ) -> Result<()> {
        let (c, slot) = self.resolve(session, connector, Method::WriteFile)?;
        c.write_file(slot, path, content.into()).await
    }

    pub async fn create_write_stream(
        &self,
        session: &mut Session,
        connector: &str,
        path: &str,
    ) -> Result<Box<dyn WriteSink>> {
        let (c, slot) = self.resolve(session, connector, Method::CreateWriteStream)?;
        c.create_write_stream(slot, path).await
    }

    pub async fn read_file(&self, session: &mut Session, connector: &str, path: &str) -> Result<Bytes> {
        let (c, slot) = self.resolve(session, connector, Method::ReadFile)?;
        c.read_file(slot, path).await
    }

    pub async fn create_read_stream(&self, session: &mut Session, connector: &str, path: &str) -> Result<ByteStream> {
        let (c, slot) = self.resolve(session, connector, Method::CreateReadStream)?;
        c.create_read_stream(slot, path).await
    }

    pub async fn rename(&self, session: &mut Session, connector: &str, src: &str, dest: &str) -> Result<()> {
        let (c, slot) = self.resolve(session, connector, Method::Rename)?;
        c.rename(slot, src, dest).await
    }

    pub async fn unlink(&self, session: &mut Session, connector: &str, path: &str) -> Result<()> {
        let (c, slot) = self.resolve(session, connector, Method::Unlink)?;
        c.unlink(slot, path).await
    }

    pub async fn rmdir(&self, session: &mut Session, connector: &str, path: &str) -> Result<()> {
        let (c, slot) = self.resolve(session, connector, Method::Rmdir)?;
        c.rmdir(slot, path).await
    }

    pub async fn batch(
        &self,
        session: &mut Session,
        connector: &str,
        plan: &[BatchAction],
        message: Option<&str>,
    ) -> Result<()> {
        let (c, slot) = self.resolve(session, connector, Method::Batch)?;
        info!("执行批量计划: connector={}, actions={}", c.name(), plan.len());
        c.batch(slot, plan, message).await
    }
}
