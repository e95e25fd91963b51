//! 主机类连接器（FTP、SFTP）
//!
//! 会话只保存主机凭据，每次调用重新建立连接，完成后关闭。
//! 具体协议由 [`HostTransport`] 提供，连接器本身只负责类型检查、
//! 路径规范化和日志。

use super::normalize_path;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use silent_bridge_core::stream::once_stream;
use silent_bridge_core::{
    Account, BridgeError, BufferedSink, ByteStream, Connector, ConnectorInfo, ConnectorSession,
    FileInfo, HostCredentials, LoginInfo, Method, Result, WriteSink,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 一次连接上的文件操作，路径均为以 `/` 开头的绝对路径
#[async_trait]
pub trait HostClient: Send {
    async fn list(&mut self, path: &str) -> Result<Vec<FileInfo>>;
    async fn stat(&mut self, path: &str) -> Result<FileInfo>;
    async fn mkdir(&mut self, path: &str) -> Result<()>;
    async fn read(&mut self, path: &str) -> Result<Bytes>;
    async fn write(&mut self, path: &str, content: Bytes) -> Result<()>;
    async fn rename(&mut self, src: &str, dest: &str) -> Result<()>;
    async fn remove_file(&mut self, path: &str) -> Result<()>;
    async fn remove_dir(&mut self, path: &str) -> Result<()>;
    async fn close(self: Box<Self>) -> Result<()>;
}

/// 建立连接并完成认证
#[async_trait]
pub trait HostTransport: Send + Sync {
    async fn connect(&self, creds: &HostCredentials) -> Result<Box<dyn HostClient>>;
}

const CAPABILITIES: &[Method] = &[
    Method::GetInfos,
    Method::GetAuthorizeUrl,
    Method::ClearAccessToken,
    Method::Login,
    Method::Readdir,
    Method::Stat,
    Method::Mkdir,
    Method::WriteFile,
    Method::CreateWriteStream,
    Method::ReadFile,
    Method::CreateReadStream,
    Method::Rename,
    Method::Unlink,
    Method::Rmdir,
    Method::Batch,
];

pub struct HostConnector {
    name: &'static str,
    display_name: &'static str,
    sign_in_url: String,
    transport: Arc<dyn HostTransport>,
}

impl HostConnector {
    pub fn new(
        name: &'static str,
        display_name: &'static str,
        sign_in_url: &str,
        transport: Arc<dyn HostTransport>,
    ) -> Self {
        Self {
            name,
            display_name,
            sign_in_url: sign_in_url.to_string(),
            transport,
        }
    }

    async fn open(&self, session: &ConnectorSession) -> Result<Box<dyn HostClient>> {
        self.transport.connect(session.require_host()?).await
    }

    /// 在一次连接内执行操作，无论成败都关闭连接
    async fn with_client<T, F>(&self, session: &ConnectorSession, op: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut Box<dyn HostClient>) -> BoxFuture<'c, Result<T>> + Send,
    {
        let mut client = self.open(session).await?;
        let result = op(&mut client).await;
        if let Err(e) = client.close().await {
            warn!("{} 关闭连接失败: {}", self.name, e);
        }
        result
    }
}

/// 规范化为以 `/` 开头的远端路径
pub(crate) fn remote_path(path: &str) -> Result<String> {
    Ok(format!("/{}", normalize_path(path)?))
}

/// 把登录 URL 中的路径前缀拼到远端绝对路径之前
pub(crate) fn join_base(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    match (base.is_empty(), path) {
        (true, _) => path.to_string(),
        (false, "/") => base.to_string(),
        (false, _) => format!("{}{}", base, path),
    }
}

#[async_trait]
impl Connector for HostConnector {
    fn name(&self) -> &str {
        self.name
    }

    fn capabilities(&self) -> &'static [Method] {
        CAPABILITIES
    }

    fn get_infos(&self, session: &ConnectorSession) -> ConnectorInfo {
        ConnectorInfo {
            name: self.name.to_string(),
            display_name: self.display_name.to_string(),
            icon: format!("../assets/{}.png", self.name),
            description: format!("编辑 {} 服务器上的文件", self.display_name),
            is_logged_in: session.host.is_some(),
            is_oauth: false,
            username: session.host.as_ref().map(|h| h.user.clone()),
        }
    }

    async fn get_authorize_url(&self, _session: &mut ConnectorSession) -> Result<String> {
        Ok(self.sign_in_url.clone())
    }

    async fn login(&self, session: &mut ConnectorSession, info: LoginInfo) -> Result<Option<String>> {
        let LoginInfo::Host(creds) = info else {
            return Err(BridgeError::InvalidArgument(format!(
                "{} 需要主机凭据登录",
                self.display_name
            )));
        };
        if creds.host.is_empty() {
            return Err(BridgeError::InvalidArgument("缺少主机名".to_string()));
        }
        // 能连上并读取根目录才算登录成功
        let mut client = self.transport.connect(&creds).await?;
        let root = client.stat("/").await;
        if let Err(e) = client.close().await {
            warn!("{} 关闭连接失败: {}", self.name, e);
        }
        root?;

        info!("{} 登录成功: {}@{}", self.display_name, creds.user, creds.host);
        session.account = Some(Account {
            login: creds.user.clone(),
            display_name: None,
            email: None,
        });
        session.host = Some(creds);
        Ok(None)
    }

    async fn readdir(&self, session: &mut ConnectorSession, path: &str) -> Result<Vec<FileInfo>> {
        let path = remote_path(path)?;
        let files = self
            .with_client(session, |c| async move { c.list(&path).await }.boxed())
            .await?;
        debug!("{} 读取目录, 条目数: {}", self.name, files.len());
        Ok(files)
    }

    async fn stat(&self, session: &mut ConnectorSession, path: &str) -> Result<FileInfo> {
        let path = remote_path(path)?;
        self.with_client(session, |c| async move { c.stat(&path).await }.boxed())
            .await
    }

    async fn mkdir(&self, session: &mut ConnectorSession, path: &str) -> Result<()> {
        let path = remote_path(path)?;
        self.with_client(session, |c| {
            async move {
                match c.stat(&path).await {
                    Ok(_) => Err(BridgeError::InvalidArgument(format!("目标已存在: {}", path))),
                    Err(BridgeError::NotFound(_)) => c.mkdir(&path).await,
                    Err(e) => Err(e),
                }
            }
            .boxed()
        })
        .await
    }

    async fn write_file(&self, session: &mut ConnectorSession, path: &str, content: Bytes) -> Result<()> {
        let path = remote_path(path)?;
        self.with_client(session, |c| async move { c.write(&path, content).await }.boxed())
            .await
    }

    async fn create_write_stream(&self, session: &mut ConnectorSession, path: &str) -> Result<Box<dyn WriteSink>> {
        let path = remote_path(path)?;
        let creds = session.require_host()?.clone();
        let transport = self.transport.clone();
        Ok(Box::new(BufferedSink::new(move |content| {
            async move {
                let mut client = transport.connect(&creds).await?;
                let result = client.write(&path, content).await;
                let closed = client.close().await;
                result?;
                closed
            }
            .boxed()
        })))
    }

    async fn read_file(&self, session: &mut ConnectorSession, path: &str) -> Result<Bytes> {
        let path = remote_path(path)?;
        self.with_client(session, |c| {
            async move {
                if c.stat(&path).await?.is_dir {
                    return Err(BridgeError::IsDirectory(path.clone()));
                }
                c.read(&path).await
            }
            .boxed()
        })
        .await
    }

    async fn create_read_stream(&self, session: &mut ConnectorSession, path: &str) -> Result<ByteStream> {
        Ok(once_stream(self.read_file(session, path).await?))
    }

    async fn rename(&self, session: &mut ConnectorSession, src: &str, dest: &str) -> Result<()> {
        let src = remote_path(src)?;
        let dest = remote_path(dest)?;
        self.with_client(session, |c| {
            async move {
                match c.stat(&dest).await {
                    Ok(_) => Err(BridgeError::InvalidArgument(format!("目标已存在: {}", dest))),
                    Err(BridgeError::NotFound(_)) => c.rename(&src, &dest).await,
                    Err(e) => Err(e),
                }
            }
            .boxed()
        })
        .await?;
        info!("{} 重命名完成", self.name);
        Ok(())
    }

    async fn unlink(&self, session: &mut ConnectorSession, path: &str) -> Result<()> {
        let path = remote_path(path)?;
        self.with_client(session, |c| {
            async move {
                if c.stat(&path).await?.is_dir {
                    return Err(BridgeError::IsDirectory(path.clone()));
                }
                c.remove_file(&path).await
            }
            .boxed()
        })
        .await
    }

    async fn rmdir(&self, session: &mut ConnectorSession, path: &str) -> Result<()> {
        let path = remote_path(path)?;
        if path == "/" {
            return Err(BridgeError::InvalidArgument("不能删除根目录".to_string()));
        }
        let target = path.clone();
        self.with_client(session, |c| {
            async move {
                if !c.stat(&path).await?.is_dir {
                    return Err(BridgeError::InvalidArgument(format!("不是目录: {}", path)));
                }
                c.remove_dir(&path).await
            }
            .boxed()
        })
        .await?;
        info!("{} 目录已删除: {}", self.name, target);
        Ok(())
    }
}
