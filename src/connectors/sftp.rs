//! SFTP 传输
//!
//! 基于 russh 建立 SSH 连接，密码认证后打开 `sftp` 子系统。

use super::host::{HostClient, HostConnector, HostTransport, join_base};
use crate::config::SftpConfig;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use russh::client;
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::protocol::{FileAttributes, StatusCode};
use silent_bridge_core::{BridgeError, FileInfo, HostCredentials, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;

pub fn connector(config: &SftpConfig) -> HostConnector {
    HostConnector::new(
        "sftp",
        "SFTP",
        &config.sign_in_url,
        Arc::new(SftpTransport {
            default_port: config.default_port,
            timeout: Duration::from_secs(config.timeout),
        }),
    )
}

struct SshHandler;

impl client::Handler for SshHandler {
    type Error = russh::Error;

    // TODO: 按配置的 known_hosts 校验主机公钥
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

pub struct SftpTransport {
    default_port: u16,
    timeout: Duration,
}

fn ssh_error(err: russh::Error) -> BridgeError {
    BridgeError::Io(format!("SSH 连接失败: {}", err))
}

/// 把 SFTP 状态码翻译为错误分类
fn sftp_error(path: &str, err: SftpError) -> BridgeError {
    match err {
        SftpError::Status(status) => match status.status_code {
            StatusCode::NoSuchFile => BridgeError::NotFound(path.to_string()),
            StatusCode::PermissionDenied => {
                BridgeError::PermissionDenied(format!("{}: {}", path, status.error_message))
            }
            StatusCode::OpUnsupported => BridgeError::NotSupported(format!("SFTP: {}", path)),
            _ => BridgeError::Io(format!("SFTP {}: {}", path, status.error_message)),
        },
        other => BridgeError::Io(format!("SFTP {}: {}", path, other)),
    }
}

fn is_dir(attrs: &FileAttributes) -> bool {
    attrs
        .permissions
        .is_some_and(|mode| mode & S_IFMT == S_IFDIR)
}

fn to_file_info(name: &str, attrs: &FileAttributes) -> FileInfo {
    let info = if is_dir(attrs) {
        FileInfo::directory(name)
    } else {
        FileInfo::file(name, attrs.size.unwrap_or(0))
    };
    info.with_modified(attrs.mtime.and_then(|t| DateTime::from_timestamp(i64::from(t), 0)))
}

#[async_trait]
impl HostTransport for SftpTransport {
    async fn connect(&self, creds: &HostCredentials) -> Result<Box<dyn HostClient>> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(self.timeout),
            ..Default::default()
        });
        let port = creds.port.unwrap_or(self.default_port);
        debug!("SFTP 连接: {}@{}:{}", creds.user, creds.host, port);

        let mut handle = tokio::time::timeout(
            self.timeout,
            client::connect(config, (creds.host.as_str(), port), SshHandler),
        )
        .await
        .map_err(|_| BridgeError::Io(format!("连接 {}:{} 超时", creds.host, port)))?
        .map_err(ssh_error)?;

        let auth = handle
            .authenticate_password(creds.user.as_str(), creds.password.as_str())
            .await
            .map_err(ssh_error)?;
        if !auth.success() {
            return Err(BridgeError::PermissionDenied(format!(
                "SFTP 认证失败: {}@{}",
                creds.user, creds.host
            )));
        }

        let channel = handle.channel_open_session().await.map_err(ssh_error)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(ssh_error)?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| sftp_error("/", e))?;

        Ok(Box::new(SftpClient {
            handle,
            sftp,
            base: creds.base_path.clone(),
        }))
    }
}

struct SftpClient {
    handle: client::Handle<SshHandler>,
    sftp: SftpSession,
    /// 登录 URL 中的路径前缀
    base: String,
}

impl SftpClient {
    fn resolve(&self, path: &str) -> String {
        join_base(&self.base, path)
    }
}

#[async_trait]
impl HostClient for SftpClient {
    async fn list(&mut self, path: &str) -> Result<Vec<FileInfo>> {
        let target = self.resolve(path);
        let entries = self
            .sftp
            .read_dir(target.as_str())
            .await
            .map_err(|e| sftp_error(path, e))?;
        Ok(entries
            .filter(|e| e.file_name() != "." && e.file_name() != "..")
            .map(|e| to_file_info(&e.file_name(), &e.metadata()))
            .collect())
    }

    async fn stat(&mut self, path: &str) -> Result<FileInfo> {
        let attrs = self
            .sftp
            .metadata(self.resolve(path))
            .await
            .map_err(|e| sftp_error(path, e))?;
        let name = path.rsplit('/').next().unwrap_or_default();
        Ok(to_file_info(name, &attrs))
    }

    async fn mkdir(&mut self, path: &str) -> Result<()> {
        self.sftp
            .create_dir(self.resolve(path))
            .await
            .map_err(|e| sftp_error(path, e))
    }

    async fn read(&mut self, path: &str) -> Result<Bytes> {
        let mut file = self
            .sftp
            .open(self.resolve(path))
            .await
            .map_err(|e| sftp_error(path, e))?;
        let mut content = Vec::new();
        file.read_to_end(&mut content).await?;
        Ok(Bytes::from(content))
    }

    async fn write(&mut self, path: &str, content: Bytes) -> Result<()> {
        let mut file = self
            .sftp
            .create(self.resolve(path))
            .await
            .map_err(|e| sftp_error(path, e))?;
        file.write_all(&content).await?;
        file.shutdown().await?;
        debug!("SFTP 写入 {} ({} 字节)", path, content.len());
        Ok(())
    }

    async fn rename(&mut self, src: &str, dest: &str) -> Result<()> {
        self.sftp
            .rename(self.resolve(src), self.resolve(dest))
            .await
            .map_err(|e| sftp_error(src, e))
    }

    async fn remove_file(&mut self, path: &str) -> Result<()> {
        self.sftp
            .remove_file(self.resolve(path))
            .await
            .map_err(|e| sftp_error(path, e))
    }

    async fn remove_dir(&mut self, path: &str) -> Result<()> {
        // SFTP 只能删除空目录，先删除子项
        let target = self.resolve(path);
        let children: Vec<(String, bool)> = self
            .sftp
            .read_dir(target.as_str())
            .await
            .map_err(|e| sftp_error(path, e))?
            .filter(|e| e.file_name() != "." && e.file_name() != "..")
            .map(|e| (e.file_name(), is_dir(&e.metadata())))
            .collect();
        for (name, dir) in children {
            let child = format!("{}/{}", path.trim_end_matches('/'), name);
            if dir {
                self.remove_dir(&child).await?;
            } else {
                self.remove_file(&child).await?;
            }
        }
        self.sftp
            .remove_dir(target)
            .await
            .map_err(|e| sftp_error(path, e))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let SftpClient { handle, sftp, .. } = *self;
        sftp.close().await.map_err(|e| sftp_error("/", e))?;
        handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(ssh_error)
    }
}
