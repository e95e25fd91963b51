//! FTP 传输
//!
//! suppaftp 的同步客户端放在阻塞线程池中执行，连接在调用之间来回转移。

use super::host::{HostClient, HostConnector, HostTransport, join_base};
use crate::config::FtpConfig;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use silent_bridge_core::{BridgeError, FileInfo, HostCredentials, Result};
use std::io::Cursor;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;
use suppaftp::list::File;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpResult, FtpStream};
use tracing::debug;

pub fn connector(config: &FtpConfig) -> HostConnector {
    HostConnector::new(
        "ftp",
        "FTP",
        &config.sign_in_url,
        Arc::new(FtpTransport {
            default_port: config.default_port,
            timeout: Duration::from_secs(config.timeout),
        }),
    )
}

pub struct FtpTransport {
    default_port: u16,
    timeout: Duration,
}

fn ftp_error(path: &str, err: FtpError) -> BridgeError {
    match err {
        FtpError::UnexpectedResponse(resp) => match resp.status.code() {
            550 | 450 => BridgeError::NotFound(path.to_string()),
            530 | 532 => BridgeError::PermissionDenied(format!("FTP {}: {:?}", path, resp.status)),
            502 | 504 => BridgeError::NotSupported(format!("FTP: {}", path)),
            _ => BridgeError::Io(format!("FTP {}: {:?}", path, resp.status)),
        },
        FtpError::ConnectionError(e) => BridgeError::Io(format!("FTP 连接失败: {}", e)),
        other => BridgeError::Io(format!("FTP {}: {}", path, other)),
    }
}

/// 解析 LIST 输出，无法识别的行直接跳过
fn parse_listing(lines: &[String]) -> Vec<FileInfo> {
    lines
        .iter()
        .filter_map(|line| line.parse::<File>().ok())
        .filter(|f| f.name() != "." && f.name() != "..")
        .map(|f| to_file_info(&f))
        .collect()
}

fn to_file_info(file: &File) -> FileInfo {
    let info = if file.is_directory() {
        FileInfo::directory(file.name())
    } else {
        FileInfo::file(file.name(), file.size() as u64)
    };
    info.with_modified(Some(DateTime::<Utc>::from(file.modified())))
}

fn split_parent(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((parent, name)) => (parent, name),
        None => ("/", path),
    }
}

#[async_trait]
impl HostTransport for FtpTransport {
    async fn connect(&self, creds: &HostCredentials) -> Result<Box<dyn HostClient>> {
        let port = creds.port.unwrap_or(self.default_port);
        let host = creds.host.clone();
        let user = creds.user.clone();
        let password = creds.password.clone();
        let timeout = self.timeout;
        debug!("FTP 连接: {}@{}:{}", user, host, port);

        let stream = tokio::task::spawn_blocking(move || -> Result<FtpStream> {
            let addr = (host.as_str(), port)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| BridgeError::InvalidArgument(format!("无法解析主机: {}", host)))?;
            let mut ftp =
                FtpStream::connect_timeout(addr, timeout).map_err(|e| ftp_error("/", e))?;
            ftp.login(&user, &password).map_err(|e| match e {
                FtpError::UnexpectedResponse(_) => {
                    BridgeError::PermissionDenied(format!("FTP 认证失败: {}@{}", user, host))
                }
                other => ftp_error("/", other),
            })?;
            ftp.transfer_type(FileType::Binary)
                .map_err(|e| ftp_error("/", e))?;
            Ok(ftp)
        })
        .await
        .map_err(|e| BridgeError::Io(format!("FTP 任务失败: {}", e)))??;

        Ok(Box::new(FtpClient {
            stream: Some(stream),
            base: creds.base_path.clone(),
        }))
    }
}

struct FtpClient {
    /// 执行命令期间被移入阻塞线程
    stream: Option<FtpStream>,
    base: String,
}

impl FtpClient {
    async fn run<T, F>(&mut self, path: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpStream, String) -> FtpResult<T> + Send + 'static,
    {
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| BridgeError::Io("FTP 连接已中断".to_string()))?;
        let target = join_base(&self.base, path);
        let (stream, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut stream, target);
            (stream, result)
        })
        .await
        .map_err(|e| BridgeError::Io(format!("FTP 任务失败: {}", e)))?;
        self.stream = Some(stream);
        result.map_err(|e| ftp_error(path, e))
    }
}

#[async_trait]
impl HostClient for FtpClient {
    async fn list(&mut self, path: &str) -> Result<Vec<FileInfo>> {
        let lines = self
            .run(path, |ftp, target| ftp.list(Some(target.as_str())))
            .await?;
        Ok(parse_listing(&lines))
    }

    async fn stat(&mut self, path: &str) -> Result<FileInfo> {
        if path == "/" {
            // 根目录可能不出现在任何 LIST 输出中
            self.run(path, |ftp, target| ftp.cwd(&target)).await?;
            return Ok(FileInfo::directory(""));
        }
        let (parent, name) = split_parent(path);
        self.list(parent)
            .await?
            .into_iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| BridgeError::NotFound(path.to_string()))
    }

    async fn mkdir(&mut self, path: &str) -> Result<()> {
        self.run(path, |ftp, target| ftp.mkdir(&target)).await
    }

    async fn read(&mut self, path: &str) -> Result<Bytes> {
        let content = self
            .run(path, |ftp, target| ftp.retr_as_buffer(&target))
            .await?;
        Ok(Bytes::from(content.into_inner()))
    }

    async fn write(&mut self, path: &str, content: Bytes) -> Result<()> {
        let len = content.len();
        self.run(path, move |ftp, target| {
            ftp.put_file(&target, &mut Cursor::new(content))
        })
        .await?;
        debug!("FTP 写入 {} ({} 字节)", path, len);
        Ok(())
    }

    async fn rename(&mut self, src: &str, dest: &str) -> Result<()> {
        let dest = join_base(&self.base, dest);
        self.run(src, move |ftp, target| ftp.rename(&target, &dest))
            .await
    }

    async fn remove_file(&mut self, path: &str) -> Result<()> {
        self.run(path, |ftp, target| ftp.rm(&target)).await
    }

    async fn remove_dir(&mut self, path: &str) -> Result<()> {
        // RMD 只能删除空目录
        for entry in self.list(path).await? {
            let child = format!("{}/{}", path.trim_end_matches('/'), entry.name);
            if entry.is_dir {
                self.remove_dir(&child).await?;
            } else {
                self.remove_file(&child).await?;
            }
        }
        self.run(path, |ftp, target| ftp.rmdir(&target)).await
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        self.run("/", |ftp, _| ftp.quit()).await
    }
}
