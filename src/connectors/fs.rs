//! 本地文件系统连接器
//!
//! 所有路径都限制在配置的根目录下，本地磁盘无需登录。

use super::{leaf_name, normalize_path};
use crate::config::FsConfig;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures_util::stream;
use silent_bridge_core::{
    BridgeError, ByteStream, Connector, ConnectorInfo, ConnectorSession, FileInfo, LoginInfo,
    Result, WriteSink,
};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Clone)]
pub struct FsConnector {
    root_path: PathBuf,
    show_hidden: bool,
}

impl FsConnector {
    pub fn new(config: &FsConfig) -> Self {
        Self {
            root_path: config.root_path.clone(),
            show_hidden: config.show_hidden,
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_path
    }

    /// 把统一路径映射到根目录下的真实路径
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = normalize_path(path)?;
        Ok(if rel.is_empty() {
            self.root_path.clone()
        } else {
            self.root_path.join(rel)
        })
    }

    fn to_file_info(name: &str, metadata: &std::fs::Metadata) -> FileInfo {
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        if metadata.is_dir() {
            FileInfo::directory(name).with_modified(modified)
        } else {
            FileInfo::file(name, metadata.len()).with_modified(modified)
        }
    }
}

#[async_trait]
impl Connector for FsConnector {
    fn name(&self) -> &str {
        "fs"
    }

    fn get_infos(&self, _session: &ConnectorSession) -> ConnectorInfo {
        ConnectorInfo {
            name: "fs".to_string(),
            display_name: "本地文件".to_string(),
            icon: "../assets/fs.png".to_string(),
            description: "编辑服务器本地磁盘上的文件".to_string(),
            is_logged_in: true,
            is_oauth: false,
            username: std::env::var("USER").ok(),
        }
    }

    async fn get_authorize_url(&self, _session: &mut ConnectorSession) -> Result<String> {
        Ok(String::new())
    }

    async fn set_access_token(&self, _session: &mut ConnectorSession, token: &str) -> Result<String> {
        Ok(token.to_string())
    }

    async fn login(&self, _session: &mut ConnectorSession, _info: LoginInfo) -> Result<Option<String>> {
        Ok(None)
    }

    async fn readdir(&self, _session: &mut ConnectorSession, path: &str) -> Result<Vec<FileInfo>> {
        let dir = self.resolve(path)?;
        let mut entries = fs::read_dir(&dir).await?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if !self.show_hidden && name.starts_with('.') {
                continue;
            }
            let metadata = entry.metadata().await?;
            files.push(Self::to_file_info(&name, &metadata));
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("读取目录: {:?}, 条目数: {}", dir, files.len());
        Ok(files)
    }

    async fn stat(&self, _session: &mut ConnectorSession, path: &str) -> Result<FileInfo> {
        let target = self.resolve(path)?;
        let metadata = fs::metadata(&target).await?;
        Ok(Self::to_file_info(leaf_name(path), &metadata))
    }

    async fn mkdir(&self, _session: &mut ConnectorSession, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        fs::create_dir(&target).await?;
        debug!("创建目录: {:?}", target);
        Ok(())
    }

    async fn write_file(&self, _session: &mut ConnectorSession, path: &str, content: Bytes) -> Result<()> {
        let target = self.resolve(path)?;
        if fs::metadata(&target).await.is_ok_and(|m| m.is_dir()) {
            return Err(BridgeError::IsDirectory(path.to_string()));
        }
        let mut file = fs::File::create(&target).await?;
        file.write_all(&content).await?;
        file.flush().await?;
        debug!("文件已写入: {:?}, 大小: {} 字节", target, content.len());
        Ok(())
    }

    async fn create_write_stream(&self, _session: &mut ConnectorSession, path: &str) -> Result<Box<dyn WriteSink>> {
        let target = self.resolve(path)?;
        let file = fs::File::create(&target).await?;
        Ok(Box::new(FileSink { file }))
    }

    async fn read_file(&self, _session: &mut ConnectorSession, path: &str) -> Result<Bytes> {
        let target = self.resolve(path)?;
        if fs::metadata(&target).await?.is_dir() {
            return Err(BridgeError::IsDirectory(path.to_string()));
        }
        let data = fs::read(&target).await?;
        debug!("文件已读取: {:?}, 大小: {} 字节", target, data.len());
        Ok(Bytes::from(data))
    }

    async fn create_read_stream(&self, _session: &mut ConnectorSession, path: &str) -> Result<ByteStream> {
        let target = self.resolve(path)?;
        if fs::metadata(&target).await?.is_dir() {
            return Err(BridgeError::IsDirectory(path.to_string()));
        }
        let file = fs::File::open(&target).await?;
        let chunks = stream::try_unfold(file, |mut file| async move {
            let mut buf = BytesMut::zeroed(READ_CHUNK_SIZE);
            let n = file.read(&mut buf).await?;
            if n == 0 {
                return Ok(None);
            }
            buf.truncate(n);
            Ok(Some((buf.freeze(), file)))
        });
        Ok(Box::pin(chunks))
    }

    async fn rename(&self, _session: &mut ConnectorSession, src: &str, dest: &str) -> Result<()> {
        let from = self.resolve(src)?;
        let to = self.resolve(dest)?;
        fs::rename(&from, &to).await?;
        info!("重命名: {:?} -> {:?}", from, to);
        Ok(())
    }

    async fn unlink(&self, _session: &mut ConnectorSession, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        if fs::metadata(&target).await?.is_dir() {
            return Err(BridgeError::IsDirectory(path.to_string()));
        }
        fs::remove_file(&target).await?;
        info!("文件已删除: {:?}", target);
        Ok(())
    }

    async fn rmdir(&self, _session: &mut ConnectorSession, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        if target == self.root_path {
            return Err(BridgeError::InvalidArgument("不能删除根目录".to_string()));
        }
        if !fs::metadata(&target).await?.is_dir() {
            return Err(BridgeError::InvalidArgument(format!("不是目录: {}", path)));
        }
        fs::remove_dir_all(&target).await?;
        info!("目录已删除: {:?}", target);
        Ok(())
    }
}

/// 直接写入本地文件的写入端
struct FileSink {
    file: fs::File,
}

#[async_trait]
impl WriteSink for FileSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.file.write_all(&chunk).await?;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}
