//! WebDAV 连接器
//!
//! 使用 `LoginInfo::Host` 凭据登录，凭据保存在会话切片中，
//! 每次请求携带 Basic 认证头。

mod constants;
mod propfind;

use super::{leaf_name, normalize_path};
use crate::config::WebDavConfig;
use crate::http::{HttpClient, HttpRequest, HttpResponse, status_error};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use constants::*;
use futures_util::FutureExt;
use http::StatusCode;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use propfind::{DavEntry, parse_multistatus};
use silent_bridge_core::{
    Account, BridgeError, BufferedSink, ByteStream, Connector, ConnectorInfo, ConnectorSession,
    FileInfo, HostCredentials, LoginInfo, Method, Result, WriteSink,
};
use std::sync::Arc;
use tracing::{debug, info};

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

#[derive(Clone)]
pub struct WebDavConnector {
    sign_in_url: String,
    http: Arc<dyn HttpClient>,
}

/// 一次请求所需的服务器地址与认证头
#[derive(Clone)]
struct Target {
    origin: String,
    base_path: String,
    authorization: String,
}

impl Target {
    fn from_credentials(creds: &HostCredentials) -> Result<Self> {
        if creds.host.is_empty() {
            return Err(BridgeError::InvalidArgument("缺少 WebDAV 主机名".to_string()));
        }
        let scheme = match creds.scheme.as_deref().map(str::to_lowercase).as_deref() {
            None | Some("webdav") | Some("dav") | Some("http") => "http",
            Some("webdavs") | Some("davs") | Some("https") => "https",
            Some(other) => {
                return Err(BridgeError::InvalidArgument(format!(
                    "不支持的 WebDAV 协议: {}",
                    other
                )));
            }
        };
        let origin = match creds.port {
            Some(port) => format!("{}://{}:{}", scheme, creds.host, port),
            None => format!("{}://{}", scheme, creds.host),
        };
        let base = normalize_path(&creds.base_path)?;
        let base_path = if base.is_empty() {
            String::new()
        } else {
            format!("/{}", base)
        };
        let authorization = format!(
            "Basic {}",
            BASE64.encode(format!("{}:{}", creds.user, creds.password))
        );
        Ok(Self {
            origin,
            base_path,
            authorization,
        })
    }

    /// 服务端上的绝对路径（未编码）
    fn remote_path(&self, path: &str) -> Result<String> {
        let rel = normalize_path(path)?;
        Ok(match (self.base_path.is_empty(), rel.is_empty()) {
            (true, true) => "/".to_string(),
            (true, false) => format!("/{}", rel),
            (false, true) => self.base_path.clone(),
            (false, false) => format!("{}/{}", self.base_path, rel),
        })
    }

    fn url(&self, path: &str) -> Result<String> {
        let encoded = self
            .remote_path(path)?
            .split('/')
            .map(|s| urlencoding::encode(s).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        Ok(format!("{}{}", self.origin, encoded))
    }

    fn request(&self, method: http::Method, url: String) -> Result<HttpRequest> {
        HttpRequest::new(method, url).header(AUTHORIZATION.as_str(), &self.authorization)
    }
}

fn dav_method(name: &[u8]) -> Result<http::Method> {
    http::Method::from_bytes(name)
        .map_err(|e| BridgeError::Io(format!("无效的 WebDAV 方法: {}", e)))
}

fn check(response: HttpResponse, action: &str) -> Result<HttpResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(status_error(response.status, format!("WebDAV {} 失败", action)))
    }
}

impl WebDavConnector {
    pub fn new(config: &WebDavConfig, http: Arc<dyn HttpClient>) -> Self {
        Self {
            sign_in_url: config.sign_in_url.clone(),
            http,
        }
    }

    fn target(session: &ConnectorSession) -> Result<Target> {
        Target::from_credentials(session.require_host()?)
    }

    async fn propfind(&self, target: &Target, path: &str, depth: &str) -> Result<Vec<DavEntry>> {
        let request = target
            .request(dav_method(METHOD_PROPFIND)?, target.url(path)?)?
            .header(HEADER_DEPTH, depth)?
            .header(CONTENT_TYPE.as_str(), CONTENT_TYPE_XML)?
            .body(PROPFIND_BODY);
        let response = check(self.http.send(request).await?, "PROPFIND")?;
        parse_multistatus(&response.text())
    }

    async fn stat_entry(&self, target: &Target, path: &str) -> Result<DavEntry> {
        self.propfind(target, path, "0")
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BridgeError::NotFound(path.to_string()))
    }

    fn to_file_info(name: &str, entry: &DavEntry) -> FileInfo {
        let info = if entry.is_collection {
            FileInfo::directory(name)
        } else {
            FileInfo::file(name, entry.content_length.unwrap_or(0))
        };
        let info = info.with_modified(entry.last_modified);
        match (&entry.content_type, entry.is_collection) {
            (Some(mime), false) => info.with_mime(mime.clone()),
            _ => info,
        }
    }
}

#[async_trait]
impl Connector for WebDavConnector {
    fn name(&self) -> &str {
        "webdav"
    }

    fn capabilities(&self) -> &'static [Method] {
        CAPABILITIES
    }

    fn get_infos(&self, session: &ConnectorSession) -> ConnectorInfo {
        ConnectorInfo {
            name: "webdav".to_string(),
            display_name: "WebDAV".to_string(),
            icon: "../assets/webdav.png".to_string(),
            description: "编辑 WebDAV 服务器上的文件".to_string(),
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
            return Err(BridgeError::InvalidArgument(
                "WebDAV 需要主机凭据登录".to_string(),
            ));
        };
        let target = Target::from_credentials(&creds)?;
        self.propfind(&target, "/", "0").await?;
        info!("WebDAV 登录成功: {}@{}", creds.user, creds.host);
        session.account = Some(Account {
            login: creds.user.clone(),
            display_name: None,
            email: None,
        });
        session.host = Some(creds);
        Ok(None)
    }

    async fn readdir(&self, session: &mut ConnectorSession, path: &str) -> Result<Vec<FileInfo>> {
        let target = Self::target(session)?;
        let own_path = target.remote_path(path)?;
        let entries = self.propfind(&target, path, "1").await?;
        let files: Vec<FileInfo> = entries
            .iter()
            .filter(|e| e.href != own_path)
            .map(|e| Self::to_file_info(leaf_name(&e.href), e))
            .collect();
        debug!("WebDAV 读取目录: {}, 条目数: {}", own_path, files.len());
        Ok(files)
    }

    async fn stat(&self, session: &mut ConnectorSession, path: &str) -> Result<FileInfo> {
        let target = Self::target(session)?;
        let entry = self.stat_entry(&target, path).await?;
        Ok(Self::to_file_info(leaf_name(path), &entry))
    }

    async fn mkdir(&self, session: &mut ConnectorSession, path: &str) -> Result<()> {
        let target = Self::target(session)?;
        let request = target.request(dav_method(METHOD_MKCOL)?, target.url(path)?)?;
        let response = self.http.send(request).await?;
        // 405 表示目标已存在
        if response.status == StatusCode::METHOD_NOT_ALLOWED {
            return Err(BridgeError::InvalidArgument(format!("目标已存在: {}", path)));
        }
        check(response, "MKCOL")?;
        Ok(())
    }

    async fn write_file(&self, session: &mut ConnectorSession, path: &str, content: Bytes) -> Result<()> {
        let target = Self::target(session)?;
        let request = target
            .request(http::Method::PUT, target.url(path)?)?
            .body(content);
        check(self.http.send(request).await?, "PUT")?;
        Ok(())
    }

    async fn create_write_stream(&self, session: &mut ConnectorSession, path: &str) -> Result<Box<dyn WriteSink>> {
        let target = Self::target(session)?;
        let url = target.url(path)?;
        let client = self.http.clone();
        Ok(Box::new(BufferedSink::new(move |content| {
            async move {
                let request = target.request(http::Method::PUT, url)?.body(content);
                check(client.send(request).await?, "PUT")?;
                Ok(())
            }
            .boxed()
        })))
    }

    async fn read_file(&self, session: &mut ConnectorSession, path: &str) -> Result<Bytes> {
        let target = Self::target(session)?;
        let request = target.request(http::Method::GET, target.url(path)?)?;
        let response = check(self.http.send(request).await?, "GET")?;
        Ok(response.body)
    }

    async fn create_read_stream(&self, session: &mut ConnectorSession, path: &str) -> Result<ByteStream> {
        let target = Self::target(session)?;
        let request = target.request(http::Method::GET, target.url(path)?)?;
        let response = self.http.send_streaming(request).await?;
        if !response.status.is_success() {
            return Err(status_error(response.status, "WebDAV GET 失败"));
        }
        Ok(response.body)
    }

    async fn rename(&self, session: &mut ConnectorSession, src: &str, dest: &str) -> Result<()> {
        let target = Self::target(session)?;
        let destination = target.url(dest)?;
        let request = target
            .request(dav_method(METHOD_MOVE)?, target.url(src)?)?
            .header(HEADER_DESTINATION, &destination)?
            .header(HEADER_OVERWRITE, "F")?;
        let response = self.http.send(request).await?;
        if response.status == StatusCode::PRECONDITION_FAILED {
            return Err(BridgeError::InvalidArgument(format!("目标已存在: {}", dest)));
        }
        check(response, "MOVE")?;
        info!("WebDAV 重命名: {} -> {}", src, dest);
        Ok(())
    }

    async fn unlink(&self, session: &mut ConnectorSession, path: &str) -> Result<()> {
        let target = Self::target(session)?;
        if self.stat_entry(&target, path).await?.is_collection {
            return Err(BridgeError::IsDirectory(path.to_string()));
        }
        let request = target.request(http::Method::DELETE, target.url(path)?)?;
        check(self.http.send(request).await?, "DELETE")?;
        Ok(())
    }

    async fn rmdir(&self, session: &mut ConnectorSession, path: &str) -> Result<()> {
        let target = Self::target(session)?;
        if normalize_path(path)?.is_empty() {
            return Err(BridgeError::InvalidArgument("不能删除根目录".to_string()));
        }
        if !self.stat_entry(&target, path).await?.is_collection {
            return Err(BridgeError::InvalidArgument(format!("不是目录: {}", path)));
        }
        let request = target.request(http::Method::DELETE, target.url(path)?)?;
        check(self.http.send(request).await?, "DELETE")?;
        info!("WebDAV 目录已删除: {}", path);
        Ok(())
    }
}
