//! Dropbox 连接器
//!
//! OAuth 授权码登录；元数据接口走 api 域名，文件内容走 content 域名，
//! 参数放在 `Dropbox-API-Arg` 头中。

use super::{issue_oauth_state, leaf_name, normalize_path, verify_oauth_state};
use crate::config::DropboxConfig;
use crate::http::{HttpClient, HttpRequest, HttpResponse, status_error};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::{FutureExt, TryStreamExt};
use http::StatusCode;
use http::header::CONTENT_TYPE;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use silent_bridge_core::{
    Account, BridgeError, BufferedSink, ByteStream, Connector, ConnectorInfo, ConnectorSession,
    FileInfo, LoginInfo, Result, WriteSink,
};
use std::sync::Arc;
use tracing::{debug, info};

const HEADER_API_ARG: &str = "Dropbox-API-Arg";

#[derive(Debug, Deserialize)]
#[serde(tag = ".tag", rename_all = "lowercase")]
enum Metadata {
    File {
        name: String,
        size: u64,
        #[serde(default)]
        server_modified: Option<DateTime<Utc>>,
    },
    Folder {
        name: String,
    },
    Deleted {},
}

impl Metadata {
    fn is_folder(&self) -> bool {
        matches!(self, Metadata::Folder { .. })
    }

    fn into_file_info(self) -> Option<FileInfo> {
        match self {
            Metadata::File {
                name,
                size,
                server_modified,
            } => Some(FileInfo::file(name, size).with_modified(server_modified)),
            Metadata::Folder { name } => Some(FileInfo::directory(name)),
            Metadata::Deleted { .. } => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListFolder {
    entries: Vec<Metadata>,
    cursor: String,
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountName {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CurrentAccount {
    account_id: String,
    name: Option<AccountName>,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error_summary: String,
}

/// 把 409 的 `error_summary` 翻译为错误分类
fn check(response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() {
        return Ok(response);
    }
    if response.status == StatusCode::CONFLICT {
        let summary = response
            .json::<ApiError>()
            .map(|e| e.error_summary)
            .unwrap_or_else(|_| response.text());
        let message = format!("Dropbox: {}", summary);
        return Err(if summary.contains("not_found") {
            BridgeError::NotFound(message)
        } else if summary.contains("not_file") {
            BridgeError::IsDirectory(message)
        } else {
            // path/conflict、malformed_path 等
            BridgeError::InvalidArgument(message)
        });
    }
    Err(status_error(response.status, format!("Dropbox: {}", response.text())))
}

/// 统一路径转 Dropbox 路径：根目录为空串
fn dropbox_path(path: &str) -> Result<String> {
    let rel = normalize_path(path)?;
    Ok(if rel.is_empty() {
        String::new()
    } else {
        format!("/{}", rel)
    })
}

/// `Dropbox-API-Arg` 头只允许 ASCII，非 ASCII 字符转义为 `\uXXXX`
fn api_arg(value: &Value) -> Result<String> {
    let raw = serde_json::to_string(value)?;
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii() {
            escaped.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                escaped.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    Ok(escaped)
}

/// 携带令牌的 API 客户端
#[derive(Clone)]
struct DropboxApi {
    http: Arc<dyn HttpClient>,
    config: Arc<DropboxConfig>,
    token: String,
}

impl DropboxApi {
    async fn rpc<T: DeserializeOwned>(&self, endpoint: &str, args: &Value) -> Result<T> {
        let request = HttpRequest::post(format!("{}/2/{}", self.config.api_base, endpoint))
            .bearer(&self.token)?
            .json(args)?;
        check(self.http.send(request).await?)?.json()
    }

    fn content_request(&self, endpoint: &str, args: &Value) -> Result<HttpRequest> {
        HttpRequest::post(format!("{}/2/{}", self.config.content_base, endpoint))
            .bearer(&self.token)?
            .header(HEADER_API_ARG, &api_arg(args)?)
    }

    async fn metadata(&self, path: &str) -> Result<Metadata> {
        self.rpc("files/get_metadata", &json!({ "path": dropbox_path(path)? }))
            .await
    }

    async fn upload(&self, path: &str, content: Bytes) -> Result<()> {
        let args = json!({ "path": dropbox_path(path)?, "mode": "overwrite", "mute": true });
        let request = self
            .content_request("files/upload", &args)?
            .header(CONTENT_TYPE.as_str(), "application/octet-stream")?
            .body(content);
        check(self.http.send(request).await?)?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let _: Value = self
            .rpc("files/delete_v2", &json!({ "path": dropbox_path(path)? }))
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct DropboxConnector {
    config: Arc<DropboxConfig>,
    http: Arc<dyn HttpClient>,
}

impl DropboxConnector {
    pub fn new(config: &DropboxConfig, http: Arc<dyn HttpClient>) -> Self {
        Self {
            config: Arc::new(config.clone()),
            http,
        }
    }

    fn api(&self, session: &ConnectorSession) -> Result<DropboxApi> {
        Ok(DropboxApi {
            http: self.http.clone(),
            config: self.config.clone(),
            token: session.require_token()?.to_string(),
        })
    }

    async fn exchange_code(&self, code: &str) -> Result<String> {
        let request = HttpRequest::post(format!("{}/oauth2/token", self.config.api_base)).form(&[
            ("code", code),
            ("grant_type", "authorization_code"),
            ("client_id", self.config.app_key.as_str()),
            ("client_secret", self.config.app_secret.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ])?;
        let response = self.http.send(request).await?;
        let token: TokenResponse = response.json().unwrap_or(TokenResponse {
            access_token: None,
            error: Some(response.text()),
            error_description: None,
        });
        match token.access_token {
            Some(token) if response.is_success() && !token.is_empty() => Ok(token),
            _ => Err(BridgeError::PermissionDenied(format!(
                "Dropbox 授权失败: {}",
                token
                    .error_description
                    .or(token.error)
                    .unwrap_or_else(|| response.status.to_string())
            ))),
        }
    }

    async fn fetch_account(&self, session: &mut ConnectorSession) -> Result<()> {
        let account: CurrentAccount = self
            .api(session)?
            .rpc("users/get_current_account", &Value::Null)
            .await?;
        session.account = Some(Account {
            login: account.account_id,
            display_name: account.name.and_then(|n| n.display_name),
            email: account.email,
        });
        Ok(())
    }
}

#[async_trait]
impl Connector for DropboxConnector {
    fn name(&self) -> &str {
        "dropbox"
    }

    fn get_infos(&self, session: &ConnectorSession) -> ConnectorInfo {
        ConnectorInfo {
            name: "dropbox".to_string(),
            display_name: "Dropbox".to_string(),
            icon: "../assets/dropbox.png".to_string(),
            description: "编辑 Dropbox 中的文件".to_string(),
            is_logged_in: session.token.is_some(),
            is_oauth: true,
            username: session
                .account
                .as_ref()
                .map(|a| a.display_name.clone().unwrap_or_else(|| a.login.clone())),
        }
    }

    async fn get_authorize_url(&self, session: &mut ConnectorSession) -> Result<String> {
        let state = issue_oauth_state(session);
        Ok(format!(
            "{}/authorize?client_id={}&response_type=code&redirect_uri={}&state={}",
            self.config.oauth_base,
            urlencoding::encode(&self.config.app_key),
            urlencoding::encode(&self.config.redirect_uri),
            state
        ))
    }

    async fn set_access_token(&self, session: &mut ConnectorSession, token: &str) -> Result<String> {
        session.token = Some(token.to_string());
        session.account = None;
        Ok(token.to_string())
    }

    async fn login(&self, session: &mut ConnectorSession, info: LoginInfo) -> Result<Option<String>> {
        let token = match info {
            LoginInfo::OAuth { code, state } => {
                verify_oauth_state(session, state.as_deref())?;
                self.exchange_code(&code).await?
            }
            LoginInfo::Token(token) => token,
            LoginInfo::Host(_) => {
                return Err(BridgeError::InvalidArgument(
                    "Dropbox 需要 OAuth 授权码或访问令牌".to_string(),
                ));
            }
        };
        session.token = Some(token.clone());
        if let Err(e) = self.fetch_account(session).await {
            session.clear();
            return Err(e);
        }
        info!("Dropbox 登录成功");
        Ok(Some(token))
    }

    async fn readdir(&self, session: &mut ConnectorSession, path: &str) -> Result<Vec<FileInfo>> {
        let api = self.api(session)?;
        let mut page: ListFolder = api
            .rpc("files/list_folder", &json!({ "path": dropbox_path(path)? }))
            .await?;
        let mut entries = std::mem::take(&mut page.entries);
        let mut pages = 1usize;
        while page.has_more {
            page = api
                .rpc("files/list_folder/continue", &json!({ "cursor": page.cursor }))
                .await?;
            entries.append(&mut page.entries);
            pages += 1;
        }
        debug!("Dropbox 读取目录: {}, pages={}, entries={}", path, pages, entries.len());
        Ok(entries.into_iter().filter_map(Metadata::into_file_info).collect())
    }

    async fn stat(&self, session: &mut ConnectorSession, path: &str) -> Result<FileInfo> {
        let api = self.api(session)?;
        if dropbox_path(path)?.is_empty() {
            return Ok(FileInfo::directory(""));
        }
        api.metadata(path)
            .await?
            .into_file_info()
            .ok_or_else(|| BridgeError::NotFound(leaf_name(path).to_string()))
    }

    async fn mkdir(&self, session: &mut ConnectorSession, path: &str) -> Result<()> {
        let api = self.api(session)?;
        let _: Value = api
            .rpc(
                "files/create_folder_v2",
                &json!({ "path": dropbox_path(path)?, "autorename": false }),
            )
            .await?;
        Ok(())
    }

    async fn write_file(&self, session: &mut ConnectorSession, path: &str, content: Bytes) -> Result<()> {
        self.api(session)?.upload(path, content).await
    }

    async fn create_write_stream(&self, session: &mut ConnectorSession, path: &str) -> Result<Box<dyn WriteSink>> {
        let api = self.api(session)?;
        let path = path.to_string();
        Ok(Box::new(BufferedSink::new(move |content| {
            async move { api.upload(&path, content).await }.boxed()
        })))
    }

    async fn read_file(&self, session: &mut ConnectorSession, path: &str) -> Result<Bytes> {
        let api = self.api(session)?;
        let request = api.content_request("files/download", &json!({ "path": dropbox_path(path)? }))?;
        Ok(check(self.http.send(request).await?)?.body)
    }

    async fn create_read_stream(&self, session: &mut ConnectorSession, path: &str) -> Result<ByteStream> {
        let api = self.api(session)?;
        let request = api.content_request("files/download", &json!({ "path": dropbox_path(path)? }))?;
        let response = self.http.send_streaming(request).await?;
        let status = response.status;
        if !status.is_success() {
            // 错误响应体很小，读完后再翻译
            let chunks: Vec<Bytes> = response.body.try_collect().await?;
            let failed = HttpResponse {
                status,
                headers: response.headers,
                body: Bytes::from(chunks.concat()),
            };
            return Err(check(failed)
                .err()
                .unwrap_or_else(|| status_error(status, "Dropbox 下载失败")));
        }
        Ok(response.body)
    }

    async fn rename(&self, session: &mut ConnectorSession, src: &str, dest: &str) -> Result<()> {
        let api = self.api(session)?;
        let _: Value = api
            .rpc(
                "files/move_v2",
                &json!({
                    "from_path": dropbox_path(src)?,
                    "to_path": dropbox_path(dest)?,
                    "autorename": false
                }),
            )
            .await?;
        info!("Dropbox 重命名: {} -> {}", src, dest);
        Ok(())
    }

    async fn unlink(&self, session: &mut ConnectorSession, path: &str) -> Result<()> {
        let api = self.api(session)?;
        if api.metadata(path).await?.is_folder() {
            return Err(BridgeError::IsDirectory(path.to_string()));
        }
        api.delete(path).await
    }

    async fn rmdir(&self, session: &mut ConnectorSession, path: &str) -> Result<()> {
        let api = self.api(session)?;
        if dropbox_path(path)?.is_empty() {
            return Err(BridgeError::InvalidArgument("不能删除根目录".to_string()));
        }
        if !api.metadata(path).await?.is_folder() {
            return Err(BridgeError::InvalidArgument(format!("不是目录: {}", path)));
        }
        api.delete(path).await?;
        info!("Dropbox 目录已删除: {}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;
    use silent_bridge_core::ErrorKind;

    fn conflict(summary: &str) -> HttpResponse {
        HttpResponse {
            status: StatusCode::CONFLICT,
            headers: HeaderMap::new(),
            body: Bytes::from(format!(r#"{{"error_summary":"{}","error":{{}}}}"#, summary)),
        }
    }

    #[test]
    fn test_conflict_summary_mapping() {
        assert_eq!(check(conflict("path/not_found/..")).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(
            check(conflict("path/conflict/folder/..")).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(check(conflict("path/not_file/..")).unwrap_err().kind(), ErrorKind::IsDirectory);

        let unauthorized = HttpResponse {
            status: StatusCode::UNAUTHORIZED,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"invalid_access_token"),
        };
        assert_eq!(check(unauthorized).unwrap_err().kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_dropbox_path() {
        assert_eq!(dropbox_path("/").unwrap(), "");
        assert_eq!(dropbox_path("/a/b/").unwrap(), "/a/b");
    }

    #[test]
    fn test_api_arg_escapes_non_ascii() {
        let arg = api_arg(&json!({ "path": "/文档/a😀" })).unwrap();
        assert!(arg.is_ascii());
        assert_eq!(arg, r#"{"path":"/\u6587\u6863/a\ud83d\ude00"}"#);
        let decoded: Value = serde_json::from_str(&arg).unwrap();
        assert_eq!(decoded["path"], "/文档/a😀");
    }

    #[test]
    fn test_metadata_tags() {
        let list: ListFolder = serde_json::from_str(
            r#"{"entries":[
                {".tag":"folder","name":"docs","id":"id:1"},
                {".tag":"file","name":"a.txt","size":5,"server_modified":"2024-01-02T03:04:05Z"},
                {".tag":"deleted","name":"gone"}
            ],"cursor":"c1","has_more":false}"#,
        )
        .unwrap();
        let infos: Vec<FileInfo> = list.entries.into_iter().filter_map(Metadata::into_file_info).collect();
        assert_eq!(infos.len(), 2);
        assert!(infos[0].is_dir);
        assert_eq!(infos[1].size, 5);
        assert!(infos[1].modified.is_some());
    }
}
