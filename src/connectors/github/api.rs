//! GitHub REST 调用与响应类型

use crate::http::{HttpClient, HttpRequest, HttpResponse, paginate, status_error};
use chrono::{DateTime, Utc};
use http::Method;
use http::header::{ACCEPT, AUTHORIZATION};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use silent_bridge_core::Result;
use std::sync::Arc;

const ACCEPT_GITHUB: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";

/// 携带令牌的 API 客户端，只在单次调用内使用
#[derive(Clone)]
pub struct GithubApi {
    http: Arc<dyn HttpClient>,
    base: String,
    token: String,
}

impl GithubApi {
    pub fn new(http: Arc<dyn HttpClient>, base: &str, token: &str) -> Self {
        Self {
            http,
            base: base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base, path)
        }
    }

    fn request(&self, method: Method, url: String) -> Result<HttpRequest> {
        HttpRequest::new(method, url)
            .header(ACCEPT.as_str(), ACCEPT_GITHUB)?
            .header("X-GitHub-Api-Version", API_VERSION)?
            .header(AUTHORIZATION.as_str(), &format!("token {}", self.token))
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        check(self.http.send(request).await?)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.request(Method::GET, self.url(path))?)
            .await?
            .json()
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        self.send(self.request(Method::POST, self.url(path))?.json(body)?)
            .await?
            .json()
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<T> {
        self.send(self.request(Method::PATCH, self.url(path))?.json(body)?)
            .await?
            .json()
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, self.url(path))?).await?;
        Ok(())
    }

    /// 跟随 `Link` 头读取所有分页
    pub async fn list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        paginate(
            self.http.as_ref(),
            self.url(path),
            |url| self.request(Method::GET, url),
            check,
        )
        .await
    }
}

#[derive(Deserialize)]
struct ApiMessage {
    message: String,
}

/// 非成功响应转换为错误，优先使用响应体中的 `message`
pub fn check(response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() {
        return Ok(response);
    }
    let message = response
        .json::<ApiMessage>()
        .map(|m| m.message)
        .unwrap_or_else(|_| response.text());
    Err(status_error(response.status, format!("GitHub: {}", message)))
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub login: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Repo {
    pub name: String,
    pub default_branch: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct Branch {
    pub name: String,
    pub commit: BranchCommit,
}

#[derive(Debug, Deserialize)]
pub struct BranchCommit {
    pub sha: String,
    /// 只有单个分支查询才会返回完整提交
    #[serde(default)]
    pub commit: Option<CommitDetail>,
}

#[derive(Debug, Deserialize)]
pub struct Commit {
    pub commit: CommitDetail,
}

#[derive(Debug, Deserialize)]
pub struct CommitDetail {
    pub committer: Option<Signature>,
}

#[derive(Debug, Deserialize)]
pub struct Signature {
    pub date: Option<DateTime<Utc>>,
}

impl CommitDetail {
    pub fn date(&self) -> Option<DateTime<Utc>> {
        self.committer.as_ref().and_then(|c| c.date)
    }
}

/// contents API 的条目，目录返回数组，文件返回单个对象
#[derive(Debug, Deserialize)]
pub struct ContentEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub size: u64,
    pub sha: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Contents {
    Dir(Vec<ContentEntry>),
    File(ContentEntry),
}

#[derive(Debug, Deserialize)]
pub struct Blob {
    pub content: String,
    pub encoding: String,
}

#[derive(Debug, Deserialize)]
pub struct Created {
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub struct GitRef {
    pub object: Created,
}

#[derive(Debug, Deserialize)]
pub struct AccessToken {
    pub access_token: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}
