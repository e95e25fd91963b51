//! HTTP 客户端原语
//!
//! 所有远端连接器都通过 [`HttpClient`] 发送请求，测试中可替换为内存实现。

use crate::config::HttpConfig;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderName, HeaderValue, LINK};
use http::{HeaderMap, Method, StatusCode};
use regex::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use silent_bridge_core::stream::{ByteStream, once_stream};
use silent_bridge_core::{BridgeError, Result};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// 添加请求头，非法的名称或值返回 `InvalidArgument`
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| BridgeError::InvalidArgument(format!("非法的请求头名称: {}", name)))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| BridgeError::InvalidArgument(format!("请求头 {} 的值非法", name)))?;
        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    pub fn bearer(self, token: &str) -> Result<Self> {
        self.header(AUTHORIZATION.as_str(), &format!("Bearer {}", token))
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(self
            .header(CONTENT_TYPE.as_str(), "application/json")?
            .body(body))
    }

    pub fn form(self, fields: &[(&str, &str)]) -> Result<Self> {
        let body = fields
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        Ok(self
            .header(CONTENT_TYPE.as_str(), "application/x-www-form-urlencoded")?
            .body(body))
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// 流式响应
pub struct StreamingResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// 以流的形式读取响应体，默认实现先完整读取
    async fn send_streaming(&self, request: HttpRequest) -> Result<StreamingResponse> {
        let response = self.send(request).await?;
        Ok(StreamingResponse {
            status: response.status,
            headers: response.headers,
            body: once_stream(response.body),
        })
    }
}

/// 基于 reqwest 的实现
#[derive(Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .timeout(Duration::from_secs(config.request_timeout))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| BridgeError::Io(format!("创建 HTTP 客户端失败: {}", e)))?;
        Ok(Self { client })
    }

    fn build(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        builder
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!("HTTP {} {}", request.method, request.url);
        let response = self.build(request).send().await.map_err(transport_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(transport_error)?;
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_streaming(&self, request: HttpRequest) -> Result<StreamingResponse> {
        debug!("HTTP(stream) {} {}", request.method, request.url);
        let response = self.build(request).send().await.map_err(transport_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(transport_error))
            .boxed();
        Ok(StreamingResponse {
            status,
            headers,
            body,
        })
    }
}

fn transport_error(err: reqwest::Error) -> BridgeError {
    BridgeError::Io(format!("请求失败: {}", err))
}

/// 把非成功状态码翻译为错误分类
pub fn status_error(status: StatusCode, message: impl Into<String>) -> BridgeError {
    let message = format!("{} ({})", message.into(), status.as_u16());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BridgeError::PermissionDenied(message),
        StatusCode::NOT_FOUND => BridgeError::NotFound(message),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            BridgeError::InvalidArgument(message)
        }
        StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => {
            BridgeError::NotSupported(message)
        }
        _ => BridgeError::Io(message),
    }
}

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"<([^>]+)>\s*;\s*rel="?next"?"#).expect("Link 头正则表达式无效")
    })
}

/// 解析 `Link` 头中的 `rel="next"` 地址
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .find_map(|part| {
            link_pattern()
                .captures(part.trim())
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        })
}

/// 依次跟随 `next` 链接，按页序拼接结果
///
/// `make_request` 为每一页的地址构造请求（携带认证头等），构造失败直接返回；
/// `check` 负责把非成功响应翻译为错误。
pub async fn paginate<T, F, C>(
    client: &dyn HttpClient,
    first_url: String,
    mut make_request: F,
    check: C,
) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    F: FnMut(String) -> Result<HttpRequest>,
    C: Fn(HttpResponse) -> Result<HttpResponse>,
{
    let mut items = Vec::new();
    let mut next = Some(first_url);
    let mut pages = 0usize;
    while let Some(url) = next.take() {
        let response = check(client.send(make_request(url)?).await?)?;
        next = next_link(&response.headers);
        let page: Vec<T> = response.json()?;
        pages += 1;
        items.extend(page);
    }
    debug!("分页读取完成: pages={}, items={}", pages, items.len());
    Ok(items)
}
