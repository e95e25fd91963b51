use serde::{Deserialize, Serialize};
use silent_bridge_core::{BridgeError, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub fs: FsConfig,
    #[serde(default)]
    pub webdav: WebDavConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub dropbox: DropboxConfig,
    #[serde(default)]
    pub ftp: FtpConfig,
    #[serde(default)]
    pub sftp: SftpConfig,
}

/// 远端连接器共用的 HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// 连接超时（秒）
    pub connect_timeout: u64,
    /// 请求超时（秒）
    pub request_timeout: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 10,
            request_timeout: 60,
            user_agent: format!("silent-bridge/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// 本地文件系统连接器
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsConfig {
    pub enable: bool,
    /// 所有路径都限制在该目录下
    pub root_path: PathBuf,
    /// 是否列出以 `.` 开头的文件
    #[serde(default)]
    pub show_hidden: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            enable: true,
            root_path: PathBuf::from("./storage"),
            show_hidden: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebDavConfig {
    pub enable: bool,
    /// 非 OAuth 后端的登录页地址，由 `getAuthorizeURL` 返回
    pub sign_in_url: String,
}

impl Default for WebDavConfig {
    fn default() -> Self {
        Self {
            enable: true,
            sign_in_url: "/webdav/signin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    pub enable: bool,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "GithubConfig::default_api_base")]
    pub api_base: String,
    #[serde(default = "GithubConfig::default_oauth_base")]
    pub oauth_base: String,
    /// 未指定提交信息时使用
    #[serde(default = "GithubConfig::default_commit_message")]
    pub default_commit_message: String,
}

impl GithubConfig {
    fn default_api_base() -> String {
        "https://api.github.com".to_string()
    }
    fn default_oauth_base() -> String {
        "https://github.com/login/oauth".to_string()
    }
    fn default_commit_message() -> String {
        "Update from silent-bridge".to_string()
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            enable: true,
            client_id: String::new(),
            client_secret: String::new(),
            api_base: Self::default_api_base(),
            oauth_base: Self::default_oauth_base(),
            default_commit_message: Self::default_commit_message(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropboxConfig {
    pub enable: bool,
    pub app_key: String,
    pub app_secret: String,
    pub redirect_uri: String,
    #[serde(default = "DropboxConfig::default_api_base")]
    pub api_base: String,
    #[serde(default = "DropboxConfig::default_content_base")]
    pub content_base: String,
    #[serde(default = "DropboxConfig::default_oauth_base")]
    pub oauth_base: String,
}

impl DropboxConfig {
    fn default_api_base() -> String {
        "https://api.dropboxapi.com".to_string()
    }
    fn default_content_base() -> String {
        "https://content.dropboxapi.com".to_string()
    }
    fn default_oauth_base() -> String {
        "https://www.dropbox.com/oauth2".to_string()
    }
}

impl Default for DropboxConfig {
    fn default() -> Self {
        Self {
            enable: true,
            app_key: String::new(),
            app_secret: String::new(),
            redirect_uri: String::new(),
            api_base: Self::default_api_base(),
            content_base: Self::default_content_base(),
            oauth_base: Self::default_oauth_base(),
        }
    }
}

/// FTP 连接器，每次调用单独建立连接
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpConfig {
    pub enable: bool,
    pub sign_in_url: String,
    /// 登录 URL 未指定端口时使用
    pub default_port: u16,
    /// 连接超时（秒）
    pub timeout: u64,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            enable: true,
            sign_in_url: "/ftp/signin".to_string(),
            default_port: 21,
            timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpConfig {
    pub enable: bool,
    pub sign_in_url: String,
    pub default_port: u16,
    /// 连接与空闲超时（秒）
    pub timeout: u64,
}

impl Default for SftpConfig {
    fn default() -> Self {
        Self {
            enable: true,
            sign_in_url: "/sftp/signin".to_string(),
            default_port: 22,
            timeout: 30,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::InvalidArgument(format!("无法读取配置文件: {}", e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| BridgeError::InvalidArgument(format!("配置文件解析失败: {}", e)))?;
        Ok(config)
    }

    pub fn load() -> Self {
        let mut config = Self::from_file("config.toml").unwrap_or_default();
        config.apply_env_overrides();
        config
    }

    /// 应用环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("BRIDGE_FS_ROOT") {
            self.fs.root_path = PathBuf::from(root);
        }
        if let Ok(v) = std::env::var("BRIDGE_FS_SHOW_HIDDEN") {
            self.fs.show_hidden = v.to_lowercase() == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("BRIDGE_HTTP_TIMEOUT")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.http.request_timeout = secs;
        }

        if let Ok(id) = std::env::var("GITHUB_CLIENT_ID") {
            self.github.client_id = id;
        }
        if let Ok(secret) = std::env::var("GITHUB_CLIENT_SECRET") {
            self.github.client_secret = secret;
        }
        if let Ok(base) = std::env::var("GITHUB_API_BASE") {
            self.github.api_base = base;
        }

        if let Ok(key) = std::env::var("DROPBOX_APP_KEY") {
            self.dropbox.app_key = key;
        }
        if let Ok(secret) = std::env::var("DROPBOX_APP_SECRET") {
            self.dropbox.app_secret = secret;
        }
        if let Ok(uri) = std::env::var("DROPBOX_REDIRECT_URI") {
            self.dropbox.redirect_uri = uri;
        }
    }
}
