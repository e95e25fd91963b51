//! 后端连接器实现

mod dropbox;
mod fs;
pub mod ftp;
pub mod github;
mod host;
pub mod sftp;
mod webdav;

pub use dropbox::DropboxConnector;
pub use fs::FsConnector;
pub use github::GithubConnector;
pub use host::{HostClient, HostConnector, HostTransport};
pub use webdav::WebDavConnector;

use silent_bridge_core::{BridgeError, ConnectorSession, Result};

/// 生成新的 OAuth state 并记录到会话切片
pub(crate) fn issue_oauth_state(session: &mut ConnectorSession) -> String {
    let state = scru128::new_string();
    session.oauth_state = Some(state.clone());
    state
}

/// 校验回调带回的 state，校验后即作废
pub(crate) fn verify_oauth_state(session: &mut ConnectorSession, state: Option<&str>) -> Result<()> {
    match session.oauth_state.take() {
        Some(expected) if state != Some(expected.as_str()) => Err(BridgeError::PermissionDenied(
            "OAuth state 不匹配".to_string(),
        )),
        _ => Ok(()),
    }
}

/// 规范化路径：去掉首尾的 `/`，拒绝 `..` 与空段
pub(crate) fn normalize_path(path: &str) -> Result<String> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(BridgeError::InvalidArgument(format!(
                    "路径不允许包含 ..: {}",
                    path
                )));
            }
            s => segments.push(s),
        }
    }
    Ok(segments.join("/"))
}

/// 路径最后一段
pub(crate) fn leaf_name(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or_default()
}
