//! 共享数据模型

use crate::error::{BridgeError, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// 规范化的文件元数据，由 `readdir`/`stat` 产生，不做持久化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// 路径的最后一段
    pub name: String,
    /// 字节数（非文件时由后端自行定义）
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub is_dir: bool,
    pub mime: Option<String>,
}

impl FileInfo {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        let name = name.into();
        let mime = Some(guess_mime(&name));
        Self {
            name,
            size,
            modified: None,
            is_dir: false,
            mime,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            modified: None,
            is_dir: true,
            mime: Some(MIME_DIRECTORY.to_string()),
        }
    }

    pub fn with_modified(mut self, modified: Option<DateTime<Utc>>) -> Self {
        self.modified = modified;
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

pub const MIME_DIRECTORY: &str = "application/directory";

/// 根据扩展名推断 MIME 类型
pub fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// `getInfos` 的返回值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorInfo {
    pub name: String,
    pub display_name: String,
    pub icon: String,
    pub description: String,
    pub is_logged_in: bool,
    pub is_oauth: bool,
    pub username: Option<String>,
}

/// 缓存在会话中的远端账号信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub login: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

/// 批量动作类型，未知标签保留原文以便跳过时记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Unlink,
    Rmdir,
    Rename,
    Mkdir,
    WriteFile,
    Unknown(String),
}

impl ActionKind {
    /// 标签大小写不敏感
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "unlink" => ActionKind::Unlink,
            "rmdir" => ActionKind::Rmdir,
            "rename" => ActionKind::Rename,
            "mkdir" => ActionKind::Mkdir,
            "writefile" => ActionKind::WriteFile,
            _ => ActionKind::Unknown(tag.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            ActionKind::Unlink => "UNLINK",
            ActionKind::Rmdir => "RMDIR",
            ActionKind::Rename => "RENAME",
            ActionKind::Mkdir => "MKDIR",
            ActionKind::WriteFile => "WRITEFILE",
            ActionKind::Unknown(tag) => tag,
        }
    }
}

impl Serialize for ActionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.tag())
    }
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(ActionKind::from_tag(&tag))
    }
}

/// 批量计划中的单个动作
///
/// `destination` 仅 RENAME 需要，`content` 仅 WRITEFILE 需要。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchAction {
    pub name: ActionKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Bytes>,
}

impl BatchAction {
    pub fn new(tag: &str, path: impl Into<String>) -> Self {
        Self {
            name: ActionKind::from_tag(tag),
            path: path.into(),
            destination: None,
            content: None,
        }
    }

    pub fn mkdir(path: impl Into<String>) -> Self {
        Self::new("MKDIR", path)
    }

    pub fn rmdir(path: impl Into<String>) -> Self {
        Self::new("RMDIR", path)
    }

    pub fn unlink(path: impl Into<String>) -> Self {
        Self::new("UNLINK", path)
    }

    pub fn rename(path: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            destination: Some(destination.into()),
            ..Self::new("RENAME", path)
        }
    }

    pub fn write_file(path: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::new("WRITEFILE", path)
        }
    }

    pub fn require_destination(&self) -> Result<&str> {
        self.destination.as_deref().ok_or_else(|| {
            BridgeError::InvalidArgument(format!("RENAME 动作缺少 destination: {}", self.path))
        })
    }

    pub fn require_content(&self) -> Result<Bytes> {
        self.content.clone().ok_or_else(|| {
            BridgeError::InvalidArgument(format!("WRITEFILE 动作缺少 content: {}", self.path))
        })
    }
}

impl fmt::Display for BatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.destination {
            Some(dest) => write!(f, "{} {} -> {}", self.name.tag(), self.path, dest),
            None => write!(f, "{} {}", self.name.tag(), self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_kind_is_case_insensitive() {
        assert_eq!(ActionKind::from_tag("writeFile"), ActionKind::WriteFile);
        assert_eq!(ActionKind::from_tag("RMDIR"), ActionKind::Rmdir);
        assert_eq!(
            ActionKind::from_tag("COPY"),
            ActionKind::Unknown("COPY".to_string())
        );
    }

    #[test]
    fn test_batch_action_from_json() {
        let json = r#"[
            {"name": "mkdir", "path": "A"},
            {"name": "WRITEFILE", "path": "A/x", "content": [104, 105]},
            {"name": "rename", "path": "A/x", "destination": "A/y"},
            {"name": "chmod", "path": "A/y"}
        ]"#;
        let plan: Vec<BatchAction> = serde_json::from_str(json).unwrap();
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0], BatchAction::mkdir("A"));
        assert_eq!(plan[1].content.as_deref(), Some(&b"hi"[..]));
        assert_eq!(plan[2].require_destination().unwrap(), "A/y");
        assert_eq!(plan[3].name, ActionKind::Unknown("chmod".to_string()));
    }

    #[test]
    fn test_missing_fields_are_invalid_argument() {
        let rename = BatchAction::new("RENAME", "a");
        assert!(matches!(
            rename.require_destination(),
            Err(BridgeError::InvalidArgument(_))
        ));
        let write = BatchAction::new("WRITEFILE", "a");
        assert!(matches!(
            write.require_content(),
            Err(BridgeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(BatchAction::rename("a", "b").to_string(), "RENAME a -> b");
        assert_eq!(BatchAction::unlink("a").to_string(), "UNLINK a");
    }

    #[test]
    fn test_file_info_mime() {
        assert_eq!(FileInfo::file("index.html", 3).mime.as_deref(), Some("text/html"));
        assert_eq!(
            FileInfo::file("README", 3).mime.as_deref(),
            Some("application/octet-stream")
        );
        assert!(FileInfo::directory("docs").is_dir);
    }
}
