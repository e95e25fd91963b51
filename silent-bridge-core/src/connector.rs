//! 连接器 trait 定义
//!
//! 每种后端实现同一组统一方法，分发引擎只通过此 trait 调用连接器。

use crate::batch;
use crate::error::{BridgeError, Result};
use crate::stream::{ByteStream, WriteSink};
use crate::{BatchAction, ConnectorInfo, ConnectorSession, FileInfo, LoginInfo};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;

/// 统一方法集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GetInfos,
    GetAuthorizeUrl,
    SetAccessToken,
    ClearAccessToken,
    Login,
    Readdir,
    Stat,
    Mkdir,
    WriteFile,
    CreateWriteStream,
    ReadFile,
    CreateReadStream,
    Rename,
    Unlink,
    Rmdir,
    Batch,
}

impl Method {
    pub const ALL: &'static [Method] = &[
        Method::GetInfos,
        Method::GetAuthorizeUrl,
        Method::SetAccessToken,
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

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GetInfos => "getInfos",
            Method::GetAuthorizeUrl => "getAuthorizeURL",
            Method::SetAccessToken => "setAccessToken",
            Method::ClearAccessToken => "clearAccessToken",
            Method::Login => "login",
            Method::Readdir => "readdir",
            Method::Stat => "stat",
            Method::Mkdir => "mkdir",
            Method::WriteFile => "writeFile",
            Method::CreateWriteStream => "createWriteStream",
            Method::ReadFile => "readFile",
            Method::CreateReadStream => "createReadStream",
            Method::Rename => "rename",
            Method::Unlink => "unlink",
            Method::Rmdir => "rmdir",
            Method::Batch => "batch",
        }
    }

    /// 是否需要已登录的会话
    ///
    /// 这是方法名的静态属性，与连接器状态无关；登录相关方法永远不受限。
    pub fn requires_auth(&self) -> bool {
        !matches!(
            self,
            Method::GetInfos
                | Method::GetAuthorizeUrl
                | Method::SetAccessToken
                | Method::ClearAccessToken
                | Method::Login
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Method::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| BridgeError::InvalidArgument(format!("未知方法: {}", s)))
    }
}

/// 后端连接器
///
/// 方法的默认实现返回 `InvalidArgument`（未实现）；连接器应通过
/// `capabilities` 声明自己真正实现的方法，分发引擎据此拒绝调用。
#[async_trait]
pub trait Connector: Send + Sync {
    /// 注册名称（分发引擎会统一转为小写）
    fn name(&self) -> &str;

    /// 已实现的方法集合
    fn capabilities(&self) -> &'static [Method] {
        Method::ALL
    }

    fn supports(&self, method: Method) -> bool {
        self.capabilities().contains(&method)
    }

    /// 连接器描述与登录状态
    fn get_infos(&self, session: &ConnectorSession) -> ConnectorInfo;

    async fn get_authorize_url(&self, session: &mut ConnectorSession) -> Result<String> {
        let _ = session;
        Err(BridgeError::unimplemented(self.name(), Method::GetAuthorizeUrl))
    }

    async fn set_access_token(&self, session: &mut ConnectorSession, token: &str) -> Result<String> {
        let _ = (session, token);
        Err(BridgeError::unimplemented(self.name(), Method::SetAccessToken))
    }

    async fn clear_access_token(&self, session: &mut ConnectorSession) -> Result<()> {
        session.clear();
        Ok(())
    }

    async fn login(&self, session: &mut ConnectorSession, info: LoginInfo) -> Result<Option<String>> {
        let _ = (session, info);
        Err(BridgeError::unimplemented(self.name(), Method::Login))
    }

    async fn readdir(&self, session: &mut ConnectorSession, path: &str) -> Result<Vec<FileInfo>>;

    async fn stat(&self, session: &mut ConnectorSession, path: &str) -> Result<FileInfo>;

    async fn mkdir(&self, session: &mut ConnectorSession, path: &str) -> Result<()>;

    async fn write_file(&self, session: &mut ConnectorSession, path: &str, content: Bytes) -> Result<()>;

    async fn create_write_stream(
        &self,
        session: &mut ConnectorSession,
        path: &str,
    ) -> Result<Box<dyn WriteSink>> {
        let _ = (session, path);
        Err(BridgeError::unimplemented(self.name(), Method::CreateWriteStream))
    }

    async fn read_file(&self, session: &mut ConnectorSession, path: &str) -> Result<Bytes>;

    async fn create_read_stream(&self, session: &mut ConnectorSession, path: &str) -> Result<ByteStream> {
        let _ = (session, path);
        Err(BridgeError::unimplemented(self.name(), Method::CreateReadStream))
    }

    async fn rename(&self, session: &mut ConnectorSession, src: &str, dest: &str) -> Result<()>;

    async fn unlink(&self, session: &mut ConnectorSession, path: &str) -> Result<()>;

    async fn rmdir(&self, session: &mut ConnectorSession, path: &str) -> Result<()>;

    /// 顺序执行批量计划，默认使用通用批量执行器
    async fn batch(
        &self,
        session: &mut ConnectorSession,
        plan: &[BatchAction],
        message: Option<&str>,
    ) -> Result<()> {
        let _ = message;
        batch::execute(self, session, plan).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names_round_trip() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), *method);
        }
        assert_eq!("WRITEFILE".parse::<Method>().unwrap(), Method::WriteFile);
    }

    #[test]
    fn test_unknown_method_is_invalid_argument() {
        let err = "chmod".parse::<Method>().unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
        assert!(err.to_string().contains("chmod"));
    }

    #[test]
    fn test_auth_classification() {
        let gated: Vec<_> = Method::ALL.iter().filter(|m| m.requires_auth()).collect();
        assert_eq!(gated.len(), 11);
        assert!(!Method::Login.requires_auth());
        assert!(!Method::GetInfos.requires_auth());
        assert!(Method::Batch.requires_auth());
        assert!(Method::CreateReadStream.requires_auth());
    }

    fn _assert_object_safe(_: &dyn Connector) {}
}
