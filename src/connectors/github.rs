//! GitHub 连接器
//!
//! 路径形如 `/仓库/分支/文件路径`：第一层是当前账号的仓库，第二层是分支，
//! 更深的层级才是分支上的文件树。文件级写操作都通过 [`tree::Transactor`]
//! 以单次提交的方式完成。

mod api;
pub mod tree;

use super::{issue_oauth_state, leaf_name, normalize_path, verify_oauth_state};
use crate::config::GithubConfig;
use crate::http::{HttpClient, HttpRequest};
use api::{AccessToken, Blob, Branch, Commit, ContentEntry, Contents, Created, GitRef, GithubApi, Repo, User};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures_util::FutureExt;
use http::header::ACCEPT;
use serde_json::json;
use silent_bridge_core::batch;
use silent_bridge_core::stream::once_stream;
use silent_bridge_core::{
    Account, ActionKind, BatchAction, BridgeError, BufferedSink, ByteStream, Connector,
    ConnectorInfo, ConnectorSession, FileInfo, LoginInfo, Result, WriteSink,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tree::{TransactError, Transactor, TreeEdit};

const OAUTH_SCOPE: &str = "repo user";

/// 解析后的 GitHub 路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GithubPath {
    Root,
    Repo { repo: String },
    Branch { repo: String, branch: String },
    Entry { repo: String, branch: String, path: String },
}

impl GithubPath {
    pub fn parse(path: &str) -> Result<Self> {
        let normalized = normalize_path(path)?;
        let mut parts = normalized.splitn(3, '/');
        let repo = parts.next().filter(|s| !s.is_empty());
        let branch = parts.next();
        let rest = parts.next();
        Ok(match (repo, branch, rest) {
            (None, _, _) => GithubPath::Root,
            (Some(repo), None, _) => GithubPath::Repo { repo: repo.to_string() },
            (Some(repo), Some(branch), None) => GithubPath::Branch {
                repo: repo.to_string(),
                branch: branch.to_string(),
            },
            (Some(repo), Some(branch), Some(path)) => GithubPath::Entry {
                repo: repo.to_string(),
                branch: branch.to_string(),
                path: path.to_string(),
            },
        })
    }

    /// 文件树内的路径，仓库和分支层级返回错误
    fn into_entry(self, original: &str) -> Result<(String, String, String)> {
        match self {
            GithubPath::Entry { repo, branch, path } => Ok((repo, branch, path)),
            _ => Err(BridgeError::IsDirectory(original.to_string())),
        }
    }
}

fn encode_segments(path: &str) -> String {
    path.split('/')
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn decode_base64(content: &str) -> Result<Bytes> {
    let cleaned: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64
        .decode(cleaned)
        .map(Bytes::from)
        .map_err(|e| BridgeError::Io(format!("base64 解码失败: {}", e)))
}

/// 单次调用的 API 上下文：携带令牌的客户端与账号名
struct Ctx {
    api: GithubApi,
    owner: String,
}

impl Ctx {
    fn repo_path(&self, repo: &str) -> String {
        format!(
            "/repos/{}/{}",
            urlencoding::encode(&self.owner),
            urlencoding::encode(repo)
        )
    }

    fn contents_path(&self, repo: &str, branch: &str, path: &str) -> String {
        let base = self.repo_path(repo);
        if path.is_empty() {
            format!("{}/contents?ref={}", base, urlencoding::encode(branch))
        } else {
            format!(
                "{}/contents/{}?ref={}",
                base,
                encode_segments(path),
                urlencoding::encode(branch)
            )
        }
    }

    fn ref_path(&self, repo: &str, branch: &str) -> String {
        format!(
            "{}/git/refs/heads/{}",
            self.repo_path(repo),
            urlencoding::encode(branch)
        )
    }

    async fn create_blob(&self, repo: &str, content: &[u8]) -> Result<String> {
        let created: Created = self
            .api
            .post(
                &format!("{}/git/blobs", self.repo_path(repo)),
                &json!({ "content": BASE64.encode(content), "encoding": "base64" }),
            )
            .await?;
        Ok(created.sha)
    }

    async fn branch_head(&self, repo: &str, branch: &str) -> Result<String> {
        let head: GitRef = self
            .api
            .get(&format!(
                "{}/git/ref/heads/{}",
                self.repo_path(repo),
                urlencoding::encode(branch)
            ))
            .await?;
        Ok(head.object.sha)
    }

    async fn create_branch(&self, repo: &str, branch: &str, sha: &str) -> Result<()> {
        let _: serde_json::Value = self
            .api
            .post(
                &format!("{}/git/refs", self.repo_path(repo)),
                &json!({ "ref": format!("refs/heads/{}", branch), "sha": sha }),
            )
            .await?;
        Ok(())
    }

    async fn contents(&self, repo: &str, branch: &str, path: &str) -> Result<Contents> {
        self.api.get(&self.contents_path(repo, branch, path)).await
    }

    async fn read_entry(&self, repo: &str, branch: &str, path: &str) -> Result<Bytes> {
        let file = match self.contents(repo, branch, path).await? {
            Contents::Dir(_) => return Err(BridgeError::IsDirectory(path.to_string())),
            Contents::File(f) if f.kind == "dir" => {
                return Err(BridgeError::IsDirectory(path.to_string()));
            }
            Contents::File(f) if f.kind == "submodule" => {
                return Err(BridgeError::NotSupported(format!("子模块: {}", path)));
            }
            Contents::File(f) => f,
        };
        if file.size == 0 {
            return Ok(Bytes::new());
        }
        match (file.content.as_deref(), file.encoding.as_deref()) {
            (Some(content), Some("base64")) if !content.is_empty() => decode_base64(content),
            _ => {
                // 超过 contents API 限制的大文件改走 blob API
                debug!("内容未内联，改用 blob 读取: {} ({} 字节)", path, file.size);
                let blob: Blob = self
                    .api
                    .get(&format!("{}/git/blobs/{}", self.repo_path(repo), file.sha))
                    .await?;
                if blob.encoding == "base64" {
                    decode_base64(&blob.content)
                } else {
                    Ok(Bytes::from(blob.content))
                }
            }
        }
    }

    async fn commit(&self, repo: &str, branch: &str, edits: &[TreeEdit], message: &str) -> Result<()> {
        Transactor::new(&self.api, &self.owner, repo, branch)
            .commit(edits, message)
            .await?;
        Ok(())
    }
}

fn content_info(entry: &ContentEntry) -> FileInfo {
    match entry.kind.as_str() {
        "dir" | "submodule" => FileInfo::directory(&entry.name),
        _ => FileInfo::file(&entry.name, entry.size),
    }
}

#[derive(Clone)]
pub struct GithubConnector {
    config: Arc<GithubConfig>,
    http: Arc<dyn HttpClient>,
}

impl GithubConnector {
    pub fn new(config: &GithubConfig, http: Arc<dyn HttpClient>) -> Self {
        Self {
            config: Arc::new(config.clone()),
            http,
        }
    }

    /// 取得 API 上下文，首次调用时查询并缓存账号
    async fn context(&self, session: &mut ConnectorSession) -> Result<Ctx> {
        let token = session.require_token()?;
        let api = GithubApi::new(self.http.clone(), &self.config.api_base, token);
        if session.account.is_none() {
            let user: User = api.get("/user").await?;
            session.account = Some(Account {
                login: user.login,
                display_name: user.name,
                email: user.email,
            });
        }
        let owner = session
            .account
            .as_ref()
            .map(|a| a.login.clone())
            .unwrap_or_default();
        Ok(Ctx { api, owner })
    }

    async fn exchange_code(&self, code: &str) -> Result<String> {
        let request = HttpRequest::post(format!("{}/access_token", self.config.oauth_base))
            .header(ACCEPT.as_str(), "application/json")?
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
            ])?;
        let response = api::check(self.http.send(request).await?)?;
        let token: AccessToken = response.json()?;
        match token.access_token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(BridgeError::PermissionDenied(format!(
                "GitHub 授权失败: {}",
                token
                    .error_description
                    .or(token.error)
                    .unwrap_or_else(|| "未返回访问令牌".to_string())
            ))),
        }
    }

    fn message<'a>(&'a self, message: Option<&'a str>) -> &'a str {
        message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&self.config.default_commit_message)
    }

    /// 文件级动作所在的仓库与分支；仓库和分支级动作返回 `None`
    fn file_scope(action: &BatchAction) -> Result<Option<(String, String)>> {
        let GithubPath::Entry { repo, branch, .. } = GithubPath::parse(&action.path)? else {
            return Ok(None);
        };
        if action.name == ActionKind::Rename {
            match GithubPath::parse(action.require_destination()?)? {
                GithubPath::Entry {
                    repo: dest_repo,
                    branch: dest_branch,
                    ..
                } if dest_repo == repo && dest_branch == branch => {}
                _ => {
                    return Err(BridgeError::NotSupported(format!(
                        "只能在同一分支内移动: {}",
                        action
                    )));
                }
            }
        }
        Ok(Some((repo, branch)))
    }

    /// 把文件级动作翻译为树改写，写入类动作会先上传 blob
    async fn to_edit(ctx: &Ctx, repo: &str, action: &BatchAction) -> Result<TreeEdit> {
        let (_, _, path) = GithubPath::parse(&action.path)?.into_entry(&action.path)?;
        Ok(match &action.name {
            ActionKind::WriteFile => TreeEdit::AddBlob {
                path,
                sha: ctx.create_blob(repo, &action.require_content()?).await?,
            },
            ActionKind::Mkdir => TreeEdit::MakeDir {
                path,
                keep_sha: ctx.create_blob(repo, &[]).await?,
            },
            ActionKind::Unlink => TreeEdit::RemoveFile { path },
            ActionKind::Rmdir => TreeEdit::RemovePrefix { prefix: path },
            ActionKind::Rename => {
                let dest = action.require_destination()?;
                let (_, _, dest) = GithubPath::parse(dest)?.into_entry(dest)?;
                TreeEdit::Move { src: path, dest }
            }
            ActionKind::Unknown(tag) => {
                return Err(BridgeError::NotSupported(format!("批量动作 {}", tag)));
            }
        })
    }
}

#[async_trait]
impl Connector for GithubConnector {
    fn name(&self) -> &str {
        "github"
    }

    fn get_infos(&self, session: &ConnectorSession) -> ConnectorInfo {
        ConnectorInfo {
            name: "github".to_string(),
            display_name: "GitHub".to_string(),
            icon: "../assets/github.png".to_string(),
            description: "编辑 GitHub 仓库中的文件".to_string(),
            is_logged_in: session.token.is_some(),
            is_oauth: true,
            username: session.account.as_ref().map(|a| a.login.clone()),
        }
    }

    async fn get_authorize_url(&self, session: &mut ConnectorSession) -> Result<String> {
        let state = issue_oauth_state(session);
        Ok(format!(
            "{}/authorize?client_id={}&scope={}&state={}",
            self.config.oauth_base,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(OAUTH_SCOPE),
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
                    "GitHub 需要 OAuth 授权码或访问令牌".to_string(),
                ));
            }
        };
        session.token = Some(token.clone());
        session.account = None;
        if let Err(e) = self.context(session).await {
            session.clear();
            return Err(e);
        }
        info!(
            "GitHub 登录成功: {}",
            session.account.as_ref().map(|a| a.login.as_str()).unwrap_or_default()
        );
        Ok(Some(token))
    }

    async fn readdir(&self, session: &mut ConnectorSession, path: &str) -> Result<Vec<FileInfo>> {
        let ctx = self.context(session).await?;
        match GithubPath::parse(path)? {
            GithubPath::Root => {
                let repos: Vec<Repo> = ctx.api.list("/user/repos?affiliation=owner&per_page=100").await?;
                Ok(repos
                    .into_iter()
                    .map(|r| FileInfo::directory(r.name).with_modified(r.updated_at))
                    .collect())
            }
            GithubPath::Repo { repo } => {
                let branches: Vec<Branch> = ctx
                    .api
                    .list(&format!("{}/branches?per_page=100", ctx.repo_path(&repo)))
                    .await?;
                let mut files = Vec::with_capacity(branches.len());
                for branch in branches {
                    let commit: Commit = ctx
                        .api
                        .get(&format!("{}/commits/{}", ctx.repo_path(&repo), branch.commit.sha))
                        .await?;
                    files.push(FileInfo::directory(branch.name).with_modified(commit.commit.date()));
                }
                Ok(files)
            }
            GithubPath::Branch { repo, branch } => match ctx.contents(&repo, &branch, "").await? {
                Contents::Dir(entries) => Ok(entries.iter().map(content_info).collect()),
                Contents::File(_) => Err(BridgeError::InvalidArgument(format!("不是目录: {}", path))),
            },
            GithubPath::Entry { repo, branch, path: inner } => {
                match ctx.contents(&repo, &branch, &inner).await? {
                    Contents::Dir(entries) => Ok(entries.iter().map(content_info).collect()),
                    Contents::File(_) => Err(BridgeError::InvalidArgument(format!("不是目录: {}", path))),
                }
            }
        }
    }

    async fn stat(&self, session: &mut ConnectorSession, path: &str) -> Result<FileInfo> {
        let ctx = self.context(session).await?;
        match GithubPath::parse(path)? {
            GithubPath::Root => Ok(FileInfo::directory("")),
            GithubPath::Repo { repo } => {
                let info: Repo = ctx.api.get(&ctx.repo_path(&repo)).await?;
                Ok(FileInfo::directory(info.name).with_modified(info.updated_at))
            }
            GithubPath::Branch { repo, branch } => {
                let info: Branch = ctx
                    .api
                    .get(&format!(
                        "{}/branches/{}",
                        ctx.repo_path(&repo),
                        urlencoding::encode(&branch)
                    ))
                    .await?;
                let modified = info.commit.commit.as_ref().and_then(|c| c.date());
                Ok(FileInfo::directory(info.name).with_modified(modified))
            }
            GithubPath::Entry { repo, branch, path: inner } => {
                match ctx.contents(&repo, &branch, &inner).await? {
                    Contents::Dir(_) => Ok(FileInfo::directory(leaf_name(&inner))),
                    Contents::File(entry) => Ok(content_info(&entry)),
                }
            }
        }
    }

    async fn mkdir(&self, session: &mut ConnectorSession, path: &str) -> Result<()> {
        let ctx = self.context(session).await?;
        match GithubPath::parse(path)? {
            GithubPath::Root => Err(BridgeError::InvalidArgument("根目录已存在".to_string())),
            GithubPath::Repo { repo } => {
                let _: serde_json::Value = ctx
                    .api
                    .post("/user/repos", &json!({ "name": repo, "auto_init": true }))
                    .await?;
                info!("GitHub 仓库已创建: {}/{}", ctx.owner, repo);
                Ok(())
            }
            GithubPath::Branch { repo, branch } => {
                let info: Repo = ctx.api.get(&ctx.repo_path(&repo)).await?;
                let default_branch = info.default_branch.unwrap_or_else(|| "main".to_string());
                let sha = ctx.branch_head(&repo, &default_branch).await?;
                ctx.create_branch(&repo, &branch, &sha).await?;
                info!("GitHub 分支已创建: {}/{} (来自 {})", repo, branch, default_branch);
                Ok(())
            }
            GithubPath::Entry { repo, branch, path: inner } => {
                let keep_sha = ctx.create_blob(&repo, &[]).await?;
                let edit = TreeEdit::MakeDir { path: inner, keep_sha };
                ctx.commit(&repo, &branch, &[edit], self.message(None)).await
            }
        }
    }

    async fn write_file(&self, session: &mut ConnectorSession, path: &str, content: Bytes) -> Result<()> {
        let (repo, branch, inner) = GithubPath::parse(path)?.into_entry(path)?;
        let ctx = self.context(session).await?;
        let sha = ctx.create_blob(&repo, &content).await?;
        let edit = TreeEdit::AddBlob { path: inner, sha };
        ctx.commit(&repo, &branch, &[edit], self.message(None)).await
    }

    async fn create_write_stream(&self, session: &mut ConnectorSession, path: &str) -> Result<Box<dyn WriteSink>> {
        let (repo, branch, inner) = GithubPath::parse(path)?.into_entry(path)?;
        let ctx = self.context(session).await?;
        let message = self.message(None).to_string();
        Ok(Box::new(BufferedSink::new(move |content| {
            async move {
                let sha = ctx.create_blob(&repo, &content).await?;
                let edit = TreeEdit::AddBlob { path: inner, sha };
                ctx.commit(&repo, &branch, &[edit], &message).await
            }
            .boxed()
        })))
    }

    async fn read_file(&self, session: &mut ConnectorSession, path: &str) -> Result<Bytes> {
        let (repo, branch, inner) = GithubPath::parse(path)?.into_entry(path)?;
        let ctx = self.context(session).await?;
        ctx.read_entry(&repo, &branch, &inner).await
    }

    async fn create_read_stream(&self, session: &mut ConnectorSession, path: &str) -> Result<ByteStream> {
        Ok(once_stream(self.read_file(session, path).await?))
    }

    async fn rename(&self, session: &mut ConnectorSession, src: &str, dest: &str) -> Result<()> {
        let ctx = self.context(session).await?;
        match (GithubPath::parse(src)?, GithubPath::parse(dest)?) {
            (GithubPath::Repo { repo }, GithubPath::Repo { repo: new_name }) => {
                let _: serde_json::Value = ctx
                    .api
                    .patch(&ctx.repo_path(&repo), &json!({ "name": new_name }))
                    .await?;
                info!("GitHub 仓库已重命名: {} -> {}", repo, new_name);
                Ok(())
            }
            (
                GithubPath::Branch { repo, branch },
                GithubPath::Branch {
                    repo: dest_repo,
                    branch: new_branch,
                },
            ) if repo == dest_repo => {
                let sha = ctx.branch_head(&repo, &branch).await?;
                ctx.create_branch(&repo, &new_branch, &sha).await?;
                ctx.api.delete(&ctx.ref_path(&repo, &branch)).await?;
                info!("GitHub 分支已重命名: {}/{} -> {}", repo, branch, new_branch);
                Ok(())
            }
            (
                GithubPath::Entry { repo, branch, path },
                GithubPath::Entry {
                    repo: dest_repo,
                    branch: dest_branch,
                    path: dest_path,
                },
            ) if repo == dest_repo && branch == dest_branch => {
                let edit = TreeEdit::Move {
                    src: path,
                    dest: dest_path,
                };
                ctx.commit(&repo, &branch, &[edit], self.message(None)).await
            }
            _ => Err(BridgeError::NotSupported(format!(
                "不支持跨仓库、跨分支或跨层级移动: {} -> {}",
                src, dest
            ))),
        }
    }

    async fn unlink(&self, session: &mut ConnectorSession, path: &str) -> Result<()> {
        let (repo, branch, inner) = GithubPath::parse(path)?.into_entry(path)?;
        let ctx = self.context(session).await?;
        let edit = TreeEdit::RemoveFile { path: inner };
        ctx.commit(&repo, &branch, &[edit], self.message(None)).await
    }

    async fn rmdir(&self, session: &mut ConnectorSession, path: &str) -> Result<()> {
        let ctx = self.context(session).await?;
        match GithubPath::parse(path)? {
            GithubPath::Root => Err(BridgeError::InvalidArgument("不能删除根目录".to_string())),
            GithubPath::Repo { repo } => {
                ctx.api.delete(&ctx.repo_path(&repo)).await?;
                warn!("GitHub 仓库已删除: {}/{}", ctx.owner, repo);
                Ok(())
            }
            GithubPath::Branch { repo, branch } => {
                ctx.api.delete(&ctx.ref_path(&repo, &branch)).await?;
                info!("GitHub 分支已删除: {}/{}", repo, branch);
                Ok(())
            }
            GithubPath::Entry { repo, branch, path: inner } => {
                let edit = TreeEdit::RemovePrefix { prefix: inner };
                ctx.commit(&repo, &branch, &[edit], self.message(None)).await
            }
        }
    }

    /// 连续的同一仓库分支上的文件级动作合并为一次提交；
    /// 仓库和分支级动作逐个直接执行。
    ///
    /// 组内某个动作失败时，它之前的改写仍单独提交一次，不回滚。
    async fn batch(
        &self,
        session: &mut ConnectorSession,
        plan: &[BatchAction],
        message: Option<&str>,
    ) -> Result<()> {
        let message = self.message(message).to_string();
        let ctx = self.context(session).await?;
        let mut completed: Vec<BatchAction> = Vec::new();
        let mut index = 0;

        while index < plan.len() {
            let action = &plan[index];
            if let ActionKind::Unknown(tag) = &action.name {
                warn!("跳过不支持的批量动作: connector=github, index={}, action={}", index, tag);
                index += 1;
                continue;
            }

            let scope = Self::file_scope(action)
                .map_err(|e| BridgeError::batch(index, action.clone(), completed.clone(), e))?;
            let Some(scope) = scope else {
                debug!("执行批量动作 #{}: {}", index, action);
                if let Err(e) = batch::apply(self, session, action).await {
                    return Err(BridgeError::batch(index, action.clone(), completed, e));
                }
                completed.push(action.clone());
                index += 1;
                continue;
            };

            let mut group = Vec::new();
            let mut end = index;
            while end < plan.len() {
                let next = &plan[end];
                if let ActionKind::Unknown(tag) = &next.name {
                    warn!("跳过不支持的批量动作: connector=github, index={}, action={}", end, tag);
                    end += 1;
                    continue;
                }
                match Self::file_scope(next) {
                    Ok(Some(next_scope)) if next_scope == scope => {
                        group.push(end);
                        end += 1;
                    }
                    _ => break,
                }
            }

            let (repo, branch) = scope;
            let transactor = Transactor::new(&ctx.api, &ctx.owner, &repo, &branch);
            let mut edits = Vec::with_capacity(group.len());
            let mut failure = None;
            for (k, &i) in group.iter().enumerate() {
                match Self::to_edit(&ctx, &repo, &plan[i]).await {
                    Ok(edit) => edits.push(edit),
                    Err(e) => {
                        failure = Some(TransactError::Edit(k, e));
                        break;
                    }
                }
            }

            debug!(
                "合并批量动作 #{}..#{} 为一次提交: {}/{}",
                group[0],
                end - 1,
                repo,
                branch
            );
            let result = match failure {
                Some(err) => Err(err),
                None => transactor.commit(&edits, &message).await,
            };
            match result {
                Ok(_) => completed.extend(group.iter().map(|&i| plan[i].clone())),
                Err(TransactError::Edit(k, e)) => {
                    // 出错动作之前的改写照常提交
                    if k > 0 {
                        debug!("提交出错前的 {} 项改写: {}/{}", k, repo, branch);
                        match transactor.commit(&edits[..k], &message).await {
                            Ok(_) => completed.extend(group[..k].iter().map(|&i| plan[i].clone())),
                            Err(TransactError::Edit(j, prefix_err)) => {
                                let i = group[j];
                                return Err(BridgeError::batch(i, plan[i].clone(), completed, prefix_err));
                            }
                            Err(TransactError::Remote(prefix_err)) => {
                                let i = group[0];
                                return Err(BridgeError::batch(i, plan[i].clone(), completed, prefix_err));
                            }
                        }
                    }
                    let i = group[k];
                    return Err(BridgeError::batch(i, plan[i].clone(), completed, e));
                }
                Err(TransactError::Remote(e)) => {
                    let i = group[0];
                    return Err(BridgeError::batch(i, plan[i].clone(), completed, e));
                }
            }
            index = end;
        }

        info!("GitHub 批量操作完成: {} 个动作", completed.len());
        Ok(())
    }
}
