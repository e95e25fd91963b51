//! 集成测试共用的内存 HTTP 后端

#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use http::header::{AUTHORIZATION, HeaderValue, LINK};
use http::{HeaderMap, Method, StatusCode};
use serde_json::{Value, json};
use silent_bridge::config::Config;
use silent_bridge::http::{HttpClient, HttpRequest, HttpResponse};
use silent_bridge::{BridgeError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const GITHUB_API: &str = "https://api.github.test";
pub const DROPBOX_API: &str = "https://api.dropbox.test";
pub const DROPBOX_CONTENT: &str = "https://content.dropbox.test";

/// 指向内存后端和临时目录的配置
pub fn test_config(fs_root: &Path) -> Config {
    let mut config = Config::default();
    config.fs.root_path = fs_root.to_path_buf();
    config.github.api_base = GITHUB_API.to_string();
    config.github.client_id = "gh-client".to_string();
    config.github.client_secret = "gh-secret".to_string();
    config.dropbox.api_base = DROPBOX_API.to_string();
    config.dropbox.content_base = DROPBOX_CONTENT.to_string();
    config.dropbox.app_key = "db-key".to_string();
    config.dropbox.app_secret = "db-secret".to_string();
    config.dropbox.redirect_uri = "https://app.test/callback".to_string();
    config
}

fn json_response(status: StatusCode, body: &Value) -> HttpResponse {
    HttpResponse {
        status,
        headers: HeaderMap::new(),
        body: Bytes::from(serde_json::to_vec(body).unwrap()),
    }
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

struct CommitObject {
    tree: String,
    parents: Vec<String>,
    message: String,
}

#[derive(Default)]
struct RepoState {
    default_branch: String,
    refs: BTreeMap<String, String>,
    commits: HashMap<String, CommitObject>,
    /// 树只保存叶子条目：路径 -> blob sha
    trees: HashMap<String, BTreeMap<String, String>>,
    blobs: HashMap<String, Vec<u8>>,
}

struct GithubState {
    login: String,
    repos: BTreeMap<String, RepoState>,
    requests: Vec<String>,
    bodies: Vec<Value>,
    page_size: usize,
    inline_limit: usize,
    truncate_trees: bool,
    next_id: usize,
}

/// 内存中的 GitHub REST 后端，只实现连接器用到的端点
pub struct FakeGithub {
    state: Mutex<GithubState>,
}

impl FakeGithub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GithubState {
                login: "octo".to_string(),
                repos: BTreeMap::new(),
                requests: Vec::new(),
                bodies: Vec::new(),
                page_size: 100,
                inline_limit: 1024 * 1024,
                truncate_trees: false,
                next_id: 0,
            }),
        })
    }

    pub fn add_repo(&self, name: &str, branch: &str, files: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        let mut repo = RepoState {
            default_branch: branch.to_string(),
            ..Default::default()
        };
        let mut tree = BTreeMap::new();
        for (path, content) in files {
            let sha = state.id("blob");
            repo.blobs.insert(sha.clone(), content.as_bytes().to_vec());
            tree.insert(path.to_string(), sha);
        }
        let tree_sha = state.id("tree");
        repo.trees.insert(tree_sha.clone(), tree);
        let commit_sha = state.id("commit");
        repo.commits.insert(
            commit_sha.clone(),
            CommitObject {
                tree: tree_sha,
                parents: Vec::new(),
                message: "initial".to_string(),
            },
        );
        repo.refs.insert(branch.to_string(), commit_sha);
        state.repos.insert(name.to_string(), repo);
    }

    pub fn add_branch(&self, repo: &str, branch: &str) {
        let mut state = self.state.lock().unwrap();
        let repo = state.repos.get_mut(repo).unwrap();
        let head = repo.refs[&repo.default_branch].clone();
        repo.refs.insert(branch.to_string(), head);
    }

    pub fn head(&self, repo: &str, branch: &str) -> String {
        self.state.lock().unwrap().repos[repo].refs[branch].clone()
    }

    pub fn branches(&self, repo: &str) -> Vec<String> {
        self.state.lock().unwrap().repos[repo].refs.keys().cloned().collect()
    }

    pub fn repo_names(&self) -> Vec<String> {
        self.state.lock().unwrap().repos.keys().cloned().collect()
    }

    /// 分支当前提交中的所有文件
    pub fn files(&self, repo: &str, branch: &str) -> BTreeMap<String, Vec<u8>> {
        let state = self.state.lock().unwrap();
        let repo = &state.repos[repo];
        let commit = &repo.commits[&repo.refs[branch]];
        repo.trees[&commit.tree]
            .iter()
            .map(|(path, sha)| (path.clone(), repo.blobs[sha].clone()))
            .collect()
    }

    pub fn commit_parents(&self, repo: &str, sha: &str) -> Vec<String> {
        self.state.lock().unwrap().repos[repo].commits[sha].parents.clone()
    }

    pub fn commit_message(&self, repo: &str, sha: &str) -> String {
        self.state.lock().unwrap().repos[repo].commits[sha].message.clone()
    }

    /// 形如 `GET /repos/octo/r/git/ref/heads/main` 的请求记录
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.state.lock().unwrap().bodies.clone()
    }

    pub fn clear_requests(&self) {
        let mut state = self.state.lock().unwrap();
        state.requests.clear();
        state.bodies.clear();
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.requests().iter().filter(|r| r.starts_with(prefix)).count()
    }

    pub fn set_page_size(&self, size: usize) {
        self.state.lock().unwrap().page_size = size;
    }

    pub fn set_inline_limit(&self, limit: usize) {
        self.state.lock().unwrap().inline_limit = limit;
    }

    pub fn set_truncated(&self, truncated: bool) {
        self.state.lock().unwrap().truncate_trees = truncated;
    }
}

impl GithubState {
    fn id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", kind, self.next_id)
    }

    fn page(&self, url: &url::Url, items: Vec<Value>) -> HttpResponse {
        let page: usize = url
            .query_pairs()
            .find(|(k, _)| k == "page")
            .and_then(|(_, v)| v.parse().ok())
            .unwrap_or(1);
        let start = (page - 1) * self.page_size;
        let chunk: Vec<Value> = items.iter().skip(start).take(self.page_size).cloned().collect();
        let mut response = json_response(StatusCode::OK, &Value::Array(chunk));
        if start + self.page_size < items.len() {
            let mut next = url.clone();
            let pairs: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| k != "page")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            next.query_pairs_mut()
                .clear()
                .extend_pairs(pairs)
                .append_pair("page", &(page + 1).to_string());
            let link = format!(
                "<{}>; rel=\"next\", <{}>; rel=\"first\"",
                next, url
            );
            response
                .headers
                .insert(LINK, HeaderValue::from_str(&link).unwrap());
        }
        response
    }

    fn handle(&mut self, request: &HttpRequest) -> HttpResponse {
        let url = url::Url::parse(&request.url).unwrap();
        let segments: Vec<String> = url
            .path_segments()
            .map(|s| {
                s.filter(|s| !s.is_empty())
                    .map(|s| urlencoding::decode(s).unwrap().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        let body: Value = request
            .body
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok())
            .unwrap_or(Value::Null);
        self.requests.push(format!("{} {}", request.method, url.path()));
        self.bodies.push(body.clone());

        let authorized = request
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "token gh-token");
        if !authorized {
            return json_response(StatusCode::UNAUTHORIZED, &json!({"message": "Bad credentials"}));
        }

        let segs: Vec<&str> = segments.iter().map(String::as_str).collect();
        let method = request.method.clone();
        match (method, segs.as_slice()) {
            (Method::GET, ["user"]) => json_response(
                StatusCode::OK,
                &json!({"login": self.login, "name": "Octo Cat", "email": null}),
            ),
            (Method::GET, ["user", "repos"]) => {
                let items = self
                    .repos
                    .iter()
                    .map(|(name, r)| {
                        json!({"name": name, "default_branch": r.default_branch, "updated_at": "2024-01-01T00:00:00Z"})
                    })
                    .collect();
                self.page(&url, items)
            }
            (Method::POST, ["user", "repos"]) => {
                let name = body["name"].as_str().unwrap_or_default().to_string();
                if self.repos.contains_key(&name) {
                    return json_response(
                        StatusCode::UNPROCESSABLE_ENTITY,
                        &json!({"message": "name already exists on this account"}),
                    );
                }
                self.create_repo(&name);
                json_response(StatusCode::CREATED, &json!({"name": name}))
            }
            (method, ["repos", owner, repo, rest @ ..]) => {
                if *owner != self.login || !self.repos.contains_key(*repo) {
                    return not_found();
                }
                self.handle_repo(method, &url, repo, rest, &body)
            }
            _ => not_found(),
        }
    }

    fn create_repo(&mut self, name: &str) {
        let blob = self.id("blob");
        let tree = self.id("tree");
        let commit = self.id("commit");
        let mut repo = RepoState {
            default_branch: "main".to_string(),
            ..Default::default()
        };
        repo.blobs.insert(blob.clone(), format!("# {}\n", name).into_bytes());
        repo.trees
            .insert(tree.clone(), BTreeMap::from([("README.md".to_string(), blob)]));
        repo.commits.insert(
            commit.clone(),
            CommitObject {
                tree,
                parents: Vec::new(),
                message: "Initial commit".to_string(),
            },
        );
        repo.refs.insert("main".to_string(), commit);
        self.repos.insert(name.to_string(), repo);
    }

    fn handle_repo(&mut self, method: Method, url: &url::Url, name: &str, rest: &[&str], body: &Value) -> HttpResponse {
        match (method, rest) {
            (Method::GET, []) => {
                let repo = &self.repos[name];
                json_response(
                    StatusCode::OK,
                    &json!({"name": name, "default_branch": repo.default_branch, "updated_at": "2024-01-01T00:00:00Z"}),
                )
            }
            (Method::PATCH, []) => {
                let new_name = body["name"].as_str().unwrap_or_default().to_string();
                let repo = self.repos.remove(name).unwrap();
                self.repos.insert(new_name.clone(), repo);
                json_response(StatusCode::OK, &json!({"name": new_name}))
            }
            (Method::DELETE, []) => {
                self.repos.remove(name);
                empty(StatusCode::NO_CONTENT)
            }
            (Method::GET, ["branches"]) => {
                let items = self.repos[name]
                    .refs
                    .iter()
                    .map(|(b, sha)| json!({"name": b, "commit": {"sha": sha}}))
                    .collect();
                self.page(url, items)
            }
            (Method::GET, ["branches", branch]) => match self.repos[name].refs.get(*branch) {
                Some(sha) => json_response(
                    StatusCode::OK,
                    &json!({"name": branch, "commit": {"sha": sha, "commit": {"committer": {"date": "2024-02-03T04:05:06Z"}}}}),
                ),
                None => not_found(),
            },
            (Method::GET, ["commits", sha]) => {
                if self.repos[name].commits.contains_key(*sha) {
                    json_response(
                        StatusCode::OK,
                        &json!({"sha": sha, "commit": {"committer": {"date": "2024-02-03T04:05:06Z"}}}),
                    )
                } else {
                    not_found()
                }
            }
            (Method::GET, ["git", "ref", "heads", branch]) => match self.repos[name].refs.get(*branch) {
                Some(sha) => json_response(
                    StatusCode::OK,
                    &json!({"ref": format!("refs/heads/{}", branch), "object": {"sha": sha, "type": "commit"}}),
                ),
                None => not_found(),
            },
            (Method::POST, ["git", "refs"]) => {
                let reference = body["ref"].as_str().unwrap_or_default();
                let sha = body["sha"].as_str().unwrap_or_default().to_string();
                let Some(branch) = reference.strip_prefix("refs/heads/") else {
                    return json_response(StatusCode::UNPROCESSABLE_ENTITY, &json!({"message": "bad ref"}));
                };
                let repo = self.repos.get_mut(name).unwrap();
                if repo.refs.contains_key(branch) {
                    return json_response(
                        StatusCode::UNPROCESSABLE_ENTITY,
                        &json!({"message": "Reference already exists"}),
                    );
                }
                repo.refs.insert(branch.to_string(), sha.clone());
                json_response(StatusCode::CREATED, &json!({"ref": reference, "object": {"sha": sha}}))
            }
            (Method::PATCH, ["git", "refs", "heads", branch]) => {
                let sha = body["sha"].as_str().unwrap_or_default().to_string();
                let repo = self.repos.get_mut(name).unwrap();
                if !repo.commits.contains_key(&sha) {
                    return json_response(StatusCode::UNPROCESSABLE_ENTITY, &json!({"message": "Object does not exist"}));
                }
                repo.refs.insert(branch.to_string(), sha.clone());
                json_response(StatusCode::OK, &json!({"object": {"sha": sha}}))
            }
            (Method::DELETE, ["git", "refs", "heads", branch]) => {
                match self.repos.get_mut(name).unwrap().refs.remove(*branch) {
                    Some(_) => empty(StatusCode::NO_CONTENT),
                    None => json_response(StatusCode::UNPROCESSABLE_ENTITY, &json!({"message": "Reference does not exist"})),
                }
            }
            (Method::GET, ["git", "trees", sha]) => {
                let repo = &self.repos[name];
                let tree_sha = repo.commits.get(*sha).map(|c| c.tree.clone()).unwrap_or(sha.to_string());
                let Some(tree) = repo.trees.get(&tree_sha) else {
                    return not_found();
                };
                let mut dirs = BTreeSet::new();
                let mut entries = Vec::new();
                for (path, blob) in tree {
                    let parts: Vec<&str> = path.split('/').collect();
                    let mut prefix = String::new();
                    for part in &parts[..parts.len() - 1] {
                        prefix = if prefix.is_empty() { part.to_string() } else { format!("{}/{}", prefix, part) };
                        if dirs.insert(prefix.clone()) {
                            entries.push(json!({"path": prefix, "mode": "040000", "type": "tree", "sha": "tree-dir"}));
                        }
                    }
                    entries.push(json!({"path": path, "mode": "100644", "type": "blob", "sha": blob, "size": repo.blobs[blob].len()}));
                }
                json_response(
                    StatusCode::OK,
                    &json!({"sha": tree_sha, "tree": entries, "truncated": self.truncate_trees}),
                )
            }
            (Method::POST, ["git", "trees"]) => {
                if body.get("base_tree").is_some() {
                    return json_response(StatusCode::UNPROCESSABLE_ENTITY, &json!({"message": "base_tree not expected"}));
                }
                let mut tree = BTreeMap::new();
                for entry in body["tree"].as_array().cloned().unwrap_or_default() {
                    if entry["type"] != "blob" {
                        return json_response(StatusCode::UNPROCESSABLE_ENTITY, &json!({"message": "tree entries must be blobs"}));
                    }
                    let sha = entry["sha"].as_str().unwrap_or_default().to_string();
                    if !self.repos[name].blobs.contains_key(&sha) {
                        return json_response(StatusCode::UNPROCESSABLE_ENTITY, &json!({"message": "missing blob"}));
                    }
                    let path = entry["path"].as_str().unwrap_or_default().to_string();
                    if tree.insert(path, sha).is_some() {
                        return json_response(StatusCode::UNPROCESSABLE_ENTITY, &json!({"message": "duplicate path"}));
                    }
                }
                let sha = self.id("tree");
                self.repos.get_mut(name).unwrap().trees.insert(sha.clone(), tree);
                json_response(StatusCode::CREATED, &json!({"sha": sha}))
            }
            (Method::POST, ["git", "commits"]) => {
                let sha = self.id("commit");
                let commit = CommitObject {
                    tree: body["tree"].as_str().unwrap_or_default().to_string(),
                    parents: body["parents"]
                        .as_array()
                        .map(|p| p.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                        .unwrap_or_default(),
                    message: body["message"].as_str().unwrap_or_default().to_string(),
                };
                self.repos.get_mut(name).unwrap().commits.insert(sha.clone(), commit);
                json_response(StatusCode::CREATED, &json!({"sha": sha}))
            }
            (Method::POST, ["git", "blobs"]) => {
                let content = BASE64
                    .decode(body["content"].as_str().unwrap_or_default())
                    .unwrap();
                let sha = self.id("blob");
                self.repos.get_mut(name).unwrap().blobs.insert(sha.clone(), content);
                json_response(StatusCode::CREATED, &json!({"sha": sha}))
            }
            (Method::GET, ["git", "blobs", sha]) => match self.repos[name].blobs.get(*sha) {
                Some(content) => json_response(
                    StatusCode::OK,
                    &json!({"sha": sha, "content": BASE64.encode(content), "encoding": "base64"}),
                ),
                None => not_found(),
            },
            (Method::GET, ["contents", path @ ..]) => {
                let branch = url
                    .query_pairs()
                    .find(|(k, _)| k == "ref")
                    .map(|(_, v)| v.into_owned())
                    .unwrap_or_default();
                self.contents(name, &branch, &path.join("/"))
            }
            _ => not_found(),
        }
    }

    fn contents(&self, name: &str, branch: &str, path: &str) -> HttpResponse {
        let repo = &self.repos[name];
        let Some(head) = repo.refs.get(branch) else {
            return not_found();
        };
        let tree = &repo.trees[&repo.commits[head].tree];
        if let Some(sha) = tree.get(path) {
            let content = &repo.blobs[sha];
            let name = path.rsplit('/').next().unwrap_or_default();
            let (inline, encoding) = if content.len() <= self.inline_limit {
                // 与 GitHub 一样按 60 列换行
                let encoded = BASE64.encode(content);
                let wrapped = encoded
                    .as_bytes()
                    .chunks(60)
                    .map(|c| String::from_utf8_lossy(c).into_owned())
                    .collect::<Vec<_>>()
                    .join("\n");
                (wrapped, "base64")
            } else {
                (String::new(), "none")
            };
            return json_response(
                StatusCode::OK,
                &json!({"name": name, "path": path, "type": "file", "size": content.len(), "sha": sha, "content": inline, "encoding": encoding}),
            );
        }
        let prefix = if path.is_empty() { String::new() } else { format!("{}/", path) };
        let mut children: BTreeMap<String, (String, usize, String)> = BTreeMap::new();
        for (file, sha) in tree {
            let Some(rest) = file.strip_prefix(&prefix) else { continue };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    children.entry(dir.to_string()).or_insert(("dir".to_string(), 0, "tree-dir".to_string()));
                }
                None => {
                    children.insert(rest.to_string(), ("file".to_string(), repo.blobs[sha].len(), sha.clone()));
                }
            }
        }
        if children.is_empty() {
            return not_found();
        }
        let items: Vec<Value> = children
            .into_iter()
            .map(|(name, (kind, size, sha))| json!({"name": name, "type": kind, "size": size, "sha": sha}))
            .collect();
        json_response(StatusCode::OK, &Value::Array(items))
    }
}

fn not_found() -> HttpResponse {
    json_response(StatusCode::NOT_FOUND, &json!({"message": "Not Found"}))
}

fn empty(status: StatusCode) -> HttpResponse {
    HttpResponse {
        status,
        headers: HeaderMap::new(),
        body: Bytes::new(),
    }
}

#[async_trait]
impl HttpClient for FakeGithub {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        Ok(self.state.lock().unwrap().handle(&request))
    }
}

// ---------------------------------------------------------------------------
// 按顺序回放预设响应
// ---------------------------------------------------------------------------

/// 记录所有请求并按顺序返回预设响应，用于 Dropbox 与 WebDAV
#[derive(Default)]
pub struct Scripted {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl Scripted {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_json(&self, status: u16, body: Value) {
        self.push(status, Bytes::from(serde_json::to_vec(&body).unwrap()));
    }

    pub fn push_text(&self, status: u16, body: &str) {
        self.push(status, Bytes::from(body.to_string()));
    }

    pub fn push(&self, status: u16, body: Bytes) {
        self.responses.lock().unwrap().push_back(HttpResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body,
        });
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> HttpRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }

    pub fn header(request: &HttpRequest, name: &str) -> Option<String> {
        request
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    pub fn body_json(request: &HttpRequest) -> Value {
        request
            .body
            .as_ref()
            .map(|b| serde_json::from_slice(b).unwrap())
            .unwrap_or(Value::Null)
    }
}

#[async_trait]
impl HttpClient for Scripted {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| BridgeError::Io(format!("没有预设响应: {} {}", request.method, request.url)))
    }
}
