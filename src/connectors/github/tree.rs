//! Git 树事务
//!
//! 远端只提供“替换分支指向的树”这一原语，多文件写入、删除与移动
//! 都通过一次读-改-写完成：
//!
//! 1. ReadHead：读取分支 ref 指向的提交
//! 2. ReadTree：读取该提交的完整递归树
//! 3. Transform：对条目列表应用纯函数改写
//! 4. CreateTree：提交新的条目列表，得到新树
//! 5. CreateCommit：以第 1 步的提交为父提交创建新提交
//! 6. UpdateRef：把分支 ref 移到新提交
//!
//! 第 1 步到第 6 步之间不加锁，UpdateRef 使用 `force: true`，
//! 并发写入时后写者覆盖先写者。

use super::api::{Created, GitRef, GithubApi};
use regex::Regex;
use serde::{Deserialize, Serialize};
use silent_bridge_core::{BridgeError, Result};
use tracing::{debug, info};

pub const MODE_FILE: &str = "100644";
pub const KIND_BLOB: &str = "blob";
pub const KIND_TREE: &str = "tree";

/// 树中的一个条目，路径相对仓库根目录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl TreeEntry {
    pub fn blob(path: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: MODE_FILE.to_string(),
            kind: KIND_BLOB.to_string(),
            sha: Some(sha.into()),
            content: None,
        }
    }

    fn is_under(&self, prefix: &str) -> bool {
        self.path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// 读取时的树快照，事务结束即丢弃
#[derive(Debug, Clone)]
pub struct GitTree {
    pub commit_sha: String,
    pub entries: Vec<TreeEntry>,
}

/// 对条目列表的一次改写
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEdit {
    /// 新增或替换文件
    AddBlob { path: String, sha: String },
    /// 删除恰好一个文件
    RemoveFile { path: String },
    /// 删除某目录下的所有条目
    RemovePrefix { prefix: String },
    /// 按前缀改写路径（文件或目录）
    Move { src: String, dest: String },
    /// 新建目录，用占位文件保存
    MakeDir { path: String, keep_sha: String },
}

pub const KEEP_FILE: &str = ".gitkeep";

impl TreeEdit {
    pub fn apply(&self, mut entries: Vec<TreeEntry>) -> Result<Vec<TreeEntry>> {
        match self {
            TreeEdit::AddBlob { path, sha } => {
                if entries.iter().any(|e| e.is_under(path)) {
                    return Err(BridgeError::IsDirectory(path.clone()));
                }
                let entry = TreeEntry::blob(path.clone(), sha.clone());
                match entries.iter_mut().find(|e| &e.path == path) {
                    Some(existing) => *existing = entry,
                    None => entries.push(entry),
                }
                Ok(entries)
            }
            TreeEdit::RemoveFile { path } => {
                if entries.iter().any(|e| e.is_under(path)) {
                    return Err(BridgeError::IsDirectory(path.clone()));
                }
                let before = entries.len();
                entries.retain(|e| &e.path != path);
                if entries.len() + 1 != before {
                    return Err(BridgeError::NotFound(path.clone()));
                }
                Ok(entries)
            }
            TreeEdit::RemovePrefix { prefix } => {
                if entries.iter().any(|e| &e.path == prefix) {
                    return Err(BridgeError::InvalidArgument(format!("不是目录: {}", prefix)));
                }
                let before = entries.len();
                entries.retain(|e| !e.is_under(prefix));
                if entries.len() == before {
                    return Err(BridgeError::NotFound(prefix.clone()));
                }
                Ok(entries)
            }
            TreeEdit::Move { src, dest } => {
                if entries.iter().any(|e| &e.path == dest || e.is_under(dest)) {
                    return Err(BridgeError::InvalidArgument(format!("目标已存在: {}", dest)));
                }
                let pattern = Regex::new(&format!("^{}(/|$)", regex::escape(src)))
                    .map_err(|e| BridgeError::InvalidArgument(format!("无效的路径: {}", e)))?;
                let replacement = format!("{}${{1}}", dest.replace('$', "$$"));
                let mut moved = 0usize;
                for entry in entries.iter_mut() {
                    if pattern.is_match(&entry.path) {
                        entry.path = pattern
                            .replace(&entry.path, replacement.as_str())
                            .into_owned();
                        moved += 1;
                    }
                }
                if moved == 0 {
                    return Err(BridgeError::NotFound(src.clone()));
                }
                Ok(entries)
            }
            TreeEdit::MakeDir { path, keep_sha } => {
                if entries.iter().any(|e| &e.path == path || e.is_under(path)) {
                    return Err(BridgeError::InvalidArgument(format!("目标已存在: {}", path)));
                }
                entries.push(TreeEntry::blob(format!("{}/{}", path, KEEP_FILE), keep_sha.clone()));
                Ok(entries)
            }
        }
    }
}

/// 依次应用一组改写；失败时返回出错改写的序号
pub fn apply_edits(
    mut entries: Vec<TreeEntry>,
    edits: &[TreeEdit],
) -> std::result::Result<Vec<TreeEntry>, (usize, BridgeError)> {
    for (index, edit) in edits.iter().enumerate() {
        entries = edit.apply(entries).map_err(|e| (index, e))?;
    }
    if entries.is_empty() {
        return Err((
            edits.len().saturating_sub(1),
            BridgeError::InvalidArgument("改写后的树为空".to_string()),
        ));
    }
    Ok(entries)
}

/// 事务失败的位置
#[derive(Debug)]
pub enum TransactError {
    /// 某个改写被拒绝
    Edit(usize, BridgeError),
    /// 远端调用失败
    Remote(BridgeError),
}

impl From<TransactError> for BridgeError {
    fn from(err: TransactError) -> Self {
        match err {
            TransactError::Edit(_, e) | TransactError::Remote(e) => e,
        }
    }
}

#[derive(Deserialize)]
struct TreeListing {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Serialize)]
struct NewTree<'a> {
    tree: &'a [TreeEntry],
}

#[derive(Serialize)]
struct NewCommit<'a> {
    message: &'a str,
    tree: &'a str,
    parents: [&'a str; 1],
}

#[derive(Serialize)]
struct RefUpdate<'a> {
    sha: &'a str,
    force: bool,
}

/// 某个仓库分支上的事务执行器
pub struct Transactor<'a> {
    api: &'a GithubApi,
    repo_path: String,
    branch: &'a str,
}

impl<'a> Transactor<'a> {
    pub fn new(api: &'a GithubApi, owner: &str, repo: &str, branch: &'a str) -> Self {
        Self {
            api,
            repo_path: format!(
                "/repos/{}/{}",
                urlencoding::encode(owner),
                urlencoding::encode(repo)
            ),
            branch,
        }
    }

    fn ref_path(&self) -> String {
        format!(
            "{}/git/ref/heads/{}",
            self.repo_path,
            urlencoding::encode(self.branch)
        )
    }

    pub async fn read_head(&self) -> Result<String> {
        let head: GitRef = self.api.get(&self.ref_path()).await?;
        Ok(head.object.sha)
    }

    pub async fn read_tree(&self, commit_sha: &str) -> Result<GitTree> {
        let listing: TreeListing = self
            .api
            .get(&format!(
                "{}/git/trees/{}?recursive=1",
                self.repo_path, commit_sha
            ))
            .await?;
        if listing.truncated {
            return Err(BridgeError::NotSupported(format!(
                "分支 {} 的树过大，无法完整读取",
                self.branch
            )));
        }
        // 只保留叶子条目，目录由路径隐含
        let entries = listing
            .tree
            .into_iter()
            .filter(|e| e.kind != KIND_TREE)
            .collect();
        Ok(GitTree {
            commit_sha: commit_sha.to_string(),
            entries,
        })
    }

    pub async fn create_tree(&self, entries: &[TreeEntry]) -> Result<String> {
        let created: Created = self
            .api
            .post(
                &format!("{}/git/trees", self.repo_path),
                &NewTree { tree: entries },
            )
            .await?;
        Ok(created.sha)
    }

    pub async fn create_commit(&self, message: &str, tree_sha: &str, parent: &str) -> Result<String> {
        let created: Created = self
            .api
            .post(
                &format!("{}/git/commits", self.repo_path),
                &NewCommit {
                    message,
                    tree: tree_sha,
                    parents: [parent],
                },
            )
            .await?;
        Ok(created.sha)
    }

    pub async fn update_ref(&self, commit_sha: &str) -> Result<()> {
        let _: serde_json::Value = self
            .api
            .patch(
                &format!(
                    "{}/git/refs/heads/{}",
                    self.repo_path,
                    urlencoding::encode(self.branch)
                ),
                &RefUpdate {
                    sha: commit_sha,
                    force: true,
                },
            )
            .await?;
        Ok(())
    }

    /// 执行完整的六步事务，返回新提交
    pub async fn commit(&self, edits: &[TreeEdit], message: &str) -> std::result::Result<String, TransactError> {
        let head = self.read_head().await.map_err(TransactError::Remote)?;
        let tree = self.read_tree(&head).await.map_err(TransactError::Remote)?;
        debug!(
            "读取树: branch={}, commit={}, entries={}",
            self.branch,
            head,
            tree.entries.len()
        );
        let entries =
            apply_edits(tree.entries, edits).map_err(|(i, e)| TransactError::Edit(i, e))?;
        let tree_sha = self.create_tree(&entries).await.map_err(TransactError::Remote)?;
        let commit_sha = self
            .create_commit(message, &tree_sha, &tree.commit_sha)
            .await
            .map_err(TransactError::Remote)?;
        self.update_ref(&commit_sha).await.map_err(TransactError::Remote)?;
        info!(
            "提交完成: {} {} -> {} ({} 项改写)",
            self.repo_path,
            self.branch,
            commit_sha,
            edits.len()
        );
        Ok(commit_sha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(paths: &[&str]) -> Vec<TreeEntry> {
        paths.iter().map(|p| TreeEntry::blob(*p, format!("sha-{}", p))).collect()
    }

    fn paths(entries: &[TreeEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_remove_file_preserves_unrelated_entries() {
        let edit = TreeEdit::RemoveFile { path: "b".into() };
        let result = edit.apply(tree(&["a", "b", "c"])).unwrap();
        assert_eq!(paths(&result), vec!["a", "c"]);
        assert_eq!(result[1].sha.as_deref(), Some("sha-c"));
    }

    #[test]
    fn test_remove_file_missing_or_directory() {
        let edit = TreeEdit::RemoveFile { path: "x".into() };
        assert!(matches!(edit.apply(tree(&["a"])), Err(BridgeError::NotFound(_))));

        let edit = TreeEdit::RemoveFile { path: "dir".into() };
        assert!(matches!(
            edit.apply(tree(&["dir/a"])),
            Err(BridgeError::IsDirectory(_))
        ));
    }

    #[test]
    fn test_add_blob_replaces_in_place() {
        let edit = TreeEdit::AddBlob {
            path: "b".into(),
            sha: "new".into(),
        };
        let result = edit.apply(tree(&["a", "b", "c"])).unwrap();
        assert_eq!(paths(&result), vec!["a", "b", "c"]);
        assert_eq!(result[1].sha.as_deref(), Some("new"));

        let edit = TreeEdit::AddBlob {
            path: "d/e".into(),
            sha: "new".into(),
        };
        let result = edit.apply(tree(&["a"])).unwrap();
        assert_eq!(paths(&result), vec!["a", "d/e"]);
    }

    #[test]
    fn test_remove_prefix_does_not_touch_siblings() {
        let edit = TreeEdit::RemovePrefix { prefix: "doc".into() };
        let result = edit
            .apply(tree(&["doc/a", "doc/sub/b", "docs/c", "readme"]))
            .unwrap();
        assert_eq!(paths(&result), vec!["docs/c", "readme"]);
    }

    #[test]
    fn test_move_rewrites_prefix_only() {
        let edit = TreeEdit::Move {
            src: "src".into(),
            dest: "lib".into(),
        };
        let result = edit.apply(tree(&["src/a.rs", "src/x/b.rs", "srcfile"])).unwrap();
        assert_eq!(paths(&result), vec!["lib/a.rs", "lib/x/b.rs", "srcfile"]);

        let edit = TreeEdit::Move {
            src: "a.txt".into(),
            dest: "b.txt".into(),
        };
        let result = edit.apply(tree(&["a.txt", "a.txt.bak"])).unwrap();
        assert_eq!(paths(&result), vec!["b.txt", "a.txt.bak"]);
    }

    #[test]
    fn test_move_with_regex_characters() {
        let edit = TreeEdit::Move {
            src: "a+b(1)".into(),
            dest: "c$1".into(),
        };
        let result = edit.apply(tree(&["a+b(1)/f", "aab1/f"])).unwrap();
        assert_eq!(paths(&result), vec!["c$1/f", "aab1/f"]);
    }

    #[test]
    fn test_move_conflicts() {
        let edit = TreeEdit::Move {
            src: "a".into(),
            dest: "b".into(),
        };
        assert!(matches!(
            edit.apply(tree(&["a", "b"])),
            Err(BridgeError::InvalidArgument(_))
        ));
        assert!(matches!(edit.apply(tree(&["c"])), Err(BridgeError::NotFound(_))));
    }

    #[test]
    fn test_make_dir() {
        let edit = TreeEdit::MakeDir {
            path: "new".into(),
            keep_sha: "empty".into(),
        };
        let result = edit.apply(tree(&["a"])).unwrap();
        assert_eq!(paths(&result), vec!["a", "new/.gitkeep"]);
        assert!(matches!(
            edit.apply(tree(&["new/x"])),
            Err(BridgeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_apply_edits_reports_failing_index() {
        let edits = vec![
            TreeEdit::RemoveFile { path: "a".into() },
            TreeEdit::RemoveFile { path: "zzz".into() },
        ];
        let (index, err) = apply_edits(tree(&["a", "b"]), &edits).unwrap_err();
        assert_eq!(index, 1);
        assert!(matches!(err, BridgeError::NotFound(_)));
    }

    #[test]
    fn test_apply_edits_rejects_empty_tree() {
        let edits = vec![TreeEdit::RemoveFile { path: "a".into() }];
        let (_, err) = apply_edits(tree(&["a"]), &edits).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
    }

    #[test]
    fn test_entry_serialization_skips_missing_fields() {
        let json = serde_json::to_value(TreeEntry::blob("a", "s1")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"path": "a", "mode": "100644", "type": "blob", "sha": "s1"})
        );
    }
}
