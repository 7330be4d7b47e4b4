use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use super::error::{GitError, GitStep};

/// A single file to land on `branch` of `repo_url`.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub repo_url: String,
    pub branch: String,
    /// Repository-relative path of the file to write.
    pub target_path: String,
    pub content: String,
    pub commit_message: String,
}

/// Successful publish results. Failures travel as [`GitError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PublishOutcome {
    /// The file already had this content; nothing was committed.
    NoChange,
    /// A commit was created and accepted by the remote.
    Pushed { commit: String },
}

impl PublishOutcome {
    pub fn message(&self) -> String {
        match self {
            Self::NoChange => "No changes detected, nothing to push".into(),
            Self::Pushed { commit } => format!("Pushed commit {commit}"),
        }
    }
}

/// Clone → write → commit → push, in a throwaway workspace per call.
#[derive(Debug, Clone)]
pub struct GitPublisher {
    work_dir: PathBuf,
    author_name: String,
    author_email: String,
}

impl GitPublisher {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        author_name: impl Into<String>,
        author_email: impl Into<String>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            author_name: author_name.into(),
            author_email: author_email.into(),
        }
    }

    /// Publish `req.content` to `req.target_path`.
    ///
    /// The workspace is removed on every exit path. At most one push attempt
    /// is made; a rejected push comes back as [`GitError::PushRejected`].
    #[tracing::instrument(
        skip(self, req),
        fields(repo = %req.repo_url, branch = %req.branch, target = %req.target_path),
        err
    )]
    pub async fn publish(&self, req: &PublishRequest) -> Result<PublishOutcome, GitError> {
        let target = check_target_path(&req.target_path)?;

        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(GitError::Workspace)?;
        let workspace = tempfile::Builder::new()
            .prefix("publish-")
            .tempdir_in(&self.work_dir)
            .map_err(GitError::Workspace)?;

        let result = self
            .publish_in(&workspace.path().join("repo"), &target, req)
            .await;

        // Dropping the guard would also remove it; closing surfaces the error.
        let workspace_path = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            tracing::warn!(
                error = %e,
                path = %workspace_path.display(),
                "failed to remove publish workspace"
            );
        }

        result
    }

    async fn publish_in(
        &self,
        repo: &Path,
        target: &Path,
        req: &PublishRequest,
    ) -> Result<PublishOutcome, GitError> {
        self.checkout(repo, req).await?;
        self.commit_and_push(repo, target, req).await
    }

    /// Shallow clone of `req.branch` into `repo`.
    async fn checkout(&self, repo: &Path, req: &PublishRequest) -> Result<(), GitError> {
        let clone = git(
            None,
            GitStep::Clone,
            [
                OsStr::new("clone"),
                OsStr::new("--depth"),
                OsStr::new("1"),
                OsStr::new("--branch"),
                OsStr::new(&req.branch),
                OsStr::new("--"),
                OsStr::new(&req.repo_url),
                repo.as_os_str(),
            ],
        )
        .await;
        match clone {
            Ok(_) => Ok(()),
            Err(GitError::Command { stderr, .. }) => Err(GitError::Clone(stderr)),
            Err(e) => Err(e),
        }
    }

    /// Write, stage, commit and push in an existing clone.
    async fn commit_and_push(
        &self,
        repo: &Path,
        target: &Path,
        req: &PublishRequest,
    ) -> Result<PublishOutcome, GitError> {
        // WRITTEN
        let file = repo.join(target);
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(GitError::Workspace)?;
        }
        tokio::fs::write(&file, &req.content)
            .await
            .map_err(GitError::Workspace)?;

        // Identity is local to this clone.
        git(
            Some(repo),
            GitStep::Config,
            ["config", "user.name", self.author_name.as_str()],
        )
        .await?;
        git(
            Some(repo),
            GitStep::Config,
            ["config", "user.email", self.author_email.as_str()],
        )
        .await?;

        // STAGED
        git(
            Some(repo),
            GitStep::Add,
            [OsStr::new("add"), OsStr::new("--"), target.as_os_str()],
        )
        .await?;

        let status = git(Some(repo), GitStep::Status, ["status", "--porcelain"]).await?;
        if status.trim().is_empty() {
            tracing::info!("content unchanged, skipping commit");
            return Ok(PublishOutcome::NoChange);
        }

        // COMMITTED
        git(
            Some(repo),
            GitStep::Commit,
            ["commit", "-m", req.commit_message.as_str()],
        )
        .await?;
        let commit = git(Some(repo), GitStep::RevParse, ["rev-parse", "HEAD"])
            .await?
            .trim()
            .to_owned();

        // PUSHED
        match git(
            Some(repo),
            GitStep::Push,
            ["push", "origin", req.branch.as_str()],
        )
        .await
        {
            Ok(_) => {}
            Err(GitError::Command { stderr, .. }) if is_push_rejection(&stderr) => {
                return Err(GitError::PushRejected(stderr));
            }
            Err(e) => return Err(e),
        }

        tracing::info!(%commit, "published");
        Ok(PublishOutcome::Pushed { commit })
    }
}

/// Accept only plain relative paths that stay inside the clone.
pub fn check_target_path(path: &str) -> Result<PathBuf, GitError> {
    if path.is_empty() || path.contains('\0') {
        return Err(GitError::InvalidPath(format!("{path:?}")));
    }
    let candidate = Path::new(path);
    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(GitError::InvalidPath(path.to_owned())),
        }
    }
    if clean.as_os_str().is_empty() || clean.starts_with(".git") {
        return Err(GitError::InvalidPath(path.to_owned()));
    }
    Ok(clean)
}

/// Remote refused the update because its branch moved on.
fn is_push_rejection(stderr: &str) -> bool {
    stderr.contains("[rejected]")
        || stderr.contains("non-fast-forward")
        || stderr.contains("fetch first")
}

/// Run git and return stdout. Prompts are disabled so missing credentials
/// fail instead of hanging.
async fn git<I, S>(dir: Option<&Path>, step: GitStep, args: I) -> Result<String, GitError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = tokio::process::Command::new("git");
    if let Some(dir) = dir {
        cmd.arg("-C").arg(dir);
    }
    let output = cmd
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| GitError::Spawn { step, source })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        return Err(GitError::Command { step, stderr });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
