use std::fmt;

use crate::error::{ApiError, ErrorKind, ExternalSystem};

/// Git invocation a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitStep {
    Clone,
    Config,
    Add,
    Status,
    Commit,
    Push,
    RevParse,
}

impl fmt::Display for GitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Clone => "git clone",
            Self::Config => "git config",
            Self::Add => "git add",
            Self::Status => "git status",
            Self::Commit => "git commit",
            Self::Push => "git push",
            Self::RevParse => "git rev-parse",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("invalid target path: {0}")]
    InvalidPath(String),

    #[error("publish workspace error: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("failed to run {step}: {source}")]
    Spawn {
        step: GitStep,
        #[source]
        source: std::io::Error,
    },

    #[error("git clone failed: {0}")]
    Clone(String),

    #[error("{step} failed: {stderr}")]
    Command { step: GitStep, stderr: String },

    #[error("push rejected by remote: {0}")]
    PushRejected(String),
}

impl GitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPath(_) => ErrorKind::Validation,
            Self::PushRejected(_) => ErrorKind::Conflict,
            Self::Workspace(_) | Self::Spawn { .. } | Self::Clone(_) | Self::Command { .. } => {
                ErrorKind::External(ExternalSystem::GitRemote)
            }
        }
    }
}

impl From<GitError> for ApiError {
    fn from(err: GitError) -> Self {
        Self::classified(err.kind(), err.to_string())
    }
}
