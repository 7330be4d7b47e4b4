pub mod error;
pub mod publisher;
#[cfg(test)]
pub(crate) mod testutil;

pub use error::{GitError, GitStep};
pub use publisher::{GitPublisher, PublishOutcome, PublishRequest};

/// Commit message used for job definition updates.
pub fn job_commit_message(service_name: &str) -> String {
    format!("feat(deployment): Add/Update Nomad job for {service_name}")
}

/// Repository path of a service's job file: `<jobs_dir>/<service>.hcl`.
pub fn job_file_path(jobs_dir: &str, service_name: &str) -> String {
    let dir = jobs_dir.trim_matches('/');
    if dir.is_empty() {
        format!("{service_name}.hcl")
    } else {
        format!("{dir}/{service_name}.hcl")
    }
}
