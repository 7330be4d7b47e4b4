use serde::Deserialize;

use crate::error::{ApiError, ErrorKind};
use crate::repo_map::{self, RepositoryMap};

const JOB_TEMPLATE: &str = include_str!("../templates/nomad/job.hcl.j2");

/// Parameters of a Nomad service job, with the form defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    pub job_name: String,
    #[serde(default = "default_datacenter", alias = "datacenter_name")]
    pub datacenter: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub exposed_port: u16,
    pub container_port: u16,
    #[serde(default = "default_worker")]
    pub worker_name: String,
    #[serde(default)]
    pub vault_role: Option<String>,
    #[serde(default)]
    pub vault_path: Option<String>,
    #[serde(default = "default_cpu")]
    pub cpu: u32,
    #[serde(default = "default_memory")]
    pub memory: u32,
    #[serde(default = "default_node")]
    pub node: String,
    #[serde(default)]
    pub env: serde_json::Map<String, serde_json::Value>,
}

fn default_datacenter() -> String {
    "glynac-dc".into()
}

fn default_namespace() -> String {
    "default".into()
}

fn default_worker() -> String {
    "Worker-01".into()
}

fn default_cpu() -> u32 {
    500
}

fn default_memory() -> u32 {
    256
}

fn default_node() -> String {
    "general".into()
}

/// Deployment-wide values the template needs besides the job itself.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub registries: RepositoryMap,
    pub registry_user: Option<String>,
    pub registry_pass: Option<String>,
    pub secret_mount: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("job template render failed: {0}")]
    Template(String),

    #[error("invalid job parameters: {0}")]
    Invalid(String),
}

impl RenderError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}

impl From<RenderError> for ApiError {
    fn from(err: RenderError) -> Self {
        Self::classified(err.kind(), err.to_string())
    }
}

/// Render the Nomad job definition for `spec`.
///
/// minijinja is sandboxed; template values cannot reach the filesystem.
pub fn render_job(spec: &JobSpec, ctx: &RenderContext) -> Result<String, RenderError> {
    if spec.job_name.trim().is_empty() {
        return Err(RenderError::Invalid("job_name is required".into()));
    }
    if let Some(key) = spec.env.keys().find(|k| !is_env_key(k)) {
        return Err(RenderError::Invalid(format!(
            "env key {key:?} is not a valid variable name"
        )));
    }
    // Both land unquoted inside the secret template's Go-template string.
    if let Some(path) = spec
        .vault_path
        .as_deref()
        .filter(|p| !p.is_empty() && !is_secret_path(p))
    {
        return Err(RenderError::Invalid(format!(
            "vault_path {path:?} must be `/`-separated segments of [A-Za-z0-9_.-]"
        )));
    }
    if !is_secret_path(&ctx.secret_mount) {
        return Err(RenderError::Invalid(format!(
            "secret mount {:?} is not a plain path",
            ctx.secret_mount
        )));
    }

    let registry_name = repo_map::resolve(&spec.job_name, &ctx.registries);

    let mut env = minijinja::Environment::new();
    env.add_filter("hcl", hcl_escape);
    env.add_template("job", JOB_TEMPLATE)
        .map_err(|e| RenderError::Template(e.to_string()))?;
    let tmpl = env
        .get_template("job")
        .map_err(|e| RenderError::Template(e.to_string()))?;

    tmpl.render(minijinja::context! {
        job_name => &spec.job_name,
        datacenter => &spec.datacenter,
        namespace => &spec.namespace,
        exposed_port => spec.exposed_port,
        container_port => spec.container_port,
        worker_name => &spec.worker_name,
        vault_role => &spec.vault_role,
        vault_path => &spec.vault_path,
        cpu => spec.cpu,
        memory => spec.memory,
        node => &spec.node,
        env => &spec.env,
        registry_name => registry_name,
        registry_user => &ctx.registry_user,
        registry_pass => ctx.registry_pass.as_deref().unwrap_or_default(),
        secret_mount => &ctx.secret_mount,
    })
    .map_err(|e| RenderError::Template(e.to_string()))
}

/// Escape a value for the inside of a double-quoted HCL string, including
/// `${` and `%{` so user text never becomes an interpolation or directive.
fn hcl_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

fn is_secret_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('/').all(|seg| {
            !seg.is_empty()
                && seg != "."
                && seg != ".."
                && seg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        })
}

fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
