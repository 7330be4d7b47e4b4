use serde_json::{Map, Value};

use super::client::VaultClient;
use super::error::SecretsError;

/// Writes service secret bundles into a KV v2 engine.
///
/// Only obtainable through [`SecretPublisher::connect`], so every instance
/// has already proven its token is accepted.
#[derive(Debug, Clone)]
pub struct SecretPublisher {
    client: VaultClient,
}

/// Result of a successful write.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SecretWrite {
    pub mount: String,
    pub path: String,
    pub keys: usize,
    pub version: Option<u64>,
}

impl SecretPublisher {
    /// Authenticate against the store before anything else is attempted.
    pub async fn connect(client: VaultClient) -> Result<Self, SecretsError> {
        client.lookup_self().await?;
        Ok(Self { client })
    }

    /// Enable a versioned KV engine at `mount` unless one is already there.
    #[tracing::instrument(skip(self), err)]
    pub async fn ensure_mount(&self, mount: &str) -> Result<bool, SecretsError> {
        let mount = clean_path(mount)?;
        let mounts = self.client.list_mounts().await?;
        if mounts.iter().any(|m| m == &format!("{mount}/")) {
            return Ok(false);
        }

        self.client.enable_kv2(&mount).await?;
        tracing::info!(%mount, "kv-v2 engine enabled");
        Ok(true)
    }

    /// Whether a secret already exists at `mount/path`.
    pub async fn secret_exists(&self, mount: &str, path: &str) -> Result<bool, SecretsError> {
        let mount = clean_path(mount)?;
        let path = clean_path(path)?;
        self.client.kv2_exists(&mount, &path).await
    }

    /// Replace the secret at `mount/path` with `data`.
    ///
    /// `data` must be a non-empty object of scalar values; anything else is
    /// rejected before the store is contacted.
    #[tracing::instrument(skip(self, data), err)]
    pub async fn write_secret(
        &self,
        mount: &str,
        path: &str,
        data: &Value,
    ) -> Result<SecretWrite, SecretsError> {
        let map = validate_flat_map(data)?;
        let mount = clean_path(mount)?;
        let path = clean_path(path)?;

        let version = self.client.write_kv2(&mount, &path, map).await?;
        tracing::info!(%mount, %path, keys = map.len(), ?version, "secret written");

        Ok(SecretWrite {
            mount,
            path,
            keys: map.len(),
            version,
        })
    }
}

/// Require a non-empty JSON object whose values are all scalars.
pub fn validate_flat_map(data: &Value) -> Result<&Map<String, Value>, SecretsError> {
    let map = data
        .as_object()
        .ok_or_else(|| SecretsError::Validation("secret data must be a key/value map".into()))?;

    if map.is_empty() {
        return Err(SecretsError::Validation("secret data must not be empty".into()));
    }

    if let Some((key, _)) = map
        .iter()
        .find(|(_, v)| matches!(v, Value::Object(_) | Value::Array(_)))
    {
        return Err(SecretsError::Validation(format!(
            "secret value for {key:?} must be a scalar"
        )));
    }

    Ok(map)
}

/// Trim surrounding slashes; reject empty, `.` and `..` segments and any
/// character that carries meaning in a URL (`%`, `?`, `#`, `\`).
pub fn clean_path(path: &str) -> Result<String, SecretsError> {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(SecretsError::Validation("secret path must not be empty".into()));
    }
    if trimmed.chars().any(|c| matches!(c, '%' | '?' | '#' | '\\') || c.is_control()) {
        return Err(SecretsError::Validation(format!(
            "secret path {path:?} contains a reserved character"
        )));
    }
    if trimmed
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(SecretsError::Validation(format!(
            "secret path {path:?} contains an invalid segment"
        )));
    }
    Ok(trimmed.to_owned())
}
