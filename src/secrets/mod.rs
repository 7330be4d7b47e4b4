pub mod client;
pub mod error;
pub mod publisher;

use serde::Deserialize;
use serde_json::Value;

pub use client::VaultClient;
pub use error::SecretsError;
pub use publisher::{SecretPublisher, SecretWrite};

/// A secret bundle destined for one path under the shared mount.
#[derive(Debug, Clone, Deserialize)]
pub struct SecretRequest {
    pub path: String,
    #[serde(default)]
    pub env: Value,
}

impl SecretRequest {
    /// Parse the YAML form operators paste into the form:
    ///
    /// ```yaml
    /// vault_path: redtail/app
    /// env:
    ///   API_KEY: abc
    /// ```
    pub fn from_yaml(raw: &str) -> Result<Self, SecretsError> {
        let doc: serde_yaml::Value = serde_yaml::from_str(raw)
            .map_err(|e| SecretsError::Validation(format!("vault_yaml is not valid YAML: {e}")))?;

        let serde_yaml::Value::Mapping(doc) = doc else {
            return Err(SecretsError::Validation("vault_yaml must be a mapping".into()));
        };

        let path = doc
            .get("vault_path")
            .and_then(serde_yaml::Value::as_str)
            .ok_or_else(|| SecretsError::Validation("vault_yaml.vault_path is required".into()))?
            .to_owned();

        let env = match doc.get("env") {
            None | Some(serde_yaml::Value::Null) => Value::Object(serde_json::Map::new()),
            Some(env @ serde_yaml::Value::Mapping(_)) => serde_json::to_value(env)
                .map_err(|e| SecretsError::Validation(format!("env is not a flat map: {e}")))?,
            Some(_) => return Err(SecretsError::Validation("env must be a dictionary".into())),
        };

        Ok(Self { path, env })
    }
}
