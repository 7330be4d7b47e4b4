use serde_json::{Map, Value};
use url::Url;

use super::error::SecretsError;

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Thin client for the parts of the Vault HTTP API the publisher needs.
#[derive(Clone)]
pub struct VaultClient {
    http: reqwest::Client,
    base: Url,
    token: String,
}

impl std::fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClient")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

impl VaultClient {
    pub fn new(addr: &str, token: &str) -> Result<Self, SecretsError> {
        let mut base =
            Url::parse(addr).map_err(|e| SecretsError::InvalidAddress(format!("{addr}: {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(SecretsError::InvalidAddress(format!(
                "{addr}: scheme must be http or https"
            )));
        }
        // Url::join replaces the last segment unless the base ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            http: reqwest::Client::new(),
            base,
            token: token.to_owned(),
        })
    }

    /// `v1/<path>` under the base address. Each `/`-separated segment is
    /// percent-encoded on its own, so `%`, `?` and `#` never change the route.
    fn endpoint(&self, path: &str) -> Result<Url, SecretsError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| SecretsError::InvalidAddress(format!("{} cannot be a base", self.base)))?
            .pop_if_empty()
            .push("v1")
            .extend(path.split('/').filter(|seg| !seg.is_empty()));
        Ok(url)
    }

    /// Check the token is accepted. Anything but a 2xx is an auth failure.
    #[tracing::instrument(skip(self), err)]
    pub async fn lookup_self(&self) -> Result<(), SecretsError> {
        let resp = self
            .http
            .get(self.endpoint("auth/token/lookup-self")?)
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(|source| SecretsError::Request {
                op: "token lookup",
                source,
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(SecretsError::Unauthenticated(format!(
                "token lookup returned {}",
                resp.status().as_u16()
            )))
        }
    }

    /// Paths of all mounted secret engines, each with its trailing `/`.
    #[tracing::instrument(skip(self), err)]
    pub async fn list_mounts(&self) -> Result<Vec<String>, SecretsError> {
        let body = self
            .send_json("list mounts", self.http.get(self.endpoint("sys/mounts")?))
            .await?;

        // Newer servers nest the table under `data`; older ones return it flat
        // alongside request metadata.
        let table = body
            .get("data")
            .and_then(Value::as_object)
            .or_else(|| body.as_object());

        Ok(table
            .map(|t| {
                t.keys()
                    .filter(|k| k.ends_with('/'))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Enable a KV version 2 engine at `mount`.
    #[tracing::instrument(skip(self), err)]
    pub async fn enable_kv2(&self, mount: &str) -> Result<(), SecretsError> {
        let payload = serde_json::json!({
            "type": "kv",
            "options": { "version": "2" },
        });
        self.send_json(
            "enable mount",
            self.http
                .post(self.endpoint(&format!("sys/mounts/{mount}"))?)
                .json(&payload),
        )
        .await?;
        Ok(())
    }

    /// Whether a secret currently exists at `mount/path`.
    #[tracing::instrument(skip(self), err)]
    pub async fn kv2_exists(&self, mount: &str, path: &str) -> Result<bool, SecretsError> {
        let resp = self
            .http
            .get(self.endpoint(&format!("{mount}/data/{path}"))?)
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(|source| SecretsError::Request { op: "read", source })?;

        match resp.status() {
            status if status.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            status => Err(SecretsError::Status {
                op: "read",
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Replace the secret at `mount/path` with `data`. Returns the new version.
    #[tracing::instrument(skip(self, data), fields(keys = data.len()), err)]
    pub async fn write_kv2(
        &self,
        mount: &str,
        path: &str,
        data: &Map<String, Value>,
    ) -> Result<Option<u64>, SecretsError> {
        let payload = serde_json::json!({ "data": data });
        let body = self
            .send_json(
                "write",
                self.http
                    .post(self.endpoint(&format!("{mount}/data/{path}"))?)
                    .json(&payload),
            )
            .await?;

        Ok(body
            .get("data")
            .and_then(|d| d.get("version"))
            .and_then(Value::as_u64))
    }

    async fn send_json(
        &self,
        op: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, SecretsError> {
        let resp = request
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(|source| SecretsError::Request { op, source })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|source| SecretsError::Request { op, source })?;

        if !status.is_success() {
            return Err(SecretsError::Status {
                op,
                status: status.as_u16(),
                body: text,
            });
        }

        // 204 and other empty bodies are fine.
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| SecretsError::Status {
            op,
            status: status.as_u16(),
            body: format!("unparseable response: {e}"),
        })
    }
}
