//! Key acquisition from the key service.

use resilience::{ClientError, Destination, ServiceClient, ServiceRequest};
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::error::{Result, SecurityError};

/// Key material as returned by the key service.
pub struct SecureKey {
    pub key_name: String,
    pub material: Zeroizing<String>,
}

impl std::fmt::Debug for SecureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureKey")
            .field("key_name", &self.key_name)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct KeyResponse {
    #[serde(rename = "keyValue", alias = "key_value")]
    key_value: String,
}

/// Fetches `GET /keys/{name}` through the client's `keys` breaker.
#[tracing::instrument(skip(client))]
pub async fn fetch_key(client: &ServiceClient, key_name: &str) -> Result<SecureKey> {
    let response = client
        .send(ServiceRequest::get(Destination::Keys, ["keys", key_name]))
        .await
        .map_err(|e| fetch_error(key_name, e))?;

    let body: KeyResponse = response.json().map_err(|e| fetch_error(key_name, e))?;

    Ok(SecureKey {
        key_name: key_name.to_string(),
        material: Zeroizing::new(body.key_value),
    })
}

fn fetch_error(key_name: &str, err: ClientError) -> SecurityError {
    if err.is_not_found() {
        SecurityError::KeyNotFound(key_name.to_string())
    } else {
        SecurityError::KeyFetch {
            key_name: key_name.to_string(),
            source: err,
        }
    }
}
