//! The encryption gateway used by stores for sensitive fields.

use std::sync::Arc;

use resilience::ServiceClient;

use crate::cipher::FieldCipher;
use crate::error::Result;
use crate::key::fetch_key;

/// Whether the gateway is actually encrypting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayMode {
    /// Fields are sealed under the named key.
    Encrypting { key_name: String },
    /// No key was available; fields pass through unchanged.
    Passthrough { reason: String },
}

impl GatewayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayMode::Encrypting { .. } => "encrypting",
            GatewayMode::Passthrough { .. } => "passthrough",
        }
    }
}

impl std::fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayMode::Encrypting { key_name } => write!(f, "encrypting with key '{key_name}'"),
            GatewayMode::Passthrough { reason } => write!(f, "passthrough ({reason})"),
        }
    }
}

/// Encrypts and decrypts sensitive field values.
///
/// Constructed once at startup and shared; cloning shares the key.
#[derive(Debug, Clone)]
pub struct EncryptionGateway {
    cipher: Option<Arc<FieldCipher>>,
    mode: GatewayMode,
}

impl EncryptionGateway {
    /// Fetches `key_name` from the key service.
    ///
    /// Never fails: if the key cannot be obtained the gateway starts in
    /// passthrough mode and logs why.
    pub async fn initialize(client: &ServiceClient, key_name: &str) -> Self {
        let fetched = fetch_key(client, key_name).await.and_then(|key| {
            FieldCipher::from_base64(&key.material).map(|cipher| (key.key_name, cipher))
        });

        match fetched {
            Ok((key_name, cipher)) => Self::encrypting(key_name, cipher),
            Err(err) => Self::passthrough(format!("key '{key_name}' unavailable: {err}")),
        }
    }

    /// Uses locally configured key material (`ENCRYPTION_KEY`).
    pub fn from_key_material(key_name: impl Into<String>, material: &str) -> Result<Self> {
        let cipher = FieldCipher::from_base64(material)?;
        Ok(Self::encrypting(key_name.into(), cipher))
    }

    /// Uses a local key when configured, otherwise fetches from the key service.
    ///
    /// Unusable local material puts the gateway in passthrough rather than
    /// silently falling back to a different key.
    pub async fn from_config(
        local_material: Option<&str>,
        client: &ServiceClient,
        key_name: &str,
    ) -> Self {
        match local_material {
            Some(material) => Self::from_key_material(key_name, material).unwrap_or_else(|err| {
                Self::passthrough(format!("configured key rejected: {err}"))
            }),
            None => Self::initialize(client, key_name).await,
        }
    }

    /// A gateway that does not encrypt.
    pub fn passthrough(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::warn!(%reason, "encryption gateway running in passthrough mode");
        metrics::gauge!("encryption_gateway_passthrough").set(1.0);
        Self {
            cipher: None,
            mode: GatewayMode::Passthrough { reason },
        }
    }

    fn encrypting(key_name: String, cipher: FieldCipher) -> Self {
        tracing::info!(key_name = %key_name, "encryption gateway ready");
        metrics::gauge!("encryption_gateway_passthrough").set(0.0);
        Self {
            cipher: Some(Arc::new(cipher)),
            mode: GatewayMode::Encrypting { key_name },
        }
    }

    pub fn mode(&self) -> &GatewayMode {
        &self.mode
    }

    pub fn is_encrypting(&self) -> bool {
        self.cipher.is_some()
    }

    /// Seals a value; returns it unchanged in passthrough mode.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        match &self.cipher {
            Some(cipher) => cipher.encrypt_str(plaintext),
            None => Ok(plaintext.to_string()),
        }
    }

    /// Opens a sealed value; returns it unchanged in passthrough mode.
    pub fn decrypt(&self, sealed: &str) -> Result<String> {
        match &self.cipher {
            Some(cipher) => cipher.decrypt_str(sealed).inspect_err(|err| {
                metrics::counter!("field_decryption_failures_total").increment(1);
                tracing::warn!(error = %err, "field decryption failed");
            }),
            None => Ok(sealed.to_string()),
        }
    }

    /// Seals an optional field.
    pub fn seal(&self, value: Option<&str>) -> Result<Option<String>> {
        value.map(|v| self.encrypt(v)).transpose()
    }

    /// Opens an optional field.
    pub fn open(&self, value: Option<&str>) -> Result<Option<String>> {
        value.map(|v| self.decrypt(v)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    use super::*;
    use crate::error::SecurityError;

    fn key_b64(byte: u8) -> String {
        STANDARD.encode([byte; 32])
    }

    fn gateway(byte: u8) -> EncryptionGateway {
        EncryptionGateway::from_key_material("test", &key_b64(byte)).unwrap()
    }

    #[test]
    fn test_round_trip_including_empty_and_unicode() {
        let g = gateway(9);
        for text in ["", "plain", "Ünïcödé – ✓", "👩‍💻 multi\nline"] {
            let sealed = g.encrypt(text).unwrap();
            assert_ne!(sealed, text);
            assert_eq!(g.decrypt(&sealed).unwrap(), text);
        }
    }

    #[test]
    fn test_ciphertext_opens_in_another_instance_with_same_key() {
        let sealed = gateway(4).encrypt("shared").unwrap();
        assert_eq!(gateway(4).decrypt(&sealed).unwrap(), "shared");
    }

    #[test]
    fn test_passthrough_is_identity_and_observable() {
        let g = EncryptionGateway::passthrough("no key");
        assert!(!g.is_encrypting());
        assert_eq!(g.mode().as_str(), "passthrough");
        assert_eq!(g.encrypt("visible").unwrap(), "visible");
        assert_eq!(g.decrypt("visible").unwrap(), "visible");
    }

    #[test]
    fn test_encrypting_mode_reports_key_name() {
        let g = gateway(1);
        assert!(g.is_encrypting());
        assert_eq!(
            g.mode(),
            &GatewayMode::Encrypting {
                key_name: "test".to_string()
            }
        );
    }

    #[test]
    fn test_decrypting_plaintext_fails() {
        assert!(matches!(
            gateway(1).decrypt("not sealed"),
            Err(SecurityError::Decryption(_))
        ));
    }

    #[test]
    fn test_optional_fields() {
        let g = gateway(2);
        assert_eq!(g.seal(None).unwrap(), None);
        let sealed = g.seal(Some("desc")).unwrap();
        assert_eq!(g.open(sealed.as_deref()).unwrap().as_deref(), Some("desc"));
    }

    #[test]
    fn test_invalid_local_material_is_rejected() {
        assert!(EncryptionGateway::from_key_material("k", "short").is_err());
    }
}
