//! Encryption of sensitive fields crossing the persistence boundary.
//!
//! The [`EncryptionGateway`] seals values with AES-256-GCM under a key fetched
//! once from the key service. When no key can be obtained it runs in
//! passthrough mode and says so through [`EncryptionGateway::mode`]; it never
//! invents a key of its own, since ciphertext under a process-local key could
//! not be read by any other instance.

pub mod cipher;
pub mod error;
pub mod gateway;
pub mod key;

pub use cipher::FieldCipher;
pub use error::{Result, SecurityError};
pub use gateway::{EncryptionGateway, GatewayMode};
pub use key::{SecureKey, fetch_key};
