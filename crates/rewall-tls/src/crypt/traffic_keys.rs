//! Traffic key derivation: concrete AEAD key + IV from a traffic secret.

use zeroize::Zeroize;

use super::hkdf::hkdf_expand_label;
use super::CipherSuiteParams;
use crate::error::TlsError;

/// Concrete traffic keys (AEAD key + IV) derived from a traffic secret.
pub struct TrafficKeys {
    /// AEAD encryption key.
    pub key: Vec<u8>,
    /// AEAD nonce base.
    pub iv: Vec<u8>,
}

impl Drop for TrafficKeys {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

impl TrafficKeys {
    /// Derive traffic keys from a traffic secret:
    ///
    /// ```text
    /// key = HKDF-Expand-Label(secret, "key", "", key_length)
    /// iv  = HKDF-Expand-Label(secret, "iv", "", iv_length)
    /// ```
    pub fn derive(params: &CipherSuiteParams, traffic_secret: &[u8]) -> Result<Self, TlsError> {
        let key = hkdf_expand_label(params.hash, traffic_secret, b"key", b"", params.key_len)?;
        let iv = hkdf_expand_label(params.hash, traffic_secret, b"iv", b"", params.iv_len)?;
        Ok(TrafficKeys { key, iv })
    }
}
