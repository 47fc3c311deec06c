//! TLS AEAD cipher abstraction.
//!
//! Wraps AES-GCM and ChaCha20-Poly1305 behind a common trait.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::ChaCha20Poly1305;

use super::CipherSuite;
use crate::error::TlsError;

/// Trait for record-layer AEAD operations.
pub trait TlsAead: Send + Sync {
    /// Encrypt plaintext with AEAD. Returns `ciphertext || tag`.
    fn seal(&self, nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, TlsError>;

    /// Decrypt `ciphertext || tag`. Returns plaintext.
    fn open(&self, nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, TlsError>;

    /// Ciphertext expansion (tag length) in bytes.
    fn overhead(&self) -> usize;
}

macro_rules! impl_aead {
    ($name:ident, $cipher:ty, $key_len:expr) => {
        pub struct $name {
            inner: $cipher,
        }

        impl $name {
            pub fn new(key: &[u8]) -> Result<Self, TlsError> {
                if key.len() != $key_len {
                    return Err(TlsError::Crypto(format!(
                        "invalid key length {} (want {})",
                        key.len(),
                        $key_len
                    )));
                }
                let inner = <$cipher>::new_from_slice(key)
                    .map_err(|_| TlsError::Crypto("aead key setup failed".into()))?;
                Ok(Self { inner })
            }
        }

        impl TlsAead for $name {
            fn seal(
                &self,
                nonce: &[u8],
                aad: &[u8],
                plaintext: &[u8],
            ) -> Result<Vec<u8>, TlsError> {
                if nonce.len() != 12 {
                    return Err(TlsError::Crypto("invalid nonce length".into()));
                }
                self.inner
                    .encrypt(nonce.into(), Payload { msg: plaintext, aad })
                    .map_err(|_| TlsError::Crypto("aead seal failed".into()))
            }

            fn open(
                &self,
                nonce: &[u8],
                aad: &[u8],
                ciphertext: &[u8],
            ) -> Result<Vec<u8>, TlsError> {
                if nonce.len() != 12 {
                    return Err(TlsError::Crypto("invalid nonce length".into()));
                }
                self.inner
                    .decrypt(nonce.into(), Payload { msg: ciphertext, aad })
                    .map_err(|_| TlsError::Decrypt("aead open failed".into()))
            }

            fn overhead(&self) -> usize {
                16
            }
        }
    };
}

impl_aead!(Aes128GcmAead, Aes128Gcm, 16);
impl_aead!(Aes256GcmAead, Aes256Gcm, 32);
impl_aead!(ChaCha20Poly1305Aead, ChaCha20Poly1305, 32);

/// Create a [`TlsAead`] instance for the given cipher suite and key.
pub fn create_aead(suite: CipherSuite, key: &[u8]) -> Result<Box<dyn TlsAead>, TlsError> {
    match suite {
        CipherSuite::TLS_AES_128_GCM_SHA256 => Ok(Box::new(Aes128GcmAead::new(key)?)),
        CipherSuite::TLS_AES_256_GCM_SHA384 => Ok(Box::new(Aes256GcmAead::new(key)?)),
        CipherSuite::TLS_CHACHA20_POLY1305_SHA256 => Ok(Box::new(ChaCha20Poly1305Aead::new(key)?)),
        _ => Err(TlsError::Protocol(format!(
            "unsupported cipher suite {:04x}",
            suite.0
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_all_suites() {
        let cases = [
            (CipherSuite::TLS_AES_128_GCM_SHA256, 16usize),
            (CipherSuite::TLS_AES_256_GCM_SHA384, 32),
            (CipherSuite::TLS_CHACHA20_POLY1305_SHA256, 32),
        ];
        for (suite, key_len) in cases {
            let key = vec![0x42u8; key_len];
            let nonce = [0x01u8; 12];
            let aead = create_aead(suite, &key).unwrap();

            let ct = aead.seal(&nonce, b"", b"hello record layer").unwrap();
            assert_eq!(ct.len(), 18 + aead.overhead());

            let pt = aead.open(&nonce, b"", &ct).unwrap();
            assert_eq!(pt, b"hello record layer");
        }
    }

    #[test]
    fn test_tamper_detected() {
        let aead = create_aead(CipherSuite::TLS_AES_128_GCM_SHA256, &[0x11; 16]).unwrap();
        let nonce = [0u8; 12];
        let mut ct = aead.seal(&nonce, b"", b"secret").unwrap();
        ct[0] ^= 0x01;
        assert!(matches!(
            aead.open(&nonce, b"", &ct),
            Err(TlsError::Decrypt(_))
        ));
    }

    #[test]
    fn test_wrong_key_length() {
        assert!(create_aead(CipherSuite::TLS_AES_128_GCM_SHA256, &[0; 32]).is_err());
        assert!(create_aead(CipherSuite::TLS_AES_256_GCM_SHA384, &[0; 16]).is_err());
    }

    #[test]
    fn test_nonce_sensitivity() {
        let aead = create_aead(CipherSuite::TLS_AES_128_GCM_SHA256, &[0x11; 16]).unwrap();
        let ct = aead.seal(&[0u8; 12], b"", b"data").unwrap();
        assert!(aead.open(&[1u8; 12], b"", &ct).is_err());
    }
}
