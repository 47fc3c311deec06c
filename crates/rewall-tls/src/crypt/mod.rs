//! Cryptographic identifiers and parameters for the TLS core.
//!
//! Primitive operations (AEAD, hashing, key agreement, signatures) live in
//! the submodules and are backed by external crates; pairing operations for
//! the reverse-firewall group enter through the [`kx::PairingGroup`] trait.

pub mod aead;
pub mod hkdf;
pub mod key_schedule;
pub mod kx;
pub mod traffic_keys;
pub mod transcript;

use sha2::Digest;

use crate::error::TlsError;

/// TLS cipher suite identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CipherSuite(pub u16);

impl CipherSuite {
    pub const TLS_AES_128_GCM_SHA256: Self = Self(0x1301);
    pub const TLS_AES_256_GCM_SHA384: Self = Self(0x1302);
    pub const TLS_CHACHA20_POLY1305_SHA256: Self = Self(0x1303);
}

/// Hash algorithm negotiated with the cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Sha256,
    Sha384,
}

impl HashAlg {
    /// Digest output size in bytes.
    pub fn len(&self) -> usize {
        match self {
            HashAlg::Sha256 => 32,
            HashAlg::Sha384 => 48,
        }
    }

    /// One-shot digest.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlg::Sha256 => sha2::Sha256::digest(data).to_vec(),
            HashAlg::Sha384 => sha2::Sha384::digest(data).to_vec(),
        }
    }
}

/// Parameters associated with a TLS 1.3 cipher suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherSuiteParams {
    /// The cipher suite identifier.
    pub suite: CipherSuite,
    /// Hash used by the key schedule and transcript.
    pub hash: HashAlg,
    /// AEAD key length in bytes.
    pub key_len: usize,
    /// AEAD IV/nonce length in bytes (always 12).
    pub iv_len: usize,
    /// AEAD tag length in bytes (always 16).
    pub tag_len: usize,
}

impl CipherSuiteParams {
    /// Look up parameters for a supported TLS 1.3 cipher suite.
    pub fn from_suite(suite: CipherSuite) -> Result<Self, TlsError> {
        match suite {
            CipherSuite::TLS_AES_128_GCM_SHA256 => Ok(Self {
                suite,
                hash: HashAlg::Sha256,
                key_len: 16,
                iv_len: 12,
                tag_len: 16,
            }),
            CipherSuite::TLS_AES_256_GCM_SHA384 => Ok(Self {
                suite,
                hash: HashAlg::Sha384,
                key_len: 32,
                iv_len: 12,
                tag_len: 16,
            }),
            CipherSuite::TLS_CHACHA20_POLY1305_SHA256 => Ok(Self {
                suite,
                hash: HashAlg::Sha256,
                key_len: 32,
                iv_len: 12,
                tag_len: 16,
            }),
            _ => Err(TlsError::Protocol(format!(
                "unsupported cipher suite {:04x}",
                suite.0
            ))),
        }
    }

    pub fn hash_len(&self) -> usize {
        self.hash.len()
    }
}

/// TLS named group identifiers for key exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamedGroup(pub u16);

impl NamedGroup {
    pub const SECP256R1: Self = Self(0x0017);
    pub const X25519: Self = Self(0x001d);
    /// Pairing-friendly group used by the reverse-firewall construction.
    /// Private-use codepoint; the group arithmetic itself is external.
    pub const BN256: Self = Self(0xfe20);
}

/// TLS signature scheme identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureScheme(pub u16);

impl SignatureScheme {
    pub const ECDSA_SECP256R1_SHA256: Self = Self(0x0403);
    pub const ED25519: Self = Self(0x0807);
}

/// PSK key exchange modes (RFC 8446 Section 4.2.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PskKeyExchangeMode {
    PskKe = 0,
    PskDheKe = 1,
}

impl PskKeyExchangeMode {
    pub fn from_u8(v: u8) -> Result<Self, TlsError> {
        match v {
            0 => Ok(PskKeyExchangeMode::PskKe),
            1 => Ok(PskKeyExchangeMode::PskDheKe),
            _ => Err(TlsError::Decode(format!("unknown PSK mode {v}"))),
        }
    }
}
