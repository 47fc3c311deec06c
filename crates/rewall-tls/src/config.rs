//! Connection configuration.
//!
//! One `Config` may be shared across many connections (wrap it in an
//! `Arc`). Its mutable interior is exactly the PSK cache and the lazily
//! generated default server certificate, both behind reader/writer locks
//! held only for the duration of a single get or put.

use std::sync::{Arc, RwLock};

use crate::cert::{generate_self_signed, Certificate};
use crate::crypt::kx::PairingGroup;
use crate::crypt::{CipherSuite, NamedGroup, PskKeyExchangeMode, SignatureScheme};
use crate::error::TlsError;
use crate::handshake::messages::CertificateEntry;
use crate::psk::PskStore;

/// Application hook for validating the peer's certificate chain.
pub type AuthCertificateHook = dyn Fn(&[CertificateEntry]) -> Result<(), TlsError> + Send + Sync;

/// Negotiated connection parameters, set monotonically during the handshake
/// and frozen once connected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub using_psk: bool,
    pub using_dh: bool,
    pub using_early_data: bool,
    pub using_client_auth: bool,
    /// The client offered 0-RTT data in its first flight.
    pub client_sending_early_data: bool,
    pub server_name: Option<String>,
    pub cipher_suite: Option<CipherSuite>,
    pub next_proto: Option<String>,
}

/// Configuration for a TLS client or server endpoint. Client and server
/// settings differ, but they share one struct.
pub struct Config {
    // Client fields
    pub server_name: Option<String>,

    // Server fields
    pub send_session_tickets: bool,
    pub ticket_lifetime: u32,
    pub ticket_len: usize,
    pub early_data_lifetime: u32,
    pub allow_early_data: bool,
    pub require_cookie: bool,
    pub require_client_auth: bool,

    // Shared fields
    pub certificates: Vec<Arc<Certificate>>,
    pub auth_certificate: Option<Arc<AuthCertificateHook>>,
    pub insecure_skip_verify: bool,
    pub cipher_suites: Vec<CipherSuite>,
    pub groups: Vec<NamedGroup>,
    pub signature_schemes: Vec<SignatureScheme>,
    pub next_protos: Vec<String>,
    pub psk_modes: Vec<PskKeyExchangeMode>,
    pub psks: Arc<RwLock<PskStore>>,
    pub non_blocking: bool,
    /// Escape hatch for test vectors that carry a non-0x0301 record version.
    pub allow_wrong_version_number: bool,
    /// Provider for the BN256 pairing group, when offered.
    pub pairing_group: Option<Arc<dyn PairingGroup>>,

    generated_certificate: RwLock<Option<Arc<Certificate>>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: None,
            send_session_tickets: false,
            ticket_lifetime: 0,
            ticket_len: 0,
            early_data_lifetime: 0,
            allow_early_data: false,
            require_cookie: false,
            require_client_auth: false,
            certificates: Vec::new(),
            auth_certificate: None,
            insecure_skip_verify: false,
            cipher_suites: Vec::new(),
            groups: Vec::new(),
            signature_schemes: Vec::new(),
            next_protos: Vec::new(),
            psk_modes: Vec::new(),
            psks: Arc::new(RwLock::new(PskStore::new())),
            non_blocking: false,
            allow_wrong_version_number: false,
            pairing_group: None,
            generated_certificate: RwLock::new(None),
        }
    }
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let generated = self
            .generated_certificate
            .read()
            .map(|g| g.clone())
            .unwrap_or(None);
        Self {
            server_name: self.server_name.clone(),
            send_session_tickets: self.send_session_tickets,
            ticket_lifetime: self.ticket_lifetime,
            ticket_len: self.ticket_len,
            early_data_lifetime: self.early_data_lifetime,
            allow_early_data: self.allow_early_data,
            require_cookie: self.require_cookie,
            require_client_auth: self.require_client_auth,
            certificates: self.certificates.clone(),
            auth_certificate: self.auth_certificate.clone(),
            insecure_skip_verify: self.insecure_skip_verify,
            cipher_suites: self.cipher_suites.clone(),
            groups: self.groups.clone(),
            signature_schemes: self.signature_schemes.clone(),
            next_protos: self.next_protos.clone(),
            psk_modes: self.psk_modes.clone(),
            psks: self.psks.clone(),
            non_blocking: self.non_blocking,
            allow_wrong_version_number: self.allow_wrong_version_number,
            pairing_group: self.pairing_group.clone(),
            generated_certificate: RwLock::new(generated),
        }
    }
}

const DEFAULT_TICKET_LEN: usize = 16;

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn effective_cipher_suites(&self) -> Vec<CipherSuite> {
        if self.cipher_suites.is_empty() {
            vec![
                CipherSuite::TLS_AES_128_GCM_SHA256,
                CipherSuite::TLS_AES_256_GCM_SHA384,
            ]
        } else {
            self.cipher_suites.clone()
        }
    }

    pub fn effective_groups(&self) -> Vec<NamedGroup> {
        if self.groups.is_empty() {
            vec![NamedGroup::X25519, NamedGroup::SECP256R1]
        } else {
            self.groups.clone()
        }
    }

    pub fn effective_signature_schemes(&self) -> Vec<SignatureScheme> {
        if self.signature_schemes.is_empty() {
            vec![
                SignatureScheme::ED25519,
                SignatureScheme::ECDSA_SECP256R1_SHA256,
            ]
        } else {
            self.signature_schemes.clone()
        }
    }

    pub fn effective_psk_modes(&self) -> Vec<PskKeyExchangeMode> {
        if self.psk_modes.is_empty() {
            vec![PskKeyExchangeMode::PskKe, PskKeyExchangeMode::PskDheKe]
        } else {
            self.psk_modes.clone()
        }
    }

    pub fn effective_ticket_len(&self) -> usize {
        if self.ticket_len == 0 {
            DEFAULT_TICKET_LEN
        } else {
            self.ticket_len
        }
    }

    pub fn valid_for_client(&self) -> bool {
        self.server_name.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Server credentials, generating a self-signed certificate once when
    /// none are configured. The generated certificate is shared between all
    /// connections using this config.
    pub fn server_certificates(&self) -> Result<Vec<Arc<Certificate>>, TlsError> {
        if !self.certificates.is_empty() {
            return Ok(self.certificates.clone());
        }
        {
            let generated = self
                .generated_certificate
                .read()
                .map_err(|_| TlsError::Internal("config lock poisoned".into()))?;
            if let Some(cert) = generated.as_ref() {
                return Ok(vec![cert.clone()]);
            }
        }
        let mut generated = self
            .generated_certificate
            .write()
            .map_err(|_| TlsError::Internal("config lock poisoned".into()))?;
        if let Some(cert) = generated.as_ref() {
            return Ok(vec![cert.clone()]);
        }
        let name = self.server_name.as_deref().unwrap_or("rewall");
        log::debug!("generating self-signed certificate for {name}");
        let cert = Arc::new(generate_self_signed(name)?);
        *generated = Some(cert.clone());
        Ok(vec![cert])
    }

    pub(crate) fn capabilities(&self, is_client: bool) -> Result<Capabilities, TlsError> {
        let certificates = if is_client {
            self.certificates.clone()
        } else {
            self.server_certificates()?
        };
        Ok(Capabilities {
            cipher_suites: self.effective_cipher_suites(),
            groups: self.effective_groups(),
            signature_schemes: self.effective_signature_schemes(),
            psks: self.psks.clone(),
            psk_modes: self.effective_psk_modes(),
            allow_early_data: self.allow_early_data,
            require_cookie: self.require_cookie,
            require_client_auth: self.require_client_auth,
            next_protos: self.next_protos.clone(),
            certificates,
            auth_certificate: self.auth_certificate.clone(),
            insecure_skip_verify: self.insecure_skip_verify,
            pairing_group: self.pairing_group.clone(),
        })
    }
}

/// Negotiation inputs snapshot handed to the state machines.
#[derive(Clone)]
pub(crate) struct Capabilities {
    pub cipher_suites: Vec<CipherSuite>,
    pub groups: Vec<NamedGroup>,
    pub signature_schemes: Vec<SignatureScheme>,
    pub psks: Arc<RwLock<PskStore>>,
    pub psk_modes: Vec<PskKeyExchangeMode>,
    pub allow_early_data: bool,
    pub require_cookie: bool,
    pub require_client_auth: bool,
    pub next_protos: Vec<String>,
    pub certificates: Vec<Arc<Certificate>>,
    pub auth_certificate: Option<Arc<AuthCertificateHook>>,
    pub insecure_skip_verify: bool,
    pub pairing_group: Option<Arc<dyn PairingGroup>>,
}

/// Per-connection options handed to the state machines.
#[derive(Clone, Default)]
pub(crate) struct ConnectionOptions {
    pub server_name: Option<String>,
    pub next_protos: Vec<String>,
    pub early_data: Vec<u8>,
}

/// Builder for [`Config`].
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = Some(name.into());
        self
    }

    pub fn send_session_tickets(mut self, yes: bool) -> Self {
        self.config.send_session_tickets = yes;
        self
    }

    pub fn ticket_lifetime(mut self, seconds: u32) -> Self {
        self.config.ticket_lifetime = seconds;
        self
    }

    pub fn ticket_len(mut self, len: usize) -> Self {
        self.config.ticket_len = len;
        self
    }

    pub fn early_data_lifetime(mut self, seconds: u32) -> Self {
        self.config.early_data_lifetime = seconds;
        self
    }

    pub fn allow_early_data(mut self, yes: bool) -> Self {
        self.config.allow_early_data = yes;
        self
    }

    pub fn require_cookie(mut self, yes: bool) -> Self {
        self.config.require_cookie = yes;
        self
    }

    pub fn require_client_auth(mut self, yes: bool) -> Self {
        self.config.require_client_auth = yes;
        self
    }

    pub fn certificate(mut self, cert: Arc<Certificate>) -> Self {
        self.config.certificates.push(cert);
        self
    }

    pub fn auth_certificate(mut self, hook: Arc<AuthCertificateHook>) -> Self {
        self.config.auth_certificate = Some(hook);
        self
    }

    pub fn insecure_skip_verify(mut self, yes: bool) -> Self {
        self.config.insecure_skip_verify = yes;
        self
    }

    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.config.cipher_suites = suites.to_vec();
        self
    }

    pub fn groups(mut self, groups: &[NamedGroup]) -> Self {
        self.config.groups = groups.to_vec();
        self
    }

    pub fn signature_schemes(mut self, schemes: &[SignatureScheme]) -> Self {
        self.config.signature_schemes = schemes.to_vec();
        self
    }

    pub fn next_protos(mut self, protos: &[&str]) -> Self {
        self.config.next_protos = protos.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn psk_modes(mut self, modes: &[PskKeyExchangeMode]) -> Self {
        self.config.psk_modes = modes.to_vec();
        self
    }

    pub fn psks(mut self, psks: Arc<RwLock<PskStore>>) -> Self {
        self.config.psks = psks;
        self
    }

    pub fn non_blocking(mut self, yes: bool) -> Self {
        self.config.non_blocking = yes;
        self
    }

    pub fn allow_wrong_version_number(mut self, yes: bool) -> Self {
        self.config.allow_wrong_version_number = yes;
        self
    }

    pub fn pairing_group(mut self, provider: Arc<dyn PairingGroup>) -> Self {
        self.config.pairing_group = Some(provider);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(
            config.effective_cipher_suites(),
            vec![
                CipherSuite::TLS_AES_128_GCM_SHA256,
                CipherSuite::TLS_AES_256_GCM_SHA384
            ]
        );
        assert_eq!(
            config.effective_groups(),
            vec![NamedGroup::X25519, NamedGroup::SECP256R1]
        );
        assert_eq!(config.effective_ticket_len(), 16);
        assert!(!config.valid_for_client());
    }

    #[test]
    fn test_builder() {
        let config = Config::builder()
            .server_name("example.com")
            .cipher_suites(&[CipherSuite::TLS_AES_128_GCM_SHA256])
            .groups(&[NamedGroup::X25519])
            .next_protos(&["h2"])
            .require_cookie(true)
            .build();
        assert!(config.valid_for_client());
        assert!(config.require_cookie);
        assert_eq!(config.next_protos, vec!["h2".to_string()]);
        assert_eq!(
            config.effective_cipher_suites(),
            vec![CipherSuite::TLS_AES_128_GCM_SHA256]
        );
    }

    #[test]
    fn test_lazy_certificate_is_generated_once_and_shared() {
        let config = Config::builder().server_name("example.com").build();
        let first = config.server_certificates().unwrap();
        let second = config.server_certificates().unwrap();
        assert_eq!(first.len(), 1);
        assert!(Arc::ptr_eq(&first[0], &second[0]));
    }

    #[test]
    fn test_configured_certificate_wins() {
        let cert = Arc::new(crate::cert::generate_self_signed("configured").unwrap());
        let config = Config::builder().certificate(cert.clone()).build();
        let got = config.server_certificates().unwrap();
        assert!(Arc::ptr_eq(&got[0], &cert));
    }

    #[test]
    fn test_psk_store_shared_between_clones() {
        let config = Config::builder().server_name("example.com").build();
        let cloned = config.clone();
        config.psks.write().unwrap().put(
            "example.com",
            crate::psk::PreSharedKey {
                cipher_suite: CipherSuite::TLS_AES_128_GCM_SHA256,
                is_resumption: false,
                identity: vec![1],
                key: vec![2],
                next_proto: None,
                received_at: std::time::SystemTime::now(),
                expires_at: std::time::SystemTime::now(),
                ticket_age_add: 0,
            },
        );
        assert_eq!(cloned.psks.read().unwrap().size(), 1);
    }
}
