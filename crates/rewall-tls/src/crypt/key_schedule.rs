//! TLS 1.3 key schedule (RFC 8446 Section 7.1).
//!
//! ```text
//! early_secret     = HKDF-Extract(0, PSK | 0)
//! handshake_secret = HKDF-Extract(Derive(early_secret, "derived", H("")),    DH | 0)
//! master_secret    = HKDF-Extract(Derive(handshake_secret, "derived", H("")), 0)
//! ```

use zeroize::Zeroize;

use super::hkdf::{derive_secret, hkdf_expand_label, hkdf_extract, hmac_hash};
use super::{CipherSuiteParams, HashAlg};
use crate::error::TlsError;

/// Current stage of the derivation chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScheduleStage {
    Initial,
    EarlySecret,
    HandshakeSecret,
    MasterSecret,
}

/// Staged key-schedule state. All secret material is zeroized on drop.
pub struct KeySchedule {
    params: CipherSuiteParams,
    stage: KeyScheduleStage,
    current_secret: Vec<u8>,
}

impl Drop for KeySchedule {
    fn drop(&mut self) {
        self.current_secret.zeroize();
    }
}

impl KeySchedule {
    pub fn new(params: CipherSuiteParams) -> Self {
        Self {
            params,
            stage: KeyScheduleStage::Initial,
            current_secret: Vec::new(),
        }
    }

    pub fn stage(&self) -> KeyScheduleStage {
        self.stage
    }

    pub fn hash(&self) -> HashAlg {
        self.params.hash
    }

    fn alg(&self) -> HashAlg {
        self.params.hash
    }

    fn empty_hash(&self) -> Vec<u8> {
        self.alg().digest(b"")
    }

    fn require_stage(&self, want: KeyScheduleStage, op: &str) -> Result<(), TlsError> {
        if self.stage != want {
            return Err(TlsError::Internal(format!("{op}: wrong stage")));
        }
        Ok(())
    }

    /// Derive the Early Secret from a PSK (or `None` for the zero PSK).
    /// Transitions Initial → EarlySecret.
    pub fn derive_early_secret(&mut self, psk: Option<&[u8]>) -> Result<(), TlsError> {
        self.require_stage(KeyScheduleStage::Initial, "derive_early_secret")?;
        let zero_psk = vec![0u8; self.alg().len()];
        let ikm = psk.unwrap_or(&zero_psk);
        self.current_secret = hkdf_extract(self.alg(), &[], ikm)?;
        self.stage = KeyScheduleStage::EarlySecret;
        Ok(())
    }

    /// Binder key from the Early Secret: label `ext binder` for external
    /// PSKs, `res binder` for resumption PSKs.
    pub fn derive_binder_key(&self, is_resumption: bool) -> Result<Vec<u8>, TlsError> {
        self.require_stage(KeyScheduleStage::EarlySecret, "derive_binder_key")?;
        let label: &[u8] = if is_resumption {
            b"res binder"
        } else {
            b"ext binder"
        };
        derive_secret(self.alg(), &self.current_secret, label, &self.empty_hash())
    }

    /// Client early traffic secret for 0-RTT:
    /// `Derive-Secret(early_secret, "c e traffic", H(ClientHello))`.
    pub fn derive_early_traffic_secret(
        &self,
        client_hello_hash: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        self.require_stage(KeyScheduleStage::EarlySecret, "derive_early_traffic_secret")?;
        derive_secret(
            self.alg(),
            &self.current_secret,
            b"c e traffic",
            client_hello_hash,
        )
    }

    /// Derive the Handshake Secret from the (EC)DH shared secret (zeros when
    /// no key exchange was performed). Transitions EarlySecret → HandshakeSecret.
    pub fn derive_handshake_secret(&mut self, dh_secret: &[u8]) -> Result<(), TlsError> {
        self.require_stage(KeyScheduleStage::EarlySecret, "derive_handshake_secret")?;
        let mut salt = derive_secret(
            self.alg(),
            &self.current_secret,
            b"derived",
            &self.empty_hash(),
        )?;
        self.current_secret.zeroize();
        self.current_secret = hkdf_extract(self.alg(), &salt, dh_secret)?;
        salt.zeroize();
        self.stage = KeyScheduleStage::HandshakeSecret;
        Ok(())
    }

    /// Handshake traffic secrets at `H(CH..SH)`:
    /// `(c hs traffic, s hs traffic)`.
    pub fn derive_handshake_traffic_secrets(
        &self,
        transcript_hash: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), TlsError> {
        self.require_stage(
            KeyScheduleStage::HandshakeSecret,
            "derive_handshake_traffic_secrets",
        )?;
        let client = derive_secret(
            self.alg(),
            &self.current_secret,
            b"c hs traffic",
            transcript_hash,
        )?;
        let server = derive_secret(
            self.alg(),
            &self.current_secret,
            b"s hs traffic",
            transcript_hash,
        )?;
        Ok((client, server))
    }

    /// Derive the Master Secret. Transitions HandshakeSecret → MasterSecret.
    pub fn derive_master_secret(&mut self) -> Result<(), TlsError> {
        self.require_stage(KeyScheduleStage::HandshakeSecret, "derive_master_secret")?;
        let mut salt = derive_secret(
            self.alg(),
            &self.current_secret,
            b"derived",
            &self.empty_hash(),
        )?;
        let zero_ikm = vec![0u8; self.alg().len()];
        self.current_secret.zeroize();
        self.current_secret = hkdf_extract(self.alg(), &salt, &zero_ikm)?;
        salt.zeroize();
        self.stage = KeyScheduleStage::MasterSecret;
        Ok(())
    }

    /// Application traffic secrets at `H(CH..SF)`:
    /// `(c ap traffic, s ap traffic)`.
    pub fn derive_app_traffic_secrets(
        &self,
        transcript_hash: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), TlsError> {
        self.require_stage(KeyScheduleStage::MasterSecret, "derive_app_traffic_secrets")?;
        let client = derive_secret(
            self.alg(),
            &self.current_secret,
            b"c ap traffic",
            transcript_hash,
        )?;
        let server = derive_secret(
            self.alg(),
            &self.current_secret,
            b"s ap traffic",
            transcript_hash,
        )?;
        Ok((client, server))
    }

    /// Exporter master secret at `H(CH..SF)`.
    pub fn derive_exporter_master_secret(
        &self,
        transcript_hash: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        self.require_stage(
            KeyScheduleStage::MasterSecret,
            "derive_exporter_master_secret",
        )?;
        derive_secret(
            self.alg(),
            &self.current_secret,
            b"exp master",
            transcript_hash,
        )
    }

    /// Resumption master secret at `H(CH..CF)`.
    pub fn derive_resumption_master_secret(
        &self,
        transcript_hash: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        self.require_stage(
            KeyScheduleStage::MasterSecret,
            "derive_resumption_master_secret",
        )?;
        derive_secret(
            self.alg(),
            &self.current_secret,
            b"res master",
            transcript_hash,
        )
    }
}

/// Post-handshake traffic secret rotation:
/// `HKDF-Expand-Label(secret, "traffic upd", "", Hash.length)`.
pub fn update_traffic_secret(alg: HashAlg, current: &[u8]) -> Result<Vec<u8>, TlsError> {
    hkdf_expand_label(alg, current, b"traffic upd", b"", alg.len())
}

/// Exporter interface (RFC 8446 Section 7.5):
///
/// ```text
/// secret' = Derive-Secret(exporter_secret, label, "")
/// value   = HKDF-Expand-Label(secret', "exporter", Hash(context), length)
/// ```
pub fn compute_exporter(
    alg: HashAlg,
    exporter_secret: &[u8],
    label: &[u8],
    context: &[u8],
    length: usize,
) -> Result<Vec<u8>, TlsError> {
    let mut inner = derive_secret(alg, exporter_secret, label, &alg.digest(b""))?;
    let out = hkdf_expand_label(alg, &inner, b"exporter", &alg.digest(context), length);
    inner.zeroize();
    out
}

/// Finished data for a traffic secret over a transcript hash.
pub fn finished_data(
    alg: HashAlg,
    base_secret: &[u8],
    transcript_hash: &[u8],
) -> Result<Vec<u8>, TlsError> {
    let mut finished_key = hkdf_expand_label(alg, base_secret, b"finished", b"", alg.len())?;
    let out = hmac_hash(alg, &finished_key, transcript_hash);
    finished_key.zeroize();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::CipherSuite;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn to_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    // RFC 8448 Section 3: Simple 1-RTT Handshake (TLS_AES_128_GCM_SHA256).
    // All hex values from the RFC example trace.
    #[test]
    fn test_full_key_schedule_sha256() {
        let params = CipherSuiteParams::from_suite(CipherSuite::TLS_AES_128_GCM_SHA256).unwrap();
        let mut ks = KeySchedule::new(params);

        ks.derive_early_secret(None).unwrap();
        assert_eq!(ks.stage(), KeyScheduleStage::EarlySecret);
        assert_eq!(
            to_hex(&ks.current_secret),
            "33ad0a1c607ec03b09e6cd9893680ce210adf300aa1f2660e1b22e10f170f92a"
        );

        let dhe_shared = hex("8bd4054fb55b9d63fdfbacf9f04b9f0d35e6d63f537563efd46272900f89492d");
        ks.derive_handshake_secret(&dhe_shared).unwrap();
        assert_eq!(
            to_hex(&ks.current_secret),
            "1dc826e93606aa6fdc0aadc12f741b01046aa6b99f691ed221a9f0ca043fbeac"
        );

        let transcript_ch_sh =
            hex("860c06edc07858ee8e78f0e7428c58edd6b43f2ca3e6e95f02ed063cf0e1cad8");
        let (client_hs, server_hs) = ks
            .derive_handshake_traffic_secrets(&transcript_ch_sh)
            .unwrap();
        assert_eq!(
            to_hex(&client_hs),
            "b3eddb126e067f35a780b3abf45e2d8f3b1a950738f52e9600746a0e27a55a21"
        );
        assert_eq!(
            to_hex(&server_hs),
            "b67b7d690cc16c4e75e54213cb2d37b4e9c912bcded9105d42befd59d391ad38"
        );

        ks.derive_master_secret().unwrap();
        assert_eq!(
            to_hex(&ks.current_secret),
            "18df06843d13a08bf2a449844c5f8a478001bc4d4c627984d5a41da8d0402919"
        );

        let transcript_ch_sf =
            hex("9608102a0f1ccc6db6250b7b7e417b1a000eaada3daae4777a7686c9ff83df13");
        let (client_app, server_app) = ks.derive_app_traffic_secrets(&transcript_ch_sf).unwrap();
        assert_eq!(
            to_hex(&client_app),
            "9e40646ce79a7f9dc05af8889bce6552875afa0b06df0087f792ebb7c17504a5"
        );
        assert_eq!(
            to_hex(&server_app),
            "a11af9f05531f856ad47116b45a950328204b4f44bfb6b3a4b4f1f3fcb631643"
        );
    }

    #[test]
    fn test_stage_enforcement() {
        let params = CipherSuiteParams::from_suite(CipherSuite::TLS_AES_128_GCM_SHA256).unwrap();
        let mut ks = KeySchedule::new(params);

        assert!(ks.derive_handshake_secret(b"test").is_err());
        assert!(ks.derive_master_secret().is_err());
        assert!(ks.derive_handshake_traffic_secrets(&[0u8; 32]).is_err());
        assert!(ks.derive_app_traffic_secrets(&[0u8; 32]).is_err());
        assert!(ks.derive_binder_key(true).is_err());

        ks.derive_early_secret(None).unwrap();
        ks.derive_handshake_secret(b"shared").unwrap();
        ks.derive_master_secret().unwrap();
        assert_eq!(ks.stage(), KeyScheduleStage::MasterSecret);
    }

    #[test]
    fn test_binder_labels_differ() {
        let params = CipherSuiteParams::from_suite(CipherSuite::TLS_AES_128_GCM_SHA256).unwrap();
        let mut ks = KeySchedule::new(params);
        ks.derive_early_secret(Some(&[4, 5, 6, 7])).unwrap();
        let external = ks.derive_binder_key(false).unwrap();
        let resumption = ks.derive_binder_key(true).unwrap();
        assert_ne!(external, resumption);
    }

    #[test]
    fn test_traffic_secret_update_changes_value() {
        let secret = hex("9e40646ce79a7f9dc05af8889bce6552875afa0b06df0087f792ebb7c17504a5");
        let updated = update_traffic_secret(HashAlg::Sha256, &secret).unwrap();
        assert_eq!(updated.len(), 32);
        assert_ne!(updated, secret);
        // Deterministic
        assert_eq!(updated, update_traffic_secret(HashAlg::Sha256, &secret).unwrap());
    }

    #[test]
    fn test_exporter_sensitivity() {
        let secret = vec![0x42; 32];
        let base = compute_exporter(HashAlg::Sha256, &secret, b"E", b"", 20).unwrap();
        assert_eq!(base.len(), 20);
        assert_ne!(
            base,
            compute_exporter(HashAlg::Sha256, &secret, b"F", b"", 20).unwrap()
        );
        assert_ne!(
            base,
            compute_exporter(HashAlg::Sha256, &secret, b"E", b"A", 20).unwrap()
        );
        assert_ne!(
            base,
            compute_exporter(HashAlg::Sha256, &secret, b"E", b"", 21).unwrap()[..20]
        );
    }

    #[test]
    fn test_sha384_schedule_widths() {
        let params = CipherSuiteParams::from_suite(CipherSuite::TLS_AES_256_GCM_SHA384).unwrap();
        let mut ks = KeySchedule::new(params);
        ks.derive_early_secret(None).unwrap();
        assert_eq!(ks.current_secret.len(), 48);
        ks.derive_handshake_secret(&[0u8; 48]).unwrap();
        let (c, s) = ks.derive_handshake_traffic_secrets(&[0u8; 48]).unwrap();
        assert_eq!(c.len(), 48);
        assert_eq!(s.len(), 48);
        ks.derive_master_secret().unwrap();
        assert_eq!(ks.current_secret.len(), 48);
    }
}
