//! Handshake message bodies (RFC 8446 Section 4, pre-RFC HelloRetryRequest
//! shape).
//!
//! Only the legacy fields TLS 1.3 still requires are emitted or accepted:
//! `legacy_version` is fixed to 0x0303, the legacy session id is empty, and
//! the only compression method is null. Decoding is strict about these.

use crate::codec::{put_u16, put_u32, put_u8, put_vec, Reader};
use crate::crypt::{CipherSuite, SignatureScheme};
use crate::error::TlsError;
use crate::extensions::{ExtensionList, ExtensionType, PreSharedKeyExtension};
use crate::handshake::{HandshakeBody, HandshakeMessage, HandshakeType};

const LEGACY_VERSION: u16 = 0x0303;

// ---------------------------------------------------------------------------
// ClientHello
// ---------------------------------------------------------------------------

/// ClientHello body. The hello random is pinned to zero by the states that
/// build it; this struct just carries the field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHelloBody {
    pub random: [u8; 32],
    pub cipher_suites: Vec<CipherSuite>,
    pub extensions: ExtensionList,
}

impl HandshakeBody for ClientHelloBody {
    const TYPE: HandshakeType = HandshakeType::ClientHello;

    fn marshal(&self) -> Result<Vec<u8>, TlsError> {
        let mut body = Vec::with_capacity(128);
        put_u16(&mut body, LEGACY_VERSION);
        body.extend_from_slice(&self.random);
        put_u8(&mut body, 0); // empty legacy_session_id

        let mut suites = Vec::with_capacity(self.cipher_suites.len() * 2);
        for suite in &self.cipher_suites {
            put_u16(&mut suites, suite.0);
        }
        put_vec(&mut body, 2, &suites)?;

        // legacy_compression_methods = { null }
        put_u8(&mut body, 1);
        put_u8(&mut body, 0);

        body.extend_from_slice(&self.extensions.marshal()?);
        Ok(body)
    }

    fn unmarshal(data: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(data);
        let version = r.u16()?;
        if version != LEGACY_VERSION {
            return Err(TlsError::Decode(format!(
                "ClientHello legacy_version {version:04x}"
            )));
        }
        let mut random = [0u8; 32];
        random.copy_from_slice(r.take(32)?);

        let _legacy_session_id = r.vec(1, 0, 32)?;

        let suites_raw = r.vec(2, 2, 0xfffe)?;
        if suites_raw.len() % 2 != 0 {
            return Err(TlsError::Decode("odd cipher_suites length".into()));
        }
        let cipher_suites = suites_raw
            .chunks_exact(2)
            .map(|c| CipherSuite(u16::from_be_bytes([c[0], c[1]])))
            .collect();

        let compression = r.vec(1, 1, 255)?;
        if compression != [0] {
            return Err(TlsError::Decode("invalid compression methods".into()));
        }

        let extensions = ExtensionList::unmarshal(&mut r)?;
        r.finish(false)?;
        Ok(ClientHelloBody {
            random,
            cipher_suites,
            extensions,
        })
    }
}

impl ClientHelloBody {
    /// The ClientHello truncated right before the PSK binder list, in wire
    /// form (handshake header included). This is what PSK binders MAC over.
    /// Requires the pre_shared_key extension to be the last extension.
    pub fn truncated_for_binders(&self) -> Result<Vec<u8>, TlsError> {
        let last = self
            .extensions
            .last()
            .ok_or_else(|| TlsError::Internal("truncate: no extensions".into()))?;
        if last.extension_type != ExtensionType::PRE_SHARED_KEY {
            return Err(TlsError::Internal(
                "truncate: last extension is not pre_shared_key".into(),
            ));
        }
        let psk = PreSharedKeyExtension::from_list(HandshakeType::ClientHello, &self.extensions)?
            .ok_or_else(|| TlsError::Internal("truncate: pre_shared_key missing".into()))?;

        let wire = HandshakeMessage::from_body(self)?.marshal();
        let binders_len = psk.binders_len();
        if wire.len() < binders_len {
            return Err(TlsError::Internal("truncate: message too short".into()));
        }
        Ok(wire[..wire.len() - binders_len].to_vec())
    }
}

// ---------------------------------------------------------------------------
// ServerHello / HelloRetryRequest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHelloBody {
    pub version: u16,
    pub random: [u8; 32],
    pub cipher_suite: CipherSuite,
    pub extensions: ExtensionList,
}

impl HandshakeBody for ServerHelloBody {
    const TYPE: HandshakeType = HandshakeType::ServerHello;

    fn marshal(&self) -> Result<Vec<u8>, TlsError> {
        let mut body = Vec::with_capacity(64);
        put_u16(&mut body, self.version);
        body.extend_from_slice(&self.random);
        put_u16(&mut body, self.cipher_suite.0);
        body.extend_from_slice(&self.extensions.marshal()?);
        Ok(body)
    }

    fn unmarshal(data: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(data);
        let version = r.u16()?;
        let mut random = [0u8; 32];
        random.copy_from_slice(r.take(32)?);
        let cipher_suite = CipherSuite(r.u16()?);
        let extensions = ExtensionList::unmarshal(&mut r)?;
        r.finish(false)?;
        Ok(ServerHelloBody {
            version,
            random,
            cipher_suite,
            extensions,
        })
    }
}

/// HelloRetryRequest: the server's demand to retry the ClientHello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloRetryRequestBody {
    pub version: u16,
    pub cipher_suite: CipherSuite,
    pub extensions: ExtensionList,
}

impl HandshakeBody for HelloRetryRequestBody {
    const TYPE: HandshakeType = HandshakeType::HelloRetryRequest;

    fn marshal(&self) -> Result<Vec<u8>, TlsError> {
        let mut body = Vec::with_capacity(32);
        put_u16(&mut body, self.version);
        put_u16(&mut body, self.cipher_suite.0);
        body.extend_from_slice(&self.extensions.marshal()?);
        Ok(body)
    }

    fn unmarshal(data: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(data);
        let version = r.u16()?;
        let cipher_suite = CipherSuite(r.u16()?);
        let extensions = ExtensionList::unmarshal(&mut r)?;
        r.finish(false)?;
        Ok(HelloRetryRequestBody {
            version,
            cipher_suite,
            extensions,
        })
    }
}

// ---------------------------------------------------------------------------
// EncryptedExtensions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptedExtensionsBody {
    pub extensions: ExtensionList,
}

impl HandshakeBody for EncryptedExtensionsBody {
    const TYPE: HandshakeType = HandshakeType::EncryptedExtensions;

    fn marshal(&self) -> Result<Vec<u8>, TlsError> {
        self.extensions.marshal()
    }

    fn unmarshal(data: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(data);
        let extensions = ExtensionList::unmarshal(&mut r)?;
        r.finish(false)?;
        Ok(EncryptedExtensionsBody { extensions })
    }
}

// ---------------------------------------------------------------------------
// Certificate / CertificateRequest / CertificateVerify
// ---------------------------------------------------------------------------

/// One entry of a certificate chain; `cert_data` is DER kept opaque here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateEntry {
    pub cert_data: Vec<u8>,
    pub extensions: ExtensionList,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateBody {
    pub certificate_request_context: Vec<u8>,
    pub certificate_list: Vec<CertificateEntry>,
}

impl HandshakeBody for CertificateBody {
    const TYPE: HandshakeType = HandshakeType::Certificate;

    fn marshal(&self) -> Result<Vec<u8>, TlsError> {
        let mut entries = Vec::new();
        for entry in &self.certificate_list {
            put_vec(&mut entries, 3, &entry.cert_data)?;
            entries.extend_from_slice(&entry.extensions.marshal()?);
        }
        let mut body = Vec::new();
        put_vec(&mut body, 1, &self.certificate_request_context)?;
        put_vec(&mut body, 3, &entries)?;
        Ok(body)
    }

    fn unmarshal(data: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(data);
        let certificate_request_context = r.vec(1, 0, 255)?.to_vec();
        let entries_raw = r.vec(3, 0, 0xff_ffff)?;
        r.finish(false)?;

        let mut er = Reader::new(entries_raw);
        let mut certificate_list = Vec::new();
        while !er.is_done() {
            let cert_data = er.vec(3, 1, 0xff_ffff)?.to_vec();
            let extensions = ExtensionList::unmarshal(&mut er)?;
            certificate_list.push(CertificateEntry {
                cert_data,
                extensions,
            });
        }
        Ok(CertificateBody {
            certificate_request_context,
            certificate_list,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateRequestBody {
    pub certificate_request_context: Vec<u8>,
    pub extensions: ExtensionList,
}

impl HandshakeBody for CertificateRequestBody {
    const TYPE: HandshakeType = HandshakeType::CertificateRequest;

    fn marshal(&self) -> Result<Vec<u8>, TlsError> {
        let mut body = Vec::new();
        put_vec(&mut body, 1, &self.certificate_request_context)?;
        body.extend_from_slice(&self.extensions.marshal()?);
        Ok(body)
    }

    fn unmarshal(data: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(data);
        let certificate_request_context = r.vec(1, 0, 255)?.to_vec();
        let extensions = ExtensionList::unmarshal(&mut r)?;
        r.finish(false)?;
        Ok(CertificateRequestBody {
            certificate_request_context,
            extensions,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerifyBody {
    pub algorithm: SignatureScheme,
    pub signature: Vec<u8>,
}

impl HandshakeBody for CertificateVerifyBody {
    const TYPE: HandshakeType = HandshakeType::CertificateVerify;

    fn marshal(&self) -> Result<Vec<u8>, TlsError> {
        let mut body = Vec::new();
        put_u16(&mut body, self.algorithm.0);
        put_vec(&mut body, 2, &self.signature)?;
        Ok(body)
    }

    fn unmarshal(data: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(data);
        let algorithm = SignatureScheme(r.u16()?);
        let signature = r.vec(2, 1, 0xffff)?.to_vec();
        r.finish(false)?;
        Ok(CertificateVerifyBody {
            algorithm,
            signature,
        })
    }
}

// ---------------------------------------------------------------------------
// Finished / EndOfEarlyData
// ---------------------------------------------------------------------------

/// Finished carries `verify_data` whose length equals the negotiated hash
/// length; callers pass the expected length explicitly when decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedBody {
    pub verify_data: Vec<u8>,
}

impl HandshakeBody for FinishedBody {
    const TYPE: HandshakeType = HandshakeType::Finished;

    fn marshal(&self) -> Result<Vec<u8>, TlsError> {
        Ok(self.verify_data.clone())
    }

    fn unmarshal(data: &[u8]) -> Result<Self, TlsError> {
        Ok(FinishedBody {
            verify_data: data.to_vec(),
        })
    }
}

impl FinishedBody {
    pub fn unmarshal_with_len(data: &[u8], verify_data_len: usize) -> Result<Self, TlsError> {
        if data.len() != verify_data_len {
            return Err(TlsError::Decode(format!(
                "Finished verify_data length {} (want {verify_data_len})",
                data.len()
            )));
        }
        Ok(FinishedBody {
            verify_data: data.to_vec(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndOfEarlyDataBody;

impl HandshakeBody for EndOfEarlyDataBody {
    const TYPE: HandshakeType = HandshakeType::EndOfEarlyData;

    fn marshal(&self) -> Result<Vec<u8>, TlsError> {
        Ok(Vec::new())
    }

    fn unmarshal(data: &[u8]) -> Result<Self, TlsError> {
        if !data.is_empty() {
            return Err(TlsError::Decode("EndOfEarlyData is not empty".into()));
        }
        Ok(EndOfEarlyDataBody)
    }
}

// ---------------------------------------------------------------------------
// NewSessionTicket / KeyUpdate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSessionTicketBody {
    pub ticket_lifetime: u32,
    pub ticket_age_add: u32,
    pub ticket: Vec<u8>,
    pub extensions: ExtensionList,
}

impl HandshakeBody for NewSessionTicketBody {
    const TYPE: HandshakeType = HandshakeType::NewSessionTicket;

    fn marshal(&self) -> Result<Vec<u8>, TlsError> {
        let mut body = Vec::new();
        put_u32(&mut body, self.ticket_lifetime);
        put_u32(&mut body, self.ticket_age_add);
        put_vec(&mut body, 2, &self.ticket)?;
        body.extend_from_slice(&self.extensions.marshal()?);
        Ok(body)
    }

    fn unmarshal(data: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(data);
        let ticket_lifetime = r.u32()?;
        let ticket_age_add = r.u32()?;
        let ticket = r.vec(2, 1, 0xffff)?.to_vec();
        let extensions = ExtensionList::unmarshal(&mut r)?;
        r.finish(false)?;
        Ok(NewSessionTicketBody {
            ticket_lifetime,
            ticket_age_add,
            ticket,
            extensions,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyUpdateRequest {
    UpdateNotRequested = 0,
    UpdateRequested = 1,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyUpdateBody {
    pub request_update: KeyUpdateRequest,
}

impl HandshakeBody for KeyUpdateBody {
    const TYPE: HandshakeType = HandshakeType::KeyUpdate;

    fn marshal(&self) -> Result<Vec<u8>, TlsError> {
        Ok(vec![self.request_update as u8])
    }

    fn unmarshal(data: &[u8]) -> Result<Self, TlsError> {
        let mut r = Reader::new(data);
        let request_update = match r.u8()? {
            0 => KeyUpdateRequest::UpdateNotRequested,
            1 => KeyUpdateRequest::UpdateRequested,
            v => return Err(TlsError::Decode(format!("unknown KeyUpdateRequest {v}"))),
        };
        r.finish(false)?;
        Ok(KeyUpdateBody { request_update })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::NamedGroup;
    use crate::extensions::{
        CookieExtension, KeyShareEntry, KeyShareExtension, PskIdentity, SupportedVersionsExtension,
    };

    fn roundtrip<T: HandshakeBody + PartialEq + std::fmt::Debug>(body: &T) {
        let wire = body.marshal().unwrap();
        let parsed = T::unmarshal(&wire).unwrap();
        assert_eq!(&parsed, body);
    }

    fn sample_client_hello() -> ClientHelloBody {
        let mut extensions = ExtensionList::new();
        extensions.add(
            SupportedVersionsExtension(vec![0x0304])
                .to_extension()
                .unwrap(),
        );
        extensions.add(
            KeyShareExtension {
                role: HandshakeType::ClientHello,
                shares: vec![KeyShareEntry {
                    group: NamedGroup::X25519,
                    key_exchange: vec![0x55; 32],
                }],
            }
            .to_extension()
            .unwrap(),
        );
        ClientHelloBody {
            random: [0u8; 32],
            cipher_suites: vec![
                CipherSuite::TLS_AES_128_GCM_SHA256,
                CipherSuite::TLS_AES_256_GCM_SHA384,
            ],
            extensions,
        }
    }

    #[test]
    fn test_client_hello_roundtrip_and_legacy_fields() {
        let ch = sample_client_hello();
        let wire = ch.marshal().unwrap();

        // legacy_version, zero random, empty session id
        assert_eq!(&wire[0..2], &[0x03, 0x03]);
        assert_eq!(&wire[2..34], &[0u8; 32]);
        assert_eq!(wire[34], 0);
        roundtrip(&ch);
    }

    #[test]
    fn test_client_hello_rejects_bad_legacy_fields() {
        let ch = sample_client_hello();
        let mut wire = ch.marshal().unwrap();
        wire[1] = 0x01;
        assert!(ClientHelloBody::unmarshal(&wire).is_err());

        let mut wire = ch.marshal().unwrap();
        // compression method byte sits after the suites vector
        let comp_at = 2 + 32 + 1 + 2 + 4 + 1;
        wire[comp_at] = 1;
        assert!(ClientHelloBody::unmarshal(&wire).is_err());
    }

    #[test]
    fn test_client_hello_trailing_garbage_rejected() {
        let ch = sample_client_hello();
        let mut wire = ch.marshal().unwrap();
        wire.push(0x00);
        assert!(ClientHelloBody::unmarshal(&wire).is_err());
    }

    #[test]
    fn test_truncated_for_binders() {
        let mut ch = sample_client_hello();
        let binder = vec![0u8; 32];
        ch.extensions.add(
            PreSharedKeyExtension::client(
                vec![PskIdentity {
                    identity: vec![0, 1, 2, 3],
                    obfuscated_ticket_age: 7,
                }],
                vec![binder.clone()],
            )
            .to_extension()
            .unwrap(),
        );

        let full = HandshakeMessage::from_body(&ch).unwrap().marshal();
        let trunc = ch.truncated_for_binders().unwrap();
        assert_eq!(trunc.len(), full.len() - (2 + 1 + 32));
        assert_eq!(&full[..trunc.len()], &trunc[..]);
    }

    #[test]
    fn test_truncated_requires_psk_last() {
        let ch = sample_client_hello();
        assert!(ch.truncated_for_binders().is_err());
    }

    #[test]
    fn test_server_hello_roundtrip() {
        let mut extensions = ExtensionList::new();
        extensions.add(
            KeyShareExtension {
                role: HandshakeType::ServerHello,
                shares: vec![KeyShareEntry {
                    group: NamedGroup::X25519,
                    key_exchange: vec![0x66; 32],
                }],
            }
            .to_extension()
            .unwrap(),
        );
        roundtrip(&ServerHelloBody {
            version: 0x0304,
            random: [0u8; 32],
            cipher_suite: CipherSuite::TLS_AES_128_GCM_SHA256,
            extensions,
        });
    }

    #[test]
    fn test_hello_retry_request_roundtrip() {
        let mut extensions = ExtensionList::new();
        extensions.add(CookieExtension(vec![9; 32]).to_extension().unwrap());
        roundtrip(&HelloRetryRequestBody {
            version: 0x0304,
            cipher_suite: CipherSuite::TLS_AES_128_GCM_SHA256,
            extensions,
        });
    }

    #[test]
    fn test_certificate_roundtrip() {
        roundtrip(&CertificateBody {
            certificate_request_context: vec![],
            certificate_list: vec![CertificateEntry {
                cert_data: vec![0x30, 0x82, 0x01, 0x00],
                extensions: ExtensionList::new(),
            }],
        });
    }

    #[test]
    fn test_certificate_empty_list_roundtrip() {
        roundtrip(&CertificateBody::default());
    }

    #[test]
    fn test_certificate_verify_roundtrip() {
        roundtrip(&CertificateVerifyBody {
            algorithm: SignatureScheme::ED25519,
            signature: vec![0xaa; 64],
        });
    }

    #[test]
    fn test_finished_length_check() {
        let f = FinishedBody {
            verify_data: vec![0x42; 32],
        };
        let wire = f.marshal().unwrap();
        assert!(FinishedBody::unmarshal_with_len(&wire, 32).is_ok());
        assert!(FinishedBody::unmarshal_with_len(&wire, 48).is_err());
        assert!(FinishedBody::unmarshal_with_len(&wire[..16], 32).is_err());
    }

    #[test]
    fn test_end_of_early_data_is_empty() {
        let wire = EndOfEarlyDataBody.marshal().unwrap();
        assert!(wire.is_empty());
        assert!(EndOfEarlyDataBody::unmarshal(&[]).is_ok());
        assert!(EndOfEarlyDataBody::unmarshal(&[0]).is_err());
    }

    #[test]
    fn test_new_session_ticket_roundtrip() {
        roundtrip(&NewSessionTicketBody {
            ticket_lifetime: 3600,
            ticket_age_add: 0xdeadbeef,
            ticket: vec![0x11; 16],
            extensions: ExtensionList::new(),
        });
    }

    #[test]
    fn test_key_update_roundtrip() {
        roundtrip(&KeyUpdateBody {
            request_update: KeyUpdateRequest::UpdateRequested,
        });
        roundtrip(&KeyUpdateBody {
            request_update: KeyUpdateRequest::UpdateNotRequested,
        });
        assert!(KeyUpdateBody::unmarshal(&[2]).is_err());
    }

    #[test]
    fn test_parse_as_type_mismatch() {
        let m = HandshakeMessage::from_body(&EndOfEarlyDataBody).unwrap();
        assert!(m.parse_as::<KeyUpdateBody>().is_err());
    }
}
