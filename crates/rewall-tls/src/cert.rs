//! Certificate plumbing.
//!
//! Certificates travel through the core as opaque DER blobs; full chain
//! validation belongs to the `auth_certificate` hook. This module carries
//! just enough X.509 to run the handshake: a minimal self-signed Ed25519
//! certificate for servers with no configured credentials, and
//! SubjectPublicKeyInfo extraction (by OID scan) for CertificateVerify
//! checks.

use std::sync::Arc;

use rand::rngs::OsRng;

use crate::crypt::SignatureScheme;
use crate::error::TlsError;

/// The Ed25519 algorithm OID 1.3.101.112 in DER.
const OID_ED25519: &[u8] = &[0x06, 0x03, 0x2b, 0x65, 0x70];
/// The prime256v1 curve OID 1.2.840.10045.3.1.7 in DER.
const OID_PRIME256V1: &[u8] = &[0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];
/// The commonName attribute OID 2.5.4.3 in DER.
const OID_COMMON_NAME: &[u8] = &[0x06, 0x03, 0x55, 0x04, 0x03];

/// A private key usable for CertificateVerify signatures.
pub enum PrivateKey {
    Ed25519(ed25519_dalek::SigningKey),
    EcdsaP256(p256::ecdsa::SigningKey),
}

impl PrivateKey {
    /// The signature scheme this key produces.
    pub fn scheme(&self) -> SignatureScheme {
        match self {
            PrivateKey::Ed25519(_) => SignatureScheme::ED25519,
            PrivateKey::EcdsaP256(_) => SignatureScheme::ECDSA_SECP256R1_SHA256,
        }
    }
}

/// A certificate chain (leaf first, DER) with its private key.
pub struct Certificate {
    pub chain: Vec<Vec<u8>>,
    pub private_key: PrivateKey,
}

/// A public key extracted from a leaf certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    Ed25519([u8; 32]),
    /// Uncompressed SEC1 point.
    EcdsaP256(Vec<u8>),
}

impl PublicKey {
    pub fn scheme(&self) -> SignatureScheme {
        match self {
            PublicKey::Ed25519(_) => SignatureScheme::ED25519,
            PublicKey::EcdsaP256(_) => SignatureScheme::ECDSA_SECP256R1_SHA256,
        }
    }
}

// ---------------------------------------------------------------------------
// Minimal DER construction
// ---------------------------------------------------------------------------

fn der_len(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len <= 0xff {
        vec![0x81, len as u8]
    } else {
        vec![0x82, (len >> 8) as u8, len as u8]
    }
}

fn der(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + content.len());
    out.push(tag);
    out.extend_from_slice(&der_len(content.len()));
    out.extend_from_slice(content);
    out
}

fn der_seq(parts: &[&[u8]]) -> Vec<u8> {
    der(0x30, &parts.concat())
}

/// `Name ::= SEQUENCE { SET { SEQUENCE { OID cn, UTF8String name } } }`
fn der_name(common_name: &str) -> Vec<u8> {
    let attr = der_seq(&[OID_COMMON_NAME, &der(0x0c, common_name.as_bytes())]);
    der_seq(&[&der(0x31, &attr)])
}

fn der_utc_time(value: &str) -> Vec<u8> {
    der(0x17, value.as_bytes())
}

fn der_bit_string(payload: &[u8]) -> Vec<u8> {
    let mut content = Vec::with_capacity(1 + payload.len());
    content.push(0x00); // no unused bits
    content.extend_from_slice(payload);
    der(0x03, &content)
}

/// Generate a minimal self-signed Ed25519 certificate for `common_name`.
///
/// The TBS carries serial 1, a ten-year validity window, and identical
/// issuer and subject names. Nothing here validates such certificates;
/// they exist so a server with no configured credentials can complete a
/// handshake against a peer that skips chain checks.
pub fn generate_self_signed(common_name: &str) -> Result<Certificate, TlsError> {
    use ed25519_dalek::Signer;

    let signing_key = ed25519_dalek::SigningKey::generate(&mut OsRng);
    let public_key = signing_key.verifying_key();

    let alg = der_seq(&[OID_ED25519]);
    let name = der_name(common_name);
    let validity = der_seq(&[
        &der_utc_time("250101000000Z"),
        &der_utc_time("350101000000Z"),
    ]);
    let spki = der_seq(&[&alg, &der_bit_string(public_key.as_bytes())]);

    let serial = der(0x02, &[0x01]);
    let tbs = der_seq(&[&serial, &alg, &name, &validity, &name, &spki]);

    let signature = signing_key.sign(&tbs);
    let cert = der_seq(&[&tbs, &alg, &der_bit_string(&signature.to_bytes())]);

    Ok(Certificate {
        chain: vec![cert],
        private_key: PrivateKey::Ed25519(signing_key),
    })
}

// ---------------------------------------------------------------------------
// SubjectPublicKeyInfo extraction
// ---------------------------------------------------------------------------

fn find_pattern(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Extract the public key from a DER certificate by locating the key
/// algorithm OID and the BIT STRING that follows it.
pub fn extract_public_key(cert_der: &[u8]) -> Result<PublicKey, TlsError> {
    if let Some(pos) = find_pattern(cert_der, OID_ED25519) {
        // The SPKI OID is followed (possibly after the enclosing SEQUENCE
        // closes) by: BIT STRING, length 0x21, zero unused bits, 32 bytes.
        let tail = &cert_der[pos + OID_ED25519.len()..];
        if let Some(bs) = find_pattern(tail, &[0x03, 0x21, 0x00]) {
            let key_start = bs + 3;
            if tail.len() >= key_start + 32 {
                let mut key = [0u8; 32];
                key.copy_from_slice(&tail[key_start..key_start + 32]);
                return Ok(PublicKey::Ed25519(key));
            }
        }
        return Err(TlsError::Decode(
            "certificate: Ed25519 key bit string not found".into(),
        ));
    }

    if let Some(pos) = find_pattern(cert_der, OID_PRIME256V1) {
        let tail = &cert_der[pos + OID_PRIME256V1.len()..];
        if let Some(bs) = find_pattern(tail, &[0x03, 0x42, 0x00]) {
            let key_start = bs + 3;
            if tail.len() >= key_start + 65 && tail[key_start] == 0x04 {
                return Ok(PublicKey::EcdsaP256(
                    tail[key_start..key_start + 65].to_vec(),
                ));
            }
        }
        return Err(TlsError::Decode(
            "certificate: P-256 key bit string not found".into(),
        ));
    }

    Err(TlsError::Decode(
        "certificate: no supported key algorithm".into(),
    ))
}

/// Pick the first scheme in `our_schemes` that the peer also offers and for
/// which a configured certificate key matches.
pub fn select_certificate(
    certificates: &[Arc<Certificate>],
    our_schemes: &[SignatureScheme],
    peer_schemes: &[SignatureScheme],
) -> Result<(Arc<Certificate>, SignatureScheme), TlsError> {
    for scheme in our_schemes {
        if !peer_schemes.contains(scheme) {
            continue;
        }
        for cert in certificates {
            if cert.private_key.scheme() == *scheme {
                return Ok((cert.clone(), *scheme));
            }
        }
    }
    Err(TlsError::Crypto(
        "no certificate matches the offered signature schemes".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_signed_roundtrip() {
        let cert = generate_self_signed("example.com").unwrap();
        assert_eq!(cert.chain.len(), 1);
        let der = &cert.chain[0];
        // Outer SEQUENCE
        assert_eq!(der[0], 0x30);
        // Common name survives verbatim
        assert!(find_pattern(der, b"example.com").is_some());

        let extracted = extract_public_key(der).unwrap();
        match (&cert.private_key, extracted) {
            (PrivateKey::Ed25519(sk), PublicKey::Ed25519(pk)) => {
                assert_eq!(pk, sk.verifying_key().to_bytes());
            }
            _ => panic!("unexpected key type"),
        }
    }

    /// Length of the DER element starting at `data[at]`, header included.
    fn der_element_len(data: &[u8], at: usize) -> usize {
        let first = data[at + 1] as usize;
        match first {
            l if l < 0x80 => 2 + l,
            0x81 => 3 + data[at + 2] as usize,
            0x82 => 4 + (((data[at + 2] as usize) << 8) | data[at + 3] as usize),
            _ => panic!("unsupported DER length form"),
        }
    }

    #[test]
    fn test_self_signed_signature_verifies() {
        use ed25519_dalek::Verifier;

        let cert = generate_self_signed("example.com").unwrap();
        let der = &cert.chain[0];

        // Outer SEQUENCE header, then the TBS is the first inner element and
        // the signature bit string holds the last 64 bytes.
        let header_len = der_element_len(der, 0) - {
            match der[1] as usize {
                l if l < 0x80 => l,
                0x81 => der[2] as usize,
                _ => ((der[2] as usize) << 8) | der[3] as usize,
            }
        };
        let tbs_start = header_len;
        let tbs = &der[tbs_start..tbs_start + der_element_len(der, tbs_start)];

        let sig_bytes: [u8; 64] = der[der.len() - 64..].try_into().unwrap();
        let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);

        if let PrivateKey::Ed25519(sk) = &cert.private_key {
            sk.verifying_key().verify(tbs, &signature).unwrap();
        } else {
            panic!("unexpected key type");
        }
    }

    #[test]
    fn test_extract_rejects_garbage() {
        assert!(extract_public_key(&[0x30, 0x03, 0x01, 0x02, 0x03]).is_err());
    }

    #[test]
    fn test_select_certificate_prefers_scheme_order() {
        let ed = Arc::new(generate_self_signed("a").unwrap());
        let p256_key = p256::ecdsa::SigningKey::random(&mut OsRng);
        let ec = Arc::new(Certificate {
            chain: vec![vec![0x30]],
            private_key: PrivateKey::EcdsaP256(p256_key),
        });
        let certs = vec![ed.clone(), ec];

        let (chosen, scheme) = select_certificate(
            &certs,
            &[
                SignatureScheme::ECDSA_SECP256R1_SHA256,
                SignatureScheme::ED25519,
            ],
            &[SignatureScheme::ED25519, SignatureScheme::ECDSA_SECP256R1_SHA256],
        )
        .unwrap();
        // Our preference order wins
        assert_eq!(scheme, SignatureScheme::ECDSA_SECP256R1_SHA256);
        assert!(matches!(chosen.private_key, PrivateKey::EcdsaP256(_)));

        let (_, scheme) = select_certificate(
            &certs,
            &[
                SignatureScheme::ECDSA_SECP256R1_SHA256,
                SignatureScheme::ED25519,
            ],
            &[SignatureScheme::ED25519],
        )
        .unwrap();
        assert_eq!(scheme, SignatureScheme::ED25519);

        assert!(select_certificate(&certs, &[SignatureScheme::ED25519], &[]).is_err());
    }
}
