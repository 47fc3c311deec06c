//! CertificateVerify signing and verification (RFC 8446 Section 4.4.3).
//!
//! The signed content is 64 bytes of 0x20, the ASCII context string, a NUL
//! separator, and the transcript hash.

use crate::cert::{extract_public_key, PrivateKey, PublicKey};
use crate::crypt::SignatureScheme;
use crate::error::TlsError;

const SERVER_CONTEXT: &[u8] = b"TLS 1.3, server CertificateVerify";
const CLIENT_CONTEXT: &[u8] = b"TLS 1.3, client CertificateVerify";

/// Build the CertificateVerify signature input.
pub fn encode_signature_input(transcript_hash: &[u8], is_client: bool) -> Vec<u8> {
    let context = if is_client {
        CLIENT_CONTEXT
    } else {
        SERVER_CONTEXT
    };
    let mut input = Vec::with_capacity(64 + context.len() + 1 + transcript_hash.len());
    input.resize(64, 0x20);
    input.extend_from_slice(context);
    input.push(0x00);
    input.extend_from_slice(transcript_hash);
    input
}

/// Sign the CertificateVerify content with the given private key.
pub fn sign_certificate_verify(
    key: &PrivateKey,
    scheme: SignatureScheme,
    transcript_hash: &[u8],
    is_client: bool,
) -> Result<Vec<u8>, TlsError> {
    if key.scheme() != scheme {
        return Err(TlsError::Internal(
            "signature scheme does not match key".into(),
        ));
    }
    let input = encode_signature_input(transcript_hash, is_client);
    match key {
        PrivateKey::Ed25519(sk) => {
            use ed25519_dalek::Signer;
            Ok(sk.sign(&input).to_bytes().to_vec())
        }
        PrivateKey::EcdsaP256(sk) => {
            use p256::ecdsa::signature::Signer;
            let signature: p256::ecdsa::Signature = sk.sign(&input);
            Ok(signature.to_der().as_bytes().to_vec())
        }
    }
}

/// Verify a CertificateVerify signature against the leaf certificate.
pub fn verify_certificate_verify(
    leaf_cert_der: &[u8],
    scheme: SignatureScheme,
    transcript_hash: &[u8],
    signature: &[u8],
    is_client: bool,
) -> Result<(), TlsError> {
    let public_key = extract_public_key(leaf_cert_der)?;
    if public_key.scheme() != scheme {
        return Err(TlsError::Crypto(format!(
            "signature scheme {:04x} does not match certificate key",
            scheme.0
        )));
    }
    let input = encode_signature_input(transcript_hash, is_client);
    match public_key {
        PublicKey::Ed25519(pk_bytes) => {
            use ed25519_dalek::Verifier;
            let pk = ed25519_dalek::VerifyingKey::from_bytes(&pk_bytes)
                .map_err(|_| TlsError::Crypto("invalid Ed25519 public key".into()))?;
            let sig_bytes: [u8; 64] = signature
                .try_into()
                .map_err(|_| TlsError::Crypto("Ed25519 signature must be 64 bytes".into()))?;
            let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
            pk.verify(&input, &sig)
                .map_err(|_| TlsError::Crypto("CertificateVerify signature invalid".into()))
        }
        PublicKey::EcdsaP256(sec1) => {
            use p256::ecdsa::signature::Verifier;
            let pk = p256::ecdsa::VerifyingKey::from_sec1_bytes(&sec1)
                .map_err(|_| TlsError::Crypto("invalid P-256 public key".into()))?;
            let sig = p256::ecdsa::Signature::from_der(signature)
                .map_err(|_| TlsError::Crypto("malformed ECDSA signature".into()))?;
            pk.verify(&input, &sig)
                .map_err(|_| TlsError::Crypto("CertificateVerify signature invalid".into()))
        }
    }
}
