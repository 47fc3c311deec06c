//! TLS 1.3 HKDF primitives (RFC 8446 Section 7.1).
//!
//! HMAC comes from the `hmac` crate; the HKDF extract/expand chain and the
//! `HkdfLabel` encoding are implemented here so both SHA-256 and SHA-384 can
//! be selected at runtime from the negotiated cipher suite.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384};
use zeroize::Zeroize;

use super::HashAlg;
use crate::error::TlsError;

/// One-shot HMAC over several input parts.
fn hmac_parts(alg: HashAlg, key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, TlsError> {
    match alg {
        HashAlg::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key)
                .map_err(|_| TlsError::Crypto("hmac: invalid key".into()))?;
            for part in parts {
                mac.update(part);
            }
            Ok(mac.finalize().into_bytes().to_vec())
        }
        HashAlg::Sha384 => {
            let mut mac = Hmac::<Sha384>::new_from_slice(key)
                .map_err(|_| TlsError::Crypto("hmac: invalid key".into()))?;
            for part in parts {
                mac.update(part);
            }
            Ok(mac.finalize().into_bytes().to_vec())
        }
    }
}

/// One-shot HMAC: `HMAC(key, data)`.
pub fn hmac_hash(alg: HashAlg, key: &[u8], data: &[u8]) -> Result<Vec<u8>, TlsError> {
    hmac_parts(alg, key, &[data])
}

/// HKDF-Extract(salt, IKM) -> PRK. An empty salt means `hash_len` zero bytes.
pub fn hkdf_extract(alg: HashAlg, salt: &[u8], ikm: &[u8]) -> Result<Vec<u8>, TlsError> {
    if salt.is_empty() {
        let zero_salt = vec![0u8; alg.len()];
        hmac_hash(alg, &zero_salt, ikm)
    } else {
        hmac_hash(alg, salt, ikm)
    }
}

/// HKDF-Expand(PRK, info, length) -> OKM (RFC 5869).
pub fn hkdf_expand(
    alg: HashAlg,
    prk: &[u8],
    info: &[u8],
    length: usize,
) -> Result<Vec<u8>, TlsError> {
    let hash_len = alg.len();
    let n = length.div_ceil(hash_len);
    if n > 255 {
        return Err(TlsError::Crypto("hkdf-expand: output too long".into()));
    }

    let mut okm = Vec::with_capacity(n * hash_len);
    let mut t_prev: Vec<u8> = Vec::new();
    for i in 1..=n {
        let t = hmac_parts(alg, prk, &[&t_prev, info, &[i as u8]])?;
        okm.extend_from_slice(&t);
        t_prev.zeroize();
        t_prev = t;
    }
    t_prev.zeroize();
    okm.truncate(length);
    Ok(okm)
}

/// Encode the HkdfLabel structure:
///
/// ```text
/// struct {
///     uint16 length;
///     opaque label<7..255>;   // "tls13 " + label
///     opaque context<0..255>;
/// } HkdfLabel;
/// ```
fn encode_hkdf_label(length: u16, label: &[u8], context: &[u8]) -> Vec<u8> {
    let full_label_len = 6 + label.len();
    let mut buf = Vec::with_capacity(2 + 1 + full_label_len + 1 + context.len());
    buf.extend_from_slice(&length.to_be_bytes());
    buf.push(full_label_len as u8);
    buf.extend_from_slice(b"tls13 ");
    buf.extend_from_slice(label);
    buf.push(context.len() as u8);
    buf.extend_from_slice(context);
    buf
}

/// HKDF-Expand-Label(Secret, Label, Context, Length).
pub fn hkdf_expand_label(
    alg: HashAlg,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    length: usize,
) -> Result<Vec<u8>, TlsError> {
    let info = encode_hkdf_label(length as u16, label, context);
    hkdf_expand(alg, secret, &info, length)
}

/// Derive-Secret(Secret, Label, TranscriptHash):
/// `HKDF-Expand-Label(Secret, Label, TranscriptHash, Hash.length)`.
pub fn derive_secret(
    alg: HashAlg,
    secret: &[u8],
    label: &[u8],
    transcript_hash: &[u8],
) -> Result<Vec<u8>, TlsError> {
    hkdf_expand_label(alg, secret, label, transcript_hash, alg.len())
}

/// Finished data for a base key:
/// `HMAC(HKDF-Expand-Label(base_key, "finished", "", Hash.length), transcript_hash)`.
pub fn compute_finished_data(
    alg: HashAlg,
    base_key: &[u8],
    transcript_hash: &[u8],
) -> Result<Vec<u8>, TlsError> {
    let mut finished_key = hkdf_expand_label(alg, base_key, b"finished", b"", alg.len())?;
    let out = hmac_hash(alg, &finished_key, transcript_hash);
    finished_key.zeroize();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn to_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    // RFC 5869 Test Case 1 (SHA-256)
    #[test]
    fn test_hkdf_extract_sha256() {
        let ikm = hex("0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b");
        let salt = hex("000102030405060708090a0b0c");
        let expected_prk = hex("077709362c2e32df0ddc3f0dc47bba6390b6c73bb50f9c3122ec844ad7c2b3e5");

        let prk = hkdf_extract(HashAlg::Sha256, &salt, &ikm).unwrap();
        assert_eq!(to_hex(&prk), to_hex(&expected_prk));
    }

    #[test]
    fn test_hkdf_expand_sha256() {
        let prk = hex("077709362c2e32df0ddc3f0dc47bba6390b6c73bb50f9c3122ec844ad7c2b3e5");
        let info = hex("f0f1f2f3f4f5f6f7f8f9");
        let expected_okm = hex(
            "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865",
        );

        let okm = hkdf_expand(HashAlg::Sha256, &prk, &info, 42).unwrap();
        assert_eq!(to_hex(&okm), to_hex(&expected_okm));
    }

    // RFC 5869 Test Case 3 (zero-length salt)
    #[test]
    fn test_hkdf_extract_empty_salt() {
        let ikm = hex("0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b");
        let expected_prk = hex("19ef24a32c717b167f33a91d6f648bdf96596776afdb6377ac434c1c293ccb04");

        let prk = hkdf_extract(HashAlg::Sha256, &[], &ikm).unwrap();
        assert_eq!(to_hex(&prk), to_hex(&expected_prk));
    }

    #[test]
    fn test_hkdf_extract_sha384_len() {
        let prk = hkdf_extract(HashAlg::Sha384, &[1, 2, 3], &[4, 5, 6]).unwrap();
        assert_eq!(prk.len(), 48);
    }

    #[test]
    fn test_encode_hkdf_label() {
        let label = encode_hkdf_label(16, b"key", b"");
        assert_eq!(label[0], 0x00);
        assert_eq!(label[1], 0x10);
        assert_eq!(label[2], 0x09);
        assert_eq!(&label[3..12], b"tls13 key");
        assert_eq!(label[12], 0x00);
        assert_eq!(label.len(), 13);
    }

    #[test]
    fn test_hkdf_expand_long_output() {
        let prk = hex("077709362c2e32df0ddc3f0dc47bba6390b6c73bb50f9c3122ec844ad7c2b3e5");
        let okm = hkdf_expand(HashAlg::Sha256, &prk, b"long expansion", 80).unwrap();
        assert_eq!(okm.len(), 80);

        // T(1) is a prefix of longer expansions
        let okm_short = hkdf_expand(HashAlg::Sha256, &prk, b"long expansion", 32).unwrap();
        assert_eq!(&okm[..32], &okm_short[..]);
    }

    #[test]
    fn test_hkdf_expand_too_large() {
        let prk = vec![0x42; 32];
        assert!(hkdf_expand(HashAlg::Sha256, &prk, b"", 255 * 32 + 1).is_err());
    }

    #[test]
    fn test_derive_secret_context_sensitivity() {
        let secret = vec![0xaa; 32];
        let a = derive_secret(HashAlg::Sha256, &secret, b"c hs traffic", &[0u8; 32]).unwrap();
        let b = derive_secret(HashAlg::Sha256, &secret, b"s hs traffic", &[0u8; 32]).unwrap();
        assert_ne!(a, b);
        let c = derive_secret(HashAlg::Sha256, &secret, b"c hs traffic", &[1u8; 32]).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_finished_data_deterministic() {
        let base = vec![0x17; 32];
        let th = vec![0x42; 32];
        let a = compute_finished_data(HashAlg::Sha256, &base, &th).unwrap();
        let b = compute_finished_data(HashAlg::Sha256, &base, &th).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
