//! Key-share generation and (EC)DH key agreement.
//!
//! X25519 and P-256 are handled natively. The BN256 pairing group used by
//! the reverse-firewall construction is external: its arithmetic enters
//! through the [`PairingGroup`] trait and the shares themselves are carried
//! as opaque byte strings.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;

use super::NamedGroup;
use crate::error::TlsError;

/// External provider for the pairing-friendly BN256 group.
pub trait PairingGroup: Send + Sync {
    /// Generate a fresh key share. Returns `(public, secret)` as opaque bytes.
    fn new_key_share(&self) -> Result<(Vec<u8>, Vec<u8>), TlsError>;

    /// Agree on a shared secret from the peer's public share and our secret.
    fn key_agreement(&self, peer: &[u8], secret: &[u8]) -> Result<Vec<u8>, TlsError>;
}

/// Hook for the firewall's split key schedule: the firewall combines the
/// server share `gy` with its own blinded contribution `hzx` to obtain the
/// secret it would need to re-encrypt record payloads. The construction is
/// defined by the reverse-firewall paper; only the interface lives here.
pub trait FirewallKeyAgreement: Send + Sync {
    fn agree(&self, gy: &[u8], hzx: &[u8]) -> Result<Vec<u8>, TlsError>;
}

/// Private half of an offered key share.
pub enum KeyShareSecret {
    X25519(x25519_dalek::StaticSecret),
    P256(p256::ecdh::EphemeralSecret),
    /// Opaque secret owned by an external [`PairingGroup`].
    External(Vec<u8>),
}

/// Generate a key share for `group`. Returns the public share bytes and the
/// private half.
pub fn new_key_share(
    group: NamedGroup,
    pairing: Option<&dyn PairingGroup>,
) -> Result<(Vec<u8>, KeyShareSecret), TlsError> {
    match group {
        NamedGroup::X25519 => {
            let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
            let public = x25519_dalek::PublicKey::from(&secret);
            Ok((public.as_bytes().to_vec(), KeyShareSecret::X25519(secret)))
        }
        NamedGroup::SECP256R1 => {
            let secret = p256::ecdh::EphemeralSecret::random(&mut OsRng);
            let public = secret.public_key().to_encoded_point(false);
            Ok((public.as_bytes().to_vec(), KeyShareSecret::P256(secret)))
        }
        NamedGroup::BN256 => {
            let provider = pairing.ok_or_else(|| {
                TlsError::Config("no pairing group provider configured for BN256".into())
            })?;
            let (public, secret) = provider.new_key_share()?;
            Ok((public, KeyShareSecret::External(secret)))
        }
        _ => Err(TlsError::Protocol(format!(
            "unsupported named group {:04x}",
            group.0
        ))),
    }
}

/// Compute the shared secret between our private half and the peer's share.
pub fn key_agreement(
    group: NamedGroup,
    peer_share: &[u8],
    secret: &KeyShareSecret,
    pairing: Option<&dyn PairingGroup>,
) -> Result<Vec<u8>, TlsError> {
    match (group, secret) {
        (NamedGroup::X25519, KeyShareSecret::X25519(sk)) => {
            let bytes: [u8; 32] = peer_share
                .try_into()
                .map_err(|_| TlsError::Decode("x25519 share must be 32 bytes".into()))?;
            let peer = x25519_dalek::PublicKey::from(bytes);
            Ok(sk.diffie_hellman(&peer).as_bytes().to_vec())
        }
        (NamedGroup::SECP256R1, KeyShareSecret::P256(sk)) => {
            let peer = p256::PublicKey::from_sec1_bytes(peer_share)
                .map_err(|_| TlsError::Decode("invalid P-256 share".into()))?;
            Ok(sk.diffie_hellman(&peer).raw_secret_bytes().to_vec())
        }
        (NamedGroup::BN256, KeyShareSecret::External(sk)) => {
            let provider = pairing.ok_or_else(|| {
                TlsError::Config("no pairing group provider configured for BN256".into())
            })?;
            provider.key_agreement(peer_share, sk)
        }
        _ => Err(TlsError::Internal(
            "key share secret does not match group".into(),
        )),
    }
}
