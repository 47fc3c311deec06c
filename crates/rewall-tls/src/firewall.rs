//! Cryptographic reverse-firewall proxy.
//!
//! An on-path rerandomiser for the first two handshake messages: BN256 key
//! shares in the ClientHello are replaced with re-blinded group elements so
//! a compromised client cannot leak through its share, while the paired
//! secrets stay predictable to the legitimate peers. Everything after the
//! two hellos passes through unchanged; re-encrypting record payloads would
//! require the firewall key from [`crate::crypt::kx::FirewallKeyAgreement`],
//! which is where that derivation plugs in.

use std::sync::Arc;

use crate::crypt::NamedGroup;
use crate::error::TlsError;
use crate::extensions::KeyShareExtension;
use crate::handshake::messages::{ClientHelloBody, ServerHelloBody};
use crate::handshake::{HandshakeBody, HandshakeMessage, HandshakeType};
use crate::record::{ContentType, RECORD_HEADER_LEN};

/// Direction of a proxied byte flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ClientToServer => f.write_str("C->S"),
            Direction::ServerToClient => f.write_str("S->C"),
        }
    }
}

/// Re-blinds a BN256 group element. Provided by the pairing backend; the
/// firewall itself never learns the associated secrets.
pub type ShareRerandomizer = dyn Fn(&[u8]) -> Result<Vec<u8>, TlsError> + Send + Sync;

/// Strictly parse one handshake record and return the body of the expected
/// message. The record must contain exactly that one message.
fn parse_packet(expected: HandshakeType, packet: &[u8]) -> Result<&[u8], TlsError> {
    if packet.len() < RECORD_HEADER_LEN {
        return Err(TlsError::Decode("packet too short for record header".into()));
    }
    if packet[0] != ContentType::Handshake as u8 {
        return Err(TlsError::Decode("not a handshake packet".into()));
    }
    let record_len = ((packet[3] as usize) << 8) | (packet[4] as usize);
    if packet.len() != RECORD_HEADER_LEN + record_len {
        return Err(TlsError::Decode(format!(
            "record length mismatch: header says {record_len}, have {}",
            packet.len() - RECORD_HEADER_LEN
        )));
    }
    let fragment = &packet[RECORD_HEADER_LEN..];

    if fragment.len() < 4 {
        return Err(TlsError::Decode("packet too short for handshake header".into()));
    }
    if fragment[0] != expected as u8 {
        return Err(TlsError::Decode(format!(
            "unexpected handshake type {} (want {})",
            fragment[0], expected as u8
        )));
    }
    let body_len =
        ((fragment[1] as usize) << 16) | ((fragment[2] as usize) << 8) | (fragment[3] as usize);
    if fragment.len() != 4 + body_len {
        return Err(TlsError::Decode("handshake length mismatch".into()));
    }
    Ok(&fragment[4..])
}

/// Wrap a handshake body back into a single plaintext record.
fn write_packet(msg_type: HandshakeType, body: &[u8]) -> Vec<u8> {
    let message = HandshakeMessage {
        msg_type,
        body: body.to_vec(),
    };
    let wire = message.marshal();
    let mut packet = Vec::with_capacity(RECORD_HEADER_LEN + wire.len());
    packet.push(ContentType::Handshake as u8);
    packet.push(0x03);
    packet.push(0x01);
    packet.push((wire.len() >> 8) as u8);
    packet.push(wire.len() as u8);
    packet.extend_from_slice(&wire);
    packet
}

/// Stateful bidirectional rewriting proxy.
///
/// The two booleans are each written at most once, by their own direction's
/// pump. The struct itself is not synchronised; callers running one pump
/// thread per direction must serialise `process_message` calls (a mutex
/// around the proxy) or split the proxy per direction.
pub struct ReverseFirewallProxy {
    read_client_hello: bool,
    read_server_hello: bool,
    rerandomize: Arc<ShareRerandomizer>,
}

impl ReverseFirewallProxy {
    pub fn new(rerandomize: Arc<ShareRerandomizer>) -> Self {
        Self {
            read_client_hello: false,
            read_server_hello: false,
            rerandomize,
        }
    }

    /// Process one inbound packet for `direction`, returning the bytes to
    /// forward. The first C->S packet must be a ClientHello record and the
    /// first S->C packet a ServerHello record; any parse failure is fatal
    /// to the proxied connection, no partial rewrites.
    pub fn process_message(
        &mut self,
        direction: Direction,
        packet: &[u8],
    ) -> Result<Vec<u8>, TlsError> {
        log::trace!("{direction}: in {} bytes", packet.len());
        let out = match direction {
            Direction::ClientToServer if !self.read_client_hello => {
                let out = self.process_client_hello(packet)?;
                log::trace!("{direction}: out {} bytes (rewritten)", out.len());
                out
            }
            Direction::ServerToClient if !self.read_server_hello => {
                let out = self.process_server_hello(packet)?;
                log::trace!("{direction}: out {} bytes (rewritten)", out.len());
                out
            }
            // Later traffic passes through unchanged. Re-encrypting record
            // payloads here needs the firewall key schedule hooked up via
            // FirewallKeyAgreement.
            _ => packet.to_vec(),
        };
        Ok(out)
    }

    fn process_client_hello(&mut self, packet: &[u8]) -> Result<Vec<u8>, TlsError> {
        let body = parse_packet(HandshakeType::ClientHello, packet)?;
        let mut ch = ClientHelloBody::unmarshal(body)?;

        if let Some(mut shares) =
            KeyShareExtension::from_list(HandshakeType::ClientHello, &ch.extensions)?
        {
            let mut rewritten = false;
            for share in &mut shares.shares {
                if share.group == NamedGroup::BN256 {
                    log::debug!("rerandomizing BN256 client key share");
                    share.key_exchange = (self.rerandomize)(&share.key_exchange)?;
                    rewritten = true;
                }
            }
            if rewritten {
                // add() replaces in place, preserving extension order.
                ch.extensions.add(shares.to_extension()?);
            }
        }

        let out = ch.marshal()?;
        self.read_client_hello = true;
        Ok(write_packet(HandshakeType::ClientHello, &out))
    }

    fn process_server_hello(&mut self, packet: &[u8]) -> Result<Vec<u8>, TlsError> {
        let body = parse_packet(HandshakeType::ServerHello, packet)?;
        let sh = ServerHelloBody::unmarshal(body)?;

        if let Some(shares) =
            KeyShareExtension::from_list(HandshakeType::ServerHello, &sh.extensions)?
        {
            if shares.shares.first().map(|s| s.group) == Some(NamedGroup::BN256) {
                // The server share's rerandomisation is completed together
                // with the firewall's own key derivation; the share itself
                // is forwarded as received.
                log::debug!("BN256 server key share observed");
            }
        }

        let out = sh.marshal()?;
        self.read_server_hello = true;
        Ok(write_packet(HandshakeType::ServerHello, &out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::{CipherSuite, NamedGroup};
    use crate::extensions::{
        Extension, ExtensionList, ExtensionType, KeyShareEntry, SupportedGroupsExtension,
        SupportedVersionsExtension,
    };
    use crate::SUPPORTED_VERSION;

    /// Deterministic stand-in for the pairing backend: flips every byte.
    fn test_rerandomizer() -> Arc<ShareRerandomizer> {
        Arc::new(|share: &[u8]| Ok(share.iter().map(|b| b ^ 0xff).collect()))
    }

    fn sample_client_hello() -> ClientHelloBody {
        let mut extensions = ExtensionList::new();
        extensions.add(
            SupportedVersionsExtension(vec![SUPPORTED_VERSION])
                .to_extension()
                .unwrap(),
        );
        extensions.add(
            KeyShareExtension {
                role: HandshakeType::ClientHello,
                shares: vec![
                    KeyShareEntry {
                        group: NamedGroup::X25519,
                        key_exchange: vec![0x11; 32],
                    },
                    KeyShareEntry {
                        group: NamedGroup::BN256,
                        key_exchange: vec![0x22; 192],
                    },
                ],
            }
            .to_extension()
            .unwrap(),
        );
        extensions.add(
            SupportedGroupsExtension(vec![NamedGroup::X25519, NamedGroup::BN256])
                .to_extension()
                .unwrap(),
        );
        extensions.add(Extension {
            extension_type: ExtensionType(0x7777),
            data: vec![0xde, 0xad],
        });
        ClientHelloBody {
            random: [0u8; 32],
            cipher_suites: vec![CipherSuite::TLS_AES_128_GCM_SHA256],
            extensions,
        }
    }

    fn packet_for<T: HandshakeBody>(body: &T) -> Vec<u8> {
        write_packet(T::TYPE, &body.marshal().unwrap())
    }

    #[test]
    fn test_client_hello_bn256_share_is_rerandomized() {
        let ch = sample_client_hello();
        let packet = packet_for(&ch);

        let mut proxy = ReverseFirewallProxy::new(test_rerandomizer());
        let out = proxy
            .process_message(Direction::ClientToServer, &packet)
            .unwrap();

        // Valid record framing: handshake record, exact length
        assert_eq!(out[0], 22);
        assert_eq!(&out[1..3], &[0x03, 0x01]);
        let record_len = ((out[3] as usize) << 8) | out[4] as usize;
        assert_eq!(out.len(), 5 + record_len);

        let body = parse_packet(HandshakeType::ClientHello, &out).unwrap();
        let rewritten = ClientHelloBody::unmarshal(body).unwrap();

        // The BN256 share changed exactly per the rerandomizer; the X25519
        // share and everything else survive untouched.
        let shares =
            KeyShareExtension::from_list(HandshakeType::ClientHello, &rewritten.extensions)
                .unwrap()
                .unwrap();
        assert_eq!(shares.shares.len(), 2);
        assert_eq!(shares.shares[0].group, NamedGroup::X25519);
        assert_eq!(shares.shares[0].key_exchange, vec![0x11; 32]);
        assert_eq!(shares.shares[1].group, NamedGroup::BN256);
        assert_eq!(shares.shares[1].key_exchange, vec![0xdd; 192]);

        // Extension order preserved
        let types: Vec<u16> = rewritten
            .extensions
            .iter()
            .map(|e| e.extension_type.0)
            .collect();
        let original_types: Vec<u16> =
            ch.extensions.iter().map(|e| e.extension_type.0).collect();
        assert_eq!(types, original_types);

        // Everything except the key_share extension is byte-identical
        for (a, b) in rewritten.extensions.iter().zip(ch.extensions.iter()) {
            if a.extension_type != ExtensionType::KEY_SHARE {
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_client_hello_without_bn256_roundtrips_identically() {
        let mut ch = sample_client_hello();
        let mut extensions = ExtensionList::new();
        for ext in ch.extensions.iter() {
            if ext.extension_type != ExtensionType::KEY_SHARE {
                extensions.add(ext.clone());
            }
        }
        extensions.add(
            KeyShareExtension {
                role: HandshakeType::ClientHello,
                shares: vec![KeyShareEntry {
                    group: NamedGroup::X25519,
                    key_exchange: vec![0x11; 32],
                }],
            }
            .to_extension()
            .unwrap(),
        );
        ch.extensions = extensions;
        let packet = packet_for(&ch);

        let mut proxy = ReverseFirewallProxy::new(test_rerandomizer());
        let out = proxy
            .process_message(Direction::ClientToServer, &packet)
            .unwrap();
        assert_eq!(out, packet);
    }

    #[test]
    fn test_server_hello_is_parsed_as_server_hello_and_forwarded() {
        let mut extensions = ExtensionList::new();
        extensions.add(
            KeyShareExtension {
                role: HandshakeType::ServerHello,
                shares: vec![KeyShareEntry {
                    group: NamedGroup::BN256,
                    key_exchange: vec![0x33; 192],
                }],
            }
            .to_extension()
            .unwrap(),
        );
        let sh = ServerHelloBody {
            version: SUPPORTED_VERSION,
            random: [0u8; 32],
            cipher_suite: CipherSuite::TLS_AES_128_GCM_SHA256,
            extensions,
        };
        let packet = packet_for(&sh);

        let mut proxy = ReverseFirewallProxy::new(test_rerandomizer());
        let out = proxy
            .process_message(Direction::ServerToClient, &packet)
            .unwrap();
        // The hook records the share; the bytes are forwarded unchanged.
        assert_eq!(out, packet);
    }

    #[test]
    fn test_later_traffic_passes_through() {
        let ch_packet = packet_for(&sample_client_hello());
        let mut proxy = ReverseFirewallProxy::new(test_rerandomizer());
        proxy
            .process_message(Direction::ClientToServer, &ch_packet)
            .unwrap();

        // After the ClientHello, arbitrary bytes pass through unchanged in
        // that direction, even unparseable ones.
        let record = vec![23u8, 0x03, 0x01, 0x00, 0x03, 0xaa, 0xbb, 0xcc];
        let out = proxy
            .process_message(Direction::ClientToServer, &record)
            .unwrap();
        assert_eq!(out, record);
    }

    #[test]
    fn test_parse_failures_are_fatal() {
        let mut proxy = ReverseFirewallProxy::new(test_rerandomizer());

        // Wrong content type
        let bad = vec![23u8, 0x03, 0x01, 0x00, 0x01, 0x00];
        assert!(proxy
            .process_message(Direction::ClientToServer, &bad)
            .is_err());

        // Length mismatch
        let mut packet = packet_for(&sample_client_hello());
        packet.push(0x00);
        assert!(proxy
            .process_message(Direction::ClientToServer, &packet)
            .is_err());

        // A ServerHello record where a ClientHello is expected
        let sh = ServerHelloBody {
            version: SUPPORTED_VERSION,
            random: [0u8; 32],
            cipher_suite: CipherSuite::TLS_AES_128_GCM_SHA256,
            extensions: ExtensionList::new(),
        };
        let sh_packet = packet_for(&sh);
        assert!(proxy
            .process_message(Direction::ClientToServer, &sh_packet)
            .is_err());
    }

    #[test]
    fn test_direction_state_is_independent() {
        let ch_packet = packet_for(&sample_client_hello());
        let sh = ServerHelloBody {
            version: SUPPORTED_VERSION,
            random: [0u8; 32],
            cipher_suite: CipherSuite::TLS_AES_128_GCM_SHA256,
            extensions: ExtensionList::new(),
        };
        let sh_packet = packet_for(&sh);

        let mut proxy = ReverseFirewallProxy::new(test_rerandomizer());
        proxy
            .process_message(Direction::ClientToServer, &ch_packet)
            .unwrap();
        // The S->C side still expects its ServerHello
        proxy
            .process_message(Direction::ServerToClient, &sh_packet)
            .unwrap();
        // Both sides now pass through
        let opaque = vec![23u8, 0x03, 0x01, 0x00, 0x01, 0x42];
        assert_eq!(
            proxy
                .process_message(Direction::ServerToClient, &opaque)
                .unwrap(),
            opaque
        );
    }
}
