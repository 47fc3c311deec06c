//! The CONNECTED state shared by both automata.
//!
//! Post-handshake traffic: KeyUpdate in both directions, NewSessionTicket
//! issuance (server) and storage (client), and exporter computation.

use std::time::{Duration, SystemTime};

use rand::RngCore;
use zeroize::Zeroize;

use crate::alert::Alert;
use crate::config::ConnectionParameters;
use crate::crypt::key_schedule::{compute_exporter, update_traffic_secret};
use crate::crypt::traffic_keys::TrafficKeys;
use crate::crypt::CipherSuiteParams;
use crate::error::TlsError;
use crate::extensions::{EarlyDataExtension, ExtensionList};
use crate::handshake::actions::{EpochKeys, HandshakeAction};
use crate::handshake::messages::{
    KeyUpdateBody, KeyUpdateRequest, NewSessionTicketBody,
};
use crate::handshake::{HandshakeMessage, HandshakeType};
use crate::psk::PreSharedKey;

/// Both endpoints land here after their Finished exchange. Carries the
/// frozen parameters and the live traffic secrets.
pub struct ConnectedState {
    pub params: ConnectionParameters,
    pub(crate) is_client: bool,
    pub(crate) suite_params: CipherSuiteParams,
    pub(crate) resumption_secret: Vec<u8>,
    pub(crate) client_traffic_secret: Vec<u8>,
    pub(crate) server_traffic_secret: Vec<u8>,
    pub(crate) exporter_secret: Vec<u8>,
}

impl Drop for ConnectedState {
    fn drop(&mut self) {
        self.resumption_secret.zeroize();
        self.client_traffic_secret.zeroize();
        self.server_traffic_secret.zeroize();
        self.exporter_secret.zeroize();
    }
}

fn internal<E>(_: E) -> Alert {
    Alert::InternalError
}

impl ConnectedState {
    fn local_secret_mut(&mut self) -> &mut Vec<u8> {
        if self.is_client {
            &mut self.client_traffic_secret
        } else {
            &mut self.server_traffic_secret
        }
    }

    fn peer_secret_mut(&mut self) -> &mut Vec<u8> {
        if self.is_client {
            &mut self.server_traffic_secret
        } else {
            &mut self.client_traffic_secret
        }
    }

    /// Emit a KeyUpdate and rotate the local send epoch.
    pub fn key_update(
        &mut self,
        request: KeyUpdateRequest,
    ) -> Result<Vec<HandshakeAction>, Alert> {
        let alg = self.suite_params.hash;
        let suite = self.suite_params.suite;
        let params = self.suite_params.clone();

        let message = HandshakeMessage::from_body(&KeyUpdateBody {
            request_update: request,
        })
        .map_err(internal)?;

        let local = self.local_secret_mut();
        let mut new_secret = update_traffic_secret(alg, local).map_err(internal)?;
        let keys = TrafficKeys::derive(&params, &new_secret).map_err(internal)?;
        local.zeroize();
        std::mem::swap(local, &mut new_secret);

        log::debug!("key update: rotating local send secret");
        Ok(vec![
            HandshakeAction::SendMessage(message),
            HandshakeAction::RekeyOut(EpochKeys {
                label: "application",
                suite,
                keys,
            }),
        ])
    }

    /// Server: produce a NewSessionTicket and the matching StorePsk action.
    pub fn new_session_ticket(
        &mut self,
        ticket_len: usize,
        lifetime: u32,
        early_data_lifetime: u32,
    ) -> Result<Vec<HandshakeAction>, Alert> {
        if self.is_client {
            return Err(Alert::InternalError);
        }

        let mut ticket = vec![0u8; ticket_len];
        rand::rngs::OsRng.fill_bytes(&mut ticket);
        let ticket_age_add = rand::rngs::OsRng.next_u32();

        let mut extensions = ExtensionList::new();
        if early_data_lifetime > 0 {
            extensions.add(
                EarlyDataExtension {
                    max_early_data_size: Some(early_data_lifetime),
                }
                .to_extension()
                .map_err(internal)?,
            );
        }

        let body = NewSessionTicketBody {
            ticket_lifetime: lifetime,
            ticket_age_add,
            ticket: ticket.clone(),
            extensions,
        };
        let message = HandshakeMessage::from_body(&body).map_err(internal)?;

        let now = SystemTime::now();
        let psk = PreSharedKey {
            cipher_suite: self.suite_params.suite,
            is_resumption: true,
            identity: ticket,
            key: self.resumption_secret.clone(),
            next_proto: self.params.next_proto.clone(),
            received_at: now,
            expires_at: now + Duration::from_secs(lifetime as u64),
            ticket_age_add,
        };

        log::debug!(
            "issuing session ticket: identity={}",
            hex::encode(&psk.identity)
        );
        Ok(vec![
            HandshakeAction::StorePsk(psk),
            HandshakeAction::SendMessage(message),
        ])
    }

    /// Process an incoming post-handshake message. The state stays
    /// CONNECTED; only key material rotates.
    pub fn next(&mut self, hm: &HandshakeMessage) -> Result<Vec<HandshakeAction>, Alert> {
        match hm.msg_type {
            HandshakeType::KeyUpdate => {
                let ku: KeyUpdateBody = hm.parse_as().map_err(|_| Alert::DecodeError)?;

                let alg = self.suite_params.hash;
                let suite = self.suite_params.suite;
                let params = self.suite_params.clone();

                let peer = self.peer_secret_mut();
                let mut new_secret = update_traffic_secret(alg, peer).map_err(internal)?;
                let keys = TrafficKeys::derive(&params, &new_secret).map_err(internal)?;
                peer.zeroize();
                std::mem::swap(peer, &mut new_secret);

                log::debug!("key update received: rotating peer secret");
                let mut actions = vec![HandshakeAction::RekeyIn(EpochKeys {
                    label: "application",
                    suite,
                    keys,
                })];
                if ku.request_update == KeyUpdateRequest::UpdateRequested {
                    actions.extend(self.key_update(KeyUpdateRequest::UpdateNotRequested)?);
                }
                Ok(actions)
            }
            HandshakeType::NewSessionTicket => {
                if !self.is_client {
                    return Err(Alert::UnexpectedMessage);
                }
                let nst: NewSessionTicketBody =
                    hm.parse_as().map_err(|_| Alert::DecodeError)?;

                let now = SystemTime::now();
                let psk = PreSharedKey {
                    cipher_suite: self.suite_params.suite,
                    is_resumption: true,
                    identity: nst.ticket.clone(),
                    key: self.resumption_secret.clone(),
                    next_proto: self.params.next_proto.clone(),
                    received_at: now,
                    expires_at: now + Duration::from_secs(nst.ticket_lifetime as u64),
                    ticket_age_add: nst.ticket_age_add,
                };
                log::debug!(
                    "session ticket received: identity={}",
                    hex::encode(&psk.identity)
                );
                Ok(vec![HandshakeAction::StorePsk(psk)])
            }
            _ => Err(Alert::UnexpectedMessage),
        }
    }

    /// RFC 8446 Section 7.5 exporter.
    pub fn compute_exporter(
        &self,
        label: &[u8],
        context: &[u8],
        length: usize,
    ) -> Result<Vec<u8>, TlsError> {
        compute_exporter(
            self.suite_params.hash,
            &self.exporter_secret,
            label,
            context,
            length,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypt::CipherSuite;

    fn connected(is_client: bool) -> ConnectedState {
        ConnectedState {
            params: ConnectionParameters::default(),
            is_client,
            suite_params: CipherSuiteParams::from_suite(CipherSuite::TLS_AES_128_GCM_SHA256)
                .unwrap(),
            resumption_secret: vec![0x11; 32],
            client_traffic_secret: vec![0x22; 32],
            server_traffic_secret: vec![0x33; 32],
            exporter_secret: vec![0x44; 32],
        }
    }

    #[test]
    fn test_key_update_rotates_local_secret_only() {
        let mut state = connected(true);
        let before_client = state.client_traffic_secret.clone();
        let before_server = state.server_traffic_secret.clone();

        let actions = state
            .key_update(KeyUpdateRequest::UpdateNotRequested)
            .unwrap();
        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[0], HandshakeAction::SendMessage(_)));
        assert!(matches!(actions[1], HandshakeAction::RekeyOut(_)));

        assert_ne!(state.client_traffic_secret, before_client);
        assert_eq!(state.server_traffic_secret, before_server);
    }

    #[test]
    fn test_incoming_key_update_with_request_triggers_response() {
        let mut server = connected(false);
        let ku = HandshakeMessage::from_body(&KeyUpdateBody {
            request_update: KeyUpdateRequest::UpdateRequested,
        })
        .unwrap();
        let actions = server.next(&ku).unwrap();
        // RekeyIn for the peer, then our own KeyUpdate + RekeyOut
        assert_eq!(actions.len(), 3);
        assert!(matches!(actions[0], HandshakeAction::RekeyIn(_)));
        assert!(matches!(actions[1], HandshakeAction::SendMessage(_)));
        assert!(matches!(actions[2], HandshakeAction::RekeyOut(_)));
    }

    #[test]
    fn test_key_update_secrets_track_between_peers() {
        let mut client = connected(true);
        let mut server = connected(false);

        let actions = client
            .key_update(KeyUpdateRequest::UpdateNotRequested)
            .unwrap();
        let HandshakeAction::SendMessage(msg) = &actions[0] else {
            panic!("expected SendMessage");
        };
        server.next(msg).unwrap();
        assert_eq!(client.client_traffic_secret, server.client_traffic_secret);
        assert_eq!(client.server_traffic_secret, server.server_traffic_secret);
    }

    #[test]
    fn test_new_session_ticket_round() {
        let mut server = connected(false);
        let actions = server.new_session_ticket(16, 3600, 0).unwrap();
        assert_eq!(actions.len(), 2);
        let HandshakeAction::StorePsk(psk) = &actions[0] else {
            panic!("expected StorePsk");
        };
        assert_eq!(psk.identity.len(), 16);
        assert!(psk.is_resumption);
        assert_eq!(psk.key, server.resumption_secret);

        // Client consumes the ticket and derives the same PSK material
        let HandshakeAction::SendMessage(msg) = &actions[1] else {
            panic!("expected SendMessage");
        };
        let mut client = connected(true);
        let client_actions = client.next(msg).unwrap();
        let HandshakeAction::StorePsk(client_psk) = &client_actions[0] else {
            panic!("expected StorePsk");
        };
        assert_eq!(client_psk.identity, psk.identity);
        assert_eq!(client_psk.key, psk.key);
        assert_eq!(client_psk.ticket_age_add, psk.ticket_age_add);
    }

    #[test]
    fn test_ticket_from_client_side_is_error() {
        let mut client = connected(true);
        assert!(client.new_session_ticket(16, 60, 0).is_err());
    }

    #[test]
    fn test_server_rejects_incoming_ticket() {
        let mut server = connected(false);
        let nst = HandshakeMessage::from_body(&NewSessionTicketBody {
            ticket_lifetime: 1,
            ticket_age_add: 2,
            ticket: vec![3],
            extensions: ExtensionList::new(),
        })
        .unwrap();
        assert_eq!(server.next(&nst).unwrap_err(), Alert::UnexpectedMessage);
    }

    #[test]
    fn test_exporter_matches_and_differs() {
        let a = connected(true);
        let b = connected(false);
        let ea = a.compute_exporter(b"E", b"", 20).unwrap();
        let eb = b.compute_exporter(b"E", b"", 20).unwrap();
        assert_eq!(ea, eb);
        assert_ne!(ea, a.compute_exporter(b"F", b"", 20).unwrap());
        assert_ne!(ea, a.compute_exporter(b"E", b"A", 20).unwrap());
    }
}
