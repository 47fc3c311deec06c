//! Client handshake automaton.
//!
//! ```text
//!                            START <----+
//!             Send ClientHello |        | Recv HelloRetryRequest
//!          /                   v        |
//!         |                  WAIT_SH ---+
//!     Can |                    | Recv ServerHello
//!    send |                    v
//!   early |                 WAIT_EE
//!    data |                    | Recv EncryptedExtensions
//!         |           +--------+--------+
//!         |     Using |                 | Using certificate
//!         |       PSK |                 v
//!         |           |            WAIT_CERT_CR
//!         |           |        Recv |       | Recv CertificateRequest
//!         |           | Certificate |       v
//!         |           |             |    WAIT_CERT
//!         |           |             |       | Recv Certificate
//!         |           |             v       v
//!         |           |              WAIT_CV
//!         |           |                 | Recv CertificateVerify
//!         |           +> WAIT_FINISHED <+
//!         \                  | Recv Finished
//!                            v
//!                        CONNECTED
//! ```
//!
//! Each state consumes at most one message and returns the next state plus
//! an ordered action list; `next(None)` drives the initial ClientHello.

use std::collections::HashMap;

use subtle::ConstantTimeEq;

use crate::alert::Alert;
use crate::config::{Capabilities, ConnectionOptions, ConnectionParameters};
use crate::crypt::key_schedule::{finished_data, KeySchedule};
use crate::crypt::kx::{key_agreement, new_key_share, KeyShareSecret};
use crate::crypt::traffic_keys::TrafficKeys;
use crate::crypt::transcript::TranscriptHash;
use crate::crypt::{CipherSuiteParams, NamedGroup};
use crate::error::TlsError;
use crate::extensions::{
    AlpnExtension, CookieExtension, EarlyDataExtension, ExtensionList, ExtensionType,
    KeyShareExtension, PreSharedKeyExtension, PskIdentity, PskKeyExchangeModesExtension,
    ServerNameExtension, SignatureAlgorithmsExtension, SupportedGroupsExtension,
    SupportedVersionsExtension,
};
use crate::handshake::actions::{EpochKeys, HandshakeAction};
use crate::handshake::connected::ConnectedState;
use crate::handshake::messages::{
    CertificateBody, CertificateEntry, CertificateRequestBody, CertificateVerifyBody,
    ClientHelloBody, EncryptedExtensionsBody, EndOfEarlyDataBody, FinishedBody,
    HelloRetryRequestBody, ServerHelloBody,
};
use crate::handshake::signing::{sign_certificate_verify, verify_certificate_verify};
use crate::handshake::{HandshakeMessage, HandshakeType};
use crate::psk::PreSharedKey;
use crate::SUPPORTED_VERSION;

type Transition = Result<(ClientState, Vec<HandshakeAction>), Alert>;

fn internal<E: std::fmt::Display>(e: E) -> Alert {
    log::debug!("internal handshake failure: {e}");
    Alert::InternalError
}

pub enum ClientState {
    Start(ClientStart),
    WaitSh(ClientWaitSh),
    WaitEe(ClientWaitEe),
    WaitCertCr(ClientWaitCertCr),
    WaitCert(ClientWaitCert),
    WaitCv(ClientWaitCv),
    WaitFinished(ClientWaitFinished),
    Connected(ConnectedState),
}

impl ClientState {
    pub fn start(caps: Capabilities, opts: ConnectionOptions) -> Self {
        ClientState::Start(ClientStart {
            caps,
            opts,
            params: ConnectionParameters::default(),
            cookie: None,
            first_client_hello: None,
            hello_retry_request: None,
        })
    }

    /// Whether the next transition consumes a message.
    pub fn wants_message(&self) -> bool {
        !matches!(self, ClientState::Start(_) | ClientState::Connected(_))
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ClientState::Connected(_))
    }

    pub fn next(self, hm: Option<&HandshakeMessage>) -> Transition {
        match self {
            ClientState::Start(state) => state.next(hm),
            ClientState::WaitSh(state) => state.next(hm),
            ClientState::WaitEe(state) => state.next(hm),
            ClientState::WaitCertCr(state) => state.next(hm),
            ClientState::WaitCert(state) => state.next(hm),
            ClientState::WaitCv(state) => state.next(hm),
            ClientState::WaitFinished(state) => state.next(hm),
            ClientState::Connected(_) => Err(Alert::UnexpectedMessage),
        }
    }
}

/// Data every post-ServerHello state drags along for certificate handling.
struct AuthContext {
    certificates: Vec<std::sync::Arc<crate::cert::Certificate>>,
    auth_certificate: Option<std::sync::Arc<crate::config::AuthCertificateHook>>,
    insecure_skip_verify: bool,
}

pub struct ClientStart {
    caps: Capabilities,
    opts: ConnectionOptions,
    params: ConnectionParameters,
    cookie: Option<Vec<u8>>,
    first_client_hello: Option<HandshakeMessage>,
    hello_retry_request: Option<HandshakeMessage>,
}

impl ClientStart {
    fn next(mut self, hm: Option<&HandshakeMessage>) -> Transition {
        if hm.is_some() {
            log::debug!("[client start] unexpected message");
            return Err(Alert::UnexpectedMessage);
        }

        let server_name = self.opts.server_name.clone().ok_or(Alert::InternalError)?;
        self.params.server_name = Some(server_name.clone());

        // Offer one key share per configured group.
        let pairing = self.caps.pairing_group.clone();
        let mut offered_dh: HashMap<NamedGroup, KeyShareSecret> = HashMap::new();
        let mut shares = Vec::new();
        for group in &self.caps.groups {
            match new_key_share(*group, pairing.as_deref()) {
                Ok((public, secret)) => {
                    shares.push(crate::extensions::KeyShareEntry {
                        group: *group,
                        key_exchange: public,
                    });
                    offered_dh.insert(*group, secret);
                }
                Err(TlsError::Config(_)) if *group == NamedGroup::BN256 => {
                    log::warn!("skipping BN256 key share: no pairing provider configured");
                }
                Err(e) => return Err(internal(e)),
            }
        }

        let mut ch = ClientHelloBody {
            // Zeroed to keep the hello free of covert channels; freshness
            // comes from the key shares.
            random: [0u8; 32],
            cipher_suites: self.caps.cipher_suites.clone(),
            extensions: ExtensionList::new(),
        };

        let base_extensions = [
            SupportedVersionsExtension(vec![SUPPORTED_VERSION]).to_extension(),
            ServerNameExtension(server_name.clone()).to_extension(),
            KeyShareExtension {
                role: HandshakeType::ClientHello,
                shares,
            }
            .to_extension(),
            SupportedGroupsExtension(self.caps.groups.clone()).to_extension(),
            SignatureAlgorithmsExtension(self.caps.signature_schemes.clone()).to_extension(),
        ];
        for ext in base_extensions {
            ch.extensions.add(ext.map_err(internal)?);
        }
        if !self.opts.next_protos.is_empty() {
            ch.extensions
                .add(AlpnExtension(self.opts.next_protos.clone()).to_extension().map_err(internal)?);
        }
        if let Some(cookie) = &self.cookie {
            ch.extensions
                .add(CookieExtension(cookie.clone()).to_extension().map_err(internal)?);
        }

        // PSK and early data go last so the binder can be computed over the
        // truncated hello.
        let mut offered_psk: Option<PreSharedKey> = None;
        let mut key_schedule: Option<KeySchedule> = None;
        let mut early_keys: Option<TrafficKeys> = None;
        let psk_lookup = self
            .caps
            .psks
            .read()
            .map_err(internal)?
            .get(&server_name);

        let client_hello;
        if let Some(psk) = psk_lookup {
            let psk_params =
                CipherSuiteParams::from_suite(psk.cipher_suite).map_err(internal)?;

            // Narrow the offer to suites whose hash matches the PSK.
            let compatible: Vec<_> = ch
                .cipher_suites
                .iter()
                .copied()
                .filter(|s| {
                    CipherSuiteParams::from_suite(*s)
                        .map(|p| p.hash == psk_params.hash)
                        .unwrap_or(false)
                })
                .collect();
            ch.cipher_suites = compatible;

            if !self.opts.early_data.is_empty() {
                self.params.client_sending_early_data = true;
                ch.extensions
                    .add(EarlyDataExtension::empty().to_extension().map_err(internal)?);
            }

            if self.caps.psk_modes.is_empty() {
                log::debug!("[client start] PSK selected but no PSK modes");
                return Err(Alert::InternalError);
            }
            ch.extensions.add(
                PskKeyExchangeModesExtension(self.caps.psk_modes.clone())
                    .to_extension()
                    .map_err(internal)?,
            );

            let age_ms = std::time::SystemTime::now()
                .duration_since(psk.received_at)
                .unwrap_or_default()
                .as_millis() as u32;
            let mut psk_ext = PreSharedKeyExtension::client(
                vec![PskIdentity {
                    identity: psk.identity.clone(),
                    obfuscated_ticket_age: age_ms.wrapping_add(psk.ticket_age_add),
                }],
                vec![vec![0u8; psk_params.hash_len()]],
            );
            ch.extensions.add(psk_ext.to_extension().map_err(internal)?);

            // Binder over the truncated hello.
            let mut ks = KeySchedule::new(psk_params.clone());
            ks.derive_early_secret(Some(&psk.key)).map_err(internal)?;
            let binder_key = ks.derive_binder_key(psk.is_resumption).map_err(internal)?;
            let truncated = ch.truncated_for_binders().map_err(internal)?;
            let binder = finished_data(
                psk_params.hash,
                &binder_key,
                &psk_params.hash.digest(&truncated),
            )
            .map_err(internal)?;
            psk_ext.binders[0] = binder;
            ch.extensions.add(psk_ext.to_extension().map_err(internal)?);

            let hello = HandshakeMessage::from_body(&ch).map_err(|_| Alert::InternalError)?;

            // Early traffic keys over the complete hello.
            let ch_hash = psk_params.hash.digest(&hello.marshal());
            let early_secret = ks.derive_early_traffic_secret(&ch_hash).map_err(internal)?;
            early_keys =
                Some(TrafficKeys::derive(&psk_params, &early_secret).map_err(internal)?);

            offered_psk = Some(psk);
            key_schedule = Some(ks);
            client_hello = hello;
        } else if !self.opts.early_data.is_empty() {
            log::debug!("[client start] early data without a PSK");
            return Err(Alert::InternalError);
        } else {
            client_hello = HandshakeMessage::from_body(&ch).map_err(|_| Alert::InternalError)?;
        }

        let mut actions = vec![HandshakeAction::SendMessage(client_hello.clone())];
        if self.params.client_sending_early_data {
            let suite = offered_psk
                .as_ref()
                .map(|p| p.cipher_suite)
                .ok_or(Alert::InternalError)?;
            actions.push(HandshakeAction::RekeyOut(EpochKeys {
                label: "early",
                suite,
                keys: early_keys.ok_or(Alert::InternalError)?,
            }));
            actions.push(HandshakeAction::SendEarlyData);
        }

        log::debug!("[client start] -> [client wait_sh]");
        let next = ClientState::WaitSh(ClientWaitSh {
            caps: self.caps,
            params: self.params,
            offered_dh,
            offered_psk,
            key_schedule,
            first_client_hello: self.first_client_hello,
            hello_retry_request: self.hello_retry_request,
            client_hello,
            opts: self.opts,
        });
        Ok((next, actions))
    }
}

pub struct ClientWaitSh {
    caps: Capabilities,
    opts: ConnectionOptions,
    params: ConnectionParameters,
    offered_dh: HashMap<NamedGroup, KeyShareSecret>,
    offered_psk: Option<PreSharedKey>,
    key_schedule: Option<KeySchedule>,
    first_client_hello: Option<HandshakeMessage>,
    hello_retry_request: Option<HandshakeMessage>,
    client_hello: HandshakeMessage,
}

impl ClientWaitSh {
    fn next(mut self, hm: Option<&HandshakeMessage>) -> Transition {
        let hm = hm.ok_or(Alert::UnexpectedMessage)?;
        match hm.msg_type {
            HandshakeType::HelloRetryRequest => self.handle_hello_retry(hm),
            HandshakeType::ServerHello => self.handle_server_hello(hm),
            _ => {
                log::debug!("[client wait_sh] unexpected {:?}", hm.msg_type);
                Err(Alert::UnexpectedMessage)
            }
        }
    }

    fn handle_hello_retry(mut self, hm: &HandshakeMessage) -> Transition {
        if self.hello_retry_request.is_some() {
            log::debug!("[client wait_sh] second HelloRetryRequest");
            return Err(Alert::UnexpectedMessage);
        }

        let hrr: HelloRetryRequestBody = hm.parse_as().map_err(|_| Alert::DecodeError)?;
        if hrr.version != SUPPORTED_VERSION {
            return Err(Alert::ProtocolVersion);
        }
        if !self.caps.cipher_suites.contains(&hrr.cipher_suite) {
            log::debug!(
                "[client wait_sh] HRR with unsupported suite {:04x}",
                hrr.cipher_suite.0
            );
            return Err(Alert::HandshakeFailure);
        }
        // Narrow the next offer to the suite the server picked.
        self.caps.cipher_suites = vec![hrr.cipher_suite];

        // The only retry request we can answer is a cookie demand; anything
        // else in the extension set is unanswerable.
        let cookie = CookieExtension::from_list(&hrr.extensions)
            .map_err(|_| Alert::DecodeError)?;
        let (Some(cookie), 1) = (cookie, hrr.extensions.len()) else {
            log::debug!("[client wait_sh] HRR without a lone cookie extension");
            return Err(Alert::IllegalParameter);
        };

        // Replace the first hello with its message_hash in the transcript.
        let params =
            CipherSuiteParams::from_suite(hrr.cipher_suite).map_err(|_| Alert::HandshakeFailure)?;
        let first_client_hello = HandshakeMessage {
            msg_type: HandshakeType::MessageHash,
            body: params.hash.digest(&self.client_hello.marshal()),
        };

        log::debug!("[client wait_sh] -> [client start] (retry with cookie)");
        ClientStart {
            caps: self.caps,
            opts: self.opts,
            params: ConnectionParameters::default(),
            cookie: Some(cookie.0),
            first_client_hello: Some(first_client_hello),
            hello_retry_request: Some(hm.clone()),
        }
        .next(None)
    }

    fn handle_server_hello(mut self, hm: &HandshakeMessage) -> Transition {
        let sh: ServerHelloBody = hm.parse_as().map_err(|_| Alert::DecodeError)?;
        if sh.version != SUPPORTED_VERSION {
            return Err(Alert::ProtocolVersion);
        }
        if !self.caps.cipher_suites.contains(&sh.cipher_suite) {
            log::debug!(
                "[client wait_sh] unsupported suite {:04x}",
                sh.cipher_suite.0
            );
            return Err(Alert::HandshakeFailure);
        }

        let server_psk =
            PreSharedKeyExtension::from_list(HandshakeType::ServerHello, &sh.extensions)
                .map_err(|_| Alert::DecodeError)?;
        let server_key_share =
            KeyShareExtension::from_list(HandshakeType::ServerHello, &sh.extensions)
                .map_err(|_| Alert::DecodeError)?;

        if let Some(psk) = &server_psk {
            if psk.selected_identity == 0 && self.offered_psk.is_some() {
                self.params.using_psk = true;
            }
        }

        let mut dh_secret: Option<Vec<u8>> = None;
        if let Some(ks_ext) = &server_key_share {
            let share = ks_ext.shares.first().ok_or(Alert::DecodeError)?;
            let Some(secret) = self.offered_dh.get(&share.group) else {
                log::debug!("[client wait_sh] key share for a group we did not offer");
                return Err(Alert::IllegalParameter);
            };
            self.params.using_dh = true;
            let shared = key_agreement(
                share.group,
                &share.key_exchange,
                secret,
                self.caps.pairing_group.as_deref(),
            )
            .map_err(|_| Alert::IllegalParameter)?;
            dh_secret = Some(shared);
        }

        let suite_params =
            CipherSuiteParams::from_suite(sh.cipher_suite).map_err(|_| Alert::HandshakeFailure)?;
        self.params.cipher_suite = Some(sh.cipher_suite);

        let mut transcript = TranscriptHash::new(suite_params.hash);
        if let (Some(first), Some(hrr)) = (&self.first_client_hello, &self.hello_retry_request) {
            transcript.update(&first.marshal());
            transcript.update(&hrr.marshal());
        }
        transcript.update(&self.client_hello.marshal());
        transcript.update(&hm.marshal());

        let mut ks = if self.params.using_psk {
            let ks = self.key_schedule.take().ok_or(Alert::IllegalParameter)?;
            if ks.hash() != suite_params.hash {
                log::debug!("[client wait_sh] PSK hash does not match negotiated suite");
                return Err(Alert::HandshakeFailure);
            }
            ks
        } else {
            let mut ks = KeySchedule::new(suite_params.clone());
            ks.derive_early_secret(None).map_err(internal)?;
            ks
        };

        let zero = vec![0u8; suite_params.hash_len()];
        let dh = dh_secret.unwrap_or(zero);
        ks.derive_handshake_secret(&dh).map_err(internal)?;

        let h2 = transcript.current_hash();
        let (client_hs_secret, server_hs_secret) = ks
            .derive_handshake_traffic_secrets(&h2)
            .map_err(internal)?;
        ks.derive_master_secret().map_err(internal)?;

        let server_hs_keys =
            TrafficKeys::derive(&suite_params, &server_hs_secret).map_err(internal)?;
        let actions = vec![HandshakeAction::RekeyIn(EpochKeys {
            label: "handshake",
            suite: suite_params.suite,
            keys: server_hs_keys,
        })];

        log::debug!("[client wait_sh] -> [client wait_ee]");
        let next = ClientState::WaitEe(ClientWaitEe {
            auth: AuthContext {
                certificates: self.caps.certificates,
                auth_certificate: self.caps.auth_certificate,
                insecure_skip_verify: self.caps.insecure_skip_verify,
            },
            params: self.params,
            suite_params,
            transcript,
            key_schedule: ks,
            client_hs_secret,
            server_hs_secret,
        });
        Ok((next, actions))
    }
}

pub struct ClientWaitEe {
    auth: AuthContext,
    params: ConnectionParameters,
    suite_params: CipherSuiteParams,
    transcript: TranscriptHash,
    key_schedule: KeySchedule,
    client_hs_secret: Vec<u8>,
    server_hs_secret: Vec<u8>,
}

impl ClientWaitEe {
    fn next(mut self, hm: Option<&HandshakeMessage>) -> Transition {
        let hm = hm.ok_or(Alert::UnexpectedMessage)?;
        if hm.msg_type != HandshakeType::EncryptedExtensions {
            log::debug!("[client wait_ee] unexpected {:?}", hm.msg_type);
            return Err(Alert::UnexpectedMessage);
        }
        let ee: EncryptedExtensionsBody = hm.parse_as().map_err(|_| Alert::DecodeError)?;

        if let Some(alpn) = AlpnExtension::from_list(&ee.extensions).map_err(|_| Alert::DecodeError)? {
            if let Some(proto) = alpn.0.into_iter().next() {
                self.params.next_proto = Some(proto);
            }
        }
        self.params.using_early_data = ee.extensions.has(ExtensionType::EARLY_DATA);

        self.transcript.update(&hm.marshal());

        if self.params.using_psk {
            log::debug!("[client wait_ee] -> [client wait_finished]");
            let next = ClientState::WaitFinished(ClientWaitFinished {
                auth: self.auth,
                params: self.params,
                suite_params: self.suite_params,
                transcript: self.transcript,
                key_schedule: self.key_schedule,
                client_hs_secret: self.client_hs_secret,
                server_hs_secret: self.server_hs_secret,
                certificate_request: None,
            });
            return Ok((next, Vec::new()));
        }

        log::debug!("[client wait_ee] -> [client wait_cert_cr]");
        let next = ClientState::WaitCertCr(ClientWaitCertCr {
            auth: self.auth,
            params: self.params,
            suite_params: self.suite_params,
            transcript: self.transcript,
            key_schedule: self.key_schedule,
            client_hs_secret: self.client_hs_secret,
            server_hs_secret: self.server_hs_secret,
        });
        Ok((next, Vec::new()))
    }
}

pub struct ClientWaitCertCr {
    auth: AuthContext,
    params: ConnectionParameters,
    suite_params: CipherSuiteParams,
    transcript: TranscriptHash,
    key_schedule: KeySchedule,
    client_hs_secret: Vec<u8>,
    server_hs_secret: Vec<u8>,
}

impl ClientWaitCertCr {
    fn next(mut self, hm: Option<&HandshakeMessage>) -> Transition {
        let hm = hm.ok_or(Alert::UnexpectedMessage)?;
        match hm.msg_type {
            HandshakeType::Certificate => {
                let cert: CertificateBody = hm.parse_as().map_err(|_| Alert::DecodeError)?;
                self.transcript.update(&hm.marshal());
                log::debug!("[client wait_cert_cr] -> [client wait_cv]");
                let next = ClientState::WaitCv(ClientWaitCv {
                    auth: self.auth,
                    params: self.params,
                    suite_params: self.suite_params,
                    transcript: self.transcript,
                    key_schedule: self.key_schedule,
                    client_hs_secret: self.client_hs_secret,
                    server_hs_secret: self.server_hs_secret,
                    server_certificate: cert,
                    certificate_request: None,
                });
                Ok((next, Vec::new()))
            }
            HandshakeType::CertificateRequest => {
                let cr: CertificateRequestBody = hm.parse_as().map_err(|_| Alert::DecodeError)?;
                // In-handshake certificate requests carry an empty context.
                if !cr.certificate_request_context.is_empty() {
                    return Err(Alert::IllegalParameter);
                }
                self.params.using_client_auth = true;
                self.transcript.update(&hm.marshal());
                log::debug!("[client wait_cert_cr] -> [client wait_cert]");
                let next = ClientState::WaitCert(ClientWaitCert {
                    auth: self.auth,
                    params: self.params,
                    suite_params: self.suite_params,
                    transcript: self.transcript,
                    key_schedule: self.key_schedule,
                    client_hs_secret: self.client_hs_secret,
                    server_hs_secret: self.server_hs_secret,
                    certificate_request: cr,
                });
                Ok((next, Vec::new()))
            }
            _ => {
                log::debug!("[client wait_cert_cr] unexpected {:?}", hm.msg_type);
                Err(Alert::UnexpectedMessage)
            }
        }
    }
}

pub struct ClientWaitCert {
    auth: AuthContext,
    params: ConnectionParameters,
    suite_params: CipherSuiteParams,
    transcript: TranscriptHash,
    key_schedule: KeySchedule,
    client_hs_secret: Vec<u8>,
    server_hs_secret: Vec<u8>,
    certificate_request: CertificateRequestBody,
}

impl ClientWaitCert {
    fn next(mut self, hm: Option<&HandshakeMessage>) -> Transition {
        let hm = hm.ok_or(Alert::UnexpectedMessage)?;
        if hm.msg_type != HandshakeType::Certificate {
            log::debug!("[client wait_cert] unexpected {:?}", hm.msg_type);
            return Err(Alert::UnexpectedMessage);
        }
        let cert: CertificateBody = hm.parse_as().map_err(|_| Alert::DecodeError)?;
        self.transcript.update(&hm.marshal());
        log::debug!("[client wait_cert] -> [client wait_cv]");
        let next = ClientState::WaitCv(ClientWaitCv {
            auth: self.auth,
            params: self.params,
            suite_params: self.suite_params,
            transcript: self.transcript,
            key_schedule: self.key_schedule,
            client_hs_secret: self.client_hs_secret,
            server_hs_secret: self.server_hs_secret,
            server_certificate: cert,
            certificate_request: Some(self.certificate_request),
        });
        Ok((next, Vec::new()))
    }
}

pub struct ClientWaitCv {
    auth: AuthContext,
    params: ConnectionParameters,
    suite_params: CipherSuiteParams,
    transcript: TranscriptHash,
    key_schedule: KeySchedule,
    client_hs_secret: Vec<u8>,
    server_hs_secret: Vec<u8>,
    server_certificate: CertificateBody,
    certificate_request: Option<CertificateRequestBody>,
}

impl ClientWaitCv {
    fn next(mut self, hm: Option<&HandshakeMessage>) -> Transition {
        let hm = hm.ok_or(Alert::UnexpectedMessage)?;
        if hm.msg_type != HandshakeType::CertificateVerify {
            log::debug!("[client wait_cv] unexpected {:?}", hm.msg_type);
            return Err(Alert::UnexpectedMessage);
        }
        let cv: CertificateVerifyBody = hm.parse_as().map_err(|_| Alert::DecodeError)?;

        let leaf = self
            .server_certificate
            .certificate_list
            .first()
            .ok_or(Alert::IllegalParameter)?;

        let transcript_hash = self.transcript.current_hash();
        if verify_certificate_verify(
            &leaf.cert_data,
            cv.algorithm,
            &transcript_hash,
            &cv.signature,
            false,
        )
        .is_err()
        {
            log::debug!("[client wait_cv] server signature failed to verify");
            return Err(Alert::HandshakeFailure);
        }

        if let Some(hook) = &self.auth.auth_certificate {
            if hook(&self.server_certificate.certificate_list).is_err() {
                log::debug!("[client wait_cv] application rejected server certificate");
                return Err(Alert::BadCertificate);
            }
        } else if !self.auth.insecure_skip_verify {
            log::warn!("no verification of the server certificate chain");
        }

        self.transcript.update(&hm.marshal());

        log::debug!("[client wait_cv] -> [client wait_finished]");
        let next = ClientState::WaitFinished(ClientWaitFinished {
            auth: self.auth,
            params: self.params,
            suite_params: self.suite_params,
            transcript: self.transcript,
            key_schedule: self.key_schedule,
            client_hs_secret: self.client_hs_secret,
            server_hs_secret: self.server_hs_secret,
            certificate_request: self.certificate_request,
        });
        Ok((next, Vec::new()))
    }
}

pub struct ClientWaitFinished {
    auth: AuthContext,
    params: ConnectionParameters,
    suite_params: CipherSuiteParams,
    transcript: TranscriptHash,
    key_schedule: KeySchedule,
    client_hs_secret: Vec<u8>,
    server_hs_secret: Vec<u8>,
    certificate_request: Option<CertificateRequestBody>,
}

impl ClientWaitFinished {
    fn next(mut self, hm: Option<&HandshakeMessage>) -> Transition {
        let hm = hm.ok_or(Alert::UnexpectedMessage)?;
        if hm.msg_type != HandshakeType::Finished {
            log::debug!("[client wait_finished] unexpected {:?}", hm.msg_type);
            return Err(Alert::UnexpectedMessage);
        }

        let alg = self.suite_params.hash;
        let h3 = self.transcript.current_hash();
        let expected = finished_data(alg, &self.server_hs_secret, &h3).map_err(internal)?;
        let fin = FinishedBody::unmarshal_with_len(&hm.body, expected.len())
            .map_err(|_| Alert::DecodeError)?;
        if !bool::from(fin.verify_data.ct_eq(&expected)) {
            log::debug!("[client wait_finished] server Finished failed to verify");
            return Err(Alert::HandshakeFailure);
        }

        self.transcript.update(&hm.marshal());
        let h4 = self.transcript.current_hash();

        let (client_app_secret, server_app_secret) = self
            .key_schedule
            .derive_app_traffic_secrets(&h4)
            .map_err(internal)?;
        let exporter_secret = self
            .key_schedule
            .derive_exporter_master_secret(&h4)
            .map_err(internal)?;

        let mut actions = Vec::new();

        // EndOfEarlyData goes out only when the server actually accepted the
        // early data; otherwise the transcripts would diverge.
        if self.params.using_early_data {
            let eoed =
                HandshakeMessage::from_body(&EndOfEarlyDataBody).map_err(|_| Alert::InternalError)?;
            self.transcript.update(&eoed.marshal());
            actions.push(HandshakeAction::SendMessage(eoed));
        }

        let client_hs_keys =
            TrafficKeys::derive(&self.suite_params, &self.client_hs_secret).map_err(internal)?;
        actions.push(HandshakeAction::RekeyOut(EpochKeys {
            label: "handshake",
            suite: self.suite_params.suite,
            keys: client_hs_keys,
        }));

        if self.params.using_client_auth {
            self.client_second_flight_auth(&mut actions)?;
        }

        let h5 = self.transcript.current_hash();
        let verify_data = finished_data(alg, &self.client_hs_secret, &h5).map_err(internal)?;
        let finished = HandshakeMessage::from_body(&FinishedBody { verify_data })
            .map_err(|_| Alert::InternalError)?;
        self.transcript.update(&finished.marshal());

        let h6 = self.transcript.current_hash();
        let resumption_secret = self
            .key_schedule
            .derive_resumption_master_secret(&h6)
            .map_err(internal)?;

        let server_app_keys =
            TrafficKeys::derive(&self.suite_params, &server_app_secret).map_err(internal)?;
        let client_app_keys =
            TrafficKeys::derive(&self.suite_params, &client_app_secret).map_err(internal)?;
        actions.push(HandshakeAction::SendMessage(finished));
        actions.push(HandshakeAction::RekeyIn(EpochKeys {
            label: "application",
            suite: self.suite_params.suite,
            keys: server_app_keys,
        }));
        actions.push(HandshakeAction::RekeyOut(EpochKeys {
            label: "application",
            suite: self.suite_params.suite,
            keys: client_app_keys,
        }));

        log::debug!("[client wait_finished] -> [connected]");
        let next = ClientState::Connected(ConnectedState {
            params: self.params,
            is_client: true,
            suite_params: self.suite_params,
            resumption_secret,
            client_traffic_secret: client_app_secret,
            server_traffic_secret: server_app_secret,
            exporter_secret,
        });
        Ok((next, actions))
    }

    /// Certificate [+ CertificateVerify] for the client's second flight.
    fn client_second_flight_auth(
        &mut self,
        actions: &mut Vec<HandshakeAction>,
    ) -> Result<(), Alert> {
        let request = self
            .certificate_request
            .as_ref()
            .ok_or(Alert::InternalError)?;
        let schemes = SignatureAlgorithmsExtension::from_list(&request.extensions)
            .map_err(|_| Alert::DecodeError)?
            .ok_or(Alert::IllegalParameter)?;

        match crate::cert::select_certificate(&self.auth.certificates, &schemes.0, &schemes.0) {
            Err(_) => {
                log::warn!("no client certificate matches the request; sending empty chain");
                let empty = HandshakeMessage::from_body(&CertificateBody::default())
                    .map_err(|_| Alert::InternalError)?;
                self.transcript.update(&empty.marshal());
                actions.push(HandshakeAction::SendMessage(empty));
            }
            Ok((certificate, scheme)) => {
                let body = CertificateBody {
                    certificate_request_context: Vec::new(),
                    certificate_list: certificate
                        .chain
                        .iter()
                        .map(|der| CertificateEntry {
                            cert_data: der.clone(),
                            extensions: ExtensionList::new(),
                        })
                        .collect(),
                };
                let cert_msg =
                    HandshakeMessage::from_body(&body).map_err(|_| Alert::InternalError)?;
                self.transcript.update(&cert_msg.marshal());
                actions.push(HandshakeAction::SendMessage(cert_msg));

                let hash = self.transcript.current_hash();
                let signature =
                    sign_certificate_verify(&certificate.private_key, scheme, &hash, true)
                        .map_err(internal)?;
                let cv_msg = HandshakeMessage::from_body(&CertificateVerifyBody {
                    algorithm: scheme,
                    signature,
                })
                .map_err(|_| Alert::InternalError)?;
                self.transcript.update(&cv_msg.marshal());
                actions.push(HandshakeAction::SendMessage(cv_msg));
            }
        }
        Ok(())
    }
}
