//! Server handshake automaton.
//!
//! ```text
//! START -> NEGOTIATED -> [WAIT_EOED] -> WAIT_FLIGHT2
//!       -> [WAIT_CERT] -> [WAIT_CV] -> WAIT_FINISHED -> CONNECTED
//! ```
//!
//! START consumes the ClientHello (possibly answering with a cookie
//! HelloRetryRequest and looping back to START); NEGOTIATED emits the whole
//! server first flight on `next(None)`; WAIT_FLIGHT2 is a pseudo-state that
//! routes to the client-auth or Finished path, also on `next(None)`.

use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::alert::Alert;
use crate::config::{Capabilities, ConnectionParameters};
use crate::crypt::key_schedule::{finished_data, KeySchedule};
use crate::crypt::kx::{key_agreement, new_key_share};
use crate::crypt::traffic_keys::TrafficKeys;
use crate::crypt::transcript::TranscriptHash;
use crate::crypt::{CipherSuite, CipherSuiteParams, PskKeyExchangeMode, SignatureScheme};
use crate::extensions::{
    AlpnExtension, CookieExtension, EarlyDataExtension, ExtensionList, ExtensionType,
    KeyShareEntry, KeyShareExtension, PreSharedKeyExtension, PskKeyExchangeModesExtension,
    ServerNameExtension, SignatureAlgorithmsExtension, SupportedVersionsExtension,
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

type Transition = Result<(ServerState, Vec<HandshakeAction>), Alert>;

fn internal<E: std::fmt::Display>(e: E) -> Alert {
    log::debug!("internal handshake failure: {e}");
    Alert::InternalError
}

pub enum ServerState {
    Start(ServerStart),
    Negotiated(Box<ServerNegotiated>),
    WaitEoed(ServerWaitEoed),
    WaitFlight2(ServerWaitFlight2),
    WaitCert(ServerWaitCert),
    WaitCv(ServerWaitCv),
    WaitFinished(ServerWaitFinished),
    Connected(ConnectedState),
}

impl ServerState {
    pub fn start(caps: Capabilities) -> Self {
        ServerState::Start(ServerStart {
            caps,
            cookie_sent: None,
            first_client_hello: None,
            hello_retry_request: None,
        })
    }

    /// Whether the next transition consumes a message; NEGOTIATED and
    /// WAIT_FLIGHT2 continue spontaneously.
    pub fn wants_message(&self) -> bool {
        !matches!(
            self,
            ServerState::Negotiated(_) | ServerState::WaitFlight2(_) | ServerState::Connected(_)
        )
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ServerState::Connected(_))
    }

    pub fn next(self, hm: Option<&HandshakeMessage>) -> Transition {
        match self {
            ServerState::Start(state) => state.next(hm),
            ServerState::Negotiated(state) => state.next(hm),
            ServerState::WaitEoed(state) => state.next(hm),
            ServerState::WaitFlight2(state) => state.next(hm),
            ServerState::WaitCert(state) => state.next(hm),
            ServerState::WaitCv(state) => state.next(hm),
            ServerState::WaitFinished(state) => state.next(hm),
            ServerState::Connected(_) => Err(Alert::UnexpectedMessage),
        }
    }
}

pub struct ServerStart {
    caps: Capabilities,
    cookie_sent: Option<Vec<u8>>,
    first_client_hello: Option<HandshakeMessage>,
    hello_retry_request: Option<HandshakeMessage>,
}

impl ServerStart {
    fn next(self, hm: Option<&HandshakeMessage>) -> Transition {
        let hm = hm.ok_or(Alert::UnexpectedMessage)?;
        if hm.msg_type != HandshakeType::ClientHello {
            log::debug!("[server start] unexpected {:?}", hm.msg_type);
            return Err(Alert::UnexpectedMessage);
        }
        let ch: ClientHelloBody = hm.parse_as().map_err(|_| Alert::DecodeError)?;

        let versions = SupportedVersionsExtension::from_list(&ch.extensions)
            .map_err(|_| Alert::DecodeError)?;
        if !versions.is_some_and(|v| v.0.contains(&SUPPORTED_VERSION)) {
            log::debug!("[server start] client does not offer TLS 1.3");
            return Err(Alert::ProtocolVersion);
        }

        if self.caps.require_cookie {
            let cookie =
                CookieExtension::from_list(&ch.extensions).map_err(|_| Alert::DecodeError)?;
            match self.cookie_sent.clone() {
                Some(sent) => match cookie {
                    Some(got) if got.0 == sent => {}
                    _ => {
                        log::debug!("[server start] retried hello with a bad or missing cookie");
                        return Err(Alert::IllegalParameter);
                    }
                },
                None => return self.send_hello_retry(hm, &ch),
            }
        }

        let negotiated = self.negotiate(hm, &ch)?;
        log::debug!("[server start] -> [server negotiated]");
        Ok((ServerState::Negotiated(Box::new(negotiated)), Vec::new()))
    }

    /// Demand a retry carrying our cookie. The transcript substitution
    /// replaces the first hello with its message_hash.
    fn send_hello_retry(self, hm: &HandshakeMessage, ch: &ClientHelloBody) -> Transition {
        let suite = select_cipher_suite(&self.caps.cipher_suites, &ch.cipher_suites, None)
            .ok_or(Alert::HandshakeFailure)?;
        let params = CipherSuiteParams::from_suite(suite).map_err(|_| Alert::HandshakeFailure)?;

        let mut cookie = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut cookie);

        let mut extensions = ExtensionList::new();
        extensions.add(
            CookieExtension(cookie.clone())
                .to_extension()
                .map_err(internal)?,
        );
        let hrr = HandshakeMessage::from_body(&HelloRetryRequestBody {
            version: SUPPORTED_VERSION,
            cipher_suite: suite,
            extensions,
        })
        .map_err(|_| Alert::InternalError)?;

        let first_client_hello = HandshakeMessage {
            msg_type: HandshakeType::MessageHash,
            body: params.hash.digest(&hm.marshal()),
        };

        log::debug!("[server start] -> [server start] (cookie retry requested)");
        let next = ServerState::Start(ServerStart {
            caps: self.caps,
            cookie_sent: Some(cookie),
            first_client_hello: Some(first_client_hello),
            hello_retry_request: Some(hrr.clone()),
        });
        Ok((next, vec![HandshakeAction::SendMessage(hrr)]))
    }

    fn negotiate(self, hm: &HandshakeMessage, ch: &ClientHelloBody) -> Result<ServerNegotiated, Alert> {
        let mut params = ConnectionParameters::default();

        if let Some(sni) =
            ServerNameExtension::from_list(&ch.extensions).map_err(|_| Alert::DecodeError)?
        {
            params.server_name = Some(sni.0);
        }

        let client_shares =
            KeyShareExtension::from_list(HandshakeType::ClientHello, &ch.extensions)
                .map_err(|_| Alert::DecodeError)?;
        let client_psk =
            PreSharedKeyExtension::from_list(HandshakeType::ClientHello, &ch.extensions)
                .map_err(|_| Alert::DecodeError)?;
        let client_modes = PskKeyExchangeModesExtension::from_list(&ch.extensions)
            .map_err(|_| Alert::DecodeError)?
            .map(|m| m.0)
            .unwrap_or_default();
        let client_alpn =
            AlpnExtension::from_list(&ch.extensions).map_err(|_| Alert::DecodeError)?;
        let client_schemes = SignatureAlgorithmsExtension::from_list(&ch.extensions)
            .map_err(|_| Alert::DecodeError)?
            .map(|s| s.0)
            .unwrap_or_default();

        params.client_sending_early_data = ch.extensions.has(ExtensionType::EARLY_DATA);

        // PSK selection: first offered identity present in the cache whose
        // hash is compatible with a mutual cipher suite, binder verified.
        let mut selected: Option<(u16, PreSharedKey, CipherSuite, KeySchedule)> = None;
        if let Some(psk_ext) = &client_psk {
            for (index, identity) in psk_ext.identities.iter().enumerate() {
                let cached = self
                    .caps
                    .psks
                    .read()
                    .map_err(internal)?
                    .get(&hex::encode(&identity.identity));
                let Some(psk) = cached else { continue };

                let psk_params =
                    CipherSuiteParams::from_suite(psk.cipher_suite).map_err(internal)?;
                let Some(suite) = select_cipher_suite(
                    &self.caps.cipher_suites,
                    &ch.cipher_suites,
                    Some(psk_params.hash),
                ) else {
                    continue;
                };

                let suite_params =
                    CipherSuiteParams::from_suite(suite).map_err(|_| Alert::HandshakeFailure)?;
                let mut ks = KeySchedule::new(suite_params.clone());
                ks.derive_early_secret(Some(&psk.key)).map_err(internal)?;
                let binder_key = ks.derive_binder_key(psk.is_resumption).map_err(internal)?;

                let wire = hm.marshal();
                let binders_len = psk_ext.binders_len();
                if wire.len() < binders_len {
                    return Err(Alert::DecodeError);
                }
                let truncated_hash = suite_params.hash.digest(&wire[..wire.len() - binders_len]);
                let expected = finished_data(suite_params.hash, &binder_key, &truncated_hash)
                    .map_err(internal)?;
                let offered = psk_ext
                    .binders
                    .get(index)
                    .ok_or(Alert::DecodeError)?;
                if !bool::from(expected.ct_eq(offered)) {
                    log::debug!("[server start] PSK binder failed to verify");
                    return Err(Alert::DecryptError);
                }

                selected = Some((index as u16, psk, suite, ks));
                break;
            }
        }

        let (suite, key_schedule, selected_psk) = match selected {
            Some((index, psk, suite, ks)) => {
                params.using_psk = true;
                (suite, ks, Some((index, psk)))
            }
            None => {
                let suite = select_cipher_suite(&self.caps.cipher_suites, &ch.cipher_suites, None)
                    .ok_or(Alert::HandshakeFailure)?;
                let suite_params =
                    CipherSuiteParams::from_suite(suite).map_err(|_| Alert::HandshakeFailure)?;
                let mut ks = KeySchedule::new(suite_params);
                ks.derive_early_secret(None).map_err(internal)?;
                (suite, ks, None)
            }
        };
        let suite_params =
            CipherSuiteParams::from_suite(suite).map_err(|_| Alert::HandshakeFailure)?;
        params.cipher_suite = Some(suite);

        // Key exchange: first client share whose group we support.
        let mut dh_secret: Option<Vec<u8>> = None;
        let mut server_share: Option<KeyShareEntry> = None;
        if let Some(shares) = &client_shares {
            for share in &shares.shares {
                if !self.caps.groups.contains(&share.group) {
                    continue;
                }
                let pairing = self.caps.pairing_group.as_deref();
                let (public, secret) = match new_key_share(share.group, pairing) {
                    Ok(pair) => pair,
                    Err(e) => {
                        log::warn!("cannot answer {:?} key share: {e}", share.group);
                        continue;
                    }
                };
                let shared = key_agreement(share.group, &share.key_exchange, &secret, pairing)
                    .map_err(|_| Alert::IllegalParameter)?;
                dh_secret = Some(shared);
                server_share = Some(KeyShareEntry {
                    group: share.group,
                    key_exchange: public,
                });
                params.using_dh = true;
                break;
            }
        }

        if params.using_psk {
            let dhe_offered = client_modes.contains(&PskKeyExchangeMode::PskDheKe);
            let ke_offered = client_modes.contains(&PskKeyExchangeMode::PskKe);
            if params.using_dh && !dhe_offered {
                if !ke_offered {
                    return Err(Alert::HandshakeFailure);
                }
                // Client only does pure-PSK resumption; drop the exchange.
                dh_secret = None;
                server_share = None;
                params.using_dh = false;
            } else if !params.using_dh && !ke_offered {
                log::debug!("[server start] PSK without a usable mode");
                return Err(Alert::HandshakeFailure);
            }
        } else if !params.using_dh {
            log::debug!("[server start] no usable key share");
            return Err(Alert::HandshakeFailure);
        }

        // ALPN: our preference order against the client's offer.
        if let Some(alpn) = &client_alpn {
            params.next_proto = self
                .caps
                .next_protos
                .iter()
                .find(|p| alpn.0.contains(p))
                .cloned();
        }

        // 0-RTT is accepted only for the first identity, with matching
        // suite and protocol, no retry in between, and the policy enabled.
        if params.client_sending_early_data {
            if let Some((index, psk)) = &selected_psk {
                params.using_early_data = *index == 0
                    && psk.cipher_suite == suite
                    && psk.next_proto == params.next_proto
                    && self.caps.allow_early_data
                    && self.hello_retry_request.is_none();
            }
        }

        let mut transcript = TranscriptHash::new(suite_params.hash);
        if let (Some(first), Some(hrr)) = (&self.first_client_hello, &self.hello_retry_request) {
            transcript.update(&first.marshal());
            transcript.update(&hrr.marshal());
        }
        transcript.update(&hm.marshal());

        let early_keys = if params.using_early_data {
            let ch_hash = transcript.current_hash();
            let early_secret = key_schedule
                .derive_early_traffic_secret(&ch_hash)
                .map_err(internal)?;
            Some(TrafficKeys::derive(&suite_params, &early_secret).map_err(internal)?)
        } else {
            None
        };

        Ok(ServerNegotiated {
            caps: self.caps,
            params,
            suite_params,
            transcript,
            key_schedule,
            dh_secret,
            server_share,
            selected_psk_index: selected_psk.map(|(index, _)| index),
            early_keys,
            client_schemes,
        })
    }
}

/// Pick the first suite in our preference list that the client offers,
/// optionally constrained to a PSK-compatible hash.
fn select_cipher_suite(
    ours: &[CipherSuite],
    offered: &[CipherSuite],
    hash: Option<crate::crypt::HashAlg>,
) -> Option<CipherSuite> {
    ours.iter()
        .copied()
        .find(|suite| {
            offered.contains(suite)
                && match hash {
                    None => true,
                    Some(want) => CipherSuiteParams::from_suite(*suite)
                        .map(|p| p.hash == want)
                        .unwrap_or(false),
                }
        })
}

pub struct ServerNegotiated {
    caps: Capabilities,
    params: ConnectionParameters,
    suite_params: CipherSuiteParams,
    transcript: TranscriptHash,
    key_schedule: KeySchedule,
    dh_secret: Option<Vec<u8>>,
    server_share: Option<KeyShareEntry>,
    selected_psk_index: Option<u16>,
    early_keys: Option<TrafficKeys>,
    client_schemes: Vec<SignatureScheme>,
}

impl ServerNegotiated {
    fn next(mut self: Box<Self>, hm: Option<&HandshakeMessage>) -> Transition {
        if hm.is_some() {
            log::debug!("[server negotiated] unexpected message");
            return Err(Alert::UnexpectedMessage);
        }

        let suite = self.suite_params.suite;
        let alg = self.suite_params.hash;
        let mut actions = Vec::new();

        // ServerHello
        let mut sh_extensions = ExtensionList::new();
        if let Some(share) = self.server_share.take() {
            sh_extensions.add(
                KeyShareExtension {
                    role: HandshakeType::ServerHello,
                    shares: vec![share],
                }
                .to_extension()
                .map_err(internal)?,
            );
        }
        if let Some(index) = self.selected_psk_index {
            sh_extensions.add(
                PreSharedKeyExtension::server(index)
                    .to_extension()
                    .map_err(internal)?,
            );
        }
        let server_hello = HandshakeMessage::from_body(&ServerHelloBody {
            version: SUPPORTED_VERSION,
            // Zeroed like the client random; see the hello construction.
            random: [0u8; 32],
            cipher_suite: suite,
            extensions: sh_extensions,
        })
        .map_err(|_| Alert::InternalError)?;
        self.transcript.update(&server_hello.marshal());
        actions.push(HandshakeAction::SendMessage(server_hello));

        // Secrets through the master stage.
        let zero = vec![0u8; self.suite_params.hash_len()];
        let dh = self.dh_secret.take().unwrap_or(zero);
        self.key_schedule
            .derive_handshake_secret(&dh)
            .map_err(internal)?;
        let h2 = self.transcript.current_hash();
        let (client_hs_secret, server_hs_secret) = self
            .key_schedule
            .derive_handshake_traffic_secrets(&h2)
            .map_err(internal)?;
        self.key_schedule.derive_master_secret().map_err(internal)?;

        let server_hs_keys =
            TrafficKeys::derive(&self.suite_params, &server_hs_secret).map_err(internal)?;
        actions.push(HandshakeAction::RekeyOut(EpochKeys {
            label: "handshake",
            suite,
            keys: server_hs_keys,
        }));

        // EncryptedExtensions: exactly the extensions we processed.
        let mut ee_extensions = ExtensionList::new();
        if let Some(proto) = &self.params.next_proto {
            ee_extensions.add(
                AlpnExtension(vec![proto.clone()])
                    .to_extension()
                    .map_err(internal)?,
            );
        }
        if self.params.using_early_data {
            ee_extensions.add(
                EarlyDataExtension::empty()
                    .to_extension()
                    .map_err(internal)?,
            );
        }
        let ee = HandshakeMessage::from_body(&EncryptedExtensionsBody {
            extensions: ee_extensions,
        })
        .map_err(|_| Alert::InternalError)?;
        self.transcript.update(&ee.marshal());
        actions.push(HandshakeAction::SendMessage(ee));

        if self.caps.require_client_auth && !self.params.using_psk {
            self.params.using_client_auth = true;
            let mut cr_extensions = ExtensionList::new();
            cr_extensions.add(
                SignatureAlgorithmsExtension(self.caps.signature_schemes.clone())
                    .to_extension()
                    .map_err(internal)?,
            );
            let cr = HandshakeMessage::from_body(&CertificateRequestBody {
                certificate_request_context: Vec::new(),
                extensions: cr_extensions,
            })
            .map_err(|_| Alert::InternalError)?;
            self.transcript.update(&cr.marshal());
            actions.push(HandshakeAction::SendMessage(cr));
        }

        if !self.params.using_psk {
            let (certificate, scheme) = crate::cert::select_certificate(
                &self.caps.certificates,
                &self.caps.signature_schemes,
                &self.client_schemes,
            )
            .map_err(|_| Alert::HandshakeFailure)?;

            let cert_body = CertificateBody {
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
                HandshakeMessage::from_body(&cert_body).map_err(|_| Alert::InternalError)?;
            self.transcript.update(&cert_msg.marshal());
            actions.push(HandshakeAction::SendMessage(cert_msg));

            let hash = self.transcript.current_hash();
            let signature =
                sign_certificate_verify(&certificate.private_key, scheme, &hash, false)
                    .map_err(internal)?;
            let cv_msg = HandshakeMessage::from_body(&CertificateVerifyBody {
                algorithm: scheme,
                signature,
            })
            .map_err(|_| Alert::InternalError)?;
            self.transcript.update(&cv_msg.marshal());
            actions.push(HandshakeAction::SendMessage(cv_msg));
        }

        let h = self.transcript.current_hash();
        let verify_data = finished_data(alg, &server_hs_secret, &h).map_err(internal)?;
        let finished = HandshakeMessage::from_body(&FinishedBody { verify_data })
            .map_err(|_| Alert::InternalError)?;
        self.transcript.update(&finished.marshal());
        actions.push(HandshakeAction::SendMessage(finished));

        let h4 = self.transcript.current_hash();
        let (client_app_secret, server_app_secret) = self
            .key_schedule
            .derive_app_traffic_secrets(&h4)
            .map_err(internal)?;
        let exporter_secret = self
            .key_schedule
            .derive_exporter_master_secret(&h4)
            .map_err(internal)?;

        let server_app_keys =
            TrafficKeys::derive(&self.suite_params, &server_app_secret).map_err(internal)?;
        actions.push(HandshakeAction::RekeyOut(EpochKeys {
            label: "application",
            suite,
            keys: server_app_keys,
        }));

        let flight2 = ServerFlightContext {
            caps: self.caps,
            params: self.params,
            suite_params: self.suite_params,
            transcript: self.transcript,
            key_schedule: self.key_schedule,
            client_hs_secret,
            client_app_secret,
            server_app_secret,
            exporter_secret,
        };

        if flight2.params.using_early_data {
            let early_keys = self.early_keys.take().ok_or(Alert::InternalError)?;
            actions.push(HandshakeAction::RekeyIn(EpochKeys {
                label: "early",
                suite,
                keys: early_keys,
            }));
            actions.push(HandshakeAction::ReadEarlyData);
            log::debug!("[server negotiated] -> [server wait_eoed]");
            return Ok((ServerState::WaitEoed(ServerWaitEoed { inner: flight2 }), actions));
        }

        let client_hs_keys =
            TrafficKeys::derive(&flight2.suite_params, &flight2.client_hs_secret)
                .map_err(internal)?;
        actions.push(HandshakeAction::RekeyIn(EpochKeys {
            label: "handshake",
            suite,
            keys: client_hs_keys,
        }));
        if flight2.params.client_sending_early_data {
            // Rejected 0-RTT: skip whatever fails to decrypt.
            actions.push(HandshakeAction::ReadPastEarlyData);
        }
        log::debug!("[server negotiated] -> [server wait_flight2]");
        Ok((
            ServerState::WaitFlight2(ServerWaitFlight2 { inner: flight2 }),
            actions,
        ))
    }
}

/// Everything the post-flight states need.
struct ServerFlightContext {
    caps: Capabilities,
    params: ConnectionParameters,
    suite_params: CipherSuiteParams,
    transcript: TranscriptHash,
    key_schedule: KeySchedule,
    client_hs_secret: Vec<u8>,
    client_app_secret: Vec<u8>,
    server_app_secret: Vec<u8>,
    exporter_secret: Vec<u8>,
}

pub struct ServerWaitEoed {
    inner: ServerFlightContext,
}

impl ServerWaitEoed {
    fn next(mut self, hm: Option<&HandshakeMessage>) -> Transition {
        let hm = hm.ok_or(Alert::UnexpectedMessage)?;
        if hm.msg_type != HandshakeType::EndOfEarlyData {
            log::debug!("[server wait_eoed] unexpected {:?}", hm.msg_type);
            return Err(Alert::UnexpectedMessage);
        }
        let _: EndOfEarlyDataBody = hm.parse_as().map_err(|_| Alert::DecodeError)?;
        self.inner.transcript.update(&hm.marshal());

        let client_hs_keys =
            TrafficKeys::derive(&self.inner.suite_params, &self.inner.client_hs_secret)
                .map_err(internal)?;
        let actions = vec![HandshakeAction::RekeyIn(EpochKeys {
            label: "handshake",
            suite: self.inner.suite_params.suite,
            keys: client_hs_keys,
        })];
        log::debug!("[server wait_eoed] -> [server wait_flight2]");
        Ok((
            ServerState::WaitFlight2(ServerWaitFlight2 { inner: self.inner }),
            actions,
        ))
    }
}

pub struct ServerWaitFlight2 {
    inner: ServerFlightContext,
}

impl ServerWaitFlight2 {
    fn next(self, hm: Option<&HandshakeMessage>) -> Transition {
        if hm.is_some() {
            log::debug!("[server wait_flight2] unexpected message");
            return Err(Alert::UnexpectedMessage);
        }
        if self.inner.params.using_client_auth {
            log::debug!("[server wait_flight2] -> [server wait_cert]");
            Ok((
                ServerState::WaitCert(ServerWaitCert { inner: self.inner }),
                Vec::new(),
            ))
        } else {
            log::debug!("[server wait_flight2] -> [server wait_finished]");
            Ok((
                ServerState::WaitFinished(ServerWaitFinished { inner: self.inner }),
                Vec::new(),
            ))
        }
    }
}

pub struct ServerWaitCert {
    inner: ServerFlightContext,
}

impl ServerWaitCert {
    fn next(mut self, hm: Option<&HandshakeMessage>) -> Transition {
        let hm = hm.ok_or(Alert::UnexpectedMessage)?;
        if hm.msg_type != HandshakeType::Certificate {
            log::debug!("[server wait_cert] unexpected {:?}", hm.msg_type);
            return Err(Alert::UnexpectedMessage);
        }
        let cert: CertificateBody = hm.parse_as().map_err(|_| Alert::DecodeError)?;
        if !cert.certificate_request_context.is_empty() {
            return Err(Alert::IllegalParameter);
        }
        self.inner.transcript.update(&hm.marshal());

        if cert.certificate_list.is_empty() {
            // The client declined to authenticate; no CertificateVerify
            // follows.
            log::debug!("[server wait_cert] empty client certificate");
            return Ok((
                ServerState::WaitFinished(ServerWaitFinished { inner: self.inner }),
                Vec::new(),
            ));
        }

        log::debug!("[server wait_cert] -> [server wait_cv]");
        Ok((
            ServerState::WaitCv(ServerWaitCv {
                inner: self.inner,
                client_certificate: cert,
            }),
            Vec::new(),
        ))
    }
}

pub struct ServerWaitCv {
    inner: ServerFlightContext,
    client_certificate: CertificateBody,
}

impl ServerWaitCv {
    fn next(mut self, hm: Option<&HandshakeMessage>) -> Transition {
        let hm = hm.ok_or(Alert::UnexpectedMessage)?;
        if hm.msg_type != HandshakeType::CertificateVerify {
            log::debug!("[server wait_cv] unexpected {:?}", hm.msg_type);
            return Err(Alert::UnexpectedMessage);
        }
        let cv: CertificateVerifyBody = hm.parse_as().map_err(|_| Alert::DecodeError)?;

        let leaf = self
            .client_certificate
            .certificate_list
            .first()
            .ok_or(Alert::IllegalParameter)?;
        let hash = self.inner.transcript.current_hash();
        if verify_certificate_verify(&leaf.cert_data, cv.algorithm, &hash, &cv.signature, true)
            .is_err()
        {
            log::debug!("[server wait_cv] client signature failed to verify");
            return Err(Alert::HandshakeFailure);
        }

        if let Some(hook) = &self.inner.caps.auth_certificate {
            if hook(&self.client_certificate.certificate_list).is_err() {
                log::debug!("[server wait_cv] application rejected client certificate");
                return Err(Alert::BadCertificate);
            }
        }

        self.inner.transcript.update(&hm.marshal());
        log::debug!("[server wait_cv] -> [server wait_finished]");
        Ok((
            ServerState::WaitFinished(ServerWaitFinished { inner: self.inner }),
            Vec::new(),
        ))
    }
}

pub struct ServerWaitFinished {
    inner: ServerFlightContext,
}

impl ServerWaitFinished {
    fn next(mut self, hm: Option<&HandshakeMessage>) -> Transition {
        let hm = hm.ok_or(Alert::UnexpectedMessage)?;
        if hm.msg_type != HandshakeType::Finished {
            log::debug!("[server wait_finished] unexpected {:?}", hm.msg_type);
            return Err(Alert::UnexpectedMessage);
        }

        let alg = self.inner.suite_params.hash;
        let h5 = self.inner.transcript.current_hash();
        let expected =
            finished_data(alg, &self.inner.client_hs_secret, &h5).map_err(internal)?;
        let fin = FinishedBody::unmarshal_with_len(&hm.body, expected.len())
            .map_err(|_| Alert::DecodeError)?;
        if !bool::from(fin.verify_data.ct_eq(&expected)) {
            log::debug!("[server wait_finished] client Finished failed to verify");
            return Err(Alert::HandshakeFailure);
        }

        self.inner.transcript.update(&hm.marshal());
        let h6 = self.inner.transcript.current_hash();
        let resumption_secret = self
            .inner
            .key_schedule
            .derive_resumption_master_secret(&h6)
            .map_err(internal)?;

        let client_app_keys =
            TrafficKeys::derive(&self.inner.suite_params, &self.inner.client_app_secret)
                .map_err(internal)?;
        let actions = vec![HandshakeAction::RekeyIn(EpochKeys {
            label: "application",
            suite: self.inner.suite_params.suite,
            keys: client_app_keys,
        })];

        log::debug!("[server wait_finished] -> [connected]");
        let next = ServerState::Connected(ConnectedState {
            params: self.inner.params,
            is_client: false,
            suite_params: self.inner.suite_params,
            resumption_secret,
            client_traffic_secret: self.inner.client_app_secret,
            server_traffic_secret: self.inner.server_app_secret,
            exporter_secret: self.inner.exporter_secret,
        });
        Ok((next, actions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_cipher_suite_prefers_server_order() {
        let ours = [
            CipherSuite::TLS_AES_256_GCM_SHA384,
            CipherSuite::TLS_AES_128_GCM_SHA256,
        ];
        let offered = [
            CipherSuite::TLS_AES_128_GCM_SHA256,
            CipherSuite::TLS_AES_256_GCM_SHA384,
        ];
        assert_eq!(
            select_cipher_suite(&ours, &offered, None),
            Some(CipherSuite::TLS_AES_256_GCM_SHA384)
        );
        // Hash constraint narrows to SHA-256 suites
        assert_eq!(
            select_cipher_suite(&ours, &offered, Some(crate::crypt::HashAlg::Sha256)),
            Some(CipherSuite::TLS_AES_128_GCM_SHA256)
        );
        assert_eq!(
            select_cipher_suite(&ours, &[CipherSuite::TLS_CHACHA20_POLY1305_SHA256], None),
            None
        );
    }

    #[test]
    fn test_start_rejects_non_client_hello() {
        let caps = crate::config::Config::builder()
            .server_name("example.com")
            .build()
            .capabilities(false)
            .unwrap();
        let state = ServerState::start(caps);
        assert!(state.wants_message());
        let msg = HandshakeMessage {
            msg_type: HandshakeType::Finished,
            body: vec![],
        };
        assert_eq!(state.next(Some(&msg)).unwrap_err(), Alert::UnexpectedMessage);
    }
}
