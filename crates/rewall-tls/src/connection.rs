//! A TLS connection over a byte-stream transport.
//!
//! The connection owns the transport plus one record layer per direction
//! and drives the handshake automaton, applying the actions each transition
//! returns. In non-blocking mode every surface propagates `WouldBlock` and
//! the caller re-invokes once more bytes are available; the automaton and
//! both frame readers keep their partial progress across calls.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Arc;

use crate::alert::Alert;
use crate::config::{Config, ConnectionOptions, ConnectionParameters};
use crate::error::TlsError;
use crate::handshake::actions::HandshakeAction;
use crate::handshake::client::ClientState;
use crate::handshake::connected::ConnectedState;
use crate::handshake::messages::KeyUpdateRequest;
use crate::handshake::server::ServerState;
use crate::handshake::{
    write_message, HandshakeLayer, HandshakeMessage, HandshakeType, HANDSHAKE_HEADER_LEN,
};
use crate::record::{ContentType, RecordLayer, TlsPlaintext, MAX_FRAGMENT_LEN};

enum EndpointState {
    Client(ClientState),
    Server(ServerState),
}

impl EndpointState {
    fn wants_message(&self) -> bool {
        match self {
            EndpointState::Client(s) => s.wants_message(),
            EndpointState::Server(s) => s.wants_message(),
        }
    }

    fn next(
        self,
        hm: Option<&HandshakeMessage>,
    ) -> Result<(EndpointState, Vec<HandshakeAction>), Alert> {
        match self {
            EndpointState::Client(s) => {
                let (next, actions) = s.next(hm)?;
                Ok((EndpointState::Client(next), actions))
            }
            EndpointState::Server(s) => {
                let (next, actions) = s.next(hm)?;
                Ok((EndpointState::Server(next), actions))
            }
        }
    }

    fn into_connected(self) -> Result<ConnectedState, EndpointState> {
        match self {
            EndpointState::Client(ClientState::Connected(c)) => Ok(c),
            EndpointState::Server(ServerState::Connected(c)) => Ok(c),
            other => Err(other),
        }
    }
}

/// A TLS 1.3 endpoint bound to a transport.
pub struct Connection<S: Read + Write> {
    config: Arc<Config>,
    stream: S,
    is_client: bool,

    /// Client: data to send as 0-RTT. Server: 0-RTT data received.
    early_data: Vec<u8>,

    hs_state: Option<EndpointState>,
    connected: Option<ConnectedState>,
    pending_actions: VecDeque<HandshakeAction>,
    handshake_complete: bool,
    handshake_alert: Option<Alert>,
    tickets_sent: bool,

    read_buffer: Vec<u8>,
    in_record: RecordLayer,
    out_record: RecordLayer,
    hs_in: HandshakeLayer,

    sent_close_notify: bool,
    received_close_notify: bool,
}

impl<S: Read + Write> Connection<S> {
    /// Create a client endpoint over `stream`.
    pub fn client(stream: S, config: Arc<Config>) -> Self {
        Self::new(stream, config, true)
    }

    /// Create a server endpoint over `stream`.
    pub fn server(stream: S, config: Arc<Config>) -> Self {
        Self::new(stream, config, false)
    }

    fn new(stream: S, config: Arc<Config>, is_client: bool) -> Self {
        let allow_wrong_version = config.allow_wrong_version_number;
        Self {
            config,
            stream,
            is_client,
            early_data: Vec::new(),
            hs_state: None,
            connected: None,
            pending_actions: VecDeque::new(),
            handshake_complete: false,
            handshake_alert: None,
            tickets_sent: false,
            read_buffer: Vec::new(),
            in_record: RecordLayer::new(allow_wrong_version),
            out_record: RecordLayer::new(allow_wrong_version),
            hs_in: HandshakeLayer::new(),
            sent_close_notify: false,
            received_close_notify: false,
        }
    }

    /// Queue 0-RTT data. Client only, before `handshake`; sent if the server
    /// accepts early data, silently discarded otherwise.
    pub fn queue_early_data(&mut self, data: &[u8]) {
        self.early_data.extend_from_slice(data);
    }

    /// The early-data buffer: what was queued (client) or received (server).
    pub fn early_data(&self) -> &[u8] {
        &self.early_data
    }

    pub fn handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    /// Negotiated connection parameters, once connected.
    pub fn connection_params(&self) -> Option<&ConnectionParameters> {
        self.connected.as_ref().map(|c| &c.params)
    }

    pub(crate) fn connected_state(&self) -> Option<&ConnectedState> {
        self.connected.as_ref()
    }

    /// Drive the handshake. Returns `NoAlert` on success, `WouldBlock` in
    /// non-blocking mode when the transport ran dry, or the fatal alert
    /// otherwise. Idempotent: repeated calls after completion return
    /// `NoAlert`; repeated calls after failure return the same alert.
    pub fn handshake(&mut self) -> Alert {
        if let Some(alert) = self.handshake_alert {
            return alert;
        }
        if self.handshake_complete {
            return Alert::NoAlert;
        }
        match self.run_handshake() {
            Ok(()) => Alert::NoAlert,
            Err(TlsError::WouldBlock) => Alert::WouldBlock,
            Err(e) => {
                let alert = self.handshake_alert.unwrap_or_else(|| e.to_alert());
                log::debug!("handshake failed: {e} (alert {alert})");
                if alert.is_wire() {
                    let _ = self.send_alert(alert);
                }
                self.handshake_alert = Some(alert);
                alert
            }
        }
    }

    fn run_handshake(&mut self) -> Result<(), TlsError> {
        if self.hs_state.is_none() && self.connected.is_none() {
            if self.is_client && !self.config.valid_for_client() {
                return Err(TlsError::Config("client requires a server name".into()));
            }
            let caps = self.config.capabilities(self.is_client)?;
            self.hs_state = Some(if self.is_client {
                let opts = ConnectionOptions {
                    server_name: self.config.server_name.clone(),
                    next_protos: self.config.next_protos.clone(),
                    early_data: self.early_data.clone(),
                };
                EndpointState::Client(ClientState::start(caps, opts))
            } else {
                EndpointState::Server(ServerState::start(caps))
            });
        }

        loop {
            self.flush_pending_actions()?;
            if self.connected.is_some() {
                break;
            }
            let wants_message = self
                .hs_state
                .as_ref()
                .ok_or_else(|| TlsError::Internal("handshake state missing".into()))?
                .wants_message();
            let message = if wants_message {
                Some(self.hs_in.read_message(&mut self.in_record, &mut self.stream)?)
            } else {
                None
            };
            self.advance(message)?;
        }

        // Server side issues session tickets once connected.
        if !self.is_client && self.config.send_session_tickets && !self.tickets_sent {
            let connected = self
                .connected
                .as_mut()
                .ok_or_else(|| TlsError::Internal("connected state missing".into()))?;
            let actions = connected
                .new_session_ticket(
                    self.config.effective_ticket_len(),
                    self.config.ticket_lifetime,
                    self.config.early_data_lifetime,
                )
                .map_err(|a| TlsError::Protocol(format!("ticket issuance alert: {a}")))?;
            self.pending_actions.extend(actions);
            self.tickets_sent = true;
            self.flush_pending_actions()?;
        }

        self.handshake_complete = true;
        Ok(())
    }

    fn advance(&mut self, message: Option<HandshakeMessage>) -> Result<(), TlsError> {
        let state = self
            .hs_state
            .take()
            .ok_or_else(|| TlsError::Internal("handshake state missing".into()))?;
        if let Some(m) = &message {
            log::debug!("handshake message received: {:?}", m.msg_type);
        }
        match state.next(message.as_ref()) {
            Ok((next, actions)) => {
                self.pending_actions.extend(actions);
                match next.into_connected() {
                    Ok(connected) => self.connected = Some(connected),
                    Err(state) => self.hs_state = Some(state),
                }
                Ok(())
            }
            Err(alert) => {
                self.handshake_alert = Some(alert);
                Err(TlsError::Protocol(format!("handshake alert: {alert}")))
            }
        }
    }

    fn flush_pending_actions(&mut self) -> Result<(), TlsError> {
        while let Some(action) = self.pending_actions.pop_front() {
            match self.take_action(action) {
                Ok(()) => {}
                Err(TlsError::WouldBlock) => {
                    // Only the early-data readers block mid-action; they are
                    // resumable, so put them back for the next entry.
                    return Err(TlsError::WouldBlock);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn take_action(&mut self, action: HandshakeAction) -> Result<(), TlsError> {
        match action {
            HandshakeAction::SendMessage(message) => {
                log::debug!("handshake message sent: {:?}", message.msg_type);
                write_message(&mut self.out_record, &mut self.stream, &message)
            }
            HandshakeAction::RekeyIn(epoch) => {
                log::debug!("rekey in: {}", epoch.label);
                self.in_record.rekey(epoch.suite, &epoch.keys)
            }
            HandshakeAction::RekeyOut(epoch) => {
                log::debug!("rekey out: {}", epoch.label);
                self.out_record.rekey(epoch.suite, &epoch.keys)
            }
            HandshakeAction::SendEarlyData => {
                let data = self.early_data.clone();
                log::debug!("sending {} bytes of early data", data.len());
                self.write_fragments(&data)
            }
            HandshakeAction::ReadEarlyData => loop {
                match self.in_record.peek_record_type(&mut self.stream) {
                    Ok(ContentType::ApplicationData) => {
                        let pt = self.in_record.read_record(&mut self.stream)?;
                        log::debug!("read {} bytes of early data", pt.fragment.len());
                        self.early_data.extend_from_slice(&pt.fragment);
                    }
                    Ok(_) => return Ok(()),
                    Err(TlsError::WouldBlock) => {
                        self.pending_actions.push_front(HandshakeAction::ReadEarlyData);
                        return Err(TlsError::WouldBlock);
                    }
                    Err(e) => return Err(e),
                }
            },
            HandshakeAction::ReadPastEarlyData => loop {
                match self.in_record.peek_record_type(&mut self.stream) {
                    Ok(_) => return Ok(()),
                    Err(TlsError::Decrypt(_)) => {
                        log::debug!("skipping undecryptable early-data record");
                    }
                    Err(TlsError::WouldBlock) => {
                        self.pending_actions
                            .push_front(HandshakeAction::ReadPastEarlyData);
                        return Err(TlsError::WouldBlock);
                    }
                    Err(e) => return Err(e),
                }
            },
            HandshakeAction::StorePsk(psk) => {
                // Clients key the cache by server name, servers by the
                // hex-encoded ticket identity.
                let key = if self.is_client {
                    self.config.server_name.clone().unwrap_or_default()
                } else {
                    hex::encode(&psk.identity)
                };
                self.config
                    .psks
                    .write()
                    .map_err(|_| TlsError::Internal("psk cache lock poisoned".into()))?
                    .put(key, psk);
                Ok(())
            }
        }
    }

    /// Read application data. Interleaved post-handshake messages are
    /// dispatched to the automaton; close_notify yields `Ok(0)`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, TlsError> {
        match self.handshake() {
            Alert::NoAlert => {}
            Alert::WouldBlock => return Err(TlsError::WouldBlock),
            alert => return Err(TlsError::AlertReceived(alert)),
        }

        loop {
            if !self.read_buffer.is_empty() {
                let n = std::cmp::min(buf.len(), self.read_buffer.len());
                buf[..n].copy_from_slice(&self.read_buffer[..n]);
                self.read_buffer.drain(..n);
                return Ok(n);
            }
            if self.received_close_notify {
                return Ok(0);
            }

            let pt = self.in_record.read_record(&mut self.stream)?;
            match pt.content_type {
                ContentType::ApplicationData => {
                    self.read_buffer.extend_from_slice(&pt.fragment);
                }
                ContentType::Handshake => self.dispatch_post_handshake(&pt.fragment)?,
                ContentType::Alert => {
                    if pt.fragment.len() != 2 {
                        return Err(TlsError::Decode("malformed alert record".into()));
                    }
                    let level = crate::alert::AlertLevel::from_u8(pt.fragment[0])
                        .map_err(|v| TlsError::Decode(format!("unknown alert level {v}")))?;
                    match Alert::from_u8(pt.fragment[1]) {
                        Ok(Alert::CloseNotify) => {
                            self.received_close_notify = true;
                            return Ok(0);
                        }
                        // Warnings other than close_notify drop on the floor,
                        // recognised or not.
                        _ if level == crate::alert::AlertLevel::Warning => {
                            log::debug!("dropping warning alert {}", pt.fragment[1]);
                        }
                        Ok(a) => return Err(TlsError::AlertReceived(a)),
                        Err(v) => {
                            return Err(TlsError::Decode(format!(
                                "unknown alert description {v}"
                            )))
                        }
                    }
                }
            }
        }
    }

    /// Post-handshake handshake messages are never fragmented; one record
    /// may still coalesce several of them.
    fn dispatch_post_handshake(&mut self, fragment: &[u8]) -> Result<(), TlsError> {
        let mut pos = 0;
        while pos < fragment.len() {
            if fragment.len() - pos < HANDSHAKE_HEADER_LEN {
                return Err(TlsError::Decode(
                    "post-handshake message too short for header".into(),
                ));
            }
            let msg_type = HandshakeType::from_u8(fragment[pos])?;
            let len = ((fragment[pos + 1] as usize) << 16)
                | ((fragment[pos + 2] as usize) << 8)
                | (fragment[pos + 3] as usize);
            let start = pos + HANDSHAKE_HEADER_LEN;
            if fragment.len() - start < len {
                return Err(TlsError::Decode(
                    "post-handshake message too short for body".into(),
                ));
            }
            let message = HandshakeMessage {
                msg_type,
                body: fragment[start..start + len].to_vec(),
            };
            pos = start + len;

            log::debug!("post-handshake message: {msg_type:?}");
            let connected = self
                .connected
                .as_mut()
                .ok_or_else(|| TlsError::Internal("connected state missing".into()))?;
            match connected.next(&message) {
                Ok(actions) => {
                    for action in actions {
                        self.take_action(action)?;
                    }
                }
                Err(alert) => {
                    let _ = self.send_alert(alert);
                    return Err(TlsError::Protocol(format!(
                        "post-handshake alert: {alert}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Write application data, fragmented into maximum-size records.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, TlsError> {
        if !self.handshake_complete {
            return Err(TlsError::Protocol(
                "write before handshake completion".into(),
            ));
        }
        self.write_fragments(buf)?;
        Ok(buf.len())
    }

    fn write_fragments(&mut self, data: &[u8]) -> Result<(), TlsError> {
        for chunk in data.chunks(MAX_FRAGMENT_LEN) {
            self.out_record.write_record(
                &mut self.stream,
                &TlsPlaintext {
                    content_type: ContentType::ApplicationData,
                    fragment: chunk.to_vec(),
                },
            )?;
        }
        Ok(())
    }

    fn send_alert(&mut self, alert: Alert) -> Result<(), TlsError> {
        if !alert.is_wire() {
            return Ok(());
        }
        log::debug!("sending alert: {alert}");
        self.out_record.write_record(
            &mut self.stream,
            &TlsPlaintext {
                content_type: ContentType::Alert,
                fragment: vec![alert.level() as u8, alert as u8],
            },
        )
    }

    /// Send close_notify and stop using the connection.
    pub fn close(&mut self) -> Result<(), TlsError> {
        if !self.sent_close_notify {
            self.send_alert(Alert::CloseNotify)?;
            self.sent_close_notify = true;
        }
        self.stream.flush().map_err(TlsError::Io)
    }

    /// Emit a KeyUpdate and rotate the local send keys. When `request` is
    /// set the peer answers with its own KeyUpdate.
    pub fn send_key_update(&mut self, request: bool) -> Result<(), TlsError> {
        if !self.handshake_complete {
            return Err(TlsError::Protocol(
                "cannot update keys before the handshake".into(),
            ));
        }
        let connected = self
            .connected
            .as_mut()
            .ok_or_else(|| TlsError::Internal("connected state missing".into()))?;
        let request = if request {
            KeyUpdateRequest::UpdateRequested
        } else {
            KeyUpdateRequest::UpdateNotRequested
        };
        let actions = connected
            .key_update(request)
            .map_err(|a| TlsError::Protocol(format!("key update alert: {a}")))?;
        for action in actions {
            self.take_action(action)?;
        }
        Ok(())
    }

    /// RFC 8446 Section 7.5 exporter; identical on both endpoints.
    pub fn compute_exporter(
        &self,
        label: &[u8],
        context: &[u8],
        length: usize,
    ) -> Result<Vec<u8>, TlsError> {
        let connected = self
            .connected
            .as_ref()
            .ok_or_else(|| TlsError::Protocol("exporter before handshake".into()))?;
        connected.compute_exporter(label, context, length)
    }
}
