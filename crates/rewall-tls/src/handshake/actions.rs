//! Actions produced by state transitions.
//!
//! Transitions are pure apart from explicit random draws; every side effect
//! they require is returned as an ordered action list the connection applies
//! one by one. Rekey actions sit exactly at the epoch boundaries of the
//! transcript.

use crate::crypt::traffic_keys::TrafficKeys;
use crate::crypt::CipherSuite;
use crate::handshake::HandshakeMessage;
use crate::psk::PreSharedKey;

/// Keys for one direction of one epoch.
pub struct EpochKeys {
    /// Epoch label, for logs: "early", "handshake", or "application".
    pub label: &'static str,
    pub suite: CipherSuite,
    pub keys: TrafficKeys,
}

/// One instruction for the connection driving the handshake.
pub enum HandshakeAction {
    /// Write a handshake message under the current outbound keys.
    SendMessage(HandshakeMessage),
    /// Install new inbound keys.
    RekeyIn(EpochKeys),
    /// Install new outbound keys.
    RekeyOut(EpochKeys),
    /// Client: flush the queued early data under the current outbound keys.
    SendEarlyData,
    /// Server: buffer inbound 0-RTT application data until a handshake
    /// record appears.
    ReadEarlyData,
    /// Server: consume and discard records that fail to decrypt (rejected
    /// 0-RTT) until one decrypts under the current inbound keys.
    ReadPastEarlyData,
    /// Store a PSK in the shared cache.
    StorePsk(PreSharedKey),
}

impl std::fmt::Debug for HandshakeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeAction::SendMessage(m) => write!(f, "SendMessage({:?})", m.msg_type),
            HandshakeAction::RekeyIn(k) => write!(f, "RekeyIn({})", k.label),
            HandshakeAction::RekeyOut(k) => write!(f, "RekeyOut({})", k.label),
            HandshakeAction::SendEarlyData => write!(f, "SendEarlyData"),
            HandshakeAction::ReadEarlyData => write!(f, "ReadEarlyData"),
            HandshakeAction::ReadPastEarlyData => write!(f, "ReadPastEarlyData"),
            HandshakeAction::StorePsk(p) => write!(f, "StorePsk({})", hex::encode(&p.identity)),
        }
    }
}
