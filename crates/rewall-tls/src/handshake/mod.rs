//! Handshake message framing and the client/server automata.

pub mod actions;
pub mod client;
pub mod connected;
pub mod messages;
pub mod server;
pub mod signing;

use crate::codec::put_u24;
use crate::error::TlsError;
use crate::frame::{FrameReader, Framing};
use crate::record::{ContentType, RecordLayer, MAX_FRAGMENT_LEN};

/// Handshake header size: msg_type(1) + length(3).
pub const HANDSHAKE_HEADER_LEN: usize = 4;

/// Handshake message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    ClientHello = 1,
    ServerHello = 2,
    NewSessionTicket = 4,
    EndOfEarlyData = 5,
    HelloRetryRequest = 6,
    EncryptedExtensions = 8,
    Certificate = 11,
    CertificateRequest = 13,
    CertificateVerify = 15,
    Finished = 20,
    KeyUpdate = 24,
    MessageHash = 254,
}

impl HandshakeType {
    pub fn from_u8(v: u8) -> Result<Self, TlsError> {
        match v {
            1 => Ok(HandshakeType::ClientHello),
            2 => Ok(HandshakeType::ServerHello),
            4 => Ok(HandshakeType::NewSessionTicket),
            5 => Ok(HandshakeType::EndOfEarlyData),
            6 => Ok(HandshakeType::HelloRetryRequest),
            8 => Ok(HandshakeType::EncryptedExtensions),
            11 => Ok(HandshakeType::Certificate),
            13 => Ok(HandshakeType::CertificateRequest),
            15 => Ok(HandshakeType::CertificateVerify),
            20 => Ok(HandshakeType::Finished),
            24 => Ok(HandshakeType::KeyUpdate),
            254 => Ok(HandshakeType::MessageHash),
            _ => Err(TlsError::Decode(format!("unknown handshake type {v}"))),
        }
    }
}

/// A handshake message: type plus body, header not included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub msg_type: HandshakeType,
    pub body: Vec<u8>,
}

/// A typed handshake message body.
pub trait HandshakeBody: Sized {
    const TYPE: HandshakeType;
    fn marshal(&self) -> Result<Vec<u8>, TlsError>;
    fn unmarshal(data: &[u8]) -> Result<Self, TlsError>;
}

impl HandshakeMessage {
    pub fn from_body<T: HandshakeBody>(body: &T) -> Result<Self, TlsError> {
        Ok(Self {
            msg_type: T::TYPE,
            body: body.marshal()?,
        })
    }

    /// Parse the body as `T`, checking the message type first.
    pub fn parse_as<T: HandshakeBody>(&self) -> Result<T, TlsError> {
        if self.msg_type != T::TYPE {
            return Err(TlsError::Protocol(format!(
                "expected {:?}, got {:?}",
                T::TYPE,
                self.msg_type
            )));
        }
        T::unmarshal(&self.body)
    }

    /// Wire form: `[type, len24, body]`.
    pub fn marshal(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HANDSHAKE_HEADER_LEN + self.body.len());
        out.push(self.msg_type as u8);
        put_u24(&mut out, self.body.len() as u32);
        out.extend_from_slice(&self.body);
        out
    }
}

struct HandshakeFraming;

impl Framing for HandshakeFraming {
    fn header_len(&self) -> usize {
        HANDSHAKE_HEADER_LEN
    }

    fn frame_len(&self, header: &[u8]) -> Result<usize, TlsError> {
        HandshakeType::from_u8(header[0])?;
        Ok(((header[1] as usize) << 16) | ((header[2] as usize) << 8) | (header[3] as usize))
    }
}

/// Reassembles handshake messages from the records of the current epoch.
/// Messages may be fragmented across records and several messages may share
/// one record; each `read_message` call yields exactly one complete message.
pub struct HandshakeLayer {
    frame: FrameReader<HandshakeFraming>,
}

impl Default for HandshakeLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeLayer {
    pub fn new() -> Self {
        Self {
            frame: FrameReader::new(HandshakeFraming),
        }
    }

    pub fn read_message(
        &mut self,
        record_layer: &mut RecordLayer,
        io: &mut dyn std::io::Read,
    ) -> Result<HandshakeMessage, TlsError> {
        loop {
            match self.frame.process() {
                Ok((header, body)) => {
                    let msg_type = HandshakeType::from_u8(header[0])?;
                    return Ok(HandshakeMessage { msg_type, body });
                }
                Err(TlsError::WouldBlock) => {
                    let pt = record_layer.read_record(io)?;
                    match pt.content_type {
                        ContentType::Handshake => self.frame.add_chunk(&pt.fragment),
                        ContentType::Alert => {
                            let alert = parse_alert_record(&pt.fragment)?;
                            return Err(TlsError::AlertReceived(alert));
                        }
                        other => {
                            return Err(TlsError::Protocol(format!(
                                "unexpected {other:?} record during handshake"
                            )))
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Parse a two-byte alert fragment into its description.
pub(crate) fn parse_alert_record(fragment: &[u8]) -> Result<crate::alert::Alert, TlsError> {
    if fragment.len() != 2 {
        return Err(TlsError::Decode("malformed alert record".into()));
    }
    crate::alert::AlertLevel::from_u8(fragment[0])
        .map_err(|v| TlsError::Decode(format!("unknown alert level {v}")))?;
    crate::alert::Alert::from_u8(fragment[1])
        .map_err(|v| TlsError::Decode(format!("unknown alert description {v}")))
}

/// Write one handshake message, fragmenting across records when it exceeds
/// the record-layer plaintext cap.
pub fn write_message(
    record_layer: &mut RecordLayer,
    io: &mut dyn std::io::Write,
    message: &HandshakeMessage,
) -> Result<(), TlsError> {
    let wire = message.marshal();
    for chunk in wire.chunks(MAX_FRAGMENT_LEN) {
        record_layer.write_record(
            io,
            &crate::record::TlsPlaintext {
                content_type: ContentType::Handshake,
                fragment: chunk.to_vec(),
            },
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::TlsPlaintext;
    use std::io::Cursor;

    #[test]
    fn test_handshake_type_wire_values() {
        assert_eq!(HandshakeType::ClientHello as u8, 1);
        assert_eq!(HandshakeType::ServerHello as u8, 2);
        assert_eq!(HandshakeType::NewSessionTicket as u8, 4);
        assert_eq!(HandshakeType::EndOfEarlyData as u8, 5);
        assert_eq!(HandshakeType::HelloRetryRequest as u8, 6);
        assert_eq!(HandshakeType::EncryptedExtensions as u8, 8);
        assert_eq!(HandshakeType::Certificate as u8, 11);
        assert_eq!(HandshakeType::CertificateRequest as u8, 13);
        assert_eq!(HandshakeType::CertificateVerify as u8, 15);
        assert_eq!(HandshakeType::Finished as u8, 20);
        assert_eq!(HandshakeType::KeyUpdate as u8, 24);
        assert_eq!(HandshakeType::MessageHash as u8, 254);
    }

    #[test]
    fn test_message_marshal_header() {
        let m = HandshakeMessage {
            msg_type: HandshakeType::Finished,
            body: vec![0xab; 32],
        };
        let wire = m.marshal();
        assert_eq!(wire[0], 20);
        assert_eq!(&wire[1..4], &[0, 0, 32]);
        assert_eq!(wire.len(), 36);
    }

    fn hs_record(fragment: &[u8]) -> Vec<u8> {
        let mut layer = RecordLayer::new(false);
        let mut out = Vec::new();
        layer
            .write_record(
                &mut out,
                &TlsPlaintext {
                    content_type: ContentType::Handshake,
                    fragment: fragment.to_vec(),
                },
            )
            .unwrap();
        out
    }

    #[test]
    fn test_coalesced_messages_in_one_record() {
        let m1 = HandshakeMessage {
            msg_type: HandshakeType::EncryptedExtensions,
            body: vec![0, 0],
        };
        let m2 = HandshakeMessage {
            msg_type: HandshakeType::Finished,
            body: vec![0x11; 32],
        };
        let mut fragment = m1.marshal();
        fragment.extend_from_slice(&m2.marshal());

        let wire = hs_record(&fragment);
        let mut records = RecordLayer::new(false);
        let mut layer = HandshakeLayer::new();
        let mut cursor = Cursor::new(wire);

        let got1 = layer.read_message(&mut records, &mut cursor).unwrap();
        assert_eq!(got1, m1);
        let got2 = layer.read_message(&mut records, &mut cursor).unwrap();
        assert_eq!(got2, m2);
    }

    #[test]
    fn test_message_fragmented_across_records() {
        let m = HandshakeMessage {
            msg_type: HandshakeType::Certificate,
            body: vec![0x5a; 100],
        };
        let wire_msg = m.marshal();
        let mut wire = hs_record(&wire_msg[..10]);
        wire.extend_from_slice(&hs_record(&wire_msg[10..]));

        let mut records = RecordLayer::new(false);
        let mut layer = HandshakeLayer::new();
        let got = layer
            .read_message(&mut records, &mut Cursor::new(wire))
            .unwrap();
        assert_eq!(got, m);
    }

    #[test]
    fn test_write_message_fragments_large_messages() {
        let m = HandshakeMessage {
            msg_type: HandshakeType::Certificate,
            body: vec![0x33; MAX_FRAGMENT_LEN + 100],
        };
        let mut records_out = RecordLayer::new(false);
        let mut wire = Vec::new();
        write_message(&mut records_out, &mut wire, &m).unwrap();

        let mut records_in = RecordLayer::new(false);
        let mut layer = HandshakeLayer::new();
        let got = layer
            .read_message(&mut records_in, &mut Cursor::new(wire))
            .unwrap();
        assert_eq!(got, m);
    }

    #[test]
    fn test_alert_during_handshake_is_error() {
        let mut layer_out = RecordLayer::new(false);
        let mut wire = Vec::new();
        layer_out
            .write_record(
                &mut wire,
                &TlsPlaintext {
                    content_type: ContentType::Alert,
                    fragment: vec![2, 40],
                },
            )
            .unwrap();

        let mut records = RecordLayer::new(false);
        let mut layer = HandshakeLayer::new();
        let err = layer
            .read_message(&mut records, &mut Cursor::new(wire))
            .unwrap_err();
        assert!(matches!(
            err,
            TlsError::AlertReceived(crate::alert::Alert::HandshakeFailure)
        ));
    }

    #[test]
    fn test_app_data_during_handshake_is_error() {
        let mut layer_out = RecordLayer::new(false);
        let mut wire = Vec::new();
        layer_out
            .write_record(
                &mut wire,
                &TlsPlaintext {
                    content_type: ContentType::ApplicationData,
                    fragment: vec![1, 2, 3],
                },
            )
            .unwrap();

        let mut records = RecordLayer::new(false);
        let mut layer = HandshakeLayer::new();
        assert!(matches!(
            layer.read_message(&mut records, &mut Cursor::new(wire)),
            Err(TlsError::Protocol(_))
        ));
    }
}
