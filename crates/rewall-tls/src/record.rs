//! TLS record layer.
//!
//! One `RecordLayer` instance serves one direction of one connection; the
//! connection owns an inbound and an outbound half. The wire header is
//! always `[type, 0x03, 0x01, len_hi, len_lo]`. Once keys are installed,
//! fragments are AEAD-protected with a per-record nonce of
//! `iv XOR pad64(seq)` and carry the real content type behind zero padding.

use zeroize::Zeroize;

use crate::crypt::aead::{create_aead, TlsAead};
use crate::crypt::traffic_keys::TrafficKeys;
use crate::crypt::CipherSuite;
use crate::error::TlsError;
use crate::frame::{FrameReader, Framing};

/// Record header size: content_type(1) + version(2) + length(2).
pub const RECORD_HEADER_LEN: usize = 5;

/// Maximum plaintext fragment size (2^14).
pub const MAX_FRAGMENT_LEN: usize = 1 << 14;

/// Maximum ciphertext expansion allowed beyond the plaintext cap.
pub const MAX_CIPHERTEXT_OVERHEAD: usize = 256;

const NONCE_LEN: usize = 12;

/// TLS record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl ContentType {
    pub fn from_u8(v: u8) -> Result<Self, TlsError> {
        match v {
            21 => Ok(ContentType::Alert),
            22 => Ok(ContentType::Handshake),
            23 => Ok(ContentType::ApplicationData),
            _ => Err(TlsError::Decode(format!("unknown content type {v:02x}"))),
        }
    }
}

/// A record after header validation (and decryption, when keys are active).
#[derive(Debug, Clone)]
pub struct TlsPlaintext {
    pub content_type: ContentType,
    pub fragment: Vec<u8>,
}

struct RecordFraming {
    allow_wrong_version: bool,
}

impl Framing for RecordFraming {
    fn header_len(&self) -> usize {
        RECORD_HEADER_LEN
    }

    fn frame_len(&self, header: &[u8]) -> Result<usize, TlsError> {
        ContentType::from_u8(header[0])?;
        if !self.allow_wrong_version && (header[1] != 0x03 || header[2] != 0x01) {
            return Err(TlsError::Decode(format!(
                "invalid record version {:02x}{:02x}",
                header[1], header[2]
            )));
        }
        let size = ((header[3] as usize) << 8) | (header[4] as usize);
        if size > MAX_FRAGMENT_LEN + MAX_CIPHERTEXT_OVERHEAD {
            return Err(TlsError::Decode("ciphertext size too big".into()));
        }
        Ok(size)
    }
}

/// Per-direction record state: framing, optional AEAD, sequence number,
/// and the one-record peek cache.
pub struct RecordLayer {
    frame: FrameReader<RecordFraming>,
    cached_record: Option<TlsPlaintext>,
    cipher: Option<Box<dyn TlsAead>>,
    iv: Vec<u8>,
    seq: u64,
}

impl Drop for RecordLayer {
    fn drop(&mut self) {
        self.iv.zeroize();
    }
}

impl RecordLayer {
    pub fn new(allow_wrong_version: bool) -> Self {
        Self {
            frame: FrameReader::new(RecordFraming {
                allow_wrong_version,
            }),
            cached_record: None,
            cipher: None,
            iv: Vec::new(),
            seq: 0,
        }
    }

    /// Install traffic keys for this direction. Resets the sequence number.
    pub fn rekey(&mut self, suite: CipherSuite, keys: &TrafficKeys) -> Result<(), TlsError> {
        self.cipher = Some(create_aead(suite, &keys.key)?);
        self.iv.zeroize();
        self.iv = keys.iv.clone();
        self.seq = 0;
        Ok(())
    }

    /// Whether keys are installed.
    pub fn is_protected(&self) -> bool {
        self.cipher.is_some()
    }

    /// Whether bytes are buffered beyond complete records already returned.
    pub fn has_buffered(&self) -> bool {
        self.frame.has_buffered()
    }

    fn nonce(&self) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        nonce[4..].copy_from_slice(&self.seq.to_be_bytes());
        for (n, iv) in nonce.iter_mut().zip(self.iv.iter()) {
            *n ^= iv;
        }
        nonce
    }

    /// Wraparound is forbidden; the connection must be torn down first.
    fn increment_seq(&mut self) -> Result<(), TlsError> {
        self.seq = self
            .seq
            .checked_add(1)
            .ok_or_else(|| TlsError::Internal("record sequence number wraparound".into()))?;
        Ok(())
    }

    /// Return the next record's content type without consuming it.
    pub fn peek_record_type(&mut self, io: &mut dyn std::io::Read) -> Result<ContentType, TlsError> {
        Ok(self.next_record(io)?.content_type)
    }

    /// Read (and decrypt) the next record, consuming the peek cache.
    pub fn read_record(&mut self, io: &mut dyn std::io::Read) -> Result<TlsPlaintext, TlsError> {
        let pt = self.next_record(io);
        self.cached_record = None;
        pt
    }

    fn next_record(&mut self, io: &mut dyn std::io::Read) -> Result<TlsPlaintext, TlsError> {
        if let Some(pt) = &self.cached_record {
            return Ok(pt.clone());
        }

        let (header, body) = loop {
            match self.frame.process() {
                Ok(frame) => break frame,
                Err(TlsError::WouldBlock) => {
                    let mut buf = [0u8; 4096];
                    let n = match io.read(&mut buf) {
                        Ok(0) => {
                            return Err(TlsError::Io(std::io::Error::new(
                                std::io::ErrorKind::UnexpectedEof,
                                "transport closed",
                            )))
                        }
                        Ok(n) => n,
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            return Err(TlsError::WouldBlock)
                        }
                        Err(e) => return Err(TlsError::Io(e)),
                    };
                    self.frame.add_chunk(&buf[..n]);
                }
                Err(e) => return Err(e),
            }
        };

        let content_type = ContentType::from_u8(header[0])?;
        let mut pt = TlsPlaintext {
            content_type,
            fragment: body,
        };

        if self.cipher.is_some() {
            pt = self.decrypt(pt)?;
        }

        if pt.fragment.len() > MAX_FRAGMENT_LEN {
            return Err(TlsError::Decode("plaintext size too big".into()));
        }

        log::trace!(
            "record read: type={:?} len={}",
            pt.content_type,
            pt.fragment.len()
        );
        self.cached_record = Some(pt.clone());
        self.increment_seq()?;
        Ok(pt)
    }

    fn decrypt(&mut self, pt: TlsPlaintext) -> Result<TlsPlaintext, TlsError> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| TlsError::Internal("decrypt without keys".into()))?;
        if pt.fragment.len() < cipher.overhead() {
            return Err(TlsError::Decrypt(format!(
                "record too short [{}] < [{}]",
                pt.fragment.len(),
                cipher.overhead()
            )));
        }

        let nonce = self.nonce();
        let inner = cipher.open(&nonce, &[], &pt.fragment)?;

        // Scan backward past the zero padding to the real content type.
        let mut boundary = inner.len();
        while boundary > 0 && inner[boundary - 1] == 0 {
            boundary -= 1;
        }
        if boundary == 0 {
            return Err(TlsError::Decode("inner plaintext has no content type".into()));
        }
        let content_type = ContentType::from_u8(inner[boundary - 1])?;

        Ok(TlsPlaintext {
            content_type,
            fragment: inner[..boundary - 1].to_vec(),
        })
    }

    fn encrypt(&mut self, pt: &TlsPlaintext, pad_len: usize) -> Result<TlsPlaintext, TlsError> {
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| TlsError::Internal("encrypt without keys".into()))?;

        let mut inner = Vec::with_capacity(pt.fragment.len() + 1 + pad_len);
        inner.extend_from_slice(&pt.fragment);
        inner.push(pt.content_type as u8);
        inner.resize(pt.fragment.len() + 1 + pad_len, 0);

        let nonce = self.nonce();
        let fragment = cipher.seal(&nonce, &[], &inner)?;
        inner.zeroize();

        if fragment.len() > MAX_FRAGMENT_LEN + MAX_CIPHERTEXT_OVERHEAD {
            return Err(TlsError::Decode("ciphertext would exceed maximum".into()));
        }

        Ok(TlsPlaintext {
            content_type: ContentType::ApplicationData,
            fragment,
        })
    }

    pub fn write_record(
        &mut self,
        io: &mut dyn std::io::Write,
        pt: &TlsPlaintext,
    ) -> Result<(), TlsError> {
        self.write_record_with_padding(io, pt, 0)
    }

    /// Padding is only legal once keys are installed.
    pub fn write_record_with_padding(
        &mut self,
        io: &mut dyn std::io::Write,
        pt: &TlsPlaintext,
        pad_len: usize,
    ) -> Result<(), TlsError> {
        if pt.fragment.len() > MAX_FRAGMENT_LEN {
            return Err(TlsError::Decode("record size too big".into()));
        }

        let out;
        let out_ref = if self.cipher.is_some() {
            out = self.encrypt(pt, pad_len)?;
            self.increment_seq()?;
            &out
        } else {
            if pad_len > 0 {
                return Err(TlsError::Protocol(
                    "padding requires an encrypted record".into(),
                ));
            }
            pt
        };

        let len = out_ref.fragment.len();
        let header = [
            out_ref.content_type as u8,
            0x03,
            0x01,
            (len >> 8) as u8,
            len as u8,
        ];
        log::trace!(
            "record write: type={:?} len={}",
            out_ref.content_type,
            len
        );
        let mut wire = Vec::with_capacity(RECORD_HEADER_LEN + len);
        wire.extend_from_slice(&header);
        wire.extend_from_slice(&out_ref.fragment);
        io.write_all(&wire)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn set_sequence_number(&mut self, seq: u64) {
        self.seq = seq;
    }

    #[cfg(test)]
    pub(crate) fn sequence_number(&self) -> u64 {
        self.seq
    }
}
