//! Incremental reader for length-prefixed frames.
//!
//! Both TLS records and TLS handshake messages are a fixed-size header
//! followed by a body whose length the header declares, so the same
//! restartable parser serves the record layer and the handshake layer.

use crate::error::TlsError;

/// Describes one framing: header size and how the header declares the body
/// length.
pub trait Framing {
    fn header_len(&self) -> usize;
    fn frame_len(&self, header: &[u8]) -> Result<usize, TlsError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Body,
}

/// Reassembles frames from arbitrarily chunked input.
///
/// Callers push chunks with [`FrameReader::add_chunk`] and repeatedly call
/// [`FrameReader::process`]; each successful call yields exactly one
/// `(header, body)` pair and resets the internal buffers. Bytes are consumed
/// in order exactly once; residual bytes carry over to the next frame.
pub struct FrameReader<F: Framing> {
    details: F,
    phase: Phase,
    header: Vec<u8>,
    body: Vec<u8>,
    write_offset: usize,
    remainder: Vec<u8>,
}

impl<F: Framing> FrameReader<F> {
    pub fn new(details: F) -> Self {
        let header = vec![0u8; details.header_len()];
        Self {
            details,
            phase: Phase::Header,
            header,
            body: Vec::new(),
            write_offset: 0,
            remainder: Vec::new(),
        }
    }

    /// Buffer another chunk of input.
    pub fn add_chunk(&mut self, data: &[u8]) {
        self.remainder.extend_from_slice(data);
    }

    /// Whether any bytes are buffered but not yet returned.
    pub fn has_buffered(&self) -> bool {
        !self.remainder.is_empty() || self.write_offset > 0 || self.phase == Phase::Body
    }

    fn working_len(&self) -> usize {
        match self.phase {
            Phase::Header => self.header.len(),
            Phase::Body => self.body.len(),
        }
    }

    fn needed(&self) -> usize {
        (self.working_len() - self.write_offset).saturating_sub(self.remainder.len())
    }

    /// Try to complete one frame. Returns `TlsError::WouldBlock` when the
    /// buffered bytes do not yet contain a full frame.
    pub fn process(&mut self) -> Result<(Vec<u8>, Vec<u8>), TlsError> {
        while self.needed() == 0 {
            let working = match self.phase {
                Phase::Header => &mut self.header,
                Phase::Body => &mut self.body,
            };
            let n = std::cmp::min(working.len() - self.write_offset, self.remainder.len());
            working[self.write_offset..self.write_offset + n]
                .copy_from_slice(&self.remainder[..n]);
            self.remainder.drain(..n);
            self.write_offset += n;
            if self.write_offset < working.len() {
                return Err(TlsError::WouldBlock);
            }
            self.write_offset = 0;

            match self.phase {
                Phase::Body => {
                    self.phase = Phase::Header;
                    let body = std::mem::take(&mut self.body);
                    return Ok((self.header.clone(), body));
                }
                Phase::Header => {
                    let body_len = self.details.frame_len(&self.header)?;
                    self.body = vec![0u8; body_len];
                    self.phase = Phase::Body;
                }
            }
        }
        Err(TlsError::WouldBlock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test framing: one length byte, body of that length.
    struct ByteLen;

    impl Framing for ByteLen {
        fn header_len(&self) -> usize {
            1
        }
        fn frame_len(&self, header: &[u8]) -> Result<usize, TlsError> {
            Ok(header[0] as usize)
        }
    }

    fn frame_stream() -> Vec<u8> {
        // Three frames: [3: a b c] [0:] [5: 1 2 3 4 5]
        vec![3, b'a', b'b', b'c', 0, 5, 1, 2, 3, 4, 5]
    }

    fn expected() -> Vec<(Vec<u8>, Vec<u8>)> {
        vec![
            (vec![3], b"abc".to_vec()),
            (vec![0], vec![]),
            (vec![5], vec![1, 2, 3, 4, 5]),
        ]
    }

    fn drain(fr: &mut FrameReader<ByteLen>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        loop {
            match fr.process() {
                Ok(frame) => out.push(frame),
                Err(TlsError::WouldBlock) => return out,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }

    #[test]
    fn test_whole_stream_at_once() {
        let mut fr = FrameReader::new(ByteLen);
        fr.add_chunk(&frame_stream());
        assert_eq!(drain(&mut fr), expected());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut fr = FrameReader::new(ByteLen);
        let mut out = Vec::new();
        for b in frame_stream() {
            fr.add_chunk(&[b]);
            out.extend(drain(&mut fr));
        }
        assert_eq!(out, expected());
    }

    #[test]
    fn test_every_split_point() {
        // Any two-chunk partitioning must yield the same frame sequence as
        // feeding the whole stream at once.
        let stream = frame_stream();
        for split in 0..=stream.len() {
            let mut fr = FrameReader::new(ByteLen);
            let mut out = Vec::new();
            fr.add_chunk(&stream[..split]);
            out.extend(drain(&mut fr));
            fr.add_chunk(&stream[split..]);
            out.extend(drain(&mut fr));
            assert_eq!(out, expected(), "split at {split}");
        }
    }

    #[test]
    fn test_irregular_chunking() {
        let stream = frame_stream();
        for chunk_len in 1..=4usize {
            let mut fr = FrameReader::new(ByteLen);
            let mut out = Vec::new();
            for chunk in stream.chunks(chunk_len) {
                fr.add_chunk(chunk);
                out.extend(drain(&mut fr));
            }
            assert_eq!(out, expected(), "chunk length {chunk_len}");
        }
    }

    #[test]
    fn test_would_block_on_partial_header() {
        struct TwoByteHeader;
        impl Framing for TwoByteHeader {
            fn header_len(&self) -> usize {
                2
            }
            fn frame_len(&self, header: &[u8]) -> Result<usize, TlsError> {
                Ok(header[1] as usize)
            }
        }

        let mut fr = FrameReader::new(TwoByteHeader);
        fr.add_chunk(&[0x16]);
        assert!(matches!(fr.process(), Err(TlsError::WouldBlock)));
        fr.add_chunk(&[2, 0xaa, 0xbb]);
        let (hdr, body) = fr.process().unwrap();
        assert_eq!(hdr, vec![0x16, 2]);
        assert_eq!(body, vec![0xaa, 0xbb]);
    }

    #[test]
    fn test_residual_carries_over() {
        let mut fr = FrameReader::new(ByteLen);
        // First frame plus the header of the next
        fr.add_chunk(&[2, 0x01, 0x02, 1]);
        let (_, body) = fr.process().unwrap();
        assert_eq!(body, vec![0x01, 0x02]);
        assert!(matches!(fr.process(), Err(TlsError::WouldBlock)));
        assert!(fr.has_buffered());
        fr.add_chunk(&[0x42]);
        let (hdr, body) = fr.process().unwrap();
        assert_eq!(hdr, vec![1]);
        assert_eq!(body, vec![0x42]);
    }
}
