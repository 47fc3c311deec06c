//! Running transcript hash over handshake messages.
//!
//! Buffers the marshaled messages and replays them into a fresh hasher on
//! each `current_hash` call, so intermediate hashes never finalize live
//! state. HelloRetryRequest transcript substitution is performed by the
//! state machines, which feed a synthetic `message_hash` message in place
//! of the first ClientHello.

use super::HashAlg;

pub struct TranscriptHash {
    alg: HashAlg,
    message_buffer: Vec<u8>,
}

impl TranscriptHash {
    pub fn new(alg: HashAlg) -> Self {
        Self {
            alg,
            message_buffer: Vec::new(),
        }
    }

    /// Feed handshake message bytes (wire form, header included).
    pub fn update(&mut self, data: &[u8]) {
        self.message_buffer.extend_from_slice(data);
    }

    /// Current transcript hash; non-destructive.
    pub fn current_hash(&self) -> Vec<u8> {
        self.alg.digest(&self.message_buffer)
    }

    pub fn alg(&self) -> HashAlg {
        self.alg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn test_empty_hash() {
        let th = TranscriptHash::new(HashAlg::Sha256);
        assert_eq!(
            to_hex(&th.current_hash()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_incremental() {
        let mut th = TranscriptHash::new(HashAlg::Sha256);
        th.update(b"hello");
        let h1 = th.current_hash();
        // Non-destructive
        assert_eq!(h1, th.current_hash());

        th.update(b" world");
        let h2 = th.current_hash();
        assert_ne!(h1, h2);
        assert_eq!(h2, HashAlg::Sha256.digest(b"hello world"));
    }

    #[test]
    fn test_sha384_width() {
        let mut th = TranscriptHash::new(HashAlg::Sha384);
        th.update(b"abc");
        assert_eq!(th.current_hash().len(), 48);
    }
}
