//! Pre-shared keys and the shared PSK cache.

use std::collections::HashMap;
use std::time::SystemTime;

use zeroize::Zeroize;

use crate::crypt::CipherSuite;

/// A pre-shared key, external or produced by a NewSessionTicket.
#[derive(Clone)]
pub struct PreSharedKey {
    pub cipher_suite: CipherSuite,
    pub is_resumption: bool,
    pub identity: Vec<u8>,
    pub key: Vec<u8>,
    pub next_proto: Option<String>,
    pub received_at: SystemTime,
    pub expires_at: SystemTime,
    pub ticket_age_add: u32,
}

impl Drop for PreSharedKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for PreSharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreSharedKey")
            .field("cipher_suite", &self.cipher_suite)
            .field("is_resumption", &self.is_resumption)
            .field("identity", &hex::encode(&self.identity))
            .field("key_len", &self.key.len())
            .field("next_proto", &self.next_proto)
            .field("ticket_age_add", &self.ticket_age_add)
            .finish()
    }
}

/// PSK cache shared between connections and their config.
///
/// Clients key entries by server name, servers by the hex-encoded ticket
/// identity. The map itself stays private; only get/put/size are exposed.
#[derive(Debug, Default)]
pub struct PskStore {
    entries: HashMap<String, PreSharedKey>,
}

impl PskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<PreSharedKey> {
        self.entries.get(name).cloned()
    }

    pub fn put(&mut self, name: impl Into<String>, psk: PreSharedKey) {
        self.entries.insert(name.into(), psk);
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries; test support for cross-checking both cache sides.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PreSharedKey)> {
        self.entries.iter()
    }
}
