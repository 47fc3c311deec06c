#![forbid(unsafe_code)]
#![doc = "TLS 1.3 endpoint with a cryptographic reverse-firewall proxy."]

pub mod alert;
pub mod cert;
pub mod codec;
pub mod config;
pub mod connection;
pub mod crypt;
pub mod error;
pub mod extensions;
pub mod firewall;
pub mod frame;
pub mod handshake;
pub mod psk;
pub mod record;

pub use alert::Alert;
pub use config::{Config, ConfigBuilder, ConnectionParameters};
pub use connection::Connection;
pub use crypt::{CipherSuite, NamedGroup, SignatureScheme};
pub use error::TlsError;
pub use firewall::{Direction, ReverseFirewallProxy};
pub use psk::{PreSharedKey, PskStore};

/// TLS 1.3 version codepoint carried in `supported_versions` and in the
/// ServerHello / HelloRetryRequest version field.
pub const SUPPORTED_VERSION: u16 = 0x0304;
