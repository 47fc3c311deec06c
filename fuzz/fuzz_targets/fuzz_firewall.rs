#![no_main]
use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use rewall_tls::{Direction, ReverseFirewallProxy};

fuzz_target!(|data: &[u8]| {
    let mut proxy = ReverseFirewallProxy::new(Arc::new(|share: &[u8]| Ok(share.to_vec())));
    let _ = proxy.process_message(Direction::ClientToServer, data);
    let _ = proxy.process_message(Direction::ServerToClient, data);
});
