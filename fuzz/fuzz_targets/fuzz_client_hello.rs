#![no_main]
use libfuzzer_sys::fuzz_target;
use rewall_tls::handshake::messages::ClientHelloBody;
use rewall_tls::handshake::HandshakeBody;

fuzz_target!(|data: &[u8]| {
    if let Ok(ch) = ClientHelloBody::unmarshal(data) {
        // Anything that decodes must re-encode.
        let _ = ch.marshal();
    }
});
