//! Reverse-firewall proxy command.
//!
//! One TCP listener; per accepted connection an upstream connection and two
//! directional pump threads. Both pumps share one proxy behind a mutex so
//! the ClientHello and ServerHello rewrites are serialised against each
//! other.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use rewall_tls::{Direction, ReverseFirewallProxy, TlsError};

pub fn run(listen: &str, upstream: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(listen)?;
    eprintln!("firewall listening on {listen}, upstream {upstream}");

    for stream in listener.incoming() {
        let client = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        let upstream = upstream.to_string();
        std::thread::spawn(move || {
            if let Err(e) = proxy_connection(client, &upstream) {
                debug!("proxied connection ended: {e}");
            }
        });
    }
    Ok(())
}

fn proxy_connection(client: TcpStream, upstream: &str) -> Result<(), Box<dyn std::error::Error>> {
    let server = TcpStream::connect(upstream)?;
    debug!(
        "proxying {} -> {}",
        client.peer_addr()?,
        server.peer_addr()?
    );

    // The pairing backend supplies the real rerandomizer; without one the
    // firewall forwards BN256 shares unchanged and says so.
    warn!("no pairing backend wired in; BN256 shares pass through unmodified");
    let proxy = Arc::new(Mutex::new(ReverseFirewallProxy::new(Arc::new(
        |share: &[u8]| Ok(share.to_vec()),
    ))));

    let c2s = pump(
        client.try_clone()?,
        server.try_clone()?,
        proxy.clone(),
        Direction::ClientToServer,
    );
    let s2c = pump(server, client, proxy, Direction::ServerToClient);

    let _ = c2s.join();
    let _ = s2c.join();
    Ok(())
}

fn pump(
    mut from: TcpStream,
    mut to: TcpStream,
    proxy: Arc<Mutex<ReverseFirewallProxy>>,
    direction: Direction,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || loop {
        let packet = match read_record(&mut from) {
            Ok(Some(p)) => p,
            Ok(None) => {
                debug!("{direction}: stream closed");
                let _ = to.shutdown(std::net::Shutdown::Write);
                return;
            }
            Err(e) => {
                debug!("{direction}: read failed: {e}");
                return;
            }
        };
        let rewritten = {
            let mut proxy = match proxy.lock() {
                Ok(p) => p,
                Err(_) => return,
            };
            match proxy.process_message(direction, &packet) {
                Ok(out) => out,
                Err(e) => {
                    // Parse failure is fatal to the proxied connection.
                    warn!("{direction}: dropping connection: {e}");
                    let _ = from.shutdown(std::net::Shutdown::Both);
                    let _ = to.shutdown(std::net::Shutdown::Both);
                    return;
                }
            }
        };
        if to.write_all(&rewritten).is_err() {
            return;
        }
    })
}

/// Read exactly one TLS record (header plus declared body).
fn read_record(stream: &mut TcpStream) -> Result<Option<Vec<u8>>, TlsError> {
    let mut header = [0u8; 5];
    match stream.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(TlsError::Io(e)),
    }
    let len = ((header[3] as usize) << 8) | header[4] as usize;
    let mut packet = vec![0u8; 5 + len];
    packet[..5].copy_from_slice(&header);
    stream
        .read_exact(&mut packet[5..])
        .map_err(TlsError::Io)?;
    Ok(Some(packet))
}
