//! TLS client command.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use rewall_tls::{Alert, Config, Connection};

pub fn run(
    connect: &str,
    server_name: Option<&str>,
    alpn: Option<&str>,
    early_data: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let host = server_name
        .map(str::to_string)
        .or_else(|| connect.rsplit_once(':').map(|(h, _)| h.to_string()))
        .ok_or("cannot derive a server name from the connect address")?;

    eprintln!("connecting to {connect} (sni {host})...");
    let stream = TcpStream::connect(connect)?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    stream.set_write_timeout(Some(Duration::from_secs(10)))?;

    let mut builder = Config::builder().server_name(&host);
    if let Some(alpn) = alpn {
        let protos: Vec<&str> = alpn.split(',').map(str::trim).collect();
        builder = builder.next_protos(&protos);
    }
    let config = Arc::new(builder.build());

    let mut conn = Connection::client(stream, config);
    if let Some(data) = early_data {
        conn.queue_early_data(data.as_bytes());
    }

    let alert = conn.handshake();
    if alert != Alert::NoAlert {
        return Err(format!("handshake failed: {alert}").into());
    }
    print_connection_info(&conn);

    // Shuttle one line at a time: stdin -> server, response -> stdout.
    let stdin = std::io::stdin();
    let mut line = String::new();
    let mut buf = [0u8; 16384];
    loop {
        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        conn.write(line.as_bytes())?;
        let n = conn.read(&mut buf)?;
        if n == 0 {
            eprintln!("server closed the connection");
            break;
        }
        std::io::stdout().write_all(&buf[..n])?;
        std::io::stdout().flush()?;
    }

    conn.close()?;
    Ok(())
}

fn print_connection_info<S: Read + Write>(conn: &Connection<S>) {
    if let Some(params) = conn.connection_params() {
        if let Some(suite) = params.cipher_suite {
            eprintln!("cipher suite: {:04x}", suite.0);
        }
        eprintln!(
            "psk: {}, key exchange: {}, early data: {}",
            params.using_psk, params.using_dh, params.using_early_data
        );
        if let Some(proto) = &params.next_proto {
            eprintln!("alpn: {proto}");
        }
    }
}
