//! Echo TLS server command.

use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use log::{debug, warn};
use rewall_tls::{Alert, Config, Connection};

pub fn run(
    listen: &str,
    tickets: bool,
    require_cookie: bool,
    allow_early_data: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(
        Config::builder()
            .server_name("rewall")
            .send_session_tickets(tickets)
            .ticket_lifetime(3600)
            .require_cookie(require_cookie)
            .allow_early_data(allow_early_data)
            .build(),
    );

    let listener = TcpListener::bind(listen)?;
    eprintln!("listening on {listen}");

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!("accept failed: {e}");
                continue;
            }
        };
        let config = config.clone();
        std::thread::spawn(move || {
            if let Err(e) = serve(stream, config) {
                debug!("connection ended: {e}");
            }
        });
    }
    Ok(())
}

fn serve(stream: TcpStream, config: Arc<Config>) -> Result<(), Box<dyn std::error::Error>> {
    let peer = stream.peer_addr()?;
    let mut conn = Connection::server(stream, config);

    let alert = conn.handshake();
    if alert != Alert::NoAlert {
        return Err(format!("handshake with {peer} failed: {alert}").into());
    }
    debug!("handshake with {peer} complete");
    if !conn.early_data().is_empty() {
        debug!("{peer} sent {} bytes of early data", conn.early_data().len());
    }

    let mut buf = [0u8; 16384];
    loop {
        let n = conn.read(&mut buf)?;
        if n == 0 {
            break;
        }
        conn.write(&buf[..n])?;
    }
    conn.close()?;
    Ok(())
}
