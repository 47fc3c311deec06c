use clap::{Parser, Subcommand};

mod client;
mod firewall;
mod server;

/// rewall command-line tool: TLS endpoint and reverse-firewall proxy.
#[derive(Parser)]
#[command(name = "rewall")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a TLS server and shuttle stdin/stdout over the channel.
    Client {
        /// host:port to connect to.
        connect: String,
        /// Server name for SNI and PSK lookup (defaults to the host part).
        #[arg(short, long)]
        server_name: Option<String>,
        /// ALPN protocols, comma separated.
        #[arg(short, long)]
        alpn: Option<String>,
        /// Early data to send as 0-RTT (requires a cached PSK).
        #[arg(short, long)]
        early_data: Option<String>,
    },
    /// Run an echo TLS server, one thread per connection.
    Server {
        /// host:port to listen on.
        #[arg(short, long, default_value = "127.0.0.1:4433")]
        listen: String,
        /// Offer session tickets for resumption.
        #[arg(long)]
        tickets: bool,
        /// Demand a cookie round-trip (HelloRetryRequest) before
        /// negotiating.
        #[arg(long)]
        require_cookie: bool,
        /// Accept 0-RTT early data from resumed clients.
        #[arg(long)]
        allow_early_data: bool,
    },
    /// Run the reverse-firewall proxy between a listener and an upstream.
    Firewall {
        /// Listen address.
        #[arg(short = 'l', long)]
        listen: String,
        /// Upstream (server) address.
        #[arg(short = 'r', long)]
        upstream: String,
    },
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Client {
            connect,
            server_name,
            alpn,
            early_data,
        } => client::run(&connect, server_name.as_deref(), alpn.as_deref(), early_data.as_deref()),
        Commands::Server {
            listen,
            tickets,
            require_cookie,
            allow_early_data,
        } => server::run(&listen, tickets, require_cookie, allow_early_data),
        Commands::Firewall { listen, upstream } => firewall::run(&listen, &upstream),
    };

    if let Err(e) = result {
        eprintln!("rewall: {e}");
        std::process::exit(1);
    }
}
