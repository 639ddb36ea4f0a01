//! Server entrypoint: parses CLI flags, wires up the account store,
//! trader registry, exchange and connection registry, spawns the
//! matchmaker and signal-watcher threads, and runs the accept loop.

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use signal_hook::consts::SIGHUP;
use signal_hook::iterator::Signals;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bourse_core::account::{AccountStore, DEFAULT_MAX_ACCOUNTS};
use bourse_core::exchange::Exchange;
use bourse_core::registry::ConnectionRegistry;
use bourse_core::session;
use bourse_core::trader::{TraderRegistry, DEFAULT_MAX_TRADERS};

/// Concurrent continuous-double-auction exchange server.
#[derive(Parser, Debug)]
#[command(name = "bourse", version, about)]
struct Cli {
    /// TCP port to listen on.
    #[arg(short, long)]
    port: u16,

    /// Maximum number of distinct account names the server will track.
    #[arg(long, default_value_t = DEFAULT_MAX_ACCOUNTS)]
    max_accounts: usize,

    /// Maximum number of simultaneously logged-in traders.
    #[arg(long, default_value_t = DEFAULT_MAX_TRADERS)]
    max_traders: usize,

    /// Emit structured logs as JSON instead of human-readable text.
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let accounts = Arc::new(AccountStore::new(cli.max_accounts));
    let traders = Arc::new(TraderRegistry::new(cli.max_traders));
    let connections = Arc::new(ConnectionRegistry::new(cli.max_traders));
    let exchange = Exchange::new();

    let matchmaker = exchange.spawn_matchmaker(Arc::clone(&traders));

    let listener = match TcpListener::bind(("0.0.0.0", cli.port)) {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, port = cli.port, "failed to bind listener");
            std::process::exit(1);
        }
    };
    info!(port = cli.port, "bourse server listening");

    spawn_signal_watcher(Arc::clone(&exchange), Arc::clone(&connections), matchmaker);

    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                let conn_id = match connections.register(&stream) {
                    Ok(id) => id,
                    Err(err) => {
                        warn!(%addr, %err, "rejecting connection");
                        continue;
                    }
                };
                info!(conn_id, %addr, "connection accepted");
                let exchange = Arc::clone(&exchange);
                let traders = Arc::clone(&traders);
                let accounts = Arc::clone(&accounts);
                let connections = Arc::clone(&connections);
                thread::spawn(move || {
                    session::run(stream, conn_id, exchange, traders, accounts, connections)
                });
            }
            Err(err) => {
                warn!(%err, "accept failed");
            }
        }
    }
}

/// Spawn the dedicated thread that waits for `SIGHUP` and drives
/// graceful shutdown: half-close every live connection, wait for the
/// connection registry to drain, finalize the exchange, then exit.
fn spawn_signal_watcher(
    exchange: Arc<Exchange>,
    connections: Arc<ConnectionRegistry>,
    matchmaker: thread::JoinHandle<()>,
) {
    let mut signals = match Signals::new(&[SIGHUP]) {
        Ok(signals) => signals,
        Err(err) => {
            error!(%err, "failed to register SIGHUP watcher");
            return;
        }
    };
    thread::spawn(move || {
        for signal in signals.forever() {
            if signal == SIGHUP {
                info!("SIGHUP received, starting graceful shutdown");
                terminate(&exchange, &connections, matchmaker);
                return;
            }
        }
    });
}

fn terminate(exchange: &Exchange, connections: &ConnectionRegistry, matchmaker: thread::JoinHandle<()>) {
    connections.shutdown_all();
    connections.wait_for_empty();
    exchange.finalize();
    if let Err(err) = matchmaker.join() {
        warn!(?err, "matchmaker thread panicked during shutdown");
    }
    info!("shutdown complete");
    std::process::exit(0);
}

