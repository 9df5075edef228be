use std::io::BufRead;
use std::path::PathBuf;
use std::thread;

use clap::Parser;
use crossbeam_channel::Sender;
use eyre::WrapErr;
use tracing_subscriber::EnvFilter;

use bindserver::{BindServer, ServerConfig, Stats};

/// Operator-run daemon that launches and controls debuggee processes on
/// behalf of a remote test driver.
#[derive(Debug, Parser)]
struct Args {
    /// Bind file naming the authorized host, ports and path prefixes.
    #[arg(long, default_value = "bindserver.properties")]
    config: PathBuf,
    /// Listening port, overriding the bind file.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    tracing::debug!(?args, "parsed command line arguments");

    let bind_config =
        bindfile::load_from_path(&args.config).wrap_err("loading bind file configuration")?;
    let config = ServerConfig::from_bind_config(&bind_config, args.port);

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
    thread::spawn(move || console_loop(shutdown_tx));

    let server = BindServer::new(config);
    let stats = server.run(shutdown_rx).wrap_err("running bind server")?;
    print_stats(&stats);
    Ok(())
}

/// The operator console: `exit` or `quit` on standard input stops the server.
fn console_loop(shutdown: Sender<()>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            // stdin is gone (daemonized); keep serving until killed
            return;
        };
        let command = line.trim();
        if command.eq_ignore_ascii_case("exit") || command.eq_ignore_ascii_case("quit") {
            let _ = shutdown.send(());
            return;
        }
        if !command.is_empty() {
            println!("unknown command {command:?}, type exit or quit to stop");
        }
    }
}

fn print_stats(stats: &Stats) {
    println!("Connections accepted:   {}", stats.accepted);
    println!("  sessions served:      {}", stats.served);
    println!("  unauthorized:         {}", stats.unauthorized);
    println!("  rejected while busy:  {}", stats.busy);
}
