//! Tandem server binary.
//!
//! TCP + Cap'n Proto RPC server hosting collaborative document authorities.
//!
//! ## Usage
//!
//! ```bash
//! tandem-server [--port PORT] [--bind ADDR] [--seed FILE]
//! ```

use std::env;
use std::net::SocketAddr;
use std::process::ExitCode;

use tandem_server::constants::{DEFAULT_BIND_ADDRESS, DEFAULT_PORT};
use tandem_server::{CollabServer, ServerConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn print_usage() {
    eprintln!(
        r#"tandem-server - TCP + Cap'n Proto sync server for tandem

USAGE:
    tandem-server [OPTIONS]

OPTIONS:
    --port <PORT>    TCP port (default: {port})
    --bind <ADDR>    Bind address (default: {bind})
    --seed <FILE>    Initial content for documents created on first access
                     (default: empty)
    --help, -h       Show this help

EXAMPLES:
    tandem-server                     # Run on {bind}:{port}
    tandem-server --port 5000
    tandem-server --seed welcome.txt
"#,
        port = DEFAULT_PORT,
        bind = DEFAULT_BIND_ADDRESS,
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut port = DEFAULT_PORT;
    let mut bind = DEFAULT_BIND_ADDRESS.to_string();
    let mut seed_content = String::new();

    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_usage();
                return ExitCode::SUCCESS;
            }
            "--port" => {
                match args.get(i + 1).and_then(|s| s.parse().ok()) {
                    Some(p) => port = p,
                    None => {
                        eprintln!("--port requires a number");
                        return ExitCode::FAILURE;
                    }
                }
                i += 2;
            }
            "--bind" => {
                match args.get(i + 1) {
                    Some(addr) => bind = addr.clone(),
                    None => {
                        eprintln!("--bind requires an address");
                        return ExitCode::FAILURE;
                    }
                }
                i += 2;
            }
            "--seed" => {
                let Some(path) = args.get(i + 1) else {
                    eprintln!("--seed requires a file path");
                    return ExitCode::FAILURE;
                };
                match std::fs::read_to_string(path) {
                    Ok(content) => seed_content = content,
                    Err(e) => {
                        eprintln!("failed to read seed file {path}: {e}");
                        return ExitCode::FAILURE;
                    }
                }
                i += 2;
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_usage();
                return ExitCode::FAILURE;
            }
        }
    }

    let bind_addr: SocketAddr = match format!("{bind}:{port}").parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("invalid bind address {bind}:{port}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config = ServerConfig {
        bind_addr,
        seed_content,
    };

    let server = match CollabServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            log::error!("failed to bind {}: {}", bind_addr, e);
            return ExitCode::FAILURE;
        }
    };

    match server.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("server error: {}", e);
            ExitCode::FAILURE
        }
    }
}
