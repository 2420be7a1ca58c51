#[macro_use]
extern crate tracing;

use std::process::ExitCode;

use clap::Parser;

use stunt::{client, ClientConfig, Server, StunError};

/// STUN client and server.
///
/// With a URL, sends a Binding request and prints the reflexive address.
/// Without one, serves Binding requests on the given port.
#[derive(Debug, Parser)]
#[command(name = "stunt", version)]
struct Args {
    /// Port to serve on.
    #[arg(long, default_value_t = 3478)]
    port: u16,

    /// SOFTWARE attribute to send.
    #[arg(long)]
    software: Option<String>,

    /// Key for MESSAGE-INTEGRITY.
    #[arg(long)]
    key: Option<String>,

    /// STUN server, as stun:host[:port] or host[:port].
    url: Option<String>,
}

fn init_log() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stunt=info"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .init();
}

fn main() -> ExitCode {
    init_log();

    let args = Args::parse();

    let result = match &args.url {
        Some(url) => run_client(url, &args),
        None => run_server(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("stunt: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run_client(url: &str, args: &Args) -> Result<(), StunError> {
    let mut config = ClientConfig::default();
    if let Some(software) = &args.software {
        config.software = Some(software.clone());
    }
    config.key = args.key.as_ref().map(|k| k.as_bytes().to_vec());

    let reply = client::request(url, config)?;

    if let Some((code, reason)) = reply.error {
        return Err(StunError::Parse(format!("server answered {code} {reason}")));
    }

    match reply.reflexive {
        Some(addr) => {
            println!("{addr}");
            Ok(())
        }
        None => Err(StunError::Parse("no mapped address in response".into())),
    }
}

fn run_server(args: &Args) -> Result<(), StunError> {
    let mut server = Server::bind(("0.0.0.0", args.port))?;
    if let Some(software) = &args.software {
        server
            .endpoint_mut()
            .set_software(Some(software.clone()));
    }
    info!("Listening on {}", server.local_addr()?);
    server.run()
}
