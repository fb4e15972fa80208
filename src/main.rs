//! tcpproxy command line tool
//!
//! Parses flags, layers them over the config file and environment, and runs the relay
//! until Ctrl+C.

use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::process;

use tcpproxy::common::{init_logger, Result};
use tcpproxy::config::{log_config, CliOverrides, ProxyConfig};
use tcpproxy::tls::{get_cert_fingerprint, get_cert_subject};
use tcpproxy::{LogMode, ProxyServer, APP_NAME, VERSION};

/// Relay TCP connections to a fixed upstream, with optional TLS on either side
#[derive(Parser, Debug)]
#[clap(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Local address to listen on [default: :4444]
    #[clap(long)]
    lhost: Option<String>,

    /// Remote address to forward to [default: :80]
    #[clap(long)]
    rhost: Option<String>,

    /// Accept TLS from clients
    #[clap(long)]
    ltls: bool,

    /// Certificate file for --ltls
    #[clap(long)]
    lcert: Option<PathBuf>,

    /// Private key file for --ltls
    #[clap(long)]
    lkey: Option<PathBuf>,

    /// Connect to the remote with TLS. The remote certificate is verified unless
    /// --rtls-insecure is also given
    #[clap(long)]
    rtls: bool,

    /// Skip remote certificate verification. Unsafe, for testing self-signed upstreams only
    #[clap(long)]
    rtls_insecure: bool,

    /// CA file used to verify the remote certificate
    #[clap(long)]
    rtls_ca: Option<PathBuf>,

    /// Server name to send and verify [default: remote host]
    #[clap(long)]
    rtls_server_name: Option<String>,

    /// Traffic logging: none, plain (alias: string) or hex
    #[clap(long)]
    log: Option<String>,

    /// Write traffic to this file instead of stdout
    #[clap(long)]
    log_file: Option<PathBuf>,

    /// Diagnostic log level, overridden by RUST_LOG [default: info]
    #[clap(long)]
    log_level: Option<String>,

    /// Relay buffer size per direction, in bytes [default: 8192]
    #[clap(long)]
    buffer_size: Option<usize>,

    /// Seconds allowed for dialing the remote and its TLS handshake [default: 30]
    #[clap(long)]
    connect_timeout: Option<u64>,

    /// Close the whole session on the first end-of-stream instead of half-closing
    #[clap(long)]
    no_half_close: bool,

    /// JSON configuration file
    #[clap(long)]
    config_file: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> Result<CliOverrides> {
        let log_mode = match self.log {
            Some(ref mode) => Some(mode.parse::<LogMode>()?),
            None => None,
        };

        Ok(CliOverrides {
            listen: self.lhost.clone(),
            target: self.rhost.clone(),
            local_tls: self.ltls,
            cert: self.lcert.clone(),
            key: self.lkey.clone(),
            remote_tls: self.rtls,
            insecure_skip_verify: self.rtls_insecure,
            remote_ca_cert: self.rtls_ca.clone(),
            remote_server_name: self.rtls_server_name.clone(),
            log_mode,
            log_file: self.log_file.clone(),
            log_level: self.log_level.clone(),
            buffer_size: self.buffer_size,
            connect_timeout: self.connect_timeout,
            no_half_close: self.no_half_close,
        })
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = ProxyConfig::load(args.config_file.as_deref())?.apply_overrides(&args.overrides()?);

    init_logger(&config.log_level);
    info!("Starting {} v{}", APP_NAME, VERSION);

    config.validate()?;
    log_config(&config);

    if config.local_tls {
        if let Some(ref cert) = config.cert {
            match get_cert_subject(cert) {
                Ok(subject) => info!("Certificate subject: {}", subject),
                Err(e) => warn!("Unable to get certificate subject: {}", e),
            }
            match get_cert_fingerprint(cert) {
                Ok(fingerprint) => info!("Certificate fingerprint: {}", fingerprint),
                Err(e) => warn!("Unable to get certificate fingerprint: {}", e),
            }
        }
    }

    let server = ProxyServer::from_config(&config)?;
    println!("Proxying from {} to {}", server.listen_addr(), server.target_addr());

    let handle = server.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, closing listener");
    handle.stop().await;

    Ok(())
}
