mod config;
mod keys;
mod proxy;
mod rotation;

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use reqwest::Client;
use tracing_subscriber::EnvFilter;

use crate::config::ProxyConfig;
use crate::keys::KeyList;
use crate::proxy::{ProxyService, router as proxy_router};
use crate::rotation::MemoryRotationStore;

#[derive(Parser, Debug)]
#[command(name = "gemini-relay")]
#[command(
    about = "Rotating-key reverse proxy for the Google Generative Language API",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP proxy server
    Serve {
        /// Listen port (defaults to GEMINI_RELAY_PORT, then 8000)
        #[arg(long)]
        port: Option<u16>,
        /// Bind address (defaults to 127.0.0.1)
        #[arg(long)]
        bind: Option<IpAddr>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = real_main().await {
        eprintln!("{}", err.to_string().red());
        std::process::exit(1);
    }
}

async fn real_main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command.unwrap_or(Command::Serve {
        port: None,
        bind: None,
    }) {
        Command::Serve { port, bind } => {
            let cfg = ProxyConfig::from_env();
            let port = port.unwrap_or(cfg.port);
            let bind = bind.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
            run_server(cfg, SocketAddr::new(bind, port)).await
        }
    }
}

fn init_tracing() {
    // Default to info logs unless the user sets RUST_LOG.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

async fn run_server(cfg: ProxyConfig, addr: SocketAddr) -> anyhow::Result<()> {
    if cfg.master_key.is_some() {
        tracing::info!("proxy auth enabled (master key configured)");
    } else {
        tracing::info!("no GEMINI_RELAY_MASTER_KEY set, running in open mode");
    }
    match cfg.default_api_keys.as_deref().map(KeyList::parse) {
        Some(Some(list)) => {
            tracing::info!("default upstream key list configured ({} keys)", list.len());
        }
        Some(None) => {
            tracing::warn!(
                "GEMINI_RELAY_API_KEYS is set but contains no usable keys; \
requests without an x-google-api-key override will fail"
            );
        }
        None => {
            tracing::info!(
                "no default upstream keys; callers must supply x-google-api-key"
            );
        }
    }
    tracing::info!("forwarding to upstream {}", cfg.upstream_url);

    // Redirects surface to the caller instead of being followed; a 3xx from
    // upstream counts as a successful attempt.
    let client = Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;
    let rotation = Arc::new(MemoryRotationStore::default());
    let proxy = ProxyService::new(client, Arc::new(cfg), rotation);
    let app = proxy_router(proxy);

    let listener = bind_listener_or_explain(addr).await?;
    tracing::info!("gemini-relay listening on http://{}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await?;
    Ok(())
}

async fn bind_listener_or_explain(addr: SocketAddr) -> anyhow::Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(addr).await.map_err(|err| {
        let help = listener_bind_help(addr, &err);
        anyhow::Error::new(err).context(help)
    })
}

fn listener_bind_help(addr: SocketAddr, err: &std::io::Error) -> String {
    if err.kind() == ErrorKind::AddrInUse {
        format!(
            "port {} is already in use; pick another with `gemini-relay serve --port {}`",
            addr.port(),
            addr.port().saturating_add(1)
        )
    } else {
        format!("failed to bind {addr}")
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn bind_help_suggests_an_alternative_port_when_taken() {
        let addr: SocketAddr = "127.0.0.1:8000".parse().expect("addr");
        let err = std::io::Error::new(ErrorKind::AddrInUse, "in use");
        let msg = listener_bind_help(addr, &err);
        assert!(msg.contains("gemini-relay serve --port 8001"), "{msg}");
    }

    #[test]
    fn bind_help_names_the_address_for_other_errors() {
        let addr: SocketAddr = "127.0.0.1:8000".parse().expect("addr");
        let err = std::io::Error::new(ErrorKind::PermissionDenied, "denied");
        assert_eq!(listener_bind_help(addr, &err), "failed to bind 127.0.0.1:8000");
    }
}
