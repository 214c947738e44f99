//! wc CLI tools: pairing URIs, wallet and dapp sessions against a bridge.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};
use wc_core::{FullyQualifiedConfig, MethodCall, PeerMetadata, SessionConfig};
use wc_session::{
    FileSessionStore, JsonPayloadCodec, MemorySessionStore, Session, SessionCallback,
    SessionStatus, SessionStore, WsTransportBuilder,
};

/// Error code used when the wallet declines a request (EIP-1193 "user rejected").
const USER_REJECTED: i64 = 4001;

/// How long to wait for the bridge socket to flush after the session closes.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "wc")]
#[command(about = "wc session tools")]
struct Args {
    /// Persist sessions in this JSON file instead of memory
    #[arg(long, global = true, env = "WC_STORE")]
    store: Option<PathBuf>,

    /// Name announced to the peer
    #[arg(long, global = true, env = "WC_NAME", default_value = "wc")]
    name: String,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, env = "WC_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a fresh pairing URI
    New {
        /// Bridge URL
        #[arg(short, long, env = "WC_BRIDGE")]
        bridge: String,
    },

    /// Show the fields of a pairing URI
    Inspect {
        uri: String,

        /// Print the key instead of redacting it
        #[arg(long)]
        show_key: bool,
    },

    /// Join a session as the wallet and approve it
    Wallet {
        uri: String,

        /// Account to approve (repeatable)
        #[arg(short, long = "account", required = true)]
        accounts: Vec<String>,

        #[arg(short, long, default_value_t = 1)]
        chain_id: i64,
    },

    /// Offer a session as the dapp and wait for approval
    Dapp {
        /// Bridge URL
        #[arg(short, long, env = "WC_BRIDGE")]
        bridge: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    wc_common::init_tracing_with_default(&args.log_level);

    match args.command {
        Command::New { bridge } => {
            println!("{}", FullyQualifiedConfig::generate(bridge).to_uri());
        }
        Command::Inspect { uri, show_key } => {
            let config = SessionConfig::from_uri(&uri).context("Invalid pairing URI")?;
            println!("protocol: {}", config.protocol);
            println!("topic:    {}", config.handshake_topic);
            println!("version:  {}", config.version);
            println!("bridge:   {}", config.bridge.as_deref().unwrap_or("-"));
            let key = match &config.key {
                Some(key) if show_key => key.to_hex(),
                Some(_) => "<redacted>".to_string(),
                None => "-".to_string(),
            };
            println!("key:      {}", key);
        }
        Command::Wallet {
            uri,
            accounts,
            chain_id,
        } => {
            let config = FullyQualifiedConfig::from_uri(&uri).context("Invalid pairing URI")?;
            let store = open_store(args.store.as_ref())?;
            run_wallet(config, store, &args.name, accounts, chain_id).await?;
        }
        Command::Dapp { bridge } => {
            let store = open_store(args.store.as_ref())?;
            run_dapp(FullyQualifiedConfig::generate(bridge), store, &args.name).await?;
        }
        Command::Version => {
            println!("wc {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn open_store(path: Option<&PathBuf>) -> Result<Arc<dyn SessionStore>> {
    Ok(match path {
        Some(path) => Arc::new(
            FileSessionStore::open(path)
                .with_context(|| format!("Failed to open session store {}", path.display()))?,
        ),
        None => Arc::new(MemorySessionStore::new()),
    })
}

#[derive(Debug)]
enum Event {
    Status(SessionStatus),
    Call(MethodCall),
}

/// Forwards observer callbacks to the command loop.
struct Forward(mpsc::UnboundedSender<Event>);

impl SessionCallback for Forward {
    fn on_status(&self, status: &SessionStatus) {
        let _ = self.0.send(Event::Status(status.clone()));
    }

    fn on_method_call(&self, call: &MethodCall) {
        let _ = self.0.send(Event::Call(call.clone()));
    }
}

fn start_session(
    config: FullyQualifiedConfig,
    store: Arc<dyn SessionStore>,
    name: &str,
) -> Result<(Session, mpsc::UnboundedReceiver<Event>)> {
    let session = Session::new(
        config,
        Arc::new(JsonPayloadCodec),
        store,
        &WsTransportBuilder,
        PeerMetadata::named(name),
        None,
    )
    .context("Failed to create session")?;
    let (tx, rx) = mpsc::unbounded_channel();
    session.add_callback(Arc::new(Forward(tx)));
    Ok((session, rx))
}

async fn run_wallet(
    config: FullyQualifiedConfig,
    store: Arc<dyn SessionStore>,
    name: &str,
    accounts: Vec<String>,
    chain_id: i64,
) -> Result<()> {
    let (session, mut events) = start_session(config, store, name)?;
    session.init()?;
    info!("Waiting for session request on {}", session.config().handshake_topic);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    Event::Call(MethodCall::SessionRequest { peer, .. }) => {
                        let peer_name = peer.metadata.and_then(|m| m.name).unwrap_or_default();
                        info!("Session request from {} ({})", peer.id, peer_name);
                        session.approve(accounts.clone(), chain_id)?;
                    }
                    Event::Call(MethodCall::SessionUpdate { params, .. }) => {
                        info!("Peer updated session: approved={}", params.approved);
                    }
                    Event::Call(MethodCall::ExchangeKey { .. }) => info!("Peer rotated the key"),
                    Event::Call(call) => {
                        info!("Rejecting request {} ({})", call.id(), call.method().unwrap_or("-"));
                        if let Err(err) = session.reject_request(call.id(), USER_REJECTED, "No signer available") {
                            warn!("Failed to reject request {}: {}", call.id(), err);
                        }
                    }
                    Event::Status(SessionStatus::Closed) => {
                        wait_for_disconnect(&mut events).await;
                        break;
                    }
                    Event::Status(status) => log_status(&status),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing session");
                session.kill()?;
                wait_for_disconnect(&mut events).await;
                break;
            }
        }
    }

    info!("Session closed");
    Ok(())
}

async fn run_dapp(
    config: FullyQualifiedConfig,
    store: Arc<dyn SessionStore>,
    name: &str,
) -> Result<()> {
    println!("{}", config.to_uri());
    let (session, mut events) = start_session(config, store, name)?;
    session.offer()?;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    Event::Status(SessionStatus::Approved) => {
                        info!(
                            "Session approved: accounts={:?} chain={:?}",
                            session.approved_accounts().unwrap_or_default(),
                            session.chain_id()
                        );
                    }
                    Event::Status(SessionStatus::Closed) => {
                        wait_for_disconnect(&mut events).await;
                        break;
                    }
                    Event::Status(status) => log_status(&status),
                    Event::Call(call) => {
                        info!("Peer call {} ({})", call.id(), call.method().unwrap_or("-"));
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing session");
                session.kill()?;
                wait_for_disconnect(&mut events).await;
                break;
            }
        }
    }

    info!("Session closed");
    Ok(())
}

/// Closing a session queues the final update behind anything else pending.
/// The socket reports `Disconnected` once that queue is written out.
async fn wait_for_disconnect(events: &mut mpsc::UnboundedReceiver<Event>) {
    let flushed = tokio::time::timeout(FLUSH_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            if matches!(event, Event::Status(SessionStatus::Disconnected)) {
                return;
            }
        }
    })
    .await;
    if flushed.is_err() {
        warn!("Bridge socket did not close within {:?}", FLUSH_TIMEOUT);
    }
}

fn log_status(status: &SessionStatus) {
    match status {
        SessionStatus::Error(err) => warn!("Session error: {}", err),
        other => info!("Session status: {:?}", other),
    }
}
