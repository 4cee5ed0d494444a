use anyhow::Context;
use async_trait::async_trait;
use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use profile_sync::config::{SyncConfig, TimeoutPolicy};
use profile_sync::context::SyncContext;
use profile_sync::error::{SyncError, SyncResult};
use profile_sync::hub::client::{HubClient, RemoteSyncChannel};
use profile_sync::hub::server::Hub;
use profile_sync::node::handlers::{handle_get_session, handle_session_join, handle_session_leave};
use profile_sync::node::protocol::{
    ENDPOINT_SESSION, ENDPOINT_SESSION_JOIN, ENDPOINT_SESSION_LEAVE, JoinRequest,
};
use profile_sync::node::service::NodeService;
use profile_sync::profile::registry::ModuleRegistry;
use profile_sync::profile::types::{OwnerId, ProfileModule};
use profile_sync::router::coordinator::{SessionTransfer, SwitchCoordinator};
use profile_sync::router::handlers::handle_switch;
use profile_sync::router::protocol::ENDPOINT_SWITCH;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Hub,
    Node,
    Router,
}

struct Args {
    role: Role,
    bind: SocketAddr,
    udp: SocketAddr,
    hub: Option<String>,
    policy: Option<TimeoutPolicy>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 5 {
        eprintln!(
            "Usage: {} --role <hub|node|router> --bind <addr:port> [--udp <addr:port>] [--hub <addr:port>] [--policy <open|closed>]",
            args[0]
        );
        eprintln!("Example: {} --role hub --bind 127.0.0.1:7000 --udp 127.0.0.1:7100", args[0]);
        eprintln!(
            "Example: {} --role node --bind 127.0.0.1:6001 --udp 127.0.0.1:6101 --hub 127.0.0.1:7000",
            args[0]
        );
        eprintln!(
            "Example: {} --role router --bind 127.0.0.1:5000 --udp 127.0.0.1:5100 --hub 127.0.0.1:7000",
            args[0]
        );

        std::process::exit(1);
    }

    let args = parse_args(&args)?;
    let mut config = SyncConfig::from_env();
    if let Some(policy) = args.policy {
        config.timeout_policy = policy;
    }

    match args.role {
        Role::Hub => run_hub(args).await,
        Role::Node => run_node(args, config).await,
        Role::Router => run_router(args, config).await,
    }
}

fn parse_args(args: &[String]) -> anyhow::Result<Args> {
    let mut role: Option<Role> = None;
    let mut bind: Option<SocketAddr> = None;
    let mut udp: Option<SocketAddr> = None;
    let mut hub: Option<String> = None;
    let mut policy: Option<TimeoutPolicy> = None;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--role", Some(value)) => {
                role = Some(match value.as_str() {
                    "hub" => Role::Hub,
                    "node" => Role::Node,
                    "router" => Role::Router,
                    other => anyhow::bail!("unknown role '{}'", other),
                });
                i += 2;
            }
            ("--bind", Some(value)) => {
                bind = Some(value.parse().context("--bind")?);
                i += 2;
            }
            ("--udp", Some(value)) => {
                udp = Some(value.parse().context("--udp")?);
                i += 2;
            }
            ("--hub", Some(value)) => {
                hub = Some(value.clone());
                i += 2;
            }
            ("--policy", Some(value)) => {
                policy = Some(value.parse().map_err(|e: String| anyhow::anyhow!(e))?);
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    let role = role.context("--role is required")?;
    let bind = bind.context("--bind is required")?;
    // Datagram port defaults to the HTTP port + 100.
    let udp = udp.unwrap_or_else(|| SocketAddr::new(bind.ip(), bind.port().saturating_add(100)));

    if role != Role::Hub && hub.is_none() {
        anyhow::bail!("--hub is required for the {:?} role", role);
    }

    Ok(Args {
        role,
        bind,
        udp,
        hub,
        policy,
    })
}

async fn run_hub(args: Args) -> anyhow::Result<()> {
    let hub = Hub::new(args.udp).await?;
    hub.start_background();

    let app = hub.router();

    tracing::info!("Hub HTTP on {}, fan-out from {}", args.bind, hub.fanout.local_addr()?);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn connect_hub(args: &Args) -> anyhow::Result<(HubClient, Arc<RemoteSyncChannel>)> {
    let hub_addr = args.hub.as_deref().context("--hub is required")?;
    let client = HubClient::new(hub_addr);

    let channel = RemoteSyncChannel::bind(client.clone(), args.udp).await?;
    channel.start();

    tracing::info!("Using hub at {}", hub_addr);
    Ok((client, channel))
}

async fn run_node(args: Args, config: SyncConfig) -> anyhow::Result<()> {
    let (client, channel) = connect_hub(&args).await?;
    let client = Arc::new(client);

    let registry = ModuleRegistry::new();
    registry.register::<SessionStats>();

    let ctx = SyncContext::init(config, registry, client.clone(), client, channel);
    let service = NodeService::start(ctx).await?;

    let app = Router::new()
        .route(ENDPOINT_SESSION_JOIN, post(handle_session_join))
        .route(ENDPOINT_SESSION_LEAVE, post(handle_session_leave))
        .route(&format!("{}/:owner_id", ENDPOINT_SESSION), get(handle_get_session))
        .layer(Extension(service.clone()));

    // Periodic stats, also stamped into each active profile.
    let stats_service = service.clone();
    let node_name = args.bind.to_string();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let owners = match stats_service.node.active_owners().await {
                Ok(owners) => owners,
                Err(_) => break,
            };
            tracing::info!("Node {}: {} active session(s)", node_name, owners.len());
            for owner_id in owners {
                let node_name = node_name.clone();
                let stamped = stats_service
                    .node
                    .with_profile(&owner_id, move |profile| {
                        let mut stats = profile
                            .module::<SessionStats>(SessionStats::TAG)
                            .cloned()
                            .unwrap_or_default();
                        stats.last_node = node_name;
                        stats.heartbeats += 1;
                        profile.set_module(SessionStats::TAG, stats);
                    })
                    .await;
                // The session may have ended since the owner list was taken.
                if let Err(e) = stamped {
                    tracing::debug!("Skipped stats for {}: {}", owner_id, e);
                }
            }
        }
    });

    tracing::info!("Node HTTP listening on {}", args.bind);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let report = service.shutdown().await;
    report.into_result()?;

    Ok(())
}

async fn run_router(args: Args, config: SyncConfig) -> anyhow::Result<()> {
    let (_client, channel) = connect_hub(&args).await?;

    let transfer = Arc::new(HttpSessionTransfer {
        http_client: reqwest::Client::new(),
    });
    let coordinator = SwitchCoordinator::new(channel, transfer, &config);
    let _ack_listener = coordinator.start().await?;

    let app = Router::new()
        .route(ENDPOINT_SWITCH, post(handle_switch))
        .layer(Extension(coordinator));

    tracing::info!("Router HTTP listening on {}", args.bind);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

/// Hands the session to the target node by calling its join hook.
struct HttpSessionTransfer {
    http_client: reqwest::Client,
}

#[async_trait]
impl SessionTransfer for HttpSessionTransfer {
    async fn transfer(&self, owner_id: &OwnerId, target: &str) -> SyncResult<()> {
        let request = JoinRequest {
            owner_id: owner_id.to_string(),
            display_name: None,
        };

        let response = self
            .http_client
            .post(format!("http://{}{}", target, ENDPOINT_SESSION_JOIN))
            .json(&request)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| SyncError::transient("session transfer", e))?;

        if !response.status().is_success() {
            return Err(SyncError::transient(
                "session transfer",
                format!("target {} answered {}", target, response.status()),
            ));
        }

        Ok(())
    }
}

/// Per-session bookkeeping kept in every profile this binary serves.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SessionStats {
    last_node: String,
    heartbeats: u64,
}

impl ProfileModule for SessionStats {
    const TAG: &'static str = "session";
}
