//! smbmux demo agent.
//!
//! Spins up a multi-channel manager over the simulated SMB server, opens a
//! few sessions, balances a request workload across their channels and
//! shuts down cleanly on completion or Ctrl-C.
//!
//! Usage:
//!   smbmux-agent --servers 3 --interfaces 3 --strategy least-connections
//!   smbmux-agent --config smbmux.toml --system-interfaces

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

// ---

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ---

use smbmux_core::{MultiChannelManager, SystemInterfaces};
use smbmux_domain::InterfaceSource;
use smbmux_link_sim::{SimConfig, SimConnector, SimInterfaces};

// ---

mod config;
mod workload;

use config::Config;

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---

    let cli = Config::parse();

    let no_color = std::env::var("EMACS").is_ok()
        || std::env::var("NO_COLOR").is_ok()
        || std::env::var("CARGO_TERM_COLOR").as_deref() == Ok("never")
        || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(!no_color)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "smbmux-agent starting");

    let cfg = cli.multi_channel()?;
    info!(
        max_channels = cfg.max_channels,
        strategy = %cfg.strategy,
        health_check_ms = cfg.health_check_interval_ms,
        "configuration loaded"
    );

    let interfaces: Arc<dyn InterfaceSource> = if cli.system_interfaces {
        Arc::new(SystemInterfaces)
    } else {
        Arc::new(SimInterfaces::usable(cli.interfaces))
    };
    let connector = Arc::new(SimConnector::new(SimConfig::smb311()));
    let manager = MultiChannelManager::new(cfg.clone(), connector, interfaces)?;

    // Simulated server i answers on 10.0.i.1, next to local NIC 10.0.i.2.
    let servers: Vec<IpAddr> = (0..cli.servers)
        .map(|i| IpAddr::V4(Ipv4Addr::new(10, 0, i, 1)))
        .collect();

    let mut session_ids = Vec::with_capacity(cli.sessions);
    for _ in 0..cli.sessions {
        let session_id = Uuid::new_v4().to_string();
        match manager.create_channels(&session_id, &servers).await {
            Ok(group) => {
                info!(session = %session_id, channels = group.len(), "session ready");
                session_ids.push(session_id);
            }
            Err(e) => warn!(session = %session_id, "session has no channels: {e}"),
        }
    }

    let run = async {
        let served = workload::drive_requests(Arc::clone(&manager), &session_ids, cli.requests).await;
        info!(served, "request workload finished");

        if let Some(session_id) = session_ids.first() {
            workload::exercise_failover(&manager, session_id).await;
        }
        manager.run_health_check().await;
        workload::exercise_handles(&cfg).await
    };

    tokio::select! {
        result = run => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("interrupted");
        }
    }

    for session_id in &session_ids {
        if let Some(group) = manager.group(session_id) {
            for channel in group.channels().iter() {
                info!(
                    session = %session_id,
                    %channel,
                    requests = channel.requests(),
                    error_rate = channel.error_rate(),
                    "channel summary"
                );
            }
        }
    }
    info!(stats = %manager.statistics(), "final statistics");

    manager.shutdown().await;
    info!("shut down");

    Ok(())
}
