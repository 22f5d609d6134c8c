//! End-to-end channel lifecycle against the simulated server.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

// ---

use smbmux_core::{ChannelInfo, MultiChannelConfig, MultiChannelManager};
use smbmux_domain::{LoadBalancingStrategy, SmbError, SmbTransport};
use smbmux_link_sim::{nic, SimConfig, SimConnector, SimInterfaces};

// ---

fn server(i: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, i, 1))
}

fn servers(n: u8) -> Vec<IpAddr> {
    (0..n).map(server).collect()
}

fn config(strategy: LoadBalancingStrategy) -> MultiChannelConfig {
    // ---
    MultiChannelConfig {
        strategy,
        health_check_interval_ms: 0,
        ..Default::default()
    }
}

fn manager(
    cfg: MultiChannelConfig,
    sim: SimConfig,
    interfaces: SimInterfaces,
) -> (Arc<MultiChannelManager>, Arc<SimConnector>) {
    // ---
    let connector = Arc::new(SimConnector::new(sim));
    let mgr = MultiChannelManager::new(cfg, connector.clone(), Arc::new(interfaces)).unwrap();
    (mgr, connector)
}

// ---------------------------------------------------------------------------
// creation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn three_interfaces_three_servers_yield_three_channels() {
    // ---
    let (mgr, _) = manager(
        config(LoadBalancingStrategy::LeastConnections),
        SimConfig::smb311(),
        SimInterfaces::usable(3),
    );

    let group = mgr.create_channels("S1", &servers(3)).await.unwrap();
    assert_eq!(group.len(), 3);

    let chans = group.channels();
    let ids: Vec<_> = chans.iter().map(|c| c.channel_id()).collect();
    assert_eq!(ids, ["S1-channel-0", "S1-channel-1", "S1-channel-2"]);

    chans[0].increment_connections();
    chans[0].increment_connections();
    chans[1].increment_connections();

    let picked = mgr.select_channel("S1").unwrap();
    assert_eq!(picked.channel_id(), "S1-channel-2");
    assert_eq!(picked.active_connections(), 1, "selection counts the request");
}

#[tokio::test]
async fn channel_count_is_the_minimum_of_limit_servers_and_interfaces() {
    // ---
    let cfg = MultiChannelConfig {
        max_channels: 2,
        ..config(LoadBalancingStrategy::RoundRobin)
    };
    let (mgr, connector) = manager(cfg, SimConfig::smb311(), SimInterfaces::usable(4));
    assert_eq!(mgr.create_channels("capped", &servers(4)).await.unwrap().len(), 2);
    assert_eq!(connector.connect_attempts(), 2);

    let (mgr, _) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311(),
        SimInterfaces::usable(4),
    );
    assert_eq!(mgr.create_channels("few-servers", &servers(1)).await.unwrap().len(), 1);

    let (mgr, _) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311(),
        SimInterfaces::usable(2),
    );
    assert_eq!(mgr.create_channels("few-nics", &servers(4)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn channels_bind_the_paired_interface_and_port() {
    // ---
    let (mgr, connector) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311(),
        SimInterfaces::usable(2),
    );
    let group = mgr.create_channels("bind", &servers(2)).await.unwrap();

    for (i, ch) in group.channels().iter().enumerate() {
        assert_eq!(ch.interface().name, format!("eth{i}"));
        assert_eq!(ch.local_address(), IpAddr::V4(Ipv4Addr::new(10, 0, i as u8, 2)));
        assert_eq!(ch.remote_address(), server(i as u8));
    }
    for t in connector.transports() {
        assert_eq!(t.remote_address().port(), 445);
    }
}

#[tokio::test]
async fn refused_server_is_skipped_and_the_rest_survive() {
    // ---
    let (mgr, _) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311().refuse(server(1)),
        SimInterfaces::usable(3),
    );

    let group = mgr.create_channels("partial", &servers(3)).await.unwrap();
    let ids: Vec<_> = group.channels().iter().map(|c| c.channel_id().to_string()).collect();
    assert_eq!(ids, ["partial-channel-0", "partial-channel-2"]);
}

#[tokio::test]
async fn zero_channels_is_an_error_and_leaves_no_group() {
    // ---
    let (mgr, _) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311(),
        SimInterfaces::usable(0),
    );
    let err = mgr.create_channels("none", &servers(3)).await.err().unwrap();
    assert!(matches!(err, SmbError::NoChannels { ref session_id } if session_id == "none"));
    assert!(mgr.group("none").is_none());
    assert!(mgr.select_channel("none").is_none());

    let (mgr, _) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311(),
        SimInterfaces::failing(),
    );
    assert!(mgr.create_channels("denied", &servers(3)).await.is_err());
    assert!(mgr.group("denied").is_none());

    let (mgr, _) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311(),
        SimInterfaces::usable(3),
    );
    assert!(mgr.create_channels("no-servers", &[]).await.is_err());
    assert_eq!(mgr.statistics().active_sessions, 0);
}

#[tokio::test]
async fn servers_without_multi_channel_are_rejected_and_disconnected() {
    // ---
    for sim in [SimConfig::smb21(), SimConfig::smb1()] {
        let (mgr, connector) = manager(
            config(LoadBalancingStrategy::RoundRobin),
            sim,
            SimInterfaces::usable(2),
        );

        assert!(mgr.create_channels("legacy", &servers(2)).await.is_err());
        assert_eq!(connector.transports().len(), 2);
        assert!(
            connector.transports().iter().all(|t| t.is_disconnected()),
            "rejected transports must not be leaked"
        );
    }
}

#[tokio::test]
async fn empty_session_id_is_rejected() {
    // ---
    let (mgr, _) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311(),
        SimInterfaces::usable(1),
    );
    assert!(matches!(
        mgr.create_channels("  ", &servers(1)).await,
        Err(SmbError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn recreating_a_session_replaces_and_tears_down_the_old_group() {
    // ---
    let (mgr, connector) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311(),
        SimInterfaces::usable(2),
    );

    let old = mgr.create_channels("S", &servers(2)).await.unwrap();
    let first_transports = connector.transports();
    let new = mgr.create_channels("S", &servers(2)).await.unwrap();

    assert!(!Arc::ptr_eq(&old, &new));
    assert!(old.is_empty());
    assert!(first_transports.iter().all(|t| t.is_disconnected()));
    assert_eq!(mgr.statistics().total_channels, 2);
    assert_eq!(mgr.statistics().total_channels_created, 4);
}

#[tokio::test(start_paused = true)]
async fn overlapping_creates_leave_only_the_newest_group_connected() {
    // ---
    let (mgr, connector) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311().with_connect_latency(Duration::from_millis(100)),
        SimInterfaces::usable(2),
    );

    let first = {
        let mgr = Arc::clone(&mgr);
        tokio::spawn(async move { mgr.create_channels("S", &servers(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = mgr.create_channels("S", &servers(2)).await.unwrap();
    let first = first.await.unwrap();

    assert!(matches!(first, Err(SmbError::Superseded { ref session_id }) if session_id == "S"));
    assert!(Arc::ptr_eq(&mgr.group("S").unwrap(), &second));
    assert_eq!(second.len(), 2);

    // The first create connected before the second one; its transports
    // must not outlive the call.
    let transports = connector.transports();
    assert_eq!(transports.len(), 4);
    assert!(transports[..2].iter().all(|t| t.is_disconnected()));
    assert!(transports[2..].iter().all(|t| !t.is_disconnected()));
    assert_eq!(mgr.statistics().total_channels, 2);
}

#[tokio::test(start_paused = true)]
async fn removing_a_session_mid_create_disconnects_its_channels() {
    // ---
    let (mgr, connector) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311().with_connect_latency(Duration::from_millis(100)),
        SimInterfaces::usable(2),
    );

    let creating = {
        let mgr = Arc::clone(&mgr);
        tokio::spawn(async move { mgr.create_channels("R", &servers(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    mgr.remove_channels("R").await;

    let result = creating.await.unwrap();
    assert!(matches!(result, Err(SmbError::Superseded { .. })));
    assert!(mgr.group("R").is_none());
    assert_eq!(connector.transports().len(), 2);
    assert!(connector.transports().iter().all(|t| t.is_disconnected()));
}

// ---------------------------------------------------------------------------
// selection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn round_robin_visits_each_channel_k_times() {
    // ---
    let (mgr, _) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311(),
        SimInterfaces::usable(3),
    );
    let group = mgr.create_channels("rr", &servers(3)).await.unwrap();

    let k = 5;
    for _ in 0..k * group.len() {
        let ch = mgr.select_channel("rr").unwrap();
        mgr.release_channel(Some(&ch));
    }

    for ch in group.channels().iter() {
        assert_eq!(ch.requests(), k as u64, "{} visited unevenly", ch.channel_id());
        assert_eq!(ch.active_connections(), 0);
    }
    assert_eq!(mgr.statistics().total_requests, 15);
}

#[tokio::test]
async fn least_connections_always_picks_a_minimum() {
    // ---
    let (mgr, _) = manager(
        config(LoadBalancingStrategy::LeastConnections),
        SimConfig::smb311(),
        SimInterfaces::usable(4),
    );
    let group = mgr.create_channels("lc", &servers(4)).await.unwrap();

    let mut held = Vec::new();
    for round in 0..40 {
        let min = group.channels().iter().map(|c| c.active_connections()).min().unwrap();
        let ch = mgr.select_channel("lc").unwrap();
        assert_eq!(ch.active_connections(), min + 1, "round {round} picked a busier channel");

        // Release every third selection to keep the load uneven.
        if round % 3 == 0 {
            mgr.release_channel(Some(&ch));
        } else {
            held.push(ch);
        }
    }
}

#[tokio::test]
async fn lease_releases_on_drop() {
    // ---
    let (mgr, _) = manager(
        config(LoadBalancingStrategy::FailoverOnly),
        SimConfig::smb311(),
        SimInterfaces::usable(2),
    );
    mgr.create_channels("lease", &servers(2)).await.unwrap();

    {
        let lease = mgr.acquire_channel("lease").unwrap();
        assert_eq!(lease.channel_id(), "lease-channel-0");
        assert_eq!(lease.active_connections(), 1);
    }

    let primary = mgr.group("lease").unwrap().primary().unwrap();
    assert_eq!(primary.active_connections(), 0);
}

#[tokio::test]
async fn release_of_nothing_is_a_no_op() {
    // ---
    let (mgr, _) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311(),
        SimInterfaces::usable(1),
    );
    mgr.release_channel(None);
    assert!(mgr.select_channel("unknown").is_none());
}

// ---------------------------------------------------------------------------
// teardown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remove_channels_disconnects_everything_despite_a_failure() {
    // ---
    let (mgr, connector) = manager(
        config(LoadBalancingStrategy::LeastConnections),
        SimConfig::smb311().fail_disconnect(server(1)),
        SimInterfaces::usable(3),
    );
    mgr.create_channels("S1", &servers(3)).await.unwrap();

    mgr.remove_channels("S1").await;

    let transports = connector.transports();
    assert_eq!(transports.len(), 3);
    assert!(transports.iter().all(|t| t.is_disconnected()));
    assert!(transports.iter().all(|t| t.disconnect_calls() == 1));
    assert!(mgr.select_channel("S1").is_none());
    assert!(mgr.group("S1").is_none());

    // Unknown or already removed sessions are fine.
    mgr.remove_channels("S1").await;
}

#[tokio::test]
async fn shutdown_is_idempotent_and_closes_every_session() {
    // ---
    let (mgr, connector) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311(),
        SimInterfaces::usable(2),
    );
    mgr.create_channels("a", &servers(2)).await.unwrap();
    mgr.create_channels("b", &servers(1)).await.unwrap();

    mgr.shutdown().await;
    mgr.shutdown().await;

    assert!(mgr.is_shut_down());
    assert!(connector.transports().iter().all(|t| t.disconnect_calls() == 1));
    assert_eq!(mgr.statistics().active_sessions, 0);
    assert!(mgr.select_channel("a").is_none());
    assert!(matches!(
        mgr.create_channels("c", &servers(1)).await,
        Err(SmbError::ShutDown)
    ));
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_a_stuck_connect_after_its_deadline() {
    // ---
    let cfg = MultiChannelConfig {
        shutdown_timeout_ms: 100,
        ..config(LoadBalancingStrategy::RoundRobin)
    };
    let (mgr, _) = manager(
        cfg,
        SimConfig::smb311().with_connect_latency(Duration::from_secs(3600)),
        SimInterfaces::usable(2),
    );

    let creating = {
        let mgr = Arc::clone(&mgr);
        tokio::spawn(async move { mgr.create_channels("slow", &servers(2)).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    mgr.shutdown().await;

    let result = creating.await.unwrap();
    assert!(matches!(result, Err(SmbError::ShutDown)));
    assert!(mgr.group("slow").is_none());
}

// ---------------------------------------------------------------------------
// health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_marks_only_the_transportless_channel_unhealthy() {
    // ---
    let (mgr, _) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311(),
        SimInterfaces::usable(2),
    );
    let group = mgr.create_channels("S1", &servers(2)).await.unwrap();

    let local = IpAddr::V4(Ipv4Addr::new(10, 0, 2, 2));
    group.add_channel(Arc::new(ChannelInfo::new(
        "S1-channel-2",
        local,
        server(2),
        nic("eth2", local),
        None,
    )));
    assert!(group.channels().iter().all(|c| c.is_healthy()));

    mgr.run_health_check().await;

    let chans = group.channels();
    assert!(chans[0].is_healthy());
    assert!(chans[1].is_healthy());
    assert!(!chans[2].is_healthy());
    assert!(chans.iter().all(|c| c.last_health_check().is_some()));
}

#[tokio::test]
async fn unreachable_channel_is_skipped_until_it_recovers() {
    // ---
    let (mgr, connector) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311(),
        SimInterfaces::usable(2),
    );
    mgr.create_channels("flaky", &servers(2)).await.unwrap();
    let flaky = connector.transport_to(server(0)).unwrap();

    flaky.set_reachable(false);
    mgr.run_health_check().await;
    assert_eq!(mgr.statistics().healthy_channels, 1);

    for _ in 0..4 {
        let ch = mgr.select_channel("flaky").unwrap();
        assert_eq!(ch.channel_id(), "flaky-channel-1");
        mgr.release_channel(Some(&ch));
    }

    flaky.set_reachable(true);
    mgr.run_health_check().await;
    assert_eq!(mgr.statistics().healthy_channels, 2);
}

#[tokio::test(start_paused = true)]
async fn slow_probe_counts_as_failure() {
    // ---
    let cfg = MultiChannelConfig {
        health_probe_timeout_ms: 50,
        ..config(LoadBalancingStrategy::RoundRobin)
    };
    let (mgr, _) = manager(
        cfg,
        SimConfig::smb311().with_echo_latency(Duration::from_secs(1)),
        SimInterfaces::usable(1),
    );
    let group = mgr.create_channels("slow", &servers(1)).await.unwrap();

    mgr.run_health_check().await;
    assert!(!group.channels()[0].is_healthy());
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_a_health_check_leaves_health_untouched() {
    // ---
    let cfg = MultiChannelConfig {
        health_check_interval_ms: 100,
        health_probe_timeout_ms: 60_000,
        ..config(LoadBalancingStrategy::RoundRobin)
    };
    let (mgr, connector) = manager(
        cfg,
        SimConfig::smb311().with_echo_latency(Duration::from_secs(10)),
        SimInterfaces::usable(1),
    );
    let group = mgr.create_channels("mid", &servers(1)).await.unwrap();
    let channel = Arc::clone(&group.channels()[0]);
    let transport = connector.transport_to(server(0)).unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(transport.echo_calls(), 1, "echo is in flight");

    mgr.shutdown().await;
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert!(channel.is_healthy());
    assert!(channel.last_health_check().is_none(), "abandoned check recorded a verdict");
    assert_eq!(transport.echo_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn background_task_probes_on_its_interval() {
    // ---
    let cfg = MultiChannelConfig {
        health_check_interval_ms: 1_000,
        ..config(LoadBalancingStrategy::RoundRobin)
    };
    let (mgr, connector) = manager(cfg, SimConfig::smb311(), SimInterfaces::usable(1));
    mgr.create_channels("bg", &servers(1)).await.unwrap();
    let transport = connector.transport_to(server(0)).unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(transport.echo_calls(), 0, "first probe waits a full interval");

    transport.set_reachable(false);
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(transport.echo_calls(), 1);
    assert_eq!(mgr.statistics().healthy_channels, 0);

    mgr.shutdown().await;
    let calls = transport.echo_calls();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.echo_calls(), calls, "no probes after shutdown");
}

// ---------------------------------------------------------------------------
// failover
// ---------------------------------------------------------------------------

fn reset() -> SmbError {
    SmbError::Transport("connection reset by peer".into())
}

#[tokio::test(start_paused = true)]
async fn failed_channel_is_reconnected_in_place() {
    // ---
    let (mgr, connector) = manager(
        config(LoadBalancingStrategy::FailoverOnly),
        SimConfig::smb311(),
        SimInterfaces::usable(2),
    );
    let group = mgr.create_channels("F", &servers(2)).await.unwrap();
    let failed = Arc::clone(&group.channels()[0]);
    let old_transport = connector.transport_to(server(0)).unwrap();

    let replacement = mgr.handle_channel_failure(&failed, &reset()).await.unwrap();

    assert!(old_transport.is_disconnected());
    assert!(!failed.is_healthy());
    assert_eq!(failed.errors(), 1);

    assert_eq!(replacement.channel_id(), "F-channel-0");
    assert_eq!(replacement.remote_address(), server(0));
    assert!(replacement.is_healthy());
    assert!(Arc::ptr_eq(&group.channels()[0], &replacement));
    assert!(Arc::ptr_eq(&group.primary().unwrap(), &replacement));
    assert!(!connector.transport_to(server(0)).unwrap().is_disconnected());

    assert_eq!(connector.connect_attempts(), 3);
    assert_eq!(mgr.statistics().total_channels_created, 3);
    assert_eq!(mgr.select_channel("F").unwrap().channel_id(), "F-channel-0");
}

#[tokio::test(start_paused = true)]
async fn reconnect_backs_off_between_refused_attempts() {
    // ---
    let (mgr, connector) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311(),
        SimInterfaces::usable(2),
    );
    let group = mgr.create_channels("B", &servers(2)).await.unwrap();
    let failed = Arc::clone(&group.channels()[1]);
    connector.refuse_next(server(1), 2);

    let t0 = tokio::time::Instant::now();
    let replacement = mgr.handle_channel_failure(&failed, &reset()).await.unwrap();

    // 1s after the first refusal, 2s after the second.
    assert!(t0.elapsed() >= Duration::from_millis(3_000));
    assert_eq!(connector.connect_attempts(), 2 + 3);
    assert!(Arc::ptr_eq(&group.channels()[1], &replacement));
    assert_eq!(group.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn channel_that_cannot_reconnect_is_removed() {
    // ---
    let cfg = MultiChannelConfig {
        failover_max_attempts: 2,
        ..config(LoadBalancingStrategy::FailoverOnly)
    };
    let (mgr, connector) = manager(cfg, SimConfig::smb311(), SimInterfaces::usable(2));
    let group = mgr.create_channels("L", &servers(2)).await.unwrap();
    let failed = Arc::clone(&group.channels()[0]);
    connector.refuse_next(server(0), usize::MAX);

    let err = mgr.handle_channel_failure(&failed, &reset()).await.unwrap_err();

    assert!(matches!(err, SmbError::ChannelLost { ref channel_id } if channel_id == "L-channel-0"));
    assert_eq!(connector.connect_attempts(), 2 + 2);
    assert!(connector.transport_to(server(0)).unwrap().is_disconnected());
    assert_eq!(group.len(), 1);
    assert_eq!(group.primary().unwrap().channel_id(), "L-channel-1");
    assert_eq!(mgr.select_channel("L").unwrap().channel_id(), "L-channel-1");
}

#[tokio::test(start_paused = true)]
async fn losing_the_last_channel_forgets_the_session() {
    // ---
    let cfg = MultiChannelConfig {
        failover_max_attempts: 1,
        ..config(LoadBalancingStrategy::RoundRobin)
    };
    let (mgr, connector) = manager(cfg, SimConfig::smb311(), SimInterfaces::usable(1));
    let group = mgr.create_channels("only", &servers(1)).await.unwrap();
    let failed = Arc::clone(&group.channels()[0]);
    connector.refuse_next(server(0), usize::MAX);

    assert!(matches!(
        mgr.handle_channel_failure(&failed, &reset()).await,
        Err(SmbError::ChannelLost { .. })
    ));
    assert!(mgr.group("only").is_none());
    assert_eq!(mgr.statistics().active_sessions, 0);

    assert!(matches!(
        mgr.handle_channel_failure(&failed, &reset()).await,
        Err(SmbError::InvalidArgument(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn a_second_failure_report_during_recovery_is_refused() {
    // ---
    let (mgr, _) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311().with_connect_latency(Duration::from_millis(100)),
        SimInterfaces::usable(1),
    );
    let group = mgr.create_channels("twice", &servers(1)).await.unwrap();
    let failed = Arc::clone(&group.channels()[0]);

    let first_err = reset();
    let (first, second) = tokio::join!(mgr.handle_channel_failure(&failed, &first_err), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        mgr.handle_channel_failure(&failed, &reset()).await
    });

    assert!(first.is_ok());
    assert!(matches!(second, Err(SmbError::RecoveryInProgress { .. })));
    assert_eq!(failed.errors(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_recovery_backoff() {
    // ---
    let (mgr, connector) = manager(
        config(LoadBalancingStrategy::RoundRobin),
        SimConfig::smb311(),
        SimInterfaces::usable(1),
    );
    let group = mgr.create_channels("down", &servers(1)).await.unwrap();
    let failed = Arc::clone(&group.channels()[0]);
    connector.refuse_next(server(0), usize::MAX);

    let recovering = {
        let mgr = Arc::clone(&mgr);
        tokio::spawn(async move { mgr.handle_channel_failure(&failed, &reset()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    mgr.shutdown().await;

    assert!(matches!(recovering.await.unwrap(), Err(SmbError::ShutDown)));
    assert_eq!(connector.connect_attempts(), 2, "no attempt after shutdown");
    assert!(mgr.group("down").is_none());
}
