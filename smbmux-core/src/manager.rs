//! [`MultiChannelManager`]: materializes, balances, probes and tears down
//! the channels of every session.
//!
//! # Channel creation
//!
//! For a session and a list of server addresses the manager pairs the
//! i-th usable local interface with the i-th server address, up to
//! `max_channels` pairs. Each pair is connected on its own worker task;
//! results are collected in pair order so channel `i` is always
//! `"{session}-channel-{i}"`. A transport that does not negotiate SMB2+
//! with the multi-channel capability is disconnected and skipped.
//!
//! A group replaced or removed while its connects were in flight is not
//! handed back: its channels are disconnected and the call fails with
//! [`SmbError::Superseded`].
//!
//! # Failover
//!
//! [`MultiChannelManager::handle_channel_failure`] takes a failed channel
//! out of rotation and reconnects the same interface/server pair with
//! backoff. A successful reconnect swaps a fresh channel in under the same
//! id; once every attempt fails the channel is dropped from its group.
//!
//! # Health checking
//!
//! A background task probes every channel with an ECHO once per
//! interval. The task holds only a weak reference to the manager and
//! stops on shutdown or when the manager is dropped. A probe abandoned
//! mid-flight leaves the channel's health untouched.
//!
//! # Shutdown
//!
//! `shutdown` tears down every session, stops the health task and waits
//! up to `shutdown_timeout_ms` for outstanding worker tasks before
//! cancelling them. It is idempotent.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

// ---

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

// ---

use smbmux_domain::{
    // ---
    Capabilities,
    InterfaceSource,
    NetworkInterface,
    Result,
    SmbError,
    TransportConnector,
    TransportPtr,
};

// ---

use crate::channel::ChannelInfo;
use crate::channel_group::ChannelGroup;
use crate::config::MultiChannelConfig;
use crate::stats::ChannelStatistics;
use crate::worker::WorkerPool;

// ---------------------------------------------------------------------------
// MultiChannelManager
// ---------------------------------------------------------------------------

pub struct MultiChannelManager {
    // ---
    config: MultiChannelConfig,
    connector: Arc<dyn TransportConnector>,
    interfaces: Arc<dyn InterfaceSource>,

    /// Session id to its channel group.
    sessions: RwLock<HashMap<String, Arc<ChannelGroup>>>,

    total_requests: AtomicU64,
    total_channels_created: AtomicU64,

    workers: Arc<WorkerPool>,
    health_task: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    shut_down: AtomicBool,
}

// ---

impl MultiChannelManager {
    // ---
    /// Validate `config` and start the health-check task if enabled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: MultiChannelConfig,
        connector: Arc<dyn TransportConnector>,
        interfaces: Arc<dyn InterfaceSource>,
    ) -> Result<Arc<Self>> {
        // ---
        config.validate()?;

        let (shutdown_tx, _) = watch::channel(false);
        let manager = Arc::new(Self {
            config,
            connector,
            interfaces,
            sessions: RwLock::new(HashMap::new()),
            total_requests: AtomicU64::new(0),
            total_channels_created: AtomicU64::new(0),
            workers: WorkerPool::new(),
            health_task: Mutex::new(None),
            shutdown_tx,
            shut_down: AtomicBool::new(false),
        });

        if let Some(interval) = manager.config.health_check_interval() {
            let task = spawn_health_task(Arc::downgrade(&manager), interval, manager.shutdown_tx.subscribe());
            *manager.health_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        }

        tracing::info!(
            max_channels = manager.config.max_channels,
            strategy = %manager.config.strategy,
            health_check_ms = manager.config.health_check_interval_ms,
            "multi-channel manager started"
        );
        Ok(manager)
    }

    // ---

    pub fn config(&self) -> &MultiChannelConfig {
        &self.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn group(&self, session_id: &str) -> Option<Arc<ChannelGroup>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    fn groups(&self) -> Vec<Arc<ChannelGroup>> {
        // ---
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Remove `session_id`'s group, but only if it is still `expected`.
    fn unregister(&self, session_id: &str, expected: &Arc<ChannelGroup>) -> bool {
        // ---
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        match sessions.get(session_id) {
            Some(current) if Arc::ptr_eq(current, expected) => {
                sessions.remove(session_id);
                true
            }
            _ => false,
        }
    }

    /// Usable local interfaces, in enumeration order. Enumeration failure
    /// yields none.
    pub fn usable_interfaces(&self) -> Vec<NetworkInterface> {
        // ---
        match self.interfaces.interfaces() {
            Ok(all) => all.into_iter().filter(NetworkInterface::is_usable).collect(),
            Err(e) => {
                tracing::warn!("failed to enumerate network interfaces: {e}");
                Vec::new()
            }
        }
    }

    // ---

    /// Connect up to `max_channels` channels for `session_id` and register
    /// them as its group, replacing any previous group.
    pub async fn create_channels(
        &self,
        session_id: &str,
        server_addresses: &[IpAddr],
    ) -> Result<Arc<ChannelGroup>> {
        // ---
        if session_id.trim().is_empty() {
            return Err(SmbError::InvalidArgument("session id must not be empty".into()));
        }
        if self.is_shut_down() {
            return Err(SmbError::ShutDown);
        }

        let group = Arc::new(ChannelGroup::new(session_id));
        let previous = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string(), Arc::clone(&group));
        if let Some(previous) = previous {
            tracing::warn!(session = session_id, "replacing existing channel group");
            self.teardown(&previous).await;
        }

        let interfaces = self.usable_interfaces();
        let count = self
            .config
            .max_channels
            .min(server_addresses.len())
            .min(interfaces.len());
        tracing::debug!(
            session = session_id,
            count,
            interfaces = interfaces.len(),
            servers = server_addresses.len(),
            "creating channels"
        );

        let mut pending = Vec::with_capacity(count);
        for (i, (iface, &remote)) in interfaces.into_iter().zip(server_addresses).take(count).enumerate() {
            let Some(local) = iface.address_for(remote) else {
                tracing::warn!(session = session_id, interface = %iface.name, "interface has no address, skipping");
                continue;
            };

            let connector = Arc::clone(&self.connector);
            let remote_sock = SocketAddr::new(remote, self.config.port);
            let signing = self.config.signing_enforced;
            let task = self
                .workers
                .spawn(async move { connect_channel(connector, local, remote_sock, signing).await });
            pending.push((i, iface, local, remote, task));
        }

        for (i, iface, local, remote, task) in pending {
            let channel_id = format!("{session_id}-channel-{i}");
            match task.await {
                Ok(Some(Ok(transport))) => {
                    let channel = ChannelInfo::new(channel_id, local, remote, iface, Some(transport));
                    tracing::debug!(session = session_id, %channel, "channel created");
                    group.add_channel(Arc::new(channel));
                    self.total_channels_created.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(session = session_id, channel = %channel_id, %local, %remote, "skipping channel: {e}");
                }
                Ok(None) => {
                    tracing::warn!(session = session_id, channel = %channel_id, "channel creation cancelled");
                }
                Err(e) => {
                    tracing::warn!(session = session_id, channel = %channel_id, "channel worker failed: {e}");
                }
            }
        }

        if self.is_shut_down() {
            if self.unregister(session_id, &group) {
                self.teardown(&group).await;
            }
            return Err(SmbError::ShutDown);
        }

        let still_registered = self
            .group(session_id)
            .is_some_and(|current| Arc::ptr_eq(&current, &group));
        if !still_registered {
            tracing::warn!(
                session = session_id,
                channels = group.len(),
                "channel group was replaced or removed while connecting, discarding it"
            );
            self.teardown(&group).await;
            return Err(SmbError::Superseded {
                session_id: session_id.to_string(),
            });
        }

        if group.is_empty() {
            self.unregister(session_id, &group);
            return Err(SmbError::NoChannels {
                session_id: session_id.to_string(),
            });
        }

        tracing::info!(session = session_id, channels = group.len(), "channels created");
        Ok(group)
    }

    // ---

    /// Pick a channel for one request and count it as active.
    ///
    /// The caller must hand it back with [`MultiChannelManager::release_channel`]
    /// (or use [`MultiChannelManager::acquire_channel`]).
    pub fn select_channel(&self, session_id: &str) -> Option<Arc<ChannelInfo>> {
        // ---
        if self.is_shut_down() {
            return None;
        }

        let Some(group) = self.group(session_id) else {
            tracing::warn!(session = session_id, "no channel group for session");
            return None;
        };

        let channel = group.select_channel_filtered(self.config.strategy, self.config.skip_unhealthy)?;
        let active = channel.increment_connections();
        channel.mark_request();
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(session = session_id, channel = channel.channel_id(), active, "channel selected");
        Some(channel)
    }

    pub fn release_channel(&self, channel: Option<&ChannelInfo>) {
        // ---
        if let Some(channel) = channel {
            let active = channel.decrement_connections();
            tracing::trace!(channel = channel.channel_id(), active, "channel released");
        }
    }

    /// [`MultiChannelManager::select_channel`] with the release tied to a guard.
    pub fn acquire_channel(&self, session_id: &str) -> Option<ChannelLease<'_>> {
        // ---
        self.select_channel(session_id).map(|channel| ChannelLease {
            manager: self,
            channel,
        })
    }

    // ---

    /// Tear down and forget `session_id`'s channels. Unknown sessions are a no-op.
    pub async fn remove_channels(&self, session_id: &str) {
        // ---
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);

        match removed {
            Some(group) => {
                self.teardown(&group).await;
                tracing::info!(session = session_id, "channels removed");
            }
            None => tracing::debug!(session = session_id, "no channels to remove"),
        }
    }

    /// Disconnect every channel in `group` concurrently. Failures are
    /// logged and do not stop the others.
    async fn teardown(&self, group: &ChannelGroup) {
        // ---
        let channels = group.channels();
        let pending: Vec<_> = channels
            .iter()
            .filter_map(|channel| Some((channel, self.spawn_disconnect(channel)?)))
            .collect();

        for (channel, task) in pending {
            await_disconnect(channel, task).await;
        }

        for channel in channels.iter() {
            group.remove_channel(channel.channel_id());
        }
    }

    /// Start a forced disconnect of `channel`'s transport on a worker.
    fn spawn_disconnect(&self, channel: &ChannelInfo) -> Option<JoinHandle<Option<Result<()>>>> {
        // ---
        let transport = channel.transport().cloned()?;
        Some(self.workers.spawn(async move { transport.disconnect(true).await }))
    }

    // ---

    /// Take a failed channel out of rotation and try to re-establish it.
    ///
    /// The channel is marked unhealthy and its transport disconnected.
    /// Its interface/server pair is then reconnected up to
    /// `failover_max_attempts` times, backing off between attempts. On
    /// success the returned channel has replaced the failed one in its
    /// group, under the same id. Otherwise the channel is removed and
    /// [`SmbError::ChannelLost`] returned; a session that loses its last
    /// channel is forgotten.
    pub async fn handle_channel_failure(
        &self,
        channel: &ChannelInfo,
        error: &SmbError,
    ) -> Result<Arc<ChannelInfo>> {
        // ---
        if self.is_shut_down() {
            return Err(SmbError::ShutDown);
        }

        let Some((group, failed)) = self
            .groups()
            .into_iter()
            .find_map(|group| group.find(channel).map(|member| (group, member)))
        else {
            return Err(SmbError::InvalidArgument(format!(
                "channel {} does not belong to any session",
                channel.channel_id()
            )));
        };

        if !failed.begin_recovery() {
            return Err(SmbError::RecoveryInProgress {
                channel_id: failed.channel_id().to_string(),
            });
        }

        tracing::warn!(session = group.session_id(), channel = failed.channel_id(), "channel failed: {error}");
        failed.mark_error();
        failed.set_healthy(false);

        let result = self.recover(&group, &failed).await;
        failed.end_recovery();
        result
    }

    async fn recover(
        &self,
        group: &Arc<ChannelGroup>,
        failed: &Arc<ChannelInfo>,
    ) -> Result<Arc<ChannelInfo>> {
        // ---
        let policy = self.config.failover_policy()?;
        if let Some(task) = self.spawn_disconnect(failed) {
            await_disconnect(failed, task).await;
        }

        let remote = SocketAddr::new(failed.remote_address(), self.config.port);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        for attempt in 1..=policy.max_attempts {
            let connector = Arc::clone(&self.connector);
            let local = failed.local_address();
            let signing = self.config.signing_enforced;
            let task = self
                .workers
                .spawn(async move { connect_channel(connector, local, remote, signing).await });

            match task.await {
                Ok(Some(Ok(transport))) => {
                    let replacement = Arc::new(ChannelInfo::new(
                        failed.channel_id(),
                        failed.local_address(),
                        failed.remote_address(),
                        failed.interface().clone(),
                        Some(transport),
                    ));
                    return self.install(group, failed, replacement, attempt).await;
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(
                        channel = failed.channel_id(),
                        attempt,
                        max_attempts = policy.max_attempts,
                        "reconnect failed: {e}"
                    );
                }
                Ok(None) => return Err(SmbError::ShutDown),
                Err(e) => tracing::warn!(channel = failed.channel_id(), attempt, "reconnect worker failed: {e}"),
            }

            if attempt < policy.max_attempts {
                tokio::select! {
                    _ = tokio::time::sleep(policy.delay(attempt)) => {}
                    _ = shutdown_rx.wait_for(|stop| *stop) => return Err(SmbError::ShutDown),
                }
            }
        }

        if group.find(failed).is_some() {
            group.remove_channel(failed.channel_id());
        }
        if group.is_empty() && self.unregister(group.session_id(), group) {
            tracing::warn!(session = group.session_id(), "session lost its last channel");
        }
        tracing::warn!(
            session = group.session_id(),
            channel = failed.channel_id(),
            remaining = group.len(),
            "channel removed after failed recovery"
        );
        Err(SmbError::ChannelLost {
            channel_id: failed.channel_id().to_string(),
        })
    }

    /// Swap `replacement` in for `failed`, unless the group was torn down
    /// while reconnecting, in which case the new transport is closed again.
    async fn install(
        &self,
        group: &Arc<ChannelGroup>,
        failed: &Arc<ChannelInfo>,
        replacement: Arc<ChannelInfo>,
        attempt: u32,
    ) -> Result<Arc<ChannelInfo>> {
        // ---
        let replaced = group.replace_channel(failed, Arc::clone(&replacement));
        let registered = self
            .group(group.session_id())
            .is_some_and(|current| Arc::ptr_eq(&current, group));

        if !replaced || !registered || self.is_shut_down() {
            group.remove_channel(replacement.channel_id());
            if let Some(task) = self.spawn_disconnect(&replacement) {
                await_disconnect(&replacement, task).await;
            }
            if self.is_shut_down() {
                return Err(SmbError::ShutDown);
            }
            return Err(SmbError::ChannelLost {
                channel_id: failed.channel_id().to_string(),
            });
        }

        self.total_channels_created.fetch_add(1, Ordering::Relaxed);
        tracing::info!(session = group.session_id(), channel = %replacement, attempt, "channel recovered");
        Ok(replacement)
    }

    // ---

    /// One health-check pass over every channel of every session.
    pub async fn run_health_check(&self) {
        // ---
        let timeout = self.config.health_probe_timeout();
        for group in self.groups() {
            for channel in group.channels().iter() {
                let healthy = probe(channel, timeout).await;
                channel.set_healthy(healthy);
            }
        }
    }

    // ---

    pub fn statistics(&self) -> ChannelStatistics {
        // ---
        let groups = self.groups();
        let (total_channels, healthy_channels) = groups
            .iter()
            .map(|g| (g.len(), g.healthy_count()))
            .fold((0, 0), |(t, h), (gt, gh)| (t + gt, h + gh));

        ChannelStatistics {
            active_sessions: groups.len(),
            total_channels,
            healthy_channels,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_channels_created: self.total_channels_created.load(Ordering::Relaxed),
        }
    }

    // ---

    /// Tear everything down. Safe to call more than once.
    pub async fn shutdown(&self) {
        // ---
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("shutting down multi-channel manager");

        let session_ids: Vec<String> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        for session_id in &session_ids {
            self.remove_channels(session_id).await;
        }

        self.shutdown_tx.send_replace(true);
        let timeout = self.config.shutdown_timeout();

        let health_task = self.health_task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut task) = health_task {
            if tokio::time::timeout(timeout, &mut task).await.is_err() {
                tracing::warn!("health-check task did not stop in time, aborting");
                task.abort();
            }
        }

        if !self.workers.drain(timeout).await {
            tracing::warn!(outstanding = self.workers.active(), "worker tasks did not finish in time, cancelling");
            self.workers.cancel();
        }

        tracing::info!(sessions = session_ids.len(), "multi-channel manager shut down");
    }
}

// ---

impl Drop for MultiChannelManager {
    fn drop(&mut self) {
        // ---
        self.shutdown_tx.send_replace(true);
        if let Some(task) = self.health_task.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
    }
}

// ---

/// Connect one channel and make sure the server can actually do
/// multi-channel on it.
async fn connect_channel(
    connector: Arc<dyn TransportConnector>,
    local: IpAddr,
    remote: SocketAddr,
    signing_enforced: bool,
) -> Result<TransportPtr> {
    // ---
    let transport = connector.connect(local, remote, signing_enforced).await?;

    let reason = if !transport.is_smb2_or_later() {
        Some(format!("{remote} negotiated {}, SMB2 or later required", transport.dialect()))
    } else if !transport.has_capability(Capabilities::MULTI_CHANNEL) {
        Some(format!("{remote} does not advertise multi-channel"))
    } else {
        None
    };

    if let Some(reason) = reason {
        if let Err(e) = transport.disconnect(true).await {
            tracing::debug!(%remote, "disconnect of rejected transport failed: {e}");
        }
        return Err(SmbError::ChannelRejected(reason));
    }

    Ok(transport)
}

// ---

async fn await_disconnect(channel: &ChannelInfo, task: JoinHandle<Option<Result<()>>>) {
    // ---
    match task.await {
        Ok(Some(Ok(()))) => tracing::debug!(channel = channel.channel_id(), "channel disconnected"),
        Ok(Some(Err(e))) => tracing::warn!(channel = channel.channel_id(), "error closing channel: {e}"),
        Ok(None) => tracing::warn!(channel = channel.channel_id(), "channel disconnect cancelled"),
        Err(e) => tracing::warn!(channel = channel.channel_id(), "disconnect worker failed: {e}"),
    }
}

// ---

/// Liveness of one channel: no transport, a failed echo or a timeout all
/// count as unhealthy.
async fn probe(channel: &ChannelInfo, timeout: Duration) -> bool {
    // ---
    let Some(transport) = channel.transport() else {
        return false;
    };

    match tokio::time::timeout(timeout, transport.echo()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(channel = channel.channel_id(), "health probe failed: {e}");
            false
        }
        Err(_) => {
            tracing::debug!(channel = channel.channel_id(), "health probe timed out");
            false
        }
    }
}

// ---

/// Probe every channel once per `interval` until shutdown or until the
/// manager is gone.
fn spawn_health_task(
    manager: Weak<MultiChannelManager>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    // ---
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.wait_for(|stop| *stop) => break,
            }

            let Some(manager) = manager.upgrade() else {
                break;
            };

            tokio::select! {
                _ = manager.run_health_check() => {}
                _ = shutdown_rx.wait_for(|stop| *stop) => break,
            }
        }
        tracing::debug!("health-check task stopped");
    })
}

// ---------------------------------------------------------------------------
// ChannelLease
// ---------------------------------------------------------------------------

/// A selected channel that is released when the lease drops.
pub struct ChannelLease<'a> {
    // ---
    manager: &'a MultiChannelManager,
    channel: Arc<ChannelInfo>,
}

// ---

impl ChannelLease<'_> {
    // ---
    pub fn channel(&self) -> &Arc<ChannelInfo> {
        &self.channel
    }
}

impl Deref for ChannelLease<'_> {
    type Target = ChannelInfo;

    fn deref(&self) -> &ChannelInfo {
        &self.channel
    }
}

impl Drop for ChannelLease<'_> {
    fn drop(&mut self) {
        self.manager.release_channel(Some(self.channel.as_ref()));
    }
}
