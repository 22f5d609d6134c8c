use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// ---

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

// ---

use smbmux_domain::LoadBalancingStrategy;

// ---

use crate::channel::ChannelInfo;

// ---

/// Copy-on-write channel list. Readers take the `Arc` and iterate freely;
/// writers swap in a new vector.
type ChannelList = Arc<Vec<Arc<ChannelInfo>>>;

/// Floor on a channel's weighted-random weight, so a channel that has only
/// ever failed still gets the occasional request and can show recovery.
const MIN_WEIGHT: f64 = 0.05;

struct Members {
    // ---
    channels: ChannelList,

    /// First channel added; reassigned to the new first on removal.
    primary: Option<Arc<ChannelInfo>>,
}

// ---------------------------------------------------------------------------
// ChannelGroup
// ---------------------------------------------------------------------------

/// All channels of one session, plus the round-robin cursor.
pub struct ChannelGroup {
    // ---
    session_id: String,
    members: RwLock<Members>,
    cursor: AtomicUsize,
}

// ---

impl ChannelGroup {
    // ---
    pub fn new(session_id: impl Into<String>) -> Self {
        // ---
        Self {
            session_id: session_id.into(),
            members: RwLock::new(Members {
                channels: Arc::new(Vec::new()),
                primary: None,
            }),
            cursor: AtomicUsize::new(0),
        }
    }

    // ---

    fn read(&self) -> RwLockReadGuard<'_, Members> {
        self.members.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Members> {
        self.members.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> (ChannelList, Option<Arc<ChannelInfo>>) {
        // ---
        let members = self.read();
        (Arc::clone(&members.channels), members.primary.clone())
    }

    // ---

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn add_channel(&self, channel: Arc<ChannelInfo>) {
        // ---
        let mut members = self.write();
        if members.primary.is_none() {
            members.primary = Some(Arc::clone(&channel));
        }
        Arc::make_mut(&mut members.channels).push(channel);
    }

    pub fn remove_channel(&self, channel_id: &str) -> Option<Arc<ChannelInfo>> {
        // ---
        let mut members = self.write();
        let pos = members.channels.iter().position(|c| c.channel_id() == channel_id)?;
        let removed = Arc::make_mut(&mut members.channels).remove(pos);

        let was_primary = members
            .primary
            .as_ref()
            .is_some_and(|p| Arc::ptr_eq(p, &removed));
        if was_primary {
            members.primary = members.channels.first().cloned();
        }
        Some(removed)
    }

    /// Put `replacement` where `current` sits, keeping its place in the
    /// order and its primary role. False if `current` is no longer a member.
    pub fn replace_channel(&self, current: &Arc<ChannelInfo>, replacement: Arc<ChannelInfo>) -> bool {
        // ---
        let mut members = self.write();
        let Some(pos) = members.channels.iter().position(|c| Arc::ptr_eq(c, current)) else {
            return false;
        };

        if members.primary.as_ref().is_some_and(|p| Arc::ptr_eq(p, current)) {
            members.primary = Some(Arc::clone(&replacement));
        }
        Arc::make_mut(&mut members.channels)[pos] = replacement;
        true
    }

    /// The member that is `channel`, if any.
    pub fn find(&self, channel: &ChannelInfo) -> Option<Arc<ChannelInfo>> {
        self.read()
            .channels
            .iter()
            .find(|c| std::ptr::eq(c.as_ref(), channel))
            .cloned()
    }

    /// Point-in-time view of the channels, in insertion order.
    pub fn channels(&self) -> ChannelList {
        Arc::clone(&self.read().channels)
    }

    pub fn primary(&self) -> Option<Arc<ChannelInfo>> {
        self.read().primary.clone()
    }

    pub fn len(&self) -> usize {
        self.read().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn healthy_count(&self) -> usize {
        self.channels().iter().filter(|c| c.is_healthy()).count()
    }

    // ---

    /// Pick a channel by `strategy` among all channels, healthy or not.
    pub fn select_channel(&self, strategy: LoadBalancingStrategy) -> Option<Arc<ChannelInfo>> {
        self.select_channel_filtered(strategy, false)
    }

    /// Like [`ChannelGroup::select_channel`], but with `skip_unhealthy`
    /// only healthy channels are considered while at least one exists.
    pub fn select_channel_filtered(
        &self,
        strategy: LoadBalancingStrategy,
        skip_unhealthy: bool,
    ) -> Option<Arc<ChannelInfo>> {
        // ---
        let (channels, primary) = self.snapshot();
        if channels.is_empty() {
            return None;
        }

        if skip_unhealthy {
            let healthy: Vec<_> = channels.iter().filter(|c| c.is_healthy()).cloned().collect();
            if !healthy.is_empty() && healthy.len() < channels.len() {
                return self.pick(&healthy, strategy, primary.as_ref());
            }
        }

        self.pick(&channels, strategy, primary.as_ref())
    }

    // ---

    fn pick(
        &self,
        candidates: &[Arc<ChannelInfo>],
        strategy: LoadBalancingStrategy,
        primary: Option<&Arc<ChannelInfo>>,
    ) -> Option<Arc<ChannelInfo>> {
        // ---
        if candidates.is_empty() {
            return None;
        }

        let chosen = match strategy {
            LoadBalancingStrategy::RoundRobin => {
                let i = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
                &candidates[i]
            }
            LoadBalancingStrategy::LeastConnections => candidates
                .iter()
                .min_by_key(|c| c.active_connections())
                .unwrap_or(&candidates[0]),
            LoadBalancingStrategy::Random => {
                &candidates[rand::thread_rng().gen_range(0..candidates.len())]
            }
            LoadBalancingStrategy::WeightedRandom => match WeightedIndex::new(candidates.iter().map(weight)) {
                Ok(dist) => &candidates[dist.sample(&mut rand::thread_rng())],
                Err(e) => {
                    tracing::debug!(session = %self.session_id, "weighted selection unavailable: {e}");
                    &candidates[0]
                }
            },
            LoadBalancingStrategy::FailoverOnly => primary
                .filter(|p| candidates.iter().any(|c| Arc::ptr_eq(c, p)))
                .unwrap_or(&candidates[0]),
        };

        Some(Arc::clone(chosen))
    }
}

// ---

/// Weighted-random share of one channel: inversely proportional to the
/// requests it is carrying, scaled down by its error rate.
fn weight(channel: &Arc<ChannelInfo>) -> f64 {
    // ---
    let reliability = (1.0 - channel.error_rate()).max(MIN_WEIGHT);
    reliability / (1 + channel.active_connections()) as f64
}

// ---
