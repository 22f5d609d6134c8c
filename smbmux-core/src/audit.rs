//! Opt-in registry of live handles, for finding leaks.
//!
//! When enabled every handle registers itself on creation with a captured
//! backtrace and deregisters when it is retired. Whatever is still
//! registered at audit time was never closed.

use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// HandleKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    // ---
    Tree,
    File,
    Pipe,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let s = match self {
            HandleKind::Tree => "tree",
            HandleKind::File => "file",
            HandleKind::Pipe => "pipe",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// LeakReport
// ---------------------------------------------------------------------------

/// A handle that was still registered when the audit ran.
#[derive(Debug, Clone)]
pub struct LeakReport {
    // ---
    pub kind: HandleKind,
    pub description: String,
    pub age: Duration,
    pub backtrace: Arc<Backtrace>,
}

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct AuditToken(u64);

struct Entry {
    kind: HandleKind,
    description: String,
    created: Instant,
    backtrace: Arc<Backtrace>,
}

// ---------------------------------------------------------------------------
// LeakAuditor
// ---------------------------------------------------------------------------

pub struct LeakAuditor {
    // ---
    enabled: bool,
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, Entry>>,
}

// ---

impl LeakAuditor {
    // ---
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            next_id: AtomicU64::new(1),
            live: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn live(&self) -> MutexGuard<'_, HashMap<u64, Entry>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---

    /// Returns `None` when auditing is off; nothing is captured then.
    pub(crate) fn register(&self, kind: HandleKind, description: &str) -> Option<AuditToken> {
        // ---
        if !self.enabled {
            return None;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            kind,
            description: description.to_string(),
            created: Instant::now(),
            backtrace: Arc::new(Backtrace::force_capture()),
        };
        self.live().insert(id, entry);
        Some(AuditToken(id))
    }

    pub(crate) fn deregister(&self, token: Option<AuditToken>) {
        if let Some(AuditToken(id)) = token {
            self.live().remove(&id);
        }
    }

    // ---

    pub fn live_count(&self) -> usize {
        self.live().len()
    }

    /// Every handle still registered, oldest first.
    pub fn audit(&self) -> Vec<LeakReport> {
        // ---
        let live = self.live();
        let mut ids: Vec<_> = live.keys().copied().collect();
        ids.sort_unstable();

        ids.into_iter()
            .filter_map(|id| live.get(&id))
            .map(|e| LeakReport {
                kind: e.kind,
                description: e.description.clone(),
                age: e.created.elapsed(),
                backtrace: Arc::clone(&e.backtrace),
            })
            .collect()
    }

    /// Log every leak at warn level and return how many there were.
    pub fn log_leaks(&self) -> usize {
        // ---
        let leaks = self.audit();
        for leak in &leaks {
            tracing::warn!(
                kind = %leak.kind,
                handle = %leak.description,
                age_ms = leak.age.as_millis() as u64,
                "handle never closed, created at:\n{}",
                leak.backtrace
            );
        }
        leaks.len()
    }
}

// ---

impl Default for LeakAuditor {
    fn default() -> Self {
        Self::new(false)
    }
}

// ---
