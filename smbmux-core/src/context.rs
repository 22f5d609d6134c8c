use std::sync::Arc;

use smbmux_domain::Result;

use crate::audit::LeakAuditor;
use crate::buffer_cache::BufferCache;
use crate::config::MultiChannelConfig;

// ---------------------------------------------------------------------------
// HandleContext
// ---------------------------------------------------------------------------

/// Shared services every handle in a tree chain reaches for: the I/O
/// buffer cache and the leak auditor. Cheap to clone.
#[derive(Clone)]
pub struct HandleContext {
    // ---
    buffers: Arc<BufferCache>,
    auditor: Arc<LeakAuditor>,
}

// ---

impl HandleContext {
    // ---
    pub fn new(config: &MultiChannelConfig) -> Result<Self> {
        // ---
        config.validate()?;
        Ok(Self {
            buffers: Arc::new(BufferCache::new(config.buffer_cache_capacity, config.buffer_size)?),
            auditor: Arc::new(LeakAuditor::new(config.trace_resource_usage)),
        })
    }

    pub fn buffers(&self) -> &Arc<BufferCache> {
        &self.buffers
    }

    pub fn auditor(&self) -> &Arc<LeakAuditor> {
        &self.auditor
    }
}
