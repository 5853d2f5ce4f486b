//! Edge-triggered wake primitive for the sync loop.
//!
//! The first request after the flag was consumed writes one signal to the
//! event loop's ping; every further request until [`Wake::take`] is a no-op,
//! so a burst of mutations coalesces into a single sync pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use calloop::ping::{Ping, PingSource, make_ping};

/// Shared wake handle. Cloning is cheap and clones share the same flag.
#[derive(Clone)]
pub struct Wake {
    inner: Arc<WakeInner>,
}

struct WakeInner {
    requested: AtomicBool,
    signals: AtomicU64,
    ping: Option<Ping>,
}

impl Wake {
    /// Create a wake handle together with the event source to register in
    /// the event loop.
    pub fn new() -> std::io::Result<(Wake, PingSource)> {
        let (ping, source) = make_ping()?;
        Ok((Self::with_ping(Some(ping)), source))
    }

    /// A wake handle that only tracks the flag, for driving sync manually.
    pub fn detached() -> Wake {
        Self::with_ping(None)
    }

    fn with_ping(ping: Option<Ping>) -> Wake {
        Wake {
            inner: Arc::new(WakeInner {
                requested: AtomicBool::new(false),
                signals: AtomicU64::new(0),
                ping,
            }),
        }
    }

    /// Request a sync pass.
    pub fn request(&self) {
        // Only signal on the false -> true edge
        let was_requested = self.inner.requested.swap(true, Ordering::AcqRel);
        if !was_requested {
            self.inner.signals.fetch_add(1, Ordering::Relaxed);
            if let Some(ping) = &self.inner.ping {
                ping.ping();
            }
        }
    }

    /// Check if a pass has been requested and clear the flag.
    pub fn take(&self) -> bool {
        self.inner.requested.swap(false, Ordering::AcqRel)
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// Number of signals written so far.
    pub fn signals(&self) -> u64 {
        self.inner.signals.load(Ordering::Relaxed)
    }
}

impl Default for Wake {
    fn default() -> Self {
        Self::detached()
    }
}
