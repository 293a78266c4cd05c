//! Periodic removal of expired programmes.
//!
//! Started once the broadcast time is known (`SiHandler::start_timer`).
//! Ticks every minute; every `idle_minutes` ticks, programmes that ended
//! before the current broadcast time are deleted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::database::SqliteEpgStore;

/// Broadcast time tracker.
///
/// Holds the last TDT/TOT time together with the instant it was received,
/// so the current broadcast time can be derived without a system clock
/// change.
#[derive(Debug, Default)]
pub struct BroadcastClock {
    reference: Mutex<Option<(DateTime<Utc>, Instant)>>,
}

impl BroadcastClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, utc: DateTime<Utc>) -> bool {
        match self.reference.lock() {
            Ok(mut reference) => {
                *reference = Some((utc, Instant::now()));
                true
            }
            Err(_) => false,
        }
    }

    /// Current broadcast time; wall clock when no reference is known.
    pub fn now(&self) -> DateTime<Utc> {
        let reference = self.reference.lock().ok().and_then(|r| *r);
        match reference {
            Some((utc, received)) => {
                let elapsed = chrono::Duration::from_std(received.elapsed())
                    .unwrap_or_else(|_| chrono::Duration::zero());
                utc + elapsed
            }
            None => Utc::now(),
        }
    }

    pub fn is_set(&self) -> bool {
        self.reference.lock().map(|r| r.is_some()).unwrap_or(false)
    }
}

/// Housekeeping configuration.
#[derive(Debug, Clone)]
pub struct HousekeepingConfig {
    /// Seconds between ticks.
    pub tick_interval_secs: u64,
    /// Ticks between expired-programme sweeps (0 = disabled).
    pub idle_minutes: u32,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            idle_minutes: 60,
        }
    }
}

/// Expired-programme cleanup task.
pub struct Housekeeping {
    store: Arc<SqliteEpgStore>,
    clock: Arc<BroadcastClock>,
    config: HousekeepingConfig,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl Housekeeping {
    pub fn new(
        store: Arc<SqliteEpgStore>,
        clock: Arc<BroadcastClock>,
        config: HousekeepingConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            cancel,
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the background task. Later calls are no-ops.
    pub fn start(self: &Arc<Self>) {
        if self.config.idle_minutes == 0 {
            debug!("Housekeeping: disabled");
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("Housekeeping: no runtime, timer not started");
                self.started.store(false, Ordering::SeqCst);
                return;
            }
        };
        let this = Arc::clone(self);
        handle.spawn(async move {
            this.run().await;
        });
    }

    async fn run(&self) {
        info!(
            "Housekeeping: Starting, sweep every {} ticks of {} seconds",
            self.config.idle_minutes, self.config.tick_interval_secs
        );
        let mut ticker = interval(Duration::from_secs(self.config.tick_interval_secs.max(1)));
        // The first tick completes immediately.
        ticker.tick().await;
        let mut counter = 0u32;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Housekeeping: Stopped");
                    break;
                }
                _ = ticker.tick() => {}
            }

            counter += 1;
            if counter >= self.config.idle_minutes {
                counter = 0;
                self.sweep();
            }
        }
    }

    /// Delete programmes that ended before the current broadcast time.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let result = self
            .store
            .lock()
            .map_err(|e| e.to_string())
            .and_then(|db| db.delete_expired_programs(now).map_err(|e| e.to_string()));
        match result {
            Ok(removed) => {
                debug!("Housekeeping: removed {} programmes ended before {}", removed, now);
                removed
            }
            Err(e) => {
                error!("Housekeeping: Failed to clear expired programmes: {}", e);
                0
            }
        }
    }
}
