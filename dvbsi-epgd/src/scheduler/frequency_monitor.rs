//! Frequency list monitor.
//!
//! Runs only when no home transport is configured. Polls the stored
//! frequency list and, whenever its first entry changes, asks the worker to
//! retune to it.

use std::sync::Arc;
use std::time::Duration;

use dvbsi::EpgStore;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::worker::IngestItem;

/// Frequency monitor configuration.
#[derive(Debug, Clone)]
pub struct FrequencyMonitorConfig {
    /// Interval between frequency list checks (seconds).
    pub check_interval_secs: u64,
}

impl Default for FrequencyMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
        }
    }
}

pub struct FrequencyMonitor {
    store: Arc<dyn EpgStore>,
    sender: mpsc::Sender<IngestItem>,
    config: FrequencyMonitorConfig,
    cancel: CancellationToken,
}

impl FrequencyMonitor {
    pub fn new(
        store: Arc<dyn EpgStore>,
        sender: mpsc::Sender<IngestItem>,
        config: FrequencyMonitorConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            sender,
            config,
            cancel,
        }
    }

    /// Start the monitor background task.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(
            "FrequencyMonitor: Starting with check interval {} seconds",
            self.config.check_interval_secs
        );

        // The worker tunes the current first entry on its own.
        let mut previous = self.first_frequency();
        let mut check_interval = interval(Duration::from_secs(self.config.check_interval_secs.max(1)));
        check_interval.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("FrequencyMonitor: Stopped");
                    break;
                }
                _ = check_interval.tick() => {}
            }

            let Some(frequency) = self.check(&mut previous) else {
                continue;
            };
            info!("FrequencyMonitor: First frequency changed to {} Hz", frequency);
            if self.sender.send(IngestItem::Retune(frequency)).await.is_err() {
                warn!("FrequencyMonitor: Worker queue closed");
                break;
            }
        }
    }

    fn first_frequency(&self) -> Option<u32> {
        match self.store.read_frequencies() {
            Ok(frequencies) => frequencies.first().copied(),
            Err(e) => {
                error!("FrequencyMonitor: Failed to read frequency list: {}", e);
                None
            }
        }
    }

    /// Compare the first stored frequency against `previous`. Returns the
    /// new first frequency when it changed.
    fn check(&self, previous: &mut Option<u32>) -> Option<u32> {
        let first = self.first_frequency()?;
        if *previous == Some(first) {
            debug!("FrequencyMonitor: Frequency list unchanged");
            return None;
        }
        *previous = Some(first);
        Some(first)
    }
}
