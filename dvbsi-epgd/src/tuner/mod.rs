//! Tuner side of the parser: section filters and home transport control.
//!
//! [`ReplayTuner`] implements [`SiHandler`] over recorded captures: filter
//! requests update the PID set of the active reader, and tuning starts a
//! reader for the capture registered on that frequency.

pub mod replay;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dvbsi::SiHandler;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::database::SqliteEpgStore;
use crate::scheduler::{BroadcastClock, Housekeeping};
use crate::worker::IngestItem;
use replay::{run_reader, ReaderContext};

pub use replay::ReplaySource;

/// The reader currently feeding the queue.
struct ActiveReader {
    frequency: u32,
    stop: Arc<AtomicBool>,
}

pub struct ReplayTuner {
    sources: HashMap<u32, PathBuf>,
    loop_replay: bool,
    sender: mpsc::Sender<IngestItem>,
    store: Arc<SqliteEpgStore>,
    clock: Arc<BroadcastClock>,
    housekeeping: Arc<Housekeeping>,
    /// PIDs requested by the parser.
    filters: Arc<Mutex<HashSet<u16>>>,
    active: Mutex<Option<ActiveReader>>,
}

impl ReplayTuner {
    pub fn new(
        sources: &[ReplaySource],
        loop_replay: bool,
        sender: mpsc::Sender<IngestItem>,
        store: Arc<SqliteEpgStore>,
        clock: Arc<BroadcastClock>,
        housekeeping: Arc<Housekeeping>,
    ) -> Self {
        let sources = sources
            .iter()
            .map(|source| (source.frequency, source.path.clone()))
            .collect();
        Self {
            sources,
            loop_replay,
            sender,
            store,
            clock,
            housekeeping,
            filters: Arc::new(Mutex::new(HashSet::new())),
            active: Mutex::new(None),
        }
    }

    /// Frequency of the running reader, if any.
    pub fn current_frequency(&self) -> Option<u32> {
        self.active
            .lock()
            .ok()
            .and_then(|active| active.as_ref().map(|reader| reader.frequency))
    }

    /// Stop the running reader.
    pub fn shutdown(&self) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(reader) = active.take() {
                debug!("[ReplayTuner] Stopping reader for {} Hz", reader.frequency);
                reader.stop.store(true, Ordering::SeqCst);
            }
        }
    }

    fn update_filters(&self, update: impl FnOnce(&mut HashSet<u16>)) {
        match self.filters.lock() {
            Ok(mut filters) => update(&mut filters),
            Err(_) => error!("[ReplayTuner] Filter set poisoned"),
        }
    }
}

impl Drop for ReplayTuner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SiHandler for ReplayTuner {
    fn start_filter(&self, pid: u16) {
        debug!("[ReplayTuner] Start filter 0x{:04X}", pid);
        self.update_filters(|filters| {
            filters.insert(pid);
        });
    }

    fn stop_filter(&self, pid: u16) {
        debug!("[ReplayTuner] Stop filter 0x{:04X}", pid);
        self.update_filters(|filters| {
            filters.remove(&pid);
        });
    }

    fn stop_filters(&self) {
        debug!("[ReplayTuner] Stop all filters");
        self.update_filters(|filters| filters.clear());
    }

    fn set_home_ts(&self, frequency: u32, _secondary: u32) {
        self.shutdown();

        let Some(path) = self.sources.get(&frequency).cloned() else {
            warn!("[ReplayTuner] No capture registered for {} Hz", frequency);
            return;
        };
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                error!("[ReplayTuner] No runtime, cannot start reader for {} Hz", frequency);
                return;
            }
        };

        info!("[ReplayTuner] Tuning to {} Hz", frequency);
        let stop = Arc::new(AtomicBool::new(false));
        let ctx = ReaderContext {
            frequency,
            path,
            filters: Arc::clone(&self.filters),
            sender: self.sender.clone(),
            stop: Arc::clone(&stop),
            loop_replay: self.loop_replay,
        };
        handle.spawn_blocking(move || run_reader(ctx));

        if let Ok(mut active) = self.active.lock() {
            *active = Some(ActiveReader { frequency, stop });
        }
    }

    fn is_ts_info_present(&self) -> bool {
        let Some(frequency) = self.current_frequency() else {
            return false;
        };
        match self.store.lock() {
            Ok(db) => db.has_ts_info(frequency).unwrap_or_else(|e| {
                error!("[ReplayTuner] Failed to query TS info: {}", e);
                false
            }),
            Err(e) => {
                error!("[ReplayTuner] {}", e);
                false
            }
        }
    }

    fn is_scanning(&self) -> bool {
        false
    }

    fn start_timer(&self) {
        self.housekeeping.start();
    }

    fn set_reference_time(&self, utc: DateTime<Utc>) -> bool {
        info!("[ReplayTuner] Broadcast time {}", utc);
        self.clock.set(utc)
    }
}
