//! Parser worker: the single consumer of the ingestion queue.
//!
//! The worker owns the [`SiParser`] and the home transport frequency. The
//! tuner pushes frequency-tagged sections, the frequency monitor pushes
//! retune requests; both go through the same queue so every state change
//! happens on this task.

use bytes::Bytes;
use dvbsi::{SiParser, FREQUENCY_PREFIX_LEN};
use log::{debug, error, info, trace};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default ingestion queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// One entry of the ingestion queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestItem {
    /// A raw section prefixed with its 4-byte host-endian frequency.
    Section(Bytes),
    /// Move to another home transport (Hz).
    Retune(u32),
    /// The section source is exhausted.
    EndOfStream,
}

/// Counters reported when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub sections: u64,
    /// Sections tagged with a frequency other than the home transport.
    pub stale_sections: u64,
    pub retunes: u64,
}

pub struct Worker {
    parser: SiParser,
    receiver: mpsc::Receiver<IngestItem>,
    cancel: CancellationToken,
    /// Home transport from the configuration (Hz).
    configured_home: Option<u32>,
    home_frequency: Option<u32>,
    stats: WorkerStats,
}

impl Worker {
    pub fn new(
        parser: SiParser,
        receiver: mpsc::Receiver<IngestItem>,
        cancel: CancellationToken,
        configured_home: Option<u32>,
    ) -> Self {
        Self {
            parser,
            receiver,
            cancel,
            configured_home,
            home_frequency: None,
            stats: WorkerStats::default(),
        }
    }

    /// Tune the home transport: the configured one, else the first stored
    /// frequency. Without either the worker waits for a retune request.
    fn configure_parser(&mut self) {
        let home = self.configured_home.or_else(|| {
            match self.parser.store().read_frequencies() {
                Ok(frequencies) => frequencies.first().copied(),
                Err(e) => {
                    error!("Worker: Failed to read frequency list: {}", e);
                    None
                }
            }
        });

        match home {
            Some(frequency) => {
                info!("Worker: Home transport {} Hz", frequency);
                self.tune(frequency);
            }
            None => info!("Worker: No home transport yet, waiting for a frequency list"),
        }
    }

    fn tune(&mut self, frequency: u32) {
        let handler = self.parser.handler().clone();
        if self.home_frequency.is_some() {
            handler.stop_filters();
        }
        handler.set_home_ts(frequency, 0);
        self.parser.start_base_filters();
        self.home_frequency = Some(frequency);
    }

    fn is_stale(&self, item: &[u8]) -> bool {
        let (Some(home), Some(prefix)) = (self.home_frequency, item.get(..FREQUENCY_PREFIX_LEN))
        else {
            return false;
        };
        let frequency = u32::from_ne_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        frequency != home
    }

    /// Process queued items until end of stream, queue closure or
    /// cancellation.
    pub async fn run(mut self) -> WorkerStats {
        self.parser.prepare_store();
        self.configure_parser();

        loop {
            let item = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Worker: Cancelled");
                    break;
                }
                item = self.receiver.recv() => item,
            };

            match item {
                Some(IngestItem::Section(item)) => {
                    if self.is_stale(&item) {
                        trace!("Worker: Dropping section from a previous transport");
                        self.stats.stale_sections += 1;
                        continue;
                    }
                    self.stats.sections += 1;
                    self.parser.ingest(&item);
                }
                Some(IngestItem::Retune(frequency)) => {
                    if self.home_frequency == Some(frequency) {
                        debug!("Worker: Already tuned to {} Hz", frequency);
                        continue;
                    }
                    info!("Worker: Retuning to {} Hz", frequency);
                    self.stats.retunes += 1;
                    self.tune(frequency);
                }
                Some(IngestItem::EndOfStream) => {
                    info!("Worker: End of stream");
                    break;
                }
                None => {
                    info!("Worker: Queue closed");
                    break;
                }
            }
        }

        if self.home_frequency.is_some() {
            self.parser.stop_base_filters();
        }
        info!(
            "Worker: Stopped after {} sections ({} stale), {} retunes",
            self.stats.sections, self.stats.stale_sections, self.stats.retunes
        );
        self.stats
    }
}
