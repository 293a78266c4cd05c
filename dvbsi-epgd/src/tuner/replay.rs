//! Section source backed by recorded transport stream files.
//!
//! Each configured frequency maps to a TS capture. Tuning to a frequency
//! starts a blocking reader that demultiplexes the filtered PIDs and pushes
//! the completed sections, tagged with the frequency, into the worker queue.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use dvbsi::frame_section;
use dvbsi::si::{pid, SectionDemux, TsPacketIterator, TS_PACKET_SIZE};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::worker::IngestItem;

/// Packets read per chunk.
const READ_CHUNK_PACKETS: usize = 256;

/// A capture file for one transport (`FREQ_MHZ=PATH`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaySource {
    /// Frequency in Hz.
    pub frequency: u32,
    pub path: PathBuf,
}

impl FromStr for ReplaySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (mhz, path) = s
            .split_once('=')
            .ok_or_else(|| format!("expected FREQ_MHZ=PATH, got '{}'", s))?;
        let mhz: u32 = mhz
            .trim()
            .parse()
            .map_err(|_| format!("invalid frequency '{}'", mhz))?;
        let frequency = mhz
            .checked_mul(1_000_000)
            .filter(|f| *f != 0)
            .ok_or_else(|| format!("frequency out of range: {} MHz", mhz))?;
        let path = path.trim();
        if path.is_empty() {
            return Err(format!("missing path for {} MHz", mhz));
        }
        Ok(Self {
            frequency,
            path: PathBuf::from(path),
        })
    }
}

/// How a replay pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplayEnd {
    Eof,
    Stopped,
}

/// State handed to one reader task.
pub(crate) struct ReaderContext {
    pub frequency: u32,
    pub path: PathBuf,
    pub filters: Arc<Mutex<HashSet<u16>>>,
    pub sender: mpsc::Sender<IngestItem>,
    pub stop: Arc<AtomicBool>,
    pub loop_replay: bool,
}

impl ReaderContext {
    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Blocking reader loop. Sends `EndOfStream` when the capture is exhausted
/// and looping is off.
pub(crate) fn run_reader(ctx: ReaderContext) {
    info!(
        "[ReplayTuner] Reading {} Hz from {}",
        ctx.frequency,
        ctx.path.display()
    );
    loop {
        match replay_file(&ctx) {
            Ok(ReplayEnd::Stopped) => {
                debug!("[ReplayTuner] Reader for {} Hz stopped", ctx.frequency);
                return;
            }
            Ok(ReplayEnd::Eof) if ctx.loop_replay => {
                debug!("[ReplayTuner] Restarting {}", ctx.path.display());
            }
            Ok(ReplayEnd::Eof) => {
                info!("[ReplayTuner] End of {}", ctx.path.display());
                break;
            }
            Err(e) => {
                error!("[ReplayTuner] Failed to read {}: {}", ctx.path.display(), e);
                break;
            }
        }
    }
    if !ctx.is_stopped() {
        let _ = ctx.sender.blocking_send(IngestItem::EndOfStream);
    }
}

fn replay_file(ctx: &ReaderContext) -> io::Result<ReplayEnd> {
    let mut file = BufReader::new(File::open(&ctx.path)?);
    let mut demux = SectionDemux::new();
    let mut active = HashSet::new();
    let mut chunk = vec![0u8; TS_PACKET_SIZE * READ_CHUNK_PACKETS];
    let mut pending: Vec<u8> = Vec::with_capacity(chunk.len() + TS_PACKET_SIZE);

    loop {
        if ctx.is_stopped() {
            return Ok(ReplayEnd::Stopped);
        }
        let n = file.read(&mut chunk)?;
        if n == 0 {
            if !pending.is_empty() {
                debug!("[ReplayTuner] Discarding {} trailing bytes", pending.len());
            }
            return Ok(ReplayEnd::Eof);
        }
        pending.extend_from_slice(&chunk[..n]);
        sync_filters(&mut demux, &mut active, &ctx.filters);

        let consumed = {
            let mut packets = TsPacketIterator::new(&pending);
            for packet in packets.by_ref() {
                for section in demux.feed(&packet) {
                    let item = IngestItem::Section(Bytes::from(frame_section(ctx.frequency, &section)));
                    if ctx.sender.blocking_send(item).is_err() {
                        warn!("[ReplayTuner] Worker queue closed");
                        return Ok(ReplayEnd::Stopped);
                    }
                }
            }
            pending.len() - packets.remainder().len()
        };
        pending.drain(..consumed);
    }
}

/// Bring the demux PID set in line with the requested filters. PAT is
/// always collected.
fn sync_filters(demux: &mut SectionDemux, active: &mut HashSet<u16>, filters: &Mutex<HashSet<u16>>) {
    let mut wanted = match filters.lock() {
        Ok(filters) => filters.clone(),
        Err(_) => return,
    };
    wanted.insert(pid::PAT);

    for removed in active.difference(&wanted) {
        demux.remove_pid(*removed);
    }
    for added in wanted.difference(active) {
        demux.add_pid(*added);
    }
    *active = wanted;
}
