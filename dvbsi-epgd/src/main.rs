//! dvbsi-epgd: DVB SI collector feeding a SQLite EPG database.
//!
//! Sections come from recorded transport stream captures, one per
//! configured frequency; the decoded network, service and event
//! information is written to the EPG database.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dvbsi::{JoinStrategy, ParserConfig, SiParser};
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod database;
mod logging;
mod scheduler;
mod tuner;
mod worker;

use database::SqliteEpgStore;
use scheduler::{
    BroadcastClock, FrequencyMonitor, FrequencyMonitorConfig, Housekeeping, HousekeepingConfig,
};
use tuner::{ReplaySource, ReplayTuner};
use worker::{Worker, DEFAULT_QUEUE_CAPACITY};

/// Configuration file picked up from the working directory.
const DEFAULT_CONFIG_FILE: &str = "dvbsi-epgd.toml";

/// dvbsi-epgd - DVB SI collector for the EPG database
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Path to the database file
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Home transport frequency in MHz (disables frequency list monitoring)
    #[arg(long)]
    home_ts: Option<u32>,

    /// Country for local time offsets (ISO 3166 alpha-3, e.g. DEU)
    #[arg(long)]
    country_code: Option<String>,

    /// Region within the country for local time offsets
    #[arg(long)]
    country_region_id: Option<u8>,

    /// Join services through the BAT instead of the NIT
    #[arg(long)]
    bouquet: bool,

    /// Transport stream capture for a frequency (FREQ_MHZ=PATH, repeatable)
    #[arg(short, long = "replay", value_name = "FREQ_MHZ=PATH")]
    replay: Vec<ReplaySource>,

    /// Restart captures from the beginning at end of file
    #[arg(long)]
    loop_replay: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Number of days to keep log files
    #[arg(long, default_value = "7")]
    log_retention_days: u64,
}

/// Configuration file format.
#[derive(Debug, serde::Deserialize, Default)]
struct ConfigFile {
    loop_replay: Option<bool>,
    #[serde(default)]
    parser: ParserSection,
    #[serde(default)]
    database: DatabaseSection,
    #[serde(default)]
    logging: LoggingSection,
    #[serde(default)]
    monitor: MonitorSection,
    #[serde(default)]
    housekeeping: HousekeepingSection,
    #[serde(default)]
    replay: Vec<ReplaySection>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct ParserSection {
    home_ts_mhz: Option<u32>,
    country_code: Option<String>,
    country_region_id: Option<u8>,
    bouquet: Option<bool>,
    verify_crc: Option<bool>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct DatabaseSection {
    path: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct LoggingSection {
    log_dir: Option<String>,
    retention_days: Option<u64>,
    level: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct MonitorSection {
    check_interval_secs: Option<u64>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct HousekeepingSection {
    tick_interval_secs: Option<u64>,
    idle_minutes: Option<u32>,
}

#[derive(Debug, serde::Deserialize)]
struct ReplaySection {
    frequency_mhz: u32,
    path: String,
}

fn load_config(path: &PathBuf) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Effective settings after merging command line, file and defaults.
#[derive(Debug)]
struct Settings {
    database: PathBuf,
    /// Home transport (Hz).
    home_ts: Option<u32>,
    parser: ParserConfig,
    replay: Vec<ReplaySource>,
    loop_replay: bool,
    monitor: FrequencyMonitorConfig,
    housekeeping: HousekeepingConfig,
}

fn parse_country_code(code: &str) -> Result<[u8; 3], String> {
    let bytes = code.trim().as_bytes();
    match bytes {
        [a, b, c] if bytes.iter().all(u8::is_ascii_alphabetic) => Ok([
            a.to_ascii_uppercase(),
            b.to_ascii_uppercase(),
            c.to_ascii_uppercase(),
        ]),
        _ => Err(format!("invalid country code '{}', expected 3 letters", code)),
    }
}

fn mhz_to_hz(mhz: u32) -> Result<u32, String> {
    mhz.checked_mul(1_000_000)
        .filter(|hz| *hz != 0)
        .ok_or_else(|| format!("frequency out of range: {} MHz", mhz))
}

fn interval_secs(name: &str, secs: u64) -> Result<u64, String> {
    if secs == 0 {
        return Err(format!("{} must be at least 1 second", name));
    }
    Ok(secs)
}

impl Settings {
    /// Command line wins over the file, the file over defaults.
    fn merge(args: &Args, file: &ConfigFile) -> Result<Self, String> {
        let database = args
            .database
            .clone()
            .or_else(|| file.database.path.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("dvbsi-epgd.db"));

        let home_ts = args
            .home_ts
            .or(file.parser.home_ts_mhz)
            .map(mhz_to_hz)
            .transpose()?;

        let country_code = args
            .country_code
            .as_deref()
            .or(file.parser.country_code.as_deref())
            .map(parse_country_code)
            .transpose()?;

        let bouquet = args.bouquet || file.parser.bouquet.unwrap_or(false);
        let parser = ParserConfig {
            country_code,
            country_region_id: args
                .country_region_id
                .or(file.parser.country_region_id)
                .unwrap_or(0),
            join_strategy: if bouquet {
                JoinStrategy::Bouquet
            } else {
                JoinStrategy::Network
            },
            verify_crc: file.parser.verify_crc.unwrap_or(true),
        };

        let mut replay = args.replay.clone();
        for section in &file.replay {
            let frequency = mhz_to_hz(section.frequency_mhz)?;
            if replay.iter().any(|source| source.frequency == frequency) {
                continue;
            }
            replay.push(ReplaySource {
                frequency,
                path: PathBuf::from(&section.path),
            });
        }

        let monitor_defaults = FrequencyMonitorConfig::default();
        let housekeeping_defaults = HousekeepingConfig::default();

        Ok(Self {
            database,
            home_ts,
            parser,
            replay,
            loop_replay: args.loop_replay || file.loop_replay.unwrap_or(false),
            monitor: FrequencyMonitorConfig {
                check_interval_secs: interval_secs(
                    "monitor.check_interval_secs",
                    file.monitor
                        .check_interval_secs
                        .unwrap_or(monitor_defaults.check_interval_secs),
                )?,
            },
            housekeeping: HousekeepingConfig {
                tick_interval_secs: interval_secs(
                    "housekeeping.tick_interval_secs",
                    file.housekeeping
                        .tick_interval_secs
                        .unwrap_or(housekeeping_defaults.tick_interval_secs),
                )?,
                idle_minutes: file
                    .housekeeping
                    .idle_minutes
                    .unwrap_or(housekeeping_defaults.idle_minutes),
            },
        })
    }
}

/// Wait for a background task; a panic or cancellation is logged.
async fn join_task(name: &str, handle: tokio::task::JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            error!("{} task failed: {}", name, e);
            false
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load config file: explicit path > auto-detect > default
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            Some(default_path)
        } else {
            None
        }
    });
    let file_config = if let Some(config_path) = &config_path {
        match load_config(config_path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", config_path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e);
            }
        }
    } else {
        ConfigFile::default()
    };

    // Merge logging configs (command line takes precedence)
    let log_dir = if args.log_dir.to_string_lossy() != "logs" {
        args.log_dir.clone()
    } else {
        PathBuf::from(file_config.logging.log_dir.as_deref().unwrap_or("logs"))
    };
    let log_retention_days = if args.log_retention_days != 7 {
        args.log_retention_days
    } else {
        file_config.logging.retention_days.unwrap_or(7)
    };
    let log_level = file_config.logging.level.as_deref();
    logging::init_logging(&log_dir, log_retention_days, args.verbose, log_level)?;

    let settings = Settings::merge(&args, &file_config)?;

    info!("dvbsi-epgd starting...");
    info!("  Database: {:?}", settings.database);
    info!("  Join strategy: {:?}", settings.parser.join_strategy);
    match settings.home_ts {
        Some(home) => info!("  Home transport: {} Hz", home),
        None => info!("  Home transport: first stored frequency"),
    }
    for source in &settings.replay {
        info!("  Capture {} Hz: {}", source.frequency, source.path.display());
    }
    if let Some(home) = settings.home_ts {
        if !settings.replay.iter().any(|source| source.frequency == home) {
            warn!("No capture configured for the home transport {} Hz", home);
        }
    }

    let store = match SqliteEpgStore::open(&settings.database) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };
    if !settings.replay.is_empty() {
        let frequencies: Vec<u32> = settings.replay.iter().map(|source| source.frequency).collect();
        store.lock()?.replace_frequencies(&frequencies)?;
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl-C, shutting down");
                    cancel.cancel();
                }
                Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
            }
        });
    }

    let (tx, rx) = mpsc::channel(DEFAULT_QUEUE_CAPACITY);
    let clock = Arc::new(BroadcastClock::new());
    let housekeeping = Arc::new(Housekeeping::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        settings.housekeeping.clone(),
        cancel.clone(),
    ));
    let tuner = Arc::new(ReplayTuner::new(
        &settings.replay,
        settings.loop_replay,
        tx.clone(),
        Arc::clone(&store),
        Arc::clone(&clock),
        housekeeping,
    ));
    let parser = SiParser::new(settings.parser.clone(), tuner.clone(), store.clone());

    let monitor_handle = if settings.home_ts.is_none() {
        let monitor = Arc::new(FrequencyMonitor::new(
            store.clone(),
            tx.clone(),
            settings.monitor.clone(),
            cancel.clone(),
        ));
        Some(monitor.start())
    } else {
        None
    };
    drop(tx);

    let stats = Worker::new(parser, rx, cancel.clone(), settings.home_ts)
        .run()
        .await;

    cancel.cancel();
    tuner.shutdown();
    if let Some(handle) = monitor_handle {
        join_task("Frequency monitor", handle).await;
    }

    let db = store.lock()?;
    info!(
        "EPG database: {} transports, {} channels, {} programmes ({} sections processed)",
        db.row_count("NIT")?,
        db.row_count("CHANNEL")?,
        db.row_count("PROGRAM")?,
        stats.sections
    );
    if clock.is_set() {
        info!("Last broadcast time: {}", clock.now());
    }

    Ok(())
}
