//! Section dispatch and cross-table state.
//!
//! [`SiParser`] owns every piece of state that outlives a single section:
//! the version trackers, the join sets built from NIT/BAT and SDT, the LCN
//! cache and the "time established" flag. It is driven by a single task and
//! needs no internal locking.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::bat::parse_bat;
use super::eit::parse_eit;
use super::nit::parse_nit;
use super::pat::parse_pat;
use super::pmt::parse_pmt;
use super::psi::{long_body, short_body, short_payload, verify_crc, PsiHeader};
use super::sdt::parse_sdt;
use super::tot::{parse_tdt, parse_tot};
use super::version::{AdmitResult, VersionTracker};
use super::{pid, table_id};
use crate::collab::{EpgStore, SiHandler};
use crate::error::{Result, StoreResult};
use crate::records::{
    BouquetId, ChannelRecord, JoinKey, LocalTimeOffset, NetworkId, ProgramRecord, ServiceKey,
};

/// Size of the frequency tag in front of every queued section.
pub const FREQUENCY_PREFIX_LEN: usize = 4;

/// Prefix a raw section with its frequency tag (host byte order).
pub fn frame_section(frequency: u32, section: &[u8]) -> Vec<u8> {
    let mut item = Vec::with_capacity(FREQUENCY_PREFIX_LEN + section.len());
    item.extend_from_slice(&frequency.to_ne_bytes());
    item.extend_from_slice(section);
    item
}

/// Which table establishes the set of transports SDT and NIT accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinStrategy {
    /// Transports announced by the NIT.
    #[default]
    Network,
    /// Transports announced by the BAT; NIT entries for other transports
    /// are ignored.
    Bouquet,
}

/// Parser configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    /// Country for local time offset matching (ISO 3166 alpha-3).
    pub country_code: Option<[u8; 3]>,
    /// Region within the country.
    pub country_region_id: u8,
    pub join_strategy: JoinStrategy,
    /// Discard sections whose CRC-32 does not match.
    pub verify_crc: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            country_code: None,
            country_region_id: 0,
            join_strategy: JoinStrategy::Network,
            verify_crc: true,
        }
    }
}

/// DVB SI section dispatcher.
pub struct SiParser {
    config: ParserConfig,
    handler: Arc<dyn SiHandler>,
    store: Arc<dyn EpgStore>,

    current_frequency: Option<u32>,
    time_established: bool,
    reference_time: Option<DateTime<Utc>>,
    local_time_offset: Option<LocalTimeOffset>,
    /// Cable delivery seen at least once; terrestrial is ignored from then on.
    cable_seen: bool,

    /// Program number -> PMT PID.
    pmt_pids: BTreeMap<u16, u16>,
    /// PMT PIDs a filter was requested for on the current transport.
    started_pmt_pids: HashSet<u16>,
    /// Transports SDT sections are accepted for.
    known_transports: HashSet<JoinKey>,
    /// Services EIT sections are accepted for.
    known_services: HashSet<ServiceKey>,
    /// Service id -> LCN. Survives table versions.
    lcn_cache: HashMap<u16, u16>,

    pmt_versions: VersionTracker<(u32, u16)>,
    nit_versions: VersionTracker<NetworkId>,
    bat_versions: VersionTracker<BouquetId>,
    sdt_versions: VersionTracker<JoinKey>,
    eit_versions: VersionTracker<(ServiceKey, u8)>,
}

impl SiParser {
    pub fn new(config: ParserConfig, handler: Arc<dyn SiHandler>, store: Arc<dyn EpgStore>) -> Self {
        Self {
            config,
            handler,
            store,
            current_frequency: None,
            time_established: false,
            reference_time: None,
            local_time_offset: None,
            cable_seen: false,
            pmt_pids: BTreeMap::new(),
            started_pmt_pids: HashSet::new(),
            known_transports: HashSet::new(),
            known_services: HashSet::new(),
            lcn_cache: HashMap::new(),
            pmt_versions: VersionTracker::new(),
            nit_versions: VersionTracker::new(),
            bat_versions: VersionTracker::new(),
            sdt_versions: VersionTracker::new(),
            eit_versions: VersionTracker::new(),
        }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<dyn SiHandler> {
        &self.handler
    }

    pub fn store(&self) -> &Arc<dyn EpgStore> {
        &self.store
    }

    pub fn is_time_established(&self) -> bool {
        self.time_established
    }

    pub fn reference_time(&self) -> Option<DateTime<Utc>> {
        self.reference_time
    }

    pub fn current_frequency(&self) -> Option<u32> {
        self.current_frequency
    }

    pub fn local_time_offset(&self) -> Option<&LocalTimeOffset> {
        self.local_time_offset.as_ref()
    }

    pub fn pmt_pid(&self, program_number: u16) -> Option<u16> {
        self.pmt_pids.get(&program_number).copied()
    }

    pub fn lcn(&self, service_id: u16) -> Option<u16> {
        self.lcn_cache.get(&service_id).copied()
    }

    /// Create the EPG tables the decoders write to.
    pub fn prepare_store(&self) {
        log_store_error("NIT table", self.store.create_nit_table());
        log_store_error("CHANNEL table", self.store.create_channel_table());
        log_store_error("PROGRAM table", self.store.create_program_table());
    }

    /// Request the SDT, NIT, EIT and TDT/TOT PIDs from the tuner.
    pub fn start_base_filters(&self) {
        for pid in pid::BASE_FILTERS {
            log::debug!("Requesting PID 0x{:04X}", pid);
            self.handler.start_filter(pid);
        }
    }

    /// Release the base filter set.
    pub fn stop_base_filters(&self) {
        for pid in pid::BASE_FILTERS {
            self.handler.stop_filter(pid);
        }
    }

    /// Process one queued item: a frequency tag followed by a raw section.
    pub fn ingest(&mut self, item: &[u8]) {
        if item.len() < FREQUENCY_PREFIX_LEN {
            log::warn!("Queued item of {} bytes has no frequency tag", item.len());
            return;
        }
        let (prefix, section) = item.split_at(FREQUENCY_PREFIX_LEN);
        let frequency = u32::from_ne_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        self.dispatch(section, frequency);
    }

    /// Decode one raw section received on `frequency`.
    ///
    /// Errors only mean that the section contributes nothing; they are logged.
    pub fn dispatch(&mut self, buffer: &[u8], frequency: u32) {
        if let Err(e) = self.try_dispatch(buffer, frequency) {
            log::warn!(
                "Discarding section 0x{:02X}: {}",
                buffer.first().copied().unwrap_or(0xFF),
                e
            );
        }
    }

    /// Like [`dispatch`](Self::dispatch) but reports why a section was dropped.
    pub fn try_dispatch(&mut self, buffer: &[u8], frequency: u32) -> Result<()> {
        let header = PsiHeader::parse(buffer)?;

        if self.current_frequency != Some(frequency) {
            if let Some(previous) = self.current_frequency {
                log::info!("Frequency changed: {} -> {}", previous, frequency);
            }
            self.reset_tables();
            self.current_frequency = Some(frequency);
        }

        if self.config.verify_crc
            && (header.section_syntax_indicator || header.table_id == table_id::TOT)
        {
            verify_crc(buffer)?;
        }

        let bouquet = self.config.join_strategy == JoinStrategy::Bouquet;
        log::trace!("Table 0x{:02X}, ext 0x{:04X}", header.table_id, header.table_id_extension);

        match header.table_id {
            table_id::PAT => {
                self.handle_pat(long_body(buffer)?);
                Ok(())
            }
            table_id::PMT => self.handle_pmt(&header, long_body(buffer)?, frequency),
            table_id::NIT_ACTUAL => self.handle_nit(&header, long_body(buffer)?),
            table_id::NIT_OTHER if bouquet => self.handle_nit(&header, long_body(buffer)?),
            table_id::BAT if bouquet => self.handle_bat(&header, long_body(buffer)?),
            table_id::SDT_ACTUAL | table_id::SDT_OTHER => {
                if self.handler.is_ts_info_present() && !self.handler.is_scanning() {
                    self.handle_sdt(&header, long_body(buffer)?)
                } else {
                    log::trace!("SDT withheld: transport not ready");
                    Ok(())
                }
            }
            table_id::EIT_PF_ACTUAL | table_id::EIT_SCHEDULE_FIRST..=table_id::EIT_SCHEDULE_LAST => {
                if self.time_established {
                    self.handle_eit(&header, long_body(buffer)?)
                } else {
                    log::trace!("EIT withheld: time not established");
                    Ok(())
                }
            }
            table_id::TDT => {
                if !self.time_established {
                    self.handle_tdt(short_payload(buffer)?)?;
                }
                Ok(())
            }
            table_id::TOT => {
                if !self.time_established {
                    self.handle_tot(short_body(buffer)?)?;
                }
                Ok(())
            }
            other => {
                log::debug!("SI table type 0x{:02X} unknown", other);
                Ok(())
            }
        }
    }

    /// Forget per-transport state after a frequency change.
    fn reset_tables(&mut self) {
        self.time_established = false;
        self.started_pmt_pids.clear();
    }

    fn handle_pat(&mut self, body: &[u8]) {
        for entry in parse_pat(body) {
            self.pmt_pids.insert(entry.program_number, entry.pmt_pid);
            if self.started_pmt_pids.insert(entry.pmt_pid) {
                log::debug!(
                    "Requesting PMT PID 0x{:04X} for program {}",
                    entry.pmt_pid,
                    entry.program_number
                );
                self.handler.start_filter(entry.pmt_pid);
            }
        }
    }

    fn handle_pmt(&mut self, header: &PsiHeader, body: &[u8], frequency: u32) -> Result<()> {
        let program_number = header.table_id_extension;
        let pmt = parse_pmt(body)?;

        let admitted = self.pmt_versions.admit(
            (frequency, program_number),
            header.version_number,
            header.section_number,
            header.last_section_number,
        );
        if !admitted.is_accepted() {
            return Ok(());
        }

        let pmt_pid = self.pmt_pid(program_number).unwrap_or(0);
        let info = pmt.to_ts_info(frequency, program_number, pmt_pid);
        log::debug!(
            "PMT: program {} video 0x{:04X} audio 0x{:04X}",
            program_number,
            info.video_pid,
            info.audio_pid
        );
        log_store_error("TS info", self.store.insert_ts_info(&info));
        Ok(())
    }

    fn handle_nit(&mut self, header: &PsiHeader, body: &[u8]) -> Result<()> {
        let network_id = header.table_id_extension;
        let nit = parse_nit(body, network_id, &mut self.cable_seen)?;

        let admitted = self.nit_versions.admit(
            NetworkId(network_id),
            header.version_number,
            header.section_number,
            header.last_section_number,
        );
        if !admitted.is_accepted() {
            log::trace!("NIT 0x{:04X} section {} already seen", network_id, header.section_number);
            return Ok(());
        }
        if admitted == AdmitResult::AcceptAndComplete {
            log::debug!("NIT 0x{:04X} version {} complete", network_id, header.version_number);
        }

        for (transport, record) in nit.transports.iter().zip(nit.network_records()) {
            let key = transport.join_key();
            match self.config.join_strategy {
                JoinStrategy::Network => {
                    self.known_transports.insert(key);
                }
                JoinStrategy::Bouquet => {
                    if !self.known_transports.contains(&key) {
                        log::debug!("NIT: transport {:?} not in any bouquet", key);
                        continue;
                    }
                }
            }
            for &(service_id, lcn) in &transport.logical_channels {
                self.lcn_cache.insert(service_id, lcn);
            }
            log::info!(
                "NIT: network 0x{:04X} onid 0x{:04X} tsid 0x{:04X} frequency {} Hz modulation {}",
                record.network_id,
                record.original_network_id,
                record.transport_stream_id,
                record.frequency_hz,
                record.modulation
            );
            log_store_error("NIT info", self.store.insert_nit_info(&record));
        }
        Ok(())
    }

    fn handle_bat(&mut self, header: &PsiHeader, body: &[u8]) -> Result<()> {
        let bouquet_id = header.table_id_extension;
        let bat = parse_bat(body, bouquet_id)?;

        let admitted = self.bat_versions.admit(
            BouquetId(bouquet_id),
            header.version_number,
            header.section_number,
            header.last_section_number,
        );
        if !admitted.is_accepted() {
            return Ok(());
        }

        for transport in &bat.transports {
            log::debug!("BAT 0x{:04X}: transport {:?}", bouquet_id, transport.join_key());
            self.known_transports.insert(transport.join_key());
        }
        Ok(())
    }

    fn handle_sdt(&mut self, header: &PsiHeader, body: &[u8]) -> Result<()> {
        let transport_stream_id = header.table_id_extension;
        let sdt = parse_sdt(body)?;
        let key = JoinKey::new(sdt.original_network_id, transport_stream_id);

        if !self.known_transports.contains(&key) {
            log::debug!("SDT: transport {:?} not announced yet", key);
            return Ok(());
        }

        let admitted = self.sdt_versions.admit(
            key,
            header.version_number,
            header.section_number,
            header.last_section_number,
        );
        if !admitted.is_accepted() {
            return Ok(());
        }
        if admitted == AdmitResult::AcceptAndComplete {
            log::debug!("SDT {:?} version {} complete", key, header.version_number);
        }

        let (frequency_hz, modulation) = match self.store.frequency_and_modulation(key) {
            Ok(found) => found.unwrap_or((0, 0)),
            Err(e) => {
                log::error!("Failed to read NIT info for {:?}: {}", key, e);
                (0, 0)
            }
        };

        for service in &sdt.services {
            let service_id = service.service_id;
            self.known_services.insert(ServiceKey::new(
                key.original_network_id,
                transport_stream_id,
                service_id,
            ));

            match self.store.is_service_in_ts_info(service_id) {
                Ok(true) => {}
                Ok(false) => {
                    log::trace!("SDT: service 0x{:04X} not in TS info", service_id);
                    continue;
                }
                Err(e) => {
                    log::error!("Failed to read TS info: {}", e);
                    continue;
                }
            }

            let lcn = self.resolve_lcn(service_id, transport_stream_id);
            let record = ChannelRecord {
                lcn: lcn.to_string(),
                frequency_mhz: frequency_hz / 1_000_000,
                modulation,
                name: service.service_name.clone().unwrap_or_default(),
                service_id,
                transport_stream_id,
                original_network_id: key.original_network_id,
                program_number: service_id,
                language: String::new(),
            };
            log::info!(
                "SDT: channel {} '{}' service 0x{:04X} at {} MHz",
                record.lcn,
                record.name,
                service_id,
                record.frequency_mhz
            );
            log_store_error("channel info", self.store.insert_channel_info(&record));
        }
        Ok(())
    }

    /// LCN from the broadcast descriptor, the stored channel table, or the
    /// next free sequential number, in that order.
    fn resolve_lcn(&mut self, service_id: u16, transport_stream_id: u16) -> u16 {
        if let Some(lcn) = self.lcn(service_id) {
            return lcn;
        }
        let next = next_sequential_lcn(self.lcn_cache.len());
        let lcn = match self.store.channel_lcn(service_id, transport_stream_id) {
            Ok(Some(lcn)) => lcn,
            Ok(None) => next,
            Err(e) => {
                log::error!("Failed to read channel table: {}", e);
                next
            }
        };
        self.lcn_cache.insert(service_id, lcn);
        lcn
    }

    fn handle_eit(&mut self, header: &PsiHeader, body: &[u8]) -> Result<()> {
        let eit = parse_eit(body, header.table_id_extension)?;
        let key = eit.service_key();

        if !self.known_services.contains(&key) {
            log::debug!("EIT: service {:?} not described yet", key);
            return Ok(());
        }

        let admitted = self.eit_versions.admit(
            (key, header.table_id),
            header.version_number,
            header.section_number,
            header.last_section_number,
        );
        if !admitted.is_accepted() {
            return Ok(());
        }
        if admitted == AdmitResult::AcceptAndComplete {
            log::trace!(
                "EIT 0x{:02X} {:?} version {} complete",
                header.table_id,
                key,
                header.version_number
            );
        }

        for event in &eit.events {
            let Some(start) = event.start_time else {
                log::trace!("EIT: event 0x{:04X} has no start time", event.event_id);
                continue;
            };
            let record = ProgramRecord {
                service_id: eit.service_id,
                event_id: event.event_id,
                start: start + self.local_offset_at(start),
                duration: event.duration,
                title: event.title.clone(),
                rating: String::new(),
                genre: event.genre.clone(),
                subtitle_languages: event.subtitle_languages.clone(),
                audio_languages: event.audio_languages.clone(),
            };
            log_store_error("program info", self.store.insert_program_info(&record));
        }
        Ok(())
    }

    fn local_offset_at(&self, start: DateTime<Utc>) -> Duration {
        match &self.local_time_offset {
            Some(offset) => offset.effective_offset(self.reference_time.unwrap_or(start)),
            None => Duration::zero(),
        }
    }

    fn handle_tdt(&mut self, body: &[u8]) -> Result<()> {
        match parse_tdt(body)? {
            Some(utc) => self.apply_time(utc),
            None => log::debug!("TDT carries an undefined time"),
        }
        Ok(())
    }

    fn handle_tot(&mut self, body: &[u8]) -> Result<()> {
        let tot = parse_tot(body)?;
        let Some(utc) = tot.utc_time else {
            log::debug!("TOT carries an undefined time");
            return Ok(());
        };
        self.apply_time(utc);

        if let Some(country_code) = self.config.country_code {
            if let Some(offset) = tot.find_offset(&country_code, self.config.country_region_id) {
                log::info!(
                    "Local time offset: {}{} min, next {} min",
                    if offset.polarity == 1 { "-" } else { "+" },
                    offset.offset.num_minutes(),
                    offset.next_offset.num_minutes()
                );
                self.local_time_offset = Some(offset);
            }
        }
        Ok(())
    }

    /// Establish time for this transport and hand it to the tuner. Housekeeping
    /// starts only when the tuner accepts the time.
    fn apply_time(&mut self, utc: DateTime<Utc>) {
        self.time_established = true;
        self.reference_time = Some(utc);
        if !self.handler.set_reference_time(utc) {
            log::warn!("Failed to apply broadcast time {}", utc);
            return;
        }
        log::info!("Broadcast time: {}", utc);
        self.handler.start_timer();
    }
}

/// One past the number of known services, saturating at `u16::MAX`.
fn next_sequential_lcn(known: usize) -> u16 {
    u16::try_from(known)
        .ok()
        .and_then(|n| n.checked_add(1))
        .unwrap_or(u16::MAX)
}

fn log_store_error(what: &str, result: StoreResult<()>) {
    if let Err(e) = result {
        log::error!("Failed to store {}: {}", what, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SiError, StoreError};
    use crate::records::{NetworkRecord, TsInfoRecord};
    use crate::si::descriptor_tag;
    use crate::si::eit::{build_eit_body, short_event_descriptor};
    use crate::si::nit::build_transport_body;
    use crate::si::psi::{build_section, build_short_section};
    use crate::si::sdt::build_sdt_body;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    const FREQ: u32 = 450_000_000;
    const REFERENCE: [u8; 5] = [0xCC, 0x04, 0x21, 0x00, 0x00];

    struct FakeHandler {
        ts_info_present: AtomicBool,
        scanning: AtomicBool,
        accept_time: AtomicBool,
        started: Mutex<Vec<u16>>,
        stopped: Mutex<Vec<u16>>,
        times: Mutex<Vec<DateTime<Utc>>>,
        timers: AtomicUsize,
    }

    impl Default for FakeHandler {
        fn default() -> Self {
            Self {
                ts_info_present: AtomicBool::new(true),
                scanning: AtomicBool::new(false),
                accept_time: AtomicBool::new(true),
                started: Mutex::new(Vec::new()),
                stopped: Mutex::new(Vec::new()),
                times: Mutex::new(Vec::new()),
                timers: AtomicUsize::new(0),
            }
        }
    }

    impl SiHandler for FakeHandler {
        fn start_filter(&self, pid: u16) {
            self.started.lock().unwrap().push(pid);
        }
        fn stop_filter(&self, pid: u16) {
            self.stopped.lock().unwrap().push(pid);
        }
        fn stop_filters(&self) {}
        fn set_home_ts(&self, _frequency: u32, _secondary: u32) {}
        fn is_ts_info_present(&self) -> bool {
            self.ts_info_present.load(Ordering::SeqCst)
        }
        fn is_scanning(&self) -> bool {
            self.scanning.load(Ordering::SeqCst)
        }
        fn start_timer(&self) {
            self.timers.fetch_add(1, Ordering::SeqCst);
        }
        fn set_reference_time(&self, utc: DateTime<Utc>) -> bool {
            self.times.lock().unwrap().push(utc);
            self.accept_time.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct StoreState {
        nit: Vec<NetworkRecord>,
        nit_inserts: usize,
        channels: Vec<ChannelRecord>,
        programs: Vec<ProgramRecord>,
        ts_info: Vec<TsInfoRecord>,
        fail_writes: bool,
    }

    #[derive(Default)]
    struct FakeStore {
        state: Mutex<StoreState>,
    }

    impl FakeStore {
        fn check_writable(state: &StoreState) -> StoreResult<()> {
            if state.fail_writes {
                return Err(StoreError::Unavailable("read-only".to_string()));
            }
            Ok(())
        }
    }

    impl EpgStore for FakeStore {
        fn create_nit_table(&self) -> StoreResult<()> {
            Ok(())
        }
        fn create_channel_table(&self) -> StoreResult<()> {
            Ok(())
        }
        fn create_program_table(&self) -> StoreResult<()> {
            Ok(())
        }
        fn insert_nit_info(&self, record: &NetworkRecord) -> StoreResult<()> {
            let mut state = self.state.lock().unwrap();
            Self::check_writable(&state)?;
            state.nit_inserts += 1;
            if !state.nit.iter().any(|n| n.join_key() == record.join_key()) {
                state.nit.push(record.clone());
            }
            Ok(())
        }
        fn insert_channel_info(&self, record: &ChannelRecord) -> StoreResult<()> {
            let mut state = self.state.lock().unwrap();
            Self::check_writable(&state)?;
            if !state.channels.iter().any(|c| {
                c.service_id == record.service_id
                    && c.transport_stream_id == record.transport_stream_id
            }) {
                state.channels.push(record.clone());
            }
            Ok(())
        }
        fn insert_program_info(&self, record: &ProgramRecord) -> StoreResult<()> {
            let mut state = self.state.lock().unwrap();
            Self::check_writable(&state)?;
            state.programs.retain(|p| {
                !(p.service_id == record.service_id
                    && p.event_id == record.event_id
                    && p.start == record.start)
            });
            state.programs.push(record.clone());
            Ok(())
        }
        fn insert_ts_info(&self, record: &TsInfoRecord) -> StoreResult<()> {
            let mut state = self.state.lock().unwrap();
            Self::check_writable(&state)?;
            state.ts_info.push(record.clone());
            Ok(())
        }
        fn read_frequencies(&self) -> StoreResult<Vec<u32>> {
            Ok(Vec::new())
        }
        fn frequency_and_modulation(&self, key: JoinKey) -> StoreResult<Option<(u32, u8)>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .nit
                .iter()
                .find(|n| n.join_key() == key)
                .map(|n| (n.frequency_hz, n.modulation)))
        }
        fn is_service_in_ts_info(&self, service_id: u16) -> StoreResult<bool> {
            let state = self.state.lock().unwrap();
            Ok(state.ts_info.iter().any(|t| t.program_number == service_id))
        }
        fn channel_lcn(&self, service_id: u16, transport_stream_id: u16) -> StoreResult<Option<u16>> {
            let state = self.state.lock().unwrap();
            Ok(state
                .channels
                .iter()
                .find(|c| c.service_id == service_id && c.transport_stream_id == transport_stream_id)
                .and_then(|c| c.lcn.parse().ok()))
        }
    }

    struct Fixture {
        handler: Arc<FakeHandler>,
        store: Arc<FakeStore>,
        parser: SiParser,
    }

    fn fixture_with(config: ParserConfig) -> Fixture {
        let handler = Arc::new(FakeHandler::default());
        let store = Arc::new(FakeStore::default());
        let parser = SiParser::new(config, handler.clone(), store.clone());
        Fixture {
            handler,
            store,
            parser,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ParserConfig::default())
    }

    fn pat_section() -> Vec<u8> {
        build_section(table_id::PAT, 100, 0, 0, 0, &[0x00, 0x01, 0xE0, 0x20])
    }

    fn pmt_section() -> Vec<u8> {
        let body = [0xE1, 0x00, 0xF0, 0x00, 0x02, 0xE1, 0x00, 0xF0, 0x00];
        build_section(table_id::PMT, 1, 0, 0, 0, &body)
    }

    fn cable_descriptor() -> Vec<u8> {
        let mut data = vec![descriptor_tag::CABLE_DELIVERY_SYSTEM, 11, 0x04, 0x50, 0x00, 0x00];
        data.extend_from_slice(&[0xFF, 0xF2, 0x08, 0x00, 0x69, 0x00, 0x03]);
        data
    }

    fn nit_section(version: u8, transports: &[(u16, u16, Vec<u8>)]) -> Vec<u8> {
        let body = build_transport_body(&[], transports);
        build_section(table_id::NIT_ACTUAL, 1, version, 0, 0, &body)
    }

    fn sdt_section(version: u8) -> Vec<u8> {
        let body = build_sdt_body(1, &[(1, 4, "Channel One")]);
        build_section(table_id::SDT_ACTUAL, 100, version, 0, 0, &body)
    }

    fn tdt_section(time: [u8; 5]) -> Vec<u8> {
        build_short_section(table_id::TDT, &time, false)
    }

    fn eit_section(start: [u8; 5]) -> Vec<u8> {
        let body = build_eit_body(100, 1, &[(42, start, [0x00, 0x30, 0x00], short_event_descriptor("Movie"))]);
        build_section(table_id::EIT_PF_ACTUAL, 1, 0, 0, 0, &body)
    }

    /// PAT, PMT, NIT, SDT and TDT: everything an EIT needs.
    fn prime(f: &mut Fixture) {
        f.parser.dispatch(&pat_section(), FREQ);
        f.parser.dispatch(&pmt_section(), FREQ);
        f.parser.dispatch(&nit_section(0, &[(100, 1, cable_descriptor())]), FREQ);
        f.parser.dispatch(&sdt_section(0), FREQ);
        f.parser.dispatch(&tdt_section(REFERENCE), FREQ);
    }

    #[test]
    fn test_end_to_end_scenario() {
        let mut f = fixture();
        prime(&mut f);
        f.parser.dispatch(&eit_section(REFERENCE), FREQ);

        assert_eq!(f.parser.pmt_pid(1), Some(0x20));
        let state = f.store.state.lock().unwrap();
        assert_eq!(state.ts_info.len(), 1);
        assert_eq!(state.ts_info[0].pmt_pid, 0x20);

        assert_eq!(state.channels.len(), 1);
        let channel = &state.channels[0];
        assert_eq!(channel.service_id, 1);
        assert_eq!(channel.name, "Channel One");
        assert_eq!(channel.frequency_mhz, 450);
        assert_eq!(channel.modulation, 8);
        assert_eq!(channel.lcn, "1");

        assert_eq!(state.programs.len(), 1);
        let program = &state.programs[0];
        assert_eq!(program.event_id, 42);
        assert_eq!(program.start, Utc.with_ymd_and_hms(2001, 11, 15, 21, 0, 0).unwrap());
        assert_eq!(program.duration, Duration::seconds(1800));
        assert_eq!(program.title, "Movie");
    }

    #[test]
    fn test_length_mismatch_produces_nothing() {
        let mut f = fixture();
        let mut section = pat_section();
        section.push(0x00);
        assert!(matches!(
            f.parser.try_dispatch(&section, FREQ),
            Err(SiError::LengthMismatch { .. })
        ));
        assert_eq!(f.parser.pmt_pid(1), None);
        assert!(f.handler.started.lock().unwrap().is_empty());
    }

    #[test]
    fn test_crc_mismatch_produces_nothing() {
        let mut f = fixture();
        let mut section = pat_section();
        section[9] ^= 0x02;
        assert!(matches!(
            f.parser.try_dispatch(&section, FREQ),
            Err(SiError::CrcMismatch { .. })
        ));
        assert_eq!(f.parser.pmt_pid(1), None);
    }

    #[test]
    fn test_crc_check_can_be_disabled() {
        let mut f = fixture_with(ParserConfig {
            verify_crc: false,
            ..ParserConfig::default()
        });
        let mut section = pat_section();
        let last = section.len() - 1;
        section[last] ^= 0xFF;
        f.parser.dispatch(&section, FREQ);
        assert_eq!(f.parser.pmt_pid(1), Some(0x20));
    }

    #[test]
    fn test_pat_starts_pmt_filter_once() {
        let mut f = fixture();
        f.parser.dispatch(&pat_section(), FREQ);
        f.parser.dispatch(&pat_section(), FREQ);
        assert_eq!(*f.handler.started.lock().unwrap(), vec![0x20]);

        // A new transport needs the filter again.
        f.parser.dispatch(&pat_section(), FREQ + 8_000_000);
        assert_eq!(*f.handler.started.lock().unwrap(), vec![0x20, 0x20]);
    }

    #[test]
    fn test_duplicate_nit_is_noop() {
        let mut f = fixture();
        let section = nit_section(0, &[(100, 1, cable_descriptor())]);
        f.parser.dispatch(&section, FREQ);
        f.parser.dispatch(&section, FREQ);
        f.parser.dispatch(&section, FREQ);
        assert_eq!(f.store.state.lock().unwrap().nit_inserts, 1);

        // A new version is processed again.
        f.parser.dispatch(&nit_section(1, &[(100, 1, cable_descriptor())]), FREQ);
        assert_eq!(f.store.state.lock().unwrap().nit_inserts, 2);
    }

    #[test]
    fn test_sdt_without_nit_produces_no_channels() {
        let mut f = fixture();
        f.parser.dispatch(&pat_section(), FREQ);
        f.parser.dispatch(&pmt_section(), FREQ);
        f.parser.dispatch(&sdt_section(0), FREQ);
        assert!(f.store.state.lock().unwrap().channels.is_empty());
    }

    #[test]
    fn test_sdt_withheld_while_scanning() {
        let mut f = fixture();
        f.handler.scanning.store(true, Ordering::SeqCst);
        prime(&mut f);
        assert!(f.store.state.lock().unwrap().channels.is_empty());

        // Not admitted while withheld, so it is accepted later.
        f.handler.scanning.store(false, Ordering::SeqCst);
        f.parser.dispatch(&sdt_section(0), FREQ);
        assert_eq!(f.store.state.lock().unwrap().channels.len(), 1);
    }

    #[test]
    fn test_sdt_service_outside_ts_info_not_stored() {
        let mut f = fixture();
        f.parser.dispatch(&nit_section(0, &[(100, 1, cable_descriptor())]), FREQ);
        f.parser.dispatch(&sdt_section(0), FREQ);
        f.parser.dispatch(&tdt_section(REFERENCE), FREQ);
        // The service is still known for EIT purposes.
        f.parser.dispatch(&eit_section(REFERENCE), FREQ);

        let state = f.store.state.lock().unwrap();
        assert!(state.channels.is_empty());
        assert_eq!(state.programs.len(), 1);
    }

    #[test]
    fn test_eit_without_sdt_produces_no_programs() {
        let mut f = fixture();
        f.parser.dispatch(&nit_section(0, &[(100, 1, cable_descriptor())]), FREQ);
        f.parser.dispatch(&tdt_section(REFERENCE), FREQ);
        f.parser.dispatch(&eit_section(REFERENCE), FREQ);
        assert!(f.store.state.lock().unwrap().programs.is_empty());
    }

    #[test]
    fn test_eit_withheld_until_time_established() {
        let mut f = fixture();
        f.parser.dispatch(&pat_section(), FREQ);
        f.parser.dispatch(&pmt_section(), FREQ);
        f.parser.dispatch(&nit_section(0, &[(100, 1, cable_descriptor())]), FREQ);
        f.parser.dispatch(&sdt_section(0), FREQ);
        f.parser.dispatch(&eit_section(REFERENCE), FREQ);
        assert!(f.store.state.lock().unwrap().programs.is_empty());

        f.parser.dispatch(&tdt_section(REFERENCE), FREQ);
        f.parser.dispatch(&eit_section(REFERENCE), FREQ);
        assert_eq!(f.store.state.lock().unwrap().programs.len(), 1);
    }

    #[test]
    fn test_duplicate_eit_skipped() {
        let mut f = fixture();
        prime(&mut f);
        f.parser.dispatch(&eit_section(REFERENCE), FREQ);
        f.store.state.lock().unwrap().programs.clear();
        f.parser.dispatch(&eit_section(REFERENCE), FREQ);
        assert!(f.store.state.lock().unwrap().programs.is_empty());
    }

    #[test]
    fn test_undefined_event_start_skipped() {
        let mut f = fixture();
        prime(&mut f);
        f.parser.dispatch(&eit_section([0xFF; 5]), FREQ);
        assert!(f.store.state.lock().unwrap().programs.is_empty());
    }

    #[test]
    fn test_tdt_applied_once_per_frequency() {
        let mut f = fixture();
        f.parser.dispatch(&tdt_section(REFERENCE), FREQ);
        f.parser.dispatch(&tdt_section(REFERENCE), FREQ);
        assert_eq!(f.handler.times.lock().unwrap().len(), 1);
        assert_eq!(f.handler.timers.load(Ordering::SeqCst), 1);
        assert!(f.parser.is_time_established());

        f.parser.dispatch(&tdt_section(REFERENCE), FREQ + 8_000_000);
        assert_eq!(f.handler.times.lock().unwrap().len(), 2);
        assert_eq!(f.parser.current_frequency(), Some(FREQ + 8_000_000));
    }

    #[test]
    fn test_rejected_time_still_admits_eit() {
        let mut f = fixture();
        f.handler.accept_time.store(false, Ordering::SeqCst);
        f.parser.dispatch(&pat_section(), FREQ);
        f.parser.dispatch(&pmt_section(), FREQ);
        f.parser.dispatch(&nit_section(0, &[(100, 1, cable_descriptor())]), FREQ);
        f.parser.dispatch(&sdt_section(0), FREQ);
        f.parser.dispatch(&tdt_section(REFERENCE), FREQ);
        assert!(f.parser.is_time_established());
        assert_eq!(
            f.parser.reference_time(),
            Some(Utc.with_ymd_and_hms(2001, 11, 15, 21, 0, 0).unwrap())
        );
        assert_eq!(f.handler.timers.load(Ordering::SeqCst), 0);

        f.parser.dispatch(&eit_section(REFERENCE), FREQ);
        assert_eq!(f.store.state.lock().unwrap().programs.len(), 1);
    }

    #[test]
    fn test_undefined_tdt_not_established() {
        let mut f = fixture();
        f.parser.dispatch(&tdt_section([0xFF; 5]), FREQ);
        assert!(!f.parser.is_time_established());
        assert!(f.handler.times.lock().unwrap().is_empty());
    }

    fn tot_section(country: &[u8; 3], polarity: u8, offset_hhmm: [u8; 2]) -> Vec<u8> {
        let mut entry = country.to_vec();
        entry.push(0x02 | polarity);
        entry.extend_from_slice(&offset_hhmm);
        entry.extend_from_slice(&[0xFF; 5]);
        entry.extend_from_slice(&[0x00, 0x00]);
        let mut descriptor = vec![descriptor_tag::LOCAL_TIME_OFFSET, entry.len() as u8];
        descriptor.extend(entry);

        let mut body = REFERENCE.to_vec();
        body.push(0xF0);
        body.push(descriptor.len() as u8);
        body.extend(descriptor);
        build_short_section(table_id::TOT, &body, true)
    }

    #[test]
    fn test_tot_local_offset_shifts_event_start() {
        let mut f = fixture_with(ParserConfig {
            country_code: Some(*b"DEU"),
            ..ParserConfig::default()
        });
        f.parser.dispatch(&pat_section(), FREQ);
        f.parser.dispatch(&pmt_section(), FREQ);
        f.parser.dispatch(&nit_section(0, &[(100, 1, cable_descriptor())]), FREQ);
        f.parser.dispatch(&sdt_section(0), FREQ);
        f.parser.dispatch(&tot_section(b"DEU", 0, [0x01, 0x00]), FREQ);
        assert!(f.parser.is_time_established());
        assert!(f.parser.local_time_offset().is_some());

        f.parser.dispatch(&eit_section(REFERENCE), FREQ);
        let state = f.store.state.lock().unwrap();
        assert_eq!(
            state.programs[0].start,
            Utc.with_ymd_and_hms(2001, 11, 15, 22, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_tot_other_country_ignored() {
        let mut f = fixture_with(ParserConfig {
            country_code: Some(*b"DEU"),
            ..ParserConfig::default()
        });
        f.parser.dispatch(&tot_section(b"FRA", 1, [0x01, 0x00]), FREQ);
        assert!(f.parser.is_time_established());
        assert!(f.parser.local_time_offset().is_none());
    }

    #[test]
    fn test_next_sequential_lcn_saturates() {
        assert_eq!(next_sequential_lcn(0), 1);
        assert_eq!(next_sequential_lcn(41), 42);
        assert_eq!(next_sequential_lcn(65_534), 65_535);
        assert_eq!(next_sequential_lcn(65_535), u16::MAX);
        assert_eq!(next_sequential_lcn(100_000), u16::MAX);
    }

    #[test]
    fn test_lcn_from_nit_descriptor() {
        let mut f = fixture();
        let mut descriptors = cable_descriptor();
        descriptors.extend_from_slice(&[descriptor_tag::LOGICAL_CHANNEL, 4, 0x00, 0x01, 0xFC, 0x0C]);
        f.parser.dispatch(&pat_section(), FREQ);
        f.parser.dispatch(&pmt_section(), FREQ);
        f.parser.dispatch(&nit_section(0, &[(100, 1, descriptors)]), FREQ);
        f.parser.dispatch(&sdt_section(0), FREQ);
        assert_eq!(f.store.state.lock().unwrap().channels[0].lcn, "12");
    }

    #[test]
    fn test_lcn_reused_from_channel_table() {
        let mut f = fixture();
        f.store.state.lock().unwrap().channels.push(ChannelRecord {
            lcn: "7".to_string(),
            frequency_mhz: 450,
            modulation: 8,
            name: "Channel One".to_string(),
            service_id: 1,
            transport_stream_id: 100,
            original_network_id: 1,
            program_number: 1,
            language: String::new(),
        });
        prime(&mut f);
        assert_eq!(f.parser.lcn(1), Some(7));
    }

    #[test]
    fn test_store_failure_does_not_stop_parsing() {
        let mut f = fixture();
        f.store.state.lock().unwrap().fail_writes = true;
        f.parser.dispatch(&nit_section(0, &[(100, 1, cable_descriptor())]), FREQ);
        // State advanced despite the failed write.
        f.store.state.lock().unwrap().fail_writes = false;
        f.parser.dispatch(&nit_section(0, &[(100, 1, cable_descriptor())]), FREQ);
        assert_eq!(f.store.state.lock().unwrap().nit_inserts, 0);
    }

    #[test]
    fn test_bouquet_strategy_filters_nit() {
        let mut f = fixture_with(ParserConfig {
            join_strategy: JoinStrategy::Bouquet,
            ..ParserConfig::default()
        });
        f.parser.dispatch(&nit_section(0, &[(100, 1, cable_descriptor())]), FREQ);
        assert!(f.store.state.lock().unwrap().nit.is_empty());

        let bat_body = build_transport_body(&[], &[(100, 1, Vec::new())]);
        f.parser.dispatch(&build_section(table_id::BAT, 0x2000, 0, 0, 0, &bat_body), FREQ);
        f.parser.dispatch(&nit_section(1, &[(100, 1, cable_descriptor())]), FREQ);
        assert_eq!(f.store.state.lock().unwrap().nit.len(), 1);
    }

    #[test]
    fn test_bat_ignored_with_network_strategy() {
        let mut f = fixture();
        let bat_body = build_transport_body(&[], &[(100, 1, Vec::new())]);
        f.parser.dispatch(&build_section(table_id::BAT, 0x2000, 0, 0, 0, &bat_body), FREQ);
        f.parser.dispatch(&pat_section(), FREQ);
        f.parser.dispatch(&pmt_section(), FREQ);
        f.parser.dispatch(&sdt_section(0), FREQ);
        assert!(f.store.state.lock().unwrap().channels.is_empty());
    }

    #[test]
    fn test_ingest_strips_frequency_prefix() {
        let mut f = fixture();
        f.parser.ingest(&frame_section(FREQ, &pat_section()));
        assert_eq!(f.parser.current_frequency(), Some(FREQ));
        assert_eq!(f.parser.pmt_pid(1), Some(0x20));

        f.parser.ingest(&[0x01, 0x02]);
        assert_eq!(f.parser.current_frequency(), Some(FREQ));
    }

    #[test]
    fn test_unknown_table_ignored() {
        let mut f = fixture();
        let section = build_section(0x7E, 1, 0, 0, 0, &[0x00]);
        assert!(f.parser.try_dispatch(&section, FREQ).is_ok());
    }

    #[test]
    fn test_base_filters() {
        let f = fixture();
        f.parser.start_base_filters();
        assert_eq!(*f.handler.started.lock().unwrap(), vec![0x11, 0x10, 0x12, 0x14]);
        f.parser.stop_base_filters();
        assert_eq!(f.handler.stopped.lock().unwrap().len(), 4);
    }
}
