//! Background tasks.
//!
//! - [`FrequencyMonitor`]: follows the stored frequency list
//! - [`Housekeeping`]: removes expired programmes once broadcast time is known

pub mod frequency_monitor;
pub mod housekeeping;

pub use frequency_monitor::{FrequencyMonitor, FrequencyMonitorConfig};
pub use housekeeping::{BroadcastClock, Housekeeping, HousekeepingConfig};
