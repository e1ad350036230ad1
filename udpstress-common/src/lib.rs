use std::time::Duration;

use rand::Rng;

mod stats;
pub use stats::{Stats, StatsSnapshot};

/// Returns a random timeout in `(0, bound]` with microsecond resolution.
///
/// A zero bound yields a zero timeout.
#[inline]
pub fn random_timeout(bound: Duration) -> Duration {
    let max = bound.as_micros().min(u64::MAX as u128) as u64;
    if max == 0 {
        return Duration::ZERO;
    }

    Duration::from_micros(rand::thread_rng().gen_range(1..=max))
}

/// Returns `true` with a probability of `percentage` percent. Values above 100
/// always succeed.
#[inline]
pub fn roll_percentage(percentage: u8) -> bool {
    match percentage {
        0 => false,
        p if p >= 100 => true,
        p => rand::thread_rng().gen_range(0..100u8) < p,
    }
}

pub mod constants {
    use std::time::Duration;

    /// Descriptors kept free on top of the configured flow count.
    pub const DESCRIPTOR_MARGIN: u64 = 10;

    /// Period of the statistics report.
    pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

    /// The report header is repeated after this many rows.
    pub const HEADER_EVERY: usize = 20;

    /// Largest UDP payload that fits into an IPv4 datagram.
    pub const MAX_PAYLOAD: usize = 65507;
}
