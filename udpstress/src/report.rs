use std::{
    io::{self, Write},
    pin::Pin,
    sync::Arc,
};

use tokio::{
    signal::unix::{signal, SignalKind},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_stream::{
    wrappers::{IntervalStream, SignalStream},
    Stream, StreamExt,
};
use tracing::error;
use udpstress_common::{
    constants::{HEADER_EVERY, REPORT_INTERVAL},
    Stats, StatsSnapshot,
};

const COLUMNS: [&str; 8] =
    ["open", "send", "snderr", "recv", "rcverr", "error", "sndicmp", "rcvicmp"];

/// Columns shown when ICMP injection is off.
const BASE_COLUMNS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    /// The periodic report, which resets the rate counters.
    Periodic,
    /// A report on request, which leaves them alone.
    Signal,
}

/// Prints the statistics table.
#[derive(Debug, Clone)]
pub struct Reporter {
    stats: Arc<Stats>,
    icmp: bool,
    /// Rows left until the header is repeated.
    rows_until_header: usize,
}

impl Reporter {
    /// Creates a reporter for `stats`. With `icmp` the ICMP columns are included.
    pub fn new(stats: Arc<Stats>, icmp: bool) -> Self {
        Self { stats, icmp, rows_until_header: 0 }
    }

    fn columns(&self) -> usize {
        if self.icmp {
            COLUMNS.len()
        } else {
            BASE_COLUMNS
        }
    }

    /// Formats one row, preceded by the header when it is due or `force_header` is
    /// set.
    pub fn row(&mut self, snapshot: &StatsSnapshot, force_header: bool) -> String {
        let mut out = String::new();

        if self.rows_until_header == 0 || force_header {
            for name in &COLUMNS[..self.columns()] {
                out.push_str(&format!(" {name:>7}"));
            }
            out.push('\n');
            self.rows_until_header = HEADER_EVERY;
        }
        self.rows_until_header -= 1;

        let values = [
            snapshot.open,
            snapshot.send,
            snapshot.send_errors,
            snapshot.recv,
            snapshot.recv_errors,
            snapshot.errors,
            snapshot.icmp_sent,
            snapshot.icmp_received,
        ];
        for value in &values[..self.columns()] {
            out.push_str(&format!(" {value:>7}"));
        }
        out.push('\n');

        out
    }

    /// Prints the current values without resetting anything. Used when a oneshot
    /// run ends.
    pub fn report_final(&mut self) -> io::Result<()> {
        let row = self.row(&self.stats.snapshot(), false);
        print_row(&row)
    }

    /// Reports on every `SIGUSR1` (and `SIGINFO` where the platform has it). With
    /// `periodic`, also reports every second, resetting the rate counters.
    pub async fn run(mut self, periodic: bool) -> io::Result<()> {
        let mut ticks: Pin<Box<dyn Stream<Item = Tick> + Send>> = Box::pin(
            SignalStream::new(signal(SignalKind::user_defined1())?).map(|()| Tick::Signal),
        );

        #[cfg(any(
            target_os = "macos",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        ))]
        {
            let info = SignalStream::new(signal(SignalKind::info())?).map(|()| Tick::Signal);
            ticks = Box::pin(ticks.merge(info));
        }

        if periodic {
            let mut interval = interval(REPORT_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticks = Box::pin(ticks.merge(IntervalStream::new(interval).map(|_| Tick::Periodic)));
        }

        while let Some(tick) = ticks.next().await {
            let row = match tick {
                Tick::Periodic => self.row(&self.stats.take_snapshot(), false),
                Tick::Signal => self.row(&self.stats.snapshot(), true),
            };
            print_row(&row)?;
        }

        Ok(())
    }
}

/// Runs `reporter` in the background. A failure to set it up is logged, the run
/// goes on without statistics.
pub fn spawn_reporter(reporter: Reporter, periodic: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = reporter.run(periodic).await {
            error!(?e, "statistics reporter failed");
        }
    })
}

fn print_row(row: &str) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(row.as_bytes())?;
    stdout.flush()
}
