use std::sync::atomic::{AtomicUsize, Ordering};

/// The statistics registry of one stress run. Mutated by the driver and its flows,
/// drained by the reporter.
///
/// `open` is a gauge and survives reporting. All other counters are rates that
/// [`Stats::take_snapshot`] resets to zero.
#[derive(Debug, Default)]
pub struct Stats {
    /// Currently open flows
    open: AtomicUsize,
    /// Datagrams sent
    send: AtomicUsize,
    /// Failed sends
    send_errors: AtomicUsize,
    /// Datagrams received
    recv: AtomicUsize,
    /// Failed receives
    recv_errors: AtomicUsize,
    /// Requests dropped for any other reason
    errors: AtomicUsize,
    /// Fabricated ICMP errors sent
    icmp_sent: AtomicUsize,
    /// ICMP packets seen on the raw socket
    icmp_received: AtomicUsize,
}

/// A point-in-time copy of [`Stats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub open: usize,
    pub send: usize,
    pub send_errors: usize,
    pub recv: usize,
    pub recv_errors: usize,
    pub errors: usize,
    pub icmp_sent: usize,
    pub icmp_received: usize,
}

impl Stats {
    #[inline]
    pub fn increment_open(&self) {
        self.open.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the open gauge and returns the new value.
    #[inline]
    pub fn decrement_open(&self) -> usize {
        self.open.fetch_sub(1, Ordering::Relaxed) - 1
    }

    #[inline]
    pub fn increment_send(&self) {
        self.send.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_send_errors(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_recv(&self) {
        self.recv.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_recv_errors(&self) {
        self.recv_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_icmp_sent(&self) {
        self.icmp_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_icmp_received(&self) {
        self.icmp_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn open(&self) -> usize {
        self.open.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn send(&self) -> usize {
        self.send.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn send_errors(&self) -> usize {
        self.send_errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn recv(&self) -> usize {
        self.recv.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn recv_errors(&self) -> usize {
        self.recv_errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn icmp_sent(&self) -> usize {
        self.icmp_sent.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn icmp_received(&self) -> usize {
        self.icmp_received.load(Ordering::Relaxed)
    }

    /// Reads every counter without resetting anything.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            open: self.open(),
            send: self.send(),
            send_errors: self.send_errors(),
            recv: self.recv(),
            recv_errors: self.recv_errors(),
            errors: self.errors(),
            icmp_sent: self.icmp_sent(),
            icmp_received: self.icmp_received(),
        }
    }

    /// Reads every counter and resets the rate counters to zero. The open gauge
    /// is left untouched.
    pub fn take_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            open: self.open(),
            send: self.send.swap(0, Ordering::Relaxed),
            send_errors: self.send_errors.swap(0, Ordering::Relaxed),
            recv: self.recv.swap(0, Ordering::Relaxed),
            recv_errors: self.recv_errors.swap(0, Ordering::Relaxed),
            errors: self.errors.swap(0, Ordering::Relaxed),
            icmp_sent: self.icmp_sent.swap(0, Ordering::Relaxed),
            icmp_received: self.icmp_received.swap(0, Ordering::Relaxed),
        }
    }
}
