/*!
 * Syscall Trace Log
 * Fixed-capacity record of dispatched calls and their latency
 */

use std::fmt::Write as _;
use std::time::Duration;

use crate::abi::sysno;

/// One traced call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    pub nr: usize,
    pub start: Duration,
    pub end: Duration,
}

impl TraceEntry {
    #[inline]
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }

    /// Line written to the debug channel when the log is drained
    pub fn render(&self, index: usize) -> String {
        let mut line = String::with_capacity(64);
        let _ = writeln!(
            line,
            "[{:>4}] {}({}) {} ns",
            index,
            sysno::name_of(self.nr),
            self.nr,
            self.duration().as_nanos()
        );
        line
    }
}

/// Trace buffer plus the running total of time spent in dispatched calls
///
/// Both only exist between `enable` and `drain`. Calls beyond the capacity
/// still count towards the total but are not recorded.
#[derive(Debug, Default)]
pub struct Tracer {
    entries: Option<Vec<TraceEntry>>,
    capacity: usize,
    total: Duration,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracing with room for `max` entries, discarding any previous log
    pub fn enable(&mut self, max: usize) {
        self.entries = Some(Vec::with_capacity(max));
        self.capacity = max;
        self.total = Duration::ZERO;
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    pub fn record(&mut self, nr: usize, start: Duration, end: Duration) {
        if let Some(entries) = self.entries.as_mut() {
            let entry = TraceEntry { nr, start, end };
            self.total = self.total.saturating_add(entry.duration());
            if entries.len() < self.capacity {
                entries.push(entry);
            }
        }
    }

    /// Time accumulated since tracing was enabled
    #[inline]
    pub fn total(&self) -> Duration {
        self.total
    }

    /// Stop tracing; returns the log in call order and resets the total
    pub fn drain(&mut self) -> Vec<TraceEntry> {
        self.capacity = 0;
        self.total = Duration::ZERO;
        self.entries.take().unwrap_or_default()
    }

    pub fn entries(&self) -> &[TraceEntry] {
        self.entries.as_deref().unwrap_or(&[])
    }
}
