use std::time::Duration;

use tokio::time::Instant;

use crate::core::RegisterCatalog;

/// Next-due instants for every register of a catalog, indexed in catalog order.
///
/// By default a register falls due one period after its previous poll started. An
/// aligned schedule instead books each poll on the next wall-clock multiple of the
/// register's frequency, so a 30 s register is read at :00 and :30.
#[derive(Debug, Clone)]
pub struct Schedule {
    entries: Vec<Entry>,
    start: Instant,
    /// Wall-clock time at `start`, as time since the Unix epoch.
    alignment: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    frequency: Duration,
    next_due: Instant,
}

impl Schedule {
    /// Every register starts out due at `start`.
    pub fn new(catalog: &RegisterCatalog, start: Instant) -> Schedule {
        Schedule {
            entries: catalog
                .iter()
                .map(|r| Entry {
                    frequency: r.frequency,
                    next_due: start,
                })
                .collect(),
            start,
            alignment: None,
        }
    }

    /// Aligns polls to wall-clock multiples of each frequency. `wall_clock` is the
    /// time since the Unix epoch at the schedule's start instant.
    pub fn aligned(mut self, wall_clock: Duration) -> Schedule {
        self.alignment = Some(wall_clock);
        self
    }

    /// The earliest due register. Ties go to the register earliest in the catalog.
    pub fn peek(&self) -> Option<(usize, Instant)> {
        self.entries
            .iter()
            .enumerate()
            .min_by_key(|(_, entry)| entry.next_due)
            .map(|(index, entry)| (index, entry.next_due))
    }

    /// Every register due at or before `now`, in catalog order.
    pub fn due(&self, now: Instant) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.next_due <= now)
            .map(|(index, _)| index)
            .collect()
    }

    /// Books the next poll of `index` after the poll that `started`: one period later,
    /// or on the next period boundary when aligned.
    pub fn complete(&mut self, index: usize, started: Instant) {
        let alignment = self.alignment;
        let start = self.start;

        if let Some(entry) = self.entries.get_mut(index) {
            entry.next_due = match alignment {
                Some(wall_clock) => {
                    let now = wall_clock + started.saturating_duration_since(start);
                    started + Schedule::until_boundary(now, entry.frequency)
                }
                None => started + entry.frequency,
            };
        }
    }

    /// Time from `now` to the next multiple of `period`. A time sitting exactly on a
    /// boundary waits a full period.
    fn until_boundary(now: Duration, period: Duration) -> Duration {
        let period_nanos = period.as_nanos().max(1);
        let remaining = period_nanos - now.as_nanos() % period_nanos;

        u64::try_from(remaining)
            .map(Duration::from_nanos)
            .unwrap_or(period)
    }

    pub fn next_due(&self, index: usize) -> Option<Instant> {
        self.entries.get(index).map(|entry| entry.next_due)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
