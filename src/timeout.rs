//! Connect/read/total timeout budgets with a monotonic clock.

use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// A single timeout value: either a finite duration, an explicit "no
/// timeout", or the sentinel "use the ambient process default".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// Use the `Manager`-wide default in force at request time.
    Default,
    /// No timeout at all.
    None,
    /// A finite, strictly-positive duration.
    Finite(Duration),
}

impl Bound {
    fn resolve(self, default: Duration) -> Option<Duration> {
        match self {
            Bound::Default => Some(default),
            Bound::None => None,
            Bound::Finite(d) => Some(d),
        }
    }
}

/// Split connect/read/total timeout budget, per spec §3/§4.3.
///
/// `start_connect()` records a monotonic instant; subsequent calls to
/// [`Timeout::read_timeout`] derive `min(read, total - elapsed)`, so a slow
/// connect eats into the read budget rather than allowing the two to
/// overrun independently.
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    connect: Bound,
    read: Bound,
    total: Bound,
    start_time: Option<Instant>,
}

/// The ambient process default used to resolve [`Bound::Default`] when no
/// more specific value is configured. 10s connect / 30s read / no total cap,
/// a conservative default in the spirit of most blocking HTTP clients.
pub const PROCESS_DEFAULT_CONNECT: Duration = Duration::from_secs(10);
pub const PROCESS_DEFAULT_READ: Duration = Duration::from_secs(30);

impl Default for Timeout {
    fn default() -> Self {
        Timeout {
            connect: Bound::Default,
            read: Bound::Default,
            total: Bound::None,
            start_time: None,
        }
    }
}

impl Timeout {
    /// A `Timeout` with no limits at all.
    pub fn none() -> Self {
        Timeout {
            connect: Bound::None,
            read: Bound::None,
            total: Bound::None,
            start_time: None,
        }
    }

    /// Constructs a `Timeout` from explicit bounds. Rejects non-positive
    /// finite durations with [`Error::invalid_timeout`] -- the Rust
    /// equivalent of the distilled spec's "non-positive numeric, boolean, or
    /// non-numeric non-None" rejection (a `Duration` cannot be negative or
    /// boolean by construction, so only the zero case needs checking).
    pub fn new(connect: Bound, read: Bound, total: Bound) -> Result<Self> {
        for b in [connect, read, total] {
            if let Bound::Finite(d) = b {
                if d.is_zero() {
                    return Err(Error::invalid_timeout("timeout duration must be positive"));
                }
            }
        }
        Ok(Timeout {
            connect,
            read,
            total,
            start_time: None,
        })
    }

    /// A `Timeout` with all three budgets set to the same finite duration.
    pub fn from_duration(d: Duration) -> Result<Self> {
        Timeout::new(Bound::Finite(d), Bound::Finite(d), Bound::Finite(d))
    }

    /// Records "now" as the connect start, per spec: must be called once,
    /// before the first readiness wait of a connection attempt.
    pub fn start_connect(&mut self) {
        self.start_time = Some(Instant::now());
    }

    /// The resolved connect budget, or `None` for "no limit".
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect.resolve(PROCESS_DEFAULT_CONNECT)
    }

    /// The resolved read budget: `min(read, total - elapsed)` once
    /// `start_connect` has been called; just `read` otherwise. Returns
    /// `Err` (mapped by callers to a `ReadTimeout`/`TotalTimeout`) if the
    /// total budget has already been exhausted.
    pub fn read_timeout(&self) -> Result<Option<Duration>> {
        let read = self.read.resolve(PROCESS_DEFAULT_READ);
        let total = match self.total {
            Bound::None => None,
            other => {
                let total_budget = other.resolve(PROCESS_DEFAULT_READ).unwrap();
                let elapsed = self
                    .start_time
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= total_budget {
                    return Err(Error::total_timeout(elapsed));
                }
                Some(total_budget - elapsed)
            }
        };
        Ok(match (read, total) {
            (Some(r), Some(t)) => Some(r.min(t)),
            (Some(r), None) => Some(r),
            (None, Some(t)) => Some(t),
            (None, None) => None,
        })
    }

    /// Time elapsed since [`Timeout::start_connect`] was called, or zero.
    pub fn elapsed(&self) -> Duration {
        self.start_time.map(|t| t.elapsed()).unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn zero_duration_is_invalid() {
        assert!(Timeout::new(Bound::Finite(Duration::ZERO), Bound::Default, Bound::None).is_err());
    }

    #[test]
    fn read_timeout_shrinks_as_total_budget_is_consumed() {
        let mut t = Timeout::new(
            Bound::Finite(Duration::from_secs(5)),
            Bound::Finite(Duration::from_secs(5)),
            Bound::Finite(Duration::from_millis(50)),
        )
        .unwrap();
        t.start_connect();
        thread::sleep(Duration::from_millis(10));
        let remaining = t.read_timeout().unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(5));
        assert!(remaining <= Duration::from_millis(50));
    }

    #[test]
    fn total_exhausted_after_start_connect_errors() {
        let mut t = Timeout::new(
            Bound::Default,
            Bound::Default,
            Bound::Finite(Duration::from_millis(1)),
        )
        .unwrap();
        t.start_connect();
        thread::sleep(Duration::from_millis(20));
        assert!(t.read_timeout().is_err());
    }

    #[test]
    fn none_timeout_has_no_bounds() {
        let t = Timeout::none();
        assert_eq!(t.connect_timeout(), None);
        assert_eq!(t.read_timeout().unwrap(), None);
    }
}
