//! Thin macro wrappers around the `log` facade.
//!
//! The crate never links a logging implementation itself; these macros
//! exist only so call sites read `crate::trace!(...)` / `crate::debug!(...)`
//! uniformly, the same way the donor lineage wraps `tracing` behind local
//! `debug!`/`trace!`/`warn!` macros rather than calling the facade directly
//! at every site.

macro_rules! trace {
    ($($arg:tt)+) => {
        ::log::trace!($($arg)+)
    };
}

macro_rules! debug {
    ($($arg:tt)+) => {
        ::log::debug!($($arg)+)
    };
}

macro_rules! warn {
    ($($arg:tt)+) => {
        ::log::warn!($($arg)+)
    };
}

pub(crate) use debug;
pub(crate) use trace;
pub(crate) use warn;
