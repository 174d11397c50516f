//! Selector-based readiness waiting.
//!
//! Generalizes `original_source/urllib3/util/wait.py`'s cascading selector
//! (kqueue > epoll > devpoll > poll > select) to Rust by delegating to
//! `mio`, which already picks the best available backend per platform. This
//! module's job is narrower than `mio::Poll` itself: honor a deadline with
//! PEP-475-style EINTR retry (recompute remaining budget, resume; if the
//! deadline has passed, fail with a timeout), and expose the two boolean
//! readiness queries the rest of the crate actually needs.

use std::io;
use std::time::{Duration, Instant};

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};

const READ_TOKEN: Token = Token(0);
const WRITE_TOKEN: Token = Token(1);
const READ_WRITE_TOKEN: Token = Token(2);

/// Waits until `source` is readable, or `timeout` elapses.
///
/// Returns `Ok(true)` if readable, `Ok(false)` on timeout.
pub fn wait_for_read<S: Source>(source: &mut S, timeout: Option<Duration>) -> io::Result<bool> {
    wait_for(source, Interest::READABLE, READ_TOKEN, timeout)
}

/// Waits until `source` is writable, or `timeout` elapses.
///
/// Returns `Ok(true)` if writable, `Ok(false)` on timeout.
pub fn wait_for_write<S: Source>(source: &mut S, timeout: Option<Duration>) -> io::Result<bool> {
    wait_for(source, Interest::WRITABLE, WRITE_TOKEN, timeout)
}

/// Readiness outcome of [`wait_for_read_or_write`]: which direction(s)
/// became ready. Backs the upload/early-response interleave of
/// `Connection::send_request` (spec §4.6): during upload, the engine waits
/// for read-or-write and services whichever side becomes ready first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// Waits until `source` is readable or writable (or both), or `timeout`
/// elapses. Used to drive the "send and receive concurrently" interleave
/// described in spec §9 as a single-threaded cooperative loop over one
/// selector, rather than spawning async tasks for each direction.
pub fn wait_for_read_or_write<S: Source>(
    source: &mut S,
    timeout: Option<Duration>,
) -> io::Result<Option<Readiness>> {
    let mut poll = Poll::new()?;
    poll.registry()
        .register(source, READ_WRITE_TOKEN, Interest::READABLE | Interest::WRITABLE)?;
    let result = poll_with_eintr_retry(&mut poll, timeout, |events| {
        events.iter().find(|e| e.token() == READ_WRITE_TOKEN).map(|e| Readiness {
            readable: e.is_readable(),
            writable: e.is_writable(),
        })
    });
    let _ = poll.registry().deregister(source);
    result
}

fn wait_for<S: Source>(
    source: &mut S,
    interest: Interest,
    token: Token,
    timeout: Option<Duration>,
) -> io::Result<bool> {
    let mut poll = Poll::new()?;
    poll.registry().register(source, token, interest)?;
    let result = poll_with_eintr_retry(&mut poll, timeout, |events| {
        events.iter().any(|e| e.token() == token)
    });
    let _ = poll.registry().deregister(source);
    result
}

/// Drives a single `Poll::poll` call to completion, honoring a wall-clock
/// deadline across `EINTR` (`io::ErrorKind::Interrupted`) retries -- the
/// direct analogue of `wait.py`'s `while True: ... except InterruptedError:
/// recompute remaining; continue`.
fn poll_with_eintr_retry<T: Default>(
    poll: &mut Poll,
    timeout: Option<Duration>,
    mut on_events: impl FnMut(&Events) -> T,
) -> io::Result<T> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut events = Events::with_capacity(4);
    loop {
        let remaining = match deadline {
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    return Ok(T::default());
                }
                Some(d - now)
            }
            None => None,
        };
        match poll.poll(&mut events, remaining) {
            Ok(()) => return Ok(on_events(&events)),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Readiness {
            readable: false,
            writable: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn wait_for_write_ready_immediately_on_connected_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        client.set_nonblocking(true).unwrap();
        let mut mio_stream = mio::net::TcpStream::from_std(client);
        let ready = wait_for_write(&mut mio_stream, Some(Duration::from_secs(1))).unwrap();
        assert!(ready);
    }

    #[test]
    fn wait_for_read_times_out_when_nothing_arrives() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        client.set_nonblocking(true).unwrap();
        let mut mio_stream = mio::net::TcpStream::from_std(client);
        let ready = wait_for_read(&mut mio_stream, Some(Duration::from_millis(50))).unwrap();
        assert!(!ready);
    }

    #[test]
    fn read_or_write_reports_writable_on_fresh_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        client.set_nonblocking(true).unwrap();
        let mut mio_stream = mio::net::TcpStream::from_std(client);
        let readiness = wait_for_read_or_write(&mut mio_stream, Some(Duration::from_secs(1)))
            .unwrap()
            .expect("should become ready");
        assert!(readiness.writable);
    }
}
