//! External breath time reference: the collaborator interface and the
//! best-effort fetch context that feeds the tick.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use tracing::debug;

use crate::breath::clock::ExternalSample;

#[derive(Debug, Clone, PartialEq)]
pub enum ClockError {
    /// The request did not answer within its bound.
    Timeout,
    /// The reference could not be reached.
    Unavailable(String),
    /// The reference answered with a non-finite value.
    Invalid(f64),
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockError::Timeout => write!(f, "breath time request timed out"),
            ClockError::Unavailable(why) => write!(f, "breath time unavailable: {why}"),
            ClockError::Invalid(v) => write!(f, "invalid breath time value: {v}"),
        }
    }
}

impl std::error::Error for ClockError {}

/// One bounded request returning a single breath time in seconds.
///
/// Implementations must return within `timeout`. A call that overruns keeps its
/// helper thread alive; at most `MAX_OUTSTANDING_CALLS` such calls are allowed
/// before further requests fail fast with `ClockError::Unavailable`.
pub trait BreathTimeSource: Send + Sync {
    fn fetch(&self, timeout: Duration) -> Result<f64, ClockError>;
}

/// Breath time taken from the system epoch clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBreathClock;

impl BreathTimeSource for SystemBreathClock {
    fn fetch(&self, _timeout: Duration) -> Result<f64, ClockError> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .map_err(|e| ClockError::Unavailable(e.to_string()))
    }
}

/// A reference that is never reachable; the engine runs on the nominal period.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBreathClock;

impl BreathTimeSource for NoBreathClock {
    fn fetch(&self, _timeout: Duration) -> Result<f64, ClockError> {
        Err(ClockError::Unavailable("no breath time reference configured".into()))
    }
}

/// Calls into a source that may still be running, including ones abandoned
/// after a timeout.
pub const MAX_OUTSTANDING_CALLS: usize = 2;

/// Call `source` on a helper thread and give up after `timeout`.
///
/// `outstanding` counts helper threads still inside `source`; it is shared by
/// every caller of the same source.
pub fn fetch_bounded(
    source: Arc<dyn BreathTimeSource>,
    timeout: Duration,
    outstanding: &Arc<AtomicUsize>,
) -> Result<f64, ClockError> {
    if outstanding.fetch_add(1, Ordering::AcqRel) >= MAX_OUTSTANDING_CALLS {
        outstanding.fetch_sub(1, Ordering::AcqRel);
        return Err(ClockError::Unavailable(
            "earlier breath time requests are still running".into(),
        ));
    }
    let (tx, rx) = bounded(1);
    let in_call = outstanding.clone();
    let spawned = thread::Builder::new()
        .name("breath-fetch-call".into())
        .spawn(move || {
            let result = source.fetch(timeout);
            in_call.fetch_sub(1, Ordering::AcqRel);
            let _ = tx.send(result);
        });
    if let Err(e) = spawned {
        outstanding.fetch_sub(1, Ordering::AcqRel);
        return Err(ClockError::Unavailable(e.to_string()));
    }

    let value = match rx.recv_timeout(timeout) {
        Ok(result) => result?,
        Err(RecvTimeoutError::Timeout) => return Err(ClockError::Timeout),
        Err(RecvTimeoutError::Disconnected) => {
            return Err(ClockError::Unavailable("fetch worker exited".into()));
        }
    };
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ClockError::Invalid(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Align,
    Relock,
}

/// Result of one fetch, tagged with the session that asked for it.
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub generation: u64,
    pub kind: FetchKind,
    pub result: Result<ExternalSample, ClockError>,
}

/// Spawn a best-effort fetch. The report is sent when it completes; if the session
/// has gone away by then the report is dropped.
pub fn spawn_fetch(
    source: Arc<dyn BreathTimeSource>,
    timeout: Duration,
    session_start: Instant,
    generation: u64,
    kind: FetchKind,
    outstanding: Arc<AtomicUsize>,
    reports: Sender<FetchReport>,
) {
    let spawned = thread::Builder::new()
        .name("breath-fetch".into())
        .spawn(move || {
            let t0 = session_start.elapsed().as_secs_f64();
            let result = fetch_bounded(source, timeout, &outstanding);
            let t1 = session_start.elapsed().as_secs_f64();
            let result = result.map(|breath_time_sec| ExternalSample {
                breath_time_sec,
                local_time_sec: 0.5 * (t0 + t1),
            });
            if reports
                .send(FetchReport {
                    generation,
                    kind,
                    result,
                })
                .is_err()
            {
                debug!("breath fetch finished after session {generation} stopped; discarded");
            }
        });
    if let Err(err) = spawned {
        debug!("could not spawn breath fetch: {err}");
    }
}
