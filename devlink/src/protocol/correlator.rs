//! Request/response correlation.
//!
//! Every outstanding request registers the response code it expects. A
//! completed frame settles the request waiting on its command code; a
//! second registration for the same code supersedes the first. Deadlines
//! are checked whenever the owner calls [`Correlator::expire`].
//!
//! Each registration is settled exactly once. The entry is removed from the
//! pending table before its outcome is recorded, so a late frame for an
//! expired or superseded request finds nothing to settle and is dropped.

use crate::error::{Error, FramingError, Result};
use crate::protocol::frame::Frame;
use crate::protocol::receiver::FrameSink;
use log::{debug, warn};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Handle to a registered wait, used to collect its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    id: u64,
    code: u8,
}

impl Ticket {
    /// Response code this ticket waits for.
    pub fn response_code(&self) -> u8 {
        self.code
    }
}

#[derive(Debug)]
struct Pending {
    id: u64,
    deadline: Instant,
    timeout: Duration,
}

#[derive(Debug)]
struct Settled {
    code: u8,
    outcome: Result<Vec<u8>>,
}

/// Maps response codes to the single request waiting on each.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<u8, Pending>,
    settled: HashMap<u64, Settled>,
    next_id: u64,
}

impl Correlator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a wait for `code`, expiring `timeout` from now.
    pub fn wait_for(&mut self, code: u8, timeout: Duration) -> Ticket {
        self.wait_for_at(code, timeout, Instant::now())
    }

    /// Register a wait for `code`, expiring `timeout` after `now`.
    ///
    /// Any request already waiting on `code` is rejected with
    /// [`Error::Superseded`]. Uncollected outcomes of older tickets for
    /// `code` are discarded, so at most two outcomes per code are ever held.
    pub fn wait_for_at(&mut self, code: u8, timeout: Duration, now: Instant) -> Ticket {
        self.settled
            .retain(|_, settled| settled.code != code);
        self.next_id += 1;
        let id = self.next_id;
        let entry = Pending {
            id,
            deadline: now + timeout,
            timeout,
        };

        if let Some(previous) = self.pending.insert(code, entry) {
            warn!("Request waiting for {code:#04x} superseded by a newer one");
            self.settle(previous.id, code, Err(Error::Superseded { code }));
        }

        Ticket { id, code }
    }

    /// Settle the request waiting on `code` with a payload.
    ///
    /// Returns `false` when nothing was waiting; the payload is dropped.
    pub fn resolve_frame(&mut self, code: u8, payload: Vec<u8>) -> bool {
        match self.pending.remove(&code) {
            Some(entry) => {
                debug!(
                    "Response {code:#04x} received ({} bytes)",
                    payload.len()
                );
                self.settle(entry.id, code, Ok(payload));
                true
            },
            None => {
                debug!("Dropping unsolicited frame {code:#04x}");
                false
            },
        }
    }

    /// Settle the request waiting on `code` with an error.
    ///
    /// Returns `false` when nothing was waiting.
    pub fn reject_frame(&mut self, code: u8, error: Error) -> bool {
        match self.pending.remove(&code) {
            Some(entry) => {
                self.settle(entry.id, code, Err(error));
                true
            },
            None => false,
        }
    }

    /// Reject every request whose deadline has passed.
    pub fn expire(&mut self) -> usize {
        self.expire_at(Instant::now())
    }

    /// Reject every request whose deadline is at or before `now`.
    pub fn expire_at(&mut self, now: Instant) -> usize {
        let expired: Vec<u8> = self
            .pending
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(&code, _)| code)
            .collect();

        for &code in &expired {
            if let Some(entry) = self.pending.remove(&code) {
                warn!("Timed out waiting for response {code:#04x}");
                self.settle(
                    entry.id,
                    code,
                    Err(Error::Timeout {
                        code,
                        after: entry.timeout,
                    }),
                );
            }
        }

        expired.len()
    }

    /// Withdraw a request that is still waiting, settling it with `error`.
    ///
    /// Does nothing if the ticket was already settled.
    pub fn cancel(&mut self, ticket: Ticket, error: Error) {
        if self
            .pending
            .get(&ticket.code)
            .is_some_and(|entry| entry.id == ticket.id)
        {
            self.pending.remove(&ticket.code);
            self.settle(ticket.id, ticket.code, Err(error));
        }
    }

    /// Reject every waiting request, e.g. when the session ends.
    pub fn fail_all(&mut self, mut make_error: impl FnMut(u8) -> Error) {
        let drained: Vec<(u8, Pending)> = self.pending.drain().collect();
        for (code, entry) in drained {
            self.settle(entry.id, code, Err(make_error(code)));
        }
    }

    fn settle(&mut self, id: u64, code: u8, outcome: Result<Vec<u8>>) {
        self.settled
            .insert(id, Settled { code, outcome });
    }

    /// Collect the outcome of a ticket, if it has been settled.
    ///
    /// The outcome is handed out once; later calls return `None`.
    pub fn take(&mut self, ticket: Ticket) -> Option<Result<Vec<u8>>> {
        self.settled
            .remove(&ticket.id)
            .map(|settled| settled.outcome)
    }

    /// Whether the ticket is still waiting for its response.
    pub fn is_pending(&self, ticket: Ticket) -> bool {
        self.pending
            .get(&ticket.code)
            .is_some_and(|entry| entry.id == ticket.id)
    }

    /// Whether the ticket is waiting or has an uncollected outcome.
    pub fn is_known(&self, ticket: Ticket) -> bool {
        self.is_pending(ticket) || self.settled.contains_key(&ticket.id)
    }

    /// Number of requests still waiting.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of settled outcomes not yet collected.
    pub fn settled_count(&self) -> usize {
        self.settled.len()
    }

    /// Earliest deadline among waiting requests.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|entry| entry.deadline)
            .min()
    }
}

impl FrameSink for Correlator {
    fn frame_received(&mut self, frame: Frame) {
        self.resolve_frame(frame.command, frame.payload);
    }

    fn frame_rejected(&mut self, command: Option<u8>, error: FramingError) {
        if let Some(code) = command {
            self.reject_frame(code, Error::Framing(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[test]
    fn test_resolve_delivers_payload_once() {
        let mut c = Correlator::new();
        let t = c.wait_for(0x81, TIMEOUT);
        assert!(c.is_pending(t));
        assert!(c.take(t).is_none());

        assert!(c.resolve_frame(0x81, vec![1, 2, 3]));
        assert!(!c.is_pending(t));
        assert_eq!(c.take(t).unwrap().unwrap(), vec![1, 2, 3]);
        assert!(c.take(t).is_none());
        assert!(!c.is_known(t));
    }

    #[test]
    fn test_unsolicited_frame_is_dropped() {
        let mut c = Correlator::new();
        let t = c.wait_for(0x81, TIMEOUT);
        assert!(!c.resolve_frame(0x82, vec![]));
        assert!(c.is_pending(t));
    }

    #[test]
    fn test_second_wait_supersedes_first() {
        let mut c = Correlator::new();
        let first = c.wait_for(0x81, TIMEOUT);
        let second = c.wait_for(0x81, TIMEOUT);

        assert!(matches!(
            c.take(first),
            Some(Err(Error::Superseded { code: 0x81 }))
        ));
        assert!(c.is_pending(second));

        c.resolve_frame(0x81, b"later".to_vec());
        assert_eq!(c.take(second).unwrap().unwrap(), b"later");
        assert_eq!(c.pending_count(), 0);
    }

    #[test]
    fn test_repeated_waits_keep_settled_table_small() {
        crate::init_test_logging();
        let mut c = Correlator::new();
        let other = c.wait_for(0x82, TIMEOUT);
        c.resolve_frame(0x82, vec![2]);

        let mut tickets = Vec::new();
        for _ in 0..10_000 {
            tickets.push(c.wait_for(0x81, TIMEOUT));
        }
        assert!(c.settled_count() <= 2);
        assert_eq!(c.pending_count(), 1);

        // Only the newest superseded ticket keeps its outcome.
        let last = tickets[tickets.len() - 1];
        let previous = tickets[tickets.len() - 2];
        assert!(c.take(tickets[0]).is_none());
        assert!(matches!(
            c.take(previous),
            Some(Err(Error::Superseded { code: 0x81 }))
        ));
        assert!(c.is_pending(last));

        // Outcomes for other codes are untouched.
        assert_eq!(c.take(other).unwrap().unwrap(), vec![2]);
    }

    #[test]
    fn test_independent_codes_do_not_interfere() {
        let mut c = Correlator::new();
        let a = c.wait_for(0x81, TIMEOUT);
        let b = c.wait_for(0x82, TIMEOUT);
        c.resolve_frame(0x82, vec![2]);
        assert!(c.is_pending(a));
        assert_eq!(c.take(b).unwrap().unwrap(), vec![2]);
    }

    #[test]
    fn test_timeout_rejects_and_late_frame_is_dropped() {
        let mut c = Correlator::new();
        let start = Instant::now();
        let t = c.wait_for_at(0x81, Duration::from_millis(50), start);

        assert_eq!(c.expire_at(start + Duration::from_millis(49)), 0);
        assert!(c.is_pending(t));

        assert_eq!(c.expire_at(start + Duration::from_millis(50)), 1);
        assert!(matches!(
            c.take(t),
            Some(Err(Error::Timeout { code: 0x81, .. }))
        ));

        assert!(!c.resolve_frame(0x81, vec![9]));
        assert!(c.take(t).is_none());
    }

    #[test]
    fn test_timeout_with_real_clock() {
        let mut c = Correlator::new();
        let t = c.wait_for(0x81, Duration::from_millis(50));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(c.expire(), 1);
        assert!(matches!(c.take(t), Some(Err(Error::Timeout { .. }))));
        assert_eq!(c.pending_count(), 0);
    }

    #[test]
    fn test_framing_error_rejects_matching_code_only() {
        let mut c = Correlator::new();
        let a = c.wait_for(0x81, TIMEOUT);
        let b = c.wait_for(0x82, TIMEOUT);
        c.frame_rejected(
            Some(0x81),
            FramingError::CrcMismatch {
                command: 0x81,
                expected: 1,
                actual: 2,
            },
        );
        c.frame_rejected(None, FramingError::UnexpectedSentinel { command: None });

        assert!(matches!(c.take(a), Some(Err(Error::Framing(_)))));
        assert!(c.is_pending(b));
    }

    #[test]
    fn test_cancel_ignores_stale_ticket() {
        let mut c = Correlator::new();
        let first = c.wait_for(0x81, TIMEOUT);
        let second = c.wait_for(0x81, TIMEOUT);
        c.cancel(first, Error::Interrupted);
        assert!(c.is_pending(second));
        // Superseded outcome is kept, not overwritten.
        assert!(matches!(c.take(first), Some(Err(Error::Superseded { .. }))));

        c.cancel(second, Error::Interrupted);
        assert!(matches!(c.take(second), Some(Err(Error::Interrupted))));
    }

    #[test]
    fn test_fail_all_settles_everything() {
        let mut c = Correlator::new();
        let a = c.wait_for(0x81, TIMEOUT);
        let b = c.wait_for(0x85, TIMEOUT);
        c.fail_all(|_| Error::Disconnected);
        assert_eq!(c.pending_count(), 0);
        assert!(matches!(c.take(a), Some(Err(Error::Disconnected))));
        assert!(matches!(c.take(b), Some(Err(Error::Disconnected))));
    }

    #[test]
    fn test_next_deadline_is_earliest() {
        let mut c = Correlator::new();
        let now = Instant::now();
        c.wait_for_at(0x81, Duration::from_secs(5), now);
        c.wait_for_at(0x82, Duration::from_secs(1), now);
        assert_eq!(c.next_deadline(), Some(now + Duration::from_secs(1)));
    }
}
