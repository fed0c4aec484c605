//! Consumer-side helpers
//!
//! The drain side of the sniffer runs on a cooperative schedule - a
//! polling loop, a timer task, whatever the platform has. Helpers here
//! stay out of interrupt context and are the one place in the core that
//! logs.

use snoop_proto::Token;

use crate::decode::{BusState, Sniffer, SnifferSettings};
use crate::ring::Storage;

/// Drains up to `buf.len()` pending tokens into `buf` as wire symbols,
/// returning how many were written.
///
/// If `buf` fills before the drain's snapshot is reached, the remaining
/// tokens stay buffered for the next call - nothing is lost and the ring
/// indices are left untouched.
pub fn drain_symbols<STO: Storage>(sniffer: &Sniffer<STO>, buf: &mut [u8]) -> usize {
    let mut drain = sniffer.drain();
    let mut used = 0;

    while used < buf.len() {
        let Some(token) = drain.next() else { break };
        buf[used] = token.symbol();
        used += 1;
    }

    if used > 0 {
        tracing::trace!(symbols = used, "drained");
    }
    used
}

/// Collects one drain pass into a caller-provided token slice.
///
/// Mostly useful for tests and host tools; transports want
/// [`drain_symbols`].
pub fn drain_tokens<STO: Storage>(sniffer: &Sniffer<STO>, buf: &mut [Token]) -> usize {
    let mut drain = sniffer.drain();
    let mut used = 0;

    while used < buf.len() {
        let Some(token) = drain.next() else { break };
        buf[used] = token;
        used += 1;
    }
    used
}

/// Watches for a transaction that opened but never closes.
///
/// The core has no clock, so "timeout" is measured in consumer polls: if
/// the bus stays [`BusState::InTransaction`] across `stuck_poll_limit`
/// consecutive polls without the ring's write position moving, the
/// transaction is declared wedged and forced back to idle. A transaction
/// that is still producing tokens is never considered stuck, however long
/// it runs.
pub struct StuckWatch {
    limit: u16,
    quiet_polls: u16,
    last_write_pos: usize,
}

impl StuckWatch {
    pub fn new(settings: &SnifferSettings) -> Self {
        Self {
            limit: settings.stuck_poll_limit,
            quiet_polls: 0,
            last_write_pos: 0,
        }
    }

    /// Call once per drain cycle. Returns whether a stuck transaction was
    /// recovered on this poll.
    pub fn poll<STO: Storage>(&mut self, sniffer: &Sniffer<STO>) -> bool {
        let write_pos = sniffer.write_pos();
        let quiet = sniffer.bus_state() == BusState::InTransaction
            && write_pos == self.last_write_pos;
        self.last_write_pos = write_pos;

        if !quiet {
            self.quiet_polls = 0;
            return false;
        }

        self.quiet_polls = self.quiet_polls.saturating_add(1);
        if self.quiet_polls < self.limit {
            return false;
        }

        self.quiet_polls = 0;
        let recovered = sniffer.recover_stuck();
        if recovered {
            tracing::warn!("bus wedged in a transaction; forced back to idle");
        }
        recovered
    }
}
