//! # Edge decoding
//!
//! The two interrupt-context handlers that turn raw line transitions into
//! [`Token`]s, plus the shared state they cooperate through.
//!
//! Ownership is single-writer per field, by construction:
//!
//! * the **clock-edge handler** owns the bit position and byte index, and
//!   emits every bit/direction/ack token;
//! * the **data-edge handler** owns the bus state and the cached stable
//!   data level, and emits `Start`/`Stop`;
//! * the ring's write index is the one field both handlers touch, and it
//!   is claimed with an atomic compare-and-swap.
//!
//! Neither handler blocks, allocates, or loops without a bound, so both
//! are safe to call from a bare interrupt service routine.

use portable_atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU8, Ordering};
use serde::{Deserialize, Serialize};
use snoop_proto::Token;

use crate::ring::{Storage, TokenRing};
use crate::sample::{EdgeSampler, Line};

////////////////////////////////////////////////////////////////////////////////
// Bus state
////////////////////////////////////////////////////////////////////////////////

/// Whether a transaction is currently open.
///
/// `Idle --START--> InTransaction --STOP--> Idle`. No other transitions
/// exist; a clock edge observed while `Idle` is counted as a false start
/// and decodes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum BusState {
    Idle = 0,
    InTransaction = 1,
}

impl BusState {
    fn from_u8(raw: u8) -> Self {
        if raw == BusState::InTransaction as u8 {
            BusState::InTransaction
        } else {
            BusState::Idle
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Settings
////////////////////////////////////////////////////////////////////////////////

/// Sniffer Settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct SnifferSettings {
    /// Consecutive identical reads required for a stable sample.
    /// Defaults to 2
    pub stable_samples: u8,
    /// Bound on stabilization iterations before an edge is discarded as a
    /// glitch. Defaults to 32
    pub stabilize_iters: u16,
    /// Consecutive quiet consumer polls before an open transaction is
    /// considered stuck and forced back to idle. Defaults to 16
    pub stuck_poll_limit: u16,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct SnifferSettingsOverrides {
    /// Consecutive identical reads required for a stable sample.
    /// Defaults to 2
    pub stable_samples: Option<u8>,
    /// Bound on stabilization iterations before an edge is discarded as a
    /// glitch. Defaults to 32
    pub stabilize_iters: Option<u16>,
    /// Consecutive quiet consumer polls before an open transaction is
    /// considered stuck and forced back to idle. Defaults to 16
    pub stuck_poll_limit: Option<u16>,
}

impl SnifferSettings {
    const DEFAULT_STABLE_SAMPLES: u8 = 2;
    const DEFAULT_STABILIZE_ITERS: u16 = 32;
    const DEFAULT_STUCK_POLL_LIMIT: u16 = 16;
}

impl Default for SnifferSettings {
    fn default() -> Self {
        Self {
            stable_samples: Self::DEFAULT_STABLE_SAMPLES,
            stabilize_iters: Self::DEFAULT_STABILIZE_ITERS,
            stuck_poll_limit: Self::DEFAULT_STUCK_POLL_LIMIT,
        }
    }
}

impl SnifferSettingsOverrides {
    pub fn into_settings(self) -> SnifferSettings {
        SnifferSettings {
            stable_samples: self
                .stable_samples
                .unwrap_or(SnifferSettings::DEFAULT_STABLE_SAMPLES),
            stabilize_iters: self
                .stabilize_iters
                .unwrap_or(SnifferSettings::DEFAULT_STABILIZE_ITERS),
            stuck_poll_limit: self
                .stuck_poll_limit
                .unwrap_or(SnifferSettings::DEFAULT_STUCK_POLL_LIMIT),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Diagnostics
////////////////////////////////////////////////////////////////////////////////

/// A read-only snapshot of the sniffer's anomaly counters.
///
/// Nothing in the core is fatal; every degraded condition lands here and
/// decoding continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Diagnostics {
    /// Clock edges observed while no transaction was open
    pub false_starts: u32,
    /// Data edges discarded because the line would not stabilize
    pub glitches: u32,
    /// Tokens dropped because the ring was full
    pub overflows: u32,
    /// Wedged transactions forced back to idle
    pub stuck_recoveries: u32,
}

////////////////////////////////////////////////////////////////////////////////
// Sniffer
////////////////////////////////////////////////////////////////////////////////

/// The passive bus sniffer.
///
/// Intended to be shared by reference between the two edge interrupt
/// handlers and the drain loop; every method takes `&self`.
pub struct Sniffer<STO: Storage> {
    state: AtomicU8,
    bit_pos: AtomicU8,
    byte_index: AtomicU16,
    /// Previously observed stable data level. Lines idle pulled-up, so
    /// this starts high.
    last_sda: AtomicBool,
    false_starts: AtomicU32,
    glitches: AtomicU32,
    stuck_recoveries: AtomicU32,
    settings: SnifferSettings,
    ring: TokenRing<STO>,
}

impl<STO: Storage> Sniffer<STO> {
    pub fn new(settings: SnifferSettings, storage: STO) -> Self {
        Self {
            state: AtomicU8::new(BusState::Idle as u8),
            bit_pos: AtomicU8::new(0),
            byte_index: AtomicU16::new(0),
            last_sda: AtomicBool::new(true),
            false_starts: AtomicU32::new(0),
            glitches: AtomicU32::new(0),
            stuck_recoveries: AtomicU32::new(0),
            settings,
            ring: TokenRing::new(storage),
        }
    }

    pub fn bus_state(&self) -> BusState {
        BusState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn settings(&self) -> &SnifferSettings {
        &self.settings
    }

    /// Position within the current byte, `0..=8`.
    pub fn bit_position(&self) -> u8 {
        self.bit_pos.load(Ordering::Relaxed)
    }

    /// Completed bytes since the last start condition.
    pub fn byte_index(&self) -> u16 {
        self.byte_index.load(Ordering::Relaxed)
    }

    /// The ring's monotonic write position. Used by
    /// [`StuckWatch`](crate::sink::StuckWatch) to tell a live transaction
    /// from a wedged one.
    pub fn write_pos(&self) -> usize {
        self.ring.write_pos()
    }

    /// Tokens waiting to be drained (approximate while edges are live).
    pub fn pending(&self) -> usize {
        self.ring.pending()
    }

    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            false_starts: self.false_starts.load(Ordering::Relaxed),
            glitches: self.glitches.load(Ordering::Relaxed),
            overflows: self.ring.overflow_count(),
            stuck_recoveries: self.stuck_recoveries.load(Ordering::Relaxed),
        }
    }

    /// Handles a rising clock edge. Call from the clock line's interrupt
    /// handler.
    ///
    /// While a transaction is open, every rising clock edge yields exactly
    /// one token: bits 0 through 7 classify as `Bit0`/`Bit1` - except bit
    /// 7 of the first byte, which is the direction bit - and the ninth
    /// edge samples the peripheral's `Ack`/`Nack`. Data is only valid
    /// while the clock is high, so the data line is sampled here and
    /// nowhere else.
    pub fn on_clock_rising<S: EdgeSampler>(&self, bus: &S) {
        if self.bus_state() != BusState::InTransaction {
            // no transaction open: nothing to decode
            self.false_starts.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let high = bus.read(Line::Sda);
        let bit_pos = self.bit_pos.load(Ordering::Relaxed);

        let token = if bit_pos == 8 {
            // ninth edge: the receiver acks by holding data low
            let bytes = self.byte_index.load(Ordering::Relaxed);
            self.byte_index.store(bytes.wrapping_add(1), Ordering::Relaxed);
            self.bit_pos.store(0, Ordering::Relaxed);
            if high {
                Token::Nack
            } else {
                Token::Ack
            }
        } else {
            let token = if bit_pos == 7 && self.byte_index.load(Ordering::Relaxed) == 0 {
                // low-order bit of the address byte carries the direction
                if high {
                    Token::ReadDir
                } else {
                    Token::WriteDir
                }
            } else if high {
                Token::Bit1
            } else {
                Token::Bit0
            };
            self.bit_pos.store(bit_pos + 1, Ordering::Relaxed);
            token
        };

        // on overflow the token is dropped and counted by the ring
        let _ = self.ring.push(token);
    }

    /// Handles a data line transition (either direction). Call from the
    /// data line's interrupt handler.
    ///
    /// A falling data level while the clock is high is a start condition;
    /// a rising one is a stop. Transitions while the clock is low are bit
    /// setup and decode nothing, but still refresh the cached stable
    /// level, so the next high-clock transition compares against the level
    /// that was actually on the wire.
    pub fn on_data_edge<S: EdgeSampler>(&self, bus: &S) {
        let clock_high = bus.read(Line::Scl);

        let sda = match bus.stable_read(
            Line::Sda,
            self.settings.stable_samples,
            self.settings.stabilize_iters,
        ) {
            Some(level) => level,
            None => {
                // the line never settled: ignore this edge entirely
                self.glitches.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let was = self.last_sda.swap(sda, Ordering::AcqRel);

        if !clock_high {
            // bit setup while the clock is low
            return;
        }

        if was && !sda {
            // Start condition. If a transaction was already open this is a
            // stop-less repeated start: the old transaction is implicitly
            // closed and a fresh one begins. Two falling observations
            // cannot happen back to back (the cached level comparison is
            // explicit), so a start can never double-fire.
            self.bit_pos.store(0, Ordering::Relaxed);
            self.byte_index.store(0, Ordering::Relaxed);
            self.state
                .store(BusState::InTransaction as u8, Ordering::Release);
            let _ = self.ring.push(Token::Start);
        } else if !was && sda && self.bus_state() == BusState::InTransaction {
            // Stop condition. Counters are left alone: the next start
            // resets them, and nothing may retroactively delete an
            // already-emitted token.
            self.state.store(BusState::Idle as u8, Ordering::Release);
            let _ = self.ring.push(Token::Stop);
        }
        // rising while idle: a stop can't close anything, so nothing
        // double-fires
    }

    /// Begins a drain: a finite, restartable pass over the tokens that
    /// were buffered before this call.
    ///
    /// The returned iterator stops at the snapshot taken here; tokens
    /// appended by edges that fire mid-drain are left for the next call.
    /// Two back-to-back drains with no intervening edges yield an empty
    /// second pass. When a fully consumed drain is dropped while the bus
    /// is idle and the write index has not moved past the snapshot, the
    /// ring indices are wound back to zero.
    pub fn drain(&self) -> Drain<'_, STO> {
        Drain {
            sniffer: self,
            snapshot: self.ring.snapshot(),
        }
    }

    /// Forces a wedged transaction back to idle. Returns whether a
    /// recovery actually happened.
    ///
    /// No token is emitted: recovery is an anomaly, never part of normal
    /// output. The drained stream simply shows a `Start` with no matching
    /// `Stop`.
    pub fn recover_stuck(&self) -> bool {
        let recovered = self
            .state
            .compare_exchange(
                BusState::InTransaction as u8,
                BusState::Idle as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if recovered {
            self.stuck_recoveries.fetch_add(1, Ordering::Relaxed);
        }
        recovered
    }

    /// Full reset to power-on state, counters included.
    ///
    /// Only valid while both edge interrupt sources are disarmed.
    pub fn reset(&self) {
        tracing::debug!("sniffer reset");
        self.state.store(BusState::Idle as u8, Ordering::Release);
        self.bit_pos.store(0, Ordering::Relaxed);
        self.byte_index.store(0, Ordering::Relaxed);
        self.last_sda.store(true, Ordering::Relaxed);
        self.false_starts.store(0, Ordering::Relaxed);
        self.glitches.store(0, Ordering::Relaxed);
        self.stuck_recoveries.store(0, Ordering::Relaxed);
        self.ring.reset();
    }
}

/// One finite pass over the buffered tokens. See [`Sniffer::drain`].
pub struct Drain<'snoop, STO: Storage> {
    sniffer: &'snoop Sniffer<STO>,
    snapshot: usize,
}

impl<STO: Storage> Iterator for Drain<'_, STO> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.sniffer.ring.read_pos() == self.snapshot {
            return None;
        }
        // a claimed-but-unpublished slot ends the pass early; the next
        // drain picks it up
        self.sniffer.ring.pop()
    }
}

impl<STO: Storage> Drop for Drain<'_, STO> {
    fn drop(&mut self) {
        if self.sniffer.bus_state() == BusState::Idle {
            // winds the indices back to zero, unless an edge raced us
            let _ = self.sniffer.ring.try_reset(self.snapshot);
        }
    }
}
