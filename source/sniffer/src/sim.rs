//! A scriptable bus for host-side runs
//!
//! [`SimBus`] stands in for the two GPIOs when there is no hardware:
//! tests and host tools set line levels, then invoke the sniffer's edge
//! handlers exactly where a pin-change interrupt would have fired.

use core::cell::Cell;

use crate::sample::{EdgeSampler, Line};

/// A simulated pair of bus lines.
///
/// Lines idle high, like the pulled-up real thing. Single-threaded: the
/// simulation "interleaves" producers and the consumer by calling them in
/// a chosen order, not by running them in parallel.
pub struct SimBus {
    scl: Cell<bool>,
    sda: Cell<bool>,
    scl_chatter: Cell<u8>,
    sda_chatter: Cell<u8>,
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            scl: Cell::new(true),
            sda: Cell::new(true),
            scl_chatter: Cell::new(0),
            sda_chatter: Cell::new(0),
        }
    }

    /// Drives `line` to `high`.
    pub fn set(&self, line: Line, high: bool) {
        match line {
            Line::Scl => self.scl.set(high),
            Line::Sda => self.sda.set(high),
        }
    }

    /// Makes the next `reads` samples of `line` alternate, as if the line
    /// were bouncing. The line settles back to its driven level afterward.
    pub fn chatter(&self, line: Line, reads: u8) {
        match line {
            Line::Scl => self.scl_chatter.set(reads),
            Line::Sda => self.sda_chatter.set(reads),
        }
    }

    fn sample(level: &Cell<bool>, chatter: &Cell<u8>) -> bool {
        let remaining = chatter.get();
        if remaining > 0 {
            chatter.set(remaining - 1);
            let flipped = (remaining - 1) % 2 == 1;
            level.get() ^ flipped
        } else {
            level.get()
        }
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EdgeSampler for SimBus {
    fn read(&self, line: Line) -> bool {
        match line {
            Line::Scl => Self::sample(&self.scl, &self.scl_chatter),
            Line::Sda => Self::sample(&self.sda, &self.sda_chatter),
        }
    }
}
