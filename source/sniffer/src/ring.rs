//! The token ring
//!
//! A fixed-capacity ring of [`Token`]s with two interrupt-context producers
//! and a single poll-scheduled consumer.
//!
//! # References
//!
//! The slot layout is a trimmed-down take on Dmitry Vyukov's
//! ["Bounded MPMC queue"][0]: every slot carries a sequence stamp that a
//! producer publishes *after* storing its token, so a consumer that
//! snapshots the write index between a producer's claim and its store sees
//! the slot as not-ready instead of reading garbage.
//!
//! Unlike the classic queue, a full ring never overwrites live data and
//! never blocks the producer: the push is dropped and counted. Losing the
//! newest token is recoverable; losing an unread `Start` or corrupting the
//! consumer's view is not.
//!
//! [0]: http://www.1024cores.net/home/lock-free-algorithms/queues/bounded-mpmc-queue

use core::{cell::UnsafeCell, mem::MaybeUninit};

use portable_atomic::{AtomicU32, AtomicUsize, Ordering};
use snoop_proto::Token;

/// How many times a producer re-attempts its claim before giving up and
/// dropping the token. There are exactly two producers by construction
/// (the clock-edge and data-edge handlers), so a claim can lose at most a
/// couple of races; the bound exists because an interrupt handler must
/// never loop without one.
const CLAIM_RETRY_BOUND: usize = 8;

/// One ring slot: a token cell plus its sequence stamp.
pub struct Slot {
    token: UnsafeCell<MaybeUninit<Token>>,
    sequence: AtomicUsize,
}

impl Slot {
    const EMPTY: Self = Self::new(0);

    const fn new(seq: usize) -> Self {
        Self {
            token: UnsafeCell::new(MaybeUninit::uninit()),
            sequence: AtomicUsize::new(seq),
        }
    }
}

/// Backing storage for a [`TokenRing`].
///
/// # Safety
///
/// `slots()` must return a pointer to at least `len` contiguous [`Slot`]s
/// that stay valid (and unmoved) for as long as `self` does.
pub unsafe trait Storage {
    fn slots(&self) -> (*const Slot, usize);
}

/// Inline storage for `C` tokens. `C` must be a power of two and at
/// least 2.
pub struct SlotStorage<const C: usize> {
    slots: [Slot; C],
}

impl<const C: usize> SlotStorage<C> {
    pub const fn new() -> Self {
        Self {
            slots: [Slot::EMPTY; C],
        }
    }
}

impl<const C: usize> Default for SlotStorage<C> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<const C: usize> Storage for SlotStorage<C> {
    fn slots(&self) -> (*const Slot, usize) {
        (self.slots.as_ptr(), C)
    }
}

unsafe impl<S: Storage> Storage for &'static S {
    fn slots(&self) -> (*const Slot, usize) {
        (**self).slots()
    }
}

/// The ring was full; the token was dropped and counted.
#[derive(Debug, Eq, PartialEq)]
pub struct RingFull;

/// Fixed-capacity token ring.
///
/// The write index is claimed with an atomic compare-and-swap so the two
/// edge handlers may push back-to-back (or nested) without colliding on a
/// slot. The read index is owned by the single consumer and is advanced
/// with plain stores. Both indices are monotonic; a slot index is
/// `position & (capacity - 1)`.
pub struct TokenRing<STO: Storage> {
    storage: STO,
    enqueue_pos: AtomicUsize,
    dequeue_pos: AtomicUsize,
    overflows: AtomicU32,
}

// The slots hold `UnsafeCell`s, but every access to them is ordered by the
// claim/publish sequence stamps; the storage type itself need not be Sync.
unsafe impl<STO: Storage> Sync for TokenRing<STO> {}

impl<STO: Storage> TokenRing<STO> {
    /// Creates an empty ring.
    ///
    /// The capacity of `storage` must be >= 2 and a power of two, or this
    /// code will panic.
    #[track_caller]
    pub fn new(storage: STO) -> Self {
        let (ptr, len) = storage.slots();
        assert_eq!(
            len,
            len.next_power_of_two(),
            "Capacity must be a power of two!"
        );
        assert!(len > 1, "Capacity must be larger than 1!");
        let slots = unsafe { core::slice::from_raw_parts(ptr, len) };
        for (i, slot) in slots.iter().enumerate() {
            slot.sequence.store(i, Ordering::Relaxed);
        }

        Self {
            storage,
            enqueue_pos: AtomicUsize::new(0),
            dequeue_pos: AtomicUsize::new(0),
            overflows: AtomicU32::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.slots().1
    }

    /// The monotonic write position. Only ever advanced by the two edge
    /// handlers.
    pub fn write_pos(&self) -> usize {
        self.enqueue_pos.load(Ordering::Acquire)
    }

    /// Tokens currently buffered (approximate while producers are live).
    pub fn pending(&self) -> usize {
        self.enqueue_pos
            .load(Ordering::Acquire)
            .wrapping_sub(self.dequeue_pos.load(Ordering::Relaxed))
    }

    /// Tokens dropped because the ring was full.
    pub fn overflow_count(&self) -> u32 {
        self.overflows.load(Ordering::Relaxed)
    }

    /// Appends `token`, unless the unread region already spans the whole
    /// capacity - then the token is dropped and the overflow counter is
    /// bumped instead of overwriting live data.
    ///
    /// Interrupt-safe: lock-free, allocation-free, and bounded.
    pub fn push(&self, token: Token) -> Result<(), RingFull> {
        let (slots, len) = self.storage.slots();
        let mask = len - 1;
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);

        for _ in 0..CLAIM_RETRY_BOUND {
            let slot = unsafe { &*slots.add(pos & mask) };
            let seq = slot.sequence.load(Ordering::Acquire);
            let dif = (seq as isize).wrapping_sub(pos as isize);

            if dif == 0 {
                // the slot is drained and nobody has claimed it; claim it
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe {
                            (*slot.token.get()).write(token);
                        }
                        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(actual) => pos = actual,
                }
            } else if dif < 0 {
                // the slot still holds an undrained token from one lap
                // ago: the ring is full
                self.overflows.fetch_add(1, Ordering::Relaxed);
                return Err(RingFull);
            } else {
                // the other producer claimed this position but has not
                // published yet
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }

        self.overflows.fetch_add(1, Ordering::Relaxed);
        Err(RingFull)
    }

    /// Acquires the current write position as a drain snapshot.
    pub(crate) fn snapshot(&self) -> usize {
        self.enqueue_pos.load(Ordering::Acquire)
    }

    /// Takes the token at the read position, if it has been published.
    ///
    /// Single consumer by construction: the read position is advanced with
    /// a plain store.
    pub(crate) fn pop(&self) -> Option<Token> {
        let (slots, len) = self.storage.slots();
        let mask = len - 1;
        let pos = self.dequeue_pos.load(Ordering::Relaxed);
        let slot = unsafe { &*slots.add(pos & mask) };
        let seq = slot.sequence.load(Ordering::Acquire);

        if seq != pos.wrapping_add(1) {
            // empty, or claimed but not yet published
            return None;
        }

        let token = unsafe { (*slot.token.get()).assume_init_read() };
        // free the slot for the producers' next lap
        slot.sequence
            .store(pos.wrapping_add(mask).wrapping_add(1), Ordering::Release);
        self.dequeue_pos
            .store(pos.wrapping_add(1), Ordering::Relaxed);
        Some(token)
    }

    pub(crate) fn read_pos(&self) -> usize {
        self.dequeue_pos.load(Ordering::Relaxed)
    }

    /// Resets both indices to zero, but only if the ring has been fully
    /// drained up to `snapshot` and no producer has advanced the write
    /// index past it. Returns whether the reset happened.
    ///
    /// The compare-and-swap on the write index *is* the "write index has
    /// not moved" guard: a producer that claimed a position after the
    /// snapshot makes it fail, and the indices are left as-is for the next
    /// drain. A push that lands inside the restamping window is dropped
    /// and counted like any other overflow.
    pub(crate) fn try_reset(&self, snapshot: usize) -> bool {
        if self.dequeue_pos.load(Ordering::Relaxed) != snapshot {
            return false;
        }
        if self
            .enqueue_pos
            .compare_exchange(snapshot, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        // Restamp top-down: a producer racing us targets position 0 first,
        // and its claim cannot succeed until slot 0's stamp lands - which
        // is the last store we make.
        let (slots, len) = self.storage.slots();
        for i in (0..len).rev() {
            let slot = unsafe { &*slots.add(i) };
            slot.sequence.store(i, Ordering::Release);
        }
        self.dequeue_pos.store(0, Ordering::Relaxed);
        true
    }

    /// Unconditional full reset: indices to zero, all slots empty, the
    /// overflow counter cleared.
    ///
    /// Only valid while both edge interrupt sources are disarmed; a
    /// concurrent push would race the restamping.
    pub fn reset(&self) {
        let (slots, len) = self.storage.slots();
        for i in (0..len).rev() {
            let slot = unsafe { &*slots.add(i) };
            slot.sequence.store(i, Ordering::Release);
        }
        self.dequeue_pos.store(0, Ordering::Relaxed);
        self.enqueue_pos.store(0, Ordering::Release);
        self.overflows.store(0, Ordering::Relaxed);
    }
}
