//! End-to-end decoding tests: scripted edge sequences in, token streams
//! out. Handlers are invoked exactly where the corresponding pin-change
//! interrupt would have fired.

use sniffer::{
    sim::SimBus,
    sink::{self, StuckWatch},
    BusState, EdgeSampler, Line, SlotStorage, Sniffer, SnifferSettings, Token,
};

type TestSniffer = Sniffer<SlotStorage<64>>;

fn new_sniffer() -> (SimBus, TestSniffer) {
    (
        SimBus::new(),
        Sniffer::new(SnifferSettings::default(), SlotStorage::new()),
    )
}

/// Drives the data line, firing the data-edge handler if the level
/// actually changes.
fn set_sda(bus: &SimBus, sn: &TestSniffer, high: bool) {
    if bus.read(Line::Sda) != high {
        bus.set(Line::Sda, high);
        sn.on_data_edge(bus);
    }
}

/// Data falls while the clock is high: a start condition.
fn start(bus: &SimBus, sn: &TestSniffer) {
    bus.set(Line::Scl, true);
    set_sda(bus, sn, false);
}

/// One bit cell: set up the data level while the clock is low, then fire
/// the rising clock edge.
fn clock_bit(bus: &SimBus, sn: &TestSniffer, bit: bool) {
    bus.set(Line::Scl, false);
    set_sda(bus, sn, bit);
    bus.set(Line::Scl, true);
    sn.on_clock_rising(bus);
}

/// Data rises while the clock is high: a stop condition.
fn stop(bus: &SimBus, sn: &TestSniffer) {
    bus.set(Line::Scl, false);
    set_sda(bus, sn, false);
    bus.set(Line::Scl, true);
    set_sda(bus, sn, true);
}

/// Feeds an entire byte (MSB first) plus the receiver's ack level.
fn feed_byte(bus: &SimBus, sn: &TestSniffer, byte: u8, ack: bool) {
    for i in (0..8).rev() {
        clock_bit(bus, sn, byte & (1 << i) != 0);
    }
    // ninth edge: ack is data held low
    clock_bit(bus, sn, !ack);
}

fn drained(sn: &TestSniffer) -> Vec<Token> {
    sn.drain().collect()
}

#[test]
fn fixture_write_to_0x50() {
    let (bus, sn) = new_sniffer();

    start(&bus, &sn);
    for bit in [true, false, true, false, false, false, false] {
        clock_bit(&bus, &sn, bit);
    }
    clock_bit(&bus, &sn, false); // direction: write
    clock_bit(&bus, &sn, false); // ack

    assert_eq!(
        drained(&sn),
        vec![
            Token::Start,
            Token::Bit1,
            Token::Bit0,
            Token::Bit1,
            Token::Bit0,
            Token::Bit0,
            Token::Bit0,
            Token::Bit0,
            Token::WriteDir,
            Token::Ack,
        ],
    );
    assert_eq!(sn.bit_position(), 0);
    assert_eq!(sn.byte_index(), 1);
}

#[test]
fn fixture_nack_then_stop() {
    let (bus, sn) = new_sniffer();

    start(&bus, &sn);
    for bit in [true, false, true, false, false, false, false] {
        clock_bit(&bus, &sn, bit);
    }
    clock_bit(&bus, &sn, true); // direction: read
    clock_bit(&bus, &sn, true); // ninth edge with data high: nack

    // data falling while the clock is low is bit setup, not a start
    bus.set(Line::Scl, false);
    set_sda(&bus, &sn, false);

    // data rising while the clock is high closes the transaction
    bus.set(Line::Scl, true);
    set_sda(&bus, &sn, true);

    let tokens = drained(&sn);
    assert_eq!(tokens.last(), Some(&Token::Stop));
    assert_eq!(tokens[tokens.len() - 2], Token::Nack);
    assert_eq!(tokens[8], Token::ReadDir);
    assert_eq!(sn.bus_state(), BusState::Idle);
}

#[test]
fn idle_clock_edge_decodes_nothing() {
    let (bus, sn) = new_sniffer();

    bus.set(Line::Scl, true);
    sn.on_clock_rising(&bus);
    sn.on_clock_rising(&bus);

    assert_eq!(drained(&sn), vec![]);
    assert_eq!(sn.diagnostics().false_starts, 2);
    assert_eq!(sn.bit_position(), 0);
    assert_eq!(sn.byte_index(), 0);
}

#[test]
fn drain_is_idempotent() {
    let (bus, sn) = new_sniffer();

    start(&bus, &sn);
    feed_byte(&bus, &sn, 0xA0, true);
    stop(&bus, &sn);

    assert!(!drained(&sn).is_empty());
    // no intervening edges: the second pass is empty
    assert_eq!(drained(&sn), vec![]);
}

#[test]
fn byte_structure_holds_across_a_transaction() {
    let (bus, sn) = new_sniffer();

    start(&bus, &sn);
    feed_byte(&bus, &sn, 0xA0, true); // address + write + ack
    assert_eq!(sn.bit_position(), 0);
    feed_byte(&bus, &sn, 0x12, true);
    assert_eq!(sn.bit_position(), 0);
    feed_byte(&bus, &sn, 0x34, false);
    assert_eq!(sn.bit_position(), 0);
    stop(&bus, &sn);

    let tokens = drained(&sn);
    assert_eq!(tokens.len(), 1 + 3 * 9 + 1);
    assert_eq!(tokens[0], Token::Start);
    assert_eq!(*tokens.last().unwrap(), Token::Stop);

    // every byte: eight classification tokens, then exactly one ack/nack
    for byte in 0..3 {
        let cell = &tokens[1 + byte * 9..1 + (byte + 1) * 9];
        assert!(cell[..8].iter().all(|t| !t.is_ack_or_nack()), "byte {byte}");
        assert!(cell[8].is_ack_or_nack(), "byte {byte}");
    }

    // the direction bit only ever replaces the eighth bit of byte 0
    assert_eq!(tokens[8], Token::WriteDir);
    assert!(!tokens[9..]
        .iter()
        .any(|t| matches!(t, Token::ReadDir | Token::WriteDir)));
}

#[test]
fn at_most_one_stop_between_starts() {
    let (bus, sn) = new_sniffer();

    for byte in [0xA0u8, 0x55, 0x0F] {
        start(&bus, &sn);
        feed_byte(&bus, &sn, byte, true);
        stop(&bus, &sn);
    }

    let tokens = drained(&sn);
    let mut stops_since_start = 0;
    for token in tokens {
        match token {
            Token::Start => stops_since_start = 0,
            Token::Stop => {
                stops_since_start += 1;
                assert!(stops_since_start <= 1, "double stop");
            }
            _ => {}
        }
    }
    assert_eq!(sn.bus_state(), BusState::Idle);
}

#[test]
fn stopless_start_begins_a_fresh_transaction() {
    let (bus, sn) = new_sniffer();

    start(&bus, &sn);
    for bit in [true, false, true] {
        clock_bit(&bus, &sn, bit);
    }
    // the last bit left data high with the clock high; pulling data low
    // here is a stop-less new start
    set_sda(&bus, &sn, false);

    assert_eq!(sn.bus_state(), BusState::InTransaction);
    assert_eq!(sn.bit_position(), 0);
    assert_eq!(sn.byte_index(), 0);

    // the fresh transaction decodes a full address byte again
    feed_byte(&bus, &sn, 0xA1, true);
    stop(&bus, &sn);

    let tokens = drained(&sn);
    assert_eq!(
        tokens[..5],
        [
            Token::Start,
            Token::Bit1,
            Token::Bit0,
            Token::Bit1,
            Token::Start,
        ],
    );
    // no stop was fabricated for the abandoned transaction
    assert_eq!(tokens.iter().filter(|t| **t == Token::Stop).count(), 1);
    // 0xA1 ends in a read direction bit
    assert_eq!(tokens[4 + 8], Token::ReadDir);
}

#[test]
fn glitchy_data_edge_is_dropped_and_counted() {
    let (bus, sn) = new_sniffer();

    start(&bus, &sn);

    // the line bounces for longer than the stabilization bound
    bus.chatter(Line::Sda, u8::MAX);
    sn.on_data_edge(&bus);

    assert_eq!(sn.diagnostics().glitches, 1);
    assert_eq!(sn.bus_state(), BusState::InTransaction);
    assert_eq!(drained(&sn), vec![Token::Start]);
}

#[test]
fn overflow_keeps_the_oldest_tokens() {
    let bus = SimBus::new();
    let sn: Sniffer<SlotStorage<8>> =
        Sniffer::new(SnifferSettings::default(), SlotStorage::new());

    // start + 12 bits = capacity + 5 qualifying edges, no drain
    bus.set(Line::Scl, true);
    bus.set(Line::Sda, false);
    sn.on_data_edge(&bus);
    for i in 0..12 {
        bus.set(Line::Scl, false);
        if bus.read(Line::Sda) != (i % 2 == 0) {
            bus.set(Line::Sda, i % 2 == 0);
            sn.on_data_edge(&bus);
        }
        bus.set(Line::Scl, true);
        sn.on_clock_rising(&bus);
    }

    assert_eq!(sn.diagnostics().overflows, 5);

    // the first `capacity` tokens are unchanged
    let tokens: Vec<Token> = sn.drain().collect();
    assert_eq!(
        tokens,
        vec![
            Token::Start,
            Token::Bit1,
            Token::Bit0,
            Token::Bit1,
            Token::Bit0,
            Token::Bit1,
            Token::Bit0,
            Token::Bit1,
        ],
    );
}

#[test]
fn partial_drain_is_restartable() {
    let (bus, sn) = new_sniffer();

    start(&bus, &sn);
    feed_byte(&bus, &sn, 0xA0, true);
    stop(&bus, &sn);

    let mut buf = [0u8; 4];
    assert_eq!(sink::drain_symbols(&sn, &mut buf), 4);
    assert_eq!(&buf, b"S101");

    // the rest is still there
    let mut rest = [0u8; 16];
    let used = sink::drain_symbols(&sn, &mut rest);
    assert_eq!(&rest[..used], b"0000W+s");
}

#[test]
fn idle_drain_winds_indices_back() {
    let (bus, sn) = new_sniffer();

    start(&bus, &sn);
    feed_byte(&bus, &sn, 0xA0, true);
    stop(&bus, &sn);

    let first = drained(&sn);
    assert_eq!(first.len(), 11);
    assert_eq!(sn.write_pos(), 0, "indices reset after a fully drained idle bus");

    // and the ring keeps working from the origin
    start(&bus, &sn);
    stop(&bus, &sn);
    assert_eq!(drained(&sn), vec![Token::Start, Token::Stop]);
}

#[test]
fn open_transaction_blocks_index_reset() {
    let (bus, sn) = new_sniffer();

    start(&bus, &sn);
    feed_byte(&bus, &sn, 0xA0, true);

    let pos_before = sn.write_pos();
    let mut buf = [Token::Start; 32];
    assert_eq!(sink::drain_tokens(&sn, &mut buf), 10);
    assert_eq!(buf[9], Token::Ack);
    // still in a transaction: no reset
    assert_eq!(sn.write_pos(), pos_before);
}

#[test]
fn stuck_watch_recovers_a_wedged_transaction() {
    let (bus, sn) = new_sniffer();
    let mut watch = StuckWatch::new(&SnifferSettings::default());

    start(&bus, &sn);
    let _ = drained(&sn);

    // the bus wedges: no edges arrive, poll after poll
    let limit = SnifferSettings::default().stuck_poll_limit;
    let mut recovered = false;
    for _ in 0..limit + 1 {
        recovered = watch.poll(&sn);
        if recovered {
            break;
        }
    }

    assert!(recovered);
    assert_eq!(sn.bus_state(), BusState::Idle);
    assert_eq!(sn.diagnostics().stuck_recoveries, 1);

    // recovery emits nothing; the next clock edge is a false start
    bus.set(Line::Scl, true);
    sn.on_clock_rising(&bus);
    assert_eq!(drained(&sn), vec![]);
    assert_eq!(sn.diagnostics().false_starts, 1);
}

#[test]
fn stuck_watch_leaves_live_transactions_alone() {
    let (bus, sn) = new_sniffer();
    let mut watch = StuckWatch::new(&SnifferSettings::default());

    start(&bus, &sn);
    let limit = SnifferSettings::default().stuck_poll_limit;
    for i in 0..limit * 2 {
        // tokens keep flowing, so the watch never trips
        clock_bit(&bus, &sn, i % 2 == 0);
        assert!(!watch.poll(&sn));
        let _ = drained(&sn);
    }
    assert_eq!(sn.bus_state(), BusState::InTransaction);
    assert_eq!(sn.diagnostics().stuck_recoveries, 0);
}

#[test]
fn explicit_reset_returns_to_power_on_state() {
    let (bus, sn) = new_sniffer();

    start(&bus, &sn);
    feed_byte(&bus, &sn, 0xFF, false);
    bus.set(Line::Scl, true);
    sn.on_clock_rising(&bus); // in-transaction edge, then...

    // ...interrupts disarmed, full reset
    sn.reset();
    assert_eq!(sn.bus_state(), BusState::Idle);
    assert_eq!(sn.bit_position(), 0);
    assert_eq!(sn.byte_index(), 0);
    assert_eq!(sn.diagnostics(), Default::default());
    assert_eq!(drained(&sn), vec![]);
}
