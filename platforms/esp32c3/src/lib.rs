//! ESP32-C3 platform for the `busybody` bus sniffer
//!
//! Wires the hardware-agnostic core to two pulled-up GPIOs and the USB
//! serial JTAG port: the clock line's rising edge and any data line
//! transition fire the shared `GPIO` interrupt, which dispatches to the
//! core's edge handlers; the `main` loop drains tokens and writes
//! COBS-framed symbol runs out the USB port for `magpie` on the host.
#![no_std]
extern crate alloc;

pub mod heap;

use alloc::boxed::Box;
use core::ptr::{null_mut, NonNull};

use esp32c3_hal::{
    gpio::Event,
    interrupt,
    peripherals::{Interrupt, GPIO},
    prelude::*,
    Delay, UsbSerialJtag, IO,
};
use portable_atomic::{AtomicPtr, Ordering};

use sniffer::{
    sink::{drain_symbols, StuckWatch},
    EdgeSampler, Line, SlotStorage, Sniffer, SnifferSettings,
};
use snoop_proto::SnoopFrame;

/// The clock line. Externally pulled up.
pub const SCL_GPIO: u8 = 4;
/// The data line. Externally pulled up.
pub const SDA_GPIO: u8 = 5;

/// Buffered tokens between drains. Must be a power of two.
pub const RING_CAPACITY: usize = 1024;

/// Symbols shipped per frame, at most.
const FRAME_SYMBOLS: usize = 256;

/// Drain cadence. Also the stuck-bus poll period.
const POLL_MS: u32 = 2;

pub type C3Sniffer = Sniffer<SlotStorage<RING_CAPACITY>>;

static SNIFFER: AtomicPtr<C3Sniffer> = AtomicPtr::new(null_mut());

/// Reads line levels straight from the GPIO input register, so the ISRs
/// never need exclusive access to the HAL pin types.
struct PinSampler;

impl PinSampler {
    fn level(gpio_num: u8) -> bool {
        let gpio = unsafe { &*GPIO::PTR };
        gpio.in_.read().bits() & (1 << gpio_num) != 0
    }
}

impl EdgeSampler for PinSampler {
    fn read(&self, line: Line) -> bool {
        match line {
            Line::Scl => Self::level(SCL_GPIO),
            Line::Sda => Self::level(SDA_GPIO),
        }
    }
}

/// Allocates the sniffer and parks it where the ISRs can see it.
///
/// Call once, before [`arm`].
pub fn init(settings: SnifferSettings) -> &'static C3Sniffer {
    let boxed = Box::new(Sniffer::new(settings, SlotStorage::new()));
    let leaked = Box::into_raw(boxed);
    let old = SNIFFER.swap(leaked, Ordering::AcqRel);
    assert_eq!(old, null_mut());
    unsafe { NonNull::new_unchecked(leaked).as_ref() }
}

/// Configures the two bus pins as pulled-up inputs and arms their edge
/// interrupts: rising edges on the clock line, both edges on the data
/// line.
pub fn arm(io: IO) {
    let mut scl = io.pins.gpio4.into_pull_up_input();
    let mut sda = io.pins.gpio5.into_pull_up_input();
    scl.listen(Event::RisingEdge);
    sda.listen(Event::AnyEdge);

    interrupt::enable(Interrupt::GPIO, interrupt::Priority::Priority1)
        .expect("failed to enable GPIO interrupt");
}

/// The drain loop: polls the ring on a fixed cadence, watches for a
/// wedged bus, and ships symbol runs out the USB serial JTAG port.
pub fn run(sniffer: &'static C3Sniffer, mut usb: UsbSerialJtag, mut delay: Delay) -> ! {
    let mut watch = StuckWatch::new(sniffer.settings());
    let mut symbols = [0u8; FRAME_SYMBOLS];
    // worst case COBS expansion of the frame, plus header and terminator
    let mut wire = [0u8; FRAME_SYMBOLS + (FRAME_SYMBOLS / 254) + 8];
    let mut reported_drops: u32 = 0;

    loop {
        delay.delay_ms(POLL_MS);
        watch.poll(sniffer);

        let used = drain_symbols(sniffer, &mut symbols);
        let total_drops = sniffer.diagnostics().overflows;
        let dropped = total_drops.wrapping_sub(reported_drops) as u16;
        if used == 0 && dropped == 0 {
            continue;
        }
        reported_drops = total_drops;

        let frame = SnoopFrame::new(dropped, &symbols[..used]);
        if let Ok(encoded) = frame.encode_to(&mut wire) {
            let _ = usb.write_bytes(encoded);
        }
    }
}

/// Shared GPIO interrupt: both bus lines land here, and the status
/// register says which edge fired.
#[interrupt]
fn GPIO() {
    let gpio = unsafe { &*GPIO::PTR };
    let status = gpio.status.read().bits();
    let scl_bit = 1u32 << SCL_GPIO;
    let sda_bit = 1u32 << SDA_GPIO;

    // ack first: a new edge arriving while we decode must refire
    gpio.status_w1tc
        .write(|w| unsafe { w.bits(status & (scl_bit | sda_bit)) });

    let sniffer = SNIFFER.load(Ordering::Acquire);
    if sniffer.is_null() {
        return;
    }
    let sniffer = unsafe { &*sniffer };

    if status & scl_bit != 0 {
        sniffer.on_clock_rising(&PinSampler);
    }
    if status & sda_bit != 0 {
        sniffer.on_data_edge(&PinSampler);
    }
}
