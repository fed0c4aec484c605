#![no_std]
#![no_main]

extern crate alloc;

use busybody_esp32c3 as platform;
use esp32c3_hal::{
    clock::ClockControl, peripherals::Peripherals, prelude::*, timer::TimerGroup, Delay, Rtc,
    UsbSerialJtag, IO,
};
use esp_backtrace as _;
use esp_println::println;
use sniffer::SnifferSettingsOverrides;

#[entry]
fn main() -> ! {
    unsafe {
        platform::heap::init();
    }

    let peripherals = Peripherals::take();
    let mut system = peripherals.SYSTEM.split();
    let clocks = ClockControl::boot_defaults(system.clock_control).freeze();

    // Disable the RTC and TIMG watchdog timers
    let mut rtc = Rtc::new(peripherals.RTC_CNTL);
    let timer_group0 = TimerGroup::new(
        peripherals.TIMG0,
        &clocks,
        &mut system.peripheral_clock_control,
    );
    let mut wdt0 = timer_group0.wdt;
    let timer_group1 = TimerGroup::new(
        peripherals.TIMG1,
        &clocks,
        &mut system.peripheral_clock_control,
    );
    let mut wdt1 = timer_group1.wdt;
    rtc.swd.disable();
    rtc.rwdt.disable();
    wdt0.disable();
    wdt1.disable();

    println!(
        "busybody: watching SCL=gpio{} SDA=gpio{}",
        platform::SCL_GPIO,
        platform::SDA_GPIO
    );

    let settings = SnifferSettingsOverrides::default().into_settings();
    let sniffer = platform::init(settings);

    let io = IO::new(peripherals.GPIO, peripherals.IO_MUX);
    // the sniffer must exist before the first edge can fire
    platform::arm(io);

    let usb = UsbSerialJtag::new(peripherals.USB_DEVICE);
    let delay = Delay::new(&clocks);
    platform::run(sniffer, usb, delay)
}
