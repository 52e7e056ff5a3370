//! Hardware side of the programmer: the SPI bus and the target's reset line.
use std::time::Duration;

use anyhow::Result;

pub use self::hal::{ClockRate, HalBus};

mod hal;
#[cfg(target_os = "linux")]
pub mod linux;

/// Abstraction of the ISP bus between the bridge and the target chip.
pub trait Bus {
    /// Claim the bus for programming at `clock_hz`.
    fn begin(&mut self, clock_hz: u32) -> Result<()>;

    /// Release the bus so the target can use its SPI pins again.
    fn end(&mut self) -> Result<()>;

    /// Change the clock rate of an already claimed bus.
    fn set_clock(&mut self, clock_hz: u32) -> Result<()>;

    /// One full-duplex 4-byte exchange, returns the byte received while
    /// clocking out the last one.
    fn transaction(&mut self, cmd: [u8; 4]) -> Result<u8>;

    /// Drive the reset pin to a raw electrical level.
    fn set_reset_pin(&mut self, high: bool) -> Result<()>;

    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
