//! `Bus` on top of the embedded-hal 1.0 traits.
use std::time::Duration;

use anyhow::Result;
use embedded_hal::{delay::DelayNs, digital::OutputPin, spi::SpiBus};

use super::Bus;

/// SPI buses whose clock can be reconfigured at runtime.
pub trait ClockRate {
    fn set_clock_rate(&mut self, hz: u32) -> Result<()>;
}

pub struct HalBus<SPI, RST, D> {
    spi: SPI,
    reset: RST,
    delay: D,
    claimed: bool,
}

impl<SPI, RST, D> HalBus<SPI, RST, D> {
    pub fn new(spi: SPI, reset: RST, delay: D) -> Self {
        HalBus {
            spi,
            reset,
            delay,
            claimed: false,
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed
    }

    pub fn release(self) -> (SPI, RST, D) {
        (self.spi, self.reset, self.delay)
    }
}

impl<SPI, RST, D> Bus for HalBus<SPI, RST, D>
where
    SPI: SpiBus + ClockRate,
    RST: OutputPin,
    D: DelayNs,
{
    fn begin(&mut self, clock_hz: u32) -> Result<()> {
        self.spi.set_clock_rate(clock_hz)?;
        self.claimed = true;
        log::debug!("SPI bus claimed @ {} Hz", clock_hz);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.spi
            .flush()
            .map_err(|e| anyhow::format_err!("SPI flush failed: {:?}", e))?;
        self.claimed = false;
        log::debug!("SPI bus released");
        Ok(())
    }

    fn set_clock(&mut self, clock_hz: u32) -> Result<()> {
        self.spi.set_clock_rate(clock_hz)
    }

    fn transaction(&mut self, cmd: [u8; 4]) -> Result<u8> {
        if !self.claimed {
            log::trace!("SPI exchange on an unclaimed bus");
        }
        let mut buf = cmd;
        self.spi
            .transfer_in_place(&mut buf)
            .map_err(|e| anyhow::format_err!("SPI transfer failed: {:?}", e))?;
        self.spi
            .flush()
            .map_err(|e| anyhow::format_err!("SPI flush failed: {:?}", e))?;
        log::trace!("spi {} -> {:02x}", hex::encode(cmd), buf[3]);
        Ok(buf[3])
    }

    fn set_reset_pin(&mut self, high: bool) -> Result<()> {
        let res = if high {
            self.reset.set_high()
        } else {
            self.reset.set_low()
        };
        res.map_err(|e| anyhow::format_err!("failed to drive reset pin: {:?}", e))
    }

    fn delay(&mut self, duration: Duration) {
        let us = u32::try_from(duration.as_micros()).unwrap_or(u32::MAX);
        self.delay.delay_us(us);
    }
}
