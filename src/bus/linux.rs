//! Linux spidev + gpio-cdev backend.
use anyhow::Result;
use linux_embedded_hal::{
    CdevPin, Delay, SpidevBus,
    gpio_cdev::{Chip, LineRequestFlags},
    spidev::{SpiModeFlags, SpidevOptions},
};

use super::{ClockRate, HalBus};
use crate::config::{ResetConfig, SpiConfig};

pub type LinuxBus = HalBus<SpidevBus, CdevPin, Delay>;

impl ClockRate for SpidevBus {
    fn set_clock_rate(&mut self, hz: u32) -> Result<()> {
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(hz)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        self.0.configure(&options)?;
        Ok(())
    }
}

/// Open the SPI device and request the reset line, leaving reset at its idle level.
pub fn open(spi: &SpiConfig, reset: &ResetConfig) -> Result<LinuxBus> {
    log::info!(
        "Opening SPI device {} @ {} Hz",
        spi.device.display(),
        spi.frequency
    );
    let mut bus = SpidevBus::open(&spi.device)
        .map_err(|e| anyhow::format_err!("cannot open {}: {}", spi.device.display(), e))?;
    bus.set_clock_rate(spi.frequency)?;

    log::info!(
        "Using reset line {} of {}",
        reset.line,
        reset.gpio_chip.display()
    );
    let mut chip = Chip::new(&reset.gpio_chip)?;
    let idle_level = reset.pin_level(reset.idle_asserted) as u8;
    let handle =
        chip.get_line(reset.line)?
            .request(LineRequestFlags::OUTPUT, idle_level, "avrisp-net reset")?;
    let pin = CdevPin::new(handle)?;

    Ok(HalBus::new(bus, pin, Delay))
}
