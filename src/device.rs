//! Target device description, as reported by the client with `SET_DEVICE`.
use anyhow::Result;
use scroll::{BE, Pread};

/// Length of the `SET_DEVICE` parameter block.
pub const DEVICE_PARAMETERS_LEN: usize = 20;

/// STK500 device parameters. Multi-byte fields are big endian on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceParameters {
    pub device_code: u8,
    pub revision: u8,
    pub prog_type: u8,
    pub par_mode: u8,
    pub polling: u8,
    pub self_timed: u8,
    pub lock_bytes: u8,
    pub fuse_bytes: u8,
    pub flash_poll: u8,
    pub eeprom_poll: u16,
    /// Flash page size in bytes
    pub page_size: u16,
    pub eeprom_size: u16,
    pub flash_size: u32,
}

impl DeviceParameters {
    pub fn from_raw(raw: &[u8]) -> Result<Self> {
        anyhow::ensure!(
            raw.len() >= DEVICE_PARAMETERS_LEN,
            "device parameter block too short: {} bytes",
            raw.len()
        );
        // raw[9] repeats the flash polling value and is ignored
        Ok(DeviceParameters {
            device_code: raw[0],
            revision: raw[1],
            prog_type: raw[2],
            par_mode: raw[3],
            polling: raw[4],
            self_timed: raw[5],
            lock_bytes: raw[6],
            fuse_bytes: raw[7],
            flash_poll: raw[8],
            eeprom_poll: raw.pread_with(10, BE)?,
            page_size: raw.pread_with(12, BE)?,
            eeprom_size: raw.pread_with(14, BE)?,
            flash_size: raw.pread_with(16, BE)?,
        })
    }

    /// Start of the flash page holding word address `addr`.
    ///
    /// Unknown page sizes leave the address unmasked.
    pub fn addr_page(&self, addr: u16) -> u16 {
        match self.page_size {
            32 => addr & 0xfff0,
            64 => addr & 0xffe0,
            128 => addr & 0xffc0,
            256 => addr & 0xff80,
            other => {
                log::debug!("unknown page size: {}", other);
                addr
            }
        }
    }
}

impl ::std::fmt::Display for DeviceParameters {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        write!(
            f,
            "device 0x{:02x} (Flash: {} bytes, page: {} bytes, EEPROM: {} bytes)",
            self.device_code, self.flash_size, self.page_size, self.eeprom_size,
        )
    }
}
