use std::time::Duration;

/// End of parameters marker (`Sync_CRC_EOP`), terminates every command.
pub const SYNC_CRC_EOP: u8 = 0x20;

/// Size of the page buffer, the largest page any AVR uses.
pub const PAGE_BUFFER_SIZE: usize = 256;

/// EEPROM is written byte by byte in chunks of this many bytes.
pub const EEPROM_CHUNK: usize = 32;

pub mod commands {
    pub const GET_SYNC: u8 = 0x30;
    pub const GET_SIGN_ON: u8 = 0x31;
    pub const GET_PARAMETER: u8 = 0x41;
    pub const SET_DEVICE: u8 = 0x42;
    pub const SET_DEVICE_EXT: u8 = 0x45;
    pub const ENTER_PROGMODE: u8 = 0x50;
    pub const LEAVE_PROGMODE: u8 = 0x51;
    pub const LOAD_ADDRESS: u8 = 0x55;
    pub const UNIVERSAL: u8 = 0x56;
    pub const PROG_FLASH: u8 = 0x60;
    pub const PROG_DATA: u8 = 0x61;
    pub const PROG_PAGE: u8 = 0x64;
    pub const READ_PAGE: u8 = 0x74;
    pub const READ_SIGN: u8 = 0x75;
}

pub mod responses {
    pub const OK: u8 = 0x10;
    pub const FAILED: u8 = 0x13;
    pub const INSYNC: u8 = 0x14;
    pub const NOSYNC: u8 = 0x15;
    pub const UNKNOWN: u8 = 0x15;
}

/// `GET_PARAMETER` ids and the values reported for them.
pub mod parameters {
    pub const HW_VER: u8 = 0x80;
    pub const SW_MAJOR: u8 = 0x81;
    pub const SW_MINOR: u8 = 0x82;
    pub const PROGRAMMER_TYPE: u8 = 0x93;

    pub const HW_VER_VALUE: u8 = 2;
    pub const SW_MAJOR_VALUE: u8 = 1;
    pub const SW_MINOR_VALUE: u8 = 18;
    /// Serial programmer
    pub const PROGRAMMER_TYPE_VALUE: u8 = b'S';
}

/// AVR serial programming instruction set (first byte of each 4-byte exchange).
pub mod isp {
    pub const PROGRAMMING_ENABLE: [u8; 4] = [0xac, 0x53, 0x00, 0x00];
    pub const LOAD_PROGRAM_PAGE_LOW: u8 = 0x40;
    pub const LOAD_PROGRAM_PAGE_HIGH: u8 = 0x48;
    pub const WRITE_PROGRAM_PAGE: u8 = 0x4c;
    pub const READ_PROGRAM_LOW: u8 = 0x20;
    pub const READ_PROGRAM_HIGH: u8 = 0x28;
    pub const WRITE_EEPROM: u8 = 0xc0;
    pub const READ_EEPROM: u8 = 0xa0;
    pub const READ_SIGNATURE: u8 = 0x30;
}

pub const SIGN_ON_MESSAGE: &[u8] = b"AVR ISP";

/// Hold time when forcing reset before the programming pulse.
pub const RESET_SETTLE_DELAY: Duration = Duration::from_millis(30);
/// Reset pulse width, attiny85 needs at least 2.5us + 2 clocks.
pub const RESET_PULSE_WIDTH: Duration = Duration::from_micros(10);
/// Wait before the first ISP instruction, datasheets ask for at least 20ms.
pub const POST_RESET_DELAY: Duration = Duration::from_millis(30);
pub const PAGE_COMMIT_DELAY: Duration = Duration::from_millis(10);
pub const EEPROM_WRITE_DELAY: Duration = Duration::from_millis(45);
pub const LEAVE_PROGMODE_DELAY: Duration = Duration::from_millis(5);

pub const DEFAULT_SPI_FREQUENCY: u32 = 125_000;
pub const DEFAULT_PORT: u16 = 328;
