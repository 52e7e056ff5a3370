//! The STK500 (v1) command subset spoken by avrdude's `arduino` programmer

use anyhow::Result;

use crate::{
    constants::{SYNC_CRC_EOP, commands},
    device::DEVICE_PARAMETERS_LEN,
    transport::Transport,
};

/// Memory selected by `PROG_PAGE` and `READ_PAGE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryType {
    Flash,
    Eeprom,
    Other(u8),
}

impl From<u8> for MemoryType {
    fn from(value: u8) -> Self {
        match value {
            b'F' => MemoryType::Flash,
            b'E' => MemoryType::Eeprom,
            other => MemoryType::Other(other),
        }
    }
}

/// STK500 command, with the fixed arguments that precede the end of
/// parameters marker. Page data and the marker itself are left on the stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    GetSync,
    GetSignOn,
    GetParameter { id: u8 },
    /// Device parameter block, see `DeviceParameters`
    SetDevice { raw: [u8; DEVICE_PARAMETERS_LEN] },
    /// Extended parameters, ignored
    SetDeviceExt { raw: [u8; 5] },
    EnterProgMode,
    /// Ends the session
    LeaveProgMode,
    /// Word address, little endian on the wire
    LoadAddress { address: u16 },
    /// Accepted but not implemented, use `ProgPage`
    ProgFlash { low: u8, high: u8 },
    /// Accepted but not implemented, use `ProgPage`
    ProgData { data: u8 },
    /// `length` data bytes and the marker follow
    ProgPage { length: u16, memory: MemoryType },
    ReadPage { length: u16, memory: MemoryType },
    ReadSign,
    /// Raw ISP instruction
    Universal { instruction: [u8; 4] },
    /// A bare marker where a command was expected
    OutOfSync,
    Unknown(u8),
}

impl Command {
    /// Read a command byte and its fixed arguments.
    pub fn read<T: Transport + ?Sized>(client: &mut T) -> Result<Self> {
        let code = client.read_byte()?;
        let cmd = match code {
            commands::GET_SYNC => Command::GetSync,
            commands::GET_SIGN_ON => Command::GetSignOn,
            commands::GET_PARAMETER => Command::GetParameter {
                id: client.read_byte()?,
            },
            commands::SET_DEVICE => {
                let mut raw = [0u8; DEVICE_PARAMETERS_LEN];
                client.read_exact(&mut raw)?;
                Command::SetDevice { raw }
            }
            commands::SET_DEVICE_EXT => {
                let mut raw = [0u8; 5];
                client.read_exact(&mut raw)?;
                Command::SetDeviceExt { raw }
            }
            commands::ENTER_PROGMODE => Command::EnterProgMode,
            commands::LEAVE_PROGMODE => Command::LeaveProgMode,
            commands::LOAD_ADDRESS => {
                let mut raw = [0u8; 2];
                client.read_exact(&mut raw)?;
                Command::LoadAddress {
                    address: u16::from_le_bytes(raw),
                }
            }
            commands::PROG_FLASH => {
                let low = client.read_byte()?;
                let high = client.read_byte()?;
                Command::ProgFlash { low, high }
            }
            commands::PROG_DATA => Command::ProgData {
                data: client.read_byte()?,
            },
            commands::PROG_PAGE => {
                let (length, memory) = read_page_header(client)?;
                Command::ProgPage { length, memory }
            }
            commands::READ_PAGE => {
                let (length, memory) = read_page_header(client)?;
                Command::ReadPage { length, memory }
            }
            commands::READ_SIGN => Command::ReadSign,
            commands::UNIVERSAL => {
                let mut instruction = [0u8; 4];
                client.read_exact(&mut instruction)?;
                Command::Universal { instruction }
            }
            SYNC_CRC_EOP => Command::OutOfSync,
            other => Command::Unknown(other),
        };
        Ok(cmd)
    }
}

/// Big endian length followed by the memory type tag.
fn read_page_header<T: Transport + ?Sized>(client: &mut T) -> Result<(u16, MemoryType)> {
    let mut raw = [0u8; 2];
    client.read_exact(&mut raw)?;
    let memory = MemoryType::from(client.read_byte()?);
    Ok((u16::from_be_bytes(raw), memory))
}
