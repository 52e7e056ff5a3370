//! Page-aligned flash and EEPROM programming.

use anyhow::Result;

use crate::{
    bus::Bus,
    constants::{
        EEPROM_CHUNK, EEPROM_WRITE_DELAY, PAGE_BUFFER_SIZE, PAGE_COMMIT_DELAY, isp,
        responses::{FAILED, INSYNC, OK},
    },
    isp::AvrIsp,
    protocol::MemoryType,
    transport::Transport,
};

const LOW: u8 = 0;
const HIGH: u8 = 1;

/// Scratch space for one page transfer. Overwritten on every use, never cleared.
pub struct PageBuffer([u8; PAGE_BUFFER_SIZE]);

impl PageBuffer {
    pub fn new() -> Self {
        PageBuffer([0u8; PAGE_BUFFER_SIZE])
    }

    /// Fill the buffer with `n` bytes from the client.
    pub fn fill<T: Transport + ?Sized>(&mut self, client: &mut T, n: usize) -> Result<()> {
        anyhow::ensure!(n <= PAGE_BUFFER_SIZE, "{} bytes do not fit the page buffer", n);
        client.read_exact(&mut self.0[..n])
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl Default for PageBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Split an EEPROM write at byte address `start` into chunks of at most
/// `EEPROM_CHUNK` bytes.
pub fn eeprom_chunks(start: u32, length: usize) -> impl Iterator<Item = (u32, usize)> {
    (0..length)
        .step_by(EEPROM_CHUNK)
        .map(move |offset| (start + offset as u32, EEPROM_CHUNK.min(length - offset)))
}

impl<B: Bus> AvrIsp<B> {
    fn flash(&mut self, hilo: u8, addr: u16, data: u8) -> Result<()> {
        let [hi, lo] = addr.to_be_bytes();
        self.spi_transaction(isp::LOAD_PROGRAM_PAGE_LOW + 8 * hilo, hi, lo, data)?;
        Ok(())
    }

    fn commit(&mut self, addr: u16) -> Result<()> {
        log::trace!("commit page 0x{:04x}", addr);
        let [hi, lo] = addr.to_be_bytes();
        self.spi_transaction(isp::WRITE_PROGRAM_PAGE, hi, lo, 0)?;
        self.delay(PAGE_COMMIT_DELAY);
        Ok(())
    }

    fn flash_read(&mut self, hilo: u8, addr: u16) -> Result<u8> {
        let [hi, lo] = addr.to_be_bytes();
        self.spi_transaction(isp::READ_PROGRAM_LOW + 8 * hilo, hi, lo, 0)
    }

    pub(crate) fn program_page<T: Transport + ?Sized>(
        &mut self,
        client: &mut T,
        length: usize,
        memory: MemoryType,
    ) -> Result<()> {
        match memory {
            MemoryType::Flash => self.write_flash(client, length),
            MemoryType::Eeprom => {
                let result = self.write_eeprom(client, length)?;
                if self.check_sync(client)? {
                    client.write_all(&[INSYNC, result])?;
                }
                Ok(())
            }
            MemoryType::Other(tag) => {
                log::warn!("cannot program memory type 0x{:02x}", tag);
                client.write_all(&[FAILED])
            }
        }
    }

    fn write_flash<T: Transport + ?Sized>(&mut self, client: &mut T, length: usize) -> Result<()> {
        if length > PAGE_BUFFER_SIZE {
            log::warn!("flash page of {} bytes exceeds the page buffer", length);
            for _ in 0..length {
                client.read_byte()?;
            }
            if self.check_sync(client)? {
                client.write_all(&[INSYNC, FAILED])?;
            }
            return Ok(());
        }

        self.buff.fill(client, length)?;
        if self.check_sync(client)? {
            let status = self.write_flash_pages(length)?;
            client.write_all(&[INSYNC, status])?;
        }
        Ok(())
    }

    /// Program `length` bytes of the page buffer at `here`, committing each
    /// page once the address leaves it, and the last one at the end.
    pub(crate) fn write_flash_pages(&mut self, length: usize) -> Result<u8> {
        if length == 0 {
            return Ok(OK);
        }
        let mut page = self.params.addr_page(self.here);
        let mut x = 0;
        while x < length {
            std::thread::yield_now();
            let current = self.params.addr_page(self.here);
            if page != current {
                self.commit(page)?;
                page = current;
            }
            let low = self.buff.as_slice()[x];
            // odd length, pad the last word
            let high = if x + 1 < length {
                self.buff.as_slice()[x + 1]
            } else {
                0xff
            };
            self.flash(LOW, self.here, low)?;
            self.flash(HIGH, self.here, high)?;
            self.here = self.here.wrapping_add(1);
            x += 2;
        }
        self.commit(page)?;
        Ok(OK)
    }

    /// Write `length` bytes to EEPROM at byte address `here * 2`.
    ///
    /// Nothing is read from the client when the write does not fit the EEPROM.
    pub(crate) fn write_eeprom<T: Transport + ?Sized>(
        &mut self,
        client: &mut T,
        length: usize,
    ) -> Result<u8> {
        // here is a word address, get the byte address
        let start = self.here as u32 * 2;
        if length > self.params.eeprom_size as usize {
            log::warn!(
                "EEPROM write of {} bytes exceeds EEPROM size {}",
                length,
                self.params.eeprom_size
            );
            self.sync_error();
            return Ok(FAILED);
        }
        for (addr, len) in eeprom_chunks(start, length) {
            self.write_eeprom_chunk(client, addr, len)?;
        }
        Ok(OK)
    }

    /// Write byte by byte, `start` is a byte address.
    fn write_eeprom_chunk<T: Transport + ?Sized>(
        &mut self,
        client: &mut T,
        start: u32,
        length: usize,
    ) -> Result<()> {
        self.buff.fill(client, length)?;
        for x in 0..length {
            let addr = start + x as u32;
            let data = self.buff.as_slice()[x];
            self.spi_transaction(isp::WRITE_EEPROM, (addr >> 8) as u8, addr as u8, data)?;
            self.delay(EEPROM_WRITE_DELAY);
        }
        Ok(())
    }

    pub(crate) fn read_page<T: Transport + ?Sized>(
        &mut self,
        client: &mut T,
        length: usize,
        memory: MemoryType,
    ) -> Result<()> {
        if !self.check_sync(client)? {
            return Ok(());
        }
        client.write_all(&[INSYNC])?;
        let data = match memory {
            MemoryType::Flash => self.flash_read_page(length)?,
            MemoryType::Eeprom => self.eeprom_read_page(length)?,
            MemoryType::Other(tag) => {
                log::warn!("cannot read memory type 0x{:02x}", tag);
                vec![FAILED]
            }
        };
        client.write_all(&data)
    }

    /// Read `length` bytes of flash from `here`, followed by the OK status.
    pub(crate) fn flash_read_page(&mut self, length: usize) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(length + 1);
        for x in (0..length).step_by(2) {
            data.push(self.flash_read(LOW, self.here)?);
            let high = self.flash_read(HIGH, self.here)?;
            if x + 1 < length {
                data.push(high);
            }
            self.here = self.here.wrapping_add(1);
        }
        data.push(OK);
        Ok(data)
    }

    /// Read `length` bytes of EEPROM from byte address `here * 2`, followed by
    /// the OK status. `here` is left alone.
    pub(crate) fn eeprom_read_page(&mut self, length: usize) -> Result<Vec<u8>> {
        let start = self.here as u32 * 2;
        let mut data = Vec::with_capacity(length + 1);
        for x in 0..length {
            let addr = start + x as u32;
            let ee = self.spi_transaction(isp::READ_EEPROM, (addr >> 8) as u8, addr as u8, 0xff)?;
            data.push(ee);
        }
        data.push(OK);
        Ok(data)
    }
}
