//! Abstract client transport interface.
use anyhow::Result;

pub use self::tcp::TcpTransport;

mod tcp;

/// Abstraction of the byte stream the programming client talks over.
/// Might be a TCP connection, a serial port, or an in-memory buffer.
pub trait Transport {
    /// Read one byte, waiting until one arrives.
    ///
    /// This is the only place the interpreter gives control away while a
    /// command is in flight. Errors when the peer has gone away.
    fn read_byte(&mut self) -> Result<u8>;

    fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Whether a byte can be read right now without waiting.
    fn available(&mut self) -> Result<bool>;

    fn connected(&mut self) -> bool;

    fn close(&mut self) -> Result<()>;

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        for b in buf.iter_mut() {
            *b = self.read_byte()?;
        }
        Ok(())
    }
}
