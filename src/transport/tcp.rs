//! TCP Transportation.
use std::{
    io::{ErrorKind, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    time::Duration,
};

use anyhow::Result;

use super::Transport;

/// Socket read timeout, `read_byte` yields and retries after each one.
const READ_TIMEOUT_MS: u64 = 100;

pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
    closed: bool,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Result<Self> {
        let peer = stream.peer_addr()?;
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)))?;
        Ok(TcpTransport {
            stream,
            peer,
            closed: false,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Peek without waiting. `Ok(0)` means the peer closed its end.
    fn peek_now(&mut self) -> std::io::Result<usize> {
        let mut buf = [0u8; 1];
        self.stream.set_nonblocking(true)?;
        let res = self.stream.peek(&mut buf);
        self.stream.set_nonblocking(false)?;
        res
    }
}

impl Transport for TcpTransport {
    fn read_byte(&mut self) -> Result<u8> {
        anyhow::ensure!(!self.closed, "transport already closed");
        let mut buf = [0u8; 1];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => anyhow::bail!("connection closed by {}", self.peer),
                Ok(_) => return Ok(buf[0]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    std::thread::yield_now();
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => (),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        log::trace!("> {}", hex::encode(buf));
        self.stream.write_all(buf)?;
        Ok(())
    }

    fn available(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        match self.peek_now() {
            Ok(n) => Ok(n > 0),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn connected(&mut self) -> bool {
        if self.closed {
            return false;
        }
        match self.peek_now() {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) => matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted),
        }
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            match self.stream.shutdown(Shutdown::Both) {
                Err(e) if e.kind() != ErrorKind::NotConnected => return Err(e.into()),
                _ => (),
            }
        }
        Ok(())
    }
}
