//! In-memory transport and a recording bus for tests.
use std::{cell::RefCell, collections::HashMap, collections::VecDeque, rc::Rc, time::Duration};

use anyhow::Result;

use crate::{bus::Bus, transport::Transport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    Begin(u32),
    End,
    Clock(u32),
    Exchange([u8; 4]),
    ResetPin(bool),
    Delay(Duration),
}

/// Records every bus operation. Exchanges answer from `memory`, keyed on the
/// first three instruction bytes, or 0xff.
#[derive(Debug, Default)]
pub struct MockBus {
    pub ops: Vec<BusOp>,
    pub memory: HashMap<[u8; 3], u8>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exchanges(&self) -> Vec<[u8; 4]> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                BusOp::Exchange(cmd) => Some(*cmd),
                _ => None,
            })
            .collect()
    }

    pub fn exchanges_with(&self, opcode: u8) -> Vec<[u8; 4]> {
        self.exchanges()
            .into_iter()
            .filter(|cmd| cmd[0] == opcode)
            .collect()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                BusOp::Delay(d) => Some(*d),
                _ => None,
            })
            .collect()
    }
}

impl Bus for MockBus {
    fn begin(&mut self, clock_hz: u32) -> Result<()> {
        self.ops.push(BusOp::Begin(clock_hz));
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.ops.push(BusOp::End);
        Ok(())
    }

    fn set_clock(&mut self, clock_hz: u32) -> Result<()> {
        self.ops.push(BusOp::Clock(clock_hz));
        Ok(())
    }

    fn transaction(&mut self, cmd: [u8; 4]) -> Result<u8> {
        self.ops.push(BusOp::Exchange(cmd));
        Ok(*self.memory.get(&[cmd[0], cmd[1], cmd[2]]).unwrap_or(&0xff))
    }

    fn set_reset_pin(&mut self, high: bool) -> Result<()> {
        self.ops.push(BusOp::ResetPin(high));
        Ok(())
    }

    fn delay(&mut self, duration: Duration) {
        self.ops.push(BusOp::Delay(duration));
    }
}

/// Scripted client. Every `write_all` is kept as a separate frame; the
/// frames stay reachable through `frames()` after the transport is dropped.
#[derive(Debug, Default)]
pub struct MockTransport {
    input: VecDeque<u8>,
    frames: Rc<RefCell<Vec<Vec<u8>>>>,
    closed: bool,
    hang_up: bool,
    broken: bool,
}

impl MockTransport {
    pub fn new(input: &[u8]) -> Self {
        MockTransport {
            input: input.iter().copied().collect(),
            ..Default::default()
        }
    }

    /// The peer goes away once all input has been read.
    pub fn hang_up(mut self) -> Self {
        self.hang_up = true;
        self
    }

    /// Every peek and close fails, like a socket reset by the peer.
    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }

    pub fn push(&mut self, input: &[u8]) {
        self.input.extend(input.iter().copied());
    }

    pub fn pending(&self) -> usize {
        self.input.len()
    }

    pub fn frames(&self) -> Rc<RefCell<Vec<Vec<u8>>>> {
        self.frames.clone()
    }

    pub fn output(&self) -> Vec<u8> {
        self.frames.borrow().concat()
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        self.frames.borrow_mut().drain(..).flatten().collect()
    }
}

impl Transport for MockTransport {
    fn read_byte(&mut self) -> Result<u8> {
        anyhow::ensure!(!self.closed, "transport closed");
        self.input
            .pop_front()
            .ok_or_else(|| anyhow::format_err!("no more input"))
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        anyhow::ensure!(!self.closed, "transport closed");
        self.frames.borrow_mut().push(buf.to_vec());
        Ok(())
    }

    fn available(&mut self) -> Result<bool> {
        anyhow::ensure!(!self.broken, "connection reset by peer");
        Ok(!self.closed && !self.input.is_empty())
    }

    fn connected(&mut self) -> bool {
        !self.closed && !(self.hang_up && self.input.is_empty())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        anyhow::ensure!(!self.broken, "transport not connected");
        Ok(())
    }
}
