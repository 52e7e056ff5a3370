//! STK500 command interpreter and programming mode control.

use anyhow::Result;

use crate::{
    bus::Bus,
    config::ResetConfig,
    constants::{
        LEAVE_PROGMODE_DELAY, POST_RESET_DELAY, RESET_PULSE_WIDTH, RESET_SETTLE_DELAY,
        SIGN_ON_MESSAGE, SYNC_CRC_EOP, isp, parameters,
        responses::{INSYNC, NOSYNC, OK, UNKNOWN},
    },
    device::DeviceParameters,
    flashing::PageBuffer,
    protocol::Command,
    transport::Transport,
};

/// What the session should do after a command has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// Programming finished, the connection can be closed.
    End,
}

/// The programmer: owns the bus and everything the client configures.
pub struct AvrIsp<B: Bus> {
    bus: B,
    spi_freq: u32,
    reset: ResetConfig,
    pub(crate) params: DeviceParameters,
    pub(crate) buff: PageBuffer,
    /// Word address for reading and writing, set by `LOAD_ADDRESS`
    pub(crate) here: u16,
    /// Sync errors since the last `GET_SYNC`
    pub(crate) error: u32,
    /// In programming mode, so the bus must be released when the client leaves
    pmode: bool,
}

impl<B: Bus> AvrIsp<B> {
    /// Takes over the bus and puts the reset line in its idle state.
    pub fn new(bus: B, spi_freq: u32, reset: ResetConfig) -> Result<Self> {
        let mut avrisp = AvrIsp {
            bus,
            spi_freq,
            reset,
            params: DeviceParameters::default(),
            buff: PageBuffer::new(),
            here: 0,
            error: 0,
            pmode: false,
        };
        avrisp.set_reset(avrisp.reset.idle_asserted)?;
        Ok(avrisp)
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn parameters(&self) -> &DeviceParameters {
        &self.params
    }

    pub fn address(&self) -> u16 {
        self.here
    }

    pub fn error_count(&self) -> u32 {
        self.error
    }

    pub fn in_pmode(&self) -> bool {
        self.pmode
    }

    pub fn set_spi_frequency(&mut self, hz: u32) -> Result<()> {
        self.spi_freq = hz;
        if self.pmode {
            self.bus.set_clock(hz)?;
        }
        Ok(())
    }

    /// Control the logical state of the target's reset line.
    pub fn set_reset(&mut self, asserted: bool) -> Result<()> {
        self.bus.set_reset_pin(self.reset.pin_level(asserted))
    }

    pub fn start_pmode(&mut self) -> Result<()> {
        self.bus.begin(self.spi_freq)?;

        if !self.reset.idle_asserted {
            // reset is inactive by default, so start with it active
            self.set_reset(true)?;
            self.bus.delay(RESET_SETTLE_DELAY);
        }

        self.set_reset(false)?;
        self.bus.delay(RESET_PULSE_WIDTH);
        self.set_reset(true)?;

        self.bus.delay(POST_RESET_DELAY);

        let echo = self.bus.transaction(isp::PROGRAMMING_ENABLE)?;
        if echo != isp::PROGRAMMING_ENABLE[1] {
            log::debug!("programming enable not echoed, got 0x{:02x}", echo);
        }
        self.pmode = true;
        log::info!("Entered programming mode");
        Ok(())
    }

    /// Leave programming mode. Does nothing unless it was entered.
    pub fn end_pmode(&mut self) -> Result<()> {
        if self.pmode {
            self.bus.end()?;
            self.set_reset(self.reset.idle_asserted)?;
            self.pmode = false;
            log::info!("Left programming mode");
        }
        Ok(())
    }

    /// Pulse the reset line so the target restarts its firmware.
    pub fn reset_target(&mut self) -> Result<()> {
        self.end_pmode()?;
        self.set_reset(true)?;
        self.bus.delay(RESET_SETTLE_DELAY);
        self.set_reset(self.reset.idle_asserted)?;
        log::info!("Target reset");
        Ok(())
    }

    pub(crate) fn spi_transaction(&mut self, a: u8, b: u8, c: u8, d: u8) -> Result<u8> {
        self.bus.transaction([a, b, c, d])
    }

    pub(crate) fn delay(&mut self, duration: std::time::Duration) {
        self.bus.delay(duration);
    }

    pub fn read_signature_bytes(&mut self) -> Result<[u8; 3]> {
        let mut sig = [0u8; 3];
        for (i, b) in sig.iter_mut().enumerate() {
            *b = self.spi_transaction(isp::READ_SIGNATURE, 0x00, i as u8, 0x00)?;
        }
        Ok(sig)
    }

    pub(crate) fn sync_error(&mut self) {
        self.error = self.error.saturating_add(1);
    }

    /// Consume the end of parameters marker. Answers NOSYNC when it is missing.
    pub(crate) fn check_sync<T: Transport + ?Sized>(&mut self, client: &mut T) -> Result<bool> {
        let b = client.read_byte()?;
        if b == SYNC_CRC_EOP {
            Ok(true)
        } else {
            log::warn!("out of sync: expected marker, got 0x{:02x}", b);
            self.sync_error();
            client.write_all(&[NOSYNC])?;
            Ok(false)
        }
    }

    fn empty_reply<T: Transport + ?Sized>(&mut self, client: &mut T) -> Result<()> {
        if self.check_sync(client)? {
            client.write_all(&[INSYNC, OK])?;
        }
        Ok(())
    }

    fn byte_reply<T: Transport + ?Sized>(&mut self, client: &mut T, b: u8) -> Result<()> {
        if self.check_sync(client)? {
            client.write_all(&[INSYNC, b, OK])?;
        }
        Ok(())
    }

    /// Handle one incoming STK500 command.
    pub fn handle_command<T: Transport + ?Sized>(&mut self, client: &mut T) -> Result<Outcome> {
        let cmd = Command::read(client)?;
        log::debug!("=> {:x?}", cmd);

        match cmd {
            Command::GetSync => {
                self.error = 0;
                self.empty_reply(client)?;
            }
            Command::GetSignOn => {
                if self.check_sync(client)? {
                    let mut resp = Vec::with_capacity(SIGN_ON_MESSAGE.len() + 2);
                    resp.push(INSYNC);
                    resp.extend_from_slice(SIGN_ON_MESSAGE);
                    resp.push(OK);
                    client.write_all(&resp)?;
                }
            }
            Command::GetParameter { id } => {
                let value = match id {
                    parameters::HW_VER => parameters::HW_VER_VALUE,
                    parameters::SW_MAJOR => parameters::SW_MAJOR_VALUE,
                    parameters::SW_MINOR => parameters::SW_MINOR_VALUE,
                    parameters::PROGRAMMER_TYPE => parameters::PROGRAMMER_TYPE_VALUE,
                    _ => 0,
                };
                self.byte_reply(client, value)?;
            }
            Command::SetDevice { raw } => {
                if self.check_sync(client)? {
                    self.params = DeviceParameters::from_raw(&raw)?;
                    log::info!("Target: {}", self.params);
                    client.write_all(&[INSYNC, OK])?;
                }
            }
            Command::SetDeviceExt { .. } => self.empty_reply(client)?,
            Command::EnterProgMode => {
                if self.check_sync(client)? {
                    self.start_pmode()?;
                    client.write_all(&[INSYNC, OK])?;
                }
            }
            Command::LeaveProgMode => {
                self.error = 0;
                self.end_pmode()?;
                self.empty_reply(client)?;
                self.bus.delay(LEAVE_PROGMODE_DELAY);
                return Ok(Outcome::End);
            }
            Command::LoadAddress { address } => {
                if self.check_sync(client)? {
                    self.here = address;
                    client.write_all(&[INSYNC, OK])?;
                }
            }
            Command::ProgFlash { .. } | Command::ProgData { .. } => {
                log::debug!("single byte programming is not supported, ignored");
                self.empty_reply(client)?;
            }
            Command::ProgPage { length, memory } => {
                self.program_page(client, length as usize, memory)?
            }
            Command::ReadPage { length, memory } => {
                self.read_page(client, length as usize, memory)?
            }
            Command::ReadSign => {
                if self.check_sync(client)? {
                    let [high, middle, low] = self.read_signature_bytes()?;
                    client.write_all(&[INSYNC, high, middle, low, OK])?;
                }
            }
            Command::Universal { instruction } => {
                if self.check_sync(client)? {
                    let b = self.bus.transaction(instruction)?;
                    client.write_all(&[INSYNC, b, OK])?;
                }
            }
            Command::OutOfSync => {
                self.sync_error();
                client.write_all(&[NOSYNC])?;
            }
            Command::Unknown(code) => {
                log::warn!("unexpected command: 0x{:02x}", code);
                self.sync_error();
                if client.read_byte()? == SYNC_CRC_EOP {
                    client.write_all(&[UNKNOWN])?;
                } else {
                    client.write_all(&[NOSYNC])?;
                }
            }
        }
        Ok(Outcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        constants::responses::FAILED,
        mock::{BusOp, MockBus, MockTransport},
    };

    fn avrisp() -> AvrIsp<MockBus> {
        AvrIsp::new(MockBus::new(), 125_000, ResetConfig::default()).unwrap()
    }

    fn run(avrisp: &mut AvrIsp<MockBus>, input: &[u8]) -> (Vec<u8>, Vec<Outcome>) {
        let mut client = MockTransport::new(input);
        let mut outcomes = vec![];
        while client.pending() > 0 {
            outcomes.push(avrisp.handle_command(&mut client).unwrap());
        }
        (client.output(), outcomes)
    }

    #[test]
    fn new_puts_reset_in_idle_state() {
        let avrisp = avrisp();
        // active low reset, released: pin high
        assert_eq!(avrisp.bus().ops, vec![BusOp::ResetPin(true)]);
    }

    #[test]
    fn get_sync() {
        let mut avrisp = avrisp();
        let (out, _) = run(&mut avrisp, &[0x30, 0x20]);
        assert_eq!(out, vec![INSYNC, OK]);
        assert_eq!(avrisp.error_count(), 0);
    }

    #[test]
    fn wrong_marker_counts_and_get_sync_recovers() {
        let mut avrisp = avrisp();
        let (out, _) = run(&mut avrisp, &[0x30, 0x21]);
        assert_eq!(out, vec![NOSYNC]);
        assert_eq!(avrisp.error_count(), 1);

        let (out, _) = run(&mut avrisp, &[0x30, 0x20]);
        assert_eq!(out, vec![INSYNC, OK]);
        assert_eq!(avrisp.error_count(), 0);
    }

    #[test]
    fn sign_on() {
        let mut avrisp = avrisp();
        let (out, _) = run(&mut avrisp, &[0x31, 0x20]);
        assert_eq!(out, b"\x14AVR ISP\x10".to_vec());

        let (out, _) = run(&mut avrisp, &[0x31, 0x00]);
        assert_eq!(out, vec![NOSYNC]);
        assert_eq!(avrisp.error_count(), 1);
    }

    #[test]
    fn get_parameter_table() {
        let mut avrisp = avrisp();
        let (out, _) = run(
            &mut avrisp,
            &[
                0x41, 0x80, 0x20, 0x41, 0x81, 0x20, 0x41, 0x82, 0x20, 0x41, 0x93, 0x20, 0x41, 0x98,
                0x20,
            ],
        );
        assert_eq!(
            out,
            vec![
                INSYNC, 2, OK, INSYNC, 1, OK, INSYNC, 18, OK, INSYNC, b'S', OK, INSYNC, 0, OK
            ]
        );
    }

    #[test]
    fn set_device_then_firmware_minor() {
        let mut avrisp = avrisp();
        let mut input = vec![0x42];
        let mut raw = [0u8; 20];
        raw[12] = 0x00;
        raw[13] = 0x80;
        raw[14] = 0x02;
        raw[15] = 0x00;
        input.extend_from_slice(&raw);
        input.extend_from_slice(&[0x20, 0x41, 0x82, 0x20]);

        let (out, _) = run(&mut avrisp, &input);
        assert_eq!(out, vec![INSYNC, OK, INSYNC, 18, OK]);
        assert_eq!(avrisp.parameters().page_size, 128);
        assert_eq!(avrisp.parameters().eeprom_size, 512);
    }

    #[test]
    fn set_device_out_of_sync_keeps_parameters() {
        let mut avrisp = avrisp();
        let mut input = vec![0x42];
        input.extend_from_slice(&[0x11; 20]);
        input.push(0x00);

        let (out, _) = run(&mut avrisp, &input);
        assert_eq!(out, vec![NOSYNC]);
        assert_eq!(*avrisp.parameters(), DeviceParameters::default());
    }

    #[test]
    fn set_device_ext_is_ignored() {
        let mut avrisp = avrisp();
        let (out, _) = run(&mut avrisp, &[0x45, 1, 2, 3, 4, 5, 0x20]);
        assert_eq!(out, vec![INSYNC, OK]);
        assert_eq!(*avrisp.parameters(), DeviceParameters::default());
    }

    #[test]
    fn enter_progmode_sequence() {
        let mut avrisp = avrisp();
        avrisp.bus_mut().ops.clear();
        let (out, _) = run(&mut avrisp, &[0x50, 0x20]);
        assert_eq!(out, vec![INSYNC, OK]);
        assert!(avrisp.in_pmode());
        assert_eq!(
            avrisp.bus().ops,
            vec![
                BusOp::Begin(125_000),
                BusOp::ResetPin(false),
                BusOp::Delay(Duration::from_millis(30)),
                BusOp::ResetPin(true),
                BusOp::Delay(Duration::from_micros(10)),
                BusOp::ResetPin(false),
                BusOp::Delay(Duration::from_millis(30)),
                BusOp::Exchange([0xac, 0x53, 0x00, 0x00]),
            ]
        );
    }

    #[test]
    fn enter_progmode_with_reset_held_skips_settle() {
        let reset = ResetConfig {
            idle_asserted: true,
            ..Default::default()
        };
        let mut avrisp = AvrIsp::new(MockBus::new(), 125_000, reset).unwrap();
        avrisp.start_pmode().unwrap();
        assert_eq!(
            avrisp.bus().ops,
            vec![
                BusOp::ResetPin(false),
                BusOp::Begin(125_000),
                BusOp::ResetPin(true),
                BusOp::Delay(Duration::from_micros(10)),
                BusOp::ResetPin(false),
                BusOp::Delay(Duration::from_millis(30)),
                BusOp::Exchange([0xac, 0x53, 0x00, 0x00]),
            ]
        );
    }

    #[test]
    fn enter_progmode_out_of_sync_does_nothing() {
        let mut avrisp = avrisp();
        avrisp.bus_mut().ops.clear();
        let (out, _) = run(&mut avrisp, &[0x50, 0x00]);
        assert_eq!(out, vec![NOSYNC]);
        assert!(!avrisp.in_pmode());
        assert!(avrisp.bus().ops.is_empty());
    }

    #[test]
    fn leave_progmode_ends_session() {
        let mut avrisp = avrisp();
        run(&mut avrisp, &[0x50, 0x20, 0x30, 0x00]);
        assert_eq!(avrisp.error_count(), 1);
        avrisp.bus_mut().ops.clear();

        let (out, outcomes) = run(&mut avrisp, &[0x51, 0x20]);
        assert_eq!(out, vec![INSYNC, OK]);
        assert_eq!(outcomes, vec![Outcome::End]);
        assert!(!avrisp.in_pmode());
        assert_eq!(avrisp.error_count(), 0);
        assert_eq!(
            avrisp.bus().ops,
            vec![
                BusOp::End,
                BusOp::ResetPin(true),
                BusOp::Delay(Duration::from_millis(5)),
            ]
        );
    }

    #[test]
    fn leave_progmode_without_progmode() {
        let mut avrisp = avrisp();
        let (out, outcomes) = run(&mut avrisp, &[0x51, 0x20]);
        assert_eq!(out, vec![INSYNC, OK]);
        assert_eq!(outcomes, vec![Outcome::End]);
        assert!(!avrisp.bus().ops.contains(&BusOp::End));

        // even out of sync the session ends
        let (out, outcomes) = run(&mut avrisp, &[0x51, 0x00]);
        assert_eq!(out, vec![NOSYNC]);
        assert_eq!(outcomes, vec![Outcome::End]);
    }

    #[test]
    fn end_pmode_is_idempotent() {
        let mut avrisp = avrisp();
        avrisp.start_pmode().unwrap();
        avrisp.end_pmode().unwrap();
        avrisp.end_pmode().unwrap();
        let ends = avrisp.bus().ops.iter().filter(|op| **op == BusOp::End).count();
        assert_eq!(ends, 1);
    }

    #[test]
    fn load_address() {
        let mut avrisp = avrisp();
        let (out, _) = run(&mut avrisp, &[0x55, 0x40, 0x01, 0x20]);
        assert_eq!(out, vec![INSYNC, OK]);
        assert_eq!(avrisp.address(), 0x0140);

        let (out, _) = run(&mut avrisp, &[0x55, 0x00, 0x00, 0x21]);
        assert_eq!(out, vec![NOSYNC]);
        assert_eq!(avrisp.address(), 0x0140);
    }

    #[test]
    fn single_byte_programming_is_a_noop() {
        let mut avrisp = avrisp();
        avrisp.bus_mut().ops.clear();
        let (out, _) = run(&mut avrisp, &[0x60, 0x12, 0x34, 0x20, 0x61, 0x56, 0x20]);
        assert_eq!(out, vec![INSYNC, OK, INSYNC, OK]);
        assert!(avrisp.bus().ops.is_empty());
    }

    #[test]
    fn universal_passes_instruction_through() {
        let mut avrisp = avrisp();
        avrisp.bus_mut().memory.insert([0x50, 0x00, 0x00], 0x62);
        let (out, _) = run(&mut avrisp, &[0x56, 0x50, 0x00, 0x00, 0x00, 0x20]);
        assert_eq!(out, vec![INSYNC, 0x62, OK]);
        assert_eq!(avrisp.bus().exchanges(), vec![[0x50, 0x00, 0x00, 0x00]]);
    }

    #[test]
    fn read_signature() {
        let mut avrisp = avrisp();
        avrisp.bus_mut().memory.insert([0x30, 0x00, 0x00], 0x1e);
        avrisp.bus_mut().memory.insert([0x30, 0x00, 0x01], 0x95);
        avrisp.bus_mut().memory.insert([0x30, 0x00, 0x02], 0x0f);
        let (out, _) = run(&mut avrisp, &[0x75, 0x20]);
        assert_eq!(out, vec![INSYNC, 0x1e, 0x95, 0x0f, OK]);
    }

    #[test]
    fn bare_marker_is_out_of_sync() {
        let mut avrisp = avrisp();
        let (out, outcomes) = run(&mut avrisp, &[0x20]);
        assert_eq!(out, vec![NOSYNC]);
        assert_eq!(outcomes, vec![Outcome::Continue]);
        assert_eq!(avrisp.error_count(), 1);
    }

    #[test]
    fn unknown_command() {
        let mut avrisp = avrisp();
        let (out, _) = run(&mut avrisp, &[0xee, 0x20]);
        assert_eq!(out, vec![UNKNOWN]);
        assert_eq!(avrisp.error_count(), 1);

        let (out, _) = run(&mut avrisp, &[0xee, 0x00]);
        assert_eq!(out, vec![NOSYNC]);
        assert_eq!(avrisp.error_count(), 2);
    }

    #[test]
    fn unknown_memory_type_fails_without_sync_check() {
        let mut avrisp = avrisp();
        avrisp.bus_mut().ops.clear();
        let mut client = MockTransport::new(&[0x64, 0x00, 0x02, b'X', 0xaa, 0xbb, 0x20]);
        avrisp.handle_command(&mut client).unwrap();
        assert_eq!(client.output(), vec![FAILED]);
        assert_eq!(client.pending(), 3);
        assert!(avrisp.bus().ops.is_empty());
    }

    #[test]
    fn spi_frequency_applies_in_progmode() {
        let mut avrisp = avrisp();
        avrisp.set_spi_frequency(250_000).unwrap();
        assert!(!avrisp.bus().ops.contains(&BusOp::Clock(250_000)));

        avrisp.start_pmode().unwrap();
        assert!(avrisp.bus().ops.contains(&BusOp::Begin(250_000)));
        avrisp.set_spi_frequency(500_000).unwrap();
        assert_eq!(avrisp.bus().ops.last(), Some(&BusOp::Clock(500_000)));
    }

    #[test]
    fn reset_target_pulses_reset() {
        let mut avrisp = avrisp();
        avrisp.bus_mut().ops.clear();
        avrisp.reset_target().unwrap();
        assert_eq!(
            avrisp.bus().ops,
            vec![
                BusOp::ResetPin(false),
                BusOp::Delay(Duration::from_millis(30)),
                BusOp::ResetPin(true),
            ]
        );
    }
}
