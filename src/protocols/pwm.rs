//! SAE J1850 PWM protocol adapter.
//!
//! The reference firmware's `pwm.h` declares this adapter's interface but no
//! corresponding `.cpp` was present in the retrieved source -- PWM is
//! signature-only there. This implementation follows [`super::vpw`]'s
//! structure (same [`crate::driver::PwmDriver`] seam, same
//! header/checksum framing via [`Ecumsg`]) with PWM's own nominal bit
//! timing and duty-cycle-based symbol encoding in place of VPW's
//! pulse-width encoding, per SPEC_FULL.md §4.5's note that PWM is
//! implemented symmetric with VPW.

use crate::config::{ConfigParam, ConfigStore, IntParam};
use crate::driver::{DriverResult, Led, PwmDriver, Timer};
use crate::ecumsg::{j1850_crc8, Ecumsg, EcumsgKind};
use crate::history::History;
use crate::hex::bytes_to_hex;
use crate::protocols::{ConnectOutcome, ProtocolAdapter, ProtocolId, RequestOutcome};
use crate::status::ReplyStatus;
use crate::timeout::TimeoutManager;

/// Nominal full bit period at 41.6 kbit, µs.
pub const PWM_BIT_PERIOD_US: u32 = 24;
/// Duty-cycle pulse width encoding a logic '1', µs (roughly 1/3 of the bit
/// period, low-then-high).
pub const PWM_ONE_WIDTH_US: u32 = 8;
/// Duty-cycle pulse width encoding a logic '0', µs (roughly 2/3 of the bit
/// period).
pub const PWM_ZERO_WIDTH_US: u32 = 16;
/// Start-of-frame pulse width, µs.
pub const PWM_SOF_WIDTH_US: u32 = 48;
/// Minimum inter-frame idle, µs.
pub const PWM_IFS_US: u32 = 96;
/// Minimum payload length accepted by the expected-byte reply filter.
pub const OBD2_BYTES_MIN: usize = 3;

fn bit_mid_threshold() -> u32 {
    (PWM_ONE_WIDTH_US + PWM_ZERO_WIDTH_US) / 2
}

/// The SAE J1850 PWM protocol adapter.
pub struct PwmAdapter {
    driver: Box<dyn PwmDriver>,
    timer: Box<dyn Timer>,
    led: Box<dyn Led>,
    timeout: TimeoutManager,
    history: History,
    connected: bool,
    via_auto: bool,
}

impl PwmAdapter {
    /// Builds a PWM adapter owning the given driver handles.
    pub fn new(driver: Box<dyn PwmDriver>, timer: Box<dyn Timer>, led: Box<dyn Led>) -> Self {
        PwmAdapter {
            driver,
            timer,
            led,
            timeout: TimeoutManager::new(),
            history: History::new(32),
            connected: false,
            via_auto: false,
        }
    }

    /// Marks whether this adapter was reached through the auto-detect probe.
    pub fn set_via_auto(&mut self, via_auto: bool) {
        self.via_auto = via_auto;
    }

    fn send_frame(&mut self, framed: &[u8]) -> DriverResult<bool> {
        if !self.driver.wait_for_ready(PWM_IFS_US, PWM_IFS_US * 10)? {
            return Ok(false);
        }
        self.driver.send_sof(PWM_SOF_WIDTH_US)?;
        self.led.blink_tx();
        for &byte in framed {
            for i in 0..8 {
                let bit = (byte >> (7 - i)) & 1;
                let width = if bit == 1 { PWM_ONE_WIDTH_US } else { PWM_ZERO_WIDTH_US };
                self.driver.send_pulse(width)?;
            }
        }
        self.driver.send_eod()?;
        Ok(true)
    }

    fn receive_frame(&mut self, max_wait_us: u32) -> DriverResult<Option<Vec<u8>>> {
        if self.driver.wait_for_sof(max_wait_us)?.is_none() {
            return Ok(None);
        }
        self.led.blink_rx();
        let mid = bit_mid_threshold();
        let mut bytes = Vec::new();
        let mut bitbuf = 0u8;
        let mut nbits = 0u8;
        loop {
            let width = match self.driver.wait_for_bus_change()? {
                Some(w) => w,
                None => break,
            };
            let bit = if width <= mid { 1 } else { 0 };
            bitbuf = (bitbuf << 1) | bit;
            nbits += 1;
            if nbits == 8 {
                bytes.push(bitbuf);
                bitbuf = 0;
                nbits = 0;
            }
        }
        Ok(Some(bytes))
    }

    fn expected_second_byte(&self, cfg: &ConfigStore, request_header_byte1: u8) -> u8 {
        if cfg.get_bool(ConfigParam::AutoReceive) {
            request_header_byte1.wrapping_add(1)
        } else {
            cfg.get_int(IntParam::ReceiveFilter) as u8
        }
    }

    fn p2_wait_us(&self, cfg: &ConfigStore) -> u32 {
        self.timeout.p2_timeout(cfg, false) * 1000
    }
}

impl ProtocolAdapter for PwmAdapter {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::J1850Pwm
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn description(&self) -> String {
        let base = ProtocolId::J1850Pwm.description();
        if self.via_auto {
            format!("AUTO, {base}")
        } else {
            base.to_string()
        }
    }

    fn open(&mut self, _cfg: &ConfigStore) {
        let _ = self.driver.open(false);
        self.led.start_timer();
        self.timeout.reset();
        self.connected = false;
    }

    fn close(&mut self) {
        let _ = self.driver.stop();
        self.connected = false;
    }

    fn on_connect_ecu(&mut self, _cfg: &ConfigStore, _send_reply: bool) -> ConnectOutcome {
        if self.connected && self.protocol() == ProtocolId::J1850Pwm {
            return ConnectOutcome::connected(ProtocolId::J1850Pwm);
        }
        self.connected = true;
        ConnectOutcome::connected(ProtocolId::J1850Pwm)
    }

    fn on_request(&mut self, cfg: &ConfigStore, data: &[u8], num_responses: u32) -> RequestOutcome {
        let mut msg = Ecumsg::new(EcumsgKind::Pwm, cfg);
        msg.set_data(data);
        if msg.add_header_and_checksum().is_err() {
            return RequestOutcome::failed(ReplyStatus::DataError);
        }
        let framed = msg.data().to_vec();
        match self.send_frame(&framed) {
            Ok(true) => {}
            Ok(false) => return RequestOutcome::failed(ReplyStatus::BusBusy),
            Err(_) => return RequestOutcome::failed(ReplyStatus::BusError),
        }

        let expected_second = self.expected_second_byte(cfg, framed.get(1).copied().unwrap_or(0));
        let mut lines = Vec::new();
        let mut received = 0u32;
        let deadline_us = self.p2_wait_us(cfg);
        loop {
            if num_responses != crate::collector::UNBOUNDED_RESPONSES && received >= num_responses {
                break;
            }
            match self.receive_frame(deadline_us) {
                Ok(Some(bytes)) => {
                    if bytes.len() < OBD2_BYTES_MIN || bytes.get(1).copied() != Some(expected_second) {
                        continue;
                    }
                    let last = match bytes.last() {
                        Some(&b) => b,
                        None => continue,
                    };
                    if j1850_crc8(&bytes[..bytes.len() - 1]) != last {
                        continue;
                    }
                    let payload = &bytes[3..bytes.len() - 1];
                    lines.push(bytes_to_hex(payload, cfg.get_bool(ConfigParam::Spaces)));
                    received += 1;
                }
                Ok(None) => break,
                Err(_) => return RequestOutcome::failed(ReplyStatus::BusError),
            }
        }
        if lines.is_empty() {
            RequestOutcome::failed(ReplyStatus::NoData)
        } else {
            RequestOutcome::ok(lines)
        }
    }

    fn wiring_check(&mut self) -> RequestOutcome {
        let _ = self.driver.set_bit(1);
        let high = self.driver.get_bit();
        let _ = self.driver.set_bit(0);
        let low = self.driver.get_bit();
        let _ = self.driver.stop();
        if high != 0 && low == 0 {
            RequestOutcome::ok(vec!["WIRING: OK".to_string()])
        } else {
            RequestOutcome::failed(ReplyStatus::WiringError)
        }
    }
}
