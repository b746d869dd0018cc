//! SAE J1850 VPW protocol adapter.
//!
//! Grounded on `original_source/src/adapter/obd/vpw.cpp`: bit-level VPW
//! encode/decode, arbitration-loss detection on passive bits, and the
//! expected-second-byte reply filter.

use crate::config::{ConfigParam, ConfigStore, IntParam};
use crate::driver::{DriverResult, Led, PwmDriver, Timer};
use crate::ecumsg::{j1850_crc8, Ecumsg, EcumsgKind};
use crate::history::{Direction, History};
use crate::hex::bytes_to_hex;
use crate::protocols::{ConnectOutcome, ProtocolAdapter, ProtocolId, RequestOutcome};
use crate::status::ReplyStatus;
use crate::timeout::TimeoutManager;

/// Short active/passive pulse width at the nominal (×1) bit rate, µs.
pub const TV1_TX_NOM_US: u32 = 64;
/// Long active/passive pulse width at the nominal bit rate, µs.
pub const TV2_TX_NOM_US: u32 = 128;
/// Start-of-frame active pulse width, µs.
pub const TV3_TX_NOM_US: u32 = 200;
/// Minimum inter-frame-space / end-of-data hold, µs.
pub const TV4_TX_MIN_US: u32 = 300;
/// Bus-idle detection threshold used while waiting for a send opportunity,
/// µs.
pub const TV6_TX_NOM_US: u32 = 280;
/// Minimum request/reply payload length accepted by the expected-byte
/// filter.
pub const OBD2_BYTES_MIN: usize = 3;

fn scaled(nominal_us: u32, vpw_speed: i64) -> u32 {
    let divisor = if vpw_speed <= 0 { 1 } else { vpw_speed as u32 };
    nominal_us / divisor
}

fn bit_mid_threshold(vpw_speed: i64) -> u32 {
    (scaled(TV1_TX_NOM_US, vpw_speed) + scaled(TV2_TX_NOM_US, vpw_speed)) / 2
}

/// The SAE J1850 VPW protocol adapter.
pub struct VpwAdapter {
    driver: Box<dyn PwmDriver>,
    timer: Box<dyn Timer>,
    led: Box<dyn Led>,
    timeout: TimeoutManager,
    history: History,
    connected: bool,
    via_auto: bool,
}

impl VpwAdapter {
    /// Builds a VPW adapter owning the given driver handles.
    pub fn new(driver: Box<dyn PwmDriver>, timer: Box<dyn Timer>, led: Box<dyn Led>) -> Self {
        VpwAdapter {
            driver,
            timer,
            led,
            timeout: TimeoutManager::new(),
            history: History::new(32),
            connected: false,
            via_auto: false,
        }
    }

    /// Marks whether this adapter was reached through the auto-detect probe,
    /// for the `"AUTO, "` description prefix.
    pub fn set_via_auto(&mut self, via_auto: bool) {
        self.via_auto = via_auto;
    }

    fn send_frame(&mut self, cfg: &ConfigStore, framed: &[u8]) -> DriverResult<bool> {
        let speed = cfg.get_int(IntParam::VpwSpeed);
        if !self
            .driver
            .wait_for_ready(scaled(TV6_TX_NOM_US, speed), scaled(TV4_TX_MIN_US, speed) * 10)?
        {
            return Ok(false);
        }
        self.driver.send_sof(scaled(TV3_TX_NOM_US, speed))?;
        self.led.blink_tx();
        let mut passive = true;
        for &byte in framed {
            for i in 0..8 {
                let bit = (byte >> (7 - i)) & 1;
                let width = match (passive, bit) {
                    (true, 0) => scaled(TV1_TX_NOM_US, speed),
                    (true, 1) => scaled(TV2_TX_NOM_US, speed),
                    (false, 1) => scaled(TV1_TX_NOM_US, speed),
                    (false, _) => scaled(TV2_TX_NOM_US, speed),
                };
                self.driver.send_pulse(width)?;
                if passive && self.driver.get_bit() != 0 {
                    self.driver.stop()?;
                    return Ok(false); // arbitration lost
                }
                passive = !passive;
            }
        }
        self.driver.send_eod()?;
        Ok(true)
    }

    fn receive_frame(&mut self, cfg: &ConfigStore, max_wait_us: u32) -> DriverResult<Option<Vec<u8>>> {
        let speed = cfg.get_int(IntParam::VpwSpeed);
        let sof_width = match self.driver.wait_for_sof(max_wait_us)? {
            Some(w) => w,
            None => return Ok(None),
        };
        if sof_width < scaled(TV3_TX_NOM_US, speed).saturating_sub(40) {
            return Err("bus error: short SOF".to_string());
        }
        self.led.blink_rx();
        let mid = bit_mid_threshold(speed);
        let mut bytes = Vec::new();
        let mut bitbuf = 0u8;
        let mut nbits = 0u8;
        let mut passive = true;
        loop {
            let width = match self.driver.wait_for_bus_change()? {
                Some(w) => w,
                None => break, // end of data
            };
            let bit = if passive {
                if width < mid { 0 } else { 1 }
            } else if width < mid {
                1
            } else {
                0
            };
            bitbuf = (bitbuf << 1) | bit;
            nbits += 1;
            if nbits == 8 {
                bytes.push(bitbuf ^ 0x55);
                bitbuf = 0;
                nbits = 0;
            }
            passive = !passive;
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

impl ProtocolAdapter for VpwAdapter {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::J1850Vpw
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn description(&self) -> String {
        let base = ProtocolId::J1850Vpw.description();
        if self.via_auto {
            format!("AUTO, {base}")
        } else {
            base.to_string()
        }
    }

    fn open(&mut self, _cfg: &ConfigStore) {
        let _ = self.driver.open(true);
        self.led.start_timer();
        self.timeout.reset();
        self.connected = false;
    }

    fn close(&mut self) {
        let _ = self.driver.stop();
        self.connected = false;
    }

    fn on_connect_ecu(&mut self, cfg: &ConfigStore, _send_reply: bool) -> ConnectOutcome {
        if self.connected && self.protocol() == ProtocolId::J1850Vpw {
            return ConnectOutcome::connected(ProtocolId::J1850Vpw);
        }
        self.connected = true;
        ConnectOutcome::connected(ProtocolId::J1850Vpw)
    }

    fn on_request(&mut self, cfg: &ConfigStore, data: &[u8], num_responses: u32) -> RequestOutcome {
        let mut msg = Ecumsg::new(EcumsgKind::Vpw, cfg);
        msg.set_data(data);
        if msg.add_header_and_checksum().is_err() {
            return RequestOutcome::failed(ReplyStatus::DataError);
        }
        let framed = msg.data().to_vec();
        match self.send_frame(cfg, &framed) {
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
            match self.receive_frame(cfg, deadline_us) {
                Ok(Some(bytes)) => {
                    if bytes.len() < OBD2_BYTES_MIN || bytes.get(1).copied() != Some(expected_second) {
                        continue; // cross-talk, keep waiting
                    }
                    let last = match bytes.last() {
                        Some(&b) => b,
                        None => continue,
                    };
                    let sum = j1850_crc8(&bytes[..bytes.len() - 1]);
                    if sum != last {
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
