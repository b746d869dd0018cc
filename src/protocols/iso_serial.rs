//! ISO 9141-2 / ISO 14230-4 (KWP2000) serial protocol adapter.
//!
//! One adapter handles all three ISO 9141/14230 variants (ISO 9141, ISO
//! 14230 5-baud, ISO 14230 fast), selected by its internal `requested`
//! field -- mirroring the reference firmware's single `IsoSerialAdapter`
//! class with an internal `protocol_` selector, grounded on
//! `original_source/src/adapter/obd/isoserial.cpp`.

use crate::config::{BytesParam, ConfigParam, ConfigStore, IntParam};
use crate::driver::{DriverResult, Led, Timer, UartEcu};
use crate::ecumsg::{iso14230_header_length, Ecumsg, EcumsgKind};
use crate::history::History;
use crate::hex::bytes_to_hex;
use crate::protocols::{ConnectOutcome, ProtocolAdapter, ProtocolId, RequestOutcome};
use crate::status::ReplyStatus;
use crate::timeout::TimeoutManager;

/// Bit time for 5-baud bit-banged init, ms.
pub const SLOW_INIT_BIT_MS: u32 = 200;
/// Max wait for the first init-response byte (`0x55`), ms.
pub const W1_MAX_MS: u32 = 300;
/// Max inter-byte wait for the remaining two init-response bytes, ms.
pub const W2_MAX_MS: u32 = 20;
/// Max wait before/after sending `~KB2`, ms.
pub const W4_MAX_MS: u32 = 50;
/// Fast-init low/high pulse width, ms.
pub const FAST_INIT_PULSE_MS: u32 = 25;
/// Minimum inter-request idle, ms.
pub const P3_MIN_MS: u32 = 55;
/// Inter-byte send delay, ms.
pub const P4_MS: u32 = 7;
/// Base serial reply length ceiling (8 payload + 5 header/checksum
/// overhead).
pub const OBD_IN_MSG_LEN: usize = 13;
/// Extra bytes allowed when `ALLOW_LONG` is set.
pub const ALLOW_LONG_EXTRA: usize = 6;

/// Whether a 5-baud `KB1` value is in the allowed ISO 14230 set (low nibble
/// in `{0x9, 0xB, 0xD, 0xF}`).
pub fn check_iso14230_header(kb1: u8) -> bool {
    matches!(kb1 & 0x0F, 0x9 | 0xB | 0xD | 0xF)
}

fn fast_init_status_offset(data0: u8) -> usize {
    if data0 == 0 {
        2
    } else if (data0 & 0xC0) == 0 {
        1
    } else if (data0 & 0x3F) != 0 {
        3
    } else {
        4
    }
}

/// The ISO 9141 / ISO 14230 serial protocol adapter.
pub struct IsoSerialAdapter {
    driver: Box<dyn UartEcu>,
    byte_timer: Box<dyn Timer>,
    p3_timer: Box<dyn Timer>,
    keepalive_timer: Box<dyn Timer>,
    led: Box<dyn Led>,
    timeout: TimeoutManager,
    history: History,
    connected: bool,
    requested: ProtocolId,
    kb1: u8,
    kb2: u8,
    via_auto: bool,
}

impl IsoSerialAdapter {
    /// Builds a serial adapter owning the given driver handles, defaulting
    /// its internal protocol selector to [`ProtocolId::Auto`].
    pub fn new(
        driver: Box<dyn UartEcu>,
        byte_timer: Box<dyn Timer>,
        p3_timer: Box<dyn Timer>,
        keepalive_timer: Box<dyn Timer>,
        led: Box<dyn Led>,
    ) -> Self {
        IsoSerialAdapter {
            driver,
            byte_timer,
            p3_timer,
            keepalive_timer,
            led,
            timeout: TimeoutManager::new(),
            history: History::new(32),
            connected: false,
            requested: ProtocolId::Auto,
            kb1: 0,
            kb2: 0,
            via_auto: false,
        }
    }

    /// Re-points the internal protocol selector -- used by the dispatcher's
    /// `set_protocol` when the caller picks one of the ISO 9141/14230
    /// variants explicitly, or resets it to [`ProtocolId::Auto`] for
    /// `PROT_AUTO`.
    pub fn set_requested(&mut self, protocol: ProtocolId) {
        self.requested = protocol;
    }

    /// Marks whether this adapter was reached through the auto-detect probe.
    pub fn set_via_auto(&mut self, via_auto: bool) {
        self.via_auto = via_auto;
    }

    fn busy_wait_ms(&mut self, ms: u32) {
        self.byte_timer.start(ms);
        while !self.byte_timer.is_expired() {}
    }

    fn read_byte_within(&mut self, timeout_ms: u32) -> DriverResult<Option<u8>> {
        self.byte_timer.start(timeout_ms);
        loop {
            if self.driver.ready() {
                return Ok(Some(self.driver.get()?));
            }
            if self.byte_timer.is_expired() {
                return Ok(None);
            }
        }
    }

    fn send_byte_with_echo(&mut self, byte: u8) -> DriverResult<bool> {
        self.driver.send(byte)?;
        Ok(self.driver.get_echo()? == byte)
    }

    fn send_framed(&mut self, framed: &[u8]) -> DriverResult<bool> {
        for (i, &byte) in framed.iter().enumerate() {
            if !self.send_byte_with_echo(byte)? {
                return Ok(false);
            }
            if i + 1 < framed.len() {
                self.busy_wait_ms(P4_MS);
            }
        }
        Ok(true)
    }

    fn ecu_slow_init(&mut self, cfg: &ConfigStore) -> Result<(u8, u8), ReplyStatus> {
        let address = cfg.get_int(IntParam::IsoInitAddress) as u8;
        self.driver
            .set_bit_bang(true)
            .map_err(|_| ReplyStatus::BusError)?;
        self.driver.set_bit(0).map_err(|_| ReplyStatus::BusError)?;
        self.busy_wait_ms(SLOW_INIT_BIT_MS);
        for i in 0..8 {
            let bit = (address >> i) & 1;
            self.driver
                .set_bit(bit)
                .map_err(|_| ReplyStatus::BusError)?;
            self.busy_wait_ms(SLOW_INIT_BIT_MS);
        }
        self.driver.set_bit(1).map_err(|_| ReplyStatus::BusError)?;
        self.busy_wait_ms(SLOW_INIT_BIT_MS);
        let stop_bit_ok = self.driver.get_bit() == 1;
        let _ = self.driver.set_bit_bang(false);
        if !stop_bit_ok {
            return Err(ReplyStatus::WiringError);
        }

        let b0 = self
            .read_byte_within(W1_MAX_MS)
            .map_err(|_| ReplyStatus::BusError)?
            .ok_or(ReplyStatus::NoData)?;
        if b0 != 0x55 {
            return Err(ReplyStatus::UnableToConnect);
        }
        let kb1 = self
            .read_byte_within(W2_MAX_MS)
            .map_err(|_| ReplyStatus::BusError)?
            .ok_or(ReplyStatus::NoData)?;
        let kb2 = self
            .read_byte_within(W2_MAX_MS)
            .map_err(|_| ReplyStatus::BusError)?
            .ok_or(ReplyStatus::NoData)?;

        self.busy_wait_ms(W4_MAX_MS);
        if !self
            .send_byte_with_echo(!kb2)
            .map_err(|_| ReplyStatus::BusError)?
        {
            return Err(ReplyStatus::UnableToConnect);
        }
        let init_complement = self
            .read_byte_within(W4_MAX_MS)
            .map_err(|_| ReplyStatus::BusError)?
            .ok_or(ReplyStatus::NoData)?;
        if init_complement != !address {
            return Err(ReplyStatus::UnableToConnect);
        }
        Ok((kb1, kb2))
    }

    fn classify_slow_init(&self, cfg: &ConfigStore, kb1: u8, kb2: u8) -> Option<ProtocolId> {
        if !cfg.get_bool(ConfigParam::KwCheck) {
            return if matches!(self.requested, ProtocolId::Iso9141 | ProtocolId::Auto) {
                Some(ProtocolId::Iso9141)
            } else {
                Some(ProtocolId::Iso14230Slow)
            };
        }
        match kb2 {
            0x08 | 0x94 => Some(ProtocolId::Iso9141),
            0x8F if check_iso14230_header(kb1) => Some(ProtocolId::Iso14230Slow),
            _ => None,
        }
    }

    fn ecu_fast_init(&mut self, cfg: &ConfigStore) -> Result<(u8, u8), ReplyStatus> {
        self.driver
            .set_bit_bang(true)
            .map_err(|_| ReplyStatus::BusError)?;
        self.driver.set_bit(0).map_err(|_| ReplyStatus::BusError)?;
        self.busy_wait_ms(FAST_INIT_PULSE_MS);
        self.driver.set_bit(1).map_err(|_| ReplyStatus::BusError)?;
        self.busy_wait_ms(FAST_INIT_PULSE_MS);
        self.driver
            .set_bit_bang(false)
            .map_err(|_| ReplyStatus::BusError)?;

        let mut msg = Ecumsg::new(EcumsgKind::Iso14230, cfg);
        msg.set_data(&[0x81]);
        msg.add_header_and_checksum()
            .map_err(|_| ReplyStatus::DataError)?;
        if !self
            .send_framed(msg.data())
            .map_err(|_| ReplyStatus::BusError)?
        {
            return Err(ReplyStatus::UnableToConnect);
        }

        let mut resp = Vec::new();
        let deadline = self.timeout.at0_timeout(cfg, false);
        let first = self
            .read_byte_within(deadline)
            .map_err(|_| ReplyStatus::BusError)?
            .ok_or(ReplyStatus::NoData)?;
        resp.push(first);
        let needed = fast_init_status_offset(first) + 3;
        while resp.len() < needed {
            let b = self
                .read_byte_within(W2_MAX_MS)
                .map_err(|_| ReplyStatus::BusError)?
                .ok_or(ReplyStatus::NoData)?;
            resp.push(b);
        }
        let offset = fast_init_status_offset(first);
        if resp[offset] != 0xC1 {
            return Err(ReplyStatus::UnableToConnect);
        }
        Ok((resp[offset + 1], resp[offset + 2]))
    }

    fn arm_keepalive(&mut self, cfg: &ConfigStore) {
        let wakeup_val = cfg.get_int(IntParam::WakeupVal);
        if wakeup_val > 0 {
            self.keepalive_timer.start((wakeup_val as u32) * 20);
        }
    }

    fn wakeup_pattern(&self) -> Vec<u8> {
        match self.requested {
            ProtocolId::Iso14230Slow | ProtocolId::Iso14230Fast => vec![0x3E],
            _ => vec![0x01, 0x00],
        }
    }

    fn p2_timeout(&self, cfg: &ConfigStore) -> u32 {
        self.timeout.p2_timeout(cfg, false)
    }

    fn max_reply_len(&self, cfg: &ConfigStore) -> usize {
        if cfg.get_bool(ConfigParam::AllowLong) {
            OBD_IN_MSG_LEN + ALLOW_LONG_EXTRA
        } else {
            OBD_IN_MSG_LEN
        }
    }
}

impl ProtocolAdapter for IsoSerialAdapter {
    fn protocol(&self) -> ProtocolId {
        self.requested
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn description(&self) -> String {
        let base = if matches!(self.requested, ProtocolId::Auto) {
            ProtocolId::Iso9141.description()
        } else {
            self.requested.description()
        };
        if self.via_auto {
            format!("AUTO, {base}")
        } else {
            base.to_string()
        }
    }

    fn open(&mut self, _cfg: &ConfigStore) {
        let _ = self.driver.init(10_400);
        self.led.start_timer();
        self.timeout.reset();
        self.connected = false;
    }

    fn close(&mut self) {
        let _ = self.driver.clear();
        self.connected = false;
    }

    fn on_connect_ecu(&mut self, cfg: &ConfigStore, _send_reply: bool) -> ConnectOutcome {
        if self.connected {
            return ConnectOutcome::connected(self.requested);
        }

        let use_fast = matches!(self.requested, ProtocolId::Iso14230Fast)
            || (matches!(self.requested, ProtocolId::Auto) && cfg.get_bool(ConfigParam::FastInit));

        let result = if use_fast {
            self.ecu_fast_init(cfg).map(|(kb1, kb2)| {
                self.requested = ProtocolId::Iso14230Fast;
                (kb1, kb2)
            })
        } else {
            match self.ecu_slow_init(cfg) {
                Ok((kb1, kb2)) => match self.classify_slow_init(cfg, kb1, kb2) {
                    Some(proto) => {
                        self.requested = proto;
                        Ok((kb1, kb2))
                    }
                    None => Err(ReplyStatus::Error),
                },
                Err(e) if matches!(self.requested, ProtocolId::Auto) => {
                    // AUTO also tries fast init before giving up.
                    self.ecu_fast_init(cfg).map(|(kb1, kb2)| {
                        self.requested = ProtocolId::Iso14230Fast;
                        (kb1, kb2)
                    }).map_err(|_| e)
                }
                Err(e) => Err(e),
            }
        };

        match result {
            Ok((kb1, kb2)) => {
                self.kb1 = kb1;
                self.kb2 = kb2;
                self.connected = true;
                self.arm_keepalive(cfg);
                let mut lines = Vec::new();
                if cfg.get_bool(ConfigParam::KwDisplay) {
                    lines.push(format!("BUS INIT: KW1 {kb1:02X} KW2 {kb2:02X} OK"));
                } else {
                    lines.push("BUS INIT: ...OK".to_string());
                }
                ConnectOutcome {
                    protocol: self.requested,
                    status: ReplyStatus::None,
                    request_answered: false,
                    lines,
                }
            }
            Err(status) => {
                self.connected = false;
                ConnectOutcome::failed(status)
            }
        }
    }

    fn on_request(&mut self, cfg: &ConfigStore, data: &[u8], num_responses: u32) -> RequestOutcome {
        while !self.p3_timer.is_expired() {}

        let kind = if matches!(self.requested, ProtocolId::Iso14230Slow | ProtocolId::Iso14230Fast)
        {
            EcumsgKind::Iso14230
        } else {
            EcumsgKind::Iso9141
        };
        let mut msg = Ecumsg::new(kind, cfg);
        msg.set_data(data);
        if msg.add_header_and_checksum().is_err() {
            return RequestOutcome::failed(ReplyStatus::DataError);
        }
        if !self.send_framed(&msg.data().to_vec()).unwrap_or(false) {
            self.p3_timer.start(P3_MIN_MS);
            return RequestOutcome::failed(ReplyStatus::BusError);
        }

        let max_len = self.max_reply_len(cfg);
        let mut collected = Vec::new();
        let mut responses = 0u32;
        loop {
            if num_responses != crate::collector::UNBOUNDED_RESPONSES && responses >= num_responses {
                break;
            }
            let first = match self.read_byte_within(self.p2_timeout(cfg)) {
                Ok(Some(b)) => b,
                Ok(None) => break,
                Err(_) => return RequestOutcome::failed(ReplyStatus::BusError),
            };
            let mut frame = vec![first];
            loop {
                if frame.len() >= max_len {
                    break;
                }
                match self.read_byte_within(20) {
                    Ok(Some(b)) => frame.push(b),
                    Ok(None) => break,
                    Err(_) => return RequestOutcome::failed(ReplyStatus::BusError),
                }
            }
            self.timeout.record_sample(cfg, false, frame.len() as u32);

            let mut reply = Ecumsg::new(kind, cfg);
            reply.set_data(&frame);
            if !cfg.get_bool(ConfigParam::HeaderShow) {
                if reply.strip_header_and_checksum().is_err() {
                    return RequestOutcome::failed(ReplyStatus::ChksError);
                }
            } else if reply.verify_checksum().is_err() {
                return RequestOutcome::failed(ReplyStatus::ChksError);
            }
            collected.push(bytes_to_hex(reply.data(), cfg.get_bool(ConfigParam::Spaces)));
            responses += 1;
        }

        self.p3_timer.start(P3_MIN_MS);
        if collected.is_empty() {
            RequestOutcome::failed(ReplyStatus::NoData)
        } else {
            RequestOutcome::ok(collected)
        }
    }

    fn wiring_check(&mut self) -> RequestOutcome {
        let _ = self.driver.set_bit_bang(true);
        let _ = self.driver.set_bit(1);
        let high = self.driver.get_bit();
        let _ = self.driver.set_bit(0);
        let low = self.driver.get_bit();
        let _ = self.driver.set_bit_bang(false);
        if high != 0 && low == 0 {
            RequestOutcome::ok(vec!["WIRING: OK".to_string()])
        } else {
            RequestOutcome::failed(ReplyStatus::WiringError)
        }
    }

    fn heartbeat(&mut self, cfg: &ConfigStore) {
        if !self.connected {
            return;
        }
        let wakeup_val = cfg.get_int(IntParam::WakeupVal);
        if wakeup_val <= 0 {
            return;
        }
        if !self.keepalive_timer.is_expired() {
            return;
        }
        let custom = cfg.get_bytes(BytesParam::WakeupMessageHeader);
        let pattern = if !custom.is_empty() {
            custom.as_slice().to_vec()
        } else {
            self.wakeup_pattern()
        };
        let _ = self.send_framed(&pattern);
        self.keepalive_timer.start((wakeup_val as u32) * 20);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct FakeUart {
        rx: VecDeque<u8>,
        echo_of_last_send: Option<u8>,
    }
    impl UartEcu for FakeUart {
        fn init(&mut self, _speed_bps: u32) -> DriverResult<()> {
            Ok(())
        }
        fn send(&mut self, byte: u8) -> DriverResult<()> {
            self.echo_of_last_send = Some(byte);
            Ok(())
        }
        fn get_echo(&mut self) -> DriverResult<u8> {
            Ok(self.echo_of_last_send.unwrap_or(0))
        }
        fn get(&mut self) -> DriverResult<u8> {
            Ok(self.rx.pop_front().unwrap_or(0))
        }
        fn ready(&self) -> bool {
            !self.rx.is_empty()
        }
        fn set_bit_bang(&mut self, _enabled: bool) -> DriverResult<()> {
            Ok(())
        }
        fn set_bit(&mut self, _level: u8) -> DriverResult<()> {
            Ok(())
        }
        fn get_bit(&self) -> u8 {
            1
        }
        fn clear(&mut self) -> DriverResult<()> {
            Ok(())
        }
    }

    struct FakeTimer {
        ticks_left: u32,
    }
    impl Timer for FakeTimer {
        fn start(&mut self, _duration: u32) {
            self.ticks_left = 1;
        }
        fn is_expired(&self) -> bool {
            self.ticks_left == 0
        }
        fn value(&self) -> u32 {
            0
        }
    }

    struct FakeLed;
    impl Led for FakeLed {
        fn blink_tx(&mut self) {}
        fn blink_rx(&mut self) {}
        fn start_timer(&mut self) {}
    }

    fn adapter_with_rx(rx: VecDeque<u8>) -> IsoSerialAdapter {
        IsoSerialAdapter::new(
            Box::new(FakeUart {
                rx,
                echo_of_last_send: None,
            }),
            Box::new(FakeTimer { ticks_left: 0 }),
            Box::new(FakeTimer { ticks_left: 0 }),
            Box::new(FakeTimer { ticks_left: 0 }),
            Box::new(FakeLed),
        )
    }

    #[test]
    fn check_iso14230_header_allows_only_documented_nibbles() {
        assert!(check_iso14230_header(0x8B));
        assert!(!check_iso14230_header(0x85));
    }

    #[test]
    fn fast_init_status_offset_matches_four_way_branch() {
        assert_eq!(fast_init_status_offset(0x00), 2);
        assert_eq!(fast_init_status_offset(0b0011_1111), 1);
        assert_eq!(fast_init_status_offset(0b1100_0001), 3);
        assert_eq!(fast_init_status_offset(0b1100_0000), 4);
    }

    #[test]
    fn already_connected_short_circuits() {
        let cfg = ConfigStore::new();
        let mut a = adapter_with_rx(VecDeque::new());
        a.connected = true;
        a.requested = ProtocolId::Iso9141;
        let outcome = a.on_connect_ecu(&cfg, false);
        assert_eq!(outcome.protocol, ProtocolId::Iso9141);
        assert!(outcome.lines.is_empty());
    }
}
