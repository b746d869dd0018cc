//! SAE J1939 protocol adapter.
//!
//! Wraps [`crate::j1939::J1939ConnectionMgr`] with the CAN driver, filter
//! installation, the `Request` PGN transmit, and the passive PGN-monitor
//! path (`ATMA`/`ATMP`). Grounded on
//! `original_source/src/adapter/obd/j1939.cpp`; the RTS/CTS/DT/ACK state
//! machine itself lives in [`crate::j1939`] and is not duplicated here.

use crate::can_frame::{CanMsgBuffer, DEFAULT_PAD_BYTE};
use crate::config::{ConfigParam, ConfigStore, IntParam};
use crate::driver::{CanDriver, Led, Timer};
use crate::ecumsg::Spacer;
use crate::history::{Direction, History};
use crate::hex::{bytes_to_hex, hex3};
use crate::j1939::{pdu1_id, DataOutcome, J1939ConnectionMgr, PF_ACK, PF_TP_CM, PF_TP_DT};
use crate::protocols::{ConnectOutcome, ProtocolAdapter, ProtocolId, RequestOutcome};
use crate::status::ReplyStatus;
use crate::timeout::TimeoutManager;

/// PDU format byte for the J1939-21 `Request` PGN (59904 / `0xEA00`).
pub const PF_REQUEST: u8 = 0xEA;
/// Global/broadcast destination address.
pub const GLOBAL_ADDRESS: u8 = 0xFF;
/// Source address used when `CanSetAddress` is unconfigured (off-board
/// diagnostic-service tool #1, per the SAE J1939-81 address table).
pub const DEFAULT_SOURCE_ADDRESS: u8 = 0xF9;
/// Priority byte used for the `Request` PGN.
pub const REQUEST_PRIORITY: u32 = 6;
/// Default per-PGN receive timeout when `TIMEOUT` is unset (§4.6 step 5).
pub const J1939_DEFAULT_TIMEOUT_MS: u32 = 1500;

/// The SAE J1939 protocol adapter.
pub struct J1939Adapter {
    driver: Box<dyn CanDriver>,
    timer: Box<dyn Timer>,
    led: Box<dyn Led>,
    timeout: TimeoutManager,
    history: History,
    connected: bool,
    via_auto: bool,
    conn_mgr: J1939ConnectionMgr,
    dt_buffer: Vec<u8>,
    monitor_pgn: Option<[u8; 3]>,
}

impl J1939Adapter {
    /// Builds a J1939 adapter owning the given driver handles.
    pub fn new(driver: Box<dyn CanDriver>, timer: Box<dyn Timer>, led: Box<dyn Led>) -> Self {
        J1939Adapter {
            driver,
            timer,
            led,
            timeout: TimeoutManager::new(),
            history: History::new(64),
            connected: false,
            via_auto: false,
            conn_mgr: J1939ConnectionMgr::new(),
            dt_buffer: Vec::new(),
            monitor_pgn: None,
        }
    }

    /// Marks whether this adapter was reached through the auto-detect probe.
    pub fn set_via_auto(&mut self, via_auto: bool) {
        self.via_auto = via_auto;
    }

    fn source_address(&self, cfg: &ConfigStore) -> u8 {
        let addr = cfg.get_int(IntParam::CanSetAddress);
        if addr > 0 {
            addr as u8
        } else {
            DEFAULT_SOURCE_ADDRESS
        }
    }

    /// Installs the four-slot filter/mask set for one request's PGN (§4.6
    /// step 3, `j1939.cpp:206-225`): slot 1 is the exact-PGN response, slot 2
    /// is any TP.CM_ACK, slots 3/4 are TP.CM_RTS/TP.DT gated on the PGN's low
    /// byte. `pgn` is the 24-bit destination PGN derived from the (already
    /// byte-order-corrected) outgoing request.
    fn install_request_filters(&mut self, pgn: u32) {
        let _ = self.driver.set_filter_and_mask(pgn << 8, 0x00FF_FF00, true, Some(1));
        let _ = self
            .driver
            .set_filter_and_mask((PF_ACK as u32) << 16, 0x00FF_0000, true, Some(2));
        let _ = self.driver.set_filter_and_mask(
            ((PF_TP_CM as u32) << 16) | ((pgn & 0xFF) << 8),
            0x00FF_FF00,
            true,
            Some(3),
        );
        let _ = self.driver.set_filter_and_mask(
            ((PF_TP_DT as u32) << 16) | ((pgn & 0xFF) << 8),
            0x00FF_FF00,
            true,
            Some(4),
        );
    }

    /// Installs (or replaces) slot 3's filter for `ATMP`-style passive PGN
    /// monitoring, matching a specific PDU2 PGN (pf in `0xF0..=0xFF`)
    /// including its PS byte.
    pub fn set_monitor_pgn(&mut self, pgn: [u8; 3]) {
        self.monitor_pgn = Some(pgn);
        let filter = ((pgn[1] as u32) << 16) | ((pgn[0] as u32) << 8);
        let _ = self.driver.set_filter_and_mask(filter, 0x00FF_FF00, true, Some(3));
    }

    fn format_j1939_line(&self, cfg: &ConfigStore, frame: &CanMsgBuffer) -> String {
        if cfg.get_bool(ConfigParam::J1939Header) {
            let priority = (frame.id >> 26) & 0x7;
            let pf = (frame.id >> 16) & 0xFF;
            let ps = (frame.id >> 8) & 0xFF;
            let sa = frame.id & 0xFF;
            let mut sp = Spacer::new(cfg);
            sp.push(&format!("{priority:X}"));
            sp.push(&format!("{pf:02X}{ps:02X}"));
            sp.push(&format!("{sa:02X}"));
            sp.push(&bytes_to_hex(frame.payload(), cfg.get_bool(ConfigParam::Spaces)));
            sp.finish()
        } else {
            bytes_to_hex(frame.payload(), cfg.get_bool(ConfigParam::Spaces))
        }
    }

    /// Reorders the raw PGN bytes per `JF` (§4.6 step 1): reversed unless
    /// `J1939Format` is set.
    fn ordered_pgn(cfg: &ConfigStore, pgn: [u8; 3]) -> [u8; 3] {
        if !cfg.get_bool(ConfigParam::J1939Format) {
            [pgn[2], pgn[1], pgn[0]]
        } else {
            pgn
        }
    }

    fn send_request(&mut self, cfg: &ConfigStore, ordered: [u8; 3]) -> crate::driver::DriverResult<bool> {
        let src = self.source_address(cfg);
        let id = pdu1_id(REQUEST_PRIORITY, PF_REQUEST, GLOBAL_ADDRESS, src);
        let mut data = [DEFAULT_PAD_BYTE; 8];
        data[..3].copy_from_slice(&ordered);
        let frame = CanMsgBuffer::new(id, true, 3, &data);
        self.history.add(Direction::Tx, &frame);
        self.led.blink_tx();
        self.driver.send(&frame)
    }

    /// Per-PGN receive timeout (§4.6 step 5): `TIMEOUT*4*mult`, default
    /// 1500ms when `TIMEOUT` is unset -- distinct from, and not routed
    /// through, [`TimeoutManager::p2_timeout`]'s adaptive AT0/1/2 estimate
    /// or `CanTimeoutMultiplier`, which is a different property.
    fn timeout_ms(&self, cfg: &ConfigStore) -> u32 {
        let timeout = cfg.get_int(IntParam::Timeout).max(0) as u32;
        if timeout == 0 {
            J1939_DEFAULT_TIMEOUT_MS
        } else {
            let mult = if cfg.get_bool(ConfigParam::J1939TimeoutMultiplier) { 5 } else { 1 };
            timeout * 4 * mult
        }
    }

    fn receive_loop(&mut self, cfg: &ConfigStore, num_responses: u32) -> RequestOutcome {
        let mut lines = Vec::new();
        let mut responses = 0u32;
        loop {
            if num_responses != crate::collector::UNBOUNDED_RESPONSES && responses >= num_responses {
                break;
            }
            self.timer.start(self.timeout_ms(cfg));
            let frame = loop {
                match self.driver.read() {
                    Ok(Some(f)) => break Some(f),
                    Ok(None) => {
                        if self.timer.is_expired() {
                            break None;
                        }
                    }
                    Err(_) => return RequestOutcome::failed(ReplyStatus::BusError),
                }
            };
            let frame = match frame {
                Some(f) => f,
                None => break,
            };
            self.history.add(Direction::Rx, &frame);
            self.led.blink_rx();
            let pf = ((frame.id >> 16) & 0xFF) as u8;
            if pf == PF_ACK {
                if !self.conn_mgr.is_valid_ack(&frame.data) {
                    continue;
                }
                lines.push(self.format_j1939_line(cfg, &frame));
                responses += 1;
                continue;
            }
            if pf == PF_TP_CM {
                if frame.data[0] == crate::j1939::TP_CM_RTS {
                    self.conn_mgr.set_pgn([frame.data[5], frame.data[6], frame.data[7]]);
                    let (cts_id, cts) = self.conn_mgr.on_rts(&frame.data, frame.id, self.source_address(cfg));
                    let cts_frame = CanMsgBuffer::new(cts_id, true, 8, &cts);
                    self.history.add(Direction::Tx, &cts_frame);
                    let _ = self.driver.send(&cts_frame);
                    self.dt_buffer.clear();
                }
                continue;
            }
            if pf == PF_TP_DT {
                match self.conn_mgr.on_data(&frame.data) {
                    DataOutcome::Continue => {
                        self.dt_buffer.extend_from_slice(&frame.data[1..]);
                    }
                    DataOutcome::Aborted => {
                        self.dt_buffer.clear();
                    }
                    DataOutcome::Complete(ack) => {
                        self.dt_buffer.extend_from_slice(&frame.data[1..]);
                        let ack_frame = CanMsgBuffer::new(self.conn_mgr.ack_id(), true, 8, &ack);
                        self.history.add(Direction::Tx, &ack_frame);
                        let _ = self.driver.send(&ack_frame);
                        self.dt_buffer.truncate(self.conn_mgr.size() as usize);
                        lines.push(hex3(self.conn_mgr.size()));
                        lines.push(format!(
                            "0: {}",
                            bytes_to_hex(&self.dt_buffer, cfg.get_bool(ConfigParam::Spaces))
                        ));
                        responses += 1;
                        self.dt_buffer.clear();
                    }
                }
                continue;
            }
            lines.push(self.format_j1939_line(cfg, &frame));
            responses += 1;
        }
        if lines.is_empty() {
            RequestOutcome::failed(ReplyStatus::NoData)
        } else {
            RequestOutcome::ok(lines)
        }
    }

    /// Passive PGN-monitor read (`ATMA`/`ATMP`): waits for one frame matching
    /// the filter installed by [`J1939Adapter::set_monitor_pgn`] and reports
    /// it without transmitting a request.
    pub fn monitor_once(&mut self, cfg: &ConfigStore) -> RequestOutcome {
        self.timer.start(self.timeout_ms(cfg));
        loop {
            match self.driver.read() {
                Ok(Some(f)) => {
                    self.history.add(Direction::Rx, &f);
                    return RequestOutcome::ok(vec![self.format_j1939_line(cfg, &f)]);
                }
                Ok(None) => {
                    if self.timer.is_expired() {
                        return RequestOutcome::failed(ReplyStatus::NoData);
                    }
                }
                Err(_) => return RequestOutcome::failed(ReplyStatus::BusError),
            }
        }
    }
}

impl ProtocolAdapter for J1939Adapter {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::J1939
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn description(&self) -> String {
        let base = ProtocolId::J1939.description();
        if self.via_auto {
            format!("AUTO, {base}")
        } else {
            base.to_string()
        }
    }

    fn open(&mut self, _cfg: &ConfigStore) {
        let _ = self.driver.set_speed(250_000);
        self.led.start_timer();
        self.timeout.reset();
        self.connected = false;
    }

    fn close(&mut self) {
        let _ = self.driver.clear_filters();
        let _ = self.driver.clear_data();
        self.connected = false;
    }

    fn on_connect_ecu(&mut self, _cfg: &ConfigStore, _send_reply: bool) -> ConnectOutcome {
        if self.connected {
            return ConnectOutcome::connected(ProtocolId::J1939);
        }
        self.connected = true;
        ConnectOutcome::connected(ProtocolId::J1939)
    }

    fn on_request(&mut self, cfg: &ConfigStore, data: &[u8], num_responses: u32) -> RequestOutcome {
        let mut pgn = [0u8; 3];
        let n = data.len().min(3);
        pgn[..n].copy_from_slice(&data[..n]);
        let ordered = Self::ordered_pgn(cfg, pgn);
        self.conn_mgr.set_pgn(ordered);

        let _ = self.driver.clear_data();

        match self.send_request(cfg, ordered) {
            Ok(true) => {}
            Ok(false) => return RequestOutcome::failed(ReplyStatus::BusBusy),
            Err(_) => return RequestOutcome::failed(ReplyStatus::BusError),
        }

        let pgn_int =
            ((ordered[2] as u32) << 16) | ((ordered[1] as u32) << 8) | ordered[0] as u32;
        self.install_request_filters(pgn_int);

        let outcome = self.receive_loop(cfg, num_responses);
        let _ = self.driver.clear_filters();
        outcome
    }

    fn wiring_check(&mut self) -> RequestOutcome {
        RequestOutcome::ok(vec!["WIRING: N/A".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct FakeCan {
        rx: VecDeque<CanMsgBuffer>,
        sent: Vec<CanMsgBuffer>,
    }
    impl CanDriver for FakeCan {
        fn set_speed(&mut self, _bps: u32) -> crate::driver::DriverResult<()> {
            Ok(())
        }
        fn send(&mut self, frame: &CanMsgBuffer) -> crate::driver::DriverResult<bool> {
            self.sent.push(*frame);
            Ok(true)
        }
        fn is_ready(&self) -> bool {
            !self.rx.is_empty()
        }
        fn read(&mut self) -> crate::driver::DriverResult<Option<CanMsgBuffer>> {
            Ok(self.rx.pop_front())
        }
        fn set_filter_and_mask(
            &mut self,
            _filter: u32,
            _mask: u32,
            _extended: bool,
            _slot: Option<u8>,
        ) -> crate::driver::DriverResult<()> {
            Ok(())
        }
        fn clear_filters(&mut self) -> crate::driver::DriverResult<()> {
            Ok(())
        }
        fn clear_data(&mut self) -> crate::driver::DriverResult<()> {
            Ok(())
        }
        fn set_silent(&mut self, _silent: bool) -> crate::driver::DriverResult<()> {
            Ok(())
        }
    }

    struct FakeTimer;
    impl Timer for FakeTimer {
        fn start(&mut self, _duration: u32) {}
        fn is_expired(&self) -> bool {
            true
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

    fn adapter_with_rx(rx: VecDeque<CanMsgBuffer>) -> J1939Adapter {
        J1939Adapter::new(
            Box::new(FakeCan { rx, sent: Vec::new() }),
            Box::new(FakeTimer),
            Box::new(FakeLed),
        )
    }

    #[test]
    fn scenario_5_monitor_reports_matching_broadcast_frame() {
        let cfg = ConfigStore::new();
        let mut rx = VecDeque::new();
        rx.push_back(CanMsgBuffer::new(
            0x18FECA00,
            true,
            8,
            &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
        ));
        let mut a = adapter_with_rx(rx);
        a.set_monitor_pgn([0xCA, 0xFE, 0x00]);
        let outcome = a.monitor_once(&cfg);
        assert_eq!(outcome.status, ReplyStatus::None);
        assert_eq!(outcome.lines[0], "01 02 03 04 05 06 07 08");
    }

    #[test]
    fn multi_packet_transfer_assembles_full_payload() {
        let cfg = ConfigStore::new();
        let mut rx = VecDeque::new();
        rx.push_back(CanMsgBuffer::new(
            0x18EC1021,
            true,
            8,
            &[crate::j1939::TP_CM_RTS, 0x09, 0x00, 2, 0xFF, 0xCA, 0xFE, 0x00],
        ));
        rx.push_back(CanMsgBuffer::new(
            0x18EB2110,
            true,
            8,
            &[1, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x11],
        ));
        rx.push_back(CanMsgBuffer::new(
            0x18EB2110,
            true,
            8,
            &[2, 0x22, 0x33, 0x00, 0x00, 0x00, 0x00, 0x00],
        ));
        let mut a = adapter_with_rx(rx);
        let outcome = a.receive_loop(&cfg, crate::collector::UNBOUNDED_RESPONSES);
        assert_eq!(outcome.lines[0], "009");
        assert_eq!(outcome.lines[1], "0: AA BB CC DD EE FF 11 22 33");
    }

    #[test]
    fn no_frames_is_no_data() {
        let cfg = ConfigStore::new();
        let mut a = adapter_with_rx(VecDeque::new());
        let outcome = a.on_request(&cfg, &[0xCA, 0xFE, 0x00], crate::collector::UNBOUNDED_RESPONSES);
        assert_eq!(outcome.status, ReplyStatus::NoData);
    }

    #[test]
    fn request_bytes_are_reversed_unless_j1939_format_is_set() {
        // §4.6 step 1 / j1939.cpp:104 -- reversed when `JF` is *not* set.
        let mut cfg = ConfigStore::new();
        let pgn = [0xCA, 0xFE, 0x00];
        assert_eq!(J1939Adapter::ordered_pgn(&cfg, pgn), [0x00, 0xFE, 0xCA]);
        cfg.set_bool(ConfigParam::J1939Format, true);
        assert_eq!(J1939Adapter::ordered_pgn(&cfg, pgn), pgn);
    }

    #[test]
    fn default_timeout_is_1500ms() {
        let cfg = ConfigStore::new();
        let a = adapter_with_rx(VecDeque::new());
        assert_eq!(a.timeout_ms(&cfg), J1939_DEFAULT_TIMEOUT_MS);
        assert_eq!(J1939_DEFAULT_TIMEOUT_MS, 1500);
    }

    #[test]
    fn ack_frame_is_dropped_unless_it_matches_the_current_pgn() {
        let cfg = ConfigStore::new();
        let mut rx = VecDeque::new();
        // Mismatched PGN bytes (data[5..=7]) against the RTS-established PGN.
        rx.push_back(CanMsgBuffer::new(
            0x18E8FF21,
            true,
            8,
            &[0, 0, 0, 0, 0, 0xAA, 0xBB, 0xCC],
        ));
        let mut a = adapter_with_rx(rx);
        a.conn_mgr.set_pgn([0x01, 0x02, 0x03]);
        let outcome = a.receive_loop(&cfg, crate::collector::UNBOUNDED_RESPONSES);
        assert_eq!(outcome.status, ReplyStatus::NoData);
    }

    #[test]
    fn on_request_validates_ack_against_the_pgn_it_just_sent() {
        let cfg = ConfigStore::new();
        let mut rx = VecDeque::new();
        rx.push_back(CanMsgBuffer::new(
            0x18E8FF21,
            true,
            8,
            &[0, 0, 0, 0, 0, 0xF1, 0xFE, 0x00],
        ));
        let mut a = adapter_with_rx(rx);
        let outcome = a.on_request(&cfg, &[0x00, 0xFE, 0xF1], crate::collector::UNBOUNDED_RESPONSES);
        assert_eq!(outcome.status, ReplyStatus::None);
        assert_eq!(outcome.lines.len(), 1);
    }

    #[test]
    fn ack_frame_is_emitted_when_pgn_matches() {
        let cfg = ConfigStore::new();
        let mut rx = VecDeque::new();
        rx.push_back(CanMsgBuffer::new(
            0x18E8FF21,
            true,
            8,
            &[0, 0, 0, 0, 0, 0x01, 0x02, 0x03],
        ));
        let mut a = adapter_with_rx(rx);
        a.conn_mgr.set_pgn([0x01, 0x02, 0x03]);
        let outcome = a.receive_loop(&cfg, crate::collector::UNBOUNDED_RESPONSES);
        assert_eq!(outcome.status, ReplyStatus::None);
        assert_eq!(outcome.lines.len(), 1);
    }
}
