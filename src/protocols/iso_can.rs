//! ISO 15765-4 CAN protocol adapters: 11-bit (and its USER1/`ISO15765_USR_B`
//! sibling) and 29-bit.
//!
//! Grounded on `original_source/src/adapter/obd/isocan.cpp` (shared ISO-TP
//! logic) and `isocan11.cpp`/`isocan29.cpp` (per-width defaults). The
//! reference firmware's `IsoCan11Adapter` also answers for `ISO15765_USR_B`
//! internally (selected by the same mechanism the serial adapter uses for
//! its three variants), so this crate keeps that in one struct with a
//! `user_b` flag rather than a seventh type.

use crate::can_frame::{CanMsgBuffer, DEFAULT_PAD_BYTE};
use crate::config::{BytesParam, ConfigParam, ConfigStore, IntParam};
use crate::driver::{CanDriver, DriverResult, Led, Timer};
use crate::ecumsg::Spacer;
use crate::history::{Direction, History};
use crate::hex::{bytes_to_hex, can_id_to_hex, hex3};
use crate::protocols::{ConnectOutcome, ProtocolAdapter, ProtocolId, RequestOutcome};
use crate::status::ReplyStatus;
use crate::timeout::TimeoutManager;

/// Cap on consecutive `7F xx 78` response-pending frames before giving up.
pub const MAX_PEND_RESP_NUM: u32 = 100;
/// Extended `P2*` timeout while a response-pending frame is being awaited,
/// ms.
pub const P2_STAR_MS: u32 = 5000;

fn default_tx_id(cfg: &ConfigStore, extended: bool) -> u32 {
    let header = cfg.get_bytes(BytesParam::HeaderBytes);
    if extended {
        let mut id = if !header.is_empty() {
            header.as_can_id()
        } else {
            0x18DB_33F1
        };
        let priority = cfg.get_bytes(BytesParam::CanPriorityBits);
        if !priority.is_empty() {
            let top = (priority.as_slice()[0] as u32) & 0x1F;
            id = (id & 0x00FF_FFFF) | (top << 24);
        }
        id & 0x1FFF_FFFF
    } else if !header.is_empty() {
        header.as_can_id() & 0x7FF
    } else {
        0x7DF
    }
}

fn default_filter_mask(cfg: &ConfigStore, extended: bool) -> (u32, u32) {
    let (default_filter, default_mask) = if extended {
        (0x18DA_F100, 0x1FFF_FF00)
    } else {
        (0x7E8, 0x7F8)
    };
    let filter_bytes = cfg.get_bytes(BytesParam::CanFilter);
    let mask_bytes = cfg.get_bytes(BytesParam::CanMask);
    let filter = if !filter_bytes.is_empty() {
        filter_bytes.as_can_id()
    } else {
        default_filter
    };
    let mask = if !mask_bytes.is_empty() {
        mask_bytes.as_can_id()
    } else {
        default_mask
    };
    (filter, mask)
}

/// Default flow-control response base id, 11-bit variant (`isocan11.cpp`'s
/// `ctrlData` id before the incoming sender's low address bits are ORed in).
const FC_BASE_ID_11: u32 = 0x7E0;
/// Default flow-control response base id, 29-bit variant
/// (`isocan29.cpp:87-88`).
const FC_BASE_ID_29: u32 = 0x18DA_00F1;

fn flow_control_id(cfg: &ConfigStore, incoming_id: u32, extended: bool) -> u32 {
    let mode = cfg.get_int(IntParam::CanFlowControlMode);
    let header_override = cfg.get_bytes(BytesParam::CanFlowControlHeader);
    if mode == 1 && !header_override.is_empty() {
        return header_override.as_can_id();
    }
    if extended {
        FC_BASE_ID_29 | ((incoming_id & 0xFF) << 8)
    } else {
        FC_BASE_ID_11 | (incoming_id & 0x07)
    }
}

fn flow_control_payload(cfg: &ConfigStore) -> [u8; 8] {
    let data_override = cfg.get_bytes(BytesParam::CanFlowControlData);
    if cfg.get_int(IntParam::CanFlowControlMode) > 0 && !data_override.is_empty() {
        let mut out = [DEFAULT_PAD_BYTE; 8];
        let n = data_override.len().min(8);
        out[..n].copy_from_slice(&data_override.as_slice()[..n]);
        out
    } else {
        [
            0x30,
            0x00,
            0x00,
            DEFAULT_PAD_BYTE,
            DEFAULT_PAD_BYTE,
            DEFAULT_PAD_BYTE,
            DEFAULT_PAD_BYTE,
            DEFAULT_PAD_BYTE,
        ]
    }
}

fn format_header_line(cfg: &ConfigStore, id: u32, extended: bool, dlc: u8, payload: &[u8]) -> String {
    let spacing = cfg.get_bool(ConfigParam::Spaces);
    let mut sp = Spacer::new(cfg);
    sp.push(&can_id_to_hex(id, extended, spacing));
    if cfg.get_bool(ConfigParam::CanDlc) {
        sp.push(&format!("{dlc:X}"));
    }
    sp.push(&bytes_to_hex(payload, spacing));
    sp.finish()
}

fn is_response_pending(payload: &[u8], offset: usize) -> bool {
    payload.len() >= offset + 3 && payload[offset] == 0x7F && payload[offset + 2] == 0x78
}

/// The ISO 15765-4 CAN 11-bit adapter, also answering for the USER1
/// (`ISO15765_USR_B`) variant via `user_b`.
pub struct IsoCan11Adapter {
    driver: Box<dyn CanDriver>,
    timer: Box<dyn Timer>,
    led: Box<dyn Led>,
    timeout: TimeoutManager,
    history: History,
    connected: bool,
    user_b: bool,
    extended_addressing: bool,
    via_auto: bool,
}

impl IsoCan11Adapter {
    /// Builds an adapter owning the given driver handles.
    pub fn new(driver: Box<dyn CanDriver>, timer: Box<dyn Timer>, led: Box<dyn Led>) -> Self {
        IsoCan11Adapter {
            driver,
            timer,
            led,
            timeout: TimeoutManager::new(),
            history: History::new(64),
            connected: false,
            user_b: false,
            extended_addressing: false,
            via_auto: false,
        }
    }

    /// Selects the USER1 (`ISO15765_USR_B`) variant instead of plain CAN
    /// 11-bit.
    pub fn set_user_b(&mut self, user_b: bool) {
        self.user_b = user_b;
    }

    /// Marks whether this adapter was reached through the auto-detect probe.
    pub fn set_via_auto(&mut self, via_auto: bool) {
        self.via_auto = via_auto;
    }

    fn tx_id(&self, cfg: &ConfigStore) -> u32 {
        default_tx_id(cfg, false)
    }

    fn send_single_frame(&mut self, cfg: &ConfigStore, payload: &[u8]) -> DriverResult<bool> {
        let id = self.tx_id(cfg);
        let mut data = vec![payload.len() as u8];
        data.extend_from_slice(payload);
        let dlc = if self.user_b { data.len() as u8 } else { 8 };
        let frame = CanMsgBuffer::new(id, false, dlc, &data);
        self.history.add(Direction::Tx, &frame);
        self.led.blink_tx();
        self.driver.send(&frame)
    }

    fn send_flow_control(&mut self, cfg: &ConfigStore, incoming: &CanMsgBuffer) {
        if !cfg.get_bool(ConfigParam::CanFlowControl) {
            return;
        }
        let id = flow_control_id(cfg, incoming.id, false);
        let payload = flow_control_payload(cfg);
        let frame = CanMsgBuffer::new(id, false, 8, &payload);
        self.history.add(Direction::Tx, &frame);
        let _ = self.driver.send(&frame);
    }

    fn receive_loop(&mut self, cfg: &ConfigStore, num_responses: u32) -> RequestOutcome {
        let offset = if self.extended_addressing { 1 } else { 0 };
        let mut lines = Vec::new();
        let mut responses = 0u32;
        let mut pending_count = 0u32;
        loop {
            if num_responses != crate::collector::UNBOUNDED_RESPONSES && responses >= num_responses {
                break;
            }
            let timeout_ms = if pending_count > 0 {
                P2_STAR_MS
            } else {
                self.timeout.p2_timeout(cfg, true)
            };
            self.timer.start(timeout_ms);
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
            let payload_full = frame.payload();
            if payload_full.len() <= offset {
                continue;
            }
            if is_response_pending(payload_full, offset) {
                pending_count += 1;
                if pending_count > MAX_PEND_RESP_NUM {
                    return RequestOutcome::failed(ReplyStatus::NoData);
                }
                continue;
            }
            pending_count = 0;
            match frame.frame_type_nibble(self.extended_addressing) {
                0 => {
                    let len = (payload_full[offset] & 0x0F) as usize;
                    let start = offset + 1;
                    let end = (start + len).min(payload_full.len());
                    let payload = &payload_full[start..end];
                    if cfg.get_bool(ConfigParam::HeaderShow) {
                        lines.push(self.format_line(cfg, &frame, payload));
                    } else {
                        lines.push(bytes_to_hex(payload, cfg.get_bool(ConfigParam::Spaces)));
                    }
                    responses += 1;
                }
                1 => {
                    let total_len = (((payload_full[offset] & 0x0F) as u16) << 8)
                        | *payload_full.get(offset + 1).unwrap_or(&0) as u16;
                    let payload = &payload_full[(offset + 2).min(payload_full.len())..];
                    if cfg.get_bool(ConfigParam::HeaderShow) {
                        lines.push(self.format_line(cfg, &frame, payload));
                    } else {
                        lines.push(hex3(total_len));
                        lines.push(format!(
                            "0: {}",
                            bytes_to_hex(payload, cfg.get_bool(ConfigParam::Spaces))
                        ));
                    }
                    self.send_flow_control(cfg, &frame);
                    responses += 1;
                }
                2 => {
                    let seq = payload_full[offset] & 0x0F;
                    let payload = &payload_full[(offset + 1).min(payload_full.len())..];
                    if cfg.get_bool(ConfigParam::HeaderShow) {
                        lines.push(self.format_line(cfg, &frame, payload));
                    } else {
                        lines.push(format!(
                            "{seq:X}: {}",
                            bytes_to_hex(payload, cfg.get_bool(ConfigParam::Spaces))
                        ));
                    }
                    responses += 1;
                }
                _ => continue,
            }
        }
        if lines.is_empty() {
            RequestOutcome::failed(ReplyStatus::NoData)
        } else {
            RequestOutcome::ok(lines)
        }
    }

    fn format_line(&self, cfg: &ConfigStore, frame: &CanMsgBuffer, payload: &[u8]) -> String {
        format_header_line(cfg, frame.id, false, frame.dlc, payload)
    }
}

impl ProtocolAdapter for IsoCan11Adapter {
    fn protocol(&self) -> ProtocolId {
        if self.user_b {
            ProtocolId::UserB
        } else {
            ProtocolId::Iso15765Can11
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn description(&self) -> String {
        let base = self.protocol().description();
        if self.via_auto {
            format!("AUTO, {base}")
        } else {
            base.to_string()
        }
    }

    fn open(&mut self, cfg: &ConfigStore) {
        let _ = self.driver.set_speed(500_000);
        let (filter, mask) = default_filter_mask(cfg, false);
        let _ = self.driver.set_filter_and_mask(filter, mask, false, None);
        self.led.start_timer();
        self.timeout.reset();
        self.connected = false;
    }

    fn close(&mut self) {
        let _ = self.driver.clear_filters();
        let _ = self.driver.clear_data();
        self.connected = false;
    }

    fn on_connect_ecu(&mut self, cfg: &ConfigStore, send_reply: bool) -> ConnectOutcome {
        if self.connected {
            return ConnectOutcome::connected(self.protocol());
        }
        if cfg.get_bool(ConfigParam::BypassInit) {
            self.connected = true;
            return ConnectOutcome::connected(self.protocol());
        }
        let outcome = self.on_request(cfg, &[0x01, 0x00], crate::collector::UNBOUNDED_RESPONSES);
        if outcome.status == ReplyStatus::None {
            self.connected = true;
            if send_reply {
                ConnectOutcome {
                    protocol: self.protocol(),
                    status: ReplyStatus::None,
                    request_answered: true,
                    lines: outcome.lines,
                }
            } else {
                ConnectOutcome::connected(self.protocol())
            }
        } else {
            ConnectOutcome::failed(outcome.status)
        }
    }

    fn on_request(&mut self, cfg: &ConfigStore, data: &[u8], num_responses: u32) -> RequestOutcome {
        match self.send_single_frame(cfg, data) {
            Ok(true) => {}
            Ok(false) => return RequestOutcome::failed(ReplyStatus::BusBusy),
            Err(_) => return RequestOutcome::failed(ReplyStatus::BusError),
        }
        self.receive_loop(cfg, num_responses)
    }

    fn wiring_check(&mut self) -> RequestOutcome {
        RequestOutcome::ok(vec!["WIRING: N/A".to_string()])
    }
}

/// The ISO 15765-4 CAN 29-bit adapter.
pub struct IsoCan29Adapter {
    driver: Box<dyn CanDriver>,
    timer: Box<dyn Timer>,
    led: Box<dyn Led>,
    timeout: TimeoutManager,
    history: History,
    connected: bool,
    extended_addressing: bool,
    via_auto: bool,
}

impl IsoCan29Adapter {
    /// Builds an adapter owning the given driver handles.
    pub fn new(driver: Box<dyn CanDriver>, timer: Box<dyn Timer>, led: Box<dyn Led>) -> Self {
        IsoCan29Adapter {
            driver,
            timer,
            led,
            timeout: TimeoutManager::new(),
            history: History::new(64),
            connected: false,
            extended_addressing: false,
            via_auto: false,
        }
    }

    /// Marks whether this adapter was reached through the auto-detect probe.
    pub fn set_via_auto(&mut self, via_auto: bool) {
        self.via_auto = via_auto;
    }

    fn tx_id(&self, cfg: &ConfigStore) -> u32 {
        default_tx_id(cfg, true)
    }

    fn send_single_frame(&mut self, cfg: &ConfigStore, payload: &[u8]) -> DriverResult<bool> {
        let id = self.tx_id(cfg);
        let mut data = vec![payload.len() as u8];
        data.extend_from_slice(payload);
        let frame = CanMsgBuffer::new(id, true, 8, &data);
        self.history.add(Direction::Tx, &frame);
        self.led.blink_tx();
        self.driver.send(&frame)
    }

    fn send_flow_control(&mut self, cfg: &ConfigStore, incoming: &CanMsgBuffer) {
        // 29-bit flow control is always sent, unlike the 11-bit variant,
        // which gates it on CAN_FLOW_CONTROL.
        let id = flow_control_id(cfg, incoming.id, true);
        let payload = flow_control_payload(cfg);
        let frame = CanMsgBuffer::new(id, true, 8, &payload);
        self.history.add(Direction::Tx, &frame);
        let _ = self.driver.send(&frame);
    }

    fn receive_loop(&mut self, cfg: &ConfigStore, num_responses: u32) -> RequestOutcome {
        let offset = if self.extended_addressing { 1 } else { 0 };
        let mut lines = Vec::new();
        let mut responses = 0u32;
        let mut pending_count = 0u32;
        loop {
            if num_responses != crate::collector::UNBOUNDED_RESPONSES && responses >= num_responses {
                break;
            }
            let timeout_ms = if pending_count > 0 {
                P2_STAR_MS
            } else {
                self.timeout.p2_timeout(cfg, true)
            };
            self.timer.start(timeout_ms);
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
            let payload_full = frame.payload();
            if payload_full.len() <= offset {
                continue;
            }
            if is_response_pending(payload_full, offset) {
                pending_count += 1;
                if pending_count > MAX_PEND_RESP_NUM {
                    return RequestOutcome::failed(ReplyStatus::NoData);
                }
                continue;
            }
            pending_count = 0;
            match frame.frame_type_nibble(self.extended_addressing) {
                0 => {
                    let len = (payload_full[offset] & 0x0F) as usize;
                    let start = offset + 1;
                    let end = (start + len).min(payload_full.len());
                    let payload = &payload_full[start..end];
                    if cfg.get_bool(ConfigParam::HeaderShow) {
                        lines.push(self.format_line(cfg, &frame, payload));
                    } else {
                        lines.push(bytes_to_hex(payload, cfg.get_bool(ConfigParam::Spaces)));
                    }
                    responses += 1;
                }
                1 => {
                    let total_len = (((payload_full[offset] & 0x0F) as u16) << 8)
                        | *payload_full.get(offset + 1).unwrap_or(&0) as u16;
                    let payload = &payload_full[(offset + 2).min(payload_full.len())..];
                    if cfg.get_bool(ConfigParam::HeaderShow) {
                        lines.push(self.format_line(cfg, &frame, payload));
                    } else {
                        lines.push(hex3(total_len));
                        lines.push(format!(
                            "0: {}",
                            bytes_to_hex(payload, cfg.get_bool(ConfigParam::Spaces))
                        ));
                    }
                    self.send_flow_control(cfg, &frame);
                    responses += 1;
                }
                2 => {
                    let seq = payload_full[offset] & 0x0F;
                    let payload = &payload_full[(offset + 1).min(payload_full.len())..];
                    if cfg.get_bool(ConfigParam::HeaderShow) {
                        lines.push(self.format_line(cfg, &frame, payload));
                    } else {
                        lines.push(format!(
                            "{seq:X}: {}",
                            bytes_to_hex(payload, cfg.get_bool(ConfigParam::Spaces))
                        ));
                    }
                    responses += 1;
                }
                _ => continue,
            }
        }
        if lines.is_empty() {
            RequestOutcome::failed(ReplyStatus::NoData)
        } else {
            RequestOutcome::ok(lines)
        }
    }

    fn format_line(&self, cfg: &ConfigStore, frame: &CanMsgBuffer, payload: &[u8]) -> String {
        format_header_line(cfg, frame.id, true, frame.dlc, payload)
    }
}

impl ProtocolAdapter for IsoCan29Adapter {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::Iso15765Can29
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn description(&self) -> String {
        let base = ProtocolId::Iso15765Can29.description();
        if self.via_auto {
            format!("AUTO, {base}")
        } else {
            base.to_string()
        }
    }

    fn open(&mut self, cfg: &ConfigStore) {
        let _ = self.driver.set_speed(500_000);
        let (filter, mask) = default_filter_mask(cfg, true);
        let _ = self.driver.set_filter_and_mask(filter, mask, true, None);
        self.led.start_timer();
        self.timeout.reset();
        self.connected = false;
    }

    fn close(&mut self) {
        let _ = self.driver.clear_filters();
        let _ = self.driver.clear_data();
        self.connected = false;
    }

    fn on_connect_ecu(&mut self, cfg: &ConfigStore, send_reply: bool) -> ConnectOutcome {
        if self.connected {
            return ConnectOutcome::connected(ProtocolId::Iso15765Can29);
        }
        if cfg.get_bool(ConfigParam::BypassInit) {
            self.connected = true;
            return ConnectOutcome::connected(ProtocolId::Iso15765Can29);
        }
        let outcome = self.on_request(cfg, &[0x01, 0x00], crate::collector::UNBOUNDED_RESPONSES);
        if outcome.status == ReplyStatus::None {
            self.connected = true;
            if send_reply {
                ConnectOutcome {
                    protocol: ProtocolId::Iso15765Can29,
                    status: ReplyStatus::None,
                    request_answered: true,
                    lines: outcome.lines,
                }
            } else {
                ConnectOutcome::connected(ProtocolId::Iso15765Can29)
            }
        } else {
            ConnectOutcome::failed(outcome.status)
        }
    }

    fn on_request(&mut self, cfg: &ConfigStore, data: &[u8], num_responses: u32) -> RequestOutcome {
        match self.send_single_frame(cfg, data) {
            Ok(true) => {}
            Ok(false) => return RequestOutcome::failed(ReplyStatus::BusBusy),
            Err(_) => return RequestOutcome::failed(ReplyStatus::BusError),
        }
        self.receive_loop(cfg, num_responses)
    }

    fn wiring_check(&mut self) -> RequestOutcome {
        RequestOutcome::ok(vec!["WIRING: N/A".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    struct FakeCan {
        rx: VecDeque<CanMsgBuffer>,
        sent: Rc<RefCell<Vec<CanMsgBuffer>>>,
    }
    impl CanDriver for FakeCan {
        fn set_speed(&mut self, _bps: u32) -> DriverResult<()> {
            Ok(())
        }
        fn send(&mut self, frame: &CanMsgBuffer) -> DriverResult<bool> {
            self.sent.borrow_mut().push(*frame);
            Ok(true)
        }
        fn is_ready(&self) -> bool {
            !self.rx.is_empty()
        }
        fn read(&mut self) -> DriverResult<Option<CanMsgBuffer>> {
            Ok(self.rx.pop_front())
        }
        fn set_filter_and_mask(
            &mut self,
            _filter: u32,
            _mask: u32,
            _extended: bool,
            _slot: Option<u8>,
        ) -> DriverResult<()> {
            Ok(())
        }
        fn clear_filters(&mut self) -> DriverResult<()> {
            Ok(())
        }
        fn clear_data(&mut self) -> DriverResult<()> {
            Ok(())
        }
        fn set_silent(&mut self, _silent: bool) -> DriverResult<()> {
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

    fn can11_with_rx(rx: VecDeque<CanMsgBuffer>) -> IsoCan11Adapter {
        IsoCan11Adapter::new(
            Box::new(FakeCan {
                rx,
                sent: Rc::new(RefCell::new(Vec::new())),
            }),
            Box::new(FakeTimer),
            Box::new(FakeLed),
        )
    }

    fn can11_with_rx_tracking(
        rx: VecDeque<CanMsgBuffer>,
    ) -> (IsoCan11Adapter, Rc<RefCell<Vec<CanMsgBuffer>>>) {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let adapter = IsoCan11Adapter::new(
            Box::new(FakeCan {
                rx,
                sent: sent.clone(),
            }),
            Box::new(FakeTimer),
            Box::new(FakeLed),
        );
        (adapter, sent)
    }

    #[test]
    fn scenario_2_first_and_consecutive_frames() {
        let cfg = ConfigStore::new();
        let mut rx = VecDeque::new();
        rx.push_back(CanMsgBuffer::new(
            0x7E8,
            false,
            8,
            &[0x10, 0x14, 0x49, 0x02, 0x01, 0x31, 0x47, 0x31],
        ));
        let (mut a, sent) = can11_with_rx_tracking(rx);
        a.connected = true;
        let outcome = a.on_request(&cfg, &[0x09, 0x02], crate::collector::UNBOUNDED_RESPONSES);
        assert_eq!(outcome.lines[0], "014");
        assert_eq!(outcome.lines[1], "0: 49 02 01 31 47 31");
        // The flow-control frame's id is the dedicated response base 0x7E0,
        // not the request id 0x7DF, per the original's `ctrlData` base.
        let sent = sent.borrow();
        let fc = sent.iter().find(|f| f.data[0] == 0x30).expect("flow control frame sent");
        assert_eq!(fc.id, 0x7E0);
    }

    #[test]
    fn single_frame_reply_emits_payload_only() {
        let cfg = ConfigStore::new();
        let mut rx = VecDeque::new();
        rx.push_back(CanMsgBuffer::new(
            0x7E8,
            false,
            8,
            &[0x06, 0x41, 0x00, 0xBE, 0x3F, 0xB8, 0x11, 0xAA],
        ));
        let mut a = can11_with_rx(rx);
        a.connected = true;
        let outcome = a.on_request(&cfg, &[0x01, 0x00], crate::collector::UNBOUNDED_RESPONSES);
        assert_eq!(outcome.lines[0], "41 00 BE 3F B8 11");
    }

    #[test]
    fn response_pending_extends_wait_without_no_data() {
        let cfg = ConfigStore::new();
        let mut rx = VecDeque::new();
        for _ in 0..5 {
            rx.push_back(CanMsgBuffer::new(0x7E8, false, 8, &[0x03, 0x7F, 0x01, 0x78]));
        }
        rx.push_back(CanMsgBuffer::new(
            0x7E8,
            false,
            8,
            &[0x02, 0x41, 0x00],
        ));
        let mut a = can11_with_rx(rx);
        a.connected = true;
        let outcome = a.on_request(&cfg, &[0x01, 0x00], crate::collector::UNBOUNDED_RESPONSES);
        assert_eq!(outcome.lines[0], "41 00");
    }
}
