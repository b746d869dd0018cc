//! C9 — OBD Profile: the dispatcher that owns every protocol adapter, holds
//! the currently selected one, and translates adapter status codes into the
//! ASCII reply lines a host sees.
//!
//! Grounded on `original_source/src/adapter/obd/obdprofile.cpp`. The
//! reference firmware's `current_adapter` is a single polymorphic pointer
//! that gets reassigned on `ATSP`; here [`ObdProfile`] owns all six adapter
//! structs directly (the auto-detect probe needs simultaneous access to
//! five of them) and tracks which protocol is selected with two fields
//! instead: `requested` (what `ATSP` asked for, `Auto` included) and
//! `active` (which adapter has actually completed a connect and is
//! currently answering requests -- `None` until the next successful
//! connect, including after a `USE_AUTO_SP` fallback that resolves to a
//! different protocol than `requested` named).

use crate::collector::Collector;
use crate::config::{ConfigParam, ConfigStore};
use crate::protocols::auto::AutoAdapter;
use crate::protocols::iso_can::{IsoCan11Adapter, IsoCan29Adapter};
use crate::protocols::iso_serial::IsoSerialAdapter;
use crate::protocols::j1939::J1939Adapter;
use crate::protocols::pwm::PwmAdapter;
use crate::protocols::vpw::VpwAdapter;
use crate::protocols::{ConnectOutcome, ProtocolAdapter, ProtocolId, RequestOutcome};
use crate::status::ReplyStatus;

/// Base request-length ceiling for protocols with no special headroom
/// (J1939: a single frame carries the payload directly, no length byte).
pub const BASE_MAX_REQUEST_LEN: usize = 8;
/// Ceiling for the ISO 9141/14230 serial family (`KWP` gets one extra byte).
pub const ISO_SERIAL_MAX_REQUEST_LEN: usize = 9;
/// Ceiling for J1850 VPW, which supports long multi-frame messages.
pub const VPW_MAX_REQUEST_LEN: usize = 2080;
/// Ceiling for the ISO 15765-4 CAN adapters: an ISO-TP single frame reserves
/// its first data byte for the length nibble, leaving 7 payload bytes (§4.3).
pub const CAN_SINGLE_FRAME_MAX_REQUEST_LEN: usize = 7;

fn same_adapter(a: ProtocolId, b: ProtocolId) -> bool {
    use ProtocolId::*;
    matches!(
        (a, b),
        (J1850Pwm, J1850Pwm)
            | (J1850Vpw, J1850Vpw)
            | (
                Iso9141 | Iso14230Slow | Iso14230Fast,
                Iso9141 | Iso14230Slow | Iso14230Fast
            )
            | (Iso15765Can11 | UserB, Iso15765Can11 | UserB)
            | (Iso15765Can29, Iso15765Can29)
            | (J1939, J1939)
            | (Auto, Auto)
    )
}

/// Owns every protocol adapter and dispatches host requests to whichever
/// one is currently selected.
pub struct ObdProfile {
    pwm: PwmAdapter,
    vpw: VpwAdapter,
    iso: IsoSerialAdapter,
    can11: IsoCan11Adapter,
    can29: IsoCan29Adapter,
    j1939: J1939Adapter,
    auto: AutoAdapter,
    requested: ProtocolId,
    active: Option<ProtocolId>,
}

impl ObdProfile {
    /// Builds a dispatcher owning the given concrete adapters, selecting
    /// [`ProtocolId::Auto`] by default and not yet connected.
    pub fn new(
        pwm: PwmAdapter,
        vpw: VpwAdapter,
        iso: IsoSerialAdapter,
        can11: IsoCan11Adapter,
        can29: IsoCan29Adapter,
        j1939: J1939Adapter,
    ) -> Self {
        ObdProfile {
            pwm,
            vpw,
            iso,
            can11,
            can29,
            j1939,
            auto: AutoAdapter::new(),
            requested: ProtocolId::Auto,
            active: None,
        }
    }

    fn adapter_for(&mut self, protocol: ProtocolId) -> &mut dyn ProtocolAdapter {
        match protocol {
            ProtocolId::J1850Pwm => &mut self.pwm,
            ProtocolId::J1850Vpw => &mut self.vpw,
            ProtocolId::Iso9141 | ProtocolId::Iso14230Slow | ProtocolId::Iso14230Fast => {
                &mut self.iso
            }
            ProtocolId::Iso15765Can11 | ProtocolId::UserB => &mut self.can11,
            ProtocolId::Iso15765Can29 => &mut self.can29,
            ProtocolId::J1939 => &mut self.j1939,
            ProtocolId::Auto => unreachable!("Auto has no single adapter; use run_connect"),
        }
    }

    /// The protocol number last set via [`ObdProfile::set_protocol`]
    /// (`ATSP n`'s argument); [`ProtocolId::Auto`] means automatic search.
    pub fn requested_protocol(&self) -> ProtocolId {
        self.requested
    }

    /// The protocol actually answering requests right now, if any adapter
    /// has completed a connect since the last [`ObdProfile::set_protocol`]
    /// or [`ObdProfile::close`].
    pub fn active_protocol(&self) -> Option<ProtocolId> {
        self.active
    }

    /// Direct access to the J1939 adapter, for the `ATMA`/`ATMP`
    /// passive-monitor commands that bypass the request/response dispatch
    /// path entirely (out of scope for this crate's AT command layer, but
    /// the hook a host integration needs).
    pub fn j1939_adapter_mut(&mut self) -> &mut J1939Adapter {
        &mut self.j1939
    }

    /// Swaps the selected protocol. If `refresh` is true and the newly
    /// selected protocol maps to a different adapter than the previous
    /// selection, the old adapter is closed and the new one opened.
    /// Selecting an ISO 9141/14230 sub-protocol re-points the serial
    /// adapter's own internal selector; selecting [`ProtocolId::Auto`]
    /// resets it (and the auto-detect probe's memory) back to automatic.
    pub fn set_protocol(&mut self, cfg: &ConfigStore, protocol: ProtocolId, refresh: bool) {
        let old = self.requested;
        let changed = !same_adapter(old, protocol);

        if protocol.is_iso_serial() {
            self.iso.set_requested(protocol);
        } else if protocol == ProtocolId::Auto {
            self.iso.set_requested(ProtocolId::Auto);
            self.auto.reset();
        }
        self.can11.set_user_b(protocol == ProtocolId::UserB);
        self.requested = protocol;

        if refresh && changed {
            match old {
                ProtocolId::Auto => {
                    if let Some(resolved) = self.auto.resolved() {
                        self.adapter_for(resolved).close();
                    }
                }
                _ => self.adapter_for(old).close(),
            }
            if protocol != ProtocolId::Auto {
                self.adapter_for(protocol).open(cfg);
            }
        }

        self.active = if protocol == ProtocolId::Auto {
            None
        } else if self.adapter_for(protocol).is_connected() {
            Some(protocol)
        } else {
            None
        };
    }

    /// Closes whichever adapter is active and forgets the connection.
    pub fn close(&mut self) {
        if let Some(active) = self.active {
            self.adapter_for(active).close();
        } else if self.requested == ProtocolId::Auto {
            if let Some(resolved) = self.auto.resolved() {
                self.adapter_for(resolved).close();
            }
        }
        self.active = None;
        self.auto.reset();
    }

    fn max_request_len(&self) -> usize {
        if self.requested.is_iso_serial() {
            ISO_SERIAL_MAX_REQUEST_LEN
        } else if self.requested == ProtocolId::J1850Vpw {
            VPW_MAX_REQUEST_LEN
        } else if matches!(
            self.requested,
            ProtocolId::Iso15765Can11 | ProtocolId::Iso15765Can29 | ProtocolId::UserB
        ) {
            CAN_SINGLE_FRAME_MAX_REQUEST_LEN
        } else {
            BASE_MAX_REQUEST_LEN
        }
    }

    fn run_connect(&mut self, cfg: &ConfigStore, protocol: ProtocolId, send_reply: bool) -> ConnectOutcome {
        if protocol == ProtocolId::Auto {
            self.auto.probe(
                cfg,
                &mut self.pwm,
                &mut self.vpw,
                &mut self.iso,
                &mut self.can11,
                &mut self.can29,
                send_reply,
            )
        } else {
            self.adapter_for(protocol).on_connect_ecu(cfg, send_reply)
        }
    }

    fn connect_then_request(&mut self, cfg: &ConfigStore, data: &[u8], num_responses: u32) -> RequestOutcome {
        let send_reply = self.requested == ProtocolId::Auto && data == [0x01, 0x00];
        let mut connect = self.run_connect(cfg, self.requested, send_reply);

        if connect.status != ReplyStatus::None
            && self.requested != ProtocolId::Auto
            && connect.protocol == ProtocolId::Auto
            && connect.status == ReplyStatus::NoData
            && cfg.get_bool(ConfigParam::UseAutoSearchProtocol)
        {
            connect = self.run_connect(cfg, ProtocolId::Auto, send_reply);
        }

        if connect.status != ReplyStatus::None {
            self.active = None;
            return RequestOutcome::failed(connect.status);
        }

        self.active = Some(connect.protocol);

        if connect.request_answered {
            RequestOutcome {
                status: ReplyStatus::None,
                lines: connect.lines,
            }
        } else {
            let req = self.adapter_for(connect.protocol).on_request(cfg, data, num_responses);
            let mut lines = connect.lines;
            lines.extend(req.lines);
            RequestOutcome {
                status: req.status,
                lines,
            }
        }
    }

    fn translate(&self, status: ReplyStatus, mut lines: Vec<String>) -> Vec<String> {
        // `ReplyStatus` is an exhaustive enum, so every variant maps to a
        // documented line except `None` (the reply was already emitted);
        // the reference firmware's "Program Error" fallback for an
        // unrecognized numeric status has no reachable path here.
        if let Some(line) = status.reply_line() {
            lines.push(line.to_string());
        }
        lines
    }

    /// Handles one complete host request: validates length, connects if
    /// necessary (possibly via the auto-detect probe), routes to the
    /// selected adapter, and returns the full set of ASCII reply lines
    /// (payload lines followed by the translated status line, if any).
    pub fn on_request(&mut self, cfg: &ConfigStore, collector: &Collector) -> Vec<String> {
        let data = collector.bytes();
        let num_responses = collector.num_of_responses();

        if data.is_empty() || data.len() > self.max_request_len() {
            return self.translate(ReplyStatus::DataError, Vec::new());
        }

        let outcome = match self.active {
            Some(protocol) => self.adapter_for(protocol).on_request(cfg, data, num_responses),
            None => self.connect_then_request(cfg, data, num_responses),
        };

        self.translate(outcome.status, outcome.lines)
    }

    /// Runs the wiring-check self-test (`ATWC`-equivalent) against whichever
    /// protocol is currently active, or the requested one if not yet
    /// connected; with [`ProtocolId::Auto`] and no prior resolution there is
    /// no adapter to test.
    pub fn wiring_check(&mut self) -> Vec<String> {
        let target = self.active.or(if self.requested != ProtocolId::Auto {
            Some(self.requested)
        } else {
            self.auto.resolved()
        });
        match target {
            Some(protocol) => {
                let outcome = self.adapter_for(protocol).wiring_check();
                self.translate(outcome.status, outcome.lines)
            }
            None => self.translate(ReplyStatus::WiringError, Vec::new()),
        }
    }

    /// Services the active adapter's keep-alive heartbeat, if any; a no-op
    /// when nothing is connected.
    pub fn heartbeat(&mut self, cfg: &ConfigStore) {
        if let Some(protocol) = self.active {
            self.adapter_for(protocol).heartbeat(cfg);
        }
    }

    /// Human-readable protocol description (`ATDP`), reflecting the active
    /// adapter when connected or the requested selection otherwise.
    pub fn description(&mut self) -> String {
        let target = self.active.or(if self.requested != ProtocolId::Auto {
            Some(self.requested)
        } else {
            self.auto.resolved()
        });
        match target {
            Some(protocol) => self.adapter_for(protocol).description(),
            None => "AUTO".to_string(),
        }
    }

    /// `ATDPN`-style protocol number string for the requested selection.
    pub fn description_num(&self) -> &'static str {
        self.requested.description_num()
    }
}
