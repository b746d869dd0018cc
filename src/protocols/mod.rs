//! C7/C8 — Protocol Adapters and the auto-detect adapter.
//!
//! The reference firmware models nine concrete protocol variants (PWM, VPW,
//! ISO 9141, ISO 14230 slow, ISO 14230 fast, ISO 15765-4 CAN 11-bit, CAN
//! 29-bit, SAE J1939, and the USER1 CAN variant) as an inheritance hierarchy
//! rooted at `ProtocolAdapter`, with a tenth adapter (`AutoAdapter`) that
//! probes the others. Per the tagged-sum design note this crate replaces the
//! hierarchy with one trait implemented by six concrete adapter structs
//! (ISO 9141/14230 slow/fast share [`iso_serial::IsoSerialAdapter`]; CAN
//! 11-bit and USER1 share [`iso_can::IsoCan11Adapter`]) plus [`ProtocolId`]
//! as the tag used to select between them. [`crate::dispatcher::ObdProfile`]
//! owns every adapter at once -- not just the active one -- because the
//! auto-detect probe needs to drive each of them in turn; `ProtocolId` is
//! simply which one currently answers host requests.
//!
//! Discriminants follow the standard ELM327 `ATSP`/`ATDPN` protocol numbers,
//! recovered from the `getDescriptionNum()` strings observed in
//! `isocan11.cpp`/`isocan29.cpp`/`j1939.cpp` ("6", "7", "A", "B") rather than
//! from `adaptertypes.h` directly (its `PROT_*` constants were not present in
//! the retrieved source pack); see `DESIGN.md`.

pub mod auto;
pub mod iso_can;
pub mod iso_serial;
pub mod j1939;
pub mod pwm;
pub mod vpw;

use crate::config::ConfigStore;
use crate::status::ReplyStatus;

/// Which of the nine protocol variants an adapter is acting as.
///
/// Numeric values match the ELM327 `ATSP n` / `ATDPN` convention; `Auto`
/// (0) is not one of the nine, it means "no protocol settled on yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolId {
    /// No protocol selected yet / automatic search in progress.
    Auto = 0,
    /// SAE J1850 PWM, 41.6 kbit.
    J1850Pwm = 1,
    /// SAE J1850 VPW, 10.4/41.6 kbit.
    J1850Vpw = 2,
    /// ISO 9141-2.
    Iso9141 = 3,
    /// ISO 14230-4 KWP2000, 5-baud init.
    Iso14230Slow = 4,
    /// ISO 14230-4 KWP2000, fast init.
    Iso14230Fast = 5,
    /// ISO 15765-4, CAN 11-bit id, 500 kbit.
    Iso15765Can11 = 6,
    /// ISO 15765-4, CAN 29-bit id, 500 kbit.
    Iso15765Can29 = 7,
    /// SAE J1939, CAN 29-bit id, 250 kbit.
    J1939 = 0xA,
    /// USER1: CAN 11-bit id, unpadded DLC.
    UserB = 0xB,
}

impl ProtocolId {
    /// The single-character `ATDPN` code for this protocol.
    pub fn description_num(self) -> &'static str {
        match self {
            ProtocolId::Auto => "0",
            ProtocolId::J1850Pwm => "1",
            ProtocolId::J1850Vpw => "2",
            ProtocolId::Iso9141 => "3",
            ProtocolId::Iso14230Slow => "4",
            ProtocolId::Iso14230Fast => "5",
            ProtocolId::Iso15765Can11 => "6",
            ProtocolId::Iso15765Can29 => "7",
            ProtocolId::J1939 => "A",
            ProtocolId::UserB => "B",
        }
    }

    /// The `ATDP`-style human-readable description for this protocol.
    pub fn description(self) -> &'static str {
        match self {
            ProtocolId::Auto => "AUTO",
            ProtocolId::J1850Pwm => "SAE J1850 PWM",
            ProtocolId::J1850Vpw => "SAE J1850 VPW",
            ProtocolId::Iso9141 => "ISO 9141-2",
            ProtocolId::Iso14230Slow => "ISO 14230-4 (KWP 5BAUD)",
            ProtocolId::Iso14230Fast => "ISO 14230-4 (KWP FAST)",
            ProtocolId::Iso15765Can11 => "ISO 15765-4 (CAN 11/500)",
            ProtocolId::Iso15765Can29 => "ISO 15765-4 (CAN 29/500)",
            ProtocolId::J1939 => "SAE J1939 (CAN 29/250)",
            ProtocolId::UserB => "USER1 (CAN 11/500)",
        }
    }

    /// Whether this protocol belongs to the ISO 9141/14230 serial family,
    /// used by the dispatcher's length-ceiling and "embeds the real request"
    /// rules (§4.8).
    pub fn is_iso_serial(self) -> bool {
        matches!(
            self,
            ProtocolId::Iso9141 | ProtocolId::Iso14230Slow | ProtocolId::Iso14230Fast
        )
    }
}

/// The result of a connect attempt ([`ProtocolAdapter::on_connect_ecu`]).
#[derive(Debug, Clone)]
pub struct ConnectOutcome {
    /// The protocol actually settled on; [`ProtocolId::Auto`] on failure.
    pub protocol: ProtocolId,
    /// The status to translate into a reply line, or
    /// [`ReplyStatus::None`] when `lines` already carries the full reply.
    pub status: ReplyStatus,
    /// True when this connect step already transmitted the caller's actual
    /// request and `lines` holds its reply -- only a CAN/auto-CAN connect
    /// embeds the probe request this way (the `0100`+AUTO shortcut).
    pub request_answered: bool,
    /// Reply lines already produced by this step, if any.
    pub lines: Vec<String>,
}

impl ConnectOutcome {
    /// A failed connect attempt with no lines emitted.
    pub fn failed(status: ReplyStatus) -> Self {
        ConnectOutcome {
            protocol: ProtocolId::Auto,
            status,
            request_answered: false,
            lines: Vec::new(),
        }
    }

    /// A successful connect with no request embedded.
    pub fn connected(protocol: ProtocolId) -> Self {
        ConnectOutcome {
            protocol,
            status: ReplyStatus::None,
            request_answered: false,
            lines: Vec::new(),
        }
    }
}

/// The result of an in-session request ([`ProtocolAdapter::on_request`]) or
/// a wiring check.
#[derive(Debug, Clone, Default)]
pub struct RequestOutcome {
    /// The status to translate into a reply line.
    pub status: ReplyStatus,
    /// Reply lines already produced (payload lines, header lines, ...).
    pub lines: Vec<String>,
}

impl RequestOutcome {
    /// A failed request with no lines.
    pub fn failed(status: ReplyStatus) -> Self {
        RequestOutcome {
            status,
            lines: Vec::new(),
        }
    }

    /// A successful request whose lines have already been produced.
    pub fn ok(lines: Vec<String>) -> Self {
        RequestOutcome {
            status: ReplyStatus::None,
            lines,
        }
    }
}

/// The uniform contract every concrete protocol adapter implements.
///
/// Each adapter owns its own driver handle(s), framing buffers, and
/// [`crate::history::History`] -- there is no shared adapter-base state.
/// [`ProtocolAdapter::open`]/[`ProtocolAdapter::close`] take no driver
/// argument because the driver is already owned by the adapter at
/// construction time; only the dynamic configuration is threaded through.
pub trait ProtocolAdapter {
    /// Which protocol this adapter is currently acting as.
    fn protocol(&self) -> ProtocolId;

    /// Whether the bus link is currently established.
    fn is_connected(&self) -> bool;

    /// Human-readable description, with an `"AUTO, "` prefix when this
    /// adapter was reached via the auto-detect probe rather than an
    /// explicit `ATSP`.
    fn description(&self) -> String;

    /// The `ATDPN`-style protocol number string.
    fn description_num(&self) -> &'static str {
        self.protocol().description_num()
    }

    /// Opens the bus (resets the timeout manager, arms the LED idle timer,
    /// installs default filters). Idempotent.
    fn open(&mut self, cfg: &ConfigStore);

    /// Closes the bus, returning it to idle.
    fn close(&mut self);

    /// Attempts to establish the bus link. `send_reply` is true when the
    /// caller's actual request should be embedded in the connect attempt
    /// when the protocol family supports it (only CAN/auto-CAN do).
    fn on_connect_ecu(&mut self, cfg: &ConfigStore, send_reply: bool) -> ConnectOutcome;

    /// Sends `data` and collects up to `num_responses` replies (unbounded if
    /// [`crate::collector::UNBOUNDED_RESPONSES`]).
    fn on_request(&mut self, cfg: &ConfigStore, data: &[u8], num_responses: u32) -> RequestOutcome;

    /// Runs this adapter's bit-toggle loopback self-test.
    fn wiring_check(&mut self) -> RequestOutcome;

    /// Services this adapter's keep-alive heartbeat, if it has one. Most
    /// adapters no-op; only the serial family arms a long keep-alive timer.
    fn heartbeat(&mut self, _cfg: &ConfigStore) {}
}
