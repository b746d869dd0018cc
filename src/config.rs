//! C1 — the Config Store: a typed key/value repository for the adapter's
//! tunable properties.
//!
//! Properties are partitioned by numeric range the same way the reference
//! firmware partitions them, so a property id alone reveals its storage
//! class: boolean properties start at 0, integer properties at 100, and
//! byte-array properties at 1000. [`ConfigStore`] is constructed fully
//! defaulted -- there is no uninitialized state to observe.

use std::fmt;

/// Fixed capacity of a byte-array property (a CAN id/mask/filter/header is
/// at most 4 bytes; room is left for the odd longer header pattern).
pub const BYTES_PROP_CAPACITY: usize = 7;

/// A property identifier for [`ConfigStore`].
///
/// Discriminants are grouped by storage class purely for readability; unlike
/// the reference firmware's bitpacked `AT_Requests` enum, nothing here
/// depends on the numeric value itself -- [`ConfigStore`] indexes by enum
/// variant, not by casting to an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[non_exhaustive]
pub enum ConfigParam {
    /// ATAT0/1/2 select which of these is active; mutually exclusive.
    AdaptiveTiming0,
    /// Relaxed adaptive timing (+30ms over the observed P2).
    AdaptiveTiming1,
    /// Tight adaptive timing (+10ms over the observed P2).
    AdaptiveTiming2,
    /// ATAL: allow responses longer than the default serial message cap.
    AllowLong,
    /// Derive the expected VPW/PWM reply filter byte from the request
    /// itself instead of `ReceiveFilter`.
    AutoReceive,
    /// ATBD-style buffer dump of the history ring.
    BufferDump,
    /// Skip protocol init handshakes entirely and assume connected.
    BypassInit,
    /// Enable checksum acceptance filtering (CAF) on the CAN controller.
    CanCaf,
    /// ATD1/D0: prefix CAN replies with a DLC byte.
    CanDlc,
    /// ATCFC1/0: send ISO-TP flow-control frames automatically.
    CanFlowControl,
    /// Validate the DLC of received CAN frames against the expected value.
    CanValidateDlc,
    /// ATDPN/ATDP style "show protocol number" instead of description.
    DescribeProtocolNumber,
    /// Echo host input back on the UART link.
    Echo,
    /// ATFI: force ISO 14230 fast init instead of slow init.
    FastInit,
    /// Header bytes are included in replies (`HEADER_SHOW`, `ATH1`).
    HeaderShow,
    /// Emit a keyword-bytes display line after a successful slow init.
    KwDisplay,
    /// Validate slow-init keyword bytes (`KB1`/`KB2`) before accepting a
    /// protocol classification.
    KwCheck,
    /// Append LF after CR on replies.
    Linefeed,
    /// J1939 byte-order flag for the outgoing payload (`JF`).
    J1939Format,
    /// Decompose J1939 29-bit ids into priority/PGN/source fields on
    /// display (`JH`).
    J1939Header,
    /// Multiply the J1939 receive timeout by 5.
    J1939TimeoutMultiplier,
    /// Multiply the CAN/ISO-15765 receive timeout by 5.
    CanTimeoutMultiplier,
    /// ATS1/0: insert spaces between formatted bytes.
    Spaces,
    /// ATSP mode uses automatic speed/protocol search, annotate replies with
    /// "AUTO, ".
    UseAutoSearchProtocol,
    /// ATFI slow-init address byte override target (stored separately from
    /// the int property so both can coexist during probing); unused unless
    /// explicitly toggled by the AT layer.
    ForceSlowInit,
}

/// An integer-valued property identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[non_exhaustive]
pub enum IntParam {
    /// Flow-control block-size/separation override selector.
    CanFlowControlMode,
    /// User-selected CAN header id override (low bits).
    CanSetAddress,
    /// Extended-addressing tester address (kept for completeness; current
    /// behavior does not filter on it, see `protocols::iso_can`).
    CanTesterAddress,
    /// ISO 9141/14230 slow-init address byte, default `0x33`.
    IsoInitAddress,
    /// The currently requested protocol number (`ATSP n`).
    Protocol,
    /// `RECEIVE_FILTER` expected second-byte for VPW/PWM replies when
    /// `AutoReceive` is off.
    ReceiveFilter,
    /// User-set base timeout (`ATST`), in units of 4ms; 0 means "use the
    /// documented default".
    Timeout,
    /// VPW bit-time multiplier: 1 (standard) or 4 (slow/41.6kbit variants).
    VpwSpeed,
    /// Keep-alive interval in units of 20ms; 0 disables keep-alive.
    WakeupVal,
}

/// A byte-array-valued property identifier (each holds up to
/// [`BYTES_PROP_CAPACITY`] bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[non_exhaustive]
pub enum BytesParam {
    /// Custom flow-control frame data bytes.
    CanFlowControlData,
    /// Custom flow-control frame header/id override.
    CanFlowControlHeader,
    /// Custom CAN receive filter.
    CanFilter,
    /// Custom CAN receive mask.
    CanMask,
    /// Custom CAN priority bits (top byte override for 29-bit ids).
    CanPriorityBits,
    /// Custom header bytes, overriding Ecumsg/CAN id defaults.
    HeaderBytes,
    /// Custom ISO 9141/14230 keep-alive wakeup message.
    WakeupMessageHeader,
}

/// A fixed-capacity byte array, the byte-array property storage class.
///
/// `as_can_id` composes up to 4 bytes into a `u32` little-endian -- i.e.
/// `data[0]` is the least-significant byte. The reference firmware has a
/// documented copy-paste bug in this composition for the 4-byte case (DESIGN
/// decision #3); this implementation uses the evidently-intended ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteArray {
    data: [u8; BYTES_PROP_CAPACITY],
    length: usize,
}

impl ByteArray {
    /// Builds a `ByteArray` from a slice, truncating beyond capacity.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut data = [0u8; BYTES_PROP_CAPACITY];
        let length = bytes.len().min(BYTES_PROP_CAPACITY);
        data[..length].copy_from_slice(&bytes[..length]);
        ByteArray { data, length }
    }

    /// The configured bytes (may be empty -- an empty array means "use the
    /// built-in default" everywhere this is read).
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Number of configured bytes.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether no bytes are configured (the "use the default" state).
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Composes up to the first 4 configured bytes into a CAN identifier,
    /// little-endian (`data[0]` least significant).
    pub fn as_can_id(&self) -> u32 {
        let mut out = 0u32;
        for (i, &b) in self.data.iter().take(4.min(self.length)).enumerate() {
            out |= (b as u32) << (8 * i);
        }
        out
    }
}

impl fmt::Display for ByteArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::hex::bytes_to_hex(self.as_slice(), true))
    }
}

/// Typed key/value store for the adapter's configuration surface.
///
/// Booleans are packed into a single `u64` word (one bit per
/// [`ConfigParam`] variant), integers live in a small fixed array indexed by
/// [`IntParam`], and byte arrays live in a fixed array of [`ByteArray`]
/// indexed by [`BytesParam`] -- mirroring the three-partition layout the
/// reference firmware uses, without relying on raw numeric property ids.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    bools: u64,
    ints: [i64; NUM_INT_PARAMS],
    bytes: [ByteArray; NUM_BYTES_PARAMS],
}

const NUM_BOOL_PARAMS: usize = 25;
const NUM_INT_PARAMS: usize = 9;
const NUM_BYTES_PARAMS: usize = 7;

fn bool_bit(p: ConfigParam) -> u64 {
    1u64 << (p as u64)
}

fn int_index(p: IntParam) -> usize {
    p as usize
}

fn bytes_index(p: BytesParam) -> usize {
    p as usize
}

impl Default for ConfigStore {
    fn default() -> Self {
        let mut bools = 0u64;
        // Default adaptive-timing mode is AT1 (relaxed), matching the
        // reference firmware's boot state.
        bools |= bool_bit(ConfigParam::AdaptiveTiming1);
        bools |= bool_bit(ConfigParam::KwCheck);
        bools |= bool_bit(ConfigParam::Spaces);
        bools |= bool_bit(ConfigParam::Echo);
        bools |= bool_bit(ConfigParam::CanFlowControl);

        let mut ints = [0i64; NUM_INT_PARAMS];
        ints[int_index(IntParam::IsoInitAddress)] = 0x33;
        ints[int_index(IntParam::VpwSpeed)] = 1;
        ints[int_index(IntParam::WakeupVal)] = 150; // 150 * 20ms = 3000ms

        ConfigStore {
            bools,
            ints,
            bytes: [ByteArray::default(); NUM_BYTES_PARAMS],
        }
    }
}

impl ConfigStore {
    /// Builds a fresh store with documented defaults installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a boolean property.
    pub fn get_bool(&self, p: ConfigParam) -> bool {
        debug_assert!((p as u64 as usize) < NUM_BOOL_PARAMS);
        self.bools & bool_bit(p) != 0
    }

    /// Writes a boolean property.
    pub fn set_bool(&mut self, p: ConfigParam, value: bool) {
        if value {
            self.bools |= bool_bit(p);
        } else {
            self.bools &= !bool_bit(p);
        }
    }

    /// Reads an integer property.
    pub fn get_int(&self, p: IntParam) -> i64 {
        self.ints[int_index(p)]
    }

    /// Writes an integer property.
    pub fn set_int(&mut self, p: IntParam, value: i64) {
        self.ints[int_index(p)] = value;
    }

    /// Reads a byte-array property.
    pub fn get_bytes(&self, p: BytesParam) -> &ByteArray {
        &self.bytes[bytes_index(p)]
    }

    /// Writes a byte-array property.
    pub fn set_bytes(&mut self, p: BytesParam, value: ByteArray) {
        self.bytes[bytes_index(p)] = value;
    }
}
