//! Internal status codes returned by protocol adapters, and the §6/§7
//! translation from a status to the ASCII line a host sees.

/// The outcome of a protocol adapter operation (`onRequest`,
/// `onConnectEcu`, a receive loop iteration, ...).
///
/// [`ReplyStatus::None`] means "a reply was already emitted, say nothing
/// more"; every other variant maps to exactly one line via
/// [`ReplyStatus::reply_line`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum_macros::Display)]
pub enum ReplyStatus {
    /// An unrecognized command (`?`).
    CmdWrong,
    /// Malformed response data (`DATA ERROR`).
    DataError,
    /// No response arrived within the timeout (`NO DATA`).
    NoData,
    /// Generic failure (`ERROR`).
    Error,
    /// Protocol init failed (`UNABLE TO CONNECT`).
    UnableToConnect,
    /// The bus was busy / no SOF found on transmit (`BUS BUSY`).
    BusBusy,
    /// A bus-timing violation was observed on receive (`BUS ERROR`).
    BusError,
    /// A checksum failed while stripping a header (`DATA ERROR>`).
    ChksError,
    /// A wiring-check loopback failed (`FB ERROR`).
    WiringError,
    /// Success; the reply bytes were already emitted by the adapter itself.
    #[default]
    None,
}

impl ReplyStatus {
    /// The ASCII line a host sees for this status, per §6's table. `None`
    /// has no line of its own -- the reply was already written.
    pub fn reply_line(self) -> Option<&'static str> {
        match self {
            ReplyStatus::CmdWrong => Some("?"),
            ReplyStatus::DataError => Some("DATA ERROR"),
            ReplyStatus::NoData => Some("NO DATA"),
            ReplyStatus::Error => Some("ERROR"),
            ReplyStatus::UnableToConnect => Some("UNABLE TO CONNECT"),
            ReplyStatus::BusBusy => Some("BUS BUSY"),
            ReplyStatus::BusError => Some("BUS ERROR"),
            ReplyStatus::ChksError => Some("DATA ERROR>"),
            ReplyStatus::WiringError => Some("FB ERROR"),
            ReplyStatus::None => None,
        }
    }

    /// The fallback line for a status code that doesn't map to any
    /// documented [`ReplyStatus`] variant. Rust's exhaustive enums make this
    /// unreachable from within this crate, but it documents the reference
    /// firmware's default switch case for integrations that bridge from a
    /// raw numeric status.
    pub const PROGRAM_ERROR_LINE: &'static str = "Program Error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_documented_lines() {
        assert_eq!(ReplyStatus::NoData.reply_line(), Some("NO DATA"));
        assert_eq!(ReplyStatus::ChksError.reply_line(), Some("DATA ERROR>"));
        assert_eq!(ReplyStatus::WiringError.reply_line(), Some("FB ERROR"));
        assert_eq!(ReplyStatus::None.reply_line(), None);
    }
}
