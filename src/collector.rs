//! C10 — Data Collector: accumulates host input characters into the
//! request byte buffer, extracting an optional trailing "number of
//! responses" hex nibble.

/// Maximum command-string length retained for command matching.
pub const COMMAND_STRING_LEN: usize = 16;

/// Above this many payload bytes, a trailing odd nibble is never treated as
/// a response-count override (`OBD_IN_MSG_DLEN` in the reference firmware).
pub const HUGE_BUFFER_THRESHOLD: usize = 8;

/// Sentinel meaning "wait for as many responses as arrive within the
/// timeout" rather than a specific count.
pub const UNBOUNDED_RESPONSES: u32 = u32::MAX;

/// Accumulates host input into a request byte buffer and a command-string
/// buffer in parallel.
///
/// `binary` latches to `false` permanently the moment a non-hex,
/// non-ignored character is seen, and never recovers until [`reset`] is
/// called -- matching the reference firmware's `putChar` exactly.
#[derive(Debug, Clone)]
pub struct Collector {
    command: String,
    bytes: Vec<u8>,
    pending_nibble: Option<u8>,
    binary: bool,
}

impl Default for Collector {
    fn default() -> Self {
        Collector {
            command: String::new(),
            bytes: Vec::new(),
            pending_nibble: None,
            binary: true,
        }
    }
}

impl Collector {
    /// Builds an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one host input character. Spaces and NUL are ignored entirely.
    pub fn put_char(&mut self, ch: char) {
        if ch == ' ' || ch == '\0' {
            return;
        }
        let upper = ch.to_ascii_uppercase();
        let is_hex = upper.is_ascii_hexdigit();
        self.binary = self.binary && is_hex;

        if self.command.len() < COMMAND_STRING_LEN {
            self.command.push(upper);
        }

        if let Some(digit) = upper.to_digit(16) {
            match self.pending_nibble.take() {
                Some(hi) if self.binary => {
                    self.bytes.push((hi << 4) | digit as u8);
                }
                _ => {
                    self.pending_nibble = Some(digit as u8);
                }
            }
        } else {
            self.pending_nibble = None;
        }
    }

    /// Feeds a full string, one character at a time.
    pub fn put_str(&mut self, text: &str) {
        for ch in text.chars() {
            self.put_char(ch);
        }
    }

    /// Clears all accumulated state and re-arms `binary`.
    pub fn reset(&mut self) {
        self.command.clear();
        self.bytes.clear();
        self.pending_nibble = None;
        self.binary = true;
    }

    /// The up-to-16-character uppercased command string collected so far.
    pub fn command_string(&self) -> &str {
        &self.command
    }

    /// The paired-hex-digit byte buffer collected so far.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether every character fed so far has been a hex digit or ignored
    /// whitespace.
    pub fn is_binary(&self) -> bool {
        self.binary
    }

    /// Whether the byte buffer is too large for a trailing nibble to be
    /// read as a response count.
    pub fn is_huge_buffer(&self) -> bool {
        self.bytes.len() > HUGE_BUFFER_THRESHOLD
    }

    /// The expected number of ECU responses.
    ///
    /// If an odd, unpaired trailing hex nibble was fed and the byte buffer
    /// is not "huge", that nibble's value is the count (0 meaning
    /// unbounded); otherwise the count is unbounded.
    pub fn num_of_responses(&self) -> u32 {
        match self.pending_nibble {
            Some(n) if !self.is_huge_buffer() => {
                if n == 0 {
                    UNBOUNDED_RESPONSES
                } else {
                    n as u32
                }
            }
            _ => UNBOUNDED_RESPONSES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_6_trailing_odd_nibble_sets_response_count() {
        let mut c = Collector::new();
        c.put_str("01001");
        assert_eq!(c.bytes(), &[0x01, 0x00]);
        assert_eq!(c.num_of_responses(), 1);
    }

    #[test]
    fn scenario_6_even_digits_are_unbounded() {
        let mut c = Collector::new();
        c.put_str("0100");
        assert_eq!(c.bytes(), &[0x01, 0x00]);
        assert_eq!(c.num_of_responses(), UNBOUNDED_RESPONSES);
    }

    #[test]
    fn zero_trailing_nibble_is_unbounded_not_zero_responses() {
        let mut c = Collector::new();
        c.put_str("010");
        assert_eq!(c.num_of_responses(), UNBOUNDED_RESPONSES);
    }

    #[test]
    fn spaces_are_ignored() {
        let mut c = Collector::new();
        c.put_str("01 00");
        assert_eq!(c.bytes(), &[0x01, 0x00]);
    }

    #[test]
    fn binary_flag_latches_false_on_non_hex_char() {
        let mut c = Collector::new();
        c.put_str("AT");
        assert!(!c.is_binary());
        c.put_char('1');
        assert!(!c.is_binary());
    }

    #[test]
    fn reset_restores_binary_and_clears_buffers() {
        let mut c = Collector::new();
        c.put_str("ATZ");
        c.reset();
        assert!(c.is_binary());
        assert!(c.bytes().is_empty());
        assert_eq!(c.command_string(), "");
    }

    #[test]
    fn command_string_caps_at_16_chars() {
        let mut c = Collector::new();
        c.put_str("0123456789ABCDEFGH");
        assert_eq!(c.command_string().len(), COMMAND_STRING_LEN);
    }
}
