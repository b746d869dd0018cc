//! C5 — the Timeout Manager: adaptive P2 timing across AT0 (off), AT1
//! (relaxed), and AT2 (tight) modes.

use crate::config::{ConfigParam, ConfigStore, IntParam};

/// Relaxed adaptive-timing offset over the observed P2, in milliseconds.
pub const AT1_OFFSET_MS: u32 = 30;
/// Tight adaptive-timing offset over the observed P2, in milliseconds.
pub const AT2_OFFSET_MS: u32 = 10;
/// Number of leading samples discarded to skip outlier slow-init responses.
pub const DISCARD_THRESHOLD: u32 = 2;
/// Fallback P2 timeout when the user has not configured one, in
/// milliseconds.
pub const DEFAULT_TIMEOUT_MS: u32 = 200;

/// Which adaptive-timing mode is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingMode {
    /// Adaptive timing off: always use `at0_timeout`.
    Off,
    /// Relaxed: `observed_p2 + 30ms`.
    Relaxed,
    /// Tight: `observed_p2 + 10ms`.
    Tight,
}

/// Tracks the observed P2 response time and derives the current timeout
/// budget from it.
///
/// `mode` is read from the config store's `AdaptiveTiming0/1/2` properties
/// each time it is needed rather than cached, since the AT parser may toggle
/// them between requests; the store itself remains the single source of
/// truth. Defaults to [`TimingMode::Relaxed`], matching the reference
/// firmware's boot state, not "off".
#[derive(Debug, Clone)]
pub struct TimeoutManager {
    observed_p2: u32,
    calibration_counter: u32,
}

impl Default for TimeoutManager {
    fn default() -> Self {
        TimeoutManager {
            observed_p2: 0,
            calibration_counter: 0,
        }
    }
}

impl TimeoutManager {
    /// Builds a fresh manager with no observed samples yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears observed state. Called whenever a protocol adapter `open`s.
    pub fn reset(&mut self) {
        self.observed_p2 = 0;
        self.calibration_counter = 0;
    }

    fn mode(cfg: &ConfigStore) -> TimingMode {
        if cfg.get_bool(ConfigParam::AdaptiveTiming2) {
            TimingMode::Tight
        } else if cfg.get_bool(ConfigParam::AdaptiveTiming1) {
            TimingMode::Relaxed
        } else {
            TimingMode::Off
        }
    }

    /// `TIMEOUT * 4 * mult`, where `mult` is 5 when `can_like` is true and
    /// `CanTimeoutMultiplier` is set, else 1; falls back to
    /// [`DEFAULT_TIMEOUT_MS`] when `TIMEOUT` is unset (0).
    pub fn at0_timeout(&self, cfg: &ConfigStore, can_like: bool) -> u32 {
        let p2 = cfg.get_int(IntParam::Timeout).max(0) as u32;
        let mult = if can_like && cfg.get_bool(ConfigParam::CanTimeoutMultiplier) {
            5
        } else {
            1
        };
        if p2 == 0 {
            DEFAULT_TIMEOUT_MS
        } else {
            p2 * 4 * mult
        }
    }

    fn at1_timeout(&self) -> u32 {
        self.observed_p2 + AT1_OFFSET_MS
    }

    fn at2_timeout(&self) -> u32 {
        self.observed_p2 + AT2_OFFSET_MS
    }

    /// Returns the timeout (ms) to use for the next receive wait.
    ///
    /// Before any sample has been recorded (`observed_p2 == 0`) this always
    /// returns `at0_timeout`, regardless of mode.
    pub fn p2_timeout(&self, cfg: &ConfigStore, can_like: bool) -> u32 {
        if self.observed_p2 == 0 {
            return self.at0_timeout(cfg, can_like);
        }
        match Self::mode(cfg) {
            TimingMode::Relaxed => self.at1_timeout(),
            TimingMode::Tight => self.at2_timeout(),
            TimingMode::Off => self.at0_timeout(cfg, can_like),
        }
    }

    /// Records an observed P2 response time sample.
    ///
    /// The first [`DISCARD_THRESHOLD`] samples are discarded outright
    /// (outlier slow-init responses); thereafter the running estimate
    /// saturates: `observed_p2 <- min(max(observed_p2, sample), at0_timeout)`.
    pub fn record_sample(&mut self, cfg: &ConfigStore, can_like: bool, sample_ms: u32) {
        if self.calibration_counter < DISCARD_THRESHOLD {
            self.calibration_counter += 1;
            return;
        }
        let ceiling = self.at0_timeout(cfg, can_like);
        self.observed_p2 = self.observed_p2.max(sample_ms).min(ceiling);
    }
}
