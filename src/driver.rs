//! External driver contracts.
//!
//! The MCU-specific bit-banging, CAN controller access, timers, GPIO, and
//! LEDs are deliberately out of scope for this crate -- a host integration
//! supplies concrete implementations of these traits. They play the same
//! architectural role the teacher crate's [`BaseChannel`]/[`IsoTPChannel`]
//! traits play for hardware VCI access: a seam the protocol adapters program
//! against, never a concrete backend.
//!
//! [`BaseChannel`]: https://docs.rs/ecu_diagnostics
//! [`IsoTPChannel`]: https://docs.rs/ecu_diagnostics

use crate::can_frame::CanMsgBuffer;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, String>;

/// The host UART link to the ISO 9141 / ISO 14230 K-line, including the
/// bit-banged slow-init path.
pub trait UartEcu {
    /// Initializes the UART at the given bps (10400 for normal K-line
    /// operation).
    fn init(&mut self, speed_bps: u32) -> DriverResult<()>;
    /// Sends one byte.
    fn send(&mut self, byte: u8) -> DriverResult<()>;
    /// Reads back the echo of the last sent byte (K-line is half-duplex).
    fn get_echo(&mut self) -> DriverResult<u8>;
    /// Reads one received byte. Only valid when [`UartEcu::ready`] is true.
    fn get(&mut self) -> DriverResult<u8>;
    /// Whether a received byte is available.
    fn ready(&self) -> bool;
    /// Switches the line between UART framing and raw bit-bang GPIO mode,
    /// used for 5-baud slow init.
    fn set_bit_bang(&mut self, enabled: bool) -> DriverResult<()>;
    /// Drives the K-line to the given level in bit-bang mode.
    fn set_bit(&mut self, level: u8) -> DriverResult<()>;
    /// Reads the current K-line level in bit-bang mode.
    fn get_bit(&self) -> u8;
    /// Clears any pending error/overrun flags.
    fn clear(&mut self) -> DriverResult<()>;
}

/// A single CAN controller slot, queueing up to 10 frames (index 0 reserved
/// for TX, 1..10 for RX) per the reference firmware's FIFO depth.
pub trait CanDriver {
    /// Sets the bus bit rate.
    fn set_speed(&mut self, bps: u32) -> DriverResult<()>;
    /// Transmits a frame; returns `Ok(true)` if the controller accepted it.
    fn send(&mut self, frame: &CanMsgBuffer) -> DriverResult<bool>;
    /// Whether a received frame is available.
    fn is_ready(&self) -> bool;
    /// Reads the next received frame, if any.
    fn read(&mut self) -> DriverResult<Option<CanMsgBuffer>>;
    /// Installs a filter/mask pair in the given slot (`None` picks the
    /// controller's default/only slot).
    fn set_filter_and_mask(
        &mut self,
        filter: u32,
        mask: u32,
        extended: bool,
        slot: Option<u8>,
    ) -> DriverResult<()>;
    /// Removes all installed filters.
    fn clear_filters(&mut self) -> DriverResult<()>;
    /// Drops any buffered but unread frames.
    fn clear_data(&mut self) -> DriverResult<()>;
    /// Puts the controller into (or out of) listen-only mode.
    fn set_silent(&mut self, silent: bool) -> DriverResult<()>;
}

/// The bit-banged physical layer used by SAE J1850 VPW and PWM.
pub trait PwmDriver {
    /// Opens the bus; `vpw` selects VPW framing vs. PWM framing.
    fn open(&mut self, vpw: bool) -> DriverResult<()>;
    /// Waits for the bus to go idle for at least `idle_us`, giving up after
    /// `max_wait_us`. Returns `false` on timeout (bus busy).
    fn wait_for_ready(&mut self, idle_us: u32, max_wait_us: u32) -> DriverResult<bool>;
    /// Drives the VPW/PWM start-of-frame pulse.
    fn send_sof(&mut self, width_us: u32) -> DriverResult<()>;
    /// Drives one VPW/PWM symbol pulse of the given width.
    fn send_pulse(&mut self, width_us: u32) -> DriverResult<()>;
    /// Drives end-of-data (returns the bus to idle).
    fn send_eod(&mut self) -> DriverResult<()>;
    /// Waits for a start-of-frame pulse, returning its width in
    /// microseconds, or `None` if the receive timeout elapsed first.
    fn wait_for_sof(&mut self, max_wait_us: u32) -> DriverResult<Option<u32>>;
    /// Waits for the next bus transition, returning the width of the pulse
    /// that just ended, or `None` on end-of-data/timeout.
    fn wait_for_bus_change(&mut self) -> DriverResult<Option<u32>>;
    /// Drives a single GPIO bit, used by the wiring-check test.
    fn set_bit(&mut self, level: u8) -> DriverResult<()>;
    /// Reads the current bus level, used by the wiring-check test and by
    /// VPW's passive-bit arbitration readback.
    fn get_bit(&self) -> u8;
    /// Stops driving the bus, returning it to idle.
    fn stop(&mut self) -> DriverResult<()>;
}

/// A millisecond- or microsecond-granularity countdown timer.
pub trait Timer {
    /// Arms the timer for `duration` (unit is caller-defined: ms for P1-P4/
    /// W1-W4/keep-alive timers, µs for J1850 bit timing).
    fn start(&mut self, duration: u32);
    /// Whether the armed duration has elapsed.
    fn is_expired(&self) -> bool;
    /// Elapsed time since `start` was called.
    fn value(&self) -> u32;
}

/// Status LEDs.
pub trait Led {
    /// Blinks the transmit LED.
    fn blink_tx(&mut self);
    /// Blinks the receive LED.
    fn blink_rx(&mut self);
    /// Starts the LED's own idle-blink timer (called once per protocol
    /// `open`).
    fn start_timer(&mut self);
}
