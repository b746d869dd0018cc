//! The auto-detect adapter (`ATSP0`): probes each protocol family in turn
//! and settles on the first one that connects.
//!
//! Grounded on `original_source/src/adapter/obd/autoadapter.cpp`'s fixed
//! probe order: PWM, VPW, ISO 9141/14230 (slow then fast init), CAN 11-bit,
//! CAN 29-bit. The reference firmware's `AutoAdapter` holds an owned
//! instance of every other adapter and drives whichever one is being
//! probed; here [`crate::dispatcher::ObdProfile`] is the one holding all the
//! adapters; [`AutoAdapter`] is the stateless prober [`ObdProfile`] asks to
//! drive them, taking each sibling as an explicit `&mut` argument instead of
//! owning them -- this avoids the owning-adapter-needs-simultaneous-access-
//! to-siblings tension a tagged enum of owned adapters could not resolve.

use crate::collector::UNBOUNDED_RESPONSES;
use crate::config::ConfigStore;
use crate::protocols::iso_can::{IsoCan11Adapter, IsoCan29Adapter};
use crate::protocols::iso_serial::IsoSerialAdapter;
use crate::protocols::pwm::PwmAdapter;
use crate::protocols::vpw::VpwAdapter;
use crate::protocols::{ConnectOutcome, ProtocolAdapter, ProtocolId};
use crate::status::ReplyStatus;

/// Bookkeeping for an in-progress or completed auto-detect probe.
///
/// Carries no driver handles of its own -- [`AutoAdapter::probe`] only
/// records which protocol the probe settled on, for
/// [`crate::dispatcher::ObdProfile`] to remember as its selector.
#[derive(Debug, Default)]
pub struct AutoAdapter {
    resolved: Option<ProtocolId>,
}

impl AutoAdapter {
    /// Builds a prober with no protocol resolved yet.
    pub fn new() -> Self {
        AutoAdapter { resolved: None }
    }

    /// The protocol the most recent successful probe settled on, if any.
    pub fn resolved(&self) -> Option<ProtocolId> {
        self.resolved
    }

    /// Clears the resolved protocol, e.g. on `ATSP0`/`ATPC`.
    pub fn reset(&mut self) {
        self.resolved = None;
    }

    /// Probes PWM, then VPW, then ISO 9141/14230, then CAN 11-bit, then CAN
    /// 29-bit, opening and closing each candidate in turn and stopping at
    /// the first one that connects. `send_reply` is forwarded to the
    /// CAN adapters' connect step, which is the only family that embeds the
    /// caller's actual request in its connect attempt.
    #[allow(clippy::too_many_arguments)]
    pub fn probe(
        &mut self,
        cfg: &ConfigStore,
        pwm: &mut PwmAdapter,
        vpw: &mut VpwAdapter,
        iso: &mut IsoSerialAdapter,
        can11: &mut IsoCan11Adapter,
        can29: &mut IsoCan29Adapter,
        send_reply: bool,
    ) -> ConnectOutcome {
        pwm.set_via_auto(true);
        vpw.set_via_auto(true);
        iso.set_via_auto(true);
        can11.set_via_auto(true);
        can29.set_via_auto(true);

        // PWM/VPW have no init handshake of their own -- `on_connect_ecu`
        // always succeeds once the bus is open, so the probe is a real
        // `0100` request/response round trip instead.
        pwm.open(cfg);
        pwm.on_connect_ecu(cfg, false);
        let probe = pwm.on_request(cfg, &[0x01, 0x00], UNBOUNDED_RESPONSES);
        if probe.status == ReplyStatus::None {
            self.resolved = Some(ProtocolId::J1850Pwm);
            return ConnectOutcome {
                protocol: ProtocolId::J1850Pwm,
                status: ReplyStatus::None,
                request_answered: true,
                lines: probe.lines,
            };
        }
        pwm.close();

        vpw.open(cfg);
        vpw.on_connect_ecu(cfg, false);
        let probe = vpw.on_request(cfg, &[0x01, 0x00], UNBOUNDED_RESPONSES);
        if probe.status == ReplyStatus::None {
            self.resolved = Some(ProtocolId::J1850Vpw);
            return ConnectOutcome {
                protocol: ProtocolId::J1850Vpw,
                status: ReplyStatus::None,
                request_answered: true,
                lines: probe.lines,
            };
        }
        vpw.close();

        iso.set_requested(ProtocolId::Auto);
        iso.open(cfg);
        let outcome = iso.on_connect_ecu(cfg, false);
        if outcome.status == ReplyStatus::None {
            self.resolved = Some(iso.protocol());
            return outcome;
        }
        iso.close();

        can11.open(cfg);
        let outcome = can11.on_connect_ecu(cfg, send_reply);
        if outcome.status == ReplyStatus::None {
            self.resolved = Some(ProtocolId::Iso15765Can11);
            return outcome;
        }
        can11.close();

        can29.open(cfg);
        let outcome = can29.on_connect_ecu(cfg, send_reply);
        if outcome.status == ReplyStatus::None {
            self.resolved = Some(ProtocolId::Iso15765Can29);
            return outcome;
        }
        can29.close();

        self.resolved = None;
        ConnectOutcome::failed(ReplyStatus::UnableToConnect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can_frame::CanMsgBuffer;
    use crate::driver::{CanDriver, DriverResult, Led, PwmDriver, Timer, UartEcu};
    use std::collections::VecDeque;

    struct FakePwm {
        bus_level: u8,
        has_sof: bool,
    }
    impl PwmDriver for FakePwm {
        fn open(&mut self, _vpw: bool) -> DriverResult<()> {
            Ok(())
        }
        fn wait_for_ready(&mut self, _idle_us: u32, _max_wait_us: u32) -> DriverResult<bool> {
            Ok(true)
        }
        fn send_sof(&mut self, _width_us: u32) -> DriverResult<()> {
            Ok(())
        }
        fn send_pulse(&mut self, _width_us: u32) -> DriverResult<()> {
            Ok(())
        }
        fn send_eod(&mut self) -> DriverResult<()> {
            Ok(())
        }
        fn wait_for_sof(&mut self, _max_wait_us: u32) -> DriverResult<Option<u32>> {
            Ok(if self.has_sof { Some(200) } else { None })
        }
        fn wait_for_bus_change(&mut self) -> DriverResult<Option<u32>> {
            Ok(None)
        }
        fn set_bit(&mut self, level: u8) -> DriverResult<()> {
            self.bus_level = level;
            Ok(())
        }
        fn get_bit(&self) -> u8 {
            self.bus_level
        }
        fn stop(&mut self) -> DriverResult<()> {
            Ok(())
        }
    }

    struct FakeUart;
    impl UartEcu for FakeUart {
        fn init(&mut self, _speed_bps: u32) -> DriverResult<()> {
            Ok(())
        }
        fn send(&mut self, _byte: u8) -> DriverResult<()> {
            Ok(())
        }
        fn get_echo(&mut self) -> DriverResult<u8> {
            Ok(0)
        }
        fn get(&mut self) -> DriverResult<u8> {
            Ok(0)
        }
        fn ready(&self) -> bool {
            false
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

    struct FakeCan {
        rx: VecDeque<CanMsgBuffer>,
    }
    impl CanDriver for FakeCan {
        fn set_speed(&mut self, _bps: u32) -> DriverResult<()> {
            Ok(())
        }
        fn send(&mut self, _frame: &CanMsgBuffer) -> DriverResult<bool> {
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

    #[test]
    fn probe_falls_through_to_can11_when_nothing_earlier_answers() {
        let cfg = ConfigStore::new();
        let mut pwm = PwmAdapter::new(
            Box::new(FakePwm {
                bus_level: 0,
                has_sof: false,
            }),
            Box::new(FakeTimer),
            Box::new(FakeLed),
        );
        let mut vpw = VpwAdapter::new(
            Box::new(FakePwm {
                bus_level: 0,
                has_sof: false,
            }),
            Box::new(FakeTimer),
            Box::new(FakeLed),
        );
        let mut iso = IsoSerialAdapter::new(
            Box::new(FakeUart),
            Box::new(FakeTimer),
            Box::new(FakeTimer),
            Box::new(FakeTimer),
            Box::new(FakeLed),
        );
        let mut can11 = IsoCan11Adapter::new(
            Box::new(FakeCan {
                rx: {
                    let mut q = VecDeque::new();
                    q.push_back(CanMsgBuffer::new(
                        0x7E8,
                        false,
                        8,
                        &[0x06, 0x41, 0x00, 0xBE, 0x3F, 0xB8, 0x11, 0xAA],
                    ));
                    q
                },
            }),
            Box::new(FakeTimer),
            Box::new(FakeLed),
        );
        let mut can29 = IsoCan29Adapter::new(
            Box::new(FakeCan { rx: VecDeque::new() }),
            Box::new(FakeTimer),
            Box::new(FakeLed),
        );

        let mut auto = AutoAdapter::new();
        let outcome = auto.probe(&cfg, &mut pwm, &mut vpw, &mut iso, &mut can11, &mut can29, false);
        assert_eq!(outcome.protocol, ProtocolId::Iso15765Can11);
        assert_eq!(auto.resolved(), Some(ProtocolId::Iso15765Can11));
    }
}
