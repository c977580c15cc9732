//! Mode arbitration.
//!
//! Pure functions that merge the requested [`Mode`] with the latest
//! [`CableState`] into a [`MuxTarget`], plus the write ordering needed to
//! reach that target without starving charger detection.

use core::fmt;
use core::time::Duration;

use heapless::Vec;

use crate::signals::CableState;

/// Role requested by the owning subsystem.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Host,
    Device,
    /// Follow the cable-detected role.
    #[default]
    Otg,
    Invalid,
}

impl Mode {
    /// Lowercase name reported by the control surface.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Mode::Host => "host",
            Mode::Device => "device",
            Mode::Otg => "otg",
            Mode::Invalid => "invalid",
        }
    }

    pub(crate) const fn to_raw(self) -> u8 {
        match self {
            Mode::Host => 0,
            Mode::Device => 1,
            Mode::Otg => 2,
            Mode::Invalid => 3,
        }
    }

    pub(crate) const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Mode::Host,
            1 => Mode::Device,
            2 => Mode::Otg,
            _ => Mode::Invalid,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Override bit values written to `CFG0`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MuxTarget {
    /// Set for device intent, clear for host intent.
    pub id_pin: bool,
    pub vbus_valid: bool,
}

impl MuxTarget {
    /// Data lines routed to the host controller.
    pub const HOST: Self = Self::new(false, false);
    /// Data lines routed to the device controller with a valid source.
    pub const DEVICE: Self = Self::new(true, true);
    /// Device controller on the lines while charger detection runs.
    pub const CHARGER_DETECT: Self = Self::new(true, false);

    /// Creates a target from raw bit values.
    #[must_use]
    pub const fn new(id_pin: bool, vbus_valid: bool) -> Self {
        Self { id_pin, vbus_valid }
    }

    /// Returns `true` when the target routes the lines to the host controller.
    #[must_use]
    pub const fn is_host(self) -> bool {
        !self.id_pin
    }
}

impl fmt::Display for MuxTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "idpin={} vbus_valid={}",
            u8::from(self.id_pin),
            u8::from(self.vbus_valid)
        )
    }
}

/// Which arbitration rules apply on a board.
///
/// Boards whose boost converter is not tied to the ID signal can use the
/// plain mux policy; everything else needs the charger-aware rules.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ArbitrationPolicy {
    #[default]
    ChargerAware,
    MuxOnly,
}

/// Computes the target for `mode` given the latest cable facts.
#[must_use]
pub const fn target(mode: Mode, cable: CableState) -> MuxTarget {
    target_with_policy(ArbitrationPolicy::ChargerAware, mode, cable)
}

/// Computes the target under an explicit [`ArbitrationPolicy`].
#[must_use]
pub const fn target_with_policy(
    policy: ArbitrationPolicy,
    mode: Mode,
    cable: CableState,
) -> MuxTarget {
    match policy {
        ArbitrationPolicy::ChargerAware => {
            // Charger detection only sees a source while the device
            // controller owns the lines.
            if cable.id_present() && !cable.vbus_valid() {
                return MuxTarget::CHARGER_DETECT;
            }

            match mode {
                Mode::Host => MuxTarget::HOST,
                Mode::Device => MuxTarget::DEVICE,
                Mode::Otg | Mode::Invalid => {
                    MuxTarget::new(cable.id_present(), cable.vbus_valid())
                }
            }
        }
        ArbitrationPolicy::MuxOnly => match mode {
            Mode::Host => MuxTarget::HOST,
            Mode::Device => MuxTarget::DEVICE,
            Mode::Otg | Mode::Invalid => {
                if cable.id_present() {
                    MuxTarget::DEVICE
                } else {
                    MuxTarget::HOST
                }
            }
        },
    }
}

/// Returns `true` when vbus-valid must drop and settle before idpin drops.
#[must_use]
pub const fn needs_two_step_transition(current: Option<MuxTarget>, target: MuxTarget) -> bool {
    match current {
        Some(current) => current.id_pin && current.vbus_valid && !target.id_pin,
        None => false,
    }
}

/// One register write in a transition plan.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransitionStep {
    /// Write the bits and hold for `settle` without waiting on status.
    Prepare { target: MuxTarget, settle: Duration },
    /// Write the bits and wait for the status register to follow.
    Commit(MuxTarget),
}

impl TransitionStep {
    /// Bits written by this step.
    #[must_use]
    pub const fn target(&self) -> MuxTarget {
        match self {
            TransitionStep::Prepare { target, .. } | TransitionStep::Commit(target) => *target,
        }
    }
}

/// Ordered writes that move the mux from `current` to `target`.
pub type TransitionPlan = Vec<TransitionStep, 2>;

/// Plans the writes needed to reach `target`.
#[must_use]
pub fn plan_transition(
    current: Option<MuxTarget>,
    target: MuxTarget,
    settle: Duration,
) -> TransitionPlan {
    let mut plan = TransitionPlan::new();
    if needs_two_step_transition(current, target) {
        let _ = plan.push(TransitionStep::Prepare {
            target: MuxTarget::CHARGER_DETECT,
            settle,
        });
    }
    let _ = plan.push(TransitionStep::Commit(target));
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODES: [Mode; 4] = [Mode::Host, Mode::Device, Mode::Otg, Mode::Invalid];

    fn cable_states() -> [CableState; 4] {
        [
            CableState::new(false, false),
            CableState::new(false, true),
            CableState::new(true, false),
            CableState::new(true, true),
        ]
    }

    #[test]
    fn charger_detect_override_wins_for_every_mode() {
        let cable = CableState::new(true, false);
        for mode in MODES {
            assert_eq!(target(mode, cable), MuxTarget::CHARGER_DETECT, "mode {mode}");
        }
    }

    #[test]
    fn host_mode_never_targets_vbus_valid() {
        for cable in cable_states() {
            assert!(!target(Mode::Host, cable).vbus_valid, "cable {cable}");
        }
    }

    #[test]
    fn fixed_roles_ignore_cable_state_outside_override() {
        assert_eq!(target(Mode::Host, CableState::new(true, true)), MuxTarget::HOST);
        assert_eq!(target(Mode::Host, CableState::new(false, true)), MuxTarget::HOST);
        assert_eq!(target(Mode::Device, CableState::new(false, false)), MuxTarget::DEVICE);
    }

    #[test]
    fn otg_and_invalid_follow_cable_state() {
        for mode in [Mode::Otg, Mode::Invalid] {
            assert_eq!(target(mode, CableState::new(false, false)), MuxTarget::HOST);
            assert_eq!(
                target(mode, CableState::new(false, true)),
                MuxTarget::new(false, true)
            );
            assert_eq!(target(mode, CableState::new(true, true)), MuxTarget::DEVICE);
        }
    }

    #[test]
    fn target_is_deterministic() {
        for mode in MODES {
            for cable in cable_states() {
                assert_eq!(target(mode, cable), target(mode, cable));
            }
        }
    }

    #[test]
    fn mux_only_policy_skips_charger_override() {
        let cable = CableState::new(true, false);
        assert_eq!(
            target_with_policy(ArbitrationPolicy::MuxOnly, Mode::Host, cable),
            MuxTarget::HOST
        );
        assert_eq!(
            target_with_policy(ArbitrationPolicy::MuxOnly, Mode::Otg, cable),
            MuxTarget::DEVICE
        );
    }

    #[test]
    fn two_step_only_when_leaving_charging_device_for_host() {
        assert!(needs_two_step_transition(Some(MuxTarget::DEVICE), MuxTarget::HOST));
        assert!(needs_two_step_transition(
            Some(MuxTarget::DEVICE),
            MuxTarget::new(false, true)
        ));
        assert!(!needs_two_step_transition(Some(MuxTarget::CHARGER_DETECT), MuxTarget::HOST));
        assert!(!needs_two_step_transition(Some(MuxTarget::DEVICE), MuxTarget::CHARGER_DETECT));
        assert!(!needs_two_step_transition(None, MuxTarget::HOST));
    }

    #[test]
    fn plan_inserts_settle_step() {
        let settle = Duration::from_millis(200);
        let plan = plan_transition(Some(MuxTarget::DEVICE), MuxTarget::HOST, settle);

        assert_eq!(
            plan.as_slice(),
            &[
                TransitionStep::Prepare {
                    target: MuxTarget::CHARGER_DETECT,
                    settle,
                },
                TransitionStep::Commit(MuxTarget::HOST),
            ]
        );

        let single = plan_transition(Some(MuxTarget::HOST), MuxTarget::DEVICE, settle);
        assert_eq!(single.as_slice(), &[TransitionStep::Commit(MuxTarget::DEVICE)]);
    }

    #[test]
    fn mode_raw_encoding_is_stable() {
        for mode in MODES {
            assert_eq!(Mode::from_raw(mode.to_raw()), mode);
        }
        assert_eq!(Mode::default(), Mode::Otg);
    }
}
