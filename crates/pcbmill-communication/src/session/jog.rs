//! Joystick-style jogging
//!
//! `jog` is meant to be called on every poll tick of an input device. Calls
//! that cannot be honoured right now are silent no-ops.

use super::MachineSession;
use crate::bridge::BridgeCommand;
use pcbmill_core::Result;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// One jog speed tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JogTier {
    /// Deflection above which this tier applies
    pub threshold: f64,
    /// Step multiplier applied to the deflection (mm)
    pub multiplier: f64,
    /// Feed rate (mm/min)
    pub feed: f64,
}

/// The three jog tiers, fastest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JogTiers {
    /// Used above `fast.threshold`
    pub fast: JogTier,
    /// Used above `medium.threshold`
    pub medium: JogTier,
    /// Used otherwise
    pub slow: JogTier,
}

impl Default for JogTiers {
    fn default() -> Self {
        Self {
            fast: JogTier {
                threshold: 0.8,
                multiplier: 2.0,
                feed: 500.0,
            },
            medium: JogTier {
                threshold: 0.5,
                multiplier: 1.0,
                feed: 250.0,
            },
            slow: JogTier {
                threshold: 0.0,
                multiplier: 0.5,
                feed: 100.0,
            },
        }
    }
}

impl JogTiers {
    /// Pick the tier for a deflection magnitude
    pub fn select(&self, deflection: f64) -> &JogTier {
        let deflection = deflection.abs();
        if deflection > self.fast.threshold {
            &self.fast
        } else if deflection > self.medium.threshold {
            &self.medium
        } else {
            &self.slow
        }
    }
}

/// Build the `$J=` command for a deflection
///
/// In Z mode the Y deflection drives the Z axis and X is ignored.
pub fn jog_command(x: f64, y: f64, z_mode: bool, tier: &JogTier) -> String {
    if z_mode {
        format!("$J=G91 G21 Z{:.3} F{}", y * tier.multiplier, tier.feed)
    } else {
        format!(
            "$J=G91 G21 X{:.3} Y{:.3} F{}",
            x * tier.multiplier,
            y * tier.multiplier,
            tier.feed
        )
    }
}

impl MachineSession {
    /// Jog by a stick deflection in `[-1, 1]` per axis
    ///
    /// Returns true when a command was sent. A zero deflection while jogging
    /// cancels the jog. A nonzero deflection is only honoured when the
    /// session is ready, the machine is `Idle` or `Jog`, and the previous
    /// jog has been acknowledged.
    pub async fn jog(&self, x: f64, y: f64, z_mode: bool) -> Result<bool> {
        let (x, y) = if z_mode { (0.0, y) } else { (x, y) };

        if x == 0.0 && y == 0.0 {
            let was_jogging = {
                let mut st = self.inner.state.write();
                let was_jogging = st.jogging;
                st.jogging = false;
                st.jog_ack_pending = false;
                was_jogging
            };
            if !was_jogging {
                return Ok(false);
            }
            self.send(BridgeCommand::JogCancel).await?;
            return Ok(true);
        }

        let command = {
            let mut st = self.inner.state.write();
            let eligible = st.ready
                && st
                    .machine
                    .active_state()
                    .is_some_and(|s| s.is_jog_eligible())
                && !st.jog_ack_pending;
            if !eligible {
                trace!(
                    "Jog ignored (ready: {}, state: {:?}, ack pending: {})",
                    st.ready,
                    st.machine.active_state(),
                    st.jog_ack_pending
                );
                return Ok(false);
            }

            let tier = self.inner.config.jog_tiers.select(x.abs().max(y.abs()));
            st.jogging = true;
            st.jog_ack_pending = true;
            jog_command(x, y, z_mode, tier)
        };

        if let Err(e) = self.send(BridgeCommand::Gcode(command)).await {
            let mut st = self.inner.state.write();
            st.jogging = false;
            st.jog_ack_pending = false;
            return Err(e);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_selection() {
        let tiers = JogTiers::default();
        assert_eq!(tiers.select(0.9).feed, 500.0);
        assert_eq!(tiers.select(-0.9).multiplier, 2.0);
        assert_eq!(tiers.select(0.8).feed, 250.0);
        assert_eq!(tiers.select(0.6).feed, 250.0);
        assert_eq!(tiers.select(0.5).feed, 100.0);
        assert_eq!(tiers.select(0.1).multiplier, 0.5);
    }

    #[test]
    fn test_jog_command_format() {
        let tiers = JogTiers::default();
        assert_eq!(
            jog_command(0.9, 0.0, false, tiers.select(0.9)),
            "$J=G91 G21 X1.800 Y0.000 F500"
        );
        assert_eq!(
            jog_command(0.0, -0.6, false, tiers.select(0.6)),
            "$J=G91 G21 X0.000 Y-0.600 F250"
        );
        assert_eq!(
            jog_command(0.0, 0.2, true, tiers.select(0.2)),
            "$J=G91 G21 Z0.100 F100"
        );
    }
}
