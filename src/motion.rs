//! Motion controller for the stepper rack.
//!
//! `MotionController` owns the axis registry (label to controller id), the
//! confirmed step position per axis, and the transport link. It issues
//! chunked move envelopes, polls running state until every affected axis
//! settles, applies backlash correction after reverse motion, and performs
//! the home/write-back/return dance the firmware needs.
//!
//! Position registers are mutated only after a move's settle wait
//! completes; a failed exchange leaves the registers untouched.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{AxisSettings, ControllerSettings};
use crate::error::{BenchError, Result};
use crate::hardware::ControllerLink;
use crate::protocol::{self, CommandClass};

/// One bench axis as the controller sees it.
#[derive(Debug, Clone)]
pub struct MotorAxis {
    pub label: String,
    pub id: u8,
    pub module: u8,
}

pub struct MotionController {
    link: Arc<dyn ControllerLink>,
    axes: HashMap<String, MotorAxis>,
    /// Confirmed step position per axis label.
    positions: HashMap<String, i64>,
    envelope_limit: usize,
    poll_interval: Duration,
    motion_timeout: Duration,
    backlash_steps: i64,
}

impl MotionController {
    pub fn new(
        link: Arc<dyn ControllerLink>,
        settings: &ControllerSettings,
        axes: &HashMap<String, AxisSettings>,
    ) -> Self {
        let axes = axes
            .iter()
            .map(|(label, axis)| {
                (
                    label.clone(),
                    MotorAxis {
                        label: label.clone(),
                        id: axis.id,
                        module: axis.module,
                    },
                )
            })
            .collect();
        Self {
            link,
            axes,
            positions: HashMap::new(),
            envelope_limit: settings.envelope_limit,
            poll_interval: settings.poll_interval,
            motion_timeout: settings.motion_timeout,
            backlash_steps: settings.backlash_steps,
        }
    }

    fn resolve(&self, label: &str) -> Result<&MotorAxis> {
        self.axes
            .get(label)
            .ok_or_else(|| BenchError::UnknownAxis(label.to_string()))
    }

    /// Last confirmed position for an axis, if any move or home has
    /// completed since startup.
    pub fn position(&self, label: &str) -> Option<i64> {
        self.positions.get(label).copied()
    }

    /// Move the named axes by relative step deltas.
    ///
    /// All labels are resolved before anything touches the wire; zero
    /// deltas are dropped. With `backlash` enabled, axes that moved in the
    /// reverse direction get an overshoot-and-return correction (forward
    /// motion has already taken up the slack).
    pub async fn move_motors(
        &mut self,
        deltas: &BTreeMap<String, i64>,
        backlash: bool,
    ) -> Result<()> {
        let mut moves: Vec<(String, u8, i64)> = Vec::new();
        for (label, delta) in deltas {
            let axis = self.resolve(label)?;
            if *delta != 0 {
                moves.push((label.clone(), axis.id, *delta));
            }
        }
        if moves.is_empty() {
            debug!("move request had no non-zero deltas");
            return Ok(());
        }

        let wire_moves: Vec<(u8, i64)> = moves.iter().map(|(_, id, d)| (*id, *d)).collect();
        self.relative_move(&wire_moves).await?;

        if backlash {
            let reversed: Vec<u8> = moves
                .iter()
                .filter(|(_, _, delta)| *delta < 0)
                .map(|(_, id, _)| *id)
                .collect();
            if !reversed.is_empty() {
                debug!(axes = ?reversed, steps = self.backlash_steps, "backlash correction");
                let overshoot: Vec<(u8, i64)> = reversed
                    .iter()
                    .map(|&id| (id, -self.backlash_steps))
                    .collect();
                let retrace: Vec<(u8, i64)> = reversed
                    .iter()
                    .map(|&id| (id, self.backlash_steps))
                    .collect();
                self.relative_move(&overshoot).await?;
                self.relative_move(&retrace).await?;
            }
        }

        for (label, _, delta) in moves {
            *self.positions.entry(label).or_insert(0) += delta;
        }
        Ok(())
    }

    /// Send one relative move (chunked as needed) and wait for it to settle.
    async fn relative_move(&self, moves: &[(u8, i64)]) -> Result<()> {
        let tokens: Vec<String> = moves
            .iter()
            .map(|(id, delta)| protocol::axis_token(*id, *delta))
            .collect();
        for envelope in protocol::chunk(CommandClass::RelativeMove, &tokens, self.envelope_limit) {
            self.link.exchange(&envelope).await?;
        }
        let ids: Vec<u8> = moves.iter().map(|(id, _)| *id).collect();
        self.wait_for_motors(&ids).await
    }

    /// Poll running state until every listed axis reports settled, bounded
    /// by the configured motion timeout.
    pub async fn wait_for_motors(&self, ids: &[u8]) -> Result<()> {
        let started = Instant::now();
        let tokens: Vec<String> = ids.iter().map(|id| protocol::query_token(*id)).collect();
        loop {
            let mut reported = BTreeMap::new();
            for envelope in protocol::chunk(CommandClass::PollRunning, &tokens, self.envelope_limit)
            {
                let response = self.link.exchange(&envelope).await?;
                reported.extend(protocol::parse_running(&response)?);
            }
            // An axis the controller failed to report is an error, never
            // read as settled.
            let mut any_running = false;
            for id in ids {
                match reported.get(id) {
                    Some(running) => any_running |= running,
                    None => {
                        return Err(BenchError::ControllerProtocol(format!(
                            "axis {id} missing from running-state report"
                        )))
                    }
                }
            }
            if !any_running {
                return Ok(());
            }
            if started.elapsed() >= self.motion_timeout {
                return Err(BenchError::MotionTimeout(self.motion_timeout));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Read absolute positions for the given axis labels.
    pub async fn read_positions(&self, labels: &[String]) -> Result<BTreeMap<String, i64>> {
        let mut by_id: HashMap<u8, String> = HashMap::new();
        let mut tokens = Vec::new();
        for label in labels {
            let axis = self.resolve(label)?;
            by_id.insert(axis.id, label.clone());
            tokens.push(protocol::query_token(axis.id));
        }

        let mut reported = BTreeMap::new();
        for envelope in protocol::chunk(CommandClass::GetPositions, &tokens, self.envelope_limit) {
            let response = self.link.exchange(&envelope).await?;
            for (id, steps) in protocol::parse_positions(&response)? {
                if let Some(label) = by_id.get(&id) {
                    reported.insert(label.clone(), steps);
                }
            }
        }
        for label in labels {
            if !reported.contains_key(label) {
                return Err(BenchError::ControllerProtocol(format!(
                    "axis '{label}' missing from position report"
                )));
            }
        }
        Ok(reported)
    }

    /// Re-read positions and compare against `targets`.
    ///
    /// Mismatches are logged with expected and actual values; the return
    /// value tells the caller whether everything matched. Retry or abort
    /// policy is the caller's decision.
    pub async fn confirm_motor_positions(
        &self,
        targets: &BTreeMap<String, i64>,
    ) -> Result<bool> {
        let labels: Vec<String> = targets.keys().cloned().collect();
        let actual = self.read_positions(&labels).await?;
        let mut all_match = true;
        for (label, expected) in targets {
            let got = actual[label];
            if got != *expected {
                warn!(axis = %label, expected, actual = got, "position confirmation mismatch");
                all_match = false;
            }
        }
        Ok(all_match)
    }

    /// Home one axis against its limit switch.
    ///
    /// The firmware's homing pulse reports the absolute position it ended
    /// at but does not reset its own counter, so the reported value is
    /// written back into the position register and then driven out with a
    /// relative move. The return move skips backlash correction so the
    /// homed reference is not perturbed.
    pub async fn home_motor(&mut self, label: &str) -> Result<()> {
        let axis = self.resolve(label)?;
        let (id, module) = (axis.id, axis.module);

        let response = self.link.exchange(&protocol::home_command(module, id)).await?;
        let body = protocol::strip_terminator(&response)?;
        let reported: i64 = body.trim().parse().map_err(|_| {
            BenchError::ControllerProtocol(format!("bad homing report '{body}' for '{label}'"))
        })?;
        info!(axis = %label, reported, "homing pulse complete");

        let token = protocol::axis_token(id, reported);
        self.link
            .exchange(&protocol::envelope(CommandClass::SetPosition, &[token]))
            .await?;

        if reported != 0 {
            self.relative_move(&[(id, -reported)]).await?;
        }
        self.positions.insert(label.to_string(), 0);
        Ok(())
    }

    /// Open the beam shutter.
    pub async fn open_shutter(&self) -> Result<()> {
        self.misc(&["shutter".into(), "open".into()]).await?;
        Ok(())
    }

    /// Close the beam shutter.
    pub async fn close_shutter(&self) -> Result<()> {
        self.misc(&["shutter".into(), "close".into()]).await?;
        Ok(())
    }

    /// Read the bench light sensor.
    pub async fn read_light_sensor(&self) -> Result<f64> {
        let response = self.misc(&["sensor".into()]).await?;
        protocol::parse_scalar(&response)
    }

    async fn misc(&self, tokens: &[String]) -> Result<String> {
        let envelope = protocol::envelope(CommandClass::Misc, tokens);
        self.link.exchange(&envelope).await
    }
}
