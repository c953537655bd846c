//! Mock hardware for tests and dry runs.
//!
//! `MockLink` behaves like the controller firmware: it keeps per-axis
//! position registers, answers position and running-state queries, and
//! records every envelope it was sent so tests can assert on exact wire
//! traffic. `MockCamera`, `MockBench` and `MemorySink` stand in for the
//! acquisition engine's collaborators.

#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use super::capabilities::{BenchActions, Frame, FrameSink, FrameSource, StepMetadata};
use super::link::ControllerLink;
use crate::error::{BenchError, Result};
use crate::protocol::RESPONSE_TERMINATOR;
use crate::scan::Vec3;

// ---------------------------------------------------------------------------
// MockLink
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LinkState {
    positions: HashMap<u8, i64>,
    sent: Vec<String>,
    /// Each running-state poll while > 0 reports "still moving".
    busy_polls: u32,
    /// When set, the next running-state poll answers with this raw string.
    scripted_poll: Option<String>,
}

/// Simulated controller firmware.
#[derive(Default)]
pub struct MockLink {
    state: Mutex<LinkState>,
    /// Scalar answered to misc (`m…m`) commands.
    pub sensor_value: f64,
}

impl MockLink {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LinkState::default()),
            sensor_value: 1532.0,
        }
    }

    /// Every envelope sent so far, in order.
    pub fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    pub fn position(&self, id: u8) -> i64 {
        *self.lock().positions.get(&id).unwrap_or(&0)
    }

    pub fn set_position(&self, id: u8, steps: i64) {
        self.lock().positions.insert(id, steps);
    }

    /// Report "running" for the next `polls` running-state queries.
    pub fn set_busy_polls(&self, polls: u32) {
        self.lock().busy_polls = polls;
    }

    /// Answer the next running-state poll with a raw scripted string.
    pub fn script_poll_response(&self, response: &str) {
        self.lock().scripted_poll = Some(response.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LinkState> {
        self.state.lock().unwrap()
    }

    fn ids_in(body: &str) -> Vec<u8> {
        body.split_whitespace()
            .filter_map(|t| t.chars().next())
            .filter_map(|c| c.to_digit(10))
            .map(|d| d as u8)
            .collect()
    }

    fn apply_deltas(state: &mut LinkState, body: &str) {
        for token in body.split_whitespace() {
            let mut chars = token.chars();
            if let (Some(id), Ok(delta)) = (
                chars.next().and_then(|c| c.to_digit(10)),
                chars.as_str().parse::<i64>(),
            ) {
                *state.positions.entry(id as u8).or_insert(0) += delta;
            }
        }
    }

    fn set_positions(state: &mut LinkState, body: &str) {
        for token in body.split_whitespace() {
            let mut chars = token.chars();
            if let (Some(id), Ok(value)) = (
                chars.next().and_then(|c| c.to_digit(10)),
                chars.as_str().parse::<i64>(),
            ) {
                state.positions.insert(id as u8, value);
            }
        }
    }
}

#[async_trait]
impl ControllerLink for MockLink {
    async fn exchange(&self, envelope: &str) -> Result<String> {
        let mut state = self.lock();
        state.sent.push(envelope.to_string());

        let reply = if let Some(body) = framed_body(envelope, 'o') {
            Self::apply_deltas(&mut state, body);
            RESPONSE_TERMINATOR.to_string()
        } else if let Some(body) = framed_body(envelope, 's') {
            Self::set_positions(&mut state, body);
            RESPONSE_TERMINATOR.to_string()
        } else if let Some(body) = framed_body(envelope, 'g') {
            let tokens: Vec<String> = Self::ids_in(body)
                .into_iter()
                .map(|id| format!("{id}{}", state.positions.get(&id).unwrap_or(&0)))
                .collect();
            format!("{} {RESPONSE_TERMINATOR}", tokens.join(" "))
        } else if let Some(body) = framed_body(envelope, 'c') {
            if let Some(scripted) = state.scripted_poll.take() {
                scripted
            } else {
                let flag = if state.busy_polls > 0 {
                    state.busy_polls -= 1;
                    '1'
                } else {
                    '0'
                };
                let tokens: Vec<String> = Self::ids_in(body)
                    .into_iter()
                    .map(|id| format!("{id}{flag}"))
                    .collect();
                format!("{} {RESPONSE_TERMINATOR}", tokens.join(" "))
            }
        } else if framed_body(envelope, 'm').is_some() {
            format!("{} {RESPONSE_TERMINATOR}", self.sensor_value)
        } else if let Some(rest) = envelope.strip_prefix('h') {
            // h<module><axis>: report the (unreset) position register.
            let id = rest
                .chars()
                .nth(1)
                .and_then(|c| c.to_digit(10))
                .ok_or_else(|| {
                    BenchError::ControllerProtocol(format!("bad home command '{envelope}'"))
                })? as u8;
            format!(
                "{} {RESPONSE_TERMINATOR}",
                state.positions.get(&id).unwrap_or(&0)
            )
        } else {
            return Err(BenchError::ControllerProtocol(format!(
                "mock firmware cannot parse '{envelope}'"
            )));
        };

        Ok(reply)
    }
}

fn framed_body(envelope: &str, delimiter: char) -> Option<&str> {
    let body = envelope
        .strip_prefix(delimiter)?
        .strip_suffix(delimiter)?;
    Some(body)
}

// ---------------------------------------------------------------------------
// MockCamera
// ---------------------------------------------------------------------------

/// Scripted outcome for one frame grab.
#[derive(Debug, Clone)]
pub enum GrabOutcome {
    /// A frame with every pixel set to the value.
    Frame(f64),
    /// Grab times out (`Ok(None)` from the driver).
    Timeout,
    /// Hard driver failure.
    Fail(String),
}

#[derive(Default)]
struct CameraState {
    open: bool,
    opens: u32,
    closes: u32,
    grabs: u32,
    script: VecDeque<GrabOutcome>,
}

/// In-memory capture device with programmable failures.
pub struct MockCamera {
    state: Mutex<CameraState>,
    width: u32,
    height: u32,
    /// Artificial per-grab latency.
    pub grab_delay: Duration,
}

impl MockCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Mutex::new(CameraState::default()),
            width,
            height,
            grab_delay: Duration::ZERO,
        }
    }

    /// Queue outcomes for upcoming grabs; once drained, grabs synthesize
    /// random frames.
    pub fn script(&self, outcomes: impl IntoIterator<Item = GrabOutcome>) {
        self.lock().script.extend(outcomes);
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn open_count(&self) -> u32 {
        self.lock().opens
    }

    pub fn close_count(&self) -> u32 {
        self.lock().closes
    }

    pub fn grab_count(&self) -> u32 {
        self.lock().grabs
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CameraState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl FrameSource for MockCamera {
    async fn open_stream(&self) -> Result<()> {
        let mut state = self.lock();
        if state.open {
            return Err(BenchError::Capture("stream already open".into()));
        }
        state.open = true;
        state.opens += 1;
        Ok(())
    }

    async fn close_stream(&self) -> Result<()> {
        let mut state = self.lock();
        state.open = false;
        state.closes += 1;
        Ok(())
    }

    async fn grab_frame(&self, _timeout: Duration) -> Result<Option<Frame>> {
        if !self.grab_delay.is_zero() {
            tokio::time::sleep(self.grab_delay).await;
        }
        let mut state = self.lock();
        if !state.open {
            return Err(BenchError::Capture("stream not open".into()));
        }
        state.grabs += 1;
        match state.script.pop_front() {
            Some(GrabOutcome::Frame(value)) => {
                Ok(Some(Frame::filled(self.width, self.height, value)))
            }
            Some(GrabOutcome::Timeout) => Ok(None),
            Some(GrabOutcome::Fail(reason)) => Err(BenchError::Capture(reason)),
            None => {
                let value = rand::thread_rng().gen_range(0.0..4096.0);
                Ok(Some(Frame::filled(self.width, self.height, value)))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MockBench / MemorySink
// ---------------------------------------------------------------------------

/// A dispatched hardware action, recorded in order.
#[derive(Debug, Clone, PartialEq)]
pub enum BenchCommand {
    MoveTo(Vec3),
    SetPolarization(f64),
    SetWavelength(f64),
}

#[derive(Default)]
pub struct MockBench {
    commands: Mutex<Vec<BenchCommand>>,
}

impl MockBench {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<BenchCommand> {
        self.commands.lock().unwrap().clone()
    }

    fn record(&self, command: BenchCommand) {
        self.commands.lock().unwrap().push(command);
    }
}

#[async_trait]
impl BenchActions for MockBench {
    async fn move_to(&self, position: Vec3) -> Result<()> {
        self.record(BenchCommand::MoveTo(position));
        Ok(())
    }

    async fn set_polarization(&self, angle: f64) -> Result<()> {
        self.record(BenchCommand::SetPolarization(angle));
        Ok(())
    }

    async fn set_wavelength(&self, value: f64) -> Result<()> {
        self.record(BenchCommand::SetWavelength(value));
        Ok(())
    }
}

#[derive(Default)]
struct SinkState {
    transient: Option<Frame>,
    indexed: Vec<(usize, Frame)>,
}

/// Captures persisted frames in memory.
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<SinkState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transient(&self) -> Option<Frame> {
        self.lock().transient.clone()
    }

    pub fn indexed(&self) -> Vec<(usize, Frame)> {
        self.lock().indexed.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn persist_transient(&self, frame: &Frame) -> Result<()> {
        self.lock().transient = Some(frame.clone());
        Ok(())
    }

    async fn persist_indexed(&self, frame: &Frame, metadata: &StepMetadata) -> Result<()> {
        self.lock().indexed.push((metadata.step_index, frame.clone()));
        Ok(())
    }
}
