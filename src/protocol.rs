//! Motor controller wire protocol.
//!
//! The controller rack speaks a fixed-syntax ASCII protocol. Every command
//! is an *envelope*: a single-character class prefix, a space-joined token
//! body, and the matching suffix character closing it. Envelopes are
//! newline-terminated on the wire and every response ends with the `#CF`
//! marker.
//!
//! | Envelope | Meaning |
//! |----------|---------|
//! | `o…o`    | relative move, tokens `<axis_id><signed_steps>` |
//! | `g…g`    | get absolute positions for the listed axis ids |
//! | `c…c`    | poll running state for the listed axis ids |
//! | `s…s`    | set absolute position register, tokens `<axis_id><steps>` |
//! | `m…m`    | misc commands (shutter, light sensor) |
//! | `h<module><axis>` | home one axis |
//!
//! The controller receive buffer caps total envelope length (56 characters
//! by default, delimiters included), so oversized token lists are split by
//! [`chunk`] into several envelopes that are sent and acknowledged
//! independently.
//!
//! Everything in this module is pure string handling; serial I/O lives in
//! `hardware::link`.

use std::collections::BTreeMap;

use crate::error::{BenchError, Result};

/// Default receive-buffer cap on envelope length, delimiters included.
pub const DEFAULT_ENVELOPE_LIMIT: usize = 56;

/// Marker closing every controller response.
pub const RESPONSE_TERMINATOR: &str = "#CF";

/// Command classes with delimiter-framed bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    RelativeMove,
    GetPositions,
    PollRunning,
    SetPosition,
    Misc,
}

impl CommandClass {
    /// The prefix character, which doubles as the suffix.
    pub fn delimiter(self) -> char {
        match self {
            CommandClass::RelativeMove => 'o',
            CommandClass::GetPositions => 'g',
            CommandClass::PollRunning => 'c',
            CommandClass::SetPosition => 's',
            CommandClass::Misc => 'm',
        }
    }
}

/// Frame a token list as a single envelope, ignoring the length cap.
pub fn envelope(class: CommandClass, tokens: &[String]) -> String {
    let d = class.delimiter();
    format!("{d}{}{d}", tokens.join(" "))
}

/// Greedily pack `tokens` into envelopes no longer than `limit` characters
/// including the two delimiters. A token that would push the body past
/// `limit - 2` closes the current envelope and starts the next one.
/// Concatenating the bodies of the returned envelopes (in order)
/// reproduces the input token list.
pub fn chunk(class: CommandClass, tokens: &[String], limit: usize) -> Vec<String> {
    let body_cap = limit.saturating_sub(2);
    let mut envelopes = Vec::new();
    let mut body = String::new();

    for token in tokens {
        let extra = if body.is_empty() {
            token.len()
        } else {
            token.len() + 1
        };
        if !body.is_empty() && body.len() + extra > body_cap {
            envelopes.push(frame(class, &body));
            body.clear();
            body.push_str(token);
        } else {
            if !body.is_empty() {
                body.push(' ');
            }
            body.push_str(token);
        }
    }
    if !body.is_empty() || tokens.is_empty() {
        envelopes.push(frame(class, &body));
    }
    envelopes
}

fn frame(class: CommandClass, body: &str) -> String {
    let d = class.delimiter();
    format!("{d}{body}{d}")
}

/// Token for a relative move or position set: `<axis_id><signed_steps>`.
pub fn axis_token(axis_id: u8, steps: i64) -> String {
    format!("{axis_id}{steps}")
}

/// Token naming an axis in a query envelope (`g…g`, `c…c`).
pub fn query_token(axis_id: u8) -> String {
    format!("{axis_id}")
}

/// The home command has no closing suffix: `h<module><axis>`.
pub fn home_command(module: u8, axis_id: u8) -> String {
    format!("h{module}{axis_id}")
}

/// Strip the `#CF` terminator, failing on responses that lack it.
pub fn strip_terminator(response: &str) -> Result<&str> {
    match response.find(RESPONSE_TERMINATOR) {
        Some(pos) => Ok(response[..pos].trim()),
        None => Err(BenchError::ControllerProtocol(format!(
            "response missing {RESPONSE_TERMINATOR} terminator: '{response}'"
        ))),
    }
}

/// Parse a position report: whitespace-separated `<axis_id><steps>` tokens.
pub fn parse_positions(response: &str) -> Result<BTreeMap<u8, i64>> {
    let body = strip_terminator(response)?;
    if body.is_empty() {
        return Err(BenchError::ControllerProtocol(
            "empty position report".into(),
        ));
    }
    let mut positions = BTreeMap::new();
    for token in body.split_whitespace() {
        let (id, value) = split_axis_token(token)?;
        let steps = value.parse::<i64>().map_err(|_| {
            BenchError::ControllerProtocol(format!("bad step count in token '{token}'"))
        })?;
        positions.insert(id, steps);
    }
    Ok(positions)
}

/// Parse a running-state report: `<axis_id><0|1>` tokens. A malformed or
/// empty report is an error, never interpreted as "not running".
pub fn parse_running(response: &str) -> Result<BTreeMap<u8, bool>> {
    let body = strip_terminator(response)?;
    if body.is_empty() {
        return Err(BenchError::ControllerProtocol(
            "empty running-state report".into(),
        ));
    }
    let mut running = BTreeMap::new();
    for token in body.split_whitespace() {
        let (id, value) = split_axis_token(token)?;
        let state = match value {
            "0" => false,
            "1" => true,
            other => {
                return Err(BenchError::ControllerProtocol(format!(
                    "bad running flag '{other}' for axis {id}"
                )))
            }
        };
        running.insert(id, state);
    }
    Ok(running)
}

/// Parse a scalar misc-command reply (light sensor counts, etc.).
pub fn parse_scalar(response: &str) -> Result<f64> {
    let body = strip_terminator(response)?;
    body.trim().parse::<f64>().map_err(|_| {
        BenchError::ControllerProtocol(format!("expected scalar reply, got '{body}'"))
    })
}

fn split_axis_token(token: &str) -> Result<(u8, &str)> {
    let mut chars = token.chars();
    let id_char = chars.next().ok_or_else(|| {
        BenchError::ControllerProtocol("empty axis token".into())
    })?;
    let id = id_char.to_digit(10).ok_or_else(|| {
        BenchError::ControllerProtocol(format!("bad axis id in token '{token}'"))
    })? as u8;
    let rest = chars.as_str();
    if rest.is_empty() {
        return Err(BenchError::ControllerProtocol(format!(
            "axis token '{token}' has no value"
        )));
    }
    Ok((id, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_uses_matching_delimiters() {
        let tokens = vec![axis_token(1, -50), axis_token(2, 30)];
        assert_eq!(envelope(CommandClass::RelativeMove, &tokens), "o1-50 230o");
    }

    #[test]
    fn short_command_is_one_envelope() {
        let tokens = vec![axis_token(1, 50)];
        let envelopes = chunk(CommandClass::RelativeMove, &tokens, DEFAULT_ENVELOPE_LIMIT);
        assert_eq!(envelopes, vec!["o150o".to_string()]);
    }

    #[test]
    fn oversized_command_splits_and_respects_limit() {
        let tokens: Vec<String> = (0..10).map(|i| axis_token(i % 10, 123_456)).collect();
        let envelopes = chunk(CommandClass::RelativeMove, &tokens, DEFAULT_ENVELOPE_LIMIT);
        assert!(envelopes.len() >= 2);
        for env in &envelopes {
            assert!(env.len() <= DEFAULT_ENVELOPE_LIMIT, "'{env}' too long");
            assert!(env.starts_with('o') && env.ends_with('o'));
        }
    }

    #[test]
    fn chunked_bodies_concatenate_to_original() {
        let tokens: Vec<String> = (0..17).map(|i| axis_token(i % 10, 1000 + i as i64)).collect();
        let envelopes = chunk(CommandClass::RelativeMove, &tokens, DEFAULT_ENVELOPE_LIMIT);
        let mut recovered = Vec::new();
        for env in &envelopes {
            let body = &env[1..env.len() - 1];
            recovered.extend(body.split_whitespace().map(str::to_string));
        }
        assert_eq!(recovered, tokens);
    }

    #[test]
    fn single_token_longer_than_limit_still_emitted() {
        let tokens = vec!["1123456789012345678901234567890".to_string()];
        let envelopes = chunk(CommandClass::RelativeMove, &tokens, 16);
        assert_eq!(envelopes.len(), 1);
    }

    #[test]
    fn parse_positions_report() {
        let positions = parse_positions("1-200 34500 #CF").unwrap();
        assert_eq!(positions[&1], -200);
        assert_eq!(positions[&3], 4500);
    }

    #[test]
    fn parse_running_report() {
        let running = parse_running("11 20 #CF").unwrap();
        assert!(running[&1]);
        assert!(!running[&2]);
    }

    #[test]
    fn empty_running_report_is_an_error() {
        assert!(parse_running("#CF").is_err());
        assert!(parse_running("").is_err());
    }

    #[test]
    fn garbled_running_flag_is_an_error() {
        assert!(parse_running("1x #CF").is_err());
    }

    #[test]
    fn missing_terminator_is_an_error() {
        assert!(parse_positions("1100").is_err());
    }

    #[test]
    fn home_command_has_no_suffix() {
        assert_eq!(home_command(0, 3), "h03");
    }

    #[test]
    fn scalar_reply_parses() {
        assert!((parse_scalar("1532 #CF").unwrap() - 1532.0).abs() < f64::EPSILON);
        assert!(parse_scalar("#CF").is_err());
    }
}
