//! Grbl data-line parser
//!
//! Classifies one line of the raw serial stream. Controller-state reports
//! arrive pre-parsed from the bridge, so `<...>` lines are not handled here.

use super::error_decoder::{decode_alarm, decode_error};
use pcbmill_core::ProbeResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One classified serial data line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataLine {
    /// `ok` acknowledgment
    Ok,
    /// `error:<code|text>`, already expanded to a description
    Error(String),
    /// `ALARM:<code>`
    Alarm {
        /// Alarm code.
        code: u32,
        /// Human readable description.
        description: String,
    },
    /// `[MSG:<text>]`
    Message(String),
    /// `[PRB:x,y,z:ok]`
    Probe(ProbeResult),
    /// Start-up banner, `Grbl 1.1h ['$' for help]`
    Banner(String),
    /// Any other bracketed feedback (`[GC:...]`, `[VER:...]`)
    Feedback(String),
    /// Anything else
    Text(String),
}

impl fmt::Display for DataLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataLine::Ok => write!(f, "ok"),
            DataLine::Error(msg) => write!(f, "error: {}", msg),
            DataLine::Alarm { code, description } => write!(f, "ALARM:{} - {}", code, description),
            DataLine::Message(msg) => write!(f, "message: {}", msg),
            DataLine::Probe(p) => write!(f, "probe: {:.3},{:.3},{:.3}:{}", p.x, p.y, p.z, p.ok as u8),
            DataLine::Banner(b) => write!(f, "banner: {}", b),
            DataLine::Feedback(fb) => write!(f, "feedback: {}", fb),
            DataLine::Text(t) => write!(f, "{}", t),
        }
    }
}

/// Classify a serial data line
pub fn parse_data_line(line: &str) -> DataLine {
    let line = line.trim();

    if line.eq_ignore_ascii_case("ok") {
        return DataLine::Ok;
    }

    if let Some(rest) = strip_prefix_ignore_case(line, "error:") {
        let rest = rest.trim();
        return match rest.parse::<u32>() {
            Ok(code) => DataLine::Error(format!("{} ({})", decode_error(code), code)),
            Err(_) => DataLine::Error(rest.to_string()),
        };
    }

    if let Some(rest) = strip_prefix_ignore_case(line, "ALARM:") {
        let rest = rest.trim();
        if let Ok(code) = rest.parse::<u32>() {
            return DataLine::Alarm {
                code,
                description: decode_alarm(code),
            };
        }
        // Some builds print the text instead of the number
        return DataLine::Alarm {
            code: 0,
            description: rest.to_string(),
        };
    }

    if line.starts_with('[') && line.ends_with(']') {
        let inner = &line[1..line.len() - 1];
        if let Some(msg) = inner.strip_prefix("MSG:") {
            return DataLine::Message(msg.trim().to_string());
        }
        if let Some(prb) = inner.strip_prefix("PRB:") {
            if let Some(result) = parse_probe(prb) {
                return DataLine::Probe(result);
            }
        }
        return DataLine::Feedback(inner.to_string());
    }

    if line.starts_with("Grbl ") || line.starts_with("GrblHAL ") {
        return DataLine::Banner(line.to_string());
    }

    DataLine::Text(line.to_string())
}

/// Parse the body of a `[PRB:x,y,z:flag]` line
fn parse_probe(body: &str) -> Option<ProbeResult> {
    let (coords, flag) = body.rsplit_once(':')?;
    let values: Vec<f64> = coords
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if values.len() < 3 {
        return None;
    }
    let ok = match flag.trim() {
        "1" => true,
        "0" => false,
        _ => return None,
    };
    Some(ProbeResult {
        x: values[0],
        y: values[1],
        z: values[2],
        ok,
    })
}

fn strip_prefix_ignore_case<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    if line.len() >= prefix.len()
        && line.is_char_boundary(prefix.len())
        && line[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}
