//! Streaming Gerber/Excellon record parser
//!
//! Turns one file into an ordered sequence of [`GerberRecord`]s. Malformed
//! lines are skipped and recorded as warnings; only I/O failures end the
//! stream early.

use super::classify::FileKind;
use crate::geometry::Point;
use pcbmill_core::Units;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{self, BufRead};
use std::sync::OnceLock;
use tracing::warn;

/// Aperture or drill shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApertureShape {
    /// `C`, params: diameter
    Circle,
    /// `R`, params: width, height
    Rectangle,
    /// `O`, params: width, height
    Obround,
    /// `P`, params: outer diameter, vertex count, rotation
    Polygon,
    /// Aperture macro by name
    Macro(String),
    /// Excellon drill, params: diameter
    Drill,
}

/// Kind of coordinate operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpKind {
    /// `D03`, or an Excellon hit
    Flash,
    /// `D02`
    Move,
    /// `D01`
    Interpolate,
}

/// Modal property change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Property {
    /// Select a tool or aperture by code
    Tool(String),
    /// Declare the file units
    Units(Units),
}

/// One parsed record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GerberRecord {
    /// Aperture or drill definition
    Tool {
        /// Code local to the file (`D10`, `T1`)
        code: String,
        /// Shape
        shape: ApertureShape,
        /// Shape parameters
        params: Vec<f64>,
        /// Hole parameters of a Gerber aperture, if any
        hole_params: Vec<f64>,
    },
    /// Modal property change
    SetProp(Property),
    /// Coordinate operation
    Op {
        /// Operation kind
        kind: OpKind,
        /// Absolute coordinate after modal fill-in
        coord: Point,
        /// Tool selected at the time of the operation
        tool: Option<String>,
    },
    /// End of file
    Done,
}

/// Gerber `%FS` coordinate format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinateFormat {
    /// Decimal places of X values
    pub x_decimals: u32,
    /// Decimal places of Y values
    pub y_decimals: u32,
    /// Trailing rather than leading zeros are omitted
    pub trailing_zeros_omitted: bool,
}

impl CoordinateFormat {
    /// Parse a `%FS...*%` line
    pub fn parse(line: &str) -> Option<Self> {
        let caps = fs_regex().captures(line.trim())?;
        let digit = |name: &str| caps.name(name)?.as_str().parse::<u32>().ok();
        Some(Self {
            x_decimals: digit("xd")?,
            y_decimals: digit("yd")?,
            trailing_zeros_omitted: caps.name("zero").is_some_and(|m| m.as_str() == "T"),
        })
    }

    /// Decode an integer-encoded X value
    pub fn decode_x(&self, raw: &str) -> Option<f64> {
        decode_fixed(raw, self.x_decimals)
    }

    /// Decode an integer-encoded Y value
    pub fn decode_y(&self, raw: &str) -> Option<f64> {
        decode_fixed(raw, self.y_decimals)
    }
}

/// Decode a fixed-point field; decimal points are honoured when present
pub fn decode_fixed(raw: &str, decimals: u32) -> Option<f64> {
    if raw.contains('.') {
        return raw.parse::<f64>().ok();
    }
    let value = raw.parse::<i64>().ok()?;
    Some(value as f64 / 10f64.powi(decimals as i32))
}

/// Encode a value with `decimals` implied decimal places
pub fn encode_fixed(value: f64, decimals: u32) -> String {
    let scaled = (value * 10f64.powi(decimals as i32)).round() as i64;
    scaled.to_string()
}

fn fs_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^%FS(?P<zero>[LTD])?[AI]?X(?P<xi>\d)(?P<xd>\d)Y(?P<yi>\d)(?P<yd>\d)\*%$")
            .expect("invalid regex pattern")
    })
}

fn aperture_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^%ADD(?P<code>\d+)(?P<shape>[A-Za-z_$.][\w.$]*)(?:,(?P<params>[^*]*))?\*%$")
            .expect("invalid regex pattern")
    })
}

fn gerber_coord_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?:G0?(?P<g>[123])\*?)?(?:X(?P<x>[+-]?[\d.]+))?(?:Y(?P<y>[+-]?[\d.]+))?(?:I(?P<i>[+-]?[\d.]+))?(?:J(?P<j>[+-]?[\d.]+))?(?:D0?(?P<d>[123]))?\*$",
        )
        .expect("invalid regex pattern")
    })
}

fn aperture_select_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:G54)?D(?P<code>\d{2,})\*$").expect("invalid regex pattern")
    })
}

fn excellon_tool_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^T(?P<num>\d+)(?:F[\d.]+|S[\d.]+|B[\d.]+|H[\d.]+|Z[\d.+-]+)*C(?P<dia>[\d.]+)")
            .expect("invalid regex pattern")
    })
}

fn excellon_coord_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:X(?P<x>[+-]?[\d.]+))?(?:Y(?P<y>[+-]?[\d.]+))?(?P<rest>.*)$")
            .expect("invalid regex pattern")
    })
}

/// Parse a comma list of `X`-separated aperture parameters
fn parse_params(raw: &str) -> Option<Vec<f64>> {
    if raw.trim().is_empty() {
        return Some(Vec::new());
    }
    raw.split('X')
        .map(|v| v.trim().parse::<f64>().ok())
        .collect()
}

/// Line-level parser state for one file
#[derive(Debug)]
pub struct RecordParser {
    kind: FileKind,
    format: Option<CoordinateFormat>,
    current: Point,
    current_tool: Option<String>,
    modal_op: OpKind,
    excellon_units: Units,
    in_header: bool,
    done: bool,
    line_number: usize,
    warnings: Vec<String>,
}

impl RecordParser {
    /// Create a parser for a file of the given kind
    pub fn new(kind: FileKind) -> Self {
        Self {
            kind,
            format: None,
            current: Point::default(),
            current_tool: None,
            modal_op: OpKind::Move,
            excellon_units: Units::Inches,
            in_header: false,
            done: false,
            line_number: 0,
            warnings: Vec::new(),
        }
    }

    /// Warnings collected so far
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Take the collected warnings
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    /// End of file seen
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn warn(&mut self, message: String) {
        warn!("line {}: {}", self.line_number, message);
        self.warnings
            .push(format!("line {}: {}", self.line_number, message));
    }

    /// Parse one line, appending any records it produces
    pub fn parse_line(&mut self, raw: &str, out: &mut VecDeque<GerberRecord>) {
        self.line_number += 1;
        if self.done {
            return;
        }
        let line = raw.trim();
        if line.is_empty() {
            return;
        }
        if self.kind.is_drill() {
            self.parse_excellon(line, out);
        } else {
            self.parse_gerber(line, out);
        }
    }

    fn parse_gerber(&mut self, line: &str, out: &mut VecDeque<GerberRecord>) {
        if line.starts_with("G04") || line.starts_with("%TF") || line.starts_with("%TA")
            || line.starts_with("%TO") || line.starts_with("%TD")
        {
            return;
        }

        if line.starts_with("%FS") {
            match CoordinateFormat::parse(line) {
                Some(format) => {
                    if format.trailing_zeros_omitted {
                        self.warn("trailing zero omission is deprecated, reading as leading".to_string());
                    }
                    self.format = Some(format);
                }
                None => self.warn(format!("unreadable format specification '{}'", line)),
            }
            return;
        }

        if let Some(units) = line.strip_prefix("%MO") {
            match units.trim_end_matches("*%") {
                "MM" => out.push_back(GerberRecord::SetProp(Property::Units(Units::Millimeters))),
                "IN" => out.push_back(GerberRecord::SetProp(Property::Units(Units::Inches))),
                other => self.warn(format!("unknown unit mode '{}'", other)),
            }
            return;
        }
        // Legacy unit codes
        if line == "G70*" {
            out.push_back(GerberRecord::SetProp(Property::Units(Units::Inches)));
            return;
        }
        if line == "G71*" {
            out.push_back(GerberRecord::SetProp(Property::Units(Units::Millimeters)));
            return;
        }

        if line.starts_with("%ADD") {
            self.parse_aperture(line, out);
            return;
        }

        if line.starts_with('%') {
            // Macros, polarity, image attributes
            return;
        }

        if line.starts_with("M02") || line.starts_with("M00") {
            self.done = true;
            out.push_back(GerberRecord::Done);
            return;
        }

        if let Some(caps) = aperture_select_regex().captures(line) {
            let code = format!("D{}", &caps["code"]);
            self.current_tool = Some(code.clone());
            out.push_back(GerberRecord::SetProp(Property::Tool(code)));
            return;
        }

        let Some(caps) = gerber_coord_regex().captures(line) else {
            // G36/G37 regions, G74/G75 quadrant modes and the like
            return;
        };

        if let Some(d) = caps.name("d") {
            self.modal_op = match d.as_str() {
                "1" => OpKind::Interpolate,
                "2" => OpKind::Move,
                _ => OpKind::Flash,
            };
        }

        let has_x = caps.name("x");
        let has_y = caps.name("y");
        if has_x.is_none() && has_y.is_none() {
            return;
        }

        let Some(format) = self.format else {
            self.warn("coordinate before format specification, skipped".to_string());
            return;
        };

        let mut coord = self.current;
        if let Some(x) = has_x {
            match format.decode_x(x.as_str()) {
                Some(v) => coord.x = v,
                None => {
                    self.warn(format!("bad X value '{}'", x.as_str()));
                    return;
                }
            }
        }
        if let Some(y) = has_y {
            match format.decode_y(y.as_str()) {
                Some(v) => coord.y = v,
                None => {
                    self.warn(format!("bad Y value '{}'", y.as_str()));
                    return;
                }
            }
        }
        self.current = coord;
        out.push_back(GerberRecord::Op {
            kind: self.modal_op,
            coord,
            tool: self.current_tool.clone(),
        });
    }

    fn parse_aperture(&mut self, line: &str, out: &mut VecDeque<GerberRecord>) {
        let Some(caps) = aperture_regex().captures(line) else {
            self.warn(format!("malformed aperture definition '{}'", line));
            return;
        };
        let code = format!("D{}", &caps["code"]);
        let shape_name = &caps["shape"];
        let Some(all_params) = parse_params(caps.name("params").map_or("", |m| m.as_str())) else {
            self.warn(format!("bad parameters in aperture {}", code));
            return;
        };

        let (shape, shape_params) = match shape_name {
            "C" => (ApertureShape::Circle, 1),
            "R" => (ApertureShape::Rectangle, 2),
            "O" => (ApertureShape::Obround, 2),
            "P" => (ApertureShape::Polygon, 3),
            name => (ApertureShape::Macro(name.to_string()), all_params.len()),
        };

        let required = match shape {
            ApertureShape::Circle => 1,
            ApertureShape::Rectangle | ApertureShape::Obround => 2,
            ApertureShape::Polygon => 2,
            _ => 0,
        };
        if all_params.len() < required {
            self.warn(format!("aperture {} is missing parameters", code));
            return;
        }

        let split = shape_params.min(all_params.len());
        let params = all_params[..split].to_vec();
        let hole_params = all_params[split..].to_vec();
        out.push_back(GerberRecord::Tool {
            code,
            shape,
            params,
            hole_params,
        });
    }

    fn parse_excellon(&mut self, line: &str, out: &mut VecDeque<GerberRecord>) {
        let upper = line.to_ascii_uppercase();
        if upper.starts_with(';') {
            return;
        }
        if upper == "M48" {
            self.in_header = true;
            return;
        }
        if upper == "%" || upper == "M95" {
            self.in_header = false;
            return;
        }
        if upper == "M30" || upper == "M00" {
            self.done = true;
            out.push_back(GerberRecord::Done);
            return;
        }

        if let Some(units) = excellon_units(&upper) {
            self.excellon_units = units;
            out.push_back(GerberRecord::SetProp(Property::Units(units)));
            return;
        }
        if upper == "M71" {
            self.excellon_units = Units::Millimeters;
            out.push_back(GerberRecord::SetProp(Property::Units(Units::Millimeters)));
            return;
        }
        if upper == "M72" {
            self.excellon_units = Units::Inches;
            out.push_back(GerberRecord::SetProp(Property::Units(Units::Inches)));
            return;
        }

        if let Some(caps) = excellon_tool_regex().captures(&upper) {
            let number = caps["num"].parse::<u32>().unwrap_or(0);
            match caps["dia"].parse::<f64>() {
                Ok(diameter) if diameter > 0.0 => out.push_back(GerberRecord::Tool {
                    code: format!("T{}", number),
                    shape: ApertureShape::Drill,
                    params: vec![diameter],
                    hole_params: Vec::new(),
                }),
                _ => self.warn(format!("tool T{} has no usable diameter", number)),
            }
            return;
        }

        if self.in_header {
            return;
        }

        if let Some(num) = upper.strip_prefix('T') {
            match num.parse::<u32>() {
                Ok(0) => self.current_tool = None,
                Ok(n) => {
                    let code = format!("T{}", n);
                    self.current_tool = Some(code.clone());
                    out.push_back(GerberRecord::SetProp(Property::Tool(code)));
                }
                Err(_) => self.warn(format!("unreadable tool selection '{}'", line)),
            }
            return;
        }

        if upper.starts_with('G') {
            if upper.starts_with("G85") {
                self.warn("slot (G85) not supported, skipped".to_string());
            }
            return;
        }

        if !(upper.starts_with('X') || upper.starts_with('Y')) {
            return;
        }

        let Some(caps) = excellon_coord_regex().captures(&upper) else {
            return;
        };
        if caps.name("rest").is_some_and(|r| r.as_str().contains("G85")) {
            self.warn("slot (G85) not supported, skipped".to_string());
            return;
        }

        let decimals = match self.excellon_units {
            Units::Millimeters => 3,
            Units::Inches => 4,
        };
        let mut coord = self.current;
        if let Some(x) = caps.name("x") {
            match decode_fixed(x.as_str(), decimals) {
                Some(v) => coord.x = v,
                None => {
                    self.warn(format!("bad X value '{}'", x.as_str()));
                    return;
                }
            }
        }
        if let Some(y) = caps.name("y") {
            match decode_fixed(y.as_str(), decimals) {
                Some(v) => coord.y = v,
                None => {
                    self.warn(format!("bad Y value '{}'", y.as_str()));
                    return;
                }
            }
        }
        self.current = coord;
        out.push_back(GerberRecord::Op {
            kind: OpKind::Flash,
            coord,
            tool: self.current_tool.clone(),
        });
    }
}

/// `METRIC`/`INCH` header directive, with optional zero/format suffix
fn excellon_units(upper: &str) -> Option<Units> {
    if upper.starts_with("METRIC") {
        Some(Units::Millimeters)
    } else if upper.starts_with("INCH") {
        Some(Units::Inches)
    } else {
        None
    }
}

/// Iterator over the records of one file
pub struct RecordStream<R> {
    reader: R,
    parser: RecordParser,
    pending: VecDeque<GerberRecord>,
    line: String,
    finished: bool,
}

impl<R: BufRead> RecordStream<R> {
    /// Stream records of a file of the given kind from `reader`
    pub fn new(reader: R, kind: FileKind) -> Self {
        Self {
            reader,
            parser: RecordParser::new(kind),
            pending: VecDeque::new(),
            line: String::new(),
            finished: false,
        }
    }

    /// Warnings collected so far
    pub fn warnings(&self) -> &[String] {
        self.parser.warnings()
    }

    /// Consume the stream, returning its warnings
    pub fn into_warnings(self) -> Vec<String> {
        self.parser.warnings
    }
}

impl<R: BufRead> Iterator for RecordStream<R> {
    type Item = io::Result<GerberRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }
            if self.finished {
                return None;
            }
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => {
                    self.finished = true;
                    if !self.parser.is_done() {
                        // Files without an explicit end still terminate cleanly
                        return Some(Ok(GerberRecord::Done));
                    }
                }
                Ok(_) => {
                    let line = std::mem::take(&mut self.line);
                    self.parser.parse_line(&line, &mut self.pending);
                    self.line = line;
                    if self.parser.is_done() && self.pending.is_empty() {
                        self.finished = true;
                    }
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
