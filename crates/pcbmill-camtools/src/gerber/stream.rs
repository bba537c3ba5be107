//! Streaming coordinate rewriter for Gerber and Excellon files
//!
//! Reads one line at a time and rewrites only coordinate fields. Every other
//! line, including its terminator, is copied through byte for byte.

use super::record::{decode_fixed, encode_fixed, CoordinateFormat};
use crate::error::{CamToolError, CamToolResult};
use crate::geometry::{AffineTransform, Point};
use pcbmill_core::GeometryError;
use regex::Regex;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Syntax of the file being rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtworkFormat {
    /// RS-274X
    Gerber,
    /// Excellon drill
    Excellon,
}

/// Rewrite options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformOptions {
    /// Swap `G02`/`G03`, needed after a single-axis mirror
    pub invert_arc_direction: bool,
}

/// Counters reported after a rewrite
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformStats {
    /// Lines read
    pub lines: usize,
    /// Coordinate lines rewritten
    pub coordinates: usize,
    /// Arc direction codes swapped
    pub arcs_inverted: usize,
}

fn gerber_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<prefix>G0?[123]\*?)?(?:X(?P<x>[+-]?[\d.]+))?(?:Y(?P<y>[+-]?[\d.]+))?(?:I(?P<i>[+-]?[\d.]+))?(?:J(?P<j>[+-]?[\d.]+))?(?P<rest>(?:D0?[123])?\*)$",
        )
        .expect("invalid regex pattern")
    })
}

fn excellon_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:X(?P<x>[+-]?[\d.]+))?(?:Y(?P<y>[+-]?[\d.]+))?(?P<rest>.*)$")
            .expect("invalid regex pattern")
    })
}

/// Second endpoint of an Excellon `G85` slot
fn excellon_slot_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?P<code>G85)(?:X(?P<x>[+-]?[\d.]+))?(?:Y(?P<y>[+-]?[\d.]+))?(?P<rest>.*)$")
            .expect("invalid regex pattern")
    })
}

/// Any X or Y word followed by a number
fn coordinate_word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[XY][+-]?\d").expect("invalid regex pattern"))
}

/// A Gerber line the rewriter could not parse but which moves the tool
fn carries_coordinates(text: &str) -> bool {
    !text.starts_with('%')
        && !text.starts_with("G04")
        && !text.starts_with("G4 ")
        && coordinate_word_regex().is_match(text)
}

/// Swap `G02` and `G03` in a command prefix, keeping its spelling
fn swap_arc(prefix: &str) -> Option<String> {
    let digit = prefix.trim_end_matches('*').chars().last()?;
    let swapped = match digit {
        '2' => '3',
        '3' => '2',
        _ => return None,
    };
    let cut = prefix.rfind(digit)?;
    let mut out = String::with_capacity(prefix.len());
    out.push_str(&prefix[..cut]);
    out.push(swapped);
    out.push_str(&prefix[cut + 1..]);
    Some(out)
}

/// Split a raw line into body and terminator
fn split_terminator(raw: &[u8]) -> (&[u8], &[u8]) {
    let mut end = raw.len();
    while end > 0 && (raw[end - 1] == b'\n' || raw[end - 1] == b'\r') {
        end -= 1;
    }
    raw.split_at(end)
}

/// Rewrites coordinate fields through one affine transform
#[derive(Debug, Clone, Copy)]
pub struct GerberStreamTransformer {
    transform: AffineTransform,
    options: TransformOptions,
}

impl GerberStreamTransformer {
    /// Create a transformer
    pub fn new(transform: AffineTransform, options: TransformOptions) -> Self {
        Self { transform, options }
    }

    /// The transform applied to every coordinate
    pub fn transform(&self) -> &AffineTransform {
        &self.transform
    }

    /// Rewrite a file on disk
    ///
    /// On failure the partially written output is removed.
    pub fn transform_file(
        &self,
        input: &Path,
        output: &Path,
        format: ArtworkFormat,
    ) -> CamToolResult<TransformStats> {
        let reader = BufReader::new(File::open(input).map_err(|source| CamToolError::LoadError {
            path: input.to_path_buf(),
            source,
        })?);

        let result = File::create(output)
            .map_err(CamToolError::from)
            .and_then(|file| {
                let mut writer = BufWriter::new(file);
                let stats = match format {
                    ArtworkFormat::Gerber => self.transform_gerber(reader, &mut writer)?,
                    ArtworkFormat::Excellon => self.transform_excellon(reader, &mut writer)?,
                };
                writer.flush()?;
                Ok(stats)
            });

        match result {
            Ok(stats) => {
                debug!(
                    "{} -> {}: {} coordinates rewritten",
                    input.display(),
                    output.display(),
                    stats.coordinates
                );
                Ok(stats)
            }
            Err(e) => {
                warn!("Transform of {} failed: {}", input.display(), e);
                let _ = fs::remove_file(output);
                Err(e)
            }
        }
    }

    /// Rewrite a Gerber stream
    ///
    /// The `%FS` line must precede the first coordinate; otherwise the
    /// rewrite fails with [`GeometryError::MissingFormatSpec`].
    pub fn transform_gerber<R: BufRead, W: Write>(
        &self,
        mut reader: R,
        mut writer: W,
    ) -> CamToolResult<TransformStats> {
        let mut stats = TransformStats::default();
        let mut format: Option<CoordinateFormat> = None;
        let mut current = Point::default();
        let mut raw = Vec::new();

        loop {
            raw.clear();
            if reader.read_until(b'\n', &mut raw)? == 0 {
                break;
            }
            stats.lines += 1;
            let (body, terminator) = split_terminator(&raw);

            let Ok(text) = std::str::from_utf8(body) else {
                writer.write_all(&raw)?;
                continue;
            };

            if text.starts_with("%FS") {
                format = CoordinateFormat::parse(text);
                if format.is_some_and(|fs| fs.trailing_zeros_omitted) {
                    warn!(
                        "line {}: trailing zero omission is deprecated, reading coordinates as leading",
                        stats.lines
                    );
                }
                writer.write_all(&raw)?;
                continue;
            }

            let Some(caps) = gerber_line_regex().captures(text) else {
                if carries_coordinates(text) {
                    warn!(
                        "line {}: several commands on one line, copied untransformed: '{}'",
                        stats.lines, text
                    );
                }
                writer.write_all(&raw)?;
                continue;
            };

            let prefix = caps.name("prefix").map_or("", |m| m.as_str());
            let prefix = if self.options.invert_arc_direction {
                match swap_arc(prefix) {
                    Some(swapped) => {
                        stats.arcs_inverted += 1;
                        swapped
                    }
                    None => prefix.to_string(),
                }
            } else {
                prefix.to_string()
            };

            let x = caps.name("x").map(|m| m.as_str());
            let y = caps.name("y").map(|m| m.as_str());
            let i = caps.name("i").map(|m| m.as_str());
            let j = caps.name("j").map(|m| m.as_str());
            let rest = caps.name("rest").map_or("", |m| m.as_str());

            if x.is_none() && y.is_none() && i.is_none() && j.is_none() {
                // Bare modal code such as `G02*` or `D01*`
                writer.write_all(prefix.as_bytes())?;
                writer.write_all(rest.as_bytes())?;
                writer.write_all(terminator)?;
                continue;
            }

            let Some(fs) = format else {
                return Err(GeometryError::MissingFormatSpec {
                    line_number: stats.lines,
                }
                .into());
            };

            let decode = |raw: Option<&str>, decimals: u32, fallback: f64| -> Option<f64> {
                match raw {
                    Some(v) => decode_fixed(v, decimals),
                    None => Some(fallback),
                }
            };
            let (Some(nx), Some(ny), Some(oi), Some(oj)) = (
                decode(x, fs.x_decimals, current.x),
                decode(y, fs.y_decimals, current.y),
                decode(i, fs.x_decimals, 0.0),
                decode(j, fs.y_decimals, 0.0),
            ) else {
                warn!("line {}: unreadable coordinate '{}', copied unchanged", stats.lines, text);
                writer.write_all(&raw)?;
                continue;
            };

            let start = current;
            let target = Point::new(nx, ny);
            let moved = self.transform.apply(target);

            let mut line = prefix;
            line.push('X');
            line.push_str(&encode_fixed(moved.x, fs.x_decimals));
            line.push('Y');
            line.push_str(&encode_fixed(moved.y, fs.y_decimals));

            if i.is_some() || j.is_some() {
                // Offsets are relative to the arc start: map the absolute
                // center, then subtract the mapped start.
                let center = self.transform.apply(start.add(Point::new(oi, oj)));
                let offset = center.sub(self.transform.apply(start));
                line.push('I');
                line.push_str(&encode_fixed(offset.x, fs.x_decimals));
                line.push('J');
                line.push_str(&encode_fixed(offset.y, fs.y_decimals));
            }
            line.push_str(rest);

            writer.write_all(line.as_bytes())?;
            writer.write_all(terminator)?;
            current = target;
            stats.coordinates += 1;
        }

        Ok(stats)
    }

    /// Rewrite an Excellon stream
    ///
    /// Output coordinates are written with two decimals regardless of the
    /// input encoding. Both ends of a `G85` slot are moved.
    pub fn transform_excellon<R: BufRead, W: Write>(
        &self,
        mut reader: R,
        mut writer: W,
    ) -> CamToolResult<TransformStats> {
        let mut stats = TransformStats::default();
        let mut current = Point::default();
        let mut decimals = 4;
        let mut raw = Vec::new();

        loop {
            raw.clear();
            if reader.read_until(b'\n', &mut raw)? == 0 {
                break;
            }
            stats.lines += 1;
            let (body, terminator) = split_terminator(&raw);

            let Ok(text) = std::str::from_utf8(body) else {
                writer.write_all(&raw)?;
                continue;
            };

            let upper = text.trim().to_ascii_uppercase();
            if upper.starts_with("METRIC") || upper == "M71" {
                decimals = 3;
            } else if upper.starts_with("INCH") || upper == "M72" {
                decimals = 4;
            }

            if !(upper.starts_with('X') || upper.starts_with('Y')) {
                writer.write_all(&raw)?;
                continue;
            }
            let trimmed = text.trim();
            let Some(caps) = excellon_line_regex().captures(trimmed) else {
                writer.write_all(&raw)?;
                continue;
            };

            let x = match caps.name("x") {
                Some(m) => decode_fixed(m.as_str(), decimals),
                None => Some(current.x),
            };
            let y = match caps.name("y") {
                Some(m) => decode_fixed(m.as_str(), decimals),
                None => Some(current.y),
            };
            let (Some(x), Some(y)) = (x, y) else {
                warn!("line {}: unreadable drill coordinate '{}', copied unchanged", stats.lines, text);
                writer.write_all(&raw)?;
                continue;
            };

            let target = Point::new(x, y);
            let moved = self.transform.apply(target);
            let rest = caps.name("rest").map_or("", |m| m.as_str());

            let Some(slot) = excellon_slot_regex().captures(rest) else {
                write!(writer, "X{:.2}Y{:.2}{}", moved.x, moved.y, rest)?;
                writer.write_all(terminator)?;
                current = target;
                stats.coordinates += 1;
                continue;
            };

            // The slot end defaults to the start on a missing axis
            let end_x = match slot.name("x") {
                Some(m) => decode_fixed(m.as_str(), decimals),
                None => Some(target.x),
            };
            let end_y = match slot.name("y") {
                Some(m) => decode_fixed(m.as_str(), decimals),
                None => Some(target.y),
            };
            let (Some(end_x), Some(end_y)) = (end_x, end_y) else {
                warn!("line {}: unreadable slot end '{}', copied unchanged", stats.lines, text);
                writer.write_all(&raw)?;
                continue;
            };
            let end = self.transform.apply(Point::new(end_x, end_y));
            write!(
                writer,
                "X{:.2}Y{:.2}{}X{:.2}Y{:.2}{}",
                moved.x,
                moved.y,
                &slot["code"],
                end.x,
                end.y,
                slot.name("rest").map_or("", |m| m.as_str())
            )?;
            writer.write_all(terminator)?;
            current = target;
            stats.coordinates += 1;
        }

        Ok(stats)
    }
}
