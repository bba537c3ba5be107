//! Artwork file kind detection

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Lines read when sniffing file content
const SNIFF_LINES: usize = 40;

/// What a fabrication file contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileKind {
    /// Excellon drill file
    Drill,
    /// Board outline (edge cuts)
    Outline,
    /// Top copper layer
    CopperTop,
    /// Bottom copper layer
    CopperBottom,
}

impl FileKind {
    /// Tool-code namespace prefix
    pub fn namespace(self) -> &'static str {
        match self {
            FileKind::Drill => "drl-",
            FileKind::Outline => "edg-",
            FileKind::CopperTop | FileKind::CopperBottom => "gbr-",
        }
    }

    /// Excellon rather than Gerber syntax
    pub fn is_drill(self) -> bool {
        matches!(self, FileKind::Drill)
    }

    /// Top or bottom copper
    pub fn is_copper(self) -> bool {
        matches!(self, FileKind::CopperTop | FileKind::CopperBottom)
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileKind::Drill => "drill",
            FileKind::Outline => "outline",
            FileKind::CopperTop => "copper top",
            FileKind::CopperBottom => "copper bottom",
        };
        write!(f, "{}", name)
    }
}

/// Classify by file name alone
///
/// Recognises KiCad layer names (`F_Cu`, `B_Cu`, `Edge_Cuts`) and the
/// Protel-style extensions most CAM exports use.
pub fn classify_name(path: &Path) -> Option<FileKind> {
    let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "drl" | "xln" | "exc" | "txt" if ext != "txt" || name.contains("drill") => {
            return Some(FileKind::Drill)
        }
        "gko" | "gm1" | "gml" => return Some(FileKind::Outline),
        "gtl" => return Some(FileKind::CopperTop),
        "gbl" => return Some(FileKind::CopperBottom),
        _ => {}
    }

    if name.contains("edge_cuts") || name.contains("edge.cuts") || name.contains("outline") {
        Some(FileKind::Outline)
    } else if name.contains("f_cu") || name.contains("f.cu") || name.contains("top_copper") {
        Some(FileKind::CopperTop)
    } else if name.contains("b_cu") || name.contains("b.cu") || name.contains("bottom_copper") {
        Some(FileKind::CopperBottom)
    } else {
        None
    }
}

/// Classify by the first lines of content
///
/// `M48` marks an Excellon header; X2 `%TF.FileFunction` attributes name
/// copper sides and the profile layer.
pub fn classify_content(lines: &[String]) -> Option<FileKind> {
    for line in lines {
        let line = line.trim();
        if line.eq_ignore_ascii_case("M48") {
            return Some(FileKind::Drill);
        }
        if let Some(function) = line.strip_prefix("%TF.FileFunction,") {
            let function = function.trim_end_matches("*%");
            if function.starts_with("Profile") {
                return Some(FileKind::Outline);
            }
            if function.starts_with("Copper") {
                if function.contains(",Top") {
                    return Some(FileKind::CopperTop);
                }
                if function.contains(",Bot") {
                    return Some(FileKind::CopperBottom);
                }
            }
        }
    }
    None
}

/// Classify a file on disk, name first, then content
///
/// Returns `Ok(None)` when neither heuristic matches. Fails only when the
/// file cannot be opened.
pub fn classify_file(path: &Path) -> std::io::Result<Option<FileKind>> {
    if let Some(kind) = classify_name(path) {
        return Ok(Some(kind));
    }
    let reader = BufReader::new(File::open(path)?);
    let lines = reader
        .lines()
        .take(SNIFF_LINES)
        .collect::<std::io::Result<Vec<_>>>()?;
    Ok(classify_content(&lines))
}
