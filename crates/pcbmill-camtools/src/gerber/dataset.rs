//! Gerber dataset: tools, holes, outline corners and bounding boxes
//!
//! Built by draining a worklist of files one at a time. Each file carries
//! its own current tool and coordinate modes, so files are never read
//! concurrently or interleaved.

use super::classify::{classify_file, FileKind};
use super::record::{ApertureShape, GerberRecord, OpKind, Property, RecordStream};
use crate::error::{CamToolError, CamToolResult};
use crate::geometry::{BoundingBox, Point};
use pcbmill_core::Units;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A registered aperture or drill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Code as written in the file (`D10`, `T1`)
    pub code: String,
    /// Shape
    pub shape: ApertureShape,
    /// Shape parameters
    pub params: Vec<f64>,
    /// Hole parameters, if any
    pub hole_params: Vec<f64>,
}

impl ToolDefinition {
    /// Half extent of the inked area around an operation point
    ///
    /// Macro apertures have no closed-form extent and contribute none.
    pub fn half_extent(&self) -> (f64, f64) {
        let p = |i: usize| self.params.get(i).copied().unwrap_or(0.0) / 2.0;
        match self.shape {
            ApertureShape::Circle | ApertureShape::Polygon | ApertureShape::Drill => (p(0), p(0)),
            ApertureShape::Rectangle | ApertureShape::Obround => (p(0), p(1)),
            ApertureShape::Macro(_) => (0.0, 0.0),
        }
    }

    /// Drill or circle diameter
    pub fn diameter(&self) -> Option<f64> {
        match self.shape {
            ApertureShape::Circle | ApertureShape::Drill => self.params.first().copied(),
            _ => None,
        }
    }
}

/// A drill hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hole {
    /// Namespaced tool key
    pub tool: Option<String>,
    /// Hole center
    pub coord: Point,
    /// Drill diameter when the tool was defined
    pub diameter: Option<f64>,
}

/// Copper boxes per side
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CopperBoxes {
    /// Top copper, padded by aperture size
    pub top: BoundingBox,
    /// Bottom copper, padded by aperture size
    pub bottom: BoundingBox,
    /// Union of whichever sides are present
    pub both: BoundingBox,
}

/// One file consumed by the load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedFile {
    /// Path or label of the file
    pub path: PathBuf,
    /// Detected kind
    pub kind: FileKind,
}

/// Dimensions handed to the rendering layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderSummary {
    /// Board width
    pub width: f64,
    /// Board height
    pub height: f64,
    /// `[min_x, min_y, width, height]`
    pub view_box: [f64; 4],
    /// Units of all values above
    pub units: Units,
}

/// Parsed fabrication artwork
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GerberDataset {
    tools: BTreeMap<String, ToolDefinition>,
    holes: Vec<Hole>,
    corners: Vec<Point>,
    master: BoundingBox,
    drill: BoundingBox,
    corners_box: BoundingBox,
    copper: CopperBoxes,
    units: Option<Units>,
    synthesized_corners: bool,
    files: Vec<LoadedFile>,
    warnings: Vec<String>,
}

impl GerberDataset {
    /// Load files from disk, strictly in order
    ///
    /// Unrecognised files are skipped with a warning. A file that cannot be
    /// opened fails the whole load.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> CamToolResult<Self> {
        let mut dataset = Self::default();
        let mut worklist: VecDeque<PathBuf> =
            paths.iter().map(|p| p.as_ref().to_path_buf()).collect();

        while let Some(path) = worklist.pop_front() {
            let kind = match classify_file(&path) {
                Ok(Some(kind)) => kind,
                Ok(None) => {
                    dataset.warn(format!(
                        "{}: unrecognised artwork file, skipped",
                        path.display()
                    ));
                    continue;
                }
                Err(source) => return Err(CamToolError::LoadError { path, source }),
            };
            let file = File::open(&path).map_err(|source| CamToolError::LoadError {
                path: path.clone(),
                source,
            })?;
            dataset.ingest(kind, &path, BufReader::new(file))?;
        }

        dataset.calc_final_sizes();
        Ok(dataset)
    }

    /// Build a dataset from already-classified readers, in order
    pub fn from_readers<R, I>(sources: I) -> CamToolResult<Self>
    where
        R: BufRead,
        I: IntoIterator<Item = (FileKind, PathBuf, R)>,
    {
        let mut dataset = Self::default();
        for (kind, label, reader) in sources {
            dataset.ingest(kind, &label, reader)?;
        }
        dataset.calc_final_sizes();
        Ok(dataset)
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }

    /// Drain one file completely
    fn ingest<R: BufRead>(&mut self, kind: FileKind, path: &Path, reader: R) -> CamToolResult<()> {
        info!("Loading {} as {}", path.display(), kind);
        let namespace = kind.namespace();
        let mut current_tool: Option<String> = None;
        let mut ops = 0usize;
        let mut stream = RecordStream::new(reader, kind);

        for record in stream.by_ref() {
            let record = record.map_err(|source| CamToolError::LoadError {
                path: path.to_path_buf(),
                source,
            })?;
            match record {
                GerberRecord::Tool {
                    code,
                    shape,
                    params,
                    hole_params,
                } => {
                    let key = format!("{}{}", namespace, code);
                    if let ApertureShape::Macro(name) = &shape {
                        debug!("Aperture {} uses macro {}, extent not padded", key, name);
                    }
                    self.tools.insert(
                        key,
                        ToolDefinition {
                            code,
                            shape,
                            params,
                            hole_params,
                        },
                    );
                }
                GerberRecord::SetProp(Property::Tool(code)) => {
                    current_tool = Some(format!("{}{}", namespace, code));
                }
                GerberRecord::SetProp(Property::Units(units)) => self.set_units(units, path),
                GerberRecord::Op { kind: op, coord, .. } => {
                    ops += 1;
                    self.apply_op(kind, op, coord, current_tool.as_deref());
                }
                GerberRecord::Done => break,
            }
        }

        let file_warnings = stream.into_warnings();
        for w in file_warnings {
            self.warnings.push(format!("{}: {}", path.display(), w));
        }
        debug!("{}: {} operations", path.display(), ops);

        self.files.push(LoadedFile {
            path: path.to_path_buf(),
            kind,
        });
        Ok(())
    }

    fn set_units(&mut self, units: Units, path: &Path) {
        match self.units {
            Some(existing) if existing != units => {
                self.warn(format!(
                    "{}: declares {} but earlier files used {}, coordinates are not converted",
                    path.display(),
                    units,
                    existing
                ));
                self.units = Some(units);
            }
            _ => self.units = Some(units),
        }
    }

    fn apply_op(&mut self, kind: FileKind, op: OpKind, coord: Point, tool: Option<&str>) {
        match kind {
            FileKind::Drill => {
                if op != OpKind::Flash {
                    return;
                }
                let diameter = tool
                    .and_then(|t| self.tools.get(t))
                    .and_then(ToolDefinition::diameter);
                self.holes.push(Hole {
                    tool: tool.map(str::to_string),
                    coord,
                    diameter,
                });
                self.drill.check_coord(coord);
                self.master.check_coord(coord);
            }
            FileKind::Outline => {
                if op == OpKind::Flash {
                    return;
                }
                self.corners.push(coord);
                self.corners_box.check_coord(coord);
                self.master.check_coord(coord);
            }
            FileKind::CopperTop | FileKind::CopperBottom => {
                let (hx, hy) = tool
                    .and_then(|t| self.tools.get(t))
                    .map(ToolDefinition::half_extent)
                    .unwrap_or((0.0, 0.0));
                let side = if kind == FileKind::CopperTop {
                    &mut self.copper.top
                } else {
                    &mut self.copper.bottom
                };
                side.check_padded(coord, hx, hy);
                self.master.check_coord(coord);
            }
        }
    }

    /// Finish the boxes once every file is drained
    ///
    /// Without an outline file the board is assumed rectangular with the
    /// same margin on both sides: the origin is the lower-left corner and
    /// `master.max + master.min` the upper-right. Boards that are not
    /// rectangular or not symmetric come out wrong.
    fn calc_final_sizes(&mut self) {
        if !self.corners_box.valid() && self.master.valid() {
            let far = self.master.max.add(self.master.min);
            self.corners_box.check_coord(Point::new(0.0, 0.0));
            self.corners_box.check_coord(far);
            self.synthesized_corners = true;
            debug!(
                "No outline, assuming board corners (0, 0) and {}",
                far
            );
        }
        let mut both = BoundingBox::new();
        both.union(&self.copper.top);
        both.union(&self.copper.bottom);
        self.copper.both = both;
    }

    /// Registered tools, keyed by namespaced code
    pub fn tools(&self) -> &BTreeMap<String, ToolDefinition> {
        &self.tools
    }

    /// Tool by namespaced key (`drl-T1`, `gbr-D10`)
    pub fn tool(&self, key: &str) -> Option<&ToolDefinition> {
        self.tools.get(key)
    }

    /// Drill hits in file order
    pub fn holes(&self) -> &[Hole] {
        &self.holes
    }

    /// Outline vertices in file order
    pub fn corners(&self) -> &[Point] {
        &self.corners
    }

    /// Every observed coordinate
    pub fn master(&self) -> &BoundingBox {
        &self.master
    }

    /// Drill hits
    pub fn drill(&self) -> &BoundingBox {
        &self.drill
    }

    /// Board outline, explicit or synthesized
    pub fn corners_box(&self) -> &BoundingBox {
        &self.corners_box
    }

    /// Copper boxes
    pub fn copper(&self) -> &CopperBoxes {
        &self.copper
    }

    /// Units of the last file that declared any
    pub fn units(&self) -> Option<Units> {
        self.units
    }

    /// Board corners came from the heuristic rather than an outline file
    pub fn has_synthesized_corners(&self) -> bool {
        self.synthesized_corners
    }

    /// Files consumed, in order
    pub fn files(&self) -> &[LoadedFile] {
        &self.files
    }

    /// Parse and consistency warnings
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Board dimensions for the rendering layer
    pub fn render_summary(&self) -> Option<RenderSummary> {
        let board = self.corners_box.as_valid()?;
        let size = board.size();
        Some(RenderSummary {
            width: size.width,
            height: size.height,
            view_box: [board.min.x, board.min.y, size.width, size.height],
            units: self.units.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const DRILL: &str = "M48\nMETRIC\nT1C0.8\n%\nT1\nX10.0Y10.0\nX20.0Y10.0\nM30\n";
    const COPPER: &str = "%FSLAX46Y46*%\n%MOMM*%\n%ADD10C,2.0*%\nD10*\nX6000000Y6000000D03*\nX24000000Y14000000D03*\nM02*\n";
    const OUTLINE: &str = "%FSLAX46Y46*%\n%MOMM*%\n%ADD11C,0.1*%\nD11*\nX0Y0D02*\nX30000000Y0D01*\nX30000000Y20000000D01*\nX0Y20000000D01*\nX0Y0D01*\nM02*\n";

    fn source(kind: FileKind, name: &str, text: &'static str) -> (FileKind, PathBuf, Cursor<&'static [u8]>) {
        (kind, PathBuf::from(name), Cursor::new(text.as_bytes()))
    }

    #[test]
    fn test_drill_and_copper() {
        let ds = GerberDataset::from_readers(vec![
            source(FileKind::Drill, "board.drl", DRILL),
            source(FileKind::CopperTop, "board-F_Cu.gbr", COPPER),
        ])
        .unwrap();

        assert_eq!(ds.holes().len(), 2);
        assert_eq!(ds.holes()[0].diameter, Some(0.8));
        assert_eq!(ds.holes()[0].tool.as_deref(), Some("drl-T1"));
        assert!(ds.tool("gbr-D10").is_some());

        assert_eq!(ds.drill().min, Point::new(10.0, 10.0));
        assert_eq!(ds.copper().top.min, Point::new(5.0, 5.0));
        assert_eq!(ds.copper().top.max, Point::new(25.0, 15.0));
        assert_eq!(ds.copper().both, ds.copper().top);
        assert!(!ds.copper().bottom.valid());

        // Centerlines only
        assert_eq!(ds.master().min, Point::new(6.0, 6.0));
        assert_eq!(ds.master().max, Point::new(24.0, 14.0));
        assert_eq!(ds.units(), Some(Units::Millimeters));
        assert!(ds.warnings().is_empty());
    }

    #[test]
    fn test_synthesized_corners() {
        let ds = GerberDataset::from_readers(vec![source(FileKind::CopperTop, "t.gbr", COPPER)]).unwrap();
        assert!(ds.has_synthesized_corners());
        assert_eq!(ds.corners_box().min, Point::new(0.0, 0.0));
        assert_eq!(ds.corners_box().max, Point::new(30.0, 20.0));
    }

    #[test]
    fn test_outline_corners() {
        let ds = GerberDataset::from_readers(vec![source(FileKind::Outline, "edge.gbr", OUTLINE)]).unwrap();
        assert!(!ds.has_synthesized_corners());
        assert_eq!(ds.corners().len(), 5);
        assert_eq!(ds.corners_box().max, Point::new(30.0, 20.0));

        let summary = ds.render_summary().unwrap();
        assert_eq!(summary.width, 30.0);
        assert_eq!(summary.view_box, [0.0, 0.0, 30.0, 20.0]);
        assert_eq!(summary.units, Units::Millimeters);
    }

    #[test]
    fn test_units_mismatch_warns() {
        const INCH_DRILL: &str = "M48\nINCH\nT1C0.03\n%\nT1\nX0.5Y0.5\nM30\n";
        let ds = GerberDataset::from_readers(vec![
            source(FileKind::CopperTop, "t.gbr", COPPER),
            source(FileKind::Drill, "d.drl", INCH_DRILL),
        ])
        .unwrap();
        assert_eq!(ds.units(), Some(Units::Inches));
        assert_eq!(ds.warnings().len(), 1);
        assert!(ds.warnings()[0].contains("d.drl"));
    }

    #[test]
    fn test_top_and_bottom_union() {
        const BOTTOM: &str = "%FSLAX46Y46*%\n%ADD10R,2.0X4.0*%\nD10*\nX40000000Y0D03*\nM02*\n";
        let ds = GerberDataset::from_readers(vec![
            source(FileKind::CopperTop, "t.gbr", COPPER),
            source(FileKind::CopperBottom, "b.gbr", BOTTOM),
        ])
        .unwrap();
        assert_eq!(ds.copper().bottom.min, Point::new(39.0, -2.0));
        assert_eq!(ds.copper().both.min, Point::new(5.0, -2.0));
        assert_eq!(ds.copper().both.max, Point::new(41.0, 15.0));
    }

    #[test]
    fn test_empty_dataset() {
        let ds = GerberDataset::from_readers(Vec::<(FileKind, PathBuf, Cursor<&[u8]>)>::new()).unwrap();
        assert!(!ds.master().valid());
        assert!(!ds.corners_box().valid());
        assert!(ds.render_summary().is_none());
    }
}
