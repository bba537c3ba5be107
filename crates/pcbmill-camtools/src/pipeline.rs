//! Ordered transform pipeline
//!
//! Stages are appended in the physical order they happen to the board and
//! folded into one matrix. Rotation and centering need the current size of
//! the board and copper, so the pipeline carries both boxes forward through
//! every stage. Deskew corrects the measured placement of the real stock
//! and is always the last stage.

use crate::error::{CamToolError, CamToolResult};
use crate::geometry::{AffineTransform, BoundingBox, DeskewResult, Point, Size};
use crate::gerber::{ArtworkFormat, GerberDataset, GerberStreamTransformer, TransformOptions, TransformStats};
use crate::project::{Project, Side};
use pcbmill_core::GeometryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Where the copper lands on the stock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CopperPolicy {
    /// Leave the artwork where it is
    #[default]
    Natural,
    /// Center along X only
    CenterWidth,
    /// Center on both axes
    CenterAll,
    /// Quarter turn clockwise, copper moved to the origin
    RotateCorner,
    /// Quarter turn clockwise, centered along X
    RotateCenterOne,
    /// Quarter turn clockwise, centered on both axes
    RotateCenterAll,
}

impl CopperPolicy {
    /// Policy turns the board before placing it
    pub fn rotates(self) -> bool {
        matches!(
            self,
            CopperPolicy::RotateCorner | CopperPolicy::RotateCenterOne | CopperPolicy::RotateCenterAll
        )
    }

    fn name(self) -> &'static str {
        match self {
            CopperPolicy::Natural => "natural",
            CopperPolicy::CenterWidth => "center-width",
            CopperPolicy::CenterAll => "center-all",
            CopperPolicy::RotateCorner => "rotate-corner",
            CopperPolicy::RotateCenterOne => "rotate-center-one",
            CopperPolicy::RotateCenterAll => "rotate-center-all",
        }
    }
}

impl fmt::Display for CopperPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for CopperPolicy {
    type Err = GeometryError;

    /// Case-insensitive; `_` and `-` are interchangeable (`CENTER_ALL`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "natural" => Ok(CopperPolicy::Natural),
            "center-width" => Ok(CopperPolicy::CenterWidth),
            "center-all" => Ok(CopperPolicy::CenterAll),
            "rotate-corner" => Ok(CopperPolicy::RotateCorner),
            "rotate-center-one" => Ok(CopperPolicy::RotateCenterOne),
            "rotate-center-all" => Ok(CopperPolicy::RotateCenterAll),
            _ => Err(GeometryError::UnknownPolicy {
                name: s.to_string(),
            }),
        }
    }
}

/// Files written by [`TransformPipeline::prepare_outputs`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedOutputs {
    /// Output file per side
    pub files: BTreeMap<Side, PathBuf>,
    /// Rewrite counters per side
    pub stats: BTreeMap<Side, TransformStats>,
}

/// Accumulated transform plus the boxes it has moved so far
#[derive(Debug, Clone)]
pub struct TransformPipeline {
    matrix: AffineTransform,
    board: BoundingBox,
    copper: BoundingBox,
    invert_arc: bool,
    deskewed: bool,
}

impl TransformPipeline {
    /// Start from the untransformed board and copper boxes
    pub fn new(board: BoundingBox, copper: BoundingBox) -> Self {
        Self {
            matrix: AffineTransform::identity(),
            board,
            copper,
            invert_arc: false,
            deskewed: false,
        }
    }

    /// Start from a loaded dataset's board and combined copper boxes
    pub fn from_dataset(dataset: &GerberDataset) -> Self {
        Self::new(*dataset.corners_box(), dataset.copper().both)
    }

    /// Composed transform of every stage so far
    pub fn composed(&self) -> AffineTransform {
        self.matrix
    }

    /// Arc directions must be swapped when rewriting
    pub fn invert_arc(&self) -> bool {
        self.invert_arc
    }

    /// Board box after the stages so far
    pub fn board(&self) -> &BoundingBox {
        &self.board
    }

    /// Copper box after the stages so far
    pub fn copper(&self) -> &BoundingBox {
        &self.copper
    }

    /// Deskew has been applied
    pub fn is_deskewed(&self) -> bool {
        self.deskewed
    }

    /// Append a stage after everything added so far
    pub fn add_transform(&mut self, transform: AffineTransform) -> CamToolResult<&mut Self> {
        if self.deskewed {
            return Err(CamToolError::InvalidParameters(
                "no stage may follow deskew".to_string(),
            ));
        }
        self.matrix = self.matrix.then(&transform);
        self.board = self.board.transformed(&transform);
        self.copper = self.copper.transformed(&transform);
        if transform.is_reflection() {
            self.invert_arc = !self.invert_arc;
        }
        debug!("Pipeline stage {}, composed {}", transform, self.matrix);
        Ok(self)
    }

    /// Quarter turn, keeping the board's lower-left corner where it was
    /// with its coordinates exchanged
    pub fn rotate90(&mut self, clockwise: bool) -> CamToolResult<&mut Self> {
        let board = self.board.as_valid().copied().ok_or_else(|| GeometryError::InvalidSize {
            reason: "board size unknown, cannot rotate".to_string(),
        })?;
        let turn = AffineTransform::rotate90(clockwise);
        let turned = board.transformed(&turn);
        let target = Point::new(board.min.y, board.min.x);
        let shift = target.sub(turned.min);
        self.add_transform(turn.then(&AffineTransform::translate(shift.x, shift.y)))
    }

    /// Reflect across the stock's center lines
    ///
    /// Mirroring one axis reverses arc winding; mirroring both does not.
    pub fn mirror(&mut self, stock: Size, mirror_x: bool, mirror_y: bool) -> CamToolResult<&mut Self> {
        if !stock.is_positive() {
            return Err(GeometryError::InvalidSize {
                reason: format!("stock {}x{} is not positive", stock.width, stock.height),
            }
            .into());
        }
        if !(mirror_x || mirror_y) {
            return Ok(self);
        }
        let mut t = AffineTransform::identity();
        if mirror_x {
            t = t.then(&AffineTransform::mirror_x(stock.width / 2.0));
        }
        if mirror_y {
            t = t.then(&AffineTransform::mirror_y(stock.height / 2.0));
        }
        self.add_transform(t)
    }

    /// Place the copper on the stock according to `policy`
    ///
    /// Rotating policies turn first, then translate the turned copper.
    pub fn position_copper(&mut self, policy: CopperPolicy, stock: Size) -> CamToolResult<&mut Self> {
        if policy == CopperPolicy::Natural {
            return Ok(self);
        }
        if !stock.is_positive() {
            return Err(GeometryError::InvalidSize {
                reason: format!("stock {}x{} is not positive", stock.width, stock.height),
            }
            .into());
        }
        if !self.copper.valid() {
            return Err(GeometryError::InvalidSize {
                reason: "copper size unknown, cannot position".to_string(),
            }
            .into());
        }

        if policy.rotates() {
            self.rotate90(true)?;
        }

        let copper = self.copper;
        let size = copper.size();
        let center_x = (stock.width - size.width) / 2.0 - copper.min.x;
        let center_y = (stock.height - size.height) / 2.0 - copper.min.y;
        let (dx, dy) = match policy {
            CopperPolicy::CenterWidth | CopperPolicy::RotateCenterOne => (center_x, 0.0),
            CopperPolicy::CenterAll | CopperPolicy::RotateCenterAll => (center_x, center_y),
            CopperPolicy::RotateCorner => (-copper.min.x, -copper.min.y),
            CopperPolicy::Natural => (0.0, 0.0),
        };

        if size.width > stock.width || size.height > stock.height {
            warn!(
                "Copper {:.2}x{:.2} does not fit stock {:.2}x{:.2}",
                size.width, size.height, stock.width, stock.height
            );
        }
        info!("Positioning copper with policy {}: shift ({:.3}, {:.3})", policy, dx, dy);
        self.add_transform(AffineTransform::translate(dx, dy))
    }

    /// Correct measured placement error; must be the last stage
    pub fn deskew(&mut self, result: &DeskewResult) -> CamToolResult<&mut Self> {
        self.add_transform(result.transform())?;
        self.deskewed = true;
        Ok(self)
    }

    fn transformer(&self) -> GerberStreamTransformer {
        GerberStreamTransformer::new(
            self.matrix,
            TransformOptions {
                invert_arc_direction: self.invert_arc,
            },
        )
    }

    /// Rewrite a Gerber file through the composed transform
    pub fn transform_gbr(&self, input: &Path, output: &Path) -> CamToolResult<TransformStats> {
        self.transformer()
            .transform_file(input, output, ArtworkFormat::Gerber)
    }

    /// Rewrite an Excellon file through the composed transform
    pub fn transform_drl(&self, input: &Path, output: &Path) -> CamToolResult<TransformStats> {
        self.transformer()
            .transform_file(input, output, ArtworkFormat::Excellon)
    }

    /// Write `<id>-top.gbr`, `<id>-bottom.gbr` and `<id>-drill.drl` for
    /// whichever sides the project has
    ///
    /// If any side fails, every output written so far is removed.
    pub fn prepare_outputs(&self, project: &Project, out_dir: &Path) -> CamToolResult<PreparedOutputs> {
        if project.sides().is_empty() {
            return Err(CamToolError::InvalidParameters(format!(
                "project '{}' has no top, bottom or drill file",
                project.id()
            )));
        }
        fs::create_dir_all(out_dir)?;

        let mut outputs = PreparedOutputs::default();
        for side in Side::ALL {
            let Some(input) = project.side(side) else {
                continue;
            };
            let (ext, result) = match side {
                Side::Drill => {
                    let output = out_dir.join(format!("{}-{}.drl", project.id(), side));
                    ("drl", self.transform_drl(input, &output).map(|s| (output, s)))
                }
                Side::Top | Side::Bottom => {
                    let output = out_dir.join(format!("{}-{}.gbr", project.id(), side));
                    ("gbr", self.transform_gbr(input, &output).map(|s| (output, s)))
                }
            };
            match result {
                Ok((output, stats)) => {
                    debug!("Prepared {} side as {} ({})", side, output.display(), ext);
                    outputs.files.insert(side, output);
                    outputs.stats.insert(side, stats);
                }
                Err(e) => {
                    for written in outputs.files.values() {
                        let _ = fs::remove_file(written);
                    }
                    return Err(e);
                }
            }
        }

        info!(
            "Prepared {} output files for '{}' in {}",
            outputs.files.len(),
            project.id(),
            out_dir.display()
        );
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxed(min: (f64, f64), max: (f64, f64)) -> BoundingBox {
        BoundingBox::from_corners(Point::new(min.0, min.1), Point::new(max.0, max.1))
    }

    fn close(a: Point, b: Point) -> bool {
        a.distance_to(b) < 1e-9
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("CENTER_ALL".parse::<CopperPolicy>().unwrap(), CopperPolicy::CenterAll);
        assert_eq!(
            "rotate-center-one".parse::<CopperPolicy>().unwrap(),
            CopperPolicy::RotateCenterOne
        );
        assert_eq!(CopperPolicy::RotateCorner.to_string(), "rotate-corner");
        assert!(matches!(
            "sideways".parse::<CopperPolicy>(),
            Err(GeometryError::UnknownPolicy { .. })
        ));
    }

    #[test]
    fn test_center_all() {
        let mut p = TransformPipeline::new(boxed((0.0, 0.0), (30.0, 20.0)), boxed((5.0, 5.0), (25.0, 15.0)));
        p.position_copper(CopperPolicy::CenterAll, Size::new(40.0, 30.0)).unwrap();
        assert!(close(p.composed().apply(Point::new(15.0, 10.0)), Point::new(20.0, 15.0)));
        assert!(close(p.copper().center(), Point::new(20.0, 15.0)));
        assert!(!p.invert_arc());
    }

    #[test]
    fn test_center_width_keeps_y() {
        let mut p = TransformPipeline::new(boxed((0.0, 0.0), (30.0, 20.0)), boxed((5.0, 5.0), (25.0, 15.0)));
        p.position_copper(CopperPolicy::CenterWidth, Size::new(40.0, 30.0)).unwrap();
        assert!(close(p.copper().min, Point::new(10.0, 5.0)));
    }

    #[test]
    fn test_rotate90_stays_in_quadrant() {
        let mut p = TransformPipeline::new(boxed((0.0, 0.0), (40.0, 10.0)), boxed((2.0, 2.0), (38.0, 8.0)));
        p.rotate90(true).unwrap();
        assert!(close(p.board().min, Point::new(0.0, 0.0)));
        assert!(close(p.board().max, Point::new(10.0, 40.0)));
        assert!(p.copper().min.x >= 0.0 && p.copper().min.y >= 0.0);
    }

    #[test]
    fn test_rotate_center_all() {
        let mut p = TransformPipeline::new(boxed((0.0, 0.0), (40.0, 10.0)), boxed((0.0, 0.0), (40.0, 10.0)));
        p.position_copper(CopperPolicy::RotateCenterAll, Size::new(30.0, 60.0)).unwrap();
        assert!(close(p.copper().center(), Point::new(15.0, 30.0)));
        assert!((p.copper().width() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_mirror_tracks_arc_inversion() {
        let stock = Size::new(40.0, 30.0);
        let mut p = TransformPipeline::new(boxed((0.0, 0.0), (10.0, 10.0)), BoundingBox::new());
        p.mirror(stock, true, false).unwrap();
        assert!(p.invert_arc());
        assert!(close(p.composed().apply(Point::new(5.0, 3.0)), Point::new(35.0, 3.0)));

        let mut both = TransformPipeline::new(BoundingBox::new(), BoundingBox::new());
        both.mirror(stock, true, true).unwrap();
        assert!(!both.invert_arc());

        assert!(p.mirror(Size::new(0.0, 10.0), true, false).is_err());
    }

    #[test]
    fn test_order_matters() {
        let stock = Size::new(40.0, 30.0);
        let board = boxed((0.0, 0.0), (20.0, 10.0));
        let mut a = TransformPipeline::new(board, board);
        a.rotate90(true).unwrap().mirror(stock, true, false).unwrap();
        let mut b = TransformPipeline::new(board, board);
        b.mirror(stock, true, false).unwrap().rotate90(true).unwrap();
        let p = Point::new(3.0, 4.0);
        assert!(!close(a.composed().apply(p), b.composed().apply(p)));
    }

    #[test]
    fn test_deskew_is_final() {
        let mut p = TransformPipeline::new(boxed((0.0, 0.0), (10.0, 10.0)), BoundingBox::new());
        let correction = DeskewResult {
            rotation: 0.0,
            offset: Point::new(1.0, 2.0),
        };
        p.deskew(&correction).unwrap();
        assert!(p.is_deskewed());
        assert!(close(p.composed().apply(Point::new(0.0, 0.0)), Point::new(1.0, 2.0)));
        assert!(p.rotate90(true).is_err());
        assert!(p.add_transform(AffineTransform::identity()).is_err());
    }

    #[test]
    fn test_positioning_needs_copper() {
        let mut p = TransformPipeline::new(boxed((0.0, 0.0), (10.0, 10.0)), BoundingBox::new());
        let err = p
            .position_copper(CopperPolicy::CenterAll, Size::new(40.0, 30.0))
            .unwrap_err();
        assert!(err.is_geometry_error());
        assert!(p.position_copper(CopperPolicy::Natural, Size::new(40.0, 30.0)).is_ok());
    }
}
