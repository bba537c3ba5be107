//! Fabrication project: one board's set of artwork files
//!
//! A project maps logical sides to files, derives a stable identifier from
//! the file names, and loads its [`GerberDataset`] only when first needed.

use crate::error::{CamToolError, CamToolResult, FileFormatError};
use crate::geometry::{BoundingBox, Size};
use crate::gerber::{classify_file, FileKind, GerberDataset};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pcbmill_core::{GeometryError, Units};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Identifier used when file names share no prefix
const FALLBACK_ID: &str = "project";

/// Logical side of a board
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Component side copper
    Top,
    /// Solder side copper
    Bottom,
    /// Drill file
    Drill,
}

impl Side {
    /// All sides in output order
    pub const ALL: [Side; 3] = [Side::Top, Side::Bottom, Side::Drill];

    /// Side holding files of this kind; outlines have none
    pub fn for_kind(kind: FileKind) -> Option<Side> {
        match kind {
            FileKind::CopperTop => Some(Side::Top),
            FileKind::CopperBottom => Some(Side::Bottom),
            FileKind::Drill => Some(Side::Drill),
            FileKind::Outline => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Top => write!(f, "top"),
            Side::Bottom => write!(f, "bottom"),
            Side::Drill => write!(f, "drill"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top" => Ok(Side::Top),
            "bottom" => Ok(Side::Bottom),
            "drill" => Ok(Side::Drill),
            _ => Err(format!("Unknown side: {}", s)),
        }
    }
}

/// Longest common prefix of the file stems, trimmed of separators
pub fn derive_project_id<P: AsRef<Path>>(paths: &[P]) -> String {
    let stems: Vec<String> = paths
        .iter()
        .filter_map(|p| p.as_ref().file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .collect();

    let Some(first) = stems.first() else {
        return FALLBACK_ID.to_string();
    };

    let mut len = first.len();
    for stem in &stems[1..] {
        len = first
            .char_indices()
            .zip(stem.chars())
            .take_while(|((_, a), b)| a == b)
            .last()
            .map_or(0, |((i, a), _)| i + a.len_utf8())
            .min(len);
    }

    let id = first[..len].trim_end_matches(['-', '_', '.', ' ']);
    if id.is_empty() {
        FALLBACK_ID.to_string()
    } else {
        id.to_string()
    }
}

/// One board's artwork
#[derive(Debug, Clone)]
pub struct Project {
    id: String,
    sides: BTreeMap<Side, PathBuf>,
    outline: Option<PathBuf>,
    files: Vec<PathBuf>,
    declared_size: Option<Size>,
    derived_size: Option<Size>,
    dataset: Option<GerberDataset>,
}

impl Project {
    /// Build a project from artwork files, classifying each by name or content
    ///
    /// Unrecognised files are kept for the dataset load, which reports them.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> CamToolResult<Self> {
        let mut sides = BTreeMap::new();
        let mut outline = None;
        let mut files = Vec::with_capacity(paths.len());

        for path in paths {
            let path = path.as_ref().to_path_buf();
            let kind = classify_file(&path).map_err(|source| CamToolError::LoadError {
                path: path.clone(),
                source,
            })?;
            match kind.map(|k| (k, Side::for_kind(k))) {
                Some((_, Some(side))) => {
                    if let Some(previous) = sides.insert(side, path.clone()) {
                        warn!(
                            "{} replaces {} as the {} file",
                            path.display(),
                            previous.display(),
                            side
                        );
                    }
                }
                Some((FileKind::Outline, None)) => outline = Some(path.clone()),
                _ => debug!("{} has no side", path.display()),
            }
            files.push(path);
        }

        let id = derive_project_id(&files);
        info!("Project '{}' with {} files", id, files.len());
        Ok(Self {
            id,
            sides,
            outline,
            files,
            declared_size: None,
            derived_size: None,
            dataset: None,
        })
    }

    /// Use an identifier from job metadata instead of the file names
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Board size known up front, skipping derivation
    pub fn with_declared_size(mut self, size: Size) -> Self {
        self.declared_size = Some(size);
        self
    }

    /// Project identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// File for a side
    pub fn side(&self, side: Side) -> Option<&Path> {
        self.sides.get(&side).map(PathBuf::as_path)
    }

    /// File for a side, or an error naming the missing side
    pub fn require_side(&self, side: Side) -> CamToolResult<&Path> {
        self.side(side)
            .ok_or_else(|| FileFormatError::MissingSide(side.to_string()).into())
    }

    /// All side mappings
    pub fn sides(&self) -> &BTreeMap<Side, PathBuf> {
        &self.sides
    }

    /// Outline file, if one was supplied
    pub fn outline(&self) -> Option<&Path> {
        self.outline.as_deref()
    }

    /// Every file in the project, in the order given
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Declared board size
    pub fn declared_size(&self) -> Option<Size> {
        self.declared_size
    }

    /// Parsed artwork, loaded on first use
    pub fn dataset(&mut self) -> CamToolResult<&GerberDataset> {
        if self.dataset.is_none() {
            let dataset = GerberDataset::load(&self.files)?;
            self.dataset = Some(dataset);
        }
        self.dataset
            .as_ref()
            .ok_or_else(|| CamToolError::InvalidParameters("dataset unavailable".to_string()))
    }

    /// Dataset if it has already been loaded
    pub fn loaded_dataset(&self) -> Option<&GerberDataset> {
        self.dataset.as_ref()
    }

    /// Board size: declared, else derived from the board box once and cached
    pub fn size(&mut self) -> CamToolResult<Size> {
        if let Some(size) = self.declared_size.or(self.derived_size) {
            return Ok(size);
        }
        let board = *self.dataset()?.corners_box();
        let size = board
            .as_valid()
            .map(BoundingBox::size)
            .ok_or_else(|| GeometryError::InvalidSize {
                reason: format!("project '{}' has no coordinates", self.id),
            })?;
        debug!("Project '{}' derived size {}x{}", self.id, size.width, size.height);
        self.derived_size = Some(size);
        Ok(size)
    }
}

/// Persisted summary of a prepared project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectCacheDocument {
    /// Project identifier
    pub id: String,
    /// Side to file mapping
    pub files: BTreeMap<Side, PathBuf>,
    /// Outline file
    pub outline: Option<PathBuf>,
    /// Drill file reference
    pub drill_file: Option<PathBuf>,
    /// Units of the dataset
    pub units: Option<Units>,
    /// Board box
    pub board: Option<BoundingBox>,
    /// Copper box of both sides
    pub copper: Option<BoundingBox>,
    /// Drill box
    pub drill: Option<BoundingBox>,
    /// When the document was written
    pub saved_at: DateTime<Utc>,
}

impl ProjectCacheDocument {
    /// Summarise a project, loading its dataset if needed
    pub fn from_project(project: &mut Project) -> CamToolResult<Self> {
        let id = project.id().to_string();
        let files = project.sides().clone();
        let outline = project.outline().map(Path::to_path_buf);
        let drill_file = project.side(Side::Drill).map(Path::to_path_buf);
        let dataset = project.dataset()?;
        Ok(Self {
            id,
            files,
            outline,
            drill_file,
            units: dataset.units(),
            board: dataset.corners_box().as_valid().copied(),
            copper: dataset.copper().both.as_valid().copied(),
            drill: dataset.drill().as_valid().copied(),
            saved_at: Utc::now(),
        })
    }

    /// Write as pretty JSON
    pub fn save(&self, path: &Path) -> CamToolResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        debug!("Saved project cache for '{}' to {}", self.id, path.display());
        Ok(())
    }

    /// Read a document written by [`save`](Self::save)
    pub fn load(path: &Path) -> CamToolResult<Self> {
        let json = fs::read_to_string(path).map_err(|source| CamToolError::LoadError {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Most recently prepared project
///
/// Holds a single entry. Concurrent preparations are not ordered against
/// each other; the lock only keeps access memory safe.
#[derive(Debug, Default)]
pub struct ProjectCache {
    entry: Mutex<Option<ProjectCacheDocument>>,
}

impl ProjectCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached entry
    pub fn store(&self, document: ProjectCacheDocument) {
        debug!("Caching project '{}'", document.id);
        *self.entry.lock() = Some(document);
    }

    /// Cached document when it belongs to `id`
    pub fn get(&self, id: &str) -> Option<ProjectCacheDocument> {
        self.entry.lock().as_ref().filter(|d| d.id == id).cloned()
    }

    /// Identifier of the cached project
    pub fn current_id(&self) -> Option<String> {
        self.entry.lock().as_ref().map(|d| d.id.clone())
    }

    /// Drop the cached entry
    pub fn clear(&self) {
        *self.entry.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_project_id() {
        assert_eq!(
            derive_project_id(&["board-F_Cu.gbr", "board-B_Cu.gbr", "board.drl"]),
            "board"
        );
        assert_eq!(derive_project_id(&["amp_v2-top.gtl", "amp_v2-bottom.gbl"]), "amp_v2");
        assert_eq!(derive_project_id(&["top.gbr", "bottom.gbr"]), FALLBACK_ID);
        assert_eq!(derive_project_id(&["solo.gbr"]), "solo");
        assert_eq!(derive_project_id::<&str>(&[]), FALLBACK_ID);
    }

    #[test]
    fn test_side_parse() {
        assert_eq!("Top".parse::<Side>().unwrap(), Side::Top);
        assert_eq!(Side::Drill.to_string(), "drill");
        assert!("left".parse::<Side>().is_err());
        assert_eq!(Side::for_kind(FileKind::Outline), None);
    }

    #[test]
    fn test_project_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let top = dir.path().join("blinky-F_Cu.gbr");
        let drill = dir.path().join("blinky.drl");
        let edge = dir.path().join("blinky-Edge_Cuts.gbr");
        fs::write(&top, "%FSLAX46Y46*%\n%ADD10C,2.0*%\nD10*\nX6000000Y6000000D03*\nM02*\n").unwrap();
        fs::write(&drill, "M48\nMETRIC\nT1C0.8\n%\nT1\nX10.0Y10.0\nM30\n").unwrap();
        fs::write(&edge, "%FSLAX46Y46*%\nX0Y0D02*\nX40000000Y0D01*\nX40000000Y30000000D01*\nM02*\n").unwrap();

        let mut project = Project::from_files(&[&top, &drill, &edge]).unwrap();
        assert_eq!(project.id(), "blinky");
        assert_eq!(project.side(Side::Top), Some(top.as_path()));
        assert_eq!(project.side(Side::Drill), Some(drill.as_path()));
        assert!(project.side(Side::Bottom).is_none());
        assert!(project.require_side(Side::Bottom).is_err());
        assert_eq!(project.outline(), Some(edge.as_path()));

        assert!(project.loaded_dataset().is_none());
        assert_eq!(project.size().unwrap(), Size::new(40.0, 30.0));
        assert!(project.loaded_dataset().is_some());
    }

    #[test]
    fn test_declared_size_skips_load() {
        let mut project = Project::from_files(&["x-F_Cu.gbr"])
            .unwrap()
            .with_declared_size(Size::new(50.0, 20.0))
            .with_id("job-17");
        assert_eq!(project.size().unwrap(), Size::new(50.0, 20.0));
        assert_eq!(project.id(), "job-17");
        assert!(project.loaded_dataset().is_none());
    }

    #[test]
    fn test_cache_document_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let drill = dir.path().join("p.drl");
        fs::write(&drill, "M48\nMETRIC\nT1C0.8\n%\nT1\nX10.0Y10.0\nX20.0\nM30\n").unwrap();
        let mut project = Project::from_files(&[&drill]).unwrap();

        let doc = ProjectCacheDocument::from_project(&mut project).unwrap();
        assert_eq!(doc.drill_file.as_deref(), Some(drill.as_path()));
        assert!(doc.copper.is_none());
        assert_eq!(doc.units, Some(Units::Millimeters));

        let path = dir.path().join("cache.json");
        doc.save(&path).unwrap();
        let loaded = ProjectCacheDocument::load(&path).unwrap();
        assert_eq!(loaded, doc);

        let cache = ProjectCache::new();
        cache.store(loaded);
        assert!(cache.get("p").is_some());
        assert!(cache.get("other").is_none());
        cache.clear();
        assert!(cache.current_id().is_none());
    }
}
