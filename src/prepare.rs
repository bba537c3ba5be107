//! Project preparation
//!
//! Loads a project's artwork, applies the configured placement and writes
//! the transformed files plus a cache document next to them.

use crate::toolpath::ToolpathGenerator;
use anyhow::{Context, Result};
use pcbmill_camtools::{
    CopperPolicy, DeskewResult, GerberDataset, PreparedOutputs, Project, ProjectCache,
    ProjectCacheDocument, Side, Size, TransformPipeline,
};
use pcbmill_settings::FabricationSettings;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Everything written for one prepared project
#[derive(Debug, Clone)]
pub struct PreparedProject {
    /// Project identifier
    pub id: String,
    /// Transformed artwork
    pub outputs: PreparedOutputs,
    /// Cache document path
    pub cache_file: PathBuf,
    /// Generated toolpath per side
    pub toolpaths: BTreeMap<Side, PathBuf>,
    /// Parse warnings collected while loading
    pub warnings: Vec<String>,
}

/// Build the placement pipeline: mirror, copper placement, then deskew
pub fn build_pipeline(
    dataset: &GerberDataset,
    settings: &FabricationSettings,
    deskew: Option<&DeskewResult>,
) -> Result<TransformPipeline> {
    let stock = Size::new(settings.stock_width, settings.stock_height);
    let policy: CopperPolicy = settings
        .copper_policy
        .parse()
        .with_context(|| format!("bad copper policy '{}'", settings.copper_policy))?;

    let mut pipeline = TransformPipeline::from_dataset(dataset);
    pipeline.mirror(stock, settings.mirror_x, settings.mirror_y)?;
    pipeline.position_copper(policy, stock)?;
    if let Some(result) = deskew {
        pipeline.deskew(result)?;
    }
    Ok(pipeline)
}

/// Prepare `files` for milling into `out_dir`
///
/// Toolpaths are generated for every written side when a generator is given.
/// The cache document is stored in `cache` and saved as `{id}.project.json`.
pub async fn prepare_project<P: AsRef<Path>>(
    files: &[P],
    settings: &FabricationSettings,
    out_dir: &Path,
    deskew: Option<&DeskewResult>,
    generator: Option<&dyn ToolpathGenerator>,
    cache: &ProjectCache,
) -> Result<PreparedProject> {
    let mut project = Project::from_files(files).context("failed to read project files")?;
    let id = project.id().to_string();
    info!("Preparing project '{}'", id);

    let dataset = project.dataset().context("failed to load artwork")?;
    for warning in dataset.warnings() {
        warn!("{}", warning);
    }
    let warnings = dataset.warnings().to_vec();
    let pipeline = build_pipeline(dataset, settings, deskew)?;

    let outputs = pipeline
        .prepare_outputs(&project, out_dir)
        .with_context(|| format!("failed to write outputs to {}", out_dir.display()))?;

    let document = ProjectCacheDocument::from_project(&mut project)?;
    let cache_file = out_dir.join(format!("{}.project.json", id));
    document.save(&cache_file)?;
    cache.store(document);

    let mut toolpaths = BTreeMap::new();
    if let Some(generator) = generator {
        for (side, artwork) in &outputs.files {
            let target = artwork.with_extension("nc");
            generator
                .generate(artwork, &target)
                .await
                .with_context(|| format!("toolpath generation failed for {} side", side))?;
            toolpaths.insert(*side, target);
        }
    }

    info!(
        "Prepared '{}': {} files in {}",
        id,
        outputs.files.len(),
        out_dir.display()
    );
    Ok(PreparedProject {
        id,
        outputs,
        cache_file,
        toolpaths,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcbmill_camtools::Point;

    const COPPER: &str = "%FSLAX46Y46*%\n%MOMM*%\n%ADD10C,2.000000*%\nD10*\nX6000000Y6000000D03*\nX24000000Y14000000D03*\nM02*\n";

    fn dataset(dir: &Path) -> GerberDataset {
        let path = dir.join("board-F_Cu.gbr");
        std::fs::write(&path, COPPER).unwrap();
        GerberDataset::load(&[path]).unwrap()
    }

    #[test]
    fn test_build_pipeline_centers_copper() {
        let dir = tempfile::tempdir().unwrap();
        let settings = FabricationSettings {
            stock_width: 40.0,
            stock_height: 30.0,
            copper_policy: "center_all".to_string(),
            ..Default::default()
        };
        let pipeline = build_pipeline(&dataset(dir.path()), &settings, None).unwrap();
        let center = pipeline.composed().apply(Point::new(15.0, 10.0));
        assert!(center.distance_to(Point::new(20.0, 15.0)) < 1e-9);
        assert!(!pipeline.is_deskewed());
    }

    #[test]
    fn test_build_pipeline_applies_deskew_last() {
        let dir = tempfile::tempdir().unwrap();
        let settings = FabricationSettings::default();
        let shift = DeskewResult {
            rotation: 0.0,
            offset: Point::new(2.0, -1.0),
        };
        let pipeline = build_pipeline(&dataset(dir.path()), &settings, Some(&shift)).unwrap();
        assert!(pipeline.is_deskewed());
        let moved = pipeline.composed().apply(Point::new(5.0, 5.0));
        assert!(moved.distance_to(Point::new(7.0, 4.0)) < 1e-9);
    }

    #[test]
    fn test_build_pipeline_rejects_unknown_policy() {
        let dir = tempfile::tempdir().unwrap();
        let settings = FabricationSettings {
            copper_policy: "sideways".to_string(),
            ..Default::default()
        };
        let err = build_pipeline(&dataset(dir.path()), &settings, None).unwrap_err();
        assert!(err.to_string().contains("sideways"));
    }
}
