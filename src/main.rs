//! PCBMill command line
//!
//! Prepares Gerber/drill artwork for the mill and drives drilling through
//! the local controller bridge.

use anyhow::{bail, Context, Result};
use clap::Parser;
use pcbmill::camtools::{DeskewResult, GerberDataset, Hole, Point, ProjectCache};
use pcbmill::communication::{CancelFlag, MachineSession};
use pcbmill::settings::{default_config_path, Config};
use pcbmill::{
    build_pipeline, init_logging, prepare_project, session_config_from, DrillParams,
    ExternalToolpathGenerator, FabricationOrchestrator, ToolpathGenerator,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON or TOML)
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Command to execute
    #[clap(subcommand)]
    cmd: Option<Command>,
}

#[derive(clap::Args, Debug)]
struct Placement {
    /// Copper placement policy (natural, center-width, center-all, rotate-corner, ...)
    #[clap(long)]
    policy: Option<String>,

    /// Stock width, mm
    #[clap(long)]
    stock_width: Option<f64>,

    /// Stock height, mm
    #[clap(long)]
    stock_height: Option<f64>,

    /// Mirror about the vertical center line
    #[clap(long)]
    mirror_x: bool,

    /// Mirror about the horizontal center line
    #[clap(long)]
    mirror_y: bool,

    /// Alignment points `x,y` in order: nominal A, nominal B, measured A, measured B
    #[clap(long, num_args = 4, value_parser = parse_point)]
    deskew: Option<Vec<Point>>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Transform artwork for the stock and write it out
    Prepare {
        /// Gerber and drill files of one board
        #[clap(required = true)]
        files: Vec<PathBuf>,

        /// Output directory
        #[clap(long, short)]
        out: Option<PathBuf>,

        /// External toolpath generator command line
        #[clap(long)]
        toolpath: Option<String>,

        #[clap(flatten)]
        placement: Placement,
    },
    /// Print what was found in the artwork
    Inspect {
        /// Gerber and drill files of one board
        #[clap(required = true)]
        files: Vec<PathBuf>,

        /// Print JSON instead of text
        #[clap(long)]
        json: bool,
    },
    /// Drill the holes of a board through the bridge
    Drill {
        /// Gerber and drill files of one board
        #[clap(required = true)]
        files: Vec<PathBuf>,

        /// Drill depth below work zero, mm
        #[clap(long, default_value_t = 1.8)]
        depth: f64,

        /// Plunge feed, mm/min
        #[clap(long, default_value_t = 60.0)]
        feed: f64,

        #[clap(flatten)]
        placement: Placement,
    },
}

fn parse_point(s: &str) -> Result<Point, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got '{}'", s))?;
    let x: f64 = x.trim().parse().map_err(|e| format!("bad x in '{}': {}", s, e))?;
    let y: f64 = y.trim().parse().map_err(|e| format!("bad y in '{}': {}", s, e))?;
    Ok(Point::new(x, y))
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from_file(&path)?,
        None => match default_config_path() {
            Ok(path) => Config::load_or_default(&path)?,
            Err(e) => {
                warn!("{}; using defaults", e);
                Config::default()
            }
        },
    };
    Ok(config)
}

impl Placement {
    fn apply(&self, config: &mut Config) {
        let f = &mut config.fabrication;
        if let Some(policy) = &self.policy {
            f.copper_policy = policy.clone();
        }
        if let Some(width) = self.stock_width {
            f.stock_width = width;
        }
        if let Some(height) = self.stock_height {
            f.stock_height = height;
        }
        f.mirror_x |= self.mirror_x;
        f.mirror_y |= self.mirror_y;
    }

    fn deskew(&self) -> Result<Option<DeskewResult>> {
        match self.deskew.as_deref() {
            Some([a0, b0, a1, b1]) => Ok(Some(pcbmill::camtools::deskew(*a0, *b0, *a1, *b1)?)),
            Some(_) => bail!("--deskew takes exactly four points"),
            None => Ok(None),
        }
    }
}

async fn prepare(
    mut config: Config,
    files: Vec<PathBuf>,
    out: Option<PathBuf>,
    toolpath: Option<String>,
    placement: Placement,
) -> Result<()> {
    placement.apply(&mut config);
    config.validate()?;
    let deskew = placement.deskew()?;

    let out_dir = out.unwrap_or_else(|| config.fabrication.output_dir.clone());
    let generator = toolpath
        .or_else(|| config.fabrication.toolpath_command.clone())
        .map(|command| ExternalToolpathGenerator::from_command_line(&command))
        .transpose()?;

    let cache = ProjectCache::new();
    let prepared = prepare_project(
        &files,
        &config.fabrication,
        &out_dir,
        deskew.as_ref(),
        generator.as_ref().map(|g| g as &dyn ToolpathGenerator),
        &cache,
    )
    .await?;

    for (side, path) in &prepared.outputs.files {
        println!("{:<6} {}", side.to_string(), path.display());
    }
    for (side, path) in &prepared.toolpaths {
        println!("{:<6} {} (toolpath)", side.to_string(), path.display());
    }
    println!("cache  {}", prepared.cache_file.display());
    Ok(())
}

fn inspect(files: Vec<PathBuf>, json: bool) -> Result<()> {
    let dataset = GerberDataset::load(&files)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&dataset)?);
        return Ok(());
    }

    for file in dataset.files() {
        println!("{:<14} {}", file.kind.to_string(), file.path.display());
    }
    match dataset.render_summary() {
        Some(summary) => println!(
            "board          {:.3} x {:.3} {}",
            summary.width, summary.height, summary.units
        ),
        None => println!("board          unknown"),
    }
    if let Some(copper) = dataset.copper().both.as_valid() {
        let size = copper.size();
        println!("copper         {:.3} x {:.3}", size.width, size.height);
    }
    println!("tools          {}", dataset.tools().len());
    println!("holes          {}", dataset.holes().len());
    if dataset.has_synthesized_corners() {
        println!("corners        synthesized from artwork extent");
    }
    for warning in dataset.warnings() {
        println!("warning        {}", warning);
    }
    Ok(())
}

async fn drill(
    mut config: Config,
    files: Vec<PathBuf>,
    params: DrillParams,
    placement: Placement,
) -> Result<()> {
    placement.apply(&mut config);
    config.validate()?;
    let deskew = placement.deskew()?;

    let dataset = GerberDataset::load(&files)?;
    let pipeline = build_pipeline(&dataset, &config.fabrication, deskew.as_ref())?;
    let matrix = pipeline.composed();
    let holes: Vec<Hole> = dataset
        .holes()
        .iter()
        .map(|hole| Hole {
            coord: matrix.apply(hole.coord),
            ..hole.clone()
        })
        .collect();
    if holes.is_empty() {
        bail!("no holes found in {} files", files.len());
    }

    let session = MachineSession::new(session_config_from(&config.machine));
    let address = config.bridge.address();
    session
        .connect_tcp(
            &address,
            Duration::from_millis(config.bridge.connect_timeout_ms),
        )
        .await
        .with_context(|| format!("failed to connect to bridge at {}", address))?;
    session
        .until_true(
            "first controller report",
            |s| s.active_state().is_some(),
            None,
            session.config().state_timeout,
        )
        .await?;

    let cancel = CancelFlag::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current hole");
            on_interrupt.cancel();
        }
    });

    let orchestrator = FabricationOrchestrator::new(session.clone(), &config.machine);
    let result = orchestrator.drill_holes(&holes, &params, &cancel).await;
    if let Err(e) = session.close().await {
        warn!("Closing the bridge connection failed: {}", e);
    }
    let report = result?;
    info!("Drilled {} of {} holes", report.drilled, report.total);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let args = Args::parse();
    let config = load_config(args.config)?;

    match args.cmd {
        Some(Command::Prepare {
            files,
            out,
            toolpath,
            placement,
        }) => prepare(config, files, out, toolpath, placement).await,
        Some(Command::Inspect { files, json }) => inspect(files, json),
        Some(Command::Drill {
            files,
            depth,
            feed,
            placement,
        }) => {
            let params = DrillParams {
                depth,
                plunge_feed: feed,
            };
            drill(config, files, params, placement).await
        }
        None => {
            println!(
                "PCBMill {} (built {}). Use --help for usage.",
                pcbmill::VERSION,
                pcbmill::BUILD_DATE
            );
            Ok(())
        }
    }
}
