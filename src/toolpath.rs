//! External toolpath generation
//!
//! Prepared Gerber and drill files are turned into machine programs by an
//! external tool. The contract is file-in, file-out: the tool reads the
//! input path and must leave its program at the output path.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Placeholder replaced with the input path
pub const INPUT_PLACEHOLDER: &str = "{input}";
/// Placeholder replaced with the output path
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Turns a prepared artwork file into a toolpath file
#[async_trait]
pub trait ToolpathGenerator: Send + Sync {
    /// Produce `output` from `input`
    async fn generate(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Runs an external program
///
/// Arguments may contain `{input}` and `{output}`; when neither appears the
/// two paths are appended in that order.
#[derive(Debug, Clone)]
pub struct ExternalToolpathGenerator {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ExternalToolpathGenerator {
    /// Create a generator running `program` with `args`
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(300),
        }
    }

    /// Split a whitespace-separated command line into program and arguments
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut words = command.split_whitespace();
        let program = words
            .next()
            .context("toolpath command is empty")?;
        Ok(Self::new(program, words.map(str::to_string).collect()))
    }

    /// Give up on the tool after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The program that will be run
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments with placeholders substituted
    pub fn arguments(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.display().to_string();
        let output = output.display().to_string();
        let templated = self
            .args
            .iter()
            .any(|a| a.contains(INPUT_PLACEHOLDER) || a.contains(OUTPUT_PLACEHOLDER));

        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| {
                a.replace(INPUT_PLACEHOLDER, &input)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect();
        if !templated {
            args.push(input);
            args.push(output);
        }
        args
    }
}

#[async_trait]
impl ToolpathGenerator for ExternalToolpathGenerator {
    async fn generate(&self, input: &Path, output: &Path) -> Result<()> {
        let args = self.arguments(input, output);
        debug!("Running {} {:?}", self.program.display(), args);

        let run = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .output();
        let result = tokio::time::timeout(self.timeout, run)
            .await
            .with_context(|| {
                format!(
                    "{} did not finish within {}s",
                    self.program.display(),
                    self.timeout.as_secs()
                )
            })?
            .with_context(|| format!("failed to start {}", self.program.display()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            bail!(
                "{} exited with {}: {}",
                self.program.display(),
                result.status,
                stderr.trim()
            );
        }
        if !output.exists() {
            bail!(
                "{} did not produce {}",
                self.program.display(),
                output.display()
            );
        }

        info!("Generated toolpath {}", output.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments_append_paths_without_placeholders() {
        let tool = ExternalToolpathGenerator::from_command_line("pcb2gcode --metric").unwrap();
        assert_eq!(tool.program(), Path::new("pcb2gcode"));
        assert_eq!(
            tool.arguments(Path::new("a.gbr"), Path::new("a.nc")),
            vec!["--metric", "a.gbr", "a.nc"]
        );
    }

    #[test]
    fn test_arguments_substitute_placeholders() {
        let tool = ExternalToolpathGenerator::new(
            "mill",
            vec!["--front={input}".to_string(), "-o".to_string(), "{output}".to_string()],
        );
        assert_eq!(
            tool.arguments(Path::new("a.gbr"), Path::new("a.nc")),
            vec!["--front=a.gbr", "-o", "a.nc"]
        );
    }

    #[test]
    fn test_empty_command_line() {
        assert!(ExternalToolpathGenerator::from_command_line("   ").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generate_copies_through_shell() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("board-top.gbr");
        let output = dir.path().join("board-top.nc");
        std::fs::write(&input, "G04 test*\n").unwrap();

        let tool = ExternalToolpathGenerator::new("cp", vec![]);
        tool.generate(&input, &output).await.unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "G04 test*\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generate_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ExternalToolpathGenerator::new(
            "sh",
            vec!["-c".to_string(), "echo broken >&2; exit 3".to_string()],
        );
        let err = tool
            .generate(&dir.path().join("in"), &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}
