//! Artifact inspection CLI: inspect | verify
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;

use warmstart::artifact;
use warmstart::snapshot::buffer::{InstructionBuffer, Section};

// ————————————————————————————————————————————————————————————————————————————
// TYPES
// ————————————————————————————————————————————————————————————————————————————

/// inspect and verify warmstart snapshot artifacts
#[derive(Parser, Debug)]
pub struct CommandLineInterface {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// print per-section statement counts for each artifact
    Inspect(InspectOut),
    /// parse each artifact and check symbol ordering
    Verify(VerifyOut),
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// One or more artifacts. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(clap::Parser, Debug)]
struct InspectOut {
    #[command(flatten)]
    input_settings: InputSettings,

    /// print a JSON array instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(clap::Parser, Debug)]
struct VerifyOut {
    #[command(flatten)]
    input_settings: InputSettings,
}

#[derive(Debug, Serialize)]
struct ArtifactSummary {
    path: String,
    allocate: usize,
    fields: usize,
    statics: usize,
    globals: usize,
    symbols: usize,
}

// ————————————————————————————————————————————————————————————————————————————
// IMPLEMENTATION
// ————————————————————————————————————————————————————————————————————————————

impl InputSettings {
    fn paths(&self) -> anyhow::Result<Vec<PathBuf>> {
        resolve_file_path_patterns(&self.input).context("failed to resolve input file paths")
    }
}

impl ArtifactSummary {
    fn new(path: &Path, buffer: &InstructionBuffer) -> Self {
        Self {
            path: path.to_string_lossy().to_string(),
            allocate: buffer.section(Section::Allocation).len(),
            fields: buffer.section(Section::FieldSetup).len(),
            statics: buffer.section(Section::StaticRoots).len(),
            globals: buffer.section(Section::GlobalRoots).len(),
            symbols: buffer.allocations().len(),
        }
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn run(&self) -> anyhow::Result<()> {
        match &self.cmd {
            Command::Inspect(target) => {
                let mut summaries = Vec::new();
                for path in target.input_settings.paths()? {
                    let buffer = artifact::read(&path)
                        .with_context(|| format!("failed to load {}", path.display()))?;
                    summaries.push(ArtifactSummary::new(&path, &buffer));
                }
                if target.json {
                    println!("{}", serde_json::to_string_pretty(&summaries)?);
                    return Ok(());
                }
                for summary in &summaries {
                    println!("{}", summary.path.bold());
                    for (label, count) in [
                        ("allocate", summary.allocate),
                        ("fields", summary.fields),
                        ("statics", summary.statics),
                        ("globals", summary.globals),
                    ] {
                        println!("  {:<10} {}", label.cyan(), count);
                    }
                    println!("  {:<10} {}", "symbols".cyan(), summary.symbols.to_string().yellow());
                }
                Ok(())
            }
            Command::Verify(target) => {
                let mut failed = 0usize;
                for path in target.input_settings.paths()? {
                    let result = artifact::read(&path).and_then(|buffer| artifact::verify(&buffer));
                    match result {
                        Ok(()) => println!("{} {}", "ok".green().bold(), path.display()),
                        Err(error) => {
                            failed += 1;
                            println!("{} {}: {error}", "FAIL".red().bold(), path.display());
                        }
                    }
                }
                if failed > 0 {
                    bail!("{failed} artifact(s) failed verification");
                }
                Ok(())
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// INTERNAL HELPERS
// ————————————————————————————————————————————————————————————————————————————

fn resolve_file_path_patterns<I>(patterns: I) -> anyhow::Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
    }

    let mut out = Vec::<PathBuf>::new();

    for raw in patterns {
        let pattern = raw.as_ref();

        if has_glob_chars(pattern) {
            let mut matched_any = false;
            for entry in glob::glob(pattern)? {
                out.push(entry?);
                matched_any = true;
            }
            if !matched_any {
                bail!("glob pattern matched no files: {pattern}");
            }
        } else {
            out.push(PathBuf::from(pattern));
        }
    }

    Ok(out)
}
