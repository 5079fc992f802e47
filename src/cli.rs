//! Command-line arguments of the `checklist-crawler` binary.

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::RunId;

pub const USAGE: &str = "usage: checklist-crawler <phase1|phase2|both|all-areas> \
[--area AREA] [--full] [--run-id ID] [--config PATH]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    PhaseOne,
    PhaseTwo,
    Both,
    AllAreas,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub command: Command,
    pub area: Option<String>,
    /// Phase 2 re-checks everything, not only unapproved items
    pub full: bool,
    pub run_id: Option<RunId>,
    pub config: Option<PathBuf>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CliError {
    #[error("missing command")]
    MissingCommand,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("missing value for {0}")]
    MissingValue(&'static str),
    #[error("unknown argument: {0}")]
    UnknownArgument(String),
    #[error("--area is required for {0}")]
    AreaRequired(&'static str),
}

impl CliArgs {
    pub fn parse<I>(args: I) -> Result<Self, CliError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let command = match args.next().as_deref() {
            None => return Err(CliError::MissingCommand),
            Some("phase1") => Command::PhaseOne,
            Some("phase2") => Command::PhaseTwo,
            Some("both") => Command::Both,
            Some("all-areas") => Command::AllAreas,
            Some(other) => return Err(CliError::UnknownCommand(other.to_string())),
        };

        let mut parsed = Self {
            command,
            area: None,
            full: false,
            run_id: None,
            config: None,
        };
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--area" | "-a" => {
                    let v = args.next().ok_or(CliError::MissingValue("--area"))?;
                    parsed.area = Some(v.to_ascii_uppercase());
                }
                "--full" => parsed.full = true,
                "--run-id" => parsed.run_id = Some(args.next().ok_or(CliError::MissingValue("--run-id"))?.into()),
                "--config" | "-c" => {
                    parsed.config = Some(PathBuf::from(args.next().ok_or(CliError::MissingValue("--config"))?));
                }
                other => return Err(CliError::UnknownArgument(other.to_string())),
            }
        }

        let name = match parsed.command {
            Command::PhaseOne => "phase1",
            Command::PhaseTwo => "phase2",
            Command::Both => "both",
            Command::AllAreas => return Ok(parsed),
        };
        if parsed.area.is_none() {
            return Err(CliError::AreaRequired(name));
        }
        Ok(parsed)
    }
}
