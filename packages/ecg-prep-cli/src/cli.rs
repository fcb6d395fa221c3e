use clap::{Args, Parser, Subcommand};
use ecg_prep::Step;

#[derive(Parser)]
#[command(
    name = "ecgprep",
    version,
    about = "ECG window preparation pipeline",
    long_about = "Turn raw WFDB/EDF ECG recordings into bandpassed, resampled, z-scored\n\
                  fixed-length windows with index tables for normal vs. AF classification.\n\
                  Reads data/records_{normal,af}.csv and configs/base.yaml under --root."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run pipeline steps in order (all steps by default)
    Run(RunArgs),
    /// Filter, resample and normalize every recording
    Interim(ProjectArgs),
    /// Slice interim arrays into fixed-length windows
    Window(ProjectArgs),
    /// Write the shuffled metadata table
    Metadata(ProjectArgs),
    /// Validate a configuration file
    Validate(ValidateArgs),
    /// List pipeline steps
    Steps(StepsArgs),
}

/// Where the project lives and how to report
#[derive(Args, Clone)]
pub struct ProjectArgs {
    /// Project root holding configs/ and data/
    #[arg(long, env = "ECGPREP_ROOT", default_value = ".")]
    pub root: String,

    /// Configuration file (default: <root>/configs/base.yaml)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Print step reports as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<String>,
}

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Steps to run; always executed in canonical order
    #[arg(long, num_args = 1.., value_parser = parse_step)]
    pub steps: Vec<Step>,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Project root holding configs/
    #[arg(long, env = "ECGPREP_ROOT", default_value = ".")]
    pub root: String,

    /// Configuration file (default: <root>/configs/base.yaml)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct StepsArgs {
    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

/// Parse a step name ("interim", "window", "metadata")
pub fn parse_step(s: &str) -> Result<Step, String> {
    s.trim().parse::<Step>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_parse_step_valid() {
        assert_eq!(parse_step("interim").unwrap(), Step::Interim);
        assert_eq!(parse_step(" metadata ").unwrap(), Step::Metadata);
    }

    #[test]
    fn test_parse_step_invalid() {
        assert!(parse_step("00_extract").is_err());
        assert!(parse_step("").is_err());
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_steps_parsed() {
        let cli = Cli::try_parse_from(["ecgprep", "run", "--steps", "window", "interim"]).unwrap();
        match cli.command {
            Command::Run(args) => assert_eq!(args.steps, vec![Step::Window, Step::Interim]),
            _ => panic!("expected run"),
        }
    }
}
