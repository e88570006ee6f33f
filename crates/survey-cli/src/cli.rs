//! Command-line argument definitions.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for survey-analyzer
#[derive(Debug, Parser)]
#[command(name = "survey-analyzer")]
#[command(about = "Incremental theme analysis of free-text survey responses", long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Enable debug logging for every survey crate
    #[arg(short, long)]
    pub verbose: bool,

    /// Only identify themes and write them to themes.toml
    #[arg(long)]
    pub identify_themes_only: bool,

    /// Delete every cached completion before running
    #[arg(long)]
    pub clear_cache: bool,
}

#[cfg(test)]
#[allow(
    clippy::assertions_on_result_states,
    reason = "Test code is allowed to use unwrap and has different conventions"
)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "survey-analyzer",
            "--config",
            "survey.toml",
            "--identify-themes-only",
            "-v",
        ]);
        match cli {
            Ok(cli) => {
                assert_eq!(cli.config, PathBuf::from("survey.toml"));
                assert!(cli.identify_themes_only);
                assert!(cli.verbose);
                assert!(!cli.clear_cache);
            }
            Err(error) => panic!("failed to parse arguments: {error}"),
        }
    }

    #[test]
    fn test_config_is_required() {
        assert!(Cli::try_parse_from(["survey-analyzer", "--clear-cache"]).is_err());
    }
}
