//! survey-analyzer - incremental theme analysis of survey responses

use anyhow::Result;
use clap::Parser as _;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};

use survey_cli::{Cli, RunOptions, RunOutcome};

const DEFAULT_FILTER: &str = "survey_analysis=info,survey_cli=info";
const VERBOSE_FILTER: &str =
    "survey_core=debug,survey_providers=debug,survey_analysis=debug,survey_cli=debug";

fn init_tracing(verbose: bool) {
    let fallback = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()))
        .with(fmt::layer().with_target(false))
        .init();
}

#[allow(clippy::print_stdout, reason = "Results are printed for the operator")]
fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::ThemesIdentified {
            themes,
            themes_file,
            ..
        } => {
            println!("Identified themes:");
            for (index, theme) in themes.iter().enumerate() {
                println!("{}. {theme}", index + 1);
            }
            println!(
                "\nThemes saved to {}. Add them to your configuration and run again.",
                themes_file.display()
            );
        }
        RunOutcome::Analyzed {
            state_file,
            responses,
            themes,
            ..
        } => {
            println!(
                "Analyzed {responses} responses across {themes} themes; state saved to {}",
                state_file.display()
            );
        }
    }

    let usage = outcome.usage();
    println!("Total tokens used: {}", usage.total_tokens());
    println!("Total cost: ${:.4}", usage.cost);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let options = RunOptions {
        identify_themes_only: cli.identify_themes_only,
        clear_cache: cli.clear_cache,
    };
    let outcome = survey_cli::run(&cli.config, options).await?;
    print_outcome(&outcome);

    Ok(())
}
