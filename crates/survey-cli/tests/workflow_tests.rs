//! Full CLI runs against a mock provider in a temporary project directory.

#![allow(
    clippy::min_ident_chars,
    clippy::tests_outside_test_module,
    clippy::missing_panics_doc,
    clippy::expect_used,
    clippy::unwrap_used,
    missing_docs,
    reason = "Integration tests have different conventions"
)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use survey_cli::artifacts::load_state;
use survey_cli::{RunOptions, RunOutcome, execute};
use survey_core::{CompletionProvider, Config};
use survey_providers::{MockOutcome, MockProvider};
use tempfile::TempDir;

struct Project {
    dir: TempDir,
    config_path: PathBuf,
}

impl Project {
    fn new(analysis: &str) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let root = dir.path();
        fs::write(
            root.join("responses.csv"),
            "Id,What could we improve?\n1,Parking is impossible\n2,Staff were rude\n3,\n",
        )
        .expect("write csv");
        fs::write(
            root.join("report.hbs"),
            "{{column_title}}: {{response_count}}\n{{#each theme_stats}}{{theme}}={{count}}\n{{/each}}",
        )
        .expect("write template");

        let config = format!(
            "[input]\npath = \"{csv}\"\ncolumn = \"B\"\n\n\
             [api]\napi_key = \"test-key\"\nrate_limit_delay_ms = 0\n\n\
             [cache]\ndir = \"{cache}\"\n\n\
             [output]\nreport_template = \"{template}\"\n\n\
             [analysis]\n{analysis}\n",
            csv = root.join("responses.csv").display(),
            cache = root.join("cache").display(),
            template = root.join("report.hbs").display(),
        );
        let config_path = root.join("survey.toml");
        fs::write(&config_path, config).expect("write config");

        Self { dir, config_path }
    }

    fn config(&self) -> Config {
        Config::load_from_file(&self.config_path).expect("load config")
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    async fn run(&self, provider: &MockProvider, options: RunOptions) -> anyhow::Result<RunOutcome> {
        let shared: Arc<dyn CompletionProvider> = Arc::new(provider.clone());
        execute(&self.config_path, &self.config(), shared, options).await
    }
}

fn provider() -> MockProvider {
    MockProvider::new()
        .with_response("Analyze multiple survey responses", "RESPONSE 1: 1\nRESPONSE 2: 2")
        .with_response("Identify main themes", "- Parking\n- Staff")
        .with_response(
            "Theme: ",
            "SUMMARY:\nPeople mention it.\n\nUNIQUE IDEAS:\nIDEA: do better",
        )
        .with_default_response("Parking and staff dominate.")
}

const THEMED: &str = "themes = [\"Parking\", \"Staff\"]\ntheme_summary_prompt = \"Summarize.\"";

fn exists(path: &Path) -> bool {
    path.is_file()
}

#[tokio::test]
async fn test_missing_themes_runs_identification_only() {
    let project = Project::new("");
    let provider = provider();

    let outcome = project
        .run(&provider, RunOptions::default())
        .await
        .expect("run");

    match outcome {
        RunOutcome::ThemesIdentified { themes, themes_file, usage } => {
            assert_eq!(themes, vec!["Parking", "Staff"]);
            assert_eq!(themes_file, project.path("themes.toml"));
            assert!(usage.total_tokens() > 0);
        }
        other => panic!("expected identification only, got {other:?}"),
    }
    assert_eq!(provider.call_count(), 1);
    let snippet = fs::read_to_string(project.path("themes.toml")).expect("themes file");
    assert!(snippet.contains("themes = [\"Parking\", \"Staff\"]"));
    assert!(!exists(&project.path("survey.state.json")));
}

#[tokio::test]
async fn test_full_run_writes_artefacts_and_reruns_for_free() {
    let project = Project::new(THEMED);
    let provider = provider();

    let outcome = project
        .run(&provider, RunOptions::default())
        .await
        .expect("first run");
    match &outcome {
        RunOutcome::Analyzed { responses, themes, state_file, .. } => {
            assert_eq!(*responses, 2);
            assert_eq!(*themes, 2);
            assert_eq!(*state_file, project.path("survey.state.json"));
        }
        other => panic!("expected a full analysis, got {other:?}"),
    }

    for name in ["survey.state.json", "audit.json", "theme_stats.json", "summary.txt", "report.txt"] {
        assert!(exists(&project.path(name)), "{name} should be written");
    }
    let report = fs::read_to_string(project.path("report.txt")).expect("report");
    assert!(report.starts_with("What could we improve?: 2\n"));
    assert!(report.contains("Parking=1\n"));
    let summary = fs::read_to_string(project.path("summary.txt")).expect("summary");
    assert_eq!(summary, "Parking and staff dominate.");

    let state = load_state(&project.path("survey.state.json")).expect("state");
    assert_eq!(state.response_analyses["R3"].themes, vec!["Staff"]);
    assert_eq!(state.column_title, "What could we improve?");

    let second_provider = crate::provider();
    let rerun = project
        .run(&second_provider, RunOptions::default())
        .await
        .expect("second run");
    assert_eq!(second_provider.call_count(), 0);
    assert!(rerun.usage().cost.abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_identify_flag_wins_over_configured_themes() {
    let project = Project::new(THEMED);
    let provider = provider();

    let outcome = project
        .run(
            &provider,
            RunOptions {
                identify_themes_only: true,
                ..RunOptions::default()
            },
        )
        .await
        .expect("run");

    assert!(matches!(outcome, RunOutcome::ThemesIdentified { .. }));
    assert_eq!(provider.calls_containing("Analyze multiple survey responses"), 0);
}

#[tokio::test]
async fn test_failed_run_leaves_no_state() {
    let project = Project::new(THEMED);
    let provider = provider();
    provider.push_outcome(MockOutcome::Fail {
        status: 400,
        message: "invalid model".to_owned(),
    });

    let outcome = project.run(&provider, RunOptions::default()).await;

    let error = outcome.expect_err("run should fail");
    assert!(format!("{error:#}").contains("invalid model"));
    assert!(!exists(&project.path("survey.state.json")));
    assert!(!exists(&project.path("audit.json")));
}

#[tokio::test]
async fn test_clear_cache_forces_fresh_requests() {
    let project = Project::new(THEMED);
    project
        .run(&provider(), RunOptions::default())
        .await
        .expect("first run");
    fs::remove_file(project.path("survey.state.json")).expect("remove state");

    let provider = provider();
    project
        .run(
            &provider,
            RunOptions {
                clear_cache: true,
                ..RunOptions::default()
            },
        )
        .await
        .expect("second run");

    assert_eq!(provider.calls_containing("Analyze multiple survey responses"), 1);
}
