//! CLI command implementations.

pub mod generate;

use anyhow::{Context, Result};
use clap::Args;
use jobgraph_config::load_root;
use jobgraph_core::{ChangeDetector, HistoryIndex, RefProtection, RunParameters, TriggerKind};
use jobgraph_engine::{
    GitChangeDetector, Generator, HttpHistoryIndex, NoHistory, Registry, StaticChangeSet,
    StaticHistoryIndex,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

/// Commit message marker that turns a push pipeline into a no-op.
const DONTBUILD: &str = "DONTBUILD";

/// Run parameters and collaborators, from flags or the CI environment.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Read the run parameters from a JSON file instead of flags
    #[arg(long, env = "JOBGRAPH_PARAMETERS")]
    pub parameters: Option<PathBuf>,

    #[arg(long, env = "CI_MERGE_REQUEST_PROJECT_URL", default_value = "")]
    pub base_repository: String,

    #[arg(long, env = "CI_PROJECT_URL", default_value = "")]
    pub head_repository: String,

    /// Revision to diff against
    #[arg(long, env = "CI_COMMIT_BEFORE_SHA", default_value = "")]
    pub base_rev: String,

    #[arg(long, env = "CI_COMMIT_SHA", default_value = "")]
    pub head_rev: String,

    #[arg(long, env = "CI_COMMIT_REF_NAME", default_value = "")]
    pub head_ref: String,

    #[arg(long, env = "CI_COMMIT_TAG", default_value = "")]
    pub head_tag: String,

    /// `protected`/`unprotected` (or `true`/`false`)
    #[arg(long, env = "CI_COMMIT_REF_PROTECTED", default_value = "protected")]
    pub head_ref_protection: RefProtection,

    #[arg(long, env = "CI_PIPELINE_SOURCE", default_value = "push")]
    pub pipeline_source: TriggerKind,

    /// Target method: all, names, changed, default or nothing
    #[arg(long = "target-method", env = "JOBGRAPH_TARGET_METHOD", default_value = "default")]
    pub target_jobs_method: String,

    /// Job id for the `names` method; repeatable
    #[arg(long = "target-job", value_delimiter = ',')]
    pub target_jobs: Vec<String>,

    /// Always run target jobs instead of replacing them
    #[arg(long)]
    pub no_optimize_targets: bool,

    /// Job id that must not be replaced; repeatable
    #[arg(long, value_delimiter = ',')]
    pub do_not_optimize: Vec<String>,

    #[arg(long, env = "GITLAB_USER_LOGIN", default_value = "nobody")]
    pub owner: String,

    /// Build date as a Unix timestamp; defaults to now
    #[arg(long, env = "SOURCE_DATE_EPOCH")]
    pub build_date: Option<i64>,

    #[arg(long, env = "CI_COMMIT_MESSAGE", default_value = "")]
    pub commit_message: String,

    /// Git checkout used for change detection
    #[arg(long, env = "JOBGRAPH_REPOSITORY", default_value = ".")]
    pub repository: PathBuf,

    /// File listing changed paths, one per line, instead of asking git
    #[arg(long)]
    pub changes_file: Option<PathBuf>,

    /// History index base URL; overrides config.kdl
    #[arg(long, env = "JOBGRAPH_HISTORY_URL")]
    pub history_url: Option<Url>,

    /// Static history index (JSON object of digest or job id to reference)
    #[arg(long, conflicts_with = "history_url")]
    pub history_file: Option<PathBuf>,

    #[arg(long, default_value_t = 10)]
    pub history_timeout_secs: u64,
}

impl RunArgs {
    pub fn run_parameters(&self) -> Result<RunParameters> {
        if let Some(path) = &self.parameters {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read parameters: {}", path.display()))?;
            return RunParameters::from_json(&text)
                .with_context(|| format!("Invalid parameters in {}", path.display()));
        }

        let mut target_jobs_method = self.target_jobs_method.clone();
        if self.pipeline_source == TriggerKind::Push && self.commit_message.contains(DONTBUILD) {
            info!("Commit message contains {}, selecting no targets", DONTBUILD);
            target_jobs_method = "nothing".to_string();
        }

        let build_date = self
            .build_date
            .unwrap_or_else(|| chrono::Utc::now().timestamp());

        let params = RunParameters {
            base_repository: self.base_repository.clone(),
            head_repository: self.head_repository.clone(),
            base_rev: self.base_rev.clone(),
            head_rev: self.head_rev.clone(),
            head_ref: self.head_ref.clone(),
            head_tag: self.head_tag.clone(),
            head_ref_protection: self.head_ref_protection,
            pipeline_source: self.pipeline_source,
            target_jobs_method,
            target_jobs: self.target_jobs.clone(),
            optimize_target_jobs: !self.no_optimize_targets,
            do_not_optimize: self.do_not_optimize.clone(),
            owner: self.owner.clone(),
            build_date,
        };
        params.check().context("Invalid run parameters")?;
        Ok(params)
    }

    fn change_detector(&self) -> Result<Arc<dyn ChangeDetector>> {
        let detector: Arc<dyn ChangeDetector> = match &self.changes_file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read changes: {}", path.display()))?;
                Arc::new(StaticChangeSet::new(
                    text.lines().map(str::trim).filter(|l| !l.is_empty()),
                ))
            }
            None => Arc::new(GitChangeDetector::new(&self.repository)),
        };
        Ok(detector)
    }

    fn history_index(&self, configured: Option<&Url>) -> Result<Arc<dyn HistoryIndex>> {
        if let Some(path) = &self.history_file {
            let index = StaticHistoryIndex::load(path)
                .with_context(|| format!("Failed to load history: {}", path.display()))?;
            return Ok(Arc::new(index));
        }
        match self.history_url.as_ref().or(configured) {
            Some(url) => {
                let index = HttpHistoryIndex::new(
                    url.clone(),
                    Duration::from_secs(self.history_timeout_secs),
                )
                .context("Failed to create history client")?;
                Ok(Arc::new(index))
            }
            None => Ok(Arc::new(NoHistory)),
        }
    }

    pub fn generator(&self, root: &Path) -> Result<Generator> {
        let config = load_root(root)
            .with_context(|| format!("Failed to load configuration from {}", root.display()))?;
        let changes = self.change_detector()?;
        let history = self.history_index(config.graph.history_url.as_ref())?;
        Ok(Generator::new(config, Registry::builtin(), changes, history))
    }
}

/// Load every stage and assemble the full graph without selecting anything.
pub async fn validate(root: &Path, args: &RunArgs) -> Result<()> {
    let params = args.run_parameters()?;
    let generator = args.generator(root)?;
    let graph = generator
        .full_graph(&params)
        .await
        .context("Configuration is invalid")?;

    println!(
        "Configuration is valid: {} stages, {} jobs, {} dependencies",
        generator.root().stages.len(),
        graph.len(),
        graph.edge_count()
    );
    println!(
        "Target methods: {}",
        generator.registry().target_names().collect::<Vec<_>>().join(", ")
    );
    Ok(())
}

pub fn parameters(args: &RunArgs) -> Result<()> {
    let params = args.run_parameters()?;
    println!("{}", params.to_json()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        run: RunArgs,
    }

    fn parse(args: &[&str]) -> RunArgs {
        let argv = std::iter::once("jobgraph").chain(args.iter().copied());
        TestCli::try_parse_from(argv).unwrap().run
    }

    #[test]
    fn test_flags_to_parameters() {
        let args = parse(&[
            "--head-rev",
            "abc123",
            "--head-ref",
            "main",
            "--pipeline-source",
            "web",
            "--head-ref-protection",
            "false",
            "--target-method",
            "names",
            "--target-job",
            "test/unit,build/compile",
            "--build-date",
            "1700000000",
            "--commit-message",
            "",
        ]);
        let params = args.run_parameters().unwrap();
        assert_eq!(params.pipeline_source, TriggerKind::Web);
        assert_eq!(params.head_ref_protection, RefProtection::Unprotected);
        assert_eq!(params.target_jobs, vec!["test/unit", "build/compile"]);
        assert_eq!(params.build_date, 1_700_000_000);
        assert!(params.optimize_target_jobs);
    }

    #[test]
    fn test_build_date_defaults_to_now() {
        let args = parse(&["--head-rev", "abc123", "--target-method", "all"]);
        let before = chrono::Utc::now().timestamp();
        let params = args.run_parameters().unwrap();
        assert!(params.build_date >= before);
        assert!(params.build_date > 1_700_000_000);
    }

    #[test]
    fn test_dontbuild_selects_nothing_on_push() {
        let push = parse(&[
            "--head-rev",
            "abc123",
            "--pipeline-source",
            "push",
            "--target-method",
            "default",
            "--commit-message",
            "Fix typo DONTBUILD",
        ]);
        assert_eq!(push.run_parameters().unwrap().target_jobs_method, "nothing");

        let web = parse(&[
            "--head-rev",
            "abc123",
            "--pipeline-source",
            "web",
            "--target-method",
            "default",
            "--commit-message",
            "Fix typo DONTBUILD",
        ]);
        assert_eq!(web.run_parameters().unwrap().target_jobs_method, "default");
    }

    #[test]
    fn test_missing_head_rev_rejected() {
        let args = parse(&["--head-rev", "", "--target-method", "all"]);
        assert!(args.run_parameters().is_err());
    }

    #[test]
    fn test_parameters_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parameters.json");
        let params = RunParameters {
            head_rev: "deadbeef".to_string(),
            target_jobs_method: "all".to_string(),
            ..Default::default()
        };
        std::fs::write(&path, params.to_json().unwrap()).unwrap();

        let args = parse(&["--parameters", path.to_str().unwrap()]);
        assert_eq!(args.run_parameters().unwrap(), params);
    }
}
