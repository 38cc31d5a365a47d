//! Optimization: replace target-graph jobs by prior results where it is safe.

use futures::StreamExt;
use jobgraph_config::OptimizerSettings;
use jobgraph_core::{
    ChangeDetector, DecisionReason, HistoryIndex, Job, JobDigest, JobGraph, JobId,
    OptimizationDecision, OptimizedGraph, Result, RunParameters,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::retry::retrying;

/// Decides, for every job of a target graph, whether it runs in this
/// pipeline or is satisfied by an earlier result.
///
/// Jobs are processed consumer-first in waves. A job that is kept because no
/// prior result exists forces its dependencies to be kept as well, since
/// their outputs must be produced in this run. The obligation carries down
/// the whole chain, through `never` and `do_not_optimize` jobs too. Predicates are consulted
/// concurrently within a wave; decisions are applied by a single writer once
/// the whole wave has answered.
pub struct Optimizer {
    settings: OptimizerSettings,
    changes: Arc<dyn ChangeDetector>,
    history: Arc<dyn HistoryIndex>,
}

impl Optimizer {
    pub fn new(
        settings: OptimizerSettings,
        changes: Arc<dyn ChangeDetector>,
        history: Arc<dyn HistoryIndex>,
    ) -> Self {
        Self {
            settings,
            changes,
            history,
        }
    }

    pub async fn optimize(
        &self,
        target: &JobGraph,
        targets: &BTreeSet<JobId>,
        params: &RunParameters,
    ) -> Result<OptimizedGraph> {
        let digests = digests(target);
        let do_not_optimize: BTreeSet<&str> =
            params.do_not_optimize.iter().map(String::as_str).collect();

        // dependency -> first consumer that forced it
        let mut forced: BTreeMap<JobId, JobId> = BTreeMap::new();
        let mut decisions: BTreeMap<JobId, OptimizationDecision> = BTreeMap::new();

        for (index, wave) in target.consumer_waves().into_iter().enumerate() {
            let mut pending = Vec::new();
            for id in wave {
                let Some(job) = target.get(id.as_str()) else {
                    continue;
                };
                let decided = if job.optimization.is_never() {
                    Some(DecisionReason::NeverOptimize)
                } else if do_not_optimize.contains(id.as_str())
                    || (!params.optimize_target_jobs && targets.contains(&id))
                {
                    Some(DecisionReason::DoNotOptimize)
                } else {
                    forced
                        .get(&id)
                        .map(|consumer| DecisionReason::RequiredBy {
                            consumer: consumer.clone(),
                        })
                };
                match decided {
                    Some(reason) => {
                        decisions.insert(id.clone(), OptimizationDecision::keep(id, reason));
                    }
                    None => {
                        let digest = digests.get(&id).cloned().unwrap_or_else(|| {
                            JobDigest::compute(job, std::iter::empty())
                        });
                        pending.push((Arc::clone(job), digest));
                    }
                }
            }

            let evaluated = pending.len();
            let answers: Vec<Result<OptimizationDecision>> = futures::stream::iter(pending)
                .map(|(job, digest)| self.evaluate(job, digest, params))
                .buffer_unordered(self.settings.concurrency.max(1))
                .collect()
                .await;
            for answer in answers {
                let decision = answer?;
                decisions.insert(decision.job_id.clone(), decision);
            }

            // A force-kept job passes the obligation on whatever reason it
            // was kept for. Applied in id order so the recorded consumer is
            // stable.
            let forcing: Vec<JobId> = decisions
                .values()
                .filter(|d| d.forces_dependencies() || forced.contains_key(&d.job_id))
                .map(|d| d.job_id.clone())
                .collect();
            for consumer in forcing {
                for dep in target.dependencies(consumer.as_str()) {
                    forced
                        .entry(dep.clone())
                        .or_insert_with(|| consumer.clone());
                }
            }
            debug!(wave = index, evaluated, "Optimized wave");
        }

        let kept: BTreeSet<JobId> = decisions
            .values()
            .filter(|d| d.kept)
            .map(|d| d.job_id.clone())
            .collect();
        let optimized = OptimizedGraph::new(target.subgraph(&kept), decisions);
        optimized.check_closure()?;

        info!(
            jobs = target.len(),
            kept = optimized.graph.len(),
            replaced = optimized.replacements().count(),
            "Optimized target graph"
        );
        Ok(optimized)
    }

    /// Ask the predicates about one job.
    async fn evaluate(
        &self,
        job: Arc<Job>,
        digest: JobDigest,
        params: &RunParameters,
    ) -> Result<OptimizationDecision> {
        let paths = job.optimization.input_patterns();
        if !paths.is_empty() {
            let affected = retrying(&self.settings, &job.id, self.changes.name(), || {
                self.changes
                    .is_affected(&job, &params.base_rev, &params.head_rev, paths)
            })
            .await?;
            if affected {
                return Ok(OptimizationDecision::keep(
                    job.id.clone(),
                    DecisionReason::Affected,
                ));
            }
        }

        let found = retrying(&self.settings, &job.id, self.history.name(), || {
            self.history.lookup(&job, &digest)
        })
        .await?;
        Ok(match found {
            Some(replacement) => {
                debug!(job = %job.id, reference = %replacement.reference, "Found prior result");
                OptimizationDecision::replace(job.id.clone(), replacement.reference)
            }
            None => OptimizationDecision::keep(job.id.clone(), DecisionReason::NoPriorResult),
        })
    }
}

/// Digest of every job, computed dependencies first.
fn digests(graph: &JobGraph) -> BTreeMap<JobId, JobDigest> {
    let mut digests: BTreeMap<JobId, JobDigest> = BTreeMap::new();
    for id in graph.topological_order() {
        let Some(job) = graph.get(id.as_str()) else {
            continue;
        };
        let digest = {
            let upstream = graph.dependencies(id.as_str()).filter_map(|d| digests.get(d));
            JobDigest::compute(job, upstream)
        };
        digests.insert(id, digest);
    }
    digests
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::StaticChangeSet;
    use crate::history::{NoHistory, StaticHistoryIndex};
    use async_trait::async_trait;
    use jobgraph_core::{Error, JobDeclaration, OptimizationPolicy, Replacement};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job(id: &str, deps: &[&str], optimization: OptimizationPolicy) -> Job {
        let id: JobId = id.parse().unwrap();
        let decl = JobDeclaration::new(id.stage(), id.name()).with_optimization(optimization);
        Job::from_declaration(decl, deps.iter().map(|d| d.parse().unwrap()).collect())
    }

    fn watching(pattern: &str) -> OptimizationPolicy {
        OptimizationPolicy::SkipUnlessChanged {
            paths: vec![pattern.to_string()],
        }
    }

    fn settings() -> OptimizerSettings {
        OptimizerSettings {
            concurrency: 4,
            retries: 2,
            backoff_ms: 1,
        }
    }

    fn history(entries: &[(&str, &str)]) -> Arc<StaticHistoryIndex> {
        Arc::new(StaticHistoryIndex::new(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ))
    }

    fn params() -> RunParameters {
        RunParameters {
            base_rev: "a".repeat(40),
            head_rev: "b".repeat(40),
            ..Default::default()
        }
    }

    fn all(graph: &JobGraph) -> BTreeSet<JobId> {
        graph.ids().cloned().collect()
    }

    fn reason(optimized: &OptimizedGraph, id: &str) -> DecisionReason {
        optimized.decisions[id].reason.clone()
    }

    #[tokio::test]
    async fn test_unaffected_dependency_is_replaced() {
        // B depends on A; B's sources changed, A has a prior result.
        let graph = JobGraph::from_jobs(vec![
            job("build/a", &[], watching("a/**")),
            job("test/b", &["build/a"], watching("b/**")),
        ])
        .unwrap();
        let optimizer = Optimizer::new(
            settings(),
            Arc::new(StaticChangeSet::new(["b/main.rs"])),
            history(&[("build/a", "pipeline-41")]),
        );

        let optimized = optimizer
            .optimize(&graph, &BTreeSet::new(), &params())
            .await
            .unwrap();

        let kept: Vec<_> = optimized.graph.ids().map(JobId::as_str).collect();
        assert_eq!(kept, vec!["test/b"]);
        assert_eq!(reason(&optimized, "test/b"), DecisionReason::Affected);
        assert_eq!(
            optimized.replacement("build/a"),
            Some(&Replacement {
                job_id: JobId::new("build", "a"),
                reference: "pipeline-41".to_string(),
            })
        );
        assert_eq!(optimized.external_dependencies("test/b").len(), 1);
    }

    #[tokio::test]
    async fn test_unsatisfied_jobs_force_their_dependencies() {
        // Nothing changed and no history: every job must run.
        let graph = JobGraph::from_jobs(vec![
            job("s/a", &[], watching("a/**")),
            job("s/b", &["s/a"], watching("b/**")),
            job("s/c", &["s/b"], watching("c/**")),
        ])
        .unwrap();
        let optimizer = Optimizer::new(
            settings(),
            Arc::new(StaticChangeSet::new(Vec::<String>::new())),
            Arc::new(NoHistory),
        );

        let optimized = optimizer
            .optimize(&graph, &BTreeSet::new(), &params())
            .await
            .unwrap();

        assert_eq!(optimized.graph.len(), 3);
        assert_eq!(reason(&optimized, "s/c"), DecisionReason::NoPriorResult);
        assert_eq!(
            reason(&optimized, "s/b"),
            DecisionReason::RequiredBy {
                consumer: JobId::new("s", "c")
            }
        );
        assert_eq!(
            reason(&optimized, "s/a"),
            DecisionReason::RequiredBy {
                consumer: JobId::new("s", "b")
            }
        );
        assert_eq!(optimized.replacements().count(), 0);
    }

    #[tokio::test]
    async fn test_force_keep_overrides_history() {
        // c has no prior result, so b must run even though b has one.
        let graph = JobGraph::from_jobs(vec![
            job("s/b", &[], OptimizationPolicy::Always),
            job("s/c", &["s/b"], OptimizationPolicy::Always),
        ])
        .unwrap();
        let optimizer = Optimizer::new(
            settings(),
            Arc::new(StaticChangeSet::default()),
            history(&[("s/b", "pipeline-7")]),
        );

        let optimized = optimizer
            .optimize(&graph, &BTreeSet::new(), &params())
            .await
            .unwrap();
        assert!(optimized.decisions["s/b"].kept);
        assert!(optimized.replacement("s/b").is_none());
    }

    #[tokio::test]
    async fn test_never_and_do_not_optimize_are_kept() {
        let graph = JobGraph::from_jobs(vec![
            job("s/lib", &[], OptimizationPolicy::Always),
            job("s/never", &["s/lib"], OptimizationPolicy::Never),
            job("s/pinned", &[], OptimizationPolicy::Always),
            job("s/target", &[], OptimizationPolicy::Always),
        ])
        .unwrap();
        let optimizer = Optimizer::new(
            settings(),
            Arc::new(StaticChangeSet::default()),
            history(&[("s/lib", "p1"), ("s/pinned", "p2"), ("s/target", "p3")]),
        );
        let params = RunParameters {
            do_not_optimize: vec!["s/pinned".to_string()],
            optimize_target_jobs: false,
            ..params()
        };
        let targets: BTreeSet<JobId> = [JobId::new("s", "target")].into_iter().collect();

        let optimized = optimizer.optimize(&graph, &targets, &params).await.unwrap();
        assert_eq!(reason(&optimized, "s/never"), DecisionReason::NeverOptimize);
        assert_eq!(reason(&optimized, "s/pinned"), DecisionReason::DoNotOptimize);
        assert_eq!(reason(&optimized, "s/target"), DecisionReason::DoNotOptimize);
        // a never-optimized consumer that nothing forces does not force its inputs
        assert_eq!(optimized.replacement("s/lib").unwrap().reference, "p1");
    }

    /// c has no prior result and needs b, which needs a.
    fn forced_through(b: OptimizationPolicy) -> JobGraph {
        JobGraph::from_jobs(vec![
            job("s/a", &[], OptimizationPolicy::Always),
            job("s/b", &["s/a"], b),
            job("s/c", &["s/b"], OptimizationPolicy::Always),
        ])
        .unwrap()
    }

    fn with_history_for_a() -> Optimizer {
        Optimizer::new(
            settings(),
            Arc::new(StaticChangeSet::default()),
            history(&[("s/a", "pipeline-3")]),
        )
    }

    #[tokio::test]
    async fn test_force_keep_passes_through_never() {
        let graph = forced_through(OptimizationPolicy::Never);
        let optimized = with_history_for_a()
            .optimize(&graph, &BTreeSet::new(), &params())
            .await
            .unwrap();

        assert_eq!(reason(&optimized, "s/b"), DecisionReason::NeverOptimize);
        assert_eq!(
            reason(&optimized, "s/a"),
            DecisionReason::RequiredBy {
                consumer: JobId::new("s", "b")
            }
        );
        assert!(optimized.replacement("s/a").is_none());
        assert_eq!(optimized.graph.len(), 3);
    }

    #[tokio::test]
    async fn test_force_keep_passes_through_do_not_optimize() {
        let graph = forced_through(OptimizationPolicy::Always);
        let params = RunParameters {
            do_not_optimize: vec!["s/b".to_string()],
            ..params()
        };
        let optimized = with_history_for_a()
            .optimize(&graph, &BTreeSet::new(), &params)
            .await
            .unwrap();

        assert_eq!(reason(&optimized, "s/b"), DecisionReason::DoNotOptimize);
        assert!(optimized.decisions["s/a"].kept);
        assert!(optimized.replacement("s/a").is_none());
    }

    #[tokio::test]
    async fn test_every_job_decided_and_closed() {
        let graph = JobGraph::from_jobs(vec![
            job("s/a", &[], OptimizationPolicy::Always),
            job("s/b", &["s/a"], watching("b/**")),
            job("s/c", &["s/a"], OptimizationPolicy::Always),
            job("s/d", &["s/b", "s/c"], OptimizationPolicy::Never),
        ])
        .unwrap();
        let optimizer = Optimizer::new(
            settings(),
            Arc::new(StaticChangeSet::new(["b/x"])),
            history(&[("s/a", "p-a"), ("s/c", "p-c")]),
        );
        let optimized = optimizer
            .optimize(&graph, &all(&graph), &params())
            .await
            .unwrap();

        assert_eq!(optimized.decisions.len(), graph.len());
        optimized.check_closure().unwrap();
        let kept: Vec<_> = optimized.graph.ids().map(JobId::as_str).collect();
        assert_eq!(kept, vec!["s/b", "s/d"]);
    }

    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HistoryIndex for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn lookup(&self, job: &Job, _digest: &JobDigest) -> Result<Option<Replacement>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(Error::PredicateService {
                    predicate: "flaky",
                    job: job.id.clone(),
                    message: "503 Service Unavailable".to_string(),
                });
            }
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_transient_failures_retried() {
        let graph = JobGraph::from_jobs(vec![job("s/a", &[], OptimizationPolicy::Always)]).unwrap();
        let flaky = Arc::new(Flaky {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let optimizer = Optimizer::new(
            settings(),
            Arc::new(StaticChangeSet::default()),
            flaky.clone(),
        );
        let optimized = optimizer
            .optimize(&graph, &BTreeSet::new(), &params())
            .await
            .unwrap();
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert!(optimized.decisions["s/a"].kept);
    }

    #[tokio::test]
    async fn test_retries_exhausted_aborts() {
        let graph = JobGraph::from_jobs(vec![job("s/a", &[], OptimizationPolicy::Always)]).unwrap();
        let optimizer = Optimizer::new(
            settings(),
            Arc::new(StaticChangeSet::default()),
            Arc::new(Flaky {
                failures: 10,
                calls: AtomicUsize::new(0),
            }),
        );
        let err = optimizer
            .optimize(&graph, &BTreeSet::new(), &params())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PredicateService { predicate: "flaky", .. }));
    }

    #[test]
    fn test_digests_follow_upstream() {
        let graph = JobGraph::from_jobs(vec![
            job("s/a", &[], OptimizationPolicy::Never),
            job("s/b", &["s/a"], OptimizationPolicy::Never),
        ])
        .unwrap();
        let changed = JobGraph::from_jobs(vec![
            job("s/a", &[], OptimizationPolicy::Always),
            job("s/b", &["s/a"], OptimizationPolicy::Never),
        ])
        .unwrap();
        assert_ne!(digests(&graph)["s/b"], digests(&changed)["s/b"]);
        assert_eq!(digests(&graph), digests(&graph));
    }
}
