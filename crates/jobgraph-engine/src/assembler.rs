//! Graph assembly: resolve symbolic needs into edges and validate the result.

use glob::Pattern;
use jobgraph_core::{Error, Job, JobDeclaration, JobGraph, JobId, Need, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Assemble declarations from all stages into the full job graph.
///
/// Every need must resolve to exactly one job. Duplicate ids, unresolved or
/// ambiguous needs, and cycles are all rejected here, so a `JobGraph` that
/// comes out of this function is always acyclic and closed.
pub fn assemble(declarations: Vec<JobDeclaration>) -> Result<JobGraph> {
    let mut ids = BTreeSet::new();
    for decl in &declarations {
        let id = decl.id();
        if !ids.insert(id.clone()) {
            return Err(Error::DuplicateJob(id));
        }
    }

    // name -> every id carrying that name, for cross-stage lookups
    let mut by_name: BTreeMap<&str, Vec<&JobId>> = BTreeMap::new();
    for id in &ids {
        by_name.entry(id.name()).or_default().push(id);
    }

    let mut jobs = Vec::with_capacity(declarations.len());
    for decl in declarations {
        let id = decl.id();
        let mut dependencies = BTreeSet::new();
        for need in &decl.needs {
            let target = resolve(&id, need, &ids, &by_name)?;
            dependencies.insert(target);
        }
        jobs.push(Job::from_declaration(decl, dependencies));
    }

    let graph = JobGraph::from_jobs(jobs)?;
    debug!(
        jobs = graph.len(),
        edges = graph.edge_count(),
        "Assembled job graph"
    );
    Ok(graph)
}

fn resolve(
    job: &JobId,
    need: &Need,
    ids: &BTreeSet<JobId>,
    by_name: &BTreeMap<&str, Vec<&JobId>>,
) -> Result<JobId> {
    let matches: Vec<JobId> = match need {
        Need::Qualified(id) => ids.get(id.as_str()).cloned().into_iter().collect(),
        Need::Local(name) => {
            let local = JobId::new(job.stage(), name);
            if ids.contains(local.as_str()) {
                vec![local]
            } else {
                by_name
                    .get(name.as_str())
                    .into_iter()
                    .flatten()
                    .map(|id| (*id).clone())
                    .collect()
            }
        }
        Need::Pattern(raw) => {
            let scoped = if raw.contains('/') {
                raw.clone()
            } else {
                format!("{}/{}", job.stage(), raw)
            };
            let pattern = Pattern::new(&scoped).map_err(|e| Error::Declaration {
                stage: job.stage().to_string(),
                job: Some(job.name().to_string()),
                message: format!("invalid need pattern '{}': {}", raw, e),
            })?;
            ids.iter()
                .filter(|id| pattern.matches(id.as_str()))
                .cloned()
                .collect()
        }
    };

    match <[JobId; 1]>::try_from(matches) {
        Ok([only]) => Ok(only),
        Err(matches) => Err(Error::UnresolvedDependency {
            job: job.clone(),
            reference: need.to_string(),
            matches,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decl(stage: &str, name: &str, needs: &[&str]) -> JobDeclaration {
        JobDeclaration::new(stage, name)
            .with_attribute("script", json!("true"))
            .with_needs(needs.iter().map(|n| Need::parse(n)).collect())
    }

    fn deps(graph: &JobGraph, id: &str) -> Vec<String> {
        graph.dependencies(id).map(|d| d.to_string()).collect()
    }

    #[test]
    fn test_local_need_prefers_own_stage() {
        let graph = assemble(vec![
            decl("build", "compile", &[]),
            decl("test", "compile", &[]),
            decl("test", "unit", &["compile"]),
        ])
        .unwrap();
        assert_eq!(deps(&graph, "test/unit"), vec!["test/compile"]);
    }

    #[test]
    fn test_local_need_falls_back_to_unique_name() {
        let graph = assemble(vec![
            decl("build", "compile", &[]),
            decl("test", "unit", &["compile"]),
        ])
        .unwrap();
        assert_eq!(deps(&graph, "test/unit"), vec!["build/compile"]);
    }

    #[test]
    fn test_ambiguous_local_need() {
        let err = assemble(vec![
            decl("build", "compile", &[]),
            decl("docs", "compile", &[]),
            decl("test", "unit", &["compile"]),
        ])
        .unwrap_err();
        match err {
            Error::UnresolvedDependency {
                job,
                reference,
                matches,
            } => {
                assert_eq!(job.as_str(), "test/unit");
                assert_eq!(reference, "compile");
                assert_eq!(matches.len(), 2);
            }
            other => panic!("expected unresolved dependency, got {other:?}"),
        }
    }

    #[test]
    fn test_pattern_need() {
        let graph = assemble(vec![
            decl("docker-image", "rust", &[]),
            decl("build", "compile", &["docker-image/ru*"]),
            decl("build", "package", &["comp?le"]),
        ])
        .unwrap();
        assert_eq!(deps(&graph, "build/compile"), vec!["docker-image/rust"]);
        assert_eq!(deps(&graph, "build/package"), vec!["build/compile"]);
    }

    #[test]
    fn test_ambiguous_pattern_lists_matches() {
        let err = assemble(vec![
            decl("docker-image", "rust", &[]),
            decl("docker-image", "node", &[]),
            decl("build", "compile", &["docker-image/*"]),
        ])
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "job 'build/compile' needs 'docker-image/*', which is ambiguous \
             (matches docker-image/node, docker-image/rust)"
        );
    }

    #[test]
    fn test_missing_need_names_job_and_reference() {
        let err = assemble(vec![decl("test", "C", &["X"])]).unwrap_err();
        assert_eq!(err.to_string(), "job 'test/C' needs 'X', which matches no job");
    }

    #[test]
    fn test_duplicate_and_cycle() {
        let dup = assemble(vec![decl("a", "x", &[]), decl("a", "x", &[])]).unwrap_err();
        assert!(matches!(dup, Error::DuplicateJob(_)));

        let cycle = assemble(vec![
            decl("s", "a", &["b"]),
            decl("s", "b", &["a"]),
        ])
        .unwrap_err();
        match cycle {
            Error::Cycle { path } => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 3);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }
}
