//! Enforce the platform's cap on upstream dependencies per job.

use jobgraph_core::JobDeclaration;

use super::{Transform, TransformContext, TransformFailure, TransformResult};

/// Rejects jobs with more needs than `max-upstream-dependencies`.
pub struct CheckNeedsLimit;

impl Transform for CheckNeedsLimit {
    fn apply(&self, ctx: &TransformContext<'_>, jobs: Vec<JobDeclaration>) -> TransformResult {
        let limit = ctx.config.max_upstream_dependencies;
        if let Some(job) = jobs.iter().find(|j| j.needs.len() > limit) {
            return Err(TransformFailure::job(
                job,
                format!(
                    "job has {} upstream dependencies, the limit is {}",
                    job.needs.len(),
                    limit
                ),
            ));
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::test_support::*;
    use jobgraph_config::GraphConfig;
    use jobgraph_core::{Need, RunParameters};
    use serde_json::json;

    #[test]
    fn test_limit() {
        let config = GraphConfig {
            max_upstream_dependencies: 2,
            ..Default::default()
        };
        let fixture = Fixture::with(RunParameters::default(), config);
        let needs = |n: usize| -> Vec<Need> {
            (0..n).map(|i| Need::Local(format!("dep{}", i))).collect()
        };

        let ok = job("ok", json!({"script": "x"})).with_needs(needs(2));
        assert!(CheckNeedsLimit.apply(&fixture.ctx(), vec![ok]).is_ok());

        let too_many = job("wide", json!({"script": "x"})).with_needs(needs(3));
        let err = CheckNeedsLimit.apply(&fixture.ctx(), vec![too_many]).unwrap_err();
        assert_eq!(err.message, "job has 3 upstream dependencies, the limit is 2");
    }
}
