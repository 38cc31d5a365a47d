//! The immutable job graph.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::{Error, Job, JobId, Result};

/// A set of jobs and the dependency edges between them.
///
/// Graphs are never mutated after construction. Derived graphs (target,
/// optimized) are new graphs that share the same `Arc<Job>` nodes.
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    jobs: BTreeMap<JobId, Arc<Job>>,
    edges: BTreeMap<JobId, BTreeSet<JobId>>,
}

impl JobGraph {
    /// Build a graph from resolved jobs, using each job's `dependencies` as
    /// its edges.
    ///
    /// Fails if a dependency is missing from `jobs`, if two jobs share an id,
    /// or if the edges form a cycle.
    pub fn from_jobs(jobs: impl IntoIterator<Item = Job>) -> Result<Self> {
        let mut nodes = BTreeMap::new();
        for job in jobs {
            let id = job.id.clone();
            if nodes.insert(id.clone(), Arc::new(job)).is_some() {
                return Err(Error::DuplicateJob(id));
            }
        }

        for job in nodes.values() {
            if let Some(missing) = job.dependencies.iter().find(|d| !nodes.contains_key(*d)) {
                return Err(Error::UnresolvedDependency {
                    job: job.id.clone(),
                    reference: missing.to_string(),
                    matches: vec![],
                });
            }
        }

        let edges = nodes
            .iter()
            .map(|(id, job)| (id.clone(), job.dependencies.clone()))
            .collect();

        if let Some(path) = find_cycle(&edges) {
            return Err(Error::Cycle { path });
        }

        Ok(Self { jobs: nodes, edges })
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Job>> {
        self.jobs.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &JobId> {
        self.jobs.keys()
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Arc<Job>> {
        self.jobs.values()
    }

    /// Dependencies of `id` that are present in this graph.
    pub fn dependencies<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a JobId> + use<'a> {
        self.edges.get(id).into_iter().flatten()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Reverse edges: for every job, the jobs that depend on it.
    pub fn dependents(&self) -> BTreeMap<JobId, BTreeSet<JobId>> {
        let mut reverse: BTreeMap<JobId, BTreeSet<JobId>> = self
            .jobs
            .keys()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();
        for (consumer, deps) in &self.edges {
            for dep in deps {
                if let Some(set) = reverse.get_mut(dep) {
                    set.insert(consumer.clone());
                }
            }
        }
        reverse
    }

    /// The subgraph induced by `keep`. Edges leaving the subgraph are dropped;
    /// the jobs themselves keep their full `dependencies` sets.
    pub fn subgraph(&self, keep: &BTreeSet<JobId>) -> JobGraph {
        let jobs = self
            .jobs
            .iter()
            .filter(|(id, _)| keep.contains(*id))
            .map(|(id, job)| (id.clone(), Arc::clone(job)))
            .collect();
        let edges = self
            .edges
            .iter()
            .filter(|(id, _)| keep.contains(*id))
            .map(|(id, deps)| {
                let deps = deps.iter().filter(|d| keep.contains(*d)).cloned().collect();
                (id.clone(), deps)
            })
            .collect();
        JobGraph { jobs, edges }
    }

    /// `roots` plus everything they transitively depend on.
    pub fn transitive_closure<'a>(&self, roots: impl IntoIterator<Item = &'a JobId>) -> JobGraph {
        let mut closed = BTreeSet::new();
        let mut stack: Vec<&JobId> = roots
            .into_iter()
            .filter(|id| self.contains(id.as_str()))
            .collect();
        while let Some(id) = stack.pop() {
            if closed.insert(id.clone()) {
                stack.extend(self.dependencies(id.as_str()));
            }
        }
        self.subgraph(&closed)
    }

    /// Job ids with every job after all of its dependencies.
    ///
    /// Ties are broken by id so the order is stable across runs.
    pub fn topological_order(&self) -> Vec<JobId> {
        let mut pending: BTreeMap<&JobId, usize> = self
            .edges
            .iter()
            .map(|(id, deps)| (id, deps.len()))
            .collect();
        let dependents = self.dependents();
        let mut ready: BTreeSet<&JobId> = pending
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.jobs.len());
        while let Some(id) = ready.pop_first() {
            order.push(id.clone());
            for consumer in dependents.get(id).into_iter().flatten() {
                if let Some((key, remaining)) = pending.get_key_value(consumer) {
                    let key = *key;
                    let remaining = remaining - 1;
                    pending.insert(key, remaining);
                    if remaining == 0 {
                        ready.insert(key);
                    }
                }
            }
        }
        order
    }

    /// Jobs grouped into consumer-first waves.
    ///
    /// Wave 0 holds the jobs nothing in this graph depends on; a job's wave is
    /// one more than the deepest wave among its consumers. A job therefore
    /// always sits in a later wave than every job that depends on it, and jobs
    /// in the same wave never depend on each other.
    pub fn consumer_waves(&self) -> Vec<Vec<JobId>> {
        let dependents = self.dependents();
        let mut wave_of: BTreeMap<JobId, usize> = BTreeMap::new();

        for id in self.topological_order().into_iter().rev() {
            let wave = dependents
                .get(&id)
                .into_iter()
                .flatten()
                .filter_map(|c| wave_of.get(c))
                .map(|w| w + 1)
                .max()
                .unwrap_or(0);
            wave_of.insert(id, wave);
        }

        let depth = wave_of.values().max().map(|w| w + 1).unwrap_or(0);
        let mut waves = vec![Vec::new(); depth];
        for (id, wave) in wave_of {
            waves[wave].push(id);
        }
        waves
    }
}

impl Serialize for JobGraph {
    /// Serializes as a map of job id to job, with `dependencies` limited to
    /// the edges of this graph.
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.jobs.len()))?;
        for (id, job) in &self.jobs {
            let mut job = Job::clone(job);
            job.dependencies = self.edges.get(id).cloned().unwrap_or_default();
            map.serialize_entry(id, &job)?;
        }
        map.end()
    }
}

/// Find a dependency cycle with a depth-first search.
///
/// Returns the cycle as a node sequence that starts and ends with the same id.
pub(crate) fn find_cycle(edges: &BTreeMap<JobId, BTreeSet<JobId>>) -> Option<Vec<JobId>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        InProgress,
        Done,
    }

    fn visit<'a>(
        node: &'a JobId,
        edges: &'a BTreeMap<JobId, BTreeSet<JobId>>,
        marks: &mut BTreeMap<&'a JobId, Mark>,
        stack: &mut Vec<&'a JobId>,
    ) -> Option<Vec<JobId>> {
        marks.insert(node, Mark::InProgress);
        stack.push(node);

        for dep in edges.get(node).into_iter().flatten() {
            match marks.get(dep) {
                Some(Mark::InProgress) => {
                    let start = stack.iter().position(|n| *n == dep).unwrap_or(0);
                    let mut cycle: Vec<JobId> = stack[start..].iter().map(|n| (*n).clone()).collect();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                Some(Mark::Done) => {}
                None => {
                    if let Some(cycle) = visit(dep, edges, marks, stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        stack.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = BTreeMap::new();
    for node in edges.keys() {
        if !marks.contains_key(node) {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(node, edges, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}
