//! Artifact emission: pipeline documents for the CI platform plus the
//! intermediate graphs as debug artifacts.

use jobgraph_config::EmitLimits;
use jobgraph_core::{Error, Job, JobGraph, JobId, OptimizedGraph, Result, RunParameters};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info};

pub const MAIN_DOCUMENT: &str = "generated-ci.json";
pub const PARAMETERS: &str = "parameters.json";
pub const FULL_GRAPH: &str = "full-job-graph.json";
pub const TARGET_JOBS: &str = "target-jobs.json";
pub const TARGET_GRAPH: &str = "target-job-graph.json";
pub const OPTIMIZED_GRAPH: &str = "optimized-job-graph.json";

/// Rendered output files, keyed by file name.
///
/// Everything is rendered in memory first so that a failing run writes
/// nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
    files: BTreeMap<String, String>,
}

impl Artifacts {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn insert(&mut self, name: impl Into<String>, contents: String) {
        self.files.insert(name.into(), contents);
    }

    /// Write every file into `dir`, creating it if needed.
    pub fn write_all(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        for (name, contents) in &self.files {
            std::fs::write(dir.join(name), contents)?;
        }
        info!(dir = %dir.display(), files = self.files.len(), "Wrote artifacts");
        Ok(())
    }
}

/// The platform representation of one kept job.
///
/// Dependencies that stay in this pipeline become `{"job": id}` needs;
/// dependencies replaced by a prior result point at the pipeline that
/// produced it.
pub fn render_job(job: &Job, optimized: &OptimizedGraph) -> Value {
    let needs: Vec<Value> = job
        .dependencies
        .iter()
        .filter_map(|dep| {
            if optimized.graph.contains(dep.as_str()) {
                Some(json!({ "job": dep }))
            } else {
                optimized.replacement(dep.as_str()).map(|r| {
                    json!({
                        "pipeline": r.reference,
                        "job": dep,
                        "artifacts": true,
                    })
                })
            }
        })
        .collect();

    let mut object: Map<String, Value> = job
        .attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    object.insert("stage".to_string(), Value::String(job.origin_stage.clone()));
    object.insert("needs".to_string(), Value::Array(needs));
    Value::Object(object)
}

/// Stages ordered so that every stage comes after the stages its jobs need.
///
/// Only edges among `graph`'s jobs count; edges inside one stage are
/// ignored. Fails if two stages need each other.
pub fn stage_order(graph: &JobGraph) -> Result<Vec<String>> {
    let mut needs: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for job in graph.jobs() {
        let stage = job.origin_stage.as_str();
        let entry = needs.entry(stage).or_default();
        for dep in graph.dependencies(job.id.as_str()) {
            if dep.stage() != stage {
                entry.insert(dep.stage());
            }
        }
    }

    let mut visiting: HashMap<&str, bool> = HashMap::new();
    let mut order = Vec::with_capacity(needs.len());
    let mut path = Vec::new();
    for stage in needs.keys().copied() {
        visit_stage(stage, &needs, &mut visiting, &mut path, &mut order)?;
    }
    Ok(order)
}

fn visit_stage<'a>(
    name: &'a str,
    needs: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    visiting: &mut HashMap<&'a str, bool>,
    path: &mut Vec<&'a str>,
    order: &mut Vec<String>,
) -> Result<()> {
    match visiting.get(name).copied() {
        // finished
        Some(false) => return Ok(()),
        Some(true) => {
            let start = path.iter().position(|s| *s == name).unwrap_or(0);
            let mut cycle: Vec<&str> = path[start..].to_vec();
            cycle.push(name);
            return Err(Error::Emit(format!(
                "stages depend on each other: {}",
                cycle.join(" -> ")
            )));
        }
        None => {}
    }

    visiting.insert(name, true);
    path.push(name);
    for dep in needs.get(name).into_iter().flatten().copied() {
        visit_stage(dep, needs, visiting, path, order)?;
    }
    path.pop();
    visiting.insert(name, false);
    order.push(name.to_string());
    Ok(())
}

/// Nesting depth of a JSON value; scalars count as one level.
fn depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        _ => 1,
    }
}

/// One compact `"key":value` member of a top-level document.
fn member(key: &str, value: &Value) -> Result<String> {
    Ok(format!(
        "{}:{}",
        serde_json::to_string(key)?,
        serde_json::to_string(value)?
    ))
}

/// Size of a document made of `members`: braces plus separating commas.
fn document_size<'a>(members: impl IntoIterator<Item = &'a String>) -> usize {
    let (count, bytes) = members
        .into_iter()
        .fold((0usize, 0usize), |(n, b), m| (n + 1, b + m.len()));
    2 + bytes + count.saturating_sub(1)
}

fn document(members: &[String]) -> String {
    format!("{{{}}}", members.join(","))
}

/// Render the pipeline documents for the kept jobs.
///
/// Everything goes into `generated-ci.json` when it fits the limits.
/// Otherwise jobs are packed greedily, in dependency order, into
/// `generated-ci-N.json` parts that the main document includes.
pub fn pipeline_documents(
    optimized: &OptimizedGraph,
    limits: &EmitLimits,
) -> Result<BTreeMap<String, String>> {
    let graph = &optimized.graph;
    let stages = member("stages", &json!(stage_order(graph)?))?;

    let mut jobs = Vec::with_capacity(graph.len());
    for id in graph.topological_order() {
        let Some(job) = graph.get(id.as_str()) else {
            continue;
        };
        let rendered = render_job(job, optimized);
        // the job sits one level below the document object
        let job_depth = depth(&rendered) + 1;
        if job_depth > limits.max_depth {
            return Err(Error::Emit(format!(
                "job '{}' is nested {} levels deep, the limit is {}",
                id, job_depth, limits.max_depth
            )));
        }
        jobs.push((id.clone(), member(id.as_str(), &rendered)?));
    }

    let mut documents = BTreeMap::new();
    let single = std::iter::once(&stages).chain(jobs.iter().map(|(_, m)| m));
    if document_size(single) <= limits.max_document_bytes {
        let mut members = vec![stages];
        members.extend(jobs.into_iter().map(|(_, m)| m));
        documents.insert(MAIN_DOCUMENT.to_string(), document(&members));
        return Ok(documents);
    }

    let parts = pack(jobs, limits.max_document_bytes)?;
    let includes: Vec<Value> = (1..=parts.len())
        .map(|n| json!({ "local": part_name(n) }))
        .collect();
    let main = [stages, member("include", &Value::Array(includes))?];
    let size = document_size(&main);
    if size > limits.max_document_bytes {
        return Err(Error::Emit(format!(
            "main document with {} includes needs {} bytes, the limit is {}",
            parts.len(),
            size,
            limits.max_document_bytes
        )));
    }
    documents.insert(MAIN_DOCUMENT.to_string(), document(&main));
    for (n, members) in parts.into_iter().enumerate() {
        documents.insert(part_name(n + 1), document(&members));
    }
    debug!(parts = documents.len() - 1, "Split pipeline document");
    Ok(documents)
}

fn part_name(n: usize) -> String {
    format!("generated-ci-{}.json", n)
}

fn pack(jobs: Vec<(JobId, String)>, max_bytes: usize) -> Result<Vec<Vec<String>>> {
    let mut parts: Vec<Vec<String>> = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for (id, member) in jobs {
        if document_size([&member]) > max_bytes {
            return Err(Error::Emit(format!(
                "job '{}' alone needs {} bytes, the limit is {}",
                id,
                document_size([&member]),
                max_bytes
            )));
        }
        if !current.is_empty()
            && document_size(current.iter().chain(std::iter::once(&member))) > max_bytes
        {
            parts.push(std::mem::take(&mut current));
        }
        current.push(member);
    }
    if !current.is_empty() {
        parts.push(current);
    }
    Ok(parts)
}

fn pretty<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Kept jobs as they appear in the optimized graph document. Edges to
/// replaced jobs are written as `{"job": id, "pipeline": reference}`.
fn optimized_jobs(optimized: &OptimizedGraph) -> Result<Map<String, Value>> {
    let mut jobs = Map::new();
    for job in optimized.graph.jobs() {
        let dependencies: Vec<Value> = job
            .dependencies
            .iter()
            .filter_map(|dep| match optimized.replacement(dep.as_str()) {
                Some(r) => Some(json!({ "job": dep, "pipeline": r.reference })),
                None => optimized
                    .graph
                    .contains(dep.as_str())
                    .then(|| json!(dep)),
            })
            .collect();
        let mut value = serde_json::to_value(&**job)?;
        if let Value::Object(fields) = &mut value {
            fields.insert("dependencies".to_string(), Value::Array(dependencies));
        }
        jobs.insert(job.id.to_string(), value);
    }
    Ok(jobs)
}

/// The intermediate results of one run.
pub fn debug_artifacts(
    params: &RunParameters,
    full: &JobGraph,
    targets: &BTreeSet<JobId>,
    target_graph: &JobGraph,
    optimized: &OptimizedGraph,
) -> Result<BTreeMap<String, String>> {
    let replacements: BTreeMap<&str, &str> = optimized
        .replacements()
        .map(|r| (r.job_id.as_str(), r.reference.as_str()))
        .collect();

    let mut files = BTreeMap::new();
    files.insert(PARAMETERS.to_string(), params.to_json()?);
    files.insert(FULL_GRAPH.to_string(), pretty(full)?);
    files.insert(TARGET_JOBS.to_string(), pretty(targets)?);
    files.insert(TARGET_GRAPH.to_string(), pretty(target_graph)?);
    files.insert(
        OPTIMIZED_GRAPH.to_string(),
        pretty(&json!({
            "jobs": optimized_jobs(optimized)?,
            "decisions": optimized.decisions,
            "replacements": replacements,
        }))?,
    );
    Ok(files)
}

/// Everything a successful run produces.
pub struct RunOutput<'a> {
    pub params: &'a RunParameters,
    pub full: &'a JobGraph,
    pub targets: &'a BTreeSet<JobId>,
    pub target_graph: &'a JobGraph,
    pub optimized: &'a OptimizedGraph,
}

/// Render every artifact of a run.
pub fn emit(output: &RunOutput<'_>, limits: &EmitLimits) -> Result<Artifacts> {
    let mut artifacts = Artifacts::default();
    for (name, contents) in pipeline_documents(output.optimized, limits)? {
        artifacts.insert(name, contents);
    }
    for (name, contents) in debug_artifacts(
        output.params,
        output.full,
        output.targets,
        output.target_graph,
        output.optimized,
    )? {
        artifacts.insert(name, contents);
    }
    Ok(artifacts)
}
