//! Commands that run the generator and print or write its graphs.

use anyhow::{Context, Result};
use jobgraph_engine::emit::{MAIN_DOCUMENT, OPTIMIZED_GRAPH};
use std::path::Path;

use super::RunArgs;

/// Run the whole pipeline and write every artifact into `artifacts_dir`.
pub async fn decision(root: &Path, args: &RunArgs, artifacts_dir: &Path) -> Result<()> {
    let params = args.run_parameters()?;
    let generator = args.generator(root)?;

    let generation = generator
        .generate(params)
        .await
        .context("Failed to generate job graph")?;
    let artifacts = generation
        .artifacts(generator.root())
        .context("Failed to render pipeline documents")?;
    artifacts
        .write_all(artifacts_dir)
        .with_context(|| format!("Failed to write artifacts to {}", artifacts_dir.display()))?;

    println!(
        "{} jobs, {} targeted, {} kept, {} replaced",
        generation.full.len(),
        generation.target_graph.len(),
        generation.optimized.graph.len(),
        generation.optimized.replacements().count()
    );
    println!(
        "Wrote {} files to {} (pipeline: {})",
        artifacts.len(),
        artifacts_dir.display(),
        MAIN_DOCUMENT
    );
    Ok(())
}

pub async fn full(root: &Path, args: &RunArgs) -> Result<()> {
    let params = args.run_parameters()?;
    let graph = args.generator(root)?.full_graph(&params).await?;
    println!("{}", serde_json::to_string_pretty(&graph)?);
    Ok(())
}

pub async fn target(root: &Path, args: &RunArgs) -> Result<()> {
    let params = args.run_parameters()?;
    let (_, selection) = args.generator(root)?.select(&params).await?;
    println!("{}", serde_json::to_string_pretty(&selection.graph)?);
    Ok(())
}

pub async fn optimized(root: &Path, args: &RunArgs) -> Result<()> {
    let params = args.run_parameters()?;
    let generator = args.generator(root)?;
    let generation = generator.generate(params).await?;
    let artifacts = generation.artifacts(generator.root())?;
    let document = artifacts
        .get(OPTIMIZED_GRAPH)
        .context("optimized graph was not rendered")?;
    println!("{}", document);
    Ok(())
}
