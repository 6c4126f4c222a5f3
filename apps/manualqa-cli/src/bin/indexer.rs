use std::path::PathBuf;

use clap::Parser;

use manualqa_cli::{init_tracing, pick_source, AppContext};
use manualqa_core::config::Config;
use manualqa_core::types::ManualId;
use manualqa_vector::build_progress_bar;

/// Build (or rebuild) the per-manual chunk hierarchies and vectors.
#[derive(Debug, Parser)]
#[command(name = "manualqa-indexer")]
struct Args {
    /// Drop persisted data and rebuild instead of reusing the store
    #[arg(long)]
    rebuild: bool,
    /// Only this manual (id or file name)
    #[arg(long)]
    manual: Option<String>,
    /// Manuals built concurrently
    #[arg(long, default_value_t = 2)]
    parallel: usize,
    /// Overrides `data.manuals_dir`
    manuals_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;
    let debug = config.settings()?.app.debug;
    init_tracing(debug);

    let ctx = AppContext::open(&config, args.manuals_dir).await?;
    let mut sources = ctx.sources()?;
    println!("Manual indexer\n==============");
    println!("Manuals directory: {}", ctx.manuals_dir.display());

    if let Some(wanted) = &args.manual {
        match pick_source(&sources, wanted) {
            Some(source) => sources = vec![source],
            None => anyhow::bail!("no page source for manual '{wanted}' in {}", ctx.manuals_dir.display()),
        }
    } else if args.rebuild {
        let keep: Vec<ManualId> = sources.iter().map(|s| s.manual_id.clone()).collect();
        for removed in ctx.indexer.prune(&keep).await? {
            println!("Removed stored manual without a source: {removed}");
        }
    }
    if sources.is_empty() {
        println!("No manuals found.");
        return Ok(());
    }

    let progress = build_progress_bar(sources.len() as u64);
    let reports = ctx.indexer.index_sources(&sources, args.rebuild, args.parallel, &progress).await?;
    for report in &reports {
        let how = if report.skipped { "loaded from store" } else { "built" };
        println!("  {:<40} {:>6} chunks  ({how})", report.manual_id.as_str(), report.chunks);
    }
    println!("\nIndexed {} manual(s).", reports.len());
    Ok(())
}
