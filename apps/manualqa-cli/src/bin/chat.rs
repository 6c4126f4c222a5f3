use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use manualqa_chat::{get_default_generator, ChatPipeline, Reply};
use manualqa_cli::{init_tracing, AppContext};
use manualqa_core::config::Config;
use manualqa_retrieval::RetrievalEngine;
use manualqa_vector::build_progress_bar;

/// Interactive question answering over the indexed manuals.
#[derive(Debug, Parser)]
#[command(name = "manualqa-chat")]
struct Args {
    /// Pin this manual from the first turn
    #[arg(long)]
    manual: Option<String>,
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
    init_tracing(config.settings()?.app.debug);

    let ctx = AppContext::open(&config, args.manuals_dir).await?;
    ctx.indexer.rehydrate_all().await?;
    let missing: Vec<_> = ctx.sources()?.into_iter().filter(|s| !ctx.registry.exists(&s.manual_id)).collect();
    if !missing.is_empty() {
        println!("Building {} new manual(s)...", missing.len());
        let progress = build_progress_bar(missing.len() as u64);
        ctx.indexer.index_sources(&missing, false, 2, &progress).await?;
    }
    if ctx.registry.is_empty() {
        warn!("no manuals are indexed; every question will be refused");
    }

    let engine = RetrievalEngine::new(ctx.embedder.clone(), ctx.index.clone(), ctx.registry.clone(), ctx.settings.retrieval.clone())
        .with_events(ctx.events.clone());
    let generator = get_default_generator(&ctx.settings)?;
    let pipeline = Arc::new(
        ChatPipeline::new(&ctx.settings, ctx.registry.clone(), engine, generator).with_events(ctx.events.clone()),
    );
    let mut session = pipeline.session();

    println!("Chat ready. Type 'exit' to quit.");
    println!("{}", manualqa_chat::commands::HELP);
    if let Some(manual) = &args.manual {
        println!("\n{}", session.ask(&format!("/manual {manual}")).await?);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nYou: ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match session.ask(&line).await {
            Ok(Reply::Exit) => break,
            Ok(reply) => println!("\nAssistant: {reply}"),
            Err(e) => eprintln!("\nError: {e}"),
        }
    }
    Ok(())
}
