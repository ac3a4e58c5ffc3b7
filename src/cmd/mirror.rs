use crate::app::App;
use crate::engine::{media::ChunkTransfer, retry::RetryPolicy, Engine, EngineOptions};
use crate::shutdown;
use crate::tg::backend::TgBackend;
use crate::Cli;
use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args, Debug, Clone)]
pub struct MirrorArgs {
    /// Channel to mirror (username, @username, or t.me link). Repeatable.
    #[arg(long = "channel", short = 'c')]
    pub channels: Vec<String>,

    /// YAML file listing channels to mirror
    #[arg(long)]
    pub channels_file: Option<PathBuf>,

    /// Messages requested per history page
    #[arg(long, default_value_t = 1000)]
    pub page_limit: usize,

    /// Documents above this size (MiB) are downloaded after the message
    /// pass, resumably
    #[arg(long, default_value_t = 500)]
    pub large_file_threshold_mb: u64,

    /// Directory for downloaded files (default: <store>/media)
    #[arg(long)]
    pub media_dir: Option<PathBuf>,

    /// Overwrite stored reaction counts with current ones
    #[arg(long)]
    pub refresh_reactions: bool,

    /// Attempts per message before the channel run aborts
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Transient chunk failures tolerated per large-file transfer
    #[arg(long, default_value_t = 10)]
    pub chunk_retry_budget: u32,
}

/// Either a bare YAML list or a mapping with a `channels` key.
#[derive(Deserialize)]
#[serde(untagged)]
enum ChannelsFile {
    List(Vec<String>),
    Map { channels: Vec<String> },
}

fn load_channels(args: &MirrorArgs) -> Result<Vec<String>> {
    let mut refs = args.channels.clone();
    if let Some(path) = &args.channels_file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        let parsed: ChannelsFile = serde_yaml::from_str(&text)
            .with_context(|| format!("Malformed channel list {}", path.display()))?;
        let listed = match parsed {
            ChannelsFile::List(l) => l,
            ChannelsFile::Map { channels } => channels,
        };
        refs.extend(listed);
    }
    refs.retain(|r| !r.trim().is_empty());
    if refs.is_empty() {
        anyhow::bail!("No channels given. Use --channel or --channels-file.");
    }
    Ok(refs)
}

pub async fn run(cli: &Cli, args: &MirrorArgs) -> Result<()> {
    let refs = load_channels(args)?;
    let app = App::new(cli).await?;
    let backend = TgBackend::new(&app.tg);

    let mut opts = EngineOptions::rooted_at(&app.store_dir);
    opts.page_limit = args.page_limit;
    opts.large_file_threshold = args.large_file_threshold_mb * 1024 * 1024;
    opts.refresh_reactions = args.refresh_reactions;
    opts.retry = RetryPolicy {
        max_attempts: args.max_retries,
        initial_delay: Duration::from_secs(1),
        backoff_factor: 2,
    };
    opts.transfer = ChunkTransfer {
        retry_budget: args.chunk_retry_budget,
        ..ChunkTransfer::default()
    };
    if let Some(dir) = &args.media_dir {
        opts.media_dir = dir.clone();
    }

    let pending_path = PathBuf::from(&app.store_dir).join("pending_large_files.json");
    let mut engine = Engine::new(&backend, &app.store, opts, pending_path, shutdown::global())?;

    let mut failures = 0usize;
    for reference in &refs {
        if shutdown::global().is_triggered() {
            eprintln!("Interrupted; remaining channels skipped.");
            break;
        }
        match engine.mirror(reference).await {
            Ok(report) => {
                println!(
                    "{} ({}): {} — {} messages, {} images, {} documents, {} queued, {} drained{}",
                    report.title,
                    report.channel_id,
                    report.mode,
                    report.messages,
                    report.images,
                    report.documents,
                    report.queued,
                    report.drained,
                    if report.interrupted { " (interrupted)" } else { "" },
                );
            }
            Err(e) => {
                failures += 1;
                log::error!("channel '{}' failed: {:#}", reference, e);
                eprintln!("Skipping '{}': {:#}", reference, e);
            }
        }
    }

    app.tg.disconnect();
    if failures == refs.len() {
        anyhow::bail!("All {} channels failed", failures);
    }
    Ok(())
}
