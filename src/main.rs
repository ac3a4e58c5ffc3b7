mod app;
mod client;
mod cmd;
mod engine;
mod lang;
mod shutdown;
mod store;
mod tg;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tgmirror",
    version,
    about = "Incremental Telegram channel mirror (pure Rust, no TDLib)"
)]
pub struct Cli {
    /// Store directory (default: ~/.tgmirror)
    #[arg(long, global = true, default_value = "~/.tgmirror")]
    pub store: String,

    #[command(subcommand)]
    pub command: cmd::Command,
}

impl Cli {
    pub fn store_dir(&self) -> String {
        let s = &self.store;
        if s.starts_with("~/") {
            if let Some(home) = dirs_home() {
                return format!("{}{}", home, &s[1..]);
            }
        }
        s.clone()
    }
}

fn dirs_home() -> Option<String> {
    std::env::var("HOME").ok()
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let shutdown = shutdown::ShutdownController::new();
    shutdown::set_global(shutdown.clone());

    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            log::info!("Received Ctrl+C, finishing the current message before stopping...");
            shutdown_clone.trigger();
        }
    });

    if let Err(e) = cmd::run(cli).await {
        // Don't report error if we're shutting down gracefully
        if shutdown.is_triggered() {
            std::process::exit(0);
        }
        let msg = format!("{e:#}");
        eprintln!("Error: {msg}");
        std::process::exit(1);
    }
}
