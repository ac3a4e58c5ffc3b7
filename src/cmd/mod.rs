pub mod auth;
pub mod clear;
pub mod completions;
pub mod mirror;
pub mod version;

use crate::Cli;
use clap::Subcommand;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Authenticate with Telegram
    Auth(auth::AuthArgs),
    /// Mirror broadcast channels into the local archive
    Mirror(mirror::MirrorArgs),
    /// Clear the local archive (keeps session)
    Clear(clear::ClearArgs),
    /// Show version info
    Version,
    /// Generate shell completions
    Completions {
        /// Shell type to generate completions for
        #[arg(value_enum)]
        shell: completions::ShellType,
    },
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Auth(args) => auth::run(&cli, args).await,
        Command::Mirror(args) => mirror::run(&cli, args).await,
        Command::Clear(args) => clear::run(&cli, args).await,
        Command::Version => {
            version::run();
            Ok(())
        }
        Command::Completions { shell } => completions::run(shell),
    }
}
