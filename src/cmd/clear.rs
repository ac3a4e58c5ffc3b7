use crate::store::Store;
use crate::Cli;
use anyhow::Result;
use clap::Args;
use std::io::{self, Write};

#[derive(Args, Debug, Clone)]
pub struct ClearArgs {
    /// Skip confirmation prompt
    #[arg(long, short = 'y')]
    pub confirm: bool,
}

pub async fn run(cli: &Cli, args: &ClearArgs) -> Result<()> {
    let store_dir = cli.store_dir();
    let store = Store::open(&store_dir).await?;

    let counts = store.counts().await?;
    if counts.total() == 0 {
        println!("Nothing to clear.");
        return Ok(());
    }

    if !args.confirm {
        println!("This will delete:");
        println!("  - {} channels", counts.channels);
        println!("  - {} messages", counts.messages);
        println!("  - {} reactions", counts.reactions);
        println!("  - {} images", counts.images);
        println!("  - {} documents", counts.documents);
        println!();
        print!("Are you sure? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim().to_lowercase();

        if input != "y" && input != "yes" {
            println!("Aborted.");
            return Ok(());
        }
    }

    store.wipe().await?;

    println!("Cleared:");
    println!("  - {} channels", counts.channels);
    println!("  - {} messages", counts.messages);
    println!("  - {} reactions", counts.reactions);
    println!("  - {} images", counts.images);
    println!("  - {} documents", counts.documents);
    println!("Downloaded media files on disk are kept.");

    Ok(())
}
