use crate::store::Store;
use crate::tg::TgClient;
use crate::Cli;
use anyhow::Result;

pub struct App {
    pub tg: TgClient,
    pub store: Store,
    pub store_dir: String,
}

impl App {
    pub async fn new(cli: &Cli) -> Result<Self> {
        let app = Self::new_unauthed(cli).await?;
        if !app.tg.client.is_authorized().await? {
            anyhow::bail!("Session expired or not authenticated. Run `tgmirror auth` first.");
        }
        Ok(app)
    }

    /// Create App without requiring authorization (for auth command).
    pub async fn new_unauthed(cli: &Cli) -> Result<Self> {
        let store_dir = cli.store_dir();
        std::fs::create_dir_all(&store_dir)?;

        // SqliteSession::open creates the file if it doesn't exist
        let session_path = format!("{}/session.db", store_dir);
        let tg = TgClient::connect(&session_path)?;
        let store = Store::open(&store_dir).await?;

        Ok(App {
            tg,
            store,
            store_dir,
        })
    }
}
