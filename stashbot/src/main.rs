use std::sync::Arc;

use tracing::info;

use stashbot::commands::Dispatcher;
use stashbot::config::Config;
use stashbot::logging::init_logging;
use stashbot::pipeline::PipelineContext;
use stashbot::tasks::TaskRegistry;
use stashbot::telegram::BotClient;
use stashbot::utils::fs::ensure_dir_all;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging
    let logs = Arc::new(init_logging()?);

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    ensure_dir_all(&config.stash_dir).await?;
    info!("Stash directory: {}", config.stash_dir.display());

    // Connect to the Bot API
    let client = Arc::new(BotClient::new(&config.bot_token));
    let identity = client.get_me().await?;
    let bot_username = identity.username;
    match &bot_username {
        Some(name) => info!("Bot @{} connected (id {})", name, identity.id),
        None => info!("Bot connected (id {})", identity.id),
    }

    let registry = Arc::new(TaskRegistry::new(config.max_downloads, config.max_uploads));
    let ffmpeg = ffbridge::Ffmpeg::with_config(config.ffmpeg.clone());
    let ctx = PipelineContext {
        registry: registry.clone(),
        gateway: client.clone(),
        toolkit: Arc::new(ffmpeg),
        config: config.clone(),
    };

    let dispatcher = Dispatcher::new(client, ctx, logs, bot_username);
    tokio::select! {
        _ = dispatcher.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            registry.abort_all();
        }
    }

    Ok(())
}
