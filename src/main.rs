//! pibot - runs one IRC bot from a TOML configuration file.
//!
//! Usage: `pibot [config.toml]` (defaults to `pibot.toml`).

use anyhow::Context;
use pibot::{Bot, BotConfig, Hook};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "pibot.toml".to_string());

    let config = BotConfig::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path))?;

    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    info!(
        network = %config.network,
        port = config.port,
        channel = %config.channel,
        nick = %config.nick,
        "Starting pibot"
    );

    let bot = Bot::new(config);
    bot.on(Hook::MessageReceived, |event, _| {
        if let Some(msg) = event.as_message() {
            info!(recipient = %msg.target, "<{}> {}", msg.user, msg.message);
        }
    });

    bot.run().await?;
    info!("Bot halted.");
    Ok(())
}
