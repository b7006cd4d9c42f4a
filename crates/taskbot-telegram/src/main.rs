//! Taskbot Telegram binary.
//!
//! Start the bot with:
//! ```bash
//! TELEGRAM_BOT_TOKEN=xxx OPENAI_API_KEY=yyy cargo run -p taskbot-telegram
//! ```

use clap::Parser;
use taskbot_core::config;
use taskbot_core::Settings;
use taskbot_telegram::{create_shared_state, TelegramBot};
use tracing_subscriber::EnvFilter;

/// Taskbot - turn Telegram messages into spreadsheet tasks
#[derive(Parser, Debug)]
#[command(name = "taskbot-telegram")]
#[command(about = "Telegram bot that collects tasks and appends them to Google Sheets")]
struct Args {
    /// Force polling even if TELEGRAM_WEBHOOK_URL is set
    #[arg(long)]
    polling: bool,

    /// Webhook port (overrides TELEGRAM_WEBHOOK_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Re-read the executor directory sheet, print it and exit
    #[arg(long)]
    refresh_executors: bool,

    /// Verbose logging (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    config::load_env();

    let filter = match args.verbose {
        0 => "taskbot_telegram=info,taskbot_agent=info,teloxide=warn",
        1 => "taskbot_telegram=debug,taskbot_agent=debug,taskbot_core=debug,teloxide=info",
        2 => "taskbot_telegram=trace,taskbot_agent=trace,taskbot_core=trace,teloxide=debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = config::ensure_all_dirs() {
        tracing::warn!(error = %e, "Failed to create all directories");
    }

    let mut settings = Settings::from_env()?;
    if let Some(port) = args.port {
        settings.webhook_port = port;
    }
    if args.polling {
        settings.webhook_url = None;
    }
    let mode = if settings.webhook_url.is_some() { "webhook" } else { "polling" };

    if args.refresh_executors {
        let state = create_shared_state(settings)?;
        let executors = state.refresh_executors().await?;
        println!("Found {} approved executors:", executors.len());
        for executor in executors {
            println!("  • {} - {} {}", executor.short_code, executor.name, executor.tg_username);
        }
        return Ok(());
    }

    let bot = TelegramBot::new(settings)?;

    match bot.get_me().await {
        Ok(username) => {
            tracing::info!(username = %username, mode, "Bot initialized successfully");
            println!("\nTaskbot");
            println!("   Bot: @{}", username);
            println!("   Mode: {}", mode);
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to get bot info");
            return Err(e.into());
        }
    }

    println!("\nOpen Telegram and send /start to begin");
    println!("   Press Ctrl+C to stop\n");

    bot.start().await?;

    Ok(())
}
