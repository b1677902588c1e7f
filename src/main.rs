use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use household_expenses::alert::AlertLayer;
use household_expenses::config::Config;
use household_expenses::dialogue::DialogueController;
use household_expenses::sheets::SheetMirror;
use household_expenses::store::ExpenseStore;
use household_expenses::telegram::TelegramClient;

type Controller = DialogueController<Option<SheetMirror>>;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "expenses.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("❌ {e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("household_expenses.log"))
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("❌ Failed to open log file in {}: {e}", log_dir.display());
            std::process::exit(1);
        }
    };
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let alerts = config
        .log_chat_id
        .map(|chat_id| AlertLayer::new(bot.clone(), chat_id));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(alerts)
        .init();

    info!("🚀 Starting household-expenses...");
    info!("Loaded config from {config_path}");
    info!("Allowed users: {:?}", config.allowed_users);

    let store = match ExpenseStore::open(&config.database_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open expense store {:?}: {e}", config.database_path);
            std::process::exit(1);
        }
    };

    let mirror = match &config.sheets {
        Some(sheets) => match SheetMirror::new(sheets) {
            Ok(mirror) => {
                info!("📄 Mirroring expenses to spreadsheet '{}'", sheets.sheet_name);
                Some(mirror)
            }
            Err(e) => {
                warn!("Spreadsheet mirror disabled: {e}");
                None
            }
        },
        None => {
            info!("Spreadsheet mirror disabled (no sheets section)");
            None
        }
    };

    let controller: Arc<Controller> = Arc::new(DialogueController::new(config.clone(), store, mirror));
    let telegram = Arc::new(TelegramClient::new(bot.clone()));

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![controller, telegram])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_message(msg: Message, controller: Arc<Controller>, telegram: Arc<TelegramClient>) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let replies = controller.handle(user.id, &user.first_name, text).await;
    for reply in replies {
        // Failures are already logged by the client; keep delivering the rest.
        let _ = telegram.send(msg.chat.id, reply).await;
    }
    Ok(())
}
