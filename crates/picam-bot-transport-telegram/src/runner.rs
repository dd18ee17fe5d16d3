use crate::bot::handlers::{inline_query_event, message_event};
use crate::bot::TelegramTransport;
use crate::config::BotSettings;
use picam_bot_core::camera::RaspiStill;
use picam_bot_core::diagnostics::{Diagnostics, DiagnosticsSink};
use picam_bot_core::storage::{PhotoStore, R2PhotoStore, SqlitePhotoStore};
use picam_bot_runtime::dispatcher::{DispatchSettings, UpdateDispatcher};
use picam_bot_runtime::pipeline::{Pipeline, PipelineDeps};
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::InlineQuery;
use teloxide::update_listeners::Polling;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

type SharedDispatcher = Arc<UpdateDispatcher<TelegramTransport>>;

/// Run the Telegram transport runtime.
///
/// Returns after Ctrl-C, once every queued capture has been served.
pub async fn run_bot(settings: Arc<BotSettings>) {
    let bot = Bot::new(settings.telegram.telegram_token.clone());

    let me = match bot.get_me().await {
        Ok(me) => me,
        Err(e) => {
            error!("Failed to get info of the bot: {}", e);
            std::process::exit(1);
        }
    };

    // Getting updates does not work while a webhook is set.
    if let Err(e) = bot.delete_webhook().await {
        error!("Failed to delete webhook: {}", e);
        std::process::exit(1);
    }

    let diagnostics = init_diagnostics(&settings);
    diagnostics.log_info(&format!(
        "Starting bot: @{} ({})",
        me.username(),
        me.first_name
    ));

    let store = init_store(&settings).await;
    let camera = Arc::new(RaspiStill::new(settings.camera.camera_command()));
    info!("Camera command: {}", settings.camera.camera_command());

    let cancel = CancellationToken::new();
    let pipeline = Pipeline::start(
        PipelineDeps {
            transport: Arc::new(TelegramTransport::new(bot.clone())),
            camera,
            store,
            diagnostics,
        },
        DispatchSettings::from(settings.camera.as_ref()),
        settings.camera.capture_timeout(),
        cancel,
    );

    let listener = Polling::builder(bot.clone())
        .timeout(Duration::from_secs(settings.camera.monitor_interval_secs()))
        .build();

    info!("Bot is running...");

    Dispatcher::builder(bot, setup_handler())
        .dependencies(dptree::deps![pipeline.dispatcher.clone()])
        // One event at a time, in arrival order
        .distribution_function(|_| Some(()))
        .enable_ctrlc_handler()
        .build()
        .dispatch_with_listener(
            listener,
            LoggingErrorHandler::with_custom_text("Error while receiving update"),
        )
        .await;

    let stats = pipeline.shutdown().await;
    info!(?stats, "Bot stopped");
}

fn init_diagnostics(settings: &BotSettings) -> Arc<dyn DiagnosticsSink> {
    match settings.camera.loggly_token.as_deref() {
        Some(token) if !token.trim().is_empty() => {
            info!("Forwarding diagnostics to Loggly.");
            Arc::new(Diagnostics::with_loggly(token))
        }
        _ => Arc::new(Diagnostics::local()),
    }
}

async fn init_store(settings: &BotSettings) -> Arc<dyn PhotoStore> {
    let camera = settings.camera.as_ref();

    if camera.has_r2() {
        return match R2PhotoStore::new(camera).await {
            Ok(store) => {
                info!("R2 Storage initialized.");
                if store.check_connection().await.is_err() {
                    error!("R2 Storage connection check returned error.");
                }
                Arc::new(store)
            }
            Err(e) => {
                error!("Failed to initialize R2 Storage: {}", e);
                std::process::exit(1);
            }
        };
    }

    match SqlitePhotoStore::open(camera.db_path(), camera.max_photos_per_user()).await {
        Ok(store) => {
            info!("SQLite storage opened at {}", camera.db_path());
            Arc::new(store)
        }
        Err(e) => {
            error!("Failed to open SQLite storage: {}", e);
            std::process::exit(1);
        }
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_inline_query().endpoint(handle_inline_query))
}

async fn handle_message(
    msg: Message,
    update: Update,
    dispatcher: SharedDispatcher,
) -> Result<(), teloxide::RequestError> {
    let outcome = dispatcher
        .handle_event(message_event(u64::from(update.id.0), &msg))
        .await;
    tracing::debug!(?outcome, "Message handled");
    respond(())
}

async fn handle_inline_query(
    query: InlineQuery,
    update: Update,
    dispatcher: SharedDispatcher,
) -> Result<(), teloxide::RequestError> {
    let outcome = dispatcher
        .handle_event(inline_query_event(u64::from(update.id.0), &query))
        .await;
    tracing::debug!(?outcome, "Inline query handled");
    respond(())
}
