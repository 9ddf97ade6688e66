use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use ephimail::storage::open_store;
use ephimail::{
    AppState, Config, DomainAllowList, IngestBackend, MailStorage, MailboxHub, RsaOaepEncryptor,
    SmtpServer, WebServer,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration
    let mut config = match Config::load("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };
    config.apply_env_overrides();

    // Initialize logging
    if let Err(e) = ephimail::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        ephimail::logging::init_console_only(&config.logging.level);
    }

    info!("Ephimail - disposable email service");

    if let Err(e) = run(config).await {
        error!("{}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(config: Config) -> ephimail::Result<()> {
    config.validate()?;

    let store = open_store(&config.storage).await?;
    let storage = MailStorage::new(store, config.storage.email_ttl());
    let allowed = DomainAllowList::new(&config.smtp.allowed_domains);
    info!("Accepting mail for {}", allowed.domains().join(", "));

    let (hub, _hub_task) = MailboxHub::spawn(config.hub.queue_capacity);

    let app_state = Arc::new(AppState::new(
        storage.clone(),
        hub.clone(),
        allowed.clone(),
        &config.web,
        config.hub.clone(),
    ));
    let web = WebServer::bind(&config.web, app_state).await?;

    let backend = Arc::new(IngestBackend::new(
        allowed,
        storage,
        Arc::new(RsaOaepEncryptor::new()),
        hub,
    ));
    let smtp = SmtpServer::bind(&config.smtp).await?;

    tokio::try_join!(web.run(), smtp.run(backend))?;
    Ok(())
}
