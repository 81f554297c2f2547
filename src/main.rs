use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use persona_reply::channels::{ImapSmtpGateway, MailGateway};
use persona_reply::config::Config;
use persona_reply::error::{ConfigError, Result};
use persona_reply::ledger::{CsvLedger, ReplyLedger};
use persona_reply::llm::create_provider;
use persona_reply::orchestrator::{LoopDeps, OrchestrationLoop};
use persona_reply::personas::PersonaStore;
use persona_reply::reply::{ReplyGenerator, load_fallback_message};
use persona_reply::shutdown::{ShutdownController, spawn_signal_listener};

#[tokio::main]
async fn main() -> Result<()> {
    // Captured before anything else so mail that predates the daemon is ignored.
    let start_timestamp = chrono::Utc::now();

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export EMAIL_IMAP_HOST=imap.example.com EMAIL_USERNAME=... EMAIL_PASSWORD=...");
        std::process::exit(1);
    });

    // Logs go to <log_dir>/runtime.log; the console only carries status lines.
    std::fs::create_dir_all(&config.paths.log_dir).map_err(ConfigError::Io)?;
    let file_appender = tracing_appender::rolling::never(&config.paths.log_dir, "runtime.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    tracing::info!("Starting auto reply bot v{}", env!("CARGO_PKG_VERSION"));

    eprintln!("📬 persona-reply v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mailbox: {} (IMAP: {})", config.email.from_address, config.email.imap_host);
    eprintln!("   Model: {} @ {}", config.llm.model, config.llm.base_url);
    eprintln!("   Interval: {}s", config.run.poll_interval.as_secs());
    eprintln!("   Logs: {}", config.paths.log_dir.join("runtime.log").display());
    eprintln!(
        "Auto reply bot started. Press Ctrl+C to stop. (Reply once per sender: {})",
        config.run.reply_once
    );

    // ── Shutdown ─────────────────────────────────────────────────────────
    let controller = ShutdownController::new();
    let _signals = spawn_signal_listener(controller.clone());

    // ── Mail gateway (authentication failure is fatal) ───────────────────
    let gateway: Arc<dyn MailGateway> = Arc::new(ImapSmtpGateway::new(config.email.clone()));
    if let Err(e) = gateway.verify().await {
        tracing::error!("Mailbox authentication failed: {e}");
        eprintln!("Error: {e}");
        return Err(e.into());
    }

    // ── Ledger, personas, fallback ───────────────────────────────────────
    let ledger: Arc<dyn ReplyLedger> = Arc::new(CsvLedger::open(&config.paths.ledger_path).await?);
    eprintln!(
        "   Ledger: {} ({} senders)",
        config.paths.ledger_path.display(),
        ledger.len().await
    );

    let personas = PersonaStore::load(&config.paths.characters_dir);
    eprintln!("   Personas: {}", personas.names().join(", "));

    let fallback_message = load_fallback_message(&config.paths.fallback_path);

    // ── Loop ─────────────────────────────────────────────────────────────
    let llm = create_provider(&config.llm);
    let deps = LoopDeps {
        gateway,
        ledger,
        personas,
        generator: ReplyGenerator::new(llm),
        fallback_message,
    };

    let mut reply_loop = OrchestrationLoop::new(
        deps,
        config.run.clone(),
        start_timestamp,
        controller.handle(),
        StdRng::from_entropy(),
    );
    let summary = reply_loop.run().await;
    tracing::info!(?summary, "Exiting");

    Ok(())
}
