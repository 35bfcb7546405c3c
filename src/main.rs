//! CLI entry point for `mailsink`.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use mailsink::config::{self, Config};
use mailsink::error::SinkError;
use mailsink::notify::NotificationBus;
use mailsink::smtp::SmtpServer;
use mailsink::store::MessageStore;
use mailsink::web::{self, AppState, Shutdown};

/// Catch every mail sent to it and show it over HTTP.
#[derive(Parser)]
#[command(name = "mailsink", version, about)]
struct Cli {
    /// SMTP bind address
    #[arg(long, value_name = "IP", env = "MAILSINK_SMTP_IP")]
    smtp_ip: Option<IpAddr>,

    /// SMTP port
    #[arg(long, value_name = "PORT", env = "MAILSINK_SMTP_PORT")]
    smtp_port: Option<u16>,

    /// HTTP bind address
    #[arg(long, value_name = "IP", env = "MAILSINK_HTTP_IP")]
    http_ip: Option<IpAddr>,

    /// HTTP port
    #[arg(long, value_name = "PORT", env = "MAILSINK_HTTP_PORT")]
    http_port: Option<u16>,

    /// SQLite database file (messages are kept in memory if omitted)
    #[arg(long, value_name = "FILE", env = "MAILSINK_DB")]
    db: Option<PathBuf>,

    /// Ignore DELETE / requests instead of shutting down
    #[arg(long)]
    no_quit: bool,

    /// Configuration file (defaults to $MAILSINK_CONFIG or the user config dir)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Overlay command-line flags on the loaded configuration.
    fn apply(self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(ip) = self.smtp_ip {
            config.smtp.ip = ip;
        }
        if let Some(port) = self.smtp_port {
            config.smtp.port = port;
        }
        if let Some(ip) = self.http_ip {
            config.http.ip = ip;
        }
        if let Some(port) = self.http_port {
            config.http.port = port;
        }
        if let Some(db) = self.db {
            config.storage.db = Some(db);
        }
        if let Some(db) = config.storage.db.take() {
            let absolute = std::path::absolute(&db)
                .with_context(|| format!("resolving database path {}", db.display()))?;
            config.storage.db = Some(absolute);
        }
        config.http.no_quit |= self.no_quit;
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = config::load_config(cli.config.as_deref());

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.clone(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    cli.apply(&mut config)?;
    let _log_guard = setup_logging(&log_level, &config);

    let store = Arc::new(MessageStore::open(
        config.storage.db.as_deref(),
        NotificationBus::new(),
    )?);

    let smtp_listener = SmtpServer::bind(config.smtp.addr())?;
    let smtp = SmtpServer::new(
        &config.smtp.hostname,
        config.smtp.max_message_size,
        Arc::clone(&store),
    );
    thread::Builder::new()
        .name("smtp".into())
        .spawn(move || {
            if let Err(e) = smtp.serve(smtp_listener) {
                error!(error = %e, "SMTP server stopped");
            }
        })
        .context("spawning SMTP thread")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;

    let state = AppState {
        store,
        ping_interval: config.notify.ping_interval(),
        no_quit: config.http.no_quit,
        shutdown: Shutdown::new(),
    };
    let http_addr = config.http.addr();

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| SinkError::io(format!("binding HTTP to {http_addr}"), e))?;

        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted");
                shutdown.trigger();
            }
        });

        web::serve(listener, state).await
    })?;

    info!("Shutting down");
    Ok(())
}

/// Set up tracing with stderr output and optional file logging.
///
/// The returned guard flushes the file writer when dropped.
fn setup_logging(level: &str, config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let file = config
        .general
        .log_dir
        .as_ref()
        .filter(|dir| std::fs::create_dir_all(dir).is_ok())
        .map(|dir| tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "mailsink.log")));
    let (file_layer, guard) = match file {
        Some((writer, guard)) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer),
            ),
            Some(guard),
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}
