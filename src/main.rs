use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vllm_router::config::Config;
use vllm_router::openai::openai_server::router;
use vllm_router::openai::responses::APIError;
use vllm_router::openai::OpenAIServerData;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path of the JSON engine configuration
    #[arg(long, env = "CONFIG_PATH")]
    config: PathBuf,

    /// Overrides `global.host` from the config
    #[arg(long)]
    host: Option<String>,

    /// Overrides `global.port` from the config
    #[arg(long)]
    port: Option<u16>,

    /// Write logs to vllm-router.log as well as the console
    #[arg(long, default_value_t = false)]
    log: bool,
}

fn config_log(
    logger: ftail::Ftail,
    log_enable: bool,
    log_file: &str,
) -> Result<(), ftail::error::FtailError> {
    if !log_enable {
        return Ok(());
    }
    use tracing::log::LevelFilter;
    let mut cfg_filter = LevelFilter::Warn;
    if let Ok(level) = std::env::var("RUST_LOG") {
        let level = level.to_uppercase();
        let levels = [
            ("OFF", LevelFilter::Off),
            ("ERROR", LevelFilter::Error),
            ("WARN", LevelFilter::Warn),
            ("INFO", LevelFilter::Info),
            ("DEBUG", LevelFilter::Debug),
            ("TRACE", LevelFilter::Trace),
        ];
        for (name, filter) in levels {
            if level.contains(name) {
                cfg_filter = filter;
            }
        }
    }
    if std::path::Path::new(log_file).exists() {
        let _ = std::fs::remove_file(log_file);
    }
    logger
        .console(cfg_filter)
        .single_file(log_file, true, cfg_filter)
        .init()
}

#[tokio::main]
async fn main() -> Result<(), APIError> {
    let args = Args::parse();
    if args.log {
        if let Err(e) = config_log(ftail::Ftail::new(), true, "vllm-router.log") {
            eprintln!("Unable to set up file logging: {e}");
        }
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }

    let config = Config::load(&args.config).map_err(APIError::from)?;
    info!(
        "Loaded {} model(s) from {}",
        config.models.len(),
        args.config.display()
    );
    let scheduler = Arc::new(config.build_scheduler().map_err(APIError::from)?);
    scheduler.log_status();

    let server_data = OpenAIServerData {
        scheduler,
        owned_by: config.global.owned_by.clone(),
        keep_alive: config.global.keep_alive(),
    };
    let app = router(Arc::new(server_data));

    let host = args.host.unwrap_or(config.global.host);
    let port = args.port.unwrap_or(config.global.port);
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port))
        .await
        .map_err(|e| APIError::new(e.to_string()))?;
    warn!("Server started at http://{}:{}", host, port);
    axum::serve(listener, app)
        .await
        .map_err(|e| APIError::new(e.to_string()))?;

    Ok(())
}
