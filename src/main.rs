use std::path::PathBuf;

use anyhow::Context;
use regbridge_lib::config::AppConfig;

/// Config path from `--config <path>`, `-c <path>` or the first positional argument.
fn config_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => return args.next().map(PathBuf::from),
            other if !other.starts_with('-') => return Some(PathBuf::from(other)),
            _ => {}
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match config_path() {
        Some(path) => AppConfig::from_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AppConfig::default(),
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.logging.level.as_str()))
        .init();
    log::info!("regbridge {} starting", env!("CARGO_PKG_VERSION"));

    regbridge_lib::run(config).await
}
