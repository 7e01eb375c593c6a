mod config;
mod sessions;

use camarade_social::SocialDirectory;
use camarade_social::bridge::main_channel;
use sessions::{LobbySessions, MainState};
use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Builder;
use tokio::task::LocalSet;
use tracing::{debug, error, info};

fn main() -> ExitCode {
    let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .json()
        .init();

    let config_path = env::var("CAMARADE_CONFIG").unwrap_or_else(|_| "camarade.toml".to_string());
    let config = match config::load_configuration(Path::new(&config_path)) {
        Ok(config) => config,
        Err(err) => {
            error!(path = %config_path, error = %err, "configuration rejected");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "runtime construction failed");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "server terminated with error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: config::ServerConfig) -> Result<(), camarade_social::SocialError> {
    let storage = camarade_storage::connect(&config.postgres_dsn).await?;
    storage.migrate().await?;
    info!("storage online");

    let (handle, mut queue) = main_channel::<MainState>();
    let sessions = Arc::new(LobbySessions::new(handle));
    let directory = Arc::new(SocialDirectory::new(
        Arc::new(storage),
        Arc::clone(&sessions) as Arc<dyn camarade_social::notify::Notifier>,
    ));
    let warmed = directory.warm().await?;
    info!(blocks = warmed, "social directory warmed");

    // The main cooperative context: every view mutation and every engine
    // completion continuation runs here, one at a time.
    let local = LocalSet::new();
    local
        .run_until(async move {
            let mut state = MainState::new(Arc::clone(&sessions));
            let mut sweep = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));
            loop {
                tokio::select! {
                    task = queue.next() => {
                        match task {
                            Some(task) => task(&mut state),
                            None => break,
                        }
                    }
                    _ = sweep.tick() => {
                        let outcome = state.views.sweep_once(&state);
                        if outcome.refreshed > 0 || outcome.dropped > 0 {
                            debug!(
                                refreshed = outcome.refreshed,
                                dropped = outcome.dropped,
                                "view sweep pass"
                            );
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("shutdown signal received");
                        break;
                    }
                }
            }
            state.views.clear();
        })
        .await;

    directory.clear_caches().await;
    info!("server stopped");
    Ok(())
}
