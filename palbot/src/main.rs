use clap::Parser;
use log::{error, info, warn};
use palbot::config::Config;
use palbot::controller::LifecycleController;
use palbot::docker::DockerController;
use palbot::logging;
use palbot::matrix::Bot;
use rcon::RconClient;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    logging::init(logging::parse_level(&config.log_level))?;

    let config = match config.validated() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration err={}", e);
            process::exit(1);
        }
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    let docker = match DockerController::connect(config.docker_container_name.clone()) {
        Ok(docker) => docker,
        Err(e) => {
            error!("failed creating docker client err={}", e);
            process::exit(1);
        }
    };
    let rcon = RconClient::new(
        config.rcon_host.clone(),
        config.rcon_port,
        config.rcon_pass.clone().unwrap_or_default(),
        config.rcon_timeout(),
    );
    let controller = Arc::new(LifecycleController::new(
        docker,
        rcon,
        config.controller_settings(),
    ));

    let bot = match Bot::connect(&config, controller).await {
        Ok(bot) => bot,
        Err(e) => {
            error!("failed creating bot err={}", e);
            process::exit(1);
        }
    };

    if let Err(e) = bot.run(shutdown.clone()).await {
        if !shutdown.is_cancelled() {
            error!("bot stopped with error err={}", e);
            process::exit(1);
        }
    }

    info!("bot shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("failed installing SIGTERM handler err={}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed listening for Ctrl+C err={}", e);
    }
}
