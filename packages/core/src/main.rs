use std::io::{self, BufRead, Write};
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;

use ops_controller::api::{self, status::StatusApiState};
use ops_controller::cli::{Cli, Command};
use ops_controller::config::Config;
use ops_controller::controller::{OpsController, DESTROY_CONFIRMATION};
use ops_controller::error::AppError;
use ops_controller::logging::init_logging;
use ops_controller::metrics::AppMetrics;
use ops_controller::postgres::PostgresConfigurator;
use ops_controller::scheduler::{run_monitoring, run_parked, StatusFeed};
use ops_controller::services::railway::RailwayClient;
use ops_controller::supervisor::SupervisorManager;

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    let cli = Cli::parse();

    let mut config = Config::from_env()
        .map_err(AppError::Config)
        .unwrap_or_else(|err| {
            tracing::error!("{}", err);
            std::process::exit(1);
        });
    cli.apply_overrides(&mut config);

    let succeeded = match run(cli.command(), config).await {
        Ok(succeeded) => succeeded,
        Err(err) => {
            tracing::error!("{}", err);
            false
        }
    };

    std::process::exit(if succeeded { 0 } else { 1 });
}

async fn run(command: Command, config: Config) -> Result<bool, AppError> {
    if command.parks(&config) {
        spawn_status_api(&config, StatusFeed::default());
        run_parked(config.limits.idle_sleep).await;
        return Ok(true);
    }

    config.validate()?;

    let postgres = Arc::new(PostgresConfigurator::connect_lazy(&config.database_url)?);
    let metrics = Arc::new(AppMetrics::new()?);
    let mut controller = OpsController::new(
        config.clone(),
        Arc::new(RailwayClient::new(&config)),
        postgres.clone(),
        Arc::new(SupervisorManager::new(&config)?),
    )
    .with_metrics(metrics.clone());

    match command {
        Command::Monitor => {
            let feed = StatusFeed::new(Some(metrics));
            spawn_status_api(&config, feed.clone());
            run_monitoring(controller, feed).await;
            Ok(true)
        }
        Command::Deploy => {
            controller.load_state();
            let deployed = controller.run_full_deployment().await;
            controller.save_state();
            Ok(deployed)
        }
        Command::Status => {
            let report = controller.check_status().await;
            Ok(report.replication.is_ok() && report.supervisor.is_ok())
        }
        Command::Destroy { yes } => {
            let confirmation = if yes {
                DESTROY_CONFIRMATION.to_string()
            } else {
                prompt_confirmation()?
            };

            controller.load_state();
            let destroyed = controller.destroy(&confirmation).await;
            if destroyed {
                controller.save_state();
            }
            Ok(destroyed)
        }
        Command::VerifyPostgres => postgres.verify().await,
    }
}

fn spawn_status_api(config: &Config, feed: StatusFeed) {
    let Some(port) = config.status_port else {
        return;
    };

    let router = api::create_router(StatusApiState {
        feed,
        monitoring: config.into(),
    });
    tokio::spawn(async move {
        if let Err(err) = api::serve(port, router).await {
            tracing::error!("Status API stopped: {}", err);
        }
    });
}

fn prompt_confirmation() -> Result<String, AppError> {
    print!(
        "This will destroy the supervisor droplet. Type '{}' to confirm: ",
        DESTROY_CONFIRMATION
    );
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().to_string())
}
