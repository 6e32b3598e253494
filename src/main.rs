use clap::Parser;
use rally::app::App;
use rally::cli::{Args, ServiceName};
use rally::logging::setup_logging;
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    let enabled_services = if args.services.is_empty() {
        ServiceName::all()
    } else {
        args.services.clone()
    };

    // Load config and setup logging before App::new() so startup logs are never silently dropped
    let early_config = match rally::config::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config for logging setup: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&early_config, args.tracing);

    // Create and initialize the application
    let mut app = match App::new(early_config).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = ?e, "Failed to initialize application");
            return ExitCode::FAILURE;
        }
    };

    info!(
        enabled_services = ?enabled_services,
        "services configuration loaded"
    );

    // Log application startup context
    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting rally"
    );

    if let Err(e) = app.setup_services(&enabled_services) {
        error!(error = ?e, "Failed to setup services");
        return ExitCode::FAILURE;
    }

    // Start all services and run the application
    app.start_services();
    app.run().await
}
