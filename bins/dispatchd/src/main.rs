//! Ride Dispatch CLI and Server Binary
//!
//! This is the main entry point for the dispatch service. It provides
//! commands for initializing, validating, and starting the service.

use anyhow::{Context, Result};
use cli::{Cli, Commands};
use config::{generate_default_config, load_config, save_config, validate_config, DispatchConfig};
use dispatch::api::create_coordinator_router;
use dispatch::{
    create_store, AcceptAnyToken, ConnectionRegistry, DriverSessionHandler, LogPublisher,
    MatchingCoordinator, MatchingSettings, RegistryConfig,
};
use observability::{init_logging, init_metrics, LogFormat};
use server::{
    health_routes, validate_config_ports, CombinedServer, DependencyStatus, HealthState,
    ServerConfig, ServerExt, ShutdownController,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Start { config, http, ws } => start_dispatch(config, http, ws).await,
        Commands::Validate { config } => {
            init_logging("dispatchd", LogFormat::Pretty, "info")?;
            validate_command(config).await
        }
        Commands::Init { output } => {
            init_logging("dispatchd", LogFormat::Pretty, "info")?;
            init_command(output).await
        }
    }
}

/// Log warnings and fail on errors
fn check_config(config: &DispatchConfig) -> Result<()> {
    let report = validate_config(config);

    if !report.warnings.is_empty() {
        warn!("Configuration warnings:");
        for warning in &report.warnings {
            warn!(field = %warning.field, message = %warning.message);
        }
    }

    if !report.is_valid() {
        error!(
            error_count = report.errors.len(),
            "Configuration validation failed"
        );
        for err in &report.errors {
            error!("{}", err);
        }
        anyhow::bail!("Cannot start dispatch due to configuration errors");
    }
    Ok(())
}

async fn start_dispatch<P: AsRef<Path>>(
    config_path: P,
    http_override: Option<u16>,
    ws_override: Option<u16>,
) -> Result<()> {
    let config_path = config_path.as_ref();
    let config = load_config(config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

    let format = LogFormat::parse(&config.logging.format).unwrap_or_default();
    init_logging(&config.service.name, format, &config.logging.level_or_default())?;
    info!(path = ?config_path, "Ride Dispatch starting...");

    check_config(&config)?;

    if config.metrics.enabled {
        init_metrics(config.metrics.port)?;
    }

    // Apply CLI overrides or use configured ports
    let http_port = http_override.unwrap_or(config.service.http_port);
    let ws_port = ws_override.unwrap_or(config.service.websocket_port);
    if http_override.is_none() {
        debug!(port = http_port, "Using configured HTTP port");
    }
    if ws_override.is_none() {
        debug!(port = ws_port, "Using configured WebSocket port");
    }

    let server_config = ServerConfig::new(config.service.host.clone(), http_port, ws_port);
    validate_config_ports(&server_config)?;

    let shutdown = ShutdownController::with_ctrl_c();

    // Engine
    let store = create_store(&config.store)
        .await
        .context("Failed to initialize driver store")?;
    warn!("Driver tokens are not verified beyond being non-empty");
    let registry = Arc::new(ConnectionRegistry::new(
        RegistryConfig::from(&config.connections),
        Arc::new(AcceptAnyToken),
    ));
    let keepalive = registry.spawn_keepalive(shutdown.child_token());
    let coordinator = MatchingCoordinator::new(
        store,
        Arc::clone(&registry),
        Arc::new(LogPublisher),
        MatchingSettings::from(&config.matching),
    );

    // Listeners
    let health = Arc::new(HealthState::new(config.service.name.clone()));
    health
        .set_dependency(DependencyStatus {
            name: "driver-store".to_string(),
            healthy: coordinator.store_healthy().await,
            detail: Some(config.store.store_type.clone()),
        })
        .await;
    let router = create_coordinator_router(coordinator.clone()).merge(health_routes(health));
    let sessions = DriverSessionHandler::new(coordinator)
        .with_write_timeout(config.connections.write_timeout());

    let server = CombinedServer::with_name(config.service.name.clone(), server_config)
        .with_http_router(router)
        .with_session_handler(Arc::new(sessions));
    server.validate_ports().await?;

    info!(
        service = %config.service.name,
        http_port,
        ws_port,
        store = %config.store.store_type,
        "Starting dispatch service"
    );

    // Runs until Ctrl+C
    let result = server.run_until(shutdown.token()).await;
    shutdown.shutdown();
    if let Err(e) = keepalive.await {
        warn!(%e, "Keep-alive task ended abnormally");
    }
    result?;

    info!("Ride Dispatch stopped");
    Ok(())
}

async fn validate_command<P: AsRef<Path>>(config_path: P) -> Result<()> {
    info!(path = ?config_path.as_ref(), "Validating configuration");

    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "Failed to load configuration");
            anyhow::bail!(e);
        }
    };

    let report = validate_config(&config);

    println!("\n=== Configuration Validation Report ===\n");

    if !report.defaults_applied.is_empty() {
        println!("Defaults Applied ({}):", report.defaults_applied.len());
        for default in &report.defaults_applied {
            println!("  [info] {} = {}", default.field, default.value);
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("Service: {}", config.service.name);
    println!(
        "Listeners: HTTP={}, WebSocket={}",
        config.service.http_port, config.service.websocket_port
    );
    println!("Driver store: {}", config.store.store_type);
    println!("Seed drivers: {}", config.store.seed_drivers.len());
    println!("Offer window: {}s", config.matching.offer_window_seconds);

    Ok(())
}

async fn init_command<P: AsRef<Path>>(output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!(?output_path, "Initializing new configuration file");

    let config = generate_default_config();

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    println!("This configuration includes:");
    println!("  - Service listeners (HTTP {}, WebSocket {})", config.service.http_port, config.service.websocket_port);
    println!("  - Matching defaults ({}s offer window)", config.matching.offer_window_seconds);
    println!("  - In-memory driver store with {} seed drivers", config.store.seed_drivers.len());
    println!();
    println!("Next steps:");
    println!("  1. Edit the configuration file to customize settings");
    println!("  2. Set required environment variables (database credentials)");
    println!(
        "  3. Run 'dispatchd validate --config {:?}' to check configuration",
        output_path
    );
    println!(
        "  4. Run 'dispatchd start --config {:?}' to start the service",
        output_path
    );

    Ok(())
}
