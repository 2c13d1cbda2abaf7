use anyhow::Result;
use campus_guard::api::rest::{AppState, RestApi};
use campus_guard::config;
use campus_guard::db::repositories::incidents::IncidentsRepository;
use campus_guard::db::DatabaseService;
use campus_guard::detector::DetectorClient;
use campus_guard::jobs::{JobMonitor, JobService};
use campus_guard::messaging::{self, EventPublisher, MessageBrokerTrait};
use campus_guard::notifications::{create_mailer, EmailNotifier};
use campus_guard::security::AuthService;
use campus_guard::services::{
    AlertDispatcher, AlertMaintenance, AlertService, CameraService, DashboardService,
    IncidentService, ReportService,
};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

/// Config file from the first argument or `CAMPUS_GUARD_CONFIG`
fn config_path() -> Option<PathBuf> {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CAMPUS_GUARD_CONFIG").ok())
        .map(PathBuf::from)
}

async fn run_app() -> Result<()> {
    let config = config::load_config(config_path().as_deref())?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.api.log_level))
        .init();
    info!("Starting campus-guard {}", env!("CARGO_PKG_VERSION"));

    // Connects and applies migrations when database.auto_migrate is set
    let database = DatabaseService::new(&config.database).await?;
    let db_pool = database.pool.clone();

    let message_broker = messaging::create_message_broker();
    let publisher = EventPublisher::new(message_broker.clone());
    info!("Message broker initialized");

    let mailer = create_mailer(&config.email)?;
    let notifier = EmailNotifier::new(
        mailer.clone(),
        &config.api.public_url,
        &config.email.contact_address,
    );

    let detector = DetectorClient::new(&config.detector)?;

    let auth_service = Arc::new(AuthService::new(
        db_pool.clone(),
        &config.security,
        notifier.clone(),
    ));
    let incidents = IncidentService::new(
        db_pool.clone(),
        publisher.clone(),
        config.alerts.utc_offset_minutes,
        &config.api.media_root,
    );
    let cameras = CameraService::new(db_pool.clone(), publisher.clone());
    let alerts = Arc::new(AlertService::new(db_pool.clone(), mailer, &config.alerts));
    let reports = ReportService::new(db_pool.clone(), detector.clone(), &config.api.media_root);
    let jobs = Arc::new(JobService::new(
        db_pool.clone(),
        detector,
        publisher.clone(),
        config.jobs.max_job_age_hours,
    ));
    let dashboard = DashboardService::new(
        incidents.clone(),
        cameras.clone(),
        reports.clone(),
        jobs.clone(),
        alerts.clone(),
    );

    let dispatcher = Arc::new(AlertDispatcher::new(
        alerts.clone(),
        IncidentsRepository::new(db_pool.clone()),
        message_broker.clone(),
    ));
    dispatcher.start().await?;

    let maintenance = if config.alerts.maintenance_interval_secs > 0 {
        let maintenance = Arc::new(AlertMaintenance::new(alerts.clone(), &config.alerts));
        maintenance.clone().start();
        Some(maintenance)
    } else {
        info!("Alert maintenance disabled");
        None
    };

    let monitor = if config.jobs.monitor_enabled {
        let monitor = Arc::new(JobMonitor::new(jobs.clone(), &config.jobs));
        monitor.clone().start().await?;
        info!("Job monitor started");
        Some(monitor)
    } else {
        info!("Job monitor disabled (set START_JOB_MONITOR=true to enable)");
        None
    };

    if let Err(e) = message_broker
        .publish(
            messaging::EventType::SystemStartup,
            None,
            serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }),
        )
        .await
    {
        warn!("Failed to publish system startup event: {}", e);
    }

    let state = AppState {
        db_pool,
        auth_service,
        incidents,
        cameras,
        alerts,
        reports,
        jobs,
        dashboard,
        notifier,
    };
    let http_server = RestApi::new(&config.api, state)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
        }
        info!("Shutting down...");
    };
    if let Err(e) = http_server.run(shutdown).await {
        error!("API server error: {}", e);
    }

    if let Some(monitor) = &monitor {
        monitor.stop();
    }
    if let Some(maintenance) = &maintenance {
        maintenance.stop();
    }
    dispatcher.stop().await;

    if let Err(e) = message_broker
        .publish(
            messaging::EventType::SystemShutdown,
            None,
            serde_json::json!({"reason": "Normal shutdown"}),
        )
        .await
    {
        error!("Failed to publish shutdown event: {}", e);
    }

    // Let in-flight callbacks finish before the consumers are aborted
    tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;
    message_broker.shutdown().await;

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(e) = run_app().await {
        eprintln!("Application error: {:#}", e);
        std::process::exit(1);
    }
}
