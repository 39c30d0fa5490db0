mod captcha;
mod checkout;
mod hooks;
mod http;
mod metrics;
mod models;
mod monitor;
mod proxy;
mod rfrl;
mod supervisor;

use captcha::CaptchaBridge;
use hooks::WebhookNotifier;
use models::TaskSpec;
use supervisor::Supervisor;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "talaria", "fatal: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let supervisor = Supervisor::new(WebhookNotifier::from_env(), CaptchaBridge::from_env());

    let tasks_path = std::env::var("TASKS_FILE").unwrap_or_else(|_| "tasks.json".to_string());
    let raw = std::fs::read_to_string(&tasks_path)
        .map_err(|err| format!("cannot read {tasks_path}: {err}"))?;
    let specs: Vec<TaskSpec> = serde_json::from_str(&raw)
        .map_err(|err| format!("cannot parse {tasks_path}: {err}"))?;
    info!(target = "talaria", count = specs.len(), path = %tasks_path, "tasks loaded");

    for spec in specs {
        let label = spec.site.label.clone();
        match supervisor.create(spec).await {
            Ok(id) => supervisor.start(id).await?,
            Err(err) => warn!(target = "talaria", site = %label, %err, "task skipped"),
        }
    }

    tokio::signal::ctrl_c().await?;
    info!(target = "talaria", "shutting down");
    supervisor.shutdown().await;
    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,talaria=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
