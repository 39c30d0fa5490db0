use crate::captcha::CaptchaBridge;
use crate::checkout::Checkout;
use crate::hooks::WebhookNotifier;
use crate::models::{
    Classification, OutcomeEvent, ResolvedProduct, TaskEvent, TaskSpec, TaskStatus,
};
use crate::monitor::{Monitor, MonitorError, MonitorOutcome};
use crate::proxy::ProxyPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unknown task {0}")]
    UnknownTask(Uuid),
    #[error("task {0} is running")]
    TaskRunning(Uuid),
    #[error("configuration: {0}")]
    Config(String),
}

struct TaskHandle {
    spec: TaskSpec,
    status: Arc<Mutex<TaskStatus>>,
    log: Arc<Mutex<Vec<TaskEvent>>>,
    stop: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
}

impl TaskHandle {
    fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| !w.is_finished())
            .unwrap_or(false)
    }
}

/// Owns every task's lifecycle: creation, start/stop, edits, and
/// removal. Each started task runs as one spawned worker alternating
/// between monitoring and checkout until a terminal outcome or a stop.
#[derive(Clone)]
pub struct Supervisor {
    tasks: Arc<Mutex<HashMap<Uuid, TaskHandle>>>,
    notifier: WebhookNotifier,
    captcha: Option<CaptchaBridge>,
}

impl Supervisor {
    pub fn new(notifier: WebhookNotifier, captcha: Option<CaptchaBridge>) -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            notifier,
            captcha,
        }
    }

    /// Registers a task without starting it. Site/variant configuration
    /// problems surface here, not mid-run.
    pub async fn create(&self, spec: TaskSpec) -> Result<Uuid, SupervisorError> {
        crate::monitor::variants::option_index(&spec.site)
            .map_err(|err| SupervisorError::Config(err.to_string()))?;
        let id = Uuid::new_v4();
        let (stop, _) = watch::channel(false);
        let handle = TaskHandle {
            spec,
            status: Arc::new(Mutex::new(TaskStatus::Idle)),
            log: Arc::new(Mutex::new(Vec::new())),
            stop,
            worker: None,
        };
        let mut guard = self.tasks.lock().await;
        guard.insert(id, handle);
        info!(target = "talaria.supervisor", task_id = %id, "task created");
        Ok(id)
    }

    pub async fn start(&self, id: Uuid) -> Result<(), SupervisorError> {
        let mut guard = self.tasks.lock().await;
        let handle = guard.get_mut(&id).ok_or(SupervisorError::UnknownTask(id))?;
        if handle.is_running() {
            return Err(SupervisorError::TaskRunning(id));
        }
        let _ = handle.stop.send(false);
        let ctx = TaskContext {
            id,
            spec: handle.spec.clone(),
            status: handle.status.clone(),
            log: handle.log.clone(),
            stop: handle.stop.subscribe(),
            notifier: self.notifier.clone(),
            captcha: self.captcha.clone(),
        };
        handle.worker = Some(tokio::spawn(run_task(ctx)));
        info!(target = "talaria.supervisor", task_id = %id, "task started");
        Ok(())
    }

    /// Signals the worker to stop; it observes the signal at the next
    /// step boundary.
    pub async fn stop(&self, id: Uuid) -> Result<(), SupervisorError> {
        let guard = self.tasks.lock().await;
        let handle = guard.get(&id).ok_or(SupervisorError::UnknownTask(id))?;
        let _ = handle.stop.send(true);
        info!(target = "talaria.supervisor", task_id = %id, "stop requested");
        Ok(())
    }

    /// Replaces the task's spec. Rejected while the worker is live so an
    /// in-flight checkout never sees mixed configuration.
    pub async fn edit(&self, id: Uuid, spec: TaskSpec) -> Result<(), SupervisorError> {
        crate::monitor::variants::option_index(&spec.site)
            .map_err(|err| SupervisorError::Config(err.to_string()))?;
        let mut guard = self.tasks.lock().await;
        let handle = guard.get_mut(&id).ok_or(SupervisorError::UnknownTask(id))?;
        if handle.is_running() {
            return Err(SupervisorError::TaskRunning(id));
        }
        handle.spec = spec;
        Ok(())
    }

    pub async fn remove(&self, id: Uuid) -> Result<(), SupervisorError> {
        let mut guard = self.tasks.lock().await;
        let handle = guard.remove(&id).ok_or(SupervisorError::UnknownTask(id))?;
        let _ = handle.stop.send(true);
        if let Some(worker) = handle.worker {
            worker.abort();
        }
        info!(target = "talaria.supervisor", task_id = %id, "task removed");
        Ok(())
    }

    pub async fn status(&self, id: Uuid) -> Option<TaskStatus> {
        let guard = self.tasks.lock().await;
        match guard.get(&id) {
            Some(handle) => Some(*handle.status.lock().await),
            None => None,
        }
    }

    pub async fn events(&self, id: Uuid) -> Option<Vec<TaskEvent>> {
        let guard = self.tasks.lock().await;
        match guard.get(&id) {
            Some(handle) => Some(handle.log.lock().await.clone()),
            None => None,
        }
    }

    pub async fn list(&self) -> Vec<(Uuid, TaskStatus)> {
        let guard = self.tasks.lock().await;
        let mut out = Vec::with_capacity(guard.len());
        for (id, handle) in guard.iter() {
            out.push((*id, *handle.status.lock().await));
        }
        out
    }

    /// Stops every task and waits for the workers to wind down.
    pub async fn shutdown(&self) {
        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().await;
            guard
                .values_mut()
                .filter_map(|handle| {
                    let _ = handle.stop.send(true);
                    handle.worker.take()
                })
                .collect()
        };
        for worker in workers {
            let _ = worker.await;
        }
        info!(target = "talaria.supervisor", "all tasks stopped");
    }
}

struct TaskContext {
    id: Uuid,
    spec: TaskSpec,
    status: Arc<Mutex<TaskStatus>>,
    log: Arc<Mutex<Vec<TaskEvent>>>,
    stop: watch::Receiver<bool>,
    notifier: WebhookNotifier,
    captcha: Option<CaptchaBridge>,
}

impl TaskContext {
    async fn set_status(&self, status: TaskStatus) {
        *self.status.lock().await = status;
    }

    async fn push_event(&self, message: impl Into<String>) {
        self.log.lock().await.push(TaskEvent::new(message));
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// Sleeps unless a stop arrives first; returns true when stopped.
    async fn sleep_or_stop(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => self.stop_requested(),
            changed = self.stop.changed() => changed.is_err() || self.stop_requested(),
        }
    }

    async fn emit_outcome(
        &self,
        classification: Classification,
        message: Option<String>,
        product: Option<&ResolvedProduct>,
        price: Option<String>,
        checkout_url: Option<String>,
    ) {
        let event = OutcomeEvent {
            task_id: self.id,
            success: classification.is_success(),
            classification,
            message,
            product: product.map(|p| p.title.clone()),
            price,
            store: self.spec.site.label.clone(),
            profile: self.spec.profile.name.clone(),
            size: product.map(|p| p.size.clone()),
            checkout_url,
        };
        self.notifier.notify(&event).await;
    }
}

async fn run_task(mut ctx: TaskContext) {
    let pool = ProxyPool::from_strings(&ctx.spec.proxies);
    let mut monitor = match Monitor::new(
        ctx.spec.site.clone(),
        ctx.spec.product.clone(),
        ctx.spec.sizes.clone(),
        pool.clone(),
        ctx.spec.monitor_delay_ms,
    ) {
        Ok(monitor) => monitor,
        Err(err) => {
            error!(target = "talaria.supervisor", task_id = %ctx.id, %err, "task misconfigured");
            ctx.push_event(err.to_string()).await;
            ctx.set_status(TaskStatus::Failed).await;
            return;
        }
    };
    let error_delay = Duration::from_millis(ctx.spec.error_delay_ms);

    loop {
        ctx.set_status(TaskStatus::Monitoring).await;
        let product = match monitor_until_resolved(&mut ctx, &mut monitor, error_delay).await {
            Phase::Resolved(product) => product,
            Phase::Stopped => {
                ctx.set_status(TaskStatus::Stopped).await;
                ctx.push_event("stopped").await;
                return;
            }
            Phase::Burned => {
                ctx.emit_outcome(Classification::RateLimited, None, None, None, None)
                    .await;
                ctx.push_event("rate limited, task burned").await;
                ctx.set_status(TaskStatus::Failed).await;
                return;
            }
            Phase::Misconfigured(message) => {
                ctx.push_event(message).await;
                ctx.set_status(TaskStatus::Failed).await;
                return;
            }
        };
        ctx.push_event(format!("found {} ({})", product.title, product.size))
            .await;

        ctx.set_status(TaskStatus::CheckingOut).await;
        let captcha_token = request_captcha(&ctx, &product).await;
        let checkout = Checkout::new(
            ctx.spec.site.clone(),
            ctx.spec.profile.clone(),
            product.clone(),
            pool.clone(),
            captcha_token,
        );
        let result = tokio::select! {
            result = checkout.run() => result,
            changed = ctx.stop.changed() => {
                if changed.is_err() || ctx.stop_requested() {
                    ctx.set_status(TaskStatus::Stopped).await;
                    ctx.push_event("stopped").await;
                    return;
                }
                continue;
            }
        };

        match result {
            Ok(outcome) => {
                ctx.emit_outcome(
                    outcome.classification,
                    outcome.message.clone(),
                    Some(&product),
                    outcome.price.clone(),
                    outcome.checkout_url.clone(),
                )
                .await;
                match outcome.classification {
                    Classification::Processing => {
                        ctx.push_event("payment processing, order placed").await;
                        ctx.set_status(TaskStatus::Success).await;
                        return;
                    }
                    Classification::SoldOut => {
                        ctx.push_event("sold out, back to monitoring").await;
                        if ctx.sleep_or_stop(Duration::from_millis(ctx.spec.monitor_delay_ms)).await
                        {
                            ctx.set_status(TaskStatus::Stopped).await;
                            return;
                        }
                    }
                    other => {
                        let detail = outcome.message.unwrap_or_else(|| "no detail".to_string());
                        warn!(
                            target = "talaria.supervisor",
                            task_id = %ctx.id,
                            classification = ?other,
                            detail = %detail,
                            "checkout failed terminally"
                        );
                        ctx.push_event(format!("checkout failed: {detail}")).await;
                        ctx.set_status(TaskStatus::Failed).await;
                        return;
                    }
                }
            }
            Err(err) if err.is_rate_limited() => {
                ctx.emit_outcome(Classification::RateLimited, None, Some(&product), None, None)
                    .await;
                ctx.push_event("rate limited, task burned").await;
                ctx.set_status(TaskStatus::Failed).await;
                return;
            }
            Err(err) => {
                warn!(target = "talaria.supervisor", task_id = %ctx.id, %err, "checkout attempt failed");
                ctx.push_event(err.to_string()).await;
                if ctx.sleep_or_stop(error_delay).await {
                    ctx.set_status(TaskStatus::Stopped).await;
                    return;
                }
            }
        }
    }
}

enum Phase {
    Resolved(ResolvedProduct),
    Stopped,
    Burned,
    Misconfigured(String),
}

async fn monitor_until_resolved(
    ctx: &mut TaskContext,
    monitor: &mut Monitor,
    error_delay: Duration,
) -> Phase {
    loop {
        if ctx.stop_requested() {
            return Phase::Stopped;
        }
        match monitor.poll_once().await {
            Ok(MonitorOutcome::Resolved(product)) => return Phase::Resolved(product),
            Ok(MonitorOutcome::NotFoundRetry { delay, notice }) => {
                if let Some(notice) = notice {
                    ctx.push_event(notice).await;
                }
                if ctx.sleep_or_stop(delay).await {
                    return Phase::Stopped;
                }
            }
            Err(MonitorError::RateLimited) => return Phase::Burned,
            Err(err @ (MonitorError::Ambiguous(_) | MonitorError::Config(_))) => {
                return Phase::Misconfigured(err.to_string());
            }
            Err(err) => {
                warn!(target = "talaria.supervisor", task_id = %ctx.id, %err, "monitor cycle failed");
                if ctx.sleep_or_stop(error_delay).await {
                    return Phase::Stopped;
                }
            }
        }
    }
}

// Storefront checkout pages share one reCAPTCHA site key; an explicit
// override wins.
const DEFAULT_CAPTCHA_SITE_KEY: &str = "6LeoeSkTAAAAAA9rkZs5oS82l69OEYjKRZAiKdaF";

async fn request_captcha(ctx: &TaskContext, product: &ResolvedProduct) -> Option<String> {
    let bridge = ctx.captcha.as_ref()?;
    let site_key =
        std::env::var("CAPTCHA_SITE_KEY").unwrap_or_else(|_| DEFAULT_CAPTCHA_SITE_KEY.to_string());
    let runner_id = ctx.id.to_string();
    match bridge.solve(&runner_id, &site_key, &product.url).await {
        Ok(token) => Some(token),
        Err(err) => {
            warn!(
                target = "talaria.supervisor",
                task_id = %ctx.id,
                %err,
                "captcha solve failed, submitting without token"
            );
            None
        }
    }
}
