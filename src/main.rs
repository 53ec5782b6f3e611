use std::sync::Arc;

use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpResponse, HttpServer, Responder, get};
use anyhow::Context;
use serde_json::json;
use tracing::{error, info, warn};
use tracing_appender::rolling;

use hrm_leave::clock::{Clock, TokioClock};
use hrm_leave::config::Config;
use hrm_leave::db::init_db;
use hrm_leave::leave::{LeavePolicy, LifecycleEngine};
use hrm_leave::model::LeaveStatus;
use hrm_leave::notification::{DeliveryQueue, Dispatcher, LogSender, Notifier, Reconciler};
use hrm_leave::store::{
    LeaveFilter, MySqlEmployeeDirectory, MySqlLeaveStore, MySqlNotificationRepository,
};
use hrm_leave::utils::CachedDirectory;

const EMPLOYEE_CACHE_CAPACITY: u64 = 50_000;

#[get("/health")]
async fn health(
    queue: Data<Arc<DeliveryQueue>>,
    reconciler: Data<Arc<Reconciler>>,
) -> impl Responder {
    let body = json!({
        "delivery_queue": if queue.is_running() { "running" } else { "stopped" },
        "queued": queue.pending(),
        "reconciler": if reconciler.is_running() { "running" } else { "stopped" },
    });
    if queue.is_running() {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!("Server starting...");

    let pool = init_db(&config.database_url, config.db_max_connections)
        .await
        .context("failed to connect to database")?;

    let clock: Arc<dyn Clock> = Arc::new(TokioClock::new());
    let leave_store = Arc::new(MySqlLeaveStore::new(pool.clone()));
    let notifications = Arc::new(MySqlNotificationRepository::new(pool.clone()));
    let directory = Arc::new(CachedDirectory::new(
        Arc::new(MySqlEmployeeDirectory::new(pool.clone())),
        config.employee_cache_ttl,
        EMPLOYEE_CACHE_CAPACITY,
    ));

    let queue = Arc::new(DeliveryQueue::new(
        Dispatcher::new(
            notifications.clone(),
            Arc::new(LogSender),
            config.retry_policy(),
            clock.clone(),
            config.delivery_send_timeout,
        ),
        config.delivery_queue_capacity,
    ));
    queue.start(config.delivery_workers)?;

    let reconciler = Arc::new(Reconciler::new(
        notifications.clone(),
        queue.clone(),
        clock.clone(),
        config.reconciler(),
    ));
    reconciler.start();

    let engine = Arc::new(LifecycleEngine::new(
        leave_store.clone(),
        leave_store,
        directory.clone(),
        Notifier::new(notifications, queue.clone(), config.delivery_max_retries),
        LeavePolicy::new(config.leave_daily_rate),
        clock,
    ));

    // Employees with open requests are the ones the next transitions will need.
    actix_web::rt::spawn(async move {
        let filter = LeaveFilter {
            status: Some(LeaveStatus::Pending),
            per_page: Some(100),
            ..Default::default()
        };
        let page = match engine.list(&filter).await {
            Ok(page) => page,
            Err(e) => {
                warn!(error = %e, "Failed to list pending requests for cache warmup");
                return;
            }
        };
        let mut ids: Vec<u64> = page.data.iter().map(|r| r.employee_id).collect();
        ids.sort_unstable();
        ids.dedup();
        if let Err(e) = directory.warmup(&ids).await {
            warn!(error = %e, "Failed to warm up employee cache");
        }
    });

    let server_addr = config.server_addr.clone();
    let queue_data = queue.clone();
    let reconciler_data = reconciler.clone();
    let served = HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .app_data(Data::new(queue_data.clone()))
            .app_data(Data::new(reconciler_data.clone()))
            .service(health)
    })
    .bind(&server_addr)
    .with_context(|| format!("failed to bind {server_addr}"))?
    .run()
    .await;

    info!("Server stopped, draining delivery queue");
    reconciler.stop().await;
    if let Err(e) = queue.stop(config.delivery_shutdown_grace).await {
        error!(error = %e, "Delivery queue did not drain cleanly");
    }

    served.context("HTTP server failed")
}
