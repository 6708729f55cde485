use std::time::Duration;

use anyhow::bail;
use common::{AutoPilotStage, JobCallback, JobContext, JobId, JobMetadata, JobSupervisor, SupervisorError};
use serde_json::{json, Value};
use tracing::info;

use crate::adapter::AutoPilotMonitor;
use crate::config::MonitorConfig;
use crate::poller::{ProgressMonitor, SnapshotCallback, StatusSource};

pub const AUTOPILOT_JOB_TYPE: &str = "autopilot_monitor";

/// Unidad de trabajo del job de monitoreo: sigue el proyecto hasta que
/// AutoPilot termina o falla.
pub async fn monitor_autopilot(
    config: MonitorConfig,
    project_id: String,
    ctx: JobContext,
    on_snapshot: Option<SnapshotCallback>,
) -> anyhow::Result<Value> {
    let poll_interval = config.poll_interval;
    follow_until_done(
        AutoPilotMonitor::new(config),
        poll_interval,
        project_id,
        ctx,
        on_snapshot,
    )
    .await
}

/// Corre el loop sobre `source` y la cierra antes de devolver.
/// Un snapshot final Failed hace fallar el job con su mensaje.
///
/// Si el job se cancela el supervisor descarta este future y la fuente
/// se libera en su drop.
pub async fn follow_until_done<S: StatusSource>(
    source: S,
    poll_interval: Duration,
    project_id: String,
    ctx: JobContext,
    on_snapshot: Option<SnapshotCallback>,
) -> anyhow::Result<Value> {
    let mut monitor = ProgressMonitor::new(source, poll_interval);

    let final_snapshot = monitor
        .run_until_terminal(&project_id, &ctx, on_snapshot.as_ref())
        .await?;
    monitor.source_mut().close().await;

    if final_snapshot.stage == AutoPilotStage::Failed {
        let reason = final_snapshot
            .error_message
            .unwrap_or_else(|| "AutoPilot falló sin mensaje".to_string());
        bail!("monitoreo de {} falló: {}", project_id, reason);
    }

    Ok(json!({
        "project_id": project_id,
        "stage": final_snapshot.stage,
        "models_completed": final_snapshot.units_completed,
        "total_models": final_snapshot.units_total,
    }))
}

/// Registra un job de monitoreo de AutoPilot para `project_id`.
pub fn submit_autopilot_monitor(
    supervisor: &JobSupervisor,
    config: MonitorConfig,
    owner_id: &str,
    project_id: &str,
    callbacks: Vec<JobCallback>,
) -> Result<JobId, SupervisorError> {
    let mut metadata = JobMetadata::new();
    metadata.insert("project_id".to_string(), json!(project_id));

    let project = project_id.to_string();
    let job_id = supervisor.submit(
        AUTOPILOT_JOB_TYPE,
        owner_id,
        metadata,
        callbacks,
        move |ctx| monitor_autopilot(config, project, ctx, None),
    )?;

    info!(
        "monitoreo de AutoPilot para proyecto {} encolado como job {}",
        project_id, job_id
    );
    Ok(job_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};
    use common::{callback, JobRecord, JobStatus};
    use async_trait::async_trait;
    use common::RemoteProgressSnapshot;
    use std::sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    };
    use tokio::net::TcpListener;
    use tokio::time::sleep;

    async fn spawn_fake_api(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Proyecto que suma un modelo por consulta y termina al llegar a `total`.
    fn growing_project(total: u32) -> Router {
        let polls = Arc::new(AtomicU32::new(0));
        let polls_models = polls.clone();
        Router::new()
            .route(
                "/projects/:id/",
                get(move || {
                    let polls = polls.clone();
                    async move {
                        let n = polls.fetch_add(1, Ordering::SeqCst) + 1;
                        Json(json!({
                            "stage": "modeling",
                            "autopilotDone": n >= total,
                            "targetedModelCount": total,
                        }))
                    }
                }),
            )
            .route(
                "/projects/:id/models/",
                get(move || {
                    let polls = polls_models.clone();
                    async move {
                        let n = polls.load(Ordering::SeqCst).min(total);
                        let models: Vec<Value> = (0..n)
                            .map(|i| json!({"modelType": format!("m{i}"), "createdAt": format!("2024-01-01T00:00:0{i}Z")}))
                            .collect();
                        Json(models)
                    }
                }),
            )
    }

    fn stalled_project() -> Router {
        Router::new()
            .route(
                "/projects/:id/",
                get(|| async { Json(json!({"stage": "eda", "autopilotDone": false})) }),
            )
            .route("/projects/:id/models/", get(|| async { Json(json!([])) }))
    }

    async fn wait_for(sup: &JobSupervisor, id: &str, status: JobStatus) -> JobRecord {
        for _ in 0..300 {
            if let Some(job) = sup.get(id) {
                if job.status == status {
                    return job;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("el job {id} nunca llegó a {status}: {:?}", sup.get(id));
    }

    /// Fuente que siempre devuelve el mismo snapshot y registra si se
    /// cerró explícitamente o se liberó por drop.
    struct TrackedSource {
        snapshot: RemoteProgressSnapshot,
        closed: Arc<AtomicBool>,
        dropped: Arc<AtomicBool>,
    }

    impl TrackedSource {
        fn new(snapshot: RemoteProgressSnapshot) -> (Self, Arc<AtomicBool>, Arc<AtomicBool>) {
            let closed = Arc::new(AtomicBool::new(false));
            let dropped = Arc::new(AtomicBool::new(false));
            let source = Self {
                snapshot,
                closed: closed.clone(),
                dropped: dropped.clone(),
            };
            (source, closed, dropped)
        }
    }

    #[async_trait]
    impl StatusSource for TrackedSource {
        async fn fetch_snapshot(&mut self, _resource_id: &str) -> RemoteProgressSnapshot {
            self.snapshot.clone()
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    impl Drop for TrackedSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn submit_tracked(sup: &JobSupervisor, source: TrackedSource, poll: Duration) -> String {
        sup.submit(AUTOPILOT_JOB_TYPE, "u1", JobMetadata::new(), vec![], move |ctx| {
            follow_until_done(source, poll, "p1".to_string(), ctx, None)
        })
        .unwrap()
    }

    fn config(base: String) -> MonitorConfig {
        MonitorConfig::new(base, "tok").with_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn job_completo_devuelve_resumen_del_proyecto() {
        let base = spawn_fake_api(growing_project(3)).await;
        let sup = JobSupervisor::new();

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let statuses_cb = statuses.clone();
        let cb = callback(move |job: JobRecord| {
            let statuses = statuses_cb.clone();
            async move {
                statuses.lock().unwrap().push(job.status);
                Ok(())
            }
        });

        let id = submit_autopilot_monitor(&sup, config(base), "u1", "p1", vec![cb]).unwrap();
        let job = wait_for(&sup, &id, JobStatus::Completed).await;

        assert_eq!(job.job_type, AUTOPILOT_JOB_TYPE);
        assert_eq!(job.owner_id, "u1");
        assert_eq!(job.metadata["project_id"], json!("p1"));
        assert_eq!(job.progress, 1.0);
        assert_eq!(
            job.result.unwrap(),
            json!({
                "project_id": "p1",
                "stage": "completed",
                "models_completed": 3,
                "total_models": 3,
            })
        );

        let statuses = statuses.lock().unwrap();
        assert_eq!(statuses.first(), Some(&JobStatus::Running));
        assert_eq!(statuses.last(), Some(&JobStatus::Completed));
    }

    #[tokio::test]
    async fn api_con_error_hace_fallar_el_job() {
        let router = Router::new().route(
            "/projects/:id/",
            get(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let base = spawn_fake_api(router).await;
        let sup = JobSupervisor::new();

        let id = submit_autopilot_monitor(&sup, config(base), "u1", "p1", vec![]).unwrap();
        let job = wait_for(&sup, &id, JobStatus::Failed).await;

        let error = job.error.unwrap();
        assert!(error.contains("p1"));
        assert!(error.contains("500"));
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn cancelar_un_monitoreo_en_curso() {
        let base = spawn_fake_api(stalled_project()).await;
        let sup = JobSupervisor::new();

        let id = submit_autopilot_monitor(&sup, config(base), "u1", "p1", vec![]).unwrap();
        wait_for(&sup, &id, JobStatus::Running).await;

        assert!(sup.cancel(&id));
        let job = wait_for(&sup, &id, JobStatus::Cancelled).await;
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn callback_de_snapshots_ve_cada_consulta() {
        let base = spawn_fake_api(growing_project(2)).await;
        let sup = JobSupervisor::new();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let on_snapshot = crate::poller::snapshot_callback(move |s: common::RemoteProgressSnapshot| {
            let seen = seen_cb.clone();
            async move { seen.lock().unwrap().push(s.units_completed) }
        });

        let cfg = config(base);
        let id = sup
            .submit(AUTOPILOT_JOB_TYPE, "u1", JobMetadata::new(), vec![], move |ctx| {
                monitor_autopilot(cfg, "p1".to_string(), ctx, Some(on_snapshot))
            })
            .unwrap();
        wait_for(&sup, &id, JobStatus::Completed).await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn submit_despues_de_shutdown_se_rechaza() {
        let sup = JobSupervisor::new();
        sup.shutdown().await;

        let err = submit_autopilot_monitor(&sup, config("http://127.0.0.1:1".into()), "u1", "p1", vec![])
            .unwrap_err();
        assert_eq!(err, SupervisorError::ShuttingDown);
    }

    #[tokio::test]
    async fn snapshot_failed_cierra_la_fuente_y_falla_el_job() {
        let sup = JobSupervisor::new();
        let (source, closed, dropped) =
            TrackedSource::new(RemoteProgressSnapshot::failed("p1", "HTTP 503"));

        let id = submit_tracked(&sup, source, Duration::from_millis(10));
        let job = wait_for(&sup, &id, JobStatus::Failed).await;

        assert!(job.error.unwrap().contains("HTTP 503"));
        assert!(closed.load(Ordering::SeqCst));
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancelar_libera_la_fuente_por_drop() {
        let sup = JobSupervisor::new();
        let mut running = RemoteProgressSnapshot::failed("p1", "");
        running.stage = AutoPilotStage::Modeling;
        running.error_message = None;
        let (source, closed, dropped) = TrackedSource::new(running);

        let id = submit_tracked(&sup, source, Duration::from_secs(3600));
        wait_for(&sup, &id, JobStatus::Running).await;
        assert!(!dropped.load(Ordering::SeqCst));

        assert!(sup.cancel(&id));
        wait_for(&sup, &id, JobStatus::Cancelled).await;

        // el future se descarta sin pasar por close()
        assert!(dropped.load(Ordering::SeqCst));
        assert!(!closed.load(Ordering::SeqCst));
    }
}
