use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use common::{JobCancelled, JobContext, JobUpdate, RemoteProgressSnapshot};
use futures::{future::BoxFuture, FutureExt};
use tokio::time::sleep;
use tracing::{debug, info};

/// Una fuente de estado remoto que el loop de polling consulta.
///
/// `fetch_snapshot` no devuelve errores: los fallos de red o de parseo
/// vuelven como un snapshot con stage == Failed.
#[async_trait]
pub trait StatusSource: Send {
    async fn fetch_snapshot(&mut self, resource_id: &str) -> RemoteProgressSnapshot;

    /// Libera los recursos de red de la fuente.
    async fn close(&mut self) {}
}

/// Callback externo opcional, recibe cada snapshot.
pub type SnapshotCallback = Arc<dyn Fn(RemoteProgressSnapshot) -> BoxFuture<'static, ()> + Send + Sync>;

pub fn snapshot_callback<F, Fut>(f: F) -> SnapshotCallback
where
    F: Fn(RemoteProgressSnapshot) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |snapshot| f(snapshot).boxed())
}

/// Loop de polling reutilizable sobre cualquier StatusSource.
pub struct ProgressMonitor<S> {
    source: S,
    poll_interval: Duration,
}

impl<S: StatusSource> ProgressMonitor<S> {
    pub fn new(source: S, poll_interval: Duration) -> Self {
        Self {
            source,
            poll_interval,
        }
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Consulta, publica el progreso en el job del contexto y duerme,
    /// hasta que la etapa sea Completed o Failed.
    ///
    /// La cancelación del job corta tanto la request en vuelo como la espera.
    pub async fn run_until_terminal(
        &mut self,
        resource_id: &str,
        ctx: &JobContext,
        on_snapshot: Option<&SnapshotCallback>,
    ) -> Result<RemoteProgressSnapshot, JobCancelled> {
        info!(
            "iniciando monitoreo de {} (job {}, cada {:?})",
            resource_id,
            ctx.job_id(),
            self.poll_interval
        );

        loop {
            let snapshot = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(JobCancelled),
                snapshot = self.source.fetch_snapshot(resource_id) => snapshot,
            };

            let update = JobUpdate::new()
                .progress(snapshot.progress_percent / 100.0)
                .message(snapshot.status_line());
            if let Err(e) = ctx.report(update).await {
                debug!("update de progreso descartado para job {}: {}", ctx.job_id(), e);
            }

            if let Some(cb) = on_snapshot {
                cb(snapshot.clone()).await;
            }

            if snapshot.stage.is_terminal() {
                info!(
                    "monitoreo de {} terminado: {}",
                    resource_id, snapshot.stage
                );
                return Ok(snapshot);
            }

            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(JobCancelled),
                _ = sleep(self.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{AutoPilotStage, JobMetadata, JobRecord, JobStatus, JobSupervisor};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Devuelve los snapshots en orden y repite el último.
    struct ScriptedSource {
        script: VecDeque<RemoteProgressSnapshot>,
        last: Option<RemoteProgressSnapshot>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedSource {
        fn new(script: Vec<RemoteProgressSnapshot>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    script: script.into(),
                    last: None,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn fetch_snapshot(&mut self, _resource_id: &str) -> RemoteProgressSnapshot {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(next) = self.script.pop_front() {
                self.last = Some(next);
            }
            self.last.clone().expect("script vacío")
        }
    }

    /// Una request que nunca responde.
    struct HangingSource;

    #[async_trait]
    impl StatusSource for HangingSource {
        async fn fetch_snapshot(&mut self, _resource_id: &str) -> RemoteProgressSnapshot {
            sleep(Duration::from_secs(3600)).await;
            RemoteProgressSnapshot::failed("p", "nunca")
        }
    }

    fn snap(stage: AutoPilotStage, done: u32, total: u32, pct: f64) -> RemoteProgressSnapshot {
        RemoteProgressSnapshot {
            resource_id: "p1".to_string(),
            stage,
            progress_percent: pct,
            units_completed: done,
            units_total: total,
            current_unit_label: None,
            estimated_seconds_remaining: None,
            error_message: None,
        }
    }

    async fn wait_until(
        sup: &JobSupervisor,
        id: &str,
        cond: impl Fn(&JobRecord) -> bool,
    ) -> JobRecord {
        for _ in 0..200 {
            if let Some(job) = sup.get(id) {
                if cond(&job) {
                    return job;
                }
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("el job {id} nunca cumplió la condición: {:?}", sup.get(id));
    }

    async fn wait_for(sup: &JobSupervisor, id: &str, status: JobStatus) -> JobRecord {
        wait_until(sup, id, |job| job.status == status).await
    }

    fn submit_loop<S: StatusSource + 'static>(
        sup: &JobSupervisor,
        source: S,
        poll: Duration,
        on_snapshot: Option<SnapshotCallback>,
    ) -> String {
        sup.submit("monitor_test", "u1", JobMetadata::new(), vec![], move |ctx| async move {
            let mut monitor = ProgressMonitor::new(source, poll);
            let snapshot = monitor
                .run_until_terminal("p1", &ctx, on_snapshot.as_ref())
                .await?;
            Ok(serde_json::to_value(snapshot)?)
        })
        .unwrap()
    }

    #[tokio::test]
    async fn loop_publica_progreso_y_termina_en_completed() {
        let sup = JobSupervisor::new();
        let (source, calls) = ScriptedSource::new(vec![
            snap(AutoPilotStage::ExploratoryAnalysis, 0, 20, 0.0),
            snap(AutoPilotStage::Modeling, 5, 20, 25.0),
            snap(AutoPilotStage::Completed, 20, 20, 100.0),
        ]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let cb = snapshot_callback(move |s: RemoteProgressSnapshot| {
            let seen = seen_cb.clone();
            async move { seen.lock().unwrap().push(s.stage) }
        });

        let id = submit_loop(&sup, source, Duration::from_millis(10), Some(cb));
        let job = wait_for(&sup, &id, JobStatus::Completed).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(job.progress, 1.0);
        assert_eq!(job.result.unwrap()["stage"], json!("completed"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                AutoPilotStage::ExploratoryAnalysis,
                AutoPilotStage::Modeling,
                AutoPilotStage::Completed
            ]
        );
    }

    #[tokio::test]
    async fn loop_escribe_mensaje_con_etapa_y_contadores() {
        let sup = JobSupervisor::new();
        let (source, _calls) =
            ScriptedSource::new(vec![snap(AutoPilotStage::Modeling, 5, 20, 25.0)]);

        let id = submit_loop(&sup, source, Duration::from_secs(60), None);

        let job = wait_until(&sup, &id, |job| !job.message.is_empty()).await;
        assert_eq!(job.message, "modeling: 5/20 models");
        assert_eq!(job.progress, 0.25);
        assert_eq!(job.status, JobStatus::Running);

        sup.shutdown().await;
    }

    #[tokio::test]
    async fn snapshot_failed_tambien_termina_el_loop() {
        let sup = JobSupervisor::new();
        let (source, calls) = ScriptedSource::new(vec![
            snap(AutoPilotStage::Modeling, 1, 20, 5.0),
            RemoteProgressSnapshot::failed("p1", "HTTP 503"),
        ]);

        let id = submit_loop(&sup, source, Duration::from_millis(10), None);
        let job = wait_for(&sup, &id, JobStatus::Completed).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(job.result.unwrap()["stage"], json!("failed"));
    }

    #[tokio::test]
    async fn cancelar_corta_la_espera_entre_polls() {
        let sup = JobSupervisor::new();
        let (source, calls) =
            ScriptedSource::new(vec![snap(AutoPilotStage::Modeling, 1, 20, 5.0)]);

        // intervalo largo: si la cancelación esperara al próximo poll el test colgaría
        let id = submit_loop(&sup, source, Duration::from_secs(3600), None);
        for _ in 0..200 {
            if calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        assert!(sup.cancel(&id));
        wait_for(&sup, &id, JobStatus::Cancelled).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelar_corta_una_request_colgada() {
        let sup = JobSupervisor::new();
        let id = submit_loop(&sup, HangingSource, Duration::from_secs(1), None);
        wait_for(&sup, &id, JobStatus::Running).await;

        assert!(sup.cancel(&id));
        wait_for(&sup, &id, JobStatus::Cancelled).await;
    }
}
