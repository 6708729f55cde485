// common/src/supervisor.rs

use std::{
    any::Any,
    collections::HashMap,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures::{future::BoxFuture, FutureExt};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{JobCancelled, SupervisorError};
use crate::job::{JobId, JobMetadata, JobRecord, JobStatus, JobUpdate, OwnerId};

/// Observador de cambios de un job. Recibe una copia del record ya actualizado.
pub type JobCallback =
    Arc<dyn Fn(JobRecord) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Envuelve un closure async como JobCallback.
pub fn callback<F, Fut>(f: F) -> JobCallback
where
    F: Fn(JobRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |job| f(job).boxed())
}

/// Lo que el supervisor guarda de cada ejecución en curso o terminada.
struct Execution {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
    callbacks: Vec<JobCallback>,
}

impl Execution {
    fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

#[derive(Default)]
struct Tables {
    jobs: HashMap<JobId, JobRecord>,
    executions: HashMap<JobId, Execution>,
    // después de shutdown() no se aceptan jobs nuevos
    closed: bool,
}

/// Contexto que recibe cada unidad de trabajo: su propio id, el token de
/// cancelación y un handle al supervisor para reportar progreso.
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    token: CancellationToken,
    supervisor: JobSupervisor,
}

impl JobContext {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Se resuelve cuando alguien pide cancelar el job.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub async fn report(&self, update: JobUpdate) -> Result<JobRecord, SupervisorError> {
        self.supervisor.update(&self.job_id, update).await
    }
}

enum Outcome {
    Completed(Value),
    Failed(String),
    Cancelled,
}

/// Dueño de todos los JobRecord y de las tareas tokio que los ejecutan.
///
/// Toda mutación pasa por un único lock; los callbacks se invocan
/// siempre fuera de él.
#[derive(Clone, Default)]
pub struct JobSupervisor {
    tables: Arc<Mutex<Tables>>,
}

impl JobSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // envenenado = panic con la tabla a medio mutar, no hay estado sano que recuperar
        self.tables
            .lock()
            .expect("tabla de jobs envenenada por un panic previo")
    }

    /// Registra un job nuevo en Pending y lanza `work` bajo supervisión.
    /// No espera a que termine.
    pub fn submit<F, Fut>(
        &self,
        job_type: impl Into<String>,
        owner_id: impl Into<OwnerId>,
        metadata: JobMetadata,
        callbacks: Vec<JobCallback>,
        work: F,
    ) -> Result<JobId, SupervisorError>
    where
        F: FnOnce(JobContext) -> Fut,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let job_id = uuid::Uuid::new_v4().to_string();
        let job_type = job_type.into();
        let token = CancellationToken::new();
        let ctx = JobContext {
            job_id: job_id.clone(),
            token: token.clone(),
            supervisor: self.clone(),
        };

        // el closure del llamador corre fuera del lock
        let fut = work(ctx.clone());

        let mut tables = self.lock();
        if tables.closed {
            return Err(SupervisorError::ShuttingDown);
        }

        let record = JobRecord::new(job_id.clone(), job_type.clone(), owner_id.into(), metadata);
        tables.jobs.insert(job_id.clone(), record);

        // el wrapper toma el lock en su primer update, así que el handle
        // queda registrado antes de que pueda observar nada
        let handle = tokio::spawn(self.clone().supervise(ctx, fut));
        tables.executions.insert(
            job_id.clone(),
            Execution {
                token,
                handle: Some(handle),
                callbacks,
            },
        );
        drop(tables);

        info!("job {} creado (tipo={})", job_id, job_type);
        Ok(job_id)
    }

    /// Wrapper uniforme: Pending -> Running -> {Completed, Failed, Cancelled}.
    async fn supervise<Fut>(self, ctx: JobContext, work: Fut)
    where
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let job_id = ctx.job_id.clone();

        if let Err(e) = self
            .transition(&job_id, JobUpdate::new().status(JobStatus::Running))
            .await
        {
            warn!("job {} no pudo pasar a RUNNING: {}", job_id, e);
            return;
        }

        let outcome = tokio::select! {
            biased;
            _ = ctx.token.cancelled() => Outcome::Cancelled,
            res = AssertUnwindSafe(work).catch_unwind() => match res {
                Ok(Ok(value)) => Outcome::Completed(value),
                Ok(Err(e)) if e.chain().any(|c| c.is::<JobCancelled>()) => Outcome::Cancelled,
                Ok(Err(e)) => Outcome::Failed(format!("{e:#}")),
                Err(panic) => Outcome::Failed(panic_message(panic.as_ref())),
            },
        };

        let update = match outcome {
            Outcome::Completed(value) => JobUpdate::new()
                .status(JobStatus::Completed)
                .progress(1.0)
                .result(value)
                .message("job completado correctamente"),
            Outcome::Failed(error) => {
                warn!("job {} falló: {}", job_id, error);
                JobUpdate::new()
                    .status(JobStatus::Failed)
                    .message(format!("error: {error}"))
                    .error(error)
            }
            Outcome::Cancelled => JobUpdate::new()
                .status(JobStatus::Cancelled)
                .message("job cancelado"),
        };

        if let Err(e) = self.transition(&job_id, update).await {
            warn!("no se pudo cerrar el job {}: {}", job_id, e);
        }
    }

    /// Reporta progreso y/o mensaje. El progreso se recorta a [0, 1].
    /// Los updates sobre jobs terminados se rechazan con `JobFinished`.
    pub async fn update(
        &self,
        job_id: &str,
        update: JobUpdate,
    ) -> Result<JobRecord, SupervisorError> {
        self.transition(job_id, update).await
    }

    async fn transition(
        &self,
        job_id: &str,
        update: JobUpdate,
    ) -> Result<JobRecord, SupervisorError> {
        let (snapshot, callbacks) = {
            let mut guard = self.lock();
            let tables = &mut *guard;

            let job = tables
                .jobs
                .get_mut(job_id)
                .ok_or_else(|| SupervisorError::NotFound(job_id.to_string()))?;

            if job.status.is_terminal() {
                return Err(SupervisorError::JobFinished(job_id.to_string()));
            }
            if let Some(next) = update.status {
                if !job.status.can_transition_to(next) {
                    return Err(SupervisorError::InvalidTransition {
                        from: job.status,
                        to: next,
                    });
                }
            }

            job.apply(update);

            let callbacks = tables
                .executions
                .get(job_id)
                .map(|e| e.callbacks.clone())
                .unwrap_or_default();
            (job.clone(), callbacks)
        };

        if snapshot.status.is_terminal() {
            info!("job {} terminó en {}", snapshot.id, snapshot.status);
        } else {
            debug!(
                "job {} -> {} ({:.0}%) {}",
                snapshot.id,
                snapshot.status,
                snapshot.progress * 100.0,
                snapshot.message
            );
        }

        notify(&snapshot, callbacks).await;
        Ok(snapshot)
    }

    /// Agrega un observador a un job existente.
    pub fn subscribe(&self, job_id: &str, cb: JobCallback) -> Result<(), SupervisorError> {
        let mut tables = self.lock();
        let exec = tables
            .executions
            .get_mut(job_id)
            .ok_or_else(|| SupervisorError::NotFound(job_id.to_string()))?;
        exec.callbacks.push(cb);
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.lock().jobs.get(job_id).cloned()
    }

    pub fn list_by_owner(&self, owner_id: &str) -> Vec<JobRecord> {
        let tables = self.lock();
        sorted(
            tables
                .jobs
                .values()
                .filter(|j| j.owner_id == owner_id)
                .cloned()
                .collect(),
        )
    }

    pub fn list_active(&self) -> Vec<JobRecord> {
        let tables = self.lock();
        sorted(
            tables
                .jobs
                .values()
                .filter(|j| j.status.is_active())
                .cloned()
                .collect(),
        )
    }

    /// Señala la cancelación. Devuelve false si el job no existe, ya terminó
    /// o su tarea ya no está corriendo. El paso a Cancelled lo hace el wrapper.
    pub fn cancel(&self, job_id: &str) -> bool {
        let tables = self.lock();

        let Some(job) = tables.jobs.get(job_id) else {
            return false;
        };
        if job.status.is_terminal() {
            return false;
        }

        match tables.executions.get(job_id) {
            Some(exec) if !exec.is_finished() => {
                exec.token.cancel();
                info!("cancelación señalada para job {}", job_id);
                true
            }
            _ => false,
        }
    }

    /// Borra los jobs terminados cuyo último update tiene al menos `max_age`.
    /// Los jobs activos nunca se tocan.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut guard = self.lock();
        let tables = &mut *guard;

        let expired: Vec<JobId> = tables
            .jobs
            .values()
            .filter(|j| j.status.is_terminal() && age(now, j.updated_at) >= max_age)
            .map(|j| j.id.clone())
            .collect();

        for id in &expired {
            tables.jobs.remove(id);
            tables.executions.remove(id);
        }
        drop(guard);

        info!("limpieza: {} jobs terminados eliminados", expired.len());
        expired.len()
    }

    /// Cancela todo lo que sigue activo y espera a que cada tarea termine.
    /// Un fallo en una tarea no bloquea el apagado de las demás.
    pub async fn shutdown(&self) {
        info!("apagando supervisor de jobs...");

        let handles: Vec<(JobId, JoinHandle<()>)> = {
            let mut guard = self.lock();
            let tables = &mut *guard;
            tables.closed = true;

            let mut handles = Vec::new();
            for (id, exec) in tables.executions.iter_mut() {
                let active = tables.jobs.get(id).map_or(false, |j| j.status.is_active());
                if active {
                    exec.token.cancel();
                    info!("job {} cancelado por shutdown", id);
                }
                if let Some(handle) = exec.handle.take() {
                    handles.push((id.clone(), handle));
                }
            }
            handles
        };

        for (id, handle) in handles {
            if let Err(e) = handle.await {
                warn!("la tarea del job {} terminó con error: {}", id, e);
            }
        }

        info!("supervisor de jobs apagado");
    }

    /* --------- operaciones con control de acceso (capa HTTP) --------- */

    pub fn get_owned(&self, job_id: &str, owner_id: &str) -> Result<JobRecord, SupervisorError> {
        let job = self
            .get(job_id)
            .ok_or_else(|| SupervisorError::NotFound(job_id.to_string()))?;
        if job.owner_id != owner_id {
            return Err(SupervisorError::AccessDenied(job_id.to_string()));
        }
        Ok(job)
    }

    /// Cancela un job del dueño indicado. Rechaza jobs ya terminados.
    /// Devuelve el record tal como quedó después de la señal.
    pub fn cancel_owned(
        &self,
        job_id: &str,
        owner_id: &str,
    ) -> Result<JobRecord, SupervisorError> {
        let job = self.get_owned(job_id, owner_id)?;
        if job.status.is_terminal() {
            return Err(SupervisorError::InvalidState {
                job_id: job.id,
                status: job.status,
            });
        }

        if !self.cancel(job_id) {
            // terminó entre la lectura y la señal
            let status = self.get(job_id).map_or(job.status, |j| j.status);
            return Err(SupervisorError::InvalidState {
                job_id: job.id,
                status,
            });
        }

        self.get(job_id)
            .ok_or_else(|| SupervisorError::NotFound(job_id.to_string()))
    }

    pub fn list_active_for(&self, owner_id: Option<&str>) -> Vec<JobRecord> {
        self.list_active()
            .into_iter()
            .filter(|j| owner_id.map_or(true, |o| j.owner_id == o))
            .collect()
    }
}

async fn notify(job: &JobRecord, callbacks: Vec<JobCallback>) {
    for cb in callbacks {
        let call = AssertUnwindSafe(async { cb(job.clone()).await }).catch_unwind();
        match call.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("callback del job {} falló: {:#}", job.id, e),
            Err(panic) => warn!(
                "callback del job {} hizo panic: {}",
                job.id,
                panic_message(panic.as_ref())
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic en la unidad de trabajo".to_string()
    }
}

// updated_at en el futuro (reloj movido) cuenta como edad cero
fn age(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or_default()
}

fn sorted(mut jobs: Vec<JobRecord>) -> Vec<JobRecord> {
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    jobs
}
