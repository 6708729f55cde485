use std::time::Duration;

use common::JobSupervisor;
use tokio::time::sleep;
use tracing::debug;

/// Loop de retención: cada `interval` borra los jobs terminados que llevan
/// más de `retention` sin cambios. Los jobs activos no se tocan.
pub async fn run_retention_loop(supervisor: JobSupervisor, interval: Duration, retention: Duration) {
    loop {
        sleep(interval).await;
        sweep_once(&supervisor, retention);
    }
}

/// Una pasada de limpieza. Devuelve cuántos jobs se borraron.
pub fn sweep_once(supervisor: &JobSupervisor, retention: Duration) -> usize {
    let removed = supervisor.cleanup(retention);
    if removed == 0 {
        debug!("retención: nada que limpiar");
    }
    removed
}
