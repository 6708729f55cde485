use chrono::{DateTime, Utc};
use common::AutoPilotStage;

/// Tabla ordenada token -> etapa. Gana el primer token contenido en la
/// pista de etapa (sin distinguir mayúsculas).
pub const STAGE_TABLE: &[(&str, AutoPilotStage)] = &[
    ("eda", AutoPilotStage::ExploratoryAnalysis),
    ("modeling", AutoPilotStage::Modeling),
    ("fitting", AutoPilotStage::Modeling),
    ("feature", AutoPilotStage::FeatureEngineering),
    ("complete", AutoPilotStage::Completed),
];

/// Progreso máximo mientras el recurso no confirme que terminó.
pub const MAX_UNCONFIRMED_PERCENT: f64 = 99.0;

pub fn parse_stage_hint(hint: &str) -> AutoPilotStage {
    let hint = hint.to_lowercase();
    STAGE_TABLE
        .iter()
        .find(|(token, _)| hint.contains(token))
        .map(|(_, stage)| *stage)
        .unwrap_or(AutoPilotStage::Preparing)
}

/// Con el flag de "done" la etapa es Completed sin mirar nada más.
pub fn derive_stage(hint: &str, done: bool) -> AutoPilotStage {
    if done {
        AutoPilotStage::Completed
    } else {
        parse_stage_hint(hint)
    }
}

/// Etapa y porcentaje. Sin confirmación de fin el porcentaje se queda en 99.
pub fn derive_progress(
    hint: &str,
    done: bool,
    units_completed: u32,
    units_total: u32,
) -> (AutoPilotStage, f64) {
    if done {
        return (AutoPilotStage::Completed, 100.0);
    }

    let percent = if units_total == 0 {
        0.0
    } else {
        (units_completed as f64 / units_total as f64 * 100.0).min(MAX_UNCONFIRMED_PERCENT)
    };
    (derive_stage(hint, false), percent)
}

pub fn estimate_remaining_seconds(
    progress_percent: f64,
    started_at: Option<DateTime<Utc>>,
) -> Option<u64> {
    estimate_remaining_seconds_at(progress_percent, started_at, Utc::now())
}

/// Extrapolación lineal desde el inicio: total = elapsed / (pct / 100).
pub fn estimate_remaining_seconds_at(
    progress_percent: f64,
    started_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<u64> {
    // también descarta NaN
    if !(progress_percent > 0.0) {
        return None;
    }
    let started_at = started_at?;

    let elapsed = (now - started_at).num_milliseconds().max(0) as f64 / 1000.0;
    let total_estimate = elapsed / (progress_percent / 100.0);
    let remaining = (total_estimate - elapsed).max(0.0);

    Some(remaining as u64)
}
