use serde::{Deserialize, Serialize};

/// Etapa gruesa de un entrenamiento AutoML remoto.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AutoPilotStage {
    Preparing,
    #[serde(rename = "eda")]
    ExploratoryAnalysis,
    FeatureEngineering,
    Modeling,
    SelectingBest,
    Completed,
    Failed,
}

impl AutoPilotStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::ExploratoryAnalysis => "eda",
            Self::FeatureEngineering => "feature_engineering",
            Self::Modeling => "modeling",
            Self::SelectingBest => "selecting_best",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for AutoPilotStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Lectura puntual del estado de una operación remota, ya normalizada.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteProgressSnapshot {
    pub resource_id: String,
    pub stage: AutoPilotStage,

    /// 0..=100. Nunca 100 antes de que el recurso confirme que terminó.
    pub progress_percent: f64,

    /// Modelos ya construidos / modelos esperados
    pub units_completed: u32,
    pub units_total: u32,

    /// Tipo del modelo más reciente
    pub current_unit_label: Option<String>,
    pub estimated_seconds_remaining: Option<u64>,

    /// Sólo con stage == Failed
    pub error_message: Option<String>,
}

impl RemoteProgressSnapshot {
    /// Snapshot de fallo: así se reportan los errores de red o de parseo.
    pub fn failed(resource_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            stage: AutoPilotStage::Failed,
            progress_percent: 0.0,
            units_completed: 0,
            units_total: 0,
            current_unit_label: None,
            estimated_seconds_remaining: None,
            error_message: Some(error.into()),
        }
    }

    /// Línea de estado que se publica en el JobRecord.
    pub fn status_line(&self) -> String {
        format!(
            "{}: {}/{} models",
            self.stage, self.units_completed, self.units_total
        )
    }
}
