pub mod api;
pub mod error;
pub mod job;
pub mod progress;
pub mod supervisor;

pub use api::{
    CreateAutoPilotMonitorRequest, CreateAutoPilotMonitorResponse, ErrorResponse, JobResponse,
    OWNER_HEADER,
};
pub use error::{JobCancelled, SupervisorError};
pub use job::{clamp_progress, JobId, JobMetadata, JobRecord, JobStatus, JobUpdate, OwnerId};
pub use progress::{AutoPilotStage, RemoteProgressSnapshot};
pub use supervisor::{callback, JobCallback, JobContext, JobSupervisor};
