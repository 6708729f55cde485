pub mod adapter;
pub mod config;
pub mod job;
pub mod poller;
pub mod stage;

pub use adapter::AutoPilotMonitor;
pub use config::MonitorConfig;
pub use job::{monitor_autopilot, submit_autopilot_monitor, AUTOPILOT_JOB_TYPE};
pub use poller::{snapshot_callback, ProgressMonitor, SnapshotCallback, StatusSource};
