pub mod calendar;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use config::SchedulerConfig;
pub use error::{ConflictReason, ScheduleError, ScheduleResult};
pub use models::schedule::{ScheduleAction, ScheduleCaptureRequest, ScheduleOutcome};
pub use services::scheduler_service::SchedulerService;
