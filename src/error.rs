use std::fmt;

use rusqlite;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, warn};

pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// Machine-readable reason carried by a 409 response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    SlotExceedsDeadline,
    NoSlot,
    Frozen,
}

impl ConflictReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictReason::SlotExceedsDeadline => "slot_exceeds_deadline",
            ConflictReason::NoSlot => "no_slot",
            ConflictReason::Frozen => "frozen",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("验证失败: {message}")]
    Validation {
        message: String,
        details: Option<JsonValue>,
    },

    #[error("未授权: {message}")]
    Auth { message: String },

    #[error("无权访问: {message}")]
    Forbidden { message: String },

    #[error("记录未找到")]
    NotFound,

    #[error("{message}")]
    Conflict {
        reason: ConflictReason,
        message: String,
        payload: Option<JsonValue>,
    },

    #[error("前置条件失败: {message}")]
    PreconditionFailed { message: String },

    #[error("上游日历服务错误: {message}")]
    Upstream { message: String },

    #[error("数据库错误: {message}")]
    Database { message: String },

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

impl ScheduleError {
    /// HTTP-ish status code so a thin transport layer can map errors 1:1.
    pub fn status(&self) -> u16 {
        match self {
            ScheduleError::Validation { .. } => 400,
            ScheduleError::Auth { .. } => 401,
            ScheduleError::Forbidden { .. } => 403,
            ScheduleError::NotFound => 404,
            ScheduleError::Conflict { .. } => 409,
            ScheduleError::PreconditionFailed { .. } => 412,
            ScheduleError::Upstream { .. } => 502,
            ScheduleError::Database { .. }
            | ScheduleError::Serialization(_)
            | ScheduleError::Io(_)
            | ScheduleError::Internal(_) => 500,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "scheduler::validation", %message, "validation error");
        ScheduleError::Validation {
            message,
            details: None,
        }
    }

    pub fn validation_with_details(message: impl Into<String>, details: JsonValue) -> Self {
        let message = message.into();
        warn!(target: "scheduler::validation", %message, details = %details, "validation error with details");
        ScheduleError::Validation {
            message,
            details: Some(details),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "scheduler::auth", %message, "auth error");
        ScheduleError::Auth { message }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "scheduler::auth", %message, "forbidden");
        ScheduleError::Forbidden { message }
    }

    pub fn not_found() -> Self {
        warn!(target: "scheduler::db", "resource not found");
        ScheduleError::NotFound
    }

    pub fn conflict(reason: ConflictReason, message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "scheduler::conflict", reason = %reason, %message, "scheduling conflict");
        ScheduleError::Conflict {
            reason,
            message,
            payload: None,
        }
    }

    pub fn conflict_with_payload(
        reason: ConflictReason,
        message: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        let message = message.into();
        warn!(target: "scheduler::conflict", reason = %reason, %message, "scheduling conflict");
        ScheduleError::Conflict {
            reason,
            message,
            payload: Some(payload),
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        let message = message.into();
        warn!(target: "scheduler::calendar", %message, "precondition failed");
        ScheduleError::PreconditionFailed { message }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(target: "scheduler::calendar", %message, "upstream calendar error");
        ScheduleError::Upstream { message }
    }

    pub fn database(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(target: "scheduler::db", %message, "database error");
        ScheduleError::Database { message }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        error!(target: "scheduler::internal", %message, "internal error");
        ScheduleError::Internal(message)
    }

    pub fn conflict_reason(&self) -> Option<ConflictReason> {
        match self {
            ScheduleError::Conflict { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn conflict_payload(&self) -> Option<&JsonValue> {
        match self {
            ScheduleError::Conflict { payload, .. } => payload.as_ref(),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for ScheduleError {
    fn from(error: rusqlite::Error) -> Self {
        use rusqlite::Error::QueryReturnedNoRows;

        match &error {
            QueryReturnedNoRows => ScheduleError::not_found(),
            _ => {
                error!(target: "scheduler::db", error = ?error, "sqlite error");
                ScheduleError::database(error.to_string())
            }
        }
    }
}
