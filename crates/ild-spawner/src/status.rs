//! Backend state strings mapped onto [`ServerStatus`].

use ild_db::ServerStatus;

/// Docker container `State.Status`.
pub fn from_docker(state: &str) -> ServerStatus {
    match state.to_ascii_lowercase().as_str() {
        "running" => ServerStatus::Running,
        "restarting" => ServerStatus::Launching,
        "created" | "paused" | "exited" | "removing" => ServerStatus::Stopped,
        _ => ServerStatus::Error,
    }
}

/// ECS task `lastStatus`.
pub fn from_ecs(last_status: &str) -> ServerStatus {
    match last_status.to_ascii_uppercase().as_str() {
        "PROVISIONING" | "PENDING" | "ACTIVATING" => ServerStatus::Launching,
        "RUNNING" => ServerStatus::Running,
        "DEACTIVATING" | "STOPPING" | "DEPROVISIONING" | "STOPPED" => ServerStatus::Stopped,
        _ => ServerStatus::Error,
    }
}

/// AWS Batch job status.
pub fn from_batch(status: &str) -> ServerStatus {
    match status.to_ascii_uppercase().as_str() {
        "SUBMITTED" | "PENDING" | "RUNNABLE" | "STARTING" => ServerStatus::Launching,
        "RUNNING" => ServerStatus::Running,
        "SUCCEEDED" => ServerStatus::Stopped,
        _ => ServerStatus::Error,
    }
}

/// EventBridge rule `State`.
pub fn from_rule(state: &str) -> ServerStatus {
    match state.to_ascii_uppercase().as_str() {
        "ENABLED" => ServerStatus::Scheduled,
        "DISABLED" => ServerStatus::Stopped,
        _ => ServerStatus::Error,
    }
}
