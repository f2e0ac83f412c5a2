/// Bounded fixed-interval readiness polling
pub mod poller;
pub use crate::poller::{poll_until, PollSettings};

/// Log and trace integrations
pub mod telemetry;

pub mod cassandra;
pub mod cluster;
pub mod config;
pub mod exec;
pub mod helm;
pub mod kind;
pub mod kubectl;
pub mod medusa;
pub mod monitoring;
pub mod reaper;
pub mod scenario;
pub mod stress;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("An error occurred in kube-exec: {0}")]
    KubeExecError(String),

    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("SerializationError: {0}")]
    YamlSerializationError(#[source] serde_yaml::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("HTTP Error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Command {command:?} failed with status {status}: {stderr}")]
    CommandError {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("Missing Secret Error: {0}")]
    MissingSecretError(String),

    #[error("Condition not met after {attempts} attempts: {condition}")]
    NotReady { condition: String, attempts: u32 },

    #[error("Reaper Error: {0}")]
    ReaperError(String),

    #[error("Invalid Data: {0}")]
    InvalidErr(String),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::YamlSerializationError(err)
    }
}
