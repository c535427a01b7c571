pub mod config;
pub mod db;
pub mod error;
pub mod hasher;
pub mod logging;
pub mod pipeline;
pub mod sanitize;
pub mod secrets;
pub mod transport;
pub mod validator;
pub mod worker;

pub use config::{load_config, load_config_from_str, Config};
pub use db::{Database, DatabaseError, FileStatus};
pub use error::{ConfigError, IngestError, Result};
pub use hasher::{fingerprint, Fingerprint};
pub use pipeline::{AttemptOutcome, BundleReport, IngestionOrchestrator, PipelineError};
pub use secrets::{resolve_secret, SecretError};
pub use transport::{
    Attachment, Bundle, BundleHandle, Destination, ImapTransport, InMemoryTransport,
    MessageTransport, TransportError,
};
pub use validator::{ParsedFile, RecordValidator, RowError, ScaleTransaction, StructuralError};
pub use worker::{CycleSummary, HealthReport, IngestionWorker};
