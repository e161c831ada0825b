pub mod dashboard;
pub mod db;
pub mod error;
pub mod import;
pub mod models;
pub mod reconcile;
pub mod service;
pub mod target;

pub use error::{TrackerError, TrackerResult};
pub use service::TrackerService;
