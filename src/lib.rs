pub mod approval;
pub mod asset;
pub mod balance;
pub mod chain;
pub mod config;
pub mod error;
pub mod facade;
pub mod notify;
pub mod orchestrator;
pub mod scenario;

pub use error::Error;
pub use orchestrator::{OperationRequest, Orchestrator};
pub use scenario::ScenarioRow;
