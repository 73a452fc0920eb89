pub mod extract;
mod api_client;
mod scripted;
mod service;

pub use api_client::{ApiClient, ModelRotator};
pub use scripted::{FailingService, RecordedCall, ScriptedService};
pub use service::{GenerationError, GenerationService};
