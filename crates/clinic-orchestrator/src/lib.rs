mod orchestrator;

pub use orchestrator::{GREETING, Orchestrator};
