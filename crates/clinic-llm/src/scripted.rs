//! Test doubles for the generation boundary.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::service::{GenerationError, GenerationService};

/// A recorded generation call, for asserting on prompt contents.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub system_message: String,
}

enum ScriptedStep {
    Reply(String),
    Failure(String),
}

/// Generation double that replays a queue of canned responses in order.
///
/// Each role issues a known sequence of calls per turn, so tests enqueue one
/// step per expected call. An exhausted queue fails the call, which is also
/// how service outages are simulated mid-script.
#[derive(Default)]
pub struct ScriptedService {
    steps: Mutex<VecDeque<ScriptedStep>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.steps
            .lock()
            .expect("scripted steps lock")
            .push_back(ScriptedStep::Reply(reply.into()));
    }

    pub fn push_failure(&self, reason: impl Into<String>) {
        self.steps
            .lock()
            .expect("scripted steps lock")
            .push_back(ScriptedStep::Failure(reason.into()));
    }

    /// Calls observed so far, oldest first.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("scripted calls lock").clone()
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().expect("scripted steps lock").len()
    }
}

#[async_trait]
impl GenerationService for ScriptedService {
    async fn generate(
        &self,
        prompt: &str,
        system_message: &str,
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String, GenerationError> {
        self.calls
            .lock()
            .expect("scripted calls lock")
            .push(RecordedCall {
                prompt: prompt.to_string(),
                system_message: system_message.to_string(),
            });

        let step = self
            .steps
            .lock()
            .expect("scripted steps lock")
            .pop_front()
            .ok_or_else(|| GenerationError::Unavailable("scripted responses exhausted".into()))?;

        match step {
            ScriptedStep::Reply(reply) => Ok(reply),
            ScriptedStep::Failure(reason) => Err(GenerationError::Unavailable(reason)),
        }
    }
}

/// Generation double that always fails, for outage-path tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingService;

#[async_trait]
impl GenerationService for FailingService {
    async fn generate(
        &self,
        _prompt: &str,
        _system_message: &str,
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String, GenerationError> {
        Err(GenerationError::Unavailable("backend offline".into()))
    }
}
