use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use entitle_events::ReceiptBlob;

use super::r#trait::{ReceiptValidator, ValidationServiceError, ValidationVerdict};

type Answer = Result<ValidationVerdict, ValidationServiceError>;

/// One call the validator received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationCall {
    pub receipt: ReceiptBlob,
    pub sandbox: bool,
}

/// Validator that answers from a script.
///
/// Queued answers are used first, then the fallback. Intended for tests/dev.
#[derive(Debug)]
pub struct ScriptedReceiptValidator {
    queued: Mutex<VecDeque<Answer>>,
    fallback: Answer,
    delay: Option<Duration>,
    calls: Mutex<Vec<ValidationCall>>,
}

impl Default for ScriptedReceiptValidator {
    fn default() -> Self {
        Self::always(ValidationVerdict::Valid)
    }
}

impl ScriptedReceiptValidator {
    pub fn always(verdict: ValidationVerdict) -> Self {
        Self::with_fallback(Ok(verdict))
    }

    /// Every call fails as if the service were down.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::with_fallback(Err(ValidationServiceError::Unavailable(message.into())))
    }

    fn with_fallback(fallback: Answer) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answer the next call with `answer` (before the fallback).
    pub fn then(self, answer: Answer) -> Self {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(answer);
        self
    }

    /// Wait `delay` before answering (to exercise timeouts).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ValidationCall> {
        self.call_log().clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_log().len()
    }

    fn call_log(&self) -> MutexGuard<'_, Vec<ValidationCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ReceiptValidator for ScriptedReceiptValidator {
    async fn validate(
        &self,
        receipt: &ReceiptBlob,
        sandbox: bool,
    ) -> Result<ValidationVerdict, ValidationServiceError> {
        self.call_log().push(ValidationCall {
            receipt: receipt.clone(),
            sandbox,
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        queued.unwrap_or_else(|| self.fallback.clone())
    }
}
