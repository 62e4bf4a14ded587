//! Scriptable handler for tests and offline runs.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::transport::cancelled;
use super::{ProviderCall, ProviderHandler, RawResponse};
use crate::error::LlmError;
use crate::registry::HandlerFamily;
use crate::types::{FilteredParams, Parameter};

type Behaviour = dyn Fn(&ProviderCall<'_>, u32) -> Result<RawResponse, LlmError> + Send + Sync;

/// What the mock saw for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub model: String,
    pub system_instruction: Option<String>,
    pub user_input: String,
    pub params: FilteredParams,
}

/// A handler whose responses come from a closure.
///
/// The closure receives the call and its zero-based index across the
/// handler's lifetime.
pub struct MockHandler {
    family: HandlerFamily,
    behaviour: Box<Behaviour>,
    delay: Option<Duration>,
    calls: AtomicU32,
    recorded: Mutex<Vec<RecordedCall>>,
}

impl MockHandler {
    pub fn from_fn<F>(family: HandlerFamily, behaviour: F) -> Self
    where
        F: Fn(&ProviderCall<'_>, u32) -> Result<RawResponse, LlmError> + Send + Sync + 'static,
    {
        Self {
            family,
            behaviour: Box::new(behaviour),
            delay: None,
            calls: AtomicU32::new(0),
            recorded: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `text`.
    pub fn with_response(family: HandlerFamily, text: &str) -> Self {
        let text = text.to_string();
        Self::from_fn(family, move |_, _| Ok(RawResponse::text(text.clone())))
    }

    /// Always fail with `err`.
    pub fn failing(family: HandlerFamily, err: LlmError) -> Self {
        Self::from_fn(family, move |_, _| Err(err.clone()))
    }

    /// Play `script` in order, repeating the last entry once exhausted.
    pub fn sequence(family: HandlerFamily, script: Vec<Result<RawResponse, LlmError>>) -> Self {
        Self::from_fn(family, move |_, n| {
            script
                .get(n as usize)
                .or_else(|| script.last())
                .cloned()
                .unwrap_or_else(|| Err(LlmError::invalid_response("mock script is empty")))
        })
    }

    /// Sleep before answering, honouring cancellation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Times `invoke` has been entered.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.recorded
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProviderHandler for MockHandler {
    fn family(&self) -> HandlerFamily {
        self.family
    }

    fn supported_parameters(&self) -> BTreeSet<Parameter> {
        Parameter::ALL.into_iter().collect()
    }

    async fn invoke(
        &self,
        call: &ProviderCall<'_>,
        cancel: CancellationToken,
    ) -> Result<RawResponse, LlmError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut recorded) = self.recorded.lock() {
            recorded.push(RecordedCall {
                model: call.spec.id.clone(),
                system_instruction: call.prompt.system_instruction().map(str::to_string),
                user_input: call.prompt.user_input().to_string(),
                params: call.params.clone(),
            });
        }
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(cancelled()),
            }
        }
        (self.behaviour)(call, n)
    }
}
