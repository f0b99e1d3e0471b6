//! Scripted provider for tests

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::provider::{CompletionProvider, CompletionRequest, ProviderError};

type Script = dyn Fn(&CompletionRequest, usize) -> (Duration, Result<String, ProviderError>)
    + Send
    + Sync;

/// Answers each call from a closure given the request and the 0-based call number
pub(crate) struct ScriptedProvider {
    script: Box<Script>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub(crate) fn new(
        script: impl Fn(&CompletionRequest, usize) -> Result<String, ProviderError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::with_delays(move |req, n| (Duration::ZERO, script(req, n)))
    }

    pub(crate) fn with_delays(
        script: impl Fn(&CompletionRequest, usize) -> (Duration, Result<String, ProviderError>)
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every response is the same fragment
    pub(crate) fn always(fragment: &str) -> Self {
        let fragment = fragment.to_string();
        Self::new(move |_, _| Ok(fragment.clone()))
    }

    pub(crate) fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let (delay, result) = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.len();
            calls.push(request.clone());
            (self.script)(&request, n)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result
    }
}
