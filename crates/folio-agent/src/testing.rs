// ABOUTME: Test utilities for folio-agent, including a scripted stub translation provider.
// ABOUTME: The stub echoes text as a word-segmented translation and can fail or hold replies behind a gate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use folio_core::translation::{
    TranslatedSentence, TranslatedWord, TranslationRequest, TranslationResponse,
};
use tokio::sync::watch;

use crate::provider::{ProviderError, TranslationProvider};

/// Build a deterministic translation of `text`: one sentence, one token per
/// whitespace-separated word, with leading and trailing punctuation split
/// into their own tokens. Each word translates to `<word>@<target>`.
pub fn echo_translation(text: &str, target_language: &str) -> TranslationResponse {
    let mut words = Vec::new();
    for raw in text.split_whitespace() {
        let core = raw.trim_matches(|c: char| c.is_ascii_punctuation());
        let leading = &raw[..raw.len() - raw.trim_start_matches(|c: char| c.is_ascii_punctuation()).len()];
        let trailing_start = leading.len() + core.len();
        let trailing = if core.is_empty() { "" } else { &raw[trailing_start..] };

        for c in leading.chars() {
            words.push(TranslatedWord::punctuation(&c.to_string()));
        }
        if !core.is_empty() {
            words.push(TranslatedWord::word(core, &format!("{core}@{target_language}")));
        }
        for c in trailing.chars() {
            words.push(TranslatedWord::punctuation(&c.to_string()));
        }
    }

    TranslationResponse {
        source_language: "en".to_string(),
        target_language: target_language.to_string(),
        sentences: vec![TranslatedSentence {
            full_translation: format!("[{target_language}] {text}"),
            words,
        }],
    }
}

/// Holds stub replies until released. Tests use it to keep jobs in flight.
#[derive(Clone)]
pub struct Gate {
    allowed: Arc<watch::Sender<usize>>,
    started: watch::Receiver<usize>,
}

impl Gate {
    /// Let `n` more held calls complete.
    pub fn release(&self, n: usize) {
        self.allowed.send_modify(|allowed| *allowed = allowed.saturating_add(n));
    }

    /// Let every current and future call complete.
    pub fn open(&self) {
        self.allowed.send_replace(usize::MAX);
    }

    /// Wait until at least `n` calls have reached the provider.
    pub async fn wait_started(&self, n: usize) {
        let mut started = self.started.clone();
        let _ = started.wait_for(|count| *count >= n).await;
    }

    pub fn started(&self) -> usize {
        *self.started.borrow()
    }
}

/// A stub provider. Scripted outcomes are consumed in order; once the script
/// is empty every call either echoes the input or fails, per the fallback.
pub struct StubProvider {
    script: Mutex<VecDeque<Result<TranslationResponse, ProviderError>>>,
    fallback: Option<ProviderError>,
    calls: Arc<AtomicUsize>,
    started: watch::Sender<usize>,
    gate: Option<watch::Receiver<usize>>,
    model: String,
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StubProvider {
    /// A stub that echoes every request.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: Arc::new(AtomicUsize::new(0)),
            started: watch::channel(0).0,
            gate: None,
            model: "stub-model".to_string(),
        }
    }

    /// A stub whose every unscripted call fails with `error`.
    pub fn failing(error: ProviderError) -> Self {
        Self {
            fallback: Some(error),
            ..Self::new()
        }
    }

    /// A stub whose calls wait for the returned gate before answering.
    pub fn gated() -> (Self, Gate) {
        let (allowed_tx, allowed_rx) = watch::channel(0);
        let mut stub = Self::new();
        stub.gate = Some(allowed_rx);
        let gate = Gate {
            allowed: Arc::new(allowed_tx),
            started: stub.started.subscribe(),
        };
        (stub, gate)
    }

    /// Queue a failure for the next unscripted call.
    pub fn then_fail(self, error: ProviderError) -> Self {
        self.push(Err(error));
        self
    }

    /// Queue a specific response for the next unscripted call.
    pub fn then_respond(self, response: TranslationResponse) -> Self {
        self.push(Ok(response));
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    fn push(&self, outcome: Result<TranslationResponse, ProviderError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(outcome);
        }
    }

    /// Shared counter of completed-or-started calls.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl TranslationProvider for StubProvider {
    async fn translate(
        &self,
        request: &TranslationRequest,
    ) -> Result<TranslationResponse, ProviderError> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.send_modify(|count| *count += 1);

        if let Some(gate) = &self.gate {
            let mut allowed = gate.clone();
            let _ = allowed.wait_for(|allowed| *allowed > index).await;
        }

        let scripted = self.script.lock().ok().and_then(|mut script| script.pop_front());
        match scripted {
            Some(outcome) => outcome,
            None => match &self.fallback {
                Some(error) => Err(error.clone()),
                None => Ok(echo_translation(&request.text, &request.target_language)),
            },
        }
    }

    fn provider_name(&self) -> &str {
        "stub"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(text: &str) -> TranslationRequest {
        TranslationRequest {
            text: text.to_string(),
            target_language: "es".to_string(),
            source_language: None,
        }
    }

    #[test]
    fn echo_splits_punctuation() {
        let response = echo_translation("Hello, (big) world.", "es");
        let originals: Vec<&str> = response.sentences[0]
            .words
            .iter()
            .map(|w| w.original.as_str())
            .collect();
        assert_eq!(originals, vec!["Hello", ",", "(", "big", ")", "world", "."]);
        assert_eq!(response.sentences[0].words[0].translations, vec!["Hello@es".to_string()]);
        assert!(response.sentences[0].words[1].is_punctuation);
    }

    #[tokio::test]
    async fn script_runs_before_fallback() {
        let stub = StubProvider::new()
            .then_fail(ProviderError::Http("down".to_string()))
            .then_fail(ProviderError::RateLimited);

        assert!(matches!(
            stub.translate(&request("Hi.")).await,
            Err(ProviderError::Http(_))
        ));
        assert!(matches!(
            stub.translate(&request("Hi.")).await,
            Err(ProviderError::RateLimited)
        ));
        assert!(stub.translate(&request("Hi.")).await.is_ok());
        assert_eq!(stub.call_counter().load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failing_stub_always_fails() {
        let stub = StubProvider::failing(ProviderError::InvalidResponse("bad".to_string()));
        for _ in 0..3 {
            assert!(stub.translate(&request("Hi.")).await.is_err());
        }
    }

    #[tokio::test]
    async fn gate_holds_calls_until_released() {
        let (stub, gate) = StubProvider::gated();
        let stub = Arc::new(stub);
        let task = {
            let stub = Arc::clone(&stub);
            tokio::spawn(async move { stub.translate(&request("Held.")).await })
        };

        gate.wait_started(1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        gate.release(1);
        assert!(task.await.unwrap().is_ok());
        assert_eq!(gate.started(), 1);
    }
}
