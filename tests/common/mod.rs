use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::{anyhow, bail, Result};
use axum::Router;
use coach_llm::{
    api,
    cleaner::{build_cleaner, CleanerConfig, CleaningPolicy},
    inference::ModelBackend,
    service::{GenerationService, ServiceOptions},
};

/// Backend that "generates" a fixed continuation after the prompt, one char per token.
pub struct StubBackend {
    continuation: String,
    fail_with: Option<String>,
    panic_first_call: bool,
    pub generate_calls: AtomicUsize,
    pub last_budget: Mutex<Option<usize>>,
}

impl StubBackend {
    pub fn new(continuation: &str) -> Arc<Self> {
        Arc::new(Self {
            continuation: continuation.to_string(),
            fail_with: None,
            panic_first_call: false,
            generate_calls: AtomicUsize::new(0),
            last_budget: Mutex::new(None),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            continuation: String::new(),
            fail_with: Some(message.to_string()),
            panic_first_call: false,
            generate_calls: AtomicUsize::new(0),
            last_budget: Mutex::new(None),
        })
    }

    /// Panics inside the first `generate`, then behaves like `new`.
    pub fn panicking_once(continuation: &str) -> Arc<Self> {
        Arc::new(Self {
            continuation: continuation.to_string(),
            fail_with: None,
            panic_first_call: true,
            generate_calls: AtomicUsize::new(0),
            last_budget: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn last_budget(&self) -> Option<usize> {
        *self.last_budget.lock().unwrap()
    }
}

impl ModelBackend for StubBackend {
    fn name(&self) -> &str {
        "stub-model"
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.chars().map(u32::from).collect())
    }

    fn generate(&self, prompt_tokens: &[u32], max_new_tokens: usize) -> Result<Vec<u32>> {
        let call = self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_first_call && call == 0 {
            panic!("kernel launch failed");
        }
        *self.last_budget.lock().unwrap() = Some(max_new_tokens);
        if let Some(message) = &self.fail_with {
            bail!("{message}");
        }
        let mut tokens = prompt_tokens.to_vec();
        tokens.extend(self.continuation.chars().map(u32::from));
        Ok(tokens)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        tokens
            .iter()
            .map(|t| char::from_u32(*t).ok_or_else(|| anyhow!("invalid token {t}")))
            .collect()
    }
}

pub fn app(backend: Arc<StubBackend>, policy: CleaningPolicy, options: ServiceOptions) -> Router {
    let cleaner = build_cleaner(&CleanerConfig {
        policy,
        ..CleanerConfig::default()
    });
    api::router(Arc::new(GenerationService::new(backend, cleaner, options)))
}
