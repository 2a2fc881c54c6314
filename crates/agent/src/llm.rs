use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hrflow_core::config::{LlmConfig, LlmProvider};
use hrflow_core::errors::CapabilityError;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("text-understanding capability is disabled")]
    Disabled,
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode completion: {0}")]
    Decode(String),
    #[error("completion timed out after {0}s")]
    Timeout(u64),
    #[error("empty prompt")]
    EmptyPrompt,
}

impl From<LlmError> for CapabilityError {
    fn from(value: LlmError) -> Self {
        match value {
            LlmError::Timeout(secs) => Self::Timeout(secs),
            LlmError::Decode(message) => Self::Decode(message),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Text-understanding capability: prompt in, text out.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Client used when no provider is configured. Every call fails, so callers
/// take their degraded paths.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableLlmClient;

#[async_trait]
impl LlmClient for UnavailableLlmClient {
    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        Err(LlmError::Disabled)
    }
}

#[derive(Clone, Debug)]
enum HttpBackend {
    Ollama,
    OpenAiCompat { api_key: SecretString },
}

/// Talks to Ollama (`/api/generate`) or an OpenAI-compatible
/// `/v1/chat/completions` endpoint.
#[derive(Clone, Debug)]
pub struct HttpLlmClient {
    http: Client,
    base_url: String,
    model: String,
    backend: HttpBackend,
}

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatCompletionMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatCompletionMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionContent,
}

#[derive(Deserialize)]
struct ChatCompletionContent {
    #[serde(default)]
    content: Option<String>,
}

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

impl HttpLlmClient {
    pub fn ollama(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            http: build_http(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            backend: HttpBackend::Ollama,
        })
    }

    pub fn openai(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            http: build_http(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            backend: HttpBackend::OpenAiCompat { api_key },
        })
    }

    async fn complete_ollama(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest { model: &self.model, prompt, stream: false };
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "<empty>".to_string());
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        let payload: OllamaGenerateResponse =
            response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;
        Ok(payload.response)
    }

    async fn complete_openai(
        &self,
        api_key: &SecretString,
        prompt: &str,
    ) -> Result<String, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatCompletionMessage { role: "user", content: prompt }],
            temperature: 0.0,
            stream: false,
        };
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "<empty>".to_string());
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        let payload: ChatCompletionResponse =
            response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;
        payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Decode("completion did not include any choices".to_string()))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let started = std::time::Instant::now();
        let result = match &self.backend {
            HttpBackend::Ollama => self.complete_ollama(prompt).await,
            HttpBackend::OpenAiCompat { api_key } => self.complete_openai(api_key, prompt).await,
        };
        debug!(
            event_name = "llm.completion.finished",
            model = %self.model,
            latency_ms = started.elapsed().as_millis() as u64,
            success = result.is_ok(),
            "text-understanding call finished"
        );
        result
    }
}

fn build_http(timeout: Duration) -> Result<Client, LlmError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| LlmError::Transport(error.to_string()))
}

/// Builds the client selected by configuration.
pub fn client_from_config(
    config: &LlmConfig,
    timeout: Duration,
) -> Result<Arc<dyn LlmClient>, LlmError> {
    match config.provider {
        LlmProvider::Disabled => Ok(Arc::new(UnavailableLlmClient)),
        LlmProvider::Ollama => {
            let base_url =
                config.base_url.clone().unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string());
            Ok(Arc::new(HttpLlmClient::ollama(base_url, config.model.clone(), timeout)?))
        }
        LlmProvider::OpenAi => {
            let api_key = config.api_key.clone().ok_or(LlmError::Disabled)?;
            let base_url =
                config.base_url.clone().unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
            Ok(Arc::new(HttpLlmClient::openai(base_url, config.model.clone(), api_key, timeout)?))
        }
    }
}

/// Keeps at most `budget` whitespace-separated words.
pub fn truncate_words(text: &str, budget: usize) -> String {
    text.split_whitespace().take(budget).collect::<Vec<_>>().join(" ")
}

/// Cuts `body` so that it and the trailing `reply_format` line fit in
/// `budget` words. The reply format is never cut; an empty body yields an
/// empty prompt.
pub fn fit_prompt(body: &str, reply_format: &str, budget: usize) -> String {
    let reply_format = reply_format.trim();
    let reserved = reply_format.split_whitespace().count();
    let body = truncate_words(body, budget.saturating_sub(reserved));
    if body.is_empty() || reply_format.is_empty() {
        return body;
    }
    format!("{body}\n{reply_format}")
}

/// Who a cached completion belongs to. Entries are never shared across scopes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum CacheScope {
    User(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    scope: CacheScope,
    digest: [u8; 32],
}

impl CacheKey {
    pub fn new(scope: CacheScope, prompt: &str) -> Self {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&Sha256::digest(prompt.as_bytes()));
        Self { scope, digest }
    }
}

pub trait PromptCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<String>;
    fn put(&self, key: CacheKey, value: String);
}

/// Capacity-bounded cache; the oldest insertion is evicted first.
pub struct BoundedPromptCache {
    capacity: usize,
    inner: Mutex<CacheSlots>,
}

#[derive(Default)]
struct CacheSlots {
    entries: HashMap<CacheKey, String>,
    order: VecDeque<CacheKey>,
}

impl BoundedPromptCache {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, inner: Mutex::new(CacheSlots::default()) }
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(slots) => slots.entries.len(),
            Err(poisoned) => poisoned.into_inner().entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PromptCache for BoundedPromptCache {
    fn get(&self, key: &CacheKey) -> Option<String> {
        let slots = match self.inner.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.entries.get(key).cloned()
    }

    fn put(&self, key: CacheKey, value: String) {
        if self.capacity == 0 {
            return;
        }
        let mut slots = match self.inner.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slots.entries.insert(key.clone(), value).is_some() {
            return;
        }
        slots.order.push_back(key);
        while slots.order.len() > self.capacity {
            if let Some(evicted) = slots.order.pop_front() {
                slots.entries.remove(&evicted);
            }
        }
    }
}

/// The pipeline's view of the text-understanding capability: prompt bodies
/// are truncated to the word budget, answered from the scoped cache when
/// possible, and bounded by the pipeline timeout.
#[derive(Clone)]
pub struct TextService {
    client: Arc<dyn LlmClient>,
    cache: Arc<dyn PromptCache>,
    word_budget: usize,
    timeout: Duration,
}

impl TextService {
    pub fn new(
        client: Arc<dyn LlmClient>,
        cache: Arc<dyn PromptCache>,
        word_budget: usize,
        timeout: Duration,
    ) -> Self {
        Self { client, cache, word_budget, timeout }
    }

    /// Uncached service, mostly for tests and one-off tools.
    pub fn uncached(client: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self::new(client, Arc::new(BoundedPromptCache::new(0)), usize::MAX, timeout)
    }

    /// Sends `body` followed by `reply_format`; only the body is truncated.
    pub async fn ask(
        &self,
        scope: CacheScope,
        body: &str,
        reply_format: &str,
    ) -> Result<String, LlmError> {
        let prompt = fit_prompt(body, reply_format, self.word_budget);
        if prompt.is_empty() {
            return Err(LlmError::EmptyPrompt);
        }

        let key = CacheKey::new(scope, &prompt);
        if let Some(hit) = self.cache.get(&key) {
            debug!(event_name = "llm.cache.hit", "prompt answered from cache");
            return Ok(hit);
        }

        let completion = tokio::time::timeout(self.timeout, self.client.complete(&prompt))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))??;
        self.cache.put(key, completion.clone());
        Ok(completion)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{LlmClient, LlmError};

    /// Replays scripted completions in order; an exhausted script fails.
    #[derive(Default)]
    pub struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        prompts: Mutex<Vec<String>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedLlm {
        pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self { replies: Mutex::new(replies.into()), ..Self::default() }
        }

        pub fn last_prompt(&self) -> Option<String> {
            self.prompts.lock().ok().and_then(|prompts| prompts.last().cloned())
        }

        pub fn failing() -> Self {
            Self::new(Vec::new())
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            let mut replies = self.replies.lock().map_err(|_| LlmError::Disabled)?;
            replies.pop_front().unwrap_or(Err(LlmError::Transport("script exhausted".to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::testing::ScriptedLlm;
    use hrflow_core::config::{AppConfig, LlmProvider};

    use super::{
        client_from_config, fit_prompt, truncate_words, BoundedPromptCache, CacheKey, CacheScope,
        PromptCache, TextService, UnavailableLlmClient,
    };

    #[test]
    fn ollama_without_base_url_builds_a_client() {
        let mut config = AppConfig::default().llm;
        config.provider = LlmProvider::Ollama;
        config.base_url = None;

        assert!(client_from_config(&config, Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn truncate_words_keeps_budget() {
        assert_eq!(truncate_words("one two   three four", 2), "one two");
        assert_eq!(truncate_words("short", 10), "short");
    }

    #[test]
    fn fit_prompt_cuts_the_body_and_keeps_the_reply_format() {
        let prompt = fit_prompt("one two three four five six", "Reply with JSON only.", 6);
        assert_eq!(prompt, "one two\nReply with JSON only.");
        assert_eq!(fit_prompt("short body", "", 10), "short body");
        assert_eq!(fit_prompt("   ", "Reply with JSON only.", 10), "");
    }

    #[tokio::test]
    async fn long_messages_keep_the_reply_format() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok("{}".to_string())]));
        let cache = Arc::new(BoundedPromptCache::new(0));
        let service = TextService::new(llm.clone(), cache, 20, Duration::from_secs(1));
        let message = "please ".repeat(200);

        let reply = service
            .ask(CacheScope::User("u1".to_string()), &message, "Reply with JSON only: {}")
            .await;

        assert_eq!(reply, Ok("{}".to_string()));
        let sent = llm.last_prompt().unwrap_or_default();
        assert!(sent.ends_with("Reply with JSON only: {}"));
        assert_eq!(sent.split_whitespace().count(), 20);
    }

    #[test]
    fn cache_evicts_oldest_insertion() {
        let cache = BoundedPromptCache::new(2);
        let first = CacheKey::new(CacheScope::User("u1".to_string()), "a");
        let second = CacheKey::new(CacheScope::User("u1".to_string()), "b");
        let third = CacheKey::new(CacheScope::User("u1".to_string()), "c");

        cache.put(first.clone(), "1".to_string());
        cache.put(second.clone(), "2".to_string());
        cache.put(third.clone(), "3".to_string());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&first), None);
        assert_eq!(cache.get(&third), Some("3".to_string()));
    }

    #[test]
    fn cache_scopes_are_isolated() {
        let cache = BoundedPromptCache::new(8);
        let mine = CacheKey::new(CacheScope::User("u1".to_string()), "same prompt");
        cache.put(mine, "mine".to_string());

        let other = CacheKey::new(CacheScope::User("u2".to_string()), "same prompt");
        assert_eq!(cache.get(&other), None);
    }

    #[tokio::test]
    async fn service_answers_repeat_prompts_from_cache() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok("leave_status".to_string())]));
        let cache = Arc::new(BoundedPromptCache::new(4));
        let service = TextService::new(llm.clone(), cache, 50, Duration::from_secs(1));

        let scope = CacheScope::User("u1".to_string());
        let first = service.ask(scope.clone(), "how many days", "Reply with a label.").await;
        let second = service.ask(scope, "how many days", "Reply with a label.").await;

        assert_eq!(first, Ok("leave_status".to_string()));
        assert_eq!(second, Ok("leave_status".to_string()));
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn disabled_client_always_fails() {
        let service = TextService::uncached(Arc::new(UnavailableLlmClient), Duration::from_secs(1));
        let scope = CacheScope::User("u1".to_string());
        assert!(service.ask(scope, "hello", "").await.is_err());
    }
}
