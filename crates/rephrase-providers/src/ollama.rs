use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use rephrase_observability::{fingerprint, Tracer};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::ModelError;

const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Clone)]
pub struct ModelTimeouts {
    pub health: Duration,
    pub pull: Duration,
    pub generate: Duration,
}

impl Default for ModelTimeouts {
    fn default() -> Self {
        Self {
            health: Duration::from_secs(5),
            pull: Duration::from_secs(300),
            generate: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthProbe {
    Up,
    /// Reachable, but `/api/tags` answered a non-2xx status.
    BadStatus(u16),
    Unreachable,
}

/// Turns a prompt pair into model text. Implemented by [`OllamaClient`].
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model(&self) -> &str;

    /// One chat round trip; the returned text is trimmed and non-empty.
    async fn generate(&self, system_prompt: &str, user_input: &str) -> Result<String, ModelError>;
}

#[derive(Debug, Serialize)]
struct ChatReq<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResp {
    message: Option<ChatRespMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatRespMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResp {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

fn base_model_name(name: &str) -> &str {
    name.split(':').next().unwrap_or(name)
}

/// An untagged name matches any installed tag; a tagged one must match exactly.
fn is_installed(installed: &[String], name: &str) -> bool {
    if name.contains(':') {
        installed.iter().any(|m| m == name)
    } else {
        installed.iter().any(|m| base_model_name(m) == name)
    }
}

fn clamp_body(body: String) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body;
    }
    let head: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    format!("{head}...(truncated)")
}

fn send_error(e: reqwest::Error) -> ModelError {
    if e.is_timeout() {
        return ModelError::new("E_MODEL_TIMEOUT", format!("request timed out: {e}"));
    }
    ModelError::new("E_MODEL_HTTP_SEND", format!("request failed: {e}"))
}

async fn ensure_success(resp: Response) -> Result<Response, ModelError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ModelError::new(
        format!("E_MODEL_HTTP_STATUS_{}", status.as_u16()),
        clamp_body(body),
    ))
}

/// Client for an Ollama-compatible model server. Every call is single shot.
pub struct OllamaClient {
    http: Client,
    base_url: String,
    model: String,
    timeouts: ModelTimeouts,
    tracer: Tracer,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeouts: ModelTimeouts, tracer: Tracer) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeouts,
            tracer,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Probes `/api/tags`, telling a down server apart from one answering an error.
    pub async fn probe_health_within(&self, timeout: Duration) -> HealthProbe {
        let fut = self.http.get(self.url("/api/tags")).timeout(timeout).send();
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(resp)) if resp.status().is_success() => HealthProbe::Up,
            Ok(Ok(resp)) => {
                tracing::error!("model server answered {}", resp.status());
                HealthProbe::BadStatus(resp.status().as_u16())
            }
            Ok(Err(e)) => {
                tracing::debug!("model server not responding: {e}");
                HealthProbe::Unreachable
            }
            Err(_) => {
                tracing::debug!("model server health check timed out");
                HealthProbe::Unreachable
            }
        }
    }

    /// True when `/api/tags` answers 2xx within `timeout`.
    pub async fn check_health_within(&self, timeout: Duration) -> bool {
        self.probe_health_within(timeout).await == HealthProbe::Up
    }

    pub async fn probe_health(&self) -> HealthProbe {
        self.probe_health_within(self.timeouts.health).await
    }

    pub async fn check_health(&self) -> bool {
        self.check_health_within(self.timeouts.health).await
    }

    /// Installed model names without their tag (`gemma3:latest` -> `gemma3`).
    pub async fn list_models(&self) -> Result<Vec<String>, ModelError> {
        Ok(self
            .list_model_tags()
            .await?
            .iter()
            .map(|m| base_model_name(m).to_string())
            .collect())
    }

    /// Installed model names exactly as the server reports them.
    pub async fn list_model_tags(&self) -> Result<Vec<String>, ModelError> {
        let timeout = self.timeouts.health;
        let fut = async {
            let resp = self
                .http
                .get(self.url("/api/tags"))
                .timeout(timeout)
                .send()
                .await
                .map_err(send_error)?;
            let resp = ensure_success(resp).await?;
            resp.json::<TagsResp>()
                .await
                .map_err(|e| ModelError::new("E_MODEL_PARSE", format!("invalid tags response: {e}")))
        };
        let tags = tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ModelError::new("E_MODEL_TIMEOUT", "listing models timed out"))??;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    pub async fn pull_model(&self, name: &str) -> Result<(), ModelError> {
        let timeout = self.timeouts.pull;
        let fut = async {
            let resp = self
                .http
                .post(self.url("/api/pull"))
                .timeout(timeout)
                .json(&json!({"name": name, "stream": false}))
                .send()
                .await
                .map_err(send_error)?;
            ensure_success(resp).await.map(|_| ())
        };
        tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ModelError::new("E_MODEL_TIMEOUT", format!("pulling {name} timed out")))?
    }

    /// Makes sure `name` is installed, pulling it when missing.
    pub async fn ensure_model_available(&self, name: &str) -> bool {
        let span = self.tracer.span(
            None,
            "Model",
            "MODEL.ensure_available",
            Some(json!({"model": name})),
        );
        let available = match self.list_model_tags().await {
            Ok(v) => v,
            Err(e) => {
                tracing::error!("failed to list models: {e}");
                span.err("http", &e.code, &e.message, None);
                return false;
            }
        };
        tracing::info!("available models: {available:?}");

        if is_installed(&available, name) {
            tracing::info!("model '{name}' is available");
            span.ok(Some(json!({"pulled": false})));
            return true;
        }

        tracing::warn!("model '{name}' not found, pulling it (this can take a while)");
        match self.pull_model(name).await {
            Ok(()) => {
                tracing::info!("model '{name}' pulled successfully");
                span.ok(Some(json!({"pulled": true})));
                true
            }
            Err(e) => {
                tracing::error!("failed to pull model '{name}': {e}");
                span.err("http", &e.code, &e.message, None);
                false
            }
        }
    }

    /// Throwaway chat call confirming the model is loaded and answering.
    pub async fn warmup_test(&self, name: &str) -> bool {
        let span = self.tracer.span(None, "Model", "MODEL.warmup", Some(json!({"model": name})));
        tracing::info!("testing model '{name}' with a simple request...");
        let messages = vec![Message {
            role: "user",
            content: "test",
        }];
        match self.chat(name, messages).await {
            Ok(_) => {
                tracing::info!("model '{name}' is loaded and responding");
                span.ok(None);
                true
            }
            Err(e) => {
                tracing::error!("model test failed: {e}");
                span.err("http", &e.code, &e.message, None);
                false
            }
        }
    }

    async fn chat(&self, model: &str, messages: Vec<Message<'_>>) -> Result<String, ModelError> {
        let timeout = self.timeouts.generate;
        let req = ChatReq {
            model,
            messages,
            stream: false,
        };
        let fut = async {
            let resp = self
                .http
                .post(self.url("/api/chat"))
                .timeout(timeout)
                .json(&req)
                .send()
                .await
                .map_err(send_error)?;
            let resp = ensure_success(resp).await?;
            let body = resp
                .text()
                .await
                .map_err(|e| ModelError::new("E_MODEL_PARSE", format!("read response failed: {e}")))?;
            tracing::debug!("model response: {body}");
            let parsed: ChatResp = serde_json::from_str(&body)
                .map_err(|e| ModelError::new("E_MODEL_PARSE", format!("invalid json response: {e}")))?;
            parsed
                .message
                .and_then(|m| m.content)
                .ok_or_else(|| ModelError::new("E_MODEL_PARSE", "response.message.content is missing"))
        };
        tokio::time::timeout(timeout, fut).await.map_err(|_| {
            ModelError::new(
                "E_MODEL_TIMEOUT",
                format!("no response within {}ms", timeout.as_millis()),
            )
        })?
    }
}

#[async_trait]
impl TextGenerator for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system_prompt: &str, user_input: &str) -> Result<String, ModelError> {
        let span = self.tracer.span(
            None,
            "Model",
            "MODEL.generate",
            Some(json!({
                "model": self.model,
                "input_chars": user_input.chars().count(),
                "input_fp": fingerprint(user_input),
            })),
        );
        tracing::info!("sending text to {} for processing...", self.model);
        tracing::debug!("input text length: {} characters", user_input.chars().count());

        let messages = vec![
            Message {
                role: "system",
                content: system_prompt,
            },
            Message {
                role: "user",
                content: user_input,
            },
        ];
        let result = self.chat(&self.model, messages).await.and_then(|raw| {
            let text = raw.trim().to_string();
            if text.is_empty() {
                return Err(ModelError::new("E_MODEL_EMPTY", "model returned empty content"));
            }
            Ok(text)
        });

        match result {
            Ok(text) => {
                tracing::info!(
                    "text processed successfully (length: {} characters)",
                    text.chars().count()
                );
                span.ok(Some(json!({
                    "output_chars": text.chars().count(),
                    "output_fp": fingerprint(&text),
                })));
                Ok(text)
            }
            Err(e) => {
                tracing::error!("failed to process text: {e}");
                let kind = if e.code == "E_MODEL_PARSE" || e.code == "E_MODEL_EMPTY" {
                    "parse"
                } else {
                    "http"
                };
                span.err(kind, &e.code, &e.message, None);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::time::Instant;
    use tokio::net::TcpListener;

    fn client(url: &str) -> OllamaClient {
        OllamaClient::new(url, "gemma3", ModelTimeouts::default(), Tracer::disabled())
    }

    fn short_timeouts() -> ModelTimeouts {
        ModelTimeouts {
            health: Duration::from_millis(200),
            pull: Duration::from_millis(200),
            generate: Duration::from_millis(200),
        }
    }

    /// Accepts connections and never answers.
    async fn silent_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn generate_sends_chat_request_and_trims_content() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/api/chat")
            .match_body(Matcher::PartialJson(json!({
                "model": "gemma3",
                "stream": false,
                "messages": [
                    {"role": "system", "content": "fix grammar"},
                    {"role": "user", "content": "helo wrold"}
                ]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":{"role":"assistant","content":"  hello world \n"},"done":true}"#)
            .create_async()
            .await;

        let out = client(&server.url())
            .generate("fix grammar", "helo wrold")
            .await
            .expect("generate");
        assert_eq!(out, "hello world");
        m.assert_async().await;
    }

    #[tokio::test]
    async fn generate_maps_server_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(500)
            .with_body("model crashed")
            .create_async()
            .await;

        let err = client(&server.url())
            .generate("s", "u")
            .await
            .expect_err("500");
        assert_eq!(err.code, "E_MODEL_HTTP_STATUS_500");
        assert_eq!(err.message, "model crashed");
    }

    #[tokio::test]
    async fn generate_rejects_malformed_and_empty_replies() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(r#"{"done":true}"#)
            .create_async()
            .await;
        let err = client(&server.url()).generate("s", "u").await.expect_err("missing");
        assert_eq!(err.code, "E_MODEL_PARSE");

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;
        let err = client(&server.url()).generate("s", "u").await.expect_err("garbage");
        assert_eq!(err.code, "E_MODEL_PARSE");

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(r#"{"message":{"content":"   "}}"#)
            .create_async()
            .await;
        let err = client(&server.url()).generate("s", "u").await.expect_err("empty");
        assert_eq!(err.code, "E_MODEL_EMPTY");
    }

    #[tokio::test]
    async fn generate_times_out_when_server_never_answers() {
        let url = silent_server().await;
        let c = OllamaClient::new(&url, "gemma3", short_timeouts(), Tracer::disabled());
        let t0 = Instant::now();
        let err = c.generate("s", "u").await.expect_err("timeout");
        assert!(err.is_timeout(), "{err}");
        assert!(t0.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_send_error() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            l.local_addr().expect("addr").port()
        };
        let c = OllamaClient::new(
            &format!("http://127.0.0.1:{port}"),
            "gemma3",
            short_timeouts(),
            Tracer::disabled(),
        );
        let err = c.generate("s", "u").await.expect_err("refused");
        assert_eq!(err.code, "E_MODEL_HTTP_SEND");
        assert!(!c.check_health().await);
        assert_eq!(c.probe_health().await, HealthProbe::Unreachable);
    }

    #[tokio::test]
    async fn health_check_requires_success_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[]}"#)
            .create_async()
            .await;
        assert!(client(&server.url()).check_health().await);

        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(503)
            .create_async()
            .await;
        let c = client(&server.url());
        assert!(!c.check_health().await);
        assert_eq!(c.probe_health().await, HealthProbe::BadStatus(503));
    }

    #[tokio::test]
    async fn health_check_times_out() {
        let url = silent_server().await;
        let c = OllamaClient::new(&url, "gemma3", short_timeouts(), Tracer::disabled());
        assert!(!c.check_health().await);
    }

    #[tokio::test]
    async fn list_models_strips_tags() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[{"name":"gemma3:latest"},{"name":"llama3:8b"},{"name":"phi"}]}"#)
            .create_async()
            .await;
        let models = client(&server.url()).list_models().await.expect("list");
        assert_eq!(models, vec!["gemma3", "llama3", "phi"]);
    }

    #[tokio::test]
    async fn present_model_is_not_pulled() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[{"name":"gemma3:latest"}]}"#)
            .create_async()
            .await;
        let pull = server
            .mock("POST", "/api/pull")
            .expect(0)
            .create_async()
            .await;
        assert!(client(&server.url()).ensure_model_available("gemma3").await);
        pull.assert_async().await;
    }

    #[tokio::test]
    async fn missing_model_is_pulled() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[]}"#)
            .create_async()
            .await;
        let pull = server
            .mock("POST", "/api/pull")
            .match_body(Matcher::PartialJson(json!({"name": "gemma3", "stream": false})))
            .with_status(200)
            .with_body(r#"{"status":"success"}"#)
            .create_async()
            .await;
        assert!(client(&server.url()).ensure_model_available("gemma3").await);
        pull.assert_async().await;
    }

    #[tokio::test]
    async fn tagged_model_with_other_tag_installed_is_pulled() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[{"name":"llama3:70b"}]}"#)
            .create_async()
            .await;
        let pull = server
            .mock("POST", "/api/pull")
            .match_body(Matcher::PartialJson(json!({"name": "llama3:8b", "stream": false})))
            .with_status(200)
            .with_body(r#"{"status":"success"}"#)
            .expect(1)
            .create_async()
            .await;
        assert!(client(&server.url()).ensure_model_available("llama3:8b").await);
        pull.assert_async().await;
    }

    #[tokio::test]
    async fn exact_tag_match_is_not_pulled() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[{"name":"llama3:70b"},{"name":"llama3:8b"}]}"#)
            .create_async()
            .await;
        let pull = server
            .mock("POST", "/api/pull")
            .expect(0)
            .create_async()
            .await;
        assert!(client(&server.url()).ensure_model_available("llama3:8b").await);
        pull.assert_async().await;
    }

    #[test]
    fn installed_matching_respects_tags() {
        let installed = vec!["gemma3:latest".to_string(), "llama3:70b".to_string()];
        assert!(is_installed(&installed, "gemma3"));
        assert!(is_installed(&installed, "gemma3:latest"));
        assert!(is_installed(&installed, "llama3"));
        assert!(!is_installed(&installed, "llama3:8b"));
        assert!(!is_installed(&installed, "phi"));
    }

    #[tokio::test]
    async fn failed_pull_reports_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[{"name":"phi:latest"}]}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/api/pull")
            .with_status(404)
            .with_body(r#"{"error":"pull model manifest: file does not exist"}"#)
            .create_async()
            .await;
        assert!(!client(&server.url()).ensure_model_available("gemma3").await);
    }

    #[tokio::test]
    async fn warmup_uses_single_user_message() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/api/chat")
            .match_body(Matcher::PartialJson(json!({
                "model": "gemma3",
                "messages": [{"role": "user", "content": "test"}]
            })))
            .with_status(200)
            .with_body(r#"{"message":{"content":"ok"}}"#)
            .create_async()
            .await;
        assert!(client(&server.url()).warmup_test("gemma3").await);
        m.assert_async().await;
    }

    #[test]
    fn clamp_body_truncates_on_char_boundary() {
        let long = "é".repeat(MAX_ERROR_BODY_CHARS + 5);
        let out = clamp_body(long);
        assert!(out.ends_with("...(truncated)"));
        assert_eq!(out.chars().filter(|c| *c == 'é').count(), MAX_ERROR_BODY_CHARS);
    }
}
