//! ChatGPT web backend client

use gptrelay_core::config::ChatGptConfig;
use gptrelay_core::utils::truncate;
use once_cell::sync::OnceCell;
use reqwest::blocking::{Client, Response};
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::time::Duration;
use tracing::{debug, warn};

use crate::base::{
    AskReply, AskStream, BackendError, BackendResult, ConversationBackend, ConversationSummary,
};

const USER_AGENT: &str = concat!("gptrelay/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Serialize)]
struct ConversationRequest<'a> {
    action: &'static str,
    messages: Vec<PromptMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
    parent_message_id: String,
    model: &'a str,
}

#[derive(Debug, Serialize)]
struct PromptMessage<'a> {
    id: String,
    author: Author,
    content: PromptContent<'a>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Author {
    role: String,
}

#[derive(Debug, Serialize)]
struct PromptContent<'a> {
    content_type: &'static str,
    parts: [&'a str; 1],
}

/// One `data:` payload of the answer stream
#[derive(Debug, Deserialize)]
struct StreamPayload {
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    id: String,
    #[serde(default)]
    author: Option<Author>,
    #[serde(default)]
    content: Option<StreamContent>,
}

#[derive(Debug, Deserialize)]
struct StreamContent {
    #[serde(default)]
    parts: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ConversationsPage {
    #[serde(default)]
    items: Vec<ConversationSummary>,
}

/// Client for the ChatGPT web conversation API
///
/// The blocking HTTP client is created on first use, which always happens
/// on the worker thread that runs the call.
pub struct ChatGptClient {
    config: ChatGptConfig,
    http: OnceCell<Client>,
}

impl ChatGptClient {
    pub fn new(config: ChatGptConfig) -> Self {
        Self {
            config,
            http: OnceCell::new(),
        }
    }

    fn http(&self) -> BackendResult<&Client> {
        self.http.get_or_try_init(|| {
            let mut builder = Client::builder()
                .user_agent(USER_AGENT)
                .timeout(Duration::from_secs(self.config.request_timeout_secs));

            if let Some(proxy) = self.config.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
                let proxy = reqwest::Proxy::all(proxy)
                    .map_err(|e| BackendError::Config(format!("invalid proxy {}: {}", proxy, e)))?;
                builder = builder.proxy(proxy);
            }

            builder
                .build()
                .map_err(|e| BackendError::Config(format!("failed to build HTTP client: {}", e)))
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn access_token(&self) -> BackendResult<&str> {
        let token = self.config.access_token.trim();
        if token.is_empty() {
            return Err(BackendError::Config(
                "chatgpt.access_token is not configured".to_string(),
            ));
        }
        Ok(token)
    }

    fn check_status(response: Response) -> BackendResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(BackendError::Status {
            status: status.as_u16(),
            body: truncate(body.trim(), MAX_ERROR_BODY),
        })
    }
}

impl ConversationBackend for ChatGptClient {
    fn ask(
        &self,
        prompt: &str,
        conversation_id: Option<&str>,
        parent_id: Option<&str>,
    ) -> BackendResult<AskStream> {
        let request = ConversationRequest {
            action: "next",
            messages: vec![PromptMessage {
                id: uuid::Uuid::new_v4().to_string(),
                author: Author {
                    role: "user".to_string(),
                },
                content: PromptContent {
                    content_type: "text",
                    parts: [prompt],
                },
            }],
            conversation_id,
            parent_message_id: parent_id
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            model: &self.config.model,
        };

        debug!(
            "Sending prompt to {} (conversation: {:?})",
            self.config.base_url, conversation_id
        );

        let response = self
            .http()?
            .post(self.url("conversation"))
            .bearer_auth(self.access_token()?)
            .header(ACCEPT, "text/event-stream")
            .json(&request)
            .send()?;
        let response = Self::check_status(response)?;

        Ok(AskStream::new(SseReplies::new(
            BufReader::new(response),
            conversation_id.map(str::to_string),
        )))
    }

    fn get_conversations(&self) -> BackendResult<Vec<ConversationSummary>> {
        let response = self
            .http()?
            .get(self.url("conversations"))
            .query(&[("offset", 0), ("limit", self.config.page_size)])
            .bearer_auth(self.access_token()?)
            .send()?;
        let page: ConversationsPage = Self::check_status(response)?
            .json()
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        Ok(page.items)
    }

    fn clear_conversations(&self) -> BackendResult<()> {
        let response = self
            .http()?
            .patch(self.url("conversations"))
            .bearer_auth(self.access_token()?)
            .json(&serde_json::json!({ "is_visible": false }))
            .send()?;
        Self::check_status(response)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "chatgpt"
    }
}

enum Decoded {
    Reply(AskReply),
    Skip,
    Done,
}

/// Iterator over the server-sent events of an answer
struct SseReplies<R> {
    reader: R,
    data_lines: Vec<String>,
    conversation_id: Option<String>,
    finished: bool,
}

impl<R: BufRead> SseReplies<R> {
    fn new(reader: R, conversation_id: Option<String>) -> Self {
        Self {
            reader,
            data_lines: Vec::new(),
            conversation_id,
            finished: false,
        }
    }

    fn take_event(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.data_lines).join("\n"))
        }
    }

    fn decode(&mut self, data: &str) -> BackendResult<Decoded> {
        if data == "[DONE]" {
            return Ok(Decoded::Done);
        }

        let payload: StreamPayload = match serde_json::from_str(data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Skipping undecodable stream event: {}", e);
                return Ok(Decoded::Skip);
            }
        };

        if let Some(error) = payload.error.filter(|e| !e.is_null()) {
            let message = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(BackendError::InvalidResponse(message));
        }

        if payload.conversation_id.is_some() {
            self.conversation_id = payload.conversation_id;
        }

        let Some(message) = payload.message else {
            return Ok(Decoded::Skip);
        };
        let from_assistant = message
            .author
            .as_ref()
            .map_or(true, |author| author.role == "assistant");
        if !from_assistant {
            return Ok(Decoded::Skip);
        }

        let text = message
            .content
            .and_then(|content| content.parts.into_iter().next())
            .and_then(|part| part.as_str().map(str::to_string))
            .unwrap_or_default();

        Ok(Decoded::Reply(AskReply {
            text,
            conversation_id: self.conversation_id.clone(),
            parent_id: Some(message.id),
        }))
    }

    /// Decode a completed event; `None` means keep reading
    fn emit(&mut self, data: String) -> Option<BackendResult<AskReply>> {
        match self.decode(&data) {
            Ok(Decoded::Reply(reply)) => Some(Ok(reply)),
            Ok(Decoded::Skip) => None,
            Ok(Decoded::Done) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl<R: BufRead> Iterator for SseReplies<R> {
    type Item = BackendResult<AskReply>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    self.finished = true;
                    return self.take_event().and_then(|data| self.emit(data));
                }
                Ok(_) => {}
                Err(e) => {
                    self.finished = true;
                    return Some(Err(BackendError::Transport(e.to_string())));
                }
            }

            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if let Some(item) = self.take_event().and_then(|data| self.emit(data)) {
                    return Some(item);
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data_lines.push(rest.trim().to_string());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::io::Cursor;

    fn replies(raw: &str) -> Vec<BackendResult<AskReply>> {
        SseReplies::new(Cursor::new(raw.to_string()), None).collect()
    }

    fn client_for(server: &mockito::Server) -> ChatGptClient {
        ChatGptClient::new(ChatGptConfig {
            access_token: "test-token".to_string(),
            base_url: server.url(),
            ..ChatGptConfig::default()
        })
    }

    const STREAM: &str = concat!(
        "data: {\"message\":{\"id\":\"m1\",\"author\":{\"role\":\"assistant\"},\"content\":{\"parts\":[\"hi\"]}},\"conversation_id\":\"c1\",\"error\":null}\n\n",
        "data: {\"message\":{\"id\":\"m1\",\"author\":{\"role\":\"assistant\"},\"content\":{\"parts\":[\"hi there\"]}},\"conversation_id\":\"c1\",\"error\":null}\n\n",
        "data: [DONE]\n\n",
    );

    #[test]
    fn test_sse_replies_accumulate() {
        let items = replies(STREAM);
        assert_eq!(items.len(), 2);
        assert_eq!(items[1], Ok(AskReply::new("hi there", "c1", "m1")));
    }

    #[test]
    fn test_sse_stops_at_done() {
        let raw = format!("{}data: {{\"message\":{{\"id\":\"late\"}}}}\n\n", STREAM);
        let items = replies(&raw);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_sse_crlf_and_unterminated_tail() {
        let raw = "data: {\"message\":{\"id\":\"m2\",\"content\":{\"parts\":[\"ok\"]}},\"conversation_id\":\"c9\"}\r\n";
        let items = replies(raw);
        assert_eq!(items, vec![Ok(AskReply::new("ok", "c9", "m2"))]);
    }

    #[test]
    fn test_sse_skips_user_echo_and_garbage() {
        let raw = concat!(
            "data: not-json\n\n",
            "data: {\"message\":{\"id\":\"u1\",\"author\":{\"role\":\"user\"},\"content\":{\"parts\":[\"hello\"]}}}\n\n",
            "event: ping\n\n",
        );
        assert!(replies(raw).is_empty());
    }

    #[test]
    fn test_sse_error_payload() {
        let raw = "data: {\"error\":\"Too many requests\"}\n\n";
        let items = replies(raw);
        assert_eq!(
            items,
            vec![Err(BackendError::InvalidResponse("Too many requests".to_string()))]
        );
    }

    #[test]
    fn test_sse_keeps_known_conversation_id() {
        let raw = "data: {\"message\":{\"id\":\"m3\",\"content\":{\"parts\":[\"x\"]}}}\n\n";
        let items: Vec<_> =
            SseReplies::new(Cursor::new(raw.to_string()), Some("c-known".to_string())).collect();
        assert_eq!(items, vec![Ok(AskReply::new("x", "c-known", "m3"))]);
    }

    #[test]
    fn test_ask_posts_prompt_and_streams() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/conversation")
            .match_header("authorization", "Bearer test-token")
            .match_body(Matcher::AllOf(vec![
                Matcher::PartialJson(serde_json::json!({
                    "action": "next",
                    "conversation_id": "c1",
                    "parent_message_id": "p1",
                })),
                Matcher::Regex(r#""parts":\["hello"\]"#.to_string()),
            ]))
            .with_header("content-type", "text/event-stream")
            .with_body(STREAM)
            .create();

        let client = client_for(&server);
        let last = client
            .ask("hello", Some("c1"), Some("p1"))
            .unwrap()
            .last_reply()
            .unwrap();

        mock.assert();
        assert_eq!(last, Some(AskReply::new("hi there", "c1", "m1")));
    }

    #[test]
    fn test_ask_maps_http_status() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/conversation")
            .with_status(401)
            .with_body("token expired")
            .create();

        let err = client_for(&server).ask("hello", None, None).unwrap_err();
        assert_eq!(
            err,
            BackendError::Status {
                status: 401,
                body: "token expired".to_string()
            }
        );
    }

    #[test]
    fn test_get_conversations() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/conversations")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("offset".into(), "0".into()),
                Matcher::UrlEncoded("limit".into(), "20".into()),
            ]))
            .with_body(r#"{"items":[{"id":"c1","title":"First","create_time":"2023-01-01T00:00:00"}],"total":1}"#)
            .create();

        let items = client_for(&server).get_conversations().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "c1");
        assert_eq!(items[0].title, "First");
    }

    #[test]
    fn test_clear_conversations() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("PATCH", "/conversations")
            .match_body(Matcher::Json(serde_json::json!({"is_visible": false})))
            .with_body(r#"{"success":true}"#)
            .create();

        client_for(&server).clear_conversations().unwrap();
        mock.assert();
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let client = ChatGptClient::new(ChatGptConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..ChatGptConfig::default()
        });
        assert!(matches!(
            client.clear_conversations(),
            Err(BackendError::Config(_))
        ));
    }

    #[test]
    fn test_transport_error_is_plain_message() {
        let client = ChatGptClient::new(ChatGptConfig {
            access_token: "t".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_secs: 2,
            ..ChatGptConfig::default()
        });
        let err = client.get_conversations().unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)));
    }
}
