//! Unhandled error reporting
//!
//! Failures that escape a handler are logged with their full chain and,
//! when a developer chat is configured, sent there as an HTML report.

use std::any::Any;
use std::backtrace::Backtrace;

use gptrelay_core::bus::OutboundMessage;
use gptrelay_core::config::ReporterConfig;
use gptrelay_core::session::Session;
use serde_json::json;
use tracing::error;

use crate::event::Event;

/// Telegram rejects messages longer than this
pub const MAX_REPORT_CHARS: usize = 4096;

/// A failure captured from a handler
#[derive(Debug, Clone)]
pub struct Failure {
    pub summary: String,
    /// Error chain or panic backtrace
    pub trace: String,
}

impl Failure {
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            summary: err.to_string(),
            trace: format!("{:?}", err),
        }
    }

    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self {
            summary: format!("handler panicked: {}", message),
            trace: format!("{}\n\n{}", message, Backtrace::force_capture()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorReporter {
    config: ReporterConfig,
}

impl ErrorReporter {
    pub fn new(config: ReporterConfig) -> Self {
        Self { config }
    }

    /// Log the failure and build the messages that announce it
    pub fn report(&self, event: &Event, session: &Session, failure: &Failure) -> Vec<OutboundMessage> {
        error!(
            session = %event.session_key(),
            error = %failure.summary,
            trace = %failure.trace,
            "Exception while handling an event"
        );

        let mut messages = Vec::new();
        if let Some(chat_id) = self.config.developer_chat_id.as_deref() {
            let body = render_report(event, session, failure, MAX_REPORT_CHARS);
            messages.push(OutboundMessage::new(event.channel(), chat_id, body).html());
        }
        if self.config.notify_user && matches!(event, Event::Inbound(_)) {
            messages.push(OutboundMessage::new(
                event.channel(),
                event.chat_id(),
                self.config.failure_notice.clone(),
            ));
        }
        messages
    }
}

/// Render the HTML report, shrinking each section until it fits `max_chars`
pub fn render_report(event: &Event, session: &Session, failure: &Failure, max_chars: usize) -> String {
    let event_json = pretty(&serde_json::to_value(event).unwrap_or_default());
    let metadata = match event {
        Event::Inbound(msg) => json!(msg.metadata),
        Event::IdleTimeout(_) => json!({}),
    };
    let chat_json = pretty(&json!({
        "channel": event.channel(),
        "chat_id": event.chat_id(),
        "metadata": metadata,
    }));
    let user_json = pretty(&json!({
        "session_key": event.session_key(),
        "session": session,
    }));

    let mut budget = max_chars;
    loop {
        let section = budget / 4;
        let report = format!(
            "An exception was raised while handling an event\n\
             <pre>event = {}</pre>\n\n\
             <pre>chat_data = {}</pre>\n\n\
             <pre>user_data = {}</pre>\n\n\
             <pre>{}</pre>",
            escape(&event_json, section),
            escape(&chat_json, section),
            escape(&user_json, section),
            escape(&failure.trace, section),
        );
        if report.chars().count() <= max_chars || section == 0 {
            return report;
        }
        budget /= 2;
    }
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Truncate on a char boundary before escaping so entities stay whole
fn escape(text: &str, max_chars: usize) -> String {
    let clipped: String = if text.chars().count() > max_chars {
        let keep = max_chars.saturating_sub(3);
        let mut clipped: String = text.chars().take(keep).collect();
        clipped.push_str("...");
        clipped
    } else {
        text.to_string()
    };
    html_escape::encode_text(&clipped).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gptrelay_core::bus::InboundMessage;

    fn inbound(text: &str) -> Event {
        Event::Inbound(InboundMessage::new("telegram", "42", "100", text))
    }

    fn reporter(developer: Option<&str>, notify_user: bool) -> ErrorReporter {
        ErrorReporter::new(ReporterConfig {
            developer_chat_id: developer.map(String::from),
            notify_user,
            ..ReporterConfig::default()
        })
    }

    #[test]
    fn test_failure_from_error_keeps_chain() {
        let err = anyhow::anyhow!("connection reset").context("ask failed");
        let failure = Failure::from_error(&err);
        assert_eq!(failure.summary, "ask failed");
        assert!(failure.trace.contains("connection reset"));
    }

    #[test]
    fn test_failure_from_panic_payloads() {
        let failure = Failure::from_panic(Box::new("boom"));
        assert_eq!(failure.summary, "handler panicked: boom");
        let failure = Failure::from_panic(Box::new(String::from("bang")));
        assert_eq!(failure.summary, "handler panicked: bang");
        let failure = Failure::from_panic(Box::new(7_u8));
        assert!(failure.summary.contains("non-string"));
    }

    #[test]
    fn test_report_escapes_html() {
        let failure = Failure {
            summary: "bad".to_string(),
            trace: "<script> & stuff".to_string(),
        };
        let report = render_report(&inbound("<b>hi</b>"), &Session::chatting(), &failure, 4096);
        assert!(report.contains("&lt;script&gt; &amp; stuff"));
        assert!(report.contains("&lt;b&gt;hi&lt;/b&gt;"));
        assert!(!report.contains("<script>"));
        assert!(report.contains("<pre>chat_data = "));
        assert!(report.contains("chatting"));
    }

    #[test]
    fn test_chat_data_carries_inbound_metadata() {
        let failure = Failure {
            summary: "bad".to_string(),
            trace: "trace".to_string(),
        };
        let msg = InboundMessage::new("telegram", "42", "-100", "hi")
            .with_metadata("username", "ada_l")
            .with_metadata("is_group", true);
        let report = render_report(&Event::Inbound(msg), &Session::default(), &failure, 4096);

        let chat_data = report
            .split("<pre>chat_data = ")
            .nth(1)
            .and_then(|rest| rest.split("</pre>").next())
            .unwrap();
        assert!(chat_data.contains("\"chat_id\": \"-100\""));
        assert!(chat_data.contains("ada_l"));
        assert!(chat_data.contains("is_group"));
    }

    #[test]
    fn test_report_fits_limit() {
        let failure = Failure {
            summary: "bad".to_string(),
            trace: "&".repeat(20_000),
        };
        let report = render_report(&inbound(&"x".repeat(10_000)), &Session::default(), &failure, 4096);
        assert!(report.chars().count() <= 4096);
        assert!(report.ends_with("</pre>"));
    }

    #[test]
    fn test_report_targets() {
        let failure = Failure {
            summary: "bad".to_string(),
            trace: "trace".to_string(),
        };
        let messages = reporter(Some("-100"), true).report(&inbound("hi"), &Session::default(), &failure);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].chat_id, "-100");
        assert!(messages[0].is_html());
        assert_eq!(messages[1].chat_id, "100");
        assert!(!messages[1].is_html());

        let messages = reporter(None, false).report(&inbound("hi"), &Session::default(), &failure);
        assert!(messages.is_empty());
    }

    #[test]
    fn test_timer_failures_do_not_notify_user() {
        let failure = Failure {
            summary: "bad".to_string(),
            trace: "trace".to_string(),
        };
        let event = Event::IdleTimeout(crate::event::IdleTimeout {
            session_key: "telegram:42".to_string(),
            channel: "telegram".to_string(),
            chat_id: "100".to_string(),
            generation: 1,
        });
        let messages = reporter(None, true).report(&event, &Session::default(), &failure);
        assert!(messages.is_empty());
    }
}
