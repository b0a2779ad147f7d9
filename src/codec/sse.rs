//! Server-Sent Events for server-streaming replies.

use std::time::Duration;

use axum::response::sse::Event;

pub const MIME: &str = "text/event-stream";

/// Builds `message` and `error` events with increasing ids.
#[derive(Debug, Clone)]
pub struct SseEncoder {
    next_id: u64,
    retry: Option<Duration>,
}

impl SseEncoder {
    pub fn new(retry: Option<Duration>) -> Self {
        Self { next_id: 1, retry }
    }

    pub fn message(&mut self, data: &str) -> Event {
        self.event("message", data)
    }

    pub fn error(&mut self, data: &str) -> Event {
        self.event("error", data)
    }

    fn event(&mut self, name: &str, data: &str) -> Event {
        let mut event = Event::default().id(self.next_id.to_string()).event(name);
        self.next_id += 1;
        if let Some(retry) = self.retry {
            event = event.retry(retry);
        }
        event.data(data)
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use axum::response::sse::Sse;
    use axum::response::IntoResponse;
    use http_body_util::BodyExt;

    use super::*;

    async fn render(events: Vec<Event>) -> String {
        let stream = futures_util::stream::iter(events.into_iter().map(Ok::<_, Infallible>));
        let body = Sse::new(stream)
            .into_response()
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    /// `(field, value)` pairs of one event block.
    fn fields(block: &str) -> Vec<(String, String)> {
        block
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.to_owned(), value.trim_start().to_owned()))
            .collect()
    }

    #[tokio::test]
    async fn test_block_layout() {
        let mut enc = SseEncoder::new(Some(Duration::from_millis(3000)));
        let text = render(vec![enc.message(r#"{"count":1}"#), enc.message("{}")]).await;
        let blocks: Vec<&str> = text.split("\n\n").filter(|b| !b.is_empty()).collect();
        assert_eq!(blocks.len(), 2);

        let first = fields(blocks[0]);
        assert!(first.contains(&("id".into(), "1".into())));
        assert!(first.contains(&("event".into(), "message".into())));
        assert!(first.contains(&("retry".into(), "3000".into())));
        assert!(first.contains(&("data".into(), r#"{"count":1}"#.into())));
        assert!(fields(blocks[1]).contains(&("id".into(), "2".into())));
    }

    #[tokio::test]
    async fn test_multiline_and_error() {
        let mut enc = SseEncoder::new(None);
        let text = render(vec![enc.error("a\nb")]).await;
        let block = fields(text.trim_end());

        assert!(block.contains(&("event".into(), "error".into())));
        assert!(!block.iter().any(|(name, _)| name == "retry"));
        let data: Vec<&str> = block
            .iter()
            .filter(|(name, _)| name == "data")
            .map(|(_, value)| value.as_str())
            .collect();
        assert_eq!(data, ["a", "b"]);
    }
}
