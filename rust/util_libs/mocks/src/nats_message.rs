#![allow(dead_code)]

use async_nats::{HeaderMap, Message};

/// Builder for inbound NATS messages in handler-level tests.
pub struct NatsMessage {
    subject: String,
    reply: Option<String>,
    payload: Vec<u8>,
    headers: Option<HeaderMap>,
}

impl NatsMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            payload: payload.into(),
            headers: None,
        }
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        let mut headers = self.headers.unwrap_or_default();
        headers.insert(name, value);
        self.headers = Some(headers);
        self
    }

    pub fn into_message(self) -> Message {
        Message {
            subject: self.subject.into(),
            reply: self.reply.map(|r| r.into()),
            payload: self.payload.clone().into(),
            headers: self.headers,
            status: None,
            description: None,
            length: self.payload.len(),
        }
    }
}
