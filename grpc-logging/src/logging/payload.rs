//! Payload record rendering

use std::fmt;

use super::fields::{keys, Fields};

const TRUNCATION_MARKER: &str = "…(truncated)";

/// Which side of the call a message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Received from the client
    Request,
    /// Sent to the client
    Response,
}

impl Direction {
    /// Value of the `grpc.payload` marker
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
        }
    }

    /// Field the rendered message is written to
    pub fn content_key(&self) -> &'static str {
        match self {
            Self::Request => keys::REQUEST_CONTENT,
            Self::Response => keys::RESPONSE_CONTENT,
        }
    }

    /// Record message
    pub fn message(&self) -> &'static str {
        match self {
            Self::Request => "request payload logged as grpc.request.content field",
            Self::Response => "response payload logged as grpc.response.content field",
        }
    }
}

/// Render `message` with its `Debug` impl, capped at `max_bytes`
///
/// Returns the content and whether it was cut. Cuts land on a char boundary.
pub(crate) fn render<T: fmt::Debug + ?Sized>(message: &T, max_bytes: Option<usize>) -> (String, bool) {
    let mut content = format!("{message:?}");

    match max_bytes {
        Some(max) if content.len() > max => {
            let mut cut = max;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
            content.push_str(TRUNCATION_MARKER);
            (content, true)
        }
        _ => (content, false),
    }
}

/// Fields of a payload record, minus the inherited tags and method fields
pub(crate) fn payload_fields<T: fmt::Debug + ?Sized>(
    direction: Direction,
    message: &T,
    max_bytes: Option<usize>,
) -> Fields {
    let (content, truncated) = render(message, max_bytes);
    let mut fields = Fields::new()
        .with(keys::PAYLOAD, direction.as_str())
        .with(direction.content_key(), content);
    if truncated {
        fields.insert(keys::PAYLOAD_TRUNCATED, true);
    }
    fields
}
