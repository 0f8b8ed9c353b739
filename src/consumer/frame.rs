//! Server-sent event framing and decoding
//!
//! `FrameDecoder` turns raw network chunks into SSE frames; `decode_frame`
//! turns one frame into a typed `Event`.

use crate::error::{BridgeError, Result};
use crate::types::{
    DeltaEvent, ErrorEvent, Event, EventPayload, IdleEvent, MessageCompleteEvent,
    PermissionRequest, QuestionRequest,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

/// One complete SSE block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    /// Value of the `event:` field, if any
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
}

/// Incremental SSE frame decoder
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across chunks are decoded intact.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawFrame> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            let mut line = &self.buf[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            let line = String::from_utf8_lossy(line).into_owned();
            if let Some(frame) = self.feed_line(&line) {
                frames.push(frame);
            }
            start = end + 1;
        }
        self.buf.drain(..start);
        frames
    }

    /// Bytes held back waiting for a line terminator
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn feed_line(&mut self, line: &str) -> Option<RawFrame> {
        if line.is_empty() {
            let event = self.event.take();
            if self.data.is_empty() {
                return None;
            }
            let data = std::mem::take(&mut self.data).join("\n");
            return Some(RawFrame { event, data });
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }
}

#[derive(Deserialize)]
struct WirePart {
    #[serde(rename = "sessionID")]
    session_id: String,
    #[serde(rename = "messageID")]
    message_id: String,
    #[serde(rename = "type", default)]
    part_type: String,
}

#[derive(Deserialize)]
struct WirePartUpdated {
    part: WirePart,
    delta: Option<String>,
}

#[derive(Deserialize)]
struct WireMessageTime {
    completed: Option<Value>,
}

#[derive(Deserialize)]
struct WireMessageInfo {
    id: String,
    #[serde(rename = "sessionID")]
    session_id: String,
    #[serde(default)]
    role: String,
    time: Option<WireMessageTime>,
}

#[derive(Deserialize)]
struct WireMessageUpdated {
    info: WireMessageInfo,
}

#[derive(Deserialize)]
struct WireStatus {
    #[serde(rename = "type")]
    status_type: String,
}

#[derive(Deserialize)]
struct WireSessionStatus {
    #[serde(rename = "sessionID")]
    session_id: String,
    status: WireStatus,
}

/// Decode one frame into an event
///
/// Invalid JSON is an error; a recognized kind whose attributes do not match
/// the expected shape decodes as `Other`.
pub fn decode_frame(frame: &RawFrame) -> Result<Event> {
    let label = frame.event.clone().unwrap_or_else(|| "message".to_string());

    let value: Value = serde_json::from_str(&frame.data).map_err(|e| BridgeError::Decode {
        kind: label.clone(),
        reason: e.to_string(),
    })?;
    let Value::Object(payload) = value else {
        return Err(BridgeError::Decode {
            kind: label,
            reason: "payload is not a JSON object".to_string(),
        });
    };

    let kind = frame
        .event
        .as_deref()
        .filter(|e| !e.is_empty() && *e != "message")
        .or_else(|| payload.get("type").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| BridgeError::Decode {
            kind: label,
            reason: "missing event type".to_string(),
        })?;

    let props = match payload.get("properties") {
        Some(Value::Object(props)) => props.clone(),
        _ => payload,
    };

    let decoded = match kind.as_str() {
        "message.part.updated" => decode_part_updated(&props),
        "delta" => parse::<DeltaEvent>(&props).map(EventPayload::Delta),
        "message.updated" => decode_message_updated(&props),
        "message-complete" => {
            parse::<MessageCompleteEvent>(&props).map(EventPayload::MessageComplete)
        }
        "session.idle" | "idle" => parse::<IdleEvent>(&props).map(EventPayload::Idle),
        "session.status" => parse::<WireSessionStatus>(&props)
            .filter(|s| s.status.status_type == "idle")
            .map(|s| {
                EventPayload::Idle(IdleEvent {
                    session_id: s.session_id,
                })
            }),
        "session.error" | "error" => Some(decode_error(&props)),
        "permission.asked" | "permission.updated" | "permission-requested" => {
            decode_permission(&props)
        }
        "question.asked" | "question-requested" => {
            parse::<QuestionRequest>(&props).map(EventPayload::QuestionRequested)
        }
        _ => None,
    };

    let payload = decoded.unwrap_or_else(|| {
        tracing::debug!(kind = %kind, "Unrecognized event kept as attributes");
        EventPayload::Other {
            name: kind,
            attributes: props,
        }
    });
    Ok(Event::new(payload))
}

fn parse<T: DeserializeOwned>(props: &Map<String, Value>) -> Option<T> {
    serde_json::from_value(Value::Object(props.clone())).ok()
}

fn decode_part_updated(props: &Map<String, Value>) -> Option<EventPayload> {
    let update = parse::<WirePartUpdated>(props)?;
    if update.part.part_type != "text" {
        return None;
    }
    let delta = update.delta.filter(|d| !d.is_empty())?;
    Some(EventPayload::Delta(DeltaEvent {
        session_id: update.part.session_id,
        message_id: update.part.message_id,
        delta,
    }))
}

fn decode_message_updated(props: &Map<String, Value>) -> Option<EventPayload> {
    let info = parse::<WireMessageUpdated>(props)?.info;
    let completed = info
        .time
        .and_then(|t| t.completed)
        .is_some_and(|c| !c.is_null());
    if info.role != "assistant" || !completed {
        return None;
    }
    Some(EventPayload::MessageComplete(MessageCompleteEvent {
        session_id: info.session_id,
        message_id: info.id,
        text: None,
    }))
}

fn decode_error(props: &Map<String, Value>) -> EventPayload {
    let session_id = props
        .get("sessionID")
        .or_else(|| props.get("sessionId"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let message = match props.get("error") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Object(err)) => err
            .get("data")
            .and_then(|d| d.get("message"))
            .or_else(|| err.get("message"))
            .or_else(|| err.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
    .or_else(|| {
        props
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
    })
    .unwrap_or_else(|| "unknown error".to_string());

    EventPayload::Error(ErrorEvent {
        session_id,
        message,
    })
}

fn decode_permission(props: &Map<String, Value>) -> Option<EventPayload> {
    let mut request = parse::<PermissionRequest>(props)?;
    if request.patterns.is_empty() {
        match props.get("pattern") {
            Some(Value::String(p)) => request.patterns.push(p.clone()),
            Some(Value::Array(list)) => request.patterns.extend(
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string),
            ),
            _ => {}
        }
    }
    Some(EventPayload::PermissionRequested(request))
}
