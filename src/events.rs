//! Lifecycle events.
//!
//! The remote service streams event records in reply to `GetEvents`; the
//! local engine publishes the same [`DomainEvent`] values on a broadcast
//! channel.
//!
//! # Remote stream rules
//!
//! 1. A record whose `time`, `status` and `type` are all empty is the end
//!    marker. Consumption stops there and nothing after it is read.
//! 2. `time` is RFC 3339 with nanoseconds; `type` and `status` come from
//!    closed sets. Any other value fails the stream.
//! 3. Everything else becomes a [`DomainEvent`].

use crate::error::{Error, Result};
use crate::rpc::protocol::methods;
use crate::rpc::{Call, ReplyStream, RpcChannel};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::str::FromStr;

// =============================================================================
// Closed Sets
// =============================================================================

/// What an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Container,
    Image,
    Pod,
    System,
    Volume,
}

impl EventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Image => "image",
            Self::Pod => "pod",
            Self::System => "system",
            Self::Volume => "volume",
        }
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "container" => Ok(Self::Container),
            "image" => Ok(Self::Image),
            "pod" => Ok(Self::Pod),
            "system" => Ok(Self::System),
            "volume" => Ok(Self::Volume),
            _ => Err(Error::InvalidEvent {
                field: "type",
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! event_statuses {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// What happened.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum EventStatus {
            $($variant),+
        }

        impl EventStatus {
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name),+
                }
            }
        }

        impl FromStr for EventStatus {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    _ => Err(Error::InvalidEvent {
                        field: "status",
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

event_statuses! {
    Attach => "attach",
    Checkpoint => "checkpoint",
    Cleanup => "cleanup",
    Commit => "commit",
    Create => "create",
    Exec => "exec",
    Exited => "exited",
    Export => "export",
    Import => "import",
    Init => "init",
    Kill => "kill",
    LoadFromArchive => "loadfromarchive",
    Mount => "mount",
    Pause => "pause",
    Prune => "prune",
    Pull => "pull",
    Push => "push",
    Refresh => "refresh",
    Remove => "remove",
    Renumber => "renumber",
    Restart => "restart",
    Restore => "restore",
    Save => "save",
    Start => "start",
    Stop => "stop",
    Sync => "sync",
    Tag => "tag",
    Unmount => "unmount",
    Unpause => "unpause",
    Untag => "untag",
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Records
// =============================================================================

/// Event record as sent by the service. All fields are strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub time: String,
    #[serde(default, rename = "type")]
    pub kind: String,
}

impl WireEvent {
    /// Returns true for the end-of-stream marker.
    #[must_use]
    pub fn is_end_marker(&self) -> bool {
        self.time.is_empty() && self.status.is_empty() && self.kind.is_empty()
    }
}

/// Validated lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub name: String,
    pub image: String,
    pub status: EventStatus,
    pub time: DateTime<Utc>,
}

impl DomainEvent {
    /// Builds an event stamped with the current time.
    #[must_use]
    pub fn now(
        kind: EventType,
        status: EventStatus,
        id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            image: String::new(),
            status,
            time: Utc::now(),
        }
    }

    /// Sets the image reference.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Serializes to a single JSON object.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Converts back to the wire shape.
    #[must_use]
    pub fn to_wire(&self) -> WireEvent {
        WireEvent {
            id: self.id.clone(),
            image: self.image.clone(),
            name: self.name.clone(),
            status: self.status.to_string(),
            time: self.time.to_rfc3339_opts(SecondsFormat::Nanos, true),
            kind: self.kind.to_string(),
        }
    }
}

impl TryFrom<WireEvent> for DomainEvent {
    type Error = Error;

    fn try_from(wire: WireEvent) -> Result<Self> {
        let time = DateTime::parse_from_rfc3339(&wire.time)
            .map_err(|_| Error::InvalidEvent {
                field: "time",
                value: wire.time.clone(),
            })?
            .with_timezone(&Utc);
        let kind = wire.kind.parse()?;
        let status = wire.status.parse()?;
        Ok(Self {
            id: wire.id,
            kind,
            name: wire.name,
            image: wire.image,
            status,
            time,
        })
    }
}

// =============================================================================
// Remote Stream
// =============================================================================

/// Parameters of a `GetEvents` call.
#[derive(Debug, Clone, Default)]
pub struct EventOptions {
    /// `key=value` filters, passed through verbatim.
    pub filters: Vec<String>,
    /// Lower time bound, passed through verbatim.
    pub since: String,
    /// Upper time bound, passed through verbatim.
    pub until: String,
    /// Keep the stream open for new events.
    pub stream: bool,
}

impl EventOptions {
    fn to_parameters(&self) -> Value {
        json!({
            "filter": self.filters,
            "since": self.since,
            "until": self.until,
        })
    }
}

/// Sequential consumer of a `GetEvents` reply stream.
///
/// The caller may stop at any time by dropping it; the channel stays with
/// its owner.
pub struct EventStream<'a> {
    replies: ReplyStream<'a>,
    done: bool,
}

impl<'a> EventStream<'a> {
    /// Issues `GetEvents` on the channel.
    ///
    /// # Errors
    ///
    /// Fails if the call cannot be sent.
    pub async fn open(channel: &'a mut RpcChannel, options: &EventOptions) -> Result<Self> {
        let call = if options.stream {
            Call::streaming(methods::GET_EVENTS, options.to_parameters())
        } else {
            Call::new(methods::GET_EVENTS, options.to_parameters())
        };
        Ok(Self::new(channel.call_replies(call).await?))
    }

    /// Wraps an already issued reply stream.
    #[must_use]
    pub fn new(replies: ReplyStream<'a>) -> Self {
        Self {
            replies,
            done: false,
        }
    }

    /// Next event, or `None` at the end marker or end of stream.
    ///
    /// # Errors
    ///
    /// Remote, transport and decoding failures are returned as-is and end
    /// the stream.
    pub async fn next(&mut self) -> Result<Option<DomainEvent>> {
        if self.done {
            return Ok(None);
        }
        let payload = match self.replies.next().await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                self.done = true;
                match self.replies.take_terminal() {
                    Some(payload) if is_record(&payload) => payload,
                    _ => return Ok(None),
                }
            }
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        match decode(payload) {
            Ok(Some(event)) => Ok(Some(event)),
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }

    /// Drains the stream into a vector.
    ///
    /// # Errors
    ///
    /// Same as [`EventStream::next`].
    pub async fn collect(mut self) -> Result<Vec<DomainEvent>> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await? {
            events.push(event);
        }
        Ok(events)
    }
}

fn is_record(payload: &Value) -> bool {
    payload.as_object().is_some_and(|m| !m.is_empty())
}

/// Decodes one payload; `None` for the end marker.
fn decode(payload: Value) -> Result<Option<DomainEvent>> {
    let record = match payload {
        Value::Object(mut map) if map.contains_key("events") => {
            map.remove("events").unwrap_or_default()
        }
        other => other,
    };
    let wire: WireEvent = serde_json::from_value(record)?;
    if wire.is_end_marker() {
        return Ok(None);
    }
    DomainEvent::try_from(wire).map(Some)
}
