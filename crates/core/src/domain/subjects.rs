//! Session-scoped subject naming.
//!
//! Every subject of a session is derived from the template
//! `plan.session.<session id>.<topic>`, so a peer and a coordinator that
//! agree on the session id always agree on all five subjects.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Common prefix of every protocol subject.
pub const SUBJECT_PREFIX: &str = "plan.session";

/// Opaque identifier naming a plan-execution session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(CoreError::Validation(
                "session id must not be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Generate a fresh `session-<uuid>` identifier.
    pub fn generate() -> Self {
        Self(format!("session-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id contains characters the broker treats as subject syntax.
    ///
    /// Such ids still produce subjects, but they split into extra tokens or
    /// act as wildcards on the broker.
    pub fn has_delimiter_collision(&self) -> bool {
        self.0
            .chars()
            .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Topics of the session protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Start,
    Control,
    Log,
    State,
    /// Reserved for structured lifecycle events; nothing publishes here yet.
    Events,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::Start,
        Topic::Control,
        Topic::Log,
        Topic::State,
        Topic::Events,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Control => "control",
            Self::Log => "log",
            Self::State => "state",
            Self::Events => "events",
        }
    }
}

/// Derive the subject for `topic` within the session named `session_id`.
pub fn subject(session_id: &str, topic: Topic) -> String {
    format!("{}.{}.{}", SUBJECT_PREFIX, session_id, topic.as_str())
}

/// All five subjects of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSubjects {
    pub session_id: SessionId,
    pub start: String,
    pub control: String,
    pub log: String,
    pub state: String,
    pub events: String,
}

impl SessionSubjects {
    pub fn new(session_id: SessionId) -> Self {
        let id = session_id.as_str();
        Self {
            start: subject(id, Topic::Start),
            control: subject(id, Topic::Control),
            log: subject(id, Topic::Log),
            state: subject(id, Topic::State),
            events: subject(id, Topic::Events),
            session_id,
        }
    }

    pub fn get(&self, topic: Topic) -> &str {
        match topic {
            Topic::Start => &self.start,
            Topic::Control => &self.control,
            Topic::Log => &self.log,
            Topic::State => &self.state,
            Topic::Events => &self.events,
        }
    }

    /// `(topic, subject)` pairs in protocol order.
    pub fn iter(&self) -> impl Iterator<Item = (Topic, &str)> {
        Topic::ALL.into_iter().map(move |topic| (topic, self.get(topic)))
    }
}

/// Match `subject` against a broker subscription pattern.
///
/// Tokens are separated by `.`; `*` matches exactly one token and a trailing
/// `>` matches one or more remaining tokens.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return pattern_tokens.next().is_none(),
            (Some("*"), Some(_)) => {}
            (Some(p), Some(s)) if p == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
