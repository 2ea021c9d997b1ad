mod control;
mod manifest;
mod record;
mod subjects;

pub use control::{ControlCommand, ControlMessage, UNKNOWN_COMMAND};
pub use manifest::{Phase, PhaseSpec, StartMessage, NO_DESCRIPTION};
pub use record::{LogEvent, LogLevel, PhaseStatus, StateEvent};
pub use subjects::{subject, subject_matches, SessionId, SessionSubjects, Topic, SUBJECT_PREFIX};
