use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use ulid::Ulid;

mod completion;
mod patch;
mod schema;

pub use completion::CompletionStatus;
pub use patch::{build_patch, PatchValue, RecordPatch};
pub use schema::{parse_timestamp, validate_draft, FieldSpec, RecordField};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum PlannerError {
    #[error("validation error on `{field}`: {message}")]
    Validation { field: String, message: String },
    #[error("record not found")]
    NotFound,
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("collaborator error: {0}")]
    Collaborator(String),
}

impl PlannerError {
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    /// Name of the offending payload field, for validation failures.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RecordId(pub Ulid);

impl RecordId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = PlannerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        // A malformed id can never name a stored record.
        Ulid::from_string(value).map(Self).map_err(|_| PlannerError::NotFound)
    }
}

/// Opaque identity of the authenticated caller. Never derived from a payload.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OwnerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RecordKind {
    Goal,
    Event,
    Todo,
}

impl RecordKind {
    pub const ALL: [Self; 3] = [Self::Goal, Self::Event, Self::Todo];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Goal => "goal",
            Self::Event => "event",
            Self::Todo => "todo",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Goal => "Goal",
            Self::Event => "Event",
            Self::Todo => "Todo",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "goal" => Some(Self::Goal),
            "event" => Some(Self::Event),
            "todo" => Some(Self::Todo),
            _ => None,
        }
    }

    #[must_use]
    pub fn has_schedule(self) -> bool {
        matches!(self, Self::Goal | Self::Event)
    }

    #[must_use]
    pub fn tracks_completion(self) -> bool {
        matches!(self, Self::Goal | Self::Todo)
    }
}

impl Display for RecordKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct Schedule {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

impl Schedule {
    /// Inclusive on both ends. A day target matches when any instant of that
    /// UTC day falls inside the schedule.
    #[must_use]
    pub fn matches(&self, target: DateTarget) -> bool {
        match target {
            DateTarget::Instant(instant) => self.start <= instant && instant <= self.end,
            DateTarget::Day(day) => {
                let day_start = day.midnight().assume_utc();
                // The last representable day has no successor; treat it as open-ended.
                let starts_before_next_day = day
                    .next_day()
                    .map_or(true, |next| self.start < next.midnight().assume_utc());
                starts_before_next_day && self.end >= day_start
            }
        }
    }
}

/// The date argument of a date-range query.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DateTarget {
    Day(Date),
    Instant(OffsetDateTime),
}

impl DateTarget {
    /// Parse `YYYY-MM-DD` as a whole UTC day, anything else as a timestamp.
    ///
    /// # Errors
    /// Returns [`PlannerError::Validation`] on the `date` field when the value is
    /// neither a calendar date nor a supported timestamp.
    pub fn parse(value: &str) -> Result<Self, PlannerError> {
        let trimmed = value.trim();
        if let Some(day) = schema::parse_calendar_date(trimmed) {
            return Ok(Self::Day(day));
        }
        parse_timestamp("date", trimmed).map(Self::Instant)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordDetails {
    Goal { schedule: Schedule, photo_url: Option<String>, completion: CompletionStatus },
    Event { schedule: Schedule, related_goal_id: Option<String> },
    Todo { related_goal_id: Option<String>, completion: CompletionStatus },
}

impl RecordDetails {
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Goal { .. } => RecordKind::Goal,
            Self::Event { .. } => RecordKind::Event,
            Self::Todo { .. } => RecordKind::Todo,
        }
    }
}

/// Kind-specific part of a validated create payload. Store defaults are not
/// part of a draft.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DraftDetails {
    Goal { schedule: Schedule, photo_url: Option<String> },
    Event { schedule: Schedule, related_goal_id: Option<String> },
    Todo { related_goal_id: Option<String> },
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RecordDraft {
    pub title: String,
    pub location: Option<String>,
    pub content: Option<String>,
    pub details: DraftDetails,
}

impl RecordDraft {
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self.details {
            DraftDetails::Goal { .. } => RecordKind::Goal,
            DraftDetails::Event { .. } => RecordKind::Event,
            DraftDetails::Todo { .. } => RecordKind::Todo,
        }
    }

    /// Attach the URL returned by the blob collaborator.
    ///
    /// # Errors
    /// Returns [`PlannerError::Validation`] when the draft is not a goal.
    pub fn attach_photo(&mut self, url: String) -> Result<(), PlannerError> {
        let kind = self.kind();
        match &mut self.details {
            DraftDetails::Goal { photo_url, .. } => {
                *photo_url = Some(url);
                Ok(())
            }
            _ => Err(PlannerError::validation(
                RecordField::PhotoUrl.wire_name(),
                format!("photos are not supported for {} records", kind.as_str()),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub owner_id: OwnerId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub title: String,
    pub location: Option<String>,
    pub content: Option<String>,
    pub details: RecordDetails,
}

impl Record {
    /// Materialize a draft into a new record with store-assigned defaults.
    #[must_use]
    pub fn from_draft(owner_id: OwnerId, draft: RecordDraft, created_at: OffsetDateTime) -> Self {
        let details = match draft.details {
            DraftDetails::Goal { schedule, photo_url } => {
                RecordDetails::Goal { schedule, photo_url, completion: CompletionStatus::Incomplete }
            }
            DraftDetails::Event { schedule, related_goal_id } => {
                RecordDetails::Event { schedule, related_goal_id }
            }
            DraftDetails::Todo { related_goal_id } => {
                RecordDetails::Todo { related_goal_id, completion: CompletionStatus::Incomplete }
            }
        };

        Self {
            id: RecordId::new(),
            owner_id,
            created_at,
            title: draft.title,
            location: draft.location,
            content: draft.content,
            details,
        }
    }

    #[must_use]
    pub fn kind(&self) -> RecordKind {
        self.details.kind()
    }

    #[must_use]
    pub fn schedule(&self) -> Option<&Schedule> {
        match &self.details {
            RecordDetails::Goal { schedule, .. } | RecordDetails::Event { schedule, .. } => {
                Some(schedule)
            }
            RecordDetails::Todo { .. } => None,
        }
    }

    #[must_use]
    pub fn completion(&self) -> Option<CompletionStatus> {
        match &self.details {
            RecordDetails::Goal { completion, .. } | RecordDetails::Todo { completion, .. } => {
                Some(*completion)
            }
            RecordDetails::Event { .. } => None,
        }
    }

    #[must_use]
    pub fn photo_url(&self) -> Option<&str> {
        match &self.details {
            RecordDetails::Goal { photo_url, .. } => photo_url.as_deref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn related_goal_id(&self) -> Option<&str> {
        match &self.details {
            RecordDetails::Event { related_goal_id, .. }
            | RecordDetails::Todo { related_goal_id, .. } => related_goal_id.as_deref(),
            RecordDetails::Goal { .. } => None,
        }
    }

    /// Whether this record belongs in a date-range result for `target`.
    /// Records without a schedule never match.
    #[must_use]
    pub fn falls_on(&self, target: DateTarget) -> bool {
        self.schedule().is_some_and(|schedule| schedule.matches(target))
    }
}
