use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::{DraftDetails, PlannerError, RecordDraft, RecordKind, Schedule};

/// Every client-facing attribute a record can carry, across all kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    Title,
    StartTime,
    EndTime,
    RelatedGoalId,
    Location,
    Content,
    PhotoUrl,
}

impl RecordField {
    pub const ALL: [Self; 7] = [
        Self::Title,
        Self::StartTime,
        Self::EndTime,
        Self::RelatedGoalId,
        Self::Location,
        Self::Content,
        Self::PhotoUrl,
    ];

    /// Key used in request payloads and response views.
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::StartTime => "startDatetime",
            Self::EndTime => "endDatetime",
            Self::RelatedGoalId => "goal",
            Self::Location => "location",
            Self::Content => "content",
            Self::PhotoUrl => "photoUrl",
        }
    }

    /// Secondary payload key, consulted only when the wire name is absent.
    #[must_use]
    pub fn alias(self) -> Option<&'static str> {
        match self {
            Self::StartTime => Some("startTime"),
            Self::EndTime => Some("endTime"),
            Self::RelatedGoalId => Some("relatedGoalId"),
            _ => None,
        }
    }

    #[must_use]
    pub fn column(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::StartTime => "start_time",
            Self::EndTime => "end_time",
            Self::RelatedGoalId => "related_goal_id",
            Self::Location => "location",
            Self::Content => "content",
            Self::PhotoUrl => "photo_url",
        }
    }

    #[must_use]
    pub fn is_timestamp(self) -> bool {
        matches!(self, Self::StartTime | Self::EndTime)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FieldSpec {
    pub field: RecordField,
    pub required: bool,
    /// Clients may supply the field when creating a record. Fields that are
    /// only ever assigned by a collaborator (the goal photo) are update-only.
    pub on_create: bool,
}

const fn required(field: RecordField) -> FieldSpec {
    FieldSpec { field, required: true, on_create: true }
}

const fn optional(field: RecordField) -> FieldSpec {
    FieldSpec { field, required: false, on_create: true }
}

const fn assigned(field: RecordField) -> FieldSpec {
    FieldSpec { field, required: false, on_create: false }
}

const GOAL_SCHEMA: [FieldSpec; 6] = [
    required(RecordField::Title),
    required(RecordField::StartTime),
    required(RecordField::EndTime),
    optional(RecordField::Location),
    optional(RecordField::Content),
    assigned(RecordField::PhotoUrl),
];

const EVENT_SCHEMA: [FieldSpec; 6] = [
    required(RecordField::Title),
    required(RecordField::StartTime),
    required(RecordField::EndTime),
    optional(RecordField::RelatedGoalId),
    optional(RecordField::Location),
    optional(RecordField::Content),
];

const TODO_SCHEMA: [FieldSpec; 4] = [
    required(RecordField::Title),
    optional(RecordField::RelatedGoalId),
    optional(RecordField::Location),
    optional(RecordField::Content),
];

impl RecordKind {
    /// Field set of this kind; the source of truth for both create and update.
    #[must_use]
    pub fn schema(self) -> &'static [FieldSpec] {
        match self {
            Self::Goal => &GOAL_SCHEMA,
            Self::Event => &EVENT_SCHEMA,
            Self::Todo => &TODO_SCHEMA,
        }
    }

    #[must_use]
    pub fn field_spec(self, field: RecordField) -> Option<FieldSpec> {
        self.schema().iter().copied().find(|spec| spec.field == field)
    }
}

/// Validate a raw create payload against the schema of `kind`.
///
/// Keys outside the schema are ignored.
///
/// # Errors
/// Returns [`PlannerError::Validation`] naming the first field that is missing,
/// has the wrong JSON type, is blank while required, or is not a parseable timestamp.
pub fn validate_draft(
    kind: RecordKind,
    payload: &Map<String, Value>,
) -> Result<RecordDraft, PlannerError> {
    let title = draft_text(kind, payload, RecordField::Title)?
        .ok_or_else(|| required_error(RecordField::Title))?;
    let location = draft_text(kind, payload, RecordField::Location)?;
    let content = draft_text(kind, payload, RecordField::Content)?;

    let details = match kind {
        RecordKind::Goal => {
            DraftDetails::Goal { schedule: draft_schedule(kind, payload)?, photo_url: None }
        }
        RecordKind::Event => DraftDetails::Event {
            schedule: draft_schedule(kind, payload)?,
            related_goal_id: draft_text(kind, payload, RecordField::RelatedGoalId)?,
        },
        RecordKind::Todo => DraftDetails::Todo {
            related_goal_id: draft_text(kind, payload, RecordField::RelatedGoalId)?,
        },
    };

    Ok(RecordDraft { title, location, content, details })
}

/// Parse an RFC 3339 timestamp, or an offset-less `YYYY-MM-DDTHH:MM[:SS]`
/// taken as UTC. Results are normalized to UTC.
///
/// # Errors
/// Returns [`PlannerError::Validation`] on `field` when no supported form matches.
pub fn parse_timestamp(field: &str, raw: &str) -> Result<OffsetDateTime, PlannerError> {
    let trimmed = raw.trim();
    if let Ok(value) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return value.checked_to_offset(UtcOffset::UTC).ok_or_else(|| {
            PlannerError::validation(field, format!("`{raw}` is outside the supported date range"))
        });
    }

    let with_seconds = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    let without_seconds = format_description!("[year]-[month]-[day]T[hour]:[minute]");
    for format in [with_seconds, without_seconds] {
        if let Ok(value) = PrimitiveDateTime::parse(trimmed, format) {
            return Ok(value.assume_utc());
        }
    }

    Err(PlannerError::validation(
        field,
        format!("`{raw}` is not a valid timestamp (expected RFC 3339 or YYYY-MM-DDTHH:MM)"),
    ))
}

pub(crate) fn parse_calendar_date(raw: &str) -> Option<Date> {
    Date::parse(raw, format_description!("[year]-[month]-[day]")).ok()
}

pub(crate) fn lookup(payload: &Map<String, Value>, field: RecordField) -> Option<&Value> {
    payload.get(field.wire_name()).or_else(|| field.alias().and_then(|alias| payload.get(alias)))
}

pub(crate) fn required_error(field: RecordField) -> PlannerError {
    PlannerError::validation(field.wire_name(), "is required")
}

/// Read a present, non-null text value. Blank text is rejected for required fields.
pub(crate) fn text_value(spec: FieldSpec, value: &Value) -> Result<String, PlannerError> {
    let Value::String(text) = value else {
        return Err(PlannerError::validation(spec.field.wire_name(), "must be a string"));
    };
    if spec.required && text.trim().is_empty() {
        return Err(PlannerError::validation(spec.field.wire_name(), "must not be empty"));
    }
    Ok(text.clone())
}

/// Read a present, non-null timestamp value.
pub(crate) fn timestamp_value(spec: FieldSpec, value: &Value) -> Result<OffsetDateTime, PlannerError> {
    let Value::String(raw) = value else {
        return Err(PlannerError::validation(
            spec.field.wire_name(),
            "must be a timestamp string",
        ));
    };
    parse_timestamp(spec.field.wire_name(), raw)
}

fn draft_value<'a>(
    kind: RecordKind,
    payload: &'a Map<String, Value>,
    field: RecordField,
) -> Result<Option<(FieldSpec, &'a Value)>, PlannerError> {
    let Some(spec) = kind.field_spec(field).filter(|spec| spec.on_create) else {
        return Ok(None);
    };

    match lookup(payload, field) {
        None | Some(Value::Null) if spec.required => Err(required_error(field)),
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some((spec, value))),
    }
}

fn draft_text(
    kind: RecordKind,
    payload: &Map<String, Value>,
    field: RecordField,
) -> Result<Option<String>, PlannerError> {
    draft_value(kind, payload, field)?.map(|(spec, value)| text_value(spec, value)).transpose()
}

fn draft_schedule(kind: RecordKind, payload: &Map<String, Value>) -> Result<Schedule, PlannerError> {
    let read = |field: RecordField| -> Result<OffsetDateTime, PlannerError> {
        let (spec, value) =
            draft_value(kind, payload, field)?.ok_or_else(|| required_error(field))?;
        timestamp_value(spec, value)
    };
    let start = read(RecordField::StartTime)?;
    let end = read(RecordField::EndTime)?;
    Ok(Schedule { start, end })
}
