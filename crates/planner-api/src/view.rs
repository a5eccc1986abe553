//! Per-kind flat JSON shapes returned to clients.

use planner_core::{CompletionStatus, Record, RecordDetails, RecordId};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GoalView {
    #[serde(rename = "event_id")]
    pub event_id: RecordId,
    #[serde(rename = "user_id")]
    pub user_id: String,
    pub event_type: String,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start_datetime: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_datetime: OffsetDateTime,
    pub location: Option<String>,
    pub content: Option<String>,
    pub photo_url: Option<String>,
    pub completion_status: CompletionStatus,
    pub is_completed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    #[serde(rename = "event_id")]
    pub event_id: RecordId,
    #[serde(rename = "user_id")]
    pub user_id: String,
    pub event_type: String,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start_datetime: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end_datetime: OffsetDateTime,
    pub goal: Option<String>,
    pub location: Option<String>,
    pub content: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TodoView {
    #[serde(rename = "event_id")]
    pub event_id: RecordId,
    #[serde(rename = "user_id")]
    pub user_id: String,
    pub event_type: String,
    pub title: String,
    pub goal: Option<String>,
    pub location: Option<String>,
    pub content: Option<String>,
    pub completion_status: CompletionStatus,
    pub is_completed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RecordView {
    Goal(GoalView),
    Event(EventView),
    Todo(TodoView),
}

impl From<Record> for RecordView {
    fn from(record: Record) -> Self {
        let event_id = record.id;
        let user_id = record.owner_id.to_string();
        let event_type = record.kind().label().to_string();
        let created_at = record.created_at;

        match record.details {
            RecordDetails::Goal { schedule, photo_url, completion } => Self::Goal(GoalView {
                event_id,
                user_id,
                event_type,
                title: record.title,
                start_datetime: schedule.start,
                end_datetime: schedule.end,
                location: record.location,
                content: record.content,
                photo_url,
                completion_status: completion,
                is_completed: completion.is_complete(),
                created_at,
            }),
            RecordDetails::Event { schedule, related_goal_id } => Self::Event(EventView {
                event_id,
                user_id,
                event_type,
                title: record.title,
                start_datetime: schedule.start,
                end_datetime: schedule.end,
                goal: related_goal_id,
                location: record.location,
                content: record.content,
                created_at,
            }),
            RecordDetails::Todo { related_goal_id, completion } => Self::Todo(TodoView {
                event_id,
                user_id,
                event_type,
                title: record.title,
                goal: related_goal_id,
                location: record.location,
                content: record.content,
                completion_status: completion,
                is_completed: completion.is_complete(),
                created_at,
            }),
        }
    }
}
