use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::schema::{lookup, text_value, timestamp_value};
use crate::{PlannerError, RecordField, RecordKind};

/// A sparse, typed mutation of one record.
///
/// `None` leaves a field unchanged. For optional text fields `Some(None)`
/// clears the stored value.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RecordPatch {
    kind: RecordKind,
    pub title: Option<String>,
    pub start_time: Option<OffsetDateTime>,
    pub end_time: Option<OffsetDateTime>,
    pub related_goal_id: Option<Option<String>>,
    pub location: Option<Option<String>>,
    pub content: Option<Option<String>>,
    pub photo_url: Option<Option<String>>,
}

/// The new value of one touched field, borrowed from a patch.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PatchValue<'a> {
    Text(Option<&'a str>),
    Timestamp(OffsetDateTime),
}

impl RecordPatch {
    #[must_use]
    pub fn empty(kind: RecordKind) -> Self {
        Self {
            kind,
            title: None,
            start_time: None,
            end_time: None,
            related_goal_id: None,
            location: None,
            content: None,
            photo_url: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    #[must_use]
    pub fn value(&self, field: RecordField) -> Option<PatchValue<'_>> {
        fn text(slot: &Option<Option<String>>) -> Option<PatchValue<'_>> {
            slot.as_ref().map(|value| PatchValue::Text(value.as_deref()))
        }
        match field {
            RecordField::Title => {
                self.title.as_deref().map(|title| PatchValue::Text(Some(title)))
            }
            RecordField::StartTime => self.start_time.map(PatchValue::Timestamp),
            RecordField::EndTime => self.end_time.map(PatchValue::Timestamp),
            RecordField::RelatedGoalId => text(&self.related_goal_id),
            RecordField::Location => text(&self.location),
            RecordField::Content => text(&self.content),
            RecordField::PhotoUrl => text(&self.photo_url),
        }
    }

    /// Fields this patch writes, in column order.
    #[must_use]
    pub fn touched(&self) -> Vec<RecordField> {
        RecordField::ALL.into_iter().filter(|field| self.value(*field).is_some()).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.touched().is_empty()
    }

    /// Check the patch before it reaches storage.
    ///
    /// # Errors
    /// Returns [`PlannerError::Validation`] when nothing is touched, when a touched
    /// field is not part of the kind's schema, or when a required field would be
    /// cleared or blanked.
    pub fn validate(&self) -> Result<(), PlannerError> {
        let touched = self.touched();
        if touched.is_empty() {
            return Err(PlannerError::validation("patch", "no updatable fields were supplied"));
        }

        for field in touched {
            let Some(spec) = self.kind.field_spec(field) else {
                return Err(PlannerError::validation(
                    field.wire_name(),
                    format!("is not a field of {} records", self.kind.as_str()),
                ));
            };
            if let Some(PatchValue::Text(text)) = self.value(field) {
                if spec.required && text.map_or(true, |text| text.trim().is_empty()) {
                    return Err(PlannerError::validation(field.wire_name(), "must not be empty"));
                }
            }
        }
        Ok(())
    }
}

/// Translate a sparse client payload into a patch for `kind`.
///
/// Every schema field whose key is present in the payload is included, even
/// when the value is an empty string. Keys outside the schema are dropped.
///
/// # Errors
/// Returns [`PlannerError::Validation`] when a present value has the wrong type,
/// is `null` for a required field, or is not a parseable timestamp.
pub fn build_patch(
    kind: RecordKind,
    payload: &Map<String, Value>,
) -> Result<RecordPatch, PlannerError> {
    let mut patch = RecordPatch::empty(kind);

    for spec in kind.schema() {
        let Some(value) = lookup(payload, spec.field) else {
            continue;
        };
        if value.is_null() {
            if spec.required {
                return Err(PlannerError::validation(spec.field.wire_name(), "cannot be cleared"));
            }
            set_text(&mut patch, spec.field, None);
            continue;
        }

        match spec.field {
            RecordField::StartTime => patch.start_time = Some(timestamp_value(*spec, value)?),
            RecordField::EndTime => patch.end_time = Some(timestamp_value(*spec, value)?),
            field => set_text(&mut patch, field, Some(text_value(*spec, value)?)),
        }
    }

    Ok(patch)
}

fn set_text(patch: &mut RecordPatch, field: RecordField, value: Option<String>) {
    match field {
        RecordField::Title => patch.title = value,
        RecordField::RelatedGoalId => patch.related_goal_id = Some(value),
        RecordField::Location => patch.location = Some(value),
        RecordField::Content => patch.content = Some(value),
        RecordField::PhotoUrl => patch.photo_url = Some(value),
        RecordField::StartTime | RecordField::EndTime => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("fixture payload should be an object: {other}"),
        }
    }

    fn built(kind: RecordKind, payload: Value) -> RecordPatch {
        match build_patch(kind, &object(payload)) {
            Ok(patch) => patch,
            Err(err) => panic!("patch should build: {err}"),
        }
    }

    #[test]
    fn photo_only_update_touches_only_photo_url() {
        let patch = built(RecordKind::Goal, json!({ "photoUrl": "https://blobs/x.jpg" }));
        assert_eq!(patch.touched(), vec![RecordField::PhotoUrl]);
        assert_eq!(patch.photo_url, Some(Some("https://blobs/x.jpg".to_string())));
        assert!(patch.title.is_none());
        assert!(patch.start_time.is_none());
        assert!(patch.end_time.is_none());
        assert!(patch.content.is_none());
        assert!(patch.validate().is_ok());
    }

    #[test]
    fn present_empty_string_counts_as_present() {
        let patch = built(RecordKind::Todo, json!({ "content": "" }));
        assert_eq!(patch.touched(), vec![RecordField::Content]);
        assert_eq!(patch.value(RecordField::Content), Some(PatchValue::Text(Some(""))));
    }

    #[test]
    fn null_clears_optional_field_but_not_required_field() {
        let patch = built(RecordKind::Event, json!({ "location": null }));
        assert_eq!(patch.location, Some(None));
        assert_eq!(patch.value(RecordField::Location), Some(PatchValue::Text(None)));

        let err = match build_patch(RecordKind::Event, &object(json!({ "title": null }))) {
            Ok(patch) => panic!("expected validation error, got {patch:?}"),
            Err(err) => err,
        };
        assert_eq!(err.field(), Some("title"));
    }

    #[test]
    fn fields_outside_the_kind_schema_are_dropped() {
        let patch = built(
            RecordKind::Todo,
            json!({ "startDatetime": "2024-05-01T00:00", "photoUrl": "x", "owner_id": "u2" }),
        );
        assert!(patch.is_empty());
        assert!(patch.validate().is_err());
    }

    #[test]
    fn empty_patch_is_rejected_by_validate() {
        let patch = built(RecordKind::Goal, json!({}));
        let err = match patch.validate() {
            Ok(()) => panic!("empty patch should be rejected"),
            Err(err) => err,
        };
        assert!(matches!(err, PlannerError::Validation { .. }));
    }

    #[test]
    fn hand_built_patch_outside_schema_fails_validation() {
        let mut patch = RecordPatch::empty(RecordKind::Event);
        patch.photo_url = Some(Some("https://blobs/x.jpg".to_string()));
        let err = match patch.validate() {
            Ok(()) => panic!("photoUrl is not an event field"),
            Err(err) => err,
        };
        assert_eq!(err.field(), Some("photoUrl"));

        let mut blank = RecordPatch::empty(RecordKind::Goal);
        blank.title = Some("  ".to_string());
        assert!(blank.validate().is_err());
    }

    #[test]
    fn timestamps_in_patch_are_parsed_and_typed() {
        let patch = built(RecordKind::Goal, json!({ "endDatetime": "2024-05-02T10:30" }));
        assert!(matches!(patch.value(RecordField::EndTime), Some(PatchValue::Timestamp(_))));

        let err = match build_patch(RecordKind::Goal, &object(json!({ "endDatetime": "soon" }))) {
            Ok(patch) => panic!("expected validation error, got {patch:?}"),
            Err(err) => err,
        };
        assert_eq!(err.field(), Some("endDatetime"));
    }

    fn sample_value(field: RecordField) -> Value {
        if field.is_timestamp() {
            json!("2024-05-01T08:00")
        } else {
            json!("value")
        }
    }

    proptest! {
        #[test]
        fn property_touched_set_is_supplied_fields_within_schema(
            mask in 0_u8..128,
            kind_index in 0_usize..3,
        ) {
            let kind = RecordKind::ALL[kind_index];
            let supplied: Vec<RecordField> = RecordField::ALL
                .into_iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, field)| field)
                .collect();

            let mut payload = Map::new();
            for field in &supplied {
                payload.insert(field.wire_name().to_string(), sample_value(*field));
            }

            let patch = build_patch(kind, &payload)
                .map_err(|err| TestCaseError::fail(err.to_string()))?;
            let expected: Vec<RecordField> = supplied
                .into_iter()
                .filter(|field| kind.field_spec(*field).is_some())
                .collect();

            prop_assert_eq!(patch.touched(), expected.clone());
            prop_assert_eq!(patch.validate().is_ok(), !expected.is_empty());
        }
    }
}
