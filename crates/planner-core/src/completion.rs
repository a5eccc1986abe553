use serde::{Deserialize, Serialize};

/// Two-state completion flag carried by goals and todos.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    #[default]
    Incomplete,
    Complete,
}

impl CompletionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::Complete => "complete",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "incomplete" => Some(Self::Incomplete),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }

    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Incomplete => Self::Complete,
            Self::Complete => Self::Incomplete,
        }
    }

    #[must_use]
    pub fn is_complete(self) -> bool {
        self == Self::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::CompletionStatus;

    #[test]
    fn default_is_incomplete() {
        assert_eq!(CompletionStatus::default(), CompletionStatus::Incomplete);
        assert!(!CompletionStatus::default().is_complete());
    }

    #[test]
    fn toggling_twice_restores_state() {
        for status in [CompletionStatus::Incomplete, CompletionStatus::Complete] {
            assert_ne!(status.toggled(), status);
            assert_eq!(status.toggled().toggled(), status);
        }
    }

    #[test]
    fn text_form_round_trips_and_rejects_unknown_values() {
        for status in [CompletionStatus::Incomplete, CompletionStatus::Complete] {
            assert_eq!(CompletionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CompletionStatus::parse("done"), None);
    }
}
