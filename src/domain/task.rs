//! Task candidates extracted from transcripts.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Task priority, bounded to the four levels the tracker understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    Urgent,
    High,
    Normal,
    Low,
}

impl Priority {
    /// Numeric value used on the wire (1 = urgent .. 4 = low)
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Urgent => 1,
            Self::High => 2,
            Self::Normal => 3,
            Self::Low => 4,
        }
    }

    /// Map a raw model-provided priority into the bounded range.
    /// Anything outside 1..=4 (including absent) falls back to the default.
    pub fn from_raw(raw: Option<i64>, default: Priority) -> Priority {
        match raw {
            Some(1) => Self::Urgent,
            Some(2) => Self::High,
            Some(3) => Self::Normal,
            Some(4) => Self::Low,
            _ => default,
        }
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Urgent),
            2 => Ok(Self::High),
            3 => Ok(Self::Normal),
            4 => Ok(Self::Low),
            other => Err(format!("priority out of range: {}", other)),
        }
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p.as_u8()
    }
}

/// Raw task shape returned by the extraction model.
///
/// Fields mirror the prompt contract exactly; everything beyond `title`
/// and `description` is optional and validated downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedTask {
    /// Short task title (the prompt calls this "name")
    #[serde(alias = "name")]
    pub title: String,

    /// Longer free-form description
    #[serde(default)]
    pub description: String,

    /// Due date as the model produced it (ISO date or a relative phrase)
    #[serde(default)]
    pub due_date: Option<String>,

    /// Priority 1-4 if the model assigned one
    #[serde(default)]
    pub priority: Option<i64>,

    /// Assignee name(s) as mentioned in the transcript
    #[serde(default)]
    pub assignee: Option<String>,
}

/// A validated task candidate, ready for remote creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCandidate {
    pub title: String,
    pub description: String,

    /// Normalized due date (never in the past)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,

    pub priority: Priority,

    /// Raw assignee text carried through for the report
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    /// Member ids resolved from the assignee text
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignee_ids: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_from_raw_clamps() {
        assert_eq!(Priority::from_raw(Some(1), Priority::Normal), Priority::Urgent);
        assert_eq!(Priority::from_raw(Some(4), Priority::Normal), Priority::Low);
        assert_eq!(Priority::from_raw(Some(0), Priority::Normal), Priority::Normal);
        assert_eq!(Priority::from_raw(Some(9), Priority::High), Priority::High);
        assert_eq!(Priority::from_raw(None, Priority::Low), Priority::Low);
    }

    #[test]
    fn test_priority_serde_roundtrip() {
        let json = serde_json::to_string(&Priority::High).unwrap();
        assert_eq!(json, "2");
        let back: Priority = serde_json::from_str("2").unwrap();
        assert_eq!(back, Priority::High);
        assert!(serde_json::from_str::<Priority>("5").is_err());
    }

    #[test]
    fn test_extracted_task_accepts_name_alias() {
        let json = r#"{"name": "Review report", "description": "Look it over",
                       "due_date": null, "priority": 2, "assignee": "Ivan"}"#;
        let task: ExtractedTask = serde_json::from_str(json).unwrap();
        assert_eq!(task.title, "Review report");
        assert_eq!(task.priority, Some(2));
    }
}
