// File: ./src/model/lesson.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: u64,
    /// Display name; the calendar SUMMARY. Unique.
    pub name: String,
    /// Prepaid lessons left.
    #[serde(default)]
    pub paid_lessons: u32,
}

/// A persisted occurrence. `id` is the occurrence id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub summary: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub student_id: u64,
    #[serde(default)]
    pub is_paid: bool,
}

/// Routes a student's notifications to a recipient (chat id, address, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub recipient: String,
    pub student_id: u64,
}

/// Outcome of settling a finished lesson against the student's balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The lesson was already settled; nothing changed.
    AlreadyPaid,
    /// One prepaid lesson was consumed.
    Deducted { student: String, remaining: u32 },
    /// Marked paid, but the student had no prepaid lessons left.
    ZeroBalance { student: String },
}
