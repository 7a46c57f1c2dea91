// File: ./src/model/mod.rs
pub mod adapter;
pub mod event;
pub mod lesson;
pub mod recurrence;

pub use event::{EventTime, Occurrence, RawEvent, RecurrenceRule};
pub use lesson::{Lesson, Link, Settlement, Student};
pub use recurrence::{Recurrence, RecurrenceEngine};
