// Maps an expanded occurrence onto its persisted lesson.
use crate::directory::LessonDirectory;
use crate::model::{Lesson, Occurrence};
use anyhow::{Context, Result};

/// Resolves the student named by the occurrence summary (creating it if new) and
/// upserts the lesson keyed by the occurrence id.
///
/// Returns the stored lesson and whether any of start, end, summary or student
/// changed. An unchanged occurrence performs no write.
pub fn reconcile(directory: &dyn LessonDirectory, occ: &Occurrence) -> Result<(Lesson, bool)> {
    let student = directory
        .get_or_create_student(&occ.summary)
        .with_context(|| format!("resolving student '{}'", occ.summary))?;

    let (lesson, changed) = directory
        .upsert_lesson(&occ.id, &occ.summary, occ.start, occ.end, student.id)
        .with_context(|| format!("upserting lesson {}", occ.id))?;

    if changed {
        log::debug!(
            "Lesson {} for '{}' now {} - {}",
            lesson.id,
            student.name,
            lesson.start,
            lesson.end
        );
    }
    Ok((lesson, changed))
}
