// What the deferred jobs do when they fire.
use crate::directory::LessonDirectory;
use crate::ledger::JobKind;
use crate::model::{Lesson, Settlement};
use crate::notifier::Notifier;
use anyhow::Result;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The only thing a job carries. Everything else is looked up when it fires,
/// so a job armed days ago still sees the current lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub lesson_id: String,
}

impl JobPayload {
    pub fn new(lesson_id: &str) -> Self {
        Self {
            lesson_id: lesson_id.to_string(),
        }
    }
}

/// Runs a fired job. Returning an error asks the runner to retry.
pub trait JobExecutor: Send + Sync {
    fn execute<'a>(&'a self, kind: JobKind, payload: &'a JobPayload) -> BoxFuture<'a, Result<()>>;
}

pub struct JobContext {
    pub directory: Arc<dyn LessonDirectory>,
    pub notifier: Arc<dyn Notifier>,
}

pub fn reminder_text(lesson: &Lesson) -> String {
    format!(
        "Lesson: {}\nStart: {} UTC\nID: {}",
        lesson.summary,
        lesson.start.format("%Y-%m-%d %H:%M"),
        lesson.id
    )
}

impl JobContext {
    pub fn new(directory: Arc<dyn LessonDirectory>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            directory,
            notifier,
        }
    }

    /// Sends the reminder to every recipient linked to the lesson's student.
    /// Returns how many deliveries succeeded. Fails only when all of them failed.
    pub async fn run_notify(&self, payload: &JobPayload) -> Result<usize> {
        let Some(lesson) = self.directory.get_lesson(&payload.lesson_id)? else {
            log::warn!("Reminder for unknown lesson {}; dropping", payload.lesson_id);
            return Ok(0);
        };

        let recipients = self.directory.recipients_for(lesson.student_id)?;
        if recipients.is_empty() {
            log::info!("No recipients linked for '{}'; reminder skipped", lesson.summary);
            return Ok(0);
        }

        let text = reminder_text(&lesson);
        let mut sent = 0;
        let mut last_err = None;
        for recipient in &recipients {
            match self.notifier.deliver(recipient, &text).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    log::debug!("Failed to deliver to {}: {}", recipient, e);
                    last_err = Some(e);
                }
            }
        }

        if sent == 0
            && let Some(e) = last_err
        {
            return Err(e.context(format!(
                "No reminder delivered for lesson {}",
                lesson.id
            )));
        }
        log::info!(
            "Reminder for lesson {} sent to {}/{} recipients",
            lesson.id,
            sent,
            recipients.len()
        );
        Ok(sent)
    }

    /// Settles a finished lesson. Safe to run more than once for the same lesson.
    pub async fn run_deduct(&self, payload: &JobPayload) -> Result<Settlement> {
        let settlement = self.directory.settle_lesson(&payload.lesson_id)?;
        match &settlement {
            Settlement::AlreadyPaid => {
                log::debug!("Lesson {} already settled", payload.lesson_id);
            }
            Settlement::Deducted { student, remaining } => {
                log::info!(
                    "Deducted lesson {} from '{}', {} left",
                    payload.lesson_id,
                    student,
                    remaining
                );
            }
            Settlement::ZeroBalance { student } => {
                log::warn!(
                    "'{}' has no prepaid lessons left (lesson {})",
                    student,
                    payload.lesson_id
                );
                let text = format!(
                    "Student '{}' has no prepaid lessons left; lesson {} is unpaid.",
                    student, payload.lesson_id
                );
                // The lesson is already settled; a lost alert must not re-run the job.
                if let Err(e) = self.notifier.alert_operator(&text).await {
                    log::error!("Operator alert failed: {}", e);
                }
            }
        }
        Ok(settlement)
    }
}

impl JobExecutor for JobContext {
    fn execute<'a>(&'a self, kind: JobKind, payload: &'a JobPayload) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match kind {
                JobKind::Notify => self.run_notify(payload).await.map(|_| ()),
                JobKind::Deduct => self.run_deduct(payload).await.map(|_| ()),
            }
        })
    }
}
