// Turns expanded occurrences into armed jobs, keeping the ledger in step.
use crate::directory::LessonDirectory;
use crate::jobs::JobPayload;
use crate::ledger::{JobKind, JobLedger, LedgerEntry};
use crate::model::{Lesson, Occurrence, RawEvent, RecurrenceEngine};
use crate::reconcile::reconcile;
use crate::runner::JobRunner;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use strum::IntoEnumIterator;

/// What happened to one job kind of one occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    Scheduled,
    /// The fire time drifted; the old job was revoked and a new one armed.
    Rescheduled,
    Unchanged,
    /// The fire time is not in the future; nothing was armed.
    PastDue,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub occurrences: usize,
    pub scheduled: usize,
    pub rescheduled: usize,
    pub unchanged: usize,
    pub past_due: usize,
    pub failed: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: ArmOutcome) {
        match outcome {
            ArmOutcome::Scheduled => self.scheduled += 1,
            ArmOutcome::Rescheduled => self.rescheduled += 1,
            ArmOutcome::Unchanged => self.unchanged += 1,
            ArmOutcome::PastDue => self.past_due += 1,
        }
    }
}

pub struct Scheduler {
    directory: Arc<dyn LessonDirectory>,
    ledger: Arc<dyn JobLedger>,
    runner: Arc<dyn JobRunner>,
    notify_lead: Duration,
}

impl Scheduler {
    pub fn new(
        directory: Arc<dyn LessonDirectory>,
        ledger: Arc<dyn JobLedger>,
        runner: Arc<dyn JobRunner>,
        notify_lead: Duration,
    ) -> Self {
        Self {
            directory,
            ledger,
            runner,
            notify_lead,
        }
    }

    pub fn desired_fire_time(&self, kind: JobKind, lesson: &Lesson) -> DateTime<Utc> {
        match kind {
            JobKind::Notify => lesson.start - self.notify_lead,
            JobKind::Deduct => lesson.end,
        }
    }

    /// Brings the job of one kind for `lesson` in line with its current timing.
    pub fn arm(&self, kind: JobKind, lesson: &Lesson, now: DateTime<Utc>) -> Result<ArmOutcome> {
        let desired = self.desired_fire_time(kind, lesson);
        if desired <= now {
            return Ok(ArmOutcome::PastDue);
        }

        let existing = self.ledger.get(&lesson.id, kind)?;
        let outcome = match &existing {
            Some(entry) if entry.armed_for == desired => return Ok(ArmOutcome::Unchanged),
            Some(entry) => {
                // A job that already fired or was lost cannot be revoked; the new
                // one is armed regardless.
                if let Err(e) = self.runner.revoke(&entry.handle) {
                    log::warn!(
                        "Could not revoke {} job {} for {}: {}",
                        kind,
                        entry.handle,
                        lesson.id,
                        e
                    );
                }
                ArmOutcome::Rescheduled
            }
            None => ArmOutcome::Scheduled,
        };

        let handle = self
            .runner
            .schedule(kind, JobPayload::new(&lesson.id), desired)?;
        log::info!(
            "{} {} for '{}' ({}) at {} [{}]",
            if outcome == ArmOutcome::Rescheduled {
                "Rescheduled"
            } else {
                "Scheduled"
            },
            kind,
            lesson.summary,
            lesson.id,
            desired,
            handle
        );
        self.ledger.set(
            &lesson.id,
            kind,
            LedgerEntry {
                armed_for: desired,
                handle,
            },
        )?;
        Ok(outcome)
    }

    /// Reconciles one occurrence, then arms each job kind independently.
    /// Every kind is attempted; the first failure is returned afterwards.
    pub fn schedule_occurrence(
        &self,
        occ: &Occurrence,
        now: DateTime<Utc>,
    ) -> Result<Vec<(JobKind, ArmOutcome)>> {
        let (lesson, _) = reconcile(self.directory.as_ref(), occ)?;

        let mut outcomes = Vec::new();
        let mut first_err = None;
        for kind in JobKind::iter() {
            match self.arm(kind, &lesson, now) {
                Ok(outcome) => outcomes.push((kind, outcome)),
                Err(e) => {
                    log::error!("Failed to arm {} job for {}: {:#}", kind, lesson.id, e);
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    /// One pass over every event in the window. Failures are counted per
    /// occurrence and never stop the rest of the cycle.
    pub fn run_cycle(
        &self,
        events: &[RawEvent],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CycleReport {
        let mut report = CycleReport::default();
        for event in events {
            for occ in RecurrenceEngine::expand(event, window_start, window_end) {
                report.occurrences += 1;
                match self.schedule_occurrence(&occ, now) {
                    Ok(outcomes) => {
                        for (_, outcome) in outcomes {
                            report.record(outcome);
                        }
                    }
                    Err(e) => {
                        report.failed += 1;
                        log::error!("Occurrence {} skipped this cycle: {:#}", occ.id, e);
                    }
                }
            }
        }
        report
    }
}
