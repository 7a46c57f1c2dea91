// Lesson directory: students, lessons and the recipients linked to each student.
//
// ⚠️ VERSION BUMP REQUIRED:
// Changes to Student, Lesson or Link serialization require incrementing
// DIRECTORY_VERSION below.
use crate::context::AppContext;
use crate::model::{Lesson, Link, Settlement, Student};
use crate::storage::LocalStorage;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

const DIRECTORY_VERSION: u32 = 1;

/// Keyed store of students and lessons, shared by the poll loop and the job runner.
pub trait LessonDirectory: Send + Sync {
    fn get_or_create_student(&self, name: &str) -> Result<Student>;

    /// Inserts or updates the lesson keyed by `id`.
    /// Returns the stored record and whether anything changed.
    fn upsert_lesson(
        &self,
        id: &str,
        summary: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        student_id: u64,
    ) -> Result<(Lesson, bool)>;

    fn get_lesson(&self, id: &str) -> Result<Option<Lesson>>;
    fn get_student(&self, id: u64) -> Result<Option<Student>>;
    fn recipients_for(&self, student_id: u64) -> Result<Vec<String>>;

    /// Marks the lesson paid and consumes one prepaid lesson, as a single step.
    /// Settling an already paid lesson changes nothing.
    fn settle_lesson(&self, lesson_id: &str) -> Result<Settlement>;

    fn list_students(&self) -> Result<Vec<Student>>;
    fn set_paid_lessons(&self, name: &str, count: u32) -> Result<Student>;
    fn link_recipient(&self, name: &str, recipient: &str) -> Result<Link>;
    fn set_lesson_paid(&self, lesson_id: &str, paid: bool) -> Result<Lesson>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DirectoryData {
    #[serde(default)]
    next_student_id: u64,
    #[serde(default)]
    students: Vec<Student>,
    #[serde(default)]
    lessons: BTreeMap<String, Lesson>,
    #[serde(default)]
    links: Vec<Link>,
}

impl DirectoryData {
    fn student_by_name(&self, name: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.name == name)
    }

    fn student_by_name_mut(&mut self, name: &str) -> Result<&mut Student> {
        self.students
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| anyhow::anyhow!("No student named '{}'", name))
    }

    fn get_or_create_student(&mut self, name: &str) -> (Student, bool) {
        if let Some(s) = self.student_by_name(name) {
            return (s.clone(), false);
        }
        self.next_student_id += 1;
        let student = Student {
            id: self.next_student_id,
            name: name.to_string(),
            paid_lessons: 0,
        };
        self.students.push(student.clone());
        (student, true)
    }

    fn upsert_lesson(
        &mut self,
        id: &str,
        summary: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        student_id: u64,
    ) -> (Lesson, bool) {
        if let Some(lesson) = self.lessons.get_mut(id) {
            let changed = lesson.start != start
                || lesson.end != end
                || lesson.summary != summary
                || lesson.student_id != student_id;
            if changed {
                lesson.start = start;
                lesson.end = end;
                lesson.summary = summary.to_string();
                lesson.student_id = student_id;
            }
            return (lesson.clone(), changed);
        }

        let lesson = Lesson {
            id: id.to_string(),
            summary: summary.to_string(),
            start,
            end,
            student_id,
            is_paid: false,
        };
        self.lessons.insert(id.to_string(), lesson.clone());
        (lesson, true)
    }

    fn settle_lesson(&mut self, lesson_id: &str) -> Result<(Settlement, bool)> {
        let lesson = self
            .lessons
            .get_mut(lesson_id)
            .ok_or_else(|| anyhow::anyhow!("Lesson {} not found", lesson_id))?;
        if lesson.is_paid {
            return Ok((Settlement::AlreadyPaid, false));
        }
        lesson.is_paid = true;
        let student_id = lesson.student_id;

        let student = self
            .students
            .iter_mut()
            .find(|s| s.id == student_id)
            .ok_or_else(|| anyhow::anyhow!("Student {} not found", student_id))?;

        let settlement = if student.paid_lessons > 0 {
            student.paid_lessons -= 1;
            Settlement::Deducted {
                student: student.name.clone(),
                remaining: student.paid_lessons,
            }
        } else {
            Settlement::ZeroBalance {
                student: student.name.clone(),
            }
        };
        Ok((settlement, true))
    }
}

enum Backing {
    File(PathBuf),
    Memory(Mutex<DirectoryData>),
}

/// The directory used by the service: a JSON document in the data dir, or an
/// in-memory copy for tests and previews.
pub struct LocalDirectory {
    backing: Backing,
}

impl LocalDirectory {
    pub fn open(ctx: &dyn AppContext) -> Result<Self> {
        let path = ctx.get_directory_path()?;
        // Fail early on an unreadable file instead of on the first lesson.
        let _: DirectoryData = LocalStorage::load(&path, DIRECTORY_VERSION)?;
        Ok(Self {
            backing: Backing::File(path),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            backing: Backing::Memory(Mutex::new(DirectoryData::default())),
        }
    }

    fn view<R>(&self, f: impl FnOnce(&DirectoryData) -> R) -> Result<R> {
        match &self.backing {
            Backing::File(path) => {
                let data: DirectoryData = LocalStorage::load(path, DIRECTORY_VERSION)?;
                Ok(f(&data))
            }
            Backing::Memory(data) => {
                let guard = data
                    .lock()
                    .map_err(|_| anyhow::anyhow!("directory lock poisoned"))?;
                Ok(f(&*guard))
            }
        }
    }

    fn modify<R>(&self, f: impl FnOnce(&mut DirectoryData) -> Result<(R, bool)>) -> Result<R> {
        match &self.backing {
            Backing::File(path) => LocalStorage::modify_if(path, DIRECTORY_VERSION, f),
            Backing::Memory(data) => {
                let mut guard = data
                    .lock()
                    .map_err(|_| anyhow::anyhow!("directory lock poisoned"))?;
                Ok(f(&mut *guard)?.0)
            }
        }
    }
}

impl LessonDirectory for LocalDirectory {
    fn get_or_create_student(&self, name: &str) -> Result<Student> {
        self.modify(|d| Ok(d.get_or_create_student(name)))
    }

    fn upsert_lesson(
        &self,
        id: &str,
        summary: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        student_id: u64,
    ) -> Result<(Lesson, bool)> {
        self.modify(|d| {
            let (lesson, changed) = d.upsert_lesson(id, summary, start, end, student_id);
            Ok(((lesson, changed), changed))
        })
    }

    fn get_lesson(&self, id: &str) -> Result<Option<Lesson>> {
        self.view(|d| d.lessons.get(id).cloned())
    }

    fn get_student(&self, id: u64) -> Result<Option<Student>> {
        self.view(|d| d.students.iter().find(|s| s.id == id).cloned())
    }

    fn recipients_for(&self, student_id: u64) -> Result<Vec<String>> {
        self.view(|d| {
            d.links
                .iter()
                .filter(|l| l.student_id == student_id)
                .map(|l| l.recipient.clone())
                .collect()
        })
    }

    fn settle_lesson(&self, lesson_id: &str) -> Result<Settlement> {
        self.modify(|d| d.settle_lesson(lesson_id))
    }

    fn list_students(&self) -> Result<Vec<Student>> {
        self.view(|d| {
            let mut students = d.students.clone();
            students.sort_by(|a, b| a.name.cmp(&b.name));
            students
        })
    }

    fn set_paid_lessons(&self, name: &str, count: u32) -> Result<Student> {
        self.modify(|d| {
            let student = d.student_by_name_mut(name)?;
            student.paid_lessons = count;
            Ok((student.clone(), true))
        })
    }

    fn link_recipient(&self, name: &str, recipient: &str) -> Result<Link> {
        self.modify(|d| {
            let student_id = d.student_by_name_mut(name)?.id;
            let link = Link {
                recipient: recipient.to_string(),
                student_id,
            };
            if d.links.contains(&link) {
                return Ok((link, false));
            }
            d.links.push(link.clone());
            Ok((link, true))
        })
    }

    fn set_lesson_paid(&self, lesson_id: &str, paid: bool) -> Result<Lesson> {
        self.modify(|d| {
            let lesson = d
                .lessons
                .get_mut(lesson_id)
                .ok_or_else(|| anyhow::anyhow!("Lesson {} not found", lesson_id))?;
            let changed = lesson.is_paid != paid;
            lesson.is_paid = paid;
            Ok((lesson.clone(), changed))
        })
    }
}
