// Records which deferred job is currently armed for each (occurrence, job kind).
//
// The ledger is the only memory the orchestrator has of previous cycles: it is
// how an unchanged occurrence is recognised and how a stale job is found and
// revoked. Only the orchestrator writes it.
//
// ⚠️ VERSION BUMP REQUIRED:
// Changes to LedgerEntry or the key format require incrementing LEDGER_VERSION.
use crate::context::AppContext;
use crate::storage::LocalStorage;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use strum::EnumIter;

const LEDGER_VERSION: u32 = 1;

/// The two side effects every lesson occurrence gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Reminder sent `notify_lead` before the lesson starts.
    Notify,
    /// Balance deduction once the lesson has ended.
    Deduct,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Notify => "notify",
            JobKind::Deduct => "deduct",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque identifier issued by a `JobRunner`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub String);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Fire time the job was armed for.
    pub armed_for: DateTime<Utc>,
    pub handle: JobHandle,
}

pub trait JobLedger: Send + Sync {
    fn get(&self, occurrence_id: &str, kind: JobKind) -> Result<Option<LedgerEntry>>;
    fn set(&self, occurrence_id: &str, kind: JobKind, entry: LedgerEntry) -> Result<()>;

    /// Forgets entries armed for earlier than `now - grace`. Their jobs have
    /// fired long ago, so nothing can drift any more. Returns how many went.
    fn prune_expired(&self, now: DateTime<Utc>, grace: Duration) -> Result<usize>;
}

fn ledger_key(occurrence_id: &str, kind: JobKind) -> String {
    format!("{}:{}", kind.as_str(), occurrence_id)
}

type LedgerData = BTreeMap<String, LedgerEntry>;

enum Backing {
    File(PathBuf),
    Memory(Mutex<LedgerData>),
}

pub struct LocalLedger {
    backing: Backing,
}

impl LocalLedger {
    pub fn open(ctx: &dyn AppContext) -> Result<Self> {
        let path = ctx.get_ledger_path()?;
        let _: LedgerData = LocalStorage::load(&path, LEDGER_VERSION)?;
        Ok(Self {
            backing: Backing::File(path),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            backing: Backing::Memory(Mutex::new(LedgerData::new())),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> Result<usize> {
        self.view(|d| d.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn view<R>(&self, f: impl FnOnce(&LedgerData) -> R) -> Result<R> {
        match &self.backing {
            Backing::File(path) => {
                let data: LedgerData = LocalStorage::load(path, LEDGER_VERSION)?;
                Ok(f(&data))
            }
            Backing::Memory(data) => {
                let guard = data
                    .lock()
                    .map_err(|_| anyhow::anyhow!("ledger lock poisoned"))?;
                Ok(f(&*guard))
            }
        }
    }

    fn modify<R>(&self, f: impl FnOnce(&mut LedgerData) -> (R, bool)) -> Result<R> {
        match &self.backing {
            Backing::File(path) => {
                LocalStorage::modify_if(path, LEDGER_VERSION, |d: &mut LedgerData| Ok(f(d)))
            }
            Backing::Memory(data) => {
                let mut guard = data
                    .lock()
                    .map_err(|_| anyhow::anyhow!("ledger lock poisoned"))?;
                Ok(f(&mut *guard).0)
            }
        }
    }
}

impl JobLedger for LocalLedger {
    fn get(&self, occurrence_id: &str, kind: JobKind) -> Result<Option<LedgerEntry>> {
        let key = ledger_key(occurrence_id, kind);
        self.view(|d| d.get(&key).cloned())
    }

    fn set(&self, occurrence_id: &str, kind: JobKind, entry: LedgerEntry) -> Result<()> {
        let key = ledger_key(occurrence_id, kind);
        self.modify(|d| {
            let changed = d.get(&key) != Some(&entry);
            d.insert(key, entry);
            ((), changed)
        })
    }

    fn prune_expired(&self, now: DateTime<Utc>, grace: Duration) -> Result<usize> {
        let cutoff = now - grace;
        self.modify(|d| {
            let before = d.len();
            d.retain(|_, e| e.armed_for >= cutoff);
            let removed = before - d.len();
            (removed, removed > 0)
        })
    }
}
