// Manages local file storage shared by the directory, the ledger and the job queue.
//
// ⚠️ VERSION BUMP REQUIRED:
// Changes to the serialized shape of a stored document require incrementing
// that document's version constant so an old binary refuses to overwrite it.
use anyhow::Result;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Wrapper struct for versioned documents
#[derive(Serialize, Deserialize)]
struct Versioned<T> {
    #[serde(default)]
    version: u32,
    data: T,
}

pub struct LocalStorage;

impl LocalStorage {
    /// Helper to get a sidecar lock file path
    fn get_lock_path(file_path: &Path) -> PathBuf {
        let mut lock_path = file_path.to_path_buf();
        if let Some(ext) = lock_path.extension() {
            let mut new_ext = ext.to_os_string();
            new_ext.push(".lock");
            lock_path.set_extension(new_ext);
        } else {
            lock_path.set_extension("lock");
        }
        lock_path
    }

    /// Runs `f` while holding an exclusive lock on the sidecar lock file.
    pub fn with_lock<F, T>(file_path: &Path, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let lock_path = Self::get_lock_path(file_path);
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        file.lock_exclusive()?;
        let result = f();
        file.unlock()?;
        result
    }

    /// Atomic write: Write to .tmp file then rename
    pub fn atomic_write<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, contents: C) -> Result<()> {
        let path = path.as_ref();
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, contents)?;
        fs::rename(tmp_path, path)?;
        Ok(())
    }

    /// Reads a versioned document without taking the lock.
    /// A missing file yields `T::default()`; a version mismatch is an error so the
    /// caller never overwrites data it could not understand.
    fn read_unlocked<T>(path: &Path, version: u32) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        if !path.exists() {
            return Ok(T::default());
        }
        let json = fs::read_to_string(path)?;
        let doc: Versioned<T> = serde_json::from_str(&json).map_err(|e| {
            anyhow::anyhow!("Failed to parse '{}': {}", path.display(), e)
        })?;
        if doc.version != version {
            anyhow::bail!(
                "'{}' has version {} but this build understands version {}",
                path.display(),
                doc.version,
                version
            );
        }
        Ok(doc.data)
    }

    fn write_unlocked<T: Serialize>(path: &Path, version: u32, data: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(&Versioned { version, data })?;
        Self::atomic_write(path, json)
    }

    /// Loads a versioned document under the file lock.
    pub fn load<T>(path: &Path, version: u32) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        if !path.exists() {
            return Ok(T::default());
        }
        Self::with_lock(path, || Self::read_unlocked(path, version))
    }

    /// Load, mutate and persist a versioned document as one locked operation.
    pub fn modify<T, R, F>(path: &Path, version: u32, f: F) -> Result<R>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> Result<R>,
    {
        Self::modify_if(path, version, |data: &mut T| Ok((f(data)?, true)))
    }

    /// Like `modify`, but the closure reports whether it changed anything and the
    /// file is only rewritten when it did.
    pub fn modify_if<T, R, F>(path: &Path, version: u32, f: F) -> Result<R>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> Result<(R, bool)>,
    {
        Self::with_lock(path, || {
            let mut data: T = Self::read_unlocked(path, version)?;
            let (result, changed) = f(&mut data)?;
            if changed {
                Self::write_unlocked(path, version, &data)?;
            }
            Ok(result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::thread;

    fn unique_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "lessoncal_test_{}_{}",
            name,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let _ = fs::create_dir_all(&dir);
        dir
    }

    #[test]
    fn test_atomic_write_and_load() {
        let temp_dir = unique_dir("storage");
        let file_path = temp_dir.join("test.json");

        let mut data: BTreeMap<String, u32> = BTreeMap::new();
        data.insert("alice".to_string(), 3);
        LocalStorage::modify(&file_path, 1, |d: &mut BTreeMap<String, u32>| {
            *d = data.clone();
            Ok(())
        })
        .unwrap();

        let loaded: BTreeMap<String, u32> = LocalStorage::load(&file_path, 1).unwrap();
        assert_eq!(loaded, data);
        assert!(!file_path.with_extension("tmp").exists());

        let _ = fs::remove_dir_all(temp_dir);
    }

    #[test]
    fn test_missing_file_loads_default() {
        let temp_dir = unique_dir("missing");
        let loaded: Vec<String> = LocalStorage::load(&temp_dir.join("nope.json"), 1).unwrap();
        assert!(loaded.is_empty());
        let _ = fs::remove_dir_all(temp_dir);
    }

    #[test]
    fn test_version_mismatch_blocks_modify() {
        let temp_dir = unique_dir("version");
        let file_path = temp_dir.join("doc.json");
        fs::write(&file_path, r#"{"version": 9, "data": ["keep me"]}"#).unwrap();

        let res = LocalStorage::modify(&file_path, 1, |d: &mut Vec<String>| {
            d.clear();
            Ok(())
        });
        assert!(res.is_err());

        // The unreadable document must be left untouched.
        let raw = fs::read_to_string(&file_path).unwrap();
        assert!(raw.contains("keep me"));

        let _ = fs::remove_dir_all(temp_dir);
    }

    #[test]
    fn test_locking_concurrency() {
        let temp_dir = unique_dir("lock");
        let file_path = temp_dir.join("counter.json");
        let path_ref = Arc::new(file_path.clone());

        let mut handles = vec![];
        for _ in 0..10 {
            let p = path_ref.clone();
            handles.push(thread::spawn(move || {
                LocalStorage::modify(&p, 1, |n: &mut u32| {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    *n += 1;
                    Ok(())
                })
                .unwrap();
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        let count: u32 = LocalStorage::load(&file_path, 1).unwrap();
        assert_eq!(count, 10);

        let _ = fs::remove_dir_all(temp_dir);
    }
}
