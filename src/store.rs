//! Job persistence backends.
//!
//! One record per job, keyed by the job's UUID. Writes are atomic: the
//! filesystem backend writes to a `.tmp` sibling, fsyncs, then renames.
//! A blob/object-store backend plugs in behind the same trait; no driver
//! ships in-core.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{PlanningError, PlanningResult};
use crate::jobs::Job;

/// Storage backend for job records.
pub trait JobStore: Send + Sync {
    fn save(&self, job: &Job) -> PlanningResult<()>;
    fn load(&self, job_id: Uuid) -> PlanningResult<Option<Job>>;
    fn list_ids(&self) -> PlanningResult<Vec<Uuid>>;
    /// Deleting an absent record is not an error.
    fn delete(&self, job_id: Uuid) -> PlanningResult<()>;
}

/// Volatile in-process store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn save(&self, job: &Job) -> PlanningResult<()> {
        self.jobs.write().insert(job.id, job.clone());
        Ok(())
    }

    fn load(&self, job_id: Uuid) -> PlanningResult<Option<Job>> {
        Ok(self.jobs.read().get(&job_id).cloned())
    }

    fn list_ids(&self) -> PlanningResult<Vec<Uuid>> {
        Ok(self.jobs.read().keys().copied().collect())
    }

    fn delete(&self, job_id: Uuid) -> PlanningResult<()> {
        self.jobs.write().remove(&job_id);
        Ok(())
    }
}

/// One JSON file per job under a storage directory.
pub struct FileSystemJobStore {
    root: PathBuf,
}

impl FileSystemJobStore {
    pub fn new(root: impl Into<PathBuf>) -> PlanningResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| storage_error("create storage dir", &root, e))?;
        Ok(Self { root })
    }

    fn job_path(&self, job_id: Uuid) -> PathBuf {
        self.root.join(format!("{job_id}.json"))
    }
}

impl JobStore for FileSystemJobStore {
    fn save(&self, job: &Job) -> PlanningResult<()> {
        let path = self.job_path(job.id);
        let tmp = self.root.join(format!("{}.json.tmp", job.id));
        let payload = serde_json::to_vec_pretty(job)
            .map_err(|e| PlanningError::internal(format!("serialize job {}: {e}", job.id)))?;

        let mut file =
            fs::File::create(&tmp).map_err(|e| storage_error("create temp file", &tmp, e))?;
        file.write_all(&payload)
            .map_err(|e| storage_error("write temp file", &tmp, e))?;
        file.sync_all()
            .map_err(|e| storage_error("fsync temp file", &tmp, e))?;
        drop(file);
        fs::rename(&tmp, &path).map_err(|e| storage_error("rename into place", &path, e))?;
        Ok(())
    }

    fn load(&self, job_id: Uuid) -> PlanningResult<Option<Job>> {
        let path = self.job_path(job_id);
        let payload = match fs::read(&path) {
            Ok(payload) => payload,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error("read job file", &path, e)),
        };
        let job = serde_json::from_slice(&payload)
            .map_err(|e| PlanningError::internal(format!("parse job file {path:?}: {e}")))?;
        Ok(Some(job))
    }

    fn list_ids(&self) -> PlanningResult<Vec<Uuid>> {
        let mut ids = Vec::new();
        let entries =
            fs::read_dir(&self.root).map_err(|e| storage_error("list storage dir", &self.root, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| storage_error("list storage dir", &self.root, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Ok(id) = stem.parse::<Uuid>() {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }

    fn delete(&self, job_id: Uuid) -> PlanningResult<()> {
        let path = self.job_path(job_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("delete job file", &path, e)),
        }
    }
}

fn storage_error(operation: &str, path: &Path, err: std::io::Error) -> PlanningError {
    PlanningError::internal(format!("{operation} {path:?}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::test_support::*;
    use crate::domain::{Employee, Schedule};
    use crate::jobs::{Job, JobStatus};

    fn sample_job() -> Job {
        let day = date(2024, 1, 15);
        let schedule = Schedule::new(
            vec![Employee::new("e1", "Amy").with_skill("Nurse")],
            vec![shift_on("s1", day, 8, 16).with_required_skill("Nurse")],
        );
        Job::new(schedule)
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryJobStore::new();
        let job = sample_job();
        store.save(&job).unwrap();
        assert_eq!(store.load(job.id).unwrap(), Some(job.clone()));
        assert_eq!(store.list_ids().unwrap(), vec![job.id]);
        store.delete(job.id).unwrap();
        assert_eq!(store.load(job.id).unwrap(), None);
    }

    #[test]
    fn filesystem_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemJobStore::new(dir.path()).unwrap();

        let mut job = sample_job();
        job.status = JobStatus::Completed;
        store.save(&job).unwrap();

        let loaded = store.load(job.id).unwrap().unwrap();
        assert_eq!(loaded, job);
        assert_eq!(store.list_ids().unwrap(), vec![job.id]);

        // No temp files left behind after a successful write.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn filesystem_store_missing_job_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemJobStore::new(dir.path()).unwrap();
        assert_eq!(store.load(Uuid::new_v4()).unwrap(), None);
        // Deleting an absent record is fine.
        store.delete(Uuid::new_v4()).unwrap();
    }

    #[test]
    fn filesystem_store_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemJobStore::new(dir.path()).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "scratch").unwrap();
        std::fs::write(dir.path().join("not-a-uuid.json"), "{}").unwrap();
        assert!(store.list_ids().unwrap().is_empty());
    }

    #[test]
    fn persisted_status_uses_wire_constants() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSystemJobStore::new(dir.path()).unwrap();
        let mut job = sample_job();
        job.status = JobStatus::Solving;
        store.save(&job).unwrap();

        let raw = std::fs::read_to_string(dir.path().join(format!("{}.json", job.id))).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["status"], "SOLVING");
        // Optional fields are null, never absent.
        assert!(value.as_object().unwrap().contains_key("output"));
        assert!(value["output"].is_null());
        assert!(value.as_object().unwrap().contains_key("error"));
        assert!(value["error"].is_null());
    }
}
