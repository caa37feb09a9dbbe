//! On-disk run-state store.
//!
//! One JSON file per service name under the run directory, keyed by role:
//! ```text
//! run/alpha.json  { "Controller": {pid, listeningPort, configSnapshot},
//!                   "Broker":     {pid, listeningPort, configSnapshot} }
//! ```
//! Key presence is the only signal of "reachable now". A Controller and its
//! Broker write distinct keys of the same file from different processes, so
//! writes carry the snapshot they were based on and are rejected with
//! [`Error::Changed`] when the file moved underneath them. There is no lock:
//! the check detects a racing writer, it does not prevent one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::types::{Error, Port, Result, Role};

/// Parsed content of one run-state file. Empty when the service is not running.
pub type RunDocument = Map<String, Value>;

/// What a live role records about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRecord {
    pub pid: u32,
    pub listening_port: Port,
    #[serde(default)]
    pub config_snapshot: Value,
}

impl RoleRecord {
    /// Typed view of `role`'s entry, if it carries both `pid` and `listeningPort`.
    pub fn from_document(document: &RunDocument, role: Role) -> Option<Self> {
        document
            .get(role.as_str())
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Registry of live roles, one file per service.
#[derive(Debug, Clone)]
pub struct RunStateStore {
    dir: PathBuf,
}

impl RunStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Read a service's document. A missing file is an empty document.
    pub async fn read(&self, name: &str) -> Result<RunDocument> {
        let path = self.path_for(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Ok(RunDocument::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(RunDocument::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `role`'s record, provided the file still equals `previous`.
    ///
    /// On mismatch nothing is written and [`Error::Changed`] is returned; the
    /// caller's update is dropped, never merged or retried.
    pub async fn write_role(
        &self,
        name: &str,
        role: Role,
        record: &RoleRecord,
        previous: &RunDocument,
    ) -> Result<RoleRecord> {
        let mut current = self.read(name).await?;
        if &current != previous {
            return Err(Error::changed(format!(
                "{} changed since it was read; {} update dropped",
                self.path_for(name).display(),
                role
            )));
        }

        current.insert(role.as_str().to_string(), serde_json::to_value(record)?);
        self.persist(name, &current).await?;
        tracing::debug!(service = name, %role, port = record.listening_port, "run state written");
        Ok(record.clone())
    }

    /// Delete `role`'s key, and the whole file once no keys remain.
    ///
    /// Returns the remaining document, or `None` when the file no longer exists.
    pub async fn remove_role(&self, name: &str, role: Role) -> Result<Option<RunDocument>> {
        let mut current = self.read(name).await?;
        if current.remove(role.as_str()).is_none() && current.is_empty() {
            self.delete(name).await?;
            return Ok(None);
        }

        if current.is_empty() {
            self.delete(name).await?;
            tracing::debug!(service = name, %role, "run state file removed");
            return Ok(None);
        }

        self.persist(name, &current).await?;
        tracing::debug!(service = name, %role, "run state entry removed");
        Ok(Some(current))
    }

    /// List every service whose Controller entry carries `pid` and `listeningPort`.
    ///
    /// Anything else (unparsable files, partial entries) is skipped and logged.
    pub async fn scan(&self) -> Result<Vec<(String, RunDocument)>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
            else {
                continue;
            };

            let document = match self.read(&name).await {
                Ok(document) => document,
                Err(Error::Serialization(e)) => {
                    tracing::warn!(file = %path.display(), "skipping unreadable run state: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if RoleRecord::from_document(&document, Role::Controller).is_some() {
                found.push((name, document));
            } else {
                tracing::warn!(
                    file = %path.display(),
                    "skipping run state without a Controller pid and listeningPort"
                );
            }
        }

        found.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(found)
    }

    async fn persist(&self, name: &str, document: &RunDocument) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(name);
        let staging = self.dir.join(format!(".{}.json.tmp", name));
        tokio::fs::write(&staging, serde_json::to_vec_pretty(document)?).await?;
        tokio::fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(pid: u32, port: Port) -> RoleRecord {
        RoleRecord {
            pid,
            listening_port: port,
            config_snapshot: json!({"name": "svc"}),
        }
    }

    #[tokio::test]
    async fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path().join("run"));
        assert!(store.read("svc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_read_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path());

        store
            .write_role("svc", Role::Controller, &record(1, 24001), &RunDocument::new())
            .await
            .unwrap();

        let document = store.read("svc").await.unwrap();
        let entry = RoleRecord::from_document(&document, Role::Controller).unwrap();
        assert_eq!(entry.pid, 1);
        assert_eq!(entry.listening_port, 24001);

        assert_eq!(store.remove_role("svc", Role::Controller).await.unwrap(), None);
        assert!(store.read("svc").await.unwrap().is_empty());
        assert!(!store.path_for("svc").exists());
    }

    #[tokio::test]
    async fn broker_and_controller_share_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path());

        store
            .write_role("svc", Role::Controller, &record(1, 24001), &RunDocument::new())
            .await
            .unwrap();
        let snapshot = store.read("svc").await.unwrap();
        store
            .write_role("svc", Role::Broker, &record(2, 24002), &snapshot)
            .await
            .unwrap();

        let remaining = store.remove_role("svc", Role::Controller).await.unwrap().unwrap();
        assert!(remaining.contains_key("Broker"));
        assert!(!remaining.contains_key("Controller"));
        assert!(store.path_for("svc").exists());
    }

    #[tokio::test]
    async fn stale_snapshot_is_rejected_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path());

        let s0 = store.read("svc").await.unwrap();
        store
            .write_role("svc", Role::Controller, &record(7, 25000), &s0)
            .await
            .unwrap();
        let s1 = store.read("svc").await.unwrap();

        let err = store
            .write_role("svc", Role::Broker, &record(8, 25001), &s0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Changed(_)));
        assert_eq!(store.read("svc").await.unwrap(), s1);
    }

    #[tokio::test]
    async fn scan_skips_entries_without_pid() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path());

        store
            .write_role("alive", Role::Controller, &record(3, 26000), &RunDocument::new())
            .await
            .unwrap();
        std::fs::write(
            store.path_for("partial"),
            json!({"Controller": {"listeningPort": 26001}}).to_string(),
        )
        .unwrap();
        std::fs::write(store.path_for("garbage"), "{not json").unwrap();

        let names: Vec<String> = store
            .scan()
            .await
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["alive".to_string()]);
    }

    #[tokio::test]
    async fn removing_absent_role_keeps_others() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStateStore::new(dir.path());
        store
            .write_role("svc", Role::Controller, &record(1, 24001), &RunDocument::new())
            .await
            .unwrap();

        let remaining = store.remove_role("svc", Role::Broker).await.unwrap().unwrap();
        assert!(remaining.contains_key("Controller"));
        assert_eq!(store.remove_role("other", Role::Broker).await.unwrap(), None);
    }
}
