use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use super::blobs::BlobStore;
use super::db::{ArtifactInsert, DbHandle, GroupColumn, WorkspaceDb};
use super::models::*;
use crate::errors::StorageError;

/// Database file name inside the workspace directory.
pub const WORKSPACE_DB: &str = "workspace.db";
/// Blob directory name inside the workspace directory.
pub const BLOB_DIR: &str = "blobs";
/// Orphaned blobs younger than this are left alone by the reclaim sweep.
pub const ORPHAN_GRACE: Duration = Duration::from_secs(10 * 60);

/// Durable, versioned store for everything the pipeline phases produce.
///
/// Content lives in the [`BlobStore`], metadata in SQLite behind a
/// [`DbHandle`]. Cloning is cheap and clones share the same storage.
#[derive(Clone)]
pub struct ArtifactRepository {
    db: DbHandle,
    blobs: Arc<BlobStore>,
}

impl ArtifactRepository {
    /// Open the repository rooted at `workspace_dir`, creating it if needed.
    pub fn open(workspace_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(workspace_dir).map_err(|source| StorageError::Blob {
            path: workspace_dir.to_path_buf(),
            source,
        })?;
        let db = WorkspaceDb::new(&workspace_dir.join(WORKSPACE_DB)).map_err(StorageError::from_db)?;
        let blobs = BlobStore::open(&workspace_dir.join(BLOB_DIR))?;
        Ok(Self::new(DbHandle::new(db), blobs))
    }

    pub fn new(db: DbHandle, blobs: BlobStore) -> Self {
        Self {
            db,
            blobs: Arc::new(blobs),
        }
    }

    /// The shared database handle; the execution ledger lives in the same file.
    pub fn db(&self) -> &DbHandle {
        &self.db
    }

    /// Store a new artifact record and return its id.
    ///
    /// The version is 1 for a root artifact and `parent.version + 1` when a
    /// parent is given. Content is written before metadata.
    pub async fn store(&self, new: NewArtifact) -> Result<String, StorageError> {
        if let Some(parent_id) = new.parent_id.clone() {
            let exists = self
                .db
                .call(move |db| db.artifact_exists(&parent_id))
                .await
                .map_err(StorageError::from_db)?;
            if !exists {
                return Err(StorageError::ParentNotFound {
                    id: new.parent_id.unwrap_or_default(),
                });
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let checksum = new.content.checksum();
        let path = self.blobs.write(&id, &new.content)?;

        let insert = ArtifactInsert {
            id: id.clone(),
            artifact_type: new.artifact_type,
            status: new.status,
            creator: new.creator,
            execution_id: new.execution_id,
            parent_id: new.parent_id,
            tags: new.tags,
            checksum,
            content_path: path.to_string_lossy().to_string(),
            created_at: Utc::now(),
        };
        let meta = match self.db.call(move |db| db.insert_artifact(insert)).await {
            Ok(meta) => meta,
            Err(e) => {
                debug!(artifact_id = %id, "metadata insert failed, blob left for reclaim");
                return Err(StorageError::from_db(e));
            }
        };
        debug!(
            artifact_id = %meta.id,
            artifact_type = %meta.artifact_type,
            version = meta.version,
            "stored artifact"
        );
        Ok(meta.id)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Artifact>, StorageError> {
        let owned = id.to_string();
        let meta = self
            .db
            .call(move |db| db.get_artifact(&owned))
            .await
            .map_err(StorageError::from_db)?;
        meta.map(|m| self.attach(m)).transpose()
    }

    /// Rewrite an artifact's content in place without bumping its version.
    /// Returns false when no such artifact exists.
    pub async fn update(
        &self,
        id: &str,
        content: ArtifactContent,
        updated_by: &str,
        status: Option<ArtifactStatus>,
    ) -> Result<bool, StorageError> {
        let owned = id.to_string();
        let exists = self
            .db
            .call(move |db| db.artifact_exists(&owned))
            .await
            .map_err(StorageError::from_db)?;
        if !exists {
            return Ok(false);
        }

        self.blobs.write(id, &content)?;
        let checksum = content.checksum();
        let owned = id.to_string();
        let updated_by = updated_by.to_string();
        self.db
            .call(move |db| {
                db.update_artifact_content(&owned, &checksum, &updated_by, status, Utc::now())
            })
            .await
            .map_err(StorageError::from_db)
    }

    /// Metadata-only status transition.
    pub async fn set_status(&self, id: &str, status: ArtifactStatus) -> Result<bool, StorageError> {
        let owned = id.to_string();
        self.db
            .call(move |db| db.set_artifact_status(&owned, status, Utc::now()))
            .await
            .map_err(StorageError::from_db)
    }

    /// Latest artifact of a type, optionally scoped to one execution.
    pub async fn latest(
        &self,
        artifact_type: ArtifactType,
        execution_id: Option<&str>,
    ) -> Result<Option<Artifact>, StorageError> {
        let exec = execution_id.map(String::from);
        let meta = self
            .db
            .call(move |db| db.latest_artifact(artifact_type, exec.as_deref()))
            .await
            .map_err(StorageError::from_db)?;
        meta.map(|m| self.attach(m)).transpose()
    }

    /// Latest artifact of every type an execution produced.
    pub async fn latest_for_execution(
        &self,
        execution_id: &str,
    ) -> Result<BTreeMap<ArtifactType, Artifact>, StorageError> {
        let owned = execution_id.to_string();
        let metas = self
            .db
            .call(move |db| db.artifacts_for_execution(&owned))
            .await
            .map_err(StorageError::from_db)?;
        let mut latest = BTreeMap::new();
        for meta in metas {
            if latest.contains_key(&meta.artifact_type) {
                continue;
            }
            let ty = meta.artifact_type;
            latest.insert(ty, self.attach(meta)?);
        }
        Ok(latest)
    }

    /// Artifacts matching `filter`, newest first.
    pub async fn list(&self, filter: ArtifactFilter) -> Result<Vec<Artifact>, StorageError> {
        let metas = self
            .db
            .call(move |db| db.list_artifacts(&filter))
            .await
            .map_err(StorageError::from_db)?;
        metas.into_iter().map(|m| self.attach(m)).collect()
    }

    /// Physically delete an artifact and its blob.
    ///
    /// Fails with [`StorageError::Referenced`] while another artifact names it
    /// as parent. Intended for retention sweeps only.
    pub async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let owned = id.to_string();
        let deleted = self
            .db
            .call(move |db| db.delete_artifact(&owned))
            .await
            .map_err(StorageError::from_db)?;
        if deleted {
            self.blobs.remove(id)?;
        }
        Ok(deleted)
    }

    /// Archive every artifact of an execution. Returns how many changed.
    pub async fn archive_execution(&self, execution_id: &str) -> Result<usize, StorageError> {
        let owned = execution_id.to_string();
        self.db
            .call(move |db| db.archive_execution(&owned, Utc::now()))
            .await
            .map_err(StorageError::from_db)
    }

    /// Delete archived artifacts created more than `older_than` ago.
    /// Artifacts still referenced as a parent are kept.
    pub async fn sweep_archived(
        &self,
        older_than: chrono::Duration,
    ) -> Result<SweepReport, StorageError> {
        let cutoff = Utc::now() - older_than;
        let candidates = self
            .db
            .call(move |db| db.archived_before(cutoff))
            .await
            .map_err(StorageError::from_db)?;

        let mut report = SweepReport::default();
        for meta in candidates {
            match self.delete(&meta.id).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => {}
                Err(StorageError::Referenced { id }) => {
                    debug!(artifact_id = %id, "kept archived artifact still referenced as parent");
                    report.skipped_referenced += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }

    /// Remove content blobs that have no metadata row and are older than
    /// [`ORPHAN_GRACE`]. Returns how many were removed.
    pub async fn reclaim_orphan_blobs(&self) -> Result<usize, StorageError> {
        self.reclaim_orphan_blobs_older_than(ORPHAN_GRACE).await
    }

    /// Remove blobs without a metadata row whose file is at least `grace` old.
    /// Younger orphans may belong to a store in another process that has not
    /// inserted its row yet.
    pub async fn reclaim_orphan_blobs_older_than(
        &self,
        grace: Duration,
    ) -> Result<usize, StorageError> {
        let blob_ids = self.blobs.ids()?;
        let known = self
            .db
            .call(|db| db.artifact_ids())
            .await
            .map_err(StorageError::from_db)?;
        let mut removed = 0;
        for id in blob_ids {
            if known.contains(&id) {
                continue;
            }
            match self.blobs.age(&id)? {
                Some(age) if age >= grace => {
                    if self.blobs.remove(&id)? {
                        removed += 1;
                    }
                }
                Some(_) => debug!(blob_id = %id, "orphaned blob within grace period, kept"),
                None => {}
            }
        }
        if removed > 0 {
            warn!(count = removed, "reclaimed orphaned content blobs");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<WorkspaceStats, StorageError> {
        let (total_artifacts, by_type, by_status, by_creator) = self
            .db
            .call(|db| {
                Ok((
                    db.count_artifacts()?,
                    db.count_artifacts_by(GroupColumn::ArtifactType)?,
                    db.count_artifacts_by(GroupColumn::Status)?,
                    db.count_artifacts_by(GroupColumn::Creator)?,
                ))
            })
            .await
            .map_err(StorageError::from_db)?;
        Ok(WorkspaceStats {
            total_artifacts,
            by_type,
            by_status,
            by_creator,
            storage_bytes: self.blobs.total_size()?,
        })
    }

    /// Per-type counts, latest versions and completed phases for one execution.
    pub async fn execution_summary(
        &self,
        execution_id: &str,
    ) -> Result<ExecutionSummary, StorageError> {
        let owned = execution_id.to_string();
        let metas = self
            .db
            .call(move |db| db.artifacts_for_execution(&owned))
            .await
            .map_err(StorageError::from_db)?;

        let total_artifacts = metas.len() as u64;
        let mut artifacts: BTreeMap<ArtifactType, TypeSummary> = BTreeMap::new();
        for meta in metas {
            artifacts
                .entry(meta.artifact_type)
                .and_modify(|s| s.count += 1)
                .or_insert_with(|| TypeSummary {
                    count: 1,
                    latest_id: meta.id.clone(),
                    latest_version: meta.version,
                    latest_status: meta.status,
                    latest_creator: meta.creator.clone(),
                    updated_at: meta.updated_at,
                });
        }

        let phases_completed = [
            (ArtifactType::UserStories, "elicitation"),
            (ArtifactType::Entities, "modeling"),
            (ArtifactType::CheckResults, "verification"),
            (ArtifactType::FinalDocument, "specification"),
        ]
        .into_iter()
        .filter(|(ty, _)| artifacts.contains_key(ty))
        .map(|(_, phase)| phase.to_string())
        .collect();

        Ok(ExecutionSummary {
            execution_id: execution_id.to_string(),
            total_artifacts,
            artifacts,
            phases_completed,
        })
    }

    fn attach(&self, metadata: ArtifactMetadata) -> Result<Artifact, StorageError> {
        let content = self.blobs.read(&metadata.id)?;
        Ok(Artifact { metadata, content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::{TempDir, tempdir};

    fn open_repo() -> (TempDir, ArtifactRepository) {
        let dir = tempdir().unwrap();
        let repo = ArtifactRepository::open(&dir.path().join("workspace")).unwrap();
        (dir, repo)
    }

    #[tokio::test]
    async fn test_store_and_get_round_trip_with_checksum() {
        let (_dir, repo) = open_repo();
        let id = repo
            .store(
                NewArtifact::new(ArtifactType::UserStories, "As a user...", "stakeholder")
                    .in_execution("exec-1")
                    .with_tags(["elicitation"]),
            )
            .await
            .unwrap();

        let artifact = repo.get(&id).await.unwrap().expect("stored artifact");
        assert_eq!(artifact.version(), 1);
        assert_eq!(artifact.metadata.status, ArtifactStatus::Draft);
        assert_eq!(artifact.metadata.execution_id.as_deref(), Some("exec-1"));
        assert_eq!(artifact.content, ArtifactContent::from("As a user..."));
        assert!(artifact.verify_checksum());
    }

    #[tokio::test]
    async fn test_structured_string_content_keeps_its_checksum() {
        let (_dir, repo) = open_repo();
        let stored = ArtifactContent::from(json!("REQ-001: login"));
        let id = repo
            .store(NewArtifact::new(
                ArtifactType::RequirementsDraft,
                stored.clone(),
                "collector",
            ))
            .await
            .unwrap();

        let artifact = repo.get(&id).await.unwrap().expect("stored artifact");
        assert_eq!(artifact.content, stored);
        assert!(artifact.verify_checksum());
    }

    #[tokio::test]
    async fn test_reclaim_keeps_fresh_orphan_blobs() {
        let (_dir, repo) = open_repo();
        let kept = repo
            .store(NewArtifact::new(ArtifactType::Entities, "kept", "modeler"))
            .await
            .unwrap();
        // A blob whose metadata row has not been committed yet.
        repo.blobs
            .write("in-flight", &ArtifactContent::from("pending"))
            .unwrap();

        assert_eq!(repo.reclaim_orphan_blobs().await.unwrap(), 0);
        assert!(repo.blobs.age("in-flight").unwrap().is_some());

        assert_eq!(
            repo.reclaim_orphan_blobs_older_than(Duration::ZERO)
                .await
                .unwrap(),
            1
        );
        assert!(repo.blobs.age("in-flight").unwrap().is_none());
        assert!(repo.get(&kept).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let (_dir, repo) = open_repo();
        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_version_chain_is_monotonic() {
        let (_dir, repo) = open_repo();
        let mut parent = repo
            .store(NewArtifact::new(ArtifactType::RequirementsDraft, "v1", "collector"))
            .await
            .unwrap();
        for expected in 2..=4u32 {
            let child = repo
                .store(
                    NewArtifact::new(
                        ArtifactType::RequirementsDraft,
                        format!("v{}", expected),
                        "collector",
                    )
                    .with_parent(parent.clone()),
                )
                .await
                .unwrap();
            let loaded = repo.get(&child).await.unwrap().unwrap();
            assert_eq!(loaded.version(), expected);
            assert_eq!(loaded.metadata.parent_id.as_deref(), Some(parent.as_str()));
            parent = child;
        }
    }

    #[tokio::test]
    async fn test_store_with_missing_parent_fails_without_blob() {
        let (dir, repo) = open_repo();
        let err = repo
            .store(NewArtifact::new(ArtifactType::Entities, "x", "modeler").with_parent("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ParentNotFound { .. }));
        let blobs = std::fs::read_dir(dir.path().join("workspace").join(BLOB_DIR))
            .unwrap()
            .count();
        assert_eq!(blobs, 0);
    }

    #[tokio::test]
    async fn test_concurrent_stores_with_same_parent_cannot_both_succeed() {
        let (_dir, repo) = open_repo();
        let parent = repo
            .store(NewArtifact::new(ArtifactType::Entities, "root", "modeler"))
            .await
            .unwrap();

        let a = repo.store(
            NewArtifact::new(ArtifactType::Entities, "left", "modeler").with_parent(parent.clone()),
        );
        let b = repo.store(
            NewArtifact::new(ArtifactType::Entities, "right", "modeler").with_parent(parent.clone()),
        );
        let (a, b) = tokio::join!(a, b);

        assert_eq!(
            [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(),
            1,
            "exactly one child may claim version 2"
        );
        let loser = if a.is_err() { a } else { b };
        assert!(matches!(loser, Err(StorageError::VersionConflict { .. })));

        // The losing blob is an orphan and is reclaimable.
        assert_eq!(
            repo.reclaim_orphan_blobs_older_than(Duration::ZERO)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_update_rewrites_content_without_version_bump() {
        let (_dir, repo) = open_repo();
        let id = repo
            .store(NewArtifact::new(ArtifactType::CheckResults, "draft check", "checker"))
            .await
            .unwrap();

        let updated = repo
            .update(
                &id,
                ArtifactContent::from("final check"),
                "checker",
                Some(ArtifactStatus::Completed),
            )
            .await
            .unwrap();
        assert!(updated);

        let artifact = repo.get(&id).await.unwrap().unwrap();
        assert_eq!(artifact.version(), 1);
        assert_eq!(artifact.content, ArtifactContent::from("final check"));
        assert_eq!(artifact.metadata.status, ArtifactStatus::Completed);
        assert!(artifact.verify_checksum());

        assert!(
            !repo
                .update("missing", ArtifactContent::from("x"), "checker", None)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_latest_across_interleaved_executions() {
        let (_dir, repo) = open_repo();
        let e1_v1 = repo
            .store(NewArtifact::new(ArtifactType::Entities, "e1 v1", "modeler").in_execution("e1"))
            .await
            .unwrap();
        repo.store(NewArtifact::new(ArtifactType::Entities, "e2 v1", "modeler").in_execution("e2"))
            .await
            .unwrap();
        let e1_v2 = repo
            .store(
                NewArtifact::new(ArtifactType::Entities, "e1 v2", "modeler")
                    .in_execution("e1")
                    .with_parent(e1_v1),
            )
            .await
            .unwrap();

        let latest = repo
            .latest(ArtifactType::Entities, Some("e1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id(), e1_v2);
        assert_eq!(latest.content, ArtifactContent::from("e1 v2"));

        let e2 = repo
            .latest(ArtifactType::Entities, Some("e2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(e2.content, ArtifactContent::from("e2 v1"));

        let any = repo.latest(ArtifactType::Entities, None).await.unwrap().unwrap();
        assert_eq!(any.version(), 2);
    }

    #[tokio::test]
    async fn test_latest_for_execution_picks_one_per_type() {
        let (_dir, repo) = open_repo();
        let q1 = repo
            .store(
                NewArtifact::new(ArtifactType::Questions, json!(["a"]), "collector")
                    .in_execution("e1"),
            )
            .await
            .unwrap();
        repo.store(
            NewArtifact::new(ArtifactType::Questions, json!(["a", "b"]), "collector")
                .in_execution("e1")
                .with_parent(q1),
        )
        .await
        .unwrap();
        repo.store(NewArtifact::new(ArtifactType::UserStories, "stories", "stakeholder").in_execution("e1"))
            .await
            .unwrap();

        let latest = repo.latest_for_execution("e1").await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(
            latest[&ArtifactType::Questions].content,
            ArtifactContent::from(json!(["a", "b"]))
        );
    }

    #[tokio::test]
    async fn test_list_with_filters() {
        let (_dir, repo) = open_repo();
        repo.store(NewArtifact::new(ArtifactType::UserStories, "a", "stakeholder"))
            .await
            .unwrap();
        repo.store(NewArtifact::new(ArtifactType::Questions, json!(["q"]), "collector"))
            .await
            .unwrap();

        let by_creator = repo
            .list(ArtifactFilter {
                creator: Some("collector".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_creator.len(), 1);
        assert_eq!(by_creator[0].metadata.artifact_type, ArtifactType::Questions);
    }

    #[tokio::test]
    async fn test_delete_refuses_parent_and_removes_blob() {
        let (_dir, repo) = open_repo();
        let parent = repo
            .store(NewArtifact::new(ArtifactType::Entities, "p", "modeler"))
            .await
            .unwrap();
        let child = repo
            .store(NewArtifact::new(ArtifactType::Entities, "c", "modeler").with_parent(parent.clone()))
            .await
            .unwrap();

        assert!(matches!(
            repo.delete(&parent).await,
            Err(StorageError::Referenced { .. })
        ));
        assert!(repo.delete(&child).await.unwrap());
        assert!(repo.get(&child).await.unwrap().is_none());
        assert!(repo.delete(&parent).await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_archived_deletes_old_archived_only() {
        let (_dir, repo) = open_repo();
        let root = repo
            .store(NewArtifact::new(ArtifactType::Entities, "root", "modeler").in_execution("old"))
            .await
            .unwrap();
        repo.store(
            NewArtifact::new(ArtifactType::Entities, "child", "modeler")
                .in_execution("old")
                .with_parent(root),
        )
        .await
        .unwrap();
        repo.store(NewArtifact::new(ArtifactType::Entities, "live", "modeler").in_execution("new"))
            .await
            .unwrap();
        assert_eq!(repo.archive_execution("old").await.unwrap(), 2);

        // Nothing is older than a day yet.
        let report = repo.sweep_archived(chrono::Duration::days(1)).await.unwrap();
        assert_eq!(report, SweepReport::default());

        // A zero window makes every archived artifact eligible; child goes first.
        let report = repo.sweep_archived(chrono::Duration::zero()).await.unwrap();
        assert_eq!(report.deleted, 2);
        assert_eq!(report.skipped_referenced, 0);
        assert_eq!(repo.stats().await.unwrap().total_artifacts, 1);
    }

    #[tokio::test]
    async fn test_stats_and_execution_summary() {
        let (_dir, repo) = open_repo();
        repo.store(NewArtifact::new(ArtifactType::UserStories, "s", "stakeholder").in_execution("e1"))
            .await
            .unwrap();
        let e = repo
            .store(NewArtifact::new(ArtifactType::Entities, "e", "modeler").in_execution("e1"))
            .await
            .unwrap();
        repo.store(
            NewArtifact::new(ArtifactType::Entities, "e2", "modeler")
                .in_execution("e1")
                .with_parent(e),
        )
        .await
        .unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.total_artifacts, 3);
        assert_eq!(stats.by_creator.get("modeler"), Some(&2));
        assert_eq!(stats.by_status.get("draft"), Some(&3));
        assert!(stats.storage_bytes > 0);

        let summary = repo.execution_summary("e1").await.unwrap();
        assert_eq!(summary.total_artifacts, 3);
        assert_eq!(summary.artifacts[&ArtifactType::Entities].count, 2);
        assert_eq!(summary.artifacts[&ArtifactType::Entities].latest_version, 2);
        assert_eq!(summary.phases_completed, vec!["elicitation", "modeling"]);
    }

    #[tokio::test]
    async fn test_repository_survives_reopen() {
        let dir = tempdir().unwrap();
        let workspace = dir.path().join("workspace");
        let id = {
            let repo = ArtifactRepository::open(&workspace).unwrap();
            repo.store(NewArtifact::new(ArtifactType::FinalDocument, "# SRS", "documenter"))
                .await
                .unwrap()
        };
        let repo = ArtifactRepository::open(&workspace).unwrap();
        let artifact = repo.get(&id).await.unwrap().unwrap();
        assert_eq!(artifact.content, ArtifactContent::from("# SRS"));
    }
}
