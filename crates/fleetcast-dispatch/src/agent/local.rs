use std::any::Any;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use fleetcast_fs::{AtomicWriteOptions, Workspace, atomic_write, clear_dir, ensure_dir, promote};
use fleetcast_transfer::{ChunkDescriptor, ChunkMerger, ChunkSink, MergeStrategy, StagingDir, TransferOptions};
use fleetcast_verify::{Sha256Hasher, VerifiedReader};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AgentReply, ChunkManifest, DeliveryRequest, Payload, TargetAgent};
use crate::error::AgentError;
use crate::model::{AfterAction, TargetKey};

/// File written into the project directory after every successful delivery.
pub const RELEASE_MARKER: &str = ".fleetcast-release.json";

const STAGING_DIR: &str = ".staging";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Stop,
    Restart,
}

/// A project lifecycle action the agent performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentAction {
    pub target: TargetKey,
    pub kind:   ActionKind,
    pub at:     DateTime<Utc>,
}

#[derive(Serialize)]
struct ReleaseMarker<'a> {
    job_id:       &'a str,
    file_name:    &'a str,
    digest:       &'a str,
    delivered_at: DateTime<Utc>,
}

/// Target agent that delivers into a local directory tree.
///
/// Projects live under `<root>/<node>/<project>[/<sub_path>]` and chunk
/// sessions are staged under `<root>/.staging/<session>`. Stop and restart
/// are recorded in an action log instead of touching real processes.
pub struct LocalAgent {
    root:     PathBuf,
    merger:   ChunkMerger,
    sessions: Mutex<HashMap<String, Arc<StagingDir>>>,
    actions:  Mutex<Vec<AgentAction>>,
}

impl LocalAgent {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_merger(
            root,
            ChunkMerger::new(MergeStrategy::default(), TransferOptions::default()),
        )
    }

    /// Use a specific merge strategy and chunk layout for rebuilding.
    pub fn with_merger(root: impl Into<PathBuf>, merger: ChunkMerger) -> Self {
        Self {
            root: root.into(),
            merger,
            sessions: Mutex::new(HashMap::new()),
            actions: Mutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path { &self.root }

    pub fn staging_root(&self) -> PathBuf { self.root.join(STAGING_DIR) }

    /// Directory that receives the artifact for `target`.
    pub fn project_dir(&self, target: &TargetKey, sub_path: Option<&str>) -> Result<PathBuf, AgentError> {
        let mut dir = self.root.join(safe_segment(&target.node_id)?).join(safe_segment(&target.project_id)?);
        if let Some(sub) = sub_path.filter(|s| !s.trim().is_empty()) {
            dir.push(safe_relative(sub)?);
        }
        Ok(dir)
    }

    pub fn actions(&self) -> Vec<AgentAction> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of chunk sessions currently staged.
    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn record(&self, target: &TargetKey, kind: ActionKind) {
        info!(key = %target, action = ?kind, "project action");
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(AgentAction {
                target: target.clone(),
                kind,
                at: Utc::now(),
            });
    }

    fn session(&self, manifest: &ChunkManifest) -> Result<Arc<StagingDir>, AgentError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(staging) = sessions.get(&manifest.session) {
            return Ok(Arc::clone(staging));
        }
        let dir = self.staging_root().join(safe_segment(&manifest.session)?);
        let staging = Arc::new(StagingDir::create(dir, safe_segment(&manifest.file_name)?)?);
        sessions.insert(manifest.session.clone(), Arc::clone(&staging));
        Ok(staging)
    }

    fn take_session(&self, session: &str) -> Option<Arc<StagingDir>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).remove(session)
    }

    async fn receive_whole(
        &self,
        path: PathBuf,
        file_name: &str,
        digest: String,
    ) -> Result<(PathBuf, Holder), AgentError> {
        let workspace = Workspace::new(self.staging_root().join(Uuid::new_v4().simple().to_string()))?;
        let staged = workspace.file(safe_segment(file_name)?);

        let dest = staged.clone();
        tokio::task::spawn_blocking(move || copy_verified(&path, &dest, &digest))
            .await
            .map_err(|e| AgentError::Task(e.to_string()))??;

        let holder: Holder = Box::new(workspace);
        Ok((staged, holder))
    }

    async fn receive_chunked(&self, manifest: &ChunkManifest) -> Result<(PathBuf, Holder), AgentError> {
        let staging = self
            .take_session(&manifest.session)
            .ok_or_else(|| AgentError::UnknownSession(manifest.session.clone()))?;
        let merged = staging.path().join(safe_segment(&manifest.file_name)?);

        self.merger
            .with_chunk_size(manifest.chunk_size)
            .rebuild_verified(
                staging.path(),
                &manifest.file_name,
                manifest.file_len,
                &manifest.digest,
                &merged,
            )
            .await?;

        let holder: Holder = Box::new(staging);
        Ok((merged, holder))
    }
}

/// Keeps a staging area alive until the artifact has been placed.
type Holder = Box<dyn Any + Send>;

fn safe_segment(s: &str) -> Result<&str, AgentError> {
    let mut components = Path::new(s).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !s.contains(['/', '\\']) => Ok(s),
        _ => Err(AgentError::InvalidPath(s.to_string())),
    }
}

fn safe_relative(s: &str) -> Result<PathBuf, AgentError> {
    let path = Path::new(s.trim_matches('/'));
    if path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir)) {
        Ok(path.to_path_buf())
    } else {
        Err(AgentError::InvalidPath(s.to_string()))
    }
}

fn copy_verified(source: &Path, dest: &Path, digest: &str) -> Result<(), AgentError> {
    let expected = fleetcast_verify::decode_digest(digest).map_err(|e| AgentError::Integrity(e.to_string()))?;
    let input = File::open(source).map_err(|e| AgentError::io(source, e))?;
    let mut output = File::create(dest).map_err(|e| AgentError::io(dest, e))?;

    let mut reader = VerifiedReader::new(input, Sha256Hasher::new());
    std::io::copy(&mut reader, &mut output).map_err(|e| AgentError::io(dest, e))?;
    output.sync_all().map_err(|e| AgentError::io(dest, e))?;

    reader.finish(&expected).map_err(|e| AgentError::Integrity(e.to_string()))
}

fn is_archive(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    [".tar", ".tar.gz", ".tgz"].iter().any(|ext| lower.ends_with(ext))
}

/// Unpack a tar or gzipped tar into `dest`, refusing entries that would land
/// outside it.
fn unpack(archive: &Path, dest: &Path) -> Result<usize, AgentError> {
    let file = File::open(archive).map_err(|e| AgentError::io(archive, e))?;
    let lower = archive.to_string_lossy().to_ascii_lowercase();
    let reader: Box<dyn std::io::Read> = if lower.ends_with(".gz") || lower.ends_with(".tgz") {
        Box::new(flate2::read::GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut archive_reader = tar::Archive::new(reader);
    let entries = archive_reader.entries().map_err(|e| AgentError::io(archive, e))?;
    let mut count = 0;
    for entry in entries {
        let mut entry = entry.map_err(|e| AgentError::io(archive, e))?;
        let entry_path = entry.path().map_err(|e| AgentError::io(archive, e))?.into_owned();
        let unpacked = entry.unpack_in(dest).map_err(|e| AgentError::io(dest, e))?;
        if !unpacked {
            return Err(AgentError::InvalidPath(entry_path.display().to_string()));
        }
        count += 1;
    }
    Ok(count)
}

struct Placement<'a> {
    artifact:   &'a Path,
    file_name:  &'a str,
    digest:     &'a str,
    project:    &'a Path,
    request:    &'a DeliveryRequest,
}

/// Clear-old, then unpack or move the verified artifact into the project
/// directory and stamp the release marker.
fn place(p: Placement<'_>) -> Result<String, AgentError> {
    ensure_dir(p.project)?;
    if p.request.clear_old {
        let removed = clear_dir(p.project)?;
        debug!(project = %p.project.display(), removed, "cleared old files");
    }

    let detail = if p.request.unpack && is_archive(p.file_name) {
        let entries = unpack(p.artifact, p.project)?;
        format!("unpacked {entries} entries of {} into {}", p.file_name, p.project.display())
    } else {
        let dest = p.project.join(p.file_name);
        promote(p.artifact, &dest)?;
        format!("placed {} at {}", p.file_name, dest.display())
    };

    let marker = ReleaseMarker {
        job_id:       p.request.job_id.as_str(),
        file_name:    p.file_name,
        digest:       p.digest,
        delivered_at: Utc::now(),
    };
    let json = serde_json::to_vec_pretty(&marker)
        .map_err(|e| AgentError::io(p.project.join(RELEASE_MARKER), e.into()))?;
    atomic_write(p.project.join(RELEASE_MARKER), &json, AtomicWriteOptions::new())?;

    Ok(detail)
}

impl TargetAgent for LocalAgent {
    async fn put_chunk(
        &self,
        _target: &TargetKey,
        manifest: &ChunkManifest,
        chunk: &ChunkDescriptor,
        data: Bytes,
    ) -> Result<(), AgentError> {
        let staging = self.session(manifest)?;
        staging.write_chunk(chunk, data).await?;
        Ok(())
    }

    async fn deliver(
        &self,
        target: &TargetKey,
        request: &DeliveryRequest,
        payload: Payload,
    ) -> Result<AgentReply, AgentError> {
        let project = self.project_dir(target, request.sub_path.as_deref())?;

        if request.stop_before_upload {
            self.record(target, ActionKind::Stop);
        }

        let (file_name, digest, (artifact, holder)) = match payload {
            Payload::Whole {
                path,
                file_name,
                digest,
            } => {
                let received = self.receive_whole(path, &file_name, digest.clone()).await?;
                (file_name, digest, received)
            }
            Payload::Chunked(manifest) => {
                let received = self.receive_chunked(&manifest).await;
                if received.is_err() {
                    warn!(key = %target, session = %manifest.session, "discarding chunk session");
                }
                (manifest.file_name, manifest.digest, received?)
            }
        };

        let after_action = request.after_action;
        let request = request.clone();
        let detail = tokio::task::spawn_blocking(move || {
            let detail = place(Placement {
                artifact:  &artifact,
                file_name: &file_name,
                digest:    &digest,
                project:   &project,
                request:   &request,
            });
            drop(holder);
            detail
        })
        .await
        .map_err(|e| AgentError::Task(e.to_string()))??;

        if after_action == AfterAction::Restart {
            self.record(target, ActionKind::Restart);
        }
        Ok(AgentReply::ok(detail))
    }

    async fn abort(&self, target: &TargetKey, session: &str) {
        if self.take_session(session).is_some() {
            debug!(key = %target, session, "chunk session discarded");
        }
    }
}
