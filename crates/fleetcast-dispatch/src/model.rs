//! Jobs, targets and their status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a distribution job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

    pub fn generate() -> Self { Self(Uuid::new_v4().simple().to_string()) }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self { Self::new(id) }
}

/// A (node, project) pair that receives the artifact.
///
/// Node and project ids compare case-insensitively when matching a reported
/// result to its link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetKey {
    pub node_id:    String,
    pub project_id: String,
}

impl TargetKey {
    pub fn new(node_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            node_id:    node_id.into(),
            project_id: project_id.into(),
        }
    }

    pub fn matches(&self, other: &TargetKey) -> bool {
        self.node_id.eq_ignore_ascii_case(&other.node_id)
            && self.project_id.eq_ignore_ascii_case(&other.project_id)
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node_id, self.project_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid target '{0}', expected 'node:project'")]
pub struct ParseTargetError(pub String);

impl FromStr for TargetKey {
    type Err = ParseTargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((node, project)) if !node.trim().is_empty() && !project.trim().is_empty() => {
                Ok(Self::new(node.trim(), project.trim()))
            }
            _ => Err(ParseTargetError(s.to_string())),
        }
    }
}

/// Delivery status of one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Waiting,
    InProgress,
    Ok,
    Fail,
    Cancelled,
}

impl Status {
    pub fn is_terminal(self) -> bool { matches!(self, Self::Ok | Self::Fail | Self::Cancelled) }

    /// Stable numeric code used by the external store.
    pub fn code(self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::InProgress => 1,
            Self::Ok => 2,
            Self::Fail => 3,
            Self::Cancelled => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Waiting,
            1 => Self::InProgress,
            2 => Self::Ok,
            3 => Self::Fail,
            4 => Self::Cancelled,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::InProgress => "in_progress",
            Self::Ok => "ok",
            Self::Fail => "fail",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

/// Job-level status, always derived from the targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    Running,
    #[default]
    Done,
}

impl AggregateStatus {
    /// `Running` iff any target is in progress.
    pub fn derive<'a>(statuses: impl IntoIterator<Item = &'a Status>) -> Self {
        if statuses.into_iter().any(|s| *s == Status::InProgress) {
            Self::Running
        } else {
            Self::Done
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Running => 1,
            Self::Done => 2,
        }
    }
}

impl fmt::Display for AggregateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Done => "done",
        })
    }
}

/// What the target does with the project after a successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AfterAction {
    #[default]
    None,
    Restart,
}

impl FromStr for AfterAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "no" => Ok(Self::None),
            "restart" => Ok(Self::Restart),
            other => Err(format!("unknown after action '{other}'")),
        }
    }
}

/// Per-target state inside a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetLink {
    pub key:             TargetKey,
    pub status:          Status,
    pub result:          Option<String>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl TargetLink {
    pub fn new(key: TargetKey) -> Self {
        Self {
            key,
            status: Status::Waiting,
            result: None,
            last_attempt_at: None,
        }
    }
}

/// A request to deliver one artifact to a fixed set of targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionJob {
    pub id:                 JobId,
    pub workspace_id:       Option<String>,
    pub targets:            Vec<TargetLink>,
    pub after_action:       AfterAction,
    pub unpack:             bool,
    pub clear_old:          bool,
    pub stop_before_upload: bool,
    /// Sub-directory under each project directory that receives the artifact.
    pub sub_path:           Option<String>,
    /// Pause between two task submissions.
    pub throttle_ms:        u64,
    pub principal:          Option<String>,
    pub status:             AggregateStatus,
}

impl DistributionJob {
    pub fn builder(id: impl Into<JobId>) -> DistributionJobBuilder { DistributionJobBuilder::new(id.into()) }

    pub fn target(&self, key: &TargetKey) -> Option<&TargetLink> {
        self.targets.iter().find(|t| t.key.matches(key))
    }

    /// Recompute the aggregate from the current target statuses.
    pub fn refresh_status(&mut self) -> AggregateStatus {
        self.status = AggregateStatus::derive(self.targets.iter().map(|t| &t.status));
        self.status
    }

    pub fn count(&self, status: Status) -> usize {
        self.targets.iter().filter(|t| t.status == status).count()
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self { Self(id) }
}

#[derive(Debug, Clone)]
pub struct DistributionJobBuilder {
    job: DistributionJob,
}

impl DistributionJobBuilder {
    fn new(id: JobId) -> Self {
        Self {
            job: DistributionJob {
                id,
                workspace_id: None,
                targets: Vec::new(),
                after_action: AfterAction::None,
                unpack: false,
                clear_old: false,
                stop_before_upload: false,
                sub_path: None,
                throttle_ms: 0,
                principal: None,
                status: AggregateStatus::Done,
            },
        }
    }

    #[must_use]
    pub fn target(mut self, key: TargetKey) -> Self {
        self.job.targets.push(TargetLink::new(key));
        self
    }

    #[must_use]
    pub fn targets(mut self, keys: impl IntoIterator<Item = TargetKey>) -> Self {
        self.job.targets.extend(keys.into_iter().map(TargetLink::new));
        self
    }

    #[must_use]
    pub fn workspace_id(mut self, workspace_id: impl Into<String>) -> Self {
        self.job.workspace_id = Some(workspace_id.into());
        self
    }

    #[must_use]
    pub fn after_action(mut self, after_action: AfterAction) -> Self {
        self.job.after_action = after_action;
        self
    }

    #[must_use]
    pub fn unpack(mut self, unpack: bool) -> Self {
        self.job.unpack = unpack;
        self
    }

    #[must_use]
    pub fn clear_old(mut self, clear_old: bool) -> Self {
        self.job.clear_old = clear_old;
        self
    }

    #[must_use]
    pub fn stop_before_upload(mut self, stop: bool) -> Self {
        self.job.stop_before_upload = stop;
        self
    }

    #[must_use]
    pub fn sub_path(mut self, sub_path: impl Into<String>) -> Self {
        self.job.sub_path = Some(sub_path.into());
        self
    }

    #[must_use]
    pub fn throttle_ms(mut self, throttle_ms: u64) -> Self {
        self.job.throttle_ms = throttle_ms;
        self
    }

    #[must_use]
    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.job.principal = Some(principal.into());
        self
    }

    pub fn build(self) -> DistributionJob { self.job }
}

/// One delivery attempt of one target, as kept by the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id:           String,
    pub job_id:       JobId,
    pub workspace_id: Option<String>,
    pub target:       TargetKey,
    pub status:       Status,
    pub result:       Option<String>,
    pub started_at:   DateTime<Utc>,
    pub ended_at:     Option<DateTime<Utc>>,
    pub principal:    Option<String>,
}

impl AuditRecord {
    pub fn open(
        job: &DistributionJob,
        target: &TargetKey,
        status: Status,
        result: Option<String>,
        principal: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            job_id: job.id.clone(),
            workspace_id: job.workspace_id.clone(),
            target: target.clone(),
            status,
            result,
            started_at: Utc::now(),
            ended_at: None,
            principal,
        }
    }

    pub fn close(&mut self, status: Status, result: Option<String>) {
        self.status = status;
        self.result = result;
        self.ended_at = Some(Utc::now());
    }

    pub fn is_closed(&self) -> bool { self.ended_at.is_some() }
}
