//! Push and pull tier files against the remote store

use chrono::{DateTime, Local, Utc};
use powertier_store::{
    AuditEvent, AuditEventType, StateStore, SyncRecord, TierFile, TieredStore,
};
use powertier_util::TierName;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{RemoteError, RemoteResult, RemoteStore};

/// Result of a successful push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Created { sha: String },
    Updated { sha: String },
}

impl PushOutcome {
    pub fn sha(&self) -> &str {
        match self {
            PushOutcome::Created { sha } | PushOutcome::Updated { sha } => sha,
        }
    }
}

/// Mirrors replicated tiers to a [`RemoteStore`].
///
/// Every write is conditioned on the SHA this host last saw, so a remote copy
/// changed by someone else is rejected instead of overwritten.
pub struct Replicator {
    remote: Arc<dyn RemoteStore>,
    store: Arc<dyn StateStore>,
    commit_message: String,
}

impl Replicator {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        store: Arc<dyn StateStore>,
        commit_message: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            store,
            commit_message: commit_message.into(),
        }
    }

    pub fn describe(&self) -> String {
        self.remote.describe()
    }

    /// Upload the tier's current file.
    ///
    /// Without a sync record the remote is read first: a missing object is
    /// created, an existing one is updated against its current SHA. With a
    /// record, the update is conditioned on the recorded SHA. The record only
    /// changes on success.
    pub async fn push(&self, tier: &TieredStore, now: DateTime<Local>) -> RemoteResult<PushOutcome> {
        let name = tier.name();
        let remote_path = remote_path_of(tier)?;
        let content = tier.to_bytes()?;

        let expected_sha = match self.store.get_sync_record(name)? {
            Some(record) if record.remote_path == remote_path => Some(record.last_known_sha),
            _ => self.remote.get(&remote_path).await?.map(|obj| obj.sha),
        };

        let message = format!(
            "{} {} - {}",
            self.commit_message,
            remote_path,
            now.with_timezone(&Utc).format("%Y-%m-%d %H:%M:%S UTC")
        );

        let result = self
            .remote
            .put(&remote_path, &content, expected_sha.as_deref(), &message)
            .await;

        let sha = match result {
            Ok(sha) => sha,
            Err(e) => {
                self.report_failure(name, &remote_path, &e);
                return Err(e);
            }
        };

        self.store.put_sync_record(&SyncRecord {
            tier: name.clone(),
            remote_path: remote_path.clone(),
            last_known_sha: sha.clone(),
            synced_at: now,
        })?;
        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::RemotePushed {
            tier: name.clone(),
            remote_path: remote_path.clone(),
            sha: sha.clone(),
        }));

        let outcome = match expected_sha {
            Some(_) => PushOutcome::Updated { sha },
            None => PushOutcome::Created { sha },
        };
        info!(
            tier = %name,
            remote_path = %remote_path,
            sha = %outcome.sha(),
            created = matches!(outcome, PushOutcome::Created { .. }),
            "Tier pushed"
        );
        Ok(outcome)
    }

    /// Replace the local tier file with the remote copy.
    ///
    /// `Ok(None)` when the remote has no object yet; the local file is left alone.
    pub async fn pull(
        &self,
        tier: &TieredStore,
        now: DateTime<Local>,
    ) -> RemoteResult<Option<TierFile>> {
        let name = tier.name();
        let remote_path = remote_path_of(tier)?;

        let Some(object) = self.remote.get(&remote_path).await? else {
            info!(tier = %name, remote_path = %remote_path, "No remote copy yet");
            return Ok(None);
        };

        let file = tier.replace_from_bytes(&object.content)?;
        self.store.put_sync_record(&SyncRecord {
            tier: name.clone(),
            remote_path: remote_path.clone(),
            last_known_sha: object.sha.clone(),
            synced_at: now,
        })?;
        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::RemotePulled {
            tier: name.clone(),
            remote_path: remote_path.clone(),
            sha: object.sha.clone(),
        }));

        info!(
            tier = %name,
            remote_path = %remote_path,
            sha = %object.sha,
            points = file.len(),
            "Tier pulled"
        );
        Ok(Some(file))
    }

    /// Forget the recorded SHA so the next push adopts whatever the remote holds.
    ///
    /// This is the operator's explicit choice to let the local copy win.
    pub fn reset(&self, tier: &TierName) -> RemoteResult<bool> {
        let existed = self.store.clear_sync_record(tier)?;
        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::SyncReset {
            tier: tier.clone(),
        }));
        warn!(tier = %tier, existed, "Sync record reset");
        Ok(existed)
    }

    fn report_failure(&self, tier: &TierName, remote_path: &str, e: &RemoteError) {
        if e.is_conflict() {
            error!(
                tier = %tier,
                remote_path = %remote_path,
                error = %e,
                "Remote copy changed since last sync; not overwriting. Run `powertierd sync-reset` to let the local copy win"
            );
            let _ = self.store.append_audit(AuditEvent::new(AuditEventType::RemoteConflict {
                tier: tier.clone(),
                remote_path: remote_path.to_string(),
                message: e.to_string(),
            }));
        } else {
            warn!(tier = %tier, remote_path = %remote_path, error = %e, "Push failed");
        }
    }
}

fn remote_path_of(tier: &TieredStore) -> RemoteResult<String> {
    tier.spec()
        .remote_path()
        .map(String::from)
        .ok_or_else(|| RemoteError::NotReplicated(tier.name().to_string()))
}
