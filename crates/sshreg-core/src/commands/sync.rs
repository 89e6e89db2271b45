//! Sync command: pull, commit and push the registry repository

use serde::Serialize;
use tracing::{info, warn};

use super::Workspace;
use crate::error::{Error, Result};
use crate::infrastructure::VersionControlSync;

/// Commit message used when none is given
pub const DEFAULT_SYNC_MESSAGE: &str = "Manual sync";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub pulled: bool,
    pub committed: bool,
    pub pushed: bool,
}

/// Push unless the remote is public
///
/// With `check_visibility` off, or `allow_public` on, the push is unconditional.
pub fn push_checked(
    vcs: &dyn VersionControlSync,
    check_visibility: bool,
    allow_public: bool,
) -> Result<()> {
    if check_visibility && !allow_public && !vcs.is_repository_private() {
        warn!("Refusing to push registry to a public repository");
        return Err(Error::SyncFailed(
            "the remote repository is public; refusing to publish the registry \
             (pass --allow-public to override)"
                .to_string(),
        ));
    }
    vcs.push()
}

/// Pull remote changes, reload the registry, then commit and push it
pub fn sync(ws: &mut Workspace, message: Option<&str>, allow_public: bool) -> Result<SyncReport> {
    let message = message
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_SYNC_MESSAGE)
        .to_string();
    let check_visibility = ws.config().sync.check_visibility;
    let mut report = SyncReport::default();

    ws.vcs()?.pull()?;
    report.pulled = true;
    ws.store_mut().reload()?;

    let vcs = ws.vcs()?;
    report.committed = vcs.commit(&message)?;
    push_checked(vcs, check_visibility, allow_public)?;
    report.pushed = true;

    info!(committed = report.committed, "Sync complete");
    Ok(report)
}
