//! Deploy command

use std::path::Path;

use crate::deploy::{DeployReport, deploy_keys};
use crate::error::{Error, Result};
use crate::keys::FingerprintId;

use super::Workspace;
use super::keys::resolve_all;

/// Deploy the selected keys (or every key with `all`) to `target`
///
/// The configured deploy target is used when `target` is `None`.
pub fn deploy(
    ws: &Workspace,
    selectors: &[String],
    all: bool,
    target: Option<&Path>,
) -> Result<DeployReport> {
    let registry = ws.store().registry();
    let selected: Vec<FingerprintId> = if all {
        registry
            .records()
            .iter()
            .map(|r| r.fingerprint().clone())
            .collect()
    } else {
        resolve_all(registry, selectors)?
    };

    if selected.is_empty() {
        return Err(Error::InvalidInput("the registry has no keys to deploy".to_string()));
    }

    let target = target.unwrap_or_else(|| ws.deploy_target());
    deploy_keys(registry, target, &selected)
}
