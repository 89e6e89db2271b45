//! Git synchronization through libgit2
//!
//! The registry directory lives in a git repository. [`GitSync`] commits the
//! registry files, fast-forwards from the remote and pushes. It never merges or
//! rebases: diverged history is reported for the user to reconcile.

use std::path::{Path, PathBuf};
use std::time::Duration;

use git2::build::CheckoutBuilder;
use git2::{
    Cred, CredentialType, ErrorCode, FetchOptions, PushOptions, RemoteCallbacks, Repository,
    Signature,
};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Identity used when git has no `user.name`/`user.email` configured
const FALLBACK_NAME: &str = "sshreg";
const FALLBACK_EMAIL: &str = "sshreg@localhost";

/// Credential callback invocations before giving up
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

/// Timeout for the repository visibility probe
const VISIBILITY_TIMEOUT_SECS: u64 = 10;

/// Version-control operations the registry needs
pub trait VersionControlSync {
    /// Bring in remote changes
    fn pull(&self) -> Result<()>;

    /// Record the registry files; returns `false` when there was nothing to commit
    fn commit(&self, message: &str) -> Result<bool>;

    fn push(&self) -> Result<()>;

    /// Whether the remote is private. Unknown visibility counts as private.
    fn is_repository_private(&self) -> bool;
}

/// [`VersionControlSync`] over a local git repository
#[derive(Debug, Clone)]
pub struct GitSync {
    workdir: PathBuf,
    remote: String,
    files: Vec<PathBuf>,
}

impl GitSync {
    /// Open the repository containing `registry_root`
    ///
    /// `files` are the paths committed by [`VersionControlSync::commit`].
    pub fn open(
        registry_root: &Path,
        remote: impl Into<String>,
        files: impl IntoIterator<Item = PathBuf>,
    ) -> Result<Self> {
        let repo = Repository::discover(registry_root).map_err(|e| {
            Error::SyncFailed(format!(
                "{} is not inside a git repository: {}",
                registry_root.display(),
                e.message()
            ))
        })?;
        let workdir = repo
            .workdir()
            .ok_or_else(|| Error::SyncFailed("repository has no working directory".to_string()))?
            .canonicalize()?;

        let files = files
            .into_iter()
            .map(|file| relative_to(&workdir, &file))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            workdir,
            remote: remote.into(),
            files,
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn repo(&self) -> Result<Repository> {
        Repository::open(&self.workdir).map_err(sync_err)
    }

    /// URL of the configured remote, if it exists
    pub fn remote_url(&self) -> Result<Option<String>> {
        let repo = self.repo()?;
        match repo.find_remote(&self.remote) {
            Ok(remote) => Ok(remote.url().map(str::to_string)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(sync_err(e)),
        }
    }
}

impl VersionControlSync for GitSync {
    fn pull(&self) -> Result<()> {
        let repo = self.repo()?;
        let branch = current_branch(&repo)?;
        let mut remote = repo.find_remote(&self.remote).map_err(sync_err)?;

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(credential_callbacks());
        remote
            .fetch::<&str>(&[], Some(&mut fetch_options), None)
            .map_err(sync_err)?;

        let tracking = format!("refs/remotes/{}/{}", self.remote, branch);
        let upstream = match repo.find_reference(&tracking) {
            Ok(reference) => reference,
            Err(e) if e.code() == ErrorCode::NotFound => {
                debug!(branch = %branch, "Remote has no such branch, nothing to pull");
                return Ok(());
            }
            Err(e) => return Err(sync_err(e)),
        };
        let incoming = repo
            .reference_to_annotated_commit(&upstream)
            .map_err(sync_err)?;
        let (analysis, _) = repo.merge_analysis(&[&incoming]).map_err(sync_err)?;

        let local_ref = format!("refs/heads/{}", branch);
        if analysis.is_up_to_date() {
            debug!(branch = %branch, "Already up to date");
            return Ok(());
        }
        if analysis.is_unborn() {
            repo.reference(&local_ref, incoming.id(), false, "sshreg: initial pull")
                .map_err(sync_err)?;
        } else if analysis.is_fast_forward() {
            repo.find_reference(&local_ref)
                .and_then(|mut reference| {
                    reference.set_target(incoming.id(), "sshreg: fast-forward")
                })
                .map_err(sync_err)?;
        } else {
            return Err(Error::SyncFailed(format!(
                "local '{}' and {}/{} have diverged; reconcile them with git",
                branch, self.remote, branch
            )));
        }

        repo.set_head(&local_ref).map_err(sync_err)?;
        repo.checkout_head(Some(CheckoutBuilder::new().safe()))
            .map_err(sync_err)?;
        info!(branch = %branch, commit = %incoming.id(), "Pulled from remote");
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<bool> {
        let repo = self.repo()?;
        let mut index = repo.index().map_err(sync_err)?;
        for file in &self.files {
            if self.workdir.join(file).is_file() {
                index.add_path(file).map_err(sync_err)?;
            } else if index.get_path(file, 0).is_some() {
                index.remove_path(file).map_err(sync_err)?;
            }
        }
        index.write().map_err(sync_err)?;

        let tree_id = index.write_tree().map_err(sync_err)?;
        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit().map_err(sync_err)?),
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => None,
            Err(e) => return Err(sync_err(e)),
        };
        if parent.as_ref().is_some_and(|p| p.tree_id() == tree_id) {
            debug!("Registry unchanged since last commit");
            return Ok(false);
        }

        let tree = repo.find_tree(tree_id).map_err(sync_err)?;
        let signature = repo
            .signature()
            .or_else(|_| Signature::now(FALLBACK_NAME, FALLBACK_EMAIL))
            .map_err(sync_err)?;
        let parents: Vec<_> = parent.iter().collect();
        let id = repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
            .map_err(sync_err)?;

        info!(commit = %id, message = %message, "Committed registry");
        Ok(true)
    }

    fn push(&self) -> Result<()> {
        let repo = self.repo()?;
        let branch = current_branch(&repo)?;
        let mut remote = repo.find_remote(&self.remote).map_err(sync_err)?;

        let mut callbacks = credential_callbacks();
        callbacks.push_update_reference(|refname, status| match status {
            Some(reason) => Err(git2::Error::from_str(&format!(
                "remote rejected {}: {}",
                refname, reason
            ))),
            None => Ok(()),
        });
        let mut push_options = PushOptions::new();
        push_options.remote_callbacks(callbacks);

        let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);
        remote
            .push(&[refspec.as_str()], Some(&mut push_options))
            .map_err(sync_err)?;
        info!(remote = %self.remote, branch = %branch, "Pushed to remote");
        Ok(())
    }

    fn is_repository_private(&self) -> bool {
        let url = match self.remote_url() {
            Ok(Some(url)) => url,
            Ok(None) => return true,
            Err(e) => {
                warn!(error = %e, "Cannot read remote URL, assuming private");
                return true;
            }
        };
        let Some(api_url) = github_api_url(&url) else {
            debug!(remote = %url, "Not a GitHub remote, assuming private");
            return true;
        };

        match probe_public(&api_url) {
            Ok(public) => !public,
            Err(e) => {
                warn!(error = %e, "Visibility check failed, assuming private");
                true
            }
        }
    }
}

/// GitHub API URL for a GitHub remote, `None` for any other host
pub fn github_api_url(remote_url: &str) -> Option<String> {
    let url = remote_url.trim();
    let path = url
        .strip_prefix("git@github.com:")
        .or_else(|| url.strip_prefix("ssh://git@github.com/"))
        .or_else(|| url.strip_prefix("https://github.com/"))
        .or_else(|| url.strip_prefix("http://github.com/"))?;
    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);

    let mut parts = path.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty() => {
            Some(format!("https://api.github.com/repos/{}/{}", owner, repo))
        }
        _ => None,
    }
}

/// Anonymous GET against the API; a 200 means anyone can read the repository
fn probe_public(api_url: &str) -> std::result::Result<bool, reqwest::Error> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("sshreg/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(VISIBILITY_TIMEOUT_SECS))
        .build()?;
    let status = client.get(api_url).send()?.status();
    debug!(url = %api_url, status = %status, "Visibility probe");
    Ok(status == reqwest::StatusCode::OK)
}

fn credential_callbacks<'a>() -> RemoteCallbacks<'a> {
    let mut attempts = 0;
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |url, username, allowed| {
        attempts += 1;
        if attempts > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::from_str("authentication failed"));
        }
        if allowed.contains(CredentialType::SSH_KEY) {
            return Cred::ssh_key_from_agent(username.unwrap_or("git"));
        }
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            let config = git2::Config::open_default()?;
            return Cred::credential_helper(&config, url, username);
        }
        Cred::default()
    });
    callbacks
}

fn current_branch(repo: &Repository) -> Result<String> {
    let head = repo.find_reference("HEAD").map_err(sync_err)?;
    head.symbolic_target()
        .and_then(|target| target.strip_prefix("refs/heads/"))
        .map(str::to_string)
        .ok_or_else(|| Error::SyncFailed("HEAD is detached; check out a branch".to_string()))
}

fn relative_to(workdir: &Path, file: &Path) -> Result<PathBuf> {
    let parent = match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.canonicalize()?,
        _ => std::env::current_dir()?.canonicalize()?,
    };
    let name = file
        .file_name()
        .ok_or_else(|| Error::InvalidInput(format!("{} is not a file path", file.display())))?;
    parent
        .join(name)
        .strip_prefix(workdir)
        .map(Path::to_path_buf)
        .map_err(|_| {
            Error::SyncFailed(format!(
                "{} is outside the repository at {}",
                file.display(),
                workdir.display()
            ))
        })
}

fn sync_err(e: git2::Error) -> Error {
    Error::SyncFailed(e.message().to_string())
}
