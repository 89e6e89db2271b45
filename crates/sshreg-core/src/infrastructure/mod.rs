//! Infrastructure layer
//!
//! Adapters for systems outside the registry: git remotes and the clipboard.
//! The local key source lives with the capture pipeline and is re-exported
//! here alongside the other collaborators.

pub mod clipboard;
pub mod git;

pub use crate::capture::{LocalKeySource, SshDirectory};
pub use clipboard::{Clipboard, SystemClipboard};
pub use git::{GitSync, VersionControlSync, github_api_url};
