//! Per-request workspaces on the host filesystem.
//!
//! Every request gets its own `run_<uuid>` directory inside the scratch
//! directory, holding the source file and, for compiled languages, the build
//! artifact. The directory is what gets bind-mounted into the container.
//! The runtime's container-id file sits next to it, outside the mount, so
//! the program cannot forge it.
//!
//! A `Workspace` is released exactly once: explicitly through
//! [`Workspace::release`] on normal paths, or from `Drop` when the owning
//! future is cancelled or unwinds.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::language::{BuildAndRun, LanguageProfile};

/// Path syntax of the host the daemon runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    /// Host and container share the POSIX namespace; paths pass through.
    Posix,
    /// Drive-letter paths, rewritten to `/<drive>/...` for the container.
    Windows,
}

impl PathStyle {
    /// Style of the current host.
    pub const fn host() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }
}

/// Translate a host path into the path the container sees.
///
/// Returns `None` for paths that cannot be translated losslessly: relative
/// paths, and Windows paths that are not `X:\...` with backslash separators
/// only.
pub fn host_path_to_execution_path(path: &str, style: PathStyle) -> Option<String> {
    match style {
        PathStyle::Posix => path.starts_with('/').then(|| path.to_string()),
        PathStyle::Windows => {
            let mut chars = path.chars();
            let drive = chars.next().filter(char::is_ascii_alphabetic)?;
            let rest = chars.as_str().strip_prefix(":\\")?;
            if rest.contains('/') {
                return None;
            }
            Some(format!("/{drive}/{}", rest.replace('\\', "/")))
        }
    }
}

/// Inverse of [`host_path_to_execution_path`].
pub fn execution_path_to_host_path(path: &str, style: PathStyle) -> Option<String> {
    match style {
        PathStyle::Posix => path.starts_with('/').then(|| path.to_string()),
        PathStyle::Windows => {
            let rest = path.strip_prefix('/')?;
            let mut chars = rest.chars();
            let drive = chars.next().filter(char::is_ascii_alphabetic)?;
            let tail = chars.as_str();
            let tail = if tail.is_empty() { "/" } else { tail };
            let tail = tail.strip_prefix('/')?;
            if tail.contains('\\') {
                return None;
            }
            Some(format!("{drive}:\\{}", tail.replace('/', "\\")))
        }
    }
}

/// Host paths materialized for one request.
#[derive(Debug)]
pub struct Workspace {
    run_id: String,
    root: PathBuf,
    source_path: PathBuf,
    artifact_path: Option<PathBuf>,
    cidfile_path: PathBuf,
    execution_root: String,
    owner: Option<(u32, u32)>,
    released: bool,
}

impl Workspace {
    /// Create the workspace directory and write `source` into it.
    ///
    /// The scratch directory is created if missing. The run directory is
    /// created with `create_dir`, so an existing directory is an error
    /// rather than a shared workspace.
    pub fn materialize(
        scratch_dir: &Path,
        profile: &LanguageProfile,
        source: &[u8],
    ) -> Result<Self> {
        std::fs::create_dir_all(scratch_dir).with_context(|| {
            format!("Failed to create scratch directory {}", scratch_dir.display())
        })?;

        let run_id = format!("run_{}", Uuid::new_v4().simple());
        let root = scratch_dir.join(&run_id);
        std::fs::create_dir(&root)
            .with_context(|| format!("Failed to create workspace {}", root.display()))?;

        let stem = profile.entry_point.as_deref().unwrap_or(&run_id);
        let source_path = root.join(format!("{stem}.{}", profile.source_extension));
        let artifact_path = match &profile.build_and_run {
            BuildAndRun::Interpret { .. } => None,
            BuildAndRun::Compile { .. } => Some(root.join(stem)),
            BuildAndRun::ClassPath { .. } => Some(root.join(format!("{stem}.class"))),
        };

        let cidfile_path = scratch_dir.join(format!("{run_id}.cid"));
        let owner = directory_owner(&root);

        // From here on `Drop` removes the directory if anything fails.
        let mut workspace = Self {
            run_id,
            root,
            source_path,
            artifact_path,
            cidfile_path,
            execution_root: String::new(),
            owner,
            released: false,
        };

        let root_str = workspace
            .root
            .to_str()
            .with_context(|| format!("Workspace path is not UTF-8: {}", workspace.root.display()))?;
        workspace.execution_root = host_path_to_execution_path(root_str, PathStyle::host())
            .with_context(|| format!("Cannot translate workspace path {root_str}"))?;

        std::fs::write(&workspace.source_path, source).with_context(|| {
            format!(
                "Failed to write source file {}",
                workspace.source_path.display()
            )
        })?;

        debug!(
            run_id = %workspace.run_id,
            source = %workspace.source_path.display(),
            bytes = source.len(),
            "Materialized workspace"
        );

        Ok(workspace)
    }

    /// Unique id of this workspace, also used to name its container.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Host directory holding the source and artifact.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path of the source file.
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Host path of the build artifact, for compiled languages.
    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact_path.as_deref()
    }

    /// Host path where the runtime records the id of the started container.
    /// It does not exist until the container has been created.
    pub fn cidfile_path(&self) -> &Path {
        &self.cidfile_path
    }

    /// `(uid, gid)` owning the workspace directory; the container runs as
    /// this user so everything it writes stays removable by the daemon.
    pub const fn owner(&self) -> Option<(u32, u32)> {
        self.owner
    }

    /// Workspace directory as seen inside the container.
    pub fn execution_root(&self) -> &str {
        &self.execution_root
    }

    /// Source file path as seen inside the container.
    pub fn execution_source(&self) -> String {
        self.execution_child(&self.source_path)
    }

    /// Artifact path as seen inside the container.
    pub fn execution_artifact(&self) -> Option<String> {
        self.artifact_path
            .as_deref()
            .map(|p| self.execution_child(p))
    }

    fn execution_child(&self, path: &Path) -> String {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        format!("{}/{name}", self.execution_root.trim_end_matches('/'))
    }

    /// Remove the artifact, the source and the workspace directory.
    ///
    /// Never fails: files already gone are fine, anything else is logged.
    pub fn release(mut self) {
        self.remove_all();
    }

    fn remove_all(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(artifact) = &self.artifact_path {
            remove_quietly(artifact, std::fs::remove_file(artifact));
        }
        remove_quietly(&self.source_path, std::fs::remove_file(&self.source_path));
        // Compilers may leave extra outputs (e.g. nested classes).
        remove_quietly(&self.root, std::fs::remove_dir_all(&self.root));
        remove_quietly(&self.cidfile_path, std::fs::remove_file(&self.cidfile_path));

        debug!(run_id = %self.run_id, "Released workspace");
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.remove_all();
    }
}

#[cfg(unix)]
fn directory_owner(path: &Path) -> Option<(u32, u32)> {
    use std::os::unix::fs::MetadataExt;

    std::fs::metadata(path).ok().map(|m| (m.uid(), m.gid()))
}

#[cfg(not(unix))]
const fn directory_owner(_path: &Path) -> Option<(u32, u32)> {
    None
}

fn remove_quietly(path: &Path, result: io::Result<()>) {
    if let Err(e) = result {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove workspace path");
        }
    }
}
