// src/repobuild/builder.rs
//! Format-specific repository builders
//!
//! A [`RepoBuilder`] merges new packages into a downloaded repository tree
//! and regenerates its metadata. The job holds exactly one builder and
//! calls it once per remote repository, possibly from several threads.

use crate::config::PackageFormat;
use crate::error::{Error, Result};
use crate::store::path_to_key;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

pub trait RepoBuilder: Send + Sync {
    /// Stage the job's packages under `local` for the `location` subtree
    ///
    /// Returns the directory whose contents changed.
    fn inject_package(&self, local: &Path, location: &str) -> Result<PathBuf>;

    /// Regenerate (and sign) repository metadata for a changed directory
    fn rebuild_repo(&self, changed: &Path) -> Result<()>;
}

/// Local source and remote destination of a post-rebuild upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlan {
    pub source: PathBuf,
    /// Destination relative to the remote repository prefix
    pub component: String,
}

/// Decide what to upload after `changed` (under `local`) was rebuilt
///
/// DEB builders change a `binary-<arch>` directory, but the component above
/// it carries the release files, so the parent is uploaded. RPM builders
/// change the architecture directory itself.
pub fn upload_plan(format: PackageFormat, local: &Path, changed: &Path) -> Result<UploadPlan> {
    let relative = changed.strip_prefix(local).map_err(|_| {
        Error::BuildFailed(format!(
            "Changed path {} is outside the working directory {}",
            changed.display(),
            local.display()
        ))
    })?;

    match format {
        PackageFormat::Deb => {
            let source = changed.parent().unwrap_or(changed).to_path_buf();
            let component = relative.parent().map(path_to_key).unwrap_or_default();
            Ok(UploadPlan { source, component })
        }
        PackageFormat::Rpm => Ok(UploadPlan {
            source: changed.to_path_buf(),
            component: path_to_key(relative),
        }),
    }
}

/// Run an external metadata tool in `dir`, returning its stdout
pub(crate) fn run_tool(program: &str, args: &[&str], dir: &Path) -> Result<Vec<u8>> {
    debug!("Running {} {} in {}", program, args.join(" "), dir.display());

    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| Error::BuildFailed(format!("Failed to run {}: {}. Is it installed?", program, e)))?;

    if !output.status.success() {
        return Err(Error::BuildFailed(format!(
            "{} failed in {} ({}): {}",
            program,
            dir.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(output.stdout)
}
