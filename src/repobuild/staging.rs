// src/repobuild/staging.rs
//! Staging of new packages into a repository tree

use super::signing::FileSigner;
use crate::catcher::Catcher;
use crate::config::PackageFormat;
use crate::error::{Error, Result};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Links a job's package files into staging directories
pub struct PackageStager {
    format: PackageFormat,
    packages: Vec<PathBuf>,
    signer: Arc<FileSigner>,
}

impl PackageStager {
    pub fn new(format: PackageFormat, packages: Vec<PathBuf>, signer: Arc<FileSigner>) -> Self {
        Self {
            format,
            packages,
            signer,
        }
    }

    pub fn packages(&self) -> &[PathBuf] {
        &self.packages
    }

    pub fn signer(&self) -> &FileSigner {
        &self.signer
    }

    /// Hard-link every package into `dest`
    ///
    /// Packages already present in `dest` are left alone. DEB globs also
    /// catch the build's `Packages` index files; anything without a `.deb`
    /// suffix is skipped. New RPMs are signed in place, in parallel, and
    /// all signing has finished when this returns.
    ///
    /// Returns the newly staged files.
    pub fn stage_packages(&self, dest: &Path) -> Result<Vec<PathBuf>> {
        let catcher = Catcher::new();
        let mut staged = Vec::new();

        for package in &self.packages {
            if self.format == PackageFormat::Deb
                && package.extension().is_none_or(|ext| ext != "deb")
            {
                continue;
            }

            if !dest.exists() {
                info!("Creating directory {}", dest.display());
                if let Err(e) = fs::create_dir_all(dest) {
                    catcher.add(Error::IoError(format!(
                        "Failed to create directory {}: {}",
                        dest.display(),
                        e
                    )));
                    continue;
                }
            }

            let Some(file_name) = package.file_name() else {
                catcher.add(Error::IoError(format!(
                    "Package path {} has no file name",
                    package.display()
                )));
                continue;
            };
            let mirror = dest.join(file_name);

            if mirror.exists() {
                info!("File {} is already staged", mirror.display());
                continue;
            }

            info!("Linking package {} into {}", package.display(), dest.display());
            match fs::hard_link(package, &mirror) {
                Ok(()) => staged.push(mirror),
                Err(e) => catcher.add(Error::IoError(format!(
                    "Failed to link package {} to {}: {}",
                    package.display(),
                    mirror.display(),
                    e
                ))),
            }
        }

        if self.format == PackageFormat::Rpm && !staged.is_empty() {
            let results: Vec<Result<()>> = staged
                .par_iter()
                .map(|file| self.signer.sign_file(file, "", true))
                .collect();
            catcher.extend(results);
        }

        if catcher.has_errors() {
            warn!(
                "Staging into {} finished with {} errors",
                dest.display(),
                catcher.len()
            );
        }
        catcher.resolve()?;
        Ok(staged)
    }
}
