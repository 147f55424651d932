// src/repobuild/rpm.rs
//! RPM (yum/dnf) repository builder

use super::builder::{RepoBuilder, run_tool};
use super::staging::PackageStager;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Metadata tool used unless overridden
pub const CREATEREPO: &str = "createrepo";

/// Stages RPMs into `<location>/<arch>/RPMS` and regenerates `repodata`
pub struct RpmRepoBuilder {
    arch: String,
    stager: Arc<PackageStager>,
    createrepo: String,
    // Serializes createrepo runs across repositories
    lock: Mutex<()>,
}

impl RpmRepoBuilder {
    pub fn new(arch: &str, stager: Arc<PackageStager>) -> Self {
        Self {
            arch: arch.to_string(),
            stager,
            createrepo: CREATEREPO.to_string(),
            lock: Mutex::new(()),
        }
    }

    pub fn with_createrepo(mut self, command: &str) -> Self {
        self.createrepo = command.to_string();
        self
    }
}

impl RepoBuilder for RpmRepoBuilder {
    fn inject_package(&self, local: &Path, location: &str) -> Result<PathBuf> {
        let arch_dir = local.join(location).join(&self.arch);
        self.stager.stage_packages(&arch_dir.join("RPMS"))?;
        Ok(arch_dir)
    }

    fn rebuild_repo(&self, changed: &Path) -> Result<()> {
        let target = changed
            .to_str()
            .ok_or_else(|| Error::BuildFailed(format!("Non UTF-8 path {}", changed.display())))?;

        {
            let _guard = self.lock.lock();
            info!("Regenerating RPM metadata in {}", changed.display());
            run_tool(&self.createrepo, &["--update", "--database", target], changed)?;
        }

        let repomd = changed.join("repodata").join("repomd.xml");
        if !repomd.exists() {
            return Err(Error::BuildFailed(format!(
                "{} did not produce {}",
                self.createrepo,
                repomd.display()
            )));
        }

        self.stager.signer().sign_file(&repomd, "asc", false)?;
        info!("Rebuilt RPM repository in {}", changed.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PackageFormat, SigningConfig};
    use crate::repobuild::signing::{FileSigner, SignRequest, Signer};
    use crate::version::ReleaseVersion;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        requests: parking_lot::Mutex<Vec<SignRequest>>,
    }

    impl Signer for Recorder {
        fn sign(&self, request: &SignRequest) -> Result<String> {
            self.requests.lock().push(request.clone());
            Ok(String::new())
        }
    }

    fn builder(packages: Vec<PathBuf>, recorder: Arc<Recorder>) -> RpmRepoBuilder {
        let config = SigningConfig {
            token: Some("t".to_string()),
            ..SigningConfig::default()
        };
        let signer = FileSigner::new(
            config,
            PackageFormat::Rpm,
            ReleaseVersion::parse("4.3.0-rc1").unwrap(),
            recorder,
        );
        let stager = PackageStager::new(PackageFormat::Rpm, packages, Arc::new(signer));
        RpmRepoBuilder::new("x86_64", Arc::new(stager))
    }

    #[test]
    fn test_inject_stages_under_arch() {
        let build = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let rpm = build.path().join("server-4.3.0-rc1.x86_64.rpm");
        fs::write(&rpm, b"rpm").unwrap();

        let recorder = Arc::new(Recorder::default());
        let changed = builder(vec![rpm], recorder.clone())
            .inject_package(local.path(), "testing")
            .unwrap();

        assert_eq!(changed, local.path().join("testing/x86_64"));
        assert!(changed.join("RPMS/server-4.3.0-rc1.x86_64.rpm").exists());
        let requests = recorder.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].key_name, "server-4.4");
    }

    #[test]
    fn test_rebuild_signs_repomd() {
        let local = TempDir::new().unwrap();
        let changed = local.path().join("4.2/x86_64");
        fs::create_dir_all(changed.join("repodata")).unwrap();
        fs::write(changed.join("repodata/repomd.xml"), "<repomd/>").unwrap();

        let recorder = Arc::new(Recorder::default());
        let builder = builder(Vec::new(), recorder.clone()).with_createrepo("true");
        builder.rebuild_repo(&changed).unwrap();

        let requests = recorder.requests.lock();
        assert_eq!(requests[0].path, changed.join("repodata/repomd.xml"));
        assert_eq!(requests[0].archive_ext, "asc");
        assert!(!requests[0].overwrite);
    }

    #[test]
    fn test_rebuild_without_repomd_fails() {
        let local = TempDir::new().unwrap();
        let builder = builder(Vec::new(), Arc::new(Recorder::default())).with_createrepo("true");
        assert!(matches!(
            builder.rebuild_repo(local.path()),
            Err(Error::BuildFailed(_))
        ));
    }
}
