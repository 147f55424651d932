// src/repobuild/deb.rs
//! DEB (apt) repository builder

use super::builder::{RepoBuilder, run_tool};
use super::staging::PackageStager;
use crate::error::{Error, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub const DPKG_SCANPACKAGES: &str = "dpkg-scanpackages";
pub const APT_FTPARCHIVE: &str = "apt-ftparchive";

/// Stages `.deb` files into `<location>/<component>/binary-<arch>`,
/// regenerates the `Packages` index and the component `Release` file
pub struct DebRepoBuilder {
    arch: String,
    component: String,
    stager: Arc<PackageStager>,
    scan_packages: String,
    ftparchive: String,
    lock: Mutex<()>,
}

impl DebRepoBuilder {
    pub fn new(arch: &str, component: &str, stager: Arc<PackageStager>) -> Self {
        Self {
            arch: arch.to_string(),
            component: component.to_string(),
            stager,
            scan_packages: DPKG_SCANPACKAGES.to_string(),
            ftparchive: APT_FTPARCHIVE.to_string(),
            lock: Mutex::new(()),
        }
    }

    /// Override the index tools (`dpkg-scanpackages`, `apt-ftparchive`)
    pub fn with_tools(mut self, scan_packages: &str, ftparchive: &str) -> Self {
        self.scan_packages = scan_packages.to_string();
        self.ftparchive = ftparchive.to_string();
        self
    }

    fn write_file(path: &Path, data: &[u8]) -> Result<()> {
        fs::write(path, data)
            .map_err(|e| Error::IoError(format!("Failed to write {}: {}", path.display(), e)))
    }

    fn write_gzip(path: &Path, data: &[u8]) -> Result<()> {
        let file = fs::File::create(path)
            .map_err(|e| Error::IoError(format!("Failed to create {}: {}", path.display(), e)))?;
        let mut encoder = GzEncoder::new(file, Compression::best());
        encoder
            .write_all(data)
            .and_then(|_| encoder.finish().map(|_| ()))
            .map_err(|e| Error::IoError(format!("Failed to write {}: {}", path.display(), e)))
    }
}

impl RepoBuilder for DebRepoBuilder {
    fn inject_package(&self, local: &Path, location: &str) -> Result<PathBuf> {
        let binary_dir = local
            .join(location)
            .join(&self.component)
            .join(format!("binary-{}", self.arch));
        self.stager.stage_packages(&binary_dir)?;
        Ok(binary_dir)
    }

    fn rebuild_repo(&self, changed: &Path) -> Result<()> {
        let component_dir = changed.parent().ok_or_else(|| {
            Error::BuildFailed(format!("{} has no component directory", changed.display()))
        })?;

        {
            let _guard = self.lock.lock();
            info!("Regenerating Packages index in {}", changed.display());

            let packages = run_tool(&self.scan_packages, &["--multiversion", "."], changed)?;
            Self::write_file(&changed.join("Packages"), &packages)?;
            Self::write_gzip(&changed.join("Packages.gz"), &packages)?;

            let release = run_tool(&self.ftparchive, &["release", "."], component_dir)?;
            Self::write_file(&component_dir.join("Release"), &release)?;
        }

        self.stager
            .signer()
            .sign_file(&component_dir.join("Release"), "gpg", false)?;
        info!("Rebuilt DEB repository in {}", component_dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PackageFormat, SigningConfig};
    use crate::repobuild::signing::{FileSigner, SignRequest, Signer};
    use crate::version::ReleaseVersion;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<SignRequest>>,
    }

    impl Signer for Recorder {
        fn sign(&self, request: &SignRequest) -> Result<String> {
            self.requests.lock().push(request.clone());
            Ok(String::new())
        }
    }

    fn deb_builder(packages: Vec<PathBuf>, recorder: Arc<Recorder>) -> DebRepoBuilder {
        let config = SigningConfig {
            token: Some("t".to_string()),
            ..SigningConfig::default()
        };
        let signer = FileSigner::new(
            config,
            PackageFormat::Deb,
            ReleaseVersion::parse("4.2.1").unwrap(),
            recorder,
        );
        let stager = PackageStager::new(PackageFormat::Deb, packages, Arc::new(signer));
        DebRepoBuilder::new("amd64", "main", Arc::new(stager))
    }

    #[test]
    fn test_inject_stages_under_component() {
        let build = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let deb = build.path().join("server_4.2.1_amd64.deb");
        fs::write(&deb, b"deb").unwrap();

        let changed = deb_builder(vec![deb], Arc::new(Recorder::default()))
            .inject_package(local.path(), "4.2")
            .unwrap();

        assert_eq!(changed, local.path().join("4.2/main/binary-amd64"));
        assert!(changed.join("server_4.2.1_amd64.deb").exists());
    }

    #[test]
    fn test_rebuild_writes_indexes_and_signs_release() {
        let local = TempDir::new().unwrap();
        let changed = local.path().join("4.2/main/binary-amd64");
        fs::create_dir_all(&changed).unwrap();

        let recorder = Arc::new(Recorder::default());
        let builder = deb_builder(Vec::new(), recorder.clone()).with_tools("echo", "echo");
        builder.rebuild_repo(&changed).unwrap();

        let packages = fs::read(changed.join("Packages")).unwrap();
        assert_eq!(packages, b"--multiversion .\n");

        let mut unzipped = Vec::new();
        GzDecoder::new(fs::File::open(changed.join("Packages.gz")).unwrap())
            .read_to_end(&mut unzipped)
            .unwrap();
        assert_eq!(unzipped, packages);

        let release = local.path().join("4.2/main/Release");
        assert_eq!(fs::read_to_string(&release).unwrap(), "release .\n");

        let requests = recorder.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, release);
        assert_eq!(requests[0].archive_ext, "gpg");
    }

    #[test]
    fn test_failing_tool_is_build_error() {
        let local = TempDir::new().unwrap();
        let changed = local.path().join("main/binary-amd64");
        fs::create_dir_all(&changed).unwrap();
        let builder = deb_builder(Vec::new(), Arc::new(Recorder::default())).with_tools("false", "echo");
        assert!(matches!(
            builder.rebuild_repo(&changed),
            Err(Error::BuildFailed(_))
        ));
    }
}
