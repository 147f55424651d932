// src/repobuild/signing.rs
//! Package and metadata signing
//!
//! [`FileSigner`] picks the signing key and auth token for a job and hands
//! the request to a [`Signer`]. The default signer shells out to the notary
//! client; tests substitute their own.

use crate::config::{PackageFormat, SigningConfig};
use crate::error::{Error, Result};
use crate::version::ReleaseVersion;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{info, warn};

/// Comment sent with every signing request unless configured
pub const DEFAULT_COMMENT: &str = "pkgrelay package signing";

/// One file to sign
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub path: PathBuf,
    /// Extension of the detached signature for non-package files
    pub archive_ext: String,
    /// Replace the file with its signed version instead of writing a sibling
    pub overwrite: bool,
    pub key_name: String,
    pub token: String,
}

/// Out-of-process signing capability
pub trait Signer: Send + Sync {
    /// Sign a file, returning the signer's combined output
    fn sign(&self, request: &SignRequest) -> Result<String>;
}

/// Signer backed by the notary client command
#[derive(Debug, Clone)]
pub struct NotaryClient {
    command: String,
    notary_url: Option<String>,
    comment: String,
}

impl NotaryClient {
    pub fn new(command: &str, notary_url: Option<&str>, comment: Option<&str>) -> Self {
        Self {
            command: command.to_string(),
            notary_url: notary_url.map(str::to_string),
            comment: comment.unwrap_or(DEFAULT_COMMENT).to_string(),
        }
    }

    pub fn from_config(config: &SigningConfig) -> Self {
        Self::new(
            &config.client,
            config.notary_url.as_deref(),
            config.comment.as_deref(),
        )
    }

    fn args(&self, request: &SignRequest, file_name: &str) -> Vec<String> {
        let mut args = vec![
            "--key-name".to_string(),
            request.key_name.clone(),
            "--auth-token".to_string(),
            request.token.clone(),
            "--comment".to_string(),
            self.comment.clone(),
        ];
        if let Some(url) = &self.notary_url {
            args.push("--notary-url".to_string());
            args.push(url.clone());
        }
        args.extend([
            "--archive-file-ext".to_string(),
            request.archive_ext.clone(),
            "--outputs".to_string(),
            "sig".to_string(),
        ]);
        if request.overwrite {
            args.push("--package-file-suffix".to_string());
            args.push(String::new());
        }
        args.push(file_name.to_string());
        args
    }
}

impl Signer for NotaryClient {
    fn sign(&self, request: &SignRequest) -> Result<String> {
        let file_name = request
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::SigningFailed(format!("{} has no file name", request.path.display()))
            })?;
        let dir = match request.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let args = self.args(request, &file_name);
        let printable = format!("{} {}", self.command, args.join(" "));
        info!("Running notary command: {}", redact(&printable, &request.token));

        let output = Command::new(&self.command)
            .args(&args)
            .current_dir(&dir)
            .output()
            .map_err(|e| Error::SigningFailed(format!("Failed to run {}: {}", self.command, e)))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();

        if !output.status.success() {
            warn!(
                "Error signing file {}: {} ({})",
                request.path.display(),
                output.status,
                combined
            );
            return Err(Error::SigningFailed(format!(
                "Notary client failed for {}: {} ({})",
                request.path.display(),
                output.status,
                combined
            )));
        }

        info!("Signed file {} ({})", request.path.display(), combined);
        Ok(combined)
    }
}

/// Replace every occurrence of `secret` with `XXXXX`
pub fn redact(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        text.to_string()
    } else {
        text.replace(secret, "XXXXX")
    }
}

/// Key and token selection for one job
pub struct FileSigner {
    config: SigningConfig,
    format: PackageFormat,
    release: ReleaseVersion,
    signer: Arc<dyn Signer>,
}

impl FileSigner {
    pub fn new(
        config: SigningConfig,
        format: PackageFormat,
        release: ReleaseVersion,
        signer: Arc<dyn Signer>,
    ) -> Self {
        Self {
            config,
            format,
            release,
            signer,
        }
    }

    /// Key name and auth token for this job's format and release series
    ///
    /// Listed legacy DEB series use the legacy key and token; everything
    /// else uses `server-<stable series>` and the default token.
    pub fn credentials(&self) -> Result<(String, String)> {
        let legacy = self.format == PackageFormat::Deb
            && self.config.is_legacy_series(&self.release.series());

        let (key_name, token, env) = if legacy {
            let key = self.config.legacy_key_name.clone().ok_or_else(|| {
                Error::ConfigError(format!(
                    "No legacy signing key configured for DEB series {}",
                    self.release.series()
                ))
            })?;
            (key, self.config.legacy_token.clone(), &self.config.legacy_token_env)
        } else {
            (
                format!("server-{}", self.release.stable_release_series()),
                self.config.token.clone(),
                &self.config.token_env,
            )
        };

        match token {
            Some(token) if !token.is_empty() => Ok((key_name, token)),
            _ => Err(Error::ConfigError(format!(
                "The notary auth token ({}) is not defined",
                env
            ))),
        }
    }

    /// Sign `path`
    ///
    /// With `overwrite`, the file is replaced by its signed version.
    /// Otherwise a stale `<path>.<archive_ext>` from an earlier run is
    /// removed first; failing to remove it is only a warning.
    pub fn sign_file(&self, path: &Path, archive_ext: &str, overwrite: bool) -> Result<()> {
        let (key_name, token) = self.credentials()?;

        if archive_ext.starts_with('.') {
            warn!(
                "Archive extension '{}' has a leading dot, which is almost certainly undesirable",
                archive_ext
            );
        }

        if overwrite {
            if !archive_ext.is_empty() {
                warn!(
                    "Overwrite requested together with archive extension '{}' for {}",
                    archive_ext,
                    path.display()
                );
            }
            info!("Overwriting {} with its signed version", path.display());
        } else {
            let stale = PathBuf::from(format!("{}.{}", path.display(), archive_ext));
            match fs::remove_file(&stale) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove stale signature {}: {}", stale.display(), e),
            }
        }

        let request = SignRequest {
            path: path.to_path_buf(),
            archive_ext: archive_ext.to_string(),
            overwrite,
            key_name,
            token,
        };
        self.signer
            .sign(&request)
            .map(|_| ())
            .map_err(|e| e.context(format!("signing {}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<SignRequest>>,
    }

    impl Signer for Recorder {
        fn sign(&self, request: &SignRequest) -> Result<String> {
            self.requests.lock().push(request.clone());
            Ok("ok".to_string())
        }
    }

    fn config() -> SigningConfig {
        SigningConfig {
            token: Some("secret-token".to_string()),
            legacy_token: Some("legacy-token".to_string()),
            legacy_key_name: Some("legacy-deb".to_string()),
            ..SigningConfig::default()
        }
    }

    fn file_signer(format: PackageFormat, version: &str, config: SigningConfig) -> (FileSigner, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let signer = FileSigner::new(
            config,
            format,
            ReleaseVersion::parse(version).unwrap(),
            recorder.clone(),
        );
        (signer, recorder)
    }

    #[test]
    fn test_series_key_selection() {
        let (signer, _) = file_signer(PackageFormat::Rpm, "4.3.0-rc1", config());
        assert_eq!(
            signer.credentials().unwrap(),
            ("server-4.4".to_string(), "secret-token".to_string())
        );
    }

    #[test]
    fn test_legacy_deb_key_selection() {
        let (signer, _) = file_signer(PackageFormat::Deb, "3.0.15", config());
        assert_eq!(
            signer.credentials().unwrap(),
            ("legacy-deb".to_string(), "legacy-token".to_string())
        );

        // Legacy series only applies to DEB
        let (signer, _) = file_signer(PackageFormat::Rpm, "3.0.15", config());
        assert_eq!(signer.credentials().unwrap().0, "server-3.0");
    }

    #[test]
    fn test_missing_token_fails_before_signing() {
        let config = SigningConfig {
            token: None,
            ..config()
        };
        let (signer, recorder) = file_signer(PackageFormat::Rpm, "4.2.1", config);
        let err = signer.sign_file(Path::new("/tmp/a.rpm"), "", true).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
        assert!(recorder.requests.lock().is_empty());
    }

    #[test]
    fn test_stale_signature_removed_without_overwrite() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("repomd.xml");
        let stale = dir.path().join("repomd.xml.asc");
        fs::write(&file, "<repomd/>").unwrap();
        fs::write(&stale, "old").unwrap();

        let (signer, recorder) = file_signer(PackageFormat::Rpm, "4.2.1", config());
        signer.sign_file(&file, "asc", false).unwrap();

        assert!(!stale.exists());
        let requests = recorder.requests.lock();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].overwrite);
        assert_eq!(requests[0].archive_ext, "asc");
        assert_eq!(requests[0].key_name, "server-4.2");
    }

    #[test]
    fn test_notary_args() {
        let client = NotaryClient::new("notary-client.py", Some("https://notary.example.com"), None);
        let request = SignRequest {
            path: PathBuf::from("/repo/a.rpm"),
            archive_ext: String::new(),
            overwrite: true,
            key_name: "server-4.2".to_string(),
            token: "t0k".to_string(),
        };
        let args = client.args(&request, "a.rpm");
        assert_eq!(args.last().map(String::as_str), Some("a.rpm"));
        assert!(args.windows(2).any(|w| w[0] == "--package-file-suffix" && w[1].is_empty()));
        assert!(args.windows(2).any(|w| w[0] == "--notary-url" && w[1] == "https://notary.example.com"));
    }

    #[test]
    fn test_redact() {
        assert_eq!(redact("--auth-token abc --x", "abc"), "--auth-token XXXXX --x");
        assert_eq!(redact("nothing", ""), "nothing");
    }
}
