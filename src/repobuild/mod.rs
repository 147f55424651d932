// src/repobuild/mod.rs

//! Repository rebuild jobs
//!
//! A [`BuildJob`] merges a set of freshly built packages into every remote
//! repository of one [`RepositoryDefinition`]:
//!
//! 1. Open a bucket handle (a dry-run derivation when requested)
//! 2. For each remote repository, on its own thread with a cloned handle:
//!    download the package-location subtree, stage and sign the new
//!    packages, regenerate metadata and upload the changed subtree
//! 3. Join, then mark the job complete
//!
//! A failing repository never stops its siblings; every failure is recorded
//! in the job's error list.

mod builder;
mod deb;
mod rpm;
mod signing;
mod staging;
mod state;

pub use builder::{RepoBuilder, UploadPlan, upload_plan};
pub use deb::{APT_FTPARCHIVE, DPKG_SCANPACKAGES, DebRepoBuilder};
pub use rpm::{CREATEREPO, RpmRepoBuilder};
pub use signing::{DEFAULT_COMMENT, FileSigner, NotaryClient, SignRequest, Signer, redact};
pub use staging::PackageStager;
pub use state::{JobState, JobStatus, next_job_id};

use crate::config::{PackageFormat, RepositoryConfig, RepositoryDefinition};
use crate::error::{Error, Result};
use crate::store::{
    BackoffConfig, Bucket, HandleRegistry, Permission, StoreConnector, SyncOptions, join_key,
};
use crate::version::ReleaseVersion;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;
use tracing::{info, warn};

/// Job kind reported in [`JobStatus`]
pub const JOB_KIND: &str = "build-repo";

/// Serializable description of a rebuild, as submitted to a job runner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Name of a configured repository definition
    pub repo: String,
    pub version: String,
    /// Build architecture, mapped through the repository's architecture table
    pub arch: String,
    #[serde(default)]
    pub profile: Option<String>,
    /// Package paths or glob patterns
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
}

/// Expand package globs; patterns matching nothing are reported and dropped
pub fn expand_package_globs(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let matches = glob::glob(pattern)
            .map_err(|e| Error::ParseError(format!("Invalid package pattern '{}': {}", pattern, e)))?;

        let before = paths.len();
        for entry in matches {
            let path = entry.map_err(|e| {
                Error::IoError(format!("Failed to expand package pattern '{}': {}", pattern, e))
            })?;
            paths.push(path);
        }
        if paths.len() == before {
            warn!("Package pattern '{}' matched no files", pattern);
        }
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}

/// One repository rebuild run
pub struct BuildJob {
    id: String,
    distro: RepositoryDefinition,
    conf: Arc<RepositoryConfig>,
    dry_run: bool,
    release: ReleaseVersion,
    arch: String,
    profile: Option<String>,
    workspace: PathBuf,
    package_paths: Vec<PathBuf>,
    connector: Option<Arc<dyn StoreConnector>>,
    signer: Arc<dyn Signer>,
    builder: Option<Arc<dyn RepoBuilder>>,
    backoff: BackoffConfig,
    registry: HandleRegistry,
    state: JobState,
    running: AtomicBool,
}

impl BuildJob {
    /// Create a job for `distro`
    ///
    /// `arch` is the build architecture; it is mapped to the repository's
    /// naming. Fails if `version` is not a release version or no workspace
    /// directory can be determined.
    pub fn new(
        conf: Arc<RepositoryConfig>,
        distro: RepositoryDefinition,
        version: &str,
        arch: &str,
        profile: Option<&str>,
        packages: Vec<PathBuf>,
    ) -> Result<Self> {
        distro.validate()?;
        let release = ReleaseVersion::parse(version)?;
        let arch = distro.arch_for(arch);
        let workspace = conf.workspace_dir()?;

        Ok(Self {
            id: next_job_id(distro.format),
            workspace,
            signer: Arc::new(NotaryClient::from_config(&conf.signing)),
            distro,
            conf,
            dry_run: false,
            release,
            arch,
            profile: profile.map(str::to_string),
            package_paths: packages,
            connector: None,
            builder: None,
            backoff: BackoffConfig::default(),
            registry: HandleRegistry::new(),
            state: JobState::new(),
            running: AtomicBool::new(false),
        })
    }

    /// Create a job from a submitted description
    pub fn from_options(conf: Arc<RepositoryConfig>, options: &JobOptions) -> Result<Self> {
        let distro = conf.find_repo(&options.repo)?.clone();
        let packages = expand_package_globs(&options.packages)?;
        let job = Self::new(
            conf,
            distro,
            &options.version,
            &options.arch,
            options.profile.as_deref(),
            packages,
        )?;
        Ok(job.with_dry_run(options.dry_run))
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    /// Use this connector instead of one built from the store configuration
    pub fn with_connector(mut self, connector: Arc<dyn StoreConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = signer;
        self
    }

    /// Replace the format builder (staging and signing included)
    pub fn with_builder(mut self, builder: Arc<dyn RepoBuilder>) -> Self {
        self.builder = Some(builder);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Track bucket handles in a caller-owned registry
    pub fn with_registry(mut self, registry: HandleRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn distro(&self) -> &RepositoryDefinition {
        &self.distro
    }

    pub fn release(&self) -> &ReleaseVersion {
        &self.release
    }

    pub fn arch(&self) -> &str {
        &self.arch
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn package_paths(&self) -> &[PathBuf] {
        &self.package_paths
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    /// Subtree the job's packages are published to
    pub fn package_location(&self) -> String {
        self.release.package_location()
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    pub fn has_errors(&self) -> bool {
        self.state.has_errors()
    }

    pub fn errors(&self) -> Vec<String> {
        self.state.error_messages()
    }

    /// All errors joined by newlines, or `None` after a clean run
    pub fn error(&self) -> Option<String> {
        let errors = self.errors();
        if errors.is_empty() {
            None
        } else {
            Some(errors.join("\n"))
        }
    }

    /// Remote repositories a working directory was set up for
    pub fn working_dirs(&self) -> Vec<String> {
        self.state.working_dirs()
    }

    pub fn status(&self) -> JobStatus {
        self.state.status(&self.id, JOB_KIND)
    }

    /// Execute the job to completion
    ///
    /// Nothing is returned; inspect [`BuildJob::status`] afterwards. A job
    /// runs at most once; later calls log a warning and return.
    pub fn run(&self, deadline: Option<Instant>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Job {} has already been run", self.id);
            return;
        }

        self.state.mark_started();
        info!(
            "Starting {} for {} {} ({}) into '{}'{}",
            self.id,
            self.distro.name,
            self.release,
            self.arch,
            self.package_location(),
            if self.dry_run { " [dry run]" } else { "" }
        );

        self.execute(&SyncOptions::with_deadline(deadline));
        self.state.mark_complete();

        if self.has_errors() {
            warn!(
                "Encountered {} errors rebuilding and uploading repositories for {}; operation complete",
                self.state.error_count(),
                self.id
            );
        } else {
            info!("Completed rebuilding all repositories for {}", self.id);
        }
    }

    fn connector(&self) -> Result<Arc<dyn StoreConnector>> {
        match &self.connector {
            Some(connector) => Ok(Arc::clone(connector)),
            None => self.conf.store.connector(self.profile.as_deref()),
        }
    }

    fn open_bucket(&self) -> Result<Bucket> {
        let mut bucket = Bucket::new(&self.distro.bucket, self.connector()?, self.registry.clone());
        bucket.set_num_jobs(self.conf.store.jobs)?;
        bucket.set_num_retries(self.conf.store.retries)?;
        bucket.set_backoff(self.backoff);
        bucket
            .open()
            .map_err(|e| e.context(format!("opening bucket {}", self.distro.bucket)))?;
        Ok(bucket)
    }

    fn builder(&self) -> Arc<dyn RepoBuilder> {
        if let Some(builder) = &self.builder {
            return Arc::clone(builder);
        }

        let signer = Arc::new(FileSigner::new(
            self.conf.signing.clone(),
            self.distro.format,
            self.release.clone(),
            Arc::clone(&self.signer),
        ));
        let stager = Arc::new(PackageStager::new(
            self.distro.format,
            self.package_paths.clone(),
            signer,
        ));
        match self.distro.format {
            PackageFormat::Rpm => Arc::new(RpmRepoBuilder::new(&self.arch, stager)),
            PackageFormat::Deb => Arc::new(DebRepoBuilder::new(
                &self.arch,
                &self.distro.component,
                stager,
            )),
        }
    }

    fn execute(&self, options: &SyncOptions) {
        let mut base = match self.open_bucket() {
            Ok(bucket) => bucket,
            Err(e) => {
                self.state.add_error(e);
                return;
            }
        };

        let mut dry = None;
        if self.dry_run {
            match base.dry_run_clone() {
                Ok(mut clone) => match clone.open() {
                    Ok(()) => dry = Some(clone),
                    Err(e) => {
                        self.state.add_error(e.context(format!(
                            "opening bucket {} [dry run]",
                            self.distro.bucket
                        )));
                        base.close();
                        return;
                    }
                },
                Err(e) => {
                    self.state.add_error(e.context(format!(
                        "deriving dry-run bucket {}",
                        self.distro.bucket
                    )));
                    base.close();
                    return;
                }
            }
        }

        let bucket = dry.as_mut().unwrap_or(&mut base);
        bucket.set_permission(Permission::PublicRead);

        let builder = self.builder();
        let mut clones = Vec::with_capacity(self.distro.repos.len());
        for remote in &self.distro.repos {
            match bucket.try_clone() {
                Ok(clone) => {
                    self.state.add_working_dir(remote);
                    clones.push((remote.as_str(), clone));
                }
                Err(e) => self
                    .state
                    .add_error(e.context(format!("cloning bucket {} for {}", bucket.name(), remote))),
            }
        }

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(clones.len());
            for (i, (remote, mut clone)) in clones.into_iter().enumerate() {
                let builder = builder.as_ref();
                let spawned = thread::Builder::new()
                    .name(format!("pkgrelay-repo-{}", i))
                    .spawn_scoped(scope, move || {
                        info!("Rebuilding {}/{}", clone.name(), remote);
                        let result = self.rebuild_remote(&mut clone, remote, builder, options);
                        clone.close();
                        result
                    });

                match spawned {
                    Ok(handle) => handles.push((remote, handle)),
                    Err(e) => self.state.add_error(Error::IoError(format!(
                        "Failed to start worker for {}: {}",
                        remote, e
                    ))),
                }
            }

            for (remote, handle) in handles {
                match handle.join() {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => self.state.add_error(e),
                    Err(_) => self.state.add_error(Error::BuildFailed(format!(
                        "Worker rebuilding {} panicked",
                        remote
                    ))),
                }
            }
        });

        if let Some(mut dry) = dry {
            dry.close();
        }
        base.close();
    }

    /// Download, rebuild and upload one remote repository
    fn rebuild_remote(
        &self,
        bucket: &mut Bucket,
        remote: &str,
        builder: &dyn RepoBuilder,
        options: &SyncOptions,
    ) -> Result<()> {
        let local = self.workspace.join(remote);
        fs::create_dir_all(&local).map_err(|e| {
            Error::IoError(format!("Failed to create directory {}: {}", local.display(), e))
        })?;

        let location = self.package_location();
        let remote_location = join_key(remote, &location);
        info!("Downloading from {} to {}", remote_location, local.display());
        bucket
            .sync_from(&remote_location, &local.join(&location), options)
            .map_err(|e| e.context(format!("sync from {} to {}", remote_location, local.display())))?;

        info!("Copying new packages into local staging area");
        let changed = builder
            .inject_package(&local, &location)
            .map_err(|e| e.context("copying packages into staging repos"))?;

        builder
            .rebuild_repo(&changed)
            .map_err(|e| e.context(format!("building repo in {}", changed.display())))?;

        let plan = upload_plan(self.distro.format, &local, &changed)?;
        let destination = join_key(remote, &plan.component);
        bucket
            .sync_to(&plan.source, &destination, options)
            .map_err(|e| {
                e.context(format!(
                    "uploading {} to {}/{}",
                    plan.source.display(),
                    bucket.name(),
                    destination
                ))
            })?;

        info!("Rebuilt {}/{}", bucket.name(), remote);
        Ok(())
    }
}
