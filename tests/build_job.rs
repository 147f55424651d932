// tests/build_job.rs

//! Build job orchestration tests against the in-memory store.

mod common;

use common::{FlakyConnector, FlakyStore, MockBuilder, RecordingSigner, memory_bucket_store};
use pkgrelay::config::{PackageFormat, RepositoryConfig, RepositoryDefinition, SigningConfig};
use pkgrelay::repobuild::{BuildJob, DebRepoBuilder, FileSigner, PackageStager};
use pkgrelay::store::{BackoffConfig, HandleRegistry, MemoryStore, Permission};
use pkgrelay::ReleaseVersion;
use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

const RPM_PACKAGE: &str = "server-4.2.1.x86_64.rpm";

fn rpm_distro(repos: &[&str]) -> RepositoryDefinition {
    RepositoryDefinition {
        name: "server-rpm".to_string(),
        format: PackageFormat::Rpm,
        bucket: "repo.example.com".to_string(),
        repos: repos.iter().map(|r| r.to_string()).collect(),
        component: "main".to_string(),
        architectures: BTreeMap::new(),
    }
}

fn job(distro: RepositoryDefinition, version: &str, workspace: &TempDir) -> BuildJob {
    BuildJob::new(
        Arc::new(RepositoryConfig::default()),
        distro,
        version,
        "x86_64",
        None,
        Vec::new(),
    )
    .unwrap()
    .with_workspace(workspace.path())
    .with_backoff(BackoffConfig::fast())
}

#[test]
fn test_failing_repository_does_not_stop_siblings() {
    let workspace = TempDir::new().unwrap();
    let (connector, store) = memory_bucket_store("repo.example.com");

    let job = job(
        rpm_distro(&["yum/redhat/8", "yum/redhat/9", "yum/amazon/2"]),
        "4.2.1",
        &workspace,
    )
    .with_connector(connector)
    .with_builder(Arc::new(
        MockBuilder::new(PackageFormat::Rpm, "x86_64", RPM_PACKAGE).failing_on("redhat/9"),
    ));
    job.run(None);

    assert!(job.is_complete());
    let errors = job.errors();
    assert_eq!(errors.len(), 1, "errors: {:?}", errors);
    assert!(errors[0].contains("redhat/9"));
    assert_eq!(job.working_dirs().len(), 3);

    for remote in ["yum/redhat/8", "yum/amazon/2"] {
        let key = format!("{}/4.2/x86_64/RPMS/{}", remote, RPM_PACKAGE);
        assert_eq!(store.permission(&key), Some(Permission::PublicRead), "{}", key);
        assert!(store.object(&format!("{}/4.2/x86_64/repodata/repomd.xml", remote)).is_some());
    }
    assert!(store.keys().iter().all(|k| !k.starts_with("yum/redhat/9/")));
}

#[test]
fn test_transfer_failures_are_isolated_and_recorded() {
    let workspace = TempDir::new().unwrap();
    let memory = Arc::new(MemoryStore::new());
    memory.insert("yum/redhat/9/4.2/x86_64/RPMS/old.rpm", "old");
    let connector = Arc::new(FlakyConnector::new(
        FlakyStore::new(memory.clone(), 0).with_broken("yum/redhat/9/"),
    ));

    let job = job(rpm_distro(&["yum/redhat/8", "yum/redhat/9"]), "4.2.1", &workspace)
        .with_connector(connector)
        .with_builder(Arc::new(MockBuilder::new(PackageFormat::Rpm, "x86_64", RPM_PACKAGE)));
    job.run(None);

    let status = job.status();
    assert!(status.completed);
    assert!(!status.succeeded());
    assert_eq!(status.errors.len(), 1);
    assert!(status.errors[0].contains("20 attempts"), "{}", status.errors[0]);
    assert!(status.errors[0].contains("sync from yum/redhat/9/4.2"));

    assert!(
        memory
            .object(&format!("yum/redhat/8/4.2/x86_64/RPMS/{}", RPM_PACKAGE))
            .is_some()
    );
}

#[test]
fn test_release_candidate_publishes_to_testing() {
    let workspace = TempDir::new().unwrap();
    let (connector, store) = memory_bucket_store("repo.example.com");
    store.insert("yum/redhat/8/testing/x86_64/RPMS/old.rpm", "old");

    let builder = Arc::new(MockBuilder::new(
        PackageFormat::Rpm,
        "x86_64",
        "server-4.3.0-rc1.x86_64.rpm",
    ));
    let job = job(rpm_distro(&["yum/redhat/8"]), "4.3.0-rc1", &workspace)
        .with_connector(connector)
        .with_builder(builder.clone());
    job.run(None);

    assert!(job.error().is_none(), "{:?}", job.error());
    assert_eq!(job.package_location(), "testing");
    assert_eq!(builder.injected.lock()[0].1, "testing");

    // The existing package came down and was not sent back
    assert!(
        workspace
            .path()
            .join("yum/redhat/8/testing/x86_64/RPMS/old.rpm")
            .exists()
    );
    assert_eq!(store.counts().put, 2);
    assert_eq!(
        store.keys(),
        vec![
            "yum/redhat/8/testing/x86_64/RPMS/old.rpm",
            "yum/redhat/8/testing/x86_64/RPMS/server-4.3.0-rc1.x86_64.rpm",
            "yum/redhat/8/testing/x86_64/repodata/repomd.xml",
        ]
    );
}

#[test]
fn test_ga_release_publishes_to_series() {
    let workspace = TempDir::new().unwrap();
    let (connector, store) = memory_bucket_store("repo.example.com");

    let builder = Arc::new(MockBuilder::new(PackageFormat::Rpm, "x86_64", RPM_PACKAGE));
    let job = job(rpm_distro(&["yum/redhat/8"]), "4.2.1", &workspace)
        .with_connector(connector)
        .with_builder(builder.clone());
    job.run(None);

    assert!(!job.has_errors());
    assert_eq!(builder.injected.lock()[0].1, "4.2");
    assert!(store.keys().iter().all(|k| k.starts_with("yum/redhat/8/4.2/")));
    assert!(!store.keys().is_empty());
}

#[test]
fn test_dry_run_reads_but_never_writes() {
    let workspace = TempDir::new().unwrap();
    let (connector, store) = memory_bucket_store("repo.example.com");
    store.insert("yum/redhat/8/4.2/x86_64/RPMS/old.rpm", "old");

    let registry = HandleRegistry::new();
    let job = job(rpm_distro(&["yum/redhat/8", "yum/redhat/9"]), "4.2.1", &workspace)
        .with_dry_run(true)
        .with_registry(registry.clone())
        .with_connector(connector)
        .with_builder(Arc::new(MockBuilder::new(PackageFormat::Rpm, "x86_64", RPM_PACKAGE)));
    job.run(None);

    let status = job.status();
    assert!(status.succeeded(), "{:?}", status.errors);
    assert_eq!(store.counts().mutations(), 0);
    assert_eq!(store.len(), 1);
    assert!(
        workspace
            .path()
            .join("yum/redhat/8/4.2/x86_64/RPMS/old.rpm")
            .exists()
    );
    assert_eq!(registry.live(), 0);
}

#[test]
fn test_deb_job_uploads_component_with_signed_release() {
    let build = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    let deb = build.path().join("server_4.2.1_amd64.deb");
    fs::write(&deb, b"deb").unwrap();
    // Index files produced by the package build are caught by the glob too
    fs::write(build.path().join("Packages"), b"stale").unwrap();

    let signing = SigningConfig {
        token: Some("token".to_string()),
        ..SigningConfig::default()
    };
    let distro = RepositoryDefinition {
        name: "server-deb".to_string(),
        format: PackageFormat::Deb,
        bucket: "repo.example.com".to_string(),
        repos: vec!["apt/ubuntu/dists/jammy/server".to_string()],
        component: "main".to_string(),
        architectures: [("x86_64".to_string(), "amd64".to_string())].into(),
    };
    let conf = Arc::new(RepositoryConfig {
        signing: signing.clone(),
        repos: vec![distro.clone()],
        ..RepositoryConfig::default()
    });

    let recorder = Arc::new(RecordingSigner::default());
    let file_signer = FileSigner::new(
        signing,
        PackageFormat::Deb,
        ReleaseVersion::parse("4.2.1").unwrap(),
        recorder.clone(),
    );
    let stager = PackageStager::new(
        PackageFormat::Deb,
        vec![deb, build.path().join("Packages")],
        Arc::new(file_signer),
    );
    let builder = DebRepoBuilder::new("amd64", "main", Arc::new(stager)).with_tools("echo", "echo");

    let (connector, store) = memory_bucket_store("repo.example.com");
    let job = BuildJob::new(conf, distro, "4.2.1", "x86_64", None, Vec::new())
        .unwrap()
        .with_workspace(workspace.path())
        .with_connector(connector)
        .with_builder(Arc::new(builder));
    assert_eq!(job.arch(), "amd64");
    job.run(None);

    assert!(job.error().is_none(), "{:?}", job.error());
    let prefix = "apt/ubuntu/dists/jammy/server/4.2/main";
    assert_eq!(
        store.keys(),
        vec![
            format!("{}/Release", prefix),
            format!("{}/binary-amd64/Packages", prefix),
            format!("{}/binary-amd64/Packages.gz", prefix),
            format!("{}/binary-amd64/server_4.2.1_amd64.deb", prefix),
        ]
    );
    assert_eq!(
        store.object(&format!("{}/binary-amd64/Packages", prefix)).unwrap(),
        b"--multiversion .\n"
    );

    let requests = recorder.requests.lock();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].path.ends_with("4.2/main/Release"));
    assert_eq!(requests[0].key_name, "server-4.2");
    assert_eq!(requests[0].archive_ext, "gpg");
}
