// src/version/mod.rs

//! Release version parsing and classification
//!
//! Release versions decide where new packages land in a repository tree:
//! - Development (nightly) builds go to `development`
//! - Release candidates go to `testing`
//! - GA releases go to a directory named for their series (e.g. `4.2`)

use crate::error::{Error, Result};
use semver::Version;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Subtree for unreleased builds
pub const DEVELOPMENT_LOCATION: &str = "development";

/// Subtree for release candidates
pub const TESTING_LOCATION: &str = "testing";

/// A parsed `major.minor.patch[-tag]` release version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseVersion {
    source: String,
    parsed: Version,
    rc_number: Option<u64>,
}

impl ReleaseVersion {
    /// Parse a release version string
    ///
    /// Examples:
    /// - "4.2.1" → GA, series 4.2
    /// - "4.3.0-rc1" → release candidate 1
    /// - "4.3.0-123-gabcdef0" → development build
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_start_matches('v');
        if trimmed.is_empty() {
            return Err(Error::ParseError("Empty release version".to_string()));
        }

        let parsed = Version::parse(trimmed)
            .map_err(|e| Error::ParseError(format!("Invalid release version '{}': {}", s, e)))?;

        let rc_number = parse_rc_number(parsed.pre.as_str());

        Ok(Self {
            source: s.trim().to_string(),
            parsed,
            rc_number,
        })
    }

    /// The version string as given
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn major(&self) -> u64 {
        self.parsed.major
    }

    pub fn minor(&self) -> u64 {
        self.parsed.minor
    }

    pub fn patch(&self) -> u64 {
        self.parsed.patch
    }

    /// Release candidate number, if this is a release candidate
    pub fn rc_number(&self) -> Option<u64> {
        self.rc_number
    }

    pub fn is_release_candidate(&self) -> bool {
        self.rc_number.is_some()
    }

    /// Any pre-release tag other than `rcN` marks an unreleased build
    pub fn is_development_build(&self) -> bool {
        !self.parsed.pre.is_empty() && self.rc_number.is_none()
    }

    pub fn is_release(&self) -> bool {
        self.parsed.pre.is_empty()
    }

    /// Release series, `major.minor`
    pub fn series(&self) -> String {
        format!("{}.{}", self.parsed.major, self.parsed.minor)
    }

    /// Even minor versions are stable series
    pub fn is_stable_series(&self) -> bool {
        self.parsed.minor % 2 == 0
    }

    /// The stable series this version belongs to or leads up to
    ///
    /// Odd (development) series map to the next even series; past minor 9
    /// the next stable series is the following major version.
    pub fn stable_release_series(&self) -> String {
        if self.is_stable_series() {
            return self.series();
        }

        if self.parsed.minor < 9 {
            format!("{}.{}", self.parsed.major, self.parsed.minor + 1)
        } else {
            format!("{}.0", self.parsed.major + 1)
        }
    }

    /// Repository subtree that packages of this version are published to
    pub fn package_location(&self) -> String {
        if self.is_development_build() {
            DEVELOPMENT_LOCATION.to_string()
        } else if self.is_release_candidate() {
            TESTING_LOCATION.to_string()
        } else {
            self.series()
        }
    }
}

/// Extract N from pre-release tags of the form `rcN` or `rc.N`
fn parse_rc_number(pre: &str) -> Option<u64> {
    let rest = pre.strip_prefix("rc")?;
    let rest = rest.strip_prefix('.').unwrap_or(rest);
    rest.parse::<u64>().ok()
}

impl FromStr for ReleaseVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parsed.cmp(&other.parsed)
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
