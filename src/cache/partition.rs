//! Partition naming and generational eviction.
//!
//! Partition names have the form `<kind>@<version>`. Activating a new
//! version deletes every partition outside the current [`Whitelist`].

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// What a partition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKind {
    /// Static assets, populated at install time.
    Files,
    /// API responses, populated on demand.
    Api,
}

impl PartitionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Files => "files",
            Self::Api => "api",
        }
    }
}

/// A versioned partition name such as `files@1700000000`.
///
/// # Examples
///
/// ```
/// use swproxy::cache::{PartitionKind, PartitionName};
///
/// let name = PartitionName::new(PartitionKind::Api, 42);
/// assert_eq!(name.to_string(), "api@42");
/// assert_eq!("api@42".parse::<PartitionName>().unwrap(), name);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionName {
    pub kind: PartitionKind,
    pub version: u64,
}

impl PartitionName {
    pub fn new(kind: PartitionKind, version: u64) -> Self {
        Self { kind, version }
    }

    pub fn files(version: u64) -> Self {
        Self::new(PartitionKind::Files, version)
    }

    pub fn api(version: u64) -> Self {
        Self::new(PartitionKind::Api, version)
    }
}

impl fmt::Display for PartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind.as_str(), self.version)
    }
}

/// Returned when a string is not a `<kind>@<version>` partition name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a partition name: {0:?}")]
pub struct ParsePartitionError(String);

impl FromStr for PartitionName {
    type Err = ParsePartitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParsePartitionError(s.to_owned());
        let (kind, version) = s.split_once('@').ok_or_else(err)?;
        let kind = match kind {
            "files" => PartitionKind::Files,
            "api" => PartitionKind::Api,
            _ => return Err(err()),
        };
        let version = version.parse().map_err(|_| err())?;
        Ok(Self { kind, version })
    }
}

/// The set of partition names that survive activation.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    names: HashSet<String>,
}

impl Whitelist {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// The whitelist for a version: its `files` and `api` partitions.
    pub fn for_version(version: u64) -> Self {
        Self::new([
            PartitionName::files(version).to_string(),
            PartitionName::api(version).to_string(),
        ])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Returns the names from `existing` that must be deleted.
    pub fn stale<'a>(&'a self, existing: &'a [String]) -> impl Iterator<Item = &'a str> + 'a {
        existing
            .iter()
            .map(String::as_str)
            .filter(|name| !self.contains(name))
    }
}
