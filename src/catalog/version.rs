use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when parsing a [`FourPartVersion`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("Version string is empty")]
    Empty,
    #[error("Version has more than four parts: {0}")]
    TooManyParts(String),
    #[error("Invalid version component '{component}' in '{version}'")]
    InvalidComponent { version: String, component: String },
}

/// A `major.minor.build.revision` package version.
///
/// Missing trailing components default to zero, so `"1.2"` and `"1.2.0.0"`
/// compare equal. Ordering is numeric, component by component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FourPartVersion([u32; 4]);

impl FourPartVersion {
    pub const fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self([major, minor, build, revision])
    }

    pub fn parts(&self) -> [u32; 4] {
        self.0
    }
}

impl FromStr for FourPartVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(VersionError::Empty);
        }

        let mut parts = [0u32; 4];
        for (index, component) in trimmed.split('.').enumerate() {
            if index >= parts.len() {
                return Err(VersionError::TooManyParts(trimmed.to_string()));
            }
            parts[index] =
                component
                    .parse()
                    .map_err(|_| VersionError::InvalidComponent {
                        version: trimmed.to_string(),
                        component: component.to_string(),
                    })?;
        }

        Ok(Self(parts))
    }
}

impl fmt::Display for FourPartVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}
