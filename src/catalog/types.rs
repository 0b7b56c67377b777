use super::version::FourPartVersion;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// The identity of one package build: name, flavor, version, architecture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalName {
    pub name: String,
    /// Build flavor such as `[vc10]`. Empty for the default flavor.
    #[serde(default)]
    pub flavor: String,
    #[serde(with = "version_string")]
    pub version: FourPartVersion,
    pub architecture: String,
}

impl CanonicalName {
    pub fn new(
        name: impl Into<String>,
        flavor: impl Into<String>,
        version: FourPartVersion,
        architecture: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            flavor: flavor.into(),
            version,
            architecture: architecture.into(),
        }
    }

    /// True when both names describe the same package and differ only in version.
    pub fn differs_only_by_version(&self, other: &CanonicalName) -> bool {
        self.same_package(other) && self.version != other.version
    }

    /// Name, flavor and architecture match (case-insensitive); version is ignored.
    pub fn same_package(&self, other: &CanonicalName) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.flavor.eq_ignore_ascii_case(&other.flavor)
            && self.architecture.eq_ignore_ascii_case(&other.architecture)
    }

    /// Full identity match, including version.
    pub fn same_identity(&self, other: &CanonicalName) -> bool {
        self.same_package(other) && self.version == other.version
    }

    /// Deterministic, lower-cased artifact file name for this build.
    pub fn artifact_file_name(&self, extension: &str) -> String {
        format!(
            "{}{}-{}-{}.{}",
            self.name, self.flavor, self.version, self.architecture, extension
        )
        .to_lowercase()
    }
}

impl fmt::Display for CanonicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}-{}-{}",
            self.name, self.flavor, self.version, self.architecture
        )
    }
}

mod version_string {
    use super::FourPartVersion;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &FourPartVersion, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<FourPartVersion, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A metadata link attached to a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default = "default_rel")]
    pub rel: String,
    pub href: Url,
}

fn default_rel() -> String {
    "related".to_string()
}

/// One package version published in a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub name: CanonicalName,
    pub title: Option<String>,
    pub summary: Option<String>,
    /// Feeds this entry claims membership in, most preferred first.
    pub feeds: Vec<Url>,
    /// Download locations for the artifact, most preferred first.
    pub locations: Vec<Url>,
    pub links: Vec<Link>,
}

impl CatalogEntry {
    pub fn new(name: CanonicalName) -> Self {
        Self {
            name,
            title: None,
            summary: None,
            feeds: Vec::new(),
            locations: Vec::new(),
            links: Vec::new(),
        }
    }

    /// An entry with no download location is not worth publishing.
    pub fn is_feed_worthy(&self) -> bool {
        !self.locations.is_empty()
    }
}

/// The published state of one named feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedDocument {
    pub entries: Vec<CatalogEntry>,
}

impl FeedDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: CatalogEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn find(&self, name: &CanonicalName) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.name.same_identity(name))
    }
}

/// Removes repeated URLs, keeping the first occurrence of each.
pub fn dedup_urls(urls: Vec<Url>) -> Vec<Url> {
    let mut seen = std::collections::HashSet::with_capacity(urls.len());
    urls.into_iter()
        .filter(|u| seen.insert(u.as_str().to_string()))
        .collect()
}

/// Inserts `url` at the front of `urls` unless it is already present.
pub fn prepend_if_absent(urls: &mut Vec<Url>, url: &Url) {
    if !urls.contains(url) {
        urls.insert(0, url.clone());
    }
}
