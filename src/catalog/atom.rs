//! Atom codec for feed documents.
//!
//! Package identity, feed memberships and download locations are carried in
//! extension elements under the `urn:repofeed:package` namespace:
//!
//! ```xml
//! <entry>
//!   <id>zlib-1.2.5.0-x86</id>
//!   <title>zlib</title>
//!   <link rel="license" href="https://example.com/zlib/license"/>
//!   <pkg:package name="zlib" flavor="" version="1.2.5.0" architecture="x86">
//!     <pkg:feed>https://example.com/feeds/current</pkg:feed>
//!     <pkg:location>https://example.com/packages/zlib-1.2.5.0-x86.msi</pkg:location>
//!   </pkg:package>
//! </entry>
//! ```

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::{NsReader, Writer};
use std::io::Cursor;
use thiserror::Error;
use url::Url;

use super::types::{CanonicalName, CatalogEntry, FeedDocument, Link};

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const PACKAGE_NS: &str = "urn:repofeed:package";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("XML write error: {0}")]
    XmlWrite(String),

    #[error("Feed document is not valid UTF-8")]
    InvalidUtf8,
}

/// Feed-level fields written into the document header.
#[derive(Debug, Clone)]
pub struct FeedMeta<'a> {
    pub title: &'a str,
    pub id: &'a Url,
    pub updated: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone, Copy)]
enum TextField {
    Title,
    Summary,
    Feed,
    Location,
}

#[derive(Default)]
struct PendingEntry {
    name: Option<String>,
    flavor: String,
    version: Option<String>,
    architecture: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    feeds: Vec<String>,
    locations: Vec<String>,
    links: Vec<Link>,
}

impl PendingEntry {
    fn append_text(&mut self, field: TextField, text: &str) {
        match field {
            TextField::Title => self.title.get_or_insert_with(String::new).push_str(text),
            TextField::Summary => self.summary.get_or_insert_with(String::new).push_str(text),
            TextField::Feed => self.feeds.push(text.to_string()),
            TextField::Location => self.locations.push(text.to_string()),
        }
    }

    fn build(self) -> Option<CatalogEntry> {
        let (Some(name), Some(version), Some(architecture)) =
            (self.name, self.version, self.architecture)
        else {
            tracing::warn!("Skipping feed entry without a complete package identity");
            return None;
        };

        let version = match version.parse() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(package = %name, error = %e, "Skipping feed entry with invalid version");
                return None;
            }
        };

        let mut entry = CatalogEntry::new(CanonicalName::new(
            name,
            self.flavor,
            version,
            architecture,
        ));
        entry.title = self.title;
        entry.summary = self.summary;
        entry.feeds = parse_urls(self.feeds);
        entry.locations = parse_urls(self.locations);
        entry.links = self.links;
        Some(entry)
    }
}

fn parse_urls(raw: Vec<String>) -> Vec<Url> {
    raw.into_iter()
        .filter_map(|s| match Url::parse(s.trim()) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(url = %s, error = %e, "Skipping unparseable URL in feed entry");
                None
            }
        })
        .collect()
}

/// Elements the reader cares about, after namespace resolution.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Element {
    Entry,
    Title,
    Summary,
    Link,
    Package,
    PackageFeed,
    PackageLocation,
}

/// Maps a resolved element name onto the parts of the document we read.
///
/// Package extensions are matched by namespace, so any prefix bound to
/// `urn:repofeed:package` works. Atom elements may be unqualified.
fn classify(ns: &ResolveResult<'_>, local: &[u8]) -> Option<Element> {
    match ns {
        ResolveResult::Bound(Namespace(uri)) if *uri == PACKAGE_NS.as_bytes() => match local {
            b"package" => Some(Element::Package),
            b"feed" => Some(Element::PackageFeed),
            b"location" => Some(Element::PackageLocation),
            _ => None,
        },
        ResolveResult::Bound(Namespace(uri)) if *uri != ATOM_NS.as_bytes() => None,
        ResolveResult::Unknown(_) => None,
        _ => match local {
            b"entry" => Some(Element::Entry),
            b"title" => Some(Element::Title),
            b"summary" => Some(Element::Summary),
            b"link" => Some(Element::Link),
            _ => None,
        },
    }
}

fn element(reader: &NsReader<&[u8]>, e: &BytesStart<'_>) -> Option<Element> {
    let (ns, local) = reader.resolve_element(e.name());
    classify(&ns, local.as_ref())
}

/// Parses an Atom feed document.
///
/// Entries lacking a name, version or architecture are skipped with a warning
/// rather than failing the whole document.
pub fn parse_document(content: &str) -> Result<FeedDocument, CodecError> {
    // SEC-002: quick-xml 0.37 never expands custom entities, so external
    // entity declarations in an uploaded feed cannot reach the filesystem.
    let mut reader = NsReader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut document = FeedDocument::new();
    let mut pending: Option<PendingEntry> = None;
    let mut text_field: Option<TextField> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match element(&reader, &e) {
                Some(Element::Entry) => pending = Some(PendingEntry::default()),
                Some(Element::Package) => {
                    if let Some(entry) = pending.as_mut() {
                        read_package_attributes(&e, &reader, entry)?;
                    }
                }
                Some(Element::Link) => {
                    if let Some(entry) = pending.as_mut() {
                        read_link(&e, &reader, entry)?;
                    }
                }
                Some(Element::Title) => text_field = Some(TextField::Title),
                Some(Element::Summary) => text_field = Some(TextField::Summary),
                Some(Element::PackageFeed) => text_field = Some(TextField::Feed),
                Some(Element::PackageLocation) => text_field = Some(TextField::Location),
                None => {}
            },
            Ok(Event::Empty(e)) => match element(&reader, &e) {
                Some(Element::Package) => {
                    if let Some(entry) = pending.as_mut() {
                        read_package_attributes(&e, &reader, entry)?;
                    }
                }
                Some(Element::Link) => {
                    if let Some(entry) = pending.as_mut() {
                        read_link(&e, &reader, entry)?;
                    }
                }
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if let (Some(entry), Some(field)) = (pending.as_mut(), text_field) {
                    let text = t
                        .unescape()
                        .map_err(|e| CodecError::XmlParse(e.to_string()))?;
                    entry.append_text(field, &text);
                }
            }
            Ok(Event::End(e)) => {
                let (ns, local) = reader.resolve_element(e.name());
                if classify(&ns, local.as_ref()) == Some(Element::Entry) {
                    if let Some(entry) = pending.take().and_then(PendingEntry::build) {
                        document.push(entry);
                    }
                }
                text_field = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(CodecError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(document)
}

fn read_package_attributes(
    e: &BytesStart<'_>,
    reader: &NsReader<&[u8]>,
    entry: &mut PendingEntry,
) -> Result<(), CodecError> {
    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(err) => {
                tracing::warn!(error = %err, "Skipping malformed package attribute");
                continue;
            }
        };
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|err| CodecError::XmlParse(err.to_string()))?
            .to_string();
        match attr.key.as_ref() {
            b"name" => entry.name = Some(value),
            b"flavor" => entry.flavor = value,
            b"version" => entry.version = Some(value),
            b"architecture" => entry.architecture = Some(value),
            _ => {}
        }
    }
    Ok(())
}

fn read_link(
    e: &BytesStart<'_>,
    reader: &NsReader<&[u8]>,
    entry: &mut PendingEntry,
) -> Result<(), CodecError> {
    let mut rel = None;
    let mut href = None;

    for attr in e.attributes().flatten() {
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|err| CodecError::XmlParse(err.to_string()))?;
        match attr.key.as_ref() {
            b"rel" => rel = Some(value.to_string()),
            b"href" => href = Some(value.to_string()),
            _ => {}
        }
    }

    if let Some(href) = href {
        match Url::parse(&href) {
            Ok(href) => entry.links.push(Link {
                rel: rel.unwrap_or_else(|| "alternate".to_string()),
                href,
            }),
            Err(err) => {
                tracing::warn!(url = %href, error = %err, "Skipping link with invalid href");
            }
        }
    }
    Ok(())
}

/// Serializes a feed document as an Atom XML string.
pub fn write_document(document: &FeedDocument, meta: &FeedMeta<'_>) -> Result<String, CodecError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    write(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;

    let mut feed = BytesStart::new("feed");
    feed.push_attribute(("xmlns", ATOM_NS));
    feed.push_attribute(("xmlns:pkg", PACKAGE_NS));
    write(&mut writer, Event::Start(feed))?;

    write_text_element(&mut writer, "title", meta.title)?;
    write_text_element(&mut writer, "id", meta.id.as_str())?;
    write_text_element(&mut writer, "updated", &meta.updated.to_rfc3339())?;

    for entry in &document.entries {
        write_entry(&mut writer, entry)?;
    }

    write(&mut writer, Event::End(BytesEnd::new("feed")))?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
}

fn write_entry(writer: &mut Writer<Cursor<Vec<u8>>>, entry: &CatalogEntry) -> Result<(), CodecError> {
    write(writer, Event::Start(BytesStart::new("entry")))?;

    write_text_element(writer, "id", &entry.name.to_string())?;
    let title = entry.title.as_deref().unwrap_or(&entry.name.name);
    write_text_element(writer, "title", title)?;
    if let Some(summary) = &entry.summary {
        write_text_element(writer, "summary", summary)?;
    }

    for link in &entry.links {
        let mut el = BytesStart::new("link");
        el.push_attribute(("rel", link.rel.as_str()));
        el.push_attribute(("href", link.href.as_str()));
        write(writer, Event::Empty(el))?;
    }

    let version = entry.name.version.to_string();
    let mut package = BytesStart::new("pkg:package");
    package.push_attribute(("name", entry.name.name.as_str()));
    package.push_attribute(("flavor", entry.name.flavor.as_str()));
    package.push_attribute(("version", version.as_str()));
    package.push_attribute(("architecture", entry.name.architecture.as_str()));
    write(writer, Event::Start(package))?;

    for feed in &entry.feeds {
        write_text_element(writer, "pkg:feed", feed.as_str())?;
    }
    for location in &entry.locations {
        write_text_element(writer, "pkg:location", location.as_str())?;
    }

    write(writer, Event::End(BytesEnd::new("pkg:package")))?;
    write(writer, Event::End(BytesEnd::new("entry")))
}

fn write_text_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    name: &str,
    text: &str,
) -> Result<(), CodecError> {
    write(writer, Event::Start(BytesStart::new(name)))?;
    write(writer, Event::Text(BytesText::new(text)))?;
    write(writer, Event::End(BytesEnd::new(name)))
}

fn write(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event<'_>) -> Result<(), CodecError> {
    writer
        .write_event(event)
        .map_err(|e| CodecError::XmlWrite(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:pkg="urn:repofeed:package">
  <title>current</title>
  <id>https://repo.example.com/feeds/current</id>
  <entry>
    <id>zlib-1.2.5.0-x86</id>
    <title>zlib</title>
    <summary>Compression &amp; friends</summary>
    <link rel="license" href="https://repo.example.com/zlib/license"/>
    <pkg:package name="zlib" flavor="" version="1.2.5.0" architecture="x86">
      <pkg:feed>https://repo.example.com/feeds/current</pkg:feed>
      <pkg:location>https://repo.example.com/packages/zlib-1.2.5.0-x86.msi</pkg:location>
      <pkg:location>https://mirror.example.com/zlib-1.2.5.0-x86.msi</pkg:location>
    </pkg:package>
  </entry>
  <entry>
    <id>broken</id>
    <pkg:package name="broken" flavor=""/>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_sample_document() {
        let doc = parse_document(SAMPLE).expect("sample should parse");
        assert_eq!(doc.len(), 1, "entry without version/architecture is skipped");

        let entry = &doc.entries[0];
        assert_eq!(entry.name.name, "zlib");
        assert_eq!(entry.name.version.to_string(), "1.2.5.0");
        assert_eq!(entry.summary.as_deref(), Some("Compression & friends"));
        assert_eq!(entry.feeds.len(), 1);
        assert_eq!(entry.locations.len(), 2);
        assert_eq!(entry.links[0].rel, "license");
    }

    #[test]
    fn test_feed_title_is_not_taken_as_entry_title() {
        let doc = parse_document(SAMPLE).unwrap();
        assert_eq!(doc.entries[0].title.as_deref(), Some("zlib"));
    }

    #[test]
    fn test_write_then_parse_preserves_entries() {
        let original = parse_document(SAMPLE).unwrap();
        let id = Url::parse("https://repo.example.com/feeds/current").unwrap();
        let meta = FeedMeta {
            title: "current",
            id: &id,
            updated: chrono::Utc::now(),
        };

        let xml = write_document(&original, &meta).unwrap();
        assert!(xml.contains("xmlns:pkg=\"urn:repofeed:package\""));

        let reparsed = parse_document(&xml).unwrap();
        assert_eq!(reparsed, original);
    }

    #[test]
    fn test_invalid_location_is_skipped() {
        let content = r#"<feed xmlns:pkg="urn:repofeed:package"><entry>
            <pkg:package name="a" version="1.0" architecture="any">
              <pkg:location>not a url</pkg:location>
              <pkg:location>https://ok.example.com/a.msi</pkg:location>
            </pkg:package>
        </entry></feed>"#;
        let doc = parse_document(content).unwrap();
        assert_eq!(doc.entries[0].locations.len(), 1);
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        let result = parse_document("<feed><entry></feed>");
        assert!(matches!(result, Err(CodecError::XmlParse(_))));
    }

    #[test]
    fn test_package_namespace_is_matched_under_any_prefix() {
        let content = r#"<feed xmlns="http://www.w3.org/2005/Atom" xmlns:p="urn:repofeed:package">
          <entry>
            <title>zlib</title>
            <p:package name="zlib" version="1.2.5.0" architecture="x86">
              <p:feed>https://repo.example.com/feeds/current</p:feed>
              <p:location>https://repo.example.com/packages/zlib.msi</p:location>
            </p:package>
          </entry>
        </feed>"#;

        let doc = parse_document(content).unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.entries[0].name.name, "zlib");
        assert_eq!(doc.entries[0].feeds.len(), 1);
        assert_eq!(
            doc.entries[0].locations[0].as_str(),
            "https://repo.example.com/packages/zlib.msi"
        );
    }

    #[test]
    fn test_pkg_prefix_bound_elsewhere_is_ignored() {
        let content = r#"<feed xmlns:pkg="urn:example:other"><entry>
            <pkg:package name="a" version="1.0" architecture="any"/>
        </entry></feed>"#;
        let doc = parse_document(content).unwrap();
        assert!(doc.is_empty());
    }
}
