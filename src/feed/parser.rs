use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use super::types::{Enclosure, MediaKind, MediaRef, ParsedFeed, RawFeedItem};

/// Maximum element nesting accepted inside a feed document.
const MAX_DEPTH: usize = 64;

/// Errors produced while turning a payload into a [`ParsedFeed`].
#[derive(Debug, Error)]
pub enum ParseError {
    /// The payload is not well-formed XML.
    #[error("malformed XML: {0}")]
    Xml(String),
    /// The payload ended with elements still open.
    #[error("truncated XML document")]
    Truncated,
    /// Well-formed, but neither RSS, RDF nor Atom.
    #[error("not an RSS or Atom feed")]
    NotAFeed,
    /// Nesting deeper than the parser accepts.
    #[error("XML nesting exceeds {0} levels")]
    TooDeep(usize),
    /// An Atom/RDF document that `feed-rs` rejected.
    #[error("invalid feed: {0}")]
    Feed(String),
}

/// Root element of a feed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Rss,
    /// Atom and RSS 1.0 (RDF), parsed through `feed-rs`
    Other,
}

/// Parses raw feed bytes into a [`ParsedFeed`].
///
/// RSS 0.9x/2.0 is read directly so that the namespaced extensions keep
/// their identity (`content:encoded`, `dc:creator`, `dc:date`,
/// `media:content`, `media:group`, `media:thumbnail`, enclosures and the
/// non-standard item `<image>`). Atom and RDF documents go through `feed-rs`
/// and are mapped onto the same [`RawFeedItem`] shape.
///
/// Items are returned as the source presented them: a missing `guid` stays
/// `None`, and `link` is filled whenever the source has one.
///
/// # Errors
///
/// [`ParseError`] for non-XML payloads, malformed or truncated XML, and XML
/// documents that are not feeds.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    match sniff_dialect(bytes)? {
        Dialect::Rss => parse_rss(bytes),
        Dialect::Other => parse_with_feed_rs(bytes),
    }
}

fn sniff_dialect(bytes: &[u8]) -> Result<Dialect, ParseError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                return match local {
                    b"rss" => Ok(Dialect::Rss),
                    b"feed" | b"RDF" => Ok(Dialect::Other),
                    _ => Err(ParseError::NotAFeed),
                };
            }
            Ok(Event::Text(t)) => {
                // Leading junk text before the root element
                if !t.iter().all(u8::is_ascii_whitespace) && !t.starts_with(b"\xEF\xBB\xBF") {
                    return Err(ParseError::NotAFeed);
                }
            }
            Ok(Event::Eof) => return Err(ParseError::NotAFeed),
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
}

fn local_name(qname: &[u8]) -> &[u8] {
    match qname.iter().position(|&b| b == b':') {
        Some(idx) => &qname[idx + 1..],
        None => qname,
    }
}

// ============================================================================
// RSS
// ============================================================================

fn parse_rss(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    // SEC-002: quick-xml never expands <!ENTITY> declarations; only the five
    // XML builtins are resolved, so external entities cannot be injected.
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut feed = ParsedFeed::default();
    let mut saw_channel = false;
    let mut path: Vec<String> = Vec::new();
    let mut text = String::new();
    let mut item: Option<RawFeedItem> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = qualified_name(&e);
                if path.len() >= MAX_DEPTH {
                    return Err(ParseError::TooDeep(MAX_DEPTH));
                }
                text.clear();

                match name.as_str() {
                    "channel" => saw_channel = true,
                    "item" => item = Some(RawFeedItem::default()),
                    _ => {}
                }
                if let Some(current) = item.as_mut() {
                    collect_item_attributes(current, &name, &path, &e, &reader);
                }
                path.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = qualified_name(&e);
                if let Some(current) = item.as_mut() {
                    collect_item_attributes(current, &name, &path, &e, &reader);
                }
            }
            Ok(Event::Text(t)) => {
                let chunk = t
                    .unescape()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                text.push_str(&chunk);
            }
            Ok(Event::CData(c)) => {
                text.push_str(&String::from_utf8_lossy(&c));
            }
            Ok(Event::End(_)) => {
                let Some(name) = path.pop() else {
                    return Err(ParseError::Xml("unexpected closing tag".to_string()));
                };
                let value = std::mem::take(&mut text);
                let parent = path.last().map(String::as_str);

                if name == "item" {
                    if let Some(done) = item.take() {
                        feed.items.push(done);
                    }
                } else if let Some(current) = item.as_mut() {
                    assign_item_field(current, &name, parent, value);
                } else if parent == Some("channel") {
                    assign_channel_field(&mut feed, &name, value);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !path.is_empty() {
        return Err(ParseError::Truncated);
    }
    if !saw_channel {
        return Err(ParseError::NotAFeed);
    }

    Ok(feed)
}

fn qualified_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == value.len() {
        Some(value)
    } else {
        Some(trimmed.to_string())
    }
}

fn assign_channel_field(feed: &mut ParsedFeed, name: &str, value: String) {
    match name {
        "title" => feed.title = non_empty(value),
        "description" => feed.description = non_empty(value),
        "link" => feed.link = non_empty(value),
        _ => {}
    }
}

fn assign_item_field(item: &mut RawFeedItem, name: &str, parent: Option<&str>, value: String) {
    match (parent, name) {
        (Some("item"), "title") => item.title = non_empty(value),
        (Some("item"), "description") => item.description = non_empty(value),
        (Some("item"), "content:encoded") => item.content = non_empty(value),
        (Some("item"), "guid") => item.guid = non_empty(value),
        (Some("item"), "link") => {
            // Some feeds repeat <link>; keep the first non-empty one
            if item.link.is_none() {
                item.link = non_empty(value);
            }
        }
        (Some("item"), "pubDate") => item.pub_date = non_empty(value),
        (Some("item"), "dc:date") => item.iso_date = non_empty(value),
        (Some("item"), "dc:creator") => {
            if item.creator.is_none() {
                item.creator = non_empty(value);
            }
        }
        (Some("item"), "author") => item.author = non_empty(value),
        (Some("item"), "category") => {
            if let Some(tag) = non_empty(value) {
                item.categories.push(tag);
            }
        }
        (Some("item"), "image") => {
            if item.image.is_none() {
                item.image = non_empty(value);
            }
        }
        (Some("image"), "url") => item.image = non_empty(value),
        _ => {}
    }
}

/// Extracts URL-bearing attributes from enclosure and Media RSS elements.
fn collect_item_attributes(
    item: &mut RawFeedItem,
    name: &str,
    path: &[String],
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) {
    let parent = path.last().map(String::as_str);
    match name {
        "enclosure" => {
            if let Some(url) = attribute(e, reader, b"url") {
                item.enclosures.push(Enclosure {
                    url,
                    mime_type: attribute(e, reader, b"type"),
                });
            }
        }
        "media:content" => {
            let kind = if parent == Some("media:group") {
                MediaKind::GroupContent
            } else {
                MediaKind::Content
            };
            if let Some(url) = attribute(e, reader, b"url") {
                item.media.push(MediaRef {
                    kind,
                    url,
                    mime_type: attribute(e, reader, b"type"),
                    medium: attribute(e, reader, b"medium"),
                });
            }
        }
        "media:thumbnail" => {
            if let Some(url) = attribute(e, reader, b"url") {
                item.media.push(MediaRef {
                    kind: MediaKind::Thumbnail,
                    url,
                    mime_type: None,
                    medium: None,
                });
            }
        }
        "image" if parent == Some("item") => {
            // <image href="..."/> and <image url="..."/> variants
            if item.image.is_none() {
                item.image = attribute(e, reader, b"url").or_else(|| attribute(e, reader, b"href"));
            }
        }
        _ => {}
    }
}

fn attribute(e: &BytesStart<'_>, reader: &Reader<&[u8]>, key: &[u8]) -> Option<String> {
    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(err) => {
                tracing::debug!(error = %err, "Skipping malformed feed attribute");
                continue;
            }
        };
        if attr.key.as_ref() != key {
            continue;
        }
        return match attr.decode_and_unescape_value(reader.decoder()) {
            Ok(value) => non_empty(value.into_owned()),
            Err(_) => non_empty(String::from_utf8_lossy(&attr.value).into_owned()),
        };
    }
    None
}

// ============================================================================
// Atom / RDF
// ============================================================================

fn parse_with_feed_rs(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let parsed = feed_rs::parser::parse(bytes).map_err(|e| ParseError::Feed(e.to_string()))?;

    let link = preferred_link(&parsed.links);
    let items = parsed
        .entries
        .into_iter()
        .map(|entry| {
            let link = preferred_link(&entry.links);
            let enclosures = entry
                .links
                .iter()
                .filter(|l| l.rel.as_deref() == Some("enclosure"))
                .map(|l| Enclosure {
                    url: l.href.clone(),
                    mime_type: l.media_type.clone(),
                })
                .collect();

            let mut media = Vec::new();
            for object in &entry.media {
                for content in &object.content {
                    if let Some(url) = &content.url {
                        media.push(MediaRef {
                            kind: MediaKind::Content,
                            url: url.to_string(),
                            mime_type: content.content_type.as_ref().map(|m| m.to_string()),
                            medium: None,
                        });
                    }
                }
                for thumbnail in &object.thumbnails {
                    media.push(MediaRef {
                        kind: MediaKind::Thumbnail,
                        url: thumbnail.image.uri.clone(),
                        mime_type: None,
                        medium: None,
                    });
                }
            }

            RawFeedItem {
                title: entry.title.and_then(|t| non_empty(t.content)),
                description: entry.summary.and_then(|t| non_empty(t.content)),
                content: entry.content.and_then(|c| c.body).and_then(non_empty),
                guid: non_empty(entry.id),
                link,
                iso_date: entry.published.or(entry.updated).map(|d| d.to_rfc3339()),
                pub_date: None,
                creator: None,
                author: entry
                    .authors
                    .into_iter()
                    .find_map(|person| non_empty(person.name)),
                categories: entry
                    .categories
                    .into_iter()
                    .filter_map(|c| non_empty(c.label.unwrap_or(c.term)))
                    .collect(),
                enclosures,
                media,
                image: None,
            }
        })
        .collect();

    Ok(ParsedFeed {
        title: parsed.title.and_then(|t| non_empty(t.content)),
        description: parsed.description.and_then(|t| non_empty(t.content)),
        link,
        items,
    })
}

/// `rel="alternate"` (or no rel) first, then whatever link comes first.
fn preferred_link(links: &[feed_rs::model::Link]) -> Option<String> {
    links
        .iter()
        .find(|l| l.rel.as_deref().is_none_or(|rel| rel == "alternate"))
        .or_else(|| links.iter().find(|l| l.rel.as_deref() != Some("enclosure")))
        .and_then(|l| non_empty(l.href.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RSS_WITH_EXTENSIONS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"
     xmlns:content="http://purl.org/rss/1.0/modules/content/"
     xmlns:dc="http://purl.org/dc/elements/1.1/"
     xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Example News</title>
    <link>https://news.example.com/</link>
    <description>All the news</description>
    <image><url>https://news.example.com/logo.png</url></image>
    <item>
      <title>First &amp; foremost</title>
      <link>https://news.example.com/first</link>
      <guid isPermaLink="false">item-1</guid>
      <description><![CDATA[<p>Short <b>teaser</b></p>]]></description>
      <content:encoded><![CDATA[<p>Full body</p><img src="/img/a.jpg">]]></content:encoded>
      <dc:creator>Jane Doe</dc:creator>
      <dc:date>2024-01-02T03:04:05Z</dc:date>
      <pubDate>Tue, 02 Jan 2024 03:04:05 +0000</pubDate>
      <category>World</category>
      <category>Politics</category>
      <enclosure url="https://cdn.example.com/a.jpg" type="image/jpeg" length="123"/>
      <media:content url="https://cdn.example.com/video.mp4" type="video/mp4" medium="video"/>
      <media:group>
        <media:content url="https://cdn.example.com/group.jpg" medium="image">
          <media:title>Grouped</media:title>
        </media:content>
      </media:group>
      <media:thumbnail url="https://cdn.example.com/thumb.jpg"/>
    </item>
    <item>
      <title>No guid here</title>
      <link>https://news.example.com/second</link>
      <author>editor@example.com (The Editor)</author>
      <image><url>https://cdn.example.com/explicit.png</url></image>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parses_channel_metadata() {
        let feed = parse_feed(RSS_WITH_EXTENSIONS.as_bytes()).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Example News"));
        assert_eq!(feed.link.as_deref(), Some("https://news.example.com/"));
        assert_eq!(feed.description.as_deref(), Some("All the news"));
        assert_eq!(feed.items.len(), 2);
    }

    #[test]
    fn test_parses_namespaced_extensions() {
        let feed = parse_feed(RSS_WITH_EXTENSIONS.as_bytes()).unwrap();
        let item = &feed.items[0];

        assert_eq!(item.title.as_deref(), Some("First & foremost"));
        assert_eq!(item.guid.as_deref(), Some("item-1"));
        assert_eq!(item.description.as_deref(), Some("<p>Short <b>teaser</b></p>"));
        assert_eq!(
            item.content.as_deref(),
            Some(r#"<p>Full body</p><img src="/img/a.jpg">"#)
        );
        assert_eq!(item.creator.as_deref(), Some("Jane Doe"));
        assert_eq!(item.iso_date.as_deref(), Some("2024-01-02T03:04:05Z"));
        assert_eq!(item.pub_date.as_deref(), Some("Tue, 02 Jan 2024 03:04:05 +0000"));
        assert_eq!(item.categories, vec!["World", "Politics"]);
        assert_eq!(
            item.enclosures,
            vec![Enclosure {
                url: "https://cdn.example.com/a.jpg".into(),
                mime_type: Some("image/jpeg".into()),
            }]
        );

        let kinds: Vec<_> = item.media.iter().map(|m| (m.kind, m.url.as_str())).collect();
        assert_eq!(
            kinds,
            vec![
                (MediaKind::Content, "https://cdn.example.com/video.mp4"),
                (MediaKind::GroupContent, "https://cdn.example.com/group.jpg"),
                (MediaKind::Thumbnail, "https://cdn.example.com/thumb.jpg"),
            ]
        );
        assert!(!item.media[0].may_be_image());
        assert!(item.media[1].may_be_image());
    }

    #[test]
    fn test_channel_image_does_not_leak_into_items() {
        let feed = parse_feed(RSS_WITH_EXTENSIONS.as_bytes()).unwrap();
        assert_eq!(feed.items[0].image, None);
    }

    #[test]
    fn test_missing_guid_left_empty_but_link_kept() {
        let feed = parse_feed(RSS_WITH_EXTENSIONS.as_bytes()).unwrap();
        let item = &feed.items[1];
        assert_eq!(item.guid, None);
        assert_eq!(item.link.as_deref(), Some("https://news.example.com/second"));
        assert_eq!(item.author.as_deref(), Some("editor@example.com (The Editor)"));
        assert_eq!(item.image.as_deref(), Some("https://cdn.example.com/explicit.png"));
    }

    #[test]
    fn test_empty_channel() {
        let xml = br#"<rss version="2.0"><channel><title>Empty</title></channel></rss>"#;
        let feed = parse_feed(xml).unwrap();
        assert!(feed.items.is_empty());
        assert_eq!(feed.title.as_deref(), Some("Empty"));
    }

    #[test]
    fn test_non_xml_payload_rejected() {
        assert!(parse_feed(b"this is not xml at all").is_err());
        assert!(parse_feed(b"").is_err());
        assert!(parse_feed(b"{\"items\": []}").is_err());
    }

    #[test]
    fn test_malformed_xml_rejected() {
        assert!(parse_feed(b"<not valid xml").is_err());
        assert!(parse_feed(b"<rss><channel><item><title>x</item></channel></rss>").is_err());
    }

    #[test]
    fn test_truncated_document_rejected() {
        let result = parse_feed(b"<rss version=\"2.0\"><channel><item><title>cut");
        assert!(result.is_err());
    }

    #[test]
    fn test_html_page_is_not_a_feed() {
        let result = parse_feed(b"<!DOCTYPE html><html><body>Hello</body></html>");
        assert!(matches!(result, Err(ParseError::NotAFeed)));
    }

    #[test]
    fn test_rss_without_channel_is_not_a_feed() {
        let result = parse_feed(b"<rss version=\"2.0\"></rss>");
        assert!(matches!(result, Err(ParseError::NotAFeed)));
    }

    #[test]
    fn test_atom_feed_mapped_to_raw_items() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Example</title>
  <link href="https://atom.example.org/"/>
  <id>urn:uuid:feed</id>
  <updated>2024-03-01T10:00:00Z</updated>
  <entry>
    <title>Atom entry</title>
    <link rel="alternate" href="https://atom.example.org/entry-1"/>
    <link rel="enclosure" type="image/png" href="https://atom.example.org/pic.png"/>
    <id>urn:uuid:entry-1</id>
    <published>2024-03-01T09:00:00Z</published>
    <updated>2024-03-01T10:00:00Z</updated>
    <author><name>Ann Author</name></author>
    <category term="rust"/>
    <summary>Entry summary</summary>
  </entry>
</feed>"#;

        let feed = parse_feed(atom.as_bytes()).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Atom Example"));
        assert_eq!(feed.link.as_deref(), Some("https://atom.example.org/"));
        assert_eq!(feed.items.len(), 1);

        let item = &feed.items[0];
        assert_eq!(item.title.as_deref(), Some("Atom entry"));
        assert_eq!(item.link.as_deref(), Some("https://atom.example.org/entry-1"));
        assert_eq!(item.guid.as_deref(), Some("urn:uuid:entry-1"));
        assert_eq!(item.author.as_deref(), Some("Ann Author"));
        assert_eq!(item.categories, vec!["rust"]);
        assert_eq!(item.description.as_deref(), Some("Entry summary"));
        assert!(item.iso_date.as_deref().unwrap().starts_with("2024-03-01T09:00:00"));
        assert_eq!(item.enclosures.len(), 1);
        assert_eq!(item.enclosures[0].mime_type.as_deref(), Some("image/png"));
    }
}
