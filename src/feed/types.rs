/// A feed document reduced to the fields the pipeline consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    /// The site link advertised by the channel. Base for root-relative URLs.
    pub link: Option<String>,
    pub items: Vec<RawFeedItem>,
}

/// An `<enclosure>` (RSS) or `rel="enclosure"` link (Atom).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: Option<String>,
}

/// Where a [`MediaRef`] came from in the Media RSS extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// `<media:content>` directly under the item
    Content,
    /// `<media:content>` nested in a `<media:group>`
    GroupContent,
    /// `<media:thumbnail>`
    Thumbnail,
}

/// A Media RSS reference (`media:content`, `media:thumbnail`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub url: String,
    pub mime_type: Option<String>,
    /// The `medium` attribute: image, video, audio, document, executable
    pub medium: Option<String>,
}

impl MediaRef {
    /// True unless the reference declares itself as something other than an image.
    pub fn may_be_image(&self) -> bool {
        if self.kind == MediaKind::Thumbnail {
            return true;
        }
        let mime_ok = self
            .mime_type
            .as_deref()
            .is_none_or(|m| m.trim().to_ascii_lowercase().starts_with("image/"));
        let medium_ok = self
            .medium
            .as_deref()
            .is_none_or(|m| m.trim().eq_ignore_ascii_case("image"));
        mime_ok && medium_ok
    }
}

/// One entry of a feed, exactly as the source presented it.
///
/// Every field is optional: which ones are present depends on the feed
/// dialect. Nothing here is cleaned or resolved; that is the normalizer's job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFeedItem {
    pub title: Option<String>,
    pub description: Option<String>,
    /// `content:encoded` (RSS) or `<content>` (Atom)
    pub content: Option<String>,
    pub guid: Option<String>,
    pub link: Option<String>,
    /// `dc:date` (RSS) or `published`/`updated` (Atom), ISO 8601
    pub iso_date: Option<String>,
    /// RSS `pubDate`, RFC 822
    pub pub_date: Option<String>,
    /// `dc:creator`
    pub creator: Option<String>,
    /// RSS `author` or the first Atom author
    pub author: Option<String>,
    pub categories: Vec<String>,
    pub enclosures: Vec<Enclosure>,
    pub media: Vec<MediaRef>,
    /// A non-standard `<image>` child, either as text or as `<image><url>`
    pub image: Option<String>,
}
