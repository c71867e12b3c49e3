use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::util::{site_origin, strip_control_chars};

static SCRIPT_STYLE_IFRAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?is)<script\b[^>]*>.*?</script\s*>",
        r"|<style\b[^>]*>.*?</style\s*>",
        r"|<iframe\b[^>]*>.*?</iframe\s*>",
    ))
    .expect("valid block element regex")
});

/// Openers or closers left behind by unbalanced markup
static STRAY_BLOCK_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)</?(?:script|style|iframe)\b[^>]*>").expect("valid stray tag regex")
});

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?(?:-->|\z)").expect("valid comment regex"));

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31});")
        .expect("valid entity regex")
});

static TAG_WITH_ATTRS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<([a-z][a-z0-9]*)(\s[^>]*)>").expect("valid tag regex")
});

static URL_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(\s)(href|src)(\s*=\s*)(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("valid url attribute regex")
});

static IMG_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*?\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("valid img regex")
});

static ANY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)</?[a-zA-Z!][^>]*>").expect("valid tag regex"));

static PARAGRAPH_GAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</p>\s+<p\b").expect("valid paragraph regex"));

static BLANK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t\r\x0C]*\n\s*").expect("valid blank line regex"));

static BARE_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^[a-z0-9](?:[a-z0-9-]*[a-z0-9])?",
        r"(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)+",
        r"(?::[0-9]{1,5})?$",
    ))
    .expect("valid host regex")
});

/// File extensions that make `name.ext/...` a relative path, not a domain.
const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "svg", "bmp", "avif", "ico", "tif", "tiff",
];

/// Cleans feed-provided HTML for storage.
///
/// Holds the origin used to absolutize root-relative URLs. Build one per
/// feed run with [`ContentSanitizer::for_feed`].
#[derive(Debug, Clone, Default)]
pub struct ContentSanitizer {
    base: Option<String>,
}

impl ContentSanitizer {
    /// `base` is an origin such as `https://example.com` (no trailing slash).
    pub fn new(base: Option<String>) -> Self {
        Self { base }
    }

    /// Uses the channel's own site link as base, falling back to the origin
    /// of the URL the feed was fetched from.
    pub fn for_feed(channel_link: Option<&str>, feed_url: &str) -> Self {
        let base = channel_link
            .and_then(site_origin)
            .or_else(|| site_origin(feed_url));
        Self { base }
    }

    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// Applies the full cleaning sequence to an HTML fragment.
    ///
    /// 1. `<script>`, `<style>` and `<iframe>` elements are removed with their content
    /// 2. HTML comments are removed
    /// 3. Character entities are decoded (HTML5 named plus numeric forms)
    /// 4. Bare-domain and protocol-relative `<img src>` values get `https://`
    /// 5. Root-relative `href`/`src` values are made absolute against the base
    /// 6. Whitespace runs collapse to one space; paragraph breaks survive
    ///
    /// Unknown entities and malformed tags are left in place.
    pub fn sanitize(&self, html: &str) -> String {
        let cleaned = remove_active_elements(&strip_control_chars(html));
        let cleaned = COMMENT.replace_all(&cleaned, "");
        let cleaned = decode_entities(&cleaned);
        // Escaped markup becomes live once decoded
        let cleaned = remove_active_elements(&cleaned);
        let cleaned = self.rewrite_urls(&cleaned);
        collapse_whitespace(&cleaned)
    }

    /// Reduces an HTML fragment to a single line of plain text.
    ///
    /// Sanitizes first, so markup hidden behind entities is decoded and then
    /// stripped rather than surfacing as literal tags.
    pub fn plain_text(&self, html: &str) -> String {
        text_content(&self.sanitize(html))
    }

    /// Cleans a single URL taken from feed markup or attributes.
    ///
    /// Decodes entities, repairs bare-domain and protocol-relative forms and
    /// absolutizes root-relative paths. Returns `None` for blank input.
    pub fn resolve_url(&self, raw: &str) -> Option<String> {
        let decoded = decode_entities(raw.trim());
        let trimmed = decoded.trim();
        if trimmed.is_empty() {
            return None;
        }
        let repaired = repair_url(trimmed);
        Some(self.absolutize(&repaired).into_owned())
    }

    fn absolutize<'a>(&self, value: &'a str) -> Cow<'a, str> {
        match &self.base {
            Some(base) if value.starts_with('/') && !value.starts_with("//") => {
                Cow::Owned(format!("{base}{value}"))
            }
            _ => Cow::Borrowed(value),
        }
    }

    fn rewrite_urls<'a>(&self, html: &'a str) -> Cow<'a, str> {
        TAG_WITH_ATTRS.replace_all(html, |tag: &Captures<'_>| {
            let name = &tag[1];
            let is_img = name.eq_ignore_ascii_case("img");

            let attrs = URL_ATTR.replace_all(&tag[2], |attr: &Captures<'_>| {
                let (value, quote) = match (attr.get(4), attr.get(5), attr.get(6)) {
                    (Some(v), _, _) => (v.as_str(), "\""),
                    (_, Some(v), _) => (v.as_str(), "'"),
                    (_, _, Some(v)) => (v.as_str(), "\""),
                    _ => return attr[0].to_string(),
                };
                let key = &attr[2];
                let value = if is_img && key.eq_ignore_ascii_case("src") {
                    repair_url(value)
                } else {
                    Cow::Borrowed(value)
                };
                let value = self.absolutize(&value);
                format!("{}{}{}{quote}{value}{quote}", &attr[1], key, &attr[3])
            });

            format!("<{name}{attrs}>")
        })
    }
}

/// Removes script, style and iframe elements until none are left.
///
/// Repeats because removing one element can splice the text around it into
/// a new opening tag (`<scr<script></script>ipt>`).
fn remove_active_elements(html: &str) -> String {
    let mut current = html.to_string();
    loop {
        let next = {
            let without_blocks = SCRIPT_STYLE_IFRAME.replace_all(&current, "");
            STRAY_BLOCK_TAG.replace_all(&without_blocks, "").into_owned()
        };
        // Each pass only removes text
        if next.len() == current.len() {
            return current;
        }
        current = next;
    }
}

/// Drops the tags from already sanitized HTML and joins the words with
/// single spaces. Entities are not decoded again.
pub fn text_content(sanitized: &str) -> String {
    ANY_TAG
        .replace_all(sanitized, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Returns the `src` of the first `<img>` in `html`, in whichever quoting
/// style it was written.
pub fn first_img_src(html: &str) -> Option<&str> {
    IMG_SRC.captures_iter(html).find_map(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().trim())
            .filter(|src| !src.is_empty())
    })
}

/// Decodes named, decimal and hexadecimal character references.
///
/// Named references use the HTML5 table from `html_escape`; `&nbsp;` becomes
/// a plain space. Unknown names, `&#0;` and numeric references outside the
/// Unicode scalar range are left untouched. A single pass: `&amp;lt;`
/// becomes `&lt;`, not `<`.
pub fn decode_entities(s: &str) -> Cow<'_, str> {
    if !s.contains('&') {
        return Cow::Borrowed(s);
    }
    ENTITY.replace_all(s, |caps: &Captures<'_>| {
        let body = &caps[1];
        let hex = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X"));
        let decoded = if let Some(hex) = hex {
            u32::from_str_radix(hex, 16).ok().and_then(numeric_char)
        } else if let Some(dec) = body.strip_prefix('#') {
            dec.parse::<u32>().ok().and_then(numeric_char)
        } else {
            named_entity(&caps[0])
        };
        decoded.unwrap_or_else(|| caps[0].to_string())
    })
}

fn numeric_char(code: u32) -> Option<String> {
    if code == 0 {
        return None;
    }
    char::from_u32(code).map(String::from)
}

/// `reference` is a whole `&name;` token.
fn named_entity(reference: &str) -> Option<String> {
    if reference == "&nbsp;" {
        return Some(" ".to_string());
    }
    let decoded = html_escape::decode_html_entities(reference);
    (decoded != reference).then(|| decoded.into_owned())
}

/// Adds `https:` to protocol-relative URLs and `https://` to bare domains.
///
/// A bare domain is a dotted host followed by a path, such as
/// `cdn.example.com/a.jpg`. A relative file path like `images.png/x` is not
/// mistaken for one because its last label is an image extension.
pub fn repair_url(value: &str) -> Cow<'_, str> {
    if value.starts_with("//") {
        return Cow::Owned(format!("https:{value}"));
    }
    if looks_like_bare_domain(value) {
        return Cow::Owned(format!("https://{value}"));
    }
    Cow::Borrowed(value)
}

fn looks_like_bare_domain(value: &str) -> bool {
    let Some((host, _path)) = value.split_once('/') else {
        return false;
    };
    if !BARE_HOST.is_match(host) {
        return false;
    }
    let without_port = host.split(':').next().unwrap_or(host);
    let tld = without_port.rsplit('.').next().unwrap_or_default();
    tld.chars().all(|c| c.is_ascii_alphabetic())
        && !IMAGE_EXTENSIONS.iter().any(|ext| tld.eq_ignore_ascii_case(ext))
}

fn collapse_whitespace(html: &str) -> String {
    let html = html.replace("\r\n", "\n");
    let html = PARAGRAPH_GAP.replace_all(&html, "</p><p");

    BLANK_LINE
        .split(&html)
        .map(|para| para.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|para| !para.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
