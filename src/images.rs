//! Inline image discovery, download, and reference rewriting.
//!
//! Paragraph fragments are scanned for image tags, their sources resolved
//! against the owning chapter's URL and deduplicated in first-seen order,
//! then fetched concurrently in skip-errors mode. Each surviving image gets
//! a sequential container-local name with an extension derived from its
//! media type.

use std::collections::HashMap;
use std::sync::OnceLock;

use base64::Engine;
use regex::{Captures, Regex};
use reqwest::Url;

use crate::download::{run_batch, FailureMode};
use crate::fetch::Fetcher;
use crate::model::{Chapter, ImageItem, Paragraph};
use crate::text::unescape_entities;

fn img_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*(?:"([^"]+)"|'([^']+)'|([^\s>]+))[^>]*>"#)
            .expect("img tag regex")
    })
}

fn src_attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bsrc\s*=\s*(?:"[^"]+"|'[^']+'|[^\s>]+)"#).expect("src attr regex")
    })
}

fn captured_src<'a>(caps: &'a Captures) -> &'a str {
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str())
        .unwrap_or("")
}

/// Absolute form of an image reference: entities undone, `data:` URLs kept
/// verbatim, everything else joined against the chapter URL. An unjoinable
/// source comes back as-is.
pub fn normalize_image_src(src: &str, base_url: &str) -> String {
    let src = unescape_entities(src);
    if src.starts_with("data:") {
        return src;
    }
    match Url::parse(base_url).and_then(|base| base.join(&src)) {
        Ok(url) => url.to_string(),
        Err(_) => src,
    }
}

/// All distinct image sources across the chapters, normalized, in
/// first-seen order.
pub fn extract_image_sources(chapters: &[Chapter], base_url: &str) -> Vec<String> {
    let mut sources = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for chap in chapters {
        let chap_base = if chap.url.is_empty() {
            base_url
        } else {
            &chap.url
        };
        for para in &chap.paragraphs {
            let Paragraph::Text(fragment) = para else {
                continue;
            };
            for caps in img_tag_re().captures_iter(fragment) {
                let raw_src = captured_src(&caps);
                if raw_src.is_empty() {
                    continue;
                }
                let norm = normalize_image_src(raw_src, chap_base);
                if seen.insert(norm.clone()) {
                    sources.push(norm);
                }
            }
        }
    }
    sources
}

fn media_type_from_url(url: &str) -> Option<&'static str> {
    let path = Url::parse(url)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| url.to_ascii_lowercase());
    let media = if path.ends_with(".jpg") || path.ends_with(".jpeg") {
        "image/jpeg"
    } else if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".gif") {
        "image/gif"
    } else if path.ends_with(".webp") {
        "image/webp"
    } else if path.ends_with(".bmp") {
        "image/bmp"
    } else if path.ends_with(".svg") {
        "image/svg+xml"
    } else {
        return None;
    };
    Some(media)
}

fn ext_from_media_type(media_type: &str) -> Option<&'static str> {
    let ext = match media_type.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/bmp" => ".bmp",
        "image/svg+xml" => ".svg",
        _ => return None,
    };
    Some(ext)
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Failed to download image: {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: crate::fetch::FetchError,
    },

    #[error("Invalid data URL image: {0}")]
    DataUrl(String),
}

/// Decode a `data:` URL into bytes and a media type.
fn parse_data_url(src: &str) -> Result<(Vec<u8>, String), ImageError> {
    let Some((header, data)) = src.split_once(',') else {
        return Err(ImageError::DataUrl("missing data section".into()));
    };
    let meta = header.strip_prefix("data:").unwrap_or("");
    let (mime, enc) = match meta.split_once(';') {
        Some((mime, enc)) => (mime, enc),
        None => (meta, ""),
    };
    let media_type = if mime.is_empty() {
        "application/octet-stream".to_string()
    } else {
        mime.to_string()
    };
    if enc.eq_ignore_ascii_case("base64") {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .map_err(|e| ImageError::DataUrl(e.to_string()))?;
        Ok((bytes, media_type))
    } else {
        Ok((data.as_bytes().to_vec(), media_type))
    }
}

/// Download every distinct image the chapters reference. Skip-errors
/// throughout: an unreachable image is warned about and dropped. Returns the
/// source-to-container-path map plus the ordered image list.
pub fn download_images(
    fetcher: &Fetcher,
    chapters: &[Chapter],
    base_url: &str,
    jobs: usize,
    progress: Option<&dyn Fn(usize, usize)>,
) -> (HashMap<String, String>, Vec<ImageItem>) {
    let sources = extract_image_sources(chapters, base_url);
    let mut image_map = HashMap::new();
    let mut images = Vec::new();
    if sources.is_empty() {
        return (image_map, images);
    }

    let report = match run_batch(
        &sources,
        jobs,
        FailureMode::SkipErrors,
        progress,
        |_, src| -> Result<(Vec<u8>, String), ImageError> {
            if src.starts_with("data:") {
                return parse_data_url(src);
            }
            let response = fetcher.fetch(src).map_err(|source| ImageError::Download {
                url: src.clone(),
                source,
            })?;
            let media_type = response
                .content_type
                .as_deref()
                .and_then(|ct| ct.split(';').next())
                .map(str::trim)
                .filter(|ct| !ct.is_empty())
                .map(String::from)
                .or_else(|| media_type_from_url(src).map(String::from))
                .unwrap_or_else(|| "application/octet-stream".to_string());
            Ok((response.bytes, media_type))
        },
    ) {
        Ok(report) => report,
        // Unreachable in skip-errors mode, but don't fail the book over it.
        Err(_) => return (image_map, images),
    };

    for (idx, err) in &report.failures {
        eprintln!("    Failed to download image: {} -> {}", sources[*idx], err);
    }

    let mut counter = 1;
    for (src, result) in sources.iter().zip(report.results) {
        let Some((data, media_type)) = result else {
            continue;
        };
        let ext = ext_from_media_type(&media_type).unwrap_or(".bin");
        let href = format!("images/image{:03}{}", counter, ext);
        image_map.insert(src.clone(), href.clone());
        images.push(ImageItem {
            href,
            media_type,
            data,
        });
        counter += 1;
    }
    (image_map, images)
}

/// Rewrite image sources in a fragment to their container-local paths.
/// References without a mapping (failed downloads) are left alone.
pub fn rewrite_img_srcs(
    fragment: &str,
    base_url: &str,
    image_map: &HashMap<String, String>,
) -> String {
    img_tag_re()
        .replace_all(fragment, |caps: &Captures| {
            let raw_src = captured_src(caps);
            if raw_src.is_empty() {
                return caps[0].to_string();
            }
            let norm = normalize_image_src(raw_src, base_url);
            match image_map.get(&norm) {
                Some(new_src) => src_attr_re()
                    .replace(&caps[0], format!("src=\"{}\"", new_src).as_str())
                    .into_owned(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Flat-text rendering of image tags: a bracketed placeholder naming the
/// resolved source (or "embedded" for data URLs), isolated on its own line.
pub fn replace_img_tags_for_txt(fragment: &str, base_url: &str) -> String {
    img_tag_re()
        .replace_all(fragment, |caps: &Captures| {
            let raw_src = unescape_entities(captured_src(caps));
            if raw_src.is_empty() {
                return String::new();
            }
            if raw_src.starts_with("data:") {
                return "\n[Image: embedded]\n".to_string();
            }
            format!("\n[Image: {}]\n", normalize_image_src(&raw_src, base_url))
        })
        .into_owned()
}

/// Put a line break on each side of every image tag so images never share a
/// line with text in the rendered page.
pub fn ensure_image_breaks(fragment: &str) -> String {
    img_tag_re()
        .replace_all(fragment, |caps: &Captures| format!("<br />{}<br />", &caps[0]))
        .into_owned()
}
