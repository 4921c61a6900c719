//! Canonical data model for a downloaded novel.
//!
//! The extraction state machines produce this shape; the normalizer, image
//! resolver, and output writers consume it. Chapter order is fixed when the
//! table of contents is crawled and is never reordered downstream.

/// Structural markers emitted by the chapter extractor and the separator pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionMarker {
    PrefaceStart,
    PrefaceEnd,
    AfterwordStart,
    AfterwordEnd,
    Separator,
}

/// One paragraph of a chapter.
///
/// `Text` carries an escaped markup fragment that may contain `<br />`,
/// `<img .../>`, and `ruby`/`rt`/`rp` tags produced by the chapter extractor.
/// `Blank` preserves vertical spacing (an empty `<p>` in the source).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Paragraph {
    Blank,
    Text(String),
    Marker(SectionMarker),
}

impl Paragraph {
    pub fn is_blank(&self) -> bool {
        matches!(self, Paragraph::Blank)
    }

    pub fn is_marker(&self) -> bool {
        matches!(self, Paragraph::Marker(_))
    }
}

/// One chapter in TOC order. Immutable once built by the extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub title: String,
    pub paragraphs: Vec<Paragraph>,
    /// Absolute URL the chapter was fetched from; base for resolving inline images.
    pub url: String,
}

/// A volume heading from the TOC and the chapter URLs grouped under it.
/// Chapters preceding any heading land in an implicit first volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub title: String,
    pub chapters: Vec<String>,
}

/// Derived, read-only view over a chapter sequence: inclusive index range of
/// one volume's chapters. Used only for navigation/grouping in EPUB output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBreak {
    pub title: String,
    pub start: usize,
    pub end: usize,
}

/// One downloaded image, ready to embed in the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageItem {
    /// Container-local path, e.g. `images/image001.png`.
    pub href: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Aggregate consumed by the EPUB and text writers.
#[derive(Debug, Clone)]
pub struct Book {
    pub title: String,
    pub author: String,
    pub summary: String,
    pub chapters: Vec<Chapter>,
    /// Canonical book URL; used for the link on the title page and the
    /// deterministic package identifier.
    pub source_url: String,
}
