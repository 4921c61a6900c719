//! Chapter page extractor.
//!
//! Like the TOC variant, an explicit state machine over markup events. A
//! single depth counter covers the three text-block kinds (body, preface,
//! afterword) told apart by class at block entry; preface and afterword
//! blocks emit paired structural markers. Each captured paragraph keeps a
//! markup-preserving fragment plus a plain-text shadow used only to decide
//! whether the paragraph is blank.

use crate::model::{Paragraph, SectionMarker};
use crate::scrape::events::{drive, has_class, MarkupSink};
use crate::text::{escape_html, normalize_punct};
use scraper::node::Element;

/// Structured output of one chapter page.
#[derive(Debug, Default)]
pub struct ChapterPage {
    pub title: String,
    pub paragraphs: Vec<Paragraph>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Body,
    Preface,
    Afterword,
}

impl BlockKind {
    fn start_marker(self) -> Option<SectionMarker> {
        match self {
            BlockKind::Body => None,
            BlockKind::Preface => Some(SectionMarker::PrefaceStart),
            BlockKind::Afterword => Some(SectionMarker::AfterwordStart),
        }
    }

    fn end_marker(self) -> Option<SectionMarker> {
        match self {
            BlockKind::Body => None,
            BlockKind::Preface => Some(SectionMarker::PrefaceEnd),
            BlockKind::Afterword => Some(SectionMarker::AfterwordEnd),
        }
    }
}

enum State {
    Scan,
    Title,
    Block { kind: BlockKind, depth: u32 },
    Para { kind: BlockKind, depth: u32 },
}

struct ChapterExtractor {
    state: State,
    remove_furigana: bool,
    ruby_skip: u32,
    title: String,
    paragraphs: Vec<Paragraph>,
    // Current paragraph: markup fragment and its plain-text shadow.
    fragment: String,
    shadow: String,
}

impl ChapterExtractor {
    fn new(remove_furigana: bool) -> Self {
        ChapterExtractor {
            state: State::Scan,
            remove_furigana,
            ruby_skip: 0,
            title: String::new(),
            paragraphs: Vec::new(),
            fragment: String::new(),
            shadow: String::new(),
        }
    }

    fn in_paragraph(&self) -> bool {
        matches!(self.state, State::Para { .. })
    }

    fn push_image(&mut self, element: &Element) {
        let src = element.attr("src").unwrap_or("");
        if src.is_empty() {
            return;
        }
        let alt = element.attr("alt").unwrap_or("");
        self.fragment.push_str(&format!(
            "<img src=\"{}\" alt=\"{}\" />",
            escape_html(src),
            escape_html(alt)
        ));
    }

    fn flush_paragraph(&mut self) {
        if self.shadow.trim().is_empty() && self.fragment.trim().is_empty() {
            self.paragraphs.push(Paragraph::Blank);
        } else {
            self.paragraphs.push(Paragraph::Text(std::mem::take(
                &mut self.fragment,
            )));
        }
        self.fragment.clear();
        self.shadow.clear();
    }

    fn end_block(&mut self, kind: BlockKind) {
        // The block's trailing blank run is suppressed; one blank then
        // separates it from whatever follows.
        while self.paragraphs.last() == Some(&Paragraph::Blank) {
            self.paragraphs.pop();
        }
        if let Some(marker) = kind.end_marker() {
            self.paragraphs.push(Paragraph::Marker(marker));
        }
        if !self.paragraphs.is_empty() {
            self.paragraphs.push(Paragraph::Blank);
        }
    }

    fn finish(mut self) -> ChapterPage {
        // Trim trailing blanks; keep one when the chapter ends on a
        // structural marker so its spacing survives.
        let mut popped = false;
        while self.paragraphs.last() == Some(&Paragraph::Blank) {
            self.paragraphs.pop();
            popped = true;
        }
        if popped && matches!(self.paragraphs.last(), Some(Paragraph::Marker(_))) {
            self.paragraphs.push(Paragraph::Blank);
        }
        ChapterPage {
            title: self.title.trim().to_string(),
            paragraphs: self.paragraphs,
        }
    }
}

impl MarkupSink for ChapterExtractor {
    fn open_tag(&mut self, name: &str, element: &Element) {
        match name {
            "rt" | "rp" => {
                if self.remove_furigana {
                    self.ruby_skip += 1;
                } else if self.in_paragraph() {
                    self.fragment.push('<');
                    self.fragment.push_str(name);
                    self.fragment.push('>');
                }
                return;
            }
            "ruby" => {
                if !self.remove_furigana && self.in_paragraph() {
                    self.fragment.push_str("<ruby>");
                }
                return;
            }
            "img" => {
                if self.in_paragraph() {
                    self.push_image(element);
                }
                return;
            }
            _ => {}
        }
        match &mut self.state {
            State::Scan => match name {
                "h1" if has_class(element, "p-novel__title") => self.state = State::Title,
                "div" => {
                    let is_preface = has_class(element, "p-novel__text--preface");
                    let is_afterword = has_class(element, "p-novel__text--afterword");
                    let kind = if is_preface {
                        Some(BlockKind::Preface)
                    } else if is_afterword {
                        Some(BlockKind::Afterword)
                    } else if has_class(element, "p-novel__text") {
                        Some(BlockKind::Body)
                    } else {
                        None
                    };
                    if let Some(kind) = kind {
                        if let Some(marker) = kind.start_marker() {
                            self.paragraphs.push(Paragraph::Marker(marker));
                        }
                        self.state = State::Block { kind, depth: 1 };
                    }
                }
                _ => {}
            },
            State::Block { kind, depth } => match name {
                "div" => *depth += 1,
                "p" => {
                    let (kind, depth) = (*kind, *depth);
                    self.fragment.clear();
                    self.shadow.clear();
                    self.state = State::Para { kind, depth };
                }
                _ => {}
            },
            State::Para { depth, .. } => match name {
                "div" => *depth += 1,
                "br" => {
                    self.fragment.push_str("<br />");
                    self.shadow.push('\n');
                }
                _ => {}
            },
            State::Title => {}
        }
    }

    fn close_tag(&mut self, name: &str) {
        match name {
            "rt" | "rp" => {
                if self.remove_furigana {
                    if self.ruby_skip > 0 {
                        self.ruby_skip -= 1;
                    }
                } else if self.in_paragraph() {
                    self.fragment.push_str("</");
                    self.fragment.push_str(name);
                    self.fragment.push('>');
                }
                return;
            }
            "ruby" => {
                if !self.remove_furigana && self.in_paragraph() {
                    self.fragment.push_str("</ruby>");
                }
                return;
            }
            _ => {}
        }
        match std::mem::replace(&mut self.state, State::Scan) {
            State::Title => {
                if name != "h1" {
                    self.state = State::Title;
                }
            }
            State::Block { kind, depth } => {
                if name == "div" {
                    if depth > 1 {
                        self.state = State::Block {
                            kind,
                            depth: depth - 1,
                        };
                    } else {
                        self.end_block(kind);
                    }
                } else {
                    self.state = State::Block { kind, depth };
                }
            }
            State::Para { kind, depth } => match name {
                "p" => {
                    self.flush_paragraph();
                    self.state = State::Block { kind, depth };
                }
                "div" => {
                    if depth > 1 {
                        self.state = State::Para {
                            kind,
                            depth: depth - 1,
                        };
                    } else {
                        // Block closed around an unclosed paragraph.
                        self.flush_paragraph();
                        self.end_block(kind);
                    }
                }
                _ => self.state = State::Para { kind, depth },
            },
            State::Scan => {}
        }
    }

    fn text(&mut self, data: &str) {
        if self.remove_furigana && self.ruby_skip > 0 {
            return;
        }
        match self.state {
            State::Title => self.title.push_str(&normalize_punct(data)),
            State::Para { .. } => {
                let normalized = normalize_punct(data);
                self.fragment.push_str(&escape_html(&normalized));
                self.shadow.push_str(&normalized);
            }
            _ => {}
        }
    }
}

/// Extract one chapter page: the heading plus the paragraph sequence.
/// Malformed markup degrades to empty output rather than failing.
pub fn parse_chapter_page(page_html: &str, remove_furigana: bool) -> ChapterPage {
    let mut extractor = ChapterExtractor::new(remove_furigana);
    drive(page_html, &mut extractor);
    extractor.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(page: &ChapterPage) -> Vec<String> {
        page.paragraphs
            .iter()
            .map(|p| match p {
                Paragraph::Blank => "<blank>".to_string(),
                Paragraph::Marker(m) => format!("<{:?}>", m),
                Paragraph::Text(t) => t.clone(),
            })
            .collect()
    }

    #[test]
    fn extracts_title_and_body_paragraphs() {
        let html = r#"
            <h1 class="p-novel__title">第1話　始まり</h1>
            <div class="p-novel__text">
              <p>line one</p>
              <p>line two</p>
            </div>"#;
        let page = parse_chapter_page(html, false);
        assert_eq!(page.title, "第１話　始まり");
        assert_eq!(
            page.paragraphs,
            vec![
                Paragraph::Text("line one".into()),
                Paragraph::Text("line two".into()),
            ]
        );
    }

    #[test]
    fn preface_with_trailing_empty_paragraph_keeps_one_blank() {
        let html = r#"
            <div class="p-novel__text p-novel__text--preface"><p>sentence</p></div>
            <div class="p-novel__text"><p></p></div>"#;
        let page = parse_chapter_page(html, false);
        assert_eq!(
            page.paragraphs,
            vec![
                Paragraph::Marker(SectionMarker::PrefaceStart),
                Paragraph::Text("sentence".into()),
                Paragraph::Marker(SectionMarker::PrefaceEnd),
                Paragraph::Blank,
            ]
        );
    }

    #[test]
    fn afterword_block_emits_paired_markers() {
        let html = r#"
            <div class="p-novel__text"><p>body</p></div>
            <div class="p-novel__text p-novel__text--afterword"><p>thanks</p></div>"#;
        let page = parse_chapter_page(html, false);
        assert_eq!(
            page.paragraphs,
            vec![
                Paragraph::Text("body".into()),
                Paragraph::Blank,
                Paragraph::Marker(SectionMarker::AfterwordStart),
                Paragraph::Text("thanks".into()),
                Paragraph::Marker(SectionMarker::AfterwordEnd),
                Paragraph::Blank,
            ]
        );
    }

    #[test]
    fn interior_empty_paragraphs_become_blanks() {
        let html = r#"<div class="p-novel__text"><p>a</p><p></p><p>b</p></div>"#;
        let page = parse_chapter_page(html, false);
        assert_eq!(
            page.paragraphs,
            vec![
                Paragraph::Text("a".into()),
                Paragraph::Blank,
                Paragraph::Text("b".into()),
            ]
        );
    }

    #[test]
    fn trailing_blanks_after_plain_text_are_trimmed() {
        let html = r#"<div class="p-novel__text"><p>a</p><p></p><p></p></div>"#;
        let page = parse_chapter_page(html, false);
        assert_eq!(page.paragraphs, vec![Paragraph::Text("a".into())]);
    }

    #[test]
    fn line_breaks_become_fragment_breaks() {
        let html = r#"<div class="p-novel__text"><p>a<br>b</p></div>"#;
        let page = parse_chapter_page(html, false);
        assert_eq!(page.paragraphs, vec![Paragraph::Text("a<br />b".into())]);
    }

    #[test]
    fn text_is_normalized_then_escaped() {
        let html = r#"<div class="p-novel__text"><p>a &amp; b!</p></div>"#;
        let page = parse_chapter_page(html, false);
        assert_eq!(
            page.paragraphs,
            vec![Paragraph::Text("a &amp; b！".into())]
        );
    }

    #[test]
    fn ruby_is_preserved_unless_suppressed() {
        let html =
            r#"<div class="p-novel__text"><p><ruby>漢<rt>かん</rt></ruby></p></div>"#;
        let kept = parse_chapter_page(html, false);
        assert_eq!(
            kept.paragraphs,
            vec![Paragraph::Text("<ruby>漢<rt>かん</rt></ruby>".into())]
        );
        let stripped = parse_chapter_page(html, true);
        assert_eq!(stripped.paragraphs, vec![Paragraph::Text("漢".into())]);
    }

    #[test]
    fn images_become_canonical_fragments() {
        let html = r#"<div class="p-novel__text"><p><img src="//img.example/1.png?a=b&amp;c=d" alt="fig"></p></div>"#;
        let page = parse_chapter_page(html, false);
        assert_eq!(
            page.paragraphs,
            vec![Paragraph::Text(
                "<img src=\"//img.example/1.png?a=b&amp;c=d\" alt=\"fig\" />".into()
            )]
        );
    }

    #[test]
    fn image_without_src_is_dropped() {
        let html = r#"<div class="p-novel__text"><p><img alt="x"></p></div>"#;
        let page = parse_chapter_page(html, false);
        // The paragraph is then empty, and an all-blank block trims away.
        assert!(page.paragraphs.is_empty());
    }

    #[test]
    fn nested_divs_do_not_end_the_block_early() {
        let html = r#"<div class="p-novel__text"><div><p>inner</p></div><p>after</p></div>"#;
        let page = parse_chapter_page(html, false);
        assert_eq!(
            page.paragraphs,
            vec![
                Paragraph::Text("inner".into()),
                Paragraph::Text("after".into()),
            ]
        );
    }

    #[test]
    fn text_outside_paragraph_tags_is_ignored() {
        let html = r#"<div class="p-novel__text">stray<p>kept</p></div>"#;
        let page = parse_chapter_page(html, false);
        assert_eq!(page.paragraphs, vec![Paragraph::Text("kept".into())]);
    }

    #[test]
    fn malformed_page_degrades_to_empty_output() {
        let page = parse_chapter_page("<div><span>nothing", false);
        assert!(page.title.is_empty());
        assert!(page.paragraphs.is_empty());
    }
}
