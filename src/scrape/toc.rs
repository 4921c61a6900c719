//! Table-of-contents page extractor.
//!
//! An explicit state machine over markup events. Transitions are keyed on
//! (current state, tag name, class attribute); block kinds that can nest
//! containers of the same tag carry a depth counter, so an inner `div`
//! never ends its enclosing block early. Captured text runs through the
//! punctuation pass inline.

use crate::scrape::events::{drive, has_class, MarkupSink};
use crate::text::normalize_punct;
use scraper::node::Element;

/// One entry of the chapter list, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TocItem {
    VolumeHeading { title: String },
    ChapterLink { href: String, title: String },
}

/// Everything one TOC page yields.
#[derive(Debug, Default)]
pub struct TocPage {
    pub title: String,
    pub author: String,
    pub summary: String,
    pub items: Vec<TocItem>,
    /// Pagination "next" link, relative to the page URL. First match wins.
    pub next_href: Option<String>,
}

enum State {
    Scan,
    Title,
    Author { depth: u32 },
    Synopsis { depth: u32 },
    List { depth: u32 },
    VolumeHeading { list_depth: u32, depth: u32 },
    ChapterLink { list_depth: u32, href: String },
}

struct TocExtractor {
    state: State,
    remove_furigana: bool,
    ruby_skip: u32,
    title: String,
    author: String,
    summary: String,
    volume_buf: String,
    chapter_buf: String,
    items: Vec<TocItem>,
    next_href: Option<String>,
}

impl TocExtractor {
    fn new(remove_furigana: bool) -> Self {
        TocExtractor {
            state: State::Scan,
            remove_furigana,
            ruby_skip: 0,
            title: String::new(),
            author: String::new(),
            summary: String::new(),
            volume_buf: String::new(),
            chapter_buf: String::new(),
            items: Vec::new(),
            next_href: None,
        }
    }

    fn finish(self) -> TocPage {
        let author = self
            .author
            .trim()
            .strip_prefix("作者：")
            .unwrap_or(self.author.trim())
            .trim()
            .to_string();
        let summary = self
            .summary
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        TocPage {
            title: self.title.trim().to_string(),
            author,
            summary,
            items: self.items,
            next_href: self.next_href,
        }
    }
}

impl MarkupSink for TocExtractor {
    fn open_tag(&mut self, name: &str, element: &Element) {
        if name == "rt" || name == "rp" {
            if self.remove_furigana {
                self.ruby_skip += 1;
            }
            return;
        }
        // The pagination link can sit anywhere on the page.
        if name == "a" && self.next_href.is_none() && has_class(element, "c-pager__item--next") {
            if let Some(href) = element.attr("href") {
                self.next_href = Some(href.to_string());
                return;
            }
        }
        match &mut self.state {
            State::Scan => match name {
                "h1" if has_class(element, "p-novel__title") => self.state = State::Title,
                "div" => {
                    if element.attr("id") == Some("novel_ex")
                        || has_class(element, "p-novel__summary")
                    {
                        self.state = State::Synopsis { depth: 1 };
                    } else if has_class(element, "p-novel__author") {
                        self.state = State::Author { depth: 1 };
                    } else if has_class(element, "p-eplist") {
                        self.state = State::List { depth: 1 };
                    }
                }
                _ => {}
            },
            State::Author { depth } => {
                if name == "div" {
                    *depth += 1;
                }
            }
            State::Synopsis { depth } => match name {
                "div" => *depth += 1,
                "br" => self.summary.push('\n'),
                _ => {}
            },
            State::List { depth } => match name {
                "div" => {
                    if has_class(element, "p-eplist__chapter-title") {
                        self.volume_buf.clear();
                        self.state = State::VolumeHeading {
                            list_depth: *depth,
                            depth: 1,
                        };
                    } else {
                        *depth += 1;
                    }
                }
                "a" if has_class(element, "p-eplist__subtitle") => {
                    if let Some(href) = element.attr("href") {
                        self.chapter_buf.clear();
                        self.state = State::ChapterLink {
                            list_depth: *depth,
                            href: href.to_string(),
                        };
                    }
                }
                _ => {}
            },
            State::VolumeHeading { depth, .. } => {
                if name == "div" {
                    *depth += 1;
                }
            }
            State::Title | State::ChapterLink { .. } => {}
        }
    }

    fn close_tag(&mut self, name: &str) {
        if name == "rt" || name == "rp" {
            if self.remove_furigana && self.ruby_skip > 0 {
                self.ruby_skip -= 1;
            }
            return;
        }
        match std::mem::replace(&mut self.state, State::Scan) {
            State::Title => {
                if name != "h1" {
                    self.state = State::Title;
                }
            }
            State::Author { depth } => {
                if name == "div" {
                    if depth > 1 {
                        self.state = State::Author { depth: depth - 1 };
                    }
                } else {
                    self.state = State::Author { depth };
                }
            }
            State::Synopsis { depth } => {
                if name == "div" {
                    if depth > 1 {
                        self.state = State::Synopsis { depth: depth - 1 };
                    } else {
                        self.summary.push('\n');
                    }
                } else {
                    if name == "p" {
                        self.summary.push('\n');
                    }
                    self.state = State::Synopsis { depth };
                }
            }
            State::List { depth } => {
                if name == "div" {
                    if depth > 1 {
                        self.state = State::List { depth: depth - 1 };
                    }
                } else {
                    self.state = State::List { depth };
                }
            }
            State::VolumeHeading { list_depth, depth } => {
                if name == "div" {
                    if depth > 1 {
                        self.state = State::VolumeHeading {
                            list_depth,
                            depth: depth - 1,
                        };
                    } else {
                        let title = self.volume_buf.trim().to_string();
                        if !title.is_empty() {
                            self.items.push(TocItem::VolumeHeading { title });
                        }
                        self.state = State::List { depth: list_depth };
                    }
                } else {
                    self.state = State::VolumeHeading { list_depth, depth };
                }
            }
            State::ChapterLink { list_depth, href } => {
                if name == "a" {
                    self.items.push(TocItem::ChapterLink {
                        href,
                        title: self.chapter_buf.trim().to_string(),
                    });
                    self.state = State::List { depth: list_depth };
                } else {
                    self.state = State::ChapterLink { list_depth, href };
                }
            }
            State::Scan => {}
        }
    }

    fn text(&mut self, data: &str) {
        if self.remove_furigana && self.ruby_skip > 0 {
            return;
        }
        match &self.state {
            State::Title => self.title.push_str(&normalize_punct(data)),
            State::Author { .. } => self.author.push_str(&normalize_punct(data)),
            State::Synopsis { .. } => self.summary.push_str(&normalize_punct(data)),
            State::VolumeHeading { .. } => self.volume_buf.push_str(&normalize_punct(data)),
            State::ChapterLink { .. } => self.chapter_buf.push_str(&normalize_punct(data)),
            _ => {}
        }
    }
}

/// Extract one TOC page. Tolerant of malformed markup: anything missing
/// comes back empty rather than failing.
pub fn parse_toc_page(page_html: &str, remove_furigana: bool) -> TocPage {
    let mut extractor = TocExtractor::new(remove_furigana);
    drive(page_html, &mut extractor);
    extractor.finish()
}
