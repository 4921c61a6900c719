//! Crawling and extraction: TOC pagination walk, concurrent chapter
//! download, and volume grouping.

pub mod chapter;
pub mod events;
pub mod toc;

use std::collections::HashSet;

use reqwest::Url;
use thiserror::Error;

use crate::download::{run_batch, FailureMode};
use crate::fetch::{FetchError, Fetcher};
use crate::model::{Chapter, Volume, VolumeBreak};
use crate::scrape::chapter::parse_chapter_page;
use crate::scrape::toc::{parse_toc_page, TocItem};

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Failed to fetch TOC page: {url}: {source}")]
    TocFetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Failed to download chapter: {url}: {source}")]
    ChapterDownload {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("No chapters found at {url}.")]
    NoChapters { url: String },
}

/// One merged TOC entry, in document order across all pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TocEntry {
    VolumeHeading { title: String },
    Chapter { url: String, title: String },
}

/// The fully crawled table of contents.
#[derive(Debug, Default)]
pub struct Toc {
    pub title: String,
    pub author: String,
    pub summary: String,
    pub entries: Vec<TocEntry>,
}

impl Toc {
    pub fn chapter_urls(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                TocEntry::Chapter { url, .. } => Some(url.clone()),
                TocEntry::VolumeHeading { .. } => None,
            })
            .collect()
    }
}

/// Merge one parsed page's items into the running entry list. Chapters are
/// deduplicated by absolute URL; a volume heading that repeats the previous
/// entry verbatim is collapsed. Relative hrefs resolve against `page_url`.
fn absorb_page_items(
    entries: &mut Vec<TocEntry>,
    seen_links: &mut HashSet<String>,
    page_url: &Url,
    items: Vec<TocItem>,
) {
    for item in items {
        match item {
            TocItem::VolumeHeading { title } => {
                let title = title.trim().to_string();
                if title.is_empty() {
                    continue;
                }
                if entries.last() == Some(&TocEntry::VolumeHeading { title: title.clone() }) {
                    continue;
                }
                entries.push(TocEntry::VolumeHeading { title });
            }
            TocItem::ChapterLink { href, title } => {
                let full = match page_url.join(&href) {
                    Ok(url) => url.to_string(),
                    Err(_) => continue,
                };
                if !seen_links.insert(full.clone()) {
                    continue;
                }
                entries.push(TocEntry::Chapter {
                    url: full,
                    title: title.trim().to_string(),
                });
            }
        }
    }
}

/// Walk TOC pagination from `start_url` until there is no next link or a
/// page URL repeats (cycle guard). Title, author, and summary come from the
/// first page that supplies each. `page_progress` is called with the page
/// number before each fetch.
pub fn crawl_toc(
    fetcher: &Fetcher,
    start_url: &str,
    remove_furigana: bool,
    page_progress: Option<&dyn Fn(usize)>,
) -> Result<Toc, ScrapeError> {
    let mut toc = Toc::default();
    let mut seen_links: HashSet<String> = HashSet::new();
    let mut seen_pages: HashSet<String> = HashSet::new();
    let mut next_url = start_url.to_string();
    let mut page_num = 1;

    while !next_url.is_empty() {
        if !seen_pages.insert(next_url.clone()) {
            break;
        }
        if let Some(progress) = page_progress {
            progress(page_num);
        }
        let page_url = Url::parse(&next_url).map_err(|e| ScrapeError::InvalidUrl {
            input: next_url.clone(),
            reason: e.to_string(),
        })?;
        let page_html = fetcher
            .fetch_text(&next_url)
            .map_err(|source| ScrapeError::TocFetch {
                url: next_url.clone(),
                source,
            })?;
        let page = parse_toc_page(&page_html, remove_furigana);
        if toc.title.is_empty() && !page.title.is_empty() {
            toc.title = page.title;
        }
        if toc.author.is_empty() && !page.author.is_empty() {
            toc.author = page.author;
        }
        if toc.summary.is_empty() && !page.summary.is_empty() {
            toc.summary = page.summary;
        }
        absorb_page_items(&mut toc.entries, &mut seen_links, &page_url, page.items);
        next_url = match page.next_href {
            Some(href) => page_url
                .join(&href)
                .map(|u| u.to_string())
                .unwrap_or_default(),
            None => String::new(),
        };
        page_num += 1;
    }

    if toc.chapter_urls().is_empty() {
        return Err(ScrapeError::NoChapters {
            url: start_url.to_string(),
        });
    }
    Ok(toc)
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub jobs: usize,
    pub skip_errors: bool,
    pub remove_furigana: bool,
}

/// Fetch and extract every chapter URL, preserving input order. In
/// skip-errors mode failed chapters are warned about and omitted; otherwise
/// the first failure aborts the batch. A chapter page with no extractable
/// title falls back to a positional one.
pub fn download_chapters(
    fetcher: &Fetcher,
    urls: &[String],
    options: &DownloadOptions,
    progress: Option<&dyn Fn(usize, usize)>,
) -> Result<Vec<Chapter>, ScrapeError> {
    let mode = if options.skip_errors {
        FailureMode::SkipErrors
    } else {
        FailureMode::FailFast
    };
    let report = run_batch(urls, options.jobs, mode, progress, |idx, url| {
        let page_html =
            fetcher
                .fetch_text(url)
                .map_err(|source| ScrapeError::ChapterDownload {
                    url: url.clone(),
                    source,
                })?;
        let page = parse_chapter_page(&page_html, options.remove_furigana);
        let title = if page.title.is_empty() {
            format!("Chapter {}", idx + 1)
        } else {
            page.title
        };
        Ok(Chapter {
            title,
            paragraphs: page.paragraphs,
            url: url.clone(),
        })
    })
    .map_err(|failure| failure.error)?;

    if !report.failures.is_empty() {
        eprintln!("\n{} chapters failed to download.", report.failures.len());
        for (_, err) in &report.failures {
            eprintln!("    {}", err);
        }
    }
    Ok(report.into_ordered())
}

/// Group chapter URLs under the volume headings that precede them. Chapters
/// before any heading go into an implicit first volume. `selected` filters
/// chapter URLs but never removes a volume slot; the flag reports whether
/// any explicit heading was seen.
pub fn build_volumes(
    entries: &[TocEntry],
    selected: Option<&HashSet<String>>,
) -> (Vec<Volume>, bool) {
    let mut volumes: Vec<Volume> = Vec::new();
    let mut found_volume = false;
    let mut vol_index = 0usize;
    for entry in entries {
        match entry {
            TocEntry::VolumeHeading { title } => {
                found_volume = true;
                vol_index += 1;
                let title = if title.trim().is_empty() {
                    format!("Volume {}", vol_index)
                } else {
                    title.trim().to_string()
                };
                volumes.push(Volume {
                    title,
                    chapters: Vec::new(),
                });
            }
            TocEntry::Chapter { url, .. } => {
                if volumes.is_empty() {
                    vol_index += 1;
                    volumes.push(Volume {
                        title: format!("Volume {}", vol_index),
                        chapters: Vec::new(),
                    });
                }
                if selected.map_or(true, |set| set.contains(url)) {
                    if let Some(current) = volumes.last_mut() {
                        current.chapters.push(url.clone());
                    }
                }
            }
        }
    }
    (volumes, found_volume)
}

/// Map populated volumes onto downloaded-chapter index ranges (inclusive).
/// Volumes whose chapters all failed or were deselected produce no break.
pub fn build_volume_breaks(volumes: &[Volume], chapters: &[Chapter]) -> Vec<VolumeBreak> {
    let index_of: std::collections::HashMap<&str, usize> = chapters
        .iter()
        .enumerate()
        .map(|(idx, chap)| (chap.url.as_str(), idx))
        .collect();
    let mut breaks = Vec::new();
    for (vol_idx, volume) in volumes.iter().enumerate() {
        let title = if volume.title.trim().is_empty() {
            format!("Volume {}", vol_idx + 1)
        } else {
            volume.title.trim().to_string()
        };
        let indices: Vec<usize> = volume
            .chapters
            .iter()
            .filter_map(|url| index_of.get(url.as_str()).copied())
            .collect();
        if let (Some(&start), Some(&end)) = (indices.iter().min(), indices.iter().max()) {
            breaks.push(VolumeBreak { title, start, end });
        }
    }
    breaks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Paragraph;

    fn base() -> Url {
        Url::parse("https://ncode.syosetu.com/n1234ab/").unwrap()
    }

    fn chapter(url: &str, title: &str) -> TocEntry {
        TocEntry::Chapter {
            url: url.into(),
            title: title.into(),
        }
    }

    #[test]
    fn absorb_resolves_relative_hrefs_and_dedupes() {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        absorb_page_items(
            &mut entries,
            &mut seen,
            &base(),
            vec![
                TocItem::ChapterLink {
                    href: "/n1234ab/1/".into(),
                    title: "one".into(),
                },
                TocItem::ChapterLink {
                    href: "/n1234ab/1/".into(),
                    title: "dup".into(),
                },
            ],
        );
        assert_eq!(
            entries,
            vec![chapter("https://ncode.syosetu.com/n1234ab/1/", "one")]
        );
    }

    #[test]
    fn absorb_collapses_repeated_volume_heading_across_pages() {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        absorb_page_items(
            &mut entries,
            &mut seen,
            &base(),
            vec![
                TocItem::VolumeHeading { title: "第一巻".into() },
                TocItem::ChapterLink {
                    href: "/n1234ab/1/".into(),
                    title: "a".into(),
                },
            ],
        );
        // Paginated lists repeat the active heading at the top of page 2.
        absorb_page_items(
            &mut entries,
            &mut seen,
            &base(),
            vec![
                TocItem::VolumeHeading { title: "第一巻".into() },
                TocItem::ChapterLink {
                    href: "/n1234ab/2/".into(),
                    title: "b".into(),
                },
            ],
        );
        let headings = entries
            .iter()
            .filter(|e| matches!(e, TocEntry::VolumeHeading { .. }))
            .count();
        assert_eq!(headings, 1);
    }

    #[test]
    fn chapters_before_any_heading_get_an_implicit_first_volume() {
        let entries = vec![
            chapter("u1", "one"),
            TocEntry::VolumeHeading { title: "第二巻".into() },
            chapter("u2", "two"),
            chapter("u3", "three"),
        ];
        let (volumes, found) = build_volumes(&entries, None);
        assert!(found);
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].title, "Volume 1");
        assert_eq!(volumes[0].chapters, vec!["u1"]);
        assert_eq!(volumes[1].title, "第二巻");
        assert_eq!(volumes[1].chapters, vec!["u2", "u3"]);
    }

    #[test]
    fn no_headings_yield_single_implicit_volume() {
        let entries = vec![chapter("u1", "one"), chapter("u2", "two")];
        let (volumes, found) = build_volumes(&entries, None);
        assert!(!found);
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].chapters.len(), 2);
    }

    #[test]
    fn selection_filters_chapters_but_keeps_volume_slots() {
        let entries = vec![
            chapter("u1", "one"),
            TocEntry::VolumeHeading { title: "vol 2".into() },
            chapter("u2", "two"),
            chapter("u3", "three"),
        ];
        let selected: HashSet<String> = ["u2".to_string(), "u3".to_string()].into();
        let (volumes, _) = build_volumes(&entries, Some(&selected));
        assert_eq!(volumes.len(), 2);
        assert!(volumes[0].chapters.is_empty());
        assert_eq!(volumes[1].chapters, vec!["u2", "u3"]);
    }

    #[test]
    fn volume_breaks_cover_inclusive_index_ranges() {
        let volumes = vec![
            Volume {
                title: "v1".into(),
                chapters: vec!["u1".into()],
            },
            Volume {
                title: "v2".into(),
                chapters: vec!["u2".into(), "u3".into()],
            },
            Volume {
                title: "empty".into(),
                chapters: Vec::new(),
            },
        ];
        let chapters: Vec<Chapter> = ["u1", "u2", "u3"]
            .iter()
            .map(|u| Chapter {
                title: String::new(),
                paragraphs: vec![Paragraph::Text("x".into())],
                url: (*u).to_string(),
            })
            .collect();
        let breaks = build_volume_breaks(&volumes, &chapters);
        assert_eq!(breaks.len(), 2);
        assert_eq!((breaks[0].start, breaks[0].end), (0, 0));
        assert_eq!((breaks[1].start, breaks[1].end), (1, 2));
    }

    // Mirrors the paginated-TOC flow end to end, minus the network: two
    // parsed pages merge into one entry list, a heading before chapter 2
    // splits the volumes, and selecting chapters 2-3 leaves only volume 2
    // populated.
    #[test]
    fn two_page_toc_with_heading_before_second_chapter() {
        let page1 = r#"
            <h1 class="p-novel__title">Book</h1>
            <div class="p-eplist">
              <a class="p-eplist__subtitle" href="/n1/1/">c1</a>
              <div class="p-eplist__chapter-title">Arc Two</div>
              <a class="p-eplist__subtitle" href="/n1/2/">c2</a>
            </div>
            <a class="c-pager__item--next" href="?p=2">next</a>"#;
        let page2 = r#"
            <div class="p-eplist">
              <a class="p-eplist__subtitle" href="/n1/3/">c3</a>
            </div>"#;

        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let parsed1 = parse_toc_page(page1, false);
        assert!(parsed1.next_href.is_some());
        absorb_page_items(&mut entries, &mut seen, &base(), parsed1.items);
        let parsed2 = parse_toc_page(page2, false);
        assert!(parsed2.next_href.is_none());
        absorb_page_items(&mut entries, &mut seen, &base(), parsed2.items);

        let (volumes, found) = build_volumes(&entries, None);
        assert!(found);
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].chapters, vec!["https://ncode.syosetu.com/n1/1/"]);
        assert_eq!(
            volumes[1].chapters,
            vec![
                "https://ncode.syosetu.com/n1/2/",
                "https://ncode.syosetu.com/n1/3/"
            ]
        );

        let selected: HashSet<String> = volumes[1].chapters.iter().cloned().collect();
        let (filtered, _) = build_volumes(&entries, Some(&selected));
        assert!(filtered[0].chapters.is_empty());
        assert_eq!(filtered[1].chapters.len(), 2);
    }
}
