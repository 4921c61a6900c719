//! syoscrape: CLI scraper for syosetu.com novels, outputting EPUB or flat text.

pub mod cli;
pub mod config;
pub mod download;
pub mod epub;
pub mod fetch;
pub mod formats;
pub mod images;
pub mod model;
pub mod scrape;
pub mod text;

// Re-exports for CLI and consumers.
pub use epub::{write_epub, EpubError, EpubOptions};
pub use fetch::{FetchError, Fetcher, FetcherBuilder, RateLimiter};
pub use formats::{write_txt, FormatError, OutputFormat};
pub use model::{Book, Chapter, ImageItem, Paragraph, SectionMarker, Volume, VolumeBreak};
pub use scrape::{
    build_volume_breaks, build_volumes, crawl_toc, download_chapters, DownloadOptions,
    ScrapeError, Toc, TocEntry,
};
