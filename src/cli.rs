//! CLI parsing and orchestration: crawl TOC, select chapters/volumes,
//! download, and write EPUB or text. Maps errors to exit codes.

use std::cell::RefCell;
use std::collections::HashSet;
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use clap::Parser;
use regex::Regex;
use thiserror::Error;

use crate::config;
use crate::epub::{write_epub, EpubError, EpubOptions};
use crate::fetch::Fetcher;
use crate::formats::{write_txt, FormatError, OutputFormat};
use crate::images::download_images;
use crate::model::{Book, Chapter, Volume, VolumeBreak};
use crate::scrape::{
    build_volume_breaks, build_volumes, crawl_toc, download_chapters, DownloadOptions,
    ScrapeError,
};
use crate::text::{apply_separator_handling_to_chapters, count_characters};

const DEFAULT_JOBS: usize = 10;
const MAX_FILENAME_LEN: usize = 120;

const WINDOWS_RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Scrape(#[from] ScrapeError),

    #[error("{0}")]
    Epub(#[from] EpubError),

    #[error("{0}")]
    Format(#[from] FormatError),

    #[error("{0}")]
    Output(String),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::InvalidInput(_) => 1,
            CliRunError::Scrape(_) => 2,
            CliRunError::Epub(_) | CliRunError::Format(_) | CliRunError::Output(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "syoscrape")]
#[command(about = "Download a syosetu.com novel to an EPUB or text file")]
pub struct Args {
    /// Full URL of the novel's main page (a chapter URL selects that chapter).
    pub book_url: Option<String>,

    /// Output file path or directory.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Default base output folder (saved in config). Without a URL, just
    /// saves the setting and exits.
    #[arg(long, visible_alias = "output-folder")]
    pub output_dir: Option<PathBuf>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Epub)]
    pub format: OutputFormat,

    /// Chapter range: N or N-M (1-based inclusive).
    #[arg(short, long, value_parser = parse_number_range)]
    pub chapters: Option<(usize, usize)>,

    /// Select volume numbers to download (e.g., 1,3-4 or all).
    #[arg(short = 'v', long, visible_alias = "volumes")]
    pub volume: Option<String>,

    /// Remove furigana (ruby annotations) from output.
    #[arg(long, visible_alias = "no-furigana")]
    pub remove_furigana: bool,

    /// Keep going when a chapter fails to download; failures are listed at
    /// the end instead of aborting.
    #[arg(long)]
    pub skip_errors: bool,

    /// EPUB only: keep separator lines as-is (do not convert to rules).
    #[arg(long)]
    pub no_separator: bool,

    /// Render EPUB in vertical writing mode (tategaki).
    #[arg(long, visible_alias = "vertical-text")]
    pub vertical: bool,

    /// Parallel download jobs.
    #[arg(long, default_value_t = DEFAULT_JOBS)]
    pub jobs: usize,

    /// Suppress progress output (errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Print verbose error chain.
    #[arg(long)]
    pub verbose: bool,
}

pub fn parse_number_range(s: &str) -> Result<(usize, usize), String> {
    let raw = s.trim();
    let (a, b) = match raw.split_once('-') {
        Some((a_str, b_str)) => {
            let a: usize = a_str
                .trim()
                .parse()
                .map_err(|_| format!("Invalid range: '{}'", raw))?;
            let b: usize = b_str
                .trim()
                .parse()
                .map_err(|_| format!("Invalid range: '{}'", raw))?;
            (a, b)
        }
        None => {
            let n: usize = raw.parse().map_err(|_| format!("Invalid range: '{}'", raw))?;
            (n, n)
        }
    };
    if a < 1 || b < a {
        return Err(format!("Invalid range: '{}'", raw));
    }
    Ok((a, b))
}

/// Parse a volume selection like `1,3-4`, `all`, `*`, or `a` against a
/// 1-based maximum. Out-of-range or malformed input yields None.
pub fn parse_volume_selection(text: &str, max_index: usize) -> Option<HashSet<usize>> {
    let raw = text.trim().to_lowercase();
    if matches!(raw.as_str(), "" | "all" | "*" | "a") {
        return Some((1..=max_index).collect());
    }
    let mut result = HashSet::new();
    for part in raw.split(|c: char| c == ',' || c.is_whitespace()) {
        if part.is_empty() {
            continue;
        }
        if let Some((a_str, b_str)) = part.split_once('-') {
            if a_str.is_empty() || b_str.is_empty() {
                return None;
            }
            let a: usize = a_str.parse().ok()?;
            let b: usize = b_str.parse().ok()?;
            if a < 1 || b < a || b > max_index {
                return None;
            }
            result.extend(a..=b);
        } else {
            let n: usize = part.parse().ok()?;
            if n < 1 || n > max_index {
                return None;
            }
            result.insert(n);
        }
    }
    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

fn prompt_volume_selection(max_index: usize) -> HashSet<usize> {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return (1..=max_index).collect();
    }
    loop {
        print!("Select volumes to download (e.g., 1,3-4 or all) [all is default]: ");
        let _ = std::io::stdout().flush();
        let mut raw = String::new();
        match stdin.lock().read_line(&mut raw) {
            Ok(0) | Err(_) => return (1..=max_index).collect(),
            Ok(_) => {}
        }
        match parse_volume_selection(&raw, max_index) {
            Some(parsed) => return parsed,
            None => println!("Invalid selection. Try again."),
        }
    }
}

fn forbidden_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[\\/:*?"<>|]+"#).expect("forbidden chars regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"))
}

fn sanitize_filename(name: &str, default: &str) -> String {
    let name = forbidden_re().replace_all(name, "");
    let name = whitespace_re().replace_all(name.trim(), " ");
    let mut name = name.trim_end_matches([' ', '.']).to_string();
    if name.is_empty() {
        name = default.to_string();
    }
    if WINDOWS_RESERVED_NAMES.contains(&name.to_uppercase().as_str()) {
        name = format!("_{}", name);
    }
    name
}

fn truncate_filename(name: &str, max_length: usize) -> String {
    let chars: Vec<char> = name.chars().collect();
    if max_length == 0 || chars.len() <= max_length {
        return name.to_string();
    }
    let truncated: String = chars[..max_length].iter().collect();
    truncated.trim_end_matches([' ', '.']).to_string()
}

/// Filesystem-safe name: forbidden characters removed, whitespace collapsed,
/// trailing dots/spaces stripped, reserved device names prefixed, length
/// capped.
pub fn safe_filename(name: &str) -> String {
    let default = "syosetu";
    let mut name = sanitize_filename(name, default);
    name = truncate_filename(&name, MAX_FILENAME_LEN);
    if name.is_empty() {
        name = default.to_string();
    }
    if WINDOWS_RESERVED_NAMES.contains(&name.to_uppercase().as_str()) {
        name = format!("_{}", name);
    }
    name
}

fn volume_label_for_filename(volume_title: &str, vol_index: usize) -> String {
    let default_label = format!("Volume {}", vol_index);
    let sanitized = sanitize_filename(volume_title, &default_label);
    if sanitized.chars().count() > MAX_FILENAME_LEN {
        return default_label;
    }
    let mut label = truncate_filename(&sanitized, MAX_FILENAME_LEN);
    if label.is_empty() {
        label = default_label;
    }
    label
}

fn expand_path(value: &Path) -> PathBuf {
    if let Ok(stripped) = value.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    value.to_path_buf()
}

/// Split the -o value into a base directory, default file stem, and (when a
/// full filename was given) an explicit output name. A trailing separator or
/// an existing directory means "directory"; an extension means "file".
fn resolve_output_base(
    output: Option<&Path>,
    default_dir: Option<&Path>,
    title: &str,
) -> (PathBuf, String, Option<String>) {
    let mut base_name = safe_filename(title);
    let mut base_out_dir: Option<PathBuf> = None;
    let mut output_name: Option<String> = None;

    if let Some(output) = output {
        let out_path = expand_path(output);
        let has_trailing_sep = output
            .to_string_lossy()
            .ends_with(std::path::MAIN_SEPARATOR);
        if has_trailing_sep || out_path.is_dir() {
            base_out_dir = Some(out_path);
        } else if out_path.extension().is_some() {
            output_name = out_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
            if let Some(stem) = out_path.file_stem() {
                base_name = safe_filename(&stem.to_string_lossy());
            }
            let parent = out_path.parent().unwrap_or(Path::new(""));
            if !parent.as_os_str().is_empty() && parent != Path::new(".") {
                base_out_dir = Some(parent.to_path_buf());
            }
        } else {
            base_out_dir = Some(out_path);
        }
    }

    let base_out_dir = base_out_dir
        .or_else(|| default_dir.map(expand_path))
        .unwrap_or_else(|| PathBuf::from("."));
    (base_out_dir, base_name, output_name)
}

/// A chapter-page URL implies crawling its novel's main page with the
/// chapter preselected. Returns (main page URL, chapter number).
fn chapter_url_shortcut(input_url: &str) -> Option<(String, usize)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^https?://[^/]*syosetu\.com/([^/]+)/(\d+)/?$").expect("chapter url regex")
    });
    let caps = re.captures(input_url)?;
    let url = reqwest::Url::parse(input_url).ok()?;
    let host = url.host_str()?;
    let chapter_no: usize = caps[2].parse().ok()?;
    Some((format!("{}://{}/{}/", url.scheme(), host, &caps[1]), chapter_no))
}

/// Run `f` with an optional progress callback backed by an indicatif bar.
fn with_progress<R>(
    quiet: bool,
    label: &str,
    f: impl FnOnce(Option<&dyn Fn(usize, usize)>) -> R,
) -> R {
    if quiet {
        return f(None);
    }
    let state: RefCell<Option<indicatif::ProgressBar>> = RefCell::new(None);
    let label = label.to_string();
    let cb = |n: usize, total: usize| {
        if total == 0 {
            return;
        }
        let mut state = state.borrow_mut();
        let pb = state.get_or_insert_with(|| {
            let bar = indicatif::ProgressBar::new(total as u64);
            bar.set_style(
                indicatif::ProgressStyle::default_bar()
                    .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
                    .unwrap()
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                    .progress_chars("█▉▊▋▌▍▎▏ "),
            );
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });
        pb.set_position(n as u64);
        pb.set_message(format!("{} {}/{}", label, n, total));
    };
    let result = f(Some(&cb));
    if let Some(pb) = state.borrow_mut().take() {
        pb.disable_steady_tick();
        pb.finish_and_clear();
    }
    result
}

struct OutputSettings {
    format: OutputFormat,
    handle_separators: bool,
    vertical: bool,
    jobs: usize,
    quiet: bool,
}

/// Write one output file: flat text directly, or EPUB after the separator
/// pass and image downloads.
fn write_output(
    fetcher: &Fetcher,
    mut book: Book,
    path: &Path,
    volume_breaks: Vec<VolumeBreak>,
    settings: &OutputSettings,
) -> Result<(), CliRunError> {
    match settings.format {
        OutputFormat::Txt => {
            write_txt(&book, path)?;
        }
        OutputFormat::Epub => {
            if settings.handle_separators {
                book.chapters = apply_separator_handling_to_chapters(book.chapters);
            }
            let (image_map, images) = with_progress(settings.quiet, "Downloading image", |p| {
                download_images(fetcher, &book.chapters, &book.source_url, settings.jobs, p)
            });
            let options = EpubOptions {
                volume_breaks,
                image_map,
                images,
                vertical: settings.vertical,
            };
            write_epub(&book, path, &options)?;
        }
    }
    Ok(())
}

fn download(
    fetcher: &Fetcher,
    urls: &[String],
    args: &Args,
) -> Result<Vec<Chapter>, CliRunError> {
    let options = DownloadOptions {
        jobs: args.jobs,
        skip_errors: args.skip_errors,
        remove_furigana: args.remove_furigana,
    };
    let chapters = with_progress(args.quiet, "Downloading chapter", |p| {
        download_chapters(fetcher, urls, &options, p)
    })?;
    Ok(chapters)
}

/// Entry point for the CLI.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    let mut cfg = config::load_config();

    if let Some(dir) = &args.output_dir {
        if dir.as_os_str().is_empty() {
            return Err(CliRunError::InvalidInput(
                "Invalid --output-dir value.".into(),
            ));
        }
        let expanded = expand_path(dir);
        let normalized = std::path::absolute(&expanded).unwrap_or(expanded);
        cfg.output_dir = Some(normalized.clone());
        config::save_config(&cfg).map_err(CliRunError::Output)?;
        if args.book_url.is_none() {
            println!("Saved default output folder: {}", normalized.display());
            return Ok(());
        }
    }

    let Some(input_url) = &args.book_url else {
        return Err(CliRunError::InvalidInput(
            "Missing book_url. Provide a URL or use --output-dir to set the default output folder."
                .into(),
        ));
    };

    if args.vertical && args.format == OutputFormat::Txt {
        println!("Note: --vertical only applies to EPUB output.");
    }
    if args.jobs < 1 {
        return Err(CliRunError::InvalidInput("--jobs must be >= 1".into()));
    }

    let input_url = input_url.trim_end_matches('/');
    let mut chapter_range = args.chapters;
    let main_url = match chapter_url_shortcut(input_url) {
        Some((main_url, chapter_no)) => {
            if chapter_range.is_none() {
                chapter_range = Some((chapter_no, chapter_no));
            }
            main_url
        }
        None => format!("{}/", input_url),
    };
    let book_url = main_url.replacen("http://", "https://", 1);

    let fetcher = Fetcher::builder()
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("{}", e)))?;

    if !args.quiet {
        println!("Downloading table of contents...");
    }
    let page_progress = |page: usize| {
        if !args.quiet {
            println!("    Page {}...", page);
        }
    };
    let toc = crawl_toc(
        &fetcher,
        &book_url,
        args.remove_furigana,
        Some(&page_progress),
    )?;

    let title = if toc.title.is_empty() {
        "syosetu".to_string()
    } else {
        toc.title.clone()
    };
    println!("\nTitle: {}", title);
    if !toc.author.is_empty() {
        println!("作者：{}", toc.author);
    }

    let chapter_links = toc.chapter_urls();
    let selected_links: Vec<String> = match chapter_range {
        Some((start, end)) => {
            if end > chapter_links.len() {
                return Err(CliRunError::InvalidInput("Invalid chapter range.".into()));
            }
            chapter_links[start - 1..end].to_vec()
        }
        None => chapter_links.clone(),
    };
    let selected_set: HashSet<String> = selected_links.iter().cloned().collect();
    let (volumes, found_volume) = build_volumes(&toc.entries, Some(&selected_set));

    let settings = OutputSettings {
        format: args.format,
        handle_separators: !args.no_separator,
        vertical: args.vertical,
        jobs: args.jobs,
        quiet: args.quiet,
    };
    let ext = args.format.extension();

    if found_volume {
        let display_volumes: Vec<_> = volumes.iter().filter(|v| !v.chapters.is_empty()).collect();
        if display_volumes.is_empty() {
            return Err(CliRunError::InvalidInput(
                "No chapters matched the selection.".into(),
            ));
        }

        println!("\nVolumes:");
        for (idx, vol) in display_volumes.iter().enumerate() {
            println!(
                "  {}. {} ({} chapters)",
                idx + 1,
                vol.title,
                vol.chapters.len()
            );
        }

        let selected_vol_indices = if let Some(selection) = &args.volume {
            parse_volume_selection(selection, display_volumes.len())
                .ok_or_else(|| CliRunError::InvalidInput("Invalid volume selection.".into()))?
        } else if display_volumes.len() == 1 {
            HashSet::from([1])
        } else {
            prompt_volume_selection(display_volumes.len())
        };
        let mut selected_vol_indices: Vec<usize> = selected_vol_indices.into_iter().collect();
        selected_vol_indices.sort_unstable();

        let (base_out_dir, base_name, _) =
            resolve_output_base(args.output.as_deref(), cfg.output_dir.as_deref(), &title);
        let out_dir = base_out_dir.join(safe_filename(&title));
        std::fs::create_dir_all(&out_dir).map_err(|e| {
            CliRunError::Output(format!("Failed to create {}: {}", out_dir.display(), e))
        })?;

        let mut volume_stats: Vec<(usize, String, usize)> = Vec::new();
        let mut merged_chapters: Vec<Chapter> = Vec::new();
        let mut merged_volumes: Vec<Volume> = Vec::new();

        for vol_index in selected_vol_indices {
            let volume = display_volumes[vol_index - 1];
            let chapters = download(&fetcher, &volume.chapters, args)?;
            volume_stats.push((vol_index, volume.title.clone(), count_characters(&chapters)));
            merged_chapters.extend(chapters.iter().cloned());
            merged_volumes.push((*volume).clone());

            let display_title = format!("{} - {}", title, volume.title);
            let volume_label = volume_label_for_filename(&volume.title, vol_index);
            let filename = if chapters.len() == 1 {
                let chap_label = safe_filename(&chapters[0].title);
                format!("{} - {} - {}.{}", base_name, volume_label, chap_label, ext)
            } else {
                format!("{} - {}.{}", base_name, volume_label, ext)
            };
            let out_path = out_dir.join(filename);
            let book = Book {
                title: display_title,
                author: toc.author.clone(),
                summary: toc.summary.clone(),
                chapters,
                source_url: book_url.clone(),
            };
            write_output(&fetcher, book, &out_path, Vec::new(), &settings)?;
            println!("\nWrote {}", out_path.display());
        }

        if !volume_stats.is_empty() {
            println!("\nCharacter counts by volume:");
            for (vol_index, volume_title, chars) in &volume_stats {
                println!("  {:02} - {}: {}", vol_index, volume_title, chars);
            }
        }

        let volume_breaks = build_volume_breaks(&merged_volumes, &merged_chapters);
        if args.format == OutputFormat::Epub && volume_breaks.len() > 1 {
            if std::io::stdin().is_terminal() {
                println!("\nMerge selected volumes into a single EPUB now? [y/N]");
                let mut choice = String::new();
                let _ = std::io::stdin().lock().read_line(&mut choice);
                if matches!(choice.trim().to_lowercase().as_str(), "y" | "yes") {
                    let out_path = out_dir.join(format!("{} - Complete.epub", base_name));
                    let book = Book {
                        title: format!("{} - Complete", title),
                        author: toc.author.clone(),
                        summary: toc.summary.clone(),
                        chapters: merged_chapters,
                        source_url: book_url.clone(),
                    };
                    write_output(&fetcher, book, &out_path, volume_breaks, &settings)?;
                    println!("\nWrote {}", out_path.display());
                }
            } else {
                println!("\nRun this in a terminal to merge volumes interactively.");
            }
        }
    } else {
        if args.volume.is_some() {
            return Err(CliRunError::InvalidInput(
                "Cannot use --volume without TOC volume headings.".into(),
            ));
        }

        let (base_out_dir, base_name, output_name) =
            resolve_output_base(args.output.as_deref(), cfg.output_dir.as_deref(), &title);
        let out_dir = base_out_dir.join(safe_filename(&title));
        std::fs::create_dir_all(&out_dir).map_err(|e| {
            CliRunError::Output(format!("Failed to create {}: {}", out_dir.display(), e))
        })?;

        let chapters = download(&fetcher, &selected_links, args)?;
        let filename = match output_name {
            Some(name) => name,
            None => {
                if chapters.len() == 1 {
                    format!("{} - {}.{}", base_name, safe_filename(&chapters[0].title), ext)
                } else {
                    format!("{}.{}", base_name, ext)
                }
            }
        };
        let out_path = out_dir.join(filename);
        let book = Book {
            title,
            author: toc.author.clone(),
            summary: toc.summary.clone(),
            chapters,
            source_url: book_url,
        };
        write_output(&fetcher, book, &out_path, Vec::new(), &settings)?;
        println!("\nWrote {}", out_path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_range_accepts_single_and_span() {
        assert_eq!(parse_number_range("5"), Ok((5, 5)));
        assert_eq!(parse_number_range("2-7"), Ok((2, 7)));
        assert_eq!(parse_number_range(" 3 - 4 "), Ok((3, 4)));
    }

    #[test]
    fn number_range_rejects_bad_input() {
        assert!(parse_number_range("0").is_err());
        assert!(parse_number_range("5-2").is_err());
        assert!(parse_number_range("abc").is_err());
        assert!(parse_number_range("1-").is_err());
    }

    #[test]
    fn volume_selection_all_aliases() {
        for s in ["", "all", "*", "a", "ALL"] {
            assert_eq!(
                parse_volume_selection(s, 3),
                Some(HashSet::from([1, 2, 3]))
            );
        }
    }

    #[test]
    fn volume_selection_lists_and_ranges() {
        assert_eq!(
            parse_volume_selection("1,3-4", 5),
            Some(HashSet::from([1, 3, 4]))
        );
        assert_eq!(parse_volume_selection("2 3", 3), Some(HashSet::from([2, 3])));
    }

    #[test]
    fn volume_selection_rejects_out_of_range() {
        assert_eq!(parse_volume_selection("4", 3), None);
        assert_eq!(parse_volume_selection("2-5", 3), None);
        assert_eq!(parse_volume_selection("x", 3), None);
        assert_eq!(parse_volume_selection("1-", 3), None);
    }

    #[test]
    fn safe_filename_strips_forbidden_characters() {
        assert_eq!(safe_filename("a/b:c*d?e\"f<g>h|i"), "abcdefghi");
        assert_eq!(safe_filename("  spaced   out  "), "spaced out");
        assert_eq!(safe_filename("name..."), "name");
    }

    #[test]
    fn safe_filename_handles_empty_and_reserved() {
        assert_eq!(safe_filename(""), "syosetu");
        assert_eq!(safe_filename("///"), "syosetu");
        assert_eq!(safe_filename("CON"), "_CON");
        assert_eq!(safe_filename("lpt1"), "_lpt1");
    }

    #[test]
    fn safe_filename_truncates_long_names() {
        let long = "あ".repeat(200);
        let out = safe_filename(&long);
        assert_eq!(out.chars().count(), MAX_FILENAME_LEN);
    }

    #[test]
    fn volume_label_falls_back_when_too_long() {
        let long = "x".repeat(300);
        assert_eq!(volume_label_for_filename(&long, 3), "Volume 3");
        assert_eq!(volume_label_for_filename("", 2), "Volume 2");
        assert_eq!(volume_label_for_filename("第一巻", 1), "第一巻");
    }

    #[test]
    fn output_base_with_no_output_uses_default_dir() {
        let (dir, name, explicit) =
            resolve_output_base(None, Some(Path::new("/data/books")), "My Novel");
        assert_eq!(dir, PathBuf::from("/data/books"));
        assert_eq!(name, "My Novel");
        assert_eq!(explicit, None);
    }

    #[test]
    fn output_base_with_filename_splits_stem_and_dir() {
        let (dir, name, explicit) =
            resolve_output_base(Some(Path::new("/out/custom.epub")), None, "Title");
        assert_eq!(dir, PathBuf::from("/out"));
        assert_eq!(name, "custom");
        assert_eq!(explicit.as_deref(), Some("custom.epub"));
    }

    #[test]
    fn output_base_with_trailing_separator_is_a_directory() {
        let (dir, name, explicit) = resolve_output_base(Some(Path::new("/out/")), None, "Title");
        assert_eq!(dir, PathBuf::from("/out/"));
        assert_eq!(name, "Title");
        assert_eq!(explicit, None);
    }

    #[test]
    fn chapter_url_shortcut_extracts_main_page_and_number() {
        let (main, n) =
            chapter_url_shortcut("https://ncode.syosetu.com/n1234ab/12").unwrap();
        assert_eq!(main, "https://ncode.syosetu.com/n1234ab/");
        assert_eq!(n, 12);
        assert!(chapter_url_shortcut("https://ncode.syosetu.com/n1234ab").is_none());
        assert!(chapter_url_shortcut("https://example.com/n1234ab/3").is_none());
    }
}
