//! Flat plain-text output: one UTF-8 file with the whole book.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use thiserror::Error;

use crate::images::replace_img_tags_for_txt;
use crate::model::{Book, Paragraph, SectionMarker};
use crate::text::fragment_plain_text;

/// Output format selector for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Epub,
    Txt,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Epub => "epub",
            OutputFormat::Txt => "txt",
        }
    }
}

/// Errors from the flat-text writer. Map to CLI exit code 3.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Failed to write output: {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write output: {0}")]
    Write(#[from] std::io::Error),
}

const SEPARATOR_LINE: &str = "--------------------------------";

fn marker_block(marker: SectionMarker) -> &'static [&'static str] {
    match marker {
        SectionMarker::PrefaceStart => &[SEPARATOR_LINE, "", "前書き", ""],
        SectionMarker::AfterwordStart => &[SEPARATOR_LINE, "", "後書き", ""],
        SectionMarker::PrefaceEnd
        | SectionMarker::AfterwordEnd
        | SectionMarker::Separator => &[SEPARATOR_LINE],
    }
}

/// Append a marker block, collapsing consecutive separator lines and runs
/// of blank lines at the seam.
fn append_block(lines: &mut Vec<String>, block: &[&str]) {
    let mut block: &[&str] = block;
    if block.first() == Some(&SEPARATOR_LINE) {
        let last_nonblank = lines.iter().rev().find(|ln| !ln.is_empty());
        if last_nonblank.map(String::as_str) == Some(SEPARATOR_LINE) {
            block = &block[1..];
            if block.is_empty() {
                return;
            }
        }
    }
    if lines.last().is_some_and(String::is_empty) {
        while block.first() == Some(&"") {
            block = &block[1..];
        }
        if block.is_empty() {
            return;
        }
    }
    if lines.last().is_some_and(|ln| !ln.is_empty()) && !block[0].is_empty() {
        lines.push(String::new());
    }
    lines.extend(block.iter().map(|s| s.to_string()));
}

fn render_lines(book: &Book) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    lines.push(book.title.clone());
    if !book.author.is_empty() {
        lines.push(format!("作者：{}", book.author));
    }
    lines.push(String::new());
    for chap in &book.chapters {
        lines.push(chap.title.clone());
        lines.push(String::new());
        let base_url = if chap.url.is_empty() {
            &book.source_url
        } else {
            &chap.url
        };
        for para in &chap.paragraphs {
            match para {
                Paragraph::Marker(marker) => append_block(&mut lines, marker_block(*marker)),
                Paragraph::Blank => lines.push(String::new()),
                Paragraph::Text(fragment) => {
                    let clean = replace_img_tags_for_txt(fragment, base_url);
                    lines.push(fragment_plain_text(&clean));
                }
            }
        }
        lines.push(String::new());
    }
    lines
}

/// Write the book as flat text. Ends with exactly one trailing newline and
/// no trailing blank lines.
pub fn write_txt(book: &Book, path: &Path) -> Result<(), FormatError> {
    let path = path.to_path_buf();
    let mut f = File::create(&path).map_err(|e| FormatError::Io {
        path: path.clone(),
        source: e,
    })?;
    let body = render_lines(book).join("\n");
    f.write_all(body.trim().as_bytes())?;
    f.write_all(b"\n")?;
    Ok(())
}
