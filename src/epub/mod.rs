//! EPUB 2 writer: mimetype, container, OPF manifest/spine, NCX navigation,
//! stylesheet, title page, optional TOC page, volume pages, and chapters.
//!
//! The archive is written to a `.part` sibling and renamed into place once
//! complete, so a failed run never leaves a partial file at the output path.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::images::{ensure_image_breaks, rewrite_img_srcs};
use crate::model::{Book, ImageItem, Paragraph, SectionMarker, VolumeBreak};
use crate::text::escape_html;

const MIMETYPE: &[u8] = b"application/epub+zip";

const CONTAINER_XML: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n\
  <rootfiles>\n\
    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n\
  </rootfiles>\n\
</container>\n";

const STYLE_CSS: &str = concat!(
    "body{font-family:serif;line-height:1.6;}",
    ".vertical{-epub-writing-mode:vertical-rl;writing-mode:vertical-rl;text-orientation:mixed;}",
    "h1{font-size:1.4em;margin:1.2em 0 0.6em 0;}",
    "p{margin:0 0 0.8em 0;}",
    "p.blank{margin:0 0 0.8em 0;}",
    "p.summary{margin:0 0 0.8em 0;}",
    "img{max-width:100%;height:auto;}",
    ".toc ol{list-style:none;padding-left:0;}",
    ".toc li{margin:0 0 0.4em 0;}",
    ".toc .toc-volume{margin:0.8em 0 0.3em 0;font-weight:bold;}",
    ".toc .toc-sublist{list-style:none;padding-left:1.2em;}",
    ".toc .toc-sublist li{margin:0 0 0.3em 0;font-weight:normal;}",
    ".toc a{text-decoration:none;color:inherit;}",
    ".volume h1{margin-top:2.2em;text-align:center;}",
    ".section-marker{border-top:4px solid #333;border-bottom:4px solid #333;",
    "padding:0.5em 0;text-align:center;letter-spacing:0.08em;}",
    "hr.separator{border:0;border-top:2px solid #333;margin:0.9em 0;}",
);

const BLANK_LINE: &str = "<p class=\"blank\">&#160;</p>";
const TOC_TITLE: &str = "目次";

/// Errors from the EPUB writer. Map to CLI exit code 3.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot write EPUB: book has no chapters.")]
    NoChapters,

    #[error("Failed to create EPUB file: {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write EPUB: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<std::io::Error> for EpubError {
    fn from(e: std::io::Error) -> Self {
        EpubError::Zip(zip::result::ZipError::Io(e))
    }
}

/// Assembly inputs beyond the book itself.
#[derive(Debug, Default)]
pub struct EpubOptions {
    /// Populated volume index ranges; grouping kicks in above one entry.
    pub volume_breaks: Vec<VolumeBreak>,
    /// Resolved image source to container path.
    pub image_map: HashMap<String, String>,
    pub images: Vec<ImageItem>,
    /// Render body text in vertical writing mode.
    pub vertical: bool,
}

/// Write `book` as an EPUB 2 archive at `path`.
pub fn write_epub(book: &Book, path: &Path, options: &EpubOptions) -> Result<(), EpubError> {
    if book.chapters.is_empty() {
        return Err(EpubError::NoChapters);
    }
    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    match write_archive(book, &partial, options) {
        Ok(()) => std::fs::rename(&partial, path).map_err(|e| EpubError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
        Err(e) => {
            let _ = std::fs::remove_file(&partial);
            Err(e)
        }
    }
}

fn write_archive(book: &Book, path: &Path, options: &EpubOptions) -> Result<(), EpubError> {
    let file = std::fs::File::create(path).map_err(|e| EpubError::CreateFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut zip = ZipWriter::new(file);

    let options_stored = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    let options_deflate = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    // Identifier derived from the book URL, stable across reruns.
    let book_id = format!(
        "urn:uuid:{}",
        Uuid::new_v5(&Uuid::NAMESPACE_URL, book.source_url.as_bytes())
    );

    let include_toc = book.chapters.len() > 1;
    let use_volume_groups = options.volume_breaks.len() > 1;
    let breaks: &[VolumeBreak] = if use_volume_groups {
        &options.volume_breaks
    } else {
        &[]
    };

    let chapter_files = render_chapters(book, options);
    let volume_files = render_volumes(breaks, options.vertical);

    // Mimetype must be the first entry and stored uncompressed.
    zip.start_file("mimetype", options_stored)?;
    zip.write_all(MIMETYPE)?;
    zip.start_file("META-INF/container.xml", options_deflate)?;
    zip.write_all(CONTAINER_XML.as_bytes())?;
    zip.start_file("OEBPS/content.opf", options_deflate)?;
    zip.write_all(render_opf(book, &book_id, include_toc, breaks, options).as_bytes())?;
    zip.start_file("OEBPS/toc.ncx", options_deflate)?;
    zip.write_all(render_ncx(book, &book_id, include_toc, breaks).as_bytes())?;
    zip.start_file("OEBPS/style.css", options_deflate)?;
    zip.write_all(STYLE_CSS.as_bytes())?;
    zip.start_file("OEBPS/title.xhtml", options_deflate)?;
    zip.write_all(render_title_page(book, options.vertical).as_bytes())?;
    if include_toc {
        zip.start_file("OEBPS/toc.xhtml", options_deflate)?;
        zip.write_all(render_toc_page(book, breaks, options.vertical).as_bytes())?;
    }
    for (name, content) in volume_files.iter().chain(chapter_files.iter()) {
        zip.start_file(format!("OEBPS/{}", name), options_deflate)?;
        zip.write_all(content.as_bytes())?;
    }
    for img in &options.images {
        zip.start_file(format!("OEBPS/{}", img.href), options_deflate)?;
        zip.write_all(&img.data)?;
    }
    zip.finish()?;
    Ok(())
}

fn xhtml_doc(doc_title: &str, body: &str, body_class: &str, vertical: bool) -> String {
    let mut classes: Vec<&str> = Vec::new();
    if !body_class.is_empty() {
        classes.push(body_class);
    }
    if vertical {
        classes.push("vertical");
    }
    let class_attr = if classes.is_empty() {
        String::new()
    } else {
        format!(" class=\"{}\"", classes.join(" "))
    };
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.1//EN\"\n\
  \"http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd\">\n\
<html xmlns=\"http://www.w3.org/1999/xhtml\" xml:lang=\"ja\">\n\
<head>\n\
  <title>{}</title>\n\
  <link rel=\"stylesheet\" type=\"text/css\" href=\"style.css\" />\n\
</head>\n\
<body{}>\n\
{}\n\
</body>\n\
</html>\n",
        escape_html(doc_title),
        class_attr,
        body
    )
}

fn chapter_title(book: &Book, index: usize) -> String {
    let title = book.chapters[index].title.trim();
    if title.is_empty() {
        format!("Chapter {}", index + 1)
    } else {
        title.to_string()
    }
}

fn volume_label(brk: &VolumeBreak, vol_idx: usize) -> String {
    let title = brk.title.trim();
    if title.is_empty() {
        format!("Volume {}", vol_idx)
    } else {
        title.to_string()
    }
}

fn marker_lines(marker: SectionMarker) -> &'static [&'static str] {
    match marker {
        SectionMarker::PrefaceStart => &[
            BLANK_LINE,
            "<p class=\"section-marker preface\">前書き</p>",
            BLANK_LINE,
        ],
        SectionMarker::AfterwordStart => &[
            "<p class=\"section-marker afterword\">後書き</p>",
            BLANK_LINE,
        ],
        SectionMarker::PrefaceEnd
        | SectionMarker::AfterwordEnd
        | SectionMarker::Separator => &["<hr class=\"separator\" />"],
    }
}

fn render_title_page(book: &Book, vertical: bool) -> String {
    let mut lines = vec![format!("  <h1>{}</h1>", escape_html(&book.title))];
    if !book.author.is_empty() {
        lines.push(format!("  <p>作者：{}</p>", escape_html(&book.author)));
    }
    let link_url = book.source_url.replacen("http://", "https://", 1);
    lines.push(format!(
        "  <p>リンク：<a href=\"{0}\">{0}</a></p>",
        escape_html(&link_url)
    ));
    if !book.summary.is_empty() {
        lines.push(format!("  {}", BLANK_LINE));
        for line in book.summary.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            lines.push(format!("  <p class=\"summary\">{}</p>", escape_html(line)));
        }
    }
    xhtml_doc(&book.title, &lines.join("\n"), "", vertical)
}

fn render_chapters(book: &Book, options: &EpubOptions) -> Vec<(String, String)> {
    let mut files = Vec::with_capacity(book.chapters.len());
    for (idx, chap) in book.chapters.iter().enumerate() {
        let title = chapter_title(book, idx);
        let anchor = format!("ref-{:03}", idx + 1);
        let base_url = if chap.url.is_empty() {
            &book.source_url
        } else {
            &chap.url
        };
        let mut paras: Vec<String> = Vec::new();
        for para in &chap.paragraphs {
            match para {
                Paragraph::Marker(marker) => {
                    paras.extend(marker_lines(*marker).iter().map(|s| s.to_string()));
                }
                Paragraph::Blank => paras.push(BLANK_LINE.to_string()),
                Paragraph::Text(fragment) => {
                    let mut text = fragment.replace('\n', "<br />");
                    if !options.image_map.is_empty() {
                        text = rewrite_img_srcs(&text, base_url, &options.image_map);
                    }
                    if text.contains("<img") {
                        text = ensure_image_breaks(&text);
                    }
                    paras.push(format!("<p>{}</p>", text));
                }
            }
        }
        let body_html = if paras.is_empty() {
            "<p></p>".to_string()
        } else {
            paras.join("\n  ")
        };
        let body = format!(
            "  <h1 id=\"{}\">{}</h1>\n  {}",
            anchor,
            escape_html(&title),
            body_html
        );
        files.push((
            format!("chapter{:03}.xhtml", idx + 1),
            xhtml_doc(&title, &body, "", options.vertical),
        ));
    }
    files
}

fn render_volumes(breaks: &[VolumeBreak], vertical: bool) -> Vec<(String, String)> {
    breaks
        .iter()
        .enumerate()
        .map(|(i, brk)| {
            let vol_idx = i + 1;
            let label = volume_label(brk, vol_idx);
            let body = format!(
                "  <h1 id=\"vol-{:03}\">{}</h1>",
                vol_idx,
                escape_html(&label)
            );
            (
                format!("volume{:03}.xhtml", vol_idx),
                xhtml_doc(&label, &body, "volume", vertical),
            )
        })
        .collect()
}

fn render_toc_page(book: &Book, breaks: &[VolumeBreak], vertical: bool) -> String {
    let mut items: Vec<String> = Vec::new();
    if !breaks.is_empty() {
        for (i, brk) in breaks.iter().enumerate() {
            let vol_idx = i + 1;
            let label = volume_label(brk, vol_idx);
            let mut children: Vec<String> = Vec::new();
            for chap_index in brk.start..=brk.end.min(book.chapters.len() - 1) {
                children.push(format!(
                    "<li><a href=\"chapter{0:03}.xhtml#ref-{0:03}\">{1}</a></li>",
                    chap_index + 1,
                    escape_html(&chapter_title(book, chap_index))
                ));
            }
            items.push(format!(
                "<li class=\"toc-volume\"><a href=\"volume{:03}.xhtml#vol-{:03}\">{}</a>\n      \
                 <ol class=\"toc-sublist\">\n        {}\n      </ol>\n    </li>",
                vol_idx,
                vol_idx,
                escape_html(&label),
                children.join("\n        ")
            ));
        }
    } else {
        for idx in 0..book.chapters.len() {
            items.push(format!(
                "<li><a href=\"chapter{0:03}.xhtml#ref-{0:03}\">{1}</a></li>",
                idx + 1,
                escape_html(&chapter_title(book, idx))
            ));
        }
    }
    let body = format!(
        "  <h1>{}</h1>\n  <ol>\n    {}\n  </ol>",
        escape_html(TOC_TITLE),
        items.join("\n    ")
    );
    xhtml_doc(TOC_TITLE, &body, "toc", vertical)
}

fn render_opf(
    book: &Book,
    book_id: &str,
    include_toc: bool,
    breaks: &[VolumeBreak],
    options: &EpubOptions,
) -> String {
    let mut manifest: Vec<String> = vec![
        "<item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>".into(),
        "<item id=\"style\" href=\"style.css\" media-type=\"text/css\"/>".into(),
        "<item id=\"title\" href=\"title.xhtml\" media-type=\"application/xhtml+xml\"/>".into(),
    ];
    if include_toc {
        manifest
            .push("<item id=\"toc\" href=\"toc.xhtml\" media-type=\"application/xhtml+xml\"/>".into());
    }
    for (i, img) in options.images.iter().enumerate() {
        manifest.push(format!(
            "<item id=\"img{:03}\" href=\"{}\" media-type=\"{}\"/>",
            i + 1,
            img.href,
            img.media_type
        ));
    }
    for i in 0..breaks.len() {
        manifest.push(format!(
            "<item id=\"vol{0:03}\" href=\"volume{0:03}.xhtml\" media-type=\"application/xhtml+xml\"/>",
            i + 1
        ));
    }
    for i in 0..book.chapters.len() {
        manifest.push(format!(
            "<item id=\"chap{0:03}\" href=\"chapter{0:03}.xhtml\" media-type=\"application/xhtml+xml\"/>",
            i + 1
        ));
    }

    let mut spine: Vec<String> = vec!["<itemref idref=\"title\"/>".into()];
    if include_toc {
        spine.push("<itemref idref=\"toc\"/>".into());
    }
    // Each volume page slots in right before its first chapter.
    let mut volume_at: HashMap<usize, Vec<usize>> = HashMap::new();
    for (i, brk) in breaks.iter().enumerate() {
        volume_at.entry(brk.start).or_default().push(i + 1);
    }
    for idx in 0..book.chapters.len() {
        if let Some(vols) = volume_at.get(&idx) {
            for vol_idx in vols {
                spine.push(format!("<itemref idref=\"vol{:03}\"/>", vol_idx));
            }
        }
        spine.push(format!("<itemref idref=\"chap{:03}\"/>", idx + 1));
    }

    let creator = if book.author.is_empty() {
        String::new()
    } else {
        format!(
            "<dc:creator opf:role=\"aut\">{}</dc:creator>",
            escape_html(&book.author)
        )
    };
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
<package version=\"2.0\" unique-identifier=\"bookid\" xmlns=\"http://www.idpf.org/2007/opf\">\n\
  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\" xmlns:opf=\"http://www.idpf.org/2007/opf\">\n\
    <dc:title>{}</dc:title>\n\
    {}\n\
    <dc:language>ja</dc:language>\n\
    <dc:identifier id=\"bookid\">{}</dc:identifier>\n\
  </metadata>\n\
  <manifest>\n    {}\n  </manifest>\n\
  <spine toc=\"ncx\">\n    {}\n  </spine>\n\
</package>\n",
        escape_html(&book.title),
        creator,
        escape_html(book_id),
        manifest.join("\n    "),
        spine.join("\n    ")
    )
}

fn nav_point(play_order: usize, label: &str, src: &str) -> String {
    format!(
        "<navPoint id=\"navpoint-{0}\" playOrder=\"{0}\">\n      \
         <navLabel><text>{1}</text></navLabel>\n      \
         <content src=\"{2}\"/>\n    </navPoint>",
        play_order,
        escape_html(label),
        src
    )
}

fn render_ncx(book: &Book, book_id: &str, include_toc: bool, breaks: &[VolumeBreak]) -> String {
    let nav_depth = if breaks.is_empty() { "1" } else { "2" };
    let mut nav_points: Vec<String> = Vec::new();
    let mut play_order = 1;
    nav_points.push(nav_point(play_order, &book.title, "title.xhtml"));
    play_order += 1;
    if include_toc {
        nav_points.push(nav_point(play_order, TOC_TITLE, "toc.xhtml"));
        play_order += 1;
    }
    if !breaks.is_empty() {
        for (i, brk) in breaks.iter().enumerate() {
            let vol_idx = i + 1;
            let label = volume_label(brk, vol_idx);
            let volume_play = play_order;
            play_order += 1;
            let mut children: Vec<String> = Vec::new();
            for chap_index in brk.start..=brk.end.min(book.chapters.len() - 1) {
                children.push(nav_point(
                    play_order,
                    &chapter_title(book, chap_index),
                    &format!("chapter{0:03}.xhtml#ref-{0:03}", chap_index + 1),
                ));
                play_order += 1;
            }
            nav_points.push(format!(
                "<navPoint id=\"navpoint-{0}\" playOrder=\"{0}\">\n      \
                 <navLabel><text>{1}</text></navLabel>\n      \
                 <content src=\"volume{2:03}.xhtml#vol-{2:03}\"/>\n      \
                 {3}\n    </navPoint>",
                volume_play,
                escape_html(&label),
                vol_idx,
                children.join("\n      ")
            ));
        }
    } else {
        for idx in 0..book.chapters.len() {
            nav_points.push(nav_point(
                play_order,
                &chapter_title(book, idx),
                &format!("chapter{0:03}.xhtml#ref-{0:03}", idx + 1),
            ));
            play_order += 1;
        }
    }
    let doc_author = if book.author.is_empty() {
        String::new()
    } else {
        format!(
            "<docAuthor><text>{}</text></docAuthor>",
            escape_html(&book.author)
        )
    };
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
<!DOCTYPE ncx PUBLIC \"-//NISO//DTD ncx 2005-1//EN\"\n\
  \"http://www.daisy.org/z3986/2005/ncx-2005-1.dtd\">\n\
<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n\
  <head>\n\
    <meta name=\"dtb:uid\" content=\"{}\"/>\n\
    <meta name=\"dtb:depth\" content=\"{}\"/>\n\
    <meta name=\"dtb:totalPageCount\" content=\"0\"/>\n\
    <meta name=\"dtb:maxPageNumber\" content=\"0\"/>\n\
  </head>\n\
  <docTitle><text>{}</text></docTitle>\n\
  {}\n\
  <navMap>\n    {}\n  </navMap>\n\
</ncx>\n",
        escape_html(book_id),
        nav_depth,
        escape_html(&book.title),
        doc_author,
        nav_points.join("\n    ")
    )
}
