//! Japanese text normalization: full-width punctuation translation,
//! separator-line detection, and blank-spacing collapse around separators.
//!
//! The punctuation pass runs inline while pages are extracted; the separator
//! pass runs once per chapter before EPUB assembly.

use crate::model::{Chapter, Paragraph, SectionMarker};
use regex::Regex;
use std::sync::OnceLock;

/// Characters that make up a dash-style separator line (requires length >= 4).
const SEPARATOR_CHARS: &str = "-_－＿—–―ｰー─━";
/// Characters that make up a symbol-style separator line (any length).
const SEPARATOR_SYMBOLS: &str = "*＊";

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)https?://[^\s<>"]+"#).expect("url regex"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("tag regex"))
}

/// Full-width replacement for one ASCII punctuation or digit character.
fn to_fullwidth(c: char) -> Option<char> {
    let mapped = match c {
        '!' => '！',
        '?' => '？',
        ':' => '：',
        ';' => '；',
        ',' => '，',
        '.' => '．',
        '(' => '（',
        ')' => '）',
        '[' => '［',
        ']' => '］',
        '{' => '｛',
        '}' => '｝',
        '"' => '＂',
        '\'' => '＇',
        '0' => '０',
        '1' => '１',
        '2' => '２',
        '3' => '３',
        '4' => '４',
        '5' => '５',
        '6' => '６',
        '7' => '７',
        '8' => '８',
        '9' => '９',
        _ => return None,
    };
    Some(mapped)
}

/// Translate ASCII punctuation and digits to their full-width forms.
/// A period flanked by digits on both sides is a decimal point and stays ASCII.
fn translate_punct(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() * 3);
    for (i, &c) in chars.iter().enumerate() {
        if c == '.' {
            let prev_digit = i > 0 && chars[i - 1].is_numeric();
            let next_digit = chars.get(i + 1).is_some_and(|n| n.is_numeric());
            out.push(if prev_digit && next_digit { '.' } else { '．' });
        } else {
            out.push(to_fullwidth(c).unwrap_or(c));
        }
    }
    out
}

/// Punctuation pass: full-width translation everywhere except inside
/// `http(s)://` URL substrings, which pass through untouched.
pub fn normalize_punct(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    if !text.contains("http://") && !text.contains("https://") {
        return translate_punct(text);
    }
    let mut out = String::with_capacity(text.len() * 3);
    let mut last = 0;
    for m in url_re().find_iter(text) {
        if m.start() > last {
            out.push_str(&translate_punct(&text[last..m.start()]));
        }
        out.push_str(m.as_str());
        last = m.end();
    }
    if last < text.len() {
        out.push_str(&translate_punct(&text[last..]));
    }
    out
}

/// True if the text (whitespace stripped) is an author-inserted separator
/// line: all dash-set characters with at least 4 of them, or all symbol-set
/// characters with at least one.
pub fn is_separator_line(text: &str) -> bool {
    let compact: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return false;
    }
    if compact.iter().all(|c| SEPARATOR_CHARS.contains(*c)) {
        return compact.len() >= 4;
    }
    compact.iter().all(|c| SEPARATOR_SYMBOLS.contains(*c))
}

/// Escape text for embedding in markup fragments and XHTML (`&`, `<`, `>`,
/// `"`, `'`).
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Undo the entities our own fragments can contain (plus non-breaking space).
pub fn unescape_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&#160;", "\u{a0}")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

/// Strip tags from a markup fragment, turning `<br>` variants into newlines.
pub fn html_to_text(s: &str) -> String {
    let s = s
        .replace("<br />", "\n")
        .replace("<br/>", "\n")
        .replace("<br>", "\n");
    tag_re().replace_all(&s, "").into_owned()
}

/// Plain-text shadow of a fragment: tags stripped, entities decoded.
pub fn fragment_plain_text(fragment: &str) -> String {
    unescape_entities(&html_to_text(fragment))
}

/// Blank for spacing purposes: explicit blanks and whitespace-only text.
/// Markers and image-bearing fragments are never blank.
fn is_blank_para(para: &Paragraph) -> bool {
    match para {
        Paragraph::Blank => true,
        Paragraph::Marker(_) => false,
        Paragraph::Text(fragment) => {
            if fragment.contains("<img") {
                return false;
            }
            fragment_plain_text(fragment).trim().is_empty()
        }
    }
}

/// Collapse runs of blank paragraphs around each separator marker to exactly
/// one blank line on each side (no blank after a trailing separator).
fn normalize_separator_spacing(paragraphs: Vec<Paragraph>) -> Vec<Paragraph> {
    let total = paragraphs.len();
    let mut out: Vec<Paragraph> = Vec::with_capacity(total);
    let mut i = 0;
    while i < total {
        if paragraphs[i] != Paragraph::Marker(SectionMarker::Separator) {
            out.push(paragraphs[i].clone());
            i += 1;
            continue;
        }
        while out.last().is_some_and(is_blank_para) {
            out.pop();
        }
        if !out.is_empty() {
            out.push(Paragraph::Blank);
        }
        out.push(Paragraph::Marker(SectionMarker::Separator));
        i += 1;
        while i < total && is_blank_para(&paragraphs[i]) {
            i += 1;
        }
        if i < total {
            out.push(Paragraph::Blank);
        }
    }
    out
}

/// Separator pass: text paragraphs that classify as separator lines become
/// separator markers, then surrounding blank runs are collapsed.
pub fn apply_separator_handling(paragraphs: Vec<Paragraph>) -> Vec<Paragraph> {
    if paragraphs.is_empty() {
        return paragraphs;
    }
    let mapped = paragraphs
        .into_iter()
        .map(|para| match para {
            Paragraph::Text(fragment) => {
                if is_separator_line(&fragment_plain_text(&fragment)) {
                    Paragraph::Marker(SectionMarker::Separator)
                } else {
                    Paragraph::Text(fragment)
                }
            }
            other => other,
        })
        .collect();
    normalize_separator_spacing(mapped)
}

/// Apply the separator pass to every chapter, producing new paragraph
/// sequences (chapter order and titles unchanged).
pub fn apply_separator_handling_to_chapters(chapters: Vec<Chapter>) -> Vec<Chapter> {
    chapters
        .into_iter()
        .map(|chapter| Chapter {
            title: chapter.title,
            paragraphs: apply_separator_handling(chapter.paragraphs),
            url: chapter.url,
        })
        .collect()
}

/// Character count over titles and body text, ignoring markers, blanks, and
/// line breaks. Reported per volume after download.
pub fn count_characters(chapters: &[Chapter]) -> usize {
    let mut total = 0;
    for chapter in chapters {
        total += chapter.title.chars().filter(|c| *c != '\n').count();
        for para in &chapter.paragraphs {
            if let Paragraph::Text(fragment) = para {
                total += fragment_plain_text(fragment)
                    .chars()
                    .filter(|c| *c != '\n')
                    .count();
            }
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punctuation_maps_to_fullwidth() {
        assert_eq!(normalize_punct("Hi!"), "Hi！");
        assert_eq!(normalize_punct("a,b(c)"), "a，b（c）");
        assert_eq!(normalize_punct("2024"), "２０２４");
    }

    #[test]
    fn decimal_point_is_preserved() {
        assert_eq!(normalize_punct("3.14"), "３.１４");
        assert_eq!(normalize_punct("3.14 yay!"), "３.１４ yay！");
        assert_eq!(normalize_punct("end."), "end．");
        assert_eq!(normalize_punct(".5"), "．５");
    }

    #[test]
    fn urls_pass_through_untouched() {
        let s = "see https://ncode.syosetu.com/n1234ab/ for more!";
        let out = normalize_punct(s);
        assert!(out.contains("https://ncode.syosetu.com/n1234ab/"));
        assert!(out.ends_with('！'));
    }

    #[test]
    fn normalization_is_idempotent_outside_urls() {
        for s in ["Hello, world!", "3.14", "作者：someone (2024)", ""] {
            let once = normalize_punct(s);
            assert_eq!(normalize_punct(&once), once);
        }
    }

    #[test]
    fn separator_classification() {
        assert!(is_separator_line("----"));
        assert!(!is_separator_line("--"));
        assert!(is_separator_line("***"));
        assert!(is_separator_line("＊"));
        assert!(!is_separator_line("Hello"));
        assert!(is_separator_line("  ─ ─ ─ ─  "));
        assert!(!is_separator_line("   "));
    }

    #[test]
    fn html_to_text_strips_tags_and_breaks() {
        assert_eq!(html_to_text("a<br />b<ruby>c<rt>d</rt></ruby>"), "a\nbcd");
    }

    #[test]
    fn unescape_round_trips_escape() {
        let raw = "a & b < c \"quoted\" 'single'";
        assert_eq!(unescape_entities(&escape_html(raw)), raw);
    }

    #[test]
    fn separator_pass_replaces_lines_and_collapses_blanks() {
        let paras = vec![
            Paragraph::Text("before".into()),
            Paragraph::Blank,
            Paragraph::Blank,
            Paragraph::Text("----".into()),
            Paragraph::Blank,
            Paragraph::Text("after".into()),
        ];
        let out = apply_separator_handling(paras);
        assert_eq!(
            out,
            vec![
                Paragraph::Text("before".into()),
                Paragraph::Blank,
                Paragraph::Marker(SectionMarker::Separator),
                Paragraph::Blank,
                Paragraph::Text("after".into()),
            ]
        );
    }

    #[test]
    fn separator_pass_no_trailing_blank_after_final_separator() {
        let out = apply_separator_handling(vec![
            Paragraph::Text("x".into()),
            Paragraph::Text("***".into()),
            Paragraph::Blank,
        ]);
        assert_eq!(
            out,
            vec![
                Paragraph::Text("x".into()),
                Paragraph::Blank,
                Paragraph::Marker(SectionMarker::Separator),
            ]
        );
    }

    #[test]
    fn separator_pass_keeps_markers_intact() {
        let paras = vec![
            Paragraph::Marker(SectionMarker::PrefaceStart),
            Paragraph::Text("note".into()),
            Paragraph::Marker(SectionMarker::PrefaceEnd),
        ];
        assert_eq!(apply_separator_handling(paras.clone()), paras);
    }

    #[test]
    fn count_characters_skips_markers_and_blanks() {
        let chapters = vec![Chapter {
            title: "ab".into(),
            paragraphs: vec![
                Paragraph::Marker(SectionMarker::PrefaceStart),
                Paragraph::Text("cde".into()),
                Paragraph::Blank,
                Paragraph::Text("f<br />g".into()),
            ],
            url: String::new(),
        }];
        assert_eq!(count_characters(&chapters), 7);
    }
}
