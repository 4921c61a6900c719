//! Markup event stream for the extraction state machines.
//!
//! Pages are parsed with `scraper` (html5ever underneath, so entity decoding,
//! void elements, and tag-soup recovery come for free) and the resulting tree
//! is walked depth-first, emitting open/text/close events to a [`MarkupSink`].
//! Malformed markup never errors; the extractors degrade to empty output.

use ego_tree::iter::Edge;
use scraper::node::Element;
use scraper::{Html, Node};

/// Receiver for a page's markup events in document order.
pub trait MarkupSink {
    fn open_tag(&mut self, name: &str, element: &Element);
    fn close_tag(&mut self, name: &str);
    fn text(&mut self, data: &str);
}

/// Parse `page_html` and feed every tag/text event to `sink`.
pub fn drive<S: MarkupSink>(page_html: &str, sink: &mut S) {
    let document = Html::parse_document(page_html);
    for edge in document.tree.root().traverse() {
        match edge {
            Edge::Open(node) => match node.value() {
                Node::Element(element) => sink.open_tag(element.name(), &element),
                Node::Text(text) => sink.text(&text.text),
                _ => {}
            },
            Edge::Close(node) => {
                if let Node::Element(element) = node.value() {
                    sink.close_tag(element.name());
                }
            }
        }
    }
}

/// True if the element's class attribute contains `class_name` as one of its
/// whitespace-separated tokens.
pub fn has_class(element: &Element, class_name: &str) -> bool {
    element
        .attr("class")
        .map(|classes| classes.split_whitespace().any(|c| c == class_name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl MarkupSink for Recorder {
        fn open_tag(&mut self, name: &str, element: &Element) {
            let class = element.attr("class").unwrap_or("");
            self.events.push(format!("open {} [{}]", name, class));
        }

        fn close_tag(&mut self, name: &str) {
            self.events.push(format!("close {}", name));
        }

        fn text(&mut self, data: &str) {
            if !data.trim().is_empty() {
                self.events.push(format!("text {}", data.trim()));
            }
        }
    }

    #[test]
    fn events_arrive_in_document_order() {
        let mut sink = Recorder::default();
        drive(
            "<div class=\"a b\"><p>hi</p></div>",
            &mut sink,
        );
        let joined = sink.events.join("; ");
        let div = joined.find("open div [a b]").unwrap();
        let p = joined.find("open p").unwrap();
        let text = joined.find("text hi").unwrap();
        let close_p = joined.find("close p").unwrap();
        let close_div = joined.find("close div").unwrap();
        assert!(div < p && p < text && text < close_p && close_p < close_div);
    }

    #[test]
    fn void_elements_emit_open_and_close() {
        let mut sink = Recorder::default();
        drive("<p>a<br>b</p>", &mut sink);
        assert!(sink.events.contains(&"open br []".to_string()));
        assert!(sink.events.contains(&"close br".to_string()));
    }

    #[test]
    fn entities_are_decoded_by_the_parser() {
        let mut sink = Recorder::default();
        drive("<p>a &amp; b</p>", &mut sink);
        assert!(sink.events.iter().any(|e| e == "text a & b"));
    }

    #[test]
    fn malformed_markup_does_not_panic() {
        let mut sink = Recorder::default();
        drive("<div><p>unclosed <span>soup", &mut sink);
        assert!(sink.events.iter().any(|e| e.starts_with("text unclosed")));
    }

    #[test]
    fn has_class_matches_whole_tokens() {
        let mut sink = Recorder::default();
        drive("<div class=\"p-eplist p-eplist__chapter-title\"></div>", &mut sink);
        assert!(sink
            .events
            .contains(&"open div [p-eplist p-eplist__chapter-title]".to_string()));
    }
}
