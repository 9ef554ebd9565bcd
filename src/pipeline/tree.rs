//! Span-preserving HTML tree.
//!
//! The document is kept as its original text plus a flat list of segments:
//! untouched byte ranges and element start tags. Only start tags whose
//! attributes were edited are re-rendered, everything else is copied from
//! the source, so unmodified regions serialize byte-identically.
//!
//! Tokenization is done by html5ever, with the sink switching the tokenizer
//! into raw text, RCDATA or script data after the same elements a browser
//! would. Byte offsets are recovered by feeding the tokenizer one
//! `>`-terminated chunk at a time. Attribute values are entity-decoded.

use std::ops::Range;

use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};

use crate::error::ParseError;

/// Elements whose literal content the stages read.
const INLINE_CONTENT_ELEMENTS: [&str; 2] = ["script", "style"];

/// Minimal tree interface the pipeline stages depend on.
pub trait HtmlTree: Sized {
    fn parse(bytes: &[u8]) -> Result<Self, ParseError>;
    fn serialize(&self) -> Vec<u8>;
    /// Elements with the given lowercase tag name, in document order.
    fn find_elements(&self, tag: &str) -> Vec<ElementId>;
    fn element(&self, id: ElementId) -> Option<&Element>;
    fn element_mut(&mut self, id: ElementId) -> Option<&mut Element>;
    /// Literal content of a `<script>` or `<style>` element.
    fn inline_content(&self, id: ElementId) -> Option<&str>;
    /// Inserts markup right after the element's start tag.
    fn insert_after_start_tag(&mut self, id: ElementId, html: String);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    /// Decoded value; valueless attributes such as `async` hold `""`.
    pub value: String,
}

/// An element start tag.
#[derive(Debug, Clone)]
pub struct Element {
    name: String,
    attributes: Vec<Attribute>,
    span: Range<usize>,
    self_closing: bool,
    content: Option<Range<usize>>,
    dirty: bool,
    inserted: Vec<String>,
}

impl Element {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute value; valueless attributes read as `""`.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name.eq_ignore_ascii_case(name))
            .map(|attr| attr.value.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Sets or replaces an attribute, marking the start tag for re-rendering.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attributes
            .iter_mut()
            .find(|attr| attr.name.eq_ignore_ascii_case(name))
        {
            Some(attr) if attr.value == value => return,
            Some(attr) => attr.value = value,
            None => self.attributes.push(Attribute {
                name: name.to_ascii_lowercase(),
                value,
            }),
        }
        self.dirty = true;
    }

    pub fn remove_attr(&mut self, name: &str) {
        let before = self.attributes.len();
        self.attributes.retain(|attr| !attr.name.eq_ignore_ascii_case(name));
        self.dirty |= self.attributes.len() != before;
    }

    /// Whitespace-separated tokens of `rel`, lowercased.
    pub fn rel_tokens(&self) -> Vec<String> {
        self.attr("rel")
            .map(|rel| rel.split_whitespace().map(str::to_ascii_lowercase).collect())
            .unwrap_or_default()
    }

    fn render_start_tag(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for attr in &self.attributes {
            out.push(' ');
            out.push_str(&attr.name);
            if !attr.value.is_empty() {
                out.push_str("=\"");
                out.push_str(&attr.value.replace('&', "&amp;").replace('"', "&quot;"));
                out.push('"');
            }
        }
        if self.self_closing {
            out.push_str(" /");
        }
        out.push('>');
    }
}

#[derive(Debug, Clone)]
enum Segment {
    Raw(Range<usize>),
    Element(Element),
}

/// Parsed document.
#[derive(Debug, Clone)]
pub struct HtmlDocument {
    source: String,
    segments: Vec<Segment>,
}

impl HtmlTree for HtmlDocument {
    fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let source = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;
        let segments = build_segments(source)?;
        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut out = String::with_capacity(self.source.len() + 256);
        for segment in &self.segments {
            match segment {
                Segment::Raw(range) => out.push_str(&self.source[range.clone()]),
                Segment::Element(element) => {
                    if element.dirty {
                        element.render_start_tag(&mut out);
                    } else {
                        out.push_str(&self.source[element.span.clone()]);
                    }
                    for html in &element.inserted {
                        out.push_str(html);
                    }
                }
            }
        }
        out.into_bytes()
    }

    fn find_elements(&self, tag: &str) -> Vec<ElementId> {
        self.segments
            .iter()
            .enumerate()
            .filter_map(|(i, segment)| match segment {
                Segment::Element(element) if element.name == tag => Some(ElementId(i)),
                _ => None,
            })
            .collect()
    }

    fn element(&self, id: ElementId) -> Option<&Element> {
        match self.segments.get(id.0) {
            Some(Segment::Element(element)) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        match self.segments.get_mut(id.0) {
            Some(Segment::Element(element)) => Some(element),
            _ => None,
        }
    }

    fn inline_content(&self, id: ElementId) -> Option<&str> {
        let range = self.element(id)?.content.clone()?;
        Some(&self.source[range])
    }

    fn insert_after_start_tag(&mut self, id: ElementId, html: String) {
        if let Some(element) = self.element_mut(id) {
            element.inserted.push(html);
        }
    }
}

/// Start tag as reported by the html5ever tokenizer.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StartTag {
    name: String,
    attributes: Vec<Attribute>,
    self_closing: bool,
}

#[derive(Debug)]
enum Event {
    /// `end` is the offset just past the closing `>`. `floor` is the end of
    /// the previous markup token, so the tag's `<` lies in `floor..end`.
    Start { tag: StartTag, end: usize, floor: usize },
    End { name: String, end: usize },
}

/// Collects tag events. The tokenizer is fed one `>`-terminated chunk at a
/// time, so every tag it emits ends exactly at `chunk_end`.
#[derive(Default)]
struct EventSink {
    chunk_end: usize,
    floor: usize,
    at_eof: bool,
    truncated: bool,
    events: Vec<Event>,
}

impl TokenSink for EventSink {
    type Handle = ();

    fn process_token(&mut self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        match token {
            Token::TagToken(tag) => {
                let name = tag.name.to_string();
                let end = self.chunk_end;
                let floor = std::mem::replace(&mut self.floor, end);
                if tag.kind == TagKind::EndTag {
                    self.events.push(Event::End { name, end });
                    return TokenSinkResult::Continue;
                }
                let next_state = content_model(&name);
                let attributes = tag
                    .attrs
                    .into_iter()
                    .map(|attr| Attribute {
                        name: attr.name.local.to_string(),
                        value: attr.value.to_string(),
                    })
                    .collect();
                self.events.push(Event::Start {
                    tag: StartTag {
                        name,
                        attributes,
                        self_closing: tag.self_closing,
                    },
                    end,
                    floor,
                });
                next_state
            }
            Token::CommentToken(_) | Token::DoctypeToken(_) => {
                self.floor = self.chunk_end;
                TokenSinkResult::Continue
            }
            Token::ParseError(_) if self.at_eof => {
                self.truncated = true;
                TokenSinkResult::Continue
            }
            _ => TokenSinkResult::Continue,
        }
    }
}

/// Tokenizer state after a start tag, as the HTML tree builder would set it
/// with scripting enabled.
fn content_model(name: &str) -> TokenSinkResult<()> {
    match name {
        "script" => TokenSinkResult::RawData(RawKind::ScriptData),
        "style" | "xmp" | "iframe" | "noembed" | "noframes" | "noscript" => {
            TokenSinkResult::RawData(RawKind::Rawtext)
        }
        "title" | "textarea" => TokenSinkResult::RawData(RawKind::Rcdata),
        "plaintext" => TokenSinkResult::Plaintext,
        _ => TokenSinkResult::Continue,
    }
}

fn tokenize(source: &str) -> EventSink {
    let mut tokenizer = Tokenizer::new(EventSink::default(), TokenizerOpts::default());
    let mut queue = BufferQueue::default();
    let mut chunk_start = 0;
    for (offset, _) in source.match_indices('>') {
        feed(&mut tokenizer, &mut queue, source, chunk_start..offset + 1);
        chunk_start = offset + 1;
    }
    if chunk_start < source.len() {
        feed(&mut tokenizer, &mut queue, source, chunk_start..source.len());
    }
    tokenizer.sink.at_eof = true;
    tokenizer.end();
    tokenizer.sink
}

fn feed(tokenizer: &mut Tokenizer<EventSink>, queue: &mut BufferQueue, source: &str, chunk: Range<usize>) {
    tokenizer.sink.chunk_end = chunk.end;
    queue.push_back(StrTendril::from_slice(&source[chunk]));
    let _ = tokenizer.feed(queue);
}

/// Finds the `<` that opens `tag`, scanning backwards from its end.
/// A candidate counts only if tokenizing `source[candidate..end]` on its own
/// yields exactly this tag, which rules out `<` inside attribute values.
fn locate_start(source: &str, floor: usize, end: usize, tag: &StartTag) -> Option<usize> {
    source[floor..end]
        .rmatch_indices('<')
        .map(|(offset, _)| floor + offset)
        .filter(|&start| {
            source
                .get(start + 1..start + 1 + tag.name.len())
                .is_some_and(|name| name.eq_ignore_ascii_case(&tag.name))
        })
        .find(|&start| {
            matches!(
                tokenize(&source[start..end]).events.as_slice(),
                [Event::Start { tag: found, .. }] if found == tag
            )
        })
}

fn build_segments(source: &str) -> Result<Vec<Segment>, ParseError> {
    let sink = tokenize(source);
    if sink.truncated {
        return Err(ParseError::TruncatedMarkup);
    }

    let mut segments = Vec::new();
    let mut raw_start = 0;
    let mut events = sink.events.into_iter().peekable();
    while let Some(event) = events.next() {
        let Event::Start { tag, end, floor } = event else {
            continue;
        };
        let Some(start) = locate_start(source, floor.max(raw_start), end, &tag) else {
            tracing::debug!(tag = %tag.name, end, "start tag not located in source");
            continue;
        };

        let content = if INLINE_CONTENT_ELEMENTS.contains(&tag.name.as_str()) {
            let close_end = match events.peek() {
                Some(Event::End { name, end: close_end }) if *name == tag.name => *close_end,
                _ => {
                    return Err(ParseError::UnterminatedRawText {
                        tag: tag.name,
                        offset: start,
                    })
                }
            };
            let close_start = source[end..close_end]
                .rfind("</")
                .map(|offset| end + offset)
                .unwrap_or(close_end);
            Some(end..close_start)
        } else {
            None
        };

        if raw_start < start {
            segments.push(Segment::Raw(raw_start..start));
        }
        raw_start = end;
        segments.push(Segment::Element(Element {
            name: tag.name,
            attributes: tag.attributes,
            span: start..end,
            self_closing: tag.self_closing,
            content,
            dirty: false,
            inserted: Vec::new(),
        }));
    }

    if raw_start < source.len() {
        segments.push(Segment::Raw(raw_start..source.len()));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "<!DOCTYPE html>\n<html><head><!-- <script>no</script> -->\
<script src='/a.js' async></script>\
<style>body { color: red } a < b</style>\
</head><body data-x=1>if a < b &amp; c<br/><script>console.log(\"</div>\")</script></body></html>";

    #[test]
    fn test_untouched_document_round_trips() {
        let doc = HtmlDocument::parse(PAGE.as_bytes()).unwrap();
        assert_eq!(doc.serialize(), PAGE.as_bytes());
    }

    #[test]
    fn test_finds_elements_and_inline_content() {
        let doc = HtmlDocument::parse(PAGE.as_bytes()).unwrap();
        let scripts = doc.find_elements("script");
        assert_eq!(scripts.len(), 2);

        let external = doc.element(scripts[0]).unwrap();
        assert_eq!(external.attr("src"), Some("/a.js"));
        assert_eq!(external.attr("async"), Some(""));
        assert_eq!(doc.inline_content(scripts[0]), Some(""));
        assert_eq!(doc.inline_content(scripts[1]), Some("console.log(\"</div>\")"));

        let styles = doc.find_elements("style");
        assert_eq!(doc.inline_content(styles[0]), Some("body { color: red } a < b"));
    }

    #[test]
    fn test_only_edited_tags_are_rewritten() {
        let mut doc = HtmlDocument::parse(PAGE.as_bytes()).unwrap();
        let script = doc.find_elements("script")[0];
        doc.element_mut(script).unwrap().set_attr("nonce", "abc");
        let head = doc.find_elements("head")[0];
        doc.insert_after_start_tag(head, "<meta charset=\"utf-8\">".to_string());

        let out = String::from_utf8(doc.serialize()).unwrap();
        let expected = PAGE
            .replace("<script src='/a.js' async>", "<script src=\"/a.js\" async nonce=\"abc\">")
            .replace("<head>", "<head><meta charset=\"utf-8\">");
        assert_eq!(out, expected);
    }

    #[test]
    fn test_setting_same_value_keeps_original_bytes() {
        let html = "<script src='/a.js'></script>";
        let mut doc = HtmlDocument::parse(html.as_bytes()).unwrap();
        let id = doc.find_elements("script")[0];
        doc.element_mut(id).unwrap().set_attr("src", "/a.js");
        assert_eq!(doc.serialize(), html.as_bytes());
    }

    #[test]
    fn test_malformed_input() {
        assert_eq!(HtmlDocument::parse(&[0xff, 0xfe]).unwrap_err(), ParseError::NotUtf8);
        assert_eq!(
            HtmlDocument::parse(b"<p>ok</p><div class=\"x").unwrap_err(),
            ParseError::TruncatedMarkup
        );
        assert_eq!(
            HtmlDocument::parse(b"<!-- open").unwrap_err(),
            ParseError::TruncatedMarkup
        );
        assert!(matches!(
            HtmlDocument::parse(b"<script>alert(1)").unwrap_err(),
            ParseError::UnterminatedRawText { .. }
        ));
    }

    #[test]
    fn test_self_closing_rendering() {
        let mut doc = HtmlDocument::parse(b"<link rel=\"stylesheet\" href=\"/a.css\" />").unwrap();
        let link = doc.find_elements("link")[0];
        let element = doc.element_mut(link).unwrap();
        assert_eq!(element.rel_tokens(), vec!["stylesheet".to_string()]);
        element.set_attr("integrity", "sha384-x");
        assert_eq!(
            doc.serialize(),
            b"<link rel=\"stylesheet\" href=\"/a.css\" integrity=\"sha384-x\" />".to_vec()
        );
    }

    #[test]
    fn test_rcdata_and_rawtext_content_is_not_markup() {
        let html = "<title>a <script>x()</script></title>\
<textarea>Example: <style>p{}</style></textarea>\
<noscript><script>y()</script></noscript><script>z()</script>";
        let doc = HtmlDocument::parse(html.as_bytes()).unwrap();

        let scripts = doc.find_elements("script");
        assert_eq!(scripts.len(), 1);
        assert_eq!(doc.inline_content(scripts[0]), Some("z()"));
        assert!(doc.find_elements("style").is_empty());
        assert_eq!(doc.find_elements("textarea").len(), 1);
        assert_eq!(doc.serialize(), html.as_bytes());
    }

    #[test]
    fn test_angle_brackets_inside_attribute_values() {
        let html = "<p>1 < 2</p><a title=\"<a x\" href='/b?x=1&amp;y=2'>b</a><script>q()</script>";
        let mut doc = HtmlDocument::parse(html.as_bytes()).unwrap();

        let link = doc.find_elements("a")[0];
        let element = doc.element(link).unwrap();
        assert_eq!(element.attr("title"), Some("<a x"));
        assert_eq!(element.attr("href"), Some("/b?x=1&y=2"));

        doc.element_mut(link).unwrap().set_attr("rel", "noopener");
        let out = String::from_utf8(doc.serialize()).unwrap();
        assert_eq!(
            out,
            html.replace(
                "<a title=\"<a x\" href='/b?x=1&amp;y=2'>",
                "<a title=\"<a x\" href=\"/b?x=1&amp;y=2\" rel=\"noopener\">"
            )
        );
        assert_eq!(doc.inline_content(doc.find_elements("script")[0]), Some("q()"));
    }
}
