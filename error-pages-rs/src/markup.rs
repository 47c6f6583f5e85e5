//! # Markup Tree
//!
//! A tolerant HTML tree used by the template compositor. Text and attribute
//! values are kept as source markup (entities are never decoded), so a value
//! that was escaped on the way in stays escaped on the way out.

use std::fmt;

use thiserror::Error;

/// Elements that never have content or a closing tag
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Elements whose content is raw text up to the matching closing tag
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea"];

/// Markup parse failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MarkupError {
    /// A tag was opened but never closed with `>`
    #[error("Unterminated tag at byte {0}")]
    UnterminatedTag(usize),

    /// A comment was opened but never closed with `-->`
    #[error("Unterminated comment at byte {0}")]
    UnterminatedComment(usize),

    /// A quoted attribute value ran to the end of input
    #[error("Unterminated attribute value at byte {0}")]
    UnterminatedAttribute(usize),

    /// A raw text element (script, style) was never closed
    #[error("Unclosed <{name}> element opened at byte {offset}")]
    UnclosedRawText { name: String, offset: usize },
}

/// A node of the markup tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// `<!DOCTYPE ...>` or any other `<!...>` declaration
    Declaration(String),
    /// An element with attributes and children
    Element(Element),
    /// Text, kept as escaped source markup
    Text(String),
    /// `<!-- ... -->`
    Comment(String),
}

/// An element node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Lower-cased tag name
    pub name: String,
    /// Attributes in source order; `None` for bare attributes
    pub attributes: Vec<(String, Option<String>)>,
    /// Child nodes
    pub children: Vec<Node>,
}

impl Element {
    /// Creates an empty element
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Adds an attribute whose value is escaped for attribute context
    pub fn attr<K: Into<String>>(mut self, key: K, value: &str) -> Self {
        self.attributes.push((key.into(), Some(escape_html(value))));
        self
    }

    /// Returns the raw value of an attribute
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| v.as_deref())
    }

    /// Binding keys of this element: its id, then each class token
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if let Some(id) = self.attribute("id") {
            if !id.is_empty() {
                keys.push(id.to_string());
            }
        }
        if let Some(class) = self.attribute("class") {
            keys.extend(class.split_whitespace().map(str::to_string));
        }
        keys
    }

    /// Returns true if the element's id or one of its classes equals `key`
    pub fn has_key(&self, key: &str) -> bool {
        self.keys().iter().any(|k| k == key)
    }

    /// Returns true for elements that never carry content
    pub fn is_void(&self) -> bool {
        VOID_ELEMENTS.contains(&self.name.as_str())
    }

    /// Replaces the content with a single escaped text node
    pub fn set_text(&mut self, text: &str) {
        self.children = vec![Node::Text(escape_html(text))];
    }

    /// Serializes the children
    pub fn inner_html(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            out.push_str(&child.to_string());
        }
        out
    }

    /// Depth-first search for the first descendant with tag `name`
    pub fn find_mut(&mut self, name: &str) -> Option<&mut Element> {
        find_in_mut(&mut self.children, name)
    }
}

/// A parsed markup document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    /// Top-level nodes
    pub nodes: Vec<Node>,
}

impl Document {
    /// Parses a complete document
    pub fn parse(source: &str) -> Result<Self, MarkupError> {
        Ok(Self {
            nodes: parse_fragment(source)?,
        })
    }

    /// Depth-first search for the first element with tag `name`
    pub fn find_mut(&mut self, name: &str) -> Option<&mut Element> {
        find_in_mut(&mut self.nodes, name)
    }

    /// Depth-first search for the first element with tag `name`
    pub fn find(&self, name: &str) -> Option<&Element> {
        find_in(&self.nodes, name)
    }

    /// Drops top-level declarations such as `<!DOCTYPE html>`
    pub fn strip_declarations(&mut self) {
        self.nodes.retain(|node| !matches!(node, Node::Declaration(_)));
    }

    /// Content of the `<body>` element, or the whole document if there is none
    pub fn body_inner_html(&self) -> String {
        match self.find("body") {
            Some(body) => body.inner_html(),
            None => self.to_string(),
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            write!(f, "{}", node)?;
        }
        Ok(())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Declaration(text) => write!(f, "<!{}>", text),
            Node::Text(text) => f.write_str(text),
            Node::Comment(text) => write!(f, "<!--{}-->", text),
            Node::Element(element) => write!(f, "{}", element),
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.name)?;
        for (key, value) in &self.attributes {
            match value {
                Some(value) => write!(f, " {}=\"{}\"", key, value.replace('"', "&quot;"))?,
                None => write!(f, " {}", key)?,
            }
        }
        f.write_str(">")?;

        if self.is_void() {
            return Ok(());
        }

        for child in &self.children {
            write!(f, "{}", child)?;
        }
        write!(f, "</{}>", self.name)
    }
}

fn find_in<'a>(nodes: &'a [Node], name: &str) -> Option<&'a Element> {
    for node in nodes {
        if let Node::Element(element) = node {
            if element.name == name {
                return Some(element);
            }
            if let Some(found) = find_in(&element.children, name) {
                return Some(found);
            }
        }
    }
    None
}

fn find_in_mut<'a>(nodes: &'a mut [Node], name: &str) -> Option<&'a mut Element> {
    for node in nodes.iter_mut() {
        if let Node::Element(element) = node {
            if element.name == name {
                return Some(element);
            }
            if let Some(found) = find_in_mut(&mut element.children, name) {
                return Some(found);
            }
        }
    }
    None
}

/// Escapes `& < > " '` for text and attribute context
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

/// Parses a sequence of nodes. Unknown closing tags are ignored and elements
/// left open at the end of input are closed implicitly.
pub fn parse_fragment(source: &str) -> Result<Vec<Node>, MarkupError> {
    Parser::new(source).run()
}

struct Parser<'s> {
    src: &'s str,
    pos: usize,
    stack: Vec<Element>,
    roots: Vec<Node>,
}

impl<'s> Parser<'s> {
    fn new(src: &'s str) -> Self {
        Self {
            src,
            pos: 0,
            stack: Vec::new(),
            roots: Vec::new(),
        }
    }

    fn rest(&self) -> &'s str {
        &self.src[self.pos..]
    }

    fn push(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.roots.push(node),
        }
    }

    fn run(mut self) -> Result<Vec<Node>, MarkupError> {
        while self.pos < self.src.len() {
            let rest = self.rest();
            if rest.starts_with("<!--") {
                self.comment()?;
            } else if rest.starts_with("<!") {
                self.declaration()?;
            } else if rest.starts_with("</") {
                self.end_tag()?;
            } else if rest.starts_with('<')
                && rest[1..].chars().next().map_or(false, |c| c.is_ascii_alphabetic())
            {
                self.start_tag()?;
            } else {
                self.text();
            }
        }

        while let Some(element) = self.stack.pop() {
            self.push(Node::Element(element));
        }

        Ok(self.roots)
    }

    fn text(&mut self) {
        let rest = self.rest();
        // A lone '<' that does not open a tag is kept as text
        let skip = if rest.starts_with('<') { 1 } else { 0 };
        let len = rest[skip..].find('<').map_or(rest.len(), |i| i + skip);
        let text = rest[..len].to_string();
        self.pos += len;

        if let Some(Node::Text(previous)) = self.current_children_mut().last_mut() {
            previous.push_str(&text);
        } else {
            self.push(Node::Text(text));
        }
    }

    fn current_children_mut(&mut self) -> &mut Vec<Node> {
        match self.stack.last_mut() {
            Some(parent) => &mut parent.children,
            None => &mut self.roots,
        }
    }

    fn comment(&mut self) -> Result<(), MarkupError> {
        let start = self.pos;
        let body = &self.rest()[4..];
        let end = body.find("-->").ok_or(MarkupError::UnterminatedComment(start))?;
        let text = body[..end].to_string();
        self.pos += 4 + end + 3;
        self.push(Node::Comment(text));
        Ok(())
    }

    fn declaration(&mut self) -> Result<(), MarkupError> {
        let start = self.pos;
        let body = &self.rest()[2..];
        let end = body.find('>').ok_or(MarkupError::UnterminatedTag(start))?;
        let text = body[..end].trim().to_string();
        self.pos += 2 + end + 1;
        self.push(Node::Declaration(text));
        Ok(())
    }

    fn end_tag(&mut self) -> Result<(), MarkupError> {
        let start = self.pos;
        let body = &self.rest()[2..];
        let end = body.find('>').ok_or(MarkupError::UnterminatedTag(start))?;
        let name = body[..end].trim().to_ascii_lowercase();
        self.pos += 2 + end + 1;

        if let Some(index) = self.stack.iter().rposition(|e| e.name == name) {
            while self.stack.len() > index {
                if let Some(element) = self.stack.pop() {
                    self.push(Node::Element(element));
                }
            }
        }
        Ok(())
    }

    fn start_tag(&mut self) -> Result<(), MarkupError> {
        let start = self.pos;
        self.pos += 1;

        let name_len = self
            .rest()
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':'))
            .unwrap_or(self.rest().len());
        let mut element = Element::new(&self.rest()[..name_len]);
        self.pos += name_len;

        let self_closing = loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.is_empty() {
                return Err(MarkupError::UnterminatedTag(start));
            }
            if rest.starts_with("/>") {
                self.pos += 2;
                break true;
            }
            if rest.starts_with('>') {
                self.pos += 1;
                break false;
            }
            if rest.starts_with('/') {
                self.pos += 1;
                continue;
            }
            let attribute = self.attribute()?;
            element.attributes.push(attribute);
        };

        if self_closing || element.is_void() {
            self.push(Node::Element(element));
            return Ok(());
        }

        if RAW_TEXT_ELEMENTS.contains(&element.name.as_str()) {
            let closing = format!("</{}", element.name);
            let rest = self.rest();
            let end = rest
                .to_ascii_lowercase()
                .find(&closing)
                .ok_or_else(|| MarkupError::UnclosedRawText {
                    name: element.name.clone(),
                    offset: start,
                })?;
            if end > 0 {
                element.children.push(Node::Text(rest[..end].to_string()));
            }
            self.pos += end;
            let close_end = self
                .rest()
                .find('>')
                .ok_or(MarkupError::UnterminatedTag(self.pos))?;
            self.pos += close_end + 1;
            self.push(Node::Element(element));
            return Ok(());
        }

        self.stack.push(element);
        Ok(())
    }

    fn attribute(&mut self) -> Result<(String, Option<String>), MarkupError> {
        let rest = self.rest();
        let name_len = rest
            .find(|c: char| c.is_whitespace() || c == '=' || c == '>' || c == '/')
            .unwrap_or(rest.len());
        // Stray characters such as a lone quote are consumed as a bare attribute
        let name_len = name_len.max(rest.chars().next().map_or(0, char::len_utf8));
        let name = rest[..name_len].to_ascii_lowercase();
        self.pos += name_len;

        self.skip_whitespace();
        if !self.rest().starts_with('=') {
            return Ok((name, None));
        }
        self.pos += 1;
        self.skip_whitespace();

        let rest = self.rest();
        let value = match rest.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let end = rest[1..]
                    .find(quote)
                    .ok_or(MarkupError::UnterminatedAttribute(self.pos))?;
                let value = rest[1..1 + end].to_string();
                self.pos += end + 2;
                value
            }
            _ => {
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == '>')
                    .unwrap_or(rest.len());
                let value = rest[..end].to_string();
                self.pos += end;
                value
            }
        };

        Ok((name, Some(value)))
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_serialize_document() {
        let source = "<html><head><title>x</title><meta charset=\"utf-8\"></head>\
                      <body class=\"page error\"><p id=\"msg\">a &amp; b</p><br/></body></html>";
        let doc = Document::parse(source).unwrap();

        assert_eq!(
            doc.to_string(),
            "<html><head><title>x</title><meta charset=\"utf-8\"></head>\
             <body class=\"page error\"><p id=\"msg\">a &amp; b</p><br></body></html>"
        );
    }

    #[test]
    fn test_keys_are_id_then_classes() {
        let nodes = parse_fragment("<div id=\"main\" class=\"error-code  big\"></div>").unwrap();
        let Node::Element(div) = &nodes[0] else {
            panic!("expected element");
        };

        assert_eq!(div.keys(), vec!["main", "error-code", "big"]);
        assert!(div.has_key("error-code"));
        assert!(!div.has_key("error"));
    }

    #[test]
    fn test_unclosed_elements_are_closed_at_end() {
        let doc = Document::parse("<div><span>open").unwrap();
        assert_eq!(doc.to_string(), "<div><span>open</span></div>");
    }

    #[test]
    fn test_stray_closing_tag_is_ignored() {
        let doc = Document::parse("<p>a</em>b</p>").unwrap();
        assert_eq!(doc.to_string(), "<p>ab</p>");
    }

    #[test]
    fn test_script_content_is_raw() {
        let doc = Document::parse("<script>if (a < b) { go(); }</script>").unwrap();
        assert_eq!(doc.to_string(), "<script>if (a < b) { go(); }</script>");
    }

    #[test]
    fn test_declarations_and_comments() {
        let mut doc = Document::parse("<!DOCTYPE html><!-- note --><html></html>").unwrap();
        assert_eq!(doc.to_string(), "<!DOCTYPE html><!-- note --><html></html>");

        doc.strip_declarations();
        assert_eq!(doc.to_string(), "<!-- note --><html></html>");
    }

    #[test]
    fn test_parse_failures() {
        assert_eq!(
            Document::parse("<div class=\"x").unwrap_err(),
            MarkupError::UnterminatedAttribute(11)
        );
        assert_eq!(Document::parse("<div").unwrap_err(), MarkupError::UnterminatedTag(0));
        assert!(matches!(
            Document::parse("<p><!-- open").unwrap_err(),
            MarkupError::UnterminatedComment(3)
        ));
        assert!(matches!(
            Document::parse("<style>body{}").unwrap_err(),
            MarkupError::UnclosedRawText { .. }
        ));
    }

    #[test]
    fn test_lone_angle_bracket_is_text() {
        let doc = Document::parse("<p>1 < 2</p>").unwrap();
        assert_eq!(doc.to_string(), "<p>1 < 2</p>");
    }

    #[test]
    fn test_set_text_escapes() {
        let mut doc = Document::parse("<head><title>old</title></head>").unwrap();
        doc.find_mut("title").unwrap().set_text("<b> & co");
        assert_eq!(doc.to_string(), "<head><title>&lt;b&gt; &amp; co</title></head>");
    }

    #[test]
    fn test_body_inner_html() {
        let doc = Document::parse("<html><body><i>x</i></body></html>").unwrap();
        assert_eq!(doc.body_inner_html(), "<i>x</i>");

        let bare = Document::parse("<i>x</i>").unwrap();
        assert_eq!(bare.body_inner_html(), "<i>x</i>");
    }
}
