//! # Template Compositor
//!
//! Two-stage page composition shared by the diagnostic renderer and the
//! public error page.
//!
//! Stage one inlines named content blocks into the layout and serializes the
//! result. Stage two parses that intermediate markup again as a new template
//! and binds it against a data source. Assets are then injected into the head
//! and the title text is replaced.
//!
//! An element is addressed by its `id` and its class tokens. In stage one the
//! first key naming a block replaces the element's content with the block's
//! fragments. In stage two the first key the data source answers replaces the
//! element's content with the returned markup.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::markup::{parse_fragment, Document, Element, MarkupError, Node};
use crate::monitoring;
use crate::options::{Favicon, RenderOptions};
use crate::types::{ErrorKind, Result};

/// Block name to ordered fragments
pub type BlockMap = IndexMap<String, Vec<String>>;

/// A source of values for named template fields.
///
/// Returned values are markup; implementors escape text themselves.
pub trait TemplateData {
    fn field(&mut self, name: &str) -> Result<Option<String>>;
}

impl TemplateData for Value {
    fn field(&mut self, name: &str) -> Result<Option<String>> {
        Ok(match self.get(name) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        })
    }
}

/// Head assets in injection order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assets {
    pub favicon: Option<Favicon>,
    pub stylesheets: Vec<String>,
    pub javascripts: Vec<String>,
}

impl Assets {
    /// Collects the non-empty assets of the render options
    pub fn from_options(options: &RenderOptions) -> Self {
        Self {
            favicon: options.favicon.clone(),
            stylesheets: options.stylesheets.entries().map(str::to_string).collect(),
            javascripts: options.javascripts.entries().map(str::to_string).collect(),
        }
    }
}

/// Everything needed to compose one page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Composition {
    pub doctype: String,
    /// Layout markup
    pub layout: String,
    pub blocks: BlockMap,
    pub assets: Assets,
    pub title: Option<String>,
}

impl Composition {
    /// Resolves layout and content blocks from render options.
    ///
    /// `default_layout` is used when no layout is configured.
    pub fn from_options(
        compositor: &TemplateCompositor,
        options: &RenderOptions,
        default_layout: &str,
    ) -> Result<Self> {
        let layout = match &options.layout {
            Some(layout) => compositor.load_source(layout)?,
            None => default_layout.to_string(),
        };

        let mut blocks = BlockMap::new();
        for (name, source) in &options.scripts {
            let mut fragments = Vec::new();
            for value in source.values() {
                fragments.push(compositor.load_source(value)?);
            }
            blocks.insert(name.clone(), fragments);
        }

        Ok(Self {
            doctype: options.doctype.clone(),
            layout,
            blocks,
            assets: Assets::from_options(options),
            title: options.title.clone(),
        })
    }
}

/// Composes pages from layouts, blocks, bindings and assets
#[derive(Debug, Clone, Default)]
pub struct TemplateCompositor;

impl TemplateCompositor {
    pub fn new() -> Self {
        Self
    }

    /// Reads `value` as a file if it names one, otherwise returns it as markup
    pub fn load_source(&self, value: &str) -> Result<String> {
        if !value.contains('<') {
            let path = Path::new(value.trim());
            if path.is_file() {
                debug!(path = %path.display(), "Loading template source");
                return Ok(fs::read_to_string(path)?);
            }
        }
        Ok(value.to_string())
    }

    /// Stage one: inlines content blocks into the layout
    pub fn inline_blocks(&self, layout: &str, blocks: &BlockMap) -> std::result::Result<String, MarkupError> {
        let mut document = Document::parse(layout)?;
        inline_nodes(&mut document.nodes, blocks)?;
        Ok(document.to_string())
    }

    /// Stage two: parses `source` as a new template and binds its fields
    pub fn bind<D: TemplateData + ?Sized>(&self, source: &str, data: &mut D) -> Result<Document> {
        let mut document = Document::parse(source)?;
        bind_nodes(&mut document.nodes, data)?;
        Ok(document)
    }

    /// Appends favicon, stylesheet and script elements to the head
    pub fn inject_assets(&self, document: &mut Document, assets: &Assets) {
        let Some(head) = document.find_mut("head") else {
            warn!("Layout has no head element; assets not injected");
            return;
        };

        if let Some(favicon) = &assets.favicon {
            head.children.push(Node::Element(
                Element::new("link")
                    .attr("rel", "icon")
                    .attr("type", &favicon.mime)
                    .attr("href", &favicon.href),
            ));
        }
        for href in &assets.stylesheets {
            head.children.push(Node::Element(
                Element::new("link").attr("rel", "stylesheet").attr("href", href),
            ));
        }
        for src in &assets.javascripts {
            head.children
                .push(Node::Element(Element::new("script").attr("src", src)));
        }
    }

    /// Sets the text of the title element
    pub fn set_title(&self, document: &mut Document, title: &str) {
        match document.find_mut("title") {
            Some(element) => element.set_text(title),
            None => warn!("Layout has no title element; title not set"),
        }
    }

    /// Composes a full page.
    ///
    /// Returns `Ok(None)` when the templates cannot be parsed or read; the
    /// failure is logged. Faults raised by the data source propagate.
    pub fn compose<D: TemplateData + ?Sized>(
        &self,
        composition: &Composition,
        data: &mut D,
    ) -> Result<Option<String>> {
        recover(self.try_compose(composition, data))
    }

    fn try_compose<D: TemplateData + ?Sized>(
        &self,
        composition: &Composition,
        data: &mut D,
    ) -> Result<String> {
        let intermediate = self.inline_blocks(&composition.layout, &composition.blocks)?;
        let mut document = self.bind(&intermediate, data)?;

        document.strip_declarations();
        self.inject_assets(&mut document, &composition.assets);
        if let Some(title) = &composition.title {
            self.set_title(&mut document, title);
        }

        Ok(format!("{}\n{}", composition.doctype, document))
    }

    /// Binds a fragment template and returns its body content.
    ///
    /// Failures are handled as in [`TemplateCompositor::compose`].
    pub fn render_fragment<D: TemplateData + ?Sized>(
        &self,
        template: &str,
        data: &mut D,
    ) -> Result<Option<String>> {
        let attempt = self
            .load_source(template)
            .and_then(|source| self.bind(&source, data))
            .map(|document| document.body_inner_html());

        recover(attempt)
    }
}

/// Converts template faults into a logged "no output"
fn recover(attempt: Result<String>) -> Result<Option<String>> {
    match attempt {
        Ok(markup) => Ok(Some(markup)),
        Err(e) if matches!(e.kind, ErrorKind::Render | ErrorKind::IO) => {
            error!(error = %e, "Template composition failed");
            monitoring::record_render_failure();
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn inline_nodes(nodes: &mut [Node], blocks: &BlockMap) -> std::result::Result<(), MarkupError> {
    for node in nodes.iter_mut() {
        let Node::Element(element) = node else {
            continue;
        };

        match element.keys().iter().find_map(|key| blocks.get(key)) {
            Some(fragments) => {
                let mut children = Vec::new();
                for fragment in fragments {
                    children.extend(parse_fragment(fragment)?);
                }
                element.children = children;
            }
            None => inline_nodes(&mut element.children, blocks)?,
        }
    }
    Ok(())
}

fn bind_nodes<D: TemplateData + ?Sized>(nodes: &mut [Node], data: &mut D) -> Result<()> {
    for node in nodes.iter_mut() {
        let Node::Element(element) = node else {
            continue;
        };
        if element.is_void() {
            continue;
        }

        let mut bound = None;
        for key in element.keys() {
            if let Some(value) = data.field(&key)? {
                bound = Some(value);
                break;
            }
        }

        match bound {
            Some(value) => element.children = parse_fragment(&value)?,
            None => bind_nodes(&mut element.children, data)?,
        }
    }
    Ok(())
}
