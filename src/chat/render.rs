//! Renders turn text into structured blocks.
//!
//! Rendering is a pure function of the text so it is safe to redo
//! from scratch on every streamed token. Markdown structure comes from
//! `pulldown-cmark`; plain text runs are then scanned for absolute
//! URLs and `#anchor` references which become controls instead of
//! raw text.

use std::fmt;
use std::sync::LazyLock;

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Parser, Tag, TagEnd};
use regex::Regex;

use super::store::{ConversationTurn, Role};

static CONTROL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?P<url>https?://[^\s<>"`]+)|(?P<anchor>#[A-Za-z][\w-]*)"#)
        .expect("Invalid control regex")
});

/// Pages of the site an anchor can navigate to directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Page {
    Home,
    About,
    Projects,
    Certifications,
    Contact,
}

impl Page {
    pub const ALL: [Page; 5] = [
        Page::Home,
        Page::About,
        Page::Projects,
        Page::Certifications,
        Page::Contact,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Page::Home => "home",
            Page::About => "about",
            Page::Projects => "projects",
            Page::Certifications => "certifications",
            Page::Contact => "contact",
        }
    }

    pub fn from_id(id: &str) -> Option<Page> {
        Self::ALL
            .into_iter()
            .find(|page| page.id().eq_ignore_ascii_case(id))
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Whatever hosts the rendered output and can act on controls.
pub trait Navigator {
    /// Opens `url` outside the current page.
    fn open_external(&mut self, url: &str);

    fn navigate_to(&mut self, page: Page);

    /// Scrolls to the element with the given id. Returns false when
    /// the current page has no such element.
    fn scroll_to(&mut self, id: &str) -> bool;

    fn navigate_raw(&mut self, href: &str);
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Navigation {
    External(String),
    Page(Page),
    Scrolled(String),
    Raw(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkControl {
    pub label: String,
    pub url: String,
}

impl LinkControl {
    pub fn activate(&self, nav: &mut dyn Navigator) -> Navigation {
        nav.open_external(&self.url);
        Navigation::External(self.url.clone())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchorControl {
    pub label: String,
    /// Identifier without the leading `#`
    pub target: String,
}

impl AnchorControl {
    /// Known pages win over same-page elements; anything else falls
    /// back to plain fragment navigation.
    pub fn activate(&self, nav: &mut dyn Navigator) -> Navigation {
        if let Some(page) = Page::from_id(&self.target) {
            nav.navigate_to(page);
            return Navigation::Page(page);
        }
        if nav.scroll_to(&self.target) {
            return Navigation::Scrolled(self.target.clone());
        }
        let href = format!("#{}", self.target);
        nav.navigate_raw(&href);
        Navigation::Raw(href)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Control {
    Link(LinkControl),
    Anchor(AnchorControl),
}

impl Control {
    pub fn label(&self) -> &str {
        match self {
            Control::Link(link) => &link.label,
            Control::Anchor(anchor) => &anchor.label,
        }
    }

    pub fn activate(&self, nav: &mut dyn Navigator) -> Navigation {
        match self {
            Control::Link(link) => link.activate(nav),
            Control::Anchor(anchor) => anchor.activate(nav),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Style {
    pub strong: bool,
    pub emphasis: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inline {
    Text { text: String, style: Style },
    Code(String),
    Link(LinkControl),
    Anchor(AnchorControl),
    LineBreak,
}

impl Inline {
    fn plain(text: &str, style: Style) -> Self {
        Inline::Text {
            text: text.to_string(),
            style,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Block {
    Paragraph(Vec<Inline>),
    Heading {
        level: u8,
        content: Vec<Inline>,
    },
    ListItem {
        depth: usize,
        ordinal: Option<u64>,
        content: Vec<Inline>,
    },
    CodeBlock {
        language: Option<String>,
        code: String,
    },
    Rule,
    /// Shown while a bot turn is streaming but has no text yet
    Thinking,
}

impl Block {
    fn inlines(&self) -> &[Inline] {
        match self {
            Block::Paragraph(content)
            | Block::Heading { content, .. }
            | Block::ListItem { content, .. } => content,
            _ => &[],
        }
    }
}

/// Renders a turn. Bot turns are markdown, user turns are shown as
/// typed.
pub fn render_turn(turn: &ConversationTurn) -> Vec<Block> {
    match turn.role {
        Role::Bot if turn.streaming && turn.text.is_empty() => vec![Block::Thinking],
        Role::Bot => render_markdown(&turn.text),
        Role::User => render_plain(&turn.text),
    }
}

pub fn render_plain(text: &str) -> Vec<Block> {
    let mut content = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if i > 0 {
            content.push(Inline::LineBreak);
        }
        if !line.is_empty() {
            content.push(Inline::plain(line, Style::default()));
        }
    }
    if content.is_empty() {
        return Vec::new();
    }
    vec![Block::Paragraph(content)]
}

pub fn render_markdown(text: &str) -> Vec<Block> {
    let mut builder = BlockBuilder::default();
    for event in Parser::new(text) {
        builder.handle(event);
    }
    builder.finish()
}

/// All controls in document order.
pub fn controls(blocks: &[Block]) -> Vec<Control> {
    blocks
        .iter()
        .flat_map(|block| block.inlines())
        .filter_map(|inline| match inline {
            Inline::Link(link) => Some(Control::Link(link.clone())),
            Inline::Anchor(anchor) => Some(Control::Anchor(anchor.clone())),
            _ => None,
        })
        .collect()
}

/// Plain terminal rendering. Controls are numbered in the same order
/// `controls` returns them.
pub fn to_terminal(blocks: &[Block]) -> String {
    let mut out = String::new();
    let mut control_idx = 0;

    for block in blocks {
        match block {
            Block::Paragraph(content) => {
                push_inlines(&mut out, content, &mut control_idx);
                out.push_str("\n\n");
            }
            Block::Heading { level, content } => {
                out.push_str(&"#".repeat(*level as usize));
                out.push(' ');
                push_inlines(&mut out, content, &mut control_idx);
                out.push_str("\n\n");
            }
            Block::ListItem {
                depth,
                ordinal,
                content,
            } => {
                out.push_str(&"  ".repeat(*depth));
                match ordinal {
                    Some(n) => out.push_str(&format!("{}. ", n)),
                    None => out.push_str("• "),
                }
                push_inlines(&mut out, content, &mut control_idx);
                out.push('\n');
            }
            Block::CodeBlock { language, code } => {
                out.push_str("```");
                out.push_str(language.as_deref().unwrap_or_default());
                out.push('\n');
                out.push_str(code);
                if !code.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str("```\n\n");
            }
            Block::Rule => out.push_str("----\n\n"),
            Block::Thinking => out.push_str("Thinking..."),
        }
    }

    out.trim_end().to_string()
}

fn push_inlines(out: &mut String, content: &[Inline], control_idx: &mut usize) {
    for inline in content {
        match inline {
            Inline::Text { text, .. } => out.push_str(text),
            Inline::Code(code) => {
                out.push('`');
                out.push_str(code);
                out.push('`');
            }
            Inline::Link(LinkControl { label, .. }) | Inline::Anchor(AnchorControl { label, .. }) => {
                *control_idx += 1;
                out.push_str(&format!("{} [{}]", label, control_idx));
            }
            Inline::LineBreak => out.push('\n'),
        }
    }
}

/// Splits a plain text run into text and control inlines. Trailing
/// punctuation after a URL stays in the text.
fn split_controls(text: &str, style: Style) -> Vec<Inline> {
    let mut inlines = Vec::new();
    let mut last = 0;

    for caps in CONTROL_RE.captures_iter(text) {
        let (start, control, len) = if let Some(m) = caps.name("url") {
            let url = trim_url(m.as_str());
            if url.ends_with("://") {
                continue;
            }
            let link = LinkControl {
                label: url.to_string(),
                url: url.to_string(),
            };
            (m.start(), Inline::Link(link), url.len())
        } else if let Some(m) = caps.name("anchor") {
            // `C#` or `page#section` are not anchors
            let prev = text[..m.start()].chars().next_back();
            if prev.is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '&' || c == '/') {
                continue;
            }
            let anchor = m.as_str().trim_end_matches('-');
            let control = AnchorControl {
                label: anchor.to_string(),
                target: anchor[1..].to_string(),
            };
            (m.start(), Inline::Anchor(control), anchor.len())
        } else {
            continue;
        };

        if start > last {
            inlines.push(Inline::plain(&text[last..start], style));
        }
        inlines.push(control);
        last = start + len;
    }

    if last < text.len() {
        inlines.push(Inline::plain(&text[last..], style));
    }
    inlines
}

fn trim_url(url: &str) -> &str {
    let mut end = url.len();
    while let Some(c) = url[..end].chars().next_back() {
        let s = &url[..end];
        let strip = match c {
            '.' | ',' | ';' | ':' | '!' | '?' | '\'' | '*' => true,
            ')' => s.matches(')').count() > s.matches('(').count(),
            ']' => s.matches(']').count() > s.matches('[').count(),
            _ => false,
        };
        if !strip {
            break;
        }
        end -= c.len_utf8();
    }
    &url[..end]
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

struct PendingLink {
    url: String,
    label: String,
}

struct OpenItem {
    depth: usize,
    ordinal: Option<u64>,
}

// Accumulates inline content until a block ends. Adjacent text events
// with the same style are merged before scanning for controls since
// the markdown parser may split a URL across several text events.
#[derive(Default)]
struct BlockBuilder {
    blocks: Vec<Block>,
    inlines: Vec<Inline>,
    run: String,
    run_style: Style,
    strong: usize,
    emphasis: usize,
    link: Option<PendingLink>,
    code: Option<(Option<String>, String)>,
    heading: Option<u8>,
    lists: Vec<Option<u64>>,
    items: Vec<OpenItem>,
}

impl BlockBuilder {
    fn style(&self) -> Style {
        Style {
            strong: self.strong > 0,
            emphasis: self.emphasis > 0,
        }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => self.text(&text),
            Event::Code(code) => {
                if let Some(link) = self.link.as_mut() {
                    link.label.push_str(&code);
                } else {
                    self.flush_run();
                    self.inlines.push(Inline::Code(code.to_string()));
                }
            }
            Event::Html(html) | Event::InlineHtml(html) => self.text(&html),
            Event::SoftBreak | Event::HardBreak => {
                if let Some(link) = self.link.as_mut() {
                    link.label.push(' ');
                } else {
                    self.flush_run();
                    self.inlines.push(Inline::LineBreak);
                }
            }
            Event::Rule => {
                self.flush_item();
                self.blocks.push(Block::Rule);
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag) {
        match tag {
            Tag::Heading { level, .. } => {
                self.flush_paragraph();
                self.heading = Some(heading_level(level));
            }
            Tag::CodeBlock(kind) => {
                self.flush_item();
                let language = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .map(|lang| lang.to_string()),
                    CodeBlockKind::Indented => None,
                };
                self.code = Some((language, String::new()));
            }
            Tag::HtmlBlock => self.flush_item(),
            Tag::List(start) => {
                self.flush_item();
                self.lists.push(start);
            }
            Tag::Item => {
                self.flush_item();
                let depth = self.lists.len().saturating_sub(1);
                let ordinal = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let current = *n;
                        *n += 1;
                        Some(current)
                    }
                    _ => None,
                };
                self.items.push(OpenItem { depth, ordinal });
            }
            Tag::Emphasis => {
                self.flush_run();
                self.emphasis += 1;
            }
            Tag::Strong => {
                self.flush_run();
                self.strong += 1;
            }
            Tag::Link { dest_url, .. } => {
                self.flush_run();
                self.link = Some(PendingLink {
                    url: dest_url.to_string(),
                    label: String::new(),
                });
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                if self.items.is_empty() {
                    self.flush_paragraph();
                } else {
                    // Loose list items keep their paragraphs together
                    self.flush_run();
                    if !self.inlines.is_empty() {
                        self.inlines.push(Inline::LineBreak);
                    }
                }
            }
            TagEnd::Heading(_) => {
                self.flush_run();
                let content = std::mem::take(&mut self.inlines);
                let level = self.heading.take().unwrap_or(1);
                self.blocks.push(Block::Heading { level, content });
            }
            TagEnd::CodeBlock => {
                if let Some((language, code)) = self.code.take() {
                    self.blocks.push(Block::CodeBlock { language, code });
                }
            }
            TagEnd::HtmlBlock => {
                let len = self.run.trim_end_matches('\n').len();
                self.run.truncate(len);
                self.flush_item();
            }
            TagEnd::Item => {
                self.flush_item();
                self.items.pop();
            }
            TagEnd::List(_) => {
                self.lists.pop();
            }
            TagEnd::Emphasis => {
                self.flush_run();
                self.emphasis = self.emphasis.saturating_sub(1);
            }
            TagEnd::Strong => {
                self.flush_run();
                self.strong = self.strong.saturating_sub(1);
            }
            TagEnd::Link => {
                if let Some(PendingLink { url, label }) = self.link.take() {
                    let label = if label.is_empty() { url.clone() } else { label };
                    let control = match url.strip_prefix('#') {
                        Some(target) => Inline::Anchor(AnchorControl {
                            label,
                            target: target.to_string(),
                        }),
                        None => Inline::Link(LinkControl { label, url }),
                    };
                    self.inlines.push(control);
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if let Some((_, code)) = self.code.as_mut() {
            code.push_str(text);
            return;
        }
        if let Some(link) = self.link.as_mut() {
            link.label.push_str(text);
            return;
        }
        let style = self.style();
        if !self.run.is_empty() && style != self.run_style {
            self.flush_run();
        }
        self.run_style = style;
        self.run.push_str(text);
    }

    fn flush_run(&mut self) {
        if self.run.is_empty() {
            return;
        }
        let run = std::mem::take(&mut self.run);
        self.inlines.extend(split_controls(&run, self.run_style));
    }

    fn flush_paragraph(&mut self) {
        self.flush_run();
        if self.inlines.is_empty() {
            return;
        }
        let mut content = std::mem::take(&mut self.inlines);
        while matches!(content.last(), Some(Inline::LineBreak)) {
            content.pop();
        }
        self.blocks.push(Block::Paragraph(content));
    }

    // Emits the content gathered so far for the innermost open item.
    // Later content for the same item (after a nested list) is emitted
    // without repeating the ordinal.
    fn flush_item(&mut self) {
        self.flush_run();
        let Some(item) = self.items.last_mut() else {
            self.flush_paragraph();
            return;
        };
        if self.inlines.is_empty() {
            return;
        }
        let mut content = std::mem::take(&mut self.inlines);
        while matches!(content.last(), Some(Inline::LineBreak)) {
            content.pop();
        }
        self.blocks.push(Block::ListItem {
            depth: item.depth,
            ordinal: item.ordinal.take(),
            content,
        });
    }

    fn finish(mut self) -> Vec<Block> {
        self.flush_item();
        if let Some((language, code)) = self.code.take() {
            self.blocks.push(Block::CodeBlock { language, code });
        }
        self.blocks
    }
}
