//! XML catalog documents, the format public overlay feeds are published in.
//!
//! Two shapes are read: `<repositories>` holding `<repo>` entries with child
//! elements, and the older `<layman>` document whose `<overlay>` entries keep
//! the source, type and contact in attributes. Documents are always written
//! in the `<repositories>` shape.

use crate::format::CatalogFormat;
use crate::overlay::{Overlay, Owner, Quality, Source, SourceKind, Status, DEFAULT_PRIORITY};
use crate::CatalogError;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::fmt;

const ENTRY_TAGS: [&str; 2] = ["repo", "overlay"];

fn corrupt(reason: impl fmt::Display) -> CatalogError {
    CatalogError::Corrupt {
        origin: String::new(),
        reason: reason.to_string(),
    }
}

fn write_error(e: impl fmt::Display) -> CatalogError {
    CatalogError::Serialization(e.to_string())
}

/// Minimal element tree; only what the catalog schema needs.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn open(start: &BytesStart<'_>) -> Result<Self, CatalogError> {
        let mut attrs = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(corrupt)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(corrupt)?.into_owned();
            attrs.push((key, value));
        }
        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attrs,
            ..Self::default()
        })
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn trimmed(&self) -> String {
        self.text.trim().to_owned()
    }
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), CatalogError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(corrupt("document has more than one root element")),
    }
    Ok(())
}

fn parse_tree(text: &str) -> Result<Element, CatalogError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;
    loop {
        match reader.read_event().map_err(corrupt)? {
            Event::Start(start) => stack.push(Element::open(&start)?),
            Event::Empty(start) => {
                let element = Element::open(&start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| corrupt("closing tag without an open element"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(t) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape().map_err(corrupt)?);
                }
            }
            Event::CData(c) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    if let Some(open) = stack.last() {
        return Err(corrupt(format!("element <{}> is never closed", open.name)));
    }
    root.ok_or_else(|| corrupt("document has no root element"))
}

fn parse_quality(value: &str) -> Option<Quality> {
    match value.trim() {
        "core" => Some(Quality::Core),
        "stable" => Some(Quality::Stable),
        "testing" => Some(Quality::Testing),
        "experimental" => Some(Quality::Experimental),
        "broken" => Some(Quality::Broken),
        _ => None,
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn source_from(element: &Element) -> Option<Source> {
    let kind = element.attr("type")?;
    let mut source = Source::new(element.trimmed(), SourceKind::parse(kind));
    source.branch = element
        .attr("branch")
        .filter(|b| !b.is_empty())
        .map(str::to_owned);
    source.subpath = element.attr("subpath").map(str::to_owned);
    Some(source)
}

fn overlay_from(entry: &Element) -> Result<Overlay, CatalogError> {
    let name = entry
        .child("name")
        .map(Element::trimmed)
        .or_else(|| entry.attr("name").map(str::to_owned))
        .ok_or_else(|| corrupt(format!("<{}> entry has no name", entry.name)))?;

    let mut sources: Vec<Source> = entry.children_named("source").filter_map(source_from).collect();
    if sources.is_empty() {
        if let (Some(src), Some(kind)) = (entry.attr("src"), entry.attr("type")) {
            sources.push(Source::new(src.trim(), SourceKind::parse(kind)));
        }
    }

    let owner = match entry.attr("contact") {
        Some(contact) => vec![Owner::new(contact.trim())],
        None => entry
            .children_named("owner")
            .map(|o| Owner {
                name: o.child("name").map(Element::trimmed),
                email: o.child("email").map(Element::trimmed).unwrap_or_default(),
            })
            .collect(),
    };

    let priority = match entry.attr("priority") {
        Some(p) => p
            .trim()
            .parse()
            .map_err(|_| corrupt(format!("overlay '{name}' has non-numeric priority '{p}'")))?,
        None => DEFAULT_PRIORITY,
    };

    Ok(Overlay {
        description: entry
            .children_named("description")
            .map(|d| collapse_whitespace(&d.text))
            .collect(),
        homepage: entry
            .child("homepage")
            .or_else(|| entry.child("link"))
            .map(Element::trimmed),
        irc: entry.child("irc").map(Element::trimmed),
        feeds: entry.children_named("feed").map(Element::trimmed).collect(),
        priority,
        quality: entry
            .attr("quality")
            .and_then(parse_quality)
            .unwrap_or_default(),
        status: match entry.attr("status").map(str::trim) {
            Some("official") => Status::Official,
            _ => Status::Unofficial,
        },
        owner,
        sources,
        name,
    })
}

fn text_element(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    attrs: &[(&str, &str)],
    text: &str,
) -> Result<(), CatalogError> {
    let mut start = BytesStart::new(name);
    for attr in attrs {
        start.push_attribute(*attr);
    }
    writer.write_event(Event::Start(start)).map_err(write_error)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(write_error)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(write_error)?;
    Ok(())
}

fn write_repo(writer: &mut Writer<Vec<u8>>, overlay: &Overlay) -> Result<(), CatalogError> {
    let status = overlay.status.to_string();
    let quality = overlay.quality.to_string();
    let priority = overlay.priority.to_string();
    let mut repo = BytesStart::new("repo");
    repo.push_attribute(("status", status.as_str()));
    repo.push_attribute(("quality", quality.as_str()));
    repo.push_attribute(("priority", priority.as_str()));
    writer.write_event(Event::Start(repo)).map_err(write_error)?;

    text_element(writer, "name", &[], &overlay.name)?;
    for description in &overlay.description {
        text_element(writer, "description", &[], description)?;
    }
    if let Some(homepage) = &overlay.homepage {
        text_element(writer, "homepage", &[], homepage)?;
    }
    if let Some(irc) = &overlay.irc {
        text_element(writer, "irc", &[], irc)?;
    }
    for owner in &overlay.owner {
        writer
            .write_event(Event::Start(BytesStart::new("owner")))
            .map_err(write_error)?;
        text_element(writer, "email", &[], &owner.email)?;
        if let Some(name) = &owner.name {
            text_element(writer, "name", &[], name)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("owner")))
            .map_err(write_error)?;
    }
    for source in &overlay.sources {
        let mut attrs = vec![("type", source.kind.as_str())];
        if let Some(branch) = &source.branch {
            attrs.push(("branch", branch.as_str()));
        }
        if let Some(subpath) = &source.subpath {
            attrs.push(("subpath", subpath.as_str()));
        }
        text_element(writer, "source", &attrs, &source.url)?;
    }
    for feed in &overlay.feeds {
        text_element(writer, "feed", &[], feed)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("repo")))
        .map_err(write_error)?;
    Ok(())
}

pub struct XmlFormat;

impl CatalogFormat for XmlFormat {
    fn name(&self) -> &'static str {
        "xml"
    }

    fn sniff(&self, bytes: &[u8]) -> bool {
        crate::format::first_significant_byte(bytes) == Some(b'<')
    }

    fn read(&self, bytes: &[u8]) -> Result<Vec<Overlay>, CatalogError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let text = std::str::from_utf8(bytes).map_err(corrupt)?;
        let root = parse_tree(text)?;
        root.children
            .iter()
            .filter(|c| ENTRY_TAGS.contains(&c.name.as_str()))
            .map(overlay_from)
            .collect()
    }

    fn write(&self, overlays: &[Overlay]) -> Result<Vec<u8>, CatalogError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(write_error)?;
        let mut root = BytesStart::new("repositories");
        root.push_attribute(("version", "1.0"));
        writer.write_event(Event::Start(root)).map_err(write_error)?;
        for overlay in overlays {
            write_repo(&mut writer, overlay)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("repositories")))
            .map_err(write_error)?;
        let mut out = writer.into_inner();
        out.push(b'\n');
        Ok(out)
    }
}
