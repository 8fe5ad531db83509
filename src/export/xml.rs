//! Event helpers over `quick_xml::Writer` shared by the DOCX and OMML
//! writers. Attribute values and text go through quick-xml's escaping.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

pub type XmlWriter = Writer<Vec<u8>>;
pub type XmlResult = quick_xml::Result<()>;

/// Attributes of one element.
pub type Attrs<'a> = &'a [(&'a str, &'a str)];

/// Childless elements, e.g. the contents of a `w:rPr`.
pub type Props<'a> = &'a [(&'a str, Attrs<'a>)];

/// A writer for a standalone package part, XML declaration included.
pub fn part() -> quick_xml::Result<XmlWriter> {
    let mut w = Writer::new(Vec::new());
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    Ok(w)
}

fn element<'a>(name: &'a str, attrs: Attrs<'_>) -> BytesStart<'a> {
    let mut e = BytesStart::new(name);
    for &attr in attrs {
        e.push_attribute(attr);
    }
    e
}

pub fn start(w: &mut XmlWriter, name: &str, attrs: Attrs<'_>) -> XmlResult {
    w.write_event(Event::Start(element(name, attrs)))
}

pub fn end(w: &mut XmlWriter, name: &str) -> XmlResult {
    w.write_event(Event::End(BytesEnd::new(name)))
}

pub fn empty(w: &mut XmlWriter, name: &str, attrs: Attrs<'_>) -> XmlResult {
    w.write_event(Event::Empty(element(name, attrs)))
}

pub fn text(w: &mut XmlWriter, content: &str) -> XmlResult {
    w.write_event(Event::Text(BytesText::new(content)))
}

/// `<name attrs>content</name>`.
pub fn text_element(w: &mut XmlWriter, name: &str, attrs: Attrs<'_>, content: &str) -> XmlResult {
    start(w, name, attrs)?;
    text(w, content)?;
    end(w, name)
}

/// `<name>` wrapping `props` as empty elements; nothing when `props` is empty.
pub fn props(w: &mut XmlWriter, name: &str, props: Props<'_>) -> XmlResult {
    if props.is_empty() {
        return Ok(());
    }
    start(w, name, &[])?;
    for (tag, attrs) in props {
        empty(w, tag, attrs)?;
    }
    end(w, name)
}
