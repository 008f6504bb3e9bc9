use quick_xml::encoding::Decoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;

use crate::error::{Diagnostic, ParseError};

/// Media RSS extension namespace (`xmlns:media`). Feeds also declare it
/// without the trailing slash; [`RawItem::namespaced`] accepts both.
pub const MEDIA_NAMESPACE: &str = "http://search.yahoo.com/mrss/";

/// A direct child element of an `<item>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    /// Resolved namespace URI; `None` for plain RSS elements
    pub namespace: Option<String>,
    /// Local name, or the full qualified name when the prefix was never declared
    pub name: String,
    pub attributes: Vec<(String, String)>,
    /// Text and CDATA content as found in the document
    pub text: String,
}

impl Element {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn is_plain(&self, name: &str) -> bool {
        self.namespace.is_none() && self.name == name
    }
}

/// One `<item>` as found in the document, before any field extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawItem {
    children: Vec<Element>,
}

impl RawItem {
    pub fn new(children: Vec<Element>) -> Self {
        Self { children }
    }

    /// First un-namespaced child with this name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.is_plain(name))
    }

    /// Every un-namespaced child with this name, in document order.
    pub fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.is_plain(name))
    }

    /// Children bound to `namespace_uri`, or `None` when the item has none.
    /// A trailing `/` on either URI is ignored.
    pub fn namespaced(&self, namespace_uri: &str) -> Option<NamespacedChildren<'_>> {
        let wanted = namespace_uri.trim_end_matches('/');
        let elements: Vec<&Element> = self
            .children
            .iter()
            .filter(|c| {
                c.namespace
                    .as_deref()
                    .is_some_and(|ns| ns.trim_end_matches('/') == wanted)
            })
            .collect();

        if elements.is_empty() {
            None
        } else {
            Some(NamespacedChildren { elements })
        }
    }

    /// Text of the first plain child, if present.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }
}

/// The children of an item that share one namespace.
#[derive(Debug)]
pub struct NamespacedChildren<'a> {
    elements: Vec<&'a Element>,
}

impl<'a> NamespacedChildren<'a> {
    pub fn first(&self, local_name: &str) -> Option<&'a Element> {
        self.elements.iter().copied().find(|e| e.name == local_name)
    }
}

// Depths of the interesting elements, counting the root as 1
const CHANNEL_DEPTH: usize = 2;
const ITEM_DEPTH: usize = 3;
const FIELD_DEPTH: usize = 4;

/// Parses an RSS 2.0 document into its `<root>/channel/item` entries.
///
/// A well-formed document without that structure yields no items. Malformed
/// input yields a [`ParseError`] and no items at all. Text is decoded with
/// the encoding named in the XML declaration, UTF-8 by default.
pub fn parse(xml: &[u8]) -> Result<Vec<RawItem>, ParseError> {
    let mut reader = NsReader::from_reader(xml);
    let mut buf = Vec::new();

    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut saw_root = false;
    let mut in_channel = false;
    let mut current_item: Option<Vec<Element>> = None;
    let mut current_field: Option<Element> = None;

    loop {
        // Updated once the declaration has been read
        let decoder = reader.decoder();
        let step = match reader.read_resolved_event_into(&mut buf) {
            Ok((ns, Event::Start(e))) => {
                depth += 1;
                saw_root = true;
                let namespace = namespace_uri(&ns);
                match depth {
                    CHANNEL_DEPTH => {
                        in_channel = namespace.is_none() && e.local_name().as_ref() == b"channel";
                        Ok(())
                    }
                    ITEM_DEPTH if in_channel && is_plain_item(&namespace, &e) => {
                        current_item = Some(Vec::new());
                        Ok(())
                    }
                    FIELD_DEPTH if current_item.is_some() => {
                        element(namespace, &e, decoder).map(|el| current_field = Some(el))
                    }
                    _ => Ok(()),
                }
            }
            Ok((ns, Event::Empty(e))) => {
                saw_root = true;
                let namespace = namespace_uri(&ns);
                match (depth + 1, current_item.as_mut()) {
                    (ITEM_DEPTH, _) if in_channel && is_plain_item(&namespace, &e) => {
                        items.push(RawItem::default());
                        Ok(())
                    }
                    (FIELD_DEPTH, Some(children)) => {
                        element(namespace, &e, decoder).map(|el| children.push(el))
                    }
                    _ => Ok(()),
                }
            }
            Ok((_, Event::End(_))) => {
                match depth {
                    FIELD_DEPTH => {
                        if let (Some(children), Some(field)) =
                            (current_item.as_mut(), current_field.take())
                        {
                            children.push(field);
                        }
                    }
                    ITEM_DEPTH => {
                        if let Some(children) = current_item.take() {
                            items.push(RawItem::new(children));
                        }
                    }
                    CHANNEL_DEPTH => in_channel = false,
                    _ => {}
                }
                depth = depth.saturating_sub(1);
                Ok(())
            }
            Ok((_, Event::Text(e))) => match current_field.as_mut() {
                Some(field) if depth == FIELD_DEPTH => e
                    .unescape()
                    .map(|text| field.text.push_str(&text))
                    .map_err(|err| err.to_string()),
                _ => Ok(()),
            },
            Ok((_, Event::CData(e))) => match current_field.as_mut() {
                Some(field) if depth == FIELD_DEPTH => decoder
                    .decode(e.as_ref())
                    .map(|text| field.text.push_str(&text))
                    .map_err(|err| err.to_string()),
                _ => Ok(()),
            },
            Ok((_, Event::Eof)) => break,
            Ok(_) => Ok(()),
            Err(e) => Err(e.to_string()),
        };

        if let Err(message) = step {
            return Err(ParseError {
                diagnostics: vec![Diagnostic {
                    position: reader.buffer_position() as u64,
                    message,
                }],
            });
        }
        buf.clear();
    }

    let mut diagnostics = Vec::new();
    let end = reader.buffer_position() as u64;
    if !saw_root {
        diagnostics.push(Diagnostic {
            position: end,
            message: "document has no root element".to_string(),
        });
    }
    if depth > 0 {
        diagnostics.push(Diagnostic {
            position: end,
            message: format!("unexpected end of document: {} unclosed element(s)", depth),
        });
    }
    if !diagnostics.is_empty() {
        return Err(ParseError { diagnostics });
    }

    tracing::debug!("Parsed {} items from RSS feed", items.len());
    Ok(items)
}

fn namespace_uri(ns: &ResolveResult<'_>) -> Option<String> {
    match ns {
        ResolveResult::Bound(uri) => Some(String::from_utf8_lossy(uri.0).into_owned()),
        ResolveResult::Unbound | ResolveResult::Unknown(_) => None,
    }
}

fn is_plain_item(namespace: &Option<String>, e: &BytesStart<'_>) -> bool {
    namespace.is_none() && e.name().as_ref() == b"item"
}

fn element(namespace: Option<String>, e: &BytesStart<'_>, decoder: Decoder) -> Result<Element, String> {
    // An undeclared prefix keeps its qualified name so it never matches a plain lookup
    let name = if namespace.is_some() {
        String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
    } else {
        String::from_utf8_lossy(e.name().as_ref()).into_owned()
    };

    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        let value = attr
            .decode_and_unescape_value(decoder)
            .map_err(|err| err.to_string())?;
        attributes.push((key, value.into_owned()));
    }

    Ok(Element {
        namespace,
        name,
        attributes,
        text: String::new(),
    })
}
