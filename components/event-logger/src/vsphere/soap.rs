//! SOAP envelope encoding and a small element tree for reading `urn:vim25`
//! responses.
//!
//! Requests are built as strings, responses are parsed into [`XmlNode`]s
//! keyed by *local* names, so namespace prefixes (`soapenv:`, `xsi:`) never
//! matter to callers.

// Local crates
use crate::vsphere::models::{ManagedObjectReference, VimError};

// External crates
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

const ENVELOPE_OPEN: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/""#,
    r#" xmlns:xsd="http://www.w3.org/2001/XMLSchema""#,
    r#" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">"#,
    "<soapenv:Body>"
);
const ENVELOPE_CLOSE: &str = "</soapenv:Body></soapenv:Envelope>";

/// Parsed XML element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    /// Qualified names, prefix kept (`type`, `xsi:type`).
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Walk down a chain of child names.
    pub fn path(&self, path: &[&str]) -> Option<&XmlNode> {
        path.iter().try_fold(self, |node, name| node.child(name))
    }

    pub fn text_at(&self, path: &[&str]) -> Option<&str> {
        self.path(path).map(|n| n.text.as_str())
    }

    /// `xsi:type` without any namespace prefix. Kept apart from a plain
    /// `type` attribute, which managed object references use.
    pub fn xsi_type(&self) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.split_once(':').is_some_and(|(_, local)| local == "type"))
            .map(|(_, t)| t.rsplit_once(':').map_or(t.as_str(), |(_, local)| local))
    }

    /// Read this element as a managed object reference.
    pub fn as_moref(&self) -> Option<ManagedObjectReference> {
        let kind = self.attr("type")?;
        let value = self.text.trim();
        if value.is_empty() {
            return None;
        }
        Some(ManagedObjectReference::new(kind, value))
    }
}

/// Parse a whole document into a synthetic root whose children are the
/// top-level elements.
pub fn parse_document(xml: &str) -> Result<XmlNode, String> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlNode> = vec![XmlNode::default()];

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(open_node(&start)?),
            Ok(Event::Empty(start)) => {
                let node = open_node(&start)?;
                attach(&mut stack, node)?;
            }
            Ok(Event::End(_)) => {
                let node = stack.pop().ok_or("unbalanced closing tag")?;
                attach(&mut stack, node)?;
            }
            Ok(Event::Text(text)) => {
                let text = text.unescape().map_err(|e| e.to_string())?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
    }

    match stack.len() {
        1 => stack.pop().ok_or_else(|| "empty document".to_string()),
        _ => Err("unexpected end of document".to_string()),
    }
}

fn open_node(start: &BytesStart<'_>) -> Result<XmlNode, String> {
    let name = std::str::from_utf8(start.local_name().as_ref())
        .map_err(|e| e.to_string())?
        .to_string();

    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| e.to_string())?
            .to_string();
        let value = attr.unescape_value().map_err(|e| e.to_string())?;
        attrs.push((key, value.into_owned()));
    }

    Ok(XmlNode {
        name,
        attrs,
        ..XmlNode::default()
    })
}

fn attach(stack: &mut [XmlNode], node: XmlNode) -> Result<(), String> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(node);
            Ok(())
        }
        None => Err("unbalanced closing tag".to_string()),
    }
}

/// Body of a single `urn:vim25` method call.
#[derive(Debug)]
pub struct SoapRequest {
    method: &'static str,
    body: String,
}

impl SoapRequest {
    pub fn new(method: &'static str, this: &ManagedObjectReference) -> Self {
        let mut body = format!("<{method} xmlns=\"urn:vim25\">");
        body.push_str(&this.to_xml("_this"));
        Self { method, body }
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    /// Append `<name>value</name>` with the value escaped.
    pub fn element(mut self, name: &str, value: &str) -> Self {
        self.body
            .push_str(&format!("<{name}>{}</{name}>", escape(value)));
        self
    }

    /// Append pre-built XML as is.
    pub fn raw(mut self, xml: &str) -> Self {
        self.body.push_str(xml);
        self
    }

    pub fn into_envelope(self) -> String {
        format!(
            "{ENVELOPE_OPEN}{}</{}>{ENVELOPE_CLOSE}",
            self.body, self.method
        )
    }
}

/// Turn a raw HTTP response into the `<method>Response` element, mapping
/// SOAP faults and transport-level statuses to [`VimError`].
pub fn parse_response(
    operation: &'static str,
    status: u16,
    body: &str,
) -> Result<XmlNode, VimError> {
    let success = (200..300).contains(&status);

    let document = match parse_document(body) {
        Ok(doc) => doc,
        Err(_) if !success => return Err(VimError::Status { operation, status }),
        Err(reason) => return Err(VimError::malformed(operation, reason)),
    };

    let payload = document
        .path(&["Envelope", "Body"])
        .and_then(|b| b.children.first());

    let payload = match payload {
        Some(p) => p,
        None if !success => return Err(VimError::Status { operation, status }),
        None => return Err(VimError::malformed(operation, "missing SOAP body")),
    };

    if payload.name == "Fault" {
        return Err(VimError::Fault {
            operation,
            code: payload.text_at(&["faultcode"]).unwrap_or_default().to_string(),
            message: payload
                .text_at(&["faultstring"])
                .unwrap_or("unknown fault")
                .trim()
                .to_string(),
        });
    }

    if !success {
        return Err(VimError::Status { operation, status });
    }

    Ok(payload.clone())
}

/// Wrap a response payload in an envelope. Handy for fakes.
#[cfg(test)]
pub fn envelope(payload: &str) -> String {
    format!("{ENVELOPE_OPEN}{payload}{ENVELOPE_CLOSE}")
}
