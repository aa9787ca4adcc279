use anyhow::{anyhow, Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Value};

use crate::error::ErrorRecord;

const ENVELOPE_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Render a SOAP 1.2 request envelope for one operation. Objects become
/// nested elements, arrays repeat the enclosing element, scalars become
/// text.
pub fn build_request(
    namespace: &str,
    operation: &str,
    params: &Map<String, Value>,
) -> Result<String> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut envelope = BytesStart::new("soap:Envelope");
    envelope.push_attribute(("xmlns:soap", ENVELOPE_NS));
    envelope.push_attribute(("xmlns:ns", namespace));
    writer.write_event(Event::Start(envelope))?;
    writer.write_event(Event::Start(BytesStart::new("soap:Body")))?;

    let qualified = format!("ns:{operation}");
    writer.write_event(Event::Start(BytesStart::new(qualified.as_str())))?;
    for (key, value) in params {
        write_value(&mut writer, key, value)?;
    }
    writer.write_event(Event::End(BytesEnd::new(qualified.as_str())))?;

    writer.write_event(Event::End(BytesEnd::new("soap:Body")))?;
    writer.write_event(Event::End(BytesEnd::new("soap:Envelope")))?;
    String::from_utf8(writer.into_inner()).context("request envelope is not utf-8")
}

fn write_value(writer: &mut Writer<Vec<u8>>, name: &str, value: &Value) -> Result<()> {
    match value {
        Value::Array(items) => {
            for item in items {
                write_value(writer, name, item)?;
            }
        }
        Value::Object(fields) => {
            writer.write_event(Event::Start(BytesStart::new(name)))?;
            for (key, value) in fields {
                write_value(writer, key, value)?;
            }
            writer.write_event(Event::End(BytesEnd::new(name)))?;
        }
        Value::Null => {
            writer.write_event(Event::Empty(BytesStart::new(name)))?;
        }
        Value::String(text) => {
            writer.write_event(Event::Start(BytesStart::new(name)))?;
            writer.write_event(Event::Text(BytesText::new(text)))?;
            writer.write_event(Event::End(BytesEnd::new(name)))?;
        }
        other => {
            let text = other.to_string();
            writer.write_event(Event::Start(BytesStart::new(name)))?;
            writer.write_event(Event::Text(BytesText::new(&text)))?;
            writer.write_event(Event::End(BytesEnd::new(name)))?;
        }
    }
    Ok(())
}

/// Parse a response envelope and return the body's first element as a
/// JSON value. Namespace prefixes are stripped from element names and
/// repeated siblings fold into arrays.
pub fn parse_response(xml: &str) -> Result<Value> {
    let envelope = parse_document(xml)?;
    let body = envelope
        .get("Body")
        .ok_or_else(|| anyhow!("response has no soap body"))?;
    match body {
        Value::Object(children) => children
            .iter()
            .next()
            .map(|(_, value)| value.clone())
            .ok_or_else(|| anyhow!("soap body is empty")),
        _ => Err(anyhow!("soap body is empty")),
    }
}

/// Detect an explicit server fault in a parsed response value, in either
/// the `faultcode`/`faultstring` or the `Code/Value` + `Reason/Text`
/// shape. Code and message pass through unchanged.
pub fn extract_fault(value: &Value) -> Option<ErrorRecord> {
    if let (Some(code), Some(message)) = (
        string_at(value, &["faultcode"]),
        string_at(value, &["faultstring"]),
    ) {
        return Some(ErrorRecord::new(code, message));
    }
    if let (Some(code), Some(message)) = (
        string_at(value, &["Code", "Value"]),
        string_at(value, &["Reason", "Text"]),
    ) {
        return Some(ErrorRecord::new(code, message));
    }
    None
}

fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str().map(|s| s.to_string())
}

/// Convert a whole XML document into a JSON value: elements with children
/// become objects, leaf elements become strings, empty elements become
/// null.
pub(crate) fn parse_document(xml: &str) -> Result<Value> {
    struct Frame {
        name: String,
        children: Map<String, Value>,
        text: String,
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<Value> = None;

    loop {
        match reader.read_event().context("reading response xml")? {
            Event::Start(e) => {
                stack.push(Frame {
                    name: local_name(&e),
                    children: Map::new(),
                    text: String::new(),
                });
            }
            Event::Empty(e) => {
                let name = local_name(&e);
                match stack.last_mut() {
                    Some(parent) => insert_folding(&mut parent.children, &name, Value::Null),
                    None => root = Some(Value::Null),
                }
            }
            Event::Text(e) => {
                if let Some(frame) = stack.last_mut() {
                    frame
                        .text
                        .push_str(&e.unescape().context("unescaping response text")?);
                }
            }
            Event::CData(e) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::End(_) => {
                let frame = stack.pop().ok_or_else(|| anyhow!("unbalanced response xml"))?;
                let value = if !frame.children.is_empty() {
                    Value::Object(frame.children)
                } else {
                    Value::String(frame.text)
                };
                match stack.last_mut() {
                    Some(parent) => insert_folding(&mut parent.children, &frame.name, value),
                    None => {
                        root = Some(value);
                        break;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.ok_or_else(|| anyhow!("response xml has no root element"))
}

fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

fn insert_folding(map: &mut Map<String, Value>, name: &str, value: Value) {
    match map.get_mut(name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            map.insert(name.to_string(), Value::Array(vec![first, value]));
        }
        None => {
            map.insert(name.to_string(), value);
        }
    }
}
