//! Ordered JSON tree -> XML serialization.
//!
//! Conventions shared by the Query and REST-XML families:
//! - a mapping renders as child elements in insertion order;
//! - a sequence stored under key `K` renders as repeated `<K>` elements
//!   (query-protocol lists put their members under an `item` key);
//! - `null` entries are omitted, matching how the real services skip
//!   absent fields.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde_json::Value;

use crate::error::ServiceError;

/// Serialize `value` under a root element, with an optional `xmlns`.
pub fn to_xml(root: &str, xmlns: Option<&str>, value: &Value) -> Result<Vec<u8>, ServiceError> {
    let mut writer = Writer::new(Vec::new());
    write(&mut writer, |w| {
        w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
    })?;

    let mut start = BytesStart::new(root);
    if let Some(ns) = xmlns {
        start.push_attribute(("xmlns", ns));
    }
    write(&mut writer, |w| w.write_event(Event::Start(start)))?;
    write_value(&mut writer, value)?;
    write(&mut writer, |w| {
        w.write_event(Event::End(BytesEnd::new(root)))
    })?;

    Ok(writer.into_inner())
}

fn write_value(writer: &mut Writer<Vec<u8>>, value: &Value) -> Result<(), ServiceError> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                write_keyed(writer, key, child)?;
            }
            Ok(())
        }
        Value::Null => Ok(()),
        scalar => write_text(writer, scalar),
    }
}

fn write_keyed(writer: &mut Writer<Vec<u8>>, key: &str, value: &Value) -> Result<(), ServiceError> {
    match value {
        Value::Null => Ok(()),
        Value::Array(items) => {
            for item in items {
                write_keyed(writer, key, item)?;
            }
            Ok(())
        }
        other => {
            write(writer, |w| w.write_event(Event::Start(BytesStart::new(key))))?;
            write_value(writer, other)?;
            write(writer, |w| w.write_event(Event::End(BytesEnd::new(key))))
        }
    }
}

fn write_text(writer: &mut Writer<Vec<u8>>, scalar: &Value) -> Result<(), ServiceError> {
    let text = match scalar {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => unreachable!("objects and arrays handled by callers"),
    };
    write(writer, |w| {
        w.write_event(Event::Text(BytesText::new(&text)))
    })
}

fn write<F, E>(writer: &mut Writer<Vec<u8>>, f: F) -> Result<(), ServiceError>
where
    F: FnOnce(&mut Writer<Vec<u8>>) -> Result<(), E>,
    E: std::fmt::Display,
{
    f(writer).map_err(|e| ServiceError::internal(format!("XML serialization failed: {e}")))
}
