//! Single-pass extraction of a [`Record`] from one serialized event.
//!
//! The fragment is scanned once with a pull tokenizer; no tree is built.
//! Document type declarations are skipped as opaque tokens, so entity
//! definitions in a fragment are never expanded or fetched.

use std::fmt::Display;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};
use crate::types::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Provider,
    TimeCreated,
    EventId,
    Computer,
    RecordId,
    Data,
}

/// System fields whose first element has been consumed. Later elements of
/// the same kind are ignored even if the first one held nothing usable.
#[derive(Debug, Default)]
struct Seen(u8);

impl Seen {
    /// Marks `field` as seen and reports whether this was its first element.
    fn first(&mut self, field: Field) -> bool {
        let bit = 1u8 << field as u8;
        let first = self.0 & bit == 0;
        self.0 |= bit;
        first
    }
}

/// Text content being collected for an element that is still open.
struct Capture {
    field: Field,
    name: String,
    text: String,
    depth: usize,
    keep: bool,
}

/// Parses one event fragment into a [`Record`].
///
/// Unknown elements are ignored and missing ones leave their field unset.
/// Only a fragment that cannot be tokenized (mismatched or unclosed tags,
/// bad attributes, undefined entities) is reported, as
/// [`Error::MalformedFragment`].
pub fn parse_event(fragment: &str) -> Result<Record> {
    let mut reader = Reader::from_str(fragment);
    let mut record = Record::default();
    let mut seen = Seen::default();
    let mut capture: Option<Capture> = None;
    let mut depth = 0usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| malformed(format!("{e} at byte {}", reader.buffer_position())))?;

        match event {
            Event::Start(e) => {
                depth += 1;
                if capture.is_none() {
                    capture = open_element(&e, &mut record, &mut seen, depth)?;
                }
            }
            Event::Empty(e) => {
                if capture.is_none() {
                    if let Some(done) = open_element(&e, &mut record, &mut seen, depth + 1)? {
                        finish(done, &mut record);
                    }
                }
            }
            Event::Text(t) => {
                if let Some(open) = capture.as_mut() {
                    let text = t.unescape().map_err(malformed)?;
                    if !text.trim().is_empty() {
                        open.text.push_str(&text);
                    }
                }
            }
            Event::CData(c) => {
                if let Some(open) = capture.as_mut() {
                    open.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::End(_) => {
                if capture.as_ref().is_some_and(|c| c.depth == depth) {
                    if let Some(done) = capture.take() {
                        finish(done, &mut record);
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(malformed(format!("fragment ended with {depth} unclosed element(s)")));
    }

    Ok(record)
}

fn open_element(
    e: &BytesStart<'_>,
    record: &mut Record,
    seen: &mut Seen,
    depth: usize,
) -> Result<Option<Capture>> {
    let field = match e.local_name().as_ref() {
        b"Provider" => Field::Provider,
        b"TimeCreated" => Field::TimeCreated,
        b"EventID" => Field::EventId,
        b"Computer" => Field::Computer,
        b"EventRecordID" => Field::RecordId,
        b"Data" => Field::Data,
        _ => return Ok(None),
    };

    match field {
        Field::Provider => {
            if seen.first(field) {
                record.provider_name = attribute(e, b"Name")?.filter(|n| !n.is_empty());
            }
            Ok(None)
        }
        Field::TimeCreated => {
            if seen.first(field) {
                let created = attribute(e, b"SystemTime")?;
                record.time_created = created.filter(|t| !t.trim().is_empty());
            }
            Ok(None)
        }
        Field::Data => Ok(Some(Capture {
            field,
            name: attribute(e, b"Name")?.unwrap_or_default(),
            text: String::new(),
            depth,
            keep: true,
        })),
        Field::EventId | Field::Computer | Field::RecordId => Ok(Some(Capture {
            field,
            name: String::new(),
            text: String::new(),
            depth,
            keep: seen.first(field),
        })),
    }
}

fn finish(capture: Capture, record: &mut Record) {
    if !capture.keep {
        return;
    }
    match capture.field {
        Field::EventId => record.event_id = capture.text.trim().parse().ok(),
        Field::Computer => record.computer = Some(capture.text),
        Field::RecordId => record.record_id = capture.text.trim().parse().ok(),
        Field::Data => record.insert_data(&capture.name, capture.text),
        Field::Provider | Field::TimeCreated => {}
    }
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(malformed)?;
        if attr.key.local_name().as_ref() == name {
            let value = attr.unescape_value().map_err(malformed)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn malformed(err: impl Display) -> Error {
    Error::MalformedFragment(err.to_string())
}
