//! Reassembles event fragments from line-oriented tool output.

use std::io::BufRead;

use regex::Regex;

use crate::error::Result;

/// Root element name of a rendered event.
pub const EVENT_TAG: &str = "Event";

/// Lazily yields complete fragments from a line stream.
///
/// A fragment starts at a line containing the opening root tag and ends at
/// the first line containing the matching closing tag; both checks run on
/// every line while inside a fragment, so a one-line fragment is emitted
/// whole. Lines outside a fragment are discarded.
pub struct FragmentExtractor<R> {
    reader: R,
    begin: Regex,
    end: Regex,
    line: Vec<u8>,
    buffer: String,
    inside: bool,
    done: bool,
}

impl<R: BufRead> FragmentExtractor<R> {
    pub fn new(reader: R) -> Result<Self> {
        Self::with_tag(reader, EVENT_TAG)
    }

    pub fn with_tag(reader: R, tag: &str) -> Result<Self> {
        let tag = regex::escape(tag);
        Ok(Self {
            reader,
            begin: Regex::new(&format!(r"<{tag}[\s>]"))?,
            end: Regex::new(&format!(r"</{tag}\s*>"))?,
            line: Vec::new(),
            buffer: String::new(),
            inside: false,
            done: false,
        })
    }
}

impl<R: BufRead> Iterator for FragmentExtractor<R> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => {
                    self.done = true;
                    if self.inside {
                        log::debug!(
                            "Discarding unterminated fragment of {} bytes",
                            self.buffer.len()
                        );
                    }
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }

            let line = String::from_utf8_lossy(&self.line);

            if !self.inside && self.begin.is_match(&line) {
                self.buffer.clear();
                self.inside = true;
            }

            if self.inside {
                self.buffer.push_str(&line);

                if self.end.is_match(&line) {
                    self.inside = false;
                    return Some(Ok(std::mem::take(&mut self.buffer)));
                }
            }
        }
    }
}
