//! Schema-less access to an HL7 v2 message.

use log::trace;

use super::location::{FieldPath, Location};
use super::Hl7Error;

const SEGMENT_SEPARATOR: char = '\r';

/// The delimiters declared by a message's MSH segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delimiters {
    pub field: char,
    pub component: char,
    pub repetition: char,
    pub escape: char,
    pub subcomponent: char,
}

impl Default for Delimiters {
    fn default() -> Self {
        Delimiters {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

impl Delimiters {
    /// Reads the delimiters from the fixed offsets following `MSH` in a header segment.
    fn from_header(header: &str) -> Result<Self, Hl7Error> {
        let mut chars = header.chars().skip(3);
        let mut next = || chars.next().ok_or(Hl7Error::TruncatedHeader);
        Ok(Delimiters {
            field: next()?,
            component: next()?,
            repetition: next()?,
            escape: next()?,
            subcomponent: next()?,
        })
    }
}

/// One HL7 message, held as its segments with no awareness of the message schema.
///
/// Values returned from [`Message::query`] and friends borrow from the text the message was parsed from.
#[derive(Debug, Clone)]
pub struct Message<'a> {
    segments: Vec<&'a str>,
    delimiters: Delimiters,
}

impl<'a> Message<'a> {
    /// Splits `text` into segments and reads the delimiters from its MSH segment.
    ///
    /// Fails when no segment starts with `MSH`, or that segment is too short to declare all five delimiters.
    pub fn parse(text: &'a str) -> Result<Self, Hl7Error> {
        let segments: Vec<&str> = text
            .split(SEGMENT_SEPARATOR)
            .map(|segment| segment.trim_start_matches('\n'))
            .collect();

        let header = segments
            .iter()
            .find(|segment| segment.starts_with("MSH"))
            .ok_or(Hl7Error::MissingHeader)?;
        let delimiters = Delimiters::from_header(header)?;

        Ok(Message {
            segments,
            delimiters,
        })
    }

    pub fn delimiters(&self) -> Delimiters {
        self.delimiters
    }

    /// Resolves a location string, `None` when the location string itself is malformed.
    ///
    /// ```
    /// use hl7_listener::hl7::Message;
    ///
    /// let msg = Message::parse("MSH|^~\\&|LAB|HOSP\rPID|1||123^^^MRN~456^^^NHS").unwrap();
    /// assert_eq!(msg.resolve("PID-3[2].1"), Some(vec!["456"]));
    /// assert_eq!(msg.resolve("PID-9"), Some(vec![]));
    /// assert_eq!(msg.resolve("not a location"), None);
    /// ```
    pub fn resolve(&self, location: &str) -> Option<Vec<&'a str>> {
        match location.parse::<Location>() {
            Ok(location) => Some(self.query(&location)),
            Err(e) => {
                trace!("Ignoring malformed location '{}': {}", location, e);
                None
            }
        }
    }

    /// The first value at `location`, or an empty string when there's nothing there.
    pub fn value(&self, location: &str) -> &'a str {
        self.resolve(location)
            .and_then(|values| values.into_iter().next())
            .unwrap_or_default()
    }

    /// `MSH-9.1^MSH-9.2`, e.g. `ADT^A01`.
    pub fn message_type(&self) -> String {
        format!("{}^{}", self.value("MSH-9.1"), self.trigger_event())
    }

    /// MSH-9.2
    pub fn trigger_event(&self) -> &'a str {
        self.value("MSH-9.2")
    }

    /// MSH-10
    pub fn control_id(&self) -> &'a str {
        self.value("MSH-10")
    }

    /// Every value at `location`, most general level first: segments, then fields, components and sub-components.
    pub fn query(&self, location: &Location) -> Vec<&'a str> {
        let segments = self.matching_segments(&location.segment, location.segment_repeat);
        let field = match &location.field {
            Some(field) => field,
            None => return segments,
        };

        let fields = self.fields(&segments, location.is_header(), field);
        let component = match &field.component {
            Some(component) => component,
            None => return fields,
        };

        let components = nth_parts(fields, self.delimiters.component, component.number);
        match component.subcomponent {
            Some(subcomponent) => nth_parts(components, self.delimiters.subcomponent, subcomponent),
            None => components,
        }
    }

    fn matching_segments(&self, id: &str, repeat: Option<usize>) -> Vec<&'a str> {
        let mut matches = self.segments.iter().copied().filter(|segment| {
            segment
                .as_bytes()
                .get(..id.len())
                .map_or(false, |prefix| prefix.eq_ignore_ascii_case(id.as_bytes()))
        });

        match repeat {
            Some(repeat) => matches.nth(repeat - 1).into_iter().collect(),
            None => matches.collect(),
        }
    }

    fn fields(&self, segments: &[&'a str], is_header: bool, path: &FieldPath) -> Vec<&'a str> {
        let mut values = Vec::new();

        for segment in segments {
            // MSH-1 is the field delimiter itself, so splitting an MSH segment puts every field one place earlier.
            // MSH-2 holds the repetition delimiter and must never be treated as repeating.
            let index = if is_header {
                match path.number {
                    1 => {
                        values.extend(header_slice(segment, 3, 1));
                        continue;
                    }
                    2 => {
                        values.extend(header_slice(segment, 4, 4));
                        continue;
                    }
                    n => n - 1,
                }
            } else {
                path.number
            };

            let field = match segment.split(self.delimiters.field).nth(index) {
                Some(field) => field,
                None => continue,
            };

            if field.contains(self.delimiters.repetition) {
                let mut repeats = field.split(self.delimiters.repetition);
                match path.repeat {
                    Some(repeat) => values.extend(repeats.nth(repeat - 1)),
                    None => values.extend(repeats),
                }
            } else if path.repeat.map_or(true, |repeat| repeat == 1) {
                values.push(field);
            }
        }

        values
    }
}

/// `len` characters of `segment` starting at character `start`.
fn header_slice(segment: &str, start: usize, len: usize) -> Option<&str> {
    let mut boundaries = segment
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(segment.len()));
    let from = boundaries.nth(start)?;
    let to = boundaries.nth(len - 1)?;
    segment.get(from..to)
}

/// The 1-based `n`th part of each value, skipping values that don't contain `delimiter` at all.
fn nth_parts<'a>(values: Vec<&'a str>, delimiter: char, n: usize) -> Vec<&'a str> {
    values
        .into_iter()
        .filter(|value| value.contains(delimiter))
        .filter_map(|value| value.split(delimiter).nth(n - 1))
        .collect()
}
