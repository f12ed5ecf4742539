//! Location strings such as `PID-3[2].1.2`.
//!
//! Grammar (segment identifiers match case-insensitively):
//!
//! ```text
//! location  := segment repeat? ( '-' field )?
//! segment   := alnum alnum alnum
//! field     := number repeat? ( '.' component )?
//! component := number ( '.' number )?
//! repeat    := '[' number ']'
//! number    := digit+            (at least 1)
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A parsed location string. Each level is only present when every less specific level is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Upper-cased three character segment identifier.
    pub segment: String,
    /// 1-based segment occurrence, `None` selects every occurrence.
    pub segment_repeat: Option<usize>,
    pub field: Option<FieldPath>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPath {
    pub number: usize,
    /// 1-based field repetition, `None` selects every repetition.
    pub repeat: Option<usize>,
    pub component: Option<ComponentPath>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentPath {
    pub number: usize,
    pub subcomponent: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("location is empty")]
    Empty,
    #[error("expected a three character segment id at position {0}")]
    InvalidSegment(usize),
    #[error("expected a number at position {0}")]
    ExpectedNumber(usize),
    #[error("index at position {0} must be 1 or more")]
    ZeroIndex(usize),
    #[error("index at position {0} is too large")]
    NumberTooLarge(usize),
    #[error("expected ']' at position {0}")]
    UnclosedRepeat(usize),
    #[error("unexpected '{found}' at position {position}")]
    Unexpected { found: char, position: usize },
}

impl Location {
    pub fn is_header(&self) -> bool {
        self.segment == "MSH"
    }
}

impl FromStr for Location {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Parser::new(s).location()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segment)?;
        if let Some(repeat) = self.segment_repeat {
            write!(f, "[{}]", repeat)?;
        }
        if let Some(field) = &self.field {
            write!(f, "-{}", field.number)?;
            if let Some(repeat) = field.repeat {
                write!(f, "[{}]", repeat)?;
            }
            if let Some(component) = &field.component {
                write!(f, ".{}", component.number)?;
                if let Some(subcomponent) = component.subcomponent {
                    write!(f, ".{}", subcomponent)?;
                }
            }
        }
        Ok(())
    }
}

struct Parser<'s> {
    input: &'s [u8],
    position: usize,
}

impl<'s> Parser<'s> {
    fn new(input: &'s str) -> Self {
        Parser {
            input: input.as_bytes(),
            position: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.position).copied()
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn location(&mut self) -> Result<Location, LocationError> {
        if self.input.is_empty() {
            return Err(LocationError::Empty);
        }

        let segment = self.segment()?;
        let segment_repeat = self.repeat()?;
        let field = if self.eat(b'-') {
            Some(self.field()?)
        } else {
            None
        };
        self.finish()?;

        Ok(Location {
            segment,
            segment_repeat,
            field,
        })
    }

    fn segment(&mut self) -> Result<String, LocationError> {
        let id = self
            .input
            .get(self.position..self.position + 3)
            .filter(|id| id.iter().all(u8::is_ascii_alphanumeric))
            .ok_or(LocationError::InvalidSegment(self.position))?;
        self.position += 3;
        // all ascii, checked above
        Ok(id.iter().map(|b| b.to_ascii_uppercase() as char).collect())
    }

    fn field(&mut self) -> Result<FieldPath, LocationError> {
        let number = self.number()?;
        let repeat = self.repeat()?;
        let component = if self.eat(b'.') {
            Some(self.component()?)
        } else {
            None
        };

        Ok(FieldPath {
            number,
            repeat,
            component,
        })
    }

    fn component(&mut self) -> Result<ComponentPath, LocationError> {
        let number = self.number()?;
        let subcomponent = if self.eat(b'.') {
            Some(self.number()?)
        } else {
            None
        };

        Ok(ComponentPath {
            number,
            subcomponent,
        })
    }

    fn repeat(&mut self) -> Result<Option<usize>, LocationError> {
        if !self.eat(b'[') {
            return Ok(None);
        }
        let repeat = self.number()?;
        if !self.eat(b']') {
            return Err(LocationError::UnclosedRepeat(self.position));
        }
        Ok(Some(repeat))
    }

    fn number(&mut self) -> Result<usize, LocationError> {
        let start = self.position;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.position += 1;
        }

        let digits = &self.input[start..self.position];
        if digits.is_empty() {
            return Err(LocationError::ExpectedNumber(start));
        }

        let value = digits.iter().try_fold(0usize, |acc, digit| {
            acc.checked_mul(10)?.checked_add(usize::from(digit - b'0'))
        });
        match value {
            Some(0) => Err(LocationError::ZeroIndex(start)),
            Some(value) => Ok(value),
            None => Err(LocationError::NumberTooLarge(start)),
        }
    }

    fn finish(&self) -> Result<(), LocationError> {
        match self.input.get(self.position..) {
            Some([]) | None => Ok(()),
            Some(rest) => {
                // report the offending character, not just its first byte
                let found = std::str::from_utf8(rest)
                    .ok()
                    .and_then(|s| s.chars().next())
                    .unwrap_or(char::REPLACEMENT_CHARACTER);
                Err(LocationError::Unexpected {
                    found,
                    position: self.position,
                })
            }
        }
    }
}
