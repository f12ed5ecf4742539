//! Just enough HL7 v2 to address individual values in a message: segments, fields, repeats, components
//! and sub-components. There's no schema or value-set validation here.

mod location;
mod message;

pub use location::{ComponentPath, FieldPath, Location, LocationError};
pub use message::{Delimiters, Message};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Hl7Error {
    #[error("MSH segment not present")]
    MissingHeader,
    #[error("MSH segment is too short to declare its delimiters")]
    TruncatedHeader,
    #[error("invalid location: {0}")]
    InvalidLocation(#[from] LocationError),
}

/// Resolves `location` against the raw text of a message.
///
/// Nothing at the location is an empty result, not an error; errors are reserved for a message without a
/// usable MSH segment and for a malformed location string.
pub fn resolve(raw: &str, location: &str) -> Result<Vec<String>, Hl7Error> {
    let location: Location = location.parse()?;
    let message = Message::parse(raw)?;
    Ok(message
        .query(&location)
        .into_iter()
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADT: &str = "MSH|^~\\&|EPIC|EPICADT|SMS|SMSADT|199912271408|CHARRIS|ADT^A04|1817457|D|2.5|\rPID||0493575^^^2^ID 1|454721||DOE^JOHN^^^^|DOE^JOHN^^^^|19480203|M||B|254 MYSTREET AVE^^MYTOWN^OH^44123^USA||(216)123-4567|||M|NON|400003403~1129086|";

    #[test]
    fn resolves_against_raw_text() {
        assert_eq!(resolve(ADT, "PID-5.1").unwrap(), vec!["DOE"]);
        assert_eq!(resolve(ADT, "PID-18[2]").unwrap(), vec!["1129086"]);
        assert_eq!(resolve(ADT, "PID-11.3").unwrap(), vec!["MYTOWN"]);
        assert!(resolve(ADT, "NK1").unwrap().is_empty());
    }

    #[test]
    fn separates_not_found_from_failures() {
        assert!(matches!(
            resolve(ADT, "PID-"),
            Err(Hl7Error::InvalidLocation(_))
        ));
        assert_eq!(resolve("PID|1", "PID-1"), Err(Hl7Error::MissingHeader));
    }
}
