//! Normalizing and validating people records.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::Person;
use crate::errors::{BatchError, ParseError, Result};
use crate::io::{RawRecord, RecordTransform};

/// Looks up the national identifier of a person.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NationalIdLookup: Send + Sync {
    /// Finds the identifier for a normalized first and last name.
    async fn find_national_id(&self, first_name: &str, last_name: &str)
        -> Result<Option<String>>;
}

/// Upper-cases the first character and leaves the rest untouched.
#[must_use]
pub fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Turns a raw `firstName;lastName;age` record into a [`Person`].
///
/// A non-numeric age is a parse error; a non-positive age is rejected with
/// a validation error. Names are normalized before the optional lookup.
#[derive(Default, Clone)]
pub struct PersonTransform {
    lookup: Option<Arc<dyn NationalIdLookup>>,
}

impl std::fmt::Debug for PersonTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersonTransform")
            .field("lookup", &self.lookup.is_some())
            .finish()
    }
}

impl PersonTransform {
    /// A transform without national identifier enrichment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enriches persons through `lookup`.
    #[must_use]
    pub fn with_lookup(mut self, lookup: Arc<dyn NationalIdLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    fn field<'a>(record: &'a RawRecord, index: usize, name: &str) -> Result<&'a str> {
        record.field(index).map(str::trim).ok_or_else(|| {
            ParseError::new(format!("missing field '{name}'"))
                .with_input(record.line.clone())
                .with_line_number(record.line_number)
                .into()
        })
    }
}

#[async_trait]
impl RecordTransform<Person> for PersonTransform {
    async fn apply(&self, record: &RawRecord) -> Result<Person> {
        let first_name = Self::field(record, 0, "firstName")?;
        let last_name = Self::field(record, 1, "lastName")?;
        let raw_age = Self::field(record, 2, "age")?;
        let age: i32 = raw_age.parse().map_err(|_| {
            ParseError::new(format!("age '{raw_age}' is not a number"))
                .with_input(record.line.clone())
                .with_line_number(record.line_number)
        })?;
        if age <= 0 {
            return Err(BatchError::validation("must be born"));
        }

        let mut person = Person::new(capitalize(first_name), last_name.to_uppercase(), age);
        if let Some(lookup) = &self.lookup {
            person.national_id = lookup
                .find_national_id(&person.first_name, &person.last_name)
                .await?;
        }
        debug!(line = record.line_number, person = %person, "Converted record");
        Ok(person)
    }
}
