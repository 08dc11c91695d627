//! Importing people from delimited files.
//!
//! Each input line is `firstName;lastName;age`. Records are normalized by
//! [`PersonTransform`] and stored by [`SqlitePeopleSink`]; the
//! [`PeopleStepFactory`] wires both into a step from its execution context.

mod factory;
mod sink;
mod transform;

pub use factory::PeopleStepFactory;
pub use sink::SqlitePeopleSink;
pub use transform::{capitalize, NationalIdLookup, PersonTransform};

#[cfg(test)]
pub use transform::MockNationalIdLookup;

use serde::{Deserialize, Serialize};

use crate::skip::FieldTable;

/// Name of the people import job.
pub const IMPORT_PEOPLE_JOB: &str = "importPeople";

/// A person record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Age in years.
    pub age: i32,
    /// National identifier, when a lookup found one.
    pub national_id: Option<String>,
}

impl Person {
    /// Creates a person without a national identifier.
    #[must_use]
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>, age: i32) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            age,
            national_id: None,
        }
    }
}

impl std::fmt::Display for Person {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "firstName: {}, lastName: {}, age: {}",
            self.first_name, self.last_name, self.age
        )
    }
}

/// Declared field order of a people line.
#[must_use]
pub fn person_fields() -> FieldTable<Person> {
    FieldTable::new()
        .field("firstName", |p: &Person| p.first_name.clone())
        .field("lastName", |p: &Person| p.last_name.clone())
        .field("age", |p: &Person| p.age.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_table_order() {
        let fields = person_fields();
        assert_eq!(fields.names(), vec!["firstName", "lastName", "age"]);
        assert_eq!(
            fields.values(&Person::new("Ada", "LOVELACE", 36)),
            vec!["Ada", "LOVELACE", "36"]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Person::new("John", "DOE", 34).to_string(),
            "firstName: John, lastName: DOE, age: 34"
        );
    }
}
