//! Job parameters and job identity.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::BatchError;

/// A typed job parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum JobParameter {
    /// Free-form text.
    String(String),
    /// Signed integer.
    Long(i64),
    /// Floating point number.
    Double(f64),
    /// Calendar date.
    Date(NaiveDate),
}

impl JobParameter {
    /// Returns the string value, if this is a string parameter.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Parses a value given its type name (`string`, `long`, `double`, `date`).
    pub fn parse_typed(type_name: &str, raw: &str) -> Result<Self, BatchError> {
        let invalid = |e: &dyn fmt::Display| {
            BatchError::configuration(format!("invalid {type_name} parameter '{raw}': {e}"))
        };
        match type_name.to_ascii_lowercase().as_str() {
            "string" => Ok(Self::String(raw.to_string())),
            "long" => raw.parse().map(Self::Long).map_err(|e| invalid(&e)),
            "double" => raw.parse().map(Self::Double).map_err(|e| invalid(&e)),
            "date" => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(Self::Date)
                .map_err(|e| invalid(&e)),
            other => Err(BatchError::configuration(format!(
                "unknown parameter type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for JobParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<&str> for JobParameter {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for JobParameter {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for JobParameter {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

/// An ordered set of job parameters.
///
/// Keys are kept sorted so that two parameter sets with the same entries
/// always produce the same identity key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParameters {
    values: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JobParameter>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts a parameter, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JobParameter>) {
        self.values.insert(key.into(), value.into());
    }

    /// Gets a parameter.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JobParameter> {
        self.values.get(key)
    }

    /// Gets a string parameter.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(JobParameter::as_str)
    }

    /// Iterates over parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.values.iter()
    }

    /// Returns the number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parses a `key=value` or `key(type)=value` pair and inserts it.
    pub fn insert_pair(&mut self, pair: &str) -> Result<(), BatchError> {
        let (lhs, raw) = pair.split_once('=').ok_or_else(|| {
            BatchError::configuration(format!("parameter '{pair}' must be key=value"))
        })?;
        let lhs = lhs.trim();
        let (key, value) = match lhs.split_once('(') {
            Some((key, rest)) => {
                let type_name = rest.strip_suffix(')').ok_or_else(|| {
                    BatchError::configuration(format!("malformed parameter type in '{pair}'"))
                })?;
                (key, JobParameter::parse_typed(type_name, raw)?)
            }
            None => (lhs, JobParameter::String(raw.to_string())),
        };
        if key.is_empty() {
            return Err(BatchError::configuration(format!(
                "parameter '{pair}' has an empty key"
            )));
        }
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    /// Builds a parameter set from `key=value` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Result<Self, BatchError> {
        let mut params = Self::new();
        for pair in pairs {
            params.insert_pair(pair)?;
        }
        Ok(params)
    }
}

impl fmt::Display for JobParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        write!(f, "}}")
    }
}

/// The identity of a job instance: its name plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobIdentity {
    /// The job name.
    pub name: String,
    /// The identifying parameters.
    pub parameters: JobParameters,
}

impl JobIdentity {
    /// Creates a new identity.
    #[must_use]
    pub fn new(name: impl Into<String>, parameters: JobParameters) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }

    /// Returns a stable hex key derived from the canonical parameter encoding.
    #[must_use]
    pub fn key(&self) -> String {
        let canonical = serde_json::to_string(&self.parameters).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for JobIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.parameters)
    }
}
