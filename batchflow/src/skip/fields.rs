//! Declared field order used to reconstruct skipped records.

use std::fmt;
use std::sync::Arc;

/// Placeholder written for fields that could not be reconstructed.
pub const NOT_AVAILABLE: &str = "N/A";

type Accessor<I> = Arc<dyn Fn(&I) -> String + Send + Sync>;

/// An ordered list of `(name, accessor)` pairs describing an item.
///
/// The table is declared once per step and reused for every skip record:
/// read failures are split on the delimiter and matched to the names by
/// position, while process and write failures read the fields off the item.
pub struct FieldTable<I> {
    fields: Vec<(String, Accessor<I>)>,
}

impl<I> Clone for FieldTable<I> {
    fn clone(&self) -> Self {
        Self {
            fields: self.fields.clone(),
        }
    }
}

impl<I> fmt::Debug for FieldTable<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldTable")
            .field("names", &self.names())
            .finish()
    }
}

impl<I> Default for FieldTable<I> {
    fn default() -> Self {
        Self { fields: Vec::new() }
    }
}

impl<I> FieldTable<I> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field.
    #[must_use]
    pub fn field(
        mut self,
        name: impl Into<String>,
        accessor: impl Fn(&I) -> String + Send + Sync + 'static,
    ) -> Self {
        self.fields.push((name.into(), Arc::new(accessor)));
        self
    }

    /// Field names in declared order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Number of declared fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if no fields are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Values of every field of `item`.
    #[must_use]
    pub fn values(&self, item: &I) -> Vec<String> {
        self.fields.iter().map(|(_, get)| get(item)).collect()
    }

    /// Best-effort values from a raw line: split on `delimiter`, matched by
    /// position, missing trailing fields filled with `N/A`.
    #[must_use]
    pub fn values_from_raw(&self, raw: &str, delimiter: char) -> Vec<String> {
        let mut parts = raw.split(delimiter);
        (0..self.fields.len())
            .map(|_| {
                parts
                    .next()
                    .map_or_else(|| NOT_AVAILABLE.to_string(), str::to_string)
            })
            .collect()
    }

    /// Values from already tokenized fields.
    #[must_use]
    pub fn values_from_tokens(&self, tokens: &[String]) -> Vec<String> {
        (0..self.fields.len())
            .map(|i| {
                tokens
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string())
            })
            .collect()
    }

    /// `N/A` for every field.
    #[must_use]
    pub fn not_available(&self) -> Vec<String> {
        vec![NOT_AVAILABLE.to_string(); self.fields.len()]
    }
}
