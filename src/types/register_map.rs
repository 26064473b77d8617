//! Per-meter register maps.

use crate::types::register::RegisterConfig;

/// Ordered mapping from field name to register configuration.
///
/// The coordinator does not interpret field names; callers use a map to
/// build requests for one meter model.
#[derive(Debug, Clone, Default)]
pub struct RegisterMap {
    fields: Vec<(String, RegisterConfig)>,
}

impl RegisterMap {
    /// Creates an empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Adds a field, replacing an existing one with the same name.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, config: RegisterConfig) -> Self {
        self.insert(name, config);
        self
    }

    /// Inserts a field, replacing an existing one with the same name.
    pub fn insert(&mut self, name: impl Into<String>, config: RegisterConfig) {
        let name = name.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = config;
        } else {
            self.fields.push((name, config));
        }
    }

    /// Looks up a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&RegisterConfig> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    /// Iterates over the fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RegisterConfig)> {
        self.fields.iter().map(|(n, c)| (n.as_str(), c))
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the map has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
