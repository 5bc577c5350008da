//! Property schema lookup used by the property clause builder.

use crate::ast::PropertySchema;
use std::collections::HashMap;

/// Supplies the schema of a property by name or ident.
pub trait SchemaLookup {
    fn lookup(&self, name: &str) -> Option<PropertySchema>;
}

impl SchemaLookup for HashMap<String, PropertySchema> {
    fn lookup(&self, name: &str) -> Option<PropertySchema> {
        self.get(name).cloned()
    }
}

/// Schema lookup backed by a fixed table, usually loaded from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaLookup {
    schemas: HashMap<String, PropertySchema>,
}

impl StaticSchemaLookup {
    pub fn new(schemas: HashMap<String, PropertySchema>) -> Self {
        Self { schemas }
    }

    /// Looks up by the key as given, then by the schema ident with or without
    /// the leading `:`.
    fn find(&self, name: &str) -> Option<&PropertySchema> {
        if let Some(schema) = self.schemas.get(name) {
            return Some(schema);
        }
        let bare = name.trim_start_matches(':');
        self.schemas
            .values()
            .find(|schema| schema.ident.trim_start_matches(':') == bare)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl SchemaLookup for StaticSchemaLookup {
    fn lookup(&self, name: &str) -> Option<PropertySchema> {
        self.find(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Cardinality, ValueType};

    fn rating() -> PropertySchema {
        PropertySchema {
            ident: ":user.property/rating-Xy12".to_string(),
            value_type: ValueType::Number,
            cardinality: Cardinality::One,
        }
    }

    #[test]
    fn test_lookup_by_name_and_ident() {
        let mut schemas = HashMap::new();
        schemas.insert("rating".to_string(), rating());
        let lookup = StaticSchemaLookup::new(schemas);

        assert_eq!(lookup.lookup("rating"), Some(rating()));
        assert_eq!(lookup.lookup(":user.property/rating-Xy12"), Some(rating()));
        assert_eq!(lookup.lookup("user.property/rating-Xy12"), Some(rating()));
        assert_eq!(lookup.lookup("missing"), None);
        assert_eq!(lookup.len(), 1);
    }
}
