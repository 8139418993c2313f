//! Field mapping compiled into constant-time lookups
//!
//! Built once per run from the configured [`FieldDefinition`]s and shared,
//! read-only, by every table load.

use std::collections::HashMap;
use udload_common::types::{DeclaredType, FieldDefinition};
use udload_common::{Result, UdloadError};

/// Canonical column of a destination table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub declared_type: DeclaredType,
}

/// Header lookups derived from the field definitions
#[derive(Debug, Clone, Default)]
pub struct SchemaMapper {
    /// source alias -> index into `columns`
    aliases: HashMap<String, usize>,
    /// canonical fields in definition order
    columns: Vec<Column>,
}

impl SchemaMapper {
    /// Compile the field definitions
    ///
    /// Repeated canonical names are merged (aliases unioned, first declared
    /// type wins). An alias claimed by two different canonical fields is a
    /// configuration error.
    pub fn new(fields: &[FieldDefinition]) -> Result<Self> {
        let mut mapper = Self::default();
        let mut index_of: HashMap<&str, usize> = HashMap::new();

        for field in fields {
            let name = field.canonical_name();
            let index = *index_of.entry(name).or_insert_with(|| {
                mapper.columns.push(Column {
                    name: name.to_string(),
                    declared_type: field.declared_type(),
                });
                mapper.columns.len() - 1
            });

            for alias in field.source_aliases() {
                match mapper.aliases.get(alias) {
                    Some(&existing) if existing != index => {
                        return Err(UdloadError::ConflictingAlias {
                            alias: alias.to_string(),
                            first: mapper.columns[existing].name.clone(),
                            second: name.to_string(),
                        });
                    },
                    Some(_) => {},
                    None => {
                        mapper.aliases.insert(alias.to_string(), index);
                    },
                }
            }
        }

        Ok(mapper)
    }

    /// Position of the header's canonical field within [`Self::columns`]
    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.aliases.get(header).copied()
    }

    /// All canonical fields, in definition order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }
}
