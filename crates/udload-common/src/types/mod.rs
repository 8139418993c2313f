//! Field-mapping value objects shared across UDLoad

use crate::error::{Result, UdloadError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Declared type of a canonical field
///
/// Drives both the coercion applied to raw cells and the column type of the
/// destination table. Fields without an explicit type are `String`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeclaredType {
    /// Short text, truncated to 255 characters
    #[default]
    String,
    /// Long text, truncated to 65 535 characters
    Text,
    /// Whole number
    Int,
    /// Floating point number
    Float,
    /// Timestamp without time zone
    Datetime,
}

impl DeclaredType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeclaredType::String => "string",
            DeclaredType::Text => "text",
            DeclaredType::Int => "int",
            DeclaredType::Float => "float",
            DeclaredType::Datetime => "datetime",
        }
    }

    /// Whether the destination column stores free text
    pub fn is_textual(self) -> bool {
        matches!(self, DeclaredType::String | DeclaredType::Text)
    }
}

impl std::str::FromStr for DeclaredType {
    type Err = UdloadError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "string" | "str" | "varchar" => Ok(DeclaredType::String),
            "text" => Ok(DeclaredType::Text),
            "int" | "integer" => Ok(DeclaredType::Int),
            "float" | "double" => Ok(DeclaredType::Float),
            "datetime" | "date" | "timestamp" => Ok(DeclaredType::Datetime),
            _ => Err(UdloadError::UnknownType {
                field: String::new(),
                declared: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One canonical destination column and the source headers that feed it
///
/// Alias matching is exact and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDefinition {
    canonical_name: String,
    source_aliases: BTreeSet<String>,
    declared_type: DeclaredType,
}

impl FieldDefinition {
    /// Build a validated field definition
    ///
    /// Fails when the canonical name is blank. Blank aliases are dropped.
    pub fn new<I, S>(canonical_name: &str, aliases: I, declared_type: DeclaredType) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let canonical_name = canonical_name.trim();
        if canonical_name.is_empty() {
            return Err(UdloadError::config("field definition has an empty canonical name"));
        }

        let source_aliases = aliases
            .into_iter()
            .map(Into::into)
            .filter(|alias: &String| !alias.is_empty())
            .collect();

        Ok(Self {
            canonical_name: canonical_name.to_string(),
            source_aliases,
            declared_type,
        })
    }

    /// Build a field definition from an untyped type label (e.g. `"INT"`)
    pub fn parse<I, S>(canonical_name: &str, aliases: I, declared_type: Option<&str>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let declared_type = match declared_type {
            None => DeclaredType::default(),
            Some(label) => label.parse().map_err(|_| UdloadError::UnknownType {
                field: canonical_name.to_string(),
                declared: label.to_string(),
            })?,
        };
        Self::new(canonical_name, aliases, declared_type)
    }

    pub fn canonical_name(&self) -> &str {
        &self.canonical_name
    }

    pub fn source_aliases(&self) -> impl Iterator<Item = &str> {
        self.source_aliases.iter().map(String::as_str)
    }

    pub fn declared_type(&self) -> DeclaredType {
        self.declared_type
    }
}
