//! Property-level typing for the entity model. Pure data.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int64,
    Float64,
    Utf8,
    DateTime,
    Array(Box<DataType>),
    Object,
    /// Untyped JSON; also the type of a bare `null`.
    Json,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int64 | DataType::Float64)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, DataType::Utf8)
    }

    pub fn element(&self) -> Option<&DataType> {
        match self {
            DataType::Array(e) => Some(e),
            _ => None,
        }
    }

    /// Parse the spelling used in model files: `string`, `int`, `array<string>`, ...
    pub fn parse(s: &str) -> Option<DataType> {
        let s = s.trim();
        if let Some(inner) = s
            .strip_prefix("array<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return DataType::parse(inner).map(|e| DataType::Array(Box::new(e)));
        }
        Some(match s.to_ascii_lowercase().as_str() {
            "bool" | "boolean" => DataType::Boolean,
            "int" | "int64" | "long" => DataType::Int64,
            "float" | "float64" | "double" | "decimal" => DataType::Float64,
            "string" | "utf8" => DataType::Utf8,
            "datetime" | "date" => DataType::DateTime,
            "object" => DataType::Object,
            "json" => DataType::Json,
            _ => return None,
        })
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Boolean => write!(f, "bool"),
            DataType::Int64 => write!(f, "int"),
            DataType::Float64 => write!(f, "float"),
            DataType::Utf8 => write!(f, "string"),
            DataType::DateTime => write!(f, "datetime"),
            DataType::Array(e) => write!(f, "array<{e}>"),
            DataType::Object => write!(f, "object"),
            DataType::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    /// Name of the field in the stored document.
    pub json_name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Property {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        Self {
            json_name: name.clone(),
            name,
            data_type,
            nullable: false,
        }
    }

    pub fn json(mut self, json_name: impl Into<String>) -> Self {
        self.json_name = json_name.into();
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnedKind {
    Reference,
    Collection,
}

/// A structure stored inline inside its owner's document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedType {
    pub name: String,
    pub properties: Vec<Property>,
    pub owned: Vec<OwnedNavigation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedNavigation {
    pub name: String,
    pub json_name: String,
    pub kind: OwnedKind,
    pub target: OwnedType,
}

/// Navigation to another root type. Never traversable inside one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceNavigation {
    pub name: String,
    pub target: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_spellings() {
        assert_eq!(DataType::parse("string"), Some(DataType::Utf8));
        assert_eq!(
            DataType::parse("array<int>"),
            Some(DataType::Array(Box::new(DataType::Int64)))
        );
        assert_eq!(DataType::parse("money"), None);
        assert_eq!(DataType::Array(Box::new(DataType::Utf8)).to_string(), "array<string>");
    }
}
