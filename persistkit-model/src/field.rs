use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Semantic type of an entity field.
///
/// Simple types may be promoted to their own physical column. Complex types
/// (arrays and objects) only ever live inside the overflow payload.
///
/// Tags are the snake_case names (`"string"`, `"object_array"`, ...). An
/// unrecognized tag deserializes as [`FieldType::String`] so that unknown
/// types map onto a bounded string column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    String,
    Integer,
    Boolean,
    Text,
    DateTime,
    StringArray,
    Object,
    ObjectArray,
}

impl FieldType {
    /// All tags, in declaration order.
    pub const ALL: [FieldType; 8] = [
        FieldType::String,
        FieldType::Integer,
        FieldType::Boolean,
        FieldType::Text,
        FieldType::DateTime,
        FieldType::StringArray,
        FieldType::Object,
        FieldType::ObjectArray,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Text => "text",
            Self::DateTime => "datetime",
            Self::StringArray => "string_array",
            Self::Object => "object",
            Self::ObjectArray => "object_array",
        }
    }

    /// Parses a type tag. Unknown tags fall back to `String`.
    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "string" | "str" => Self::String,
            "integer" | "int" => Self::Integer,
            "boolean" | "bool" => Self::Boolean,
            "text" => Self::Text,
            "datetime" => Self::DateTime,
            "string_array" => Self::StringArray,
            "object" => Self::Object,
            "object_array" => Self::ObjectArray,
            other => {
                tracing::debug!(tag = %other, "unknown field type, treating as string");
                Self::String
            }
        }
    }

    /// Arrays and objects: overflow-only, never indexed or unique.
    pub fn is_complex(&self) -> bool {
        matches!(self, Self::StringArray | Self::Object | Self::ObjectArray)
    }

    pub fn is_simple(&self) -> bool {
        !self.is_complex()
    }

    /// Whether values of this type are stored as strings.
    pub fn is_textual(&self) -> bool {
        matches!(self, Self::String | Self::Text | Self::DateTime)
    }

    /// Max length applied when a descriptor does not declare one.
    pub fn default_max_length(&self) -> Option<usize> {
        match self {
            Self::String => Some(200),
            Self::Text => Some(4000),
            _ => None,
        }
    }

    /// Empty container used to fill absent complex fields.
    pub fn empty_value(&self) -> Option<Value> {
        match self {
            Self::StringArray | Self::ObjectArray => Some(Value::Array(Vec::new())),
            Self::Object => Some(Value::Object(serde_json::Map::new())),
            _ => None,
        }
    }
}

impl From<String> for FieldType {
    fn from(tag: String) -> Self {
        Self::parse(&tag)
    }
}

impl From<FieldType> for String {
    fn from(field_type: FieldType) -> Self {
        field_type.as_str().to_string()
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_required() -> bool {
    true
}

/// One field of an entity, as declared by a static definition, a dynamic
/// field list, or an entity script.
///
/// The JSON shape matches the dynamic registration descriptor:
/// `{"name": "sku", "type": "string", "required": true, "max_length": 64, "is_indexed": true}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type", alias = "field_type")]
    pub field_type: FieldType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub is_primary_key: bool,
    #[serde(default)]
    pub is_indexed: bool,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl FieldDescriptor {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            default_value: None,
            max_length: None,
            is_primary_key: false,
            is_indexed: false,
            is_unique: false,
            description: String::new(),
        }
    }

    fn preset(name: &str, max_length: usize) -> Self {
        Self::new(name, FieldType::String).with_max_length(max_length)
    }

    // ── Typed shorthands ─────────────────────────────────────────

    pub fn string(name: &str) -> Self {
        Self::new(name, FieldType::String)
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldType::Text)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    pub fn datetime(name: &str) -> Self {
        Self::new(name, FieldType::DateTime)
    }

    /// Complex fields are optional; an absent value becomes an empty container.
    pub fn string_array(name: &str) -> Self {
        Self::new(name, FieldType::StringArray).optional()
    }

    pub fn object(name: &str) -> Self {
        Self::new(name, FieldType::Object).optional()
    }

    pub fn object_array(name: &str) -> Self {
        Self::new(name, FieldType::ObjectArray).optional()
    }

    // ── Semantic presets ─────────────────────────────────────────

    /// ULID-sized identifier (26 chars).
    pub fn id_field(name: &str) -> Self {
        Self::preset(name, 26)
    }

    /// Reference to another entity; fits ULID/UUID/GUID (36 chars).
    pub fn reference_id_field(name: &str) -> Self {
        Self::preset(name, 36)
    }

    /// Names, slugs, codes (200 chars).
    pub fn key_field(name: &str) -> Self {
        Self::preset(name, 200)
    }

    pub fn title_field(name: &str) -> Self {
        Self::preset(name, 400)
    }

    pub fn description_field(name: &str) -> Self {
        Self::preset(name, 800)
    }

    pub fn content_field(name: &str) -> Self {
        Self::preset(name, 4000)
    }

    pub fn large_content_field(name: &str) -> Self {
        Self::preset(name, 10_000)
    }

    pub fn max_content_field(name: &str) -> Self {
        Self::preset(name, 100_000)
    }

    /// Plain string field with the type's default length.
    pub fn standard_field(name: &str) -> Self {
        Self::string(name)
    }

    pub fn version_field(name: &str) -> Self {
        Self::preset(name, 50)
    }

    // ── Modifiers ────────────────────────────────────────────────

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self.required = false;
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.required = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.is_indexed = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.into();
        self
    }

    // ── Derived properties ───────────────────────────────────────

    /// Declared max length, or the type default for string-like fields.
    pub fn effective_max_length(&self) -> Option<usize> {
        if !matches!(self.field_type, FieldType::String | FieldType::Text) {
            return None;
        }
        self.max_length.or_else(|| self.field_type.default_max_length())
    }

    /// The default value coerced to the field's type.
    ///
    /// Defaults coming from dynamic descriptors are often strings: booleans
    /// accept `true`/`1`/`yes` (anything else is false) and integers fall back
    /// to 0 when the text does not parse.
    pub fn coerced_default(&self) -> Option<Value> {
        let raw = self.default_value.as_ref()?;
        if raw.is_null() {
            return None;
        }
        let coerced = match (self.field_type, raw) {
            (FieldType::Boolean, Value::String(s)) => {
                Value::Bool(matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
            }
            (FieldType::Integer, Value::String(s)) => Value::from(s.trim().parse::<i64>().unwrap_or(0)),
            (FieldType::Integer, Value::Number(n)) if n.as_i64().is_none() => {
                Value::from(n.as_f64().map(|f| f as i64).unwrap_or(0))
            }
            (FieldType::StringArray | FieldType::Object | FieldType::ObjectArray, Value::String(s)) => {
                serde_json::from_str(s).unwrap_or_else(|_| raw.clone())
            }
            _ => raw.clone(),
        };
        Some(coerced)
    }
}

/// Returns true for names usable as SQL identifiers without quoting tricks.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 128 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
