use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;

pub const RAW_RESPONSE: &str = "raw_response";
pub const RESPONSE_TYPE: &str = "response_type";
pub const EXTRACTED_LIST: &str = "extracted_list";
pub const ERROR: &str = "error";

/// Scanned in this order; later matches overwrite earlier keys.
const JSON_PATTERN_SOURCES: [&str; 3] = [
    r"\{[^{}]*(?:\{[^{}]*\}[^{}]*)*\}",
    r"\{[^}]*\}",
    r"\[[^\]]*\]",
];

static JSON_PATTERNS: LazyLock<Result<Vec<Regex>, regex::Error>> =
    LazyLock::new(|| JSON_PATTERN_SOURCES.iter().map(|p| Regex::new(p)).collect());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Structured,
    Text,
    NonString,
    Error,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Structured => "structured",
            ResponseType::Text => "text",
            ResponseType::NonString => "non_string",
            ResponseType::Error => "error",
        }
    }
}

/// Best-effort mapping extracted from a free-text model response.
///
/// Always carries `response_type` and `raw_response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParsedResponse {
    fields: Map<String, Value>,
}

impl ParsedResponse {
    fn tagged(mut fields: Map<String, Value>, raw: &str, kind: ResponseType) -> Self {
        fields.insert(RAW_RESPONSE.to_string(), Value::String(raw.to_string()));
        fields.insert(
            RESPONSE_TYPE.to_string(),
            Value::String(kind.as_str().to_string()),
        );
        Self { fields }
    }

    pub fn response_type(&self) -> ResponseType {
        match self.fields.get(RESPONSE_TYPE).and_then(Value::as_str) {
            Some("structured") => ResponseType::Structured,
            Some("non_string") => ResponseType::NonString,
            Some("error") => ResponseType::Error,
            _ => ResponseType::Text,
        }
    }

    pub fn raw_response(&self) -> &str {
        self.fields
            .get(RAW_RESPONSE)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    pub fn to_record(&self) -> StructuredMedicalRecord {
        StructuredMedicalRecord::from_parsed(self)
    }
}

/// Parse the final stage output, which may or may not be text.
pub fn parse_response(output: &Value) -> ParsedResponse {
    match output {
        Value::String(text) => parse_text(text),
        other => ParsedResponse::tagged(Map::new(), &other.to_string(), ResponseType::NonString),
    }
}

/// Collect every JSON fragment embedded in `text` into one mapping.
pub fn parse_text(text: &str) -> ParsedResponse {
    match extract_fragments(text) {
        Ok(fields) if fields.is_empty() => {
            ParsedResponse::tagged(Map::new(), text, ResponseType::Text)
        }
        Ok(fields) => ParsedResponse::tagged(fields, text, ResponseType::Structured),
        Err(e) => {
            let mut fields = Map::new();
            fields.insert(ERROR.to_string(), Value::String(e.to_string()));
            ParsedResponse::tagged(fields, text, ResponseType::Error)
        }
    }
}

fn extract_fragments(text: &str) -> Result<Map<String, Value>, regex::Error> {
    let mut merged = Map::new();

    let patterns = JSON_PATTERNS.as_ref().map_err(Clone::clone)?;

    for re in patterns {
        for found in re.find_iter(text) {
            match serde_json::from_str::<Value>(found.as_str()) {
                Ok(Value::Object(object)) if !object.is_empty() => merged.extend(object),
                Ok(Value::Array(list)) if !list.is_empty() => {
                    merged.insert(EXTRACTED_LIST.to_string(), Value::Array(list));
                }
                _ => continue,
            }
        }
    }

    Ok(merged)
}

/// Typed projection of the parsed final response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredMedicalRecord {
    pub symptoms: Vec<String>,
    pub diagnoses: Vec<String>,
    pub treatments: Vec<String>,
    pub precautions: Vec<String>,
    pub severity: String,
    pub duration: String,
    pub raw_text: String,
    pub response_type: Option<ResponseType>,
}

impl StructuredMedicalRecord {
    pub fn from_parsed(parsed: &ParsedResponse) -> Self {
        Self {
            symptoms: text_list(parsed.get("symptoms")),
            diagnoses: text_list(parsed.get("diagnoses")),
            treatments: text_list(parsed.get("treatments")),
            precautions: text_list(parsed.get("precautions")),
            severity: text_field(parsed.get("severity")),
            duration: text_field(parsed.get("duration")),
            raw_text: parsed.raw_response().to_string(),
            response_type: Some(parsed.response_type()),
        }
    }
}

fn text_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().map(value_text).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![value_text(other)],
    }
}

fn text_field(value: Option<&Value>) -> String {
    match value {
        Some(Value::Null) | None => String::new(),
        Some(other) => value_text(other),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
