//! Image reference resolution across the encodings sources use for image columns.

use psa_core::FALLBACK_IMAGE_URL;
use serde_json::Value as JsonValue;

const MAX_NESTING: usize = 4;

/// Turns a raw image column (URL, pipe list, JSON array, nested object) into one displayable
/// URL. Never fails: anything unusable resolves to the fallback image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageResolver {
    base_origin: String,
    fallback: String,
}

impl ImageResolver {
    pub fn new(base_origin: impl Into<String>) -> Self {
        Self {
            base_origin: base_origin.into().trim_end_matches('/').to_string(),
            fallback: FALLBACK_IMAGE_URL.to_string(),
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    pub fn base_origin(&self) -> &str {
        &self.base_origin
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    pub fn resolve(&self, raw: Option<&JsonValue>) -> String {
        match raw {
            Some(value) => self.resolve_value(value, 0),
            None => self.fallback.clone(),
        }
    }

    pub fn resolve_str(&self, raw: &str) -> String {
        self.resolve_text(raw, 0)
    }

    fn resolve_value(&self, value: &JsonValue, depth: usize) -> String {
        if depth > MAX_NESTING {
            return self.fallback.clone();
        }
        match value {
            JsonValue::String(s) => self.resolve_text(s, depth),
            JsonValue::Array(items) => match items.first() {
                Some(JsonValue::String(first)) => self.resolve_text(first, depth + 1),
                _ => self.fallback.clone(),
            },
            JsonValue::Object(map) => {
                let preferred = ["url", "primary"]
                    .iter()
                    .find_map(|key| map.get(*key).and_then(JsonValue::as_str));
                match preferred.or_else(|| map.values().find_map(JsonValue::as_str)) {
                    Some(s) => self.resolve_text(s, depth + 1),
                    None => self.fallback.clone(),
                }
            }
            _ => self.fallback.clone(),
        }
    }

    fn resolve_text(&self, raw: &str, depth: usize) -> String {
        let s = raw.trim();
        if s.is_empty() || depth > MAX_NESTING {
            return self.fallback.clone();
        }

        if (s.starts_with('[') && s.ends_with(']')) || (s.starts_with('{') && s.ends_with('}')) {
            return match serde_json::from_str::<JsonValue>(s) {
                Ok(parsed) => self.resolve_value(&parsed, depth + 1),
                Err(err) => {
                    tracing::debug!(error = %err, "unparsable JSON image reference");
                    self.fallback.clone()
                }
            };
        }

        if s.contains('|') {
            let first = s.split('|').next().unwrap_or_default().trim();
            return self.resolve_text(first, depth + 1);
        }

        if s.starts_with("data:image") {
            return s.to_string();
        }

        if let Some(rest) = s.strip_prefix("//") {
            return format!("https://{rest}");
        }

        if s.starts_with('/') {
            return format!("{}{}", self.base_origin, s);
        }

        s.to_string()
    }
}
