//! Session configuration entries and model format selection.

use std::path::Path;

use crate::format;

/// Selects the decoder used by `Load`.
pub const CONFIG_LOAD_MODEL_FORMAT: &str = "session.load_model_format";
/// Selects the encoder invoked during `Initialize`.
pub const CONFIG_SAVE_MODEL_FORMAT: &str = "session.save_model_format";
/// Destination for the serialized model written during `Initialize`.
pub const CONFIG_OPTIMIZED_MODEL_PATH: &str = "session.optimized_model_path";
/// Opaque label attached to lifecycle diagnostics.
pub const CONFIG_LOG_ID: &str = "session.log_id";

/// On-disk encodings of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// Native JSON model document.
    Json,
    /// Compact binary model format.
    Binary,
}

impl ModelFormat {
    /// Parses a config entry value.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(ModelFormat::Json),
            "igm" => Some(ModelFormat::Binary),
            _ => None,
        }
    }

    /// Infers the format from a filename extension.
    pub fn from_extension(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Some(ModelFormat::Json),
            Some(ext) if ext.eq_ignore_ascii_case("igm") => Some(ModelFormat::Binary),
            _ => None,
        }
    }

    /// Recognizes a format from the blob itself; the binary format is
    /// self-describing via its magic header, everything else is treated as
    /// a JSON document.
    pub fn sniff(bytes: &[u8]) -> Self {
        if bytes.starts_with(format::MAGIC) {
            ModelFormat::Binary
        } else {
            ModelFormat::Json
        }
    }
}

/// Options attached to a session: an ordered list of string config entries
/// consulted at Load/Initialize time. Entries are never persisted with the
/// graph; later entries for the same key take precedence.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    config_entries: Vec<(String, String)>,
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_config_entry(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.config_entries.push((key.into(), value.into()));
    }

    pub fn with_config_entry(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.add_config_entry(key, value);
        self
    }

    pub fn config_entry(&self, key: &str) -> Option<&str> {
        self.config_entries
            .iter()
            .rev()
            .find(|(entry_key, _)| entry_key == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn config_entries(&self) -> &[(String, String)] {
        &self.config_entries
    }

    pub fn log_id(&self) -> &str {
        self.config_entry(CONFIG_LOG_ID).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_entries_take_precedence() {
        let mut options = SessionOptions::new();
        options.add_config_entry(CONFIG_SAVE_MODEL_FORMAT, "json");
        options.add_config_entry(CONFIG_SAVE_MODEL_FORMAT, "igm");
        assert_eq!(options.config_entry(CONFIG_SAVE_MODEL_FORMAT), Some("igm"));
    }

    #[test]
    fn format_parsing_and_extension_inference() {
        assert_eq!(ModelFormat::parse("IGM"), Some(ModelFormat::Binary));
        assert_eq!(ModelFormat::parse("bogus"), None);
        assert_eq!(
            ModelFormat::from_extension(Path::new("model.igm")),
            Some(ModelFormat::Binary)
        );
        assert_eq!(
            ModelFormat::from_extension(Path::new("model.json")),
            Some(ModelFormat::Json)
        );
        assert_eq!(ModelFormat::from_extension(Path::new("model.bin")), None);
    }
}
