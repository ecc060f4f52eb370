use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Canonical flat record delivered to the local consumer.
///
/// Every value is a string except `poll_selected_options`, which is an
/// array of strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
    #[serde(skip)]
    file: Option<PathBuf>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.fields.insert(key.to_string(), Value::String(value.into()));
        self
    }

    pub fn set_list(&mut self, key: &str, values: Vec<String>) -> &mut Self {
        self.fields.insert(
            key.to_string(),
            Value::Array(values.into_iter().map(Value::String).collect()),
        );
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn get_list(&self, key: &str) -> Option<Vec<&str>> {
        self.fields
            .get(key)?
            .as_array()?
            .iter()
            .map(Value::as_str)
            .collect()
    }

    /// Discriminator such as `text_message`.
    pub fn kind(&self) -> Option<&str> {
        self.get("type")
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// File written while producing this record, if any.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub(crate) fn attach_file(&mut self, path: PathBuf) {
        self.set("path", path.to_string_lossy());
        self.file = Some(path);
    }

    pub fn to_json(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }
}
