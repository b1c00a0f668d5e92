//! Structured log context handed to each component.
//!
//! Components never reach for process-wide state to describe themselves;
//! they carry a `LogContext` and derive narrower ones per event.

use std::fmt;

#[derive(Debug, Clone)]
pub struct LogContext {
    component: &'static str,
    fields: Vec<(&'static str, String)>,
}

impl LogContext {
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            fields: Vec::new(),
        }
    }

    /// Returns a copy with one more field appended.
    pub fn with(&self, key: &'static str, value: impl fmt::Display) -> Self {
        let mut next = self.clone();
        next.fields.push((key, value.to_string()));
        next
    }

    /// Returns a copy for a different component, keeping the fields.
    pub fn for_component(&self, component: &'static str) -> Self {
        Self {
            component,
            fields: self.fields.clone(),
        }
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.component)?;
        for (key, value) in &self.fields {
            write!(f, " {key}={value}")?;
        }
        Ok(())
    }
}
