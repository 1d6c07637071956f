//! Request validation helpers
//!
//! Validators accumulate every failing field instead of stopping at the
//! first one, so clients can highlight all problems in a form at once.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::{Error, Result};

/// Field-level validation failures (field name → message)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors {
    fields: BTreeMap<String, String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure; the first message recorded for a field wins
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Convert into `Ok(())` when empty, `Err(Error::Validation)` otherwise
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }

    pub fn require(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.add(field, "is required");
        }
    }

    pub fn max_len(&mut self, field: &str, value: &str, max: usize) {
        if value.chars().count() > max {
            self.add(field, format!("must be at most {} characters", max));
        }
    }

    pub fn min_len(&mut self, field: &str, value: &str, min: usize) {
        if value.chars().count() < min {
            self.add(field, format!("must be at least {} characters", min));
        }
    }

    pub fn email(&mut self, field: &str, value: &str) {
        if !is_plausible_email(value) {
            self.add(field, "must be a valid email address");
        }
    }

    pub fn phone(&mut self, field: &str, value: &str) {
        if !is_plausible_phone(value) {
            self.add(field, "must contain 7 to 15 digits, optionally prefixed by +");
        }
    }

    pub fn dane_code(&mut self, field: &str, value: &str, digits: usize) {
        if !is_dane_code(value, digits) {
            self.add(field, format!("must be a {}-digit DANE code", digits));
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|(field, msg)| format!("{} {}", field, msg))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Implemented by request payloads that carry their own validation rules
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Minimal email shape check: one `@`, non-empty local part, dotted domain
pub fn is_plausible_email(value: &str) -> bool {
    let value = value.trim();
    if value.len() > 254 || value.contains(char::is_whitespace) {
        return false;
    }
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Digits only (after an optional leading `+`), 7 to 15 of them (E.164 bound)
pub fn is_plausible_phone(value: &str) -> bool {
    let digits = value.strip_prefix('+').unwrap_or(value);
    (7..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

/// DANE codes are fixed-width numeric strings
pub fn is_dane_code(value: &str, digits: usize) -> bool {
    value.len() == digits && value.chars().all(|c| c.is_ascii_digit())
}

/// Normalise a phone number to digits only (WhatsApp ids carry no `+`)
pub fn normalize_phone(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}
