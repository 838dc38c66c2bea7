//! Target data model and field validation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::history::FetchRecord;

/// Caller-supplied description of a target.
///
/// Decoded from request bodies and configuration. Missing fields fall back
/// to zero values so that validation can report every problem at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSpec {
    /// Target id. Ignored on registration, required on update.
    pub id: u64,
    /// URL fetched on every tick.
    pub url: String,
    /// Polling interval in seconds.
    pub interval: u32,
}

impl TargetSpec {
    /// Create a spec with no id.
    pub fn new(url: impl Into<String>, interval: u32) -> Self {
        Self {
            id: 0,
            url: url.into(),
            interval,
        }
    }

    /// Set the target id.
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    /// Validate the fields used when registering a new target.
    ///
    /// The id is not checked; the registry assigns its own.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] listing every violated field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        ValidationError::from_violations(self.field_violations())
    }

    /// Validate the fields used when replacing the target stored under `id`.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] listing every violated field.
    pub fn validate_for_update(&self, id: u64) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        if id == 0 {
            violations.push(FieldViolation::new(
                "id",
                format!("incorrect id: {id}, must be a positive value"),
            ));
        }
        violations.extend(self.field_violations());
        ValidationError::from_violations(violations)
    }

    fn field_violations(&self) -> Vec<FieldViolation> {
        let mut violations = Vec::new();
        if self.url.is_empty() {
            violations.push(FieldViolation::new(
                "url",
                format!("incorrect url: {:?}, must not be empty", self.url),
            ));
        }
        if self.interval == 0 {
            violations.push(FieldViolation::new(
                "interval",
                format!(
                    "incorrect interval: {}, must be a positive number of seconds",
                    self.interval
                ),
            ));
        }
        violations
    }
}

/// A single field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    /// Name of the offending field.
    pub field: &'static str,
    /// Human-readable reason.
    pub message: String,
}

impl FieldViolation {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every field violation found in one candidate target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    violations: Vec<FieldViolation>,
}

impl ValidationError {
    fn from_violations(violations: Vec<FieldViolation>) -> Result<(), Self> {
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Self { violations })
        }
    }

    /// The individual violations, in field order.
    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    /// Whether `field` is among the violated fields.
    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid target: ")?;
        for (i, violation) in self.violations.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Point-in-time copy of a registered target, including its history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Target {
    pub id: u64,
    pub url: String,
    pub interval: u32,
    pub history: Vec<FetchRecord>,
}

/// Target view without history, as returned by list and lookup endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetSummary {
    pub id: u64,
    pub url: String,
    pub interval: u32,
}
