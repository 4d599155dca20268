use serde::{Deserialize, Serialize};

use crate::operation::Operation;
use crate::types::ValueType;

/// Single field a handler reads from an operation's arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Name of the argument.
    pub name: String,
    /// Type the argument must have when present.
    pub value_type: ValueType,
    /// Whether the argument must be present.
    pub required: bool,
}

/// The fields a handler declares, used to validate operations before the
/// handler body runs and for introspection by tooling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDeclaration {
    fields: Vec<FieldDef>,
}

impl FieldDeclaration {
    /// A declaration with no fields; every operation passes validation.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn required(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.push(name.into(), value_type, true);
        self
    }

    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.push(name.into(), value_type, false);
        self
    }

    fn push(&mut self, name: String, value_type: ValueType, required: bool) {
        // Redeclaring a field replaces the earlier declaration.
        self.fields.retain(|f| f.name != name);
        self.fields.push(FieldDef {
            name,
            value_type,
            required,
        });
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Checks every declared field against the operation's arguments.
    ///
    /// Collects all problems instead of stopping at the first one.
    #[must_use]
    pub fn validate(&self, op: &Operation) -> ValidationResult {
        let mut errors = Vec::new();
        for field in &self.fields {
            match op.arg(&field.name) {
                None if field.required => errors.push(format!(
                    "{} is missing required field '{}'",
                    op.op_type(),
                    field.name
                )),
                None => {}
                Some(value) if !field.value_type.accepts(value) => errors.push(format!(
                    "{} field '{}' must be of type {} but was {}",
                    op.op_type(),
                    field.name,
                    field.value_type,
                    value.value_type()
                )),
                Some(_) => {}
            }
        }
        if errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid { errors }
        }
    }
}

/// Result of validating an operation against a field declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// The operation conforms to the declaration.
    Valid,
    /// The operation violates one or more declared fields.
    Invalid {
        /// Human-readable descriptions of each validation failure.
        errors: Vec<String>,
    },
}

impl ValidationResult {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// The failure descriptions; empty when valid.
    #[must_use]
    pub fn errors(&self) -> &[String] {
        match self {
            Self::Valid => &[],
            Self::Invalid { errors } => errors,
        }
    }
}
