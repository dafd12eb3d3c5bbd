//! Declarative request-section schemas.
//!
//! A [`Schema`] is an opaque parser: it takes a section's current JSON
//! value and either returns the normalized value (defaults applied,
//! coercions performed) or the list of constraint violations. The stock
//! implementation, [`TypedSchema`], bridges serde for shape and the
//! validator crate for constraints.
//!
//! # Usage
//!
//! ```ignore
//! use serde::{Deserialize, Serialize};
//! use validator::Validate;
//!
//! #[derive(Debug, Deserialize, Serialize, Validate)]
//! struct CreateUser {
//!     #[validate(required, length(min = 1, max = 64))]
//!     name: Option<String>,
//! }
//!
//! let schema = keel::schema::of::<CreateUser>();
//! ```

use std::fmt;
use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// Section of an inbound request a schema applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Body,
    Query,
    Params,
    Headers,
}

impl Source {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Body => "body",
            Self::Query => "query",
            Self::Params => "params",
            Self::Headers => "headers",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concrete constraint failure produced by schema parsing.
///
/// `field` is the dotted path to the failing value. A failure of the
/// whole section keeps the empty path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Violation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    pub field: String,
    pub message: String,
    pub code: String,
}

impl Violation {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            source: None,
            field: field.into(),
            message: message.into(),
            code: code.into(),
        }
    }

    /// Annotate the violation with the section it came from.
    #[must_use]
    pub(crate) fn tagged(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }
}

/// Why a parse did not produce a normalized value.
#[derive(Debug)]
pub enum SchemaError {
    /// Client data failed the schema's constraints.
    Violations(Vec<Violation>),
    /// The engine itself failed. Not a client error; propagated to the
    /// central classifier instead of being reported as a violation.
    Internal(anyhow::Error),
}

/// An opaque, composable description of the expected shape of a value.
///
/// Parsing is pure: the same input always yields the same outcome.
pub trait Schema: Send + Sync + 'static {
    /// Parse `value`, returning its normalized form or the violations.
    ///
    /// # Errors
    /// [`SchemaError::Violations`] when the value fails the schema's
    /// constraints; [`SchemaError::Internal`] when the engine itself
    /// fails.
    fn parse(&self, value: &Value) -> Result<Value, SchemaError>;
}

/// Schema over a deserializable, `Validate`-derived type.
///
/// Parsing deserializes into `T` (serde defaults and coercions apply),
/// runs `T::validate()`, and re-serializes the result as the normalized
/// value. Required fields follow the validator-crate idiom:
/// `Option<T>` + `#[validate(required)]`.
pub struct TypedSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

/// Build the schema for `T`.
#[must_use]
pub fn of<T>() -> TypedSchema<T>
where
    T: DeserializeOwned + Serialize + Validate + Send + Sync + 'static,
{
    TypedSchema {
        _marker: PhantomData,
    }
}

impl<T> Schema for TypedSchema<T>
where
    T: DeserializeOwned + Serialize + Validate + Send + Sync + 'static,
{
    fn parse(&self, value: &Value) -> Result<Value, SchemaError> {
        let parsed: T = serde_json::from_value(value.clone()).map_err(|err| {
            // Shape failures have no reliable path; the section as a
            // whole is reported with the empty field.
            SchemaError::Violations(vec![Violation::new("", err.to_string(), "invalid_type")])
        })?;

        if let Err(errors) = parsed.validate() {
            return Err(SchemaError::Violations(flatten(&errors)));
        }

        serde_json::to_value(&parsed).map_err(|err| SchemaError::Internal(err.into()))
    }
}

/// Flatten nested [`ValidationErrors`] into dotted-path violations.
///
/// The validator crate reports per-field errors through a map with no
/// stable iteration order, so the result is sorted by field path.
#[must_use]
pub fn flatten(errors: &ValidationErrors) -> Vec<Violation> {
    let mut out = Vec::new();
    collect(errors, "", &mut out);
    out.sort_by(|a, b| a.field.cmp(&b.field));
    out
}

fn collect(errors: &ValidationErrors, prefix: &str, out: &mut Vec<Violation>) {
    for (field, kind) in errors.errors() {
        let path = join_path(prefix, field);
        match kind {
            ValidationErrorsKind::Field(failures) => {
                for failure in failures {
                    let message = failure.message.as_ref().map_or_else(
                        || format!("failed the `{}` constraint", failure.code),
                        ToString::to_string,
                    );
                    out.push(Violation::new(path.clone(), message, failure.code.to_string()));
                }
            }
            ValidationErrorsKind::Struct(nested) => collect(nested, &path, out),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect(nested, &join_path(&path, &index.to_string()), out);
                }
            }
        }
    }
}

// Empty segments are omitted rather than rendered as "root".
fn join_path(prefix: &str, segment: &str) -> String {
    match (prefix.is_empty(), segment.is_empty()) {
        (true, _) => segment.to_string(),
        (_, true) => prefix.to_string(),
        _ => format!("{prefix}.{segment}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_aux::prelude::deserialize_number_from_string;
    use serde_json::json;

    #[derive(Debug, Deserialize, Serialize, Validate)]
    struct CreateUser {
        #[validate(required, length(min = 1, max = 64))]
        name: Option<String>,

        #[serde(default = "default_role")]
        role: String,
    }

    fn default_role() -> String {
        "member".to_string()
    }

    #[derive(Debug, Deserialize, Serialize, Validate)]
    struct Paging {
        #[serde(default = "default_page", deserialize_with = "deserialize_number_from_string")]
        #[validate(range(min = 1))]
        page: u32,
    }

    fn default_page() -> u32 {
        1
    }

    #[derive(Debug, Deserialize, Serialize, Validate)]
    struct Profile {
        #[validate(length(min = 1))]
        bio: String,
    }

    #[derive(Debug, Deserialize, Serialize, Validate)]
    struct UpdateUser {
        #[validate(nested)]
        profile: Profile,

        #[validate(nested)]
        links: Vec<Profile>,
    }

    #[test]
    fn missing_required_field_reports_field_name() {
        let schema = of::<CreateUser>();
        let err = schema.parse(&json!({})).unwrap_err();
        let SchemaError::Violations(violations) = err else {
            panic!("expected violations, got internal error");
        };
        assert!(violations.iter().any(|v| v.field == "name"));
        assert!(violations.iter().any(|v| v.code == "required"));
    }

    #[test]
    fn parse_is_idempotent_on_valid_input() {
        let schema = of::<CreateUser>();
        let input = json!({"name": "alice"});
        let first = schema.parse(&input).expect("valid input");
        let second = schema.parse(&first).expect("normalized output stays valid");
        assert_eq!(first, second);
    }

    #[test]
    fn normalization_applies_defaults() {
        let schema = of::<CreateUser>();
        let normalized = schema.parse(&json!({"name": "alice"})).expect("valid input");
        assert_eq!(normalized["role"], json!("member"));
    }

    #[test]
    fn normalization_coerces_numeric_strings() {
        let schema = of::<Paging>();
        let normalized = schema.parse(&json!({"page": "2"})).expect("valid input");
        assert_eq!(normalized["page"], json!(2));
    }

    #[test]
    fn type_mismatch_keeps_empty_field_path() {
        let schema = of::<CreateUser>();
        let err = schema.parse(&json!({"name": 7})).unwrap_err();
        let SchemaError::Violations(violations) = err else {
            panic!("expected violations");
        };
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "");
        assert_eq!(violations[0].code, "invalid_type");
    }

    #[test]
    fn nested_struct_errors_use_dotted_paths() {
        let schema = of::<UpdateUser>();
        let err = schema
            .parse(&json!({"profile": {"bio": ""}, "links": [{"bio": "ok"}, {"bio": ""}]}))
            .unwrap_err();
        let SchemaError::Violations(violations) = err else {
            panic!("expected violations");
        };
        let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
        assert!(fields.contains(&"profile.bio"));
        assert!(fields.contains(&"links.1.bio"));
    }

    #[test]
    fn violations_are_sorted_by_field_path() {
        let schema = of::<UpdateUser>();
        let err = schema
            .parse(&json!({"profile": {"bio": ""}, "links": [{"bio": ""}]}))
            .unwrap_err();
        let SchemaError::Violations(violations) = err else {
            panic!("expected violations");
        };
        let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
        let mut sorted = fields.clone();
        sorted.sort_unstable();
        assert_eq!(fields, sorted);
    }

    #[test]
    fn join_path_omits_empty_segments() {
        assert_eq!(join_path("", "name"), "name");
        assert_eq!(join_path("profile", ""), "profile");
        assert_eq!(join_path("profile", "bio"), "profile.bio");
        assert_eq!(join_path("", ""), "");
    }

    #[test]
    fn violation_serializes_without_absent_source() {
        let violation = Violation::new("name", "is required", "required");
        let value = serde_json::to_value(&violation).expect("serialize");
        assert!(value.get("source").is_none());

        let tagged = violation.tagged(Source::Body);
        let value = serde_json::to_value(&tagged).expect("serialize");
        assert_eq!(value["source"], json!("body"));
    }
}
