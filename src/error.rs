//! Service error type and its HTTP mapping.

use std::collections::BTreeMap;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use validator::{ValidationError, ValidationErrors, ValidationErrorsKind};

use crate::domain::aggregates::{CartError, CouponRejection, OrderError, ProductError, StockError};

/// Per-field validation messages, keyed by field path (`items.0.quantity`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn merge(&mut self, other: FieldErrors) {
        for (field, messages) in other.0 {
            self.0.entry(field).or_default().extend(messages);
        }
    }

    /// Merges `other` with every field path prefixed by `prefix.`.
    pub fn merge_prefixed(&mut self, prefix: &str, other: FieldErrors) {
        for (field, messages) in other.0 {
            self.0
                .entry(format!("{prefix}.{field}"))
                .or_default()
                .extend(messages);
        }
    }

    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// `Ok(())` when no errors were collected.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }
}

impl From<ValidationErrors> for FieldErrors {
    fn from(errors: ValidationErrors) -> Self {
        let mut out = FieldErrors::new();
        collect_validation_errors(&mut out, None, &errors);
        out
    }
}

fn collect_validation_errors(out: &mut FieldErrors, prefix: Option<&str>, errors: &ValidationErrors) {
    for (field, kind) in errors.errors() {
        let path = match prefix {
            Some(p) => format!("{p}.{field}"),
            None => field.to_string(),
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                for error in list {
                    out.add(path.clone(), describe(field, error));
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_validation_errors(out, Some(&path), inner),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_validation_errors(out, Some(&format!("{path}.{index}")), inner);
                }
            }
        }
    }
}

/// Human readable message for a derive-level validation failure.
fn describe(field: &str, error: &ValidationError) -> String {
    if let Some(message) = &error.message {
        return message.to_string();
    }
    let label = field.replace('_', " ");
    let param = |name: &str| error.params.get(name).map(|v| v.to_string());
    match error.code.as_ref() {
        "length" if error.params.contains_key("equal") => {
            format!("The {label} must be {} characters.", param("equal").unwrap_or_default())
        }
        "length" => match (param("min"), param("max")) {
            (Some(min), Some(max)) if min == "1" => {
                format!("The {label} field is required and may not be greater than {max} characters.")
            }
            (Some(min), Some(max)) => format!("The {label} must be between {min} and {max} characters."),
            (Some(min), None) => format!("The {label} must be at least {min} characters."),
            (None, Some(max)) => format!("The {label} may not be greater than {max} characters."),
            (None, None) => format!("The {label} has an invalid length."),
        },
        "range" => match (param("min"), param("max")) {
            (Some(min), Some(max)) => format!("The {label} must be between {min} and {max}."),
            (Some(min), None) => format!("The {label} must be at least {min}."),
            (None, Some(max)) => format!("The {label} may not be greater than {max}."),
            (None, None) => format!("The {label} is out of range."),
        },
        "email" => format!("The {label} must be a valid email address."),
        "url" => format!("The {label} must be a valid URL."),
        _ => format!("The {label} is invalid."),
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Input failed validation or a business rule checked against current rows
    #[error("The given data was invalid.")]
    Validation(FieldErrors),

    #[error("{resource} not found")]
    NotFound { resource: &'static str },

    /// Uniqueness or state conflict
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Unauthenticated.")]
    Unauthenticated,

    #[error("This action is unauthorized.")]
    Forbidden,

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("Failed to {operation}")]
    Internal { operation: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(resource: &'static str) -> Self {
        Self::NotFound { resource }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(FieldErrors::single(field, message))
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal(operation: impl Into<String>) -> Self {
        Self::Internal {
            operation: operation.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::Database(sqlx::Error::RowNotFound) => StatusCode::NOT_FOUND,
            Error::Database(sqlx::Error::Database(db)) if db.is_unique_violation() => StatusCode::CONFLICT,
            Error::Database(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => StatusCode::CONFLICT,
            Error::Database(_) | Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to API clients.
    pub fn user_message(&self) -> String {
        match self {
            Error::Database(sqlx::Error::RowNotFound) => "Resource not found".to_string(),
            Error::Database(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                "Resource already exists".to_string()
            }
            Error::Database(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                "Resource is referenced by other records".to_string()
            }
            Error::Database(_) | Error::Internal { .. } => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(err) => Error::Validation(body_field_errors(&err.body_text())),
            JsonRejection::JsonSyntaxError(_) => Error::validation("body", "The request body is not valid JSON."),
            other => Error::BadRequest(other.body_text()),
        }
    }
}

/// Maps a deserialization failure such as `items[0].quantity: invalid type: ...`
/// or a missing field onto the field it names.
fn body_field_errors(detail: &str) -> FieldErrors {
    let detail = detail.split_once("target type: ").map_or(detail, |(_, rest)| rest);
    let (path, message) = match detail.split_once(": ") {
        Some((path, message)) if is_json_path(path) => (Some(path.replace('[', ".").replace(']', "")), message),
        _ => (None, detail),
    };
    let missing = message
        .strip_prefix("missing field `")
        .and_then(|rest| rest.split_once('`'))
        .map(|(name, _)| name);
    let label = |field: &str| field.rsplit('.').next().unwrap_or(field).replace('_', " ");

    match (path, missing) {
        (path, Some(name)) => {
            let field = path.map_or_else(|| name.to_string(), |p| format!("{p}.{name}"));
            let message = format!("The {} field is required.", label(&field));
            FieldErrors::single(field, message)
        }
        (Some(field), None) => {
            let message = format!("The {} field has an invalid value.", label(&field));
            FieldErrors::single(field, message)
        }
        (None, None) => FieldErrors::single("body", "The request body does not match the expected format."),
    }
}

fn is_json_path(candidate: &str) -> bool {
    !candidate.is_empty() && candidate != "." && !candidate.contains(char::is_whitespace)
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        Error::Validation(errors.into())
    }
}

impl From<StockError> for Error {
    fn from(err: StockError) -> Self {
        Error::validation(err.field(), err.to_string())
    }
}

impl From<CouponRejection> for Error {
    fn from(err: CouponRejection) -> Self {
        Error::validation("coupon_code", err.to_string())
    }
}

impl From<OrderError> for Error {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::NoItems => Error::validation("items", err.to_string()),
            OrderError::InvalidTransition { .. } | OrderError::NotPaid => Error::conflict(err.to_string()),
        }
    }
}

impl From<ProductError> for Error {
    fn from(err: ProductError) -> Self {
        Error::validation("variant_id", err.to_string())
    }
}

impl From<CartError> for Error {
    fn from(_: CartError) -> Self {
        Error::not_found("Cart item")
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else if status == StatusCode::CONFLICT {
            tracing::warn!(error = %self, "conflict");
        } else {
            tracing::debug!(error = %self, "client error");
        }

        let body = match self {
            Error::Validation(errors) => json!({
                "message": "The given data was invalid.",
                "errors": errors,
            }),
            other => json!({ "message": other.user_message() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Sample {
        #[validate(length(min = 1, max = 10))]
        name: String,
        #[validate(email)]
        email: String,
    }

    #[test]
    fn validator_errors_become_field_messages() {
        let sample = Sample {
            name: String::new(),
            email: "nope".into(),
        };
        let errors: FieldErrors = sample.validate().unwrap_err().into();
        assert_eq!(
            errors.get("name").unwrap(),
            ["The name field is required and may not be greater than 10 characters."]
        );
        assert_eq!(errors.get("email").unwrap(), ["The email must be a valid email address."]);
    }

    #[test]
    fn prefixed_merge_builds_paths() {
        let mut errors = FieldErrors::new();
        errors.merge_prefixed("items.2", FieldErrors::single("quantity", "too many"));
        assert!(errors.has("items.2.quantity"));
        assert!(errors.into_result().is_err());
    }

    #[test]
    fn status_codes() {
        assert_eq!(Error::validation("a", "b").status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(Error::not_found("Product").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(Error::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(Error::internal("x").user_message(), "Internal server error");
    }

    #[test]
    fn body_errors_name_the_field() {
        let errors = body_field_errors(
            "Failed to deserialize the JSON body into the target type: quantity: invalid type: string \"ten\", expected i32 at line 1 column 37",
        );
        assert_eq!(errors.get("quantity").unwrap(), ["The quantity field has an invalid value."]);

        let errors = body_field_errors(
            "Failed to deserialize the JSON body into the target type: missing field `price` at line 1 column 20",
        );
        assert_eq!(errors.get("price").unwrap(), ["The price field is required."]);

        let errors = body_field_errors(
            "Failed to deserialize the JSON body into the target type: shipping_address: missing field `postal_code` at line 1 column 90",
        );
        assert_eq!(
            errors.get("shipping_address.postal_code").unwrap(),
            ["The postal code field is required."]
        );

        let errors = body_field_errors(
            "Failed to deserialize the JSON body into the target type: images[0].url: invalid type: integer `3`, expected a string at line 1 column 30",
        );
        assert!(errors.has("images.0.url"));

        let errors = body_field_errors("Failed to deserialize the JSON body into the target type: invalid type: sequence, expected struct X");
        assert!(errors.has("body"));
    }
}
