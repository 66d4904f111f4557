//! Error types for JSON:API resource operations.
//!
//! Every user-facing error carries a title and an HTTP status code so the
//! controller boundary can translate it into a JSON:API `errors` document
//! without inspecting the variant.

use serde::Serialize;
use std::fmt;

/// The primary error type for all resource operations.
#[derive(Debug)]
pub enum Error {
    /// Missing resource or relationship (404)
    NotFound(NotFoundError),
    /// Malformed payload, disallowed field, bad query operator (400)
    Validation(ValidationError),
    /// Policy denial (403)
    Authorization(AuthorizationError),
    /// Unmapped relation kind, missing descriptor (500)
    Configuration(ConfigurationError),
    /// Operation not available on this relationship or method (403)
    Unsupported(UnsupportedError),
    /// Failure reported by the query executor, propagated unchanged
    Query(QueryError),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug, Clone)]
pub struct NotFoundError {
    pub resource_type: String,
    pub id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
    /// JSON pointer into the request document, when known
    pub pointer: Option<String>,
}

/// A policy denial for `action` on a record or on a whole resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationError {
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConfigurationError {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct UnsupportedError {
    pub message: String,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Table or column not found
    NotFound,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Transaction could not be started, committed, or rolled back
    Transaction,
    /// Other backend error
    Database,
}

impl NotFoundError {
    pub fn new(resource_type: impl Into<String>, id: Option<String>) -> Self {
        let resource_type = resource_type.into();
        let message = match &id {
            Some(id) => format!("Resource {resource_type} (ID: {id}) is not found"),
            None => format!("Resource {resource_type} is not found"),
        };
        Self {
            resource_type,
            id,
            message,
        }
    }

    /// Use a custom message instead of the default one.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            pointer: None,
        }
    }

    #[must_use]
    pub fn with_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.pointer = Some(pointer.into());
        self
    }
}

impl AuthorizationError {
    pub fn new(
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: Option<String>,
    ) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id,
        }
    }
}

impl Error {
    /// Build a validation error from a message.
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(ValidationError::new(message))
    }

    /// Build a configuration error from a message.
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(ConfigurationError {
            message: message.into(),
        })
    }

    /// Build an unsupported-operation error from a message.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::Unsupported(UnsupportedError {
            message: message.into(),
        })
    }

    /// Build a query error of the given kind.
    pub fn query(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    /// HTTP status code the controller boundary should answer with.
    pub const fn status_code(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::Validation(_) => 400,
            Error::Authorization(_) | Error::Unsupported(_) => 403,
            Error::Configuration(_) | Error::Query(_) | Error::Serde(_) | Error::Custom(_) => 500,
        }
    }

    /// Human-readable title used in the `errors` document.
    pub fn title(&self) -> String {
        match self {
            Error::NotFound(e) => e.message.clone(),
            Error::Validation(e) => e.message.clone(),
            Error::Authorization(e) => e.to_string(),
            Error::Configuration(e) => e.message.clone(),
            Error::Unsupported(e) => e.message.clone(),
            Error::Query(e) => e.message.clone(),
            Error::Serde(msg) | Error::Custom(msg) => msg.clone(),
        }
    }

    /// Is this an error the client can fix by changing the request?
    pub const fn is_client_error(&self) -> bool {
        matches!(self.status_code(), 400..=499)
    }

    /// Render a JSON:API `errors` document for this error.
    pub fn to_document(&self) -> serde_json::Value {
        let pointer = match self {
            Error::Validation(e) => e.pointer.clone(),
            _ => None,
        };
        let document = ErrorDocument {
            errors: vec![ErrorObject {
                status: self.status_code().to_string(),
                title: self.title(),
                source: pointer.map(|pointer| ErrorSource { pointer }),
            }],
        };
        serde_json::to_value(document).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Serialize)]
struct ErrorDocument {
    errors: Vec<ErrorObject>,
}

#[derive(Serialize)]
struct ErrorObject {
    status: String,
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<ErrorSource>,
}

#[derive(Serialize)]
struct ErrorSource {
    pointer: String,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound(e) => write!(f, "Not found: {}", e.message),
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::Authorization(e) => write!(f, "Authorization error: {}", e),
            Error::Configuration(e) => write!(f, "Configuration error: {}", e.message),
            Error::Unsupported(e) => write!(f, "Unsupported operation: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(pointer) = &self.pointer {
            write!(f, "{} (at {})", self.message, pointer)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for AuthorizationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource_id {
            Some(id) => write!(
                f,
                "You don't have permission to {} resource [{}:{}]",
                self.action, self.resource_type, id
            ),
            None => write!(
                f,
                "You don't have permission to {} \"{}\" resources",
                self.action, self.resource_type
            ),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ValidationError {}
impl std::error::Error for AuthorizationError {}

impl From<NotFoundError> for Error {
    fn from(err: NotFoundError) -> Self {
        Error::NotFound(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<AuthorizationError> for Error {
    fn from(err: AuthorizationError) -> Self {
        Error::Authorization(err)
    }
}

impl From<ConfigurationError> for Error {
    fn from(err: ConfigurationError) -> Self {
        Error::Configuration(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for resource operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            Error::NotFound(NotFoundError::new("posts", Some("1".into()))).status_code(),
            404
        );
        assert_eq!(Error::validation("bad").status_code(), 400);
        assert_eq!(
            Error::Authorization(AuthorizationError::new("view", "posts", None)).status_code(),
            403
        );
        assert_eq!(Error::configuration("x").status_code(), 500);
        assert_eq!(Error::unsupported("x").status_code(), 403);
        assert!(Error::validation("bad").is_client_error());
        assert!(!Error::configuration("x").is_client_error());
    }

    #[test]
    fn authorization_titles() {
        let record = AuthorizationError::new("update", "posts", Some("7".into()));
        assert_eq!(
            record.to_string(),
            "You don't have permission to update resource [posts:7]"
        );

        let ty = AuthorizationError::new("viewAny", "comments", None);
        assert_eq!(
            ty.to_string(),
            "You don't have permission to viewAny \"comments\" resources"
        );
    }

    #[test]
    fn error_document_shape() {
        let err = Error::Validation(
            ValidationError::new("Invalid data format").with_pointer("/data/relationships/tags"),
        );
        let doc = err.to_document();
        assert_eq!(doc["errors"][0]["status"], "400");
        assert_eq!(doc["errors"][0]["title"], "Invalid data format");
        assert_eq!(
            doc["errors"][0]["source"]["pointer"],
            "/data/relationships/tags"
        );

        let doc = Error::unsupported("This request method is not available").to_document();
        assert!(doc["errors"][0].get("source").is_none());
    }
}
