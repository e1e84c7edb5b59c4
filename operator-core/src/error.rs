use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// An error response from a collaborator write or read.
#[derive(Error, Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
#[error("{message}: {reason}")]
pub struct ErrorResponse {
    /// The status
    pub status: String,
    /// A message about the error
    #[serde(default)]
    pub message: String,
    /// The reason for the error
    #[serde(default)]
    pub reason: String,
    /// The error code
    pub code: u16,
}

/// Possible errors when working with the collaborator layer
#[derive(Error, Debug)]
pub enum Error {
    /// The collaborator rejected or failed the request
    #[error("api error: {0}")]
    Api(#[source] ErrorResponse),

    /// A value could not be converted to or from json
    #[error("error serializing or deserializing json: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// A value could not be converted to or from yaml
    #[error("error serializing or deserializing yaml: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// An object was present but did not carry a field the caller needs
    #[error("invalid object: {0}")]
    InvalidObject(String),
}

impl Error {
    /// Builds a `NotFound` api error for `kind` `namespace/name`
    pub fn not_found(kind: &str, namespace: Option<&str>, name: &str) -> Self {
        let what = match namespace {
            Some(ns) => format!("{kind} {ns}/{name}"),
            None => format!("{kind} {name}"),
        };
        Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("{what} not found"),
            reason: "NotFound".into(),
            code: 404,
        })
    }

    /// Builds a `Conflict` api error, returned when a resource version guard fails
    pub fn conflict(message: impl Into<String>) -> Self {
        Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: message.into(),
            reason: "Conflict".into(),
            code: 409,
        })
    }

    /// Whether this is an api error with code 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Api(resp) if resp.code == 404)
    }

    /// Whether this is an api error with code 409
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Api(resp) if resp.code == 409)
    }
}

/// A set of errors collected over one reconcile cycle.
///
/// Displays as the individual messages joined by newlines, in insertion order.
#[derive(Debug, Default)]
pub struct Aggregate {
    errors: Vec<Box<dyn std::error::Error + Send + Sync>>,
}

impl Aggregate {
    /// Creates an empty aggregate
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an error to the aggregate
    pub fn push(&mut self, err: impl Into<Box<dyn std::error::Error + Send + Sync>>) {
        self.errors.push(err.into());
    }

    /// Moves all errors of `other` into this aggregate
    pub fn extend(&mut self, other: Aggregate) {
        self.errors.extend(other.errors);
    }

    /// Whether no error was recorded
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of recorded errors
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// The individual messages, in insertion order
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    /// Returns `Ok(())` when empty, otherwise the aggregate itself as an error
    pub fn into_result(self) -> Result<(), Aggregate> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.messages().join("\n"))
    }
}

impl std::error::Error for Aggregate {}

impl<E> FromIterator<E> for Aggregate
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn from_iter<I: IntoIterator<Item = E>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().map(Into::into).collect(),
        }
    }
}
