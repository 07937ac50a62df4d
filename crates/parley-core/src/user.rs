//! User records and the user directory.
//!
//! A [`User`] is valid when its name is 1 to 30 characters, its ID is a
//! positive integer and its email looks like an address.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Maximum user name length in characters.
pub const MAX_NAME_LENGTH: usize = 30;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .unwrap_or_else(|e| panic!("invalid email pattern: {e}"))
});

/// User validation and directory errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserError {
    /// Name is empty or too long.
    #[error("Invalid name: must be between 1 and {MAX_NAME_LENGTH} characters")]
    InvalidName,

    /// ID is not a positive integer.
    #[error("Invalid ID: must be a positive integer")]
    InvalidId,

    /// Email is malformed.
    #[error("Invalid email format")]
    InvalidEmail,

    /// A user with this ID already exists.
    #[error("User already exists: {0}")]
    DuplicateId(String),

    /// No user with this ID.
    #[error("User not found: {0}")]
    NotFound(String),

    /// The directory no longer accepts new users.
    #[error("User directory is shutting down")]
    ShuttingDown,
}

/// A chat user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
}

impl User {
    /// Create a new user record.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
        }
    }

    /// Validate the record.
    ///
    /// # Errors
    ///
    /// Returns the first failing check: name, then ID, then email.
    pub fn validate(&self) -> Result<(), UserError> {
        if !is_valid_name(&self.name) {
            return Err(UserError::InvalidName);
        }
        if !is_valid_id(&self.id) {
            return Err(UserError::InvalidId);
        }
        if !is_valid_email(&self.email) {
            return Err(UserError::InvalidEmail);
        }
        Ok(())
    }
}

/// Check that a name is between 1 and [`MAX_NAME_LENGTH`] characters.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    let len = name.chars().count();
    (1..=MAX_NAME_LENGTH).contains(&len)
}

/// Check that an ID is a positive integer.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    id.parse::<u64>().map(|n| n > 0).unwrap_or(false)
}

/// Check that an email address is well formed.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

/// Concurrent directory of users keyed by ID.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: DashMap<String, User>,
    shutdown: Option<CancellationToken>,
}

impl UserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory that stops accepting users once `shutdown` fires.
    #[must_use]
    pub fn with_shutdown(shutdown: CancellationToken) -> Self {
        Self {
            users: DashMap::new(),
            shutdown: Some(shutdown),
        }
    }

    /// Add a user.
    ///
    /// # Errors
    ///
    /// Returns a validation error, [`UserError::DuplicateId`] if the ID is
    /// taken, or [`UserError::ShuttingDown`] after shutdown.
    pub fn add(&self, user: User) -> Result<(), UserError> {
        if self.shutdown.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(UserError::ShuttingDown);
        }

        user.validate()?;

        match self.users.entry(user.id.clone()) {
            Entry::Occupied(_) => Err(UserError::DuplicateId(user.id)),
            Entry::Vacant(slot) => {
                debug!(user = %user.id, "User added");
                slot.insert(user);
                Ok(())
            }
        }
    }

    /// Remove a user, returning the removed record.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::NotFound`] if the ID is unknown.
    pub fn remove(&self, id: &str) -> Result<User, UserError> {
        let (_, user) = self
            .users
            .remove(id)
            .ok_or_else(|| UserError::NotFound(id.to_string()))?;
        debug!(user = %id, "User removed");
        Ok(user)
    }

    /// Get a user by ID.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::NotFound`] if the ID is unknown.
    pub fn get(&self, id: &str) -> Result<User, UserError> {
        self.users
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| UserError::NotFound(id.to_string()))
    }

    /// Number of users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Check if the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
