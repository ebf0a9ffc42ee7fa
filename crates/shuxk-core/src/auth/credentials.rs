use std::fmt;

use anyhow::{Context, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SERVICE_NAME: &str = "shuxk";

/// Student ids are exactly this many digits.
pub const STUDENT_ID_LEN: usize = 8;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CredentialError {
    #[error("student id must be {STUDENT_ID_LEN} digits, got {0:?}")]
    InvalidStudentId(String),
}

/// Student id and password. Validated on construction and never mutated.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCredential", into = "RawCredential")]
pub struct Credential {
    student_id: String,
    password: String,
}

#[derive(Serialize, Deserialize)]
struct RawCredential {
    student_id: String,
    password: String,
}

impl TryFrom<RawCredential> for Credential {
    type Error = CredentialError;

    fn try_from(raw: RawCredential) -> Result<Self, Self::Error> {
        Credential::new(raw.student_id, raw.password)
    }
}

impl From<Credential> for RawCredential {
    fn from(c: Credential) -> Self {
        RawCredential {
            student_id: c.student_id,
            password: c.password,
        }
    }
}

impl Credential {
    pub fn new(
        student_id: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let student_id = student_id.into();
        validate_student_id(&student_id)?;
        Ok(Self {
            student_id,
            password: password.into(),
        })
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("student_id", &self.student_id)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub fn validate_student_id(student_id: &str) -> Result<(), CredentialError> {
    if student_id.len() == STUDENT_ID_LEN && student_id.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(CredentialError::InvalidStudentId(student_id.to_string()))
    }
}

/// OS keychain cache for passwords, keyed by student id.
pub struct CredentialStore;

impl CredentialStore {
    /// Store a password in the OS keychain
    pub fn store(student_id: &str, password: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, student_id)
            .context("Failed to create keyring entry")?;
        entry
            .set_password(password)
            .context("Failed to store password in keychain")?;
        Ok(())
    }

    /// Retrieve the password for a student id from the OS keychain
    pub fn get_password(student_id: &str) -> Result<String> {
        let entry = Entry::new(SERVICE_NAME, student_id)
            .context("Failed to create keyring entry")?;
        entry
            .get_password()
            .context("Failed to retrieve password from keychain")
    }

    /// Delete the stored password for a student id
    pub fn delete(student_id: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, student_id)
            .context("Failed to create keyring entry")?;
        entry
            .delete_credential()
            .context("Failed to delete credential from keychain")?;
        Ok(())
    }
}
