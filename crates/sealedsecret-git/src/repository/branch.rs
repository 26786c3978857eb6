//! Branch name type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A validated local branch name (e.g. `sealed-secrets/update`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BranchName(String);

impl BranchName {
    /// Parses and validates a branch name.
    ///
    /// A leading `refs/heads/` is stripped.
    pub fn new(name: impl Into<String>) -> Result<Self, &'static str> {
        let name = name.into();
        let name = name
            .trim()
            .strip_prefix("refs/heads/")
            .unwrap_or(name.trim())
            .to_string();
        validate(&name)?;
        Ok(Self(name))
    }

    /// Returns the short branch name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the full local reference (`refs/heads/<name>`).
    pub fn full_ref(&self) -> String {
        format!("refs/heads/{}", self.0)
    }

    /// Returns the remote-tracking reference (`refs/remotes/<remote>/<name>`).
    pub fn remote_ref(&self, remote: &str) -> String {
        format!("refs/remotes/{}/{}", remote, self.0)
    }

    /// Returns the push refspec for this branch, forced when `force` is set.
    pub fn push_refspec(&self, force: bool) -> String {
        let full = self.full_ref();
        if force {
            format!("+{}:{}", full, full)
        } else {
            format!("{}:{}", full, full)
        }
    }
}

fn validate(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("branch name cannot be empty");
    }

    if name.starts_with('/') || name.ends_with('/') {
        return Err("branch name cannot start or end with '/'");
    }

    if name.starts_with('-') {
        return Err("branch name cannot start with '-'");
    }

    if name.contains("..") {
        return Err("branch name cannot contain '..'");
    }

    if name.contains("//") {
        return Err("branch name cannot contain '//'");
    }

    if name.contains("@{") {
        return Err("branch name cannot contain '@{'");
    }

    if name.ends_with('.') || name.ends_with(".lock") {
        return Err("branch name cannot end with '.' or '.lock'");
    }

    for c in name.chars() {
        if c.is_control()
            || c.is_whitespace()
            || matches!(c, '~' | '^' | ':' | '?' | '*' | '[' | '\\')
        {
            return Err("branch name contains invalid characters");
        }
    }

    Ok(())
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for BranchName {
    type Error = &'static str;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<&str> for BranchName {
    type Error = &'static str;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<BranchName> for String {
    fn from(branch: BranchName) -> Self {
        branch.0
    }
}
