// src/identity.rs

use serde::{Deserialize, Serialize};

/// Caller identity: the company whose data is visible plus the acting user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub company: String,
    pub user: String,
}

impl Identity {
    pub fn new(company: impl Into<String>, user: impl Into<String>) -> Self {
        Identity {
            company: company.into(),
            user: user.into(),
        }
    }
}
