use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

fn default_mailbox() -> String {
    "inbox".to_string()
}

fn default_criteria() -> String {
    "UNSEEN".to_string()
}

/// One `email_accounts` entry.
#[derive(Clone, Deserialize, Serialize, PartialEq)]
pub struct EmailAccount {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub imap_server: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    #[serde(default = "default_criteria")]
    pub criteria: String,
}

impl EmailAccount {
    /// Provider name, else the address. `None` when neither is set.
    pub fn account_id(&self) -> Option<&str> {
        [&self.provider, &self.email_address]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }
}

impl fmt::Debug for EmailAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailAccount")
            .field("provider", &self.provider)
            .field("imap_server", &self.imap_server)
            .field("email_address", &self.email_address)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("mailbox", &self.mailbox)
            .field("criteria", &self.criteria)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EmailMessage {
    pub subject: String,
    pub from: String,
    #[serde(default)]
    pub body: String,
}

/// Opens authenticated mailbox sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailConnector: Send + Sync {
    async fn connect(&self, account: &EmailAccount) -> Result<Box<dyn MailSession>>;
}

/// A live connection to one account.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailSession: Send + Sync {
    async fn fetch(&mut self, mailbox: &str, criteria: &str) -> Result<Vec<EmailMessage>>;

    /// Log out. Must tolerate a session that is already closed.
    async fn disconnect(&mut self) -> Result<()>;
}
