//! External collaborators used by the built-in agents.

pub mod github;
pub mod mail;

pub use github::{GitHubApi, GitHubClient};
pub use mail::{EmailAccount, EmailMessage, MailConnector, MailSession};
