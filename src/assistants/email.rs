use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::agents::agent::{Agent, AgentFailure, AgentOutput, TaskPayload};
use crate::assistants::{decode_settings, EMAIL_PROCESSOR};
use crate::config::AgentDescriptor;
use crate::error::{ButlerError, Result};
use crate::tools::mail::{EmailAccount, EmailMessage, MailConnector, MailSession};

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct EmailProcessorConfig {
    #[serde(default)]
    pub email_accounts: Vec<EmailAccount>,
}

/// A session registered while it is in use, keyed by a per-connection id so
/// overlapping runs against the same account never share an entry.
struct OpenSession {
    account_id: String,
    session: Box<dyn MailSession>,
}

/// Fetches new mail from every configured account.
pub struct EmailProcessor {
    config: EmailProcessorConfig,
    connector: Arc<dyn MailConnector>,
    open_sessions: Mutex<HashMap<u64, OpenSession>>,
    next_session_id: AtomicU64,
}

impl EmailProcessor {
    pub fn from_descriptor(descriptor: &AgentDescriptor, connector: Arc<dyn MailConnector>) -> Result<Self> {
        let config: EmailProcessorConfig = decode_settings(descriptor)?;
        Ok(Self::new(config, connector))
    }

    pub fn new(config: EmailProcessorConfig, connector: Arc<dyn MailConnector>) -> Self {
        Self {
            config,
            connector,
            open_sessions: Mutex::new(HashMap::new()),
            next_session_id: AtomicU64::new(0),
        }
    }

    pub async fn open_session_count(&self) -> usize {
        self.open_sessions.lock().await.len()
    }

    /// Connect, register the session under a fresh id, and fetch. The id is
    /// returned even when the fetch fails so the caller can disconnect it.
    async fn fetch_account(
        &self,
        account_id: &str,
        account: &EmailAccount,
    ) -> (Option<u64>, Result<Vec<EmailMessage>>) {
        let session = match self.connector.connect(account).await {
            Ok(session) => session,
            Err(e) => return (None, Err(e)),
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.open_sessions.lock().await;
        sessions.insert(
            session_id,
            OpenSession {
                account_id: account_id.to_string(),
                session,
            },
        );

        let fetched = match sessions.get_mut(&session_id) {
            Some(open) => open.session.fetch(&account.mailbox, &account.criteria).await,
            None => Err(ButlerError::AgentError(format!("session for {} vanished", account_id)).into()),
        };
        (Some(session_id), fetched)
    }

    async fn disconnect(&self, session_id: u64) {
        let open = self.open_sessions.lock().await.remove(&session_id);
        if let Some(mut open) = open {
            info!("Closing connection for account: {}", open.account_id);
            if let Err(e) = open.session.disconnect().await {
                warn!("Failed to disconnect account {}: {}", open.account_id, e);
            }
        }
    }
}

#[async_trait]
impl Agent for EmailProcessor {
    fn name(&self) -> &str {
        EMAIL_PROCESSOR
    }

    async fn execute(&self, _task: &TaskPayload) -> Result<AgentOutput> {
        let mut emails: Vec<Value> = Vec::new();
        let mut failed = Vec::new();
        let mut attempted = 0;

        for account in &self.config.email_accounts {
            let Some(account_id) = account.account_id() else {
                warn!("Skipping an email account due to missing provider/address.");
                continue;
            };
            attempted += 1;

            info!("Processing emails for account: {}", account_id);
            let (session_id, fetched) = self.fetch_account(account_id, account).await;
            if let Some(session_id) = session_id {
                self.disconnect(session_id).await;
            }

            match fetched {
                Ok(messages) => {
                    info!("Found {} new emails for {}.", messages.len(), account_id);
                    for message in messages {
                        let mut entry = serde_json::to_value(&message)?;
                        if let Value::Object(fields) = &mut entry {
                            fields.insert("account".to_string(), json!(account_id));
                        }
                        emails.push(entry);
                    }
                }
                Err(e) => {
                    error!("Failed to process emails for {}: {}", account_id, e);
                    failed.push(json!({ "account": account_id, "error": e.to_string() }));
                }
            }
        }

        if attempted > 0 && failed.len() == attempted {
            return Err(ButlerError::AgentError(format!(
                "all {} email accounts failed",
                attempted
            ))
            .into());
        }

        let mut output = AgentOutput::new();
        output.insert("new_emails_count".to_string(), json!(emails.len()));
        output.insert("emails".to_string(), Value::Array(emails));
        output.insert("failed_accounts".to_string(), json!(failed));
        Ok(output)
    }

    async fn fallback_strategy(&self, _task: &TaskPayload, error: &AgentFailure) -> Result<AgentOutput> {
        warn!("Email Processor fallback due to: {}", error);

        let mut output = AgentOutput::new();
        output.insert(
            "message".to_string(),
            json!("Email processing failed for one or more accounts."),
        );
        output.insert(
            "suggestion".to_string(),
            json!("Please check the IMAP configuration and credentials for your email accounts."),
        );
        output.insert("error".to_string(), json!(error.to_string()));
        Ok(output)
    }

    async fn close_resources(&self) -> Result<()> {
        let sessions: Vec<OpenSession> = self
            .open_sessions
            .lock()
            .await
            .drain()
            .map(|(_, open)| open)
            .collect();

        for mut open in sessions {
            info!("Disconnecting email session for account: {}", open.account_id);
            if let Err(e) = open.session.disconnect().await {
                warn!("Failed to disconnect account {}: {}", open.account_id, e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::mail::{MockMailConnector, MockMailSession};

    fn account(provider: Option<&str>, address: Option<&str>) -> EmailAccount {
        serde_json::from_value(json!({
            "provider": provider,
            "email_address": address,
            "imap_server": "imap.example.com",
            "password": "secret"
        }))
        .unwrap()
    }

    fn message(subject: &str) -> EmailMessage {
        EmailMessage {
            subject: subject.to_string(),
            from: "sender@test.com".to_string(),
            body: "This is a test email.".to_string(),
        }
    }

    fn session_returning(messages: Vec<EmailMessage>) -> Box<dyn MailSession> {
        let mut session = MockMailSession::new();
        session
            .expect_fetch()
            .withf(|mailbox, criteria| mailbox == "inbox" && criteria == "UNSEEN")
            .times(1)
            .returning(move |_, _| Ok(messages.clone()));
        session.expect_disconnect().times(1).returning(|| Ok(()));
        Box::new(session)
    }

    fn failing_session() -> Box<dyn MailSession> {
        let mut session = MockMailSession::new();
        session
            .expect_fetch()
            .times(1)
            .returning(|_, _| Err(ButlerError::NetworkError("SEARCH failed".to_string()).into()));
        session.expect_disconnect().times(1).returning(|| Ok(()));
        Box::new(session)
    }

    #[tokio::test]
    async fn test_emails_are_tagged_and_sessions_closed() {
        let mut connector = MockMailConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|_| Ok(session_returning(vec![message("Test Subject")])));

        let processor = EmailProcessor::new(
            EmailProcessorConfig {
                email_accounts: vec![account(Some("mock_gmail"), Some("mock@test.com"))],
            },
            Arc::new(connector),
        );

        let output = processor.execute(&TaskPayload::new()).await.unwrap();

        assert_eq!(output["new_emails_count"], 1);
        assert_eq!(output["emails"][0]["subject"], "Test Subject");
        assert_eq!(output["emails"][0]["account"], "mock_gmail");
        assert_eq!(processor.open_session_count().await, 0);
    }

    #[tokio::test]
    async fn test_accounts_without_identity_are_skipped() {
        let mut connector = MockMailConnector::new();
        connector
            .expect_connect()
            .withf(|account| account.account_id() == Some("me@example.com"))
            .times(1)
            .returning(|_| Ok(session_returning(vec![])));

        let processor = EmailProcessor::new(
            EmailProcessorConfig {
                email_accounts: vec![account(None, None), account(None, Some("me@example.com"))],
            },
            Arc::new(connector),
        );

        let output = processor.execute(&TaskPayload::new()).await.unwrap();
        assert_eq!(output["new_emails_count"], 0);
        assert_eq!(output["failed_accounts"], json!([]));
    }

    #[tokio::test]
    async fn test_one_failing_account_does_not_fail_the_run() {
        let mut connector = MockMailConnector::new();
        connector.expect_connect().times(2).returning(|account| {
            if account.account_id() == Some("work") {
                Ok(failing_session())
            } else {
                Ok(session_returning(vec![message("Hello"), message("Again")]))
            }
        });

        let processor = EmailProcessor::new(
            EmailProcessorConfig {
                email_accounts: vec![account(Some("work"), None), account(Some("home"), None)],
            },
            Arc::new(connector),
        );

        let output = processor.execute(&TaskPayload::new()).await.unwrap();
        assert_eq!(output["new_emails_count"], 2);
        assert_eq!(output["failed_accounts"][0]["account"], "work");
        assert_eq!(processor.open_session_count().await, 0);
    }

    #[tokio::test]
    async fn test_every_account_failing_raises() {
        let mut connector = MockMailConnector::new();
        connector
            .expect_connect()
            .times(2)
            .returning(|_| Err(ButlerError::NetworkError("connection refused".to_string()).into()));

        let processor = EmailProcessor::new(
            EmailProcessorConfig {
                email_accounts: vec![account(Some("a"), None), account(Some("b"), None)],
            },
            Arc::new(connector),
        );

        let err = processor.execute(&TaskPayload::new()).await.unwrap_err();
        assert!(err.to_string().contains("all 2 email accounts failed"));

        let fallback = processor
            .fallback_strategy(&TaskPayload::new(), err.as_ref())
            .await
            .unwrap();
        assert!(fallback["suggestion"].as_str().unwrap().contains("IMAP configuration"));
    }

    /// Connector whose sessions yield mid-call and count their lifecycle.
    #[derive(Default)]
    struct CountingConnector {
        opened: Arc<std::sync::atomic::AtomicUsize>,
        disconnected: Arc<std::sync::atomic::AtomicUsize>,
    }

    struct CountingSession {
        disconnected: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl MailConnector for CountingConnector {
        async fn connect(&self, _account: &EmailAccount) -> Result<Box<dyn MailSession>> {
            tokio::task::yield_now().await;
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingSession {
                disconnected: self.disconnected.clone(),
            }))
        }
    }

    #[async_trait]
    impl MailSession for CountingSession {
        async fn fetch(&mut self, _mailbox: &str, _criteria: &str) -> Result<Vec<EmailMessage>> {
            tokio::task::yield_now().await;
            Ok(vec![message("Overlap")])
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_overlapping_runs_disconnect_every_session() {
        let connector = CountingConnector::default();
        let opened = connector.opened.clone();
        let disconnected = connector.disconnected.clone();
        let processor = EmailProcessor::new(
            EmailProcessorConfig {
                email_accounts: vec![account(Some("shared"), Some("me@example.com"))],
            },
            Arc::new(connector),
        );

        let task = TaskPayload::new();
        let (first, second) = tokio::join!(processor.execute(&task), processor.execute(&task));
        assert_eq!(first.unwrap()["new_emails_count"], 1);
        assert_eq!(second.unwrap()["new_emails_count"], 1);
        processor.close_resources().await.unwrap();

        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(disconnected.load(Ordering::SeqCst), 2);
        assert_eq!(processor.open_session_count().await, 0);
    }

    #[tokio::test]
    async fn test_close_resources_with_nothing_open() {
        let processor = EmailProcessor::new(
            EmailProcessorConfig::default(),
            Arc::new(MockMailConnector::new()),
        );
        processor.close_resources().await.unwrap();
        processor.close_resources().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_resources_disconnects_leftover_sessions() {
        let processor = EmailProcessor::new(
            EmailProcessorConfig::default(),
            Arc::new(MockMailConnector::new()),
        );

        let mut session = MockMailSession::new();
        session.expect_disconnect().times(1).returning(|| Ok(()));
        processor.open_sessions.lock().await.insert(
            7,
            OpenSession {
                account_id: "stale".to_string(),
                session: Box::new(session),
            },
        );

        processor.close_resources().await.unwrap();
        assert_eq!(processor.open_session_count().await, 0);
    }

    #[test]
    fn test_settings_decode() {
        let descriptor = AgentDescriptor::new(EMAIL_PROCESSOR).with_setting(
            "email_accounts",
            json!([{ "provider": "gmail", "email_address": "me@gmail.com", "mailbox": "work" }]),
        );
        let processor =
            EmailProcessor::from_descriptor(&descriptor, Arc::new(MockMailConnector::new())).unwrap();
        assert_eq!(processor.config.email_accounts[0].mailbox, "work");
        assert_eq!(processor.config.email_accounts[0].criteria, "UNSEEN");
    }
}
