//! Built-in agents and their registration.

pub mod email;
pub mod github;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

use crate::agents::agent::Agent;
use crate::agents::registry::AgentRegistry;
use crate::config::AgentDescriptor;
use crate::error::{ButlerError, Result};
use crate::tools::MailConnector;

pub use email::{EmailProcessor, EmailProcessorConfig};
pub use github::{GithubAssistant, GithubAssistantConfig};

pub const GITHUB_ASSISTANT: &str = "github_assistant";
pub const EMAIL_PROCESSOR: &str = "email_processor";

/// Collaborators the built-in agents are constructed with.
#[derive(Clone, Default)]
pub struct BuiltinServices {
    /// Mail transport. Without one, `email_processor` cannot be loaded.
    pub mail_connector: Option<Arc<dyn MailConnector>>,
}

/// Register every built-in agent under its well-known name.
pub fn register_builtin(registry: &mut AgentRegistry, services: BuiltinServices) {
    registry.register(GITHUB_ASSISTANT, |descriptor: &AgentDescriptor| {
        let agent: Arc<dyn Agent> = Arc::new(GithubAssistant::from_descriptor(descriptor)?);
        Ok(agent)
    });

    let connector = services.mail_connector;
    registry.register(EMAIL_PROCESSOR, move |descriptor: &AgentDescriptor| {
        let connector = connector.clone().ok_or_else(|| {
            ButlerError::ConfigError("no mail transport is available".to_string())
        })?;
        let agent: Arc<dyn Agent> = Arc::new(EmailProcessor::from_descriptor(descriptor, connector)?);
        Ok(agent)
    });
}

/// Decode an agent's opaque settings into its typed configuration.
pub(crate) fn decode_settings<T: DeserializeOwned>(descriptor: &AgentDescriptor) -> Result<T> {
    serde_json::from_value(Value::Object(descriptor.settings.clone())).map_err(|e| {
        ButlerError::ConfigError(format!("invalid settings for '{}': {}", descriptor.name, e)).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtins_are_registered() {
        let mut registry = AgentRegistry::new();
        register_builtin(&mut registry, BuiltinServices::default());
        assert_eq!(
            registry.names(),
            vec![EMAIL_PROCESSOR.to_string(), GITHUB_ASSISTANT.to_string()]
        );
    }

    #[test]
    fn test_email_processor_needs_a_transport() {
        let mut registry = AgentRegistry::new();
        register_builtin(&mut registry, BuiltinServices::default());

        let outcome = registry.load(&[
            AgentDescriptor::new(EMAIL_PROCESSOR).with_setting("email_accounts", json!([])),
            AgentDescriptor::new(GITHUB_ASSISTANT)
                .with_setting("github_token", json!("ghp_example"))
                .with_setting("repositories", json!(["octocat/Hello-World"])),
        ]);

        assert_eq!(outcome.loaded_names(), vec![GITHUB_ASSISTANT.to_string()]);
        assert_eq!(outcome.failures[0].agent, EMAIL_PROCESSOR);
        assert!(outcome.failures[0].reason.contains("mail transport"));
    }

    #[test]
    fn test_starter_github_entry_fails_to_load() {
        let mut registry = AgentRegistry::new();
        register_builtin(&mut registry, BuiltinServices::default());

        let starter = crate::config::Config::starter();
        let mut github = starter.agent(GITHUB_ASSISTANT).unwrap().clone();
        github.enabled = true;

        let outcome = registry.load(&[github]);
        assert!(outcome.agents.is_empty());
        assert!(outcome.failures[0].reason.contains("GitHub token is required"));
    }
}
