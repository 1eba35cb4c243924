//! Stable agent identity.
//!
//! An agent id is a short hash of the agent name and the project id. The
//! project id (not the organization) is the hash input, so an agent keeps
//! its id when its project moves between organizations.

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;

use crate::CoreError;

pub const MAX_AGENT_NAME_CHARS: usize = 255;
const AGENT_ID_BYTES: usize = 8;

/// Agent configuration as supplied by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentConfig {
    pub agent_name: String,
    pub agent_display_name: Option<String>,
}

impl AgentConfig {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            agent_display_name: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.agent_display_name = Some(display_name.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAgentConfig {
    pub agent_id: String,
    pub agent_name: String,
    pub agent_display_name: Option<String>,
    pub project_id: String,
}

/// Derives the 16-hex-char agent id for `(agent_name, project_id)`.
///
/// Both inputs are trimmed. Names longer than [`MAX_AGENT_NAME_CHARS`]
/// characters are truncated before hashing, so two long names sharing that
/// prefix map to the same id.
pub fn generate_agent_id(agent_name: &str, project_id: &str) -> Result<String, CoreError> {
    let agent_name = agent_name.trim();
    let project_id = project_id.trim();
    if agent_name.is_empty() {
        return Err(CoreError::InvalidArgument(
            "agent_name must be a non-empty string".to_string(),
        ));
    }
    if project_id.is_empty() {
        return Err(CoreError::InvalidArgument(
            "project_id must be a non-empty string".to_string(),
        ));
    }

    let agent_name = truncate_agent_name(agent_name);

    let mut hasher = Blake2bVar::new(AGENT_ID_BYTES)
        .map_err(|err| CoreError::InvalidArgument(err.to_string()))?;
    hasher.update(agent_name.as_bytes());
    hasher.update(project_id.as_bytes());
    let mut digest = [0u8; AGENT_ID_BYTES];
    hasher
        .finalize_variable(&mut digest)
        .map_err(|err| CoreError::InvalidArgument(err.to_string()))?;
    Ok(hex::encode(digest))
}

fn truncate_agent_name(agent_name: &str) -> &str {
    match agent_name.char_indices().nth(MAX_AGENT_NAME_CHARS) {
        Some((cut, _)) => {
            tracing::warn!(
                length = agent_name.chars().count(),
                max = MAX_AGENT_NAME_CHARS,
                "agent name exceeds maximum length and was truncated before hashing"
            );
            &agent_name[..cut]
        }
        None => agent_name,
    }
}

/// Validates the caller's agent configuration against a known project id.
pub fn resolve_agent_config(
    config: &AgentConfig,
    project_id: &str,
) -> Result<ResolvedAgentConfig, CoreError> {
    let project_id = project_id.trim();
    if project_id.is_empty() {
        return Err(CoreError::InvalidArgument(
            "project_id is required to resolve an agent configuration".to_string(),
        ));
    }
    let agent_name = config.agent_name.trim();
    if agent_name.is_empty() {
        return Err(CoreError::InvalidArgument(
            "agent_name is required and cannot be blank".to_string(),
        ));
    }

    let agent_id = generate_agent_id(agent_name, project_id)?;
    let agent_display_name = config
        .agent_display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    Ok(ResolvedAgentConfig {
        agent_id,
        agent_name: agent_name.to_string(),
        agent_display_name,
        project_id: project_id.to_string(),
    })
}
