use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracelane_core::{resolve_agent_config, AgentConfig, ResolvedAgentConfig};

use crate::{TracelaneClient, TracelaneError};

/// Progress of the one-shot agent resolution.
///
/// Transitions only forward: `Resolving` settles into `Resolved` or
/// `Failed` exactly once and is never retried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentState {
    Uninitialized,
    Resolving,
    Resolved(Arc<ResolvedAgentConfig>),
    Failed,
}

impl AgentState {
    pub fn is_settled(&self) -> bool {
        !matches!(self, AgentState::Resolving)
    }
}

pub struct AgentResolver {
    state: watch::Receiver<AgentState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AgentResolver {
    /// A resolver for processors configured without an agent.
    pub fn disabled() -> Self {
        let (_tx, rx) = watch::channel(AgentState::Uninitialized);
        Self {
            state: rx,
            task: Mutex::new(None),
        }
    }

    /// Starts resolving in the background. Uses `project_id` when given,
    /// otherwise the first project visible to the client's credentials.
    pub fn start(
        config: AgentConfig,
        project_id: Option<String>,
        client: TracelaneClient,
    ) -> Self {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!(
                agent_name = %config.agent_name,
                "no tokio runtime available; agent attributes are disabled"
            );
            let (_tx, rx) = watch::channel(AgentState::Failed);
            return Self {
                state: rx,
                task: Mutex::new(None),
            };
        };

        let (tx, rx) = watch::channel(AgentState::Resolving);
        let task = handle.spawn(async move {
            let state = match resolve(&config, project_id, &client).await {
                Ok(resolved) => {
                    tracing::info!(
                        agent_id = %resolved.agent_id,
                        agent_name = %resolved.agent_name,
                        project_id = %resolved.project_id,
                        "agent identity resolved"
                    );
                    AgentState::Resolved(Arc::new(resolved))
                }
                Err(err) => {
                    tracing::error!(
                        agent_name = %config.agent_name,
                        error = %err,
                        "agent resolution failed; spans will not carry agent attributes"
                    );
                    AgentState::Failed
                }
            };
            let _ = tx.send(state);
        });

        Self {
            state: rx,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn state(&self) -> AgentState {
        self.state.borrow().clone()
    }

    pub fn resolved(&self) -> Option<Arc<ResolvedAgentConfig>> {
        match &*self.state.borrow() {
            AgentState::Resolved(resolved) => Some(resolved.clone()),
            _ => None,
        }
    }

    /// Waits until resolution has settled and returns the final state.
    pub async fn wait_settled(&self) -> AgentState {
        let mut rx = self.state.clone();
        let settled = match rx.wait_for(AgentState::is_settled).await {
            Ok(state) => state.clone(),
            // The resolving task is gone without reporting.
            Err(_) => match self.state() {
                AgentState::Resolving => AgentState::Failed,
                other => other,
            },
        };
        settled
    }

    pub(crate) fn abort(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

async fn resolve(
    config: &AgentConfig,
    project_id: Option<String>,
    client: &TracelaneClient,
) -> Result<ResolvedAgentConfig, TracelaneError> {
    let project_id = match project_id {
        Some(project_id) => project_id,
        None => client
            .get_projects()
            .await?
            .data
            .into_iter()
            .next()
            .map(|project| project.id)
            .ok_or_else(|| {
                TracelaneError::Malformed("no project associated with credentials".to_string())
            })?,
    };
    Ok(resolve_agent_config(config, &project_id)?)
}
