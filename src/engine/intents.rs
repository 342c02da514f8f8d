//! Intent operations. Every change is persisted with the store document.

use super::TaskEngine;
use super::mirror::read_mirror;
use crate::error::{EngineError, EngineResult};
use crate::sync::{Intent, IntentAnalytics, IntentStatus, NewIntent, SyncState, ToolExecution};

impl TaskEngine {
    pub async fn create_intent(&self, input: NewIntent) -> EngineResult<Intent> {
        self.update_sync(move |sync| sync.create_intent(input)).await
    }

    pub fn get_intent(&self, intent_id: &str) -> EngineResult<Intent> {
        self.shared.coordinator().get_intent(intent_id).cloned()
    }

    pub fn intents(&self) -> Vec<Intent> {
        self.shared.coordinator().intents().to_vec()
    }

    /// Intents whose tool chain created or modified the task.
    pub fn intents_touching(&self, task_id: &str) -> Vec<Intent> {
        self.shared
            .coordinator()
            .intents_touching(task_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Record a tool execution performed outside the engine. The current
    /// mirror content, when a mirror is configured, is stored with it.
    pub async fn record_tool_execution(
        &self,
        intent_id: &str,
        execution: ToolExecution,
    ) -> EngineResult<Intent> {
        let snapshot = match &self.shared.config.store.mirror_path {
            Some(path) => Some(read_mirror(path).await?),
            None => None,
        };
        let intent_id = intent_id.to_string();
        self.update_sync(move |sync| sync.add_tool_execution(&intent_id, execution, snapshot))
            .await
    }

    /// Move a planning intent to executing. Terminal intents are rejected.
    pub async fn advance_intent(&self, intent_id: &str) -> EngineResult<Intent> {
        let intent_id = intent_id.to_string();
        self.update_sync(move |sync| {
            let current = sync.get_intent(&intent_id)?.current_status;
            if current.is_terminal() {
                return Err(EngineError::invalid_state(format!(
                    "Intent {} is already {}",
                    intent_id, current
                )));
            }
            sync.update_intent_status(&intent_id, IntentStatus::Executing)
        })
        .await
    }

    pub async fn complete_intent(&self, intent_id: &str) -> EngineResult<Intent> {
        self.update_intent_status(intent_id, IntentStatus::Completed)
            .await
    }

    pub async fn update_intent_status(
        &self,
        intent_id: &str,
        status: IntentStatus,
    ) -> EngineResult<Intent> {
        let intent_id = intent_id.to_string();
        self.update_sync(move |sync| sync.update_intent_status(&intent_id, status))
            .await
    }

    pub fn intent_analytics(&self) -> IntentAnalytics {
        self.shared.coordinator().analytics()
    }

    pub fn sync_state(&self) -> SyncState {
        self.shared.coordinator().sync_state().clone()
    }
}
