//! Process-local session store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use studyforge_shared::{Result, SessionId, SessionState, StudyForgeError};

use crate::SessionStore;

/// Sessions held in a map for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, SessionState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &SessionId) -> Result<Option<SessionState>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn create(&self) -> Result<SessionId> {
        let id = SessionId::new();
        self.sessions
            .write()
            .await
            .insert(id.clone(), SessionState::new());
        Ok(id)
    }

    async fn save(&self, id: &SessionId, state: &SessionState) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(slot) => {
                *slot = state.clone();
                Ok(())
            }
            None => Err(StudyForgeError::SessionNotFound(id.to_string())),
        }
    }

    async fn delete(&self, id: &SessionId) -> Result<bool> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.sessions.read().await.len())
    }
}
