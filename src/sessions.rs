// src/sessions.rs
use crate::errors::LumenError;
use crate::models::SessionSettings;
use crate::pipeline::{GenerationStateMachine, Pipeline};
use log::info;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Live sessions by id. Sessions are kept in memory only.
pub struct SessionRegistry {
    pipeline: Arc<Pipeline>,
    sessions: RwLock<HashMap<Uuid, Arc<GenerationStateMachine>>>,
}

impl SessionRegistry {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn create(&self, settings: SessionSettings) -> Result<Arc<GenerationStateMachine>, LumenError> {
        settings.validate()?;
        let machine = Arc::new(GenerationStateMachine::new(self.pipeline.clone(), settings));
        let id = machine.id();
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, machine.clone());
        info!("Created session {}", id);
        Ok(machine)
    }

    pub fn get(&self, id: &Uuid) -> Result<Arc<GenerationStateMachine>, LumenError> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| LumenError::NotFound(format!("session {}", id)))
    }

    /// Drops the session and its images. An operation still running keeps
    /// its own handle and finishes unobserved.
    pub fn remove(&self, id: &Uuid) -> Result<(), LumenError> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .map(|_| info!("Removed session {}", id))
            .ok_or_else(|| LumenError::NotFound(format!("session {}", id)))
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
