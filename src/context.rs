//! Shared application context.
//!
//! One `AppContext` is constructed at startup and passed by `Arc` to the
//! dispatcher, the server manager, and the transports. It replaces hidden
//! process-wide singletons so tests can assemble a context with fakes.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::registry::ToolRegistry;
use crate::session::{Presenter, SessionCoordinator};

/// Result of a prompt-optimization request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimized_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OptimizeOutcome {
    pub fn not_configured() -> Self {
        Self {
            success: false,
            optimized_prompt: None,
            error: Some("prompt optimizer is not configured".to_string()),
        }
    }
}

/// Result of an input-fill request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FillOutcome {
    pub fn not_configured() -> Self {
        Self {
            success: false,
            error: Some("input filler is not configured".to_string()),
        }
    }
}

/// Host collaborator that rewrites draft prompts. May be absent.
#[async_trait::async_trait]
pub trait PromptOptimizer: Send + Sync {
    async fn optimize(&self, text: &str) -> OptimizeOutcome;
}

/// Host collaborator that places text in the editor's input box. May be absent.
#[async_trait::async_trait]
pub trait InputFiller: Send + Sync {
    async fn fill(&self, content: &str) -> FillOutcome;
}

/// Everything the protocol layer needs, wired once at startup.
pub struct AppContext {
    pub registry: ToolRegistry,
    pub sessions: SessionCoordinator,
    optimizer: RwLock<Option<Arc<dyn PromptOptimizer>>>,
    filler: RwLock<Option<Arc<dyn InputFiller>>>,
}

impl AppContext {
    pub fn new(rotate_tool_names: bool, session_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            registry: ToolRegistry::new(rotate_tool_names),
            sessions: SessionCoordinator::new(session_timeout),
            optimizer: RwLock::new(None),
            filler: RwLock::new(None),
        })
    }

    pub fn set_presenter(&self, presenter: Arc<dyn Presenter>) {
        self.sessions.set_presenter(presenter);
    }

    pub fn set_optimizer(&self, optimizer: Arc<dyn PromptOptimizer>) {
        *self.optimizer.write() = Some(optimizer);
    }

    pub fn optimizer(&self) -> Option<Arc<dyn PromptOptimizer>> {
        self.optimizer.read().clone()
    }

    pub fn set_filler(&self, filler: Arc<dyn InputFiller>) {
        *self.filler.write() = Some(filler);
    }

    pub fn filler(&self) -> Option<Arc<dyn InputFiller>> {
        self.filler.read().clone()
    }
}
