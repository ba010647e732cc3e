//! Request-scoped agent turn loop.
//!
//! Drives multi-turn interaction between a language-model backend and a set of
//! tools. The engine owns no storage, billing or transport: callers load
//! history into a [`ConversationState`](agent::ConversationState), run a
//! [`TurnLoop`](agent_loop::TurnLoop) once per request, then persist the
//! returned events and the mutated history.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use turn_engine::prelude::*;
//!
//! # async fn example(backend: Arc<dyn Backend>) -> turn_engine::error::Result<()> {
//! let config = EngineConfig::load()?;
//! let mut registry = ToolRegistry::new();
//! registry.register_local("clock", "Current time", ToolParameters::empty(), |_args, _ctx| async {
//!     Ok(serde_json::json!({ "now": chrono::Utc::now().to_rfc3339() }))
//! });
//!
//! let mut state = ConversationState::from_history(&config, None, vec![AgentMessage::user("What time is it?")])?;
//! let turn_loop = TurnLoop::new(Arc::new(registry), static_resolver(backend));
//! let result = turn_loop.run(&mut state, &CancellationToken::new()).await;
//! println!("{:?}: {}", result.status, result.final_text);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod agent_loop;
pub mod config;
pub mod error;
pub mod prelude;
pub mod provider;
pub mod tools;
pub mod types;
