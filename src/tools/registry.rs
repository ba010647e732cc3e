//! Name-keyed catalogue of local and remote tools.
//!
//! Local tools carry a handler and run inside the loop. Remote tools are
//! definitions only: the loop hands their invocations back to the caller.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use super::arguments::ToolArguments;
use super::tool::{AgentTool, Tool, ToolExecutionContext};
use super::types::{ExecutionMode, ToolClass, ToolDefinition, ToolParameters};
use super::validation::validate_arguments;
use crate::error::{EngineError, Result};
use crate::types::message::ToolCall;

/// One registered tool.
#[derive(Clone)]
pub struct ToolEntry {
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
    pub mode: ExecutionMode,
    handler: Option<Arc<dyn Tool>>,
}

impl ToolEntry {
    pub fn handler(&self) -> Option<&Arc<dyn Tool>> {
        self.handler.as_ref()
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.schema.clone(),
        }
    }
}

impl std::fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEntry")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

/// Registration-ordered tool catalogue.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    entries: Vec<ToolEntry>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local tool from a closure. Replaces any entry with the same name.
    pub fn register_local<F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) where
        F: Fn(ToolArguments, ToolExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register_tool(Arc::new(AgentTool::new(
            name,
            description,
            parameters,
            handler,
        )));
    }

    /// Register a local tool implementation. Replaces any entry with the same name.
    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) {
        self.upsert(ToolEntry {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters().clone(),
            mode: ExecutionMode::Local,
            handler: Some(tool),
        });
    }

    /// Register a remote tool. Replaces any entry with the same name.
    pub fn register_remote(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
    ) {
        self.upsert(ToolEntry {
            name: name.into(),
            description: description.into(),
            parameters,
            mode: ExecutionMode::Remote,
            handler: None,
        });
    }

    /// Register a batch of caller-supplied remote definitions.
    ///
    /// A definition never displaces a local tool of the same name; an older
    /// remote definition is replaced. Returns how many definitions were taken.
    pub fn merge_remote(&mut self, definitions: impl IntoIterator<Item = ToolDefinition>) -> usize {
        let mut merged = 0;
        for def in definitions {
            if self.classify(&def.name) == ToolClass::Local {
                tracing::warn!(tool = %def.name, "remote tool definition ignored: a local tool has that name");
                continue;
            }
            self.register_remote(def.name, def.description, ToolParameters::from_schema(def.parameters));
            merged += 1;
        }
        merged
    }

    pub fn classify(&self, name: &str) -> ToolClass {
        self.get(name)
            .map(|entry| ToolClass::from(entry.mode))
            .unwrap_or(ToolClass::Unknown)
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.index.get(name).map(|&idx| &self.entries[idx])
    }

    /// Run a local tool by name outside of any turn.
    pub async fn dispatch(&self, name: &str, input: Value) -> Result<Value> {
        let ctx = ToolExecutionContext {
            tool_name: name.to_string(),
            ..Default::default()
        };
        self.execute(name, input, &ctx).await
    }

    /// Run the local tool a backend invocation names.
    pub async fn dispatch_call(&self, call: &ToolCall, turn: usize) -> Result<Value> {
        let ctx = ToolExecutionContext {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            turn,
        };
        self.execute(&call.name, call.arguments.clone(), &ctx).await
    }

    async fn execute(&self, name: &str, input: Value, ctx: &ToolExecutionContext) -> Result<Value> {
        let entry = self
            .get(name)
            .ok_or_else(|| EngineError::UnknownTool(name.to_string()))?;
        let handler = match (entry.mode, &entry.handler) {
            (ExecutionMode::Local, Some(handler)) => handler,
            _ => return Err(EngineError::NotLocal(name.to_string())),
        };
        let args = ToolArguments::new(input);
        validate_arguments(args.raw(), &entry.parameters.schema)?;
        handler.execute(&args, ctx).await
    }

    /// Definitions for every tool, in registration order.
    pub fn all_definitions(&self) -> Vec<ToolDefinition> {
        self.entries.iter().map(ToolEntry::definition).collect()
    }

    pub fn has_any(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn upsert(&mut self, entry: ToolEntry) {
        match self.index.get(&entry.name) {
            Some(&idx) => self.entries[idx] = entry,
            None => {
                self.index.insert(entry.name.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }
}
