//! The tool registry: tool name → typed descriptor + compiled argument schema.
//!
//! Every advertisement is validated when it is registered, never at call
//! time. A server's tools are replaced as a unit on each handshake, so a
//! lookup always sees either the old set or the new one.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Arc, PoisonError, RwLock},
};

use tracing::{debug, info};

use conduit_contracts::{
    error::{ConduitError, ConduitResult},
    tool::{ServerId, ToolAdvert, ToolDescriptor},
};

/// A registered tool: its descriptor plus the compiled argument validator.
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    validator: jsonschema::Validator,
}

impl RegisteredTool {
    /// Check `arguments` against the tool's parameter schema.
    ///
    /// Returns every violation, joined, so the caller sees the full picture.
    pub fn validate_arguments(&self, arguments: &serde_json::Value) -> Result<(), String> {
        let failures: Vec<String> = self
            .validator
            .iter_errors(arguments)
            .map(|e| format!("{} at '{}'", e, e.instance_path))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        }
    }
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool").field("descriptor", &self.descriptor).finish()
    }
}

#[derive(Default)]
struct RegistryState {
    tools: HashMap<String, Arc<RegisteredTool>>,
    by_server: HashMap<ServerId, Vec<String>>,
}

/// Closed, data-driven mapping from tool name to its owning server.
#[derive(Default)]
pub struct ToolRegistry {
    state: RwLock<RegistryState>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every tool owned by `server_id` with `adverts`.
    ///
    /// The whole batch is validated first; on any error nothing changes.
    /// Rejected when a name is empty, appears twice in the batch, is already
    /// owned by another server, or carries a schema that does not compile.
    pub fn register_server(&self, server_id: &ServerId, adverts: Vec<ToolAdvert>) -> ConduitResult<usize> {
        let mut compiled = Vec::with_capacity(adverts.len());
        let mut seen = HashSet::new();

        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            for advert in adverts {
                if advert.name.trim().is_empty() {
                    return Err(ConduitError::Registry {
                        reason: format!("server '{server_id}' advertised a tool with an empty name"),
                    });
                }
                if !seen.insert(advert.name.clone()) {
                    return Err(ConduitError::Registry {
                        reason: format!("server '{server_id}' advertised '{}' twice", advert.name),
                    });
                }
                if let Some(existing) = state.tools.get(&advert.name) {
                    if &existing.descriptor.server_id != server_id {
                        return Err(ConduitError::Registry {
                            reason: format!(
                                "tool '{}' from '{server_id}' is already owned by '{}'",
                                advert.name, existing.descriptor.server_id
                            ),
                        });
                    }
                }
                let validator = jsonschema::validator_for(&advert.schema).map_err(|e| {
                    ConduitError::Registry {
                        reason: format!("tool '{}' has an invalid schema: {e}", advert.name),
                    }
                })?;
                compiled.push(RegisteredTool {
                    descriptor: ToolDescriptor::from_advert(server_id.clone(), advert),
                    validator,
                });
            }
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        // Re-check ownership under the write lock; another server may have
        // registered one of these names since the read above.
        for tool in &compiled {
            if let Some(existing) = state.tools.get(&tool.descriptor.name) {
                if &existing.descriptor.server_id != server_id {
                    return Err(ConduitError::Registry {
                        reason: format!(
                            "tool '{}' from '{server_id}' is already owned by '{}'",
                            tool.descriptor.name, existing.descriptor.server_id
                        ),
                    });
                }
            }
        }

        if let Some(previous) = state.by_server.remove(server_id) {
            for name in previous {
                state.tools.remove(&name);
            }
        }

        let count = compiled.len();
        let names: Vec<String> = compiled.iter().map(|t| t.descriptor.name.clone()).collect();
        for tool in compiled {
            debug!(server_id = %server_id, tool = %tool.descriptor.name, "tool registered");
            state.tools.insert(tool.descriptor.name.clone(), Arc::new(tool));
        }
        state.by_server.insert(server_id.clone(), names);

        info!(server_id = %server_id, tool_count = count, "server tool set registered");
        Ok(count)
    }

    /// Drop every tool owned by `server_id`.
    pub fn unregister_server(&self, server_id: &ServerId) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(names) = state.by_server.remove(server_id) {
            for name in &names {
                state.tools.remove(name);
            }
            info!(server_id = %server_id, tool_count = names.len(), "server tool set removed");
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.tools.get(name).cloned()
    }

    /// Every registered descriptor, sorted by tool name.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<ToolDescriptor> = state.tools.values().map(|t| t.descriptor.clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Descriptors owned by one server, sorted by tool name.
    pub fn tools_for(&self, server_id: &ServerId) -> Vec<ToolDescriptor> {
        self.descriptors()
            .into_iter()
            .filter(|d| &d.server_id == server_id)
            .collect()
    }
}
