//! Tool surface exposed to the main model
//!
//! A tool is a name, a JSON-schema input descriptor, and a handler. The
//! model may call any tool zero or more times per turn; handler failures
//! become textual payloads back to the model and never terminate the
//! session.

pub mod domain;
mod memory;

use std::sync::Arc;

use crate::memory::MemoryHandle;
use crate::Result;

pub use domain::{DomainLookup, HttpDomainGateway};

/// Registry of callable tools, bound to the memory engine and the optional
/// domain adapter
pub struct ToolRegistry {
    memory: MemoryHandle,
    domain: Option<Arc<dyn DomainLookup>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new(memory: MemoryHandle, domain: Option<Arc<dyn DomainLookup>>) -> Self {
        Self { memory, domain }
    }

    /// Tool descriptors in the shape the chat endpoint expects
    #[must_use]
    pub fn descriptors(&self) -> serde_json::Value {
        serde_json::json!([
            {
                "type": "function",
                "function": {
                    "name": "search_memory",
                    "description": "Search remembered entities by name or observation content.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "query": {"type": "string", "description": "Case-insensitive substring to look for"},
                            "limit": {"type": "integer", "description": "Maximum entities to return", "default": 10}
                        },
                        "required": ["query"]
                    }
                }
            },
            {
                "type": "function",
                "function": {
                    "name": "remember",
                    "description": "Create or update an entity in memory with optional observations.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "name": {"type": "string"},
                            "type": {
                                "type": "string",
                                "enum": ["person", "organization", "fleet", "ship", "location", "concept", "event", "preference"]
                            },
                            "observations": {"type": "array", "items": {"type": "string"}},
                            "is_user_edit": {"type": "boolean", "default": false}
                        },
                        "required": ["name", "type"]
                    }
                }
            },
            {
                "type": "function",
                "function": {
                    "name": "add_observation",
                    "description": "Append facts to an existing entity. Duplicates are ignored.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "entity_name": {"type": "string"},
                            "facts": {"type": "array", "items": {"type": "string"}},
                            "is_user_edit": {"type": "boolean", "default": false}
                        },
                        "required": ["entity_name", "facts"]
                    }
                }
            },
            {
                "type": "function",
                "function": {
                    "name": "create_relation",
                    "description": "Record a directed relation between two known entities, phrased in active voice (e.g. 'commands', 'docked_at').",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "from": {"type": "string"},
                            "to": {"type": "string"},
                            "type": {"type": "string"}
                        },
                        "required": ["from", "to", "type"]
                    }
                }
            },
            {
                "type": "function",
                "function": {
                    "name": "delete_entity",
                    "description": "Forget an entity and everything attached to it.",
                    "parameters": {
                        "type": "object",
                        "properties": {"name": {"type": "string"}},
                        "required": ["name"]
                    }
                }
            },
            {
                "type": "function",
                "function": {
                    "name": "open_nodes",
                    "description": "Fetch specific entities by name along with the relations touching them.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "names": {"type": "array", "items": {"type": "string"}}
                        },
                        "required": ["names"]
                    }
                }
            },
            {
                "type": "function",
                "function": {
                    "name": "clear_conversation",
                    "description": "Erase the recent conversation history for this user. Long-term memory is kept.",
                    "parameters": {"type": "object", "properties": {}}
                }
            },
            {
                "type": "function",
                "function": {
                    "name": "get_memory_summary",
                    "description": "Get a prose summary of everything known about the user.",
                    "parameters": {"type": "object", "properties": {}}
                }
            },
            {
                "type": "function",
                "function": {
                    "name": "get_recent_conversation",
                    "description": "Get the most recent conversation turns.",
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "limit": {"type": "integer", "default": 10}
                        }
                    }
                }
            },
            {
                "type": "function",
                "function": {
                    "name": "get_wallet_balance",
                    "description": "Look up the user's current wallet balance.",
                    "parameters": {"type": "object", "properties": {}}
                }
            },
            {
                "type": "function",
                "function": {
                    "name": "get_fleet_status",
                    "description": "Look up the current status of the user's fleet.",
                    "parameters": {"type": "object", "properties": {}}
                }
            }
        ])
    }

    /// Execute a tool by name with raw JSON arguments, on behalf of a user.
    ///
    /// # Errors
    ///
    /// Returns error on unknown tools, malformed arguments, or handler
    /// failure; the caller converts errors to textual payloads for the
    /// model.
    pub async fn execute(&self, user_id: &str, name: &str, arguments: &str) -> Result<String> {
        tracing::debug!(tool = name, user_id, "executing tool");

        match name {
            "search_memory" => memory::search_memory(&self.memory, user_id, arguments).await,
            "remember" => memory::remember(&self.memory, user_id, arguments).await,
            "add_observation" => memory::add_observation(&self.memory, user_id, arguments).await,
            "create_relation" => memory::create_relation(&self.memory, user_id, arguments).await,
            "delete_entity" => memory::delete_entity(&self.memory, user_id, arguments).await,
            "open_nodes" => memory::open_nodes(&self.memory, user_id, arguments).await,
            "clear_conversation" => memory::clear_conversation(&self.memory, user_id).await,
            "get_memory_summary" => memory::get_memory_summary(&self.memory, user_id).await,
            "get_recent_conversation" => {
                memory::get_recent_conversation(&self.memory, user_id, arguments).await
            }
            "get_wallet_balance" => match &self.domain {
                Some(domain) => domain.wallet_balance(user_id).await,
                None => Ok("Wallet lookups are not available right now.".to_string()),
            },
            "get_fleet_status" => match &self.domain {
                Some(domain) => domain.fleet_status(user_id).await,
                None => Ok("Fleet lookups are not available right now.".to_string()),
            },
            other => Err(crate::Error::Model(format!("unknown tool: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory;

    fn registry() -> ToolRegistry {
        let handle = memory::MemoryHandle::new(memory::init_memory().unwrap(), 48);
        ToolRegistry::new(handle, None)
    }

    #[tokio::test]
    async fn remember_then_search_roundtrip() {
        let registry = registry();

        let out = registry
            .execute(
                "alice",
                "remember",
                r#"{"name":"The Armada","type":"fleet","observations":["has 4 ships"]}"#,
            )
            .await
            .unwrap();
        assert!(out.contains("The Armada"));

        let found = registry
            .execute("alice", "search_memory", r#"{"query":"armada"}"#)
            .await
            .unwrap();
        assert!(found.contains("The Armada"));
        assert!(found.contains("has 4 ships"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let registry = registry();
        let err = registry.execute("alice", "teleport", "{}").await.unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }

    #[tokio::test]
    async fn domain_tools_degrade_without_endpoint() {
        let registry = registry();
        let out = registry.execute("alice", "get_wallet_balance", "{}").await.unwrap();
        assert!(out.contains("not available"));
    }

    #[test]
    fn descriptors_cover_the_tool_set() {
        let registry = registry();
        let descriptors = registry.descriptors();
        let names: Vec<&str> = descriptors
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["function"]["name"].as_str().unwrap())
            .collect();

        for expected in [
            "search_memory",
            "remember",
            "add_observation",
            "create_relation",
            "clear_conversation",
            "get_memory_summary",
            "get_recent_conversation",
            "get_wallet_balance",
            "get_fleet_status",
        ] {
            assert!(names.contains(&expected), "missing descriptor for {expected}");
        }
    }
}
