use std::collections::HashMap;
use std::sync::Arc;

use weft_core::tools::{Tool, ToolDefinition};

/// Holds the tools the model may call. Names are unique; registering a tool
/// under an existing name replaces the earlier entry.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Remove a tool by name. Returns false when nothing was registered
    /// under it.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Declarations sent to the model, sorted by name so prompts stay
    /// stable across runs.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use weft_core::tools::{ToolContext, ToolError, ToolResult};

    struct DummyTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for DummyTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "dummy tool for registry tests"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }

        async fn execute(
            &self,
            _args: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::ok(serde_json::json!({"ran": self.name})))
        }
    }

    #[test]
    fn register_and_get() {
        let mut registry = ToolRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(DummyTool { name: "alpha" }));
        assert_eq!(registry.count(), 1);
        assert!(registry.contains("alpha"));
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("beta").is_none());
    }

    #[test]
    fn reregister_replaces() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool { name: "alpha" }));
        registry.register(Arc::new(DummyTool { name: "alpha" }));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn unregister() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool { name: "alpha" }));

        assert!(registry.unregister("alpha"));
        assert!(!registry.unregister("alpha"));
        assert!(!registry.contains("alpha"));
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool { name: "zeta" }));
        registry.register(Arc::new(DummyTool { name: "alpha" }));
        registry.register(Arc::new(DummyTool { name: "mid" }));

        assert_eq!(registry.names(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn definitions_are_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DummyTool { name: "zeta" }));
        registry.register(Arc::new(DummyTool { name: "alpha" }));

        let defs = registry.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "alpha");
        assert_eq!(defs[1].name, "zeta");
    }
}
