pub mod confirm;
pub mod docs;
pub mod todo;

use std::path::PathBuf;
use std::sync::Arc;

use weft_store::Database;

use crate::registry::ToolRegistry;

/// Registry with every builtin registered. `docs_root` of None leaves
/// `document_search` registered but answering with a configuration error.
pub fn create_default_registry(db: Database, docs_root: Option<PathBuf>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(todo::TodoListTool::new(db)));
    registry.register(Arc::new(docs::DocumentSearchTool::new(docs_root)));
    registry.register(Arc::new(confirm::ConfirmActionTool));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::tools::ExecutionMode;

    #[test]
    fn default_registry_contents() {
        let registry = create_default_registry(Database::in_memory().unwrap(), None);
        assert_eq!(
            registry.names(),
            vec!["confirm_action", "document_search", "todo_list"]
        );

        let defs = registry.definitions();
        let confirm = defs.iter().find(|d| d.name == "confirm_action").unwrap();
        assert_eq!(confirm.mode, ExecutionMode::Client);
        let todo = defs.iter().find(|d| d.name == "todo_list").unwrap();
        assert_eq!(todo.mode, ExecutionMode::Server);
    }
}
