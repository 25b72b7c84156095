use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use weft_core::tools::{Tool, ToolContext, ToolError, ToolResult};
use weft_store::todos::TodoRepo;
use weft_store::{Database, StoreError};

/// Thread-scoped named todo lists, backed by the store. Lists come into
/// being with their first item; `create_list` just acknowledges the name so
/// the model can announce a plan before filling it in.
pub struct TodoListTool {
    repo: TodoRepo,
}

impl TodoListTool {
    pub fn new(db: Database) -> Self {
        Self {
            repo: TodoRepo::new(db),
        }
    }
}

#[derive(Deserialize)]
struct TodoArgs {
    action: String,
    #[serde(default)]
    list_name: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    item_id: Option<i64>,
}

#[async_trait]
impl Tool for TodoListTool {
    fn name(&self) -> &str {
        "todo_list"
    }

    fn description(&self) -> &str {
        "Manage named todo lists for this conversation: create a list, add items, mark items done, remove items, and show what is tracked"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "required": ["action"],
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["create_list", "add_item", "complete_item", "remove_item", "show", "lists"],
                    "description": "Operation to perform"
                },
                "list_name": {
                    "type": "string",
                    "description": "Target list (required for create_list, add_item, show)"
                },
                "content": {
                    "type": "string",
                    "description": "Item text (required for add_item)"
                },
                "item_id": {
                    "type": "integer",
                    "description": "Item id (required for complete_item and remove_item)"
                }
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let args: TodoArgs =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        match args.action.as_str() {
            "create_list" => {
                let name = require(args.list_name, "list_name")?;
                if name.trim().is_empty() {
                    return Ok(ToolResult::error("list_name must not be empty"));
                }
                Ok(ToolResult::ok(json!({"list_name": name, "status": "ready"})))
            }
            "add_item" => {
                let name = require(args.list_name, "list_name")?;
                let content = require(args.content, "content")?;
                let item = self
                    .repo
                    .add(&ctx.thread_id, &name, &content)
                    .map_err(store_failure)?;
                Ok(ToolResult::ok(json!({
                    "item_id": item.id,
                    "list_name": name,
                    "position": item.position
                })))
            }
            "complete_item" => {
                let id = require_id(args.item_id)?;
                match self.repo.set_done(id, true) {
                    Ok(()) => Ok(ToolResult::ok(json!({"item_id": id, "done": true}))),
                    Err(StoreError::NotFound(_)) => {
                        Ok(ToolResult::error(format!("no todo item with id {id}")))
                    }
                    Err(e) => Err(store_failure(e)),
                }
            }
            "remove_item" => {
                let id = require_id(args.item_id)?;
                match self.repo.remove(id) {
                    Ok(()) => Ok(ToolResult::ok(json!({"item_id": id, "removed": true}))),
                    Err(StoreError::NotFound(_)) => {
                        Ok(ToolResult::error(format!("no todo item with id {id}")))
                    }
                    Err(e) => Err(store_failure(e)),
                }
            }
            "show" => {
                let name = require(args.list_name, "list_name")?;
                let items: Vec<serde_json::Value> = self
                    .repo
                    .list(&ctx.thread_id, &name)
                    .map_err(store_failure)?
                    .into_iter()
                    .map(|item| {
                        json!({
                            "item_id": item.id,
                            "content": item.content,
                            "done": item.done,
                            "position": item.position
                        })
                    })
                    .collect();
                Ok(ToolResult::ok(json!({"list_name": name, "items": items})))
            }
            "lists" => {
                let names = self
                    .repo
                    .list_names(&ctx.thread_id)
                    .map_err(store_failure)?;
                Ok(ToolResult::ok(json!({"lists": names})))
            }
            other => Ok(ToolResult::error(format!("unknown action: {other}"))),
        }
    }
}

fn require(value: Option<String>, field: &str) -> Result<String, ToolError> {
    value.ok_or_else(|| ToolError::InvalidArguments(format!("{field} is required")))
}

fn require_id(value: Option<i64>) -> Result<i64, ToolError> {
    value.ok_or_else(|| ToolError::InvalidArguments("item_id is required".into()))
}

fn store_failure(e: StoreError) -> ToolError {
    ToolError::ExecutionFailed(format!("todo store: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_store::threads::ThreadRepo;

    fn setup() -> (TodoListTool, ToolContext, Database) {
        let db = Database::in_memory().unwrap();
        let thread = ThreadRepo::new(db.clone()).create(None).unwrap();
        let tool = TodoListTool::new(db.clone());
        (tool, ToolContext::new(thread.id), db)
    }

    #[tokio::test]
    async fn create_list_acknowledges() {
        let (tool, ctx, _db) = setup();
        let result = tool
            .execute(json!({"action": "create_list", "list_name": "groceries"}), &ctx)
            .await
            .unwrap();
        assert!(!result.is_error());
        assert_eq!(result.output.unwrap()["list_name"], "groceries");
    }

    #[tokio::test]
    async fn add_then_show() {
        let (tool, ctx, _db) = setup();
        tool.execute(
            json!({"action": "add_item", "list_name": "groceries", "content": "milk"}),
            &ctx,
        )
        .await
        .unwrap();
        tool.execute(
            json!({"action": "add_item", "list_name": "groceries", "content": "eggs"}),
            &ctx,
        )
        .await
        .unwrap();

        let result = tool
            .execute(json!({"action": "show", "list_name": "groceries"}), &ctx)
            .await
            .unwrap();
        let output = result.output.unwrap();
        let items = output["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["content"], "milk");
        assert_eq!(items[1]["content"], "eggs");
        assert_eq!(items[1]["position"], 1);
    }

    #[tokio::test]
    async fn complete_item_marks_done_in_the_store() {
        let (tool, ctx, db) = setup();
        let added = tool
            .execute(
                json!({"action": "add_item", "list_name": "chores", "content": "laundry"}),
                &ctx,
            )
            .await
            .unwrap();
        let id = added.output.unwrap()["item_id"].as_i64().unwrap();

        let result = tool
            .execute(json!({"action": "complete_item", "item_id": id}), &ctx)
            .await
            .unwrap();
        assert!(!result.is_error());

        let items = TodoRepo::new(db).list(&ctx.thread_id, "chores").unwrap();
        assert!(items[0].done);
    }

    #[tokio::test]
    async fn complete_missing_item_is_an_error_result() {
        let (tool, ctx, _db) = setup();
        let result = tool
            .execute(json!({"action": "complete_item", "item_id": 9999}), &ctx)
            .await
            .unwrap();
        assert!(result.is_error());
        assert!(result.error.unwrap().contains("9999"));
    }

    #[tokio::test]
    async fn remove_item_deletes_it() {
        let (tool, ctx, _db) = setup();
        let added = tool
            .execute(
                json!({"action": "add_item", "list_name": "tmp", "content": "scratch"}),
                &ctx,
            )
            .await
            .unwrap();
        let id = added.output.unwrap()["item_id"].as_i64().unwrap();

        tool.execute(json!({"action": "remove_item", "item_id": id}), &ctx)
            .await
            .unwrap();

        let shown = tool
            .execute(json!({"action": "show", "list_name": "tmp"}), &ctx)
            .await
            .unwrap();
        assert!(shown.output.unwrap()["items"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_reports_names() {
        let (tool, ctx, _db) = setup();
        tool.execute(
            json!({"action": "add_item", "list_name": "beta", "content": "x"}),
            &ctx,
        )
        .await
        .unwrap();
        tool.execute(
            json!({"action": "add_item", "list_name": "alpha", "content": "y"}),
            &ctx,
        )
        .await
        .unwrap();

        let result = tool.execute(json!({"action": "lists"}), &ctx).await.unwrap();
        assert_eq!(result.output.unwrap()["lists"], json!(["alpha", "beta"]));
    }

    #[tokio::test]
    async fn lists_are_scoped_to_the_thread() {
        let (tool, ctx, db) = setup();
        tool.execute(
            json!({"action": "add_item", "list_name": "mine", "content": "a"}),
            &ctx,
        )
        .await
        .unwrap();

        let other = ThreadRepo::new(db.clone()).create(None).unwrap();
        let other_ctx = ToolContext::new(other.id);
        let result = tool.execute(json!({"action": "lists"}), &other_ctx).await.unwrap();
        assert_eq!(result.output.unwrap()["lists"], json!([]));
    }

    #[tokio::test]
    async fn missing_action_is_invalid_arguments() {
        let (tool, ctx, _db) = setup();
        let result = tool.execute(json!({"list_name": "x"}), &ctx).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn missing_list_name_is_invalid_arguments() {
        let (tool, ctx, _db) = setup();
        let result = tool.execute(json!({"action": "add_item", "content": "x"}), &ctx).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn unknown_action_is_an_error_result() {
        let (tool, ctx, _db) = setup();
        let result = tool
            .execute(json!({"action": "explode"}), &ctx)
            .await
            .unwrap();
        assert!(result.is_error());
        assert_eq!(result.error.as_deref(), Some("unknown action: explode"));
    }

    #[test]
    fn schema_requires_action() {
        let tool = TodoListTool::new(Database::in_memory().unwrap());
        let schema = tool.parameters_schema();
        assert_eq!(schema["required"], json!(["action"]));
    }
}
