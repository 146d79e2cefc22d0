//! Todo 工具：让模型维护任务清单（add / complete / list）

use async_trait::async_trait;
use serde_json::Value;

use crate::todos::{TodoList, TodoStatus};
use crate::tools::Tool;

pub struct TodoTool {
    list: TodoList,
}

impl TodoTool {
    pub fn new(list: TodoList) -> Self {
        Self { list }
    }

    fn render(&self) -> String {
        let items = self.list.items();
        if items.is_empty() {
            return "(no todos)".to_string();
        }
        items
            .iter()
            .map(|i| {
                let mark = if i.status == TodoStatus::Done { "x" } else { " " };
                let deps = if i.depends_on.is_empty() {
                    String::new()
                } else {
                    format!(" (after {})", i.depends_on.join(", "))
                };
                format!("[{}] {} {}{}", mark, i.id, i.title, deps)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Tool for TodoTool {
    fn name(&self) -> &str {
        "todo"
    }

    fn description(&self) -> &str {
        "Manage the task list. action=add (title, depends_on), complete (id, note), list."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["add", "complete", "list"] },
                "title": { "type": "string" },
                "id": { "type": "string" },
                "note": { "type": "string" },
                "depends_on": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let action = args.get("action").and_then(|v| v.as_str()).unwrap_or("list");
        match action {
            "add" => {
                let title = args
                    .get("title")
                    .and_then(|v| v.as_str())
                    .filter(|t| !t.trim().is_empty())
                    .ok_or("add requires a title")?;
                let depends_on = args
                    .get("depends_on")
                    .and_then(|v| v.as_array())
                    .map(|a| {
                        a.iter()
                            .filter_map(|d| d.as_str().map(String::from))
                            .collect()
                    })
                    .unwrap_or_default();
                let id = self.list.add(title, depends_on)?;
                Ok(format!("added {}", id))
            }
            "complete" => {
                let id = args
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or("complete requires an id")?;
                let note = args.get("note").and_then(|v| v.as_str());
                self.list.complete(id, note)?;
                Ok(format!("completed {}", id))
            }
            "list" => Ok(self.render()),
            other => Err(format!("unknown action: {}", other)),
        }
    }
}
