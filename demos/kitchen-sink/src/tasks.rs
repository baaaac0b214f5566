//! Task tracker with nested subtasks.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use wirebridge_core::{
    Args, Command, CommandError, Describe, EnumDef, RecordDef, RegistryBuilder, TypeDescriptor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl Describe for TaskStatus {
    fn describe() -> TypeDescriptor {
        EnumDef::new("TaskStatus", ["todo", "in_progress", "done"]).into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub status: TaskStatus,
    pub subtasks: Vec<Task>,
    pub assigned_to: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Describe for Task {
    fn describe() -> TypeDescriptor {
        RecordDef::new("Task")
            .describe("A unit of work, possibly split into subtasks.")
            .field::<i64>("id")
            .field::<String>("title")
            .field::<TaskStatus>("status")
            .field_with(
                "subtasks",
                TypeDescriptor::sequence(TypeDescriptor::reference("Task")),
            )
            .field::<Option<i64>>("assigned_to")
            .doc("User id")
            .optional_field::<Vec<String>>("tags")
            .into()
    }
}

#[derive(Debug, Default)]
struct Board {
    next_id: i64,
    roots: Vec<Task>,
}

fn find_mut(tasks: &mut [Task], id: i64) -> Option<&mut Task> {
    for task in tasks {
        if task.id == id {
            return Some(task);
        }
        if let Some(found) = find_mut(&mut task.subtasks, id) {
            return Some(found);
        }
    }
    None
}

fn not_found(id: i64) -> CommandError {
    CommandError::new(format!("Task {id} not found")).with_code("NOT_FOUND")
}

#[derive(Debug, Clone, Default)]
pub struct Tasks {
    board: Arc<RwLock<Board>>,
}

impl Tasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(
        &self,
        title: String,
        parent_id: Option<i64>,
        assigned_to: Option<i64>,
        tags: Vec<String>,
    ) -> Result<Task, CommandError> {
        let mut board = self.board.write().await;
        board.next_id += 1;
        let task = Task {
            id: board.next_id,
            title,
            status: TaskStatus::Todo,
            subtasks: Vec::new(),
            assigned_to,
            tags,
        };
        match parent_id {
            Some(parent_id) => find_mut(&mut board.roots, parent_id)
                .ok_or_else(|| not_found(parent_id))?
                .subtasks
                .push(task.clone()),
            None => board.roots.push(task.clone()),
        }
        Ok(task)
    }

    pub async fn list(&self, status: Option<TaskStatus>) -> Vec<Task> {
        self.board
            .read()
            .await
            .roots
            .iter()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect()
    }

    pub async fn set_status(&self, id: i64, status: TaskStatus) -> Result<Task, CommandError> {
        let mut board = self.board.write().await;
        let task = find_mut(&mut board.roots, id).ok_or_else(|| not_found(id))?;
        task.status = status;
        Ok(task.clone())
    }
}

pub fn register(builder: RegistryBuilder, tasks: &Tasks) -> RegistryBuilder {
    let create = tasks.clone();
    let list = tasks.clone();
    let update = tasks.clone();
    builder
        .command(
            Command::unary("create_task")
                .module("tasks")
                .describe("Create a task, optionally under a parent.")
                .param::<String>("title")
                .param::<Option<i64>>("parent_id")
                .param::<Option<i64>>("assigned_to")
                .param_with_default::<Vec<String>>("tags")
                .returns::<Task>()
                .handler(move |args: Args| {
                    let tasks = create.clone();
                    async move {
                        tasks
                            .create(
                                args.get("title")?,
                                args.get("parent_id")?,
                                args.get("assigned_to")?,
                                args.get_or("tags", Vec::new())?,
                            )
                            .await
                    }
                }),
        )
        .command(
            Command::unary("list_tasks")
                .module("tasks")
                .describe("Top-level tasks, optionally filtered by status.")
                .param::<Option<TaskStatus>>("status")
                .returns::<Vec<Task>>()
                .handler(move |args: Args| {
                    let tasks = list.clone();
                    async move { Ok(tasks.list(args.get("status")?).await) }
                }),
        )
        .command(
            Command::unary("update_task_status")
                .module("tasks")
                .param::<i64>("task_id")
                .param::<TaskStatus>("status")
                .returns::<Task>()
                .handler(move |args: Args| {
                    let tasks = update.clone();
                    async move {
                        tasks
                            .set_status(args.get("task_id")?, args.get("status")?)
                            .await
                    }
                }),
        )
}
