//! TypeScript client generation.
//!
//! [`generate`] is a pure function of the registry: the same registry always
//! produces byte-identical output. [`write`] puts the result on disk next to
//! the runtime module it imports.

mod typescript;

use crate::registry::Registry;
use crate::schema::Definitions;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use typescript::Renderer;

/// Runtime support module imported by every generated client.
pub const RUNTIME: &str = include_str!("runtime.ts");

/// File name of the runtime module, written next to the client.
pub const RUNTIME_FILE: &str = "_internal.ts";

const HEADER: &str = r#"/* Auto-generated by wirebridge - DO NOT EDIT */

import { initBridge, request, createChannel, createSocket, BridgeRequestError } from "./_internal";
import type { BridgeChannel, BridgeSocket, BridgeError, SocketStatus } from "./_internal";

export { initBridge, BridgeRequestError };
export type { BridgeChannel, BridgeSocket, BridgeError, SocketStatus };
"#;

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("{owner}: type '{name}' is referenced but never defined")]
    UnresolvedReference { owner: String, name: String },
    #[error("{owner}: stream type is not representable at '{path}'")]
    Unrepresentable { owner: String, path: String },
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The generated client and its runtime module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedClient {
    pub api: String,
    pub runtime: String,
}

pub fn generate(registry: &Registry) -> Result<GeneratedClient, GenerateError> {
    let defs = registry.definitions();
    let renderer = Renderer::new(defs);

    let mut api = String::from(HEADER);

    let interfaces = ordered(defs)
        .into_iter()
        .filter_map(|name| defs.get(name))
        .map(|def| renderer.definition(def))
        .collect::<Result<Vec<_>, _>>()?;
    if !interfaces.is_empty() {
        api.push_str("\n// ============ Interfaces ============\n\n");
        api.push_str(&interfaces.join("\n\n"));
        api.push('\n');
    }

    let commands = registry
        .commands()
        .map(|command| renderer.command(command))
        .collect::<Result<Vec<_>, _>>()?;
    if !commands.is_empty() {
        api.push_str("\n// ============ Commands ============\n\n");
        api.push_str(&commands.join("\n\n"));
        api.push('\n');
    }

    let sockets = registry
        .sockets()
        .map(|socket| renderer.socket(socket))
        .collect::<Result<Vec<_>, _>>()?;
    if !sockets.is_empty() {
        api.push_str("\n// ============ Sockets ============\n\n");
        api.push_str(&sockets.join("\n\n"));
        api.push('\n');
    }

    Ok(GeneratedClient {
        api,
        runtime: RUNTIME.to_string(),
    })
}

/// Definition names with dependencies first. Roots are visited in name
/// order; cycles are cut at the first revisit.
fn ordered(defs: &Definitions) -> Vec<&str> {
    fn visit<'a>(
        defs: &'a Definitions,
        name: &'a str,
        seen: &mut HashSet<&'a str>,
        out: &mut Vec<&'a str>,
    ) {
        if !seen.insert(name) {
            return;
        }
        if let Some(def) = defs.get(name) {
            for dep in def.dependencies() {
                visit(defs, dep, seen, out);
            }
            out.push(def.name());
        }
    }

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(defs.len());
    for def in defs.iter() {
        visit(defs, def.name(), &mut seen, &mut out);
    }
    out
}

/// Generate and write the client to `path` and the runtime module beside it.
///
/// Nothing is written if generation fails. Changed files are staged as
/// `.tmp` siblings and renamed only once every one of them is on disk.
/// Files whose content would not change are left alone. Returns whether
/// anything was written.
pub fn write(registry: &Registry, path: &Path) -> Result<bool, GenerateError> {
    let client = generate(registry)?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|source| GenerateError::Io {
        path: dir.clone(),
        source,
    })?;

    let files = [
        (path.to_path_buf(), client.api.as_str()),
        (dir.join(RUNTIME_FILE), client.runtime.as_str()),
    ];
    let mut staged = Vec::new();
    for (target, contents) in &files {
        if fs::read_to_string(target).is_ok_and(|existing| existing == *contents) {
            continue;
        }
        let tmp = tmp_path(target);
        if let Err(source) = fs::write(&tmp, contents) {
            discard(&staged);
            return Err(GenerateError::Io { path: tmp, source });
        }
        staged.push((tmp, target));
    }

    for (i, (tmp, target)) in staged.iter().enumerate() {
        if let Err(source) = fs::rename(tmp, target) {
            discard(&staged[i..]);
            return Err(GenerateError::Io {
                path: target.to_path_buf(),
                source,
            });
        }
    }
    Ok(!staged.is_empty())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

fn discard(staged: &[(PathBuf, &PathBuf)]) {
    for (tmp, _) in staged {
        let _ = fs::remove_file(tmp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelSender;
    use crate::registry::{Args, Command};
    use crate::socket::SocketHandler;
    use crate::types::{EnumDef, RecordDef, TypeDescriptor};

    fn status() -> TypeDescriptor {
        EnumDef::new("TaskStatus", ["todo", "in_progress", "done"]).into()
    }

    fn task() -> TypeDescriptor {
        RecordDef::new("Task")
            .describe("A unit of work.")
            .field::<i64>("id")
            .field::<String>("title")
            .doc("Short summary")
            .field_with("status", status())
            .field_with(
                "subtasks",
                TypeDescriptor::sequence(TypeDescriptor::reference("Task")),
            )
            .field::<Option<String>>("assigned_to")
            .optional_field::<Vec<String>>("tags")
            .into()
    }

    fn registry() -> Registry {
        Registry::builder()
            .command(
                Command::unary("get_task")
                    .describe("Fetch one task.")
                    .param::<i64>("task_id")
                    .returns_with(task())
                    .handler(|_: Args| async { Ok(()) }),
            )
            .command(
                Command::unary("ping")
                    .returns::<()>()
                    .handler(|_| async { Ok(()) }),
            )
            .command(
                Command::unary("list_tasks")
                    .param_with("status", TypeDescriptor::optional(status()))
                    .param_with_default::<u32>("limit")
                    .returns_with(TypeDescriptor::sequence(task()))
                    .handler(|_| async { Ok(Vec::<()>::new()) }),
            )
            .command(
                Command::stream("watch_task")
                    .param::<i64>("task_id")
                    .yields_with(task())
                    .stream_handler(|_: Args, _: ChannelSender| async { Ok(()) }),
            )
            .socket(
                SocketHandler::new("task_room")
                    .server_event_with("updated", task())
                    .client_event::<String>("join"),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn output_is_deterministic() {
        let first = generate(&registry()).unwrap();
        let second = generate(&registry()).unwrap();
        assert_eq!(first, second);
        assert!(first.api.starts_with("/* Auto-generated by wirebridge - DO NOT EDIT */"));
        assert_eq!(first.runtime, RUNTIME);
    }

    #[test]
    fn renders_interfaces_before_use() {
        let api = generate(&registry()).unwrap().api;
        let status_at = api.find("export type TaskStatus").unwrap();
        let task_at = api.find("export interface Task {").unwrap();
        assert!(status_at < task_at);
        assert!(api.contains(
            "export type TaskStatus = \"todo\" | \"in_progress\" | \"done\";"
        ));
        assert!(api.contains(
            "/**\n * A unit of work.\n */\nexport interface Task {\n    id: number;\n    /** Short summary */\n    title: string;\n    status: TaskStatus;\n    subtasks: Task[];\n    assignedTo?: string | null;\n    tags?: string[];\n}"
        ));
    }

    #[test]
    fn renders_commands_in_name_order() {
        let api = generate(&registry()).unwrap().api;
        assert!(api.contains(
            "/**\n * Fetch one task.\n */\nexport async function getTask(args: { taskId: number }): Promise<Task> {\n    return request(\"get_task\", args);\n}"
        ));
        assert!(api.contains(
            "export async function listTasks(args: { status?: TaskStatus | null; limit?: number } = {}): Promise<Task[]> {\n    return request(\"list_tasks\", args);\n}"
        ));
        assert!(api.contains(
            "export async function ping(): Promise<void> {\n    return request(\"ping\", {});\n}"
        ));
        assert!(api.contains(
            "export function watchTask(args: { taskId: number }): BridgeChannel<Task> {\n    return createChannel(\"watch_task\", args);\n}"
        ));
        let order: Vec<_> = ["function getTask", "function listTasks", "function ping", "function watchTask"]
            .iter()
            .map(|f| api.find(f).unwrap())
            .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn renders_sockets() {
        let api = generate(&registry()).unwrap().api;
        assert!(api.contains(
            "export interface TaskRoomServerEvents {\n    updated: Task;\n}\n\nexport interface TaskRoomClientEvents {\n    join: string;\n}\n\nexport function taskRoom(): BridgeSocket<TaskRoomServerEvents, TaskRoomClientEvents> {\n    return createSocket(\"task_room\");\n}"
        ));
    }

    #[test]
    fn write_creates_runtime_and_skips_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("generated").join("api.ts");
        let registry = registry();

        assert!(write(&registry, &path).unwrap());
        let api = fs::read_to_string(&path).unwrap();
        assert_eq!(api, generate(&registry).unwrap().api);
        let runtime = fs::read_to_string(dir.path().join("generated").join(RUNTIME_FILE)).unwrap();
        assert!(runtime.contains("export function createChannel"));

        assert!(!write(&registry, &path).unwrap());
    }

    #[test]
    fn socket_status_is_replayed_on_registration() {
        let start = RUNTIME.find("export function createSocket").unwrap();
        let socket = &RUNTIME[start..];
        assert!(socket.contains("let status: SocketStatus = \"connecting\";"));
        assert!(socket.contains("onStatus = callback;\n            callback(status);"));
    }

    #[test]
    fn failed_staging_leaves_existing_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.ts");
        fs::write(&path, "stale").unwrap();
        fs::create_dir(dir.path().join(format!("{RUNTIME_FILE}.tmp"))).unwrap();

        let err = write(&registry(), &path).unwrap_err();
        assert!(matches!(err, GenerateError::Io { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "stale");
        assert!(!dir.path().join("api.ts.tmp").exists());
        assert!(!dir.path().join(RUNTIME_FILE).exists());
    }
}
