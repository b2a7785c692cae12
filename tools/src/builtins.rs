//! Built-in tools.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use serde::Deserialize;
use serde_json::{Value, json};
use steward_types::{DirectoryEntry, ExecutionContext};

use super::{Tool, ToolCtx, ToolError, ToolFut, ToolRegistry, parse_args};
use crate::search::{SearchRequest, search_files};
use crate::session::session_key;
use crate::terminal::TerminalRequest;

/// Resolve a tool path argument.
///
/// Absolute paths are used as given. Relative paths are joined to the active
/// project root when there is one, else used as given. A missing or blank
/// path means the project root itself.
fn resolve_path(ctx: &ToolCtx, raw: Option<&str>) -> Result<PathBuf, ToolError> {
    let project = ctx.host.project.active_project();
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        Some(raw) => {
            let path = Path::new(raw);
            Ok(match project {
                Some(root) if path.is_relative() => root.join(path),
                _ => path.to_path_buf(),
            })
        }
        None => project.ok_or(ToolError::NoProject),
    }
}

fn file_label(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map_or_else(|| path.to_string(), |name| name.to_string_lossy().into_owned())
}

/// `"top.v Line: 2 - 3"` for ranged calls, `"top.v"` otherwise.
fn range_detail(args: &Value) -> Option<String> {
    let mut label = file_label(args.get("path")?.as_str()?);
    let start = args.get("startLine").and_then(Value::as_i64);
    let count = args.get("lineCount").and_then(Value::as_i64);
    if let (Some(start), Some(count)) = (start, count) {
        let end = start.saturating_add(count).saturating_sub(1);
        let _ = write!(label, " Line: {start} - {end}");
    }
    Some(label)
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn failed(key: &str, message: impl ToString) -> Value {
    json!({ key: Value::Null, "error": message.to_string() })
}

// ============================================================================
// Files
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchFilesArgs {
    pattern: String,
    root_path: Option<String>,
    file_glob: Option<String>,
    ignore_case: Option<bool>,
    max_results: Option<usize>,
    max_results_per_file: Option<usize>,
}

#[derive(Debug)]
pub struct SearchFilesTool;

impl Tool for SearchFilesTool {
    fn name(&self) -> &'static str {
        "searchFiles"
    }

    fn display_name(&self) -> &'static str {
        "Search Files"
    }

    fn description(&self) -> &'static str {
        "Searches files using a regular expression.\n\
         Returns matching lines with file path, line number, column, and match text."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "pattern": {"type": "string", "description": "regex pattern to search for"},
                "rootPath": {"type": "string", "description": "root directory to search (optional, defaults to active project)"},
                "fileGlob": {"type": "string", "description": "file name glob(s), e.g. \"*.v\" or \"*.v;*.vhd\" (optional)"},
                "ignoreCase": {"type": "boolean", "description": "case-insensitive search (default true)"},
                "maxResults": {"type": "integer", "minimum": 0, "description": "max total matches to return (default 200)"},
                "maxResultsPerFile": {"type": "integer", "minimum": 0, "description": "max matches per file (default 20)"}
            },
            "required": ["pattern"]
        })
    }

    fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::BackgroundThenNotifyOnUi
    }

    fn detail(&self, args: &Value) -> Option<String> {
        str_arg(args, "pattern").map(str::to_owned)
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: SearchFilesArgs = parse_args(&args)?;
            let defaults = &ctx.settings.search;
            let root = match resolve_path(ctx, typed.root_path.as_deref()) {
                Ok(root) => root,
                Err(e) => return Ok(json!({"results": [], "error": e.to_string()})),
            };
            let request = SearchRequest {
                root,
                pattern: typed.pattern,
                file_glob: typed.file_glob,
                ignore_case: typed.ignore_case.unwrap_or(defaults.ignore_case),
                max_results: typed.max_results.unwrap_or(defaults.max_results),
                max_results_per_file: typed
                    .max_results_per_file
                    .unwrap_or(defaults.max_results_per_file),
            };
            Ok(match search_files(request, defaults.clone()).await {
                Ok(results) => json!({ "results": results }),
                Err(e) => json!({"results": [], "error": e.to_string()}),
            })
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadFileArgs {
    path: String,
    start_line: Option<i64>,
    line_count: Option<i64>,
}

#[derive(Debug)]
pub struct ReadFileTool;

impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "readFile"
    }

    fn display_name(&self) -> &'static str {
        "Read File"
    }

    fn description(&self) -> &'static str {
        "Read the specified file (optionally by line range). \
         This is the only way to read files in the application."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "path": {"type": "string", "description": "path of the file to read"},
                "startLine": {"type": "integer", "description": "1-based start line for partial reads (omit for full file)"},
                "lineCount": {"type": "integer", "description": "number of lines to read from startLine (omit to read to the end)"}
            },
            "required": ["path"]
        })
    }

    fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::UiThreadPinned
    }

    fn detail(&self, args: &Value) -> Option<String> {
        range_detail(args)
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ReadFileArgs = parse_args(&args)?;
            let path = match resolve_path(ctx, Some(&typed.path)) {
                Ok(path) => path,
                Err(e) => return Ok(failed("result", e)),
            };
            Ok(
                match ctx
                    .files
                    .read_file(&path, typed.start_line, typed.line_count)
                    .await
                {
                    Ok(text) => json!({ "result": text }),
                    Err(e) => failed("result", format!("{}: {e}", path.display())),
                },
            )
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditFileArgs {
    path: String,
    content: String,
    start_line: Option<i64>,
    line_count: Option<i64>,
}

#[derive(Debug)]
pub struct EditFileTool;

impl Tool for EditFileTool {
    fn name(&self) -> &'static str {
        "editFile"
    }

    fn display_name(&self) -> &'static str {
        "Edit File"
    }

    fn description(&self) -> &'static str {
        "Replaces file contents with new text (optionally by line range). \
         This is the only way to edit files in the application. \
         Edits stay reversible until the user accepts or undoes them."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "path": {"type": "string", "description": "path of the file to edit"},
                "content": {"type": "string", "description": "new text to write (full file or replacement lines)"},
                "startLine": {"type": "integer", "description": "1-based start line for partial edits (omit for full file)"},
                "lineCount": {"type": "integer", "description": "number of lines to replace from startLine; 0 inserts before startLine"}
            },
            "required": ["path", "content"]
        })
    }

    fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::UiThreadPinned
    }

    fn requires_permission(&self) -> bool {
        true
    }

    fn permission_scope(&self) -> Option<&'static str> {
        Some("editFile")
    }

    fn detail(&self, args: &Value) -> Option<String> {
        range_detail(args)
    }

    fn question(&self, args: &Value) -> String {
        let target = str_arg(args, "path").map_or_else(|| "a file".to_string(), file_label);
        format!("Allow the assistant to edit {target}?")
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: EditFileArgs = parse_args(&args)?;
            let path = match resolve_path(ctx, Some(&typed.path)) {
                Ok(path) => path,
                Err(e) => return Ok(failed("result", e)),
            };
            let applied = ctx
                .files
                .edit_file(&path, &typed.content, typed.start_line, typed.line_count)
                .await;
            Ok(json!({ "result": applied }))
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDirectoryArgs {
    path: Option<String>,
    #[serde(default)]
    recursive: bool,
    max_entries: Option<usize>,
}

#[derive(Debug)]
pub struct ListDirectoryTool;

fn list_directory(
    root: &Path,
    recursive: bool,
    max_entries: usize,
) -> io::Result<(Vec<DirectoryEntry>, bool)> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Not a directory: {}", root.display()),
        ));
    }
    let mut builder = WalkBuilder::new(root);
    builder
        .standard_filters(false)
        .sort_by_file_name(|a, b| a.cmp(b));
    if !recursive {
        builder.max_depth(Some(1));
    }

    let mut entries = Vec::new();
    let mut truncated = false;
    for entry in builder.build() {
        let Ok(entry) = entry else {
            continue;
        };
        if entry.depth() == 0 {
            continue;
        }
        if entries.len() >= max_entries {
            truncated = true;
            break;
        }
        let is_directory = entry.file_type().is_some_and(|ft| ft.is_dir());
        let size = if is_directory {
            None
        } else {
            entry.metadata().ok().map(|meta| meta.len())
        };
        entries.push(DirectoryEntry {
            path: entry.into_path(),
            is_directory,
            size,
        });
    }
    Ok((entries, truncated))
}

impl Tool for ListDirectoryTool {
    fn name(&self) -> &'static str {
        "listDirectory"
    }

    fn display_name(&self) -> &'static str {
        "List Directory"
    }

    fn description(&self) -> &'static str {
        "Lists files and folders in a directory (defaults to the active project root). \
         Hidden and ignored files are included."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "path": {"type": "string", "description": "directory to list (optional, defaults to active project)"},
                "recursive": {"type": "boolean", "description": "include nested folders (default false)"},
                "maxEntries": {"type": "integer", "minimum": 0, "description": "max entries to return (default 500)"}
            }
        })
    }

    fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::BackgroundThenNotifyOnUi
    }

    fn detail(&self, args: &Value) -> Option<String> {
        str_arg(args, "path").map(file_label)
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: ListDirectoryArgs = parse_args(&args)?;
            let failure = |message: String| {
                json!({"entries": [], "truncated": false, "error": message})
            };
            let root = match resolve_path(ctx, typed.path.as_deref()) {
                Ok(root) => root,
                Err(e) => return Ok(failure(e.to_string())),
            };
            let max_entries = typed.max_entries.unwrap_or(ctx.settings.list.max_entries);
            let recursive = typed.recursive;
            let listed = tokio::task::spawn_blocking(move || {
                list_directory(&root, recursive, max_entries)
            })
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool: self.display_name().to_string(),
                message: e.to_string(),
            })?;
            Ok(match listed {
                Ok((entries, truncated)) => json!({"entries": entries, "truncated": truncated}),
                Err(e) => failure(e.to_string()),
            })
        })
    }
}

#[derive(Debug, Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Debug)]
pub struct PathExistsTool;

impl Tool for PathExistsTool {
    fn name(&self) -> &'static str {
        "pathExists"
    }

    fn display_name(&self) -> &'static str {
        "Path Exists"
    }

    fn description(&self) -> &'static str {
        "Checks whether a file or directory exists."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "path": {"type": "string", "description": "path to check"}
            },
            "required": ["path"]
        })
    }

    fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::BackgroundThenNotifyOnUi
    }

    fn detail(&self, args: &Value) -> Option<String> {
        str_arg(args, "path").map(file_label)
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: PathArgs = parse_args(&args)?;
            let path = match resolve_path(ctx, Some(&typed.path)) {
                Ok(path) => path,
                Err(e) => {
                    return Ok(json!({"exists": false, "isDirectory": false, "error": e.to_string()}));
                }
            };
            let meta = tokio::fs::metadata(&path).await.ok();
            Ok(json!({
                "exists": meta.is_some(),
                "isDirectory": meta.is_some_and(|meta| meta.is_dir()),
            }))
        })
    }
}

#[derive(Debug)]
pub struct CreateDirectoryTool;

impl Tool for CreateDirectoryTool {
    fn name(&self) -> &'static str {
        "createDirectory"
    }

    fn display_name(&self) -> &'static str {
        "Create Directory"
    }

    fn description(&self) -> &'static str {
        "Creates a directory, including any missing parent directories."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "path": {"type": "string", "description": "directory to create"}
            },
            "required": ["path"]
        })
    }

    fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::BackgroundThenNotifyOnUi
    }

    fn requires_permission(&self) -> bool {
        true
    }

    fn detail(&self, args: &Value) -> Option<String> {
        str_arg(args, "path").map(str::to_owned)
    }

    fn question(&self, args: &Value) -> String {
        format!(
            "Allow the assistant to create directory {}?",
            str_arg(args, "path").unwrap_or("?")
        )
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: PathArgs = parse_args(&args)?;
            let path = match resolve_path(ctx, Some(&typed.path)) {
                Ok(path) => path,
                Err(e) => return Ok(failed("result", e)),
            };
            Ok(match tokio::fs::create_dir_all(&path).await {
                Ok(()) => json!({"result": true}),
                Err(e) => json!({"result": false, "error": format!("{}: {e}", path.display())}),
            })
        })
    }
}

#[derive(Debug, Deserialize)]
struct MovePathArgs {
    source: String,
    destination: String,
    #[serde(default)]
    overwrite: bool,
}

#[derive(Debug)]
pub struct MovePathTool;

async fn remove_any(path: &Path) -> io::Result<()> {
    if tokio::fs::symlink_metadata(path).await?.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

async fn move_path(source: &Path, destination: &Path, overwrite: bool) -> Result<(), String> {
    if tokio::fs::symlink_metadata(source).await.is_err() {
        return Err(format!("Source does not exist: {}", source.display()));
    }
    if tokio::fs::symlink_metadata(destination).await.is_ok() {
        if !overwrite {
            return Err(format!(
                "Destination already exists: {}",
                destination.display()
            ));
        }
        remove_any(destination)
            .await
            .map_err(|e| format!("Failed to replace {}: {e}", destination.display()))?;
    }
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("{}: {e}", parent.display()))?;
    }
    tokio::fs::rename(source, destination)
        .await
        .map_err(|e| format!("Failed to move {}: {e}", source.display()))
}

impl Tool for MovePathTool {
    fn name(&self) -> &'static str {
        "movePath"
    }

    fn display_name(&self) -> &'static str {
        "Move Path"
    }

    fn description(&self) -> &'static str {
        "Moves or renames a file or directory."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "source": {"type": "string", "description": "file or directory to move"},
                "destination": {"type": "string", "description": "new path"},
                "overwrite": {"type": "boolean", "description": "replace an existing destination (default false)"}
            },
            "required": ["source", "destination"]
        })
    }

    fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::BackgroundThenNotifyOnUi
    }

    fn requires_permission(&self) -> bool {
        true
    }

    fn permission_scope(&self) -> Option<&'static str> {
        Some("movePath")
    }

    fn detail(&self, args: &Value) -> Option<String> {
        Some(format!(
            "{} -> {}",
            str_arg(args, "source")?,
            str_arg(args, "destination")?
        ))
    }

    fn question(&self, args: &Value) -> String {
        match self.detail(args) {
            Some(detail) => format!("Allow the assistant to move {detail}?"),
            None => "Allow the assistant to move a path?".to_string(),
        }
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: MovePathArgs = parse_args(&args)?;
            let (source, destination) = match (
                resolve_path(ctx, Some(&typed.source)),
                resolve_path(ctx, Some(&typed.destination)),
            ) {
                (Ok(source), Ok(destination)) => (source, destination),
                (Err(e), _) | (_, Err(e)) => return Ok(failed("result", e)),
            };
            Ok(match move_path(&source, &destination, typed.overwrite).await {
                Ok(()) => json!({"result": true}),
                Err(message) => json!({"result": false, "error": message}),
            })
        })
    }
}

#[derive(Debug, Deserialize)]
struct DeletePathArgs {
    path: String,
    #[serde(default)]
    recursive: bool,
}

#[derive(Debug)]
pub struct DeletePathTool;

impl Tool for DeletePathTool {
    fn name(&self) -> &'static str {
        "deletePath"
    }

    fn display_name(&self) -> &'static str {
        "Delete Path"
    }

    fn description(&self) -> &'static str {
        "Deletes a file, or a directory. Non-empty directories require recursive=true."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "path": {"type": "string", "description": "file or directory to delete"},
                "recursive": {"type": "boolean", "description": "delete directory contents too (default false)"}
            },
            "required": ["path"]
        })
    }

    fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::BackgroundThenNotifyOnUi
    }

    fn requires_permission(&self) -> bool {
        true
    }

    fn permission_scope(&self) -> Option<&'static str> {
        Some("deletePath")
    }

    fn detail(&self, args: &Value) -> Option<String> {
        str_arg(args, "path").map(str::to_owned)
    }

    fn question(&self, args: &Value) -> String {
        format!(
            "Allow the assistant to delete {}?",
            str_arg(args, "path").unwrap_or("a path")
        )
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: DeletePathArgs = parse_args(&args)?;
            let path = match resolve_path(ctx, Some(&typed.path)) {
                Ok(path) => path,
                Err(e) => return Ok(failed("result", e)),
            };
            let removed = match tokio::fs::symlink_metadata(&path).await {
                Ok(meta) if meta.is_dir() && typed.recursive => {
                    tokio::fs::remove_dir_all(&path).await
                }
                Ok(meta) if meta.is_dir() => tokio::fs::remove_dir(&path).await,
                Ok(_) => tokio::fs::remove_file(&path).await,
                Err(e) => Err(e),
            };
            Ok(match removed {
                Ok(()) => json!({"result": true}),
                Err(e) => json!({"result": false, "error": format!("{}: {e}", path.display())}),
            })
        })
    }
}

// ============================================================================
// IDE state
// ============================================================================

#[derive(Debug)]
pub struct GetActiveProjectTool;

impl Tool for GetActiveProjectTool {
    fn name(&self) -> &'static str {
        "getActiveProject"
    }

    fn display_name(&self) -> &'static str {
        "Get Active Project"
    }

    fn description(&self) -> &'static str {
        "Returns the working directory of the active project. \
         If no active project is enabled, it will return null."
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "additionalProperties": false, "properties": {}})
    }

    fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::UiThreadOnly
    }

    fn execute<'a>(&'a self, _args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            Ok(json!({ "activeProject": ctx.host.project.active_project() }))
        })
    }
}

#[derive(Debug)]
pub struct GetOpenFilesTool;

impl Tool for GetOpenFilesTool {
    fn name(&self) -> &'static str {
        "getOpenFiles"
    }

    fn display_name(&self) -> &'static str {
        "Get Open Files"
    }

    fn description(&self) -> &'static str {
        "Returns the full paths of ALL files currently open in the IDE.\n\
         This is the ONLY way to know which files are open.\n\
         Do not assume or invent open files."
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "additionalProperties": false, "properties": {}})
    }

    fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::UiThreadOnly
    }

    fn execute<'a>(&'a self, _args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move { Ok(json!({ "openFiles": ctx.host.editors.open_files() })) })
    }
}

#[derive(Debug)]
pub struct GetFocusedFileTool;

impl Tool for GetFocusedFileTool {
    fn name(&self) -> &'static str {
        "getFocusedFile"
    }

    fn display_name(&self) -> &'static str {
        "Get Focused File"
    }

    fn description(&self) -> &'static str {
        "Returns the full path of the currently focused editor file.\n\
         This is the ONLY way to know which file is active."
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "additionalProperties": false, "properties": {}})
    }

    fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::UiThreadOnly
    }

    fn execute<'a>(&'a self, _args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move { Ok(json!({ "currentFile": ctx.host.editors.focused_file() })) })
    }
}

#[derive(Debug)]
pub struct GetErrorsForFileTool;

impl Tool for GetErrorsForFileTool {
    fn name(&self) -> &'static str {
        "getErrorsForFile"
    }

    fn display_name(&self) -> &'static str {
        "Get Errors for File"
    }

    fn description(&self) -> &'static str {
        "Returns the LSP errors for the specified path (if any)."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "path": {"type": "string", "description": "path of the file to get errors"}
            },
            "required": ["path"]
        })
    }

    fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::UiThreadOnly
    }

    fn detail(&self, args: &Value) -> Option<String> {
        str_arg(args, "path").map(file_label)
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: PathArgs = parse_args(&args)?;
            let target = match resolve_path(ctx, Some(&typed.path)) {
                Ok(path) => session_key(&path),
                Err(e) => return Ok(failed("errorsForFile", e)),
            };
            let errors: Vec<String> = ctx
                .host
                .diagnostics
                .diagnostics()
                .iter()
                .filter(|diag| session_key(&diag.path) == target)
                .map(ToString::to_string)
                .collect();
            Ok(json!({ "errorsForFile": errors }))
        })
    }
}

#[derive(Debug)]
pub struct GetAllErrorsTool;

impl Tool for GetAllErrorsTool {
    fn name(&self) -> &'static str {
        "getAllErrors"
    }

    fn display_name(&self) -> &'static str {
        "Get Errors"
    }

    fn description(&self) -> &'static str {
        "Returns all the errors found by LSP."
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "additionalProperties": false, "properties": {}})
    }

    fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::UiThreadOnly
    }

    fn execute<'a>(&'a self, _args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let errors: Vec<String> = ctx
                .host
                .diagnostics
                .diagnostics()
                .iter()
                .map(ToString::to_string)
                .collect();
            Ok(json!({ "errors": errors }))
        })
    }
}

// ============================================================================
// Terminal and settings
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunTerminalArgs {
    command: String,
    work_dir: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug)]
pub struct RunTerminalCommandTool;

impl Tool for RunTerminalCommandTool {
    fn name(&self) -> &'static str {
        "runTerminalCommand"
    }

    fn display_name(&self) -> &'static str {
        "Execute In Terminal"
    }

    fn description(&self) -> &'static str {
        "Executes a command in the user's visible terminal.\n\
         This is the ONLY way to run commands.\n\
         Do NOT simulate command execution or output."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "command": {"type": "string", "description": "Shell command to execute"},
                "workDir": {"type": "string", "description": "Working directory for execution (defaults to active project)"},
                "timeoutSeconds": {"type": "integer", "minimum": 1, "description": "Seconds before the command is killed (default 60)"}
            },
            "required": ["command"]
        })
    }

    fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::BackgroundThenNotifyOnUi
    }

    fn requires_permission(&self) -> bool {
        true
    }

    fn permission_scope(&self) -> Option<&'static str> {
        Some("runTerminalCommand")
    }

    fn detail(&self, args: &Value) -> Option<String> {
        str_arg(args, "command").map(str::to_owned)
    }

    fn question(&self, args: &Value) -> String {
        format!(
            "Allow the assistant to run `{}`?",
            str_arg(args, "command").unwrap_or_default()
        )
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: RunTerminalArgs = parse_args(&args)?;
            let terminal = &ctx.settings.terminal;
            let working_dir = match resolve_path(ctx, typed.work_dir.as_deref()) {
                Ok(dir) => dir,
                Err(e) => return Ok(failed("result", e)),
            };
            let request = TerminalRequest {
                command: typed.command,
                identifier: terminal.identifier.clone(),
                working_dir: Some(working_dir),
                timeout: terminal.effective_timeout(typed.timeout_seconds),
            };
            Ok(match ctx.host.terminal.execute(request).await {
                Ok(output) => json!({ "result": output }),
                Err(e) => failed("result", e),
            })
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenSettingsArgs {
    page: Option<String>,
}

#[derive(Debug)]
pub struct OpenSettingsTool;

impl Tool for OpenSettingsTool {
    fn name(&self) -> &'static str {
        "openIDESettings"
    }

    fn display_name(&self) -> &'static str {
        "Open IDE Settings"
    }

    fn description(&self) -> &'static str {
        "Opens the IDE settings dialog, optionally on a specific page. \
         Use this when the user needs to change a setting themselves."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "page": {"type": "string", "description": "settings page to open (optional)"}
            }
        })
    }

    fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::UiThreadOnly
    }

    fn detail(&self, args: &Value) -> Option<String> {
        str_arg(args, "page").map(str::to_owned)
    }

    fn execute<'a>(&'a self, args: Value, ctx: &'a ToolCtx) -> ToolFut<'a> {
        Box::pin(async move {
            let typed: OpenSettingsArgs = parse_args(&args)?;
            ctx.host.settings.open_settings(typed.page.as_deref());
            Ok(json!({ "result": true }))
        })
    }
}

/// Register built-in tools into the registry.
pub fn register_builtins(registry: &mut ToolRegistry) -> Result<(), ToolError> {
    let tools: [Arc<dyn Tool>; 15] = [
        Arc::new(SearchFilesTool),
        Arc::new(ReadFileTool),
        Arc::new(EditFileTool),
        Arc::new(ListDirectoryTool),
        Arc::new(PathExistsTool),
        Arc::new(CreateDirectoryTool),
        Arc::new(MovePathTool),
        Arc::new(DeletePathTool),
        Arc::new(GetActiveProjectTool),
        Arc::new(GetOpenFilesTool),
        Arc::new(GetFocusedFileTool),
        Arc::new(GetErrorsForFileTool),
        Arc::new(GetAllErrorsTool),
        Arc::new(RunTerminalCommandTool),
        Arc::new(OpenSettingsTool),
    ];
    for tool in tools {
        registry.register(tool)?;
    }
    Ok(())
}

/// A registry holding every built-in tool.
pub fn builtin_registry() -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::default();
    register_builtins(&mut registry)?;
    Ok(registry)
}
