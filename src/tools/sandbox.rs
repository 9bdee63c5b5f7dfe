//! Sandboxed Code Execution
//!
//! Runs model-written Python snippets for the manager agent.
//!
//! Security Model:
//! - **Import Allowlist**: only configured modules plus a small set of harmless
//!   standard-library modules may be imported
//! - **Blocked Calls**: dynamic import, `exec`/`eval`/`compile`, bare `open` and
//!   scope introspection are rejected before anything runs
//! - **Import Guard**: the interpreter refuses unlisted modules again at runtime,
//!   so a statement the static scan misreads still cannot load them
//! - **Bounded Runtime**: every snippet runs in a child process with a timeout

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::traits::{required_str, Tool};
use super::types::{JsonSchema, PropertySchema, ToolDescriptor, ToolError};

pub const DEFAULT_CODE_TIMEOUT: Duration = Duration::from_secs(60);

/// Standard-library modules that are always importable
pub const BASE_BUILTIN_MODULES: &[&str] = &[
    "collections",
    "datetime",
    "itertools",
    "math",
    "queue",
    "random",
    "re",
    "stat",
    "statistics",
    "time",
    "unicodedata",
];

#[derive(Debug, Clone, thiserror::Error)]
pub enum SandboxError {
    #[error("Import of '{0}' is not allowed. Authorized imports are: {1}")]
    UnauthorizedImport(String, String),
    #[error("Import statement not supported: {0}")]
    UnsupportedImport(String),
    #[error("Forbidden call: {0}")]
    BlockedCall(String),
    #[error("Python interpreter '{0}' not found")]
    InterpreterNotFound(String),
    #[error("Code execution timed out after {0}s")]
    Timeout(u64),
    #[error("I/O error: {0}")]
    Io(String),
}

lazy_static! {
    static ref IMPORT_STATEMENT: Regex = Regex::new(r"^import\s+(.+)$").unwrap();
    static ref FROM_IMPORT_STATEMENT: Regex = Regex::new(r"^from\s+(\S+)\s+import\b").unwrap();
    static ref IMPORT_KEYWORD: Regex = Regex::new(r"\bimport\b").unwrap();

    static ref BLOCKED_CALLS: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"\b__import__\s*\(").unwrap(), "__import__"),
        (Regex::new(r"(?m)(?:^|[^.\w])(?:exec|eval|compile)\s*\(").unwrap(), "exec/eval/compile"),
        (Regex::new(r"(?m)(?:^|[^.\w])open\s*\(").unwrap(), "open"),
        (Regex::new(r"(?m)(?:^|[^.\w])(?:globals|locals|vars)\s*\(").unwrap(), "globals/locals/vars"),
        (Regex::new(r"\b__(?:builtins|subclasses|globals|closure|self)__\b").unwrap(), "dunder access"),
    ];
}

// ============================================================================
// Import Policy
// ============================================================================

/// Which modules snippets may import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportPolicy {
    authorized: Vec<String>,
}

impl ImportPolicy {
    /// Base builtins plus `additional` entries. An entry may be an exact module,
    /// a `package.*` wildcard or `*` for anything.
    pub fn new<S: AsRef<str>>(additional: &[S]) -> Self {
        let mut authorized: Vec<String> =
            BASE_BUILTIN_MODULES.iter().map(|m| m.to_string()).collect();
        for module in additional {
            let module = module.as_ref().trim();
            if !module.is_empty() && !authorized.iter().any(|m| m == module) {
                authorized.push(module.to_string());
            }
        }
        Self { authorized }
    }

    pub fn authorized(&self) -> &[String] {
        &self.authorized
    }

    pub fn is_authorized(&self, module: &str) -> bool {
        self.authorized.iter().any(|entry| {
            if entry == "*" {
                return true;
            }
            match entry.strip_suffix(".*") {
                Some(prefix) => module == prefix || module.starts_with(&format!("{}.", prefix)),
                None => entry == module,
            }
        })
    }

    /// Reject code that imports anything outside the allowlist or calls a
    /// blocked builtin
    pub fn check(&self, code: &str) -> Result<(), SandboxError> {
        for (pattern, name) in BLOCKED_CALLS.iter() {
            if pattern.is_match(code) {
                return Err(SandboxError::BlockedCall(name.to_string()));
            }
        }
        for module in extract_imports(code)? {
            if !self.is_authorized(&module) {
                return Err(SandboxError::UnauthorizedImport(
                    module,
                    self.authorized.join(", "),
                ));
            }
        }
        Ok(())
    }
}

/// Every module named by an import statement in `code`.
///
/// `import` is a keyword, so any statement that mentions it but does not
/// read as a plain `import` or `from ... import` is rejected.
pub fn extract_imports(code: &str) -> Result<Vec<String>, SandboxError> {
    let mut modules = Vec::new();

    for statement in logical_statements(code) {
        if !IMPORT_KEYWORD.is_match(&statement) {
            continue;
        }
        if let Some(caps) = FROM_IMPORT_STATEMENT.captures(&statement) {
            let module = caps[1].to_string();
            if module.starts_with('.') {
                return Err(SandboxError::UnsupportedImport(statement));
            }
            modules.push(module);
        } else if let Some(caps) = IMPORT_STATEMENT.captures(&statement) {
            for item in caps[1].split(',') {
                match item.split_whitespace().next() {
                    Some(name) => modules.push(name.to_string()),
                    None => return Err(SandboxError::UnsupportedImport(statement)),
                }
            }
        } else {
            return Err(SandboxError::UnsupportedImport(statement));
        }
    }

    Ok(modules)
}

/// Split `code` into simple statements with comments dropped and string
/// literals emptied. A top-level `:` also ends a statement, so the body of a
/// one-line compound statement (`if x: import os`) stands on its own.
fn logical_statements(code: &str) -> Vec<String> {
    let chars: Vec<char> = code.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '#' => {
                i = skip_comment(&chars, i);
                continue;
            }
            '\'' | '"' => {
                i = skip_string(&chars, i);
                current.push_str("''");
                continue;
            }
            '\\' if chars.get(i + 1) == Some(&'\n') => {
                current.push(' ');
                i += 2;
                continue;
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            // `:=` is an expression
            ':' if depth == 0 && chars.get(i + 1) != Some(&'=') => {
                push_statement(&mut statements, &mut current);
                i += 1;
                continue;
            }
            '\n' | ';' if depth == 0 => {
                push_statement(&mut statements, &mut current);
                i += 1;
                continue;
            }
            _ => {}
        }
        current.push(c);
        i += 1;
    }
    push_statement(&mut statements, &mut current);

    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !statement.is_empty() {
        statements.push(statement);
    }
    current.clear();
}

fn skip_comment(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i] != '\n' {
        i += 1;
    }
    i
}

/// Index just past the string literal whose opening quote is at `start`
fn skip_string(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let formatted = has_format_prefix(chars, start);
    let triple = chars.get(start + 1) == Some(&quote) && chars.get(start + 2) == Some(&quote);
    let mut i = start + if triple { 3 } else { 1 };

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            i += 2;
            continue;
        }
        if c == quote {
            if !triple {
                return i + 1;
            }
            if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                return i + 3;
            }
        }
        // Unterminated single-line literal: Python rejects it, keep scanning code
        if c == '\n' && !triple {
            return i;
        }
        if formatted && c == '{' {
            if chars.get(i + 1) == Some(&'{') {
                i += 2;
            } else {
                i = skip_replacement_field(chars, i + 1);
            }
            continue;
        }
        i += 1;
    }

    chars.len()
}

/// f-strings (and t-strings) carry expressions that may hold their own quotes
fn has_format_prefix(chars: &[char], quote_at: usize) -> bool {
    let mut start = quote_at;
    while start > 0 && (chars[start - 1].is_alphanumeric() || chars[start - 1] == '_') {
        start -= 1;
    }
    let prefix = &chars[start..quote_at];
    prefix.len() <= 2
        && prefix.iter().all(|c| "rRbBuUfFtT".contains(*c))
        && prefix.iter().any(|c| matches!(c, 'f' | 'F' | 't' | 'T'))
}

/// Index just past the `}` closing a replacement field that starts at `i`
fn skip_replacement_field(chars: &[char], mut i: usize) -> usize {
    let mut depth = 0usize;

    while i < chars.len() {
        match chars[i] {
            '\'' | '"' => {
                i = skip_string(chars, i);
                continue;
            }
            '#' => {
                i = skip_comment(chars, i);
                continue;
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            '}' if depth == 0 => return i + 1,
            '}' => depth -= 1,
            // Format spec: literal text plus nested fields
            ':' if depth == 0 => return skip_format_spec(chars, i + 1),
            _ => {}
        }
        i += 1;
    }

    chars.len()
}

fn skip_format_spec(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() {
        match chars[i] {
            '{' => {
                i = skip_replacement_field(chars, i + 1);
                continue;
            }
            '}' => return i + 1,
            _ => {}
        }
        i += 1;
    }

    chars.len()
}

// ============================================================================
// Runtime Import Guard
// ============================================================================

/// Runs ahead of every snippet. It wraps `builtins.__import__` so code running
/// as `__main__` may only load authorized modules (libraries keep importing
/// their own dependencies), then executes the snippet from `argv[1]`.
const IMPORT_GUARD: &str = r#"import builtins
import sys


def _install(authorized):
    original = builtins.__import__

    def allowed(name):
        for entry in authorized:
            if entry == "*" or entry == name:
                return True
            if entry.endswith(".*") and (name == entry[:-2] or name.startswith(entry[:-1])):
                return True
        return False

    def guarded(name, globals=None, locals=None, fromlist=(), level=0):
        if globals is not None and globals.get("__name__") == "__main__":
            if level or not allowed(name):
                raise ImportError("Import of '%s' is not allowed" % name)
        return original(name, globals, locals, fromlist, level)

    builtins.__import__ = guarded


_install(__AUTHORIZED__)
_source = sys.argv.pop(1)
exec(compile(_source, "<snippet>", "exec"), {"__name__": "__main__", "__builtins__": builtins})
"#;

/// The guard program for `policy`; pass the snippet as its first argument
pub fn import_guard(policy: &ImportPolicy) -> Result<String, SandboxError> {
    let authorized =
        serde_json::to_string(policy.authorized()).map_err(|e| SandboxError::Io(e.to_string()))?;
    Ok(IMPORT_GUARD.replace("__AUTHORIZED__", &authorized))
}

// ============================================================================
// Executors
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ExecutionOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Something that can run a code snippet
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    fn policy(&self) -> &ImportPolicy;

    async fn run(&self, code: &str) -> Result<ExecutionOutput, SandboxError>;
}

/// Runs snippets with a local Python interpreter as `python -c <guard> <code>`
pub struct PythonExecutor {
    python_bin: String,
    policy: ImportPolicy,
    timeout: Duration,
    working_dir: PathBuf,
}

impl PythonExecutor {
    pub fn new(python_bin: &str, policy: ImportPolicy, timeout: Duration) -> Self {
        Self {
            python_bin: python_bin.to_string(),
            policy,
            timeout,
            working_dir: PathBuf::from("."),
        }
    }

    /// Directory snippets run in; relative artifact paths resolve against it
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }
}

#[async_trait]
impl CodeExecutor for PythonExecutor {
    fn policy(&self) -> &ImportPolicy {
        &self.policy
    }

    async fn run(&self, code: &str) -> Result<ExecutionOutput, SandboxError> {
        self.policy.check(code)?;

        let interpreter = which::which(&self.python_bin)
            .map_err(|_| SandboxError::InterpreterNotFound(self.python_bin.clone()))?;

        let mut cmd = tokio::process::Command::new(interpreter);
        cmd.arg("-c")
            .arg(import_guard(&self.policy)?)
            .arg(code)
            .current_dir(&self.working_dir)
            .kill_on_drop(true);

        tracing::debug!("Running {} byte snippet with {}", code.len(), self.python_bin);

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(ExecutionOutput {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code(),
            }),
            Ok(Err(e)) => Err(SandboxError::Io(e.to_string())),
            Err(_) => Err(SandboxError::Timeout(self.timeout.as_secs())),
        }
    }
}

// ============================================================================
// Tool
// ============================================================================

/// Exposes a `CodeExecutor` to the model as the `python_interpreter` tool
pub struct CodeExecutionTool {
    executor: Arc<dyn CodeExecutor>,
}

impl CodeExecutionTool {
    pub fn new(executor: Arc<dyn CodeExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for CodeExecutionTool {
    fn descriptor(&self) -> ToolDescriptor {
        let description = format!(
            "Evaluates Python code and returns everything it prints. Variables do not persist between calls. \
             You may only import these modules: {}.",
            self.executor.policy().authorized().join(", ")
        );
        ToolDescriptor {
            name: "python_interpreter".to_string(),
            description,
            input_schema: JsonSchema::object().with_required(
                "code",
                PropertySchema::string("The Python code to run. Use print() to see results."),
            ),
            output_type: "string".to_string(),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<String, ToolError> {
        let code = required_str(&arguments, "code")?;

        self.executor
            .policy()
            .check(code)
            .map_err(|e| ToolError::PermissionDenied(e.to_string()))?;

        let output = self.executor.run(code).await.map_err(|e| match e {
            SandboxError::Timeout(_) => ToolError::Timeout(e.to_string()),
            SandboxError::UnauthorizedImport(..)
            | SandboxError::UnsupportedImport(_)
            | SandboxError::BlockedCall(_) => {
                ToolError::PermissionDenied(e.to_string())
            }
            other => ToolError::ExecutionFailed(other.to_string()),
        })?;

        if !output.success() {
            return Err(ToolError::ExecutionFailed(format!(
                "Code exited with status {}:\n{}{}",
                output
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                output.stdout,
                output.stderr
            )));
        }

        let mut text = format!("Execution logs:\n{}", output.stdout);
        if !output.stderr.trim().is_empty() {
            text.push_str(&format!("\nStderr:\n{}", output.stderr));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map_policy() -> ImportPolicy {
        ImportPolicy::new(&[
            "geopandas",
            "plotly",
            "plotly.express",
            "plotly.express.colors",
            "shapely",
            "json",
            "pandas",
            "numpy",
        ])
    }

    #[test]
    fn test_authorized_imports() {
        let policy = map_policy();
        let code = "import pandas as pd\nimport plotly.express as px\nfrom math import sqrt; import json";
        assert!(policy.check(code).is_ok());
    }

    #[test]
    fn test_unauthorized_import_rejected() {
        let policy = map_policy();
        let err = policy.check("import os\nos.system('ls')").unwrap_err();
        assert!(matches!(err, SandboxError::UnauthorizedImport(ref m, _) if m == "os"));

        let err = policy.check("from subprocess import run").unwrap_err();
        assert!(matches!(err, SandboxError::UnauthorizedImport(ref m, _) if m == "subprocess"));

        // Submodules are not implied by their parent
        assert!(policy.check("import plotly.graph_objects").is_err());
    }

    #[test]
    fn test_wildcard_entries() {
        let policy = ImportPolicy::new(&["plotly.*"]);
        assert!(policy.is_authorized("plotly"));
        assert!(policy.is_authorized("plotly.graph_objects"));
        assert!(!policy.is_authorized("plotlyx"));
        assert!(ImportPolicy::new(&["*"]).is_authorized("os"));
    }

    #[test]
    fn test_blocked_calls() {
        let policy = map_policy();
        assert!(matches!(
            policy.check("__import__('os')"),
            Err(SandboxError::BlockedCall(_))
        ));
        assert!(policy.check("eval('1+1')").is_err());
        assert!(policy.check("x = open('/etc/passwd').read()").is_err());
        // Method calls with the same name are fine
        assert!(policy.check("fig.write_image('saved_map.png')\ndf.eval('a + b')").is_ok());
    }

    #[test]
    fn test_relative_import_rejected() {
        assert!(extract_imports("from . import secrets").is_err());
    }

    #[test]
    fn test_comments_ignored() {
        let modules = extract_imports("x = 1  # import os").unwrap();
        assert!(modules.is_empty());
    }

    fn rejected_module(policy: &ImportPolicy, code: &str) -> Option<String> {
        match policy.check(code) {
            Err(SandboxError::UnauthorizedImport(module, _)) => Some(module),
            _ => None,
        }
    }

    #[test]
    fn test_import_in_one_line_compound_statement() {
        let policy = map_policy();
        assert_eq!(
            rejected_module(&policy, "if True: import os\nos.system('id')").as_deref(),
            Some("os")
        );
        assert_eq!(
            rejected_module(&policy, "try: import socket\nexcept Exception: pass").as_deref(),
            Some("socket")
        );
        assert_eq!(
            rejected_module(&policy, "for _ in range(1): import shutil").as_deref(),
            Some("shutil")
        );
    }

    #[test]
    fn test_hash_inside_string_is_not_a_comment() {
        let policy = map_policy();
        assert_eq!(
            rejected_module(&policy, "x = '#'; import subprocess\nsubprocess.run(['id'])")
                .as_deref(),
            Some("subprocess")
        );
        assert_eq!(
            rejected_module(&policy, "label = f\"{'#'}\"; import os").as_deref(),
            Some("os")
        );
        assert_eq!(
            rejected_module(&policy, "label = f\"{x:'^10}\"; import os; y = 'z'").as_deref(),
            Some("os")
        );
    }

    #[test]
    fn test_strings_hide_nothing_and_hold_nothing() {
        let policy = map_policy();
        let code = "doc = \"\"\"\nimport os\n\"\"\"\ntitle = 'import socket'\nimport json";
        assert_eq!(extract_imports(code).unwrap(), vec!["json".to_string()]);
        assert!(policy.check(code).is_ok());

        let code = "s = '''a # b'''; import os";
        assert_eq!(extract_imports(code).unwrap(), vec!["os".to_string()]);
    }

    #[test]
    fn test_multiline_and_continued_imports() {
        let code = "from math import (\n    floor,\n    ceil,\n)\nimport pandas \\\n    as pd";
        assert_eq!(
            extract_imports(code).unwrap(),
            vec!["math".to_string(), "pandas".to_string()]
        );
    }

    #[test]
    fn test_unreadable_import_statement_rejected() {
        assert!(matches!(
            extract_imports("from.os import path"),
            Err(SandboxError::UnsupportedImport(_))
        ));
        assert!(matches!(
            extract_imports("x = 1 if import else 2"),
            Err(SandboxError::UnsupportedImport(_))
        ));
        // Identifiers that merely contain the keyword are fine
        assert!(extract_imports("importance = 3\nreimport = importance").unwrap().is_empty());
    }

    #[test]
    fn test_colon_outside_headers() {
        let code = "row = {'city': 'Tokyo'}\npart = rows[1:3]\nif (n := len(rows)) > 2: print(n)";
        assert!(extract_imports(code).unwrap().is_empty());
    }

    #[test]
    fn test_import_guard_embeds_policy() {
        let guard = import_guard(&ImportPolicy::new(&["plotly.*"])).unwrap();
        assert!(guard.contains(r#"_install(["collections","#));
        assert!(guard.contains(r#""plotly.*"])"#));
        assert!(!guard.contains("__AUTHORIZED__"));
    }

    fn run_guarded(python: &std::path::Path, policy: &ImportPolicy, code: &str) -> std::process::Output {
        std::process::Command::new(python)
            .arg("-c")
            .arg(import_guard(policy).unwrap())
            .arg(code)
            .output()
            .unwrap()
    }

    #[test]
    fn test_import_guard_refuses_at_runtime() {
        let Ok(python) = which::which("python3") else {
            return;
        };
        let policy = map_policy();

        // Already loaded by the interpreter, still refused
        let output = run_guarded(&python, &policy, "import os");
        assert!(!output.status.success());
        assert!(String::from_utf8_lossy(&output.stderr).contains("Import of 'os' is not allowed"));

        let output = run_guarded(
            &python,
            &policy,
            "import math\ntry: import socket\nexcept ImportError as e: print(e)\nprint(math.floor(2.5))",
        );
        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("Import of 'socket' is not allowed"));
        assert!(stdout.trim_end().ends_with('2'));
    }

    #[test]
    fn test_import_guard_keeps_snippet_line_numbers() {
        let Ok(python) = which::which("python3") else {
            return;
        };
        let output = run_guarded(&python, &map_policy(), "x = 1\nraise ValueError('boom')");
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains(r#"File "<snippet>", line 2"#));
        assert!(stderr.contains("ValueError: boom"));
    }

    struct EchoExecutor {
        policy: ImportPolicy,
        output: ExecutionOutput,
    }

    #[async_trait]
    impl CodeExecutor for EchoExecutor {
        fn policy(&self) -> &ImportPolicy {
            &self.policy
        }

        async fn run(&self, _code: &str) -> Result<ExecutionOutput, SandboxError> {
            Ok(self.output.clone())
        }
    }

    #[tokio::test]
    async fn test_tool_checks_policy_before_running() {
        let tool = CodeExecutionTool::new(Arc::new(EchoExecutor {
            policy: map_policy(),
            output: ExecutionOutput {
                stdout: "ran".to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            },
        }));

        let err = tool
            .execute(json!({"code": "import socket"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied(_)));

        let ok = tool.execute(json!({"code": "print(1)"})).await.unwrap();
        assert_eq!(ok, "Execution logs:\nran");
    }

    #[tokio::test]
    async fn test_tool_reports_nonzero_exit() {
        let tool = CodeExecutionTool::new(Arc::new(EchoExecutor {
            policy: map_policy(),
            output: ExecutionOutput {
                stdout: String::new(),
                stderr: "NameError: name 'x' is not defined".to_string(),
                exit_code: Some(1),
            },
        }));
        let err = tool.execute(json!({"code": "print(x)"})).await.unwrap_err();
        assert!(err.to_string().contains("NameError"));
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let executor = PythonExecutor::new(
            "definitely-not-a-python-binary",
            map_policy(),
            DEFAULT_CODE_TIMEOUT,
        );
        let err = executor.run("print(1)").await.unwrap_err();
        assert!(matches!(err, SandboxError::InterpreterNotFound(_)));
    }
}
