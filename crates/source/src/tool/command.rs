//! External program adapter.

use super::{Properties, Tool};
use crate::error::{ToolErrorKind, ToolResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use vault_config::ToolConfig;

/// Runs `program args... <path>` and reads properties from its stdout.
///
/// Each non-empty stdout line of the form `name=value` or `name: value`
/// becomes a property; anything else (including `#` comments) is ignored.
/// A program that can't be found on `PATH` makes the tool
/// [`Unavailable`](ToolErrorKind::Unavailable); a non-zero exit status is a
/// [`Failed`](ToolErrorKind::Failed) identification.
///
/// # Examples
///
/// ```no_run
/// use vault_source::CommandTool;
///
/// let tool = CommandTool::new("file", "file").with_args(["--brief", "--mime-type"]);
/// ```
#[derive(Debug, Clone)]
pub struct CommandTool {
    name: String,
    program: String,
    args: Vec<String>,
    enabled: bool,
}

impl CommandTool {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            enabled: true,
        }
    }

    /// Arguments passed before the file path.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn resolve(&self) -> ToolResult<PathBuf> {
        which::which(&self.program)
            .map_err(|e| ToolErrorKind::Unavailable(format!("{}: {e}", self.program)).into())
    }
}

impl From<&ToolConfig> for CommandTool {
    fn from(config: &ToolConfig) -> Self {
        Self::new(&config.name, &config.program)
            .with_args(&config.args)
            .with_enabled(config.enabled)
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[tracing::instrument(level = "debug", skip(self), fields(tool = %self.name))]
    async fn identify(&self, path: &Path) -> ToolResult<Properties> {
        let program = self.resolve()?;
        let output = Command::new(&program)
            .args(&self.args)
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolErrorKind::Unavailable(format!("{}: {e}", program.display())))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            exn::bail!(ToolErrorKind::Failed(format!("{} exited with {}: {}", self.program, output.status, stderr.trim())));
        }
        Ok(parse_properties(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse `name=value` / `name: value` lines. Whichever separator comes first
/// wins; later duplicates overwrite earlier ones.
pub(crate) fn parse_properties(output: &str) -> Properties {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let idx = line.find(['=', ':'])?;
            let (name, value) = (line[..idx].trim(), line[idx + 1..].trim());
            (!name.is_empty()).then(|| (name.to_string(), value.to_string()))
        })
        .collect()
}
