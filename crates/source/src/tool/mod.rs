//! Identification tools.
//!
//! A tool looks at a local file and reports a flat map of properties about
//! it. What the properties mean is up to the tool; this crate only runs them
//! and namespaces their output (see [`Toolchain`](crate::Toolchain)).

mod command;

pub use self::command::CommandTool;

use crate::error::ToolResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Property name → value, as reported by one tool for one file.
pub type Properties = BTreeMap<String, String>;

/// Shared handle to a tool.
pub type ToolHandle = Arc<dyn Tool>;

#[async_trait]
pub trait Tool: Send + Sync {
    /// Namespace for this tool's properties. Must not contain `.`.
    fn name(&self) -> &str;

    /// Disabled tools are skipped without being run.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Identify the file at `path`.
    ///
    /// Return [`Unavailable`](crate::error::ToolErrorKind::Unavailable) when
    /// the tool can't run at all (so it's skipped quietly), and
    /// [`Failed`](crate::error::ToolErrorKind::Failed) when it ran but
    /// choked on this particular file.
    async fn identify(&self, path: &Path) -> ToolResult<Properties>;
}
