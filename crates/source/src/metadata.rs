//! Metadata enrichment: run every configured tool over a file's local bytes.

use crate::error::ToolErrorKind;
use crate::key::Key;
use crate::tool::{CommandTool, ToolHandle};
use std::path::Path;
use std::sync::Arc;
use vault_config::ToolConfig;

/// Ordered list of identification tools.
///
/// Enrichment only reads the local file; it never touches the source or the
/// blob store.
#[derive(Clone, Default)]
pub struct Toolchain {
    tools: Vec<ToolHandle>,
}

impl Toolchain {
    pub fn new(tools: impl IntoIterator<Item = ToolHandle>) -> Self {
        Self {
            tools: tools.into_iter().collect(),
        }
    }

    /// One [`CommandTool`] per configured tool, in configuration order.
    pub fn from_config(tools: &[ToolConfig]) -> Self {
        Self::new(tools.iter().map(|config| Arc::new(CommandTool::from(config)) as ToolHandle))
    }

    pub fn tools(&self) -> &[ToolHandle] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run each enabled tool against `path`, in order, merging its properties
    /// into `key` as `<tool>.<property>`.
    ///
    /// Tools are independent: one failing is logged and leaves no trace in
    /// the result, and the rest still run.
    #[tracing::instrument(skip_all, fields(key = key.value()))]
    pub async fn enrich(&self, mut key: Key, path: &Path) -> Key {
        for tool in &self.tools {
            let name = tool.name();
            if !tool.is_enabled() {
                tracing::debug!(tool = name, "Tool disabled; skipping");
                continue;
            }
            match tool.identify(path).await {
                Ok(properties) => {
                    tracing::trace!(tool = name, count = properties.len(), "Tool identified file");
                    for (property, value) in properties {
                        key.metadata.insert(format!("{name}.{property}"), value);
                    }
                },
                Err(err) => match &*err {
                    ToolErrorKind::Unavailable(reason) => {
                        tracing::debug!(tool = name, reason = %reason, "Tool unavailable; skipping");
                    },
                    ToolErrorKind::Failed(reason) => {
                        tracing::warn!(tool = name, reason = %reason, path = %path.display(), "Tool failed to identify file");
                    },
                },
            }
        }
        key
    }
}

impl std::fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tools.iter().map(|tool| tool.name())).finish()
    }
}
