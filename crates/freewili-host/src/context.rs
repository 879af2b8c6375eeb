//! Caller-held state shared between calls of one run.

use crate::error::{HostError, Result};

/// Names remembered across calls so a script can be run without naming it.
///
/// Resolution order for `run_script`: the explicit name, then the configured
/// file name, then the name of the last file sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptContext {
    file_name: Option<String>,
    last_sent: Option<String>,
}

impl ScriptContext {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `name` whenever no explicit script name is given.
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Remember the device-side name of a file just sent.
    pub fn record_sent(&mut self, name: impl Into<String>) {
        self.last_sent = Some(name.into());
    }

    /// Configured file name, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Name of the last file sent, if any.
    pub fn last_sent(&self) -> Option<&str> {
        self.last_sent.as_deref()
    }

    /// Resolve the script to run.
    pub fn resolve(&self, explicit: Option<&str>) -> Result<String> {
        explicit
            .filter(|name| !name.is_empty())
            .or(self.file_name.as_deref())
            .or(self.last_sent.as_deref())
            .map(str::to_string)
            .ok_or(HostError::MissingScriptName)
    }
}

/// Final path component of a device or host path.
pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_order() {
        let mut ctx = ScriptContext::new();
        assert!(matches!(ctx.resolve(None), Err(HostError::MissingScriptName)));

        ctx.record_sent("blink.wasm");
        assert_eq!(ctx.resolve(None).unwrap(), "blink.wasm");

        let mut ctx = ScriptContext::new().with_file_name("main.wasm");
        ctx.record_sent("blink.wasm");
        assert_eq!(ctx.resolve(None).unwrap(), "main.wasm");
        assert_eq!(ctx.resolve(Some("other.wasm")).unwrap(), "other.wasm");
        assert_eq!(ctx.resolve(Some("")).unwrap(), "main.wasm");
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/scripts/blink.wasm"), "blink.wasm");
        assert_eq!(basename("C:\\work\\blink.wasm"), "blink.wasm");
        assert_eq!(basename("blink.wasm"), "blink.wasm");
    }
}
