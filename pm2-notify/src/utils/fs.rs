//! Filesystem helpers shared across modules.
//!
//! These helpers attach the operation and path to IO errors so log lines
//! say what was being read, not just that a read failed.

use std::path::Path;

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Read a UTF-8 text file (synchronous; used once at startup).
pub fn read_to_string_sync(op: &'static str, path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| io_error(op, path, e))
}

/// Read a whole file into memory.
pub async fn read_bytes(op: &'static str, path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| io_error(op, path, e))
}

/// Final component of a path, or the path itself when it has none.
pub fn base_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("/home/app/.pm2/logs/api-out.log"), "api-out.log");
        assert_eq!(base_name("api-error.log"), "api-error.log");
        assert_eq!(base_name("/"), "/");
    }

    #[test]
    fn test_read_missing_file_carries_path() {
        let err = read_to_string_sync("reading template", Path::new("/nonexistent/template.md"))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("reading template"));
        assert!(msg.contains("/nonexistent/template.md"));
    }
}
