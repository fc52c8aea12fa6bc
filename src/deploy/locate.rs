use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{E2eError, E2eResult};

/// Find `relative` in the plugins repository.
///
/// `repo_dir` is tried first. Otherwise the working directory and each of its parents are
/// searched, so the checks can be started from anywhere inside a checkout.
pub fn locate_repo_file(repo_dir: Option<&Path>, relative: &str) -> E2eResult<PathBuf> {
    if let Some(root) = repo_dir {
        let candidate = root.join(relative);
        if candidate.exists() {
            return absolute(&candidate, relative);
        }
        debug!(root = %root.display(), relative, "Not found under repository dir");
    }

    let cwd = std::env::current_dir()
        .map_err(|e| E2eError::locate(relative, format!("no working directory: {}", e)))?;

    match search_upwards(&cwd, relative) {
        Some(found) => absolute(&found, relative),
        None => Err(E2eError::locate(
            relative,
            format!(
                "not found under {} or any parent of {}",
                repo_dir.map(|d| d.display().to_string()).unwrap_or_else(|| "<unset>".to_string()),
                cwd.display()
            ),
        )),
    }
}

/// Join `relative` onto `start` and each of its ancestors, returning the first that exists
pub fn search_upwards(start: &Path, relative: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(relative))
        .find(|candidate| candidate.exists())
}

fn absolute(path: &Path, relative: &str) -> E2eResult<PathBuf> {
    std::fs::canonicalize(path).map_err(|e| E2eError::locate(relative, e.to_string()))
}
