//! Atomic read/write/list/delete of issue files (§4.2).

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::TbdError;
use crate::model::Issue;
use crate::parser;

/// Extension `list` scans for; anything else on disk is ignored.
pub const ISSUE_EXTENSION: &str = "md";

fn issue_path(base_dir: &Path, id: &str) -> PathBuf {
    base_dir.join(format!("{id}.{ISSUE_EXTENSION}"))
}

/// Read a single issue by id.
///
/// # Errors
/// [`TbdError::NotFound`] if the file is absent, [`TbdError::Parse`] if it
/// fails to parse.
pub fn read(base_dir: &Path, id: &str) -> Result<Issue, TbdError> {
    let path = issue_path(base_dir, id);
    let raw = fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            TbdError::NotFound { what: id.to_string() }
        } else {
            TbdError::Io(e)
        }
    })?;
    parser::parse(&raw).map_err(|e| TbdError::Parse {
        path: Some(path),
        detail: e.to_string(),
    })
}

/// Atomically write an issue: write to a same-directory temp file, then
/// rename over the target. Partial files are never observable.
///
/// # Errors
/// Any I/O failure creating, writing, or renaming the temp file.
pub fn write(base_dir: &Path, issue: &Issue) -> Result<(), TbdError> {
    use std::io::Write as _;

    fs::create_dir_all(base_dir)?;
    let target = issue_path(base_dir, &issue.id);
    let body = parser::serialize(issue);

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{}.", issue.id))
        .suffix(".tmp")
        .tempfile_in(base_dir)?;
    tmp.write_all(body.as_bytes())?;
    tmp.flush()?;
    tmp.persist(&target).map_err(|e| TbdError::Io(e.error))?;
    Ok(())
}

/// List every issue in `base_dir`. A directory-absent base returns an empty
/// list, distinct from an error; unparseable files are skipped with a
/// logged warning rather than failing the whole scan.
///
/// # Errors
/// Any I/O error other than the directory being absent.
pub fn list(base_dir: &Path) -> Result<Vec<Issue>, TbdError> {
    let dir = match fs::read_dir(base_dir) {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(TbdError::Io(e)),
    };

    let mut issues = Vec::new();
    for entry in dir {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ISSUE_EXTENSION) {
            continue;
        }
        match fs::read_to_string(&path) {
            Ok(raw) => match parser::parse(&raw) {
                Ok(issue) => issues.push(issue),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unparseable issue file"),
            },
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable issue file"),
        }
    }
    Ok(issues)
}

/// Delete an issue by id. Idempotent: deleting an already-absent issue succeeds.
///
/// # Errors
/// Any I/O error other than the file being absent.
pub fn delete(base_dir: &Path, id: &str) -> Result<(), TbdError> {
    match fs::remove_file(issue_path(base_dir, id)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TbdError::Io(e)),
    }
}
