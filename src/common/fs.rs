//! File helpers for the state and proxy-engine documents
//!
//! Every write goes to a sibling temp file first and is renamed over the
//! target, so readers never observe a half-written document.

use crate::{Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read a document, treating a missing or whitespace-only file as absent
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) if content.trim().is_empty() => Ok(None),
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::persist("read", path, e)),
    }
}

/// Load a JSON document whose root must be an object.
///
/// Missing or blank files yield an empty object.
pub fn load_json_object(path: &Path) -> Result<Map<String, Value>> {
    let Some(content) = read_optional(path)? else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(_) => Err(Error::parse(format!(
            "{}: document root is not an object",
            path.display()
        ))),
        Err(e) => Err(Error::parse(format!("{}: {}", path.display(), e))),
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path`
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut data = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::parse(format!("encode {}: {}", path.display(), e)))?;
    data.push(b'\n');
    write_atomic(path, &data)
}

/// Write `data` to a temp file next to `path` and rename it into place
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| Error::persist("create directory", &dir, e))?;

    let tmp = temp_path(&dir, path);
    let written = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        });
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(Error::persist("write", &tmp, e));
    }

    if let Err(e) = replace(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::persist("replace", path, e));
    }

    debug!(path = %path.display(), bytes = data.len(), "document written");
    Ok(())
}

/// Remove a file, reporting whether it existed
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::persist("remove", path, e)),
    }
}

fn temp_path(dir: &Path, target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    dir.join(format!(".{}.{}.tmp", name, std::process::id()))
}

#[cfg(not(windows))]
fn replace(tmp: &Path, target: &Path) -> io::Result<()> {
    fs::rename(tmp, target)
}

#[cfg(windows)]
fn replace(tmp: &Path, target: &Path) -> io::Result<()> {
    match fs::rename(tmp, target) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(target);
            fs::rename(tmp, target).or(Err(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_load_missing_and_blank() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(load_json_object(&missing).unwrap().is_empty());

        let blank = dir.path().join("blank.json");
        fs::write(&blank, "  \n\t").unwrap();
        assert!(load_json_object(&blank).unwrap().is_empty());
    }

    #[test]
    fn test_load_rejects_non_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(load_json_object(&path), Err(Error::Parse(_))));

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_json_object(&path), Err(Error::Parse(_))));
    }

    #[test]
    fn test_write_json_creates_parents_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/doc.json");

        write_json(&path, &json!({"a": 1})).unwrap();
        write_json(&path, &json!({"b": 2})).unwrap();

        let doc = load_json_object(&path).unwrap();
        assert_eq!(doc.get("b"), Some(&json!(2)));
        assert!(doc.get("a").is_none());

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        assert!(fs::read_to_string(&path).unwrap().ends_with('\n'));
    }

    #[test]
    fn test_remove_file_if_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x");
        assert!(!remove_file_if_exists(&path).unwrap());
        fs::write(&path, "x").unwrap();
        assert!(remove_file_if_exists(&path).unwrap());
    }
}
