// Game package validation and installation.
//
// An uploaded package is a ZIP that, after unwrapping an optional single
// top-level directory, must contain `config.json` plus `client/` and
// `server/` trees with their entry points.

use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const REQUIRED_CONFIG_FIELDS: [&str; 4] = ["name", "version", "description", "command"];

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("Invalid zip archive")]
    BadArchive,
    #[error("'config.json' missing from package root")]
    MissingConfig,
    #[error("'config.json' is not valid JSON")]
    BadConfig,
    #[error("config is missing required fields: {0}")]
    MissingFields(String),
    #[error("config fields must not be empty: {0}")]
    EmptyFields(String),
    #[error("'{0}' missing from package")]
    MissingEntry(&'static str),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Validated contents of a package's `config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct GameConfig {
    pub name: String,
    pub version: String,
    pub description: String,
    pub command: String,
}

/// Unzips the archive into a fresh directory under `temp_root`.
///
/// Returns `(extract_root, content_root)`: the first is what the caller
/// removes on cleanup, the second is where the game files actually live
/// (one level down when the author zipped a wrapping folder).
pub fn extract_archive(
    zip_path: &Path,
    temp_root: &Path,
) -> Result<(PathBuf, PathBuf), PackageError> {
    let extract_root = temp_root.join(Uuid::new_v4().to_string());
    fs::create_dir_all(&extract_root)?;

    let opened = fs::File::open(zip_path)?;
    let extracted = zip::ZipArchive::new(opened)
        .and_then(|mut archive| archive.extract(&extract_root));
    if extracted.is_err() {
        let _ = fs::remove_dir_all(&extract_root);
        return Err(PackageError::BadArchive);
    }

    let content_root = resolve_content_root(&extract_root)?;
    Ok((extract_root, content_root))
}

// Authors zip either the game folder or its contents; accept both.
fn resolve_content_root(extract_root: &Path) -> Result<PathBuf, PackageError> {
    if extract_root.join("config.json").exists() {
        return Ok(extract_root.to_path_buf());
    }

    let entries: Vec<_> = fs::read_dir(extract_root)?
        .filter_map(Result::ok)
        // Skip archive junk such as __MACOSX.
        .filter(|e| !e.file_name().to_string_lossy().starts_with("__"))
        .collect();

    if let [only] = entries.as_slice()
        && only.path().is_dir()
    {
        return Ok(only.path());
    }
    Ok(extract_root.to_path_buf())
}

/// Reads and validates `config.json` under the content root.
pub fn read_config(content_root: &Path) -> Result<GameConfig, PackageError> {
    let config_path = content_root.join("config.json");
    if !config_path.exists() {
        return Err(PackageError::MissingConfig);
    }

    let raw = fs::read_to_string(&config_path)?;
    let value: Value = serde_json::from_str(&raw).map_err(|_| PackageError::BadConfig)?;

    let missing: Vec<&str> = REQUIRED_CONFIG_FIELDS
        .iter()
        .copied()
        .filter(|field| value.get(field).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(PackageError::MissingFields(missing.join(",")));
    }

    let empty: Vec<&str> = REQUIRED_CONFIG_FIELDS
        .iter()
        .copied()
        .filter(|field| {
            value
                .get(field)
                .and_then(Value::as_str)
                .is_none_or(|s| s.is_empty())
        })
        .collect();
    if !empty.is_empty() {
        return Err(PackageError::EmptyFields(empty.join(",")));
    }

    serde_json::from_value(value).map_err(|_| PackageError::BadConfig)
}

/// Validates the required file hierarchy under the content root.
pub fn check_layout(content_root: &Path) -> Result<(), PackageError> {
    if !content_root.join("client").is_dir() {
        return Err(PackageError::MissingEntry("client"));
    }
    if !content_root.join("client").join("client_main.py").is_file() {
        return Err(PackageError::MissingEntry("client/client_main.py"));
    }
    if !content_root.join("server").is_dir() {
        return Err(PackageError::MissingEntry("server"));
    }
    if !content_root.join("server").join("server_main.py").is_file() {
        return Err(PackageError::MissingEntry("server/server_main.py"));
    }
    Ok(())
}

/// Moves the validated package into its storage slot, replacing leftovers.
pub fn install(content_root: &Path, dest: &Path) -> Result<(), PackageError> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    // rename is atomic on the same filesystem; fall back to a copy when the
    // temp dir lives on another mount.
    if fs::rename(content_root, dest).is_ok() {
        return Ok(());
    }
    copy_tree(content_root, dest)?;
    fs::remove_dir_all(content_root)?;
    Ok(())
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
