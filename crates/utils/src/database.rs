use anyhow::{Context, Result};
use std::{
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
};

pub const DATABASE_FILE: &str = "tracking.json";
pub const ENGINE_VERSION: &str = "0.1";

/// Resolves `tracking.json` inside `database_path` when a directory (or a
/// not-yet-existing path without a `.json` extension) is given.
pub fn resolve_database_path<P: AsRef<Path>>(database_path: P) -> PathBuf {
    let path = database_path.as_ref();
    if path.is_dir() || (!path.exists() && !path.to_string_lossy().ends_with(".json")) {
        path.join(DATABASE_FILE)
    } else {
        path.to_path_buf()
    }
}

/// Ensures that the tracking database exists at the specified path.
/// If it doesn't exist or is invalid JSON, it is initialized with an empty
/// `trade_files` table.
///
/// # Example
/// ```no_run
/// use utils::ensure_database_exists;
///
/// let db_path = ensure_database_exists("database").unwrap();
/// println!("Tracking table at: {:?}", db_path);
/// ```
pub fn ensure_database_exists<P: AsRef<Path>>(database_path: P) -> Result<PathBuf> {
    let db_path = resolve_database_path(database_path);

    let needs_initialization = match File::open(&db_path) {
        Ok(mut file) => {
            let mut contents = String::new();
            file.read_to_string(&mut contents)?;
            serde_json::from_str::<serde_json::Value>(&contents).is_err()
        }
        Err(_) => true,
    };

    if needs_initialization {
        initialize_empty(&db_path)?;
    }

    Ok(db_path)
}

fn initialize_empty(db_path: &Path) -> Result<()> {
    let minimal_db = serde_json::json!({
        "engine_version": ENGINE_VERSION,
        "trade_files": []
    });
    write_database(db_path, &minimal_db)?;
    tracing::info!(path = %db_path.display(), "initialized empty tracking database");
    Ok(())
}

/// Reads the database file and returns it as a serde_json::Value.
/// Ensures the database exists before reading.
pub fn read_database<P: AsRef<Path>>(database_path: P) -> Result<serde_json::Value> {
    let db_path = ensure_database_exists(database_path)?;

    let mut file = File::open(&db_path)
        .with_context(|| format!("Cannot open database at {:?}", db_path))?;

    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    serde_json::from_str(&contents)
        .with_context(|| format!("Database at {:?} is not valid JSON", db_path))
}

/// Writes a serde_json::Value to the database file.
pub fn write_database<P: AsRef<Path>>(
    database_path: P,
    value: &serde_json::Value,
) -> Result<PathBuf> {
    let db_path = resolve_database_path(database_path);

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = File::create(&db_path)
        .with_context(|| format!("Cannot create database file at {:?}", db_path))?;

    let formatted = serde_json::to_string_pretty(value)?;
    file.write_all(formatted.as_bytes())?;

    Ok(db_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_resolves_to_tracking_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_database_path(dir.path()), dir.path().join(DATABASE_FILE));

        let missing = dir.path().join("db");
        assert_eq!(resolve_database_path(&missing), missing.join(DATABASE_FILE));

        let explicit = dir.path().join("files.json");
        assert_eq!(resolve_database_path(&explicit), explicit);
    }

    #[test]
    fn test_invalid_json_is_reinitialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("files.json");
        std::fs::write(&path, "not json").unwrap();

        let db = read_database(&path).unwrap();
        assert_eq!(db["engine_version"], ENGINE_VERSION);
        assert!(db["trade_files"].as_array().unwrap().is_empty());
    }
}
