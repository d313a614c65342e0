use std::{
    fs::{self, File},
    io::{Read, Write},
    path::Path,
};

use bincode::{deserialize, serialize};
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

use crate::error::{PipelineError, Result};

/// Writes `value` next to `path` and renames it into place, so readers observe
/// either the previous file or the complete new one.
pub fn save_to_file<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let encoded: Vec<u8> = serialize(value)?;
    save_bytes(&encoded, path)
}

pub fn save_bytes(bytes: &[u8], path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
    let mut file = NamedTempFile::new_in(dir).map_err(|e| PipelineError::io(dir, e))?;
    file.write_all(bytes)
        .and_then(|_| file.as_file().sync_all())
        .map_err(|e| PipelineError::io(file.path(), e))?;
    file.persist(path)
        .map_err(|e| PipelineError::io(path, e.error))?;
    Ok(())
}

pub fn load_from_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let mut buffer = vec![];
    let mut file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    file.read_to_end(&mut buffer)
        .map_err(|e| PipelineError::io(path, e))?;
    Ok(deserialize(&buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("values.bin");
        let values = vec![(1u32, "one".to_string()), (2, "two".to_string())];
        save_to_file(&values, &path).unwrap();
        let loaded: Vec<(u32, String)> = load_from_file(&path).unwrap();
        assert_eq!(loaded, values);

        // replacing leaves no temporary files behind
        save_to_file(&vec![(3u32, "three".to_string())], &path).unwrap();
        let entries = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.bin");
        assert!(matches!(
            load_from_file::<u64>(&missing),
            Err(PipelineError::Io { .. })
        ));

        let short = dir.path().join("short.bin");
        fs::write(&short, [1u8, 2]).unwrap();
        assert!(matches!(
            load_from_file::<u64>(&short),
            Err(PipelineError::Codec(_))
        ));
    }
}
