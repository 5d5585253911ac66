//! Contains a collection of useful utility functions.

use std::fs::{self, read, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::Result;

/// Create a static deser object from given path using serde.
///
/// Format is picked based on the file extension.
pub fn deser_struct_from_path<T>(file_path: &Path) -> Result<T>
where
    for<'de> T: serde::Deserialize<'de>,
{
    let bytes = read(file_path)
        .map_err(|e| Error::IoError(format!("{}: {}", file_path.to_string_lossy(), e)))?;
    let ext = file_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    let d: T = match ext {
        "toml" => toml::from_slice(&bytes)?,
        #[cfg(feature = "yaml")]
        "yaml" | "yml" => serde_yaml::from_slice(&bytes)?,
        _ => return Err(Error::UnsupportedConfigFormat(file_path.to_path_buf())),
    };
    Ok(d)
}

/// Moves a file, falling back to copying when a plain rename isn't
/// possible, e.g. across file systems.
///
/// The source is only removed once the copy is synced to disk.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => return Ok(()),
        Err(e) => debug!(
            "rename {} -> {} failed ({}), copying instead",
            from.to_string_lossy(),
            to.to_string_lossy(),
            e
        ),
    }
    fs::copy(from, to)?;
    File::open(to)?.sync_all()?;
    fs::remove_file(from)
}

/// Returns a path in `dir` for `file_name` that doesn't exist yet,
/// prepending `<prefix>_` to the name if the plain one is taken.
pub fn free_path_in(dir: &Path, file_name: &str, prefix: &str) -> PathBuf {
    let plain = dir.join(file_name);
    if !plain.exists() {
        return plain;
    }
    let prefixed = dir.join(format!("{}_{}", prefix, file_name));
    if !prefixed.exists() {
        return prefixed;
    }
    let mut n = 1;
    loop {
        let numbered = dir.join(format!("{}_{}_{}", prefix, n, file_name));
        if !numbered.exists() {
            return numbered;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize, Debug, PartialEq)]
    struct Small {
        name: String,
        count: u32,
    }

    #[test]
    fn deser_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.toml");
        fs::write(&path, "name = \"x\"\ncount = 3\n").unwrap();
        let small: Small = deser_struct_from_path(&path).unwrap();
        assert_eq!(small.count, 3);

        let path = dir.path().join("small.ini");
        fs::write(&path, "").unwrap();
        assert!(matches!(
            deser_struct_from_path::<Small>(&path),
            Err(Error::UnsupportedConfigFormat(_))
        ));
    }

    #[test]
    fn free_path_avoids_clashes() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(free_path_in(dir.path(), "a.dat", "job"), dir.path().join("a.dat"));
        fs::write(dir.path().join("a.dat"), "").unwrap();
        assert_eq!(
            free_path_in(dir.path(), "a.dat", "job"),
            dir.path().join("job_a.dat")
        );
        fs::write(dir.path().join("job_a.dat"), "").unwrap();
        assert_eq!(
            free_path_in(dir.path(), "a.dat", "job"),
            dir.path().join("job_1_a.dat")
        );
    }

    #[test]
    fn move_file_removes_source() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("from");
        let to = dir.path().join("to");
        fs::write(&from, "data").unwrap();
        move_file(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read_to_string(&to).unwrap(), "data");
    }
}
