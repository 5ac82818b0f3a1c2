use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Mode of the published file, readable by a scraper running as another user.
#[cfg(unix)]
pub const OUTPUT_MODE: u32 = 0o644;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("output path {} has no file name", .0.display())]
    InvalidPath(PathBuf),

    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl WriteError {
    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Fully written and synced temp file next to its target, waiting to be
/// renamed into place. Dropped without `commit` it removes itself, so a
/// failure at any step leaves the target untouched and no temp file behind.
#[derive(Debug)]
pub struct StagedFile {
    target: PathBuf,
    temp: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// The target's directory must already exist.
    pub fn create(target: &Path, data: &[u8]) -> Result<Self, WriteError> {
        let temp = temp_path(target)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp)
            .map_err(|err| WriteError::io("create temp file", &temp, err))?;

        let staged = Self {
            target: target.to_path_buf(),
            temp,
            committed: false,
        };

        file.write_all(data)
            .map_err(|err| WriteError::io("write temp file", &staged.temp, err))?;
        file.sync_all()
            .map_err(|err| WriteError::io("sync temp file", &staged.temp, err))?;
        set_output_mode(&staged.temp)?;

        Ok(staged)
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn commit(mut self) -> Result<(), WriteError> {
        fs::rename(&self.temp, &self.target)
            .map_err(|err| WriteError::io("replace output", &self.target, err))?;
        self.committed = true;

        if let Ok(dir) = fs::File::open(parent_dir(&self.target)) {
            let _ = dir.sync_all();
        }
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp);
        }
    }
}

/// Replaces `path` with `data` so that a concurrent reader sees either the
/// previous complete file or the new complete file.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<(), WriteError> {
    StagedFile::create(path, data)?.commit()
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn temp_path(path: &Path) -> Result<PathBuf, WriteError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| WriteError::InvalidPath(path.to_path_buf()))?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let pid = std::process::id();
    Ok(parent_dir(path).join(format!(".{file_name}.tmp-{pid}-{stamp}")))
}

#[cfg(unix)]
fn set_output_mode(path: &Path) -> Result<(), WriteError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(OUTPUT_MODE))
        .map_err(|err| WriteError::io("set permissions on", path, err))
}

#[cfg(not(unix))]
fn set_output_mode(_path: &Path) -> Result<(), WriteError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_path_is_hidden_sibling() {
        let temp = temp_path(Path::new("/var/lib/textfile/mtr_all_probes.prom")).unwrap();
        assert_eq!(temp.parent(), Some(Path::new("/var/lib/textfile")));
        let name = temp.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".mtr_all_probes.prom.tmp-"));
    }

    #[test]
    fn bare_file_name_stages_in_current_dir() {
        let temp = temp_path(Path::new("out.prom")).unwrap();
        assert_eq!(temp.parent(), Some(Path::new(".")));
    }

    #[test]
    fn rejects_path_without_file_name() {
        assert!(matches!(
            temp_path(Path::new("/")),
            Err(WriteError::InvalidPath(_))
        ));
    }
}
