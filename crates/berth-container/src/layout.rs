//! Plugin home directory layout.
//!
//! ```text
//! <home>/
//!   etc/          config.properties, startup.properties (required)
//!   system/       host module descriptors (required)
//!   deploy/       auto-deploy staging (required at start, recreated by install)
//!   data/cache/   runtime storage, extracted modules (created on demand)
//! ```

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{ContainerError, ContainerResult};

/// Configuration directory name.
pub const ETC_DIR: &str = "etc";
/// Host module descriptor directory name.
pub const SYSTEM_DIR: &str = "system";
/// Auto-deploy staging directory name.
pub const DEPLOY_DIR: &str = "deploy";
/// Runtime storage directory, relative to the home.
pub const CACHE_DIR: &str = "data/cache";

/// Resolved directories of a validated plugin home.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginLayout {
    /// Canonical plugin home.
    pub home: PathBuf,
    /// `etc/`
    pub etc: PathBuf,
    /// `system/`
    pub system: PathBuf,
    /// `deploy/`
    pub deploy: PathBuf,
    /// `data/cache/`
    pub cache: PathBuf,
}

impl PluginLayout {
    /// Validate `home` and its fixed subdirectories, creating `data/cache`
    /// if absent.
    ///
    /// # Errors
    ///
    /// - [`ContainerError::InvalidHome`] if `home` is not an existing directory
    /// - [`ContainerError::MissingDirectory`] if `etc`, `system` or `deploy` is missing
    /// - [`ContainerError::NotADirectory`] if one of them is a file
    pub fn prepare(home: &Path) -> ContainerResult<Self> {
        let home = resolve_home(home)?;
        let etc = get_dir(&home, ETC_DIR, false)?;
        let system = get_dir(&home, SYSTEM_DIR, false)?;
        let deploy = get_dir(&home, DEPLOY_DIR, false)?;
        let cache = get_dir(&home, CACHE_DIR, true)?;
        Ok(Self {
            home,
            etc,
            system,
            deploy,
            cache,
        })
    }
}

/// Canonicalize a plugin home, which must be an existing directory.
///
/// # Errors
///
/// Returns [`ContainerError::InvalidHome`] otherwise.
pub fn resolve_home(home: &Path) -> ContainerResult<PathBuf> {
    if home.as_os_str().is_empty() {
        return Err(ContainerError::InvalidHome {
            path: home.to_path_buf(),
            message: "path is empty".into(),
        });
    }
    let canonical = home.canonicalize().map_err(|e| ContainerError::InvalidHome {
        path: home.to_path_buf(),
        message: e.to_string(),
    })?;
    if !canonical.is_dir() {
        return Err(ContainerError::InvalidHome {
            path: home.to_path_buf(),
            message: "not a directory".into(),
        });
    }
    Ok(canonical)
}

/// Resolve `parent/name`, optionally creating it.
///
/// # Errors
///
/// - [`ContainerError::MissingDirectory`] if it does not exist and `create` is false
/// - [`ContainerError::NotADirectory`] if it exists but is not a directory
/// - [`ContainerError::Io`] if creation fails
pub fn get_dir(parent: &Path, name: &str, create: bool) -> ContainerResult<PathBuf> {
    let dir = parent.join(name);
    if !dir.exists() {
        if !create {
            return Err(ContainerError::MissingDirectory(dir));
        }
        std::fs::create_dir_all(&dir)?;
        debug!(path = %dir.display(), "created directory");
    } else if !dir.is_dir() {
        return Err(ContainerError::NotADirectory(dir));
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home_with(dirs: &[&str]) -> tempfile::TempDir {
        let home = tempfile::tempdir().unwrap();
        for dir in dirs {
            std::fs::create_dir_all(home.path().join(dir)).unwrap();
        }
        home
    }

    #[test]
    fn test_prepare_creates_cache() {
        let home = home_with(&[ETC_DIR, SYSTEM_DIR, DEPLOY_DIR]);
        let layout = PluginLayout::prepare(home.path()).unwrap();
        assert!(layout.cache.is_dir());
        assert!(layout.cache.ends_with("data/cache"));
        assert_eq!(layout.home, home.path().canonicalize().unwrap());
    }

    #[test]
    fn test_prepare_requires_etc_and_system() {
        let home = home_with(&[SYSTEM_DIR, DEPLOY_DIR]);
        let err = PluginLayout::prepare(home.path()).unwrap_err();
        assert!(matches!(err, ContainerError::MissingDirectory(ref p) if p.ends_with(ETC_DIR)));

        let home = home_with(&[ETC_DIR, DEPLOY_DIR]);
        let err = PluginLayout::prepare(home.path()).unwrap_err();
        assert!(matches!(err, ContainerError::MissingDirectory(ref p) if p.ends_with(SYSTEM_DIR)));
    }

    #[test]
    fn test_file_in_place_of_directory() {
        let home = home_with(&[ETC_DIR, SYSTEM_DIR]);
        std::fs::write(home.path().join(DEPLOY_DIR), b"oops").unwrap();
        let err = PluginLayout::prepare(home.path()).unwrap_err();
        assert!(matches!(err, ContainerError::NotADirectory(_)));
    }

    #[test]
    fn test_invalid_home() {
        let home = tempfile::tempdir().unwrap();
        let missing = home.path().join("nope");
        assert!(matches!(
            resolve_home(&missing),
            Err(ContainerError::InvalidHome { .. })
        ));

        let file = home.path().join("file");
        std::fs::write(&file, b"").unwrap();
        assert!(matches!(
            resolve_home(&file),
            Err(ContainerError::InvalidHome { .. })
        ));

        assert!(matches!(
            resolve_home(Path::new("")),
            Err(ContainerError::InvalidHome { .. })
        ));
    }

    #[test]
    fn test_get_dir_create() {
        let parent = tempfile::tempdir().unwrap();
        let created = get_dir(parent.path(), "a/b", true).unwrap();
        assert!(created.is_dir());
        assert!(matches!(
            get_dir(parent.path(), "c", false),
            Err(ContainerError::MissingDirectory(_))
        ));
    }
}
