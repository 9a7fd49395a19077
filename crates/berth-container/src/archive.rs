//! Plugin archives.
//!
//! A plugin archive is a tar stream, optionally gzip-compressed, with a
//! `plugin.toml` module descriptor at its root. Everything else in the
//! archive is extracted into the module's data directory.
//!
//! Extraction guards against:
//! - Path traversal (`../` components) and absolute paths
//! - Links, devices and other non-regular entries
//! - Excessive entry counts and extracted sizes

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use berth_exports::{DESCRIPTOR_FILE_NAME, ModuleDescriptor};
use flate2::read::GzDecoder;
use tar::Archive;
use tracing::debug;

use crate::error::{ContainerError, ContainerResult};

/// Maximum archive size read from the deploy directory (256 MB).
const MAX_ARCHIVE_SIZE: u64 = 256 * 1024 * 1024;

/// Maximum descriptor size (1 MB).
const MAX_DESCRIPTOR_SIZE: u64 = 1024 * 1024;

/// Maximum number of entries allowed in an archive.
const MAX_ENTRY_COUNT: usize = 10_000;

/// Maximum total extracted size (500 MB).
const MAX_EXTRACTED_SIZE: u64 = 500_000_000;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Last path segment of an install location. Both `/` and `\` separate
/// segments.
#[must_use]
pub fn file_name_of(location: &str) -> &str {
    location
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(location)
}

/// Whether `file_name` ends in `.` followed by one of `extensions`
/// (case-insensitive). A bare `.jar` counts.
#[must_use]
pub fn has_archive_extension<S: AsRef<str>>(file_name: &str, extensions: &[S]) -> bool {
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return false;
    };
    extensions
        .iter()
        .any(|allowed| ext.eq_ignore_ascii_case(allowed.as_ref()))
}

/// Whether `path` names a plugin archive.
#[must_use]
pub fn is_archive_path<S: AsRef<str>>(path: &Path, extensions: &[S]) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| has_archive_extension(n, extensions))
}

/// A plugin archive read into memory.
#[derive(Debug, Clone)]
pub struct PluginArchive {
    path: PathBuf,
    bytes: Vec<u8>,
    hash: String,
    descriptor: ModuleDescriptor,
}

impl PluginArchive {
    /// Read an archive and parse its descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Archive`] if the file cannot be read, is not
    /// a tar stream, lacks `plugin.toml`, or the descriptor is invalid.
    pub fn open(path: &Path) -> ContainerResult<Self> {
        let bytes = read_limited(path)?;
        let hash = blake3::hash(&bytes).to_hex().to_string();
        let descriptor = read_descriptor(path, &bytes)?;
        debug!(path = %path.display(), module = %descriptor, hash = %hash, "opened plugin archive");
        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            hash,
            descriptor,
        })
    }

    /// Where the archive was read from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// blake3 hex digest of the archive bytes.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// The module descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// Extract every entry into `dest`, which must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Archive`] on unsafe entries, limits
    /// exceeded or I/O failures.
    pub fn extract(&self, dest: &Path) -> ContainerResult<()> {
        let err = |message: String| ContainerError::Archive {
            path: self.path.clone(),
            message,
        };

        let dest = dest
            .canonicalize()
            .map_err(|e| err(format!("failed to canonicalize destination: {e}")))?;
        let mut archive = Archive::new(decoder(&self.bytes));

        let mut entry_count = 0usize;
        let mut total_size: u64 = 0;

        for entry_result in archive
            .entries()
            .map_err(|e| err(format!("failed to read archive entries: {e}")))?
        {
            let mut entry =
                entry_result.map_err(|e| err(format!("failed to read archive entry: {e}")))?;

            entry_count = entry_count.saturating_add(1);
            if entry_count > MAX_ENTRY_COUNT {
                return Err(err(format!(
                    "archive exceeds maximum entry count ({MAX_ENTRY_COUNT})"
                )));
            }

            let entry_type = entry.header().entry_type();
            let entry_path = entry
                .path()
                .map_err(|e| err(format!("failed to read entry path: {e}")))?
                .into_owned();

            if !is_safe_entry_type(entry_type) {
                return Err(err(format!(
                    "unsafe archive entry type '{entry_type:?}' at {}",
                    entry_path.display()
                )));
            }

            let entry_size = entry
                .header()
                .size()
                .map_err(|e| err(format!("failed to read entry size: {e}")))?;
            total_size = total_size.saturating_add(entry_size);
            if total_size > MAX_EXTRACTED_SIZE {
                return Err(err(format!(
                    "archive exceeds maximum extracted size ({MAX_EXTRACTED_SIZE} bytes)"
                )));
            }

            if !is_contained(&entry_path) {
                return Err(err(format!("path traversal detected: {}", entry_path.display())));
            }
            // PAX and GNU metadata headers are consumed by the tar reader.
            if !matches!(
                entry_type,
                tar::EntryType::Regular | tar::EntryType::Directory
            ) {
                continue;
            }

            let target = dest.join(&entry_path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    err(format!("failed to create directory {}: {e}", parent.display()))
                })?;
            }
            entry
                .unpack(&target)
                .map_err(|e| err(format!("failed to unpack {}: {e}", entry_path.display())))?;
        }

        if entry_count == 0 {
            return Err(err("archive is empty".into()));
        }
        debug!(path = %self.path.display(), dest = %dest.display(), entries = entry_count, "extracted plugin archive");
        Ok(())
    }
}

fn read_limited(path: &Path) -> ContainerResult<Vec<u8>> {
    let err = |message: String| ContainerError::Archive {
        path: path.to_path_buf(),
        message,
    };
    let file = std::fs::File::open(path).map_err(|e| err(format!("failed to open: {e}")))?;
    let mut bytes = Vec::new();
    file.take(MAX_ARCHIVE_SIZE.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|e| err(format!("failed to read: {e}")))?;
    if u64::try_from(bytes.len()).unwrap_or(u64::MAX) > MAX_ARCHIVE_SIZE {
        return Err(err(format!(
            "archive too large (limit: {MAX_ARCHIVE_SIZE} bytes)"
        )));
    }
    Ok(bytes)
}

fn decoder(bytes: &[u8]) -> Box<dyn Read + '_> {
    if bytes.starts_with(&GZIP_MAGIC) {
        Box::new(GzDecoder::new(bytes))
    } else {
        Box::new(bytes)
    }
}

fn read_descriptor(path: &Path, bytes: &[u8]) -> ContainerResult<ModuleDescriptor> {
    let err = |message: String| ContainerError::Archive {
        path: path.to_path_buf(),
        message,
    };
    let mut archive = Archive::new(decoder(bytes));
    let entries = archive
        .entries()
        .map_err(|e| err(format!("not a plugin archive: {e}")))?;

    for entry_result in entries {
        let entry = entry_result.map_err(|e| err(format!("not a plugin archive: {e}")))?;
        let is_descriptor = entry.path().is_ok_and(|p| {
            let mut components = p.components().filter(|c| *c != Component::CurDir);
            components
                .next()
                .is_some_and(|c| c.as_os_str() == DESCRIPTOR_FILE_NAME)
                && components.next().is_none()
        });
        if !is_descriptor || entry.header().entry_type() != tar::EntryType::Regular {
            continue;
        }

        let mut content = String::new();
        entry
            .take(MAX_DESCRIPTOR_SIZE)
            .read_to_string(&mut content)
            .map_err(|e| err(format!("failed to read {DESCRIPTOR_FILE_NAME}: {e}")))?;
        let origin = format!("{}!/{DESCRIPTOR_FILE_NAME}", path.display());
        return Ok(ModuleDescriptor::parse(&origin, &content)?);
    }

    Err(err(format!("missing {DESCRIPTOR_FILE_NAME}")))
}

/// Allows regular files, directories and metadata headers.
fn is_safe_entry_type(entry_type: tar::EntryType) -> bool {
    matches!(
        entry_type,
        tar::EntryType::Regular
            | tar::EntryType::Directory
            | tar::EntryType::GNULongName
            | tar::EntryType::XHeader
            | tar::EntryType::XGlobalHeader
    )
}

/// Whether a relative entry path stays inside the extraction root.
fn is_contained(path: &Path) -> bool {
    !path.is_absolute()
        && path.components().all(|c| {
            !matches!(
                c,
                Component::ParentDir | Component::Prefix(_) | Component::RootDir
            )
        })
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use std::io::Write;

    use super::*;

    const DESCRIPTOR: &str = "[module]\nname = \"acme.hello\"\nversion = \"1.0.0\"\n";

    fn tar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for &(path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_path(path).unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_file_name_of() {
        assert_eq!(file_name_of("plugin.jar"), "plugin.jar");
        assert_eq!(file_name_of("/a/b/plugin.jar"), "plugin.jar");
        assert_eq!(file_name_of("C:\\plugins\\p.JAR"), "p.JAR");
        assert_eq!(file_name_of("https://host/x/y.jar"), "y.jar");
        assert_eq!(file_name_of("dir/"), "");
    }

    #[test]
    fn test_has_archive_extension() {
        let exts = ["jar"];
        assert!(has_archive_extension("plugin.jar", &exts));
        assert!(has_archive_extension("plugin.JaR", &exts));
        assert!(!has_archive_extension("plugin.txt", &exts));
        assert!(has_archive_extension(".jar", &exts));
        assert!(has_archive_extension(".JAR", &exts));
        assert!(!has_archive_extension("jar", &exts));
        assert!(!has_archive_extension("plugin.jar.part", &exts));
        assert!(has_archive_extension("p.tgz", &["jar", "tgz"]));
    }

    #[test]
    fn test_open_plain_and_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let tar = tar_bytes(&[("plugin.toml", DESCRIPTOR.as_bytes()), ("res/a.txt", b"hi")]);

        let plain = PluginArchive::open(&write(dir.path(), "plain.jar", &tar)).unwrap();
        let gz = PluginArchive::open(&write(dir.path(), "gz.jar", &gzip(&tar))).unwrap();

        assert_eq!(plain.descriptor().name, "acme.hello");
        assert_eq!(gz.descriptor().name, "acme.hello");
        assert_ne!(plain.hash(), gz.hash());
        assert_eq!(plain.hash().len(), 64);
    }

    #[test]
    fn test_descriptor_under_dot_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let tar = tar_bytes(&[("./plugin.toml", DESCRIPTOR.as_bytes())]);
        let archive = PluginArchive::open(&write(dir.path(), "p.jar", &tar)).unwrap();
        assert_eq!(archive.descriptor().name, "acme.hello");
    }

    #[test]
    fn test_missing_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let tar = tar_bytes(&[("nested/plugin.toml", DESCRIPTOR.as_bytes())]);
        let err = PluginArchive::open(&write(dir.path(), "p.jar", &tar)).unwrap_err();
        assert!(matches!(err, ContainerError::Archive { ref message, .. } if message.contains("missing")));
    }

    #[test]
    fn test_invalid_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let tar = tar_bytes(&[("plugin.toml", b"[module]\nname = \"bad name\"\n")]);
        let err = PluginArchive::open(&write(dir.path(), "p.jar", &tar)).unwrap_err();
        assert!(matches!(err, ContainerError::Descriptor(_)));
    }

    #[test]
    fn test_not_an_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "p.jar", b"this is not a tar stream at all");
        assert!(PluginArchive::open(&path).is_err());
    }

    #[test]
    fn test_extract() {
        let dir = tempfile::tempdir().unwrap();
        let tar = tar_bytes(&[
            ("plugin.toml", DESCRIPTOR.as_bytes()),
            ("res/deep/a.txt", b"hello"),
        ]);
        let archive = PluginArchive::open(&write(dir.path(), "p.jar", &gzip(&tar))).unwrap();

        let dest = dir.path().join("out");
        std::fs::create_dir(&dest).unwrap();
        archive.extract(&dest).unwrap();

        assert_eq!(std::fs::read(dest.join("res/deep/a.txt")).unwrap(), b"hello");
        assert!(dest.join("plugin.toml").is_file());
    }

    #[test]
    fn test_extract_rejects_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_path("plugin.toml").unwrap();
        header.set_size(DESCRIPTOR.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, DESCRIPTOR.as_bytes()).unwrap();

        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_path("escape").unwrap();
        link.set_link_name("/etc/passwd").unwrap();
        link.set_size(0);
        link.set_cksum();
        builder.append(&link, std::io::empty()).unwrap();
        let tar = builder.into_inner().unwrap();

        let archive = PluginArchive::open(&write(dir.path(), "p.jar", &tar)).unwrap();
        let dest = dir.path().join("out");
        std::fs::create_dir(&dest).unwrap();
        let err = archive.extract(&dest).unwrap_err();
        assert!(matches!(err, ContainerError::Archive { ref message, .. } if message.contains("unsafe")));
    }

    #[test]
    fn test_is_contained() {
        assert!(is_contained(Path::new("a/b.txt")));
        assert!(is_contained(Path::new("./a")));
        assert!(!is_contained(Path::new("../a")));
        assert!(!is_contained(Path::new("a/../../b")));
        assert!(!is_contained(Path::new("/etc/passwd")));
    }
}
