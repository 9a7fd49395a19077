//! Plugin archive builder.

use std::fmt::Write as _;
use std::io::Write as _;

use flate2::Compression;
use flate2::write::GzEncoder;

/// Builds plugin archives: a tar (optionally gzipped) with `plugin.toml`
/// at its root plus any extra files.
#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    name: String,
    version: String,
    activator: Option<String>,
    exports: Vec<(String, String)>,
    requires: Vec<(String, String)>,
    files: Vec<(String, Vec<u8>)>,
    gzip: bool,
}

impl ArchiveBuilder {
    /// Module `name` at version 1.0.0, no activator.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: "1.0.0".to_owned(),
            activator: None,
            exports: Vec::new(),
            requires: Vec::new(),
            files: Vec::new(),
            gzip: false,
        }
    }

    /// Set the module version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Bind the module to a named activator.
    #[must_use]
    pub fn with_activator(mut self, activator: impl Into<String>) -> Self {
        self.activator = Some(activator.into());
        self
    }

    /// Export a capability.
    #[must_use]
    pub fn with_export(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.exports.push((name.into(), version.into()));
        self
    }

    /// Require a capability within a semver range.
    #[must_use]
    pub fn with_require(mut self, name: impl Into<String>, range: impl Into<String>) -> Self {
        self.requires.push((name.into(), range.into()));
        self
    }

    /// Add a file next to `plugin.toml`.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.files.push((path.into(), contents.into()));
        self
    }

    /// Compress the archive with gzip.
    #[must_use]
    pub fn gzip(mut self) -> Self {
        self.gzip = true;
        self
    }

    /// The `plugin.toml` this builder writes.
    #[must_use]
    pub fn descriptor(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "[module]\nname = \"{}\"\nversion = \"{}\"", self.name, self.version);
        if let Some(activator) = &self.activator {
            let _ = writeln!(out, "activator = \"{activator}\"");
        }
        for (name, version) in &self.exports {
            let _ = writeln!(out, "\n[[export]]\nname = \"{name}\"\nversion = \"{version}\"");
        }
        for (name, range) in &self.requires {
            let _ = writeln!(out, "\n[[require]]\nname = \"{name}\"\nrange = \"{range}\"");
        }
        out
    }

    /// Archive bytes.
    ///
    /// # Panics
    ///
    /// If an entry path is rejected by `tar`.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        append(&mut builder, "plugin.toml", self.descriptor().as_bytes());
        for (path, contents) in &self.files {
            append(&mut builder, path, contents);
        }
        let tar = builder.into_inner().expect("finish tar");
        if !self.gzip {
            return tar;
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar).expect("gzip archive");
        encoder.finish().expect("finish gzip")
    }
}

fn append(builder: &mut tar::Builder<Vec<u8>>, path: &str, contents: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_path(path).expect("valid entry path");
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, contents).expect("append entry");
}
