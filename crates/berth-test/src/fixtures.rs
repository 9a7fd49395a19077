//! Plugin home fixtures.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;

/// Base configuration written by [`PluginHomeFixture::new`]: polling only,
/// fast enough for tests.
pub const DEFAULT_CONFIG: &str = "\
berth.deploy.watch = false
berth.deploy.poll.interval.ms = 50
berth.deploy.debounce.ms = 10
";

/// A throwaway plugin home with `etc/`, `system/` and `deploy/` and both
/// property files.
#[derive(Debug)]
pub struct PluginHomeFixture {
    dir: TempDir,
}

impl Default for PluginHomeFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginHomeFixture {
    /// Create a home with [`DEFAULT_CONFIG`] and an empty startup file.
    ///
    /// # Panics
    ///
    /// If the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        let home = Self::bare();
        home.write_config(DEFAULT_CONFIG);
        home.write_startup("");
        home
    }

    /// Create only the directories; no property files.
    ///
    /// # Panics
    ///
    /// If the temporary directory cannot be created.
    #[must_use]
    pub fn bare() -> Self {
        let dir = tempfile::tempdir().expect("create plugin home");
        for sub in ["etc", "system", "deploy"] {
            std::fs::create_dir_all(dir.path().join(sub)).expect("create plugin home layout");
        }
        Self { dir }
    }

    /// Home directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// `<home>/deploy`.
    #[must_use]
    pub fn deploy_dir(&self) -> PathBuf {
        self.path().join("deploy")
    }

    /// `<home>/system`.
    #[must_use]
    pub fn system_dir(&self) -> PathBuf {
        self.path().join("system")
    }

    /// Replace `etc/config.properties`.
    ///
    /// # Panics
    ///
    /// On I/O failure.
    pub fn write_config(&self, contents: &str) {
        std::fs::write(self.path().join("etc/config.properties"), contents)
            .expect("write config.properties");
    }

    /// Append lines to `etc/config.properties`.
    ///
    /// # Panics
    ///
    /// On I/O failure.
    pub fn append_config(&self, contents: &str) {
        let path = self.path().join("etc/config.properties");
        let mut existing = std::fs::read_to_string(&path).unwrap_or_default();
        existing.push_str(contents);
        existing.push('\n');
        std::fs::write(path, existing).expect("append config.properties");
    }

    /// Replace `etc/startup.properties`.
    ///
    /// # Panics
    ///
    /// On I/O failure.
    pub fn write_startup(&self, contents: &str) {
        std::fs::write(self.path().join("etc/startup.properties"), contents)
            .expect("write startup.properties");
    }

    /// Write a host module descriptor into `system/<file_name>`.
    ///
    /// # Panics
    ///
    /// On I/O failure.
    pub fn add_system_descriptor(&self, file_name: &str, toml: &str) -> PathBuf {
        let path = self.system_dir().join(file_name);
        std::fs::write(&path, toml).expect("write system descriptor");
        path
    }

    /// Drop an archive straight into `deploy/`, bypassing install staging.
    ///
    /// # Panics
    ///
    /// On I/O failure.
    pub fn deploy(&self, file_name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.deploy_dir().join(file_name);
        std::fs::write(&path, bytes).expect("write archive");
        path
    }
}

/// Poll `check` every 20ms until it returns `true` or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if check() {
            return true;
        }
        if deadline.is_none_or(|d| Instant::now() >= d) {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
