//! Unit-test helpers shared across modules.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::activator::{ModuleActivator, ModuleContext};

/// Build a plain tar archive holding `plugin.toml` with `descriptor`.
pub(crate) fn archive(descriptor: &str) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_path("plugin.toml").unwrap();
    header.set_size(descriptor.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, descriptor.as_bytes()).unwrap();
    builder.into_inner().unwrap()
}

/// Descriptor TOML for a module.
pub(crate) fn descriptor(
    name: &str,
    activator: Option<&str>,
    exports: &[(&str, &str)],
    requires: &[(&str, &str)],
) -> String {
    let mut out = format!("[module]\nname = \"{name}\"\nversion = \"1.0.0\"\n");
    if let Some(activator) = activator {
        out.push_str(&format!("activator = \"{activator}\"\n"));
    }
    for (export, version) in exports {
        out.push_str(&format!("[[export]]\nname = \"{export}\"\nversion = \"{version}\"\n"));
    }
    for (require, range) in requires {
        out.push_str(&format!("[[require]]\nname = \"{require}\"\nrange = \"{range}\"\n"));
    }
    out
}

/// Write an archive for `descriptor` into `dir/file_name`.
pub(crate) fn deploy(dir: &Path, file_name: &str, descriptor: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, archive(descriptor)).unwrap();
    path
}

/// Counts starts and stops; fails or panics on request.
#[derive(Default)]
pub(crate) struct Probe {
    pub(crate) starts: AtomicUsize,
    pub(crate) stops: AtomicUsize,
}

pub(crate) enum Behavior {
    Ok,
    Fail,
    Panic,
}

pub(crate) struct ProbeActivator {
    pub(crate) probe: Arc<Probe>,
    pub(crate) behavior: Behavior,
}

impl ModuleActivator for ProbeActivator {
    fn start(&self, ctx: &ModuleContext) -> anyhow::Result<()> {
        match self.behavior {
            Behavior::Ok => {
                self.probe.starts.fetch_add(1, Ordering::SeqCst);
                ctx.publish(Arc::new(ctx.descriptor().name.clone()));
                Ok(())
            },
            Behavior::Fail => anyhow::bail!("refusing to start"),
            Behavior::Panic => panic!("activator exploded"),
        }
    }

    fn stop(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.probe.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
