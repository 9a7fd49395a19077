//! Host capability export computation.

use tracing::{debug, info, warn};

use crate::capability::{CapabilitySet, is_reserved};
use crate::source::DescriptorSource;

/// Computes the capabilities the host exposes to plugins.
///
/// Sources are scanned in registration order; when two descriptors export
/// the same name, the one scanned later wins. Nothing is cached, so each
/// call observes the current state of every source.
#[derive(Default)]
pub struct CapabilityExporter {
    sources: Vec<Box<dyn DescriptorSource>>,
}

impl CapabilityExporter {
    /// Create an exporter with no sources.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor source.
    #[must_use]
    pub fn with_source(mut self, source: impl DescriptorSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Add a descriptor source in place.
    pub fn add_source(&mut self, source: Box<dyn DescriptorSource>) {
        self.sources.push(source);
    }

    /// Number of registered sources.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Scan every source and merge the non-reserved exports.
    ///
    /// Malformed descriptors are logged and skipped.
    #[must_use]
    pub fn compute(&self) -> CapabilitySet {
        let mut set = CapabilitySet::new();
        let mut skipped: usize = 0;

        for source in &self.sources {
            let label = source.label();
            for result in source.descriptors() {
                let descriptor = match result {
                    Ok(descriptor) => descriptor,
                    Err(e) => {
                        warn!(source = %label, error = %e, "skipping malformed module descriptor");
                        skipped = skipped.saturating_add(1);
                        continue;
                    },
                };

                for capability in descriptor.exports {
                    if is_reserved(&capability.name) {
                        debug!(
                            module = %descriptor.name,
                            capability = %capability.name,
                            "not exporting reserved capability"
                        );
                        continue;
                    }
                    if let Some(previous) = set.get(&capability.name)
                        && *previous != capability.version
                    {
                        debug!(
                            capability = %capability.name,
                            previous = %previous,
                            replacement = %capability.version,
                            "later descriptor overrides capability version"
                        );
                    }
                    set.insert(capability);
                }
            }
        }

        info!(
            sources = self.sources.len(),
            exported = set.len(),
            skipped,
            "computed host capability exports"
        );
        set
    }

    /// Scan every source and serialize the result as an export string.
    #[must_use]
    pub fn compute_exports(&self) -> String {
        self.compute().to_export_string()
    }
}

impl std::fmt::Debug for CapabilityExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityExporter")
            .field("sources", &self.sources.iter().map(|s| s.label()).collect::<Vec<_>>())
            .finish()
    }
}
