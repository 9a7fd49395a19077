//! Host capability exports and module resolution against them.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use berth_container::{ContainerOptions, ModuleState, keys};
use berth_exports::{StaticSource, is_reserved};
use berth_test::{ArchiveBuilder, PluginHomeFixture, wait_until};
use common::ContainerHarness;

const HOST: &str = r#"
[module]
name = "acme.host"
version = "3.1.0"

[[export]]
name = "acme.billing"
version = "1.4.2"

[[export]]
name = "berth.core"
version = "9.0.0"
"#;

fn export_names(exports: &str) -> Vec<String> {
    exports
        .split(',')
        .filter(|e| !e.is_empty())
        .map(|e| e.split(';').next().unwrap_or_default().to_owned())
        .collect()
}

fn harness() -> ContainerHarness {
    let home = PluginHomeFixture::new();
    home.add_system_descriptor(
        "stock.toml",
        "[module]\nname = \"acme.stock\"\nversion = \"2.0.0\"\n\n[[export]]\nname = \"acme.stock.api\"\nversion = \"2.0.0\"\n\n[[export]]\nname = \"std.io\"\nversion = \"1.0.0\"\n\n[[export]]\nname = \"acme.billing\"\nversion = \"1.9.0\"\n",
    );
    home.add_system_descriptor("broken.toml", "[module\nname = ");
    let options = ContainerOptions::new().with_host_source(StaticSource::new("host").with_toml("host.toml", HOST));
    ContainerHarness::with_home(home, options)
}

#[test]
fn test_exports_skip_reserved_and_duplicates() {
    let harness = harness();
    harness.container.start().unwrap();

    let config = harness.container.config().unwrap();
    let exports = config.get(keys::CAPABILITIES_EXTRA).unwrap();
    let names = export_names(exports);
    assert!(!names.is_empty());
    assert!(names.iter().all(|n| !is_reserved(n)), "reserved name exported: {exports}");
    let unique: HashSet<_> = names.iter().collect();
    assert_eq!(unique.len(), names.len(), "duplicate export: {exports}");
    assert!(names.contains(&"acme.billing".to_owned()));
    assert!(names.contains(&"acme.stock.api".to_owned()));
    harness.container.stop().unwrap();
}

#[test]
fn test_plugins_resolve_against_host_exports() {
    let harness = harness();
    harness.home.deploy(
        "invoicing.jar",
        &ArchiveBuilder::new("acme.invoicing")
            .with_activator("greeter")
            .with_require("acme.billing", ">=1.2, <2")
            .with_require("berth.runtime", "*")
            .with_require("std.collections", "*")
            .build(),
    );
    harness.home.deploy(
        "future.jar",
        &ArchiveBuilder::new("acme.future")
            .with_require("acme.billing", ">=2")
            .build(),
    );
    harness.container.start().unwrap();

    let bundles = harness.container.get_bundles();
    let state_of = |name: &str| bundles.iter().find(|b| b.name == name).map(|b| b.state);
    assert_eq!(state_of("acme.invoicing"), Some(ModuleState::Active));
    assert_eq!(state_of("acme.future"), Some(ModuleState::Installed));
    assert_eq!(harness.greetings(), vec!["hello from acme.invoicing"]);
    harness.container.stop().unwrap();
}

#[test]
fn test_plugins_resolve_against_each_other() {
    let harness = ContainerHarness::new();
    harness.home.deploy(
        "consumer.jar",
        &ArchiveBuilder::new("acme.consumer")
            .with_activator("greeter")
            .with_require("acme.api", "^1.1")
            .build(),
    );
    harness.container.start().unwrap();
    assert_eq!(harness.container.get_bundles()[0].state, ModuleState::Installed);
    assert!(harness.greetings().is_empty());

    harness.home.deploy(
        "provider.jar",
        &ArchiveBuilder::new("acme.provider").with_export("acme.api", "1.3.0").build(),
    );
    assert!(wait_until(Duration::from_secs(10), || {
        let bundles = harness.container.get_bundles();
        bundles.len() == 2 && bundles.iter().all(|b| b.state == ModuleState::Active)
    }));
    assert_eq!(harness.greetings(), vec!["hello from acme.consumer"]);

    // Removing the provider stops its dependent.
    std::fs::remove_file(harness.home.deploy_dir().join("provider.jar")).unwrap();
    assert!(wait_until(Duration::from_secs(10), || {
        let bundles = harness.container.get_bundles();
        bundles.len() == 1 && bundles[0].state == ModuleState::Installed
    }));
    assert!(harness.greetings().is_empty());
    harness.container.stop().unwrap();
}
