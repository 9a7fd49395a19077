//! Configuration loading through a real plugin home.

mod common;

use std::collections::{BTreeMap, HashMap};

use berth_config::{ConfigError, ConfigLoader};
use berth_container::{ContainerError, ContainerOptions, keys};
use berth_telemetry::{LogConfig, LogFormat};
use berth_test::{ArchiveBuilder, PluginHomeFixture};
use common::ContainerHarness;
use proptest::prelude::*;

fn write_home(config: &str, startup: &str) -> PluginHomeFixture {
    let home = PluginHomeFixture::new();
    home.write_config(&format!("berth.deploy.watch = false\n{config}"));
    home.write_startup(startup);
    home
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_placeholder_free_files_load_verbatim(
        entries in prop::collection::btree_map("[a-z][a-z0-9.]{0,12}", "[A-Za-z0-9./_-]{0,24}", 0..12),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let body: String = entries.iter().map(|(k, v)| format!("{k} = {v}\n")).collect();
        std::fs::write(dir.path().join("config.properties"), body).unwrap();
        std::fs::write(dir.path().join("startup.properties"), "").unwrap();

        let config = ConfigLoader::new().with_env(HashMap::new()).load(dir.path()).unwrap();
        let loaded: BTreeMap<String, String> = config.as_map().clone();
        prop_assert_eq!(loaded, entries);
    }
}

#[test]
fn test_nested_placeholders_resolve() {
    let home = write_home("a = ${b}\nb = ${c}\nc = x\n", "d = [${a}]\n");
    let harness = ContainerHarness::with_home(home, ContainerOptions::new());
    harness.container.start().unwrap();

    let config = harness.container.config().unwrap();
    assert_eq!(config.get("a"), Some("x"));
    assert_eq!(config.get("b"), Some("x"));
    assert_eq!(config.get("d"), Some("[x]"));
    harness.container.stop().unwrap();
}

#[test]
fn test_self_reference_fails_start() {
    let home = write_home("a = ${a}\n", "");
    let harness = ContainerHarness::with_home(home, ContainerOptions::new());
    let err = harness.container.start().unwrap_err();
    assert!(
        matches!(err, ContainerError::Configuration(ConfigError::Cycle { ref name }) if name == "a"),
        "unexpected error: {err}"
    );
    assert!(!harness.container.is_running());
    assert!(harness.container.config().is_none());
}

#[test]
fn test_indirect_cycle_fails_start() {
    let home = write_home("a = ${b}\nb = ${a}\n", "");
    let harness = ContainerHarness::with_home(home, ContainerOptions::new());
    assert!(matches!(
        harness.container.start(),
        Err(ContainerError::Configuration(ConfigError::Cycle { .. }))
    ));
}

#[test]
fn test_plugin_home_and_environment_placeholders() {
    let home = write_home("data = ${plugin.home}/data\nmode = ${DEPLOY_MODE}\nunset = <${NOT_SET}>\n", "");
    let vars = HashMap::from([("DEPLOY_MODE".to_owned(), "staging".to_owned())]);
    let harness = ContainerHarness::with_home(home, ContainerOptions::new().with_env_vars(vars));
    harness.container.start().unwrap();

    let config = harness.container.config().unwrap();
    let canonical = harness.home.path().canonicalize().unwrap();
    assert_eq!(config.get("data"), Some(format!("{}/data", canonical.display()).as_str()));
    assert_eq!(config.get("mode"), Some("staging"));
    assert_eq!(config.get("unset"), Some("<>"));
    harness.container.stop().unwrap();
}

#[test]
fn test_startup_overrides_and_container_owned_keys() {
    let home = write_home(
        "greeting.salutation = hello\nberth.deploy.dir = /elsewhere\n",
        "greeting.salutation = ahoy\n",
    );
    home.deploy("greeter.jar", &ArchiveBuilder::new("acme.greeter").with_activator("greeter").build());
    let harness = ContainerHarness::with_home(home, ContainerOptions::new());
    harness.container.start().unwrap();

    let config = harness.container.config().unwrap();
    let layout = harness.container.layout().unwrap();
    assert_eq!(config.get(keys::DEPLOY_DIR), Some(layout.deploy.display().to_string().as_str()));
    assert_eq!(harness.greetings(), vec!["ahoy from acme.greeter"]);
    harness.container.stop().unwrap();
}

#[test]
fn test_logging_config_from_plugin_home() {
    let home = write_home("berth.log.level = debug\nberth.log.format = compact\n", "berth.log.directives = notify=warn\n");
    let harness = ContainerHarness::with_home(home, ContainerOptions::new());
    harness.container.start().unwrap();

    let log = LogConfig::from_effective(&harness.container.config().unwrap()).unwrap();
    assert_eq!(log.level, "debug");
    assert_eq!(log.format, LogFormat::Compact);
    assert_eq!(log.directives, vec!["notify=warn"]);
    harness.container.stop().unwrap();
}
