//! Shared harness for integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use berth_container::{
    ActivatorCatalog, ContainerOptions, ModuleActivator, ModuleContext, PluginContainer,
};
use berth_test::{PluginHomeFixture, init_test_logging};

/// Service plugins publish.
pub trait Greeting: Send + Sync {
    fn greet(&self) -> String;
}

struct Hello {
    module: String,
    salutation: String,
}

impl Greeting for Hello {
    fn greet(&self) -> String {
        format!("{} from {}", self.salutation, self.module)
    }
}

/// Counts activator starts and stops across all modules.
#[derive(Debug, Default)]
pub struct Counters {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

#[allow(dead_code)]
impl Counters {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

/// Publishes a [`Greeting`] whose salutation comes from the
/// `greeting.salutation` property, defaulting to "hello".
struct GreeterActivator {
    counters: Arc<Counters>,
}

impl ModuleActivator for GreeterActivator {
    fn start(&self, ctx: &ModuleContext) -> anyhow::Result<()> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        let greeting: Arc<dyn Greeting> = Arc::new(Hello {
            module: ctx.descriptor().name.clone(),
            salutation: ctx.property("greeting.salutation").unwrap_or("hello").to_owned(),
        });
        ctx.publish(greeting);
        Ok(())
    }

    fn stop(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Activator catalog binding `greeter` to [`GreeterActivator`].
pub fn catalog(counters: &Arc<Counters>) -> ActivatorCatalog {
    let counters = Arc::clone(counters);
    ActivatorCatalog::new().with_activator("greeter", move || GreeterActivator {
        counters: Arc::clone(&counters),
    })
}

/// A plugin home plus a container over it.
pub struct ContainerHarness {
    pub home: PluginHomeFixture,
    pub container: PluginContainer,
    pub counters: Arc<Counters>,
}

#[allow(dead_code)]
impl ContainerHarness {
    pub fn new() -> Self {
        Self::with_home(PluginHomeFixture::new(), ContainerOptions::new())
    }

    pub fn with_home(home: PluginHomeFixture, options: ContainerOptions) -> Self {
        init_test_logging();
        let counters = Arc::new(Counters::default());
        let container = PluginContainer::new(home.path(), options.with_activators(catalog(&counters)));
        Self {
            home,
            container,
            counters,
        }
    }

    pub fn greetings(&self) -> Vec<String> {
        let mut out: Vec<_> = self
            .container
            .get_services::<dyn Greeting>()
            .iter()
            .map(|g| g.greet())
            .collect();
        out.sort();
        out
    }
}
