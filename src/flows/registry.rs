use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::cron::error::{CronError, CronResult};
use crate::cron::models::FlowSpec;
use crate::flows::types::{FlowTask, FlowTypeRegistry};

type FlowFactory = Box<dyn Fn(JsonValue) -> CronResult<Box<dyn FlowTask>> + Send + Sync>;

/// Registry for mapping flow names to task implementations
#[derive(Default)]
pub struct FlowRegistry {
    factories: HashMap<String, FlowFactory>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in flow
    pub fn with_builtin_flows() -> Self {
        let mut registry = Self::new();
        registry
            .register::<crate::flows::tasks::NoopFlow>()
            .register::<crate::flows::tasks::PurgeRunHistoryFlow>();
        registry
    }

    /// Register a flow type with the registry
    pub fn register<T>(&mut self) -> &mut Self
    where
        T: FlowTask + DeserializeOwned + 'static,
    {
        let factory: FlowFactory = Box::new(|args: JsonValue| {
            // Jobs created without arguments store `null`.
            let args = if args.is_null() {
                JsonValue::Object(Default::default())
            } else {
                args
            };
            let task: T = serde_json::from_value(args).map_err(|e| {
                CronError::invalid(format!("Invalid arguments for flow {}: {e}", T::flow_name()))
            })?;
            Ok(Box::new(task) as Box<dyn FlowTask>)
        });

        self.factories.insert(T::flow_name().to_string(), factory);
        self
    }

    /// Create a task instance from a flow spec
    pub fn create_task(&self, spec: &FlowSpec) -> CronResult<Box<dyn FlowTask>> {
        let factory = self
            .factories
            .get(&spec.name)
            .ok_or_else(|| CronError::invalid(format!("Unknown flow type: {}", spec.name)))?;

        factory(spec.args.clone())
    }

    pub fn flow_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl FlowTypeRegistry for FlowRegistry {
    fn contains(&self, flow_name: &str) -> bool {
        self.factories.contains_key(flow_name)
    }

    fn validate(&self, spec: &FlowSpec) -> CronResult<()> {
        self.create_task(spec).map(|_| ())
    }
}
