//! Task name resolution: maps plugin names to task factories.
//!
//! In a static build there is no dynamic module loading; implementations
//! register a factory under their plugin name and the graph builders resolve
//! names through a [`TaskRegistry`] value whose lifetime brackets the run.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::task::Task;
use crate::tasks::{CopyTask, NullTask};

type TaskFactory = Box<dyn Fn() -> Box<dyn Task> + Send + Sync>;

pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistry {
    /// An empty registry without even the built-in tasks.
    pub fn new() -> TaskRegistry {
        TaskRegistry { factories: HashMap::new() }
    }

    /// A registry preloaded with the built-in helper tasks.
    pub fn with_builtins() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        registry.register("copy", || Box::new(CopyTask::new()));
        registry.register("null", || Box::new(NullTask::new()));
        registry
    }

    /// Registers `factory` under `name`, replacing any previous entry.
    pub fn register<S, F>(&mut self, name: S, factory: F)
    where
        S: Into<String>,
        F: Fn() -> Box<dyn Task> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Instantiates the task registered under `name`.
    pub fn get_task(&self, name: &str) -> Result<Box<dyn Task>> {
        let factory = self.factories.get(name).ok_or_else(|| Error::Graph(format!(
            "no task `{}' registered", name)))?;

        let mut task = factory();
        task.node_mut().set_plugin_name(name);
        Ok(task)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// The registered plugin names, sorted.
    pub fn task_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for TaskRegistry {
    fn default() -> TaskRegistry {
        TaskRegistry::with_builtins()
    }
}
