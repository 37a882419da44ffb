use crate::system::System;
use crate::task::{Task, TaskBase, TaskOptions};

use anyhow::Result;
use tracing::info;

/// Terminates and reaps background processes. With no names, all of them.
#[derive(Debug)]
pub struct StopBackgroundTask {
    base: TaskBase,
    names: Vec<String>,
}

impl StopBackgroundTask {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            base: TaskBase::new(TaskOptions::default().obligatory(true)),
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn all() -> Self {
        Self::new(Vec::<String>::new())
    }
}

impl Task for StopBackgroundTask {
    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn execute(&mut self, system: &mut System) -> Result<()> {
        let results = if self.names.is_empty() {
            system.clear_background()?
        } else {
            let mut results = Vec::with_capacity(self.names.len());
            for name in &self.names {
                results.push((name.clone(), system.stop_background(name)?));
            }
            results
        };
        info!(count = results.len(), "background processes stopped");
        for (name, result) in results {
            self.base.record(&name, result)?;
        }
        Ok(())
    }
}
