use crate::error::JudgeError;
use crate::result::ResultDict;
use crate::system::System;
use crate::task::Step;

use anyhow::Result;
use tracing::info;

/// An ordered sequence of named steps.
///
/// Steps run in insertion order. Once a step reports a non-OK status only
/// obligatory steps still run.
#[derive(Debug, Default)]
pub struct Checking {
    steps: Vec<(String, Step)>,
}

impl Checking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_step(&mut self, name: &str, step: Step) -> Result<(), JudgeError> {
        if self.steps.iter().any(|(n, _)| n == name) {
            return Err(JudgeError::DuplicateKey {
                key: name.to_owned(),
            });
        }
        self.steps.push((name.to_owned(), step));
        Ok(())
    }

    pub fn add_steps<I, S>(&mut self, steps: I) -> Result<(), JudgeError>
    where
        I: IntoIterator<Item = (S, Step)>,
        S: AsRef<str>,
    {
        for (name, step) in steps {
            self.add_step(name.as_ref(), step)?;
        }
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn run(self, system: &mut System) -> Result<ResultDict> {
        let _span = tracing::info_span!("checking", steps = self.steps.len()).entered();
        let results = system.run_steps(self.steps)?;
        info!(status = results.status().as_str(), "checking finished");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::command::Command;

    #[test]
    fn names_are_unique() {
        let mut checking = Checking::new();
        checking
            .add_steps(vec![
                ("a", Step::command(Command::noop())),
                ("b", Step::command(Command::noop())),
            ])
            .unwrap();
        let err = checking.add_step("a", Step::command(Command::noop())).unwrap_err();
        assert!(matches!(err, JudgeError::DuplicateKey { ref key } if key == "a"));
        assert_eq!(checking.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(checking.len(), 2);
    }
}
