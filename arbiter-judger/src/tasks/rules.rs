use crate::paths::OutputPath;
use crate::predicates::Prerequirement;
use crate::system::System;
use crate::task::{Task, TaskBase, TaskOptions};

use arbiter_protocol::Status;
use arbiter_utils::units::unparse_memory;

use std::convert::TryFrom;
use std::fmt;
use std::fs;

use anyhow::Result;
use regex::Regex;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Less,
    LessEqual,
    Equal,
    GreaterEqual,
    Greater,
}

impl Comparison {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "<" => Comparison::Less,
            "<=" => Comparison::LessEqual,
            "=" => Comparison::Equal,
            ">=" => Comparison::GreaterEqual,
            ">" => Comparison::Greater,
            _ => return None,
        })
    }

    fn holds(self, found: usize, bound: usize) -> bool {
        match self {
            Comparison::Less => found < bound,
            Comparison::LessEqual => found <= bound,
            Comparison::Equal => found == bound,
            Comparison::GreaterEqual => found >= bound,
            Comparison::Greater => found > bound,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Comparison::Less => "<",
            Comparison::LessEqual => "<=",
            Comparison::Equal => "=",
            Comparison::GreaterEqual => ">=",
            Comparison::Greater => ">",
        }
    }
}

/// `pattern<=N` and friends: bounds the number of matches of a
/// case-insensitive regex over the whole tree.
#[derive(Debug, Clone)]
pub struct CountRule {
    pattern: Regex,
    comparison: Comparison,
    bound: usize,
}

impl CountRule {
    pub fn parse(description: &str) -> Result<Self> {
        let rule = Regex::new(r"(?s)^(.*?)(<=|>=|<|>|=)\s*([0-9]+)\s*$")?;
        let caps = rule
            .captures(description)
            .ok_or_else(|| anyhow::format_err!("invalid count rule: {}", description))?;
        let pattern = Regex::new(&format!("(?ims){}", caps[1].trim()))?;
        let comparison = Comparison::parse(&caps[2])
            .ok_or_else(|| anyhow::format_err!("invalid comparison: {}", &caps[2]))?;
        let bound = caps[3].parse()?;
        Ok(Self {
            pattern,
            comparison,
            bound,
        })
    }

    pub fn holds(&self, text: &str) -> bool {
        let found = self.pattern.find_iter(text).count();
        self.comparison.holds(found, self.bound)
    }
}

impl fmt::Display for CountRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pattern = self.pattern.as_str().trim_start_matches("(?ims)");
        write!(f, "{}{}{}", pattern, self.comparison.as_str(), self.bound)
    }
}

/// Size and content rules over a directory tree. A broken rule is RUL.
#[derive(Debug)]
pub struct RulesTask {
    base: TaskBase,
    target: OutputPath,
    max_size: Option<u64>, // bytes
    rules: Vec<CountRule>,
}

impl RulesTask {
    pub fn new(target: OutputPath) -> Self {
        Self {
            base: TaskBase::new(TaskOptions::default().result_on_error(Some(Status::Rul))),
            target,
            max_size: None,
            rules: Vec::new(),
        }
    }

    /// Rules over `solution/src`.
    pub fn solution_source() -> Result<Self> {
        Ok(Self::new(OutputPath::new("solution/src")?))
    }

    pub fn max_size(mut self, bytes: u64) -> Self {
        self.max_size = Some(bytes);
        self
    }

    pub fn rule(mut self, rule: CountRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Comma separated rule descriptions.
    pub fn rules(mut self, descriptions: &str) -> Result<Self> {
        for d in descriptions.split(',').filter(|d| !d.trim().is_empty()) {
            self.rules.push(CountRule::parse(d)?);
        }
        Ok(self)
    }
}

impl Task for RulesTask {
    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn prerequirements(&self) -> Vec<Prerequirement> {
        let mut list = self.base.prerequirements();
        list.push(Prerequirement::DirectoryExists(self.target.clone().into()));
        list
    }

    fn execute(&mut self, system: &mut System) -> Result<()> {
        let status = self.base.options.result_on_error.unwrap_or(Status::Rul);
        let root = system.resolve_output(&self.target);
        let files = system.find_files(&root)?;

        if let Some(max_size) = self.max_size {
            let mut used = 0;
            for file in &files {
                used += fs::metadata(file)?.len();
            }
            self.base.record("size", i64::try_from(used).unwrap_or(i64::MAX))?;
            if used > max_size {
                info!(used, max = %unparse_memory(max_size), "size limit exceeded");
                self.base.set_status(status);
            }
        }

        if !self.rules.is_empty() {
            let mut texts = Vec::with_capacity(files.len());
            for file in &files {
                texts.push(system.file_contents(file)?);
            }
            let text = texts.join("\n");
            for rule in &self.rules {
                if !rule.holds(&text) {
                    info!(%rule, "rule broken");
                    self.base.set_status(status);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rules() {
        let rule = CountRule::parse("goto <= 0").unwrap();
        assert_eq!(rule.comparison, Comparison::LessEqual);
        assert_eq!(rule.bound, 0);
        assert_eq!(rule.to_string(), "goto<=0");
        assert!(rule.holds("int main() {}"));
        assert!(!rule.holds("GOTO end;"));

        let rule = CountRule::parse("printf = 1").unwrap();
        assert_eq!(rule.comparison, Comparison::Equal);
        assert!(rule.holds("printf(\"%d\", x);"));
        assert!(!rule.holds("printf(\"a\");\nprintf(\"b\");"));

        let rule = CountRule::parse("for\\b>1").unwrap();
        assert!(!rule.holds("for x"));
        assert!(rule.holds("for x\nFOR y"));

        assert!(CountRule::parse("no comparison").is_err());
    }
}
