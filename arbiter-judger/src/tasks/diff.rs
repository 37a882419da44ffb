use crate::paths::SandboxPath;
use crate::predicates::Prerequirement;
use crate::system::System;
use crate::task::{Task, TaskBase, TaskOptions};

use arbiter_protocol::Status;

use anyhow::Result;
use regex::Regex;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct DiffOptions {
    pub case_sensitive: bool,
    pub space_sensitive: bool,
    /// Splits the text into rows. Without it the whole text is one cell.
    pub row_delimiter: Option<String>,
    /// Splits rows into cells. Ignored without a row delimiter.
    pub column_delimiter: Option<String>,
    pub row_sort: bool,
    pub column_sort: bool,
    pub empty_rows: bool,
    pub empty_columns: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            space_sensitive: false,
            row_delimiter: None,
            column_delimiter: None,
            row_sort: false,
            column_sort: false,
            empty_rows: false,
            empty_columns: false,
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("(?ms){}", pattern))
}

/// Compares an answer with a hint after normalization. A mismatch is ANS.
#[derive(Debug)]
pub struct DiffTask {
    base: TaskBase,
    hint: SandboxPath,
    answer: SandboxPath,
    options: DiffOptions,
    rows: Option<Regex>,
    columns: Option<Regex>,
}

impl DiffTask {
    pub fn new(hint: SandboxPath, answer: SandboxPath, options: DiffOptions) -> Result<Self> {
        let rows = options.row_delimiter.as_deref().map(compile).transpose()?;
        let columns = match rows {
            Some(_) => options.column_delimiter.as_deref().map(compile).transpose()?,
            None => None,
        };
        Ok(Self {
            base: TaskBase::new(TaskOptions::default().result_on_error(Some(Status::Ans))),
            hint,
            answer,
            options,
            rows,
            columns,
        })
    }

    pub fn represent(&self, text: &str) -> Vec<Vec<String>> {
        let o = &self.options;
        let text = if o.case_sensitive {
            text.to_owned()
        } else {
            text.to_lowercase()
        };

        let rows: Vec<String> = match self.rows {
            Some(ref re) => re.split(&text).map(ToOwned::to_owned).collect(),
            None => vec![text],
        };
        let mut table: Vec<Vec<String>> = rows
            .into_iter()
            .map(|row| match self.columns {
                Some(ref re) => re.split(&row).map(ToOwned::to_owned).collect(),
                None => vec![row],
            })
            .collect();

        if !o.space_sensitive {
            for cell in table.iter_mut().flatten() {
                *cell = cell.split_whitespace().collect::<Vec<_>>().join(" ");
            }
        }

        if self.rows.is_some() {
            if self.columns.is_some() {
                if !o.empty_columns {
                    for row in &mut table {
                        row.retain(|c| !c.is_empty());
                    }
                }
                if o.column_sort {
                    for row in &mut table {
                        row.sort();
                    }
                }
                if !o.empty_rows {
                    table.retain(|row| !row.is_empty());
                }
            } else if !o.empty_rows {
                table.retain(|row| row.iter().any(|c| !c.is_empty()));
            }
            if o.row_sort {
                table.sort();
            }
        }
        table
    }

    fn read(&self, system: &System, path: &SandboxPath) -> Option<String> {
        let resolved = system.resolve_path(path, &self.base.work_directory());
        match system.file_contents(&resolved) {
            Ok(text) => Some(text),
            Err(err) => {
                warn!(path = %resolved.display(), %err, "failed to read");
                None
            }
        }
    }
}

impl Task for DiffTask {
    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn prerequirements(&self) -> Vec<Prerequirement> {
        let mut list = self.base.prerequirements();
        list.push(Prerequirement::FileExists(self.hint.clone()));
        list
    }

    fn execute(&mut self, system: &mut System) -> Result<()> {
        let status = self.base.options.result_on_error.unwrap_or(Status::Ans);

        let answer = match self.read(system, &self.answer) {
            Some(text) => text,
            None => {
                self.base.set_status(status);
                self.base.record("mismatch", format!("missing {}", self.answer))?;
                return Ok(());
            }
        };
        let hint = self.read(system, &self.hint).unwrap_or_default();

        let hint = self.represent(&hint);
        let answer = self.represent(&answer);
        if hint != answer {
            let row = hint
                .iter()
                .zip(answer.iter())
                .position(|(h, a)| h != a)
                .unwrap_or_else(|| hint.len().min(answer.len()));
            info!(row, "answer differs from hint");
            self.base.set_status(status);
            self.base.record("mismatch", format!("row {}", row + 1))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(options: DiffOptions) -> DiffTask {
        let p = SandboxPath::parse_output("x").unwrap();
        DiffTask::new(p.clone(), p, options).unwrap()
    }

    #[test]
    fn whitespace_and_case() {
        let d = diff(DiffOptions::default());
        assert_eq!(d.represent("3\n"), d.represent("3"));
        assert_eq!(d.represent("1   2\t3 "), d.represent("1 2 3"));
        assert_ne!(d.represent("Hi"), d.represent("hi"));

        let d = diff(DiffOptions {
            case_sensitive: false,
            ..DiffOptions::default()
        });
        assert_eq!(d.represent("Hi"), d.represent("hi"));

        let d = diff(DiffOptions {
            space_sensitive: true,
            ..DiffOptions::default()
        });
        assert_ne!(d.represent("3\n"), d.represent("3"));
    }

    #[test]
    fn table_mode() {
        let d = diff(DiffOptions {
            row_delimiter: Some("\n".to_owned()),
            column_delimiter: Some(",".to_owned()),
            row_sort: true,
            column_sort: true,
            ..DiffOptions::default()
        });
        assert_eq!(d.represent("b,a\n\nd, c\n"), d.represent("c,d\na,b"));
        assert_eq!(
            d.represent("b,a\nd,c"),
            vec![vec!["a".to_owned(), "b".to_owned()], vec!["c".to_owned(), "d".to_owned()]]
        );
        assert_ne!(d.represent("a,b\nc"), d.represent("a,b\nc,d"));
    }
}
