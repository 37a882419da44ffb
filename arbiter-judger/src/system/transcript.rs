use crate::command::Command;
use crate::result::CommandResult;

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use tracing::warn;

/// Human readable record of one command, written to `log/<seq>_<name>_cmd.txt`.
#[derive(Debug)]
pub struct Transcript {
    file: Option<File>,
}

impl Transcript {
    pub fn disabled() -> Self {
        Self { file: None }
    }

    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self { file: Some(file) })
    }

    fn section(&mut self, title: &str, lines: &[String]) {
        let file = match self.file {
            Some(ref mut f) => f,
            None => return,
        };
        let ret = (|| -> io::Result<()> {
            writeln!(file, "{}:", title)?;
            for line in lines {
                writeln!(file, "{}", line)?;
            }
            writeln!(file)?;
            file.flush()
        })();
        if let Err(err) = ret {
            warn!(%err, "failed to write transcript");
        }
    }

    pub fn write_command(&mut self, cmd: &Command, resolved_line: &str) {
        self.section("Command", &[format!("{:#?}", cmd)]);
        self.section("Command line", &[cmd.declared_line()]);
        self.section("Resolved command line", &[resolved_line.to_owned()]);
        let prereqs: Vec<String> = cmd.prerequirements().iter().map(ToString::to_string).collect();
        self.section("Prerequirements", &prereqs);
        let posts: Vec<String> = cmd
            .postconditions()
            .iter()
            .map(|(p, status)| format!("{} -> {}", p, status.as_str()))
            .collect();
        self.section("Postconditions", &posts);
    }

    pub fn write_result(&mut self, result: &CommandResult) {
        let report = result.to_report();
        let text = match serde_json::to_string_pretty(&report) {
            Ok(s) => s,
            Err(_) => format!("{:#?}", result),
        };
        self.section("Result", &[text]);
    }
}
