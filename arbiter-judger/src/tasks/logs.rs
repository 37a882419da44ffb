use crate::paths::OutputPath;
use crate::system::System;
use crate::task::{Task, TaskBase, TaskOptions};

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Packs every non-empty file under the log directory into one archive.
#[derive(Debug)]
pub struct CollectLogsTask {
    base: TaskBase,
    logs_directory: OutputPath,
    archive: OutputPath,
}

impl CollectLogsTask {
    pub fn new(logs_directory: OutputPath, archive: OutputPath) -> Self {
        Self {
            base: TaskBase::new(TaskOptions::default().obligatory(true)),
            logs_directory,
            archive,
        }
    }

    /// `log/` into `log.zip`.
    pub fn standard() -> Result<Self> {
        Ok(Self::new(OutputPath::new("log")?, OutputPath::new("log.zip")?))
    }
}

fn pack(root: &Path, files: &[PathBuf], archive: &Path) -> Result<usize> {
    let out = File::create(archive)
        .with_context(|| format!("failed to create archive: {}", archive.display()))?;
    let mut zip = ZipWriter::new(BufWriter::new(out));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut count = 0;
    for file in files {
        let name = file.strip_prefix(root).unwrap_or(file);
        zip.start_file(name.to_string_lossy(), options)?;
        let mut src = File::open(file)?;
        io::copy(&mut src, &mut zip)?;
        count += 1;
    }
    zip.finish()?;
    debug!(count, "archive finished");
    Ok(count)
}

impl Task for CollectLogsTask {
    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn execute(&mut self, system: &mut System) -> Result<()> {
        let logs = system.resolve_output(&self.logs_directory);
        let archive = system.resolve_output(&self.archive);

        let mut files = Vec::new();
        if logs.is_dir() {
            for file in system.find_files(&logs)? {
                if file != archive && fs::metadata(&file)?.len() > 0 {
                    files.push(file);
                }
            }
        }

        let root = system.output_directory().to_owned();
        let count = pack(&root, &files, &archive)?;
        info!(archive = %archive.display(), count, "logs collected");
        self.base.record("logs", archive)?;
        Ok(())
    }
}
