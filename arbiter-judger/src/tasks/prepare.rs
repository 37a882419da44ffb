use super::secure_directory;

use crate::command::{directory_add, install, Ownership};
use crate::paths::{OutputPath, SandboxPath};
use crate::predicates::Prerequirement;
use crate::system::System;
use crate::task::{Task, TaskBase, TaskOptions, BUILD_USER, TEST_USER};

use arbiter_protocol::Status;

use std::fs::File;
use std::path::Path;

use anyhow::{Context as _, Result};
use tracing::{info, warn};
use zip::ZipArchive;

/// Puts a submitted file, or the contents of a zip archive, into a target directory.
#[derive(Debug)]
pub struct PrepareTask {
    base: TaskBase,
    source: SandboxPath,
    overlay: Option<SandboxPath>,
    target: OutputPath,
    allow_extract: bool,
    user: Option<String>,
    group: Option<String>,
}

fn unzip(archive: &Path, target: &Path) -> Result<()> {
    let file = File::open(archive)
        .with_context(|| format!("failed to open archive: {}", archive.display()))?;
    let mut zip = ZipArchive::new(file)?;
    zip.extract(target)?;
    Ok(())
}

impl PrepareTask {
    pub fn new(options: TaskOptions, source: SandboxPath, target: OutputPath) -> Self {
        Self {
            base: TaskBase::new(options.record_result(false)),
            source,
            overlay: None,
            target,
            allow_extract: false,
            user: None,
            group: None,
        }
    }

    /// Into `solution/src`, readable by the build user. Failures are CME.
    pub fn solution(source: SandboxPath) -> Result<Self> {
        let options = TaskOptions::default().result_on_error(Some(Status::Cme));
        Ok(Self::new(options, source, OutputPath::new("solution/src")?)
            .owner(Some(TEST_USER), Some(BUILD_USER)))
    }

    /// Into `tools/src/<name>`, archives are unpacked. Failures are INT.
    pub fn tool(name: &str, source: SandboxPath) -> Result<Self> {
        let target = OutputPath::new("tools/src")?.join(name)?;
        Ok(Self::new(TaskOptions::tool(), source, target)
            .allow_extract(true)
            .owner(Some(TEST_USER), Some(TEST_USER)))
    }

    pub fn allow_extract(mut self, allow: bool) -> Self {
        self.allow_extract = allow;
        self
    }

    /// Applied after the source, replacing files it shares with it.
    pub fn overlay(mut self, path: SandboxPath) -> Self {
        self.overlay = Some(path);
        self
    }

    pub fn owner(mut self, user: Option<&str>, group: Option<&str>) -> Self {
        self.user = user.map(ToOwned::to_owned);
        self.group = group.map(ToOwned::to_owned);
        self
    }

    fn is_archive(&self, path: &SandboxPath) -> bool {
        self.allow_extract
            && path
                .extension()
                .map_or(false, |e| e.eq_ignore_ascii_case("zip"))
    }

    fn prepare_source(
        &mut self,
        system: &mut System,
        label: &str,
        source: &SandboxPath,
    ) -> Result<Option<Status>> {
        let status = self.base.options.result_on_error;

        if self.is_archive(source) {
            let archive = system.resolve_path(source, &self.base.work_directory());
            let target = system.resolve_output(&self.target);
            info!(archive = %archive.display(), "extracting");
            if let Err(err) = unzip(&archive, &target) {
                warn!(%err, "extraction failed");
                self.base.record("error", format!("{}_extract: {:#}", label, err))?;
                return Ok(Some(status.unwrap_or(Status::Int)));
            }
            return Ok(None);
        }

        let name = source
            .file_name()
            .ok_or_else(|| anyhow::format_err!("source has no file name: {}", source))?;
        let target = self.target.join(name)?;
        let cmd = install(system.is_superuser(), source.clone(), &target, &Ownership::default());
        self.base.run_command(system, &format!("{}_install", label), cmd)
    }
}

impl Task for PrepareTask {
    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn prerequirements(&self) -> Vec<Prerequirement> {
        let mut list = self.base.prerequirements();
        list.push(Prerequirement::FileExists(self.source.clone()));
        if let Some(ref overlay) = self.overlay {
            list.push(Prerequirement::FileExists(overlay.clone()));
        }
        list
    }

    fn execute(&mut self, system: &mut System) -> Result<()> {
        let dir = directory_add(system.is_superuser(), &self.target, &Ownership::default());
        if let Some(status) = self.base.run_command(system, "dir", dir)? {
            self.base.set_status(status);
            return Ok(());
        }

        let mut sources = vec![("source", self.source.clone())];
        if let Some(ref overlay) = self.overlay {
            sources.push(("overlay", overlay.clone()));
        }
        for (label, source) in sources {
            if let Some(status) = self.prepare_source(system, label, &source)? {
                self.base.set_status(status);
                return Ok(());
            }
        }

        let target = self.target.clone();
        let (user, group) = (self.user.clone(), self.group.clone());
        let status = secure_directory(
            &mut self.base,
            system,
            &target,
            user.as_deref(),
            group.as_deref(),
        )?;
        if let Some(status) = status {
            self.base.set_status(status);
        }
        Ok(())
    }
}
