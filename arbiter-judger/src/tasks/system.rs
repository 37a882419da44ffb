use crate::command::{directory_add, group_add, group_del, user_add, user_del, Command, Ownership};
use crate::paths::OutputPath;
use crate::predicates::Postcondition;
use crate::system::System;
use crate::task::{Task, TaskBase, TaskOptions, BUILD_USER, EXEC_USER, RUN_GROUP, TEST_USER};

use arbiter_protocol::Status;

use std::collections::BTreeSet;

use anyhow::Result;
use tracing::info;

#[derive(Debug, Clone)]
pub struct UserSpec {
    pub name: String,
    pub home: Option<OutputPath>,
    /// Supplementary groups. The user's own group is always added.
    pub groups: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DirectorySpec {
    pub path: OutputPath,
    pub ownership: Ownership,
}

fn nice_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Provisions groups, users and directories, then registers them in the system.
#[derive(Debug)]
pub struct SystemPrepareTask {
    base: TaskBase,
    groups: Vec<String>,
    users: Vec<UserSpec>,
    directories: Vec<DirectorySpec>,
}

impl SystemPrepareTask {
    pub fn new() -> Self {
        Self {
            base: TaskBase::new(TaskOptions::default().record_result(false)),
            groups: Vec::new(),
            users: Vec::new(),
            directories: Vec::new(),
        }
    }

    /// The judge's users and the standard output layout.
    pub fn standard() -> Result<Self> {
        let mut task = Self::new().group(RUN_GROUP);
        for user in &[TEST_USER, BUILD_USER, EXEC_USER] {
            let home = OutputPath::new(format!("home_{}", user))?;
            task = task.user(UserSpec {
                name: (*user).to_owned(),
                home: Some(home),
                groups: vec![RUN_GROUP.to_owned()],
            });
        }
        let layout: &[(&str, Option<&str>, Option<&str>, u32)] = &[
            (".", Some(TEST_USER), Some(RUN_GROUP), 0o2750),
            ("log", None, None, 0o2700),
            ("test", Some(TEST_USER), Some(TEST_USER), 0o2750),
            ("solution", Some(TEST_USER), Some(RUN_GROUP), 0o2750),
            ("solution/src", Some(TEST_USER), Some(BUILD_USER), 0o2750),
            ("solution/build", Some(BUILD_USER), Some(RUN_GROUP), 0o2750),
            ("tools", Some(TEST_USER), Some(TEST_USER), 0o2750),
            ("tools/src", Some(TEST_USER), Some(TEST_USER), 0o2750),
            ("tools/build", Some(TEST_USER), Some(TEST_USER), 0o2750),
        ];
        for &(path, user, group, mode) in layout {
            task = task.directory(DirectorySpec {
                path: OutputPath::new(path)?,
                ownership: Ownership::new(user, group, Some(mode)),
            });
        }
        Ok(task)
    }

    pub fn group(mut self, name: &str) -> Self {
        let name = nice_name(name);
        if !self.groups.contains(&name) {
            self.groups.push(name);
        }
        self
    }

    pub fn user(mut self, mut spec: UserSpec) -> Self {
        spec.name = nice_name(&spec.name);
        if self.users.iter().any(|u| u.name == spec.name) {
            return self;
        }
        let mut groups: BTreeSet<String> = spec.groups.iter().map(|g| nice_name(g)).collect();
        groups.insert(spec.name.clone());
        for group in &groups {
            self = self.group(group);
        }
        spec.groups = groups.into_iter().collect();
        self.users.push(spec);
        self
    }

    pub fn directory(mut self, spec: DirectorySpec) -> Self {
        if self.directories.iter().any(|d| d.path == spec.path) {
            return self;
        }
        self.directories.push(spec);
        self
    }

    fn run(&mut self, system: &mut System, sub: &str, cmd: Command) -> Result<Option<Status>> {
        let cmd = cmd.postcondition(Postcondition::ReturnCode(Vec::new()), Status::Int);
        self.base.run_command(system, sub, cmd)
    }
}

impl Default for SystemPrepareTask {
    fn default() -> Self {
        Self::new()
    }
}

impl Task for SystemPrepareTask {
    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn execute(&mut self, system: &mut System) -> Result<()> {
        let superuser = system.is_superuser();
        info!(superuser, users = self.users.len(), "provisioning");

        // Stale accounts from an earlier run may or may not exist.
        for user in self.users.clone() {
            if !system.has_user(&user.name) {
                let sub = format!("usr_del_{}", user.name);
                self.base.run_command(system, &sub, user_del(superuser, &user.name))?;
            }
        }
        for group in self.groups.clone() {
            if !system.has_group(&group) {
                let sub = format!("grp_del_{}", group);
                self.base.run_command(system, &sub, group_del(superuser, &group))?;
            }
        }

        for group in self.groups.clone() {
            if system.has_group(&group) {
                continue;
            }
            let sub = format!("grp_{}", group);
            if let Some(status) = self.run(system, &sub, group_add(superuser, &group))? {
                self.base.set_status(status);
                return Ok(());
            }
            system.add_group(&group);
        }

        for user in self.users.clone() {
            if system.has_user(&user.name) {
                continue;
            }
            let cmd = user_add(superuser, &user.name, user.home.as_ref(), &user.groups);
            if let Some(status) = self.run(system, &format!("usr_{}", user.name), cmd)? {
                self.base.set_status(status);
                return Ok(());
            }
            system.add_user(&user.name, user.home.as_ref());
        }

        for dir in self.directories.clone() {
            let sub = format!("dir_{}", dir.path.to_string().replace('/', "_"));
            let cmd = directory_add(superuser, &dir.path, &dir.ownership);
            if let Some(status) = self.run(system, &sub, cmd)? {
                self.base.set_status(status);
                return Ok(());
            }
        }
        Ok(())
    }
}
