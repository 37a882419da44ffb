//! Provisioning commands. Without superuser rights the ones that need it
//! degrade to no-ops, or to plain directory creation for `user_add`.

use super::Command;

use crate::args::Arg;
use crate::paths::{OutputPath, SandboxPath};
use crate::predicates::Prerequirement;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ownership {
    pub user: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u32>,
}

impl Ownership {
    pub fn new(user: Option<&str>, group: Option<&str>, mode: Option<u32>) -> Self {
        Self {
            user: user.map(ToOwned::to_owned),
            group: group.map(ToOwned::to_owned),
            mode,
        }
    }

    fn install_args(&self, superuser: bool, mut cmd: Command) -> Command {
        if superuser {
            if let Some(ref user) = self.user {
                cmd = cmd.arg("--owner").arg(user.as_str());
            }
            if let Some(ref group) = self.group {
                cmd = cmd.arg("--group").arg(group.as_str());
            }
        }
        if let Some(mode) = self.mode {
            cmd = cmd.arg("--mode").arg(format!("0{:o}", mode));
        }
        cmd
    }

    fn identity_prerequirements(&self, mut cmd: Command) -> Command {
        if let Some(ref user) = self.user {
            cmd = cmd.prerequirement(Prerequirement::UserExists(user.clone()));
        }
        if let Some(ref group) = self.group {
            cmd = cmd.prerequirement(Prerequirement::GroupExists(group.clone()));
        }
        cmd
    }
}

pub fn install(
    superuser: bool,
    source: SandboxPath,
    target: &OutputPath,
    ownership: &Ownership,
) -> Command {
    let cmd = ownership.install_args(superuser, Command::program("install").safe(true));
    let cmd = cmd
        .arg("--no-target-directory")
        .arg(Arg::Path(source.clone()))
        .arg(Arg::Path(target.clone().into()))
        .prerequirement(Prerequirement::FileExists(source))
        .prerequirement(Prerequirement::DirectoryExists(target.parent().into()));
    ownership.identity_prerequirements(cmd)
}

pub fn directory_add(superuser: bool, path: &OutputPath, ownership: &Ownership) -> Command {
    let cmd = ownership.install_args(superuser, Command::program("install").safe(true));
    let cmd = cmd.arg("--directory").arg(Arg::Path(path.clone().into()));
    ownership.identity_prerequirements(cmd)
}

pub fn chown_dir(
    superuser: bool,
    target: &OutputPath,
    user: Option<&str>,
    group: Option<&str>,
) -> Command {
    if !superuser {
        return Command::noop();
    }
    let cmd = match (user, group) {
        (Some(u), Some(g)) => Command::program("chown").arg(format!("{}:{}", u, g)),
        (Some(u), None) => Command::program("chown").arg(u),
        (None, Some(g)) => Command::program("chgrp").arg(g),
        (None, None) => return Command::noop(),
    };
    let ownership = Ownership::new(user, group, None);
    let cmd = cmd
        .safe(true)
        .arg("--recursive")
        .arg(Arg::Path(target.clone().into()))
        .prerequirement(Prerequirement::DirectoryExists(target.clone().into()));
    ownership.identity_prerequirements(cmd)
}

pub fn user_add(
    superuser: bool,
    user: &str,
    home: Option<&OutputPath>,
    groups: &[String],
) -> Command {
    if !superuser {
        return match home {
            Some(home) => Command::program("mkdir")
                .safe(true)
                .arg("-p")
                .arg(Arg::Path(home.clone().into())),
            None => Command::noop(),
        };
    }
    let mut cmd = Command::program("useradd")
        .safe(true)
        .arg("--comment")
        .arg(user)
        .arg("--gid")
        .arg(user);
    cmd = match home {
        Some(home) => cmd
            .arg("--create-home")
            .arg("--home-dir")
            .arg(Arg::Path(home.clone().into())),
        None => cmd.arg("--no-create-home"),
    };
    if !groups.is_empty() {
        cmd = cmd.arg("--groups").arg(groups.join(","));
    }
    cmd.arg("--no-user-group").arg(user)
}

pub fn group_add(superuser: bool, group: &str) -> Command {
    if !superuser {
        return Command::noop();
    }
    Command::program("groupadd").safe(true).arg(group)
}

pub fn user_del(superuser: bool, user: &str) -> Command {
    if !superuser {
        return Command::noop();
    }
    Command::program("userdel").safe(true).arg(user)
}

pub fn group_del(superuser: bool, group: &str) -> Command {
    if !superuser {
        return Command::noop();
    }
    Command::program("groupdel").safe(true).arg(group)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(cmd: &Command) -> String {
        let args: Vec<String> = cmd.declared_args().iter().map(ToString::to_string).collect();
        args.join(" ")
    }

    #[test]
    fn degrade_without_superuser() {
        let home = OutputPath::new("home_arbiter-exec").unwrap();
        assert!(group_add(false, "arbiter-run").is_noop());
        assert!(user_del(false, "arbiter-exec").is_noop());
        assert!(chown_dir(false, &home, Some("arbiter-exec"), None).is_noop());

        let cmd = user_add(false, "arbiter-exec", Some(&home), &[]);
        assert_eq!(line(&cmd), "-p OUT/home_arbiter-exec");
        assert!(user_add(false, "arbiter-exec", None, &[]).is_noop());
    }

    #[test]
    fn install_arguments() {
        let ownership = Ownership::new(Some("arbiter-test"), Some("arbiter-run"), Some(0o750));
        let dir = OutputPath::new("solution/src").unwrap();

        let cmd = directory_add(true, &dir, &ownership);
        assert_eq!(
            line(&cmd),
            "--owner arbiter-test --group arbiter-run --mode 0750 --directory OUT/solution/src"
        );
        let cmd = directory_add(false, &dir, &ownership);
        assert_eq!(line(&cmd), "--mode 0750 --directory OUT/solution/src");
        assert!(cmd.is_safe());

        let cmd = user_add(true, "arbiter-exec", None, &["arbiter-run".to_owned()]);
        assert_eq!(
            line(&cmd),
            "--comment arbiter-exec --gid arbiter-exec --no-create-home --groups arbiter-run \
             --no-user-group arbiter-exec"
        );
    }
}
