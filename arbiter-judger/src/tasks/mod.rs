mod background;
mod build;
mod diff;
mod logs;
mod prepare;
mod rules;
mod run;
mod system;

pub use self::background::StopBackgroundTask;
pub use self::build::{BuildConfig, BuildTask, Strategy};
pub use self::diff::{DiffOptions, DiffTask};
pub use self::logs::CollectLogsTask;
pub use self::prepare::PrepareTask;
pub use self::rules::{CountRule, RulesTask};
pub use self::run::RunTask;
pub use self::system::{DirectorySpec, SystemPrepareTask, UserSpec};

use crate::args::Arg;
use crate::command::{chown_dir, Command};
use crate::paths::OutputPath;
use crate::system::System;
use crate::task::TaskBase;

use arbiter_protocol::Status;

use anyhow::Result;

/// Hands a directory tree to its owner and closes it to others.
/// Does nothing without a user or a group.
fn secure_directory(
    base: &mut TaskBase,
    system: &mut System,
    dir: &OutputPath,
    user: Option<&str>,
    group: Option<&str>,
) -> Result<Option<Status>> {
    if user.is_none() && group.is_none() {
        return Ok(None);
    }
    let chown = chown_dir(system.is_superuser(), dir, user, group);
    if let Some(s) = base.run_command(system, "chown", chown)? {
        return Ok(Some(s));
    }
    for &(sub, kind, mode) in &[
        ("chmod_d", "d", "o-rwx,g-w+rx,u+rwx"),
        ("chmod_f", "f", "o-rwx,g-w+r,u+rw"),
    ] {
        let cmd = Command::program("find")
            .arg(Arg::Path(dir.clone().into()))
            .args(vec!["-type", kind, "-exec", "chmod", mode, "{}", "+"]);
        if let Some(s) = base.run_command(system, sub, cmd)? {
            return Ok(Some(s));
        }
    }
    Ok(None)
}
