use std::ffi::CString;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use nix::unistd::{self, Gid, Group, Uid, User};
use serde::{Deserialize, Serialize};

/// What to do when a command asks for a user but the engine is unprivileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityPolicy {
    /// Fail the command.
    Require,
    /// Run it as the current user and log that the switch was skipped.
    SkipUnprivileged,
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        IdentityPolicy::Require
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
    pub groups: Vec<u32>,
}

pub fn is_superuser() -> bool {
    Uid::effective().is_root()
}

fn find_user(user: &str) -> Result<User> {
    let found = match user.parse::<u32>() {
        Ok(uid) => User::from_uid(Uid::from_raw(uid))?,
        Err(_) => User::from_name(user)?,
    };
    found.with_context(|| format!("unknown user: {}", user))
}

fn find_group(group: &str) -> Result<Group> {
    let found = match group.parse::<u32>() {
        Ok(gid) => Group::from_gid(Gid::from_raw(gid))?,
        Err(_) => Group::from_name(group)?,
    };
    found.with_context(|| format!("unknown group: {}", group))
}

/// Resolves user and group names to the ids the child switches to.
/// The group defaults to the user's primary group.
pub fn lookup(user: Option<&str>, group: Option<&str>) -> Result<Option<Identity>> {
    let user = match user {
        Some(u) => Some(find_user(u)?),
        None => None,
    };
    let gid = match (group, &user) {
        (Some(g), _) => find_group(g)?.gid,
        (None, Some(u)) => u.gid,
        (None, None) => return Ok(None),
    };
    let (uid, groups) = match user {
        Some(u) => {
            let name = CString::new(u.name.as_bytes())?;
            let groups = unistd::getgrouplist(&name, gid)
                .with_context(|| format!("failed to list groups of {}", u.name))?;
            (u.uid, groups)
        }
        None => (Uid::effective(), vec![gid]),
    };
    Ok(Some(Identity {
        uid: uid.as_raw(),
        gid: gid.as_raw(),
        groups: groups.into_iter().map(Gid::as_raw).collect(),
    }))
}

pub fn home_of(user: &str) -> Option<PathBuf> {
    find_user(user).ok().map(|u| u.dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_root() {
        let id = lookup(Some("root"), None).unwrap().unwrap();
        assert_eq!(id.uid, 0);
        assert_eq!(id.gid, 0);
        assert!(id.groups.contains(&0));
        assert!(lookup(None, None).unwrap().is_none());
        assert!(lookup(Some("arbiter-no-such-user"), None).is_err());
    }
}
