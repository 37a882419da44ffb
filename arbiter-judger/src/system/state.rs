use crate::paths::{InputPath, OutputPath, SandboxPath};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::debug;

/// Registries shared by every backend: output root, provisioned identities,
/// registered input paths and variables. All of them only grow.
#[derive(Debug)]
pub struct SystemState {
    output_directory: PathBuf,
    environment: BTreeMap<String, String>,
    users: BTreeMap<String, Option<PathBuf>>,
    groups: BTreeSet<String>,
    paths: BTreeSet<PathBuf>,
    variables: HashMap<String, String>,
}

impl SystemState {
    /// `output_directory` must already be canonical.
    pub fn new(output_directory: PathBuf) -> Self {
        Self {
            output_directory,
            environment: BTreeMap::new(),
            users: BTreeMap::new(),
            groups: BTreeSet::new(),
            paths: BTreeSet::new(),
            variables: HashMap::new(),
        }
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    pub fn set_base_environment(&mut self, environment: BTreeMap<String, String>) {
        self.environment = environment;
    }

    pub fn resolve_output(&self, path: &OutputPath) -> PathBuf {
        if path.is_root() {
            self.output_directory.clone()
        } else {
            self.output_directory.join(path.as_path())
        }
    }

    /// Input paths resolve to themselves and never consult the output root.
    pub fn resolve_path(&self, path: &SandboxPath, work_directory: &OutputPath) -> PathBuf {
        match path {
            SandboxPath::Input(p) => p.as_path().to_owned(),
            SandboxPath::Output(p) => self.resolve_output(p),
            SandboxPath::Relative(p) => {
                let work = self.resolve_output(work_directory);
                if p.is_root() {
                    work
                } else {
                    work.join(p.as_path())
                }
            }
        }
    }

    /// Sanctioned program directories, in lookup order.
    pub fn program_path(&self) -> Vec<PathBuf> {
        let shared = self.output_directory.join("shared");
        let candidates = vec![
            shared.join("sbin"),
            shared.join("bin"),
            PathBuf::from("/usr/local/sbin"),
            PathBuf::from("/usr/local/bin"),
            PathBuf::from("/usr/sbin"),
            PathBuf::from("/usr/bin"),
            PathBuf::from("/sbin"),
            PathBuf::from("/bin"),
        ];
        candidates.into_iter().filter(|p| p.is_dir()).collect()
    }

    pub fn environment(&self) -> BTreeMap<String, String> {
        let join = |dirs: &[PathBuf]| {
            dirs.iter()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>()
                .join(":")
        };

        let mut env = self.environment.clone();
        env.insert("PATH".to_owned(), join(&self.program_path()));

        let shared = self.output_directory.join("shared");
        let lib = shared.join("lib");
        if lib.is_dir() {
            let lib = lib.display().to_string();
            env.insert("LD_LIBRARY_PATH".to_owned(), lib.clone());
            env.insert("LIBRARY_PATH".to_owned(), lib);
        }
        let include = shared.join("include");
        if include.is_dir() {
            env.insert("CPATH".to_owned(), include.display().to_string());
        }
        env.insert("LANG".to_owned(), "en_US.UTF-8".to_owned());
        env
    }

    pub fn which(&self, program: &str) -> Option<PathBuf> {
        if program.contains('/') {
            return None;
        }
        self.program_path()
            .into_iter()
            .map(|dir| dir.join(program))
            .find(|p| is_executable(p))
    }

    /// Regular files under `root`, without following symlinks or crossing devices.
    pub fn find_files(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        let dev = fs::metadata(root)?.dev();
        let mut files = Vec::new();
        let mut stack = vec![root.to_owned()];
        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir)?.collect::<io::Result<Vec<_>>>()?;
            entries.sort_by_key(|e| e.file_name());
            for entry in entries {
                let meta = fs::symlink_metadata(entry.path())?;
                if meta.file_type().is_symlink() || meta.dev() != dev {
                    continue;
                }
                if meta.is_dir() {
                    stack.push(entry.path());
                } else if meta.is_file() {
                    files.push(entry.path());
                }
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn file_contents(&self, path: &Path) -> io::Result<String> {
        let bytes = fs::read(path)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn add_user(&mut self, user: &str, home: Option<PathBuf>) {
        debug!(user, "registering user");
        self.users.insert(user.to_owned(), home);
    }

    pub fn add_group(&mut self, group: &str) {
        debug!(group, "registering group");
        self.groups.insert(group.to_owned());
    }

    pub fn add_path(&mut self, path: &InputPath) {
        debug!(path = %path, "registering input path");
        self.paths.insert(path.as_path().to_owned());
    }

    pub fn has_user(&self, user: &str) -> bool {
        self.users.contains_key(user)
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    pub fn user_home(&self, user: &str) -> Option<&Path> {
        self.users.get(user).and_then(|h| h.as_deref())
    }

    /// A path is registered if it or one of its ancestors was added. Input
    /// paths never contain `..`, so the ancestor walk cannot be escaped.
    pub fn is_registered(&self, path: &InputPath) -> bool {
        if path.is_dev_null() {
            return true;
        }
        path.as_path().ancestors().any(|p| self.paths.contains(p))
    }

    pub fn set_variable(&mut self, name: &str, value: impl Into<String>) {
        self.variables.insert(name.to_owned(), value.into());
    }

    pub fn variables(&self) -> &HashMap<String, String> {
        &self.variables
    }
}

pub fn is_executable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}
