use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::FromRawFd;

use nix::fcntl::OFlag;
use nix::unistd;

/// Write end, held by the child until `execve` closes it.
pub struct PipeTx(File);

pub struct PipeRx(File);

pub fn create() -> nix::Result<(PipeTx, PipeRx)> {
    let (rx, tx) = unistd::pipe2(OFlag::O_CLOEXEC)?;
    unsafe { Ok((PipeTx(File::from_raw_fd(tx)), PipeRx(File::from_raw_fd(rx)))) }
}

impl PipeTx {
    pub fn write_error(mut self, err: anyhow::Error) -> io::Result<()> {
        let msg = format!("{:?}", err);
        self.0.write_all(msg.as_bytes())
    }
}

impl PipeRx {
    /// Empty means the child reached `execve`.
    pub fn read_result(mut self) -> io::Result<anyhow::Result<()>> {
        let mut buf = Vec::new();
        self.0.read_to_end(&mut buf)?;
        if buf.is_empty() {
            return Ok(Ok(()));
        }
        let msg = String::from_utf8_lossy(&buf).into_owned();
        Ok(Err(anyhow::Error::msg(msg)))
    }
}
