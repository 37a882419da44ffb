//! Byte-capped output files.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::thread::{self, JoinHandle};

pub fn open_output(path: &Path, append: bool) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    options.open(path)
}

/// Drains `source` to EOF, keeping at most `max_bytes` in `dest`.
pub fn copy_capped(
    mut source: impl Read,
    mut dest: impl Write,
    max_bytes: Option<u64>,
) -> io::Result<u64> {
    let mut buf = vec![0u8; 65536];
    let mut written: u64 = 0;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        let keep = match max_bytes {
            Some(max) => (max.saturating_sub(written)).min(n as u64) as usize,
            None => n,
        };
        if keep > 0 {
            dest.write_all(&buf[..keep])?;
            written += keep as u64;
        }
    }
    dest.flush()?;
    Ok(written)
}

pub fn spawn_copier<R>(source: R, dest: File, max_bytes: Option<u64>) -> JoinHandle<io::Result<u64>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || copy_capped(source, dest, max_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_but_drains() {
        let source: &[u8] = b"0123456789";
        let mut dest = Vec::new();
        let written = copy_capped(source, &mut dest, Some(4)).unwrap();
        assert_eq!(written, 4);
        assert_eq!(dest, b"0123");

        let mut dest = Vec::new();
        copy_capped(source, &mut dest, None).unwrap();
        assert_eq!(dest, b"0123456789");
    }
}
