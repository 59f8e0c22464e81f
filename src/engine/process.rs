//! Child process helpers: command description, chunked pipe forwarding, force kill.

use anyhow::Result;
use std::ffi::OsStr;
use std::io::Read;

use crate::utils::config::PROCESS_READ_CHUNK_SIZE;

/// Callback receiving raw stdout/stderr chunks as they arrive.
pub type ChunkSink<'a> = &'a (dyn Fn(&[u8]) + Sync);

/// Sink that drops everything.
pub fn discard(_: &[u8]) {}

/// `program arg1 arg2 ...` for logs and errors.
pub fn describe_command<S: AsRef<OsStr>>(program: &OsStr, args: &[S]) -> String {
    let mut out = program.to_string_lossy().into_owned();
    for a in args {
        out.push(' ');
        out.push_str(&a.as_ref().to_string_lossy());
    }
    out
}

/// Read `reader` to EOF, handing every chunk to `sink`.
pub fn forward_chunks<R: Read>(mut reader: R, sink: ChunkSink<'_>) {
    let mut buf = vec![0u8; PROCESS_READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => sink(&buf[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

/// Force-kill `pid`. SIGKILL on Unix.
#[cfg(unix)]
pub fn kill_process(pid: u32) -> Result<()> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // Already gone.
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        anyhow::bail!("kill {}: {}", pid, err);
    }
    Ok(())
}

/// Force-kill `pid` and its children. A plain terminate does not stop ffmpeg trees on Windows.
#[cfg(not(unix))]
pub fn kill_process(pid: u32) -> Result<()> {
    use anyhow::Context;
    let status = std::process::Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/f", "/t"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .context("run taskkill")?;
    if !status.success() {
        anyhow::bail!("taskkill /pid {} exited with {}", pid, status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn describe_joins_args() {
        let s = describe_command(OsStr::new("ffprobe"), &["-i", "a b.mov"]);
        assert_eq!(s, "ffprobe -i a b.mov");
    }

    #[test]
    fn forward_reads_everything() {
        let data = vec![7u8; PROCESS_READ_CHUNK_SIZE * 2 + 3];
        let got = Mutex::new(Vec::new());
        forward_chunks(&data[..], &|c: &[u8]| got.lock().unwrap().extend_from_slice(c));
        assert_eq!(got.into_inner().unwrap(), data);
    }
}
