//! Child process channel
//!
//! Spawns the AMPL binary with piped stdio. Background threads perform the
//! blocking pipe reads and forward raw chunks over an mpsc channel; they
//! never touch session state.

use std::io::{self, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

/// Read buffer size for the stdout/stderr pipes
const READ_CHUNK: usize = 4096;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Child process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("Failed to write to child: {0}")]
    Write(#[source] io::Error),

    #[error("Channel is already started")]
    AlreadyStarted,

    #[error("Channel is not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// Notifications from the child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Bytes read from stdout (protocol frames)
    Stdout(Vec<u8>),
    /// Bytes read from stderr (unframed diagnostics)
    Stderr(Vec<u8>),
    /// The process exited; `None` when killed by a signal or unknown
    Closed(Option<i32>),
}

/// Byte-stream connection to a child process.
///
/// `start` hands back the receiving end of the event stream. Events are
/// delivered in the order the child produced them on each pipe.
pub trait Channel {
    fn start(&mut self) -> Result<Receiver<ChannelEvent>>;

    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Half-close: end the child's stdin
    fn close(&mut self);
}

/// Channel backed by `std::process`
pub struct ProcessChannel {
    program: String,
    args: Vec<String>,
    stdin: Option<ChildStdin>,
    child: Option<Arc<Mutex<Child>>>,
    started: bool,
}

impl ProcessChannel {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            stdin: None,
            child: None,
            started: false,
        }
    }

    fn spawn_reader<R>(
        mut pipe: R,
        tx: Sender<ChannelEvent>,
        wrap: fn(Vec<u8>) -> ChannelEvent,
    ) -> JoinHandle<()>
    where
        R: Read + Send + 'static,
    {
        thread::spawn(move || {
            read_pipe(&mut pipe, &tx, wrap);
        })
    }

    /// Forward stdout until EOF, then reap the child and report its code.
    ///
    /// `Closed` is sent only after the stderr reader has drained, so no
    /// diagnostic arrives after it.
    fn spawn_waiter<R>(
        mut stdout: R,
        stderr_reader: JoinHandle<()>,
        child: Arc<Mutex<Child>>,
        tx: Sender<ChannelEvent>,
    ) where
        R: Read + Send + 'static,
    {
        thread::spawn(move || {
            if !read_pipe(&mut stdout, &tx, ChannelEvent::Stdout) {
                return;
            }
            if stderr_reader.join().is_err() {
                warn!("Stderr reader panicked");
            }

            // Poll instead of a blocking wait so Drop can still kill the child
            let code = loop {
                let status = match child.lock() {
                    Ok(mut child) => child.try_wait(),
                    Err(_) => break None,
                };
                match status {
                    Ok(Some(status)) => break status.code(),
                    Ok(None) => thread::sleep(Duration::from_millis(5)),
                    Err(e) => {
                        warn!("Failed to wait for child: {}", e);
                        break None;
                    }
                }
            };

            info!("Child exited with code {:?}", code);
            let _ = tx.send(ChannelEvent::Closed(code));
        });
    }
}

/// Forward pipe chunks until EOF or a read error.
///
/// Returns `false` once the receiver is gone.
fn read_pipe<R: Read>(pipe: &mut R, tx: &Sender<ChannelEvent>, wrap: fn(Vec<u8>) -> ChannelEvent) -> bool {
    let mut buffer = vec![0u8; READ_CHUNK];
    loop {
        match pipe.read(&mut buffer) {
            Ok(0) => return true,
            Ok(n) => {
                if tx.send(wrap(buffer[..n].to_vec())).is_err() {
                    return false;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Pipe read ended: {}", e);
                return true;
            }
        }
    }
}

impl Channel for ProcessChannel {
    fn start(&mut self) -> Result<Receiver<ChannelEvent>> {
        if self.started {
            return Err(ChannelError::AlreadyStarted);
        }

        info!("Starting {} {:?}", self.program, self.args);

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ChannelError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(ChannelError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(ChannelError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(ChannelError::MissingPipe("stderr"))?;

        let child = Arc::new(Mutex::new(child));
        let (tx, rx) = mpsc::channel();

        let stderr_reader = Self::spawn_reader(stderr, tx.clone(), ChannelEvent::Stderr);
        Self::spawn_waiter(stdout, stderr_reader, Arc::clone(&child), tx);

        self.stdin = Some(stdin);
        self.child = Some(child);
        self.started = true;
        Ok(rx)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(ChannelError::NotRunning)?;
        stdin.write_all(data).map_err(ChannelError::Write)?;
        stdin.flush().map_err(ChannelError::Write)
    }

    fn close(&mut self) {
        if self.stdin.take().is_some() {
            debug!("Closed child stdin");
        }
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        self.close();

        if let Some(child) = self.child.take() {
            if let Ok(mut child) = child.lock() {
                if let Ok(None) = child.try_wait() {
                    warn!("Child still running on drop, killing it");
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_missing_binary() {
        let mut channel = ProcessChannel::new("definitely-not-an-ampl-binary-xyz", vec![]);
        let result = channel.start();
        assert!(matches!(result, Err(ChannelError::Spawn { .. })));
    }

    #[test]
    fn test_write_before_start() {
        let mut channel = ProcessChannel::new("ampl", vec!["-b".to_string()]);
        assert!(matches!(channel.write(b"0 "), Err(ChannelError::NotRunning)));
    }

    #[test]
    #[cfg(unix)]
    fn test_echo_child_stdout_and_exit() {
        let mut channel = ProcessChannel::new(
            "sh",
            vec![
                "-c".to_string(),
                "printf '2 output\\nhi'; printf 'oops' >&2; exit 3".to_string(),
            ],
        );
        let rx = channel.start().expect("spawn sh");
        assert!(matches!(channel.start(), Err(ChannelError::AlreadyStarted)));

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let code = loop {
            match rx.recv_timeout(Duration::from_secs(5)).expect("event timed out") {
                ChannelEvent::Stdout(data) => stdout.extend(data),
                ChannelEvent::Stderr(data) => stderr.extend(data),
                ChannelEvent::Closed(code) => break code,
            }
        };

        assert_eq!(stdout, b"2 output\nhi");
        assert_eq!(code, Some(3));
        // stderr is fully drained before the exit is reported
        assert_eq!(stderr, b"oops");
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
