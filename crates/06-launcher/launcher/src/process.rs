//! Managed subprocesses: spawn with piped stdio, pump output through a
//! channel, and stop with a SIGTERM → grace → SIGKILL escalation.

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One line captured from a child's stdout or stderr.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    /// True when the line was `\r`-terminated: a status/progress update
    /// the log view may compress.
    pub progress: bool,
}

/// A spawned child whose output is pumped into an in-memory channel.
pub struct ManagedProcess {
    name: &'static str,
    child: Child,
    lines: Receiver<LogLine>,
    pumps: Vec<JoinHandle<()>>,
}

impl ManagedProcess {
    /// Spawns the command with both stdio streams piped and pumped.
    pub fn spawn(name: &'static str, mut command: Command) -> std::io::Result<Self> {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = command.spawn()?;

        let (tx, lines) = crossbeam_channel::unbounded();
        let mut pumps = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            pumps.push(spawn_pump(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(spawn_pump(stderr, tx));
        }

        Ok(Self {
            name,
            child,
            lines,
            pumps,
        })
    }

    /// Tag used in the merged log view.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// OS process id.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Drains buffered output lines into `f`, returning how many there were.
    pub fn drain_logs(&self, mut f: impl FnMut(&'static str, LogLine)) -> usize {
        let mut drained = 0;
        loop {
            match self.lines.try_recv() {
                Ok(line) => {
                    f(self.name, line);
                    drained += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return drained,
            }
        }
    }

    /// Non-blocking liveness check.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Two-phase stop: SIGTERM, wait up to `grace`, then SIGKILL.
    pub fn stop(&mut self, grace: Duration) -> std::io::Result<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }

        let pid = Pid::from_raw(self.child.id() as i32);
        if let Err(e) = kill(pid, Signal::SIGTERM) {
            log::warn!("{}: SIGTERM failed: {e}", self.name);
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            thread::sleep(Duration::from_millis(50));
        }

        log::warn!("{}: not responding, killing", self.name);
        self.child.kill()?;
        self.child.wait()
    }

    /// Joins the pump threads after the child has exited.
    pub fn finish(mut self) {
        for pump in self.pumps.drain(..) {
            let _ = pump.join();
        }
    }
}

/// Reads a child stream to EOF, splitting on `\n` and `\r` and forwarding
/// non-empty lines.
fn spawn_pump(mut stream: impl Read + Send + 'static, tx: Sender<LogLine>) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut pending = String::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            pending.push_str(&String::from_utf8_lossy(&buf[..n]));

            while let Some(pos) = pending.find(['\n', '\r']) {
                let progress = pending.as_bytes()[pos] == b'\r';
                let text = pending[..pos].trim_end().to_string();
                pending.drain(..=pos);
                if !text.is_empty() {
                    let _ = tx.send(LogLine { text, progress });
                }
            }
        }
        let text = pending.trim_end().to_string();
        if !text.is_empty() {
            let _ = tx.send(LogLine {
                text,
                progress: false,
            });
        }
    })
}
