//! Named-lane process limiter.
//!
//! At most one external process per lane name runs at a time. Waiters on a lane are
//! released strictly in arrival order; different lanes run in parallel. The front of a
//! lane's queue is the current holder, so the queue length is never smaller than the
//! number of waiters still parked.

use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::ffi::OsStr;
use std::process::{Command, Stdio};
use std::sync::Mutex;

use crate::engine::process::{ChunkSink, describe_command, discard, forward_chunks, kill_process};
use crate::errors::ProcessError;
use crate::utils::lock;

struct Waiter {
    ticket: u64,
    release: Sender<()>,
}

#[derive(Default)]
struct LimiterState {
    lanes: HashMap<String, VecDeque<Waiter>>,
    /// ticket -> pid of the process that ticket spawned
    running: HashMap<u64, u32>,
    /// Release senders of waiters dropped by kill-all. Held so their receivers never wake.
    abandoned: Vec<Sender<()>>,
    next_ticket: u64,
    shut_down: bool,
}

/// Collected output of [`ProcessLimiter::run_collect`].
#[derive(Debug, Default, Clone)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Default)]
pub struct ProcessLimiter {
    state: Mutex<LimiterState>,
}

/// Holds a lane until dropped; dropping hands the lane to the next waiter.
pub struct LaneGuard<'a> {
    limiter: &'a ProcessLimiter,
    lane: String,
    ticket: u64,
}

impl Drop for LaneGuard<'_> {
    fn drop(&mut self) {
        self.limiter.release(&self.lane, self.ticket);
    }
}

impl ProcessLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for `lane` in FIFO order. Blocks forever if the limiter is shut down while queued.
    pub fn acquire(&self, lane: &str) -> Result<LaneGuard<'_>, ProcessError> {
        let (tx, rx): (Sender<()>, Receiver<()>) = bounded(1);
        let ticket = {
            let mut st = lock(&self.state);
            if st.shut_down {
                return Err(ProcessError::ShuttingDown);
            }
            let ticket = st.next_ticket;
            st.next_ticket += 1;
            let queue = st.lanes.entry(lane.to_string()).or_default();
            if queue.is_empty() {
                let _ = tx.send(());
            }
            queue.push_back(Waiter {
                ticket,
                release: tx,
            });
            ticket
        };
        // A disconnect only happens if the state was torn down; treat as shutdown.
        rx.recv().map_err(|_| ProcessError::ShuttingDown)?;
        Ok(LaneGuard {
            limiter: self,
            lane: lane.to_string(),
            ticket,
        })
    }

    fn release(&self, lane: &str, ticket: u64) {
        let mut st = lock(&self.state);
        st.running.remove(&ticket);
        let Some(queue) = st.lanes.get_mut(lane) else {
            return;
        };
        queue.retain(|w| w.ticket != ticket);
        let drained = match queue.front() {
            Some(next) => {
                let _ = next.release.send(());
                false
            }
            None => true,
        };
        if drained {
            st.lanes.remove(lane);
        }
    }

    /// Run `program args` once `lane` is free, forwarding output chunks to the sinks.
    /// The lane is released after the process exits, on every path.
    pub fn run_exclusive<P, S>(
        &self,
        lane: &str,
        program: P,
        args: &[S],
        on_stderr: ChunkSink<'_>,
        on_stdout: ChunkSink<'_>,
    ) -> Result<(), ProcessError>
    where
        P: AsRef<OsStr>,
        S: AsRef<OsStr>,
    {
        let guard = self.acquire(lane)?;
        let command = describe_command(program.as_ref(), args);
        debug!("[{}] {}", lane, command);

        let mut child = Command::new(program.as_ref())
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: command.clone(),
                source,
            })?;
        let pid = child.id();
        if !self.track(guard.ticket, pid) {
            let _ = kill_process(pid);
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let status = std::thread::scope(|s| {
            if let Some(out) = stdout {
                s.spawn(move || forward_chunks(out, on_stdout));
            }
            if let Some(err) = stderr {
                s.spawn(move || forward_chunks(err, on_stderr));
            }
            child.wait()
        });
        drop(guard);

        let status = status.map_err(|source| ProcessError::Wait {
            command: command.clone(),
            source,
        })?;
        if status.success() {
            return Ok(());
        }
        match status.code() {
            Some(code) => Err(ProcessError::Exit { command, pid, code }),
            None => Err(ProcessError::Killed { command, pid }),
        }
    }

    /// [`run_exclusive`](Self::run_exclusive) that also collects stdout and stderr.
    /// `on_chunk` still sees every chunk (progress refresh).
    pub fn run_collect<P, S>(
        &self,
        lane: &str,
        program: P,
        args: &[S],
        on_chunk: ChunkSink<'_>,
    ) -> Result<ProcessOutput, ProcessError>
    where
        P: AsRef<OsStr>,
        S: AsRef<OsStr>,
    {
        let stdout = Mutex::new(Vec::new());
        let stderr = Mutex::new(Vec::new());
        self.run_exclusive(
            lane,
            program,
            args,
            &|c: &[u8]| {
                on_chunk(c);
                lock(&stderr).extend_from_slice(c);
            },
            &|c: &[u8]| {
                on_chunk(c);
                lock(&stdout).extend_from_slice(c);
            },
        )?;
        Ok(ProcessOutput {
            stdout: stdout.into_inner().unwrap_or_else(|p| p.into_inner()),
            stderr: stderr.into_inner().unwrap_or_else(|p| p.into_inner()),
        })
    }

    /// Like [`run_exclusive`](Self::run_exclusive) with both streams discarded.
    pub fn run_quiet<P, S>(&self, lane: &str, program: P, args: &[S]) -> Result<(), ProcessError>
    where
        P: AsRef<OsStr>,
        S: AsRef<OsStr>,
    {
        self.run_exclusive(lane, program, args, &discard, &discard)
    }

    /// Record a spawned pid. Returns false if kill-all already ran (caller kills it).
    fn track(&self, ticket: u64, pid: u32) -> bool {
        let mut st = lock(&self.state);
        if st.shut_down {
            return false;
        }
        st.running.insert(ticket, pid);
        true
    }

    /// Terminal shutdown: drop every queued waiter without waking it and force-kill every
    /// tracked process. Later `run_exclusive` calls fail with `ShuttingDown`.
    pub fn kill_all_and_clear_queue(&self) {
        let pids: Vec<u32> = {
            let mut st = lock(&self.state);
            st.shut_down = true;
            let lanes = std::mem::take(&mut st.lanes);
            for (_, queue) in lanes {
                for waiter in queue {
                    st.abandoned.push(waiter.release);
                }
            }
            st.running.values().copied().collect()
        };
        for pid in pids {
            match kill_process(pid) {
                Ok(()) => debug!("Killed process {}", pid),
                Err(e) => warn!("Failed to kill process {}: {:#}", pid, e),
            }
        }
    }

    /// Entries in `lane` (holder included).
    pub fn queue_len(&self, lane: &str) -> usize {
        lock(&self.state).lanes.get(lane).map_or(0, |q| q.len())
    }

    /// Number of processes currently tracked as running.
    pub fn running_count(&self) -> usize {
        lock(&self.state).running.len()
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.state).shut_down
    }
}
