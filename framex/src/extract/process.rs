use std::io;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;

/// Bytes of diagnostic output kept per process.
const STDERR_TAIL_BYTES: usize = 4096;

struct Tracked {
    label: &'static str,
    child: Child,
    status: Option<ExitStatus>,
}

/**
    The external processes (and their helper tasks) owned by one extraction.

    `terminate` signals every process that has not been reaped yet; it only
    acts the first time it is called. Dropping the group terminates it too,
    and every child is spawned with `kill_on_drop`, so no path leaves a
    process behind.
*/
pub struct ProcessGroup {
    id: String,
    children: Vec<Tracked>,
    tasks: Vec<JoinHandle<()>>,
    terminated: bool,
}

impl ProcessGroup {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            children: Vec::new(),
            tasks: Vec::new(),
            terminated: false,
        }
    }

    pub fn adopt(&mut self, label: &'static str, child: Child) {
        debug!(
            "[process:{}] tracking {} (pid {:?})",
            self.id,
            label,
            child.id()
        );
        self.children.push(Tracked {
            label,
            child,
            status: None,
        });
    }

    /// Track a helper task that must not outlive the processes.
    pub fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    #[cfg(test)]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Returns true if the process is still running.
    #[cfg(test)]
    pub fn is_alive(&mut self, label: &str) -> bool {
        let Some(tracked) = self.children.iter_mut().find(|t| t.label == label) else {
            return false;
        };
        if tracked.status.is_some() {
            return false;
        }
        match tracked.child.try_wait() {
            Ok(Some(status)) => {
                tracked.status = Some(status);
                false
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }

    /**
        Wait for a process to exit on its own. Returns `None` if no process
        with that label is tracked.
    */
    pub async fn wait(&mut self, label: &str) -> Option<io::Result<ExitStatus>> {
        let tracked = self.children.iter_mut().find(|t| t.label == label)?;
        if let Some(status) = tracked.status {
            return Some(Ok(status));
        }
        let result = tracked.child.wait().await;
        if let Ok(status) = result {
            tracked.status = Some(status);
        }
        Some(result)
    }

    /**
        Send a kill signal to every live process and abort helper tasks.
        Later calls do nothing.
    */
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        for task in &self.tasks {
            task.abort();
        }
        for tracked in &mut self.children {
            if tracked.status.is_some() {
                continue;
            }
            if let Ok(Some(status)) = tracked.child.try_wait() {
                tracked.status = Some(status);
                continue;
            }
            match tracked.child.start_kill() {
                Ok(()) => debug!("[process:{}] killed {}", self.id, tracked.label),
                Err(e) => debug!(
                    "[process:{}] could not kill {}: {}",
                    self.id, tracked.label, e
                ),
            }
        }
    }

    /**
        Terminate, then reap every process, giving each up to `grace`.
    */
    pub async fn shutdown(&mut self, grace: Duration) {
        self.terminate();
        for tracked in &mut self.children {
            if tracked.status.is_some() {
                continue;
            }
            match tokio::time::timeout(grace, tracked.child.wait()).await {
                Ok(Ok(status)) => tracked.status = Some(status),
                Ok(Err(e)) => warn!(
                    "[process:{}] failed to reap {}: {}",
                    self.id, tracked.label, e
                ),
                Err(_) => warn!(
                    "[process:{}] {} did not exit within {:?}",
                    self.id, tracked.label, grace
                ),
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.terminate();
    }
}

/**
    Collects a process's diagnostic output: every line is logged at debug
    level and the last few KiB are kept for error messages.
*/
pub struct StderrTail {
    buffer: Arc<Mutex<String>>,
    task: Option<JoinHandle<()>>,
}

impl StderrTail {
    pub fn spawn<R>(label: &'static str, id: &str, stream: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let buffer = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&buffer);
        let id = id.to_string();

        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("[{}:{}] {}", label, id, line);
                if let Ok(mut tail) = sink.lock() {
                    push_bounded(&mut tail, &line, STDERR_TAIL_BYTES);
                }
            }
        });

        Self {
            buffer,
            task: Some(task),
        }
    }

    pub fn snapshot(&self) -> String {
        self.buffer
            .lock()
            .map(|tail| tail.trim_end().to_string())
            .unwrap_or_default()
    }

    /**
        Wait up to `timeout` for the stream to close, then return the tail.
    */
    pub async fn drain(&mut self, timeout: Duration) -> String {
        if let Some(task) = self.task.take() {
            let _ = tokio::time::timeout(timeout, task).await;
        }
        self.snapshot()
    }
}

fn push_bounded(tail: &mut String, line: &str, limit: usize) {
    tail.push_str(line);
    tail.push('\n');
    if tail.len() > limit {
        let mut cut = tail.len() - limit;
        while !tail.is_char_boundary(cut) {
            cut += 1;
        }
        tail.drain(..cut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::process::Stdio;

    #[test]
    fn test_push_bounded_keeps_tail() {
        let mut tail = String::new();
        push_bounded(&mut tail, "first line", 16);
        push_bounded(&mut tail, "second line", 16);
        assert_eq!(tail.len(), 16);
        assert!(tail.ends_with("second line\n"));
    }

    #[test]
    fn test_push_bounded_respects_char_boundaries() {
        let mut tail = String::new();
        push_bounded(&mut tail, "ééééé", 5);
        assert!(tail.len() <= 5);
        assert!(tail.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_stderr_tail_collects_lines() {
        let input: &'static [u8] = b"one\ntwo\nthree\n";
        let mut tail = StderrTail::spawn("test", "t1", input);
        assert_eq!(tail.drain(Duration::from_secs(1)).await, "one\ntwo\nthree");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_is_idempotent_and_reaps() {
        let child = tokio::process::Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        let mut group = ProcessGroup::new("t2");
        group.adopt("sleep", child);
        assert!(group.is_alive("sleep"));

        group.terminate();
        group.terminate();
        assert!(group.is_terminated());

        group.shutdown(Duration::from_secs(5)).await;
        assert!(!group.is_alive("sleep"));
        let status = group.wait("sleep").await.unwrap().unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_terminate_aborts_tracked_tasks() {
        let mut group = ProcessGroup::new("t3");
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        let handle = task.abort_handle();
        group.track(task);
        group.terminate();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_finished());
    }
}
