//! Choosing which threads of the target process go into a triage dump.

use std::io;

use log::{info, warn};

use crate::{
    HandleValue,
    error::{CaptureError, Result},
};

/// One entry of the system-wide thread snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadEntry {
    pub thread_id: u32,
    pub owner_pid: u32,
}

/// An open thread handle. Dropping it closes the handle.
pub trait ThreadHandle {
    /// Raw handle value as passed to the privileged interface.
    fn raw(&self) -> HandleValue;

    /// Id of the thread the handle refers to, as reported by the handle.
    fn thread_id(&self) -> u32;
}

/// Access to processes and threads of the running system.
pub trait ThreadSource {
    /// Open process handle, closed on drop.
    type Process;
    type Thread: ThreadHandle;

    /// Open `pid` with full access.
    fn open_process(&self, pid: u32) -> io::Result<Self::Process>;

    /// Snapshot every thread of the system, in the order the OS reports them.
    fn thread_entries(&self) -> io::Result<Vec<ThreadEntry>>;

    /// Open `thread_id` with full access.
    fn open_thread(&self, thread_id: u32) -> io::Result<Self::Thread>;

    /// Human-readable description of the thread. Unnamed threads report an
    /// empty string.
    fn thread_name(&self, thread: &Self::Thread) -> io::Result<String>;
}

/// A thread accepted into the selection.
#[derive(Debug)]
pub struct SelectedThread<T> {
    pub thread_id: u32,
    pub name: String,
    pub handle: T,
}

/// Threads picked for a triage dump together with the open target process.
///
/// All handles stay open until the selection is dropped, which must happen
/// after the privileged call that references them has returned.
#[derive(Debug)]
pub struct ThreadSelection<P, T> {
    pid: u32,
    threads: Vec<SelectedThread<T>>,
    total: usize,
    _process: P,
}

impl<P, T: ThreadHandle> ThreadSelection<P, T> {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn threads(&self) -> &[SelectedThread<T>] {
        &self.threads
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Number of nameable threads seen in the target, selected or not.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Raw values of the selected thread handles, in selection order.
    pub fn raw_handles(&self) -> Vec<HandleValue> {
        self.threads.iter().map(|t| t.handle.raw()).collect()
    }
}

/// Picks the first `limit` openable, named threads of a process.
pub struct TargetSelector<S> {
    source: S,
}

impl<S: ThreadSource> TargetSelector<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Open `pid` and select at most `limit` of its threads.
    ///
    /// Threads that cannot be opened or whose description is unavailable or
    /// empty are skipped and their handles closed. Enumeration continues past `limit` so every
    /// thread of the target is reported.
    pub fn select(&self, pid: u32, limit: u32) -> Result<ThreadSelection<S::Process, S::Thread>> {
        let process = self
            .source
            .open_process(pid)
            .map_err(|source| CaptureError::TargetUnavailable { pid, source })?;

        let entries = self
            .source
            .thread_entries()
            .map_err(CaptureError::ThreadEnumeration)?;

        let limit = limit as usize;
        let mut threads: Vec<SelectedThread<S::Thread>> = Vec::with_capacity(limit);
        let mut total = 0;

        for entry in entries.iter().filter(|e| e.owner_pid == pid) {
            let thread_id = entry.thread_id;
            if threads.iter().any(|t| t.thread_id == thread_id) {
                continue;
            }

            let handle = match self.source.open_thread(thread_id) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("Failed to open thread {thread_id}, skipping: {e}");
                    continue;
                }
            };

            let name = match self.source.thread_name(&handle) {
                Ok(name) if name.is_empty() => {
                    warn!("Thread {thread_id} has no name, skipping");
                    continue;
                }
                Ok(name) => name,
                Err(e) => {
                    warn!("Failed to get name of thread {thread_id}, skipping: {e}");
                    continue;
                }
            };

            total += 1;
            let handle_id = handle.thread_id();

            if threads.len() < limit {
                info!("Dumping thread {thread_id:>6} ({handle_id:>6}), name \"{name}\".");
                threads.push(SelectedThread {
                    thread_id,
                    name,
                    handle,
                });
            } else {
                info!(
                    "Not using thread {thread_id:>6} ({handle_id:>6}), name \"{name}\", thread limit {limit} exceeded."
                );
            }
        }

        if threads.is_empty() {
            return Err(CaptureError::NoSuitableThreads { pid });
        }

        info!(
            "Triage dump is for PID {pid} with {} threads (out of {total} threads).",
            threads.len()
        );

        Ok(ThreadSelection {
            pid,
            threads,
            total,
            _process: process,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::Cell,
        collections::{HashMap, HashSet},
        rc::Rc,
    };

    use super::*;

    #[derive(Debug, Default)]
    struct Counters {
        opened: Cell<usize>,
        closed: Cell<usize>,
    }

    #[derive(Debug)]
    struct FakeThread {
        id: u32,
        counters: Rc<Counters>,
    }

    impl ThreadHandle for FakeThread {
        fn raw(&self) -> HandleValue {
            HandleValue(0x1000 + self.id as usize)
        }

        fn thread_id(&self) -> u32 {
            self.id
        }
    }

    impl Drop for FakeThread {
        fn drop(&mut self) {
            self.counters.closed.set(self.counters.closed.get() + 1);
        }
    }

    #[derive(Default)]
    struct FakeSystem {
        entries: Vec<ThreadEntry>,
        names: HashMap<u32, String>,
        unopenable: HashSet<u32>,
        missing_process: bool,
        counters: Rc<Counters>,
    }

    impl FakeSystem {
        fn thread(mut self, owner_pid: u32, thread_id: u32, name: Option<&str>) -> Self {
            self.entries.push(ThreadEntry {
                thread_id,
                owner_pid,
            });
            if let Some(name) = name {
                self.names.insert(thread_id, name.to_string());
            }
            self
        }
    }

    impl ThreadSource for &FakeSystem {
        type Process = ();
        type Thread = FakeThread;

        fn open_process(&self, _pid: u32) -> io::Result<()> {
            if self.missing_process {
                Err(io::Error::from(io::ErrorKind::NotFound))
            } else {
                Ok(())
            }
        }

        fn thread_entries(&self) -> io::Result<Vec<ThreadEntry>> {
            Ok(self.entries.clone())
        }

        fn open_thread(&self, thread_id: u32) -> io::Result<FakeThread> {
            if self.unopenable.contains(&thread_id) {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            self.counters.opened.set(self.counters.opened.get() + 1);
            Ok(FakeThread {
                id: thread_id,
                counters: self.counters.clone(),
            })
        }

        fn thread_name(&self, thread: &FakeThread) -> io::Result<String> {
            self.names
                .get(&thread.id)
                .cloned()
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))
        }
    }

    fn busy_process(pid: u32, count: u32) -> FakeSystem {
        (0..count).fold(FakeSystem::default(), |system, i| {
            system.thread(pid, 100 + i, Some(&format!("worker-{i}")))
        })
    }

    #[test]
    fn selects_exactly_limit_threads() {
        for limit in 1..=16 {
            let system = busy_process(42, 20);
            let selection = TargetSelector::new(&system).select(42, limit).unwrap();
            assert_eq!(selection.len(), limit as usize);
            assert_eq!(selection.total(), 20);
            assert!(selection.threads().iter().all(|t| t.name.starts_with("worker-")));
        }
    }

    #[test]
    fn keeps_snapshot_order_and_ignores_other_processes() {
        let system = FakeSystem::default()
            .thread(7, 900, Some("other"))
            .thread(42, 30, Some("c"))
            .thread(42, 10, Some("a"))
            .thread(7, 901, Some("other"))
            .thread(42, 20, Some("b"));
        let selection = TargetSelector::new(&system).select(42, 2).unwrap();
        let ids: Vec<u32> = selection.threads().iter().map(|t| t.thread_id).collect();
        assert_eq!(ids, [30, 10]);
        assert_eq!(selection.raw_handles(), [HandleValue(0x1000 + 30), HandleValue(0x1000 + 10)]);
    }

    #[test]
    fn skips_unopenable_and_unnamed_threads() {
        let mut system = FakeSystem::default()
            .thread(42, 1, Some("locked"))
            .thread(42, 2, None)
            .thread(42, 3, Some("render"));
        system.unopenable.insert(1);
        let selection = TargetSelector::new(&system).select(42, 4).unwrap();
        assert_eq!(selection.len(), 1);
        assert_eq!(selection.threads()[0].name, "render");
        // the unnamed thread was opened and closed again
        assert_eq!(system.counters.opened.get(), 2);
        assert_eq!(system.counters.closed.get(), 1);
    }

    #[test]
    fn threads_with_empty_names_are_not_selected() {
        let system = FakeSystem::default()
            .thread(42, 1, Some(""))
            .thread(42, 2, Some(""));
        let err = TargetSelector::new(&system).select(42, 4).unwrap_err();
        assert!(matches!(err, CaptureError::NoSuitableThreads { pid: 42 }));
        assert_eq!(system.counters.opened.get(), 2);
        assert_eq!(system.counters.closed.get(), 2);
    }

    #[test]
    fn empty_names_do_not_count_towards_total() {
        let system = FakeSystem::default()
            .thread(42, 1, Some(""))
            .thread(42, 2, Some("io"))
            .thread(42, 3, Some(""));
        let selection = TargetSelector::new(&system).select(42, 4).unwrap();
        assert_eq!(selection.len(), 1);
        assert_eq!(selection.total(), 1);
        assert_eq!(selection.threads()[0].name, "io");
    }

    #[test]
    fn duplicate_thread_ids_are_selected_once() {
        let system = FakeSystem::default()
            .thread(42, 5, Some("main"))
            .thread(42, 5, Some("main"));
        let selection = TargetSelector::new(&system).select(42, 4).unwrap();
        assert_eq!(selection.len(), 1);
    }

    #[test]
    fn no_nameable_threads_fails_without_leaking() {
        let system = FakeSystem::default()
            .thread(42, 1, None)
            .thread(42, 2, None)
            .thread(42, 3, None);
        let err = TargetSelector::new(&system).select(42, 4).unwrap_err();
        assert!(matches!(err, CaptureError::NoSuitableThreads { pid: 42 }));
        assert_eq!(system.counters.opened.get(), 3);
        assert_eq!(system.counters.closed.get(), 3);
    }

    #[test]
    fn surplus_threads_are_closed_and_selected_ones_held() {
        let system = busy_process(42, 6);
        let selection = TargetSelector::new(&system).select(42, 4).unwrap();
        assert_eq!(system.counters.opened.get(), 6);
        assert_eq!(system.counters.closed.get(), 2);
        drop(selection);
        assert_eq!(system.counters.closed.get(), 6);
    }

    #[test]
    fn missing_process_is_unavailable() {
        let system = FakeSystem {
            missing_process: true,
            ..Default::default()
        };
        let err = TargetSelector::new(&system).select(42, 4).unwrap_err();
        assert!(matches!(err, CaptureError::TargetUnavailable { pid: 42, .. }));
        assert_eq!(system.counters.opened.get(), 0);
    }
}
