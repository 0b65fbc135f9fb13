//! Sequencing of a full capture run.
//!
//! ```text
//! Start -> PrivilegeAcquired -> FileOpened -> triage | kernel -> PrivilegeReleased
//!   triage: TargetSelected -> RequestBuilt -> Invoked -> Written -> Done
//!   kernel: RequestBuilt -> Invoked -> Done
//! ```
//!
//! Any failure jumps straight to `PrivilegeReleased`, which always releases the
//! privilege (even if it was never acquired) and then removes the dump file
//! unless the run succeeded.

use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::{
    error::Result,
    invoker::{CaptureInvoker, DebugControl},
    options::{CaptureMode, CaptureOptions, KernelOptions, TriageOptions},
    privilege::PrivilegeManager,
    request::{self, CaptureRequest},
    selector::{TargetSelector, ThreadSource},
    writer::{DumpFile, DumpStorage, DumpWriter},
};

/// Stages of a run, logged as they are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    PrivilegeAcquired,
    FileOpened,
    TargetSelected,
    RequestBuilt,
    Invoked,
    Written,
    Done,
    PrivilegeReleased,
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReport {
    pub path: PathBuf,
    pub mode: CaptureMode,
    /// Bytes written by this process; `None` when the kernel wrote the file.
    pub bytes_written: Option<usize>,
    /// Threads included in a triage dump.
    pub threads: usize,
}

/// Composes privilege handling, thread selection, the capture call and the
/// dump file into one run.
pub struct CaptureOrchestrator<P, T, C, S> {
    privileges: P,
    selector: TargetSelector<T>,
    invoker: CaptureInvoker<C>,
    writer: DumpWriter<S>,
}

impl<P, T, C, S> CaptureOrchestrator<P, T, C, S>
where
    P: PrivilegeManager,
    T: ThreadSource,
    C: DebugControl,
    S: DumpStorage,
{
    pub fn new(privileges: P, threads: T, control: C, storage: S) -> Self {
        Self {
            privileges,
            selector: TargetSelector::new(threads),
            invoker: CaptureInvoker::new(control),
            writer: DumpWriter::new(storage),
        }
    }

    /// Validate `options` and capture a dump to `path`.
    ///
    /// Nothing is touched when validation fails. Otherwise the privilege is
    /// released exactly once and, on failure, no file is left at `path`.
    pub fn run(&mut self, path: &Path, options: &CaptureOptions) -> Result<CaptureReport> {
        options.validate()?;
        stage(Stage::Start);

        let mut dump = None;
        let outcome = self.capture(path, options, &mut dump);

        if let Err(e) = self.privileges.release() {
            warn!("{e}");
        }
        stage(Stage::PrivilegeReleased);

        let outcome = match dump {
            Some(file) => {
                let finalized = self.writer.finalize(file, outcome.is_ok());
                outcome.and_then(|report| finalized.map(|()| report))
            }
            None => outcome,
        };

        match &outcome {
            Ok(report) => info!("Dump file '{}' written successfully!", report.path.display()),
            Err(_) => error!("Failed to create dump file."),
        }
        outcome
    }

    fn capture(
        &mut self,
        path: &Path,
        options: &CaptureOptions,
        dump: &mut Option<DumpFile<S::Sink>>,
    ) -> Result<CaptureReport> {
        self.privileges.acquire()?;
        stage(Stage::PrivilegeAcquired);

        let file = dump.insert(self.writer.open(path, options.mode())?);
        stage(Stage::FileOpened);

        let report = match options {
            CaptureOptions::Triage(triage) => self.triage(file, triage)?,
            CaptureOptions::Kernel(kernel) => self.kernel(file, kernel)?,
        };
        stage(Stage::Done);
        Ok(report)
    }

    fn triage(
        &self,
        file: &mut DumpFile<S::Sink>,
        options: &TriageOptions,
    ) -> Result<CaptureReport> {
        info!("Attempting to create a triage dump...");

        let selection = self.selector.select(options.pid, options.thread_limit)?;
        stage(Stage::TargetSelected);

        let request = request::build_triage(&selection);
        stage(Stage::RequestBuilt);

        let capture = self.invoker.invoke_triage(&request)?;
        stage(Stage::Invoked);
        // thread handles must outlive the call that referenced them
        let threads = selection.len();
        drop(selection);

        self.writer.write_triage(file, capture.data())?;
        stage(Stage::Written);

        Ok(CaptureReport {
            path: file.path().to_path_buf(),
            mode: CaptureMode::Triage,
            bytes_written: Some(capture.data().len()),
            threads,
        })
    }

    fn kernel(&self, file: &DumpFile<S::Sink>, options: &KernelOptions) -> Result<CaptureReport> {
        let request = request::build_kernel(options, self.writer.raw_handle(file));
        stage(Stage::RequestBuilt);

        if let CaptureRequest::Kernel(kernel) = &request {
            info!(
                "Attempting to create a kernel dump with flags {:08x} and pages {:08x}...",
                kernel.flags.bits(),
                kernel.pages.bits()
            );
        }
        info!("Please be patient, this could take a minute or two...");

        self.invoker.invoke_kernel(&request)?;
        stage(Stage::Invoked);

        Ok(CaptureReport {
            path: file.path().to_path_buf(),
            mode: CaptureMode::Kernel,
            bytes_written: None,
            threads: 0,
        })
    }
}

fn stage(stage: Stage) {
    debug!("stage: {stage:?}");
}
