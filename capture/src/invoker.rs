//! Calling the privileged debug control interface and judging its answer.

use log::info;

use crate::{
    error::{CaptureError, FailureReason, NtStatus, Result},
    request::CaptureRequest,
};

/// Size of the buffer a triage dump is returned in.
///
/// The interface needs more than 132 KiB and caps what it produces well below
/// this, so the result always fits.
pub const TRIAGE_BUFFER_SIZE: usize = 0x10_0000;

/// Raw outcome of one control call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlReturn {
    pub status: NtStatus,
    pub returned_length: u32,
}

/// The privileged capture interface.
///
/// A single blocking call taking an opcode, a control block and an optional
/// output buffer. Live kernel dumps may block for minutes.
pub trait DebugControl {
    fn control(&self, request: &CaptureRequest, output: &mut [u8]) -> ControlReturn;
}

impl<C: DebugControl + ?Sized> DebugControl for &C {
    fn control(&self, request: &CaptureRequest, output: &mut [u8]) -> ControlReturn {
        (**self).control(request, output)
    }
}

/// Outcome of a successful capture call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureResult {
    pub status: NtStatus,
    /// Bytes produced by a triage call; zero for kernel dumps.
    pub returned_length: u32,
}

/// Data of a successful triage capture.
#[derive(Debug)]
pub struct TriageCapture {
    pub result: CaptureResult,
    buffer: Vec<u8>,
}

impl TriageCapture {
    /// The authoritative dump bytes, trimmed to the returned length.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.result.returned_length as usize]
    }
}

/// Performs capture calls through a [`DebugControl`] implementation.
pub struct CaptureInvoker<C> {
    control: C,
}

impl<C: DebugControl> CaptureInvoker<C> {
    pub fn new(control: C) -> Self {
        Self { control }
    }

    /// Ask for a triage dump into a fresh [`TRIAGE_BUFFER_SIZE`] buffer.
    ///
    /// A success status with nothing returned is treated as a failure.
    pub fn invoke_triage(&self, request: &CaptureRequest) -> Result<TriageCapture> {
        let mut buffer = vec![0u8; TRIAGE_BUFFER_SIZE];
        let ret = self.control.control(request, &mut buffer);
        check_status(ret.status)?;

        info!(
            "NtSystemDebugControl succeeded. ReturnLength = {}. (buffer size {TRIAGE_BUFFER_SIZE})",
            ret.returned_length
        );

        if ret.returned_length == 0 {
            return Err(CaptureError::CaptureFailed(FailureReason::EmptyResult));
        }
        if ret.returned_length as usize > buffer.len() {
            return Err(CaptureError::CaptureFailed(FailureReason::Oversized {
                returned: ret.returned_length,
                capacity: buffer.len(),
            }));
        }

        Ok(TriageCapture {
            result: CaptureResult {
                status: ret.status,
                returned_length: ret.returned_length,
            },
            buffer,
        })
    }

    /// Ask the kernel to write a live dump to the handle inside `request`.
    ///
    /// Blocks until the kernel is done, which can take minutes.
    pub fn invoke_kernel(&self, request: &CaptureRequest) -> Result<CaptureResult> {
        let ret = self.control.control(request, &mut []);
        check_status(ret.status)?;
        Ok(CaptureResult {
            status: ret.status,
            returned_length: 0,
        })
    }
}

fn check_status(status: NtStatus) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(CaptureError::CaptureFailed(FailureReason::Status(status)))
    }
}
