//! Host side of the engine's imports.
//!
//! `SystemInterface` answers calls into the system-interface namespace using
//! its real calling convention: pointers are offsets into linear memory,
//! results are written back through out-pointers, and the return value is an
//! errno. Runtime and native-shim calls are answered here too; they carry no
//! state beyond a status code.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{error, info, trace, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::imports::HostFunction;
use crate::memory::LinearMemory;

/// Errno values returned to the engine.
pub mod errno {
    pub const SUCCESS: u64 = 0;
    pub const BADF: u64 = 8;
    pub const INVAL: u64 = 28;
    pub const NOTCAPABLE: u64 = 76;
}

const STDOUT: u64 = 1;
const STDERR: u64 = 2;

/// Clock ids accepted by `clock_time_get`.
const REALTIME: u64 = 0;
const MONOTONIC: u64 = 1;

/// Longest message read from a native-shim error call.
const MAX_MESSAGE: usize = 1024;

/// Sink for one output stream.
pub type Printer = Box<dyn Fn(&str) + Send + Sync>;

/// No exit code recorded yet.
const RUNNING: u64 = u64::MAX;

pub struct SystemInterface {
    print: Printer,
    print_err: Printer,
    exit_code: AtomicU64,
    started: Instant,
}

impl fmt::Debug for SystemInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemInterface")
            .field("exit_code", &self.exit_code())
            .finish_non_exhaustive()
    }
}

impl Default for SystemInterface {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemInterface {
    /// Route standard output to `info!` and standard error to `error!`.
    pub fn new() -> Self {
        Self {
            print: Box::new(|line| info!(target: "pngpress::wasi", "{}", line)),
            print_err: Box::new(|line| error!(target: "pngpress::wasi", "{}", line)),
            exit_code: AtomicU64::new(RUNNING),
            started: Instant::now(),
        }
    }

    pub fn with_print(mut self, print: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.print = Box::new(print);
        self
    }

    pub fn with_print_err(mut self, print_err: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.print_err = Box::new(print_err);
        self
    }

    /// The code passed to `proc_exit`, once the engine has exited.
    pub fn exit_code(&self) -> Option<u32> {
        match self.exit_code.load(Ordering::Acquire) {
            RUNNING => None,
            code => Some(code as u32),
        }
    }

    /// Answer one import call.
    ///
    /// # Errors
    ///
    /// `Trap` for `abort` and for missing arguments, `Exited` for
    /// `proc_exit`, and `Memory` when a pointer argument falls outside
    /// linear memory.
    pub fn call(&self, function: HostFunction, args: &[u64], memory: &mut LinearMemory) -> BridgeResult<u64> {
        let arg = |i: usize| {
            args.get(i)
                .copied()
                .ok_or_else(|| BridgeError::Trap(format!("{function:?} expects argument {i}")))
        };
        let ptr = |i: usize| arg(i).map(|v| v as usize);
        trace!("host call {:?}{:?}", function, args);

        match function {
            HostFunction::Abort => Err(BridgeError::Trap("abort".to_string())),
            HostFunction::NotifyMemoryGrowth => Ok(errno::SUCCESS),

            HostFunction::ModuleRegister | HostFunction::SetInstanceData => Ok(errno::SUCCESS),
            HostFunction::GetInstanceData => {
                memory.write_u32(ptr(1)?, 0)?;
                Ok(errno::SUCCESS)
            }
            HostFunction::ThrowError => {
                let message = read_cstr(memory, ptr(2)?)?;
                (self.print_err)(&message);
                Ok(errno::SUCCESS)
            }

            HostFunction::FdWrite => self.fd_write(arg(0)?, ptr(1)?, ptr(2)?, ptr(3)?, memory),
            HostFunction::FdClose => Ok(if arg(0)? <= STDERR { errno::SUCCESS } else { errno::BADF }),
            HostFunction::ProcExit => {
                let code = arg(0)? as u32;
                self.exit_code.store(u64::from(code), Ordering::Release);
                warn!("engine called proc_exit({})", code);
                Err(BridgeError::Exited(code))
            }
            HostFunction::ClockTimeGet => {
                let nanos = match arg(0)? {
                    REALTIME => SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map_or(0, |d| d.as_nanos() as u64),
                    MONOTONIC => self.started.elapsed().as_nanos() as u64,
                    _ => return Ok(errno::INVAL),
                };
                memory.write_u64(ptr(2)?, nanos)?;
                Ok(errno::SUCCESS)
            }
            HostFunction::EnvironSizesGet => {
                memory.write_u32(ptr(0)?, 0)?;
                memory.write_u32(ptr(1)?, 0)?;
                Ok(errno::SUCCESS)
            }
            HostFunction::EnvironGet => Ok(errno::SUCCESS),
            HostFunction::PathOpen => Ok(errno::NOTCAPABLE),
        }
    }

    /// Gather an iovec array and hand it to the matching printer.
    fn fd_write(
        &self,
        fd: u64,
        iovs: usize,
        iovs_len: usize,
        nwritten: usize,
        memory: &mut LinearMemory,
    ) -> BridgeResult<u64> {
        let printer = match fd {
            STDOUT => &self.print,
            STDERR => &self.print_err,
            _ => return Ok(errno::BADF),
        };

        let mut text = Vec::new();
        for i in 0..iovs_len {
            let entry = iovs + i * 8;
            let buf = memory.read_u32(entry)? as usize;
            let len = memory.read_u32(entry + 4)? as usize;
            text.extend_from_slice(memory.read(buf, len)?);
        }

        let written = text.len() as u32;
        let text = String::from_utf8_lossy(&text);
        for line in text.lines() {
            printer(line);
        }
        memory.write_u32(nwritten, written)?;
        Ok(errno::SUCCESS)
    }
}

/// Read a nul-terminated string, stopping at `MAX_MESSAGE` bytes or the end
/// of memory.
fn read_cstr(memory: &LinearMemory, ptr: usize) -> BridgeResult<String> {
    let len = MAX_MESSAGE.min(memory.len().saturating_sub(ptr));
    let bytes = memory.read(ptr, len)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}
