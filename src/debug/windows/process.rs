//! Process launch and process-level queries using Windows API.

use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::Foundation::{BOOL, HANDLE, MAX_PATH, TRUE};
use windows::Win32::Storage::FileSystem::{GetFinalPathNameByHandleW, FILE_NAME_NORMALIZED};
use windows::Win32::System::Console::SetConsoleCtrlHandler;
use windows::Win32::System::Diagnostics::Debug::ReadProcessMemory;
use windows::Win32::System::Threading::{
    CreateProcessW, IsWow64Process, DEBUG_ONLY_THIS_PROCESS, PROCESS_INFORMATION, STARTUPINFOW,
};

use super::super::DebugError;
use crate::core::memory::{MemoryError, RemoteMemory};

const PAGE_SIZE: u64 = 0x1000;

/// Set by the console control handler, polled by the event loop
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

unsafe extern "system" fn on_console_ctrl(_ctrl_type: u32) -> BOOL {
    INTERRUPTED.store(true, Ordering::SeqCst);
    TRUE
}

/// Route Ctrl+C / Ctrl+Break into the interrupt flag
pub fn install_interrupt_handler() -> Result<(), DebugError> {
    unsafe {
        SetConsoleCtrlHandler(Some(on_console_ctrl), true).map_err(|e| DebugError::Api {
            call: "SetConsoleCtrlHandler",
            reason: e.to_string(),
        })
    }
}

/// Whether the operator asked to stop
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

fn to_wide(s: &str) -> Vec<u16> {
    std::ffi::OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

/// Build a command line with every element quoted
fn command_line(executable: &str, arguments: &[String]) -> String {
    std::iter::once(executable)
        .chain(arguments.iter().map(String::as_str))
        .map(|part| format!("\"{}\"", part))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Start `executable` as a debuggee of the calling thread
pub fn launch(executable: &str, arguments: &[String]) -> Result<PROCESS_INFORMATION, DebugError> {
    if !Path::new(executable).is_file() {
        return Err(DebugError::LaunchFailed {
            path: executable.to_string(),
            reason: "executable not found".into(),
        });
    }

    let application = to_wide(executable);
    let mut cmdline = to_wide(&command_line(executable, arguments));
    let startup = STARTUPINFOW {
        cb: std::mem::size_of::<STARTUPINFOW>() as u32,
        ..Default::default()
    };
    let mut info = PROCESS_INFORMATION::default();

    unsafe {
        CreateProcessW(
            PCWSTR(application.as_ptr()),
            PWSTR(cmdline.as_mut_ptr()),
            None,
            None,
            false,
            DEBUG_ONLY_THIS_PROCESS,
            None,
            PCWSTR::null(),
            &startup,
            &mut info,
        )
        .map_err(|e| DebugError::LaunchFailed {
            path: executable.to_string(),
            reason: e.to_string(),
        })?;
    }

    log::debug!("Launched PID {} ({})", info.dwProcessId, executable);
    Ok(info)
}

/// Whether `process` is a 32-bit process on a 64-bit system
pub fn is_wow64(process: HANDLE) -> bool {
    let mut wow64 = BOOL(0);
    unsafe { IsWow64Process(process, &mut wow64).is_ok() && wow64.as_bool() }
}

/// Path of the file behind an image handle from a debug event
pub fn image_path(file: HANDLE) -> Option<String> {
    if file.is_invalid() {
        return None;
    }

    let mut buf = vec![0u16; MAX_PATH as usize * 4];
    let len = unsafe { GetFinalPathNameByHandleW(file, &mut buf, FILE_NAME_NORMALIZED) } as usize;
    if len == 0 || len > buf.len() {
        return None;
    }

    let path = String::from_utf16_lossy(&buf[..len]);
    Some(path.strip_prefix("\\\\?\\").unwrap_or(&path).to_string())
}

/// Memory of a debuggee, read through its process handle
pub struct ProcessMemory {
    handle: HANDLE,
}

impl ProcessMemory {
    pub fn new(handle: HANDLE) -> Self {
        Self { handle }
    }
}

impl RemoteMemory for ProcessMemory {
    fn read_into(&self, address: u64, buffer: &mut [u8]) -> Result<usize, MemoryError> {
        // Never cross a page; a partial copy fails the whole call
        let to_page = (PAGE_SIZE - (address % PAGE_SIZE)) as usize;
        let len = buffer.len().min(to_page);
        let mut bytes_read = 0usize;

        unsafe {
            ReadProcessMemory(
                self.handle,
                address as *const std::ffi::c_void,
                buffer.as_mut_ptr() as *mut std::ffi::c_void,
                len,
                Some(&mut bytes_read),
            )
            .map_err(|e| MemoryError::ReadFailed {
                address,
                reason: e.to_string(),
            })?;
        }

        Ok(bytes_read)
    }
}
