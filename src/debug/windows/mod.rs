//! Windows-specific debugger implementation using Win32 Debug API.

mod process;

pub use process::{install_interrupt_handler, ProcessMemory};

use std::collections::HashMap;

use windows::Win32::Foundation::{CloseHandle, HANDLE, NTSTATUS};
use windows::Win32::System::Diagnostics::Debug::{
    ContinueDebugEvent, FlushInstructionCache, GetThreadContext, ReadProcessMemory,
    SetThreadContext, WaitForDebugEvent, Wow64GetThreadContext, Wow64SetThreadContext,
    WriteProcessMemory, CONTEXT, CONTEXT_FULL_AMD64, CREATE_PROCESS_DEBUG_EVENT,
    CREATE_THREAD_DEBUG_EVENT, DEBUG_EVENT, EXCEPTION_DEBUG_EVENT, EXIT_PROCESS_DEBUG_EVENT,
    EXIT_THREAD_DEBUG_EVENT, LOAD_DLL_DEBUG_EVENT, WOW64_CONTEXT, WOW64_CONTEXT_FULL,
};
use windows::Win32::System::Threading::TerminateProcess;

use super::types::{Bitness, Control, Register, RegisterState, SessionEnd};
use super::{read_stack_words, DebugEngine, DebugError, Trap, TrapHandler};
use crate::analysis::loader::ImageInfo;
use crate::core::memory::{MemoryError, RemoteMemory};
use crate::intercept::functions::MonitoredFunction;

const DBG_CONTINUE: NTSTATUS = NTSTATUS(0x00010002i32);
const DBG_EXCEPTION_NOT_HANDLED: NTSTATUS = NTSTATUS(0x80010001u32 as i32);
const EXCEPTION_BREAKPOINT_CODE: u32 = 0x80000003;
const EXCEPTION_SINGLE_STEP_CODE: u32 = 0x80000004;
const STATUS_WX86_BREAKPOINT: u32 = 0x4000001F;
const STATUS_WX86_SINGLE_STEP: u32 = 0x4000001E;
const INT3: u8 = 0xCC;
const TRAP_FLAG: u32 = 0x100;
const POLL_MS: u32 = 100;

/// An armed INT3 on a monitored export
#[derive(Debug, Clone)]
struct Breakpoint {
    original_byte: u8,
    function: &'static MonitoredFunction,
    /// Calling convention of the module the export lives in
    bitness: Bitness,
}

/// Windows debugger implementation
pub struct WindowsDebugger {
    executable: String,
    process: HANDLE,
    main_thread: HANDLE,
    pid: u32,
    wow64: bool,
    threads: HashMap<u32, HANDLE>,
    breakpoints: HashMap<u64, Breakpoint>,
    /// Breakpoints to re-insert after the owning thread single-steps
    pending_rearm: HashMap<u32, u64>,
    /// Stop requested; waiting for the exit event
    stopping: bool,
}

/// Snapshot of a thread stopped on a breakpoint
struct WindowsTrap<'a> {
    bitness: Bitness,
    registers: RegisterState,
    memory: &'a ProcessMemory,
}

impl Trap for WindowsTrap<'_> {
    fn bitness(&self) -> u32 {
        self.bitness.into()
    }

    fn register(&self, register: Register) -> u64 {
        self.registers.get(register)
    }

    fn stack_words(&self, count: usize) -> Result<Vec<u64>, MemoryError> {
        read_stack_words(self.memory, self.registers.rsp, self.bitness, count)
    }

    fn memory(&self) -> &dyn RemoteMemory {
        self.memory
    }
}

impl WindowsDebugger {
    /// Launch `executable` under the debugger
    pub fn spawn(executable: &str, arguments: &[String]) -> Result<Self, DebugError> {
        let info = process::launch(executable, arguments)?;
        let wow64 = process::is_wow64(info.hProcess);
        log::info!(
            "Debugging PID {} ({})",
            info.dwProcessId,
            if wow64 { Bitness::Bit32 } else { Bitness::Bit64 }
        );

        if let Err(e) = install_interrupt_handler() {
            log::warn!("Ctrl+C will not stop the session cleanly: {}", e);
        }

        Ok(Self {
            executable: executable.to_string(),
            process: info.hProcess,
            main_thread: info.hThread,
            pid: info.dwProcessId,
            wow64,
            threads: HashMap::new(),
            breakpoints: HashMap::new(),
            pending_rearm: HashMap::new(),
            stopping: false,
        })
    }

    fn api_error(call: &'static str, e: windows::core::Error) -> DebugError {
        DebugError::Api {
            call,
            reason: e.to_string(),
        }
    }

    fn read_byte(&self, address: u64) -> Result<u8, DebugError> {
        let mut byte = 0u8;
        unsafe {
            ReadProcessMemory(
                self.process,
                address as *const std::ffi::c_void,
                &mut byte as *mut u8 as *mut std::ffi::c_void,
                1,
                None,
            )
            .map_err(|e| Self::api_error("ReadProcessMemory", e))?;
        }
        Ok(byte)
    }

    fn write_byte(&self, address: u64, byte: u8) -> Result<(), DebugError> {
        unsafe {
            WriteProcessMemory(
                self.process,
                address as *const std::ffi::c_void,
                &byte as *const u8 as *const std::ffi::c_void,
                1,
                None,
            )
            .map_err(|e| Self::api_error("WriteProcessMemory", e))?;
            FlushInstructionCache(self.process, Some(address as *const std::ffi::c_void), 1)
                .map_err(|e| Self::api_error("FlushInstructionCache", e))?;
        }
        Ok(())
    }

    /// Place breakpoints on every catalog export of a newly loaded module
    fn arm_module(&mut self, catalog: &'static [MonitoredFunction], path: &str, base: u64) {
        if !catalog.iter().any(|f| f.matches_module(path)) {
            return;
        }

        let image = match ImageInfo::from_file(path) {
            Ok(image) => image,
            Err(e) => {
                log::warn!("Cannot read exports of {}: {}", path, e);
                return;
            }
        };

        for (function, rva) in image.resolve(catalog) {
            let address = base + rva;
            if self.breakpoints.contains_key(&address) {
                continue;
            }
            let armed = self
                .read_byte(address)
                .and_then(|original| self.write_byte(address, INT3).map(|_| original));
            match armed {
                Ok(original_byte) => {
                    log::debug!("Breakpoint on {} at {:#x}", function, address);
                    self.breakpoints.insert(
                        address,
                        Breakpoint {
                            original_byte,
                            function,
                            bitness: image.bitness,
                        },
                    );
                }
                Err(e) => log::warn!("Cannot arm {}: {}", function, e),
            }
        }
    }

    fn thread(&self, tid: u32) -> Option<HANDLE> {
        self.threads.get(&tid).copied()
    }

    /// Registers of `thread`, with the instruction pointer rewound onto `address`
    fn rewind(&self, thread: HANDLE, bitness: Bitness, address: u64) -> Result<RegisterState, DebugError> {
        unsafe {
            match bitness {
                Bitness::Bit32 if self.wow64 => {
                    let mut ctx = WOW64_CONTEXT {
                        ContextFlags: WOW64_CONTEXT_FULL,
                        ..Default::default()
                    };
                    Wow64GetThreadContext(thread, &mut ctx)
                        .map_err(|e| Self::api_error("Wow64GetThreadContext", e))?;
                    ctx.Eip = address as u32;
                    Wow64SetThreadContext(thread, &ctx)
                        .map_err(|e| Self::api_error("Wow64SetThreadContext", e))?;
                    Ok(RegisterState {
                        rcx: ctx.Ecx as u64,
                        rdx: ctx.Edx as u64,
                        r8: 0,
                        r9: 0,
                        rsp: ctx.Esp as u64,
                        rip: address,
                    })
                }
                _ => {
                    let mut ctx = CONTEXT {
                        ContextFlags: CONTEXT_FULL_AMD64,
                        ..Default::default()
                    };
                    GetThreadContext(thread, &mut ctx)
                        .map_err(|e| Self::api_error("GetThreadContext", e))?;
                    ctx.Rip = address;
                    SetThreadContext(thread, &ctx)
                        .map_err(|e| Self::api_error("SetThreadContext", e))?;
                    Ok(RegisterState {
                        rcx: ctx.Rcx,
                        rdx: ctx.Rdx,
                        r8: ctx.R8,
                        r9: ctx.R9,
                        rsp: ctx.Rsp,
                        rip: address,
                    })
                }
            }
        }
    }

    fn set_trap_flag(&self, thread: HANDLE, bitness: Bitness) -> Result<(), DebugError> {
        unsafe {
            match bitness {
                Bitness::Bit32 if self.wow64 => {
                    let mut ctx = WOW64_CONTEXT {
                        ContextFlags: WOW64_CONTEXT_FULL,
                        ..Default::default()
                    };
                    Wow64GetThreadContext(thread, &mut ctx)
                        .map_err(|e| Self::api_error("Wow64GetThreadContext", e))?;
                    ctx.EFlags |= TRAP_FLAG;
                    Wow64SetThreadContext(thread, &ctx)
                        .map_err(|e| Self::api_error("Wow64SetThreadContext", e))?;
                }
                _ => {
                    let mut ctx = CONTEXT {
                        ContextFlags: CONTEXT_FULL_AMD64,
                        ..Default::default()
                    };
                    GetThreadContext(thread, &mut ctx)
                        .map_err(|e| Self::api_error("GetThreadContext", e))?;
                    ctx.EFlags |= TRAP_FLAG;
                    SetThreadContext(thread, &ctx)
                        .map_err(|e| Self::api_error("SetThreadContext", e))?;
                }
            }
        }
        Ok(())
    }

    /// Handle a hit on one of our breakpoints; returns the continue status.
    ///
    /// Only handler failures end the session. Anything else drops this
    /// breakpoint and lets the target run on.
    fn on_breakpoint(
        &mut self,
        tid: u32,
        address: u64,
        handler: &mut dyn TrapHandler,
    ) -> Result<NTSTATUS, DebugError> {
        let Some(bp) = self.breakpoints.get(&address).cloned() else {
            // Loader breakpoint or one planted by the target itself
            return Ok(DBG_CONTINUE);
        };

        match self.service_breakpoint(tid, address, &bp, handler) {
            Ok(()) => Ok(DBG_CONTINUE),
            Err(e) if e.is_event_local() => {
                log::warn!("Dropping breakpoint on {} at {:#x}: {}", bp.function, address, e);
                self.disarm(address, bp.original_byte);
                Ok(DBG_CONTINUE)
            }
            Err(e) => Err(e),
        }
    }

    fn service_breakpoint(
        &mut self,
        tid: u32,
        address: u64,
        bp: &Breakpoint,
        handler: &mut dyn TrapHandler,
    ) -> Result<(), DebugError> {
        let thread = self.thread(tid).ok_or_else(|| DebugError::Api {
            call: "thread lookup",
            reason: format!("unknown thread {}", tid),
        })?;

        let registers = self.rewind(thread, bp.bitness, address)?;
        self.write_byte(address, bp.original_byte)?;

        let memory = ProcessMemory::new(self.process);
        let trap = WindowsTrap {
            bitness: bp.bitness,
            registers,
            memory: &memory,
        };

        let control = match handler.on_hit(bp.function, &trap) {
            Ok(control) => control,
            Err(e) => {
                self.kill();
                return Err(e.into());
            }
        };

        match control {
            Control::Continue => {
                self.set_trap_flag(thread, bp.bitness)?;
                self.pending_rearm.insert(tid, address);
            }
            Control::Stop => self.kill(),
        }
        Ok(())
    }

    /// Forget the breakpoint at `address`, restoring its byte when still possible
    fn disarm(&mut self, address: u64, original_byte: u8) {
        self.breakpoints.remove(&address);
        self.pending_rearm.retain(|_, pending| *pending != address);
        if let Err(e) = self.write_byte(address, original_byte) {
            log::debug!("Original byte at {:#x} not restored: {}", address, e);
        }
    }

    fn on_single_step(&mut self, tid: u32) -> NTSTATUS {
        let Some(address) = self.pending_rearm.remove(&tid) else {
            return DBG_EXCEPTION_NOT_HANDLED;
        };
        if !self.stopping {
            if let Err(e) = self.write_byte(address, INT3) {
                log::warn!("Cannot re-arm breakpoint at {:#x}: {}", address, e);
                self.breakpoints.remove(&address);
            }
        }
        DBG_CONTINUE
    }

    fn kill(&mut self) {
        if self.stopping {
            return;
        }
        self.stopping = true;
        log::debug!("Terminating PID {}", self.pid);
        if let Err(e) = unsafe { TerminateProcess(self.process, 0) } {
            log::warn!("TerminateProcess failed: {}", e);
        }
    }
}

impl DebugEngine for WindowsDebugger {
    fn run(
        &mut self,
        catalog: &'static [MonitoredFunction],
        handler: &mut dyn TrapHandler,
    ) -> Result<SessionEnd, DebugError> {
        let mut event = DEBUG_EVENT::default();

        loop {
            if process::interrupted() && !self.stopping {
                self.kill();
                return Ok(SessionEnd::Interrupted);
            }

            if unsafe { WaitForDebugEvent(&mut event, POLL_MS) }.is_err() {
                continue;
            }

            let tid = event.dwThreadId;
            let mut status = DBG_CONTINUE;
            let mut end = None;

            match event.dwDebugEventCode {
                CREATE_PROCESS_DEBUG_EVENT => {
                    let info = unsafe { event.u.CreateProcessInfo };
                    self.threads.insert(tid, info.hThread);
                    if !info.hFile.is_invalid() {
                        unsafe {
                            let _ = CloseHandle(info.hFile);
                        }
                    }
                }
                CREATE_THREAD_DEBUG_EVENT => {
                    let info = unsafe { event.u.CreateThread };
                    self.threads.insert(tid, info.hThread);
                }
                EXIT_THREAD_DEBUG_EVENT => {
                    self.threads.remove(&tid);
                    self.pending_rearm.remove(&tid);
                }
                LOAD_DLL_DEBUG_EVENT => {
                    let info = unsafe { event.u.LoadDll };
                    if let Some(path) = process::image_path(info.hFile) {
                        log::trace!("Loaded {} at {:?}", path, info.lpBaseOfDll);
                        self.arm_module(catalog, &path, info.lpBaseOfDll as u64);
                    }
                    if !info.hFile.is_invalid() {
                        unsafe {
                            let _ = CloseHandle(info.hFile);
                        }
                    }
                }
                EXCEPTION_DEBUG_EVENT => {
                    let info = unsafe { event.u.Exception };
                    let record = info.ExceptionRecord;
                    let address = record.ExceptionAddress as u64;
                    status = match record.ExceptionCode.0 as u32 {
                        EXCEPTION_BREAKPOINT_CODE | STATUS_WX86_BREAKPOINT => {
                            if self.stopping {
                                DBG_CONTINUE
                            } else {
                                self.on_breakpoint(tid, address, handler)?
                            }
                        }
                        EXCEPTION_SINGLE_STEP_CODE | STATUS_WX86_SINGLE_STEP => {
                            self.on_single_step(tid)
                        }
                        _ => DBG_EXCEPTION_NOT_HANDLED,
                    };
                }
                EXIT_PROCESS_DEBUG_EVENT => {
                    let exit_code = unsafe { event.u.ExitProcess.dwExitCode };
                    end = Some(if self.stopping {
                        SessionEnd::Stopped
                    } else {
                        SessionEnd::Exited { exit_code }
                    });
                }
                _ => {}
            }

            unsafe {
                let _ = ContinueDebugEvent(event.dwProcessId, tid, status);
            }

            if let Some(end) = end {
                log::debug!("{} finished: {:?}", self.executable, end);
                return Ok(end);
            }
        }
    }
}

impl Drop for WindowsDebugger {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.main_thread);
            let _ = CloseHandle(self.process);
        }
    }
}
