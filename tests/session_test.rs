//! Integration Tests for the interception session
//!
//! Drives `Session` through a scripted engine that replays traps against an
//! in-memory image of the target, the way the Windows engine would.

use loffice::app::monitor;
use loffice::core::memory::{MemoryError, MemoryImage, RemoteMemory};
use loffice::debug::types::{Bitness, Control, Register, RegisterState, SessionEnd};
use loffice::debug::{read_stack_words, DebugEngine, DebugError, Trap, TrapHandler};
use loffice::intercept::functions::{lookup, FunctionId, MonitoredFunction};
use loffice::intercept::{ExitMode, ExitReason, InterceptError, Phase, Session};

/// A trap with a fixed register file and stack
struct ScriptedTrap {
    bits: u32,
    registers: RegisterState,
    memory: MemoryImage,
}

impl Trap for ScriptedTrap {
    fn bitness(&self) -> u32 {
        self.bits
    }

    fn register(&self, register: Register) -> u64 {
        self.registers.get(register)
    }

    fn stack_words(&self, count: usize) -> Result<Vec<u64>, MemoryError> {
        let bitness = Bitness::try_from(self.bits).map_err(|bits| MemoryError::ReadFailed {
            address: self.registers.rsp,
            reason: format!("no {}-bit stack", bits),
        })?;
        read_stack_words(&self.memory, self.registers.rsp, bitness, count)
    }

    fn memory(&self) -> &dyn RemoteMemory {
        &self.memory
    }
}

/// Replays traps in order; ends like a real target would
struct ScriptedEngine {
    traps: Vec<(FunctionId, ScriptedTrap)>,
    interrupt_after: Option<usize>,
    delivered: usize,
}

impl ScriptedEngine {
    fn new(traps: Vec<(FunctionId, ScriptedTrap)>) -> Self {
        Self {
            traps,
            interrupt_after: None,
            delivered: 0,
        }
    }
}

impl DebugEngine for ScriptedEngine {
    fn run(
        &mut self,
        _catalog: &'static [MonitoredFunction],
        handler: &mut dyn TrapHandler,
    ) -> Result<SessionEnd, DebugError> {
        for (id, trap) in &self.traps {
            if self.interrupt_after == Some(self.delivered) {
                return Ok(SessionEnd::Interrupted);
            }
            self.delivered += 1;
            if handler.on_hit(lookup(*id), trap)? == Control::Stop {
                return Ok(SessionEnd::Stopped);
            }
        }
        Ok(SessionEnd::Exited { exit_code: 0 })
    }
}

const STACK: u64 = 0x0010_0000;
const STR_A: u64 = 0x0020_0000;
const STR_B: u64 = 0x0021_0000;

fn stack_bytes(bitness: Bitness, words: &[u64]) -> Vec<u8> {
    words
        .iter()
        .flat_map(|w| match bitness {
            Bitness::Bit32 => (*w as u32).to_le_bytes().to_vec(),
            Bitness::Bit64 => w.to_le_bytes().to_vec(),
        })
        .collect()
}

/// `InternetCrackUrlW(url)` on a 64-bit target
fn url64(url: &str) -> (FunctionId, ScriptedTrap) {
    let mut memory = MemoryImage::new();
    memory.map_wide(STR_A, url);
    let registers = RegisterState {
        rcx: STR_A,
        rsp: STACK,
        ..Default::default()
    };
    (FunctionId::CrackUrl, ScriptedTrap { bits: 64, registers, memory })
}

/// `InternetCrackUrlW(url)` on a 32-bit target
fn url32(url: &str) -> (FunctionId, ScriptedTrap) {
    let mut memory = MemoryImage::new();
    memory.map_wide(STR_A, url);
    memory.map(STACK, stack_bytes(Bitness::Bit32, &[0x7700_0000, STR_A]));
    let registers = RegisterState {
        rsp: STACK,
        ..Default::default()
    };
    (FunctionId::CrackUrl, ScriptedTrap { bits: 32, registers, memory })
}

/// `CreateProcessInternalW(0, app, cmd, 0, 0, 0, flags, ...)` on a 64-bit target
fn process64(app: &str, flags: u64) -> (FunctionId, ScriptedTrap) {
    let mut memory = MemoryImage::new();
    memory.map_wide(STR_A, app);
    memory.map_wide(STR_B, &format!("\"{}\"", app));
    memory.map(STACK, stack_bytes(Bitness::Bit64, &[0x7FF0_0000_0000, 0, 0, 0, 0, 0, 0, flags]));
    let registers = RegisterState {
        rcx: 0,
        rdx: STR_A,
        r8: STR_B,
        r9: 0,
        rsp: STACK,
        rip: 0,
    };
    (FunctionId::CreateProcess, ScriptedTrap { bits: 64, registers, memory })
}

/// `CreateProcessInternalW(0, app, cmd, 0, 0, 0, flags, ...)` on a 32-bit target
fn process32(app: &str, flags: u32) -> (FunctionId, ScriptedTrap) {
    let mut memory = MemoryImage::new();
    memory.map_wide(STR_A, app);
    memory.map_wide(STR_B, app);
    memory.map(
        STACK,
        stack_bytes(Bitness::Bit32, &[0x7700_0000, 0, STR_A, STR_B, 0, 0, 0, flags as u64]),
    );
    let registers = RegisterState {
        rsp: STACK,
        ..Default::default()
    };
    (FunctionId::CreateProcess, ScriptedTrap { bits: 32, registers, memory })
}

/// Like [`process32`], but the stack straddles a page end
fn process32_split(app: &str, flags: u32) -> (FunctionId, ScriptedTrap) {
    const PAGE_END: u64 = STACK + 0x1000;
    let mut memory = MemoryImage::new();
    memory.map_wide(STR_A, app);
    memory.map_wide(STR_B, app);
    let bytes = stack_bytes(Bitness::Bit32, &[0x7700_0000, 0, STR_A, STR_B, 0, 0, 0, flags as u64]);
    memory.map(PAGE_END - 16, bytes[..16].to_vec());
    memory.map(PAGE_END, bytes[16..].to_vec());
    let registers = RegisterState {
        rsp: PAGE_END - 16,
        ..Default::default()
    };
    (FunctionId::CreateProcess, ScriptedTrap { bits: 32, registers, memory })
}

/// `CreateFileW(name, access, ...)` on a 32-bit target
fn create_file32(name: &str, access: u32) -> (FunctionId, ScriptedTrap) {
    let mut memory = MemoryImage::new();
    memory.map_wide(STR_A, name);
    memory.map(STACK, stack_bytes(Bitness::Bit32, &[0x7700_0000, STR_A, access as u64]));
    let registers = RegisterState {
        rsp: STACK,
        ..Default::default()
    };
    (FunctionId::CreateFile, ScriptedTrap { bits: 32, registers, memory })
}

#[test]
fn test_helper_process_then_url_64() {
    let mut engine = ScriptedEngine::new(vec![
        process64("C:\\Windows\\splwow64.exe", 0x4),
        url64("http://example.test/a"),
        url64("http://example.test/never"),
    ]);
    let mut session = Session::new(ExitMode::FirstUrl, false);

    let (outcome, failure) = monitor(&mut engine, &mut session);

    assert!(failure.is_none());
    assert_eq!(outcome.reason, ExitReason::UrlFound);
    assert_eq!(outcome.end, SessionEnd::Stopped);
    assert!(outcome.detail.contains("http://example.test/a"));
    assert_eq!(engine.delivered, 2);
    assert_eq!(session.state().urls(), ["http://example.test/a".to_string()]);
    assert_eq!(session.state().stats().processes, 1);
    assert_eq!(session.phase(), Phase::Stopped);
    assert!(session.state().is_consistent());
}

#[test]
fn test_first_process_32() {
    let mut engine = ScriptedEngine::new(vec![process32("cmd.exe", 0)]);
    let mut session = Session::new(ExitMode::FirstProcess, false);

    let (outcome, _) = monitor(&mut engine, &mut session);

    assert_eq!(outcome.reason, ExitReason::ProcessFound);
    assert_eq!(session.state().stats().processes, 1);
    let process = &session.state().processes()[0];
    assert_eq!(process.application, "cmd.exe");
    assert_eq!(process.creation_flags, 0);

    let summary = loffice::report::render_summary(session.state());
    assert!(summary.contains("Processes created: 1"));
}

#[test]
fn test_process_before_url_32() {
    let mut engine = ScriptedEngine::new(vec![
        create_file32("C:\\Users\\a\\AppData\\Local\\Temp\\x.exe", 0x4000_0000),
        process32("C:\\Users\\a\\AppData\\Local\\Temp\\x.exe", 0x0800_0000),
        url32("http://example.test/late"),
    ]);
    let mut session = Session::new(ExitMode::FirstUrl, true);

    let (outcome, _) = monitor(&mut engine, &mut session);

    assert_eq!(outcome.reason, ExitReason::ProcessBeforeUrl);
    assert!(session.state().urls().is_empty());
    assert_eq!(session.state().stats().file_writes, 1);
    assert_eq!(engine.delivered, 2);
}

#[test]
fn test_upper_half_of_flags_slot_is_ignored_64() {
    // Only the low DWORD of the stack slot is the creation flags
    let mut engine = ScriptedEngine::new(vec![process64("C:\\Windows\\System32\\cmd.exe", 0xFFFF_FFFF_0000_0004)]);
    let mut session = Session::new(ExitMode::FirstUrl, false);

    let (outcome, _) = monitor(&mut engine, &mut session);

    assert_eq!(session.state().processes()[0].creation_flags, 0x4);
    assert_eq!(outcome.reason, ExitReason::ProcessExited);
}

#[test]
fn test_unrestricted_runs_to_exit() {
    let mut traps = Vec::new();
    for i in 0..20 {
        traps.push(url32(&format!("http://example.test/{}", i)));
        traps.push(process32("cmd.exe", 0));
        traps.push(create_file32(&format!("C:\\t\\{}.txt", i), 0xC000_0000));
        traps.push(create_file32("\\\\server\\share\\x", 0xC000_0000));
    }
    let mut engine = ScriptedEngine::new(traps);
    let mut session = Session::new(ExitMode::Unrestricted, false);

    let (outcome, _) = monitor(&mut engine, &mut session);

    assert_eq!(outcome.end, SessionEnd::Exited { exit_code: 0 });
    assert_eq!(outcome.reason, ExitReason::ProcessExited);
    assert_eq!(engine.delivered, 80);
    let stats = session.state().stats();
    assert_eq!((stats.urls, stats.processes, stats.file_writes), (20, 20, 20));
    assert!(session.state().files().keys().all(|k| !k.starts_with("\\\\")));
    assert!(session.state().is_consistent());
}

#[test]
fn test_failed_read_yields_empty_string_and_continues() {
    // URL pointer into unmapped memory
    let mut bad = url64("ignored");
    bad.1.registers.rcx = 0xDEAD_0000;
    let mut engine = ScriptedEngine::new(vec![bad, url64("http://example.test/ok")]);
    let mut session = Session::new(ExitMode::Unrestricted, false);

    let (_, failure) = monitor(&mut engine, &mut session);

    assert!(failure.is_none());
    assert_eq!(
        session.state().urls(),
        ["".to_string(), "http://example.test/ok".to_string()]
    );
}

#[test]
fn test_operator_interrupt_keeps_observations() {
    let mut engine = ScriptedEngine::new(vec![url64("http://a"), url64("http://b"), url64("http://c")]);
    engine.interrupt_after = Some(2);
    let mut session = Session::new(ExitMode::Unrestricted, false);

    let (outcome, _) = monitor(&mut engine, &mut session);

    assert_eq!(outcome.reason, ExitReason::OperatorInterrupt);
    assert_eq!(outcome.end, SessionEnd::Interrupted);
    assert_eq!(session.state().stats().urls, 2);
}

#[test]
fn test_unsupported_bitness_aborts() {
    let (id, mut trap) = url64("http://a");
    trap.bits = 16;
    let mut engine = ScriptedEngine::new(vec![(id, trap), url64("http://b")]);
    let mut session = Session::new(ExitMode::Unrestricted, false);

    let (_, failure) = monitor(&mut engine, &mut session);

    match failure {
        Some(DebugError::Intercept(InterceptError::UnsupportedBitness(16))) => {}
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(engine.delivered, 1);
    assert!(session.state().urls().is_empty());
    assert_eq!(session.phase(), Phase::Stopped);
}

#[test]
fn test_helper_process_with_stack_across_pages_32() {
    let mut engine = ScriptedEngine::new(vec![
        process32_split("C:\\Windows\\splwow64.exe", 0),
        url32("http://example.test/a"),
    ]);
    let mut session = Session::new(ExitMode::FirstUrl, false);

    let (outcome, failure) = monitor(&mut engine, &mut session);

    assert!(failure.is_none());
    assert_eq!(outcome.reason, ExitReason::UrlFound);
    assert_eq!(engine.delivered, 2);
    let process = &session.state().processes()[0];
    assert_eq!(process.application, "C:\\Windows\\splwow64.exe");
    assert_eq!(process.command_line, "C:\\Windows\\splwow64.exe");
}

#[test]
fn test_writes_only_still_aggregates_reads_32() {
    let mut engine = ScriptedEngine::new(vec![create_file32("C:\\Users\\a\\doc.xml", 0x8000_0000)]);
    let mut session = Session::new(ExitMode::Unrestricted, true);

    let (outcome, _) = monitor(&mut engine, &mut session);

    assert_eq!(outcome.reason, ExitReason::ProcessExited);
    let files = session.state().files();
    assert_eq!(files.get("C:\\Users\\a\\doc.xml"), Some(&vec!["R".to_string()]));
    assert_eq!(session.state().stats().file_reads, 1);
    assert_eq!(session.state().stats().file_writes, 0);
}
