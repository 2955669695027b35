//! Interception Dispatcher
//!
//! Owns the session state and routes each trap through
//! decoder -> aggregator -> exit policy.

use super::aggregate::{AggregateState, Observation, Stats};
use super::decoder::{self, CallEvent};
use super::functions::{FunctionId, MonitoredFunction};
use super::policy::{ExitDecision, ExitMode, ExitPolicy, ExitReason};
use super::InterceptError;
use crate::debug::types::{Control, SessionEnd};
use crate::debug::{Trap, TrapHandler};

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Breakpoints set, waiting for a trap
    Armed,
    /// Decoding one event
    Handling,
    /// Shutdown requested
    Terminating,
    /// Session over
    Stopped,
}

/// Final result of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub reason: ExitReason,
    pub detail: String,
    pub end: SessionEnd,
}

type ProgressFn = Box<dyn FnMut(&Stats)>;

/// One monitoring session over one target process
pub struct Session {
    policy: ExitPolicy,
    writes_only: bool,
    state: AggregateState,
    phase: Phase,
    termination: Option<(ExitReason, String)>,
    progress: Option<ProgressFn>,
}

impl Session {
    pub fn new(mode: ExitMode, writes_only: bool) -> Self {
        Self {
            policy: ExitPolicy::new(mode),
            writes_only,
            state: AggregateState::new(),
            phase: Phase::Armed,
            termination: None,
            progress: None,
        }
    }

    /// Call `progress` with the counters after every recorded observation
    pub fn with_progress(mut self, progress: impl FnMut(&Stats) + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &AggregateState {
        &self.state
    }

    /// Apply one decoded call. Events arriving after termination are ignored.
    pub fn handle_event(&mut self, event: CallEvent) -> ExitDecision {
        if self.phase != Phase::Armed {
            log::debug!("Ignoring {:?} after shutdown was requested", event.function);
            return ExitDecision::Continue;
        }
        self.phase = Phase::Handling;

        let decision = match self.record(&event) {
            Some(observation) => {
                if let Some(progress) = self.progress.as_mut() {
                    progress(self.state.stats());
                }
                self.policy.evaluate(&observation, &self.state)
            }
            None => ExitDecision::Continue,
        };

        match &decision {
            ExitDecision::Continue => self.phase = Phase::Armed,
            ExitDecision::Terminate { reason, detail } => {
                log::info!("{}", farewell(*reason));
                self.termination = Some((*reason, detail.clone()));
                self.phase = Phase::Terminating;
            }
        }
        decision
    }

    /// Move to `Stopped` and report how the session ended.
    pub fn finish(&mut self, end: SessionEnd) -> SessionOutcome {
        self.phase = Phase::Stopped;

        let (reason, detail) = match (self.termination.take(), &end) {
            (Some(stopped), _) => stopped,
            (None, SessionEnd::Interrupted) => {
                log::info!("Interrupted by operator");
                (
                    ExitReason::OperatorInterrupt,
                    "Session interrupted by the operator".to_string(),
                )
            }
            (None, SessionEnd::Exited { exit_code }) => {
                log::info!("Target exited with code {:#x}", exit_code);
                (
                    ExitReason::ProcessExited,
                    format!("Target exited with code {:#x}", exit_code),
                )
            }
            (None, SessionEnd::Stopped) => (
                ExitReason::ProcessExited,
                "Target was stopped".to_string(),
            ),
        };

        SessionOutcome { reason, detail, end }
    }

    fn record(&mut self, event: &CallEvent) -> Option<Observation> {
        match event.function {
            FunctionId::CrackUrl => {
                let url = event.string(0).to_string();
                log::info!("FOUND URL: {}", url);
                Some(self.state.record_url(url))
            }
            FunctionId::CreateFile => {
                let observation = self
                    .state
                    .record_file_access(event.string(0).to_string(), event.flags(1))?;
                if let Observation::FileAccess { filename, access } = &observation {
                    if !self.writes_only || access.contains('W') {
                        log::info!("Opened file handle (access: {}): {}", access, filename);
                    }
                }
                Some(observation)
            }
            FunctionId::CreateProcess => {
                let (application, command_line, flags) =
                    (event.string(0), event.string(1), event.flags(2));
                log::info!(
                    "CreateProcess: App: \"{}\" Cmd: \"{}\" CreationFlags: {:#x}",
                    application,
                    command_line,
                    flags
                );
                Some(self.state.record_process_creation(
                    application.to_string(),
                    command_line.to_string(),
                    flags,
                ))
            }
            FunctionId::StrCompare => {
                let observation = self
                    .state
                    .record_string_compare(event.string(0).to_string(), event.string(1).to_string())?;
                log::info!("String compare: \"{}\" vs \"{}\"", event.string(0), event.string(1));
                Some(observation)
            }
            FunctionId::WmiQuery => {
                let query = event.string(0).to_string();
                log::info!("WMI query: {}", query);
                Some(self.state.record_wmi_query(query))
            }
        }
    }
}

impl TrapHandler for Session {
    fn on_hit(
        &mut self,
        function: &MonitoredFunction,
        trap: &dyn Trap,
    ) -> Result<Control, InterceptError> {
        if self.phase != Phase::Armed {
            return Ok(Control::Stop);
        }

        let event = decoder::decode(function, trap).map_err(|e| {
            self.phase = Phase::Stopped;
            e
        })?;

        Ok(match self.handle_event(event) {
            ExitDecision::Continue => Control::Continue,
            ExitDecision::Terminate { .. } => Control::Stop,
        })
    }
}

fn farewell(reason: ExitReason) -> &'static str {
    match reason {
        ExitReason::UrlFound => "Exiting on first URL, bye!",
        ExitReason::ProcessBeforeUrl => "Process created before URL was found, exiting for safety.",
        ExitReason::ProcessFound => "Exiting on process creation, bye!",
        ExitReason::OperatorInterrupt => "Interrupted by operator",
        ExitReason::ProcessExited => "Target exited",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::types::Bitness;
    use crate::intercept::decoder::ArgValue;
    use std::cell::Cell;
    use std::rc::Rc;

    fn url(u: &str) -> CallEvent {
        CallEvent::new(FunctionId::CrackUrl, Bitness::Bit64, vec![ArgValue::Str(u.into())])
    }

    fn proc_event(app: &str, flags: u32) -> CallEvent {
        CallEvent::new(
            FunctionId::CreateProcess,
            Bitness::Bit64,
            vec![
                ArgValue::Str(app.into()),
                ArgValue::Str(app.into()),
                ArgValue::Flags(flags),
            ],
        )
    }

    #[test]
    fn test_no_events_after_termination() {
        let mut session = Session::new(ExitMode::FirstUrl, false);
        assert!(session.handle_event(url("http://a")).is_terminate());
        assert_eq!(session.phase(), Phase::Terminating);

        assert_eq!(session.handle_event(url("http://b")), ExitDecision::Continue);
        assert_eq!(session.state().urls(), ["http://a".to_string()]);
        assert_eq!(session.state().stats().urls, 1);

        let outcome = session.finish(SessionEnd::Stopped);
        assert_eq!(outcome.reason, ExitReason::UrlFound);
        assert_eq!(session.phase(), Phase::Stopped);
    }

    #[test]
    fn test_dropped_file_access_does_not_count() {
        let mut session = Session::new(ExitMode::Unrestricted, true);
        let event = CallEvent::new(
            FunctionId::CreateFile,
            Bitness::Bit32,
            vec![ArgValue::Str("C:\\x".into()), ArgValue::Flags(0)],
        );
        assert_eq!(session.handle_event(event), ExitDecision::Continue);
        assert!(session.state().files().is_empty());
        assert_eq!(session.phase(), Phase::Armed);
    }

    #[test]
    fn test_progress_called_per_observation() {
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        let mut session =
            Session::new(ExitMode::Unrestricted, false).with_progress(move |_| seen.set(seen.get() + 1));

        session.handle_event(url("http://a"));
        session.handle_event(proc_event("cmd.exe", 0));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_finish_reasons() {
        let mut interrupted = Session::new(ExitMode::FirstUrl, false);
        interrupted.handle_event(proc_event("C:\\Windows\\splwow64.exe", 0x4));
        let outcome = interrupted.finish(SessionEnd::Interrupted);
        assert_eq!(outcome.reason, ExitReason::OperatorInterrupt);
        assert_eq!(interrupted.state().stats().processes, 1);

        let mut exited = Session::new(ExitMode::Unrestricted, false);
        let outcome = exited.finish(SessionEnd::Exited { exit_code: 0 });
        assert_eq!(outcome.reason, ExitReason::ProcessExited);
    }
}
