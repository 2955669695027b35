//! Exit Policy Evaluator
//!
//! Decides after every observation whether the session should end.

use std::fmt;

use super::aggregate::{AggregateState, Observation, ProcessRecord};

/// Print spooler helper that Office spawns on its own
pub const HELPER_PROCESS: &str = "splwow64";

/// `CREATE_SUSPENDED`
pub const CREATE_SUSPENDED: u32 = 0x4;

/// Which policy variant is active for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ExitMode {
    /// Stop on the first URL; stop early if a process appears before any URL
    #[value(name = "url")]
    FirstUrl,
    /// Stop on the first process creation
    #[value(name = "proc")]
    FirstProcess,
    /// Never stop automatically
    #[default]
    #[value(name = "none")]
    Unrestricted,
}

impl fmt::Display for ExitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitMode::FirstUrl => "first-url",
            ExitMode::FirstProcess => "first-process",
            ExitMode::Unrestricted => "unrestricted",
        };
        f.write_str(name)
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    UrlFound,
    ProcessBeforeUrl,
    ProcessFound,
    OperatorInterrupt,
    ProcessExited,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::UrlFound => "url-found",
            ExitReason::ProcessBeforeUrl => "process-before-url",
            ExitReason::ProcessFound => "process-found",
            ExitReason::OperatorInterrupt => "operator-interrupt",
            ExitReason::ProcessExited => "process-exited",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one policy evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitDecision {
    Continue,
    Terminate { reason: ExitReason, detail: String },
}

impl ExitDecision {
    pub fn is_terminate(&self) -> bool {
        matches!(self, ExitDecision::Terminate { .. })
    }
}

/// Exit policy for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitPolicy {
    mode: ExitMode,
}

impl ExitPolicy {
    pub fn new(mode: ExitMode) -> Self {
        Self { mode }
    }

    /// Evaluate `observation`, which has already been applied to `state`.
    pub fn evaluate(&self, observation: &Observation, state: &AggregateState) -> ExitDecision {
        match (self.mode, observation) {
            (ExitMode::Unrestricted, _) => ExitDecision::Continue,

            (ExitMode::FirstUrl, Observation::Url(url)) => ExitDecision::Terminate {
                reason: ExitReason::UrlFound,
                detail: format!("Found a URL, exiting as specified exit mode.\nURL: {}", url),
            },
            (ExitMode::FirstUrl, Observation::ProcessCreated(process))
                if state.urls().is_empty()
                    && !is_helper(process)
                    && process.creation_flags != CREATE_SUSPENDED =>
            {
                ExitDecision::Terminate {
                    reason: ExitReason::ProcessBeforeUrl,
                    detail: format!(
                        "A process was created before a URL was found, exiting before losing control.\nProcess: {}",
                        describe(process)
                    ),
                }
            }

            (ExitMode::FirstProcess, Observation::ProcessCreated(process)) if !is_helper(process) => {
                ExitDecision::Terminate {
                    reason: ExitReason::ProcessFound,
                    detail: format!(
                        "A process was created, exiting via specified exit mode.\nProcess: {}",
                        describe(process)
                    ),
                }
            }

            _ => ExitDecision::Continue,
        }
    }
}

/// Whether `process` is the print spooler helper
pub fn is_helper(process: &ProcessRecord) -> bool {
    process.application.contains(HELPER_PROCESS)
}

fn describe(process: &ProcessRecord) -> String {
    if process.command_line.is_empty() {
        process.application.clone()
    } else {
        process.command_line.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(state: &mut AggregateState, app: &str, flags: u32) -> Observation {
        state.record_process_creation(app.into(), format!("\"{}\"", app), flags)
    }

    fn reason(decision: ExitDecision) -> Option<ExitReason> {
        match decision {
            ExitDecision::Continue => None,
            ExitDecision::Terminate { reason, .. } => Some(reason),
        }
    }

    #[test]
    fn test_first_url_terminates_on_url() {
        let policy = ExitPolicy::new(ExitMode::FirstUrl);
        let mut state = AggregateState::new();
        let obs = state.record_url("http://example.test/a".into());
        assert_eq!(reason(policy.evaluate(&obs, &state)), Some(ExitReason::UrlFound));
    }

    #[test]
    fn test_first_url_process_before_url() {
        let policy = ExitPolicy::new(ExitMode::FirstUrl);
        let mut state = AggregateState::new();
        let obs = process(&mut state, "C:\\Windows\\System32\\cmd.exe", 0);
        assert_eq!(
            reason(policy.evaluate(&obs, &state)),
            Some(ExitReason::ProcessBeforeUrl)
        );
    }

    #[test]
    fn test_first_url_exemptions() {
        let policy = ExitPolicy::new(ExitMode::FirstUrl);
        let mut state = AggregateState::new();

        let helper = process(&mut state, "C:\\Windows\\splwow64.exe", 0x4);
        assert_eq!(policy.evaluate(&helper, &state), ExitDecision::Continue);

        let helper_running = process(&mut state, "C:\\Windows\\splwow64.exe", 0);
        assert_eq!(policy.evaluate(&helper_running, &state), ExitDecision::Continue);

        let suspended = process(&mut state, "C:\\Windows\\System32\\cmd.exe", CREATE_SUSPENDED);
        assert_eq!(policy.evaluate(&suspended, &state), ExitDecision::Continue);
    }

    #[test]
    fn test_helper_match_is_case_sensitive() {
        let policy = ExitPolicy::new(ExitMode::FirstUrl);
        let mut state = AggregateState::new();
        let lookalike = process(&mut state, "C:\\Users\\a\\Temp\\SPLWOW64.EXE", 0);
        assert_eq!(
            reason(policy.evaluate(&lookalike, &state)),
            Some(ExitReason::ProcessBeforeUrl)
        );
    }

    #[test]
    fn test_first_url_ignores_other_observations() {
        let policy = ExitPolicy::new(ExitMode::FirstUrl);
        let mut state = AggregateState::new();
        let file = state.record_file_access("C:\\x".into(), 0x4000_0000).unwrap();
        let wmi = state.record_wmi_query("SELECT * FROM Win32_BIOS".into());
        assert_eq!(policy.evaluate(&file, &state), ExitDecision::Continue);
        assert_eq!(policy.evaluate(&wmi, &state), ExitDecision::Continue);
    }

    #[test]
    fn test_first_process() {
        let policy = ExitPolicy::new(ExitMode::FirstProcess);
        let mut state = AggregateState::new();

        let url = state.record_url("http://a".into());
        assert_eq!(policy.evaluate(&url, &state), ExitDecision::Continue);

        let helper = process(&mut state, "C:\\Windows\\splwow64.exe", 0);
        assert_eq!(policy.evaluate(&helper, &state), ExitDecision::Continue);

        // Suspended creation is not exempt in this mode
        let cmd = process(&mut state, "cmd.exe", CREATE_SUSPENDED);
        assert_eq!(reason(policy.evaluate(&cmd, &state)), Some(ExitReason::ProcessFound));
    }

    #[test]
    fn test_unrestricted_never_terminates() {
        let policy = ExitPolicy::new(ExitMode::Unrestricted);
        let mut state = AggregateState::new();
        for i in 0..50 {
            let url = state.record_url(format!("http://host/{}", i));
            let proc_obs = process(&mut state, "cmd.exe", 0);
            assert!(!policy.evaluate(&url, &state).is_terminate());
            assert!(!policy.evaluate(&proc_obs, &state).is_terminate());
        }
    }

    #[test]
    fn test_names() {
        assert_eq!(ExitReason::ProcessBeforeUrl.to_string(), "process-before-url");
        assert_eq!(ExitMode::FirstUrl.to_string(), "first-url");
    }
}
