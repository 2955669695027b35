//! Command line and resolved run configuration

use clap::{Parser, ValueEnum};

use crate::intercept::ExitMode;

/// Office directory used when `--path` is not given, relative to Program Files
const DEFAULT_OFFICE_SUBDIR: &str = "Microsoft Office\\Office14";

/// Loffice: Lazy Office Analyzer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host application that opens the document
    #[arg(value_enum)]
    pub app: HostApp,

    /// When to stop the session
    #[arg(value_enum)]
    pub exit_on: ExitMode,

    /// Document (or script) to open
    pub document: String,

    /// Office installation directory
    #[arg(short, long)]
    pub path: Option<String>,

    /// Only log file handles opened for writing
    #[arg(short, long, default_value_t = false)]
    pub writes_only: bool,

    /// Add fake recent documents before launching if the MRU lists look empty
    #[arg(long, default_value_t = false)]
    pub decoy_docs: bool,

    /// Log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Program used to open the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HostApp {
    Word,
    Excel,
    #[value(name = "power")]
    PowerPoint,
    /// Windows Script Host, for JScript/VBScript droppers
    Script,
}

impl HostApp {
    /// Full path of the host executable
    pub fn executable(&self, office_dir: &str, system_root: &str) -> String {
        let office_dir = office_dir.trim_end_matches('\\');
        match self {
            HostApp::Word => format!("{}\\WINWORD.EXE", office_dir),
            HostApp::Excel => format!("{}\\EXCEL.EXE", office_dir),
            HostApp::PowerPoint => format!("{}\\POWERPNT.EXE", office_dir),
            HostApp::Script => format!("{}\\System32\\wscript.exe", system_root.trim_end_matches('\\')),
        }
    }
}

/// Everything a run needs, with defaults filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub app: HostApp,
    pub executable: String,
    pub document: String,
    pub office_dir: String,
    pub exit_mode: ExitMode,
    pub writes_only: bool,
    pub decoy_docs: bool,
    pub verbose: u8,
}

impl Config {
    /// Resolve `args` against the process environment
    pub fn from_args(args: Args) -> Self {
        Self::resolve(args, |name| std::env::var(name).ok())
    }

    /// Resolve `args`, reading environment variables through `env`
    pub fn resolve(args: Args, env: impl Fn(&str) -> Option<String>) -> Self {
        let office_dir = args.path.unwrap_or_else(|| {
            let program_files = env("PROGRAMFILES").unwrap_or_else(|| "C:\\Program Files".into());
            format!("{}\\{}", program_files, DEFAULT_OFFICE_SUBDIR)
        });
        let system_root = env("SystemRoot").unwrap_or_else(|| "C:\\Windows".into());

        Self {
            app: args.app,
            executable: args.app.executable(&office_dir, &system_root),
            document: args.document,
            office_dir,
            exit_mode: args.exit_on,
            writes_only: args.writes_only,
            decoy_docs: args.decoy_docs,
            verbose: args.verbose,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_positional() {
        let args = Args::try_parse_from(["loffice", "word", "url", "C:\\s\\a.doc", "-w"]).unwrap();
        assert_eq!(args.app, HostApp::Word);
        assert_eq!(args.exit_on, ExitMode::FirstUrl);
        assert!(args.writes_only);
        assert!(!args.decoy_docs);

        let config = Config::resolve(args, no_env);
        assert_eq!(
            config.executable,
            "C:\\Program Files\\Microsoft Office\\Office14\\WINWORD.EXE"
        );
        assert_eq!(config.document, "C:\\s\\a.doc");
    }

    #[test]
    fn test_exit_modes_and_apps() {
        let args = Args::try_parse_from(["loffice", "power", "proc", "a.ppt"]).unwrap();
        assert_eq!(args.app, HostApp::PowerPoint);
        assert_eq!(args.exit_on, ExitMode::FirstProcess);

        let args = Args::try_parse_from(["loffice", "excel", "none", "a.xls", "-p", "D:\\Office15\\"]).unwrap();
        assert_eq!(args.exit_on, ExitMode::Unrestricted);
        let config = Config::resolve(args, no_env);
        assert_eq!(config.executable, "D:\\Office15\\EXCEL.EXE");

        assert!(Args::try_parse_from(["loffice", "word", "sometimes", "a.doc"]).is_err());
    }

    #[test]
    fn test_environment_defaults() {
        let args = Args::try_parse_from(["loffice", "script", "none", "drop.js", "-vv"]).unwrap();
        let config = Config::resolve(args, |name| match name {
            "SystemRoot" => Some("D:\\WINNT".into()),
            "PROGRAMFILES" => Some("D:\\Apps".into()),
            _ => None,
        });
        assert_eq!(config.executable, "D:\\WINNT\\System32\\wscript.exe");
        assert_eq!(config.office_dir, "D:\\Apps\\Microsoft Office\\Office14");
        assert_eq!(config.verbose, 2);
    }
}
