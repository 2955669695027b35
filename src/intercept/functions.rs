//! Monitored function catalog
//!
//! Declarative argument shapes for every API entry point that gets a
//! breakpoint. The decoder consumes these; nothing else branches per function.

use std::fmt;

/// Identity of a monitored API entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionId {
    /// `wininet!InternetCrackUrlW`
    CrackUrl,
    /// `kernel32!CreateFileW`
    CreateFile,
    /// `kernel32!CreateProcessInternalW`
    CreateProcess,
    /// `vbe7!__vbaStrCmp`
    StrCompare,
    /// `fastprox!CWbemSvcWrapper::XWbemServices::ExecQuery`
    WmiQuery,
}

/// Semantic type of a decoded argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Pointer to a null-terminated UTF-16 string
    WideString,
    /// Pointer to a null-terminated ANSI string
    NarrowString,
    /// Pointer-sized integer
    Integer,
    /// 32-bit bitmask (DWORD)
    Flags,
}

/// One argument the handler needs: zero-based position and type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgSpec {
    pub position: usize,
    pub kind: ArgKind,
}

const fn arg(position: usize, kind: ArgKind) -> ArgSpec {
    ArgSpec { position, kind }
}

/// How an export name is matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolMatch {
    Exact(&'static str),
    /// Substring match, for decorated C++ names that differ per bitness
    Contains(&'static str),
}

/// An interceptable API entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredFunction {
    pub id: FunctionId,
    /// File name of the exporting module, compared case-insensitively
    pub module: &'static str,
    pub symbol: SymbolMatch,
    pub args: &'static [ArgSpec],
}

impl MonitoredFunction {
    pub fn name(&self) -> &'static str {
        match self.symbol {
            SymbolMatch::Exact(name) | SymbolMatch::Contains(name) => name,
        }
    }

    /// Whether the export `symbol` is this function
    pub fn matches_symbol(&self, symbol: &str) -> bool {
        match self.symbol {
            SymbolMatch::Exact(name) => symbol == name,
            SymbolMatch::Contains(fragment) => symbol.contains(fragment),
        }
    }

    /// Whether a module loaded from `path` exports this function
    pub fn matches_module(&self, path: &str) -> bool {
        let file_name = path.rsplit(['\\', '/']).next().unwrap_or(path);
        file_name.eq_ignore_ascii_case(self.module)
    }
}

impl fmt::Display for MonitoredFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.module, self.name())
    }
}

/// Every function that gets a breakpoint
pub static CATALOG: [MonitoredFunction; 5] = [
    MonitoredFunction {
        id: FunctionId::CrackUrl,
        module: "wininet.dll",
        symbol: SymbolMatch::Exact("InternetCrackUrlW"),
        // lpszUrl
        args: &[arg(0, ArgKind::WideString)],
    },
    MonitoredFunction {
        id: FunctionId::CreateFile,
        module: "kernel32.dll",
        symbol: SymbolMatch::Exact("CreateFileW"),
        // lpFileName, dwDesiredAccess
        args: &[arg(0, ArgKind::WideString), arg(1, ArgKind::Flags)],
    },
    MonitoredFunction {
        id: FunctionId::CreateProcess,
        module: "kernel32.dll",
        symbol: SymbolMatch::Exact("CreateProcessInternalW"),
        // lpApplicationName, lpCommandLine, dwCreationFlags
        args: &[
            arg(1, ArgKind::WideString),
            arg(2, ArgKind::WideString),
            arg(6, ArgKind::Flags),
        ],
    },
    MonitoredFunction {
        id: FunctionId::StrCompare,
        module: "vbe7.dll",
        symbol: SymbolMatch::Exact("__vbaStrCmp"),
        args: &[arg(0, ArgKind::WideString), arg(1, ArgKind::WideString)],
    },
    MonitoredFunction {
        id: FunctionId::WmiQuery,
        module: "fastprox.dll",
        symbol: SymbolMatch::Contains("ExecQuery@XWbemServices@CWbemSvcWrapper"),
        // this, strQueryLanguage, strQuery
        args: &[arg(2, ArgKind::WideString)],
    },
];

/// Catalog entry for `id`
pub fn lookup(id: FunctionId) -> &'static MonitoredFunction {
    CATALOG
        .iter()
        .find(|f| f.id == id)
        .unwrap_or_else(|| unreachable!("{:?} missing from catalog", id))
}
