//! Observation Aggregator
//!
//! Session-owned record of everything the target did. Collections only grow;
//! the counters are kept in lockstep with them.

use std::collections::BTreeMap;

use super::decoder::decode_access;

/// Running per-category counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub strings: usize,
    pub urls: usize,
    pub file_writes: usize,
    pub file_reads: usize,
    pub wmi: usize,
    pub processes: usize,
}

/// A process creation seen in the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    pub application: String,
    pub command_line: String,
    pub creation_flags: u32,
}

/// One structured record of intercepted behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Url(String),
    FileAccess { filename: String, access: String },
    ProcessCreated(ProcessRecord),
    StringCompare { left: String, right: String },
    WmiQuery(String),
}

/// Everything observed during one session
#[derive(Debug, Clone, Default)]
pub struct AggregateState {
    files: BTreeMap<String, Vec<String>>,
    urls: Vec<String>,
    processes: Vec<ProcessRecord>,
    string_compares: BTreeMap<String, Vec<String>>,
    wmi_queries: Vec<String>,
    stats: Stats,
}

impl AggregateState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_url(&mut self, url: String) -> Observation {
        self.urls.push(url.clone());
        self.stats.urls += 1;
        Observation::Url(url)
    }

    /// Record a file open; UNC paths and opens without read or write access
    /// are dropped and yield `None`.
    pub fn record_file_access(&mut self, filename: String, desired_access: u32) -> Option<Observation> {
        if filename.starts_with("\\\\") {
            return None;
        }
        let access = decode_access(desired_access)?;

        if access.contains('W') {
            self.stats.file_writes += 1;
        } else {
            self.stats.file_reads += 1;
        }
        self.files
            .entry(filename.clone())
            .or_default()
            .push(access.clone());

        Some(Observation::FileAccess { filename, access })
    }

    pub fn record_process_creation(
        &mut self,
        application: String,
        command_line: String,
        creation_flags: u32,
    ) -> Observation {
        let record = ProcessRecord {
            application,
            command_line,
            creation_flags,
        };
        self.processes.push(record.clone());
        self.stats.processes += 1;
        Observation::ProcessCreated(record)
    }

    /// Record a string comparison; comparisons of two empty strings are dropped.
    pub fn record_string_compare(&mut self, left: String, right: String) -> Option<Observation> {
        if left.is_empty() && right.is_empty() {
            return None;
        }
        self.string_compares
            .entry(left.clone())
            .or_default()
            .push(right.clone());
        self.stats.strings += 1;
        Some(Observation::StringCompare { left, right })
    }

    pub fn record_wmi_query(&mut self, query: String) -> Observation {
        self.wmi_queries.push(query.clone());
        self.stats.wmi += 1;
        Observation::WmiQuery(query)
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Distinct URLs in first-seen order
    pub fn unique_urls(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for url in &self.urls {
            if !seen.contains(&url.as_str()) {
                seen.push(url);
            }
        }
        seen
    }

    pub fn files(&self) -> &BTreeMap<String, Vec<String>> {
        &self.files
    }

    pub fn processes(&self) -> &[ProcessRecord] {
        &self.processes
    }

    pub fn string_compares(&self) -> &BTreeMap<String, Vec<String>> {
        &self.string_compares
    }

    pub fn wmi_queries(&self) -> &[String] {
        &self.wmi_queries
    }

    /// Whether every counter matches the collection it counts
    pub fn is_consistent(&self) -> bool {
        let accesses = self.files.values().flatten();
        let writes = accesses.clone().filter(|a| a.contains('W')).count();
        let reads = accesses.count() - writes;

        self.stats.urls == self.urls.len()
            && self.stats.processes == self.processes.len()
            && self.stats.wmi == self.wmi_queries.len()
            && self.stats.strings == self.string_compares.values().map(Vec::len).sum::<usize>()
            && self.stats.file_writes == writes
            && self.stats.file_reads == reads
    }
}
