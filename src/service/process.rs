use std::{collections::HashMap, path::PathBuf};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

/// Snapshot of one OS process, as much as discovery needs of it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: Option<u32>,
    pub name: String,
    pub cmdline: Vec<String>,
    pub cwd: PathBuf,
}

/// Source of the process list scanned by discovery.
pub trait ProcessSource: Send + Sync {
    fn processes(&mut self) -> Vec<ProcessInfo>;
}

/// Process list read from the OS through `sysinfo`.
pub struct SysinfoProcesses {
    system: System,
}

impl Default for SysinfoProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProcesses {
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl ProcessSource for SysinfoProcesses {
    fn processes(&mut self) -> Vec<ProcessInfo> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_cmd(UpdateKind::Always)
                .with_cwd(UpdateKind::Always),
        );

        let mut list: Vec<ProcessInfo> = self
            .system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                ppid: process.parent().map(sysinfo::Pid::as_u32),
                name: process.name().to_string_lossy().into_owned(),
                cmdline: process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned())
                    .collect(),
                cwd: process.cwd().map(PathBuf::from).unwrap_or_default(),
            })
            .collect();

        list.sort_by_key(|p| p.pid);
        list
    }
}

/// Fixed process list, for static setups and tests.
#[derive(Clone, Debug, Default)]
pub struct StaticProcesses(pub Vec<ProcessInfo>);

impl ProcessSource for StaticProcesses {
    fn processes(&mut self) -> Vec<ProcessInfo> {
        self.0.clone()
    }
}

/// Index of process names by pid, used to recognise postmaster children.
#[must_use]
pub fn names_by_pid(list: &[ProcessInfo]) -> HashMap<u32, &str> {
    list.iter().map(|p| (p.pid, p.name.as_str())).collect()
}
