//! Host statistics for the `system:0` pseudo-service.
//!
//! Each descriptor maps to a reader in [`READERS`]; readers write through the
//! [`Emitter`] and report how many samples they produced.

use super::{
    catalog::{StatDescriptor, StatType},
    metrics::Emitter,
};
use anyhow::{Context, Result, anyhow};
use std::{collections::BTreeMap, fs, path::Path};
use sysinfo::{Disks, Networks, System};
use tracing::{debug, warn};

/// Kernel clock ticks per second used by `/proc/stat`.
const USER_HZ: f64 = 100.0;

/// Sector size `/proc/diskstats` counts in, whatever the device.
const SECTOR_BYTES: f64 = 512.0;

/// Kernel settings relevant to database hosts.
const SYSCTLS: [&str; 13] = [
    "kernel.numa_balancing",
    "kernel.sched_autogroup_enabled",
    "kernel.sched_migration_cost_ns",
    "vm.dirty_background_bytes",
    "vm.dirty_background_ratio",
    "vm.dirty_bytes",
    "vm.dirty_expire_centisecs",
    "vm.dirty_ratio",
    "vm.min_free_kbytes",
    "vm.nr_hugepages",
    "vm.overcommit_memory",
    "vm.overcommit_ratio",
    "vm.swappiness",
];

type Reader = fn(&mut Emitter<'_>) -> Result<usize>;

/// Descriptor name → reader.
pub const READERS: [(&str, Reader); 11] = [
    ("node_cpu", read_cpu),
    ("node_memory", read_memory),
    ("node_disk", read_diskstats),
    ("node_network", read_network),
    ("node_filesystem", read_filesystems),
    ("node_settings_sysctl", read_sysctl),
    ("node_hardware_cores", read_cores),
    ("node_hardware_scaling_governors", read_governors),
    ("node_hardware_numa", read_numa),
    ("node_hardware_storage_rotational", read_storage),
    ("node_uptime", read_uptime),
];

#[allow(clippy::cast_precision_loss)]
const fn to_f64(v: u64) -> f64 {
    v as f64
}

/// Run every due system descriptor. Returns the number of samples emitted.
pub fn collect(descriptors: &mut [StatDescriptor], emitter: &mut Emitter<'_>) -> usize {
    let mut emitted = 0;
    for desc in descriptors.iter_mut() {
        if desc.stat_type != StatType::System || !desc.schedule.is_active() {
            continue;
        }
        let Some((_, reader)) = READERS.iter().find(|(name, _)| *name == desc.name) else {
            warn!(descriptor = desc.name, "no reader for system descriptor");
            continue;
        };
        match reader(emitter) {
            Ok(n) => {
                emitted += n;
                desc.done = true;
            }
            Err(e) => debug!(descriptor = desc.name, error = %e, "system reader failed"),
        }
    }
    emitted
}

fn emit_all<'l>(
    emitter: &mut Emitter<'_>,
    samples: impl IntoIterator<Item = (&'l str, Vec<&'l str>, f64)>,
) -> usize {
    samples
        .into_iter()
        .filter(|(metric, labels, value)| emitter.emit(metric, labels, *value))
        .count()
}

/// `(mode, seconds)` pairs from the aggregate `cpu` line of `/proc/stat`.
#[must_use]
pub fn parse_cpu_stat(content: &str) -> Vec<(&'static str, f64)> {
    const MODES: [&str; 8] = [
        "user", "nice", "system", "idle", "iowait", "irq", "softirq", "steal",
    ];
    let Some(line) = content.lines().find(|l| l.starts_with("cpu ")) else {
        return Vec::new();
    };
    MODES
        .iter()
        .zip(line.split_whitespace().skip(1))
        .filter_map(|(mode, ticks)| ticks.parse::<f64>().ok().map(|t| (*mode, t / USER_HZ)))
        .collect()
}

fn read_cpu(emitter: &mut Emitter<'_>) -> Result<usize> {
    let content = fs::read_to_string("/proc/stat").context("failed to read /proc/stat")?;
    let modes = parse_cpu_stat(&content);
    if modes.is_empty() {
        return Err(anyhow!("no cpu line in /proc/stat"));
    }
    Ok(emit_all(
        emitter,
        modes
            .into_iter()
            .map(|(mode, seconds)| ("node_cpu_seconds_total", vec![mode], seconds)),
    ))
}

fn read_memory(emitter: &mut Emitter<'_>) -> Result<usize> {
    let mut sys = System::new();
    sys.refresh_memory();
    let values = [
        ("node_memory_mem_total_bytes", sys.total_memory()),
        ("node_memory_mem_available_bytes", sys.available_memory()),
        ("node_memory_mem_used_bytes", sys.used_memory()),
        ("node_memory_swap_total_bytes", sys.total_swap()),
        ("node_memory_swap_used_bytes", sys.used_swap()),
    ];
    Ok(emit_all(
        emitter,
        values.map(|(metric, v)| (metric, Vec::new(), to_f64(v))),
    ))
}

/// Per-device counters from `/proc/diskstats`.
#[derive(Clone, Debug, PartialEq)]
pub struct DiskStats {
    pub device: String,
    pub reads_completed: f64,
    pub writes_completed: f64,
    pub read_bytes: f64,
    pub written_bytes: f64,
    pub io_time_seconds: f64,
}

/// Parse `/proc/diskstats`, skipping loop and ram devices.
#[must_use]
pub fn parse_diskstats(content: &str) -> Vec<DiskStats> {
    content
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let device = *fields.get(2)?;
            if device.starts_with("loop") || device.starts_with("ram") {
                return None;
            }
            let num = |i: usize| fields.get(i).and_then(|v| v.parse::<f64>().ok());
            Some(DiskStats {
                device: device.to_string(),
                reads_completed: num(3)?,
                read_bytes: num(5)? * SECTOR_BYTES,
                writes_completed: num(7)?,
                written_bytes: num(9)? * SECTOR_BYTES,
                io_time_seconds: num(12)? / 1000.0,
            })
        })
        .collect()
}

fn read_diskstats(emitter: &mut Emitter<'_>) -> Result<usize> {
    let content =
        fs::read_to_string("/proc/diskstats").context("failed to read /proc/diskstats")?;
    let stats = parse_diskstats(&content);
    Ok(emit_all(
        emitter,
        stats.iter().flat_map(|d| {
            let labels = vec![d.device.as_str()];
            [
                ("node_disk_reads_completed_total", labels.clone(), d.reads_completed),
                ("node_disk_writes_completed_total", labels.clone(), d.writes_completed),
                ("node_disk_read_bytes_total", labels.clone(), d.read_bytes),
                ("node_disk_written_bytes_total", labels.clone(), d.written_bytes),
                ("node_disk_io_time_seconds_total", labels, d.io_time_seconds),
            ]
        }),
    ))
}

fn read_network(emitter: &mut Emitter<'_>) -> Result<usize> {
    let networks = Networks::new_with_refreshed_list();
    let mut emitted = 0;
    for (interface, data) in &networks {
        let labels = vec![interface.as_str()];
        emitted += emit_all(
            emitter,
            [
                ("node_network_receive_bytes_total", labels.clone(), to_f64(data.total_received())),
                ("node_network_transmit_bytes_total", labels.clone(), to_f64(data.total_transmitted())),
                ("node_network_receive_packets_total", labels.clone(), to_f64(data.total_packets_received())),
                ("node_network_transmit_packets_total", labels.clone(), to_f64(data.total_packets_transmitted())),
                ("node_network_receive_errors_total", labels.clone(), to_f64(data.total_errors_on_received())),
                ("node_network_transmit_errors_total", labels, to_f64(data.total_errors_on_transmitted())),
            ],
        );
    }
    Ok(emitted)
}

fn read_filesystems(emitter: &mut Emitter<'_>) -> Result<usize> {
    let disks = Disks::new_with_refreshed_list();
    let mut emitted = 0;
    for disk in disks.list() {
        let device = disk.name().to_string_lossy();
        let mountpoint = disk.mount_point().to_string_lossy();
        let fstype = disk.file_system().to_string_lossy();
        let labels = vec![device.as_ref(), mountpoint.as_ref(), fstype.as_ref()];
        emitted += emit_all(
            emitter,
            [
                ("node_filesystem_size_bytes", labels.clone(), to_f64(disk.total_space())),
                ("node_filesystem_avail_bytes", labels, to_f64(disk.available_space())),
            ],
        );
    }
    Ok(emitted)
}

/// `vm.swappiness` → `/proc/sys/vm/swappiness`.
#[must_use]
pub fn sysctl_path(key: &str) -> String {
    format!("/proc/sys/{}", key.replace('.', "/"))
}

fn read_sysctl(emitter: &mut Emitter<'_>) -> Result<usize> {
    let mut emitted = 0;
    for key in SYSCTLS {
        let Ok(raw) = fs::read_to_string(sysctl_path(key)) else {
            continue;
        };
        if let Ok(value) = raw.trim().parse::<f64>()
            && emitter.emit("node_settings_sysctl", &[key], value)
        {
            emitted += 1;
        }
    }
    Ok(emitted)
}

/// `(logical, physical)` core counts from `/proc/cpuinfo`. Physical cores are
/// distinct `(physical id, core id)` pairs; without topology lines every logical
/// CPU counts as a core.
#[must_use]
pub fn parse_cpuinfo(content: &str) -> (usize, usize) {
    let mut logical = 0;
    let mut cores = std::collections::BTreeSet::new();
    let mut physical_id = String::new();

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "processor" => {
                logical += 1;
                physical_id.clear();
            }
            "physical id" => physical_id = value.trim().to_string(),
            "core id" => {
                cores.insert((physical_id.clone(), value.trim().to_string()));
            }
            _ => {}
        }
    }

    let physical = if cores.is_empty() { logical } else { cores.len() };
    (logical, physical)
}

fn read_cores(emitter: &mut Emitter<'_>) -> Result<usize> {
    let content = fs::read_to_string("/proc/cpuinfo").context("failed to read /proc/cpuinfo")?;
    let (logical, physical) = parse_cpuinfo(&content);
    Ok(emit_all(
        emitter,
        [
            ("node_hardware_cores", vec!["logical"], to_f64(logical as u64)),
            ("node_hardware_cores", vec!["physical"], to_f64(physical as u64)),
        ],
    ))
}

/// `cpuN` entries of a sysfs cpu directory.
fn cpu_dirs(root: &Path) -> Result<Vec<std::path::PathBuf>> {
    let entries = fs::read_dir(root).with_context(|| format!("failed to read {}", root.display()))?;
    Ok(entries
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_name()
                .to_str()
                .and_then(|n| n.strip_prefix("cpu"))
                .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        })
        .map(|e| e.path())
        .collect())
}

fn read_governors(emitter: &mut Emitter<'_>) -> Result<usize> {
    let mut governors: BTreeMap<String, u64> = BTreeMap::new();
    for dir in cpu_dirs(Path::new("/sys/devices/system/cpu"))? {
        if let Ok(g) = fs::read_to_string(dir.join("cpufreq/scaling_governor")) {
            *governors.entry(g.trim().to_string()).or_default() += 1;
        }
    }
    Ok(emit_all(
        emitter,
        governors
            .iter()
            .map(|(g, n)| ("node_hardware_scaling_governors", vec![g.as_str()], to_f64(*n))),
    ))
}

fn read_numa(emitter: &mut Emitter<'_>) -> Result<usize> {
    let root = Path::new("/sys/devices/system/node");
    let nodes = fs::read_dir(root)
        .with_context(|| format!("failed to read {}", root.display()))?
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_name()
                .to_str()
                .and_then(|n| n.strip_prefix("node"))
                .is_some_and(|n| n.parse::<u32>().is_ok())
        })
        .count();
    Ok(usize::from(emitter.emit(
        "node_hardware_numa_nodes",
        &[],
        to_f64(nodes as u64),
    )))
}

/// Active scheduler from a sysfs `queue/scheduler` line such as
/// `mq-deadline kyber [bfq] none`.
#[must_use]
pub fn active_scheduler(line: &str) -> String {
    line.split_whitespace()
        .find_map(|s| s.strip_prefix('[').and_then(|s| s.strip_suffix(']')))
        .or_else(|| line.split_whitespace().next())
        .unwrap_or_default()
        .to_string()
}

fn read_storage(emitter: &mut Emitter<'_>) -> Result<usize> {
    let root = Path::new("/sys/block");
    let mut emitted = 0;
    for entry in fs::read_dir(root)
        .with_context(|| format!("failed to read {}", root.display()))?
        .filter_map(Result::ok)
    {
        let device = entry.file_name().to_string_lossy().into_owned();
        if device.starts_with("loop") || device.starts_with("ram") {
            continue;
        }
        let queue = entry.path().join("queue");
        let Some(rotational) = fs::read_to_string(queue.join("rotational"))
            .ok()
            .and_then(|v| v.trim().parse::<f64>().ok())
        else {
            continue;
        };
        let scheduler = fs::read_to_string(queue.join("scheduler"))
            .map(|s| active_scheduler(&s))
            .unwrap_or_default();
        if emitter.emit(
            "node_hardware_storage_rotational",
            &[device.as_str(), scheduler.as_str()],
            rotational,
        ) {
            emitted += 1;
        }
    }
    Ok(emitted)
}

fn read_uptime(emitter: &mut Emitter<'_>) -> Result<usize> {
    Ok(usize::from(emitter.emit(
        "node_uptime_seconds",
        &[],
        to_f64(System::uptime()),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::catalog::global_catalog;

    #[test]
    fn test_every_system_descriptor_has_a_reader() {
        for desc in global_catalog().iter().filter(|d| d.stat_type == StatType::System) {
            assert!(
                READERS.iter().any(|(name, _)| *name == desc.name),
                "{} has no reader",
                desc.name
            );
        }
        assert_eq!(
            READERS.len(),
            global_catalog().iter().filter(|d| d.stat_type == StatType::System).count()
        );
    }

    #[test]
    fn test_parse_cpu_stat() {
        let content = "cpu  100 20 300 4000 50 0 6 0 0 0\ncpu0 50 10 150 2000 25 0 3 0 0 0\n";
        let modes = parse_cpu_stat(content);
        assert_eq!(modes.len(), 8);
        assert_eq!(modes.first(), Some(&("user", 1.0)));
        assert_eq!(modes.get(3), Some(&("idle", 40.0)));
        assert!(parse_cpu_stat("intr 1 2 3\n").is_empty());
    }

    #[test]
    fn test_parse_diskstats() {
        let content = "\
   7       0 loop0 10 0 20 0 0 0 0 0 0 4 4 0 0 0 0
   8       0 sda 1000 10 8000 500 2000 20 16000 900 0 1500 1400 0 0 0 0
";
        let stats = parse_diskstats(content);
        assert_eq!(
            stats,
            vec![DiskStats {
                device: "sda".to_string(),
                reads_completed: 1000.0,
                writes_completed: 2000.0,
                read_bytes: 8000.0 * 512.0,
                written_bytes: 16000.0 * 512.0,
                io_time_seconds: 1.5,
            }]
        );
    }

    #[test]
    fn test_parse_cpuinfo() {
        let content = "\
processor\t: 0
physical id\t: 0
core id\t\t: 0

processor\t: 1
physical id\t: 0
core id\t\t: 0

processor\t: 2
physical id\t: 0
core id\t\t: 1
";
        assert_eq!(parse_cpuinfo(content), (3, 2));
        assert_eq!(parse_cpuinfo("processor : 0\nprocessor : 1\n"), (2, 2));
    }

    #[test]
    fn test_active_scheduler_and_sysctl_path() {
        assert_eq!(active_scheduler("mq-deadline kyber [bfq] none\n"), "bfq");
        assert_eq!(active_scheduler("none\n"), "none");
        assert_eq!(sysctl_path("vm.dirty_ratio"), "/proc/sys/vm/dirty_ratio");
    }
}
