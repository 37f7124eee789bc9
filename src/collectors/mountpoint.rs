//! Map Postgres directories to the filesystems backing them.

use super::metrics::Emitter;
use anyhow::{Context, Result, anyhow};
use sqlx::{Executor, PgConnection, Row};
use std::{
    fs,
    path::{Component, Path, PathBuf},
};
use tracing::{debug, info_span};
use tracing_futures::Instrument as _;

const PROC_MOUNTS: &str = "/proc/mounts";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mount {
    pub device: String,
    pub mountpoint: String,
    pub fstype: String,
}

/// Parse `/proc/mounts`. Octal escapes (`\040` for space) are decoded.
#[must_use]
pub fn parse_mounts(content: &str) -> Vec<Mount> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mountpoint = fields.next()?;
            let fstype = fields.next()?;
            Some(Mount {
                device: unescape(device),
                mountpoint: unescape(mountpoint),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut rest = field;
    while let Some((head, tail)) = rest.split_once('\\') {
        out.push_str(head);
        match tail.get(..3).and_then(|oct| u8::from_str_radix(oct, 8).ok()) {
            Some(byte) => {
                out.push(char::from(byte));
                rest = tail.get(3..).unwrap_or_default();
            }
            None => {
                out.push('\\');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Mount with the longest mountpoint that is a path prefix of `path`.
#[must_use]
pub fn find_mount<'a>(mounts: &'a [Mount], path: &Path) -> Option<&'a Mount> {
    mounts
        .iter()
        .filter(|m| path.starts_with(&m.mountpoint))
        .max_by_key(|m| Path::new(&m.mountpoint).components().count())
}

/// Follow one level of symlink; relative targets resolve against the link's parent.
#[must_use]
pub fn resolve_symlink(path: &Path) -> PathBuf {
    match fs::read_link(path) {
        Ok(target) if target.is_absolute() => target,
        Ok(target) => path
            .parent()
            .map_or_else(|| target.clone(), |parent| normalize(&parent.join(&target))),
        Err(_) => path.to_path_buf(),
    }
}

/// Lexically remove `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

async fn show(conn: &mut PgConnection, setting: &str) -> Result<String> {
    let statement = format!("SHOW {setting}");
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SHOW",
        db.statement = %statement,
        otel.kind = "client"
    );
    let row = Executor::fetch_one(&mut *conn, sqlx::raw_sql(&statement))
        .instrument(span)
        .await
        .with_context(|| format!("failed to read {setting}"))?;
    row.try_get_unchecked::<String, _>(0)
        .with_context(|| format!("failed to decode {setting}"))
}

/// Absolute path of the directory a descriptor refers to, or `None` when it does
/// not apply (log collector disabled).
async fn directory(conn: &mut PgConnection, name: &str, version: i64) -> Result<Option<PathBuf>> {
    let data_directory = PathBuf::from(show(conn, "data_directory").await?);

    match name {
        "pg_data_directory" => Ok(Some(data_directory)),
        "pg_wal_directory" => {
            let wal = if version >= 100_000 { "pg_wal" } else { "pg_xlog" };
            Ok(Some(data_directory.join(wal)))
        }
        "pg_log_directory" => {
            if show(conn, "logging_collector").await? != "on" {
                return Ok(None);
            }
            let log_directory = PathBuf::from(show(conn, "log_directory").await?);
            Ok(Some(if log_directory.is_absolute() {
                log_directory
            } else {
                data_directory.join(log_directory)
            }))
        }
        other => Err(anyhow!("no directory known for {other}")),
    }
}

/// Emit the directory gauge for descriptor `name`. Returns the number of samples.
///
/// # Errors
///
/// Returns an error if the settings cannot be read or no mount backs the path.
pub async fn collect(
    conn: &mut PgConnection,
    name: &str,
    version: i64,
    emitter: &mut Emitter<'_>,
) -> Result<usize> {
    let Some(path) = directory(conn, name, version).await? else {
        debug!(descriptor = name, "directory not in use");
        return Ok(0);
    };

    let path = resolve_symlink(&path);
    let content = fs::read_to_string(PROC_MOUNTS)
        .with_context(|| format!("failed to read {PROC_MOUNTS}"))?;
    let mounts = parse_mounts(&content);
    let mount = find_mount(&mounts, &path)
        .ok_or_else(|| anyhow!("no mountpoint found for {}", path.display()))?;

    let path = path.to_string_lossy();
    let emitted = emitter.emit(
        name,
        &[mount.device.as_str(), mount.mountpoint.as_str(), path.as_ref()],
        1.0,
    );
    Ok(usize::from(emitted))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTS: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
/dev/sda1 / ext4 rw,relatime 0 0
/dev/sdb1 /var/lib/postgresql xfs rw,noatime 0 0
/dev/sdc1 /var/lib/postgresql/16/main/pg_wal xfs rw,noatime 0 0
/dev/sdd1 /mnt/with\\040space ext4 rw 0 0
";

    #[test]
    fn test_longest_prefix_wins() {
        let mounts = parse_mounts(MOUNTS);
        assert_eq!(mounts.len(), 5);

        let data = find_mount(&mounts, Path::new("/var/lib/postgresql/16/main"));
        assert_eq!(data.map(|m| m.device.as_str()), Some("/dev/sdb1"));

        let wal = find_mount(&mounts, Path::new("/var/lib/postgresql/16/main/pg_wal"));
        assert_eq!(wal.map(|m| m.device.as_str()), Some("/dev/sdc1"));

        let other = find_mount(&mounts, Path::new("/var/lib/postgresqlx"));
        assert_eq!(other.map(|m| m.mountpoint.as_str()), Some("/"));
    }

    #[test]
    fn test_octal_escapes() {
        let mounts = parse_mounts(MOUNTS);
        let spaced = find_mount(&mounts, Path::new("/mnt/with space/data"));
        assert_eq!(spaced.map(|m| m.device.as_str()), Some("/dev/sdd1"));
    }

    #[test]
    fn test_resolve_symlink_one_level() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("wal");
        fs::create_dir(&target)?;
        let link = dir.path().join("pg_wal");
        std::os::unix::fs::symlink("wal", &link)?;

        assert_eq!(resolve_symlink(&link), target);
        assert_eq!(resolve_symlink(&target), target);
        Ok(())
    }
}
