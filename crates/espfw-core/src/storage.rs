//! Filesystem helpers for the flash filesystem and the SD card.

use std::fs;
use std::io;
use std::path::Path;
use tracing::{error, info};

/// Format a byte count the way the boot log shows it.
pub fn human_readable_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.2} KB", bytes as f64 / KB)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / KB / KB)
    } else {
        format!("{:.2} GB", bytes as f64 / KB / KB / KB)
    }
}

/// Recursive listing of `root`, one entry per line.
///
/// Each nesting level adds one space of indent. Directories end in `/`,
/// files are followed by two spaces and their size.
pub fn list_directory(root: &Path) -> io::Result<Vec<String>> {
    let mut lines = Vec::new();
    list_into(root, 0, &mut lines)?;
    Ok(lines)
}

fn list_into(dir: &Path, depth: usize, lines: &mut Vec<String>) -> io::Result<()> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        let indent = " ".repeat(depth);
        let meta = entry.metadata()?;
        if meta.is_dir() {
            lines.push(format!("{indent}{name}/"));
            list_into(&entry.path(), depth + 1, lines)?;
        } else {
            lines.push(format!("{indent}{name}  {}", meta.len()));
        }
    }
    Ok(())
}

/// Total size of all files under `root`.
pub fn total_size(root: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        total += if meta.is_dir() {
            total_size(&entry.path())?
        } else {
            meta.len()
        };
    }
    Ok(total)
}

/// Mounted filesystem summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountReport {
    pub size_mb: u64,
    pub used: String,
    pub listing: Vec<String>,
}

/// Describe the card mounted at `root` and log the listing.
pub fn mount_report(root: &Path) -> io::Result<MountReport> {
    let used = total_size(root)?;
    let report = MountReport {
        size_mb: used / (1024 * 1024),
        used: human_readable_size(used),
        listing: list_directory(root)?,
    };
    info!("SD Card Size: {} MB ({} used)", report.size_mb, report.used);
    for line in &report.listing {
        info!("{}", line);
    }
    Ok(report)
}

/// Prepare the flash filesystem rooted at `root`.
pub fn init_fs(root: &Path) -> io::Result<()> {
    if let Err(e) = fs::create_dir_all(root) {
        error!("An Error has occurred while mounting the filesystem: {}", e);
        return Err(e);
    }
    info!("Filesystem mounted at {}", root.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_human_readable_size() {
        assert_eq!(human_readable_size(0), "0 B");
        assert_eq!(human_readable_size(1023), "1023 B");
        assert_eq!(human_readable_size(1536), "1.50 KB");
        assert_eq!(human_readable_size(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(human_readable_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn test_list_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("images/old")).unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        fs::write(dir.path().join("images/temp.jpg"), vec![0u8; 300]).unwrap();
        fs::write(dir.path().join("images/old/x.bin"), b"").unwrap();

        assert_eq!(
            list_directory(dir.path()).unwrap(),
            vec![
                "a.txt  5".to_string(),
                "images/".to_string(),
                " old/".to_string(),
                "  x.bin  0".to_string(),
                " temp.jpg  300".to_string(),
            ]
        );
    }

    #[test]
    fn test_mount_report() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f"), vec![1u8; 2048]).unwrap();
        let report = mount_report(dir.path()).unwrap();
        assert_eq!(report.size_mb, 0);
        assert_eq!(report.used, "2.00 KB");
        assert_eq!(report.listing, vec!["f  2048".to_string()]);
    }

    #[test]
    fn test_init_fs_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("flash");
        init_fs(&root).unwrap();
        assert!(root.is_dir());
    }
}
