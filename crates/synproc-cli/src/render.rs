//! Text rendering for listings, trees and file contents.

use std::fmt::Write as _;
use std::path::Path;

use synproc_kernel::{DirEntry, FileAttr, ProcFsOps};

/// Join a directory path and an entry name.
pub fn child_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// One `ls` line: mode, size, name and, for symlinks, the target.
pub fn format_entry(entry: &DirEntry, attr: Option<&FileAttr>, target: Option<&Path>) -> String {
    let mut line = match attr {
        Some(a) => format!("{} {:>8} {}", a.mode_string(), a.size, entry.name),
        None => format!("{} {:>8} {}", "?---------", "?", entry.name),
    };
    if let Some(t) = target {
        let _ = write!(line, " -> {}", t.display());
    }
    line
}

/// True if `data` looks like printable text.
pub fn is_text(data: &[u8]) -> bool {
    match std::str::from_utf8(data) {
        Ok(s) => s.chars().all(|c| !c.is_control() || c == '\n' || c == '\t'),
        Err(_) => false,
    }
}

/// Classic 16-bytes-per-row hex dump with an ASCII column.
pub fn hex_dump(data: &[u8]) -> Vec<String> {
    data.chunks(16)
        .enumerate()
        .map(|(row, chunk)| {
            let mut line = format!("{:08x}  ", row * 16);
            for i in 0..16 {
                match chunk.get(i) {
                    Some(b) => {
                        let _ = write!(line, "{b:02x} ");
                    }
                    None => line.push_str("   "),
                }
                if i == 7 {
                    line.push(' ');
                }
            }
            line.push_str(" |");
            line.extend(chunk.iter().map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                }
            }));
            line.push('|');
            line
        })
        .collect()
}

/// Format the namespace below `path` as ASCII tree lines, down to
/// `max_depth` levels. Symlinks are shown with their targets and not
/// descended into.
pub fn format_tree(ops: &dyn ProcFsOps, path: &str, max_depth: usize) -> Vec<String> {
    let mut lines = vec![path.to_string()];
    format_children(ops, path, 1, "", max_depth, &mut lines);
    lines
}

fn format_children(
    ops: &dyn ProcFsOps,
    dir: &str,
    depth: usize,
    prefix: &str,
    max_depth: usize,
    lines: &mut Vec<String>,
) {
    if depth > max_depth {
        return;
    }
    let entries = match ops.readdir(Path::new(dir)) {
        Ok(entries) => entries,
        Err(e) => {
            lines.push(format!("{prefix}└─ <{e}>"));
            return;
        }
    };
    let entries: Vec<_> = entries
        .into_iter()
        .filter(|e| e.name != "." && e.name != "..")
        .collect();

    for (idx, entry) in entries.iter().enumerate() {
        let is_last = idx == entries.len() - 1;
        let connector = if is_last { "└─ " } else { "├─ " };
        let path = child_path(dir, &entry.name);

        let mut line = format!("{prefix}{connector}{}", entry.name);
        if entry.kind.is_symlink() {
            if let Ok(target) = ops.readlink(Path::new(&path)) {
                let _ = write!(line, " -> {}", target.display());
            }
        } else if entry.kind.is_dir() {
            line.push('/');
        }
        lines.push(line);

        if entry.kind.is_dir() {
            let child_prefix = format!("{prefix}{}", if is_last { "   " } else { "│  " });
            format_children(ops, &path, depth + 1, &child_prefix, max_depth, lines);
        }
    }
}
