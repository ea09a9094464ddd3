//! Keeps a vault-owned region of `~/.ssh/config` in step with the inventory.
//!
//! Only the text between the two marker lines is ever rewritten. Everything
//! outside them belongs to the user and is preserved byte for byte.

use crate::error::{Result, VaultError};
use crate::inventory::Inventory;
use crate::io;
use crate::paths;
use crate::types::{KeyStatus, DEFAULT_SSH_PORT};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const BEGIN_MARKER: &str = "# BEGIN SSH-VAULT MANAGED BLOCK (do not edit)";
pub const END_MARKER: &str = "# END SSH-VAULT MANAGED BLOCK";

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn config_value(s: &str) -> String {
    if s.chars().any(char::is_whitespace) {
        format!("\"{s}\"")
    } else {
        s.to_string()
    }
}

/// Render the managed block: one `Host` stanza per inventory host, sorted by
/// alias, framed by the markers. Always ends with a newline.
pub fn render_block(inv: &Inventory) -> String {
    let mut hosts: Vec<_> = inv.hosts.iter().collect();
    hosts.sort_by(|a, b| a.alias.cmp(&b.alias));

    let mut out = String::new();
    out.push_str(BEGIN_MARKER);
    out.push('\n');
    for (i, host) in hosts.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "Host {}", host.alias);
        let _ = writeln!(out, "    HostName {}", host.hostname);
        let _ = writeln!(out, "    User {}", host.user);
        if host.port != DEFAULT_SSH_PORT {
            let _ = writeln!(out, "    Port {}", host.port);
        }
        let identity = host
            .identity
            .as_deref()
            .and_then(|k| inv.find_key(k))
            .filter(|k| k.status != KeyStatus::Revoked);
        if let Some(key) = identity {
            let _ = writeln!(
                out,
                "    IdentityFile {}",
                config_value(&key.private_key_path.display().to_string())
            );
            out.push_str("    IdentitiesOnly yes\n");
        }
    }
    out.push_str(END_MARKER);
    out.push('\n');
    out
}

// ---------------------------------------------------------------------------
// Locating the section
// ---------------------------------------------------------------------------

/// Byte range of the managed section: start of the begin-marker line through
/// the end of the end-marker line (including its newline, if any).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Section {
    start: usize,
    end: usize,
}

fn locate(text: &str) -> Result<Option<Section>> {
    let mut begins = Vec::new();
    let mut ends = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed == BEGIN_MARKER {
            begins.push(offset);
        } else if trimmed == END_MARKER {
            ends.push(offset + line.len());
        }
        offset += line.len();
    }

    match (begins.as_slice(), ends.as_slice()) {
        ([], []) => Ok(None),
        ([start], [end]) if start < end => Ok(Some(Section {
            start: *start,
            end: *end,
        })),
        ([_], [_]) => Err(VaultError::MalformedManagedSection(
            "end marker appears before begin marker".to_string(),
        )),
        ([_], []) => Err(VaultError::MalformedManagedSection(
            "begin marker without end marker".to_string(),
        )),
        ([], [_]) => Err(VaultError::MalformedManagedSection(
            "end marker without begin marker".to_string(),
        )),
        (b, e) => Err(VaultError::MalformedManagedSection(format!(
            "found {} begin and {} end markers, expected one of each",
            b.len(),
            e.len()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Merge / strip
// ---------------------------------------------------------------------------

/// Put `block` into `existing`: in place of the current section when there is
/// one, otherwise appended after a blank separator line.
pub fn merge(existing: &str, block: &str) -> Result<String> {
    if let Some(section) = locate(existing)? {
        let mut out = String::with_capacity(existing.len() + block.len());
        out.push_str(&existing[..section.start]);
        out.push_str(block);
        out.push_str(&existing[section.end..]);
        return Ok(out);
    }

    if existing.is_empty() {
        return Ok(block.to_string());
    }
    let mut out = existing.to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    // Always exactly one separator line, so `strip` can take it back.
    out.push('\n');
    out.push_str(block);
    Ok(out)
}

/// Remove the managed section, along with the blank separator `merge` put
/// in front of it. Text without a section is returned unchanged.
pub fn strip(existing: &str) -> Result<String> {
    let Some(section) = locate(existing)? else {
        return Ok(existing.to_string());
    };
    let mut prefix = &existing[..section.start];
    if prefix.ends_with("\n\n") {
        prefix = &prefix[..prefix.len() - 1];
    }
    let mut out = String::with_capacity(existing.len());
    out.push_str(prefix);
    out.push_str(&existing[section.end..]);
    Ok(out)
}

/// Inventory aliases that user-owned `Host` lines also declare. OpenSSH uses
/// the first value it sees, so these may shadow (or be shadowed by) the
/// managed stanza.
pub fn conflicts(existing: &str, inv: &Inventory) -> Result<Vec<String>> {
    let user_text = strip(existing)?;
    let mut found: Vec<String> = Vec::new();
    for line in user_text.lines() {
        let line = line.trim();
        let Some((keyword, rest)) = line.split_once(|c: char| c.is_whitespace() || c == '=') else {
            continue;
        };
        if !keyword.eq_ignore_ascii_case("host") {
            continue;
        }
        for pattern in rest.split_whitespace() {
            let pattern = pattern.trim_matches('"');
            if inv.find_host(pattern).is_some() && !found.iter().any(|f| f == pattern) {
                found.push(pattern.to_string());
            }
        }
    }
    found.sort();
    Ok(found)
}

// ---------------------------------------------------------------------------
// File operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub path: PathBuf,
    pub changed: bool,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
    pub conflicts: Vec<String>,
    #[serde(skip)]
    pub content: String,
}

/// Rewrite the managed section of the ssh config at `path` from `inv`.
/// The previous file is saved next to it before any change.
pub fn sync(path: &Path, inv: &Inventory, dry_run: bool) -> Result<SyncOutcome> {
    let existing = io::read_optional(path)?;
    let current = existing.as_deref().unwrap_or("");
    let updated = merge(current, &render_block(inv))?;
    let shadowed = conflicts(&updated, inv)?;
    for alias in &shadowed {
        warn!(host = %alias, "host is also declared outside the managed section");
    }
    write_outcome(path, existing.as_deref(), updated, shadowed, dry_run)
}

/// Remove the managed section from the ssh config at `path`.
pub fn remove_section(path: &Path, dry_run: bool) -> Result<SyncOutcome> {
    let existing = io::read_optional(path)?;
    let updated = strip(existing.as_deref().unwrap_or(""))?;
    write_outcome(path, existing.as_deref(), updated, Vec::new(), dry_run)
}

fn write_outcome(
    path: &Path,
    existing: Option<&str>,
    updated: String,
    conflicts: Vec<String>,
    dry_run: bool,
) -> Result<SyncOutcome> {
    let changed = existing.unwrap_or("") != updated;
    let mut backup = None;

    if changed && !dry_run {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                io::ensure_dir(parent)?;
                io::set_mode(parent, 0o700)?;
            }
        }
        if let Some(old) = existing {
            let bak = paths::backup_path(path);
            io::atomic_write_private(&bak, old.as_bytes(), 0o600)?;
            backup = Some(bak);
        }
        let target = write_target(path)?;
        io::atomic_write_private(&target, updated.as_bytes(), 0o600)?;
        info!(path = %target.display(), "ssh config updated");
    }

    Ok(SyncOutcome {
        path: path.to_path_buf(),
        changed,
        dry_run,
        backup,
        conflicts,
        content: updated,
    })
}

/// The file a write to `path` should land in. A symlinked ssh config (for
/// example one kept in a dotfiles checkout) is updated through the link.
fn write_target(path: &Path) -> Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(target) => Ok(target),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(path.to_path_buf()),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::tests::{host, key};
    use tempfile::TempDir;

    fn inventory() -> Inventory {
        let mut inv = Inventory::default();
        inv.insert_key(key("work")).unwrap();
        inv.insert_host(host("web", Some("work"))).unwrap();
        let mut db = host("db", None);
        db.port = 2222;
        inv.insert_host(db).unwrap();
        inv
    }

    const USER_CONFIG: &str = "Host *\n    ServerAliveInterval 60\n\nHost github.com\n    User git\n";

    #[test]
    fn render_sorts_hosts_and_omits_defaults() {
        let block = render_block(&inventory());
        let expected = format!(
            "{BEGIN_MARKER}\n\
             Host db\n    HostName db.example.com\n    User deploy\n    Port 2222\n\
             \n\
             Host web\n    HostName web.example.com\n    User deploy\n    \
             IdentityFile /vault/keys/work\n    IdentitiesOnly yes\n\
             {END_MARKER}\n"
        );
        assert_eq!(block, expected);
    }

    #[test]
    fn render_empty_inventory_is_just_markers() {
        assert_eq!(
            render_block(&Inventory::default()),
            format!("{BEGIN_MARKER}\n{END_MARKER}\n")
        );
    }

    #[test]
    fn render_skips_revoked_identity_and_quotes_spaces() {
        let mut inv = inventory();
        inv.key_mut("work").unwrap().status = KeyStatus::Revoked;
        assert!(!render_block(&inv).contains("IdentityFile"));

        let mut inv = inventory();
        inv.key_mut("work").unwrap().private_key_path = PathBuf::from("/Users/A B/keys/work");
        assert!(render_block(&inv).contains("IdentityFile \"/Users/A B/keys/work\""));
    }

    #[test]
    fn merge_appends_after_user_content() {
        let block = render_block(&inventory());
        let merged = merge(USER_CONFIG, &block).unwrap();
        assert!(merged.starts_with(USER_CONFIG));
        assert_eq!(merged, format!("{USER_CONFIG}\n{block}"));
    }

    #[test]
    fn merge_into_empty_file() {
        let block = render_block(&inventory());
        assert_eq!(merge("", &block).unwrap(), block);
    }

    #[test]
    fn merge_adds_missing_trailing_newline() {
        let block = render_block(&Inventory::default());
        let merged = merge("Host x\n    User y", &block).unwrap();
        assert_eq!(merged, format!("Host x\n    User y\n\n{block}"));
    }

    #[test]
    fn merge_replaces_in_place_preserving_both_sides() {
        let before = "Host early\n    User a\n\n";
        let after = "\nHost late\n    User b\n";
        let stale = format!("{BEGIN_MARKER}\nHost old\n    HostName gone\n{END_MARKER}\n");
        let existing = format!("{before}{stale}{after}");

        let block = render_block(&inventory());
        let merged = merge(&existing, &block).unwrap();
        assert_eq!(merged, format!("{before}{block}{after}"));
        assert!(!merged.contains("Host old"));
    }

    #[test]
    fn merge_is_idempotent() {
        let block = render_block(&inventory());
        let once = merge(USER_CONFIG, &block).unwrap();
        let twice = merge(&once, &block).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn malformed_sections_rejected() {
        let block = render_block(&inventory());
        let cases = [
            format!("{BEGIN_MARKER}\nHost x\n"),
            format!("Host x\n{END_MARKER}\n"),
            format!("{END_MARKER}\n{BEGIN_MARKER}\n"),
            format!("{BEGIN_MARKER}\n{END_MARKER}\n{BEGIN_MARKER}\n{END_MARKER}\n"),
        ];
        for case in cases {
            assert!(
                matches!(merge(&case, &block), Err(VaultError::MalformedManagedSection(_))),
                "expected malformed: {case:?}"
            );
        }
    }

    #[test]
    fn strip_undoes_merge() {
        let block = render_block(&inventory());
        let merged = merge(USER_CONFIG, &block).unwrap();
        assert_eq!(strip(&merged).unwrap(), USER_CONFIG);
        assert_eq!(strip(USER_CONFIG).unwrap(), USER_CONFIG);
    }

    #[test]
    fn strip_keeps_trailing_blank_lines_of_user_content() {
        let block = render_block(&inventory());
        for user in ["Host x\n    User y\n", "Host x\n    User y\n\n", "\n"] {
            let merged = merge(user, &block).unwrap();
            assert_eq!(strip(&merged).unwrap(), user, "user content {user:?}");
        }
    }

    #[test]
    fn conflicts_only_consider_user_content() {
        let inv = inventory();
        let user = "Host web staging\n    User root\nhost=db\n";
        let merged = merge(user, &render_block(&inv)).unwrap();
        assert_eq!(conflicts(&merged, &inv).unwrap(), vec!["db", "web"]);
        let clean = merge(USER_CONFIG, &render_block(&inv)).unwrap();
        assert!(conflicts(&clean, &inv).unwrap().is_empty());
    }

    #[test]
    fn sync_writes_backup_and_is_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".ssh/config");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, USER_CONFIG).unwrap();
        let inv = inventory();

        let first = sync(&path, &inv, false).unwrap();
        assert!(first.changed);
        let bak = first.backup.clone().unwrap();
        assert_eq!(std::fs::read_to_string(&bak).unwrap(), USER_CONFIG);
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with(USER_CONFIG));
        assert!(written.contains("Host web"));

        let second = sync(&path, &inv, false).unwrap();
        assert!(!second.changed);
        assert!(second.backup.is_none());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), written);
    }

    #[test]
    fn sync_dry_run_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        let out = sync(&path, &inventory(), true).unwrap();
        assert!(out.changed);
        assert!(out.content.contains("Host db"));
        assert!(!path.exists());
    }

    #[test]
    fn sync_creates_missing_file_without_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ssh/config");
        let out = sync(&path, &inventory(), false).unwrap();
        assert!(out.backup.is_none());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            render_block(&inventory())
        );
        #[cfg(unix)]
        assert_eq!(io::file_mode(&path).unwrap(), Some(0o600));
    }

    #[test]
    fn remove_section_restores_user_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, USER_CONFIG).unwrap();
        sync(&path, &inventory(), false).unwrap();
        let out = remove_section(&path, false).unwrap();
        assert!(out.changed);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), USER_CONFIG);
    }

    #[cfg(unix)]
    #[test]
    fn sync_writes_through_symlinked_config() {
        let dir = TempDir::new().unwrap();
        let real = dir.path().join("dotfiles/ssh_config");
        std::fs::create_dir_all(real.parent().unwrap()).unwrap();
        std::fs::write(&real, USER_CONFIG).unwrap();
        let link = dir.path().join("config");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let out = sync(&link, &inventory(), false).unwrap();
        assert!(out.changed);
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        let written = std::fs::read_to_string(&real).unwrap();
        assert!(written.starts_with(USER_CONFIG));
        assert!(written.contains(BEGIN_MARKER));
        assert_eq!(std::fs::read_to_string(out.backup.unwrap()).unwrap(), USER_CONFIG);

        remove_section(&link, false).unwrap();
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_to_string(&real).unwrap(), USER_CONFIG);
    }
}
