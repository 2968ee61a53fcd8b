//! Command safety checker for the shell tool's command-execution contract —
//! spec.md §4.E.
//!
//! Decision order:
//!   1. Reject outright if the raw string contains forbidden shell syntax
//!      (redirection, substitution, subshells, newlines) — these are never
//!      safe regardless of which binary is invoked.
//!   2. Split on top-level `&&`/`||`/`;` chain operators.
//!   3. Each segment must both avoid every blocklist pattern and start with
//!      a whitelisted binary.

/// Returns `true` if `command` contains syntax this layer refuses to reason
/// about: redirection, substitution, subshells, or embedded newlines.
fn has_forbidden_syntax(command: &str) -> bool {
    command.contains('>')
        || command.contains('<')
        || command.contains('`')
        || command.contains("$(")
        || command.contains("${")
        || command.contains('(')
        || command.contains(')')
        || command.contains('\n')
        || command.contains('\r')
}

/// Split `command` on top-level `&&`, `||`, `;` chain operators.
///
/// Safe to do with plain substring search because `has_forbidden_syntax`
/// has already rejected parens, so there is no nested-shell context in
/// which these operators could appear anywhere but top level.
fn split_chain(command: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut rest = command;
    loop {
        let next = ["&&", "||", ";"]
            .iter()
            .filter_map(|op| rest.find(op).map(|i| (i, op.len())))
            .min_by_key(|(i, _)| *i);
        match next {
            Some((i, len)) => {
                segments.push(rest[..i].trim());
                rest = rest[i + len..].trim();
            }
            None => {
                segments.push(rest.trim());
                break;
            }
        }
    }
    segments.into_iter().filter(|s| !s.is_empty()).collect()
}

/// Environment variables passed through to spawned children; everything
/// else is stripped — spec.md §4.E.
pub const SAFE_ENV_VARS: &[&str] = &["PATH", "HOME", "USER", "LANG", "TERM"];

/// Confine `cwd` to the workspace subtree or `/tmp` — spec.md §4.E.
///
/// Canonicalizes both paths so a `..`-laden `cwd` cannot escape the
/// workspace root via a symlink or relative traversal.
pub fn confine_cwd(cwd: &std::path::Path, workspace_root: &std::path::Path) -> Result<std::path::PathBuf, String> {
    let resolved = cwd
        .canonicalize()
        .map_err(|e| format!("cannot resolve working directory {}: {e}", cwd.display()))?;
    let workspace_root = workspace_root
        .canonicalize()
        .unwrap_or_else(|_| workspace_root.to_path_buf());
    if resolved.starts_with(&workspace_root) || resolved.starts_with("/tmp") {
        Ok(resolved)
    } else {
        Err(format!(
            "working directory {} is outside the workspace subtree or /tmp",
            resolved.display()
        ))
    }
}

/// Check whether `command` is safe to execute.
///
/// Returns `Ok(())` if every chained segment passes, or `Err(reason)`
/// describing the first violation found.
pub fn check_command(command: &str) -> Result<(), String> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Err("empty command".to_string());
    }
    if has_forbidden_syntax(trimmed) {
        return Err(
            "command contains forbidden syntax (redirection, substitution, subshell, or newline)"
                .to_string(),
        );
    }
    for segment in split_chain(trimmed) {
        check_segment(segment)?;
    }
    Ok(())
}

fn check_segment(segment: &str) -> Result<(), String> {
    let lower = segment.to_lowercase();

    for (pattern, reason) in BLOCKLIST {
        if lower.contains(pattern) {
            return Err(format!("{reason} (matched pattern: `{pattern}`)"));
        }
    }

    let binary = lower.split_whitespace().next().unwrap_or("");
    if !ALLOWED_BINARIES.contains(&binary) {
        return Err(format!("binary `{binary}` is not in the allowed list"));
    }
    Ok(())
}

/// Binaries the shell tool is permitted to invoke. Matched against the
/// first whitespace-delimited token of each chain segment, case-insensitive.
const ALLOWED_BINARIES: &[&str] = &[
    "ls", "pwd", "echo", "cat", "head", "tail", "wc", "git", "cargo", "npm",
    "node", "rustc", "python", "python3", "date", "whoami", "hostname",
    "uname", "find", "grep", "rg", "fd", "mkdir", "cp", "mv", "touch",
    "diff", "sort", "uniq", "sed", "awk", "curl", "wget", "tar", "gzip",
    "gunzip", "jq",
];

/// `(substring_pattern, human_readable_reason)` pairs checked against the
/// lowercased segment. The first matching pattern wins.
const BLOCKLIST: &[(&str, &str)] = &[
    ("rm -rf /", "destructive: recursive forced removal from root"),
    (":(){ :|:& };:", "fork bomb: will exhaust system resources"),
    ("| sh", "unsafe: piping content directly into sh"),
    ("| bash", "unsafe: piping content directly into bash"),
    ("dd if=", "destructive: raw disk I/O via dd"),
    ("mkfs", "destructive: creates a new filesystem, wiping existing data"),
    ("chmod 777 /", "unsafe: world-writable permissions on root filesystem"),
    ("chown -r /", "unsafe: recursive chown from root"),
    ("shutdown", "unsafe: shuts down the system"),
    ("reboot", "unsafe: reboots the system"),
    ("halt", "unsafe: halts the system"),
    ("poweroff", "unsafe: powers off the system"),
    ("kill -9 1", "unsafe: kills pid 1 (init)"),
    ("kill -9 -1", "unsafe: sends sigkill to every process"),
    ("sudo", "blocked: privilege escalation is not permitted"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlisted_binary_passes() {
        assert!(check_command("git status --short").is_ok());
    }

    #[test]
    fn unknown_binary_is_rejected() {
        let err = check_command("perl -e 'print 1'").unwrap_err();
        assert!(err.contains("not in the allowed list"));
    }

    #[test]
    fn rejects_redirection() {
        assert!(check_command("echo hi > /etc/passwd").is_err());
    }

    #[test]
    fn rejects_subshell_substitution() {
        assert!(check_command("echo $(whoami)").is_err());
        assert!(check_command("echo `whoami`").is_err());
    }

    #[test]
    fn rejects_embedded_newline() {
        assert!(check_command("echo a\nrm -rf /").is_err());
    }

    #[test]
    fn chained_segments_each_checked() {
        assert!(check_command("git status && rm -rf /").is_err());
        assert!(check_command("git status && git log").is_ok());
    }

    #[test]
    fn chain_segment_with_disallowed_binary_rejected() {
        assert!(check_command("ls; perl -e 1").is_err());
    }

    #[test]
    fn sudo_is_blocked_even_though_not_on_whitelist_path() {
        let err = check_command("sudo apt-get install vim").unwrap_err();
        assert!(err.contains("privilege escalation"));
    }

    #[test]
    fn confine_cwd_allows_tmp() {
        let tmp = std::env::temp_dir();
        let root = std::path::Path::new("/nonexistent-workspace-root");
        assert!(confine_cwd(&tmp, root).is_ok());
    }

    #[test]
    fn confine_cwd_rejects_outside_paths() {
        let root = std::env::temp_dir().join("workspace-root-for-test");
        std::fs::create_dir_all(&root).unwrap();
        let outside = std::path::Path::new("/usr");
        assert!(confine_cwd(outside, &root).is_err());
    }
}
