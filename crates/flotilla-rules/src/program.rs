//! External program invocation: allow-list enforcement and argument
//! template expansion.

use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};

use flotilla_core::TorrentView;
use flotilla_data::ProgramRecord;
use tracing::info;

use crate::error::{RuleError, RuleResult};

/// Check a program path against the administrator allow-list and return
/// the canonical executable path.
///
/// Membership is by exact canonical path or canonical directory prefix;
/// canonicalization resolves symlinks, so a link pointing outside the
/// allow-list is rejected.
///
/// # Errors
///
/// Returns a validation error for relative paths, `..` components,
/// unresolvable paths, and paths outside the allow-list.
pub fn verify_allowed(path: &Path, allow_list: &[PathBuf]) -> RuleResult<PathBuf> {
    if !path.is_absolute() {
        return Err(RuleError::invalid(format!(
            "program path {} must be absolute",
            path.display()
        )));
    }
    if path
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(RuleError::invalid(format!(
            "program path {} must not contain \"..\"",
            path.display()
        )));
    }
    if allow_list.is_empty() {
        return Err(RuleError::invalid(
            "no external programs are allowed; the allow-list is empty",
        ));
    }
    let canonical = path.canonicalize().map_err(|err| {
        RuleError::invalid(format!(
            "program path {} cannot be resolved: {err}",
            path.display()
        ))
    })?;
    for entry in allow_list {
        let Ok(allowed) = entry.canonicalize() else {
            continue;
        };
        if canonical == allowed || canonical.starts_with(&allowed) {
            return Ok(canonical);
        }
    }
    Err(RuleError::invalid(format!(
        "program path {} is not in the allow-list",
        path.display()
    )))
}

/// Expand `${field}` placeholders in an argument template.
#[must_use]
pub fn expand_template(template: &str, view: &TorrentView) -> String {
    let tags = view.tags.iter().cloned().collect::<Vec<_>>().join(",");
    template
        .replace("${hash}", &view.hash)
        .replace("${name}", &view.name)
        .replace("${save_path}", &view.save_path)
        .replace("${content_path}", &view.content_path)
        .replace("${category}", &view.category)
        .replace("${tags}", &tags)
        .replace("${tracker}", &view.tracker)
        .replace("${tracker_domain}", &view.tracker_domain)
        .replace("${size}", &view.size.to_string())
        .replace("${ratio}", &format!("{:.3}", view.ratio))
}

/// Launch a program for one torrent. Fire-and-forget: only start success
/// is observed.
///
/// # Errors
///
/// Returns an error when the path fails the allow-list or the process
/// cannot be spawned.
pub(crate) fn launch(
    program: &ProgramRecord,
    view: &TorrentView,
    allow_list: &[PathBuf],
) -> RuleResult<()> {
    let executable = verify_allowed(Path::new(&program.path), allow_list)?;
    let expanded = expand_template(&program.args_template, view);
    let args: Vec<&str> = expanded.split_whitespace().collect();

    let mut command = match program.execution_mode.as_str() {
        "terminal" if cfg!(target_os = "linux") => {
            let mut c = Command::new("x-terminal-emulator");
            c.arg("-e").arg(&executable).args(&args);
            c
        }
        "start" if cfg!(windows) => {
            let mut c = Command::new("cmd");
            c.arg("/C").arg("start").arg(&executable).args(&args);
            c
        }
        _ => {
            // `background` and `direct` both detach; the distinction only
            // matters for console inheritance.
            let mut c = Command::new(&executable);
            c.args(&args);
            c
        }
    };
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let child = command.spawn().map_err(|err| RuleError::ProgramFailed {
        reason: format!("{}: {err}", executable.display()),
    })?;
    info!(
        program = %program.name,
        pid = child.id(),
        hash = %view.hash,
        "external program started"
    );
    Ok(())
}
