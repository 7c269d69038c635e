//! # Patch Applier
//!
//! Parses and applies the `apply_patch` envelope that models emit for file edits:
//!
//! ```text
//! *** Begin Patch
//! *** Add File: path
//! +line
//! *** Delete File: path
//! *** Update File: path
//! *** Move to: new/path
//! @@ optional anchor
//!  context
//! -removed
//! +added
//! *** End Patch
//! ```
//!
//! Every change is computed before anything is written, so a hunk that fails to match leaves
//! the tree untouched.

use std::path::{Path, PathBuf};
use thiserror::Error;

use super::workspace::{Workspace, WorkspaceError};

const BEGIN_PATCH: &str = "*** Begin Patch";
const END_PATCH: &str = "*** End Patch";
const ADD_FILE: &str = "*** Add File: ";
const DELETE_FILE: &str = "*** Delete File: ";
const UPDATE_FILE: &str = "*** Update File: ";
const MOVE_TO: &str = "*** Move to: ";
const END_OF_FILE: &str = "*** End of File";

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("invalid patch: {0}")]
    Invalid(String),

    #[error("invalid hunk at line {line}: {message}")]
    InvalidHunk { line: usize, message: String },

    #[error("Failed to find expected lines in {path}:\n{lines}")]
    ContextNotFound { path: String, lines: String },

    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub anchor: Option<String>,
    pub old_lines: Vec<String>,
    pub new_lines: Vec<String>,
    pub end_of_file: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Add {
        path: String,
        content: String,
    },
    Delete {
        path: String,
    },
    Update {
        path: String,
        move_to: Option<String>,
        hunks: Vec<Hunk>,
    },
}

impl FileChange {
    pub fn path(&self) -> &str {
        match self {
            FileChange::Add { path, .. }
            | FileChange::Delete { path }
            | FileChange::Update { path, .. } => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub changes: Vec<FileChange>,
}

impl Patch {
    /// Paths touched by the patch, in patch order.
    pub fn paths(&self) -> Vec<String> {
        self.changes.iter().map(|c| c.path().to_string()).collect()
    }
}

/// Files changed by a successful application, grouped the way the summary prints them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PatchSummary {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl PatchSummary {
    pub fn render(&self) -> String {
        let mut out = String::from("Success. Updated the following files:\n");
        for path in &self.added {
            out.push_str(&format!("A {path}\n"));
        }
        for path in &self.modified {
            out.push_str(&format!("M {path}\n"));
        }
        for path in &self.deleted {
            out.push_str(&format!("D {path}\n"));
        }
        out
    }
}

/// True when `text` looks like a patch envelope.
pub fn is_patch(text: &str) -> bool {
    text.trim_start().starts_with(BEGIN_PATCH)
}

pub fn parse_patch(text: &str) -> Result<Patch, PatchError> {
    let lines: Vec<&str> = text.trim().lines().collect();
    match (lines.first(), lines.last()) {
        (Some(first), Some(last))
            if first.trim() == BEGIN_PATCH && last.trim() == END_PATCH && lines.len() >= 2 => {}
        (Some(first), _) if first.trim() != BEGIN_PATCH => {
            return Err(PatchError::Invalid(format!(
                "the first line must be '{BEGIN_PATCH}'"
            )));
        }
        _ => {
            return Err(PatchError::Invalid(format!(
                "the last line must be '{END_PATCH}'"
            )));
        }
    }

    let body = &lines[1..lines.len() - 1];
    let mut changes = Vec::new();
    let mut i = 0;
    while i < body.len() {
        let line = body[i];
        let line_no = i + 2;

        if let Some(path) = line.strip_prefix(ADD_FILE) {
            i += 1;
            let mut content = String::new();
            while i < body.len() {
                let Some(added) = body[i].strip_prefix('+') else {
                    break;
                };
                content.push_str(added);
                content.push('\n');
                i += 1;
            }
            changes.push(FileChange::Add {
                path: path.trim().to_string(),
                content,
            });
        } else if let Some(path) = line.strip_prefix(DELETE_FILE) {
            i += 1;
            changes.push(FileChange::Delete {
                path: path.trim().to_string(),
            });
        } else if let Some(path) = line.strip_prefix(UPDATE_FILE) {
            i += 1;
            let mut move_to = None;
            if let Some(target) = body.get(i).and_then(|l| l.strip_prefix(MOVE_TO)) {
                move_to = Some(target.trim().to_string());
                i += 1;
            }
            let (hunks, consumed) = parse_hunks(&body[i..], i + 2)?;
            if hunks.is_empty() {
                return Err(PatchError::InvalidHunk {
                    line: line_no,
                    message: format!("update of '{}' has no hunks", path.trim()),
                });
            }
            i += consumed;
            changes.push(FileChange::Update {
                path: path.trim().to_string(),
                move_to,
                hunks,
            });
        } else if line.trim().is_empty() {
            i += 1;
        } else {
            return Err(PatchError::InvalidHunk {
                line: line_no,
                message: format!("'{line}' is not a valid file operation"),
            });
        }
    }

    Ok(Patch { changes })
}

/// Parses hunks until the next file operation. Returns the hunks and the lines consumed.
fn parse_hunks(lines: &[&str], first_line_no: usize) -> Result<(Vec<Hunk>, usize), PatchError> {
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current: Option<Hunk> = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if line.starts_with("*** ") && line != END_OF_FILE {
            break;
        }

        if let Some(anchor) = line.strip_prefix("@@") {
            if let Some(done) = current.take() {
                hunks.push(done);
            }
            let anchor = anchor.trim();
            current = Some(Hunk {
                anchor: (!anchor.is_empty()).then(|| anchor.to_string()),
                old_lines: Vec::new(),
                new_lines: Vec::new(),
                end_of_file: false,
            });
            i += 1;
            continue;
        }

        let hunk = current.get_or_insert_with(|| Hunk {
            anchor: None,
            old_lines: Vec::new(),
            new_lines: Vec::new(),
            end_of_file: false,
        });

        if line == END_OF_FILE {
            hunk.end_of_file = true;
        } else if let Some(context) = line.strip_prefix(' ') {
            hunk.old_lines.push(context.to_string());
            hunk.new_lines.push(context.to_string());
        } else if line.is_empty() {
            hunk.old_lines.push(String::new());
            hunk.new_lines.push(String::new());
        } else if let Some(removed) = line.strip_prefix('-') {
            hunk.old_lines.push(removed.to_string());
        } else if let Some(added) = line.strip_prefix('+') {
            hunk.new_lines.push(added.to_string());
        } else {
            return Err(PatchError::InvalidHunk {
                line: first_line_no + i,
                message: format!("unexpected line '{line}'"),
            });
        }
        i += 1;
    }

    if let Some(done) = current.take() {
        hunks.push(done);
    }
    Ok((hunks, i))
}

enum PendingWrite {
    Put { path: PathBuf, content: String },
    Remove { path: PathBuf },
}

/// Resolves every path the patch touches, failing on the first one outside `workspace`.
pub fn confine_paths(
    patch: &Patch,
    cwd: &Path,
    workspace: &Workspace,
) -> Result<Vec<PathBuf>, PatchError> {
    let targets = patch.changes.iter().flat_map(|change| match change {
        FileChange::Update {
            path,
            move_to: Some(dest),
            ..
        } => vec![path.as_str(), dest.as_str()],
        other => vec![other.path()],
    });
    targets
        .map(|path| Ok(workspace.confine(cwd, Path::new(path))?))
        .collect()
}

/// Applies `patch` with relative paths resolved against `cwd`. Targets outside `workspace`
/// fail the whole patch before anything is written.
pub fn apply_patch(
    patch: &Patch,
    cwd: &Path,
    workspace: &Workspace,
) -> Result<PatchSummary, PatchError> {
    let resolve = |path: &str| workspace.confine(cwd, Path::new(path));
    let mut writes = Vec::new();
    let mut summary = PatchSummary::default();

    for change in &patch.changes {
        match change {
            FileChange::Add { path, content } => {
                writes.push(PendingWrite::Put {
                    path: resolve(path)?,
                    content: content.clone(),
                });
                summary.added.push(path.clone());
            }
            FileChange::Delete { path } => {
                let target = resolve(path)?;
                if !target.is_file() {
                    return Err(PatchError::Io {
                        action: "delete",
                        path: path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "file does not exist",
                        ),
                    });
                }
                writes.push(PendingWrite::Remove { path: target });
                summary.deleted.push(path.clone());
            }
            FileChange::Update {
                path,
                move_to,
                hunks,
            } => {
                let source = resolve(path)?;
                let original =
                    std::fs::read_to_string(&source).map_err(|source| PatchError::Io {
                        action: "read",
                        path: path.clone(),
                        source,
                    })?;
                let updated = apply_hunks(&original, hunks, path)?;
                match move_to {
                    Some(dest) => {
                        writes.push(PendingWrite::Put {
                            path: resolve(dest)?,
                            content: updated,
                        });
                        writes.push(PendingWrite::Remove { path: source });
                        summary.modified.push(dest.clone());
                    }
                    None => {
                        writes.push(PendingWrite::Put {
                            path: source,
                            content: updated,
                        });
                        summary.modified.push(path.clone());
                    }
                }
            }
        }
    }

    for write in writes {
        match write {
            PendingWrite::Put { path, content } => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|source| PatchError::Io {
                        action: "create directory",
                        path: parent.display().to_string(),
                        source,
                    })?;
                }
                std::fs::write(&path, content).map_err(|source| PatchError::Io {
                    action: "write",
                    path: path.display().to_string(),
                    source,
                })?;
            }
            PendingWrite::Remove { path } => {
                std::fs::remove_file(&path).map_err(|source| PatchError::Io {
                    action: "delete",
                    path: path.display().to_string(),
                    source,
                })?;
            }
        }
    }

    tracing::debug!(
        added = summary.added.len(),
        modified = summary.modified.len(),
        deleted = summary.deleted.len(),
        "patch applied"
    );
    Ok(summary)
}

fn apply_hunks(original: &str, hunks: &[Hunk], path: &str) -> Result<String, PatchError> {
    let mut lines: Vec<String> = original.lines().map(str::to_string).collect();
    let mut cursor = 0;

    for hunk in hunks {
        if let Some(anchor) = &hunk.anchor {
            if let Some(found) = find_sequence(&lines, std::slice::from_ref(anchor), cursor, false) {
                cursor = found + 1;
            }
        }

        if hunk.old_lines.is_empty() {
            let at = lines.len();
            lines.splice(at..at, hunk.new_lines.iter().cloned());
            cursor = lines.len();
            continue;
        }

        let start = find_sequence(&lines, &hunk.old_lines, cursor, hunk.end_of_file).ok_or_else(
            || PatchError::ContextNotFound {
                path: path.to_string(),
                lines: hunk.old_lines.join("\n"),
            },
        )?;
        let end = start + hunk.old_lines.len();
        lines.splice(start..end, hunk.new_lines.iter().cloned());
        cursor = start + hunk.new_lines.len();
    }

    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    Ok(out)
}

/// Finds `needle` in `lines` at or after `from`: exact first, then ignoring trailing and
/// surrounding whitespace. With `at_end` the match must finish on the last line.
fn find_sequence(lines: &[String], needle: &[String], from: usize, at_end: bool) -> Option<usize> {
    if needle.len() > lines.len() {
        return None;
    }
    let last_start = lines.len() - needle.len();
    let candidates: Vec<usize> = if at_end {
        vec![last_start]
    } else {
        (from.min(last_start + 1)..=last_start).collect()
    };

    let normalizers: [fn(&str) -> &str; 3] = [|s| s, str::trim_end, str::trim];
    normalizers.iter().find_map(|normalize| {
        candidates.iter().copied().find(|&start| {
            needle
                .iter()
                .zip(&lines[start..start + needle.len()])
                .all(|(want, have)| normalize(want.as_str()) == normalize(have.as_str()))
        })
    })
}
