//! Git operations for the per-project archive.
//!
//! Each project owns one repository. Every mutating engine operation writes
//! its files into the working tree and lands exactly one commit with the
//! deterministic author identity [`ARCHIVE_AUTHOR`].

use crate::Result;
use git2::{Error as GitError, Oid, Repository, Signature, Tree};
use std::path::{Path, PathBuf};

/// Author name used for every archive commit.
pub const ARCHIVE_AUTHOR: &str = "swarm-archivist";
/// Author email used for every archive commit.
pub const ARCHIVE_EMAIL: &str = "archivist@swarm-mail.localhost";

/// Initializes or opens the repository at the given path.
///
/// Only this exact directory counts; a repository further up the tree is
/// ignored so project archives never alias their parents.
pub fn init_or_open_repo<P: AsRef<Path>>(path: P) -> Result<Repository> {
    let path_ref = path.as_ref();
    std::fs::create_dir_all(path_ref)?;
    let git_dir = path_ref.join(".git");
    if git_dir.exists() {
        Repository::open(path_ref).map_err(crate::Error::from)
    } else {
        Repository::init(path_ref).map_err(crate::Error::from)
    }
}

/// Opens an existing repository; fails if none exists.
pub fn open_repo<P: AsRef<Path>>(path: P) -> Result<Repository> {
    Repository::open(path).map_err(crate::Error::from)
}

fn create_commit(
    repo: &Repository,
    tree: &Tree,
    signature: &Signature,
    message: &str,
) -> Result<Oid> {
    let parent_commit_opt = find_last_commit(repo)?;
    let commit_oid = match parent_commit_opt {
        Some(ref parent) => {
            repo.commit(Some("HEAD"), signature, signature, message, tree, &[parent])?
        }
        None => repo.commit(Some("HEAD"), signature, signature, message, tree, &[])?,
    };
    Ok(commit_oid)
}

/// Write `content` to `rel_path` inside the working tree, creating parents.
pub fn write_workdir_file(repo: &Repository, rel_path: &Path, content: &str) -> Result<()> {
    let workdir = repo
        .workdir()
        .ok_or_else(|| GitError::from_str("repository has no working directory"))?;
    let full = workdir.join(rel_path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(full, content)?;
    Ok(())
}

/// Remove `rel_path` from the working tree if present.
pub fn remove_workdir_file(repo: &Repository, rel_path: &Path) -> Result<()> {
    let workdir = repo
        .workdir()
        .ok_or_else(|| GitError::from_str("repository has no working directory"))?;
    let full = workdir.join(rel_path);
    if full.exists() {
        std::fs::remove_file(full)?;
    }
    Ok(())
}

/// Stage the given paths (adds and deletions) and create a single commit
/// with the archive author identity.
pub fn commit_paths<P: AsRef<Path>>(repo: &Repository, paths: &[P], message: &str) -> Result<Oid> {
    let workdir = repo
        .workdir()
        .ok_or_else(|| GitError::from_str("repository has no working directory"))?;

    let mut index = repo.index()?;
    for path in paths {
        let rel = path.as_ref();
        if workdir.join(rel).exists() {
            index.add_path(rel)?;
        } else {
            // Deletion of a path the index never saw is a no-op.
            let _ = index.remove_path(rel);
        }
    }
    let tree = repo.find_tree(index.write_tree()?)?;
    index.write()?;
    let signature = Signature::now(ARCHIVE_AUTHOR, ARCHIVE_EMAIL)?;

    create_commit(repo, &tree, &signature, message)
}

/// Convenience: write one file and commit it.
pub fn commit_file<P: AsRef<Path>>(
    repo: &Repository,
    rel_path: P,
    content: &str,
    message: &str,
) -> Result<Oid> {
    write_workdir_file(repo, rel_path.as_ref(), content)?;
    commit_paths(repo, &[rel_path.as_ref()], message)
}

/// Finds the last commit, or `None` for an empty repository.
fn find_last_commit(repo: &Repository) -> Result<Option<git2::Commit<'_>>> {
    match repo.head() {
        Ok(head) => {
            let obj = head.resolve()?.peel(git2::ObjectType::Commit)?;
            let commit = obj.into_commit().map_err(|obj_not_commit| {
                GitError::from_str(&format!("object is not a commit: {:?}", obj_not_commit.id()))
            })?;
            Ok(Some(commit))
        }
        Err(ref e)
            if e.code() == git2::ErrorCode::NotFound
                || e.code() == git2::ErrorCode::UnbornBranch =>
        {
            Ok(None)
        }
        Err(e) => Err(crate::Error::from(e)),
    }
}

/// Reads a file's content from HEAD (not the working directory).
pub fn read_file_content<P: AsRef<Path>>(repo: &Repository, file_path: P) -> Result<String> {
    let head = repo.head()?;
    let tree = head.peel_to_tree()?;
    let entry = tree.get_path(file_path.as_ref())?;
    let object = entry.to_object(repo)?;
    let blob = object
        .as_blob()
        .ok_or_else(|| GitError::from_str("object is not a blob"))?;
    Ok(String::from_utf8_lossy(blob.content()).into_owned())
}

/// List every blob path under `prefix` at HEAD.
///
/// The recovery pass uses this to enumerate archived messages, profiles and
/// claim files without touching the working directory.
pub fn list_tree_paths(repo: &Repository, prefix: &str) -> Result<Vec<PathBuf>> {
    let head = match repo.head() {
        Ok(head) => head,
        Err(ref e)
            if e.code() == git2::ErrorCode::NotFound
                || e.code() == git2::ErrorCode::UnbornBranch =>
        {
            return Ok(Vec::new());
        }
        Err(e) => return Err(crate::Error::from(e)),
    };
    let tree = head.peel_to_tree()?;

    let mut paths = Vec::new();
    tree.walk(git2::TreeWalkMode::PreOrder, |dir, entry| {
        if entry.kind() == Some(git2::ObjectType::Blob) {
            if let Some(name) = entry.name() {
                let full = format!("{}{}", dir, name);
                if full.starts_with(prefix) {
                    paths.push(PathBuf::from(full));
                }
            }
        }
        git2::TreeWalkResult::Ok
    })?;
    Ok(paths)
}
