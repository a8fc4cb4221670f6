//! Incoming directories for received files.
//!
//! Every session holds a claim on one directory under the files root. Claims
//! are counted so that two sessions sharing a username also share
//! `files/<username>` without one teardown wiping the other's files.

use std::{
    collections::HashMap,
    io,
    path::{Component, Path, PathBuf},
};

use tokio::{
    fs::{self, File, OpenOptions},
    sync::Mutex,
};
use tracing::{debug, info};

use crate::error::DirectoryError;

pub struct Directories {
    root: PathBuf,
    claims: Mutex<HashMap<PathBuf, usize>>,
}

impl Directories {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            claims: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_for(&self, username: &str) -> Result<PathBuf, DirectoryError> {
        if !is_valid_username(username) {
            return Err(DirectoryError::InvalidPath(username.to_string()));
        }
        Ok(self.root.join(username))
    }

    /// Maps a user-supplied folder onto a path below the files root.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, DirectoryError> {
        let relative = Path::new(requested);
        let only_names = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        let has_name = relative
            .components()
            .any(|component| matches!(component, Component::Normal(_)));

        // A path of only `.` would name the files root itself.
        if !only_names || !has_name {
            return Err(DirectoryError::InvalidPath(requested.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Creates `dir` if needed and records one more holder for it.
    ///
    /// The claim is recorded even when creation fails, so the caller can
    /// release it unconditionally later.
    pub async fn claim(&self, dir: &Path) -> Result<(), DirectoryError> {
        let mut claims = self.claims.lock().await;
        *claims.entry(dir.to_path_buf()).or_insert(0) += 1;
        fs::create_dir_all(dir)
            .await
            .map_err(|err| DirectoryError::io(dir, err))
    }

    /// Drops one claim without touching the directory.
    pub async fn release(&self, dir: &Path) {
        let mut claims = self.claims.lock().await;
        drop_claim(&mut claims, dir);
    }

    /// Drops one claim and deletes the directory if nobody else holds it or
    /// anything below it.
    ///
    /// Returns whether the directory was removed.
    pub async fn release_and_remove(&self, dir: &Path) -> Result<bool, DirectoryError> {
        let mut claims = self.claims.lock().await;
        if drop_claim(&mut claims, dir) > 0 {
            debug!(dir = %dir.display(), "directory still held by another session");
            return Ok(false);
        }
        if claims.keys().any(|claimed| claimed.starts_with(dir)) {
            debug!(dir = %dir.display(), "directory contains another session's folder");
            return Ok(false);
        }

        // The claim table stays locked so a concurrent claim cannot recreate
        // the directory while it is being removed.
        match fs::remove_dir_all(dir).await {
            Ok(()) => {
                info!(dir = %dir.display(), "removed incoming directory");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(DirectoryError::io(dir, err)),
        }
    }
}

fn drop_claim(claims: &mut HashMap<PathBuf, usize>, dir: &Path) -> usize {
    let Some(count) = claims.get_mut(dir) else {
        return 0;
    };
    *count = count.saturating_sub(1);
    let left = *count;
    if left == 0 {
        claims.remove(dir);
    }
    left
}

pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && username != "."
        && username != ".."
        && !username
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == '\\')
}

/// Keeps only the final path component of a file name sent by a client.
pub fn sanitize_file_name(file_name: &str) -> Option<&str> {
    match Path::new(file_name).components().next_back() {
        Some(Component::Normal(name)) => name.to_str(),
        _ => None,
    }
}

/// Name for the `index`-th copy: `report(2).pdf`, `notes(1)`.
pub fn numbered_name(file_name: &str, index: usize) -> String {
    if index == 0 {
        return file_name.to_string();
    }
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => {
            let (stem, extension) = file_name.split_at(dot);
            format!("{stem}({index}){extension}")
        }
        _ => format!("{file_name}({index})"),
    }
}

/// Creates a new file in `dir`, picking the first name that is not taken.
pub async fn create_unique(dir: &Path, file_name: &str) -> Result<(String, File), DirectoryError> {
    fs::create_dir_all(dir)
        .await
        .map_err(|err| DirectoryError::io(dir, err))?;

    let mut index = 0;
    loop {
        let name = numbered_name(file_name, index);
        let path = dir.join(&name);
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => return Ok((name, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => index += 1,
            Err(err) => return Err(DirectoryError::io(path, err)),
        }
    }
}

/// File names in `dir`, sorted.
pub async fn list_files(dir: &Path) -> Result<Vec<String>, DirectoryError> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|err| DirectoryError::io(dir, err))?;

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| DirectoryError::io(dir, err))?
    {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_names_go_before_the_extension() {
        assert_eq!(numbered_name("report.pdf", 0), "report.pdf");
        assert_eq!(numbered_name("report.pdf", 1), "report(1).pdf");
        assert_eq!(numbered_name("archive.tar.gz", 2), "archive.tar(2).gz");
        assert_eq!(numbered_name("notes", 3), "notes(3)");
        assert_eq!(numbered_name(".bashrc", 1), ".bashrc(1)");
    }

    #[test]
    fn file_names_lose_their_directories() {
        assert_eq!(sanitize_file_name("photo.jpg"), Some("photo.jpg"));
        assert_eq!(sanitize_file_name("../../etc/passwd"), Some("passwd"));
        assert_eq!(sanitize_file_name("/tmp/x.bin"), Some("x.bin"));
        assert_eq!(sanitize_file_name(".."), None);
        assert_eq!(sanitize_file_name(""), None);
    }

    #[test]
    fn usernames_must_be_single_path_components() {
        assert!(is_valid_username("alice"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username(".."));
        assert!(!is_valid_username("a/b"));
        assert!(!is_valid_username("two words"));
    }

    #[test]
    fn resolve_stays_below_the_root() {
        let dirs = Directories::new("files");
        assert_eq!(
            dirs.resolve("shared/inbox").unwrap(),
            PathBuf::from("files/shared/inbox")
        );
        assert!(dirs.resolve("../outside").is_err());
        assert!(dirs.resolve("/etc").is_err());
        assert!(dirs.resolve("").is_err());
        assert!(dirs.resolve(".").is_err());
        assert!(dirs.resolve("./").is_err());
        assert!(dirs.resolve("././.").is_err());
        assert_eq!(dirs.resolve("./mine").unwrap(), PathBuf::from("files/./mine"));
    }

    #[tokio::test]
    async fn clashing_names_get_the_next_free_index() {
        let tmp = tempfile::tempdir().unwrap();
        let (first, _) = create_unique(tmp.path(), "a.txt").await.unwrap();
        let (second, _) = create_unique(tmp.path(), "a.txt").await.unwrap();
        let (third, _) = create_unique(tmp.path(), "a.txt").await.unwrap();

        assert_eq!(first, "a.txt");
        assert_eq!(second, "a(1).txt");
        assert_eq!(third, "a(2).txt");
        assert_eq!(
            list_files(tmp.path()).await.unwrap(),
            vec!["a(1).txt", "a(2).txt", "a.txt"]
        );
    }

    #[tokio::test]
    async fn shared_directory_survives_until_the_last_holder_leaves() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = Directories::new(tmp.path());
        let dir = dirs.default_for("bob").unwrap();

        dirs.claim(&dir).await.unwrap();
        dirs.claim(&dir).await.unwrap();
        assert!(!dirs.release_and_remove(&dir).await.unwrap());
        assert!(dir.exists());

        assert!(dirs.release_and_remove(&dir).await.unwrap());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn parent_folder_is_kept_while_a_nested_folder_is_held() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = Directories::new(tmp.path());
        let shared = dirs.resolve("shared").unwrap();
        let inbox = dirs.resolve("shared/inbox").unwrap();

        dirs.claim(&shared).await.unwrap();
        dirs.claim(&inbox).await.unwrap();
        assert!(!dirs.release_and_remove(&shared).await.unwrap());
        assert!(inbox.is_dir());

        assert!(dirs.release_and_remove(&inbox).await.unwrap());
        assert!(!inbox.exists());
        assert!(shared.exists());
    }

    #[tokio::test]
    async fn released_directory_is_kept_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = Directories::new(tmp.path());
        let dir = dirs.resolve("old").unwrap();

        dirs.claim(&dir).await.unwrap();
        dirs.release(&dir).await;
        assert!(dir.exists());
    }
}
