use std::path::{Path, PathBuf};

pub const SHUTTLE_DIR: &str = ".shuttle";
pub const CONFIG_FILE: &str = "config.yaml";
pub const REGISTRY_FILE: &str = "tracked_files.txt";

/// Suffix of every temp sibling written before an atomic rename.
pub const TMP_SUFFIX: &str = ".shuttle.tmp";

pub fn shuttle_root(home: &Path) -> PathBuf {
    home.join(SHUTTLE_DIR)
}

pub fn config_path(home: &Path) -> PathBuf {
    shuttle_root(home).join(CONFIG_FILE)
}

pub fn registry_path(home: &Path) -> PathBuf {
    shuttle_root(home).join(REGISTRY_FILE)
}

pub fn default_store_dir(home: &Path) -> PathBuf {
    shuttle_root(home).join("store")
}

pub fn default_staging_dir(home: &Path) -> PathBuf {
    shuttle_root(home).join("unsaved")
}

pub fn default_sync_dir(home: &Path) -> PathBuf {
    home.join("Documents").join("ShuttleSync")
}

/// `<dir>/.<name>.shuttle.tmp`: hidden sibling used for atomic writes.
pub fn tmp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}{TMP_SUFFIX}"))
}

pub fn is_tmp_artifact(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(TMP_SUFFIX))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tmp_sibling_is_hidden_and_recognised() {
        let tmp = tmp_sibling(Path::new("/work/notes.txt"));
        assert_eq!(tmp, PathBuf::from("/work/.notes.txt.shuttle.tmp"));
        assert!(is_tmp_artifact(&tmp));
        assert!(!is_tmp_artifact(Path::new("/work/notes.txt")));
    }
}
