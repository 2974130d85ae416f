// Game storage paths and download bundle assembly.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

// Manifest files shipped to players alongside the client tree. The server
// tree stays on the lobby host.
const BUNDLE_FILES: [&str; 3] = ["config.json", "pyproject.toml", "uv.lock"];

/// `<storage>/<ownerUserId>/<gameName>/<versionString>`
pub fn version_dir(storage: &Path, owner_id: i64, game_name: &str, version: &str) -> PathBuf {
    storage
        .join(owner_id.to_string())
        .join(game_name)
        .join(version)
}

/// Packs the client subset of an installed game version into a fresh zip
/// under `temp_root` and returns the archive path. The caller removes the
/// archive after streaming it out.
pub fn build_client_bundle(version_dir: &Path, temp_root: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(temp_root)?;
    let zip_path = temp_root.join(format!("{}.zip", Uuid::new_v4()));
    let file = fs::File::create(&zip_path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    for name in BUNDLE_FILES {
        let path = version_dir.join(name);
        if !path.is_file() {
            continue;
        }
        zip.start_file(name, options).map_err(io::Error::other)?;
        io::copy(&mut fs::File::open(&path)?, &mut zip)?;
    }

    let client_dir = version_dir.join("client");
    if client_dir.is_dir() {
        for entry in WalkDir::new(&client_dir) {
            let entry = entry.map_err(io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(version_dir)
                .map_err(io::Error::other)?;
            let entry_name = relative.to_string_lossy().replace('\\', "/");
            zip.start_file(entry_name, options).map_err(io::Error::other)?;
            io::copy(&mut fs::File::open(entry.path())?, &mut zip)?;
        }
    }

    zip.finish().map_err(io::Error::other)?;
    Ok(zip_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_version_dir(root: &Path) -> PathBuf {
        let version = root.join("3").join("mine").join("0.0.2");
        fs::create_dir_all(version.join("client").join("assets")).expect("mkdir");
        fs::create_dir_all(version.join("server")).expect("mkdir");
        fs::write(version.join("config.json"), b"{\"name\": \"mine\"}").expect("write");
        fs::write(version.join("pyproject.toml"), b"[project]\n").expect("write");
        fs::write(version.join("client").join("client_main.py"), b"print('c')\n").expect("write");
        fs::write(version.join("client").join("assets").join("board.txt"), b"#").expect("write");
        fs::write(version.join("server").join("server_main.py"), b"print('s')\n").expect("write");
        version
    }

    #[test]
    fn bundle_contains_client_tree_and_manifests_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let version = fake_version_dir(temp.path());

        let zip_path =
            build_client_bundle(&version, &temp.path().join("scratch")).expect("bundle");

        let file = fs::File::open(&zip_path).expect("open zip");
        let mut archive = zip::ZipArchive::new(file).expect("read zip");
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).expect("entry").name().to_string())
            .collect();

        assert!(names.contains(&"config.json".to_string()));
        assert!(names.contains(&"pyproject.toml".to_string()));
        assert!(names.contains(&"client/client_main.py".to_string()));
        assert!(names.contains(&"client/assets/board.txt".to_string()));
        assert!(names.iter().all(|n| !n.starts_with("server")));
    }

    #[test]
    fn missing_optional_manifests_are_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let version = fake_version_dir(temp.path());
        fs::remove_file(version.join("pyproject.toml")).expect("remove");

        let zip_path =
            build_client_bundle(&version, &temp.path().join("scratch")).expect("bundle");

        let file = fs::File::open(&zip_path).expect("open zip");
        let mut archive = zip::ZipArchive::new(file).expect("read zip");
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).expect("entry").name().to_string())
            .collect();
        assert!(!names.contains(&"pyproject.toml".to_string()));
        assert!(names.contains(&"config.json".to_string()));
    }

    #[test]
    fn version_dir_layout_matches_storage_contract() {
        let dir = version_dir(Path::new("uploaded_games"), 3, "mine", "0.0.2");
        assert_eq!(dir, Path::new("uploaded_games/3/mine/0.0.2"));
    }
}
