//! Filesystem, archive and command primitives.
//!
//! The lifecycle manager never touches the filesystem directly; it goes
//! through [`SystemOperations`] so tests can point it at a temp directory and
//! so the archive formats live in one place.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::process::Command;

/// Capability interface for OS-level operations.
pub trait SystemOperations: Send + Sync {
    /// Create a directory and its parents.
    fn create_dir(&self, path: &Path) -> Result<()>;

    /// Delete a directory tree. Missing directories are not an error.
    fn delete_dir(&self, path: &Path) -> Result<()>;

    /// Whether a directory exists.
    fn dir_exists(&self, path: &Path) -> bool;

    /// Whether a regular file exists.
    fn file_exists(&self, path: &Path) -> bool;

    /// Write a file, creating parent directories.
    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()>;

    /// Extract an archive into `destination`.
    fn extract_archive(&self, archive: &Path, destination: &Path) -> Result<()>;

    /// Run a shell command in `cwd` and fail on a non-zero exit.
    fn run_shell(&self, command: &str, cwd: &Path) -> Result<()>;
}

/// Archive formats understood by [`LocalSystemOperations::extract_archive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// `.zip`
    Zip,
    /// `.tar`
    Tar,
    /// `.tar.gz` / `.tgz`
    TarGz,
    /// `.tar.zst` / `.tzst`
    TarZstd,
}

impl ArchiveKind {
    /// Detect the archive kind from a file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Some(Self::TarZstd)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// [`SystemOperations`] backed by the local filesystem.
#[derive(Debug, Default, Clone)]
pub struct LocalSystemOperations;

impl LocalSystemOperations {
    /// Create a new instance.
    pub fn new() -> Self {
        Self
    }
}

impl SystemOperations for LocalSystemOperations {
    fn create_dir(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)?;
        Ok(())
    }

    fn delete_dir(&self, path: &Path) -> Result<()> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn dir_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        Ok(())
    }

    fn extract_archive(&self, archive: &Path, destination: &Path) -> Result<()> {
        let kind = ArchiveKind::from_path(archive).ok_or_else(|| {
            Error::command_failed(
                "extract",
                format!("unsupported archive type: {}", archive.display()),
            )
        })?;

        std::fs::create_dir_all(destination)?;
        tracing::debug!(
            archive = %archive.display(),
            destination = %destination.display(),
            kind = ?kind,
            "extracting archive"
        );

        let file = File::open(archive)?;
        match kind {
            ArchiveKind::Tar => tar::Archive::new(file).unpack(destination)?,
            ArchiveKind::TarZstd => {
                let decoder = zstd::stream::read::Decoder::new(file)?;
                tar::Archive::new(decoder).unpack(destination)?;
            }
            ArchiveKind::TarGz => tar::Archive::new(GzDecoder::new(file)).unpack(destination)?,
            ArchiveKind::Zip => {
                let mut zip = zip::ZipArchive::new(file)
                    .map_err(|e| Error::command_failed("extract", e.to_string()))?;
                zip.extract(destination)
                    .map_err(|e| Error::command_failed("extract", e.to_string()))?;
            }
        }
        Ok(())
    }

    fn run_shell(&self, command: &str, cwd: &Path) -> Result<()> {
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .status()
            .map_err(|e| Error::command_failed(command, e.to_string()))?;
        if !status.success() {
            return Err(Error::command_failed(command, format!("exited with {}", status)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_kind_detection() {
        let cases = [
            ("assets.zip", Some(ArchiveKind::Zip)),
            ("ASSETS.ZIP", Some(ArchiveKind::Zip)),
            ("game.tar", Some(ArchiveKind::Tar)),
            ("game.tar.gz", Some(ArchiveKind::TarGz)),
            ("game.tgz", Some(ArchiveKind::TarGz)),
            ("game.tar.zst", Some(ArchiveKind::TarZstd)),
            ("game.exe", None),
        ];
        for (name, expected) in cases {
            assert_eq!(ArchiveKind::from_path(Path::new(name)), expected, "{}", name);
        }
    }

    #[test]
    fn test_extract_tar() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("assets.tar");

        {
            let file = File::create(&archive_path).unwrap();
            let mut builder = tar::Builder::new(file);
            let data = b"map data";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "maps/level1.dat", &data[..])
                .unwrap();
            builder.finish().unwrap();
        }

        let ops = LocalSystemOperations::new();
        let destination = dir.path().join("out");
        ops.extract_archive(&archive_path, &destination).unwrap();

        let extracted = std::fs::read(destination.join("maps/level1.dat")).unwrap();
        assert_eq!(extracted, b"map data");
    }

    #[test]
    fn test_extract_tar_gz() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("assets.tar.gz");

        {
            let file = File::create(&archive_path).unwrap();
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let data = b"gz map";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "maps/level2.dat", &data[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let ops = LocalSystemOperations::new();
        let destination = dir.path().join("out");
        ops.extract_archive(&archive_path, &destination).unwrap();
        assert_eq!(std::fs::read(destination.join("maps/level2.dat")).unwrap(), b"gz map");
    }

    #[test]
    fn test_extract_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("game.zip");

        {
            let file = File::create(&archive_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            writer.start_file("bin/server.cfg", options).unwrap();
            writer.write_all(b"port=7777").unwrap();
            writer.finish().unwrap();
        }

        let ops = LocalSystemOperations::new();
        let destination = dir.path().join("out");
        ops.extract_archive(&archive_path, &destination).unwrap();
        assert_eq!(
            std::fs::read_to_string(destination.join("bin/server.cfg")).unwrap(),
            "port=7777"
        );
    }

    #[test]
    fn test_corrupt_zip_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("broken.zip");
        std::fs::write(&archive_path, b"not a zip").unwrap();

        let ops = LocalSystemOperations::new();
        assert!(matches!(
            ops.extract_archive(&archive_path, &dir.path().join("out")),
            Err(Error::CommandFailed { .. })
        ));
    }

    #[test]
    fn test_delete_missing_dir_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let ops = LocalSystemOperations::new();
        assert!(ops.delete_dir(&dir.path().join("never-created")).is_ok());
    }

    #[test]
    fn test_write_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let ops = LocalSystemOperations::new();
        let path = dir.path().join("a/b/c.json");
        ops.write_file(&path, b"{}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_run_shell_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ops = LocalSystemOperations::new();
        assert!(ops.run_shell("true", dir.path()).is_ok());
        assert!(matches!(
            ops.run_shell("exit 3", dir.path()),
            Err(Error::CommandFailed { .. })
        ));
    }
}
