//! Output writer
//!
//! Each file is written to a temporary sibling and renamed into place, so a
//! reader never sees a partially written certificate or key.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::info;

use crate::{Error, Result};

/// Permissions applied to every output file (group and other can read)
#[cfg(unix)]
const OUTPUT_MODE: u32 = 0o644;

/// CA bundle to publish next to the certificate
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaBundle {
    /// File name inside the output directory
    pub name: String,
    /// Bundle contents
    pub contents: Vec<u8>,
}

/// Where the issued material is written
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputConfig {
    /// Target directory, usually a shared emptyDir
    pub directory: PathBuf,
    /// Certificate file name
    pub cert_name: String,
    /// Private key file name
    pub key_name: String,
    /// Optional CA bundle
    pub ca_bundle: Option<CaBundle>,
}

impl OutputConfig {
    /// Path of the certificate file
    pub fn cert_path(&self) -> PathBuf {
        self.directory.join(&self.cert_name)
    }

    /// Path of the key file
    pub fn key_path(&self) -> PathBuf {
        self.directory.join(&self.key_name)
    }
}

/// Write the certificate, private key and optional CA bundle
pub fn write_outputs(config: &OutputConfig, certificate: &[u8], private_key_pem: &[u8]) -> Result<()> {
    info!(
        directory = %config.directory.display(),
        "signing request approved, writing certificate and key"
    );

    write_file(&config.directory, &config.cert_name, certificate)?;
    write_file(&config.directory, &config.key_name, private_key_pem)?;
    if let Some(bundle) = &config.ca_bundle {
        write_file(&config.directory, &bundle.name, &bundle.contents)?;
    }
    Ok(())
}

fn write_file(directory: &Path, name: &str, contents: &[u8]) -> Result<()> {
    let path = directory.join(name);
    let failed = |e: &dyn std::fmt::Display| {
        Error::persistence(format!("failed to write {}: {}", path.display(), e))
    };

    let mut tmp = NamedTempFile::new_in(directory).map_err(|e| failed(&e))?;
    tmp.write_all(contents).map_err(|e| failed(&e))?;
    tmp.as_file().sync_all().map_err(|e| failed(&e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(OUTPUT_MODE))
            .map_err(|e| failed(&e))?;
    }

    tmp.persist(&path).map_err(|e| failed(&e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(directory: &Path) -> OutputConfig {
        OutputConfig {
            directory: directory.to_path_buf(),
            cert_name: "tls.crt".to_string(),
            key_name: "tls.key".to_string(),
            ca_bundle: None,
        }
    }

    #[test]
    fn writes_certificate_and_key() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());

        write_outputs(&cfg, b"CERTDATA", b"KEYDATA").unwrap();

        assert_eq!(fs::read(cfg.cert_path()).unwrap(), b"CERTDATA");
        assert_eq!(fs::read(cfg.key_path()).unwrap(), b"KEYDATA");
        assert!(!dir.path().join("ca.crt").exists());
    }

    #[test]
    fn writes_ca_bundle_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.ca_bundle = Some(CaBundle {
            name: "ca.crt".to_string(),
            contents: b"BUNDLE".to_vec(),
        });

        write_outputs(&cfg, b"CERTDATA", b"KEYDATA").unwrap();

        assert_eq!(fs::read(dir.path().join("ca.crt")).unwrap(), b"BUNDLE");
    }

    #[test]
    fn overwrites_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        fs::write(cfg.cert_path(), b"OLD").unwrap();

        write_outputs(&cfg, b"NEW", b"KEYDATA").unwrap();

        assert_eq!(fs::read(cfg.cert_path()).unwrap(), b"NEW");
    }

    #[test]
    fn leaves_no_temporary_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        write_outputs(&config(dir.path()), b"CERTDATA", b"KEYDATA").unwrap();

        let mut names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["tls.crt", "tls.key"]);
    }

    #[cfg(unix)]
    #[test]
    fn files_are_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        write_outputs(&cfg, b"CERTDATA", b"KEYDATA").unwrap();

        for path in [cfg.cert_path(), cfg.key_path()] {
            let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o644, "{}", path.display());
        }
    }

    #[test]
    fn missing_directory_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir.path().join("does-not-exist"));

        match write_outputs(&cfg, b"CERTDATA", b"KEYDATA") {
            Err(Error::Persistence(msg)) => assert!(msg.contains("tls.crt")),
            other => panic!("Expected Persistence, got {other:?}"),
        }
    }
}
