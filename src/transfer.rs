use std::{
    fs::{self, File},
    io::{BufReader, Write},
    net::{SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use glob::Pattern;
use log::{debug, info, warn};
use suppaftp::{types::FileType, FtpStream};

use crate::config::FtpConfig;

/// Remote file exchange. Directory names are relative to the remote root.
pub trait Transfer {
    /// Names in `remote_dir` matching a glob pattern, sorted.
    fn list(&self, remote_dir: &str, pattern: &str) -> Result<Vec<String>>;

    /// Contents of a remote file, `None` when it does not exist.
    fn fetch(&self, remote_dir: &str, name: &str) -> Result<Option<Vec<u8>>>;

    fn upload(&self, local: &Path, remote_dir: &str, remote_name: &str) -> Result<()>;

    fn remove(&self, remote_dir: &str, name: &str) -> Result<()>;

    /// Copies one remote file to `local`. Returns false when it is missing.
    fn download(&self, remote_dir: &str, name: &str, local: &Path) -> Result<bool> {
        match self.fetch(remote_dir, name)? {
            Some(bytes) => {
                fs::write(local, bytes)
                    .with_context(|| format!("Failed to write {}", local.display()))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Concatenates every remote file matching `pattern` into `local` and
    /// returns their names. `local` is always rewritten.
    fn download_matching(&self, remote_dir: &str, pattern: &str, local: &Path) -> Result<Vec<String>> {
        let names = self.list(remote_dir, pattern)?;
        let mut out = File::create(local)
            .with_context(|| format!("Failed to create {}", local.display()))?;
        for name in &names {
            if let Some(bytes) = self.fetch(remote_dir, name)? {
                out.write_all(&bytes)
                    .with_context(|| format!("Failed to write {}", local.display()))?;
            }
        }
        out.flush()?;
        debug!(
            "Downloaded {} files matching {}/{} into {}",
            names.len(),
            remote_dir,
            pattern,
            local.display()
        );
        Ok(names)
    }

    fn remove_matching(&self, remote_dir: &str, pattern: &str) -> Result<usize> {
        let names = self.list(remote_dir, pattern)?;
        for name in &names {
            self.remove(remote_dir, name)?;
            debug!("Removed remote file {}/{}", remote_dir, name);
        }
        Ok(names.len())
    }
}

fn filter_names(names: Vec<String>, pattern: &str) -> Result<Vec<String>> {
    let pattern = Pattern::new(pattern).with_context(|| format!("Invalid pattern: {}", pattern))?;
    let mut matched: Vec<String> = names
        .into_iter()
        .map(|n| n.rsplit('/').next().unwrap_or_default().to_string())
        .filter(|n| pattern.matches(n))
        .collect();
    matched.sort();
    matched.dedup();
    Ok(matched)
}

/// FTP endpoint. Every call opens its own session in binary mode and closes
/// it before returning.
pub struct FtpTransfer {
    config: FtpConfig,
}

impl FtpTransfer {
    pub fn new(config: FtpConfig) -> Self {
        FtpTransfer { config }
    }

    fn address(&self) -> Result<SocketAddr> {
        (self.config.host.as_str(), self.config.port)
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve FTP host {}", self.config.host))?
            .next()
            .ok_or_else(|| anyhow!("No address found for FTP host {}", self.config.host))
    }

    fn session<T>(&self, remote_dir: &str, op: impl FnOnce(&mut FtpStream) -> Result<T>) -> Result<T> {
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let mut ftp = FtpStream::connect_timeout(self.address()?, timeout)
            .with_context(|| format!("Failed to connect to FTP host {}", self.config.host))?;
        ftp.login(self.config.user.as_str(), self.config.passwd.as_str())
            .with_context(|| format!("FTP login failed for user {}", self.config.user))?;
        ftp.transfer_type(FileType::Binary)
            .context("Failed to switch FTP session to binary mode")?;
        if !remote_dir.is_empty() {
            ftp.cwd(remote_dir)
                .with_context(|| format!("Failed to change to remote directory {}", remote_dir))?;
        }

        let result = op(&mut ftp);
        if let Err(e) = ftp.quit() {
            debug!("FTP quit failed: {}", e);
        }
        result
    }
}

impl Transfer for FtpTransfer {
    fn list(&self, remote_dir: &str, pattern: &str) -> Result<Vec<String>> {
        let names = self.session(remote_dir, |ftp| {
            ftp.nlst(None)
                .with_context(|| format!("Failed to list remote directory {}", remote_dir))
        })?;
        filter_names(names, pattern)
    }

    fn fetch(&self, remote_dir: &str, name: &str) -> Result<Option<Vec<u8>>> {
        self.session(remote_dir, |ftp| match ftp.retr_as_buffer(name) {
            Ok(buffer) => Ok(Some(buffer.into_inner())),
            Err(e) => {
                debug!("Remote file {}/{} not retrieved: {}", remote_dir, name, e);
                Ok(None)
            }
        })
    }

    fn upload(&self, local: &Path, remote_dir: &str, remote_name: &str) -> Result<()> {
        let file = File::open(local)
            .with_context(|| format!("Failed to open {} for upload", local.display()))?;
        let mut reader = BufReader::new(file);
        let bytes = self.session(remote_dir, |ftp| {
            ftp.put_file(remote_name, &mut reader)
                .with_context(|| format!("Failed to upload {} to {}", remote_name, remote_dir))
        })?;
        info!("Uploaded {} to {}/{} ({} bytes)", local.display(), remote_dir, remote_name, bytes);
        Ok(())
    }

    fn remove(&self, remote_dir: &str, name: &str) -> Result<()> {
        self.session(remote_dir, |ftp| {
            ftp.rm(name)
                .with_context(|| format!("Failed to remove {}/{}", remote_dir, name))
        })
    }
}

/// Local directory standing in for the remote endpoint, used for dry runs.
pub struct DirectoryTransfer {
    root: PathBuf,
}

impl DirectoryTransfer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryTransfer { root: root.into() }
    }

    fn dir(&self, remote_dir: &str) -> PathBuf {
        self.root.join(remote_dir)
    }
}

impl Transfer for DirectoryTransfer {
    fn list(&self, remote_dir: &str, pattern: &str) -> Result<Vec<String>> {
        let dir = self.dir(remote_dir);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("Failed to read {}", dir.display()))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        filter_names(names, pattern)
    }

    fn fetch(&self, remote_dir: &str, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.dir(remote_dir).join(name);
        if !path.is_file() {
            return Ok(None);
        }
        fs::read(&path)
            .map(Some)
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    fn upload(&self, local: &Path, remote_dir: &str, remote_name: &str) -> Result<()> {
        let dir = self.dir(remote_dir);
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        fs::copy(local, dir.join(remote_name))
            .with_context(|| format!("Failed to copy {} into {}", local.display(), dir.display()))?;
        info!("Copied {} to {}/{}", local.display(), dir.display(), remote_name);
        Ok(())
    }

    fn remove(&self, remote_dir: &str, name: &str) -> Result<()> {
        let path = self.dir(remote_dir).join(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Nothing to remove at {}", path.display());
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_and_sorts_listing() {
        let names = vec![
            "SCIELO_ProcessedRecordIds_2.txt".to_string(),
            "reports/SCIELO_ProcessedRecordIds_1.txt".to_string(),
            "other.txt".to_string(),
        ];
        assert_eq!(
            filter_names(names, "SCIELO_ProcessedRecordIds*").unwrap(),
            vec![
                "SCIELO_ProcessedRecordIds_1.txt".to_string(),
                "SCIELO_ProcessedRecordIds_2.txt".to_string(),
            ]
        );
    }

    #[test]
    fn directory_transfer_round_trip() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let transfer = DirectoryTransfer::new(remote.path());

        let source = local.path().join("a.zip");
        fs::write(&source, b"zipdata").unwrap();
        transfer.upload(&source, "inbound", "a.zip").unwrap();
        assert_eq!(transfer.list("inbound", "*.zip").unwrap(), vec!["a.zip".to_string()]);

        let target = local.path().join("copy.zip");
        assert!(transfer.download("inbound", "a.zip", &target).unwrap());
        assert_eq!(fs::read(&target).unwrap(), b"zipdata");
        assert!(!transfer.download("inbound", "missing.zip", &target).unwrap());

        assert_eq!(transfer.remove_matching("inbound", "*").unwrap(), 1);
        assert!(transfer.list("inbound", "*").unwrap().is_empty());
    }

    #[test]
    fn download_matching_concatenates() {
        let remote = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        fs::create_dir_all(remote.path().join("controller")).unwrap();
        fs::write(remote.path().join("controller/takeoff_1.del"), "0001-0001\n").unwrap();
        fs::write(remote.path().join("controller/takeoff_2.del"), "S0002-00022019000100001\n").unwrap();
        fs::write(remote.path().join("controller/keepinto.txt"), "0003-0003\n").unwrap();

        let transfer = DirectoryTransfer::new(remote.path());
        let target = local.path().join("takeoff.txt");
        let names = transfer.download_matching("controller", "takeoff_*.del", &target).unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(
            fs::read_to_string(&target).unwrap(),
            "0001-0001\nS0002-00022019000100001\n"
        );

        let empty = transfer.download_matching("reports", "SCIELO_*", &target).unwrap();
        assert!(empty.is_empty());
        assert_eq!(fs::read_to_string(&target).unwrap(), "");
    }
}
