use softlayer_cpi_core::{Error, Result, ResultExt};
use std::path::PathBuf;
use tracing::info;

/// Hosts file of the machine running the CPI.
pub const DEFAULT_ETC_HOSTS_PATH: &str = "/etc/hosts";

/// Rewrites the local hosts file so a bootstrapping director resolves the new VM.
#[derive(Debug, Clone)]
pub struct EtcHosts {
    path: PathBuf,
}

impl Default for EtcHosts {
    fn default() -> Self {
        Self::new(DEFAULT_ETC_HOSTS_PATH)
    }
}

impl EtcHosts {
    /// Hosts file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Replace the file with localhost and `ip  fqdn`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be written.
    pub async fn update(&self, ip: &str, fqdn: &str) -> Result<()> {
        let contents = format!("127.0.0.1 localhost\n{ip}  {fqdn}\n");
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(Error::from)
            .with_context(|| format!("Writing {}", self.path.display()))?;
        info!(path = %self.path.display(), ip, fqdn, "Updated hosts file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_writes_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts");
        std::fs::write(&path, "stale\n").unwrap();

        EtcHosts::new(&path)
            .update("10.112.172.4", "bosh-0.softlayer.com")
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "127.0.0.1 localhost\n10.112.172.4  bosh-0.softlayer.com\n"
        );
    }

    #[tokio::test]
    async fn test_update_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = EtcHosts::new(dir.path().join("missing").join("hosts"))
            .update("10.0.0.1", "x")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Writing"));
    }
}
