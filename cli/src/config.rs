use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "forkful").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = data_dir.join("forkful.db");

        Ok(Config { db_path, data_dir })
    }

    /// Resolve the JWT signing secret: the `FORKFUL_JWT_SECRET` environment
    /// variable wins; otherwise a secret file in the data directory is read,
    /// generated on first run (random 32 bytes, hex, 0600 on unix).
    pub fn load_or_create_jwt_secret(&self) -> Result<String> {
        if let Ok(secret) = std::env::var("FORKFUL_JWT_SECRET") {
            let secret = secret.trim().to_string();
            if !secret.is_empty() {
                return Ok(secret);
            }
        }
        self.jwt_secret_from_file()
    }

    fn jwt_secret_from_file(&self) -> Result<String> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("jwt_secret");

        if path.exists() {
            let secret =
                std::fs::read_to_string(&path).context("Failed to read JWT secret file")?;
            let secret = secret.trim().to_string();
            if !secret.is_empty() {
                return Ok(secret);
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let secret = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &secret).context("Failed to write JWT secret file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set JWT secret file permissions")?;
        }
        tracing::info!(path = %path.display(), "generated new JWT secret");
        Ok(secret)
    }
}
