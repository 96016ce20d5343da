use anyhow::{bail, Context, Result};
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_DBFILENAME: &str = "dump.rdb";

/// Startup options. Unknown flags are skipped without complaint so
/// newer front ends can pass flags this build does not know yet;
/// known flags with a bad or missing value are hard errors.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub dir: String,
    pub dbfilename: String,
    pub port: u16,
    pub replicaof: Option<(String, u16)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir().to_string_lossy().into_owned(),
            dbfilename: DEFAULT_DBFILENAME.to_string(),
            port: DEFAULT_PORT,
            replicaof: None,
        }
    }
}

impl ServerConfig {
    pub fn from_args<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let args: Vec<String> = args.into_iter().collect();
        let mut config = Self::default();
        let mut arg_index = 0;

        while arg_index < args.len() {
            match args[arg_index].as_str() {
                "--dir" => {
                    config.dir = Self::take_value(&args, arg_index, "--dir")?;
                    arg_index += 2;
                }
                "--dbfilename" => {
                    config.dbfilename = Self::take_value(&args, arg_index, "--dbfilename")?;
                    arg_index += 2;
                }
                "--port" => {
                    let value = Self::take_value(&args, arg_index, "--port")?;
                    config.port = value
                        .parse::<u16>()
                        .with_context(|| format!("invalid port '{}'", value))?;
                    arg_index += 2;
                }
                "--replicaof" => {
                    let value = Self::take_value(&args, arg_index, "--replicaof")?;
                    let mut parts = value.split_whitespace();
                    let host = parts.next();
                    let port = parts.next().and_then(|p| p.parse::<u16>().ok());
                    match (host, port, parts.next()) {
                        (Some(host), Some(port), None) => {
                            config.replicaof = Some((host.to_string(), port));
                        }
                        _ => bail!(
                            "--replicaof expects a host and port (e.g. 'localhost 6379'), got '{}'",
                            value
                        ),
                    }
                    arg_index += 2;
                }
                _ => arg_index += 1,
            }
        }

        Ok(config)
    }

    fn take_value(args: &[String], index: usize, flag: &str) -> Result<String> {
        match args.get(index + 1) {
            Some(value) => Ok(value.clone()),
            None => bail!("{} option requires an argument", flag),
        }
    }

    pub fn rdb_path(&self) -> PathBuf {
        PathBuf::from(&self.dir).join(&self.dbfilename)
    }

    /// Lookup for CONFIG GET; values come back as the stored text.
    pub fn get(&self, name: &str) -> Option<String> {
        match name.to_lowercase().as_str() {
            "dir" => Some(self.dir.clone()),
            "dbfilename" => Some(self.dbfilename.clone()),
            "port" => Some(self.port.to_string()),
            _ => None,
        }
    }
}
