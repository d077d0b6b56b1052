use std::fs;
use std::path::Path;

use crate::config::AppConfig;
use crate::error::{AppError, Result};

pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<AppConfig> {
    let txt = fs::read_to_string(p)
        .map_err(|e| AppError::Config(format!("Failed to read config file: {e}")))?;
    let cfg: AppConfig = toml::from_str(&txt)
        .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;

    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &AppConfig) -> Result<()> {
    if cfg.servers.is_empty() {
        return Err(AppError::Config("at least one server is required".to_string()));
    }

    for (name, srv) in &cfg.servers {
        if srv.listen.is_empty() {
            return Err(AppError::Config(format!(
                "server '{name}': at least one listen address is required"
            )));
        }
        for policy in &srv.tls_connection_policies {
            if let Some(pair) = &policy.certificate {
                if !Path::new(&pair.cert_path).exists() {
                    return Err(AppError::Config(format!(
                        "server '{name}': certificate file not found: {}",
                        pair.cert_path
                    )));
                }
                if !Path::new(&pair.key_path).exists() {
                    return Err(AppError::Config(format!(
                        "server '{name}': key file not found: {}",
                        pair.key_path
                    )));
                }
            }
        }
    }

    Ok(())
}
