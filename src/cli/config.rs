use crate::config::generate::generate_starter_config;
use std::fs;
use std::path::{Path, PathBuf};

/// Write the starter config to the user config location, or stdout
pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    let config_path = default_config_path();
    write_config(&config_content, &config_path)?;
    println!("Config file written to {}", config_path.display());
    Ok(())
}

/// ~/.config/sensestream/config.yml when a home directory exists,
/// /etc/sensestream/config.yml otherwise
fn default_config_path() -> PathBuf {
    match dirs::home_dir() {
        Some(home_dir) => home_dir.join(".config/sensestream/config.yml"),
        None => PathBuf::from("/etc/sensestream/config.yml"),
    }
}

fn write_config(config_content: &str, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!(
            "config file already exists at {}\nRemove it first or use --stdout to print the config",
            path.display()
        )
        .into());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create directory {}: {}", parent.display(), e))?;
    }

    fs::write(path, config_content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_config_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/sensestream/config.yml");

        write_config("snowflake: {}\n", &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "snowflake: {}\n");
    }

    #[test]
    fn test_write_config_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, "existing").unwrap();

        let err = write_config("new", &path).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "existing");
    }
}
