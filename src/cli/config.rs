use crate::config::generate::generate_starter_config;
use crate::config::{user_config_path, SYSTEM_CONFIG_PATH};
use std::fs;
use std::path::PathBuf;

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    // Try ~/.config/cses2humio/config.yml first
    let config_path = match user_config_path() {
        Some(user_config) => match user_config.parent().map(fs::create_dir_all) {
            Some(Err(_)) => {
                eprintln!("Warning: Could not create directory for {}", user_config.display());
                eprintln!("Falling back to {}", SYSTEM_CONFIG_PATH);
                PathBuf::from(SYSTEM_CONFIG_PATH)
            }
            _ => user_config,
        },
        None => PathBuf::from(SYSTEM_CONFIG_PATH),
    };

    if config_path.exists() {
        return Err(format!(
            "config file already exists at {}; remove it first or use --stdout to print the config",
            config_path.display()
        )
        .into());
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    fs::write(&config_path, config_content)?;

    println!("Config file written to {}", config_path.display());
    Ok(())
}
