//! Utility functions for directory management
//!
//! Helper functions following the XDG Base Directory specification for
//! portable data storage across Linux distributions.
//!
//! - Config: `~/.config/gatewall/` - configuration file
//! - Data: `~/.local/share/gatewall/` - rule store and generated ruleset
//! - State: `~/.local/state/gatewall/` - logs and audit trail

use directories::ProjectDirs;
use std::path::PathBuf;

pub fn get_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("io", "gatewall", "gatewall").map(|pd| pd.config_dir().to_path_buf())
}

pub fn get_data_dir() -> Option<PathBuf> {
    ProjectDirs::from("io", "gatewall", "gatewall").map(|pd| pd.data_dir().to_path_buf())
}

pub fn get_state_dir() -> Option<PathBuf> {
    ProjectDirs::from("io", "gatewall", "gatewall")
        .and_then(|pd| pd.state_dir().map(std::path::Path::to_path_buf))
}

pub fn ensure_dirs() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        let mut builder = DirBuilder::new();
        builder.mode(0o700); // User read/write/execute only
        builder.recursive(true);

        if let Some(dir) = get_config_dir() {
            builder.create(dir)?;
        }
        if let Some(dir) = get_data_dir() {
            builder.create(dir)?;
        }
        if let Some(dir) = get_state_dir() {
            builder.create(dir)?;
        }
    }

    #[cfg(not(unix))]
    {
        for dir in [get_config_dir(), get_data_dir(), get_state_dir()]
            .into_iter()
            .flatten()
        {
            std::fs::create_dir_all(dir)?;
        }
    }

    Ok(())
}
