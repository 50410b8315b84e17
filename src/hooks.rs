//! Host hook installation (C6 CLI surface, §6).
//!
//! Registers the entry wrapper as the host CLI's `statusLine` command in
//! `~/.claude/settings.json`. Same idiom as the teacher's
//! `memory_layer::hooks::run_install_hook`: read-or-default the JSON, patch
//! one key, back up the original before writing, write the result.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

fn settings_path() -> Result<PathBuf> {
    Ok(dirs::home_dir().context("Cannot find home directory")?.join(".claude").join("settings.json"))
}

fn wrapper_path() -> Result<PathBuf> {
    Ok(dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("statline")
        .join("statline-wrapper.sh"))
}

/// Installs (or, with `uninstall`, removes) the `statusLine` entry. With
/// `status_only`, reports the current state and changes nothing.
pub fn run_install_hook(uninstall: bool, status_only: bool) -> Result<()> {
    let path = settings_path()?;
    let raw = if path.exists() {
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?
    } else {
        "{}".to_string()
    };
    let mut settings: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))?;

    let current_command = settings
        .get("statusLine")
        .and_then(|s| s.get("command"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string());
    let wrapper = wrapper_path()?;
    let already_installed = current_command.as_deref() == Some(wrapper.to_string_lossy().as_ref());

    if status_only {
        println!(
            "statline.hook status={} path={} command={}",
            if already_installed { "installed" } else { "not_installed" },
            path.display(),
            current_command.unwrap_or_else(|| "-".to_string())
        );
        return Ok(());
    }

    if uninstall {
        if settings.get("statusLine").is_some() {
            if let Some(obj) = settings.as_object_mut() {
                obj.remove("statusLine");
            }
            backup(&path);
            write(&path, &settings)?;
        }
        println!("statline.hook uninstall ok path={}", path.display());
        return Ok(());
    }

    settings["statusLine"] = serde_json::json!({
        "type": "command",
        "command": wrapper.to_string_lossy(),
        "padding": 0,
    });

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    backup(&path);
    write(&path, &settings)?;

    println!(
        "statline.hook {} path={}",
        if already_installed { "updated ok" } else { "installed ok" },
        path.display()
    );
    Ok(())
}

fn backup(path: &std::path::Path) {
    if path.exists() {
        let backup_path = path.with_extension("json.bak");
        if let Err(e) = fs::copy(path, &backup_path) {
            eprintln!("statline.hook WARNING: failed to back up {}: {e}", backup_path.display());
        }
    }
}

fn write(path: &std::path::Path, settings: &serde_json::Value) -> Result<()> {
    let json = serde_json::to_string_pretty(settings).context("Failed to serialize settings.json")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}
