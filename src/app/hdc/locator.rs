use std::path::{Path, PathBuf};

pub const DEFAULT_HDC: &str = "hdc";

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|candidate| candidate.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// The hdc binary shipped next to the executable (`hdc/hdc`, `hdc/hdc.exe` on Windows).
pub fn bundled_hdc_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let name = if cfg!(windows) { "hdc.exe" } else { "hdc" };
    Some(exe.parent()?.join("hdc").join(name))
}

/// A configured `hdc` (resolved through PATH) or an existing configured path wins;
/// otherwise the bundled binary, otherwise plain `hdc`.
pub fn resolve_hdc_program(configured: &str, bundled: Option<&Path>) -> String {
    let normalized = normalize_command_path(configured);
    if normalized == DEFAULT_HDC || (!normalized.is_empty() && Path::new(&normalized).exists()) {
        return normalized;
    }
    match bundled {
        Some(path) if path.is_file() => path.display().to_string(),
        _ => DEFAULT_HDC.to_string(),
    }
}

pub fn validate_hdc_program(program: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err("hdc command is empty".to_string());
    }
    if program == DEFAULT_HDC {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err("hdc path must point to an executable file".to_string());
    }
    if !path.exists() {
        return Err("hdc executable not found at the configured path".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn strips_wrapping_quotes() {
        assert_eq!(
            normalize_command_path("  \"/opt/ohos/toolchains/hdc\"  "),
            "/opt/ohos/toolchains/hdc"
        );
        assert_eq!(
            normalize_command_path(" '/opt/ohos/toolchains/hdc' "),
            "/opt/ohos/toolchains/hdc"
        );
    }

    #[test]
    fn empty_or_missing_configuration_falls_back() {
        assert_eq!(resolve_hdc_program("", None), "hdc");
        assert_eq!(resolve_hdc_program("/nope/hdc", None), "hdc");
    }

    #[test]
    fn bundled_binary_used_when_configuration_is_blank() {
        let tmp = TempDir::new().expect("tmp");
        let bundled = tmp.path().join("hdc");
        std::fs::write(&bundled, b"").expect("write");
        assert_eq!(
            resolve_hdc_program("  ", Some(&bundled)),
            bundled.display().to_string()
        );
    }

    #[test]
    fn configured_path_beats_bundled_binary() {
        let tmp = TempDir::new().expect("tmp");
        let bundled = tmp.path().join("bundled-hdc");
        let configured = tmp.path().join("custom-hdc");
        std::fs::write(&bundled, b"").expect("write");
        std::fs::write(&configured, b"").expect("write");
        let configured_str = configured.display().to_string();
        assert_eq!(
            resolve_hdc_program(&configured_str, Some(&bundled)),
            configured_str
        );
        assert_eq!(resolve_hdc_program("hdc", Some(&bundled)), "hdc");
    }

    #[test]
    fn validates_nonexistent_path() {
        let err = validate_hdc_program("/this/path/should/not/exist/hdc").unwrap_err();
        assert!(err.contains("not found"));
        assert!(validate_hdc_program("hdc").is_ok());
        assert!(validate_hdc_program(" ").is_err());
    }
}
