use std::path::PathBuf;

/// Platform locations used by the application.
#[derive(Debug, Clone)]
pub struct StandardPaths {
    pub base_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub logs_dir: PathBuf,
}

/// Resolves `<data dir>/renewal`, falling back to the working directory
/// when the platform has no data directory.
pub fn standard_paths() -> StandardPaths {
    let base_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("renewal");
    StandardPaths {
        artifacts_dir: base_dir.join("artifacts"),
        logs_dir: base_dir.join("logs"),
        base_dir,
    }
}

/// Formats an optional f64 to 4 decimal places, or returns "—" if None or non-finite.
pub fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(x) if x.is_finite() => format!("{x:.4}"),
        _ => "—".to_owned(),
    }
}
