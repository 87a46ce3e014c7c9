//! stderr logger shared by the binaries.

use log::LevelFilter;
use std::io::Write;

/// Resolves the filter string: explicit flag, then `RUST_LOG`, then `info`.
pub fn resolve_level(flag: Option<&str>) -> String {
    if let Some(level) = flag {
        return level.to_string();
    }

    match std::env::var("RUST_LOG") {
        Ok(level) if !level.trim().is_empty() => level,
        _ => "info".to_string(),
    }
}

/// Installs `env_logger` once; later calls only report the failure.
pub fn init(flag: Option<&str>) {
    let filters = resolve_level(flag);

    let mut builder = env_logger::Builder::new();
    builder.target(env_logger::Target::Stderr);
    builder.filter_level(LevelFilter::Info);
    builder.parse_filters(&filters);
    builder.format(|buf, record| {
        let module = record.module_path().unwrap_or(record.target());
        writeln!(
            buf,
            "{} [{}] {}: {}",
            buf.timestamp_millis(),
            record.level(),
            module,
            record.args()
        )
    });

    if let Err(e) = builder.try_init() {
        eprintln!("failed to initialize logger: {e}");
    }
}
