use chrono::Local;
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger,
};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Log file name for a run started now, e.g. `plasmid_gpt_10-19_14-03-22.log`.
pub fn log_file_name(dir: &Path) -> PathBuf {
    let current_time = Local::now().format("%m-%d_%H-%M-%S").to_string();
    dir.join(format!("plasmid_gpt_{current_time}.log"))
}

pub fn level_for_verbosity(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Terminal logging on stderr plus an optional file sink at info level.
/// A missing log directory is created.
/// Calling it twice is harmless; the second logger is rejected by `log`.
pub fn set_up_logging(verbosity: u8, log_dir: Option<&Path>) -> Result<Option<PathBuf>, String> {
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level_for_verbosity(verbosity),
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )];
    let mut log_path = None;
    if let Some(dir) = log_dir {
        fs::create_dir_all(dir)
            .map_err(|e| format!("Could not create log directory '{}': {e}", dir.display()))?;
        let path = log_file_name(dir);
        let file = File::create(&path)
            .map_err(|e| format!("Could not create log file '{}': {e}", path.display()))?;
        loggers.push(WriteLogger::new(LevelFilter::Info, Config::default(), file));
        log_path = Some(path);
    }
    if CombinedLogger::init(loggers).is_err() {
        log::debug!("logger already installed");
    }
    Ok(log_path)
}
