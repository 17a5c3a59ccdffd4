//! Process-wide logging setup.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Once;

use colored::Colorize;
use log::{Level, LevelFilter};

use crate::error::RhsegError;

static INIT_LOGGER: Once = Once::new();

/// Installs an `env_logger` printing `[LEVEL] message` at info level and
/// above. With `log_file` the output is appended to that file instead of
/// stderr. Only the first call has any effect.
pub fn enable_verbose_logging(log_file: Option<&Path>) -> Result<(), RhsegError> {
    let target = match log_file {
        Some(path) => Some(OpenOptions::new().append(true).create(true).open(path)?),
        None => None,
    };

    INIT_LOGGER.call_once(|| {
        let mut builder = env_logger::Builder::new();
        builder.is_test(false);
        builder.filter_level(LevelFilter::Info);

        // Colors only make sense on a terminal.
        let colorize = target.is_none();
        builder.format(move |buf, record| {
            let level = record.level().to_string();
            let tag = if colorize { paint(record.level(), &level) } else { level };
            writeln!(buf, "[{}] {}", tag, record.args())
        });

        if let Some(file) = target {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        let _ = builder.try_init();
    });
    Ok(())
}

fn paint(level: Level, text: &str) -> String {
    match level {
        Level::Error => text.red().bold().to_string(),
        Level::Warn => text.yellow().to_string(),
        Level::Info => text.green().to_string(),
        Level::Debug => text.cyan().to_string(),
        Level::Trace => text.dimmed().to_string(),
    }
}
