//! Logger initialisation.
//!
//! Log lines go to stdout and to the main log file. When the file cannot
//! be opened (unprivileged runs) the logger falls back to stderr only.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use env_logger::{Builder, Env, Target};

/// Main loader log.
pub const LOG_FILE_PATH: &str = "/var/log/diskusage.log";

struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        self.file.flush()
    }
}

/// Initialise the global logger. The default level is `info`; `RUST_LOG`
/// overrides it.
pub fn init(path: &Path) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => {
            builder.target(Target::Pipe(Box::new(Tee { file })));
        }
        Err(error) => {
            eprintln!(
                "cannot open log file {}: {error}; logging to stderr",
                path.display()
            );
        }
    }
    builder.init();
}
