//! Structured log output: always stdout, plus `office-bridge.log` under the
//! configured log directory when it can be opened.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::{fmt::MakeWriter, EnvFilter};

pub const LOG_FILE_NAME: &str = "office-bridge.log";

/// Where log lines go. Cloned into the subscriber; every clone shares the
/// same file handle.
#[derive(Clone, Default)]
pub struct LogSink {
    file: Option<Arc<Mutex<File>>>,
}

impl LogSink {
    /// An empty `log_dir` means stdout only. A directory that cannot be
    /// created or a file that cannot be opened is an error for the caller
    /// to report.
    pub fn open(log_dir: &Path) -> io::Result<Self> {
        if log_dir.as_os_str().is_empty() {
            return Ok(Self::default());
        }
        std::fs::create_dir_all(log_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(LOG_FILE_NAME))?;
        Ok(Self {
            file: Some(Arc::new(Mutex::new(file))),
        })
    }

    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = Tee;

    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            file: self.file.clone(),
        }
    }
}

/// One log line's writer. Write failures are swallowed so logging never
/// takes the bridge down.
pub struct Tee {
    file: Option<Arc<Mutex<File>>>,
}

impl Tee {
    fn with_file(&self, op: impl FnOnce(&mut File) -> io::Result<()>) {
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = op(&mut file);
        }
    }
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stdout().lock().write_all(buf);
        self.with_file(|file| file.write_all(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stdout().lock().flush();
        self.with_file(File::flush);
        Ok(())
    }
}

/// Filter directive when `RUST_LOG` is unset.
fn default_level(debug: bool) -> String {
    if debug {
        return "debug".to_string();
    }
    std::env::var("OFFICE_LOG_LEVEL")
        .ok()
        .filter(|level| !level.trim().is_empty())
        .unwrap_or_else(|| "info".to_string())
}

/// Install the global subscriber. Returns false when one was already set.
pub fn init(debug: bool, log_dir: &Path) -> bool {
    let sink = LogSink::open(log_dir).unwrap_or_else(|err| {
        eprintln!(
            "office-bridge: cannot write logs to {}: {err}",
            log_dir.display()
        );
        LogSink::default()
    });
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(debug)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(sink)
        .try_init()
        .is_ok()
}
