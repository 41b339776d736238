//! File-backed tracing output.
//!
//! The terminal belongs to the view while the client runs, so log lines go
//! to `<data dir>/logs/roomchat.log` instead of stderr.

use std::{
    ffi::OsString,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use tracing_subscriber::fmt::MakeWriter;

const LOG_FILE_NAME: &str = "roomchat.log";

#[derive(Clone)]
struct FileMakeWriter {
    file: Arc<Mutex<File>>,
}

struct FileWriterGuard {
    file: Arc<Mutex<File>>,
}

impl Write for FileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut locked = self
            .file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;
        locked.flush()
    }
}

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriterGuard {
            file: Arc::clone(&self.file),
        }
    }
}

pub fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();

    let log_path = log_path_in(&data_dir());
    let file = match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("failed to open log file {}: {err}", log_path.display());
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(io::stderr)
                .init();
            return;
        }
    };

    let make_writer = FileMakeWriter {
        file: Arc::new(Mutex::new(file)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .init();
}

pub fn data_dir() -> PathBuf {
    resolve_data_dir(
        std::env::var_os("ROOMCHAT_DATA_DIR"),
        std::env::var_os("LOCALAPPDATA"),
        std::env::var_os("HOME"),
    )
}

/// `ROOMCHAT_DATA_DIR`, else `%LOCALAPPDATA%\RoomChat`, else `$HOME/.roomchat`,
/// else the working directory.
fn resolve_data_dir(
    override_dir: Option<OsString>,
    local_app_data: Option<OsString>,
    home: Option<OsString>,
) -> PathBuf {
    if let Some(override_dir) = override_dir {
        return PathBuf::from(override_dir);
    }

    local_app_data
        .map(|base| PathBuf::from(base).join("RoomChat"))
        .or_else(|| home.map(|home| PathBuf::from(home).join(".roomchat")))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn log_path_in(data_dir: &Path) -> PathBuf {
    let dir = data_dir.join("logs");
    let _ = std::fs::create_dir_all(&dir);
    dir.join(LOG_FILE_NAME)
}
