//! # Session
//!
//! A session is one run of an executable. It owns a timestamped directory under the software
//! root holding the log file, the csv archives and any JSON dumps queued with [`save`]. JSON
//! dumps are written by a background thread so the control loop never blocks on the disk.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use chrono::{DateTime, Utc};
use conquer_once::OnceCell;
use log::{debug, info, warn};
use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use thiserror::Error;

// Internal imports
use crate::time;

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

static SESSION_EPOCH: OnceCell<DateTime<Utc>> = OnceCell::uninit();

/// Queue into the save thread, reachable without a `Session` handle.
static SAVE_QUEUE: OnceCell<Mutex<Sender<SaveRequest>>> = OnceCell::uninit();

/// Number of timestamped saves made by this process.
static TIMESTAMPED_SAVE_COUNT: AtomicUsize = AtomicUsize::new(0);

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Timestamp format used in session directory names, see
/// https://docs.rs/chrono/0.4/chrono/format/strftime/index.html.
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Timestamp format used in dump file names, with milliseconds.
const DUMP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Period at which an idle save thread checks whether it should stop.
const SAVE_POLL_PERIOD: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A value waiting to be written, with its session-relative path.
struct SaveRequest {
    path: PathBuf,
    data: Box<dyn erased_serde::Serialize + Send>,
}

/// Directories and background saver of the running session.
pub struct Session {
    /// Session directory, `{sw_root}/{sessions_dir}/{exec_name}_{timestamp}`
    pub session_root: PathBuf,

    /// Directory holding the csv archives
    pub arch_root: PathBuf,

    /// The path to the session's log file
    pub log_file_path: PathBuf,

    stop_saving: Arc<AtomicBool>,

    save_thread: Option<JoinHandle<()>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("The software root environment variable (MPC_SW_ROOT) is not set")]
    SwRootNotSet,

    #[error("Cannot create the session directory: {0}")]
    CannotCreateDir(std::io::Error),

    #[error("A session has already been started in this process")]
    AlreadyStarted,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Session {
    /// Start the session of `exec_name` inside `sessions_dir`.
    ///
    /// Only one session may be started per process.
    pub fn new(exec_name: &str, sessions_dir: &str) -> Result<Self, SessionError> {
        let root = crate::host::get_sw_root().map_err(|_| SessionError::SwRootNotSet)?;

        let now = Utc::now();
        SESSION_EPOCH
            .try_init_once(|| now)
            .map_err(|_| SessionError::AlreadyStarted)?;

        let session_root = root
            .join(sessions_dir)
            .join(format!("{}_{}", exec_name, now.format(TIMESTAMP_FORMAT)));
        let arch_root = session_root.join("arch");
        fs::create_dir_all(&arch_root).map_err(SessionError::CannotCreateDir)?;

        let log_file_path = session_root.join(format!("{}.log", exec_name));

        let (queue, requests) = mpsc::channel();
        SAVE_QUEUE
            .try_init_once(|| Mutex::new(queue))
            .map_err(|_| SessionError::AlreadyStarted)?;

        let stop_saving = Arc::new(AtomicBool::new(false));
        let save_thread = {
            let root = session_root.clone();
            let stop = stop_saving.clone();
            thread::spawn(move || save_thread(root, requests, stop))
        };

        Ok(Session {
            session_root,
            arch_root,
            log_file_path,
            stop_saving,
            save_thread: Some(save_thread),
        })
    }

    /// End the session once every queued save has been written.
    pub fn exit(mut self) {
        self.stop_saving.store(true, Ordering::Relaxed);

        if let Some(handle) = self.save_thread.take() {
            info!("Waiting for pending saves");
            if handle.join().is_err() {
                warn!("Save thread panicked, some dumps may be missing");
            }
        }

        info!("Session ended");
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Seconds elapsed since the session started, `NAN` before it has.
pub fn get_elapsed_seconds() -> f64 {
    SESSION_EPOCH
        .get()
        .and_then(|epoch| time::duration_to_seconds(Utc::now() - *epoch))
        .unwrap_or(std::f64::NAN)
}

/// Start time of the session, `None` before it has started.
pub fn get_epoch() -> Option<&'static DateTime<Utc>> {
    SESSION_EPOCH.get()
}

/// Queue `data` to be written as JSON at `path`, relative to the session root.
///
/// Failures are logged and otherwise ignored.
pub fn save<P: AsRef<Path>, T: serde::Serialize + Send + 'static>(path: P, data: T) {
    let path = path.as_ref().to_path_buf();

    let queue = match SAVE_QUEUE.get() {
        Some(q) => q,
        None => {
            warn!("No session started, dropping save to {:?}", path);
            return;
        }
    };

    let sent = match queue.lock() {
        Ok(sender) => sender
            .send(SaveRequest { path: path.clone(), data: Box::new(data) })
            .is_ok(),
        Err(_) => false,
    };

    if !sent {
        warn!("Save thread unavailable, dropping save to {:?}", path);
    }
}

/// As [`save`], inserting the current time to the millisecond and a sequence number before the
/// file extension so repeated saves do not overwrite each other.
pub fn save_with_timestamp<P: AsRef<Path>, T: serde::Serialize + Send + 'static>(
    path: P,
    data: T,
) {
    let seq = TIMESTAMPED_SAVE_COUNT.fetch_add(1, Ordering::Relaxed);
    save(timestamped_path(path.as_ref(), &Utc::now(), seq), data);
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn timestamped_path(path: &Path, now: &DateTime<Utc>, seq: usize) -> PathBuf {
    let mut file_name: OsString = path.file_stem().map(|s| s.to_os_string()).unwrap_or_default();
    file_name.push(format!("_{}_{:04}", now.format(DUMP_TIMESTAMP_FORMAT), seq));

    if let Some(ext) = path.extension() {
        file_name.push(".");
        file_name.push(ext);
    }

    path.with_file_name(file_name)
}

/// Write requests until stopped. The queue is drained before stopping.
fn save_thread(root: PathBuf, requests: Receiver<SaveRequest>, stop: Arc<AtomicBool>) {
    loop {
        match requests.recv_timeout(SAVE_POLL_PERIOD) {
            Ok(req) => {
                let full_path = root.join(&req.path);
                match write_json(&full_path, &*req.data) {
                    Ok(()) => debug!("Saved {:?}", full_path),
                    Err(e) => warn!("Could not save {:?}: {}", full_path, e),
                }
            }
            Err(RecvTimeoutError::Timeout) if stop.load(Ordering::Relaxed) => return,
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn write_json(
    full_path: &Path,
    data: &(dyn erased_serde::Serialize + Send),
) -> Result<(), Box<dyn std::error::Error>> {
    match full_path.extension().and_then(|s| s.to_str()) {
        Some("json") => (),
        ext => return Err(format!("unsupported extension {:?}", ext).into()),
    }

    if let Some(parent) = full_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = fs::File::create(full_path)?;
    serde_json::to_writer_pretty(file, data)?;

    Ok(())
}
