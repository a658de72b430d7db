//! Filesystem-based storage.

use std::{error, fmt, fs, io};
use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use log::{info, warn};
use serde::ser::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;
use url::Url;
use crate::commons::storage::{Key, Namespace, Scope, SegmentBuf};
use super::{LockMode, Write};
use super::super::store::Error as SuperError;


//------------ Constants -----------------------------------------------------

/// The directory under the base that contains temporary files.
const TMP_FILE_DIR: &str = ".tmp";

/// The directory under the base that contains the lock files.
const LOCK_FILE_DIR: &str = ".locks";

/// The directory under the base that contains commit journals.
const JOURNAL_DIR: &str = ".journal";

/// The name of the lock file for a namespace.
const LOCK_FILE_NAME: &str = "lockfile.lock";

/// The extension of files holding values.
const VALUE_EXTENSION: &str = "json";


//------------ Store ---------------------------------------------------------

/// A storage backend that uses the filesystem for storing values.
///
/// The backend uses files under a base directory. Each namespace has its
/// own directory under this base. A key’s scope is translated into a
/// directory path under the namespace directory and its name into a file
/// name with the extension `.json`.
///
/// Three directories directly under the base are reserved: `.tmp` for
/// values being written, `.locks` for the advisory lock file of each
/// namespace, and `.journal` for commit journals.
///
/// A commit touching more than one key first persists the complete write
/// set as the namespace’s journal, then applies it, then removes the
/// journal. A journal left behind by a crash is replayed the next time the
/// store is opened.
#[derive(Debug)]
pub struct Store {
    /// The directory holding the values of the namespace.
    root: PathBuf,

    /// The directory for temporary files, shared between namespaces.
    tmp: PathBuf,

    /// The directory holding the lock file of the namespace.
    locks: PathBuf,

    /// The path of the commit journal of the namespace.
    journal: PathBuf,
}

impl Store {
    pub fn from_uri(
        uri: &Url, namespace: &Namespace
    ) -> Result<Option<Self>, Error> {
        if uri.scheme() != "file" && uri.scheme() != "local" {
            return Ok(None)
        }

        // `local://./data` puts the relative part into the host.
        let path = format!(
            "{}{}", uri.host_str().unwrap_or_default(), uri.path()
        );
        if path.is_empty() {
            return Err(Error::other(format!("missing path in '{uri}'")))
        }
        Self::new(Path::new(&path), namespace).map(Some)
    }

    fn new(base: &Path, namespace: &Namespace) -> Result<Self, Error> {
        let root = base.join(namespace.as_str());
        let tmp = base.join(TMP_FILE_DIR);
        let locks = base.join(LOCK_FILE_DIR).join(namespace.as_str());
        let journal = base.join(JOURNAL_DIR).join(
            format!("{}.{}", namespace.as_str(), VALUE_EXTENSION)
        );

        create_dirs(Some(&tmp))?;
        create_dirs(journal.parent())?;

        let res = Store { root, tmp, locks, journal };
        let mut lock = FileLock::create(&res.locks)?;
        {
            let _lock = lock.write()?;
            res.recover()?;
        }
        Ok(res)
    }

    pub fn locked<T, E: From<SuperError>>(
        &self, mode: LockMode, op: impl FnOnce() -> Result<T, E>
    ) -> Result<T, E> {
        let mut lock = FileLock::create(&self.locks).map_err(|err| {
            E::from(SuperError::from(err))
        })?;
        match mode {
            LockMode::Shared => {
                let _lock = lock.read().map_err(|err| {
                    E::from(SuperError::from(err))
                })?;
                op()
            }
            LockMode::Exclusive => {
                let _lock = lock.write().map_err(|err| {
                    E::from(SuperError::from(err))
                })?;
                op()
            }
        }
    }

    /// Returns the path for the given key.
    fn key_path(&self, key: &Key) -> PathBuf {
        let mut path = self.scope_path(key.scope());
        path.push(format!("{}.{}", key.name(), VALUE_EXTENSION));
        path
    }

    /// Returns the path for the given scope.
    fn scope_path(&self, scope: &Scope) -> PathBuf {
        let mut res = self.root.clone();
        for segment in scope.iter() {
            res.push(segment.as_str());
        }
        res
    }
}


/// # Reading
impl Store {
    /// Returns the contents of the stored value with the given key.
    pub fn get(&self, key: &Key) -> Result<Option<Value>, Error> {
        let path = self.key_path(key);
        let file = match File::open(&path) {
            Ok(file) => io::BufReader::new(file),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(err) => {
                return Err(Error::io(
                    format!("failed to open file '{}'", path.display()),
                    err
                ))
            }
        };
        match serde_json::from_reader(file) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_io() => {
                Err(Error::io(
                    format!("failed to read stored file '{}'", path.display()),
                    err.into()
                ))
            }
            Err(err) => {
                Err(Error::Malformed { path, err: err.to_string() })
            }
        }
    }

    /// Returns all the keys in and below the given scope in key order.
    pub fn list_keys(&self, scope: &Scope) -> Result<Vec<Key>, Error> {
        let mut res = Vec::new();
        self.collect_keys(scope, &mut res)?;
        res.sort();
        Ok(res)
    }

    fn collect_keys(
        &self, scope: &Scope, res: &mut Vec<Key>
    ) -> Result<(), Error> {
        let path = self.scope_path(scope);
        let dir = match fs::read_dir(&path) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(())
            }
            Err(err) => {
                return Err(Error::io(
                    format!("failed to read directory '{}'", path.display()),
                    err
                ))
            }
        };
        for item in dir {
            let item = item.map_err(|err| {
                Error::io(
                    format!("failed to read directory '{}'", path.display()),
                    err
                )
            })?;
            let file_type = item.file_type().map_err(|err| {
                Error::io(
                    format!("failed to read directory '{}'", path.display()),
                    err
                )
            })?;
            let Ok(name) = item.file_name().into_string() else {
                continue
            };
            if file_type.is_dir() {
                if let Ok(segment) = SegmentBuf::try_from(name) {
                    self.collect_keys(&scope.with_sub_scope(segment), res)?;
                }
            }
            else if file_type.is_file() {
                let Some(name) = name.strip_suffix(
                    &format!(".{VALUE_EXTENSION}")
                ) else {
                    continue
                };
                if let Ok(segment) = name.parse::<SegmentBuf>() {
                    res.push(Key::new_scoped(scope.clone(), segment))
                }
            }
        }
        Ok(())
    }
}


/// # Writing
impl Store {
    /// Applies a complete write set.
    pub fn commit(&self, writes: &[Write]) -> Result<(), Error> {
        if writes.len() > 1 {
            self.write_file(&self.journal, writes)?;
        }
        self.apply(writes)?;
        if writes.len() > 1 {
            fs::remove_file(&self.journal).map_err(|err| {
                Error::io(
                    format!(
                        "failed to remove journal '{}'",
                        self.journal.display()
                    ),
                    err
                )
            })?;
        }
        Ok(())
    }

    /// Replays a journal left behind by an interrupted commit.
    fn recover(&self) -> Result<(), Error> {
        let file = match File::open(&self.journal) {
            Ok(file) => io::BufReader::new(file),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(())
            }
            Err(err) => {
                return Err(Error::io(
                    format!(
                        "failed to open journal '{}'", self.journal.display()
                    ),
                    err
                ))
            }
        };
        let writes: Vec<Write> = serde_json::from_reader(file).map_err(|err| {
            Error::Malformed {
                path: self.journal.clone(), err: err.to_string()
            }
        })?;
        warn!(
            "replaying {} writes of an interrupted commit from '{}'",
            writes.len(), self.journal.display()
        );
        self.apply(&writes)?;
        fs::remove_file(&self.journal).map_err(|err| {
            Error::io(
                format!(
                    "failed to remove journal '{}'", self.journal.display()
                ),
                err
            )
        })?;
        info!("interrupted commit recovered");
        Ok(())
    }

    fn apply(&self, writes: &[Write]) -> Result<(), Error> {
        for write in writes {
            let path = self.key_path(&write.key);
            match &write.value {
                Some(value) => {
                    create_dirs(path.parent())?;
                    self.write_file(&path, value)?;
                }
                None => {
                    match fs::remove_file(&path) {
                        Ok(()) => self.remove_empty_dirs(path.parent()),
                        Err(err) if err.kind() == io::ErrorKind::NotFound => {
                        }
                        Err(err) => {
                            return Err(Error::io(
                                format!(
                                    "failed to delete file '{}'",
                                    path.display()
                                ),
                                err
                            ))
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Writes a value to a temporary file and moves it into place.
    fn write_file<T: Serialize + ?Sized>(
        &self, path: &Path, value: &T
    ) -> Result<(), Error> {
        let mut tmp_file = NamedTempFile::new_in(&self.tmp).map_err(|err| {
            Error::io(
                format!(
                    "failed to create temp file for '{}'", path.display()
                ),
                err,
            )
        })?;

        {
            let mut writer = io::BufWriter::new(&mut tmp_file);
            serde_json::to_writer(&mut writer, value).map_err(|err| {
                Error::io(
                    format!("failed to write temp file for '{}'", path.display()),
                    err.into()
                )
            })?;
            writer.flush().map_err(|err| {
                Error::io(
                    format!("failed to write temp file for '{}'", path.display()),
                    err
                )
            })?;
        }
        tmp_file.as_file().sync_all().map_err(|err| {
            Error::io(
                format!("failed to sync temp file for '{}'", path.display()),
                err
            )
        })?;

        tmp_file.persist(path).map_err(|err| {
            Error::io(
                format!(
                    "failed to rename temp file '{}' to '{}'",
                    err.file.path().display(),
                    path.display()
                ),
                err.error,
            )
        })?;

        Ok(())
    }

    /// Removes now empty scope directories up to the namespace root.
    fn remove_empty_dirs(&self, path: Option<&Path>) {
        let Some(path) = path else { return };
        for dir in path.ancestors() {
            if dir == self.root || !dir.starts_with(&self.root) {
                break
            }
            if fs::remove_dir(dir).is_err() {
                break
            }
        }
    }
}


//------------ Helpers -------------------------------------------------------

/// Creates the given directory if necessary.
fn create_dirs(path: Option<&Path>) -> Result<(), Error> {
    if let Some(path) = path {
        fs::create_dir_all(path).map_err(|err| {
            Error::io(
                format!("failed to create directory '{}'", path.display()),
                err
            )
        })?;
    }
    Ok(())
}


//------------ FileLock ------------------------------------------------------

#[derive(Debug)]
struct FileLock {
    lock: fd_lock::RwLock<File>,
}

impl FileLock {
    fn create(dir: &Path) -> Result<Self, Error> {
        create_dirs(Some(dir))?;
        let lock_path = dir.join(LOCK_FILE_NAME);

        let lock_file = OpenOptions::new()
            .create(true).truncate(false).read(true).write(true)
            .open(&lock_path)
            .map_err(|err| {
                Error::io(
                    format!(
                        "failed to open lock file '{}'", lock_path.display(),
                    ),
                    err
                )
            })?;

        Ok(FileLock { lock: fd_lock::RwLock::new(lock_file) })
    }

    fn read(&mut self) -> Result<fd_lock::RwLockReadGuard<'_, File>, Error> {
        self.lock.read().map_err(|err| {
            Error::io("cannot get shared file lock", err)
        })
    }

    fn write(
        &mut self
    ) -> Result<fd_lock::RwLockWriteGuard<'_, File>, Error> {
        self.lock.write().map_err(|err| {
            Error::io("cannot get exclusive file lock", err)
        })
    }
}


//------------ Error ---------------------------------------------------------

#[derive(Debug)]
pub enum Error {
    Io {
        context: Cow<'static, str>,
        err: io::Error,
    },
    Malformed {
        path: PathBuf,
        err: String,
    },
    Other(String),
}

impl Error {
    fn io(context: impl Into<Cow<'static, str>>, err: io::Error) -> Self {
        Error::Io { context: context.into(), err }
    }

    fn other(info: impl Into<String>) -> Self {
        Error::Other(info.into())
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Malformed { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io { context, err } => {
                write!(f, "{context}: {err}")
            }
            Error::Malformed { path, err } => {
                write!(f, "malformed stored file '{}': {err}", path.display())
            }
            Error::Other(s) => f.write_str(s)
        }
    }
}

impl error::Error for Error { }
