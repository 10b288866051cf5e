use crate::error::StorageError;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex, MutexGuard,
    },
    time::{SystemTime, UNIX_EPOCH},
};

/// String key/value backend shared by every tab of the application.
pub trait Storage: Send {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: HashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.values.remove(key);
        Ok(())
    }
}

/// One JSON file per key under `root`, replaced atomically on write.
#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_key(key)))
    }
}

impl Storage for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;
        let path = self.path_for(key);
        write_atomic(&path, value)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Backend used when no persistent storage can be opened; every call fails.
#[derive(Debug, Default)]
pub struct UnavailableStorage;

impl Storage for UnavailableStorage {
    fn read(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable)
    }

    fn write(&mut self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable)
    }

    fn remove(&mut self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    pub new_value: Option<String>,
}

pub type TabId = u64;

struct HubInner {
    backend: Box<dyn Storage>,
    listeners: Vec<(TabId, Sender<StorageEvent>)>,
    next_tab: TabId,
}

/// Shared store plus change fan-out. Each connected tab gets notified of writes made by the
/// other tabs, never of its own.
#[derive(Clone)]
pub struct StorageHub {
    inner: Arc<Mutex<HubInner>>,
}

impl StorageHub {
    pub fn new(backend: impl Storage + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                backend: Box::new(backend),
                listeners: Vec::new(),
                next_tab: 1,
            })),
        }
    }

    pub fn connect(&self) -> Result<StorageHandle, StorageError> {
        let (sender, events) = mpsc::channel();
        let mut inner = self.lock()?;
        let tab = inner.next_tab;
        inner.next_tab += 1;
        inner.listeners.push((tab, sender));
        Ok(StorageHandle {
            tab,
            hub: self.clone(),
            events,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, HubInner>, StorageError> {
        self.inner.lock().map_err(|_| StorageError::Poisoned)
    }

    fn publish(&self, origin: TabId, key: &str, new_value: Option<&str>) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        match new_value {
            Some(value) => inner.backend.write(key, value)?,
            None => inner.backend.remove(key)?,
        }
        let event = StorageEvent {
            key: key.to_string(),
            new_value: new_value.map(str::to_string),
        };
        inner
            .listeners
            .retain(|(tab, sender)| *tab == origin || sender.send(event.clone()).is_ok());
        Ok(())
    }
}

/// One tab's connection to the hub.
pub struct StorageHandle {
    tab: TabId,
    hub: StorageHub,
    events: Receiver<StorageEvent>,
}

impl StorageHandle {
    pub fn tab_id(&self) -> TabId {
        self.tab
    }

    pub fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.hub.lock()?.backend.read(key)
    }

    pub fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.hub.publish(self.tab, key, Some(value))
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.hub.publish(self.tab, key, None)
    }

    pub fn try_next_event(&self) -> Option<StorageEvent> {
        match self.events.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

impl Drop for StorageHandle {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.hub.lock() {
            let tab = self.tab;
            inner.listeners.retain(|(id, _)| *id != tab);
        }
    }
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no parent dir"))?;
    fs::create_dir_all(parent)?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = parent.join(format!("{file_name}.{stamp}.tmp"));
    fs::write(&temp, contents)?;
    if let Err(err) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(err);
    }
    Ok(())
}
