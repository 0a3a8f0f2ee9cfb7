use super::{Coordinator, Versioned, normalize_path};
use crate::error::{Error, Result};
use core::time::Duration;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

#[derive(Clone, Debug, Default)]
struct Node {
    data: Vec<u8>,
    version: u64,
}

/// An in-process [`Coordinator`].
///
/// Nodes live in an ordered map keyed by their normalized path. The root `/`
/// always exists and cannot hold data. Besides the trait operations it can
/// simulate a partition ([`set_connected`](Self::set_connected)), fail a given
/// number of upcoming calls ([`fail_next`](Self::fail_next)), and delay every
/// call ([`set_latency`](Self::set_latency)).
///
/// # Example
/// ```
/// use gid::coord::{Coordinator, MemoryCoordinator};
///
/// let coord = MemoryCoordinator::new();
/// assert!(coord.create("/workers/host-1", b"7").unwrap());
/// assert_eq!(coord.get_data("/workers/host-1").unwrap(), Some(b"7".to_vec()));
/// assert_eq!(coord.children("/workers").unwrap(), vec!["host-1".to_owned()]);
/// ```
#[derive(Debug)]
pub struct MemoryCoordinator {
    nodes: RwLock<BTreeMap<String, Node>>,
    connected: AtomicBool,
    failures: AtomicU32,
    latency_micros: AtomicU64,
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCoordinator {
    /// Creates a connected, empty coordinator.
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            connected: AtomicBool::new(true),
            failures: AtomicU32::new(0),
            latency_micros: AtomicU64::new(0),
        }
    }

    /// Connects or partitions the coordinator. While disconnected every call
    /// fails with [`Error::CoordinationUnavailable`].
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Makes the next `count` calls fail with
    /// [`Error::CoordinationUnavailable`].
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::Release);
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_micros.store(micros, Ordering::Relaxed);
    }

    fn check(&self, op: &str, path: &str) -> Result<String> {
        let latency = self.latency_micros.load(Ordering::Relaxed);
        if latency > 0 {
            std::thread::sleep(Duration::from_micros(latency));
        }
        if !self.is_connected() {
            return Err(Error::unavailable(format!("{op} {path}: not connected")));
        }
        let injected = self
            .failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::unavailable(format!("{op} {path}: connection loss")));
        }
        normalize_path(path)
    }

    fn ensure_parents(nodes: &mut BTreeMap<String, Node>, path: &str) {
        let mut end = 0;
        while let Some(offset) = path[end + 1..].find('/') {
            end += 1 + offset;
            nodes.entry(path[..end].to_owned()).or_default();
        }
    }

    fn descendant_prefix(path: &str) -> String {
        if path == "/" {
            "/".to_owned()
        } else {
            format!("{path}/")
        }
    }
}

impl Coordinator for MemoryCoordinator {
    fn block_until_connected(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_connected() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn exists(&self, path: &str) -> Result<bool> {
        let path = self.check("exists", path)?;
        Ok(path == "/" || self.nodes.read().contains_key(&path))
    }

    fn create(&self, path: &str, data: &[u8]) -> Result<bool> {
        let path = self.check("create", path)?;
        if path == "/" {
            return Ok(false);
        }
        let mut nodes = self.nodes.write();
        if nodes.contains_key(&path) {
            return Ok(false);
        }
        Self::ensure_parents(&mut nodes, &path);
        nodes.insert(
            path,
            Node {
                data: data.to_vec(),
                version: 0,
            },
        );
        Ok(true)
    }

    fn delete(&self, path: &str) -> Result<()> {
        let path = self.check("delete", path)?;
        let prefix = Self::descendant_prefix(&path);
        self.nodes
            .write()
            .retain(|key, _| key != &path && !key.starts_with(&prefix));
        Ok(())
    }

    fn get_data(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let path = self.check("get_data", path)?;
        Ok(self.nodes.read().get(&path).map(|node| node.data.clone()))
    }

    fn set_data(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = self.check("set_data", path)?;
        if path == "/" {
            return Err(Error::config(&path, "the root node holds no data"));
        }
        let mut nodes = self.nodes.write();
        match nodes.get_mut(&path) {
            Some(node) => {
                node.data = data.to_vec();
                node.version += 1;
            }
            None => {
                Self::ensure_parents(&mut nodes, &path);
                nodes.insert(
                    path,
                    Node {
                        data: data.to_vec(),
                        version: 0,
                    },
                );
            }
        }
        Ok(())
    }

    fn children(&self, path: &str) -> Result<Vec<String>> {
        let path = self.check("children", path)?;
        let prefix = Self::descendant_prefix(&path);
        let nodes = self.nodes.read();
        let children = nodes
            .range(prefix.clone()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(&prefix))
            .map(|key| &key[prefix.len()..])
            .filter(|rest| !rest.contains('/'))
            .map(str::to_owned)
            .collect();
        Ok(children)
    }

    fn get_versioned(&self, path: &str) -> Result<Option<Versioned>> {
        let path = self.check("get_versioned", path)?;
        Ok(self.nodes.read().get(&path).map(|node| Versioned {
            data: node.data.clone(),
            version: node.version,
        }))
    }

    fn set_versioned(&self, path: &str, data: &[u8], expected: Option<u64>) -> Result<bool> {
        let path = self.check("set_versioned", path)?;
        if path == "/" {
            return Err(Error::config(&path, "the root node holds no data"));
        }
        let mut nodes = self.nodes.write();
        match (nodes.get_mut(&path), expected) {
            (None, None) => {
                Self::ensure_parents(&mut nodes, &path);
                nodes.insert(
                    path,
                    Node {
                        data: data.to_vec(),
                        version: 0,
                    },
                );
                Ok(true)
            }
            (Some(node), Some(version)) if node.version == version => {
                node.data = data.to_vec();
                node.version += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
