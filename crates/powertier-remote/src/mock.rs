//! Mock remote store for testing

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::{RemoteError, RemoteObject, RemoteResult, RemoteStore};

/// A recorded `put` call
#[derive(Debug, Clone)]
pub struct PutCall {
    pub path: String,
    pub sha: Option<String>,
    pub message: String,
}

/// In-memory remote store with GitHub-like conflict semantics
pub struct MockRemoteStore {
    objects: Arc<Mutex<HashMap<String, RemoteObject>>>,
    next_sha: AtomicU64,

    /// Every put attempt, successful or not
    pub puts: Arc<Mutex<Vec<PutCall>>>,

    /// Configure get to fail with a 503
    pub fail_get: Arc<Mutex<bool>>,

    /// Configure put to fail with a 503
    pub fail_put: Arc<Mutex<bool>>,
}

impl MockRemoteStore {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(Mutex::new(HashMap::new())),
            next_sha: AtomicU64::new(1),
            puts: Arc::new(Mutex::new(Vec::new())),
            fail_get: Arc::new(Mutex::new(false)),
            fail_put: Arc::new(Mutex::new(false)),
        }
    }

    fn new_sha(&self) -> String {
        format!("sha-{}", self.next_sha.fetch_add(1, Ordering::SeqCst))
    }

    /// Current object at `path`
    pub fn object(&self, path: &str) -> Option<RemoteObject> {
        self.objects.lock().unwrap().get(path).cloned()
    }

    /// Simulate a write by someone else. Returns the new SHA.
    pub fn external_write(&self, path: &str, content: &[u8]) -> String {
        let sha = self.new_sha();
        self.objects.lock().unwrap().insert(
            path.to_string(),
            RemoteObject {
                content: content.to_vec(),
                sha: sha.clone(),
            },
        );
        sha
    }

    /// Simulate a remote deletion
    pub fn external_delete(&self, path: &str) {
        self.objects.lock().unwrap().remove(path);
    }

    pub fn set_fail_get(&self, fail: bool) {
        *self.fail_get.lock().unwrap() = fail;
    }

    pub fn set_fail_put(&self, fail: bool) {
        *self.fail_put.lock().unwrap() = fail;
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }
}

impl Default for MockRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn get(&self, path: &str) -> RemoteResult<Option<RemoteObject>> {
        if *self.fail_get.lock().unwrap() {
            return Err(RemoteError::Status {
                code: 503,
                body: "mock get failure".into(),
            });
        }
        Ok(self.object(path))
    }

    async fn put(
        &self,
        path: &str,
        content: &[u8],
        sha: Option<&str>,
        message: &str,
    ) -> RemoteResult<String> {
        self.puts.lock().unwrap().push(PutCall {
            path: path.to_string(),
            sha: sha.map(String::from),
            message: message.to_string(),
        });

        if *self.fail_put.lock().unwrap() {
            return Err(RemoteError::Status {
                code: 503,
                body: "mock put failure".into(),
            });
        }

        let mut objects = self.objects.lock().unwrap();
        match (objects.get(path), sha) {
            (Some(_), None) => {
                return Err(RemoteError::Conflict {
                    path: path.to_string(),
                    message: "object exists but no sha was supplied".into(),
                });
            }
            (Some(existing), Some(expected)) if existing.sha != expected => {
                return Err(RemoteError::Conflict {
                    path: path.to_string(),
                    message: format!("sha {} does not match {}", expected, existing.sha),
                });
            }
            (None, Some(_)) => {
                return Err(RemoteError::Missing {
                    path: path.to_string(),
                });
            }
            _ => {}
        }

        let new_sha = self.new_sha();
        objects.insert(
            path.to_string(),
            RemoteObject {
                content: content.to_vec(),
                sha: new_sha.clone(),
            },
        );
        Ok(new_sha)
    }

    fn describe(&self) -> String {
        "mock".into()
    }
}
