use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};

mod migrations;

use migrations::run_migrations;

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

/// Change notification for one key. `value: None` means the key was removed;
/// saving an explicit null and removing the key are the same event.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub key: String,
    pub value: Option<Value>,
}

struct StoreInner {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

/// Asynchronous key-value service with change notification.
///
/// Values are JSON documents in a single SQLite table, owned by a dedicated
/// worker thread; async callers submit closures and await the reply. Watchers
/// observe writes in the order they were committed, but delivery latency is
/// unbounded and a subscriber that is not running sees nothing; consumers
/// needing a ground truth must query directly.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
    db_path: Arc<PathBuf>,
    events: broadcast::Sender<StoreEvent>,
}

impl Store {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create store directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("sitegate-store".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run store migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        StoreCommand::Shutdown => break,
                    }
                }

                info!("Store thread shutting down");
            })
            .with_context(|| "failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        let (events, _) = broadcast::channel(64);

        info!("Store initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(StoreInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
            events,
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Subscribe to committed writes. Events carry the new value (`None` for
    /// removals) so subscribers can react without a read-back.
    pub fn watch(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store thread terminated unexpectedly"))?
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        self.execute(move |conn| {
            let text: Option<String> = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get(0)
                })
                .optional()
                .with_context(|| format!("failed to read key '{key}'"))?;

            match text {
                Some(text) => {
                    let value = serde_json::from_str(&text)
                        .with_context(|| format!("corrupt value for key '{key}'"))?;
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        let key_owned = key.to_string();
        let text = serde_json::to_string(&value)?;
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key_owned, text],
            )
            .with_context(|| format!("failed to write key '{key_owned}'"))?;
            Ok(())
        })
        .await?;

        // Published only after the write committed, so watchers observe
        // writes in commit order.
        let _ = self.events.send(StoreEvent {
            key: key.to_string(),
            value: Some(value),
        });
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        let key_owned = key.to_string();
        self.execute(move |conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key_owned])
                .with_context(|| format!("failed to remove key '{key_owned}'"))?;
            Ok(())
        })
        .await?;

        let _ = self.events.send(StoreEvent {
            key: key.to_string(),
            value: None,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("test.sqlite3")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn set_get_round_trip() {
        let (_dir, store) = open_temp();
        assert!(store.get("settings").await.unwrap().is_none());

        store.set("settings", json!({"a": 1})).await.unwrap();
        assert_eq!(store.get("settings").await.unwrap(), Some(json!({"a": 1})));

        store.set("settings", json!({"a": 2})).await.unwrap();
        assert_eq!(store.get("settings").await.unwrap(), Some(json!({"a": 2})));
    }

    #[tokio::test]
    async fn remove_deletes_the_key() {
        let (_dir, store) = open_temp();
        store.set("currentSession", json!({"id": "s"})).await.unwrap();
        store.remove("currentSession").await.unwrap();
        assert!(store.get("currentSession").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn watch_sees_writes_in_commit_order() {
        let (_dir, store) = open_temp();
        let mut rx = store.watch();

        store.set("k", json!(1)).await.unwrap();
        store.set("k", json!(2)).await.unwrap();
        store.remove("k").await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.key, "k");
        assert_eq!(first.value, Some(json!(1)));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.value, Some(json!(2)));

        let third = rx.recv().await.unwrap();
        assert_eq!(third.key, "k");
        assert!(third.value.is_none());
    }

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite3");
        {
            let store = Store::open(path.clone()).unwrap();
            store.set("settings", json!({"kept": true})).await.unwrap();
        }
        let store = Store::open(path).unwrap();
        assert_eq!(
            store.get("settings").await.unwrap(),
            Some(json!({"kept": true}))
        );
    }
}
