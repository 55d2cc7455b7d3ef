//! Background enrichment queue.
//!
//! Creating or editing an item never waits for the embedding provider; the
//! write returns and a task is queued here instead. The queue guarantees at
//! most one enrichment in flight per item, and a result computed from stale
//! text is discarded rather than applied.
//!
//! Queue state is mirrored to tasks.json so clients can observe progress and
//! interrupted tasks survive a restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{mpsc, Arc, Mutex, RwLock};
use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::embed::{compose_description, content_hash, EmbeddingProvider};
use crate::items::{CatalogStore, ItemId};
use crate::storage::DataDir;

const QUEUE_DUMP_FILE: &str = "tasks.json";

pub fn now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Task {
    /// request to generate and persist an embedding for an item
    Enrich { item_id: ItemId, owner_id: String },

    /// request to gracefully shut the queue down
    Shutdown,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Error(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskDump {
    pub id: String,
    pub task: Task,
    pub status: TaskStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueDump {
    pub queue: Vec<TaskDump>,
    pub now: u128,
}

impl QueueDump {
    fn empty() -> QueueDump {
        QueueDump {
            queue: vec![],
            now: now(),
        }
    }
}

pub fn read_queue_dump(base: &Path) -> QueueDump {
    let store = match DataDir::new(base) {
        Ok(store) => store,
        Err(err) => {
            log::error!("failed to open queue storage: {err}");
            return QueueDump::empty();
        }
    };

    if !store.exists(QUEUE_DUMP_FILE) {
        return QueueDump::empty();
    }

    match store.read(QUEUE_DUMP_FILE) {
        Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|err| {
            log::warn!("discarding unreadable queue dump: {err}");
            QueueDump::empty()
        }),
        Err(err) => {
            log::error!("failed to read queue dump: {err}");
            QueueDump::empty()
        }
    }
}

fn write_queue_dump(base: &Path, dump: &QueueDump) {
    let store = match DataDir::new(base) {
        Ok(store) => store,
        Err(err) => {
            log::error!("failed to open queue storage: {err}");
            return;
        }
    };

    match serde_json::to_vec_pretty(dump) {
        Ok(data) => {
            if let Err(err) = store.write(QUEUE_DUMP_FILE, &data) {
                log::error!("failed to write queue dump: {err}");
            }
        }
        Err(err) => log::error!("failed to serialize queue dump: {err}"),
    }
}

fn save_task(base: &Path, task: Task, status: TaskStatus) -> String {
    let id = rusty_ulid::generate_ulid_string();

    let mut dump = read_queue_dump(base);
    dump.queue.push(TaskDump {
        id: id.clone(),
        task,
        status,
    });
    dump.now = now();
    write_queue_dump(base, &dump);

    id
}

fn set_status(base: &Path, id: &str, status: TaskStatus) {
    let mut dump = read_queue_dump(base);
    if let Some(entry) = dump.queue.iter_mut().find(|entry| entry.id == id) {
        entry.status = status;
    }
    dump.now = now();
    write_queue_dump(base, &dump);
}

fn remove_task(base: &Path, id: &str) {
    let mut dump = read_queue_dump(base);
    dump.queue.retain(|entry| entry.id != id);
    dump.now = now();
    write_queue_dump(base, &dump);
}

fn throttle(counter: &AtomicU16, config: &RwLock<Config>) {
    while counter.load(Ordering::Relaxed) >= config.read().unwrap().task_queue_max_threads {
        sleep(Duration::from_millis(50));
    }
}

/// One enrichment run: compose, embed, then apply only if the item's text is
/// still the text that was embedded.
pub(crate) fn run_enrich(
    store: &dyn CatalogStore,
    provider: &dyn EmbeddingProvider,
    owner: &str,
    id: &ItemId,
) -> TaskStatus {
    let item = match store.get(owner, id) {
        Err(err) => return TaskStatus::Error(err.to_string()),
        Ok(None) => {
            log::debug!("item {id} disappeared before enrichment");
            return TaskStatus::Done;
        }
        Ok(Some(item)) => item,
    };

    // contentless items have nothing to embed; a later edit re-queues
    let Some(text) = compose_description(&item) else {
        return TaskStatus::Done;
    };
    let hash = content_hash(&text);

    let embedding = match provider.embed(&text) {
        Err(err) => {
            log::warn!("embedding failed for item {id}: {err}");
            return TaskStatus::Error(err.to_string());
        }
        Ok(embedding) => embedding,
    };

    // the item may have been edited while the provider call was in flight;
    // a stale result must not overwrite the newer state
    match store.get(owner, id) {
        Err(err) => return TaskStatus::Error(err.to_string()),
        Ok(None) => return TaskStatus::Done,
        Ok(Some(current)) => {
            let current_hash = compose_description(&current).map(|text| content_hash(&text));
            if current_hash != Some(hash) {
                log::info!("discarding superseded embedding for item {id}");
                return TaskStatus::Done;
            }
        }
    }

    match store.update_embedding(id, hash, embedding) {
        Err(err) => TaskStatus::Error(err.to_string()),
        Ok(()) => TaskStatus::Done,
    }
}

fn start_queue(
    task_rx: mpsc::Receiver<Task>,
    task_tx: mpsc::Sender<Task>,
    store: Arc<dyn CatalogStore>,
    provider: Arc<dyn EmbeddingProvider>,
    config: Arc<RwLock<Config>>,
    base_path: PathBuf,
) {
    let thread_ctr = Arc::new(AtomicU16::new(0));
    let inflight: Arc<Mutex<HashMap<ItemId, bool>>> = Arc::new(Mutex::new(HashMap::new()));

    while let Ok(task) = task_rx.recv() {
        let Task::Enrich { item_id, owner_id } = task else {
            // graceful shutdown: drain running workers first
            while thread_ctr.load(Ordering::Relaxed) > 0 {
                sleep(Duration::from_millis(50));
            }
            return;
        };

        {
            // at most one enrichment in flight per item; a task arriving for
            // a busy item marks a rerun instead of racing it
            let mut inflight = inflight.lock().unwrap();
            if let Some(rerun) = inflight.get_mut(&item_id) {
                *rerun = true;
                log::debug!("enrichment already in flight for item {item_id}, queued rerun");
                continue;
            }
            inflight.insert(item_id.clone(), false);
        }

        let dump_id = save_task(
            &base_path,
            Task::Enrich {
                item_id: item_id.clone(),
                owner_id: owner_id.clone(),
            },
            TaskStatus::Pending,
        );

        let task_handle = std::thread::spawn({
            let store = store.clone();
            let provider = provider.clone();
            let config = config.clone();
            let thread_ctr = thread_ctr.clone();
            let inflight = inflight.clone();
            let task_tx = task_tx.clone();
            let base_path = base_path.clone();
            let item_id = item_id.clone();
            let owner_id = owner_id.clone();
            let dump_id = dump_id.clone();
            move || {
                throttle(&thread_ctr, &config);
                thread_ctr.fetch_add(1, Ordering::Relaxed);
                set_status(&base_path, &dump_id, TaskStatus::InProgress);

                let status = run_enrich(store.as_ref(), provider.as_ref(), &owner_id, &item_id);
                set_status(&base_path, &dump_id, status);

                let rerun = inflight.lock().unwrap().remove(&item_id).unwrap_or(false);
                if rerun {
                    let _ = task_tx.send(Task::Enrich { item_id, owner_id });
                }

                // remove the dump entry a bit later to give clients an
                // opportunity to observe the outcome
                std::thread::spawn(move || {
                    sleep(Duration::from_secs(10));
                    remove_task(&base_path, &dump_id);
                });
            }
        });

        // handle worker panics
        std::thread::spawn({
            let thread_ctr = thread_ctr.clone();
            let inflight = inflight.clone();
            let item_id = item_id.clone();
            move || {
                if let Err(err) = task_handle.join() {
                    log::error!("enrichment worker panicked: {err:?}");
                    inflight.lock().unwrap().remove(&item_id);
                }
                thread_ctr.fetch_sub(1, Ordering::Relaxed);
            }
        });
    }
}

/// Handle to the running enrichment queue.
pub struct Enricher {
    task_tx: mpsc::Sender<Task>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Enricher {
    /// Start the queue worker, replaying tasks interrupted by a previous
    /// shutdown.
    pub fn start(
        store: Arc<dyn CatalogStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: Arc<RwLock<Config>>,
        base_path: PathBuf,
    ) -> Enricher {
        let (task_tx, task_rx) = mpsc::channel::<Task>();

        let mut dump = read_queue_dump(&base_path);
        let interrupted = std::mem::take(&mut dump.queue);
        dump.now = now();
        write_queue_dump(&base_path, &dump);

        for entry in interrupted {
            if matches!(entry.status, TaskStatus::Done) {
                continue;
            }
            log::info!("restarting interrupted task {:?}", entry.task);
            if let Err(err) = task_tx.send(entry.task) {
                log::error!("failed to requeue interrupted task: {err:?}");
            }
        }

        let handle = std::thread::spawn({
            let task_tx = task_tx.clone();
            move || start_queue(task_rx, task_tx, store, provider, config, base_path)
        });

        Enricher {
            task_tx,
            handle: Some(handle),
        }
    }

    pub fn enqueue(&self, item_id: ItemId, owner_id: &str) {
        let task = Task::Enrich {
            item_id,
            owner_id: owner_id.to_string(),
        };
        if let Err(err) = self.task_tx.send(task) {
            log::error!("failed to queue enrichment: {err:?}");
        }
    }

    /// Stop accepting work and wait for running enrichments to finish.
    pub fn shutdown(&mut self) {
        let _ = self.task_tx.send(Task::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
