//! Active-order index.
//!
//! A bounded, key-indexed queue of in-flight orders. All operations take one
//! mutex, so each call is atomic on its own. Callers doing
//! read-modify-write (index lookup, item fetch, mutate, [`KeyedQueue::replace_at`])
//! must expect positions to shift between calls: `replace_at` rejects the write
//! when the slot no longer holds an item with the same key, and the caller
//! abandons that update.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("item with key {0} already exists")]
    Duplicate(String),

    #[error("queue is at capacity ({0})")]
    Full(usize),

    #[error("item not found")]
    NotFound,

    #[error("index {0} out of bounds")]
    OutOfBounds(usize),

    #[error("slot {index} no longer holds key {key}")]
    KeyMismatch { index: usize, key: String },

    #[error("loader error: {0}")]
    Loader(String),
}

/// Paged source of items used by [`KeyedQueue::fill`].
#[async_trait]
pub trait QueueLoader<T>: Send + Sync {
    async fn load(&self, limit: usize, offset: usize) -> Result<Vec<T>, QueueError>;
}

/// Operations shared by the matching engine, the catch-up worker and test doubles.
#[async_trait]
pub trait KeyedQueue<T>: Send + Sync {
    fn get_items(&self) -> Vec<T>;
    fn get_index(&self, key: &str) -> Option<usize>;
    fn get_item_at(&self, index: usize) -> Option<T>;
    fn enqueue(&self, item: T) -> Result<(), QueueError>;
    /// Remove and return the first item matching `predicate`.
    fn dequeue(&self, predicate: &(dyn Fn(&T) -> bool + Sync)) -> Result<T, QueueError>;
    fn replace_at(&self, index: usize, item: T) -> Result<(), QueueError>;
    /// Top up from the loader, returning how many items were added.
    async fn fill(&self) -> Result<usize, QueueError>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct QueueState<T> {
    items: Vec<T>,
    positions: HashMap<String, usize>,
}

impl<T> QueueState<T> {
    fn reindex(&mut self, key_fn: &(dyn Fn(&T) -> String + Send + Sync)) {
        self.positions = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| (key_fn(item), i))
            .collect();
    }
}

/// Capacity-bounded [`KeyedQueue`] with an injected key function.
pub struct OrderQueue<T> {
    limit: usize,
    key_fn: Box<dyn Fn(&T) -> String + Send + Sync>,
    loader: Box<dyn QueueLoader<T>>,
    state: Mutex<QueueState<T>>,
}

impl<T: Clone + Send + Sync + 'static> OrderQueue<T> {
    pub fn new(
        limit: usize,
        key_fn: impl Fn(&T) -> String + Send + Sync + 'static,
        loader: impl QueueLoader<T> + 'static,
    ) -> Self {
        Self {
            limit,
            key_fn: Box::new(key_fn),
            loader: Box::new(loader),
            state: Mutex::new(QueueState {
                items: Vec::new(),
                positions: HashMap::new(),
            }),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // A panic while holding the lock leaves plain data behind; keep serving it.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> KeyedQueue<T> for OrderQueue<T> {
    fn get_items(&self) -> Vec<T> {
        self.lock().items.clone()
    }

    fn get_index(&self, key: &str) -> Option<usize> {
        self.lock().positions.get(key).copied()
    }

    fn get_item_at(&self, index: usize) -> Option<T> {
        self.lock().items.get(index).cloned()
    }

    fn enqueue(&self, item: T) -> Result<(), QueueError> {
        let key = (self.key_fn)(&item);
        let mut state = self.lock();
        if state.positions.contains_key(&key) {
            return Err(QueueError::Duplicate(key));
        }
        if state.items.len() >= self.limit {
            return Err(QueueError::Full(self.limit));
        }
        let position = state.items.len();
        state.items.push(item);
        state.positions.insert(key, position);
        Ok(())
    }

    fn dequeue(&self, predicate: &(dyn Fn(&T) -> bool + Sync)) -> Result<T, QueueError> {
        let mut state = self.lock();
        let position = state
            .items
            .iter()
            .position(|item| predicate(item))
            .ok_or(QueueError::NotFound)?;
        let item = state.items.remove(position);
        state.reindex(self.key_fn.as_ref());
        Ok(item)
    }

    fn replace_at(&self, index: usize, item: T) -> Result<(), QueueError> {
        let key = (self.key_fn)(&item);
        let mut state = self.lock();
        let current = state
            .items
            .get(index)
            .ok_or(QueueError::OutOfBounds(index))?;
        if (self.key_fn)(current) != key {
            return Err(QueueError::KeyMismatch { index, key });
        }
        state.items[index] = item;
        Ok(())
    }

    async fn fill(&self) -> Result<usize, QueueError> {
        if self.lock().items.len() >= self.limit {
            return Ok(0);
        }

        // The loader pages through every still-active row; items already held
        // are skipped, so the first page is enough to top up.
        let candidates = self.loader.load(self.limit, 0).await?;

        let mut state = self.lock();
        let mut added = 0;
        for item in candidates {
            if state.items.len() >= self.limit {
                break;
            }
            let key = (self.key_fn)(&item);
            if state.positions.contains_key(&key) {
                continue;
            }
            let position = state.items.len();
            state.items.push(item);
            state.positions.insert(key, position);
            added += 1;
        }
        Ok(added)
    }

    fn len(&self) -> usize {
        self.lock().items.len()
    }
}
