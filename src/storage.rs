use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap},
    path::PathBuf,
    sync::Arc,
};
use tokio::fs;
use tokio::sync::RwLock;

/// Запись «посмотреть позже». Ключ уникальности — (chat_id, id).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LikedMovie {
    pub id: u64,
    pub title: String,
    pub poster_url: Option<String>,
    pub overview: String,
    pub added_by: String,
    pub added_at: DateTime<Utc>,
}

/// Две логические таблицы в одном снапшоте:
/// liked — закладки чата (в порядке добавления),
/// shown — id уже показанных фильмов (без TTL, чистится только вручную... никак).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct FileState {
    version: u32,
    liked: HashMap<i64, Vec<LikedMovie>>,
    shown: HashMap<i64, BTreeSet<u64>>,
}

#[derive(Clone)]
pub struct Storage {
    inner: Arc<RwLock<FileState>>,
    path: PathBuf,
}

impl Storage {
    pub async fn new(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let state = if fs::try_exists(&path).await.unwrap_or(false) {
            let data = fs::read(&path).await?;
            match serde_json::from_slice::<FileState>(&data) {
                Ok(mut s) => {
                    if s.version == 0 {
                        s.version = 1;
                    }
                    s
                }
                Err(_) => FileState { version: 1, ..Default::default() },
            }
        } else {
            FileState { version: 1, ..Default::default() }
        };
        Ok(Self { inner: Arc::new(RwLock::new(state)), path })
    }

    pub async fn shown_set(&self, chat_id: i64) -> BTreeSet<u64> {
        let guard = self.inner.read().await;
        guard.shown.get(&chat_id).cloned().unwrap_or_default()
    }

    pub async fn is_shown(&self, chat_id: i64, movie_id: u64) -> bool {
        let guard = self.inner.read().await;
        guard.shown.get(&chat_id).is_some_and(|s| s.contains(&movie_id))
    }

    /// Идемпотентно: повторная пометка — не ошибка и не лишняя запись на диск.
    pub async fn mark_shown(&self, chat_id: i64, movie_id: u64) -> anyhow::Result<()> {
        let inserted = {
            let mut guard = self.inner.write().await;
            guard.shown.entry(chat_id).or_default().insert(movie_id)
        };
        if inserted {
            self.flush().await?;
        }
        Ok(())
    }

    /// Идемпотентная вставка: дубликат по (chat_id, id) игнорируется,
    /// первая запись остаётся как есть. Возвращает true, если добавили.
    pub async fn save_movie(&self, chat_id: i64, m: LikedMovie) -> anyhow::Result<bool> {
        let added = {
            let mut guard = self.inner.write().await;
            let entry = guard.liked.entry(chat_id).or_default();
            if entry.iter().any(|x| x.id == m.id) {
                false
            } else {
                entry.push(m);
                true
            }
        };
        if added {
            self.flush().await?;
        }
        Ok(added)
    }

    pub async fn list_saved(&self, chat_id: i64) -> Vec<LikedMovie> {
        let guard = self.inner.read().await;
        guard.liked.get(&chat_id).cloned().unwrap_or_default()
    }

    pub async fn delete_saved(&self, chat_id: i64, movie_id: u64) -> anyhow::Result<bool> {
        let removed = {
            let mut guard = self.inner.write().await;
            if let Some(list) = guard.liked.get_mut(&chat_id) {
                let before = list.len();
                list.retain(|m| m.id != movie_id);
                list.len() < before
            } else {
                false
            }
        };
        if removed {
            self.flush().await?;
        }
        Ok(removed)
    }

    async fn flush(&self) -> anyhow::Result<()> {
        // снапшот клонируем под read-локом, пишем вне лока
        let snapshot = {
            let guard = self.inner.read().await;
            serde_json::to_vec_pretty(&*guard)?
        };
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &snapshot).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
