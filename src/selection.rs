use crate::storage::Storage;
use crate::tmdb::{DiscoverFilter, Movie, TmdbClient, TmdbError};
use rand::seq::SliceRandom;
use teloxide::types::ChatId;

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error(transparent)]
    Catalog(#[from] TmdbError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Подбор случайного фильма: каталог минус уже показанное в этом чате.
#[derive(Clone)]
pub struct SelectionEngine {
    tmdb: TmdbClient,
    storage: Storage,
}

impl SelectionEngine {
    pub fn new(tmdb: TmdbClient, storage: Storage) -> Self {
        Self { tmdb, storage }
    }

    /// None — всё подходящее уже показывали; историю в этом случае не трогаем.
    /// Сортировка по популярности влияет только на то, какая страница выдачи
    /// пришла из каталога; сам выбор — равновероятный, без весов.
    pub async fn select_movie(
        &self,
        chat_id: ChatId,
        filter: &DiscoverFilter,
    ) -> Result<Option<Movie>, SelectError> {
        let candidates = self.tmdb.discover(filter).await?;
        let shown = self.storage.shown_set(chat_id.0).await;
        let fresh: Vec<&Movie> = candidates.iter().filter(|m| !shown.contains(&m.id)).collect();
        tracing::debug!(
            chat = chat_id.0,
            candidates = candidates.len(),
            fresh = fresh.len(),
            "подбор фильма"
        );

        let Some(movie) = fresh.choose(&mut rand::thread_rng()).copied() else {
            return Ok(None);
        };
        // история пишется до возврата результата
        self.storage.mark_shown(chat_id.0, movie.id).await?;
        Ok(Some(movie.clone()))
    }
}
