use crate::tmdb::Movie;
use std::{collections::HashMap, sync::Arc};
use teloxide::types::{ChatId, MessageId};
use tokio::sync::RwLock;

/// Сколько последних карточек с результатом держим в чате.
pub const MAX_RESULT_MESSAGES: usize = 2;

/// Сколько последних предложенных фильмов помним, чтобы кнопка
/// «Сохранить» могла найти полные данные по id.
const MAX_OFFERS: usize = 10;

/// Шаг диалога. Свободный текст обрабатывается только на шагах
/// AwaitingYear / AwaitingRating, всё остальное молча игнорируется.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Step {
    #[default]
    SelectingGenres,
    AwaitingYear,
    AwaitingRating,
    Idle,
}

#[derive(Debug, Clone, Default)]
pub struct ChatState {
    /// Выбранные жанры в порядке нажатия.
    pub genres: Vec<u64>,
    pub step: Step,
    pub years: Option<(u16, u16)>,
    pub rating: f32,
    /// id последних карточек с результатом, не больше MAX_RESULT_MESSAGES.
    pub last_messages: Vec<MessageId>,
    /// Последние предложенные фильмы (источник данных для «Сохранить»).
    pub offers: Vec<Movie>,
}

impl ChatState {
    pub fn toggle_genre(&mut self, genre_id: u64) {
        if let Some(pos) = self.genres.iter().position(|&g| g == genre_id) {
            self.genres.remove(pos);
        } else {
            self.genres.push(genre_id);
        }
    }

    /// Запоминает id новой карточки; если лимит превышен, возвращает id
    /// самой старой — её надо удалить из чата.
    pub fn push_result_message(&mut self, id: MessageId) -> Option<MessageId> {
        let evicted = if self.last_messages.len() >= MAX_RESULT_MESSAGES {
            Some(self.last_messages.remove(0))
        } else {
            None
        };
        self.last_messages.push(id);
        evicted
    }

    pub fn push_offer(&mut self, movie: Movie) {
        self.offers.retain(|m| m.id != movie.id);
        self.offers.push(movie);
        if self.offers.len() > MAX_OFFERS {
            self.offers.remove(0);
        }
    }
}

/// Явное хранилище состояний диалогов вместо глобальной мапы: chat -> ChatState.
/// Живёт всё время процесса, размер ограничен числом активных чатов.
#[derive(Clone, Default)]
pub struct DialogStore {
    inner: Arc<RwLock<HashMap<ChatId, ChatState>>>,
}

impl DialogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, chat: ChatId) -> Option<ChatState> {
        self.inner.read().await.get(&chat).cloned()
    }

    pub async fn put(&self, chat: ChatId, state: ChatState) {
        self.inner.write().await.insert(chat, state);
    }

    /// Правка существующего состояния; None, если диалог не начат.
    pub async fn update<R>(
        &self,
        chat: ChatId,
        f: impl FnOnce(&mut ChatState) -> R,
    ) -> Option<R> {
        let mut guard = self.inner.write().await;
        guard.get_mut(&chat).map(f)
    }

    /// То же, но с созданием пустого состояния, если его ещё нет.
    pub async fn update_or_default<R>(
        &self,
        chat: ChatId,
        f: impl FnOnce(&mut ChatState) -> R,
    ) -> R {
        let mut guard = self.inner.write().await;
        f(guard.entry(chat).or_default())
    }
}

/* ====== Разбор пользовательского ввода ====== */

/// "2015" -> (2015, 2015); "2010-2020" -> (2010, 2020); всё остальное -> None.
/// Кривой ввод (например "2010-") намеренно трактуется как «без ограничения
/// по годам», без предупреждения — так вёл себя исходный бот, и это может
/// удивлять пользователей.
pub fn parse_year_range(text: &str) -> Option<(u16, u16)> {
    let text = text.trim();
    if let Some((from, to)) = text.split_once('-') {
        if !from.is_empty()
            && !to.is_empty()
            && from.chars().all(|c| c.is_ascii_digit())
            && to.chars().all(|c| c.is_ascii_digit())
        {
            return from.parse().ok().zip(to.parse().ok());
        }
        return None;
    }
    if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
        return text.parse().ok().map(|y| (y, y));
    }
    None
}

/// Рейтинг: число в [0, 10] включительно, иначе None (шаг не продвигается).
pub fn parse_rating(text: &str) -> Option<f32> {
    let rating: f32 = text.trim().parse().ok()?;
    (0.0..=10.0).contains(&rating).then_some(rating)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_range_parses_single_year() {
        assert_eq!(parse_year_range("2015"), Some((2015, 2015)));
        assert_eq!(parse_year_range("  1999 "), Some((1999, 1999)));
    }

    #[test]
    fn year_range_parses_hyphenated_range() {
        assert_eq!(parse_year_range("2010-2020"), Some((2010, 2020)));
    }

    #[test]
    fn year_range_falls_back_to_none() {
        assert_eq!(parse_year_range("abc"), None);
        assert_eq!(parse_year_range("2010-"), None);
        assert_eq!(parse_year_range("-2010"), None);
        assert_eq!(parse_year_range("2010-20xx"), None);
        assert_eq!(parse_year_range(""), None);
    }

    #[test]
    fn rating_accepts_range_inclusive() {
        assert_eq!(parse_rating("7.5"), Some(7.5));
        assert_eq!(parse_rating("0"), Some(0.0));
        assert_eq!(parse_rating("10"), Some(10.0));
    }

    #[test]
    fn rating_rejects_out_of_range_and_garbage() {
        assert_eq!(parse_rating("11"), None);
        assert_eq!(parse_rating("-1"), None);
        assert_eq!(parse_rating("x"), None);
    }

    #[test]
    fn toggle_genre_keeps_press_order() {
        let mut state = ChatState::default();
        state.toggle_genre(35);
        state.toggle_genre(28);
        state.toggle_genre(18);
        assert_eq!(state.genres, [35, 28, 18]);

        state.toggle_genre(28);
        assert_eq!(state.genres, [35, 18]);
    }

    #[test]
    fn offers_dedup_by_id_and_stay_bounded() {
        fn movie(id: u64) -> Movie {
            Movie {
                id,
                title: format!("m{id}"),
                overview: String::new(),
                poster_path: None,
                vote_average: 0.0,
                release_date: None,
            }
        }

        let mut state = ChatState::default();
        for id in 0..12 {
            state.push_offer(movie(id));
        }
        assert_eq!(state.offers.len(), 10);
        assert_eq!(state.offers[0].id, 2);

        state.push_offer(movie(5));
        assert_eq!(state.offers.len(), 10);
        assert_eq!(state.offers.last().unwrap().id, 5);
    }

    #[test]
    fn result_message_ring_evicts_oldest() {
        let mut state = ChatState::default();
        assert_eq!(state.push_result_message(MessageId(1)), None);
        assert_eq!(state.push_result_message(MessageId(2)), None);
        assert_eq!(state.push_result_message(MessageId(3)), Some(MessageId(1)));
        assert_eq!(state.last_messages, [MessageId(2), MessageId(3)]);
    }

    #[tokio::test]
    async fn dialog_store_update_requires_existing_state() {
        let store = DialogStore::new();
        let chat = ChatId(1);

        assert!(store.update(chat, |s| s.step = Step::Idle).await.is_none());

        store.put(chat, ChatState::default()).await;
        store.update(chat, |s| s.toggle_genre(28)).await.unwrap();
        assert_eq!(store.get(chat).await.unwrap().genres, [28]);
    }
}
