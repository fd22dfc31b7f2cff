use crate::selection::SelectionEngine;
use crate::state::{ChatState, DialogStore, Step, parse_rating, parse_year_range};
use crate::storage::{LikedMovie, Storage};
use crate::tmdb::Movie;
use chrono::Utc;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    prelude::*,
    types::{CallbackQuery, ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode},
    utils::command::BotCommands,
};

/// Жанры TMDb: подпись кнопки -> id. Порядок фиксирует раскладку клавиатуры.
static GENRES: &[(&str, u64)] = &[
    ("Action", 28),
    ("Adventure", 12),
    ("Animation", 16),
    ("Comedy", 35),
    ("Crime", 80),
    ("Documentary", 99),
    ("Drama", 18),
    ("Family", 10751),
    ("Fantasy", 14),
    ("History", 36),
    ("Horror", 27),
    ("Music", 10402),
    ("Mystery", 9648),
    ("Romance", 10749),
    ("Sci-Fi", 878),
    ("TV Movie", 10770),
    ("Thriller", 53),
    ("War", 10752),
    ("Western", 37),
];

/* ====== Команды ====== */
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Команды:")]
enum Command {
    #[command(description = "начать работу")]
    Start,
    #[command(description = "подобрать случайный фильм")]
    Random,
    #[command(description = "список «посмотреть позже»")]
    Liked,
    #[command(description = "помощь")]
    Help,
}

/* ====== Callback-кнопки ======
   Разбираем callback data один раз на границе, дальше по коду ходит
   только закрытый enum. */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    ToggleGenre(u64),
    GenreDone,
    TryAgain,
    Reset,
    Save(u64),
    RemoveSaved(u64),
}

impl Action {
    fn parse(data: &str) -> Option<Self> {
        if let Some(rest) = data.strip_prefix("toggle_genre:") {
            return rest.parse().ok().map(Action::ToggleGenre);
        }
        if let Some(rest) = data.strip_prefix("like_movie:") {
            return rest.parse().ok().map(Action::Save);
        }
        if let Some(rest) = data.strip_prefix("remove_liked:") {
            return rest.parse().ok().map(Action::RemoveSaved);
        }
        match data {
            "genre_done" => Some(Action::GenreDone),
            "try_again" => Some(Action::TryAgain),
            "reset" => Some(Action::Reset),
            _ => None,
        }
    }
}

pub async fn run(bot: Bot, engine: SelectionEngine, storage: Storage) {
    let dialogs = DialogStore::new();

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .branch(
                    dptree::entry().filter_command::<Command>().endpoint({
                        let dialogs = dialogs.clone();
                        let storage = storage.clone();
                        move |bot: Bot, msg: Message, cmd: Command| {
                            let dialogs = dialogs.clone();
                            let storage = storage.clone();
                            async move { on_command(bot, msg, cmd, &dialogs, &storage).await }
                        }
                    }),
                )
                .branch({
                    let dialogs = dialogs.clone();
                    let engine = engine.clone();
                    dptree::endpoint(move |bot: Bot, msg: Message| {
                        let dialogs = dialogs.clone();
                        let engine = engine.clone();
                        async move { on_text(bot, msg, &dialogs, &engine).await }
                    })
                }),
        )
        .branch(Update::filter_callback_query().endpoint({
            let dialogs = dialogs.clone();
            let engine = engine.clone();
            let storage = storage.clone();
            move |bot: Bot, q: CallbackQuery| {
                let dialogs = dialogs.clone();
                let engine = engine.clone();
                let storage = storage.clone();
                async move { on_callback(bot, q, &dialogs, &engine, &storage).await }
            }
        }));

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

/* ====== Команды ====== */
async fn on_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    dialogs: &DialogStore,
    storage: &Storage,
) -> ResponseResult<()> {
    let chat = msg.chat.id;
    match cmd {
        Command::Start => {
            bot.send_message(chat, "Привет! Напиши /random — помогу выбрать фильм 🎬").await?;
        }
        Command::Random => {
            dialogs.put(chat, ChatState::default()).await;
            bot.send_message(chat, "Выбери жанры:")
                .reply_markup(genre_keyboard(&[]))
                .await?;
        }
        Command::Liked => send_liked_list(&bot, chat, storage).await?,
        Command::Help => {
            bot.send_message(chat, Command::descriptions().to_string()).await?;
        }
    }
    Ok(())
}

/* ====== Свободный текст: год и рейтинг ====== */
async fn on_text(
    bot: Bot,
    msg: Message,
    dialogs: &DialogStore,
    engine: &SelectionEngine,
) -> ResponseResult<()> {
    let Some(text) = msg.text() else { return Ok(()) };
    let chat = msg.chat.id;
    // текст вне диалога (или на шаге выбора жанров) молча игнорируем
    let Some(state) = dialogs.get(chat).await else { return Ok(()) };

    match state.step {
        Step::AwaitingYear => {
            let years = parse_year_range(text);
            dialogs
                .update(chat, |s| {
                    s.years = years;
                    s.step = Step::AwaitingRating;
                })
                .await;
            bot.send_message(chat, "А теперь введи минимальный рейтинг от 0 до 10 (например: 7.5):")
                .await?;
        }
        Step::AwaitingRating => match parse_rating(text) {
            Some(rating) => {
                dialogs
                    .update(chat, |s| {
                        s.rating = rating;
                        s.step = Step::Idle;
                    })
                    .await;
                send_random_movie(&bot, chat, dialogs, engine).await?;
            }
            None => {
                bot.send_message(chat, "Рейтинг должен быть числом от 0 до 10. Попробуй снова.")
                    .await?;
            }
        },
        Step::SelectingGenres | Step::Idle => {}
    }
    Ok(())
}

/* ====== Callback-кнопки ====== */
async fn on_callback(
    bot: Bot,
    q: CallbackQuery,
    dialogs: &DialogStore,
    engine: &SelectionEngine,
    storage: &Storage,
) -> ResponseResult<()> {
    let Some(data) = q.data.clone() else { return Ok(()) };
    let Some(message) = q.message.as_ref() else { return Ok(()) };
    let chat = message.chat().id;
    let message_id = message.id();

    let Some(action) = Action::parse(&data) else {
        return answer_cb(&bot, &q, "Неизвестная команда").await;
    };

    match action {
        Action::ToggleGenre(genre_id) => {
            let genres = dialogs
                .update_or_default(chat, |s| {
                    s.toggle_genre(genre_id);
                    s.genres.clone()
                })
                .await;
            // клавиатура могла уже исчезнуть — не страшно
            if let Err(e) = bot
                .edit_message_reply_markup(chat, message_id)
                .reply_markup(genre_keyboard(&genres))
                .await
            {
                tracing::warn!(chat = chat.0, "не удалось обновить клавиатуру жанров: {e}");
            }
            bot.answer_callback_query(q.id.clone()).await?;
        }
        Action::GenreDone => {
            let genres = dialogs.get(chat).await.map(|s| s.genres).unwrap_or_default();
            if genres.is_empty() {
                return alert_cb(&bot, &q, "Выбери хотя бы один жанр!").await;
            }
            dialogs.update(chat, |s| s.step = Step::AwaitingYear).await;
            bot.send_message(chat, "Теперь введи диапазон лет (например: 2010-2020):").await?;
            bot.answer_callback_query(q.id.clone()).await?;
        }
        Action::TryAgain => {
            send_random_movie(&bot, chat, dialogs, engine).await?;
            bot.answer_callback_query(q.id.clone()).await?;
        }
        Action::Reset => {
            // история показов живёт в Storage и сброс её не трогает
            dialogs.put(chat, ChatState::default()).await;
            bot.send_message(chat, "Сброс настроек. Выбери жанры:")
                .reply_markup(genre_keyboard(&[]))
                .await?;
            bot.answer_callback_query(q.id.clone()).await?;
        }
        Action::Save(movie_id) => {
            let movie = dialogs
                .get(chat)
                .await
                .and_then(|s| s.offers.iter().find(|m| m.id == movie_id).cloned());
            let Some(movie) = movie else {
                return answer_cb(&bot, &q, "Не нашёл фильм среди недавних карточек").await;
            };
            let record = LikedMovie {
                id: movie.id,
                title: movie.title.clone(),
                poster_url: movie.poster_path.as_deref().map(poster_url),
                overview: movie.overview.clone(),
                added_by: q.from.full_name(),
                added_at: Utc::now(),
            };
            let added = storage.save_movie(chat.0, record).await.map_err(to_req_err)?;
            if added {
                answer_cb(&bot, &q, "Добавлено в «посмотреть позже» ✅").await?;
            } else {
                answer_cb(&bot, &q, "Уже в списке").await?;
            }
        }
        Action::RemoveSaved(movie_id) => {
            storage.delete_saved(chat.0, movie_id).await.map_err(to_req_err)?;
            // карточка могла быть удалена руками
            if let Err(e) = bot.delete_message(chat, message_id).await {
                tracing::warn!(chat = chat.0, "не удалось удалить карточку: {e}");
            }
            answer_cb(&bot, &q, "Удалено из списка ✅").await?;
        }
    }
    Ok(())
}

/* ====== Выдача случайного фильма ====== */
async fn send_random_movie(
    bot: &Bot,
    chat: ChatId,
    dialogs: &DialogStore,
    engine: &SelectionEngine,
) -> ResponseResult<()> {
    let Some(state) = dialogs.get(chat).await else {
        bot.send_message(chat, "Начни с команды /random").await?;
        return Ok(());
    };

    let filter = crate::tmdb::DiscoverFilter {
        genre_ids: state.genres.clone(),
        min_rating: state.rating,
        year_from: state.years.map(|(from, _)| from),
        year_to: state.years.map(|(_, to)| to),
    };

    let movie = match engine.select_movie(chat, &filter).await {
        Ok(Some(movie)) => movie,
        Ok(None) => {
            bot.send_message(chat, "Все фильмы уже были показаны. Сбрось настройки или измени параметры.")
                .await?;
            return Ok(());
        }
        Err(e) => {
            tracing::warn!(chat = chat.0, "подбор не удался: {e}");
            bot.send_message(chat, "Каталог фильмов сейчас недоступен. Попробуй ещё раз чуть позже.")
                .await?;
            return Ok(());
        }
    };

    let caption = movie_caption(&movie);
    let kb = result_keyboard(movie.id);

    let sent = match movie.poster_path.as_deref() {
        Some(p) => match fetch_image(&poster_url(p)).await {
            Ok(bytes) => {
                bot.send_photo(
                    chat,
                    InputFile::memory(bytes).file_name(format!("poster_{}.jpg", movie.id)),
                )
                .caption(caption)
                .parse_mode(ParseMode::Html)
                .reply_markup(kb)
                .await?
            }
            Err(e) => {
                tracing::warn!(chat = chat.0, "постер не загрузился: {e}");
                bot.send_message(chat, movie_caption(&movie))
                    .parse_mode(ParseMode::Html)
                    .reply_markup(result_keyboard(movie.id))
                    .await?
            }
        },
        None => {
            bot.send_message(chat, caption)
                .parse_mode(ParseMode::Html)
                .reply_markup(kb)
                .await?
        }
    };

    let evicted = dialogs
        .update(chat, |s| {
            s.push_offer(movie.clone());
            s.push_result_message(sent.id)
        })
        .await
        .flatten();
    // держим не больше двух карточек; самая старая могла быть удалена руками
    if let Some(old) = evicted {
        if let Err(e) = bot.delete_message(chat, old).await {
            tracing::warn!(chat = chat.0, "не удалось удалить старую карточку: {e}");
        }
    }
    Ok(())
}

/* ====== /liked: список «посмотреть позже» ====== */
async fn send_liked_list(bot: &Bot, chat: ChatId, storage: &Storage) -> ResponseResult<()> {
    let list = storage.list_saved(chat.0).await;
    if list.is_empty() {
        bot.send_message(chat, "Список «посмотреть позже» пуст 💤").await?;
        return Ok(());
    }
    for m in &list {
        let caption = format!("<b>{}</b>", html_escape(&m.title));
        let kb = liked_keyboard(m.id);
        let photo = match &m.poster_url {
            Some(url) => fetch_image(url).await.ok(),
            None => None,
        };
        match photo {
            Some(bytes) => {
                bot.send_photo(
                    chat,
                    InputFile::memory(bytes).file_name(format!("poster_{}.jpg", m.id)),
                )
                .caption(caption)
                .parse_mode(ParseMode::Html)
                .reply_markup(kb)
                .await?;
            }
            None => {
                bot.send_message(chat, caption)
                    .parse_mode(ParseMode::Html)
                    .reply_markup(kb)
                    .await?;
            }
        }
    }
    Ok(())
}

/* ====== Кнопки ====== */

fn genre_keyboard(selected: &[u64]) -> InlineKeyboardMarkup {
    let buttons: Vec<InlineKeyboardButton> = GENRES
        .iter()
        .map(|(name, id)| {
            let mark = if selected.contains(id) { "✅" } else { "➕" };
            InlineKeyboardButton::callback(format!("{mark} {name}"), format!("toggle_genre:{id}"))
        })
        .collect();
    // по 3 в строке, последняя строка — «Готово»
    let mut rows: Vec<Vec<InlineKeyboardButton>> =
        buttons.chunks(3).map(|chunk| chunk.to_vec()).collect();
    rows.push(vec![InlineKeyboardButton::callback("🎬 Готово", "genre_done")]);
    InlineKeyboardMarkup::new(rows)
}

fn result_keyboard(movie_id: u64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new([[
        InlineKeyboardButton::callback("🔁 Ещё раз", "try_again"),
        InlineKeyboardButton::callback("📌 Сохранить", format!("like_movie:{movie_id}")),
        InlineKeyboardButton::callback("🗑 Сбросить", "reset"),
    ]])
}

fn liked_keyboard(movie_id: u64) -> InlineKeyboardMarkup {
    // обе кнопки ведут на удаление из списка, различается только подпись
    InlineKeyboardMarkup::new([[
        InlineKeyboardButton::callback("👀 Просмотрено", format!("remove_liked:{movie_id}")),
        InlineKeyboardButton::callback("❌ Удалить", format!("remove_liked:{movie_id}")),
    ]])
}

/* ====== Вспомогательные ====== */

fn movie_caption(m: &Movie) -> String {
    let title = html_escape(&m.title);
    let overview = if m.overview.trim().is_empty() {
        "<i>Описание отсутствует.</i>".to_string()
    } else {
        clip(&html_escape(&m.overview), 900)
    };
    let watch = watch_search_url(&m.title);
    format!("<b>{title}</b>\n\n{overview}\n\n<a href=\"{watch}\">Смотреть на HDRezka</a>")
}

fn poster_url(poster_path: &str) -> String {
    format!("https://image.tmdb.org/t/p/w500{poster_path}")
}

fn watch_search_url(title: &str) -> String {
    format!(
        "https://hdrezka.ag/search/?do=search&subaction=search&q={}",
        urlencoding::encode(title)
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn clip(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect::<String>() + "…"
    }
}

async fn answer_cb(bot: &Bot, q: &CallbackQuery, text: &str) -> ResponseResult<()> {
    bot.answer_callback_query(q.id.clone())
        .text(text)
        .show_alert(false)
        .await?;
    Ok(())
}

async fn alert_cb(bot: &Bot, q: &CallbackQuery, text: &str) -> ResponseResult<()> {
    bot.answer_callback_query(q.id.clone())
        .text(text)
        .show_alert(true)
        .await?;
    Ok(())
}

/* ====== Загрузка постера байтами (устойчиво к редиректам/CDN) ====== */
async fn fetch_image(url: &str) -> Result<Vec<u8>, teloxide::RequestError> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(15))
        .user_agent("Mozilla/5.0 (compatible; tg-bot/1.0)")
        .build()
        .map_err(to_req_err)?;
    let resp = client
        .get(url)
        .header(reqwest::header::ACCEPT, "image/*")
        .send()
        .await
        .map_err(to_req_err)?;
    if !resp.status().is_success() {
        return Err(to_req_err(format!("status {}", resp.status())));
    }
    let bytes = resp.bytes().await.map_err(to_req_err)?;
    Ok(bytes.to_vec())
}

fn to_req_err<E: std::fmt::Display>(e: E) -> teloxide::RequestError {
    teloxide::RequestError::Io(std::sync::Arc::new(std::io::Error::new(
        std::io::ErrorKind::Other,
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parse_covers_all_tags() {
        assert_eq!(Action::parse("toggle_genre:28"), Some(Action::ToggleGenre(28)));
        assert_eq!(Action::parse("genre_done"), Some(Action::GenreDone));
        assert_eq!(Action::parse("try_again"), Some(Action::TryAgain));
        assert_eq!(Action::parse("reset"), Some(Action::Reset));
        assert_eq!(Action::parse("like_movie:603"), Some(Action::Save(603)));
        assert_eq!(Action::parse("remove_liked:603"), Some(Action::RemoveSaved(603)));
    }

    #[test]
    fn action_parse_rejects_garbage() {
        assert_eq!(Action::parse("toggle_genre:abc"), None);
        assert_eq!(Action::parse("like_movie:"), None);
        assert_eq!(Action::parse("unknown"), None);
        assert_eq!(Action::parse(""), None);
    }

    #[test]
    fn genre_keyboard_marks_selected() {
        let kb = genre_keyboard(&[28, 35]);
        // 19 жанров по 3 в строке + строка «Готово»
        assert_eq!(kb.inline_keyboard.len(), 8);
        let buttons: Vec<&InlineKeyboardButton> = kb.inline_keyboard.iter().flatten().collect();
        assert_eq!(buttons.len(), 20);
        assert_eq!(buttons[0].text, "✅ Action");
        assert_eq!(buttons[1].text, "➕ Adventure");
        assert_eq!(buttons[3].text, "✅ Comedy");
        assert_eq!(buttons[19].text, "🎬 Готово");
    }

    #[test]
    fn caption_escapes_html_and_links_search() {
        let movie = Movie {
            id: 1,
            title: "Кошки & <мышки>".to_string(),
            overview: String::new(),
            poster_path: None,
            vote_average: 5.0,
            release_date: None,
        };
        let caption = movie_caption(&movie);
        assert!(caption.contains("Кошки &amp; &lt;мышки&gt;"));
        assert!(caption.contains("<i>Описание отсутствует.</i>"));
        assert!(caption.contains("hdrezka.ag/search"));
        assert!(!caption.contains("q=Кошки &"));
    }
}
