use reqwest::Client;
use serde::Deserialize;

const API_BASE: &str = "https://api.themoviedb.org/3";

#[derive(Debug, thiserror::Error)]
pub enum TmdbError {
    #[error("каталог недоступен: {0}")]
    Http(#[from] reqwest::Error),
    #[error("каталог вернул статус {0}")]
    BadStatus(reqwest::StatusCode),
}

/// Фильтры подбора. Жанры объединяются по ИЛИ (так трактует их TMDb
/// в параметре with_genres через запятую).
#[derive(Debug, Clone, Default)]
pub struct DiscoverFilter {
    pub genre_ids: Vec<u64>,
    pub min_rating: f32,
    pub year_from: Option<u16>,
    pub year_to: Option<u16>,
}

#[derive(Clone)]
pub struct TmdbClient {
    api_key: String,
    base_url: String,
    http: Client,
}

impl TmdbClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, API_BASE.to_string())
    }

    /// Для тестов: тот же клиент, но смотрящий на локальный сервер.
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self { api_key, base_url, http: Client::new() }
    }

    /// Подбор фильмов (RU): первая страница по популярности, один запрос,
    /// без ретраев и без кеша.
    pub async fn discover(&self, f: &DiscoverFilter) -> Result<Vec<Movie>, TmdbError> {
        let genres = f
            .genre_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let mut query: Vec<(&str, String)> = vec![
            ("with_genres", genres),
            ("sort_by", "popularity.desc".to_string()),
            ("language", "ru-RU".to_string()),
            ("include_adult", "false".to_string()),
            ("vote_average.gte", f.min_rating.to_string()),
        ];
        if let Some(y) = f.year_from {
            query.push(("primary_release_date.gte", format!("{y}-01-01")));
        }
        if let Some(y) = f.year_to {
            query.push(("primary_release_date.lte", format!("{y}-12-31")));
        }

        let url = format!("{}/discover/movie", self.base_url);
        let resp = self
            .http
            .get(url)
            .query(&query)
            .bearer_auth(self.api_key.to_string())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(TmdbError::BadStatus(resp.status()));
        }
        let data: DiscoverResp = resp.json().await?;
        Ok(data.results)
    }
}

/* ======= DTOs ======= */

#[derive(Deserialize, Debug)]
struct DiscoverResp {
    results: Vec<Movie>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Movie {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub overview: String,
    pub poster_path: Option<String>,
    #[serde(default)]
    pub vote_average: f32,
    pub release_date: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_body() -> serde_json::Value {
        serde_json::json!({
            "page": 1,
            "results": [
                {"id": 27205, "title": "Начало", "overview": "Сны во сне.",
                 "poster_path": "/inception.jpg", "vote_average": 8.4,
                 "release_date": "2010-07-15"},
                {"id": 155, "title": "Тёмный рыцарь", "overview": "",
                 "poster_path": null, "vote_average": 8.5,
                 "release_date": "2008-07-16"}
            ]
        })
    }

    #[tokio::test]
    async fn discover_sends_expected_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/discover/movie"))
            .and(query_param("with_genres", "28,35"))
            .and(query_param("sort_by", "popularity.desc"))
            .and(query_param("language", "ru-RU"))
            .and(query_param("include_adult", "false"))
            .and(query_param("vote_average.gte", "6.5"))
            .and(query_param("primary_release_date.gte", "2015-01-01"))
            .and(query_param("primary_release_date.lte", "2018-12-31"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = TmdbClient::with_base_url("key".into(), server.uri());
        let filter = DiscoverFilter {
            genre_ids: vec![28, 35],
            min_rating: 6.5,
            year_from: Some(2015),
            year_to: Some(2018),
        };
        let movies = client.discover(&filter).await.unwrap();
        assert_eq!(movies.len(), 2);
        assert_eq!(movies[0].id, 27205);
        assert_eq!(movies[1].overview, "");
        assert!(movies[1].poster_path.is_none());
    }

    #[tokio::test]
    async fn discover_skips_date_params_without_years() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/discover/movie"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .mount(&server)
            .await;

        let client = TmdbClient::with_base_url("key".into(), server.uri());
        client
            .discover(&DiscoverFilter { genre_ids: vec![18], min_rating: 0.0, ..Default::default() })
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let q = requests[0].url.query().unwrap_or_default().to_string();
        assert!(!q.contains("primary_release_date"));
    }

    #[tokio::test]
    async fn discover_maps_bad_status_to_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/discover/movie"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = TmdbClient::with_base_url("key".into(), server.uri());
        let err = client.discover(&DiscoverFilter::default()).await.unwrap_err();
        assert!(matches!(err, TmdbError::BadStatus(s) if s.as_u16() == 500));
    }
}
