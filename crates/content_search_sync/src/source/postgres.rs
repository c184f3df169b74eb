//! Postgres implementation of [`Source`], using the same background-driven
//! connection handling and `with_timeout`-wrapped round-trips as the rest of
//! this workspace's Postgres access layer, trimmed down to the single
//! non-pooled connection this design calls for: the Coordinator drives one
//! `PostgresSource` for the length of one pipeline pass, and any open axis
//! scan shares that same connection rather than opening its own.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{
    DateTime,
    Utc,
};
use tokio_postgres::{
    types::ToSql,
    Client,
    NoTls,
    Row,
};
use uuid::Uuid;

use super::{
    split_bunch,
    AxisRow,
    AxisScan,
    IdBunch,
    RawFilm,
    RawFilmPerson,
    RawGenre,
    RawPerson,
    Source,
};
use crate::{
    config::PostgresConfig,
    entity::Axis,
    errors::EtlError,
};

/// Round-trip budget for any single statement; expired timeouts are
/// classified as a source-connection error and fed to the outer backoff.
const STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

fn source_err(context: &'static str, e: impl std::error::Error + Send + Sync + 'static) -> EtlError {
    EtlError::SourceConnection(anyhow::Error::new(e).context(context))
}

async fn with_timeout<T, E, F>(fut: F) -> Result<T, EtlError>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    match tokio::time::timeout(STATEMENT_TIMEOUT, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(source_err("postgres call failed", e)),
        Err(_) => Err(EtlError::SourceConnection(anyhow::anyhow!(
            "postgres call exceeded {:?}",
            STATEMENT_TIMEOUT
        ))),
    }
}

/// A single, non-shared connection to the source database, set
/// autocommit-equivalent (no explicit transaction wraps any read this crate
/// issues). Held behind an `Arc` rather than owned outright: `Client`'s
/// methods all take `&self` (it talks to its background connection task
/// over a channel), so an axis scan can carry its own cloned handle and
/// keep making page queries across the span of a pipeline pass, at the same
/// time the Coordinator issues joiner queries over the same physical
/// connection from `fetch_films`/`fetch_genres`/`fetch_persons`.
pub struct PostgresSource {
    client: Arc<Client>,
    fetch_size: i32,
}

impl PostgresSource {
    pub async fn connect(config: &PostgresConfig, fetch_size: i32) -> Result<Self, EtlError> {
        let conn_string = config.connection_string();
        let (client, connection) = with_timeout(tokio_postgres::connect(&conn_string, NoTls)).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection driver exited with an error");
            }
        });
        Ok(Self {
            client: Arc::new(client),
            fetch_size,
        })
    }

    async fn fetch_rows(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>, EtlError> {
        with_timeout(self.client.query(sql, params)).await
    }
}

#[async_trait]
impl Source for PostgresSource {
    async fn scan_axis(&mut self, axis: Axis, since: &str) -> Result<Box<dyn AxisScan + Send>, EtlError> {
        let watermark = DateTime::parse_from_rfc3339(since)
            .map_err(|e| source_err("axis watermark is not a valid RFC 3339 timestamp", e))?
            .with_timezone(&Utc);
        Ok(Box::new(PostgresAxisScan {
            client: Arc::clone(&self.client),
            axis,
            watermark,
            fetch_size: self.fetch_size,
            keyset_modified: watermark,
            keyset_id: Uuid::nil(),
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }

    async fn fetch_films(&mut self, ids: &[Uuid]) -> Result<Vec<RawFilm>, EtlError> {
        let rows = self.fetch_rows(FILM_JOIN_SQL, &[&ids]).await?;
        rows.iter().map(row_to_raw_film).collect()
    }

    async fn fetch_genres(&mut self, ids: &[Uuid]) -> Result<Vec<RawGenre>, EtlError> {
        let rows = self.fetch_rows(GENRE_JOIN_SQL, &[&ids]).await?;
        rows.iter().map(row_to_raw_genre).collect()
    }

    async fn fetch_persons(&mut self, ids: &[Uuid]) -> Result<Vec<RawPerson>, EtlError> {
        let rows = self.fetch_rows(PERSON_JOIN_SQL, &[&ids]).await?;
        rows.iter().map(row_to_raw_person).collect()
    }
}

/// A keyset-paged page cursor: rather than holding a live server-side
/// portal open across the joiner calls the Coordinator interleaves between
/// pages (which would require borrowing the one connection `PostgresSource`
/// owns for the life of the scan), each page is its own `SELECT ... LIMIT`
/// query continuing from the `(min_modified, id)` of the last row returned.
/// Owns a cloned `Arc<Client>` rather than a borrow, so it is fully
/// `'static` and safe to box as `dyn AxisScan + Send`.
struct PostgresAxisScan {
    client: Arc<Client>,
    axis: Axis,
    watermark: DateTime<Utc>,
    fetch_size: i32,
    keyset_modified: DateTime<Utc>,
    keyset_id: Uuid,
    buffer: VecDeque<Row>,
    exhausted: bool,
}

impl PostgresAxisScan {
    async fn next_row(&mut self) -> Result<Option<Row>, EtlError> {
        if self.buffer.is_empty() && !self.exhausted {
            let page = with_timeout(self.client.query(
                self.axis.ids_since_sql(),
                &[
                    &self.watermark,
                    &self.keyset_modified,
                    &self.keyset_id,
                    &i64::from(self.fetch_size),
                ],
            ))
            .await?;
            if page.len() < self.fetch_size as usize {
                self.exhausted = true;
            }
            if let Some(last) = page.last() {
                self.keyset_modified = last
                    .try_get("min_modified")
                    .map_err(|e| source_err("axis row missing `min_modified`", e))?;
                self.keyset_id = last
                    .try_get("id")
                    .map_err(|e| source_err("axis row missing `id`", e))?;
            }
            self.buffer.extend(page);
        }
        Ok(self.buffer.pop_front())
    }
}

#[async_trait]
impl AxisScan for PostgresAxisScan {
    async fn next_bunch(&mut self, bunch_size: usize) -> Result<Option<IdBunch>, EtlError> {
        let mut rows: Vec<AxisRow> = Vec::with_capacity(bunch_size);
        while rows.len() < bunch_size {
            let Some(row) = self.next_row().await? else {
                break;
            };
            let id: Uuid = row
                .try_get("id")
                .map_err(|e| source_err("axis row missing `id`", e))?;
            let min_modified: DateTime<Utc> = row
                .try_get("min_modified")
                .map_err(|e| source_err("axis row missing `min_modified`", e))?;
            rows.push((id, min_modified));
        }
        Ok(split_bunch(&rows))
    }
}

const FILM_JOIN_SQL: &str = r#"
    SELECT
        fw.id,
        fw.title,
        fw.description,
        fw.rating,
        fw.type,
        fw.created,
        fw.modified,
        COALESCE(
            json_agg(DISTINCT jsonb_build_object('role', pfw.role, 'id', p.id, 'name', p.full_name))
                FILTER (WHERE p.id IS NOT NULL),
            '[]'
        ) AS persons,
        COALESCE(json_agg(DISTINCT g.name) FILTER (WHERE g.name IS NOT NULL), '[]') AS genres
    FROM content.film_work fw
    LEFT JOIN content.person_film_work pfw ON pfw.film_work_id = fw.id
    LEFT JOIN content.person p ON p.id = pfw.person_id
    LEFT JOIN content.genre_film_work gfw ON gfw.film_work_id = fw.id
    LEFT JOIN content.genre g ON g.id = gfw.genre_id
    WHERE fw.id = ANY($1)
    GROUP BY fw.id
    ORDER BY fw.modified
"#;

const GENRE_JOIN_SQL: &str = r#"
    SELECT
        genre.id,
        genre.name,
        genre.description,
        COALESCE(json_agg(DISTINCT gfw.film_work_id) FILTER (WHERE gfw.film_work_id IS NOT NULL), '[]') AS film_ids
    FROM content.genre genre
    LEFT JOIN content.genre_film_work gfw ON gfw.genre_id = genre.id
    WHERE genre.id = ANY($1)
    GROUP BY genre.id
    ORDER BY genre.modified
"#;

const PERSON_JOIN_SQL: &str = r#"
    SELECT
        person.id,
        person.full_name,
        COALESCE(json_agg(DISTINCT pfw.role) FILTER (WHERE pfw.role IS NOT NULL), '[]') AS roles,
        COALESCE(json_agg(DISTINCT fw.id) FILTER (WHERE fw.id IS NOT NULL), '[]') AS film_ids
    FROM content.person person
    LEFT JOIN content.person_film_work pfw ON pfw.person_id = person.id
    LEFT JOIN content.film_work fw ON fw.id = pfw.film_work_id
    WHERE person.id = ANY($1)
    GROUP BY person.id
    ORDER BY person.modified
"#;

fn row_to_raw_film(row: &Row) -> Result<RawFilm, EtlError> {
    let persons_json: serde_json::Value = row
        .try_get("persons")
        .map_err(|e| source_err("film row missing `persons`", e))?;
    let persons = persons_json
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|value| {
            Some(RawFilmPerson {
                role: value.get("role")?.as_str()?.to_string(),
                id: value.get("id")?.as_str()?.parse().ok()?,
                name: value.get("name")?.as_str()?.to_string(),
            })
        })
        .collect();

    let genres_json: serde_json::Value = row
        .try_get("genres")
        .map_err(|e| source_err("film row missing `genres`", e))?;
    let genres = genres_json
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|value| value.as_str().map(str::to_string))
        .collect();

    Ok(RawFilm {
        id: row.try_get("id").map_err(|e| source_err("film row missing `id`", e))?,
        title: row
            .try_get("title")
            .map_err(|e| source_err("film row missing `title`", e))?,
        description: row.try_get("description").ok(),
        rating: row.try_get("rating").ok(),
        kind: row.try_get("type").map_err(|e| source_err("film row missing `type`", e))?,
        created: row
            .try_get("created")
            .map_err(|e| source_err("film row missing `created`", e))?,
        modified: row
            .try_get("modified")
            .map_err(|e| source_err("film row missing `modified`", e))?,
        persons,
        genres,
    })
}

fn row_to_raw_genre(row: &Row) -> Result<RawGenre, EtlError> {
    let film_ids_json: serde_json::Value = row
        .try_get("film_ids")
        .map_err(|e| source_err("genre row missing `film_ids`", e))?;
    let film_ids = film_ids_json
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|value| value.as_str()?.parse().ok())
        .collect();

    Ok(RawGenre {
        id: row.try_get("id").map_err(|e| source_err("genre row missing `id`", e))?,
        name: row
            .try_get("name")
            .map_err(|e| source_err("genre row missing `name`", e))?,
        description: row.try_get("description").ok(),
        film_ids,
    })
}

fn row_to_raw_person(row: &Row) -> Result<RawPerson, EtlError> {
    let roles_json: serde_json::Value = row
        .try_get("roles")
        .map_err(|e| source_err("person row missing `roles`", e))?;
    let roles = roles_json
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|value| value.as_str().map(str::to_string))
        .collect();

    let film_ids_json: serde_json::Value = row
        .try_get("film_ids")
        .map_err(|e| source_err("person row missing `film_ids`", e))?;
    let film_ids = film_ids_json
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|value| value.as_str()?.parse().ok())
        .collect();

    Ok(RawPerson {
        id: row.try_get("id").map_err(|e| source_err("person row missing `id`", e))?,
        full_name: row
            .try_get("full_name")
            .map_err(|e| source_err("person row missing `full_name`", e))?,
        roles,
        film_ids,
    })
}
