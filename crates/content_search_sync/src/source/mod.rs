//! The `Source` boundary: everything the rest of the pipeline needs from the
//! relational store, expressed as a trait so the Coordinator can be driven
//! against an in-memory fake in tests (see `testing::InMemorySource`) the
//! same way the source system's [`crate::sink::SinkWriter`] is mocked.

pub mod postgres;

use async_trait::async_trait;
use chrono::{
    DateTime,
    Utc,
};
use uuid::Uuid;

use crate::{
    entity::Axis,
    errors::EtlError,
};

/// One page of an axis scan: a batch of ids sharing (or starting at) the
/// same minimum `modified` timestamp, per §4.4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdBunch {
    pub ids: Vec<Uuid>,
    pub since: DateTime<Utc>,
}

/// A person linked to a film, straight off the join, before role-splitting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFilmPerson {
    pub role: String,
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawFilm {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub rating: Option<f64>,
    pub kind: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub persons: Vec<RawFilmPerson>,
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawGenre {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub film_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPerson {
    pub id: Uuid,
    pub full_name: String,
    pub roles: Vec<String>,
    pub film_ids: Vec<Uuid>,
}

/// A lazy, single-consumer, non-restartable page cursor over one axis scan.
/// Implemented as an explicit pull (`next_bunch`) rather than a generator or
/// a hand-rolled [`futures::Stream`] impl — see the Design Notes on lazy
/// sequences.
#[async_trait]
pub trait AxisScan: Send {
    /// Returns the next bunch of up to `bunch_size` ids, or `None` once the
    /// axis scan is exhausted. `bunch_size` may vary call to call without
    /// affecting which ids are grouped with which (see §8 property 4).
    async fn next_bunch(&mut self, bunch_size: usize) -> Result<Option<IdBunch>, EtlError>;
}

/// The relational source, abstracted so the Coordinator is agnostic to
/// whether it is talking to a live Postgres connection or an in-memory
/// fixture.
#[async_trait]
pub trait Source: Send {
    /// Opens a lazy scan over one change axis, starting strictly at
    /// `since` (inclusive), ordered `(min_modified, id)`.
    async fn scan_axis(&mut self, axis: Axis, since: &str) -> Result<Box<dyn AxisScan + Send>, EtlError>;

    async fn fetch_films(&mut self, ids: &[Uuid]) -> Result<Vec<RawFilm>, EtlError>;
    async fn fetch_genres(&mut self, ids: &[Uuid]) -> Result<Vec<RawGenre>, EtlError>;
    async fn fetch_persons(&mut self, ids: &[Uuid]) -> Result<Vec<RawPerson>, EtlError>;
}

/// One already-ordered `(id, min_modified)` row, the shape every axis query
/// reduces to once decoded off the wire. Free function input/output type for
/// [`split_bunch`]/[`bunchify`] so both can be exercised without a database.
pub type AxisRow = (Uuid, DateTime<Utc>);

/// Turns a non-empty, already-ordered slice of rows into one [`IdBunch`]:
/// all of the slice's ids, with `since` taken from the first row. Returns
/// `None` for an empty slice, mirroring `next_bunch`'s exhaustion signal.
///
/// This is the single-bunch half of what [`PostgresAxisScan::next_bunch`]
/// does against a live cursor; kept as a free function (per the Design
/// Notes on `bunchify`/`split_bunch`) so the grouping rule is testable
/// without a connection.
pub fn split_bunch(rows: &[AxisRow]) -> Option<IdBunch> {
    let (_, since) = *rows.first()?;
    Some(IdBunch {
        ids: rows.iter().map(|(id, _)| *id).collect(),
        since,
    })
}

/// Chunks an already-ordered row sequence into consecutive bunches of at
/// most `bunch_size`, via repeated [`split_bunch`] calls. Used by tests to
/// check §8 property 4 (bunching correctness): concatenating every bunch's
/// ids must reproduce the original id order regardless of `bunch_size`.
pub fn bunchify(rows: &[AxisRow], bunch_size: usize) -> Vec<IdBunch> {
    assert!(bunch_size > 0, "bunch_size must be positive");
    rows.chunks(bunch_size)
        .filter_map(split_bunch)
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn row(secs: i64, id: Uuid) -> AxisRow {
        (id, Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn split_bunch_is_none_for_an_empty_slice() {
        assert_eq!(split_bunch(&[]), None);
    }

    #[test]
    fn bunchify_groups_into_chunks_of_the_requested_size() {
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let rows: Vec<AxisRow> = ids.iter().enumerate().map(|(i, id)| row(i as i64, *id)).collect();

        let bunches = bunchify(&rows, 2);
        assert_eq!(bunches.len(), 3);
        assert_eq!(bunches[0].ids, vec![ids[0], ids[1]]);
        assert_eq!(bunches[1].ids, vec![ids[2], ids[3]]);
        assert_eq!(bunches[2].ids, vec![ids[4]]);
    }

    proptest! {
        /// §8 property 4: bunching is a pure regrouping. Concatenating the
        /// ids across every bunch must equal the original id order no
        /// matter what bunch size was used to produce them.
        #[test]
        fn bunching_is_invariant_to_bunch_size(
            len in 0usize..200,
            bunch_size in 1usize..50,
        ) {
            let rows: Vec<AxisRow> = (0..len)
                .map(|i| row(i as i64, Uuid::from_u128(i as u128)))
                .collect();

            let reference: Vec<Uuid> = bunchify(&rows, 1)
                .into_iter()
                .flat_map(|b| b.ids)
                .collect();
            let other: Vec<Uuid> = bunchify(&rows, bunch_size)
                .into_iter()
                .flat_map(|b| b.ids)
                .collect();

            prop_assert_eq!(reference, other);
        }

        /// Every bunch's `since` is the `min_modified` of its first row —
        /// the tie-break ordering (§4.4) is preserved through rebunching.
        #[test]
        fn every_bunch_since_matches_its_first_row(
            len in 1usize..200,
            bunch_size in 1usize..50,
        ) {
            let rows: Vec<AxisRow> = (0..len)
                .map(|i| row(i as i64, Uuid::from_u128(i as u128)))
                .collect();

            for bunch in bunchify(&rows, bunch_size) {
                let first_id = bunch.ids[0];
                let expected = rows.iter().find(|(id, _)| *id == first_id).unwrap().1;
                prop_assert_eq!(bunch.since, expected);
            }
        }
    }
}
