//! The pipeline coordinator: drives one entity/axis at a time through
//! scan → fetch/join → transform → sink, advancing the watermark only once
//! the corresponding batch is durable in the sink.
//!
//! This is the Rust-idiomatic collapse of the source system's top-level
//! `etl()`/`load()` loop (`01_etl/load_data.py`): where the original called
//! a loader generator and pushed rows into a saver with a module-level
//! `state` singleton, here the Coordinator owns an explicit [`CheckpointStore`]
//! and drives typed [`Source`]/[`SinkWriter`] trait objects so the whole
//! pass can run against in-memory fakes in tests.

use chrono::SecondsFormat;

use crate::{
    backoff::{
        with_backoff,
        Backoff,
    },
    entity::{
        Axis,
        Entity,
    },
    errors::EtlError,
    checkpoint::CheckpointStore,
    sink::{
        PendingDocument,
        SinkWriter,
    },
    source::Source,
    transform,
};

/// A summary of one call to [`Coordinator::run_pass`], used by integration
/// tests and by `main`'s log line after each pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub documents_synced: usize,
    pub axes_advanced: usize,
}

pub struct Coordinator<S, W> {
    source: S,
    sink: W,
    checkpoint: CheckpointStore,
    bunch_size: usize,
}

impl<S, W> Coordinator<S, W>
where
    S: Source,
    W: SinkWriter,
{
    pub fn new(source: S, sink: W, checkpoint: CheckpointStore, bunch_size: usize) -> Self {
        Self {
            source,
            sink,
            checkpoint,
            bunch_size,
        }
    }

    /// Runs one full pass over every entity's axes, in the fixed order
    /// `Entity::ALL` and, within an entity, `Entity::axes()` (cross-entity
    /// axes before the self axis). Returns once every axis scan has been
    /// drained.
    pub async fn run_pass(&mut self) -> Result<PassStats, EtlError> {
        let mut stats = PassStats::default();
        for entity in Entity::ALL {
            for axis in entity.axes() {
                let advanced = self.drain_axis(entity, *axis, &mut stats).await?;
                if advanced {
                    stats.axes_advanced += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Drains one axis scan to exhaustion, returning whether any bunch was
    /// found (i.e. whether the watermark moved at all).
    async fn drain_axis(&mut self, entity: Entity, axis: Axis, stats: &mut PassStats) -> Result<bool, EtlError> {
        let since = self.checkpoint.get_or_epoch(axis.watermark_key());
        let mut scan = self.source.scan_axis(axis, &since).await?;
        let mut last_since: Option<String> = None;

        loop {
            let Some(bunch) = scan.next_bunch(self.bunch_size).await? else {
                break;
            };

            let synced = self.sync_bunch(entity, &bunch.ids).await?;
            stats.documents_synced += synced;
            let since_str = bunch.since.to_rfc3339_opts(SecondsFormat::AutoSi, true);
            last_since = Some(since_str.clone());

            if self.sink.is_batch_ready() {
                self.flush_sink().await?;
                self.checkpoint.set(axis.watermark_key(), since_str).await?;
            }
        }

        // Drain whatever is still queued so the final, possibly partial,
        // batch is durable before the watermark for this axis advances.
        if let Some(since_str) = last_since {
            self.flush_sink().await?;
            self.checkpoint.set(axis.watermark_key(), since_str).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn sync_bunch(&mut self, entity: Entity, ids: &[uuid::Uuid]) -> Result<usize, EtlError> {
        let index = entity.index_name();
        match entity {
            Entity::Film => {
                let films = self.source.fetch_films(ids).await?;
                for film in &films {
                    let doc = transform::film_to_document(film)?;
                    self.sink.save(PendingDocument::new(index, doc.id, &doc)?);
                }
                Ok(films.len())
            },
            Entity::Genre => {
                let genres = self.source.fetch_genres(ids).await?;
                for genre in &genres {
                    let doc = transform::genre_to_document(genre)?;
                    self.sink.save(PendingDocument::new(index, doc.id, &doc)?);
                }
                Ok(genres.len())
            },
            Entity::Person => {
                let persons = self.source.fetch_persons(ids).await?;
                for person in &persons {
                    let doc = transform::person_to_document(person)?;
                    self.sink.save(PendingDocument::new(index, doc.id, &doc)?);
                }
                Ok(persons.len())
            },
        }
    }

    /// Flushes the sink under its own backoff policy, separate from the
    /// outer pass-level backoff around source-connection errors, per the
    /// Design Notes' "stacked retries" guidance.
    async fn flush_sink(&mut self) -> Result<(), EtlError> {
        let sink = &mut self.sink;
        with_backoff(Backoff::default(), EtlError::is_retriable_connection_error, || sink.flush()).await
    }
}
