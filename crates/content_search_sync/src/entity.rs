//! The closed set of entities and their change axes.
//!
//! The source system split this across three sibling loader classes
//! (`PostgresMovieLoader`, `PostgresGenreLoader`, `PostgresPersonLoader`),
//! each owning its own `StateKeys`. Here that becomes one small lookup
//! table so the Coordinator can drive all three entities from one loop
//! without a three-way `match` at every call site.

/// One of the three synchronized entity types, in the fixed order the
/// outer driver loop processes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Film,
    Genre,
    Person,
}

impl Entity {
    pub const ALL: [Entity; 3] = [Entity::Film, Entity::Genre, Entity::Person];

    /// The sink index this entity's documents are upserted into.
    pub fn index_name(self) -> &'static str {
        match self {
            Entity::Film => "movies",
            Entity::Genre => "genres",
            Entity::Person => "persons",
        }
    }

    /// The change axes for this entity, in the fixed order the Coordinator
    /// drives them. Cross-entity axes (genre/person changes bubbling into a
    /// film, film changes bubbling into a genre or person) always run
    /// before the entity's own "self" axis, matching the source loaders.
    pub fn axes(self) -> &'static [Axis] {
        match self {
            Entity::Film => &[Axis::FilmByGenre, Axis::FilmByPerson, Axis::FilmBySelf],
            Entity::Genre => &[Axis::GenreByFilm, Axis::GenreBySelf],
            Entity::Person => &[Axis::PersonByFilm, Axis::PersonBySelf],
        }
    }
}

/// One (entity, change-axis) pair: a reason a denormalized document might
/// need to be refreshed, with its own watermark key and ordered source
/// query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    FilmBySelf,
    FilmByGenre,
    FilmByPerson,
    GenreBySelf,
    GenreByFilm,
    PersonBySelf,
    PersonByFilm,
}

impl Axis {
    /// The watermark key this axis reads and advances. This is the closed
    /// set of seven keys named in the design: one axis per entity is
    /// "self", the rest cross a join to a linked table.
    pub fn watermark_key(self) -> &'static str {
        match self {
            Axis::FilmBySelf => "movie_film_work_since",
            Axis::FilmByGenre => "movie_genre_since",
            Axis::FilmByPerson => "movie_person_work_since",
            Axis::GenreBySelf => "genre_genre_since",
            Axis::GenreByFilm => "genre_film_work_since",
            Axis::PersonBySelf => "person_person_since",
            Axis::PersonByFilm => "person_film_work_since",
        }
    }

    /// The query that turns a watermark into ordered `(id, min_modified)`
    /// rows for this axis, one page at a time.
    ///
    /// Takes four parameters: `$1` the axis watermark (fixed for the whole
    /// scan), `$2`/`$3` a `(min_modified, id)` keyset cursor that advances
    /// one page at a time, and `$4` the page size. Paging this way — a
    /// plain query per page rather than a held server-side cursor — means
    /// [`crate::source::postgres::PostgresAxisScan`] owns no borrow of the
    /// connection, so it can stay alive across the joiner calls the
    /// Coordinator makes on the same connection between pages. Every query
    /// orders by `(min_modified, id)` so that rows sharing a timestamp
    /// still have a total order across pages (see Design §4.4's tie-break
    /// note).
    pub fn ids_since_sql(self) -> &'static str {
        match self {
            Axis::FilmBySelf => {
                r#"
                SELECT fw.id AS id, fw.modified AS min_modified
                FROM content.film_work fw
                WHERE fw.modified >= $1 AND (fw.modified, fw.id) > ($2, $3)
                ORDER BY fw.modified, fw.id
                LIMIT $4
                "#
            },
            Axis::FilmByGenre => {
                r#"
                SELECT gfw.film_work_id AS id, min(g.modified) AS min_modified
                FROM content.genre g
                INNER JOIN content.genre_film_work gfw ON g.id = gfw.genre_id
                WHERE g.modified >= $1
                GROUP BY gfw.film_work_id
                HAVING (min(g.modified), gfw.film_work_id) > ($2, $3)
                ORDER BY min_modified, gfw.film_work_id
                LIMIT $4
                "#
            },
            Axis::FilmByPerson => {
                r#"
                SELECT pfw.film_work_id AS id, min(p.modified) AS min_modified
                FROM content.person p
                INNER JOIN content.person_film_work pfw ON p.id = pfw.person_id
                WHERE p.modified >= $1
                GROUP BY pfw.film_work_id
                HAVING (min(p.modified), pfw.film_work_id) > ($2, $3)
                ORDER BY min_modified, pfw.film_work_id
                LIMIT $4
                "#
            },
            Axis::GenreBySelf => {
                r#"
                SELECT genre.id AS id, genre.modified AS min_modified
                FROM content.genre genre
                WHERE genre.modified >= $1 AND (genre.modified, genre.id) > ($2, $3)
                ORDER BY genre.modified, genre.id
                LIMIT $4
                "#
            },
            Axis::GenreByFilm => {
                r#"
                SELECT gfw.genre_id AS id, min(fw.modified) AS min_modified
                FROM content.film_work fw
                INNER JOIN content.genre_film_work gfw ON fw.id = gfw.film_work_id
                WHERE fw.modified >= $1
                GROUP BY gfw.genre_id
                HAVING (min(fw.modified), gfw.genre_id) > ($2, $3)
                ORDER BY min_modified, gfw.genre_id
                LIMIT $4
                "#
            },
            Axis::PersonBySelf => {
                r#"
                SELECT person.id AS id, person.modified AS min_modified
                FROM content.person person
                WHERE person.modified >= $1 AND (person.modified, person.id) > ($2, $3)
                ORDER BY person.modified, person.id
                LIMIT $4
                "#
            },
            Axis::PersonByFilm => {
                r#"
                SELECT pfw.person_id AS id, min(fw.modified) AS min_modified
                FROM content.film_work fw
                INNER JOIN content.person_film_work pfw ON fw.id = pfw.person_id
                WHERE fw.modified >= $1
                GROUP BY pfw.person_id
                HAVING (min(fw.modified), pfw.person_id) > ($2, $3)
                ORDER BY min_modified, pfw.person_id
                LIMIT $4
                "#
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn watermark_keys_are_a_closed_set_of_seven() {
        let keys: BTreeSet<&'static str> = Entity::ALL
            .iter()
            .flat_map(|e| e.axes().iter())
            .map(|a| a.watermark_key())
            .collect();
        assert_eq!(keys.len(), 7);
    }

    #[test]
    fn cross_entity_axes_run_before_the_self_axis() {
        for entity in Entity::ALL {
            let axes = entity.axes();
            assert_eq!(axes.last(), axes.iter().find(|a| is_self_axis(**a)));
        }
    }

    fn is_self_axis(axis: Axis) -> bool {
        matches!(axis, Axis::FilmBySelf | Axis::GenreBySelf | Axis::PersonBySelf)
    }
}
