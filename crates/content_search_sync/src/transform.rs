//! Raw row to sink-document transforms.
//!
//! Grounded in the source system's `db_objects.py`: `FilmWork.__post_init__`
//! splits the denormalized `persons` list by role into name lists and
//! nested-object lists; `Genre`/`Person` are close to a 1:1 field rename.
//! These are pure functions rather than methods on the raw types, since
//! unlike the Python dataclasses they have no document-shaped fields to
//! lazily populate in `__post_init__` — the split happens once, up front.

use serde::Serialize;
use uuid::Uuid;

use crate::{
    errors::ValidationError,
    source::{
        RawFilm,
        RawGenre,
        RawPerson,
    },
};

/// A person nested inside a film document under `actors`/`writers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilmPersonDoc {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilmDoc {
    pub id: Uuid,
    pub imdb_rating: Option<f64>,
    pub genre: Vec<String>,
    pub title: String,
    pub description: Option<String>,
    pub director: Vec<String>,
    pub actors_names: Vec<String>,
    pub writers_names: Vec<String>,
    pub actors: Vec<FilmPersonDoc>,
    pub writers: Vec<FilmPersonDoc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenreDoc {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub film_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonDoc {
    pub id: Uuid,
    pub name: String,
    pub role: Vec<String>,
    pub film_ids: Vec<Uuid>,
}

/// Splits `film.persons` by role the way `FilmWork.__post_init__` does:
/// `director` feeds only a name list, `actor`/`writer` feed both a name
/// list and a nested `{id, name}` object list. Any other role is rejected
/// rather than silently dropped, so a schema change upstream surfaces as a
/// validation error instead of a quietly incomplete document.
pub fn film_to_document(film: &RawFilm) -> Result<FilmDoc, ValidationError> {
    if film.title.is_empty() {
        return Err(ValidationError::MissingField {
            entity: "film",
            id: film.id.to_string(),
            field: "title",
        });
    }

    let mut director = Vec::new();
    let mut actors_names = Vec::new();
    let mut writers_names = Vec::new();
    let mut actors = Vec::new();
    let mut writers = Vec::new();

    for person in &film.persons {
        match person.role.as_str() {
            "director" => director.push(person.name.clone()),
            "actor" => {
                actors_names.push(person.name.clone());
                actors.push(FilmPersonDoc {
                    id: person.id,
                    name: person.name.clone(),
                });
            },
            "writer" => {
                writers_names.push(person.name.clone());
                writers.push(FilmPersonDoc {
                    id: person.id,
                    name: person.name.clone(),
                });
            },
            other => {
                return Err(ValidationError::UnknownRole {
                    entity: "film",
                    id: film.id.to_string(),
                    role: other.to_string(),
                });
            },
        }
    }

    Ok(FilmDoc {
        id: film.id,
        imdb_rating: film.rating,
        genre: film.genres.clone(),
        title: film.title.clone(),
        description: film.description.clone(),
        director,
        actors_names,
        writers_names,
        actors,
        writers,
    })
}

pub fn genre_to_document(genre: &RawGenre) -> Result<GenreDoc, ValidationError> {
    if genre.name.is_empty() {
        return Err(ValidationError::MissingField {
            entity: "genre",
            id: genre.id.to_string(),
            field: "name",
        });
    }
    Ok(GenreDoc {
        id: genre.id,
        name: genre.name.clone(),
        description: genre.description.clone().unwrap_or_default(),
        film_ids: genre.film_ids.clone(),
    })
}

pub fn person_to_document(person: &RawPerson) -> Result<PersonDoc, ValidationError> {
    if person.full_name.is_empty() {
        return Err(ValidationError::MissingField {
            entity: "person",
            id: person.id.to_string(),
            field: "full_name",
        });
    }
    Ok(PersonDoc {
        id: person.id,
        name: person.full_name.clone(),
        role: person.roles.clone(),
        film_ids: person.film_ids.clone(),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{
        TimeZone,
        Utc,
    };

    use super::*;
    use crate::source::RawFilmPerson;

    fn film_with_persons(persons: Vec<RawFilmPerson>) -> RawFilm {
        RawFilm {
            id: Uuid::nil(),
            title: "Chronicle of a Death Foretold".to_string(),
            description: Some("a description".to_string()),
            rating: Some(8.1),
            kind: "movie".to_string(),
            created: Utc.timestamp_opt(0, 0).unwrap(),
            modified: Utc.timestamp_opt(0, 0).unwrap(),
            persons,
            genres: vec!["Drama".to_string()],
        }
    }

    #[test]
    fn splits_persons_by_role_into_names_and_nested_objects() {
        let actor_id = Uuid::new_v4();
        let writer_id = Uuid::new_v4();
        let film = film_with_persons(vec![
            RawFilmPerson {
                role: "director".to_string(),
                id: Uuid::new_v4(),
                name: "Francesco Rosi".to_string(),
            },
            RawFilmPerson {
                role: "actor".to_string(),
                id: actor_id,
                name: "Rupert Everett".to_string(),
            },
            RawFilmPerson {
                role: "writer".to_string(),
                id: writer_id,
                name: "Gabriel Garcia Marquez".to_string(),
            },
        ]);

        let doc = film_to_document(&film).unwrap();
        assert_eq!(doc.director, vec!["Francesco Rosi".to_string()]);
        assert_eq!(doc.actors_names, vec!["Rupert Everett".to_string()]);
        assert_eq!(doc.writers_names, vec!["Gabriel Garcia Marquez".to_string()]);
        assert_eq!(
            doc.actors,
            vec![FilmPersonDoc {
                id: actor_id,
                name: "Rupert Everett".to_string(),
            }]
        );
        assert_eq!(
            doc.writers,
            vec![FilmPersonDoc {
                id: writer_id,
                name: "Gabriel Garcia Marquez".to_string(),
            }]
        );
        assert_eq!(doc.imdb_rating, Some(8.1));
        assert_eq!(doc.genre, vec!["Drama".to_string()]);
    }

    #[test]
    fn film_with_no_persons_yields_empty_lists_not_an_error() {
        let film = film_with_persons(Vec::new());
        let doc = film_to_document(&film).unwrap();
        assert!(doc.director.is_empty());
        assert!(doc.actors.is_empty());
        assert!(doc.writers.is_empty());
    }

    #[test]
    fn unknown_role_is_rejected() {
        let film = film_with_persons(vec![RawFilmPerson {
            role: "producer".to_string(),
            id: Uuid::new_v4(),
            name: "Someone".to_string(),
        }]);
        let result = film_to_document(&film);
        assert!(matches!(result, Err(ValidationError::UnknownRole { .. })));
    }

    #[test]
    fn missing_title_is_rejected() {
        let mut film = film_with_persons(Vec::new());
        film.title = String::new();
        assert!(matches!(
            film_to_document(&film),
            Err(ValidationError::MissingField { field: "title", .. })
        ));
    }

    #[test]
    fn genre_description_defaults_to_empty_string() {
        let genre = RawGenre {
            id: Uuid::nil(),
            name: "Drama".to_string(),
            description: None,
            film_ids: vec![Uuid::nil()],
        };
        let doc = genre_to_document(&genre).unwrap();
        assert_eq!(doc.description, "");
    }

    #[test]
    fn person_full_name_becomes_document_name() {
        let person = RawPerson {
            id: Uuid::nil(),
            full_name: "Rupert Everett".to_string(),
            roles: vec!["actor".to_string()],
            film_ids: vec![Uuid::nil()],
        };
        let doc = person_to_document(&person).unwrap();
        assert_eq!(doc.name, "Rupert Everett");
        assert_eq!(doc.role, vec!["actor".to_string()]);
    }
}
