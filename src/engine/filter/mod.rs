
use super::ItemPredicate;
use crate::catalog::ItemRecord;

/// Structured filter used by the command line.
///
/// Every set constraint must hold. Records missing the attribute a
/// constraint looks at are rejected by that constraint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemFilter {
    /// Any of these genres, compared case-insensitively.
    pub genres: Vec<String>,
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
    pub min_rating: Option<f64>,
}

impl ItemFilter {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genres.push(genre.into());
        self
    }

    #[inline]
    pub fn with_min_year(mut self, year: i32) -> Self {
        self.min_year = Some(year);
        self
    }

    #[inline]
    pub fn with_max_year(mut self, year: i32) -> Self {
        self.max_year = Some(year);
        self
    }

    #[inline]
    pub fn with_min_rating(mut self, rating: f64) -> Self {
        self.min_rating = Some(rating);
        self
    }

    /// True when no constraint is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.genres.is_empty()
            && self.min_year.is_none()
            && self.max_year.is_none()
            && self.min_rating.is_none()
    }

    fn genre_matches(&self, record: &ItemRecord) -> bool {
        self.genres.is_empty()
            || self.genres.iter().any(|wanted| {
                record
                    .genres
                    .iter()
                    .any(|genre| genre.trim().eq_ignore_ascii_case(wanted.trim()))
            })
    }

    fn year_matches(&self, record: &ItemRecord) -> bool {
        if self.min_year.is_none() && self.max_year.is_none() {
            return true;
        }
        record.year().is_some_and(|year| {
            self.min_year.is_none_or(|min| year >= min) && self.max_year.is_none_or(|max| year <= max)
        })
    }

    fn rating_matches(&self, record: &ItemRecord) -> bool {
        self.min_rating
            .is_none_or(|min| record.rating.is_some_and(|rating| rating >= min))
    }
}

impl ItemPredicate for ItemFilter {
    #[inline]
    fn matches(&self, record: &ItemRecord) -> bool {
        self.genre_matches(record) && self.year_matches(record) && self.rating_matches(record)
    }
}
