//! Keyset pagination over time-ordered ids
//!
//! Ids are uuid v7, so ordering by id is ordering by creation time. A page
//! fetches `limit + 1` rows; the extra row only signals that more exist.

use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::AppError;

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Older rows, newest first
    #[default]
    Next,
    /// Newer rows
    Prev,
}

/// Raw query string parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub cursor: Option<Uuid>,
    #[serde(default)]
    pub direction: Direction,
    pub limit: Option<i64>,
}

/// Validated page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub cursor: Option<Uuid>,
    pub direction: Direction,
    pub limit: i64,
}

impl TryFrom<PageQuery> for PageRequest {
    type Error = AppError;

    fn try_from(query: PageQuery) -> Result<Self, Self::Error> {
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(AppError::validation(
                "limit",
                format!("limit must be between 1 and {MAX_LIMIT}"),
            ));
        }

        Ok(PageRequest {
            cursor: query.cursor,
            direction: query.direction,
            limit,
        })
    }
}

impl PageRequest {
    /// Append the cursor predicate, ordering and limit.
    ///
    /// The builder must already end inside a `WHERE` clause; the predicate is
    /// joined with `AND`.
    pub fn push_keyset(&self, builder: &mut QueryBuilder<'_, Postgres>, column: &str) {
        let (op, order) = match self.direction {
            Direction::Next => ("<", "DESC"),
            Direction::Prev => (">", "ASC"),
        };

        if let Some(cursor) = self.cursor {
            builder.push(format!(" AND {column} {op} ")).push_bind(cursor);
        }

        builder
            .push(format!(" ORDER BY {column} {order} LIMIT "))
            .push_bind(self.limit + 1);
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PageInfo {
    pub has_more: bool,
}

/// One page of results, newest first regardless of direction
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: PageInfo,
}

impl<T> Page<T> {
    /// Build a page from the `limit + 1` rows fetched by [`PageRequest::push_keyset`]
    pub fn from_rows(mut rows: Vec<T>, request: &PageRequest) -> Self {
        let has_more = rows.len() as i64 > request.limit;
        rows.truncate(request.limit as usize);

        if request.direction == Direction::Prev {
            rows.reverse();
        }

        Page {
            items: rows,
            pagination: PageInfo { has_more },
        }
    }
}
