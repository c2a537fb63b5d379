//! Partial UPDATE statement builder

use sqlx::{Encode, Postgres, QueryBuilder, Type};
use uuid::Uuid;

/// Builds `UPDATE <table> SET ... WHERE id = $n RETURNING ...` from optional
/// fields, skipping the ones that were not supplied.
pub struct UpdateBuilder<'args> {
    builder: QueryBuilder<'args, Postgres>,
    fields: usize,
}

impl<'args> UpdateBuilder<'args> {
    pub fn new(table: &str) -> Self {
        UpdateBuilder {
            builder: QueryBuilder::new(format!("UPDATE {table} SET ")),
            fields: 0,
        }
    }

    /// Add `"column" = $n` when `value` is present
    pub fn set<T>(&mut self, column: &str, value: Option<T>) -> &mut Self
    where
        T: 'args + Encode<'args, Postgres> + Type<Postgres>,
    {
        if let Some(value) = value {
            if self.fields > 0 {
                self.builder.push(", ");
            }
            self.builder
                .push(format!("\"{column}\" = "))
                .push_bind(value);
            self.fields += 1;
        }
        self
    }

    /// No column was supplied
    pub fn is_empty(&self) -> bool {
        self.fields == 0
    }

    /// Close the statement, touching `updated_at` as well. `None` when no
    /// column was supplied, since there is nothing to update.
    pub fn finish(mut self, id: Uuid, returning: &str) -> Option<QueryBuilder<'args, Postgres>> {
        if self.is_empty() {
            return None;
        }

        self.builder
            .push(", updated_at = now() WHERE id = ")
            .push_bind(id)
            .push(" RETURNING ")
            .push(returning);
        Some(self.builder)
    }
}
