use crate::paste::Paste;

/// A paste as it comes back from a SQL backend, where every integer is an
/// `i64`.
#[derive(sqlx::FromRow)]
pub struct PasteRow {
    pub id: String,
    pub content: String,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub remaining_views: Option<i64>,
    pub max_views: Option<i64>,
}

impl TryFrom<PasteRow> for Paste {
    type Error = sqlx::Error;

    fn try_from(row: PasteRow) -> Result<Self, Self::Error> {
        let views = |value: Option<i64>| {
            value
                .map(u32::try_from)
                .transpose()
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))
        };

        Ok(Self {
            remaining_views: views(row.remaining_views)?,
            max_views: views(row.max_views)?,
            id: row.id,
            content: row.content,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

/// Turns a unique-key violation on insert into [`BackendError::DuplicateKey`].
///
/// [`BackendError::DuplicateKey`]: super::BackendError::DuplicateKey
pub fn insert_error(id: &str, e: sqlx::Error) -> super::BackendError {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            super::BackendError::DuplicateKey(id.to_string())
        }
        e => e.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(remaining_views: Option<i64>) -> PasteRow {
        PasteRow {
            id: "a".to_string(),
            content: "c".to_string(),
            created_at: 1,
            expires_at: Some(2),
            remaining_views,
            max_views: Some(3),
        }
    }

    #[test]
    fn converts_in_range_rows() {
        let paste = Paste::try_from(row(Some(2))).unwrap();
        assert_eq!(paste.remaining_views, Some(2));
        assert_eq!(paste.max_views, Some(3));
        assert_eq!(paste.expires_at, Some(2));
    }

    #[test]
    fn negative_views_are_a_decode_error() {
        assert!(matches!(
            Paste::try_from(row(Some(-1))),
            Err(sqlx::Error::Decode(_))
        ));
    }
}
