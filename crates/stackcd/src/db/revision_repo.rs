//! Revision repository, operations on the `revisions` table.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};

/// What the controller last recorded for a stack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackMetadata {
    /// Revision most recently pulled, whether or not it was deployed.
    pub repo_revision: String,
    /// Revision that produced the currently deployed manifest.
    pub deployed_stack_revision: String,
    /// Hex SHA-256 of the last deployed manifest.
    pub hash: String,
    pub deployed_at: Option<DateTime<Utc>>,
}

impl StackMetadata {
    /// First eight characters of the hash, for logs.
    pub fn short_hash(&self) -> &str {
        if self.hash.len() >= 8 {
            &self.hash[..8]
        } else {
            "<empty-hash>"
        }
    }
}

/// Inserts or replaces the metadata of a stack.
pub fn upsert(db: &Database, stack: &str, metadata: &StackMetadata) -> Result<(), DatabaseError> {
    let deployed_at = metadata
        .deployed_at
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Nanos, true));

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO revisions (stack, repo_revision, deployed_stack_revision, hash, deployed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(stack) DO UPDATE SET
               repo_revision = excluded.repo_revision,
               deployed_stack_revision = excluded.deployed_stack_revision,
               hash = excluded.hash,
               deployed_at = excluded.deployed_at",
            params![
                stack,
                metadata.repo_revision,
                metadata.deployed_stack_revision,
                metadata.hash,
                deployed_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds the metadata of a stack. `None` if it was never reconciled.
pub fn find(db: &Database, stack: &str) -> Result<Option<StackMetadata>, DatabaseError> {
    let row = db.with_conn(|conn| {
        conn.query_row(
            "SELECT COALESCE(repo_revision, ''), COALESCE(deployed_stack_revision, ''),
                    COALESCE(hash, ''), deployed_at
             FROM revisions WHERE stack = ?1",
            params![stack],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        )
        .optional()
        .map_err(DatabaseError::from)
    })?;

    let Some((repo_revision, deployed_stack_revision, hash, deployed_at)) = row else {
        return Ok(None);
    };

    let deployed_at = deployed_at
        .map(|value| {
            DateTime::parse_from_rfc3339(&value)
                .map(|at| at.with_timezone(&Utc))
                .map_err(|_| DatabaseError::InvalidTimestamp {
                    stack: stack.to_string(),
                    value,
                })
        })
        .transpose()?;

    Ok(Some(StackMetadata {
        repo_revision,
        deployed_stack_revision,
        hash,
        deployed_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(repo: &str, deployed: &str, hash: &str) -> StackMetadata {
        StackMetadata {
            repo_revision: repo.to_string(),
            deployed_stack_revision: deployed.to_string(),
            hash: hash.to_string(),
            deployed_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_find_unknown_stack() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(find(&db, "web").unwrap(), None);
    }

    #[test]
    fn test_upsert_then_find() {
        let db = Database::open_in_memory().unwrap();
        let stored = metadata("a1b2c3d4", "a1b2c3d4", "deadbeefcafe");
        upsert(&db, "web", &stored).unwrap();

        assert_eq!(find(&db, "web").unwrap(), Some(stored));
    }

    #[test]
    fn test_upsert_overwrites() {
        let db = Database::open_in_memory().unwrap();
        upsert(&db, "web", &metadata("a1", "a1", "h1")).unwrap();
        let second = metadata("b2", "a1", "h1");
        upsert(&db, "web", &second).unwrap();

        let found = find(&db, "web").unwrap().unwrap();
        assert_eq!(found.repo_revision, "b2");
        assert_eq!(found.deployed_stack_revision, "a1");

        let rows: u32 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM revisions", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_stacks_are_independent() {
        let db = Database::open_in_memory().unwrap();
        upsert(&db, "web", &metadata("a1", "a1", "h1")).unwrap();
        upsert(&db, "api", &metadata("c3", "c3", "h2")).unwrap();

        assert_eq!(find(&db, "web").unwrap().unwrap().hash, "h1");
        assert_eq!(find(&db, "api").unwrap().unwrap().hash, "h2");
    }

    #[test]
    fn test_missing_deployed_at() {
        let db = Database::open_in_memory().unwrap();
        let stored = StackMetadata {
            repo_revision: "a1".to_string(),
            ..Default::default()
        };
        upsert(&db, "web", &stored).unwrap();
        assert_eq!(find(&db, "web").unwrap().unwrap().deployed_at, None);
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(metadata("", "", "0123456789abcdef").short_hash(), "01234567");
        assert_eq!(StackMetadata::default().short_hash(), "<empty-hash>");
    }
}
