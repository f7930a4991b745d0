//! Article documents on top of SQLite.
//!
//! Each article is one JSON document in the `articles` table, keyed by its name. Mutations
//! load, change and write back the document inside a single immediate transaction, so the
//! upvote eligibility check and the write can't interleave with another request.

use std::fs;
use std::path::{Path, PathBuf};

use rocket_sync_db_pools::rusqlite::{
    self, params, Connection, OptionalExtension, TransactionBehavior,
};
use thiserror::Error;

use crate::model::{Article, Comment};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("article `{name}` is not a valid document: {source}")]
    Document {
        name: String,
        source: serde_json::Error,
    },

    #[error("failed to read seed file {}: {source}", path.display())]
    SeedRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("seed file {} is not a JSON array of articles: {source}", path.display())]
    SeedParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("seed article `{name}` lists voter `{uid}` more than once")]
    DuplicateVoter { name: String, uid: String },
}

pub fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS articles (
            name TEXT PRIMARY KEY NOT NULL,
            document TEXT NOT NULL
        )",
    )?;
    Ok(())
}

pub fn find(conn: &Connection, name: &str) -> Result<Option<Article>, StoreError> {
    let document: Option<String> = conn
        .query_row(
            "SELECT document FROM articles WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;

    document
        .map(|document| {
            serde_json::from_str(&document).map_err(|source| StoreError::Document {
                name: name.to_owned(),
                source,
            })
        })
        .transpose()
}

/// Inserts `article` unless an article with the same name exists. Returns whether it was inserted.
pub fn insert(conn: &Connection, article: &Article) -> Result<bool, StoreError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO articles (name, document) VALUES (?1, ?2)",
        params![article.name, encode(article)?],
    )?;
    Ok(inserted == 1)
}

/// Applies an upvote from `uid` if they haven't voted yet. Returns the current article, or
/// `None` if there is no article called `name`.
pub fn upvote(conn: &mut Connection, name: &str, uid: &str) -> Result<Option<Article>, StoreError> {
    update(conn, name, |article| article.upvote(uid))
}

pub fn add_comment(
    conn: &mut Connection,
    name: &str,
    comment: Comment,
) -> Result<Option<Article>, StoreError> {
    update(conn, name, |article| {
        article.add_comment(comment);
        true
    })
}

/// Loads the articles listed in a JSON seed file, keeping any that are already stored.
/// Returns how many were inserted.
pub fn seed(conn: &mut Connection, path: &Path) -> Result<usize, StoreError> {
    let contents = fs::read_to_string(path).map_err(|source| StoreError::SeedRead {
        path: path.to_owned(),
        source,
    })?;
    let articles: Vec<Article> =
        serde_json::from_str(&contents).map_err(|source| StoreError::SeedParse {
            path: path.to_owned(),
            source,
        })?;

    if let Some((name, uid)) = articles.iter().find_map(|article| {
        article
            .duplicate_voter()
            .map(|uid| (article.name.clone(), uid.to_owned()))
    }) {
        return Err(StoreError::DuplicateVoter { name, uid });
    }

    let tx = conn.transaction()?;
    let mut inserted = 0;
    for article in &articles {
        if insert(&tx, article)? {
            inserted += 1;
        }
    }
    tx.commit()?;

    Ok(inserted)
}

/// Read-modify-write of one document. `change` returns whether it modified the article.
fn update<F>(conn: &mut Connection, name: &str, change: F) -> Result<Option<Article>, StoreError>
where
    F: FnOnce(&mut Article) -> bool,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let Some(mut article) = find(&tx, name)? else {
        return Ok(None);
    };

    if change(&mut article) {
        tx.execute(
            "UPDATE articles SET document = ?2 WHERE name = ?1",
            params![name, encode(&article)?],
        )?;
    }
    tx.commit()?;

    Ok(Some(article))
}

fn encode(article: &Article) -> Result<String, StoreError> {
    serde_json::to_string(article).map_err(|source| StoreError::Document {
        name: article.name.clone(),
        source,
    })
}
