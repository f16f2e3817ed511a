//! Discussion threads and their reply trees.
//!
//! Replies are stored flat, one row per reply keyed by id, with the owning
//! discussion and an optional parent reply. Finding or liking a reply at any
//! depth is a keyed lookup; the nested shape only exists when a discussion is
//! rendered.

use crate::{
    auth::Requester,
    db::{get_opt_uuid, get_uuid, now_millis},
    error::AppError,
    model::{AuthorRef, Discussion, Reply},
};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Deserialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewDiscussion {
    #[serde(default)]
    pub property_title: String,
    #[serde(default)]
    pub locality: String,
    #[serde(default)]
    pub rating: i64,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewReply {
    #[serde(default)]
    pub text: String,
    /// Reply to nest under. Absent or empty means top level.
    #[serde(default)]
    pub parent_id: Option<String>,
}

fn discussion_not_found() -> AppError {
    AppError::not_found("Discussion not found")
}

fn reply_not_found() -> AppError {
    AppError::not_found("Reply not found")
}

/// One reply row as stored, before it is placed in its tree.
struct ReplyRow {
    id: Uuid,
    discussion_id: Uuid,
    parent_id: Option<Uuid>,
    author: AuthorRef,
    text: String,
    likes: u32,
    created_at: i64,
}

const DISCUSSION_SELECT: &str = "SELECT d.id, d.property_title, d.locality, d.rating, d.text, \
     d.likes, d.created_at, u.id, u.name FROM discussions d JOIN users u ON u.id = d.author_id";

const REPLY_SELECT: &str = "SELECT r.id, r.discussion_id, r.parent_id, r.text, r.likes, \
     r.created_at, u.id, u.name FROM replies r JOIN users u ON u.id = r.author_id";

fn row_to_discussion(row: &rusqlite::Row<'_>) -> rusqlite::Result<Discussion> {
    Ok(Discussion {
        id: get_uuid(row, 0)?,
        property_title: row.get(1)?,
        locality: row.get(2)?,
        rating: row.get(3)?,
        text: row.get(4)?,
        likes: row.get(5)?,
        created_at: row.get(6)?,
        author: AuthorRef {
            id: get_uuid(row, 7)?,
            name: row.get(8)?,
        },
        replies: Vec::new(),
    })
}

fn row_to_reply(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReplyRow> {
    Ok(ReplyRow {
        id: get_uuid(row, 0)?,
        discussion_id: get_uuid(row, 1)?,
        parent_id: get_opt_uuid(row, 2)?,
        text: row.get(3)?,
        likes: row.get(4)?,
        created_at: row.get(5)?,
        author: AuthorRef {
            id: get_uuid(row, 6)?,
            name: row.get(7)?,
        },
    })
}

/// Nest the flat rows of one discussion. Rows must arrive in insertion order;
/// siblings keep that order.
fn build_tree(rows: Vec<ReplyRow>) -> Vec<Reply> {
    let mut children: HashMap<Option<Uuid>, Vec<ReplyRow>> = HashMap::new();
    for row in rows {
        children.entry(row.parent_id).or_default().push(row);
    }
    attach(&mut children, None)
}

fn attach(children: &mut HashMap<Option<Uuid>, Vec<ReplyRow>>, parent: Option<Uuid>) -> Vec<Reply> {
    children
        .remove(&parent)
        .unwrap_or_default()
        .into_iter()
        .map(|row| Reply {
            replies: attach(children, Some(row.id)),
            id: row.id,
            author: row.author,
            text: row.text,
            likes: row.likes,
            created_at: row.created_at,
        })
        .collect()
}

fn load_replies(
    conn: &Connection,
    discussion_id: Option<&Uuid>,
) -> Result<HashMap<Uuid, Vec<ReplyRow>>, AppError> {
    let order = "ORDER BY r.created_at, r.rowid";
    let rows = match discussion_id {
        Some(id) => {
            let mut stmt =
                conn.prepare(&format!("{REPLY_SELECT} WHERE r.discussion_id = ?1 {order}"))?;
            let rows = stmt
                .query_map([id.to_string()], row_to_reply)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!("{REPLY_SELECT} {order}"))?;
            let rows = stmt
                .query_map([], row_to_reply)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    let mut by_discussion: HashMap<Uuid, Vec<ReplyRow>> = HashMap::new();
    for row in rows {
        by_discussion.entry(row.discussion_id).or_default().push(row);
    }
    Ok(by_discussion)
}

fn exists(conn: &Connection, id: &Uuid) -> Result<bool, AppError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM discussions WHERE id = ?1",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Start a new thread.
pub fn create(
    conn: &Connection,
    input: NewDiscussion,
    author: &Requester,
) -> Result<Discussion, AppError> {
    let property_title = input.property_title.trim();
    let locality = input.locality.trim();
    let text = input.text.trim();
    if property_title.is_empty() || locality.is_empty() || text.is_empty() || input.rating == 0 {
        return Err(AppError::validation("Please provide all required fields"));
    }
    if !(1..=5).contains(&input.rating) {
        return Err(AppError::validation("Rating must be between 1 and 5"));
    }
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO discussions (id, property_title, locality, rating, text, author_id, likes, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        params![
            id.to_string(),
            property_title,
            locality,
            input.rating,
            text,
            author.id.to_string(),
            now_millis(),
        ],
    )?;
    tracing::info!(discussion_id = %id, author = %author.id, "created discussion");
    get(conn, &id)
}

/// Every thread, most recent first, with authors resolved across the whole
/// reply tree.
pub fn list(conn: &Connection) -> Result<Vec<Discussion>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "{DISCUSSION_SELECT} ORDER BY d.created_at DESC, d.rowid DESC"
    ))?;
    let mut discussions = stmt
        .query_map([], row_to_discussion)?
        .collect::<Result<Vec<_>, _>>()?;
    let mut replies = load_replies(conn, None)?;
    for d in &mut discussions {
        if let Some(rows) = replies.remove(&d.id) {
            d.replies = build_tree(rows);
        }
    }
    Ok(discussions)
}

/// A single rendered thread.
pub fn get(conn: &Connection, id: &Uuid) -> Result<Discussion, AppError> {
    let mut discussion = conn
        .query_row(
            &format!("{DISCUSSION_SELECT} WHERE d.id = ?1"),
            [id.to_string()],
            row_to_discussion,
        )
        .optional()?
        .ok_or_else(discussion_not_found)?;
    if let Some(rows) = load_replies(conn, Some(id))?.remove(id) {
        discussion.replies = build_tree(rows);
    }
    Ok(discussion)
}

/// Append a reply, either at the top level or under `parent_id`, which must
/// belong to the same discussion.
pub fn add_reply(
    conn: &Connection,
    discussion_id: &Uuid,
    input: NewReply,
    author: &Requester,
) -> Result<Discussion, AppError> {
    let text = input.text.trim();
    // Take the write lock up front so the parent check and the insert see
    // the same snapshot.
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    if !exists(&tx, discussion_id)? {
        return Err(discussion_not_found());
    }
    if text.is_empty() {
        return Err(AppError::validation("Reply text is required"));
    }
    let parent = match input.parent_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => {
            let parent = Uuid::parse_str(raw).map_err(|_| reply_not_found())?;
            let found: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM replies WHERE id = ?1 AND discussion_id = ?2",
                    params![parent.to_string(), discussion_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            if found.is_none() {
                return Err(reply_not_found());
            }
            Some(parent)
        }
    };
    let id = Uuid::new_v4();
    tx.execute(
        "INSERT INTO replies (id, discussion_id, parent_id, author_id, text, likes, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
        params![
            id.to_string(),
            discussion_id.to_string(),
            parent.map(|p| p.to_string()),
            author.id.to_string(),
            text,
            now_millis(),
        ],
    )?;
    tx.commit()?;
    tracing::info!(discussion_id = %discussion_id, reply_id = %id, nested = parent.is_some(), "added reply");
    get(conn, discussion_id)
}

/// Add one like to a thread. Repeated likes from the same identity all count.
pub fn like_discussion(conn: &Connection, id: &Uuid) -> Result<Discussion, AppError> {
    let changed = conn.execute(
        "UPDATE discussions SET likes = likes + 1 WHERE id = ?1",
        [id.to_string()],
    )?;
    if changed == 0 {
        return Err(discussion_not_found());
    }
    get(conn, id)
}

/// Add one like to a reply at any depth of the thread.
pub fn like_reply(
    conn: &Connection,
    discussion_id: &Uuid,
    reply_id: &Uuid,
) -> Result<Discussion, AppError> {
    if !exists(conn, discussion_id)? {
        return Err(discussion_not_found());
    }
    let changed = conn.execute(
        "UPDATE replies SET likes = likes + 1 WHERE id = ?1 AND discussion_id = ?2",
        params![reply_id.to_string(), discussion_id.to_string()],
    )?;
    if changed == 0 {
        return Err(reply_not_found());
    }
    get(conn, discussion_id)
}
