use crate::{
    auth::Requester,
    db::{get_json, get_role, get_uuid, now_millis},
    error::AppError,
    model::{Listing, Role, UserSummary},
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Deserialize;
use uuid::Uuid;

/// Fields accepted when creating a listing.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewListing {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, alias = "safety_score")]
    pub safety_score: Option<f64>,
}

/// Partial update; absent fields are left untouched.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ListingPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub features: Option<Vec<String>>,
    pub images: Option<Vec<String>>,
    #[serde(alias = "safety_score")]
    pub safety_score: Option<f64>,
}

impl ListingPatch {
    fn apply(self, l: &mut Listing) {
        if let Some(v) = self.title {
            l.title = v;
        }
        if let Some(v) = self.description {
            l.description = v;
        }
        if let Some(v) = self.price {
            l.price = v;
        }
        if let Some(v) = self.address {
            l.address = v;
        }
        if let Some(v) = self.city {
            l.city = v;
        }
        if let Some(v) = self.state {
            l.state = v;
        }
        if let Some(v) = self.features {
            l.features = v;
        }
        if let Some(v) = self.images {
            l.images = v;
        }
        if self.safety_score.is_some() {
            l.safety_score = self.safety_score;
        }
    }
}

const SELECT: &str = "SELECT l.id, l.title, l.description, l.price, l.address, l.city, l.state, \
     l.features, l.images, l.safety_score, l.created_at, u.id, u.name, u.email, u.role \
     FROM listings l JOIN users u ON u.id = l.owner_id";

fn row_to_listing(row: &rusqlite::Row<'_>) -> rusqlite::Result<Listing> {
    Ok(Listing {
        id: get_uuid(row, 0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        price: row.get(3)?,
        address: row.get(4)?,
        city: row.get(5)?,
        state: row.get(6)?,
        features: get_json(row, 7)?,
        images: get_json(row, 8)?,
        safety_score: row.get(9)?,
        created_at: row.get(10)?,
        owner: UserSummary {
            id: get_uuid(row, 11)?,
            name: row.get(12)?,
            email: row.get(13)?,
            role: get_role(row, 14)?,
        },
    })
}

fn validate(title: &str, price: f64) -> Result<(), AppError> {
    if title.trim().is_empty() {
        return Err(AppError::validation("Title is required"));
    }
    if !price.is_finite() || price < 0.0 {
        return Err(AppError::validation("Price must be a non-negative number"));
    }
    Ok(())
}

fn not_found() -> AppError {
    AppError::not_found("Property not found")
}

/// All listings, newest first, each with its owner attached.
pub fn list(conn: &Connection) -> Result<Vec<Listing>, AppError> {
    let mut stmt = conn.prepare(&format!("{SELECT} ORDER BY l.created_at DESC, l.rowid DESC"))?;
    let listings = stmt
        .query_map([], row_to_listing)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(listings)
}

fn find(conn: &Connection, id: &Uuid) -> Result<Option<Listing>, AppError> {
    let listing = conn
        .query_row(
            &format!("{SELECT} WHERE l.id = ?1"),
            [id.to_string()],
            row_to_listing,
        )
        .optional()?;
    Ok(listing)
}

pub fn get(conn: &Connection, id: &Uuid) -> Result<Listing, AppError> {
    find(conn, id)?.ok_or_else(not_found)
}

pub fn create(
    conn: &Connection,
    fields: NewListing,
    requester: &Requester,
) -> Result<Listing, AppError> {
    requester.require_role(Role::Landlord)?;
    validate(&fields.title, fields.price)?;
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO listings (id, title, description, price, address, city, state, features, images, safety_score, owner_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            id.to_string(),
            fields.title.trim(),
            fields.description,
            fields.price,
            fields.address,
            fields.city,
            fields.state,
            serde_json::to_string(&fields.features).map_err(anyhow::Error::from)?,
            serde_json::to_string(&fields.images).map_err(anyhow::Error::from)?,
            fields.safety_score,
            requester.id.to_string(),
            now_millis(),
        ],
    )?;
    tracing::info!(listing_id = %id, owner = %requester.id, "created listing");
    get(conn, &id)
}

/// Load a listing and make sure the requester owns it.
fn owned(
    conn: &Connection,
    id: &Uuid,
    requester: &Requester,
    action: &str,
) -> Result<Listing, AppError> {
    let listing = get(conn, id)?;
    if listing.owner.id != requester.id {
        tracing::warn!(listing_id = %id, requester = %requester.id, "rejected {action} by non-owner");
        return Err(AppError::forbidden(format!(
            "You are not authorized to {action} this property"
        )));
    }
    Ok(listing)
}

pub fn update(
    conn: &Connection,
    id: &Uuid,
    patch: ListingPatch,
    requester: &Requester,
) -> Result<Listing, AppError> {
    let mut listing = owned(conn, id, requester, "edit")?;
    patch.apply(&mut listing);
    validate(&listing.title, listing.price)?;
    conn.execute(
        "UPDATE listings SET title = ?2, description = ?3, price = ?4, address = ?5, city = ?6, state = ?7, \
         features = ?8, images = ?9, safety_score = ?10 WHERE id = ?1 AND owner_id = ?11",
        params![
            id.to_string(),
            listing.title,
            listing.description,
            listing.price,
            listing.address,
            listing.city,
            listing.state,
            serde_json::to_string(&listing.features).map_err(anyhow::Error::from)?,
            serde_json::to_string(&listing.images).map_err(anyhow::Error::from)?,
            listing.safety_score,
            requester.id.to_string(),
        ],
    )?;
    tracing::info!(listing_id = %id, "updated listing");
    get(conn, id)
}

pub fn delete(conn: &Connection, id: &Uuid, requester: &Requester) -> Result<(), AppError> {
    owned(conn, id, requester, "delete")?;
    conn.execute(
        "DELETE FROM listings WHERE id = ?1 AND owner_id = ?2",
        params![id.to_string(), requester.id.to_string()],
    )?;
    tracing::info!(listing_id = %id, "deleted listing");
    Ok(())
}
