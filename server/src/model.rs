use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Tenant,
    Landlord,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Tenant => "tenant",
            Role::Landlord => "landlord",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tenant" => Ok(Role::Tenant),
            "landlord" => Ok(Role::Landlord),
            other => Err(format!("unknown role {other}")),
        }
    }
}

/// Public view of an identity. Never carries the password hash.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AuthorRef {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub price: f64,
    pub address: String,
    pub city: String,
    pub state: String,
    pub features: Vec<String>,
    pub images: Vec<String>,
    pub safety_score: Option<f64>,
    pub owner: UserSummary,
    pub created_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub id: Uuid,
    pub author: AuthorRef,
    pub text: String,
    pub likes: u32,
    pub created_at: i64,
    pub replies: Vec<Reply>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Discussion {
    pub id: Uuid,
    pub property_title: String,
    pub locality: String,
    pub rating: u8,
    pub text: String,
    pub author: AuthorRef,
    pub likes: u32,
    pub created_at: i64,
    pub replies: Vec<Reply>,
}

#[cfg(test)]
impl Discussion {
    /// Depth-first search through the reply tree.
    pub fn find_reply(&self, id: &Uuid) -> Option<&Reply> {
        fn walk<'a>(replies: &'a [Reply], id: &Uuid) -> Option<&'a Reply> {
            replies
                .iter()
                .find_map(|r| if r.id == *id { Some(r) } else { walk(&r.replies, id) })
        }
        walk(&self.replies, id)
    }
}
