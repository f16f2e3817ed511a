use crate::{
    api::AppState,
    error::AppError,
    model::{Role, UserSummary},
    users,
};
use anyhow::Result;
use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Fixed validity of every issued credential.
pub const TOKEN_TTL: Duration = Duration::days(7);

/// Hash a password using argon2id with a random salt.
pub fn hash_password(pass: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(pass.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e))?
        .to_string();
    Ok(hash)
}

/// Verify a password against an encoded hash.
pub fn verify_password(pass: &str, hash: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        Argon2::default()
            .verify_password(pass.as_bytes(), &parsed)
            .is_ok()
    } else {
        false
    }
}

/// Claims stored within issued JWTs.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: usize,
    pub exp: usize,
}

impl Claims {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

/// Issue a JWT for an identity valid for the provided duration.
pub fn issue_jwt(secret: &[u8], id: &Uuid, role: Role, valid_for: Duration) -> Result<String> {
    let now = OffsetDateTime::now_utc();
    let claims = Claims {
        sub: id.to_string(),
        role,
        iat: now.unix_timestamp() as usize,
        exp: (now + valid_for).unix_timestamp() as usize,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )?;
    Ok(token)
}

/// Verify a JWT and return its claims if valid.
pub fn verify_jwt(secret: &[u8], token: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    if data.claims.exp < OffsetDateTime::now_utc().unix_timestamp() as usize {
        anyhow::bail!("expired");
    }
    Ok(data.claims)
}

/// The authenticated caller of a protected route.
///
/// Extracting it runs the access-control gate: the bearer token must verify
/// and its subject must still exist in the identity store. Handlers hand the
/// value on to the services explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl Requester {
    pub fn require_role(&self, role: Role) -> Result<(), AppError> {
        if self.role == role {
            Ok(())
        } else {
            Err(AppError::forbidden(format!(
                "Only a {role} can perform this action"
            )))
        }
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
        }
    }
}

impl From<UserSummary> for Requester {
    fn from(u: UserSummary) -> Self {
        Self {
            id: u.id,
            name: u.name,
            email: u.email,
            role: u.role,
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

#[async_trait]
impl FromRequestParts<AppState> for Requester {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let token = bearer_token(parts).ok_or_else(AppError::unauthorized)?;
        let claims = verify_jwt(&state.jwt_secret, token).map_err(|e| {
            tracing::debug!("rejected bearer token: {e}");
            AppError::unauthorized()
        })?;
        let id = claims.user_id().ok_or_else(AppError::unauthorized)?;
        let user = state
            .with_conn(move |conn| users::find_by_id(conn, &id))
            .await?
            .ok_or_else(AppError::unauthorized)?;
        Ok(user.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify() {
        let hash = hash_password("secret").unwrap();
        assert!(verify_password("secret", &hash));
        assert!(!verify_password("bad", &hash));
        assert!(!verify_password("secret", "not-a-hash"));
    }

    #[test]
    fn hashes_are_salted() {
        assert_ne!(hash_password("same").unwrap(), hash_password("same").unwrap());
    }

    #[test]
    fn jwt_carries_id_and_role() {
        let secret = b"secret";
        let id = Uuid::new_v4();
        let token = issue_jwt(secret, &id, Role::Landlord, TOKEN_TTL).unwrap();
        let claims = verify_jwt(secret, &token).unwrap();
        assert_eq!(claims.user_id(), Some(id));
        assert_eq!(claims.role, Role::Landlord);
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
    }

    #[test]
    fn jwt_expiry() {
        let secret = b"secret";
        let token = issue_jwt(secret, &Uuid::new_v4(), Role::Tenant, Duration::seconds(-120))
            .unwrap();
        assert!(verify_jwt(secret, &token).is_err());
    }

    #[test]
    fn jwt_wrong_secret() {
        let token = issue_jwt(b"one", &Uuid::new_v4(), Role::Tenant, TOKEN_TTL).unwrap();
        assert!(verify_jwt(b"two", &token).is_err());
        assert!(verify_jwt(b"one", "garbage").is_err());
    }

    #[test]
    fn role_gate() {
        let tenant = Requester {
            id: Uuid::new_v4(),
            name: "T".into(),
            email: "t@example.com".into(),
            role: Role::Tenant,
        };
        assert!(matches!(
            tenant.require_role(Role::Landlord),
            Err(AppError::Forbidden(_))
        ));
        assert!(tenant.require_role(Role::Tenant).is_ok());
    }
}
