/// Authentication extractors and utilities
///
/// Tokens are issued elsewhere; this service only verifies them. The `sub`
/// claim carries the account's utorid.
use crate::{
    account::{Account, Actor, Role},
    api::middleware::extract_bearer_token,
    context::AppContext,
    error::RewardsError,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};

/// Claims this service reads from a bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

/// Authenticated account making the request
#[derive(Debug, Clone)]
pub struct ActorContext {
    pub actor: Actor,
    pub account: Account,
}

impl ActorContext {
    /// Fail unless the actor is `account_id` or holds at least `role`
    pub fn require_self_or(&self, account_id: i64, role: Role) -> Result<(), RewardsError> {
        if self.actor.id == account_id {
            Ok(())
        } else {
            self.actor.require(role)
        }
    }
}

#[async_trait]
impl FromRequestParts<AppContext> for ActorContext {
    type Rejection = RewardsError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| RewardsError::Authentication("Missing authorization header".to_string()))?;

        let claims = verify_jwt_token(&token, &state.config.authentication.jwt_secret)?;

        let account = match state.accounts.get_by_utorid(&claims.sub).await {
            Ok(account) => account,
            Err(RewardsError::NotFound(_)) => {
                tracing::warn!(utorid = %claims.sub, "token for unknown account");
                return Err(RewardsError::Authentication(
                    "Token does not match an account".to_string(),
                ));
            }
            Err(e) => return Err(e),
        };

        Ok(ActorContext {
            actor: Actor::from(&account),
            account,
        })
    }
}

/// Verify an HS256 token's signature and expiry
pub fn verify_jwt_token(token: &str, jwt_secret: &str) -> Result<Claims, RewardsError> {
    use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

    let decoding_key = DecodingKey::from_secret(jwt_secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    // Allow some clock skew (5 minutes)
    validation.leeway = 300;

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::warn!("JWT verification failed: {}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    RewardsError::Authentication("Token has expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    RewardsError::Authentication("Invalid token signature".to_string())
                }
                _ => RewardsError::Authentication(format!("Invalid token: {}", e)),
            }
        })
}
