//! Bearer-token verification: HMAC-signed JWTs carrying a `permissions`
//! claim, checked for algorithm, issuer, audience and expiry.

use crate::guard::verify_claims;
use chrono::{Duration, Utc};
use dynamis_core::config::JwtConfig;
use dynamis_core::{DynamisError, DynamisResult};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct TokenVerifier {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl TokenVerifier {
    pub fn new(config: &JwtConfig) -> DynamisResult<Self> {
        let secret = config
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| DynamisError::config("jwt.secret is not configured"))?;
        let algorithm: Algorithm = config.algorithm.parse().map_err(|e| {
            DynamisError::config(format!("unsupported jwt algorithm `{}`: {e}", config.algorithm))
        })?;
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(DynamisError::config(format!(
                "jwt algorithm `{}` is not an HMAC algorithm",
                config.algorithm
            )));
        }

        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.leeway = config.leeway_secs;

        Ok(Self {
            algorithm,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            ttl: Duration::minutes(i64::from(config.access_token_expire_minutes)),
        })
    }

    /// Sign an access token for `subject` that expires after the configured lifetime.
    pub fn issue(&self, subject: &str, permissions: &[String]) -> DynamisResult<String> {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: subject.to_string(),
            permissions: permissions.to_vec(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::new(self.algorithm), &claims, &self.encoding)
            .map_err(|e| DynamisError::config(format!("cannot sign token: {e}")))
    }

    /// Decode and validate `token`. Any signature, algorithm, issuer,
    /// audience or expiry failure is an authentication error.
    pub fn verify(&self, token: &str) -> DynamisResult<TokenClaims> {
        let data = decode::<TokenClaims>(token, &self.decoding, &self.validation).map_err(|e| {
            warn!(error = %e, "Bearer token rejected");
            DynamisError::auth(format!("invalid authentication credentials: {e}"))
        })?;
        debug!(sub = %data.claims.sub, "Bearer token accepted");
        Ok(data.claims)
    }

    /// Whether a valid token grants every permission in `required`.
    pub fn verify_permissions<S: AsRef<str>>(
        &self,
        token: &str,
        required: &[S],
    ) -> DynamisResult<bool> {
        let claims = self.verify(token)?;
        Ok(verify_claims(claims.permissions.as_slice(), required))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-for-token-verification";

    fn config() -> JwtConfig {
        JwtConfig {
            secret: Some(SECRET.to_string()),
            ..JwtConfig::default()
        }
    }

    fn claims(exp_offset_secs: i64) -> TokenClaims {
        let now = Utc::now().timestamp();
        TokenClaims {
            sub: "u-1".into(),
            permissions: vec!["view_projects".into(), "manage_projects".into()],
            iss: "dynamis-ai".into(),
            aud: "dynamis-clients".into(),
            iat: now,
            exp: now + exp_offset_secs,
        }
    }

    fn sign(claims: &TokenClaims, algorithm: Algorithm, secret: &str) -> String {
        encode(
            &Header::new(algorithm),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("failed to encode test JWT")
    }

    #[test]
    fn test_issued_token_verifies() {
        let verifier = TokenVerifier::new(&config()).unwrap();
        let token = verifier.issue("u-1", &["view_projects".to_string()]).unwrap();

        let claims = verifier.verify(&token).unwrap();
        assert_eq!(claims.sub, "u-1");
        assert_eq!(claims.iss, "dynamis-ai");
        assert_eq!(claims.exp - claims.iat, 30 * 60);

        assert!(verifier.verify_permissions(&token, &["view_projects"]).unwrap());
        assert!(!verifier.verify_permissions(&token, &["manage_billing"]).unwrap());
        assert!(verifier.verify_permissions::<&str>(&token, &[]).unwrap());
    }

    #[test]
    fn test_permissions_claim_checked() {
        let verifier = TokenVerifier::new(&config()).unwrap();
        let token = sign(&claims(600), Algorithm::HS256, SECRET);
        assert!(verifier
            .verify_permissions(&token, &["view_projects", "manage_projects"])
            .unwrap());
        assert!(!verifier
            .verify_permissions(&token, &["view_projects", "delete_projects"])
            .unwrap());
    }

    #[test]
    fn test_bad_tokens_are_authentication_errors() {
        let verifier = TokenVerifier::new(&config()).unwrap();

        let wrong_secret = sign(&claims(600), Algorithm::HS256, "another-secret");
        let expired = sign(&claims(-3600), Algorithm::HS256, SECRET);
        let wrong_algorithm = sign(&claims(600), Algorithm::HS512, SECRET);
        let wrong_issuer = sign(
            &TokenClaims {
                iss: "someone-else".into(),
                ..claims(600)
            },
            Algorithm::HS256,
            SECRET,
        );
        let wrong_audience = sign(
            &TokenClaims {
                aud: "other-clients".into(),
                ..claims(600)
            },
            Algorithm::HS256,
            SECRET,
        );

        for token in [
            wrong_secret.as_str(),
            expired.as_str(),
            wrong_algorithm.as_str(),
            wrong_issuer.as_str(),
            wrong_audience.as_str(),
            "not.a.jwt",
        ] {
            let err = verifier.verify_permissions(token, &["view_projects"]).unwrap_err();
            assert!(err.is_authentication(), "token {token} gave {err}");
        }
    }

    #[test]
    fn test_misconfiguration_rejected() {
        let missing = TokenVerifier::new(&JwtConfig::default()).err().unwrap();
        assert!(missing.is_configuration());

        let asymmetric = TokenVerifier::new(&JwtConfig {
            algorithm: "RS256".into(),
            ..config()
        })
        .err()
        .unwrap();
        assert!(asymmetric.is_configuration());

        let unknown = TokenVerifier::new(&JwtConfig {
            algorithm: "HS999".into(),
            ..config()
        })
        .err()
        .unwrap();
        assert!(unknown.is_configuration());
    }
}
