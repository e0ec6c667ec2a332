use crate::agent_modules::credentials::Credential;
use crate::agent_modules::error::SessionError;
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

const ENLIGHTEN_LOGIN_URL: &str = "https://enlighten.enphaseenergy.com/login/login.json";
const ENTREZ_TOKEN_URL: &str = "https://entrez.enphaseenergy.com/tokens";
const DEFAULT_TOKEN_KIND: &str = "owner";

#[derive(Deserialize, Debug)]
struct LoginResponse {
    session_id: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize, Debug)]
struct TokenClaims {
    exp: i64,
    #[serde(rename = "enphaseUser")]
    enphase_user: Option<String>,
}

/// Reads `exp` and `enphaseUser` from a device JWT.
///
/// The signature is not checked here; the device does that on every request.
pub fn credential_from_token(token: &str) -> Result<Credential, SessionError> {
    let header = decode_header(token)
        .map_err(|e| SessionError::InvalidResponse(format!("Malformed token: {e}")))?;
    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let claims = decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| SessionError::InvalidResponse(format!("Malformed token claims: {e}")))?
        .claims;
    let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0)
        .ok_or_else(|| SessionError::InvalidResponse(format!("Token exp out of range: {}", claims.exp)))?;

    Ok(Credential {
        token: token.to_string(),
        token_kind: claims
            .enphase_user
            .unwrap_or_else(|| DEFAULT_TOKEN_KIND.to_string()),
        expires_at,
    })
}

/// Logs in to Enlighten with the owner's password and asks Entrez for a device token.
pub async fn request_token(
    cloud: &Client,
    username: &str,
    password: &str,
    serial: &str,
) -> Result<String, SessionError> {
    debug!(serial = %serial, "Requesting device token from Enlighten.");
    let login_response = cloud
        .post(ENLIGHTEN_LOGIN_URL)
        .form(&[("user[email]", username), ("user[password]", password)])
        .send()
        .await?;
    let status = login_response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(SessionError::Unauthorized(
            "Enlighten rejected username or password".to_string(),
        ));
    }
    if !status.is_success() {
        let body = login_response.text().await.unwrap_or_default();
        return Err(SessionError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let login: LoginResponse = login_response.json().await?;
    let session_id = login.session_id.ok_or_else(|| {
        SessionError::Unauthorized(
            login
                .message
                .unwrap_or_else(|| "Enlighten login returned no session".to_string()),
        )
    })?;

    let token_response = cloud
        .post(ENTREZ_TOKEN_URL)
        .json(&serde_json::json!({
            "session_id": session_id,
            "serial_num": serial,
            "username": username,
        }))
        .send()
        .await?;
    let status = token_response.status();
    let body = token_response.text().await?;
    if !status.is_success() {
        return Err(SessionError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let token = body.trim().to_string();
    if token.is_empty() {
        return Err(SessionError::InvalidResponse(
            "Entrez returned an empty token".to_string(),
        ));
    }
    Ok(token)
}
