use super::ProviderError;
use crate::types::Session;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};
use url::Url;

const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Base URL and key of one GoTrue deployment.
#[derive(Debug, Clone)]
pub(super) struct GoTrueTarget {
    base: Url,
    anon_key: String,
    redirect_to: Option<Url>,
}

impl GoTrueTarget {
    pub(super) fn new(mut base: Url, anon_key: String, redirect_to: Option<Url>) -> Self {
        // Url::join drops the last path segment unless the base ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self {
            base,
            anon_key,
            redirect_to,
        }
    }

    fn url(&self, path: &str) -> Result<Url, ProviderError> {
        self.base
            .join(path)
            .map_err(|e| ProviderError::Transport(format!("invalid endpoint url: {e}")))
    }
}

/// Token grant / verify response body.
#[derive(Debug, Clone, Deserialize)]
pub(super) struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: Option<i64>,
    pub expires_at: Option<i64>,
    pub user: Option<Value>,
}

impl TokenResponse {
    /// Out-of-range expiry values are a decode error, not a panic.
    pub(super) fn session(&self, now: DateTime<Utc>) -> Result<Session, ProviderError> {
        let expires_at = match self.expires_at {
            Some(secs) => DateTime::from_timestamp(secs, 0),
            None => TimeDelta::try_seconds(self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS))
                .and_then(|ttl| now.checked_add_signed(ttl)),
        }
        .ok_or_else(|| ProviderError::Decode("token expiry out of range".to_string()))?;
        Ok(Session {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at,
        })
    }
}

/// Sign-up either starts a session right away or, when email confirmation is
/// required, only returns the user.
#[derive(Debug, Clone)]
pub(super) enum SignUpResponse {
    Session(TokenResponse),
    User(Value),
}

/// Stateless GoTrue endpoints.
pub(super) struct GoTrueEndpoints;

impl GoTrueEndpoints {
    pub(super) async fn verify_signup_otp(
        http: &reqwest::Client,
        target: &GoTrueTarget,
        email: &str,
        token: &str,
    ) -> Result<TokenResponse, ProviderError> {
        let resp = http
            .post(target.url("auth/v1/verify")?)
            .header("apikey", &target.anon_key)
            .json(&json!({ "type": "signup", "email": email, "token": token }))
            .send()
            .await?;
        let body = check(resp).await?.json::<TokenResponse>().await?;
        info!("OTP verified by provider");
        Ok(body)
    }

    pub(super) async fn resend_signup(
        http: &reqwest::Client,
        target: &GoTrueTarget,
        email: &str,
    ) -> Result<(), ProviderError> {
        let mut url = target.url("auth/v1/resend")?;
        if let Some(redirect) = target.redirect_to.as_ref() {
            url.query_pairs_mut()
                .append_pair("redirect_to", redirect.as_str());
        }
        let resp = http
            .post(url)
            .header("apikey", &target.anon_key)
            .json(&json!({ "type": "signup", "email": email }))
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    pub(super) async fn password_grant(
        http: &reqwest::Client,
        target: &GoTrueTarget,
        email: &str,
        password: &str,
    ) -> Result<TokenResponse, ProviderError> {
        let mut url = target.url("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        let resp = http
            .post(url)
            .header("apikey", &target.anon_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        Ok(check(resp).await?.json::<TokenResponse>().await?)
    }

    pub(super) async fn refresh_grant(
        http: &reqwest::Client,
        target: &GoTrueTarget,
        refresh_token: &str,
    ) -> Result<TokenResponse, ProviderError> {
        let mut url = target.url("auth/v1/token")?;
        url.query_pairs_mut()
            .append_pair("grant_type", "refresh_token");
        let resp = http
            .post(url)
            .header("apikey", &target.anon_key)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        let body = check(resp).await?.json::<TokenResponse>().await?;
        debug!("session refreshed");
        Ok(body)
    }

    pub(super) async fn sign_up(
        http: &reqwest::Client,
        target: &GoTrueTarget,
        email: &str,
        password: &str,
    ) -> Result<SignUpResponse, ProviderError> {
        let mut url = target.url("auth/v1/signup")?;
        if let Some(redirect) = target.redirect_to.as_ref() {
            url.query_pairs_mut()
                .append_pair("redirect_to", redirect.as_str());
        }
        let resp = http
            .post(url)
            .header("apikey", &target.anon_key)
            .json(&json!({
                "email": email,
                "password": password,
                "data": { "email": email },
            }))
            .send()
            .await?;
        let body: Value = check(resp).await?.json().await?;
        parse_sign_up(body)
    }

    pub(super) async fn fetch_user(
        http: &reqwest::Client,
        target: &GoTrueTarget,
        access_token: &str,
    ) -> Result<Value, ProviderError> {
        let resp = http
            .get(target.url("auth/v1/user")?)
            .header("apikey", &target.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    pub(super) async fn logout(
        http: &reqwest::Client,
        target: &GoTrueTarget,
        access_token: &str,
    ) -> Result<(), ProviderError> {
        let resp = http
            .post(target.url("auth/v1/logout")?)
            .header("apikey", &target.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }
}

pub(super) fn parse_sign_up(body: Value) -> Result<SignUpResponse, ProviderError> {
    if body.get("access_token").is_some() {
        let token: TokenResponse =
            serde_json::from_value(body).map_err(|e| ProviderError::Decode(e.to_string()))?;
        return Ok(SignUpResponse::Session(token));
    }
    // Some deployments wrap the user, others return it bare.
    let user = match body.get("user") {
        Some(user) if user.is_object() => user.clone(),
        _ => body,
    };
    Ok(SignUpResponse::User(user))
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<Value>,
    error_code: Option<String>,
    error: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error_description: Option<String>,
}

async fn check(resp: Response) -> Result<Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(api_error(status, &text))
}

pub(super) fn api_error(status: StatusCode, text: &str) -> ProviderError {
    let body: ErrorBody = serde_json::from_str(text).unwrap_or_default();
    let code = body
        .error_code
        .or_else(|| {
            body.code
                .as_ref()
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .or(body.error);
    let message = body
        .msg
        .or(body.message)
        .or(body.error_description)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
    ProviderError::Api {
        status: status.as_u16(),
        code,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_without_trailing_slash_keeps_its_path() {
        let target = GoTrueTarget::new(
            Url::parse("https://id.example.com/project").unwrap(),
            "anon".to_string(),
            None,
        );
        assert_eq!(
            target.url("auth/v1/verify").unwrap().as_str(),
            "https://id.example.com/project/auth/v1/verify"
        );
    }

    #[test]
    fn error_body_prefers_string_error_code() {
        let err = api_error(
            StatusCode::FORBIDDEN,
            r#"{"code":403,"error_code":"otp_expired","msg":"Token has expired or is invalid"}"#,
        );
        assert_eq!(
            err,
            ProviderError::Api {
                status: 403,
                code: Some("otp_expired".to_string()),
                message: "Token has expired or is invalid".to_string(),
            }
        );
    }

    #[test]
    fn oauth_style_error_body_is_decoded() {
        let err = api_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#,
        );
        let ProviderError::Api { code, message, .. } = err else {
            panic!("expected api error");
        };
        assert_eq!(code.as_deref(), Some("invalid_grant"));
        assert_eq!(message, "Invalid login credentials");
    }

    #[test]
    fn non_json_error_falls_back_to_reason() {
        let err = api_error(StatusCode::BAD_GATEWAY, "<html>oops</html>");
        assert_eq!(
            err,
            ProviderError::Api {
                status: 502,
                code: None,
                message: "Bad Gateway".to_string(),
            }
        );
    }

    #[test]
    fn sign_up_without_session_yields_user() {
        let parsed = parse_sign_up(serde_json::json!({ "id": "u1", "email": "a@b.com" })).unwrap();
        assert!(matches!(parsed, SignUpResponse::User(user) if user["id"] == "u1"));
    }

    #[test]
    fn token_response_prefers_absolute_expiry() {
        let token = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_in: Some(10),
            expires_at: Some(1_900_000_000),
            user: None,
        };
        let session = token.session(Utc::now()).unwrap();
        assert_eq!(session.expires_at.timestamp(), 1_900_000_000);
    }

    #[test]
    fn absurd_expiry_is_a_decode_error() {
        let mut token = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_in: Some(1_000_000_000_000_000),
            expires_at: None,
            user: None,
        };
        assert!(matches!(
            token.session(Utc::now()),
            Err(ProviderError::Decode(_))
        ));

        token.expires_in = Some(i64::MAX);
        assert!(token.session(Utc::now()).is_err());

        token.expires_in = None;
        token.expires_at = Some(i64::MAX);
        assert!(matches!(
            token.session(Utc::now()),
            Err(ProviderError::Decode(_))
        ));
    }
}
