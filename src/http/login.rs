//! The captcha-login flow. Deterministic sequence: cookie → vtoken → captcha
//! image → OCR → login submission, with inner retries on captcha misrecognition and a latch
//! on bad credentials. Generic over [`CaptchaSolver`] rather than boxing it, since the trait
//! returns `impl Future` and isn't object-safe.

use std::collections::HashMap;

use reqwest::Client;
use serde_json::Value;
use tracing::{info, warn};

use crate::captcha::CaptchaSolver;
use crate::errors::EnrollmentError;
use crate::http::wire::{BASE_PATH, PATH_INDEX, PATH_LOGIN, PATH_VCODE_IMAGE, PATH_VCODE_TOKEN};
use crate::types::{Credentials, Session};
use crate::util::get_epoch_time;

const MAX_CAPTCHA_RETRIES: u32 = 5;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, \
like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Runs the full captcha-login sequence against `base_url`, producing a fresh [`Session`].
///
/// `previous_offset_ms` carries forward a server-time offset already measured by an earlier
/// login in this process; the probe below only overwrites it on success, and is skipped
/// silently if the probe fails.
pub async fn login<C: CaptchaSolver>(
    client: &Client,
    base_url: &str,
    credentials: &Credentials,
    solver: &C,
    previous_offset_ms: i64,
) -> Result<Session, EnrollmentError> {
    let server_time_offset_ms = probe_server_time_offset(client, base_url)
        .await
        .unwrap_or(previous_offset_ms);

    let (mut cookies, _) = fetch_index_cookies(client, base_url).await?;

    let mut attempt = 0;
    loop {
        attempt += 1;

        let vtoken = fetch_vcode_token(client, base_url, &cookies).await?;
        let image_bytes = fetch_captcha_image(client, base_url, &cookies, &vtoken).await?;

        let solved = solver
            .solve(&image_bytes)
            .await
            .map_err(|e| EnrollmentError::Other(format!("captcha solver failed: {e}")))?;
        let code = normalize_captcha(&solved);

        let timestamp = get_epoch_time() + server_time_offset_ms;
        let response = client
            .get(format!("{base_url}{BASE_PATH}{PATH_LOGIN}"))
            .header("Cookie", cookie_header(&cookies))
            .header("User-Agent", USER_AGENT)
            .query(&[
                ("timestrap", timestamp.to_string()),
                ("loginName", credentials.student_id.clone()),
                ("loginPwd", credentials.password.clone()),
                ("verifyCode", code),
                ("vtoken", vtoken),
            ])
            .send()
            .await
            .map_err(|e| EnrollmentError::TransientNetwork(e.to_string()))?;

        merge_set_cookies(&response, &mut cookies);

        let body: Value = response
            .json()
            .await
            .map_err(|e| EnrollmentError::TransientNetwork(e.to_string()))?;

        let code_field = body["code"].as_str().unwrap_or_default();
        let msg = body["msg"].as_str().unwrap_or_default();
        let msg_lower = msg.to_lowercase();

        if code_field == "1" {
            let token = body["data"]["token"].as_str().unwrap_or_default().to_owned();
            let student_code = body["data"]["number"].as_str().unwrap_or_default().to_owned();
            let display_name = body["data"]["name"].as_str().unwrap_or_default();
            info!("Logged in as {display_name} ({student_code}).");

            return Ok(Session {
                token,
                cookies,
                server_time_offset_ms,
                student_code,
                batch_code: String::new(),
                campus_code: String::new(),
            });
        }

        if msg_lower.contains("password") || msg_lower.contains("account") || msg.contains("密码") || msg.contains("账号") {
            warn!("Login rejected: {msg}");
            return Err(EnrollmentError::CredentialsRejected);
        }

        if msg_lower.contains("captcha") || msg.contains("验证码") {
            if attempt >= MAX_CAPTCHA_RETRIES {
                return Err(EnrollmentError::Other(format!(
                    "captcha misrecognized {MAX_CAPTCHA_RETRIES} times in a row"
                )));
            }
            warn!("Captcha misrecognized (attempt {attempt}); retrying with a fresh image.");
            continue;
        }

        return Err(EnrollmentError::Other(msg.to_owned()));
    }
}

/// Normalizes a raw OCR result to the 4-character ASCII-alphanumeric code the login endpoint
/// expects.
fn normalize_captcha(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(4)
        .collect()
}

async fn fetch_index_cookies(
    client: &Client,
    base_url: &str,
) -> Result<(HashMap<String, String>, ()), EnrollmentError> {
    let response = client
        .get(format!("{base_url}{BASE_PATH}{PATH_INDEX}"))
        .header("User-Agent", USER_AGENT)
        .send()
        .await
        .map_err(|e| EnrollmentError::TransientNetwork(e.to_string()))?;

    let mut cookies = HashMap::new();
    merge_set_cookies(&response, &mut cookies);
    Ok((cookies, ()))
}

/// HEAD on the index page; `offset = serverMs - localMs` using the round-trip midpoint as the
/// local reference point.
async fn probe_server_time_offset(client: &Client, base_url: &str) -> Option<i64> {
    let sent_at = get_epoch_time();
    let response = client
        .head(format!("{base_url}{BASE_PATH}{PATH_INDEX}"))
        .header("User-Agent", USER_AGENT)
        .send()
        .await
        .ok()?;
    let received_at = get_epoch_time();

    let date_header = response.headers().get(reqwest::header::DATE)?.to_str().ok()?;
    let server_ms = chrono::DateTime::parse_from_rfc2822(date_header)
        .ok()?
        .timestamp_millis();

    let local_midpoint = sent_at + (received_at - sent_at) / 2;
    Some(server_ms - local_midpoint)
}

async fn fetch_vcode_token(
    client: &Client,
    base_url: &str,
    cookies: &HashMap<String, String>,
) -> Result<String, EnrollmentError> {
    let response = client
        .get(format!("{base_url}{BASE_PATH}{PATH_VCODE_TOKEN}"))
        .header("Cookie", cookie_header(cookies))
        .header("User-Agent", USER_AGENT)
        .query(&[("timestamp", get_epoch_time().to_string())])
        .send()
        .await
        .map_err(|e| EnrollmentError::TransientNetwork(e.to_string()))?;

    let body: Value = response
        .json()
        .await
        .map_err(|e| EnrollmentError::TransientNetwork(e.to_string()))?;

    body["data"]["token"]
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| EnrollmentError::Other("vcode response carried no token".into()))
}

async fn fetch_captcha_image(
    client: &Client,
    base_url: &str,
    cookies: &HashMap<String, String>,
    vtoken: &str,
) -> Result<Vec<u8>, EnrollmentError> {
    let response = client
        .get(format!("{base_url}{BASE_PATH}{PATH_VCODE_IMAGE}"))
        .header("Cookie", cookie_header(cookies))
        .header("User-Agent", USER_AGENT)
        .query(&[("vtoken", vtoken)])
        .send()
        .await
        .map_err(|e| EnrollmentError::TransientNetwork(e.to_string()))?;

    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| EnrollmentError::TransientNetwork(e.to_string()))
}

fn cookie_header(cookies: &HashMap<String, String>) -> String {
    cookies
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("; ")
}

fn merge_set_cookies(response: &reqwest::Response, cookies: &mut HashMap<String, String>) {
    for value in response.headers().get_all(reqwest::header::SET_COOKIE) {
        let Ok(text) = value.to_str() else { continue };
        let Some(pair) = text.split(';').next() else { continue };
        if let Some((name, value)) = pair.split_once('=') {
            cookies.insert(name.trim().to_owned(), value.trim().to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_captcha;

    #[test]
    fn normalizes_to_four_ascii_alphanumerics() {
        assert_eq!(normalize_captcha("aB3d"), "aB3d");
        assert_eq!(normalize_captcha("a B3d!"), "aB3d");
        assert_eq!(normalize_captcha("ab"), "ab");
        assert_eq!(normalize_captcha("abcdef"), "abcd");
    }
}
