//! The HTTP session core. Owns a single pooled `reqwest::Client`, the current
//! [`Session`] snapshot, and the expiry-detection wrapper every enrollment call goes through.
//! Session state is modeled as an explicit value threaded into the client, not a module-level
//! global: recovery publishes a new value under a lock, and every call takes a stable snapshot
//! of `(token, cookies)` at its start.

use std::sync::RwLock;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::warn;

use crate::errors::EnrollmentError;
use crate::http::wire::{
    self, RawCatalogRow, RawEnvelope, RawSelectedRow, BASE_PATH, PATH_DROP, PATH_HELD_SECTIONS,
    PATH_SELECT,
};
use crate::types::{
    CourseIdentifier, CourseTypeCode, DropOutcome, LoginProbeOutcome, SelectOutcome,
    SelectedCourseView, Session, TeachingClassRecord,
};
use crate::util::get_epoch_time;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const READ_TIMEOUT: Duration = Duration::from_secs(8);
const POOL_SIZE: usize = 20;
const MAX_5XX_RETRIES: u32 = 3;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, \
like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// The outcome of a catalog query, distinguishing "here are some rows" from "the session is no
/// longer valid" as a value rather than an exception.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Rows(Vec<TeachingClassRecord>),
    SessionExpired,
}

/// The outcome of a `select` call, folding session expiry into the same enum the rest of the
/// classification returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectCallOutcome {
    Outcome(SelectOutcome),
    SessionExpired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropCallOutcome {
    Outcome(DropOutcome),
    SessionExpired,
}

#[derive(Debug, Clone)]
pub enum ListSelectedOutcome {
    Rows(Vec<SelectedCourseView>),
    SessionExpired,
    /// A network/parse failure. Callers in the swap state machine and grab protocol treat this
    /// optimistically rather than as a confirmed non-membership.
    Failed,
}

/// The narrow surface the rest of the core depends on. Exists so that tests can substitute a
/// deterministic fake instead of making real network calls.
pub trait EnrollmentApi: Send + Sync {
    fn query(
        &self,
        course_type: CourseTypeCode,
        query_content: &str,
    ) -> impl std::future::Future<Output = Result<QueryOutcome, EnrollmentError>> + Send;

    fn select(
        &self,
        id: &CourseIdentifier,
    ) -> impl std::future::Future<Output = SelectCallOutcome> + Send;

    fn drop_course(
        &self,
        teaching_class_id: &str,
    ) -> impl std::future::Future<Output = DropCallOutcome> + Send;

    fn list_selected(
        &self,
    ) -> impl std::future::Future<Output = ListSelectedOutcome> + Send;

    fn probe_login(&self) -> impl std::future::Future<Output = LoginProbeOutcome> + Send;
}

/// The real HTTP-backed session core.
pub struct HttpSession {
    client: Client,
    base_url: String,
    session: RwLock<Session>,
}

impl HttpSession {
    /// Builds a new session core: pooled keep-alive connections, bounded
    /// per-request timeouts, TLS verification disabled to tolerate the portal's self-signed
    /// certificate, and redirects never followed (a 302 is itself a signal, not something to
    /// chase).
    pub fn new(base_url: impl Into<String>, initial_session: Session) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .pool_max_idle_per_host(POOL_SIZE)
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("static client configuration is always valid");

        HttpSession {
            client,
            base_url: base_url.into(),
            session: RwLock::new(initial_session),
        }
    }

    /// Publishes a new session, used by the recovery coordinator. Token and cookies are
    /// replaced together, mutated atomically as one value.
    pub fn set_session(&self, new_session: Session) {
        *self.session.write().unwrap() = new_session;
    }

    /// Takes a stable snapshot of the current session for one call.
    pub fn snapshot(&self) -> Session {
        self.session.read().unwrap().clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, BASE_PATH, path)
    }

    fn authenticated_request(
        &self,
        method: reqwest::Method,
        path: &str,
        session: &Session,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("token", session.token.as_str())
            .header(
                "Referer",
                format!(
                    "{}{}/*default/grablessons.do?token={}",
                    self.base_url, BASE_PATH, session.token
                ),
            )
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Origin", self.base_url.as_str())
            .header("User-Agent", USER_AGENT)
            .header("Cookie", session.cookie_header())
    }

    /// Sends a request, retrying silently on 5xx with a small backoff, and returns
    /// the parsed envelope together with whether the response indicates session expiry.
    async fn send_classified(
        &self,
        builder_fn: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<(RawEnvelope, bool), EnrollmentError> {
        let mut attempt = 0;
        loop {
            let response = match builder_fn().send().await {
                Ok(r) => r,
                Err(e) => {
                    return Err(EnrollmentError::TransientNetwork(e.to_string()));
                }
            };

            let status = response.status();
            if status.is_server_error() && attempt < MAX_5XX_RETRIES {
                attempt += 1;
                warn!("Got a 5xx status ({status}); retrying (attempt {attempt}).");
                tokio::time::sleep(Duration::from_millis(250 * attempt as u64)).await;
                continue;
            }

            let is_redirect = status.is_redirection() || status == StatusCode::FOUND;
            let text = response.text().await.unwrap_or_default();
            let envelope: RawEnvelope = serde_json::from_str(&text).unwrap_or_default();

            let expired = is_redirect
                || envelope.code_str() == "-1"
                || wire::msg_indicates_expiry(envelope.msg_str());

            return Ok((envelope, expired));
        }
    }

    fn normalize_row(row: &RawCatalogRow, course_type: CourseTypeCode) -> Option<TeachingClassRecord> {
        let teaching_class_id = row.teaching_class_id.clone()?;
        Some(TeachingClassRecord {
            id: CourseIdentifier {
                teaching_class_id,
                course_number: row.course_number.clone().unwrap_or_default(),
                course_type,
            },
            course_name: row.course_name.clone().unwrap_or_default(),
            teacher_name: row.teacher_name.clone().unwrap_or_default(),
            time_and_place: row.time_and_place.clone().unwrap_or_default(),
            capacity: row.capacity_int(),
            enrolled: row.enrolled_int(),
            is_full: row.is_full_bool(),
            is_conflict: row.is_conflict_bool(),
            is_chosen: row.is_chosen_bool(),
            conflict_desc: row.conflict_desc.clone(),
        })
    }

    /// Flattens the catalog response's rows, descending into `tcList` when a row is a grouping
    /// wrapper rather than a section in its own right.
    fn flatten_rows(rows: &[RawCatalogRow], course_type: CourseTypeCode) -> Vec<TeachingClassRecord> {
        let mut out = Vec::new();
        for row in rows {
            if let Some(children) = &row.tc_list {
                out.extend(Self::flatten_rows(children, course_type));
            } else if let Some(record) = Self::normalize_row(row, course_type) {
                out.push(record);
            }
        }
        out
    }

    fn classify_select_msg(envelope: &RawEnvelope) -> SelectOutcome {
        let msg_lower = envelope.msg_str().to_lowercase();
        if envelope.code_str() == "1" {
            return SelectOutcome::Success;
        }
        if msg_lower.contains("already selected")
            || msg_lower.contains("duplicate")
            || msg_lower.contains("已选")
        {
            return SelectOutcome::Success;
        }
        if msg_lower.contains("conflict") || msg_lower.contains("冲突") {
            return SelectOutcome::NeedRollback;
        }
        if msg_lower.contains("capacity")
            || msg_lower.contains("full")
            || msg_lower.contains("number")
            || msg_lower.contains("已满")
            || msg_lower.contains("人数")
        {
            return SelectOutcome::Full;
        }
        SelectOutcome::OtherError(envelope.msg_str().to_owned())
    }

    fn classify_drop_msg(envelope: &RawEnvelope) -> DropOutcome {
        if envelope.code_str() == "1" {
            DropOutcome::Success
        } else {
            DropOutcome::OtherError(envelope.msg_str().to_owned())
        }
    }
}

impl EnrollmentApi for HttpSession {
    async fn query(
        &self,
        course_type: CourseTypeCode,
        query_content: &str,
    ) -> Result<QueryOutcome, EnrollmentError> {
        let session = self.snapshot();
        let endpoint = wire::list_endpoint_for(course_type);
        let path = format!("/elective/{endpoint}.do");

        let query_setting = json!({
            "studentCode": session.student_code,
            "campusCode": session.campus_code,
            "batchCode": session.batch_code,
            "isMajor": 1,
            "teachingClassType": course_type_numeric(course_type),
            "checkConflict": 2,
            "checkCapacity": 2,
            "queryContent": query_content,
            "pageSize": 500,
            "pageNumber": 0,
        });
        let query_setting_str = query_setting.to_string();

        let (envelope, expired) = self
            .send_classified(|| {
                self.authenticated_request(reqwest::Method::POST, &path, &session)
                    .form(&[("querySetting", query_setting_str.as_str())])
            })
            .await?;

        if expired {
            return Ok(QueryOutcome::SessionExpired);
        }

        let rows: Vec<RawCatalogRow> = envelope
            .data_list
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        Ok(QueryOutcome::Rows(Self::flatten_rows(&rows, course_type)))
    }

    async fn select(&self, id: &CourseIdentifier) -> SelectCallOutcome {
        let session = self.snapshot();
        let add_param = json!({
            "operationType": 1,
            "teachingClassId": id.teaching_class_id,
            "courseNumber": id.course_number,
            "teachingClassType": course_type_numeric(id.course_type),
        });
        let add_param_str = add_param.to_string();

        let result = self
            .send_classified(|| {
                self.authenticated_request(reqwest::Method::POST, PATH_SELECT, &session)
                    .form(&[("addParam", add_param_str.as_str())])
            })
            .await;

        match result {
            Err(EnrollmentError::TransientNetwork(reason)) => {
                warn!("select({}) failed after retries: {reason}", id.teaching_class_id);
                SelectCallOutcome::Outcome(SelectOutcome::OtherError(reason))
            }
            Err(_) => SelectCallOutcome::Outcome(SelectOutcome::OtherError("unknown error".into())),
            Ok((_, true)) => SelectCallOutcome::SessionExpired,
            Ok((envelope, false)) => SelectCallOutcome::Outcome(Self::classify_select_msg(&envelope)),
        }
    }

    async fn drop_course(&self, teaching_class_id: &str) -> DropCallOutcome {
        let session = self.snapshot();
        let delete_param = json!({
            "operationType": 2,
            "teachingClassId": teaching_class_id,
        });
        let timestamp = session.adjusted_timestamp_ms(get_epoch_time());

        let result = self
            .send_classified(|| {
                self.authenticated_request(reqwest::Method::GET, PATH_DROP, &session)
                    .query(&[
                        ("timestamp", timestamp.to_string()),
                        ("deleteParam", delete_param.to_string()),
                    ])
            })
            .await;

        match result {
            Err(EnrollmentError::TransientNetwork(reason)) => {
                warn!("drop({teaching_class_id}) failed after retries: {reason}");
                DropCallOutcome::Outcome(DropOutcome::OtherError(reason))
            }
            Err(_) => DropCallOutcome::Outcome(DropOutcome::OtherError("unknown error".into())),
            Ok((_, true)) => DropCallOutcome::SessionExpired,
            Ok((envelope, false)) => DropCallOutcome::Outcome(Self::classify_drop_msg(&envelope)),
        }
    }

    async fn list_selected(&self) -> ListSelectedOutcome {
        let session = self.snapshot();
        let timestamp = session.adjusted_timestamp_ms(get_epoch_time());

        let result = self
            .send_classified(|| {
                self.authenticated_request(reqwest::Method::GET, PATH_HELD_SECTIONS, &session)
                    .query(&[
                        ("timestamp", timestamp.to_string()),
                        ("studentCode", session.student_code.clone()),
                        ("electiveBatchCode", session.batch_code.clone()),
                    ])
            })
            .await;

        match result {
            Err(_) => ListSelectedOutcome::Failed,
            Ok((_, true)) => ListSelectedOutcome::SessionExpired,
            Ok((envelope, false)) => {
                // §6's wire table: the held-sections endpoint returns its rows under
                // `dataList[]`, not `data`.
                let Some(rows) = envelope.data_list.and_then(|v| {
                    serde_json::from_value::<Vec<RawSelectedRow>>(v).ok()
                }) else {
                    return ListSelectedOutcome::Failed;
                };

                ListSelectedOutcome::Rows(
                    rows.into_iter()
                        .map(|r| SelectedCourseView {
                            id: CourseIdentifier {
                                teaching_class_id: r.teaching_class_id,
                                course_number: r.course_number,
                                course_type: CourseTypeCode::Xgxk,
                            },
                            course_name: r.course_name,
                            time_and_place: r.time_and_place.unwrap_or_default(),
                            teacher_name: r.teacher_name.unwrap_or_default(),
                        })
                        .collect(),
                )
            }
        }
    }

    async fn probe_login(&self) -> LoginProbeOutcome {
        let session = self.snapshot();
        let result = self
            .send_classified(|| {
                self.authenticated_request(reqwest::Method::GET, wire::PATH_INDEX, &session)
            })
            .await;

        match result {
            Err(_) => LoginProbeOutcome::NetworkError,
            Ok((_, true)) => LoginProbeOutcome::Expired,
            Ok((_, false)) => LoginProbeOutcome::Online,
        }
    }
}

/// The remote portal's teaching-class-type field is a small numeric code. Forwarded verbatim
/// when already numeric, to avoid re-translating an already-translated value.
fn course_type_numeric(course_type: CourseTypeCode) -> i32 {
    match course_type {
        CourseTypeCode::Tjkc => 1,
        CourseTypeCode::Fankc => 2,
        CourseTypeCode::Xgxk => 3,
        CourseTypeCode::Tykc => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::wire::RawEnvelope;

    fn envelope(code: &str, msg: &str) -> RawEnvelope {
        RawEnvelope {
            code: Some(Value::String(code.to_owned())),
            msg: Some(msg.to_owned()),
            data_list: None,
            data: None,
        }
    }

    #[test]
    fn select_classifier_maps_success() {
        assert_eq!(
            HttpSession::classify_select_msg(&envelope("1", "ok")),
            SelectOutcome::Success
        );
        assert_eq!(
            HttpSession::classify_select_msg(&envelope("0", "Already selected this course")),
            SelectOutcome::Success
        );
    }

    #[test]
    fn select_classifier_maps_rollback_and_full() {
        assert_eq!(
            HttpSession::classify_select_msg(&envelope("0", "Schedule conflict detected")),
            SelectOutcome::NeedRollback
        );
        assert_eq!(
            HttpSession::classify_select_msg(&envelope("0", "Class is at full capacity")),
            SelectOutcome::Full
        );
    }

    #[test]
    fn select_classifier_falls_back_to_other_error() {
        match HttpSession::classify_select_msg(&envelope("0", "something unexpected")) {
            SelectOutcome::OtherError(msg) => assert_eq!(msg, "something unexpected"),
            other => panic!("expected OtherError, got {other:?}"),
        }
    }

    #[test]
    fn expiry_keywords_are_case_insensitive() {
        assert!(wire::msg_indicates_expiry("Your TOKEN has expired"));
        assert!(wire::msg_indicates_expiry("please login again"));
        assert!(!wire::msg_indicates_expiry("everything is fine"));
    }
}
