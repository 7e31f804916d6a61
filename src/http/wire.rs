//! Wire-level constants and raw response shapes for the enrollment portal. Kept
//! separate from [`super::session`] so that the request/response JSON shapes can change without
//! touching the classification logic built on top of them.

use serde::Deserialize;
use serde_json::Value;

use crate::types::CourseTypeCode;
use crate::util::{to_bool, to_int};

pub const BASE_PATH: &str = "/xsxkapp/sys/xsxkapp";

pub const PATH_INDEX: &str = "/*default/index.do";
pub const PATH_VCODE_TOKEN: &str = "/student/4/vcode.do";
pub const PATH_VCODE_IMAGE: &str = "/student/vcode/image.do";
pub const PATH_LOGIN: &str = "/student/check/login.do";
pub const PATH_SELECT: &str = "/elective/volunteer.do";
pub const PATH_DROP: &str = "/elective/deleteVolunteer.do";
pub const PATH_HELD_SECTIONS: &str = "/elective/courseResult.do";

/// Resolves a course type to its `list` endpoint.
pub fn list_endpoint_for(course_type: CourseTypeCode) -> &'static str {
    course_type.list_endpoint()
}

/// Keywords that, if found case-insensitively in a `msg` field, indicate the session has
/// expired.
pub const EXPIRY_KEYWORDS: &[&str] = &[
    "login",
    "token",
    "expired",
    "invalid",
    "unauthorized",
    "session",
    "not logged in",
    "登录",
    "未登录",
    "超时",
    "令牌",
];

/// Whether `msg` contains any of the expiry keywords, case-insensitively.
pub fn msg_indicates_expiry(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    EXPIRY_KEYWORDS.iter().any(|kw| lower.contains(&kw.to_lowercase()))
}

/// A raw row from the catalog `list` endpoint's `dataList`, before it's normalized into a
/// [`crate::types::TeachingClassRecord`]. Either a grouping wrapper (`tc_list` present) or a
/// section in its own right; callers probe both shapes.
#[derive(Debug, Deserialize)]
pub struct RawCatalogRow {
    #[serde(rename = "teachingClassId")]
    pub teaching_class_id: Option<String>,
    #[serde(rename = "courseNumber")]
    pub course_number: Option<String>,
    #[serde(rename = "courseName")]
    pub course_name: Option<String>,
    #[serde(rename = "teacherName")]
    pub teacher_name: Option<String>,
    #[serde(rename = "timeAndPlace")]
    pub time_and_place: Option<String>,
    pub capacity: Option<Value>,
    #[serde(rename = "enrolledCount")]
    pub enrolled_count: Option<Value>,
    #[serde(rename = "isFull")]
    pub is_full: Option<Value>,
    #[serde(rename = "isConflict")]
    pub is_conflict: Option<Value>,
    #[serde(rename = "isChosen")]
    pub is_chosen: Option<Value>,
    #[serde(rename = "conflictDesc")]
    pub conflict_desc: Option<String>,
    #[serde(rename = "tcList")]
    pub tc_list: Option<Vec<RawCatalogRow>>,
}

impl RawCatalogRow {
    pub fn capacity_int(&self) -> i64 {
        self.capacity.as_ref().and_then(to_int).unwrap_or(0)
    }

    pub fn enrolled_int(&self) -> i64 {
        self.enrolled_count.as_ref().and_then(to_int).unwrap_or(0)
    }

    pub fn is_full_bool(&self) -> bool {
        self.is_full.as_ref().map(to_bool).unwrap_or(false)
    }

    pub fn is_conflict_bool(&self) -> bool {
        self.is_conflict.as_ref().map(to_bool).unwrap_or(false)
    }

    pub fn is_chosen_bool(&self) -> bool {
        self.is_chosen.as_ref().map(to_bool).unwrap_or(false)
    }
}

/// The generic `{code, msg, ...}` envelope every enrollment endpoint responds with. `data_list`
/// is kept as a raw `Value` rather than a fixed row type since its element shape differs by
/// endpoint (catalog rows vs. held-section rows); callers deserialize it into whichever row type
/// their endpoint returns.
#[derive(Debug, Deserialize, Default)]
pub struct RawEnvelope {
    pub code: Option<Value>,
    pub msg: Option<String>,
    #[serde(rename = "dataList")]
    pub data_list: Option<Value>,
    pub data: Option<Value>,
}

impl RawEnvelope {
    pub fn code_str(&self) -> String {
        match &self.code {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }

    pub fn msg_str(&self) -> &str {
        self.msg.as_deref().unwrap_or("")
    }
}

/// A raw row from the held-sections (`courseResult.do`) endpoint.
#[derive(Debug, Deserialize)]
pub struct RawSelectedRow {
    #[serde(rename = "teachingClassId")]
    pub teaching_class_id: String,
    #[serde(rename = "courseNumber")]
    pub course_number: String,
    #[serde(rename = "courseName")]
    pub course_name: String,
    #[serde(rename = "teacherName")]
    pub teacher_name: Option<String>,
    #[serde(rename = "timeAndPlace")]
    pub time_and_place: Option<String>,
}
