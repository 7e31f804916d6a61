//! The data model shared across the HTTP session core, the monitors, and the swap state
//! machine.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// A small enum selecting which remote endpoint a course identifier's queries/selects go
/// through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CourseTypeCode {
    /// Recommended courses (`recommendedCourse.do`).
    Tjkc,
    /// Major/program-required courses (`programCourse.do`).
    Fankc,
    /// Public elective courses (`publicCourse.do`).
    Xgxk,
    /// Physical education courses (`programCourse.do`, display-augmented).
    Tykc,
}

impl CourseTypeCode {
    /// The `.do` endpoint under `/elective/` that this course type queries against.
    pub fn list_endpoint(&self) -> &'static str {
        match self {
            CourseTypeCode::Tjkc => "recommendedCourse",
            CourseTypeCode::Fankc => "programCourse",
            CourseTypeCode::Xgxk => "publicCourse",
            CourseTypeCode::Tykc => "programCourse",
        }
    }
}

/// The course identifier triple: `teachingClassId` is the globally-unique key for
/// a section, `courseNumber` identifies a course across its sections, and `courseTypeCode`
/// selects the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CourseIdentifier {
    pub teaching_class_id: String,
    pub course_number: String,
    pub course_type: CourseTypeCode,
}

/// Credentials for the enrollment portal. Retained in memory only for the lifetime of the
/// process so that silent re-login (via [`crate::login`]) can be attempted without asking the
/// user again. Never logged — the `Debug` impl is written by hand to guarantee that.
#[derive(Clone)]
pub struct Credentials {
    pub student_id: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("student_id", &self.student_id)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The session state owned by the HTTP session core. Created by the login flow, rotated by
/// the recovery coordinator, and read as an atomic snapshot by every request.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub token: String,
    pub cookies: HashMap<String, String>,
    /// `server_time_ms - local_time_ms`, computed once at login from the index page's `Date`
    /// header round-trip midpoint. Zero if the probe failed or hasn't run yet.
    pub server_time_offset_ms: i64,
    pub student_code: String,
    pub batch_code: String,
    pub campus_code: String,
}

impl Session {
    /// The timestamp to attach to outgoing requests, adjusted by the recorded server-time
    /// offset.
    pub fn adjusted_timestamp_ms(&self, local_now_ms: i64) -> i64 {
        local_now_ms + self.server_time_offset_ms
    }

    /// Renders the cookie map as a `Cookie:` header value.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// The normalized view of one teaching-class section returned by the catalog query.
/// All three status booleans are parsed defensively via [`crate::util::to_bool`] because the
/// server encodes them heterogeneously.
#[derive(Debug, Clone)]
pub struct TeachingClassRecord {
    pub id: CourseIdentifier,
    pub course_name: String,
    pub teacher_name: String,
    pub time_and_place: String,
    pub capacity: i64,
    pub enrolled: i64,
    pub is_full: bool,
    pub is_conflict: bool,
    pub is_chosen: bool,
    pub conflict_desc: Option<String>,
}

impl TeachingClassRecord {
    /// Remaining seats, computed from capacity and enrolled count. May be negative if the
    /// server over-enrolls a section; callers must still treat `is_full` as authoritative
    /// over this number — a nonzero remain with `is_full` set is a ghost-capacity reading,
    /// not a real seat.
    pub fn remain(&self) -> i64 {
        self.capacity - self.enrolled
    }

    /// The display name for the teacher, augmented with "sport project" for PE sections.
    pub fn display_teacher_name(&self) -> String {
        if self.id.course_type == CourseTypeCode::Tykc {
            format!("{} (sport project)", self.teacher_name)
        } else {
            self.teacher_name.clone()
        }
    }
}

/// A `TeachingClassRecord` elevated to a monitoring target. Unique by
/// `teaching_class_id` within the wishlist; immutable once added except for
/// removal on a terminal outcome.
#[derive(Debug, Clone)]
pub struct WishlistEntry {
    pub record: TeachingClassRecord,
}

impl WishlistEntry {
    pub fn teaching_class_id(&self) -> &str {
        &self.record.id.teaching_class_id
    }
}

/// A tag used only to suppress duplicate log lines for a monitor; it must never
/// influence control decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTag {
    Unknown,
    Chosen,
    Full,
    Available,
    GhostCapacity,
    Conflict,
    QueryFailed,
}

/// Per-monitor bookkeeping state, owned exclusively by its monitor and never read by any
/// other monitor for control decisions.
#[derive(Debug, Clone)]
pub struct MonitorState {
    pub last_remain: i64,
    pub last_status_tag: StatusTag,
}

impl Default for MonitorState {
    fn default() -> Self {
        MonitorState {
            last_remain: -999,
            last_status_tag: StatusTag::Unknown,
        }
    }
}

/// One parsed time-slot: a set of applicable week numbers, a weekday (1-7), and a set of
/// applicable period numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlot {
    pub weeks: HashSet<u8>,
    pub day: u8,
    pub periods: HashSet<u8>,
}

/// A currently-held section, as returned by the "current selection" endpoint. Used by the
/// swap state machine to localize conflicts.
#[derive(Debug, Clone)]
pub struct SelectedCourseView {
    pub id: CourseIdentifier,
    pub course_name: String,
    pub time_and_place: String,
    pub teacher_name: String,
}

/// The classified outcome of a `select` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    Success,
    NeedRollback,
    Full,
    SessionExpired,
    OtherError(String),
}

/// The classified outcome of a `drop` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropOutcome {
    Success,
    SessionExpired,
    OtherError(String),
}

/// The outcome of a login probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginProbeOutcome {
    Online,
    Expired,
    NetworkError,
}
