//! The grab protocol: a single atomic select call, classified, with a post-verify
//! that lists the student's held sections and checks membership before reporting success.

use tracing::warn;

use crate::http::session::{ListSelectedOutcome, SelectCallOutcome};
use crate::http::EnrollmentApi;
use crate::types::{CourseIdentifier, SelectOutcome};

/// The outcome of a full grab attempt (select + post-verify), folded into one enum the monitor
/// and swap state machine both match on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrabOutcome {
    /// The select succeeded and post-verify either confirmed membership or could not run at all
    /// — a post-verify that fails outright is treated optimistically rather than as a grab
    /// failure, since the select itself already reported success.
    Success,
    /// The select reported a conflict; the caller should invoke the swap state machine.
    NeedRollback,
    Full,
    SessionExpired,
    OtherError(String),
}

/// Submits a select for `id` and, on a reported success, verifies it actually landed in the
/// student's held sections. `select` is idempotent on the caller's side: repeated "already
/// selected" responses map to success, which [`EnrollmentApi::select`]'s classifier already
/// does upstream (see `classify_select_msg`).
pub async fn grab<A: EnrollmentApi>(api: &A, id: &CourseIdentifier) -> GrabOutcome {
    match api.select(id).await {
        SelectCallOutcome::SessionExpired => GrabOutcome::SessionExpired,
        SelectCallOutcome::Outcome(SelectOutcome::NeedRollback) => GrabOutcome::NeedRollback,
        SelectCallOutcome::Outcome(SelectOutcome::Full) => GrabOutcome::Full,
        SelectCallOutcome::Outcome(SelectOutcome::OtherError(msg)) => GrabOutcome::OtherError(msg),
        SelectCallOutcome::Outcome(SelectOutcome::Success) => verify_and_finish(api, id).await,
    }
}

async fn verify_and_finish<A: EnrollmentApi>(api: &A, id: &CourseIdentifier) -> GrabOutcome {
    match api.list_selected().await {
        ListSelectedOutcome::Rows(rows) => {
            if rows.iter().any(|r| r.id.teaching_class_id == id.teaching_class_id) {
                GrabOutcome::Success
            } else {
                // The server reported success but the held-sections list disagrees. Per §4.6
                // this is distinct from the "verify couldn't run" case (spec's explicit
                // optimism only covers network failure), so it's surfaced as an error rather
                // than silently removed from the wishlist (I4 requires confirmed membership).
                warn!(
                    "select({}) reported success but post-verify found no matching held section",
                    id.teaching_class_id
                );
                GrabOutcome::OtherError("post-verify could not confirm membership".into())
            }
        }
        // A failed-list is treated optimistically as success.
        ListSelectedOutcome::Failed | ListSelectedOutcome::SessionExpired => GrabOutcome::Success,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::session::DropCallOutcome;
    use crate::types::{CourseTypeCode, LoginProbeOutcome, SelectedCourseView};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeApi {
        select_outcome: SelectCallOutcome,
        held: Vec<SelectedCourseView>,
        list_fails: bool,
        select_calls: AtomicUsize,
    }

    impl EnrollmentApi for FakeApi {
        async fn query(
            &self,
            _course_type: CourseTypeCode,
            _query_content: &str,
        ) -> Result<crate::http::session::QueryOutcome, crate::errors::EnrollmentError> {
            unimplemented!()
        }

        async fn select(&self, _id: &CourseIdentifier) -> SelectCallOutcome {
            self.select_calls.fetch_add(1, Ordering::SeqCst);
            self.select_outcome.clone()
        }

        async fn drop_course(&self, _teaching_class_id: &str) -> DropCallOutcome {
            unimplemented!()
        }

        async fn list_selected(&self) -> ListSelectedOutcome {
            if self.list_fails {
                ListSelectedOutcome::Failed
            } else {
                ListSelectedOutcome::Rows(self.held.clone())
            }
        }

        async fn probe_login(&self) -> LoginProbeOutcome {
            unimplemented!()
        }
    }

    fn id(tc: &str) -> CourseIdentifier {
        CourseIdentifier {
            teaching_class_id: tc.to_owned(),
            course_number: "CS101".to_owned(),
            course_type: CourseTypeCode::Xgxk,
        }
    }

    fn held(tc: &str) -> SelectedCourseView {
        SelectedCourseView {
            id: id(tc),
            course_name: "Intro".to_owned(),
            time_and_place: "1-18周 星期二 5-6节".to_owned(),
            teacher_name: "Staff".to_owned(),
        }
    }

    #[tokio::test]
    async fn success_requires_confirmed_membership() {
        let api = FakeApi {
            select_outcome: SelectCallOutcome::Outcome(SelectOutcome::Success),
            held: vec![held("T1")],
            list_fails: false,
            select_calls: AtomicUsize::new(0),
        };
        assert_eq!(grab(&api, &id("T1")).await, GrabOutcome::Success);
    }

    #[tokio::test]
    async fn failed_verify_is_optimistic() {
        let api = FakeApi {
            select_outcome: SelectCallOutcome::Outcome(SelectOutcome::Success),
            held: vec![],
            list_fails: true,
            select_calls: AtomicUsize::new(0),
        };
        assert_eq!(grab(&api, &id("T1")).await, GrabOutcome::Success);
    }

    #[tokio::test]
    async fn conflict_maps_to_need_rollback() {
        let api = FakeApi {
            select_outcome: SelectCallOutcome::Outcome(SelectOutcome::NeedRollback),
            held: vec![],
            list_fails: false,
            select_calls: AtomicUsize::new(0),
        };
        assert_eq!(grab(&api, &id("T1")).await, GrabOutcome::NeedRollback);
    }

    #[tokio::test]
    async fn session_expiry_is_classified_distinctly() {
        let api = FakeApi {
            select_outcome: SelectCallOutcome::SessionExpired,
            held: vec![],
            list_fails: false,
            select_calls: AtomicUsize::new(0),
        };
        assert_eq!(grab(&api, &id("T1")).await, GrabOutcome::SessionExpired);
    }
}
