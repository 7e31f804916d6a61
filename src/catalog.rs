//! The course catalog query. Built on top of [`crate::http::EnrollmentApi`]:
//! this module adds the "find one specific target in the returned list" lookup the monitor
//! needs and a grouped-by-course-name view for listing/search use cases that aren't tied
//! to a single wishlist entry.

use std::collections::HashMap;

use crate::http::session::QueryOutcome;
use crate::http::EnrollmentApi;
use crate::types::{CourseIdentifier, TeachingClassRecord};

/// The outcome of looking a single target up within a catalog query's results.
#[derive(Debug, Clone)]
pub enum TargetQueryOutcome {
    /// The target section was present in the returned rows.
    Found(TeachingClassRecord),
    /// The target section was not in the returned rows. Callers must treat this as "no
    /// information" and skip the iteration rather than falling back to a speculative select.
    NotFound,
    SessionExpired,
    /// A transient network failure prevented the query from completing at all. Folded into
    /// the same "skip this iteration, never speculative-select" handling as `NotFound`.
    QueryFailed,
}

/// Queries the catalog for `target` using its course number as the query content (§4.4: "course
/// number preferred over name for precision") and locates the matching row by `teachingClassId`.
pub async fn find_target<A: EnrollmentApi>(
    api: &A,
    target: &CourseIdentifier,
) -> TargetQueryOutcome {
    match api.query(target.course_type, &target.course_number).await {
        Ok(QueryOutcome::SessionExpired) => TargetQueryOutcome::SessionExpired,
        Ok(QueryOutcome::Rows(rows)) => rows
            .into_iter()
            .find(|r| r.id.teaching_class_id == target.teaching_class_id)
            .map(TargetQueryOutcome::Found)
            .unwrap_or(TargetQueryOutcome::NotFound),
        Err(_) => TargetQueryOutcome::QueryFailed,
    }
}

/// The outcome of a general (non-targeted) catalog listing, grouped by course name per spec
/// §4.4's "Returns grouped by course name."
#[derive(Debug, Clone)]
pub enum CatalogListOutcome {
    Groups(HashMap<String, Vec<TeachingClassRecord>>),
    SessionExpired,
}

/// Lists all sections for a course type, optionally filtered by free-text `query_content`
/// (empty string lists everything), grouped by course name.
pub async fn list_grouped<A: EnrollmentApi>(
    api: &A,
    course_type: crate::types::CourseTypeCode,
    query_content: &str,
) -> Result<CatalogListOutcome, crate::errors::EnrollmentError> {
    match api.query(course_type, query_content).await? {
        QueryOutcome::SessionExpired => Ok(CatalogListOutcome::SessionExpired),
        QueryOutcome::Rows(rows) => {
            let mut groups: HashMap<String, Vec<TeachingClassRecord>> = HashMap::new();
            for row in rows {
                groups.entry(row.course_name.clone()).or_default().push(row);
            }
            Ok(CatalogListOutcome::Groups(groups))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::session::{
        DropCallOutcome, ListSelectedOutcome, SelectCallOutcome,
    };
    use crate::types::{CourseTypeCode, LoginProbeOutcome};

    struct FakeApi {
        rows: Vec<TeachingClassRecord>,
        expired: bool,
    }

    impl EnrollmentApi for FakeApi {
        async fn query(
            &self,
            _course_type: CourseTypeCode,
            _query_content: &str,
        ) -> Result<QueryOutcome, crate::errors::EnrollmentError> {
            if self.expired {
                Ok(QueryOutcome::SessionExpired)
            } else {
                Ok(QueryOutcome::Rows(self.rows.clone()))
            }
        }

        async fn select(&self, _id: &CourseIdentifier) -> SelectCallOutcome {
            unimplemented!("not exercised by catalog tests")
        }

        async fn drop_course(&self, _teaching_class_id: &str) -> DropCallOutcome {
            unimplemented!("not exercised by catalog tests")
        }

        async fn list_selected(&self) -> ListSelectedOutcome {
            unimplemented!("not exercised by catalog tests")
        }

        async fn probe_login(&self) -> LoginProbeOutcome {
            unimplemented!("not exercised by catalog tests")
        }
    }

    fn record(tc_id: &str, course_name: &str) -> TeachingClassRecord {
        TeachingClassRecord {
            id: CourseIdentifier {
                teaching_class_id: tc_id.to_owned(),
                course_number: "CS101".to_owned(),
                course_type: CourseTypeCode::Xgxk,
            },
            course_name: course_name.to_owned(),
            teacher_name: "Staff".to_owned(),
            time_and_place: "1-18周 星期二 5-6节".to_owned(),
            capacity: 40,
            enrolled: 39,
            is_full: false,
            is_conflict: false,
            is_chosen: false,
            conflict_desc: None,
        }
    }

    #[tokio::test]
    async fn finds_target_by_id_not_position() {
        let api = FakeApi {
            rows: vec![record("T1", "Intro"), record("T2", "Intro")],
            expired: false,
        };
        let target = CourseIdentifier {
            teaching_class_id: "T2".to_owned(),
            course_number: "CS101".to_owned(),
            course_type: CourseTypeCode::Xgxk,
        };

        match find_target(&api, &target).await {
            TargetQueryOutcome::Found(r) => assert_eq!(r.id.teaching_class_id, "T2"),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_target_is_not_found_never_fabricated() {
        let api = FakeApi {
            rows: vec![record("T1", "Intro")],
            expired: false,
        };
        let target = CourseIdentifier {
            teaching_class_id: "does-not-exist".to_owned(),
            course_number: "CS101".to_owned(),
            course_type: CourseTypeCode::Xgxk,
        };

        assert!(matches!(
            find_target(&api, &target).await,
            TargetQueryOutcome::NotFound
        ));
    }

    #[tokio::test]
    async fn session_expiry_propagates() {
        let api = FakeApi {
            rows: vec![],
            expired: true,
        };
        let target = CourseIdentifier {
            teaching_class_id: "T1".to_owned(),
            course_number: "CS101".to_owned(),
            course_type: CourseTypeCode::Xgxk,
        };

        assert!(matches!(
            find_target(&api, &target).await,
            TargetQueryOutcome::SessionExpired
        ));
    }

    #[tokio::test]
    async fn groups_by_course_name() {
        let api = FakeApi {
            rows: vec![
                record("T1", "Intro"),
                record("T2", "Intro"),
                record("T3", "Advanced"),
            ],
            expired: false,
        };

        let CatalogListOutcome::Groups(groups) =
            list_grouped(&api, CourseTypeCode::Xgxk, "").await.unwrap()
        else {
            panic!("expected Groups");
        };
        assert_eq!(groups["Intro"].len(), 2);
        assert_eq!(groups["Advanced"].len(), 1);
    }
}
