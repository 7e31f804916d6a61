//! The swap state machine: on a known conflict, locates the already-held
//! conflicting section, drops it, takes the target, and on failure enters an emergency-rollback
//! loop bounded by a hard 5-minute deadline. There is no intermediate silent exit from that
//! loop — it only ends in re-acquisition, an explicit stop, or the deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use regex::Regex;
use tracing::{error, info, warn};

use crate::events::{CoreEvent, EventSink};
use crate::grab::{self, GrabOutcome};
use crate::heartbeat::HeartbeatCounter;
use crate::http::session::{DropCallOutcome, ListSelectedOutcome};
use crate::http::EnrollmentApi;
use crate::timeparse::time_strings_conflict;
use crate::types::{DropOutcome, SelectedCourseView, TeachingClassRecord};

const ROLLBACK_INTERVAL: Duration = Duration::from_millis(700);
const ROLLBACK_DEADLINE: Duration = Duration::from_secs(300);

/// The result of running the swap protocol to completion: whether the target was ultimately
/// acquired, and which held section (if any) was dropped along the way.
#[derive(Debug, Clone)]
pub struct SwapOutcome {
    pub target_acquired: bool,
    pub dropped_section: Option<SelectedCourseView>,
}

/// Runs the swap protocol for `target`, whose `conflict_desc` (if any) is used to localize the
/// held section it conflicts with. `stop` is polled at every rollback iteration so an emergency
/// rollback can still be cut short by a shutdown request.
pub async fn run_swap<A: EnrollmentApi>(
    api: &A,
    target: &TeachingClassRecord,
    events: &dyn EventSink,
    heartbeat: &HeartbeatCounter,
    stop: &AtomicBool,
) -> SwapOutcome {
    let held = match api.list_selected().await {
        ListSelectedOutcome::Rows(rows) => rows,
        ListSelectedOutcome::SessionExpired | ListSelectedOutcome::Failed => {
            warn!(
                "Could not list held sections while swapping for {}; aborting this attempt.",
                target.course_name
            );
            return SwapOutcome {
                target_acquired: false,
                dropped_section: None,
            };
        }
    };

    let Some(located) = locate(&held, target).cloned() else {
        warn!(
            "Could not localize the held section conflicting with {}.",
            target.course_name
        );
        events.emit(CoreEvent::GrabFailed(format!(
            "could not determine which held course conflicts with {}",
            target.course_name
        )));
        return SwapOutcome {
            target_acquired: false,
            dropped_section: None,
        };
    };

    info!(
        "Localized conflicting held section '{}' for target '{}'; dropping it.",
        located.course_name, target.course_name
    );

    match api.drop_course(&located.id.teaching_class_id).await {
        DropCallOutcome::Outcome(DropOutcome::Success) => {}
        other => {
            warn!("Drop of '{}' failed: {other:?}", located.course_name);
            events.emit(CoreEvent::GrabFailed(format!(
                "could not drop '{}' to make room for '{}'",
                located.course_name, target.course_name
            )));
            return SwapOutcome {
                target_acquired: false,
                dropped_section: None,
            };
        }
    }

    match grab::grab(api, &target.id).await {
        GrabOutcome::Success => {
            info!(
                "Swap succeeded: acquired '{}' after dropping '{}'.",
                target.course_name, located.course_name
            );
            SwapOutcome {
                target_acquired: true,
                dropped_section: Some(located),
            }
        }
        other => {
            warn!(
                "Taking '{}' failed after dropping '{}' ({other:?}); entering emergency rollback.",
                target.course_name, located.course_name
            );
            emergency_rollback(api, &located, events, heartbeat, stop, target).await
        }
    }
}

/// The recovery state: repeatedly re-selects the dropped section until it is re-acquired, the
/// scheduler asks for a stop, or the hard 300s deadline elapses.
async fn emergency_rollback<A: EnrollmentApi>(
    api: &A,
    dropped: &SelectedCourseView,
    events: &dyn EventSink,
    heartbeat: &HeartbeatCounter,
    stop: &AtomicBool,
    target: &TeachingClassRecord,
) -> SwapOutcome {
    let deadline = Instant::now() + ROLLBACK_DEADLINE;

    loop {
        if stop.load(Ordering::SeqCst) {
            warn!(
                "Shutdown requested during emergency rollback for '{}'; leaving it dropped.",
                dropped.course_name
            );
            return dangling(dropped, target, events);
        }

        if Instant::now() >= deadline {
            error!(
                "Emergency rollback for '{}' exceeded its 300s deadline; leaving it dropped.",
                dropped.course_name
            );
            return dangling(dropped, target, events);
        }

        heartbeat.tick(events);
        match grab::grab(api, &dropped.id).await {
            GrabOutcome::Success => {
                info!(
                    "Emergency rollback succeeded: re-acquired '{}'.",
                    dropped.course_name
                );
                return SwapOutcome {
                    target_acquired: false,
                    dropped_section: Some(dropped.clone()),
                };
            }
            _ => {
                tokio::time::sleep(ROLLBACK_INTERVAL).await;
            }
        }
    }
}

fn dangling(
    dropped: &SelectedCourseView,
    target: &TeachingClassRecord,
    events: &dyn EventSink,
) -> SwapOutcome {
    events.emit(CoreEvent::SwapDangling {
        dropped_course_name: dropped.course_name.clone(),
        target_course_name: target.course_name.clone(),
    });
    SwapOutcome {
        target_acquired: false,
        dropped_section: Some(dropped.clone()),
    }
}

fn bracket_regex() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[\[【(（]([^\]】)）]+)[\]】)）]").expect("static regex is valid")
    })
}

/// Extracts bracket-delimited tokens (`[...]`, `【...】`, `(...)`, `（...）`) from `desc`.
fn bracketed_tokens(desc: &str) -> Vec<&str> {
    bracket_regex()
        .captures_iter(desc)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect()
}

/// `LOCATE`: ranks held sections against `target`'s `conflict_desc` by the strategies of spec
/// §4.7, in priority order. The first strategy that yields a candidate wins.
fn locate<'a>(held: &'a [SelectedCourseView], target: &TeachingClassRecord) -> Option<&'a SelectedCourseView> {
    let desc = target.conflict_desc.as_deref().unwrap_or("");

    // (a) exact name substring of conflictDesc.
    if let Some(h) = held
        .iter()
        .find(|h| !h.course_name.is_empty() && desc.contains(h.course_name.as_str()))
    {
        return Some(h);
    }

    // (b) bracketed token in conflictDesc matching held name.
    let tokens = bracketed_tokens(desc);
    if let Some(h) = held
        .iter()
        .find(|h| tokens.iter().any(|t| *t == h.course_name))
    {
        return Some(h);
    }

    // (c) held-name prefix of >=4 chars appearing in conflictDesc.
    if let Some(h) = held.iter().find(|h| {
        let prefix: String = h.course_name.chars().take(4).collect();
        prefix.chars().count() >= 4 && desc.contains(prefix.as_str())
    }) {
        return Some(h);
    }

    // (d) structural time-slot overlap between the target and a held section.
    if let Some(h) = held
        .iter()
        .find(|h| time_strings_conflict(&target.time_and_place, &h.time_and_place))
    {
        return Some(h);
    }

    // (e) if exactly one course is held, adopt it.
    if held.len() == 1 {
        return held.first();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CourseTypeCode;

    fn held(tc: &str, name: &str, time: &str) -> SelectedCourseView {
        SelectedCourseView {
            id: CourseIdentifier {
                teaching_class_id: tc.to_owned(),
                course_number: "X".to_owned(),
                course_type: CourseTypeCode::Xgxk,
            },
            course_name: name.to_owned(),
            time_and_place: time.to_owned(),
            teacher_name: "Staff".to_owned(),
        }
    }

    fn target(conflict_desc: Option<&str>, time: &str) -> TeachingClassRecord {
        TeachingClassRecord {
            id: CourseIdentifier {
                teaching_class_id: "TARGET".to_owned(),
                course_number: "Y".to_owned(),
                course_type: CourseTypeCode::Xgxk,
            },
            course_name: "New Course".to_owned(),
            teacher_name: "Staff".to_owned(),
            time_and_place: time.to_owned(),
            capacity: 40,
            enrolled: 1,
            is_full: false,
            is_conflict: true,
            is_chosen: false,
            conflict_desc: conflict_desc.map(str::to_owned),
        }
    }

    #[test]
    fn exact_name_substring_wins() {
        let held_sections = vec![held("H1", "数据结构", "1-18周 星期二 5-6节")];
        let t = target(Some("与 数据结构 时间冲突"), "1-9周 星期三 1-2节");
        assert_eq!(locate(&held_sections, &t).unwrap().id.teaching_class_id, "H1");
    }

    #[test]
    fn bracketed_token_match() {
        let held_sections = vec![
            held("H1", "线性代数", "1-18周 星期二 5-6节"),
            held("H2", "数据结构", "1-18周 星期三 1-2节"),
        ];
        let t = target(Some("时间冲突【数据结构】"), "1-9周 星期四 1-2节");
        assert_eq!(locate(&held_sections, &t).unwrap().id.teaching_class_id, "H2");
    }

    #[test]
    fn prefix_match_falls_back() {
        let held_sections = vec![held("H1", "数据结构基础", "1-18周 星期二 5-6节")];
        let t = target(Some("课程 数据结构 与所选课程冲突"), "1-9周 星期三 1-2节");
        assert_eq!(locate(&held_sections, &t).unwrap().id.teaching_class_id, "H1");
    }

    #[test]
    fn structural_overlap_used_without_desc() {
        let held_sections = vec![
            held("H1", "Unrelated", "1-18周 星期二 5-6节"),
            held("H2", "Overlaps", "1-18周 星期三 1-2节"),
        ];
        let t = target(None, "1-18周 星期三 2节");
        assert_eq!(locate(&held_sections, &t).unwrap().id.teaching_class_id, "H2");
    }

    #[test]
    fn single_held_course_is_adopted() {
        let held_sections = vec![held("H1", "Only One", "1-18周 星期一 1节")];
        let t = target(None, "1-18周 星期五 8节");
        assert_eq!(locate(&held_sections, &t).unwrap().id.teaching_class_id, "H1");
    }

    #[test]
    fn no_candidate_returns_none() {
        let held_sections = vec![
            held("H1", "A", "1-18周 星期一 1节"),
            held("H2", "B", "1-18周 星期二 2节"),
        ];
        let t = target(None, "1-18周 星期五 8节");
        assert!(locate(&held_sections, &t).is_none());
    }
}
