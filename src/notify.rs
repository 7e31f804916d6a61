//! The outbound push-notification webhook: best-effort, fire-and-forget, short
//! timeout. A ServerChan-style `POST https://sctapi.ftqq.com/<key>.send`. Failures here must
//! never affect the core; this is an external collaborator specified only at the interface
//! it consumes.

use std::time::Duration;

use reqwest::Client;
use tracing::warn;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Sends a best-effort push notification. Errors are logged and swallowed; the caller never
/// needs to branch on the result.
pub async fn notify(client: &Client, webhook_key: &str, title: &str, markdown_body: &str) {
    let url = format!("https://sctapi.ftqq.com/{webhook_key}.send");
    let result = client
        .post(&url)
        .timeout(TIMEOUT)
        .form(&[("title", title), ("desp", markdown_body), ("noip", "1")])
        .send()
        .await;

    if let Err(e) = result {
        warn!("Push notification failed (ignored, best-effort): {e}");
    }
}

/// Builds the Markdown body for a grab-success notification: course name, teacher, and time.
pub fn grab_success_body(course_name: &str, teacher_name: &str, time_and_place: &str) -> String {
    format!(
        "### Grabbed: {course_name}\n\n- **Teacher**: {teacher_name}\n- **Time**: {time_and_place}"
    )
}

/// Builds the Markdown body for a swap-dangling notification — this case must be
/// unmissable, so the title itself flags it rather than relying on the body.
pub fn swap_dangling_body(dropped_course_name: &str, target_course_name: &str) -> String {
    format!(
        "### Manual action required\n\nDropped **{dropped_course_name}** while attempting to \
         swap in **{target_course_name}**, and could not re-acquire it before the rollback \
         deadline. Please check your schedule."
    )
}
