//! Configuration loading. A JSON file read once at startup: course identifiers,
//! credentials, the notification webhook key, and cooldown values are declarative data, not
//! hardcoded. The core only *reads* an already-deserialized config; persisting it back to disk
//! is the UI shell's job.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{Credentials, CourseIdentifier, CourseTypeCode};

/// The top-level configuration file shape.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// The enrollment portal's base URL, e.g. `https://xk.example.edu.cn`.
    pub base_url: String,
    pub student_id: String,
    pub password: String,
    /// The campus code and batch code the portal expects on every query.
    pub campus_code: String,
    pub batch_code: String,
    /// The wishlist to start monitoring immediately.
    pub wishlist: Vec<ConfigWishlistEntry>,
    /// The command to invoke for captcha OCR: argv[0] plus arguments, with the image bytes
    /// piped to its stdin and the recognized text read from its stdout. Decoding the image
    /// itself is an out-of-scope external collaborator.
    pub captcha_command: Vec<String>,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigWishlistEntry {
    pub teaching_class_id: String,
    pub course_number: String,
    pub course_type: ConfigCourseType,
}

/// A serde-friendly mirror of [`CourseTypeCode`] using short course-type names so the config
/// file reads naturally to whoever edits it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfigCourseType {
    Tjkc,
    Fankc,
    Xgxk,
    Tykc,
}

impl From<ConfigCourseType> for CourseTypeCode {
    fn from(value: ConfigCourseType) -> Self {
        match value {
            ConfigCourseType::Tjkc => CourseTypeCode::Tjkc,
            ConfigCourseType::Fankc => CourseTypeCode::Fankc,
            ConfigCourseType::Xgxk => CourseTypeCode::Xgxk,
            ConfigCourseType::Tykc => CourseTypeCode::Tykc,
        }
    }
}

impl ConfigWishlistEntry {
    pub fn to_identifier(&self) -> CourseIdentifier {
        CourseIdentifier {
            teaching_class_id: self.teaching_class_id.clone(),
            course_number: self.course_number.clone(),
            course_type: self.course_type.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfig {
    pub enabled: bool,
    /// The ServerChan-style webhook key (`POST https://sctapi.ftqq.com/<key>.send`).
    pub webhook_key: Option<String>,
}

impl Config {
    /// Loads and parses a configuration file from `path`: read the file, then deserialize,
    /// surfacing either failure with `anyhow::Context`-flavored messages at the process
    /// boundary.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("could not read config file '{}': {e}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("invalid config file '{}': {e}", path.display()))?;
        Ok(config)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            student_id: self.student_id.clone(),
            password: self.password.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let raw = r#"{
            "baseUrl": "https://xk.example.edu.cn",
            "studentId": "2021000001",
            "password": "hunter2",
            "campusCode": "1",
            "batchCode": "12345",
            "wishlist": [
                {"teachingClassId": "T1", "courseNumber": "CS101", "courseType": "XGXK"}
            ],
            "captchaCommand": ["ocr-helper", "--stdin"]
        }"#;

        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.wishlist.len(), 1);
        assert!(!config.notification.enabled);
        assert!(!config.verbose);
    }
}
