//! The external OCR collaborator interface. Decoding captcha images is out of scope for this
//! crate; the login flow only needs *something* that can turn captcha image bytes into text,
//! and what that something is (a bundled model, a remote OCR service) is the embedding
//! process's concern.

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Solves a captcha image, returning the recognized text (before the 4-character truncation
/// and ASCII-alphanumeric normalization the login flow applies downstream).
pub trait CaptchaSolver: Send + Sync {
    fn solve(
        &self,
        image_bytes: &[u8],
    ) -> impl std::future::Future<Output = anyhow::Result<String>> + Send;
}

/// Adapts an external OCR executable, configured by the embedding process, into a
/// [`CaptchaSolver`]: the image bytes are piped to the process's stdin, and its stdout,
/// trimmed, is taken as the recognized text.
pub struct ProcessCaptchaSolver {
    argv: Vec<String>,
}

impl ProcessCaptchaSolver {
    pub fn new(argv: Vec<String>) -> Self {
        ProcessCaptchaSolver { argv }
    }
}

impl CaptchaSolver for ProcessCaptchaSolver {
    async fn solve(&self, image_bytes: &[u8]) -> anyhow::Result<String> {
        let Some((program, args)) = self.argv.split_first() else {
            anyhow::bail!("captcha command is empty");
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(image_bytes).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            anyhow::bail!("captcha OCR command exited with status {}", output.status);
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}
