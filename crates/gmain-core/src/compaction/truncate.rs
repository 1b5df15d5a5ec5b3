//! Tool output truncation.
//!
//! Output past the limit is cut at a char boundary and the full text is
//! persisted to a per-session temp file so the model (or the user) can
//! still reach it.

use std::path::PathBuf;

use tracing::warn;

/// Maximum tool output carried in the conversation, in bytes.
pub const MAX_OUTPUT_LEN: usize = 30_000;

/// Result of a truncation pass.
#[derive(Debug, Clone)]
pub struct TruncateResult {
    pub content: String,
    pub truncated: bool,
    pub file_path: String,
    pub original_len: usize,
}

/// Truncate `output` to [`MAX_OUTPUT_LEN`], saving the full text to
/// `<tmp>/gmain-agent/<session_id>/outputs/<tool>-<call_id>.txt`.
///
/// A failed write still truncates; the footer then reports
/// "(failed to save)" instead of a path.
pub fn truncate_output(
    output: &str,
    session_id: &str,
    tool_name: &str,
    call_id: &str,
) -> TruncateResult {
    let original_len = output.len();
    if original_len <= MAX_OUTPUT_LEN {
        return TruncateResult {
            content: output.to_string(),
            truncated: false,
            file_path: String::new(),
            original_len,
        };
    }

    let cut = floor_char_boundary(output, MAX_OUTPUT_LEN);
    let head = &output[..cut];
    let remaining = original_len - cut;

    let file_path = match save_full_output(output, session_id, tool_name, call_id) {
        Ok(path) => path.display().to_string(),
        Err(err) => {
            warn!(session_id, tool_name, call_id, error = %err, "failed to save full tool output");
            "(failed to save)".to_string()
        }
    };

    let content = format!(
        "{head}\n\n... (output truncated, {remaining} more characters) ...\n\nFull output saved to: {file_path}"
    );

    TruncateResult {
        content,
        truncated: true,
        file_path,
        original_len,
    }
}

/// Directory for a session's saved outputs.
pub fn outputs_dir(session_id: &str) -> PathBuf {
    std::env::temp_dir()
        .join("gmain-agent")
        .join(session_id)
        .join("outputs")
}

fn save_full_output(
    output: &str,
    session_id: &str,
    tool_name: &str,
    call_id: &str,
) -> std::io::Result<PathBuf> {
    let dir = outputs_dir(session_id);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{tool_name}-{call_id}.txt"));
    std::fs::write(&path, output)?;
    Ok(path)
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut boundary = index.min(text.len());
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_at_limit_is_untouched() {
        let output = "x".repeat(MAX_OUTPUT_LEN);
        let result = truncate_output(&output, "s-limit", "bash", "c0");
        assert!(!result.truncated);
        assert_eq!(result.content, output);
    }

    #[test]
    fn one_past_limit_is_truncated() {
        let output = "x".repeat(MAX_OUTPUT_LEN + 1);
        let result = truncate_output(&output, "s-limit", "bash", "c1");
        assert!(result.truncated);
        assert!(result.content.starts_with(&"x".repeat(100)));
        assert!(result.content.contains("output truncated, 1 more characters"));
    }

    #[test]
    fn full_output_lands_in_temp_file() {
        let output = "y".repeat(50_000);
        let result = truncate_output(&output, "S", "bash", "C");
        assert!(result.truncated);

        let expected = outputs_dir("S").join("bash-C.txt");
        assert_eq!(result.file_path, expected.display().to_string());
        let saved = std::fs::read_to_string(&expected).unwrap();
        assert_eq!(saved.len(), 50_000);
        assert!(result.content.contains(&result.file_path));

        let _ = std::fs::remove_file(expected);
    }

    #[test]
    fn cut_respects_char_boundaries() {
        // Multibyte chars straddling the limit must not split.
        let output = "é".repeat(MAX_OUTPUT_LEN);
        let result = truncate_output(&output, "s-utf8", "bash", "c2");
        assert!(result.truncated);
        assert!(result.content.starts_with('é'));
    }
}
