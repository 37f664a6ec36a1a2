use crate::worker::generator::GenerateError;

/// Lower-cased fragments that mark a provider error as worth retrying on
/// another key: rate limits, exhausted quota, overload, timeouts, and
/// network failures.
pub const TRANSIENT_MARKERS: [&str; 5] = ["429", "quota", "overloaded", "timeout", "fetch failed"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Requeue the job at the tail and cool the key down.
    Transient,
    /// Fail the job and release the key.
    Permanent,
    /// Drop the job from the run without touching the key's standing.
    Aborted,
}

/// Sort a provider error into retry buckets.
///
/// This is a substring heuristic over the rendered error; a structured
/// 429 status is caught through its rendering as well.
pub fn classify(error: &GenerateError) -> FailureKind {
    match error {
        GenerateError::Aborted => return FailureKind::Aborted,
        GenerateError::Crashed(_) => return FailureKind::Permanent,
        _ => {}
    }
    let text = error.to_string().to_lowercase();
    if TRANSIENT_MARKERS.iter().any(|marker| text.contains(marker)) {
        FailureKind::Transient
    } else {
        FailureKind::Permanent
    }
}

/// Cut an error message to at most `max_chars` characters.
pub fn truncate_error(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => message[..byte_idx].to_string(),
        None => message.to_string(),
    }
}
