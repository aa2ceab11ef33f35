use crate::{CaseDef, StraddleError};
use regex::Regex;

pub const DEFAULT_CHECKPOINT_KEYWORD: &str = "checkpoint";

/// Stages before the first and after the last checkpoint.
pub const IMPLICIT_STAGES: u32 = 2;
pub const MIN_SEGMENTS: u32 = IMPLICIT_STAGES + 1;

/// Lexical count of `keyword` in `source`. Occurrences inside string
/// literals count too; the coordinator checks the real count at runtime.
pub fn count_checkpoints(source: &str, keyword: &str) -> Result<usize, StraddleError> {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return Err(StraddleError::Config(
            "checkpoint keyword must not be empty".to_string(),
        ));
    }
    let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(keyword))).map_err(|error| {
        StraddleError::Config(format!("invalid checkpoint keyword '{keyword}': {error}"))
    })?;
    Ok(pattern.find_iter(source).count())
}

/// Segment count `S` for a deployment case: checkpoints plus two.
pub fn count_segments(case: &CaseDef, keyword: &str) -> Result<u32, StraddleError> {
    let checkpoints = count_checkpoints(case.source_text(), keyword)?;
    let segments = u32::try_from(checkpoints)
        .ok()
        .and_then(|count| count.checked_add(IMPLICIT_STAGES))
        .ok_or_else(|| {
            StraddleError::Usage(format!(
                "deployment case '{}' declares too many checkpoints",
                case.name()
            ))
        })?;
    if segments < MIN_SEGMENTS {
        return Err(StraddleError::Usage(format!(
            "need at least one {keyword} in deployment case '{}'",
            case.name()
        )));
    }
    Ok(segments)
}
