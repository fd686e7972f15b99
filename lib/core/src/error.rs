//! Error handling foundation for taskloom.
//!
//! Each crate keeps its domain errors as plain enums next to the code that
//! raises them and wraps them in a `Report` where they leave the crate.

use rootcause::Report;

/// `Result` whose error is a rootcause `Report` with context `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ParseIdError, RunId};

    fn parse_run_id(s: &str) -> Result<RunId, ParseIdError> {
        Ok(s.parse::<RunId>()?)
    }

    #[test]
    fn errors_become_reports() {
        assert!(parse_run_id("run_01ARZ3NDEKTSV4RRFFQ69G5FAV").is_ok());

        let err = parse_run_id("run_bogus").expect_err("invalid ulid");
        assert!(err.to_string().contains("failed to parse RunId"));
    }
}
