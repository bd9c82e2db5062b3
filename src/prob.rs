//! Correlation filename handling.
//!
//! Chat requests and their replies travel through the queue folder as
//! `PROB_<id>_<ns-timestamp>.txt` (input) and
//! `PROB_<id>_<ns-timestamp>.output.txt` (reply). The id must round-trip
//! exactly; the timestamp is nanoseconds since the Unix epoch.

/// Parsed form of a correlation filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbFileInfo {
    pub id: u64,
    pub timestamp: i64,
    pub is_output: bool,
}

impl ProbFileInfo {
    /// Render back to the exact filename this info was parsed from.
    #[must_use]
    pub fn filename(&self) -> String {
        if self.is_output {
            format!("PROB_{}_{}.output.txt", self.id, self.timestamp)
        } else {
            format!("PROB_{}_{}.txt", self.id, self.timestamp)
        }
    }
}

/// Parse a leaf filename as a correlation file. Returns `None` for anything
/// that is not exactly `PROB_<id>_<ts>.txt` or `PROB_<id>_<ts>.output.txt`.
#[must_use]
pub fn parse_prob_filename(filename: &str) -> Option<ProbFileInfo> {
    let rest = filename.strip_prefix("PROB_")?;

    let (rest, is_output) = match rest.strip_suffix(".output.txt") {
        Some(stripped) => (stripped, true),
        None => (rest.strip_suffix(".txt")?, false),
    };

    let (id_str, ts_str) = rest.split_once('_')?;
    let id = id_str.parse::<u64>().ok()?;
    let timestamp = ts_str.parse::<i64>().ok()?;

    Some(ProbFileInfo {
        id,
        timestamp,
        is_output,
    })
}
