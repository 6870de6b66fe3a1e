//! End-of-session summary report.
//!
//! Formats a counter snapshot into the human-readable block that
//! terminates the trace journal. Rates with a zero divisor print the
//! literal `n/a` instead of a non-finite number.

use iolens_common::{READ_CHUNK_CEILING, WRITE_CHUNK_CEILING};

use crate::journal::{JournalError, TraceJournal};
use crate::stats::WorkloadSnapshot;

/// Sentinel printed for a rate whose divisor is zero.
const NOT_AVAILABLE: &str = "n/a";

/// Format a rate, falling back to the `n/a` sentinel.
fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(value) => format!("{value:.2}"),
        None => NOT_AVAILABLE.to_string(),
    }
}

/// Render the summary block for one session.
///
/// # Arguments
/// * `snapshot` - Final counter snapshot taken at teardown
pub fn format_summary(snapshot: &WorkloadSnapshot) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push("#".repeat(60));
    lines.push(String::new());
    lines.push("iolens workload summary".to_string());
    lines.push(String::new());
    lines.push(format!(
        "Total operation count      : {}",
        snapshot.total_ops()
    ));
    lines.push(format!("Total read count           : {}", snapshot.read_ops));
    lines.push(format!("Total write count          : {}", snapshot.write_ops));
    lines.push(format!(
        "Total transaction bytes    : {}",
        snapshot.total_bytes()
    ));
    lines.push(format!("Total read bytes           : {}", snapshot.read_bytes));
    lines.push(format!("Total write bytes          : {}", snapshot.write_bytes));
    lines.push(format!(
        "Average read request size  : {}",
        format_rate(snapshot.average_read_size())
    ));
    lines.push(format!(
        "Average write request size : {}",
        format_rate(snapshot.average_write_size())
    ));
    lines.push(format!(
        "Read percentage            : {}",
        format_rate(snapshot.read_percentage())
    ));
    lines.push(String::new());
    lines.push("-".repeat(60));
    lines.push(
        "Read and write counts are logical transactions, not call counts:".to_string(),
    );
    lines.push(
        "the kernel splits one application request into fragments of at".to_string(),
    );
    lines.push(format!(
        "most {READ_CHUNK_CEILING} bytes per read call and {WRITE_CHUNK_CEILING} bytes per write call."
    ));
    lines.push("A fragment arriving at offset 0 starts a new transaction.".to_string());
    lines.push("-".repeat(60));

    lines.join("\n")
}

/// Write the summary block through the journal, one flushed line at a
/// time. Called exactly once, at teardown; no counters are accepted
/// after this point.
///
/// # Arguments
/// * `journal` - Session journal sink
/// * `snapshot` - Final counter snapshot
pub fn write_summary(
    journal: &TraceJournal,
    snapshot: &WorkloadSnapshot,
) -> Result<(), JournalError> {
    for line in format_summary(snapshot).lines() {
        journal.emit(line)?;
    }
    Ok(())
}
