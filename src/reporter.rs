use crate::types::CycleReport;

/// Emit a completed poll cycle as a single JSON line to stdout.
pub fn report_cycle(report: &CycleReport) {
    if let Ok(json) = serde_json::to_string(report) {
        println!("{json}");
    }
}
