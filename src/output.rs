use crate::report::ScanReport;
use crate::utils::display_path;
use colored::*;
use serde::Serialize;

/// Output verbosity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OutputMode {
    Quiet,       // Only the final summary and errors
    Normal,      // Status lines, progress, corrupted files as found
    Verbose,     // Also valid files and pruning
    VeryVerbose, // Also every up-to-date file that was skipped
}

#[derive(Serialize)]
struct JsonResults<'a> {
    version: &'static str,
    timestamp: String,
    summary: JsonSummary,
    corrupted_files: Vec<String>,
    errors: Vec<JsonError<'a>>,
}

#[derive(Serialize)]
struct JsonSummary {
    total_found: usize,
    scanned: usize,
    skipped: usize,
    corrupted: usize,
    scanned_bytes: u64,
    /// Seconds, two decimals
    duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pruned: Option<usize>,
}

#[derive(Serialize)]
struct JsonError<'a> {
    filepath: String,
    error: &'a str,
}

fn rounded_secs(report: &ScanReport) -> f64 {
    (report.duration.as_secs_f64() * 100.0).round() / 100.0
}

pub fn print_human(report: &ScanReport) {
    println!();
    println!("{}", "=== Scan Complete ===".bold());
    println!("Duration:  {}s", rounded_secs(report));
    println!(
        "Scanned:   {} ({})",
        report.scanned,
        bytesize::to_string(report.scanned_bytes, true)
    );
    println!("Skipped:   {}", report.skipped);
    if report.has_corruption() {
        println!("Corrupted: {}", report.corrupted().to_string().red().bold());
    } else {
        println!("Corrupted: {}", report.corrupted());
    }
    if let Some(pruned) = report.pruned {
        println!("Pruned:    {}", pruned);
    }

    if report.has_corruption() {
        println!();
        println!("{}", "[!] List of Corrupted Files:".yellow());
        for path in &report.corrupted_files {
            println!(" - {}", display_path(path));
        }
    } else {
        println!();
        println!("{}", "No corruption detected.".green());
    }
}

/// Render the report as the pretty-printed JSON document
pub fn render_json(report: &ScanReport) -> anyhow::Result<String> {
    let json_results = JsonResults {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        summary: JsonSummary {
            total_found: report.total_found,
            scanned: report.scanned,
            skipped: report.skipped,
            corrupted: report.corrupted(),
            scanned_bytes: report.scanned_bytes,
            duration: rounded_secs(report),
            pruned: report.pruned,
        },
        corrupted_files: report.corrupted_files.iter().map(|p| display_path(p)).collect(),
        errors: report
            .errors
            .iter()
            .map(|e| JsonError {
                filepath: display_path(&e.path),
                error: &e.error,
            })
            .collect(),
    };

    Ok(serde_json::to_string_pretty(&json_results)?)
}

pub fn print_json(report: &ScanReport) -> anyhow::Result<()> {
    println!("{}", render_json(report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    #[test]
    fn test_json_shape() {
        let mut report = ScanReport {
            total_found: 2,
            scanned: 2,
            skipped: 0,
            duration: Duration::from_millis(1234),
            ..ScanReport::default()
        };
        report.record_corrupted(Path::new("/videos/b.mkv"), Some("EBML header parsing failed"));

        let value: serde_json::Value = serde_json::from_str(&render_json(&report).unwrap()).unwrap();

        assert_eq!(value["summary"]["total_found"], 2);
        assert_eq!(value["summary"]["scanned"], 2);
        assert_eq!(value["summary"]["skipped"], 0);
        assert_eq!(value["summary"]["corrupted"], 1);
        assert_eq!(value["summary"]["duration"], 1.23);
        assert!(value["summary"].get("pruned").is_none());
        assert_eq!(value["corrupted_files"][0], "/videos/b.mkv");
        assert_eq!(value["errors"][0]["filepath"], "/videos/b.mkv");
        assert_eq!(value["errors"][0]["error"], "EBML header parsing failed");
    }

    #[test]
    fn test_json_includes_pruned_when_requested() {
        let report = ScanReport {
            pruned: Some(3),
            ..ScanReport::default()
        };
        let value: serde_json::Value = serde_json::from_str(&render_json(&report).unwrap()).unwrap();
        assert_eq!(value["summary"]["pruned"], 3);
        assert_eq!(value["corrupted_files"].as_array().unwrap().len(), 0);
    }
}
