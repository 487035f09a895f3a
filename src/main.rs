//! Entry point for the report-checker binary.
//!
//! Delegates to [`report_checker::run()`] and translates its `Result`
//! into process exit codes: `0` on success, `1` on any error.

fn main() {
    if report_checker::run().is_err() {
        std::process::exit(1);
    }
}
