use engine_core::{dlq::DlqStats, state::models::Checkpoint};
use engine_pipeline::orchestrator::JobReport;

pub fn print_report(report: &JobReport) {
    println!("Run summary for job '{}':", report.job_id);
    println!("-----------------------------");
    println!("{:<16} {}", "State", report.state);
    println!("{:<16} {}", "Rows extracted", report.rows_extracted);
    println!("{:<16} {}", "Rows loaded", report.rows_loaded);
    println!("{:<16} {}", "Rows failed", report.rows_failed);
    println!("{:<16} {}", "Chunks", report.chunks_committed);
    println!("{:<16} {:.1}s", "Elapsed", report.elapsed.as_secs_f64());
    if !report.message.is_empty() {
        println!("{:<16} {}", "Message", report.message);
    }
}

pub fn print_checkpoint(checkpoint: &Checkpoint) {
    println!("Progress for job '{}':", checkpoint.job_id);
    println!("-----------------------------");
    println!("{:<16} {}", "Last chunk", checkpoint.last_committed_chunk);
    println!("{:<16} {}", "Rows extracted", checkpoint.rows_extracted);
    println!("{:<16} {}", "Rows loaded", checkpoint.rows_loaded);
    println!("{:<16} {}", "Updated", checkpoint.updated_at.to_rfc3339());
}

pub fn print_dlq(job: &str, stats: &DlqStats) {
    println!("Dead letters for job '{job}':");
    println!("-----------------------------");
    println!("{:<16} {}", "Total records", stats.total_records);
    for file in &stats.files {
        println!("{}:", file.file);
        for (kind, count) in &file.by_kind {
            println!("  {kind:<18} {count}");
        }
    }
}
