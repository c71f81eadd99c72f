use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a load job described by a JSON job file
    Run {
        #[arg(long, help = "Job file path")]
        job: String,

        #[arg(
            long,
            help = "Drop and recreate the destination table before loading"
        )]
        drop_table: bool,
    },
    /// Probe a destination connection string
    TestConn {
        #[arg(long, help = "Postgres connection string")]
        conn_str: String,
    },
    Progress {
        #[arg(long, help = "Job ID to inspect")]
        job: String,

        #[arg(
            long,
            help = "If set, prints the progress information as JSON instead of a table"
        )]
        json: bool,
    },
    /// Summarize a job's dead-letter files
    Dlq {
        #[arg(long, help = "Job ID to inspect")]
        job: String,

        #[arg(
            long,
            help = "If set, prints the summary as JSON instead of a table"
        )]
        json: bool,
    },
}
