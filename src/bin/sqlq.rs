use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use sql_queue::prelude::*;
use sql_queue::sqlite::build_result_set;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run SQL statements through a serialized database queue")]
struct Args {
    /// Database file; `:memory:` for a throwaway in-memory database.
    #[arg(long, default_value = MEMORY_PATH)]
    db: String,
    #[arg(long, default_value_t = 5000)]
    busy_timeout_ms: u64,
    /// Print result rows as JSON objects instead of tab-separated text.
    #[arg(long)]
    json: bool,
    /// Statements to run, in order.
    #[arg(required = true)]
    sql: Vec<String>,
}

enum Output {
    Rows(ResultSet),
    Changed(usize),
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}: {err}", err.kind());
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), DbError> {
    let queue = ConnectionOptions::builder(args.db.clone())
        .busy_timeout(Duration::from_millis(args.busy_timeout_ms))
        .open_queue()?;

    for sql in &args.sql {
        let statement = sql.clone();
        let output = queue.submit(move |conn| {
            let mut stmt = conn.prepare(&statement)?;
            if stmt.column_count() == 0 {
                stmt.execute().map(Output::Changed)
            } else {
                build_result_set(&mut stmt, &Arguments::None).map(Output::Rows)
            }
        })?;
        match output {
            Output::Changed(count) => println!("{count} row(s) affected"),
            Output::Rows(rows) if args.json => print_json(&rows)?,
            Output::Rows(rows) => print_table(&rows),
        }
    }
    queue.close()
}

fn print_json(rows: &ResultSet) -> Result<(), DbError> {
    let objects: Vec<_> = rows.iter().map(Row::to_map).collect();
    let text = serde_json::to_string_pretty(&objects)
        .map_err(|err| DbError::Execution {
            message: format!("cannot encode rows as JSON: {err}"),
            code: None,
        })?;
    println!("{text}");
    Ok(())
}

fn print_table(rows: &ResultSet) {
    println!("{}", rows.column_names().join("\t"));
    for row in rows {
        let cells: Vec<String> = row.values.iter().map(render).collect();
        println!("{}", cells.join("\t"));
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(bytes) => bytes.iter().map(|b| format!("{b:02x}")).collect(),
    }
}
