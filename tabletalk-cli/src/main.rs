// tabletalk command line client

mod output;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Parser)]
#[command(name = "tabletalk")]
#[command(about = "Upload CSV or Excel files and ask questions about them", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, default_value = "http://localhost:8000", env = "TABLETALK_SERVER", global = true)]
    server: String,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Table, global = true)]
    format: Format,

    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a CSV or Excel file as a new table
    Upload {
        file: PathBuf,
    },

    /// Ask a question about a table
    Ask {
        table: String,
        question: String,
    },

    /// List uploaded tables
    Tables,

    /// Show a table's columns and sample rows
    Schema {
        table: String,
    },

    /// Delete a table
    Drop {
        table: String,
    },

    /// Run a read-only query and save the rows as CSV or Excel
    Download {
        table: String,
        sql: String,

        /// Output file (defaults to <table>.csv, use .xlsx for Excel)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Check server health
    Health,
}

struct Client {
    http: reqwest::Client,
    server: String,
    format: Format,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    }

    if !cli.server.starts_with("http://") && !cli.server.starts_with("https://") {
        bail!("Server URL must start with http:// or https://");
    }

    let client = Client {
        http: reqwest::Client::new(),
        server: cli.server.trim_end_matches('/').to_string(),
        format: cli.format,
    };

    match cli.command {
        Commands::Upload { file } => client.upload(&file).await,
        Commands::Ask { table, question } => client.ask(&table, &question).await,
        Commands::Tables => client.tables().await,
        Commands::Schema { table } => client.schema(&table).await,
        Commands::Drop { table } => client.drop_table(&table).await,
        Commands::Download { table, sql, output } => {
            let output = output.unwrap_or_else(|| PathBuf::from(format!("{}.csv", table)));
            client.download(&table, &sql, &output).await
        }
        Commands::Health => client.health().await,
    }
}

impl Client {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server, path)
    }

    fn table_url(&self, route: &str, table: &str) -> String {
        self.url(&format!("{}/{}", route, urlencoding::encode(table)))
    }

    /// JSON body of a successful response, or the server's failure rendered as an error.
    async fn read_json(response: reqwest::Response) -> anyhow::Result<Value> {
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("server returned {} with a non-JSON body", status))?;
        if status.is_success() {
            return Ok(body);
        }
        Err(anyhow!(describe_failure(status.as_u16(), &body)))
    }

    fn print_json(&self, value: &Value) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    async fn health(&self) -> anyhow::Result<()> {
        let response = self
            .http
            .get(self.url("/health"))
            .send()
            .await
            .with_context(|| format!("Cannot connect to server at {}", self.server))?;
        let body = Self::read_json(response).await?;
        match self.format {
            Format::Json => self.print_json(&body)?,
            Format::Table => println!(
                "Server is {} (version {})",
                body["status"].as_str().unwrap_or("unknown"),
                body["version"].as_str().unwrap_or("unknown")
            ),
        }
        Ok(())
    }

    async fn upload(&self, file: &Path) -> anyhow::Result<()> {
        let bytes = tokio::fs::read(file)
            .await
            .with_context(|| format!("failed to read {}", file.display()))?;
        let filename = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("invalid file name: {}", file.display()))?
            .to_string();
        debug!("uploading {} ({} bytes)", filename, bytes.len());

        let mime = upload_mime(&filename);
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename)
            .mime_str(mime)?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self
            .http
            .post(self.url("/api/upload"))
            .multipart(form)
            .send()
            .await?;
        let body = Self::read_json(response).await?;

        match self.format {
            Format::Json => self.print_json(&body)?,
            Format::Table => {
                println!("{}", body["message"].as_str().unwrap_or("Uploaded"));
                print_columns(&body["table_schema"]);
                let columns = string_list(&body["columns"]);
                let rows = body["preview"].as_array().cloned().unwrap_or_default();
                if !rows.is_empty() {
                    println!();
                    print!("{}", output::render_table(&columns, &output::object_rows(&columns, &rows)));
                }
            }
        }
        Ok(())
    }

    async fn ask(&self, table: &str, question: &str) -> anyhow::Result<()> {
        let response = self
            .http
            .post(self.url("/api/query"))
            .json(&json!({ "question": question, "table_name": table }))
            .send()
            .await?;
        let body = Self::read_json(response).await?;

        match self.format {
            Format::Json => self.print_json(&body)?,
            Format::Table => {
                println!("SQL: {}", body["sql_text"].as_str().unwrap_or_default());
                println!();
                let columns = string_list(&body["columns"]);
                let rows = body["rows"].as_array().cloned().unwrap_or_default();
                print!("{}", output::render_table(&columns, &output::object_rows(&columns, &rows)));
                let shown = rows.len();
                let total = body["row_count"].as_u64().unwrap_or(shown as u64);
                let elapsed = body["elapsed_ms"].as_f64().unwrap_or_default();
                if body["truncated"].as_bool().unwrap_or(false) {
                    println!("({} of {} rows shown, {:.2} ms)", shown, total, elapsed);
                } else {
                    println!("({} rows, {:.2} ms)", total, elapsed);
                }
            }
        }
        Ok(())
    }

    async fn tables(&self) -> anyhow::Result<()> {
        let response = self.http.get(self.url("/api/tables")).send().await?;
        let body = Self::read_json(response).await?;

        match self.format {
            Format::Json => self.print_json(&body)?,
            Format::Table => {
                let tables = body["tables"].as_array().cloned().unwrap_or_default();
                if tables.is_empty() {
                    println!("No tables uploaded yet");
                    return Ok(());
                }
                let columns = vec![
                    "name".to_string(),
                    "rows".to_string(),
                    "columns".to_string(),
                    "created_at".to_string(),
                ];
                let rows: Vec<Vec<String>> = tables
                    .iter()
                    .map(|t| {
                        vec![
                            output::cell(&t["name"]),
                            output::cell(&t["row_count"]),
                            string_list(&t["columns"]).join(", "),
                            output::cell(&t["created_at"]),
                        ]
                    })
                    .collect();
                print!("{}", output::render_table(&columns, &rows));
            }
        }
        Ok(())
    }

    async fn schema(&self, table: &str) -> anyhow::Result<()> {
        let response = self
            .http
            .get(self.table_url("/api/schema", table))
            .send()
            .await?;
        let body = Self::read_json(response).await?;

        match self.format {
            Format::Json => self.print_json(&body)?,
            Format::Table => {
                println!("Table: {}", body["table_name"].as_str().unwrap_or(table));
                print_columns(&body["columns"]);
                let columns: Vec<String> = body["columns"]
                    .as_array()
                    .map(|cols| cols.iter().map(|c| output::cell(&c["name"])).collect())
                    .unwrap_or_default();
                let rows = body["sample_data"].as_array().cloned().unwrap_or_default();
                if !rows.is_empty() {
                    println!();
                    print!("{}", output::render_table(&columns, &output::object_rows(&columns, &rows)));
                }
            }
        }
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> anyhow::Result<()> {
        let response = self
            .http
            .delete(self.table_url("/api/table", table))
            .send()
            .await?;
        let body = Self::read_json(response).await?;
        match self.format {
            Format::Json => self.print_json(&body)?,
            Format::Table => println!("{}", body["message"].as_str().unwrap_or("Deleted")),
        }
        Ok(())
    }

    async fn download(&self, table: &str, sql: &str, output: &Path) -> anyhow::Result<()> {
        let filename = output
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("results");
        let response = self
            .http
            .post(self.url(download_route(output)))
            .json(&json!({ "sql_query": sql, "table_name": table, "filename": filename }))
            .send()
            .await?;

        if !response.status().is_success() {
            Self::read_json(response).await?;
            bail!("download failed");
        }
        let bytes = response.bytes().await?;
        tokio::fs::write(output, &bytes)
            .await
            .with_context(|| format!("failed to write {}", output.display()))?;
        println!("Saved {} bytes to {}", bytes.len(), output.display());
        Ok(())
    }
}

fn upload_mime(filename: &str) -> &'static str {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xls" => "application/vnd.ms-excel",
        _ => "text/csv",
    }
}

fn download_route(output: &Path) -> &'static str {
    match output.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("xlsx") => "/api/download/excel",
        _ => "/api/download/csv",
    }
}

fn describe_failure(status: u16, body: &Value) -> String {
    let kind = body["error_kind"].as_str().unwrap_or("error");
    let detail = body["error_detail"].as_str().unwrap_or("request failed");
    match body["failed_at"].as_str() {
        Some(stage) => format!("{} (HTTP {}, {} while entering {})", detail, status, kind, stage),
        None => format!("{} (HTTP {}, {})", detail, status, kind),
    }
}

fn print_columns(columns: &Value) {
    if let Some(columns) = columns.as_array() {
        println!("Columns:");
        for column in columns {
            println!(
                "  - {} ({})",
                column["name"].as_str().unwrap_or("?"),
                column["type"].as_str().unwrap_or("?")
            );
        }
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| items.iter().map(output::cell).collect())
        .unwrap_or_default()
}
