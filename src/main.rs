// Treasury management CLI
// Administrative companion to the API server: database initialization,
// offline statement imports, and quick analyses from the shell.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use treasury::analysis::{run_analysis, AnalysisKnobs};
use treasury::db;
use treasury::entities::client::{get_client, list_clients};
use treasury::entities::product::seed_catalog;
use treasury::entities::statement::{
    content_hash, insert_statement_file, insert_transactions, list_statements, mark_failed,
    mark_parsed, StatementTransaction,
};
use treasury::entities::user::{create_user, find_by_username, Role};
use treasury::parser::parse_statement;
use treasury::rules::CategoryMatcher;

#[derive(Parser)]
#[command(name = "treasury", about = "Treasury management admin CLI", version)]
struct Cli {
    /// Path to the SQLite database
    #[arg(short, long, default_value = "treasury.db")]
    database: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema and seed defaults
    Init {
        /// Username for the initial admin account
        #[arg(long, default_value = "admin")]
        admin_user: String,

        /// Password for the initial admin account
        #[arg(long)]
        admin_password: String,
    },

    /// List clients
    Clients,

    /// Import a statement file from disk for a client
    Import {
        /// Client id
        #[arg(long)]
        client: String,

        /// Path to the statement CSV
        #[arg(long)]
        file: PathBuf,

        /// Optional JSON file of category rules
        #[arg(long)]
        rules: Option<PathBuf>,
    },

    /// Run a cash analysis for a client
    Analyze {
        /// Client id
        #[arg(long)]
        client: String,

        /// Start of the period (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// End of the period (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut conn = db::open_database(&cli.database)?;

    match cli.command {
        Command::Init {
            admin_user,
            admin_password,
        } => {
            db::seed_defaults(&conn)?;
            seed_catalog(&conn)?;

            if find_by_username(&conn, &admin_user)?.is_none() {
                create_user(&conn, &admin_user, &admin_password, Role::Admin)?;
                println!("Created admin user '{}'", admin_user);
            } else {
                println!(
                    "Admin user '{}' already exists, leaving it untouched",
                    admin_user
                );
            }

            println!("Database ready at {}", cli.database.display());
        }

        Command::Clients => {
            let clients = list_clients(&conn, None)?;
            if clients.is_empty() {
                println!("No clients.");
            }
            for client in clients {
                println!(
                    "{}  {:<30} {:<10} {}",
                    client.id,
                    client.name,
                    client.status.as_str(),
                    client.contact_email
                );
            }
        }

        Command::Import {
            client,
            file,
            rules,
        } => {
            get_client(&conn, &client)?;

            let filename = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("statement.csv")
                .to_string();
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let matcher = match rules {
                Some(path) => CategoryMatcher::from_file(&path)?,
                None => CategoryMatcher::with_defaults(),
            };

            let hash = content_hash(&content);
            let parse_result = parse_statement(&filename, &content, &matcher);

            let format = match &parse_result {
                Ok(parsed) => parsed.format.code().to_string(),
                Err(_) => "unknown".to_string(),
            };
            let record = insert_statement_file(&conn, &client, &filename, &format, &hash)?;

            match parse_result {
                Ok(parsed) => {
                    let records: Vec<StatementTransaction> = parsed
                        .rows
                        .into_iter()
                        .map(|row| StatementTransaction {
                            id: uuid::Uuid::new_v4().to_string(),
                            statement_id: record.id.clone(),
                            client_id: client.clone(),
                            date: row.date,
                            description: row.description,
                            amount: row.amount,
                            direction: row.direction,
                            category: row.category,
                            balance_after: row.balance_after,
                        })
                        .collect();

                    insert_transactions(&mut conn, &records)?;
                    mark_parsed(&conn, &record.id, records.len() as i64)?;

                    println!(
                        "Imported {} transactions from {} ({})",
                        records.len(),
                        filename,
                        format
                    );
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    mark_failed(&conn, &record.id, &message)?;
                    bail!("Import failed: {}", message);
                }
            }

            let statements = list_statements(&conn, &client)?;
            println!("Client now has {} statement file(s)", statements.len());
        }

        Command::Analyze { client, from, to } => {
            let knobs = AnalysisKnobs::from_config(&conn);
            let analysis = run_analysis(&conn, &client, from, to, &knobs)?;

            println!("Analysis {}", analysis.id);
            println!("  Transactions:     {}", analysis.transaction_count);
            println!("  Total inflow:     {:.2}", analysis.total_inflow);
            println!("  Total outflow:    {:.2}", analysis.total_outflow);
            println!("  Net flow:         {:.2}", analysis.net_flow);
            println!("  Balance mean:     {:.2}", analysis.balance_mean);
            println!("  Balance std dev:  {:.2}", analysis.balance_std_dev);
            println!("  Minimum balance:  {:.2}", analysis.min_balance);
            println!("  Idle balance:     {:.2}", analysis.idle_balance);
            println!("  Projected yield:  {:.2}", analysis.projected_idle_yield);

            if !analysis.category_breakdown.is_empty() {
                println!("  Spending by category:");
                for share in &analysis.category_breakdown {
                    println!(
                        "    {:<20} {:>12.2}  {:>5.1}%",
                        share.category, share.outflow, share.pct
                    );
                }
            }
        }
    }

    Ok(())
}
