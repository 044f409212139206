// Statement parser framework
// Polymorphic parsers for the CSV layouts banks actually export, producing
// normalized transactions ready for aggregation.

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::entities::statement::Direction;
use crate::rules::CategoryMatcher;

// ============================================================================
// CORE TYPES
// ============================================================================

/// StatementFormat - identifies the layout of an uploaded statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementFormat {
    /// date,description,amount,balance
    BalanceCsv,
    /// date,description,debit,credit,balance
    DebitCreditCsv,
    /// date,description,amount
    GenericCsv,
}

impl StatementFormat {
    /// Short code stored on the statement record
    pub fn code(&self) -> &'static str {
        match self {
            StatementFormat::BalanceCsv => "balance-csv",
            StatementFormat::DebitCreditCsv => "debit-credit-csv",
            StatementFormat::GenericCsv => "generic-csv",
        }
    }
}

/// Raw row as read from the file, before normalization.
/// Line numbers are kept for error reporting.
#[derive(Debug, Clone)]
pub struct RawStatementRow {
    pub line_number: usize,
    pub date: String,
    pub description: String,
    /// Signed amount: inflows positive, outflows negative.
    pub amount: f64,
    pub balance: Option<f64>,
}

/// Normalized transaction produced by the pipeline.
#[derive(Debug, Clone)]
pub struct ParsedRow {
    pub date: NaiveDate,
    pub description: String,
    pub amount: f64,
    pub direction: Direction,
    pub category: String,
    pub balance_after: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ParsedStatement {
    pub format: StatementFormat,
    pub rows: Vec<ParsedRow>,
}

// ============================================================================
// PARSER TRAIT
// ============================================================================

pub trait StatementParser: Send + Sync {
    /// Parse file content into raw rows.
    fn parse(&self, content: &str) -> Result<Vec<RawStatementRow>>;

    /// The layout this parser handles.
    fn format(&self) -> StatementFormat;
}

/// Detect the statement layout from the header line.
pub fn detect_format(filename: &str, content: &str) -> Result<StatementFormat> {
    if !filename.to_lowercase().ends_with(".csv") {
        bail!("Unsupported statement file type: {} (only CSV is accepted)", filename);
    }

    let header = content
        .lines()
        .next()
        .ok_or_else(|| anyhow!("Statement file is empty"))?;

    let columns: Vec<String> = header
        .split(',')
        .map(|c| c.trim().to_lowercase())
        .collect();

    let has = |name: &str| columns.iter().any(|c| c == name);

    if has("date") && has("description") {
        if has("debit") && has("credit") {
            return Ok(StatementFormat::DebitCreditCsv);
        }
        if has("amount") && has("balance") {
            return Ok(StatementFormat::BalanceCsv);
        }
        if has("amount") {
            return Ok(StatementFormat::GenericCsv);
        }
    }

    bail!("Unrecognized statement header: {}", header)
}

pub fn get_parser(format: StatementFormat) -> Box<dyn StatementParser> {
    match format {
        StatementFormat::BalanceCsv => Box::new(BalanceCsvParser),
        StatementFormat::DebitCreditCsv => Box::new(DebitCreditCsvParser),
        StatementFormat::GenericCsv => Box::new(GenericCsvParser),
    }
}

// ============================================================================
// AMOUNT / DATE HELPERS
// ============================================================================

/// Parse a currency amount. Accepts "$1,234.56", "(500.00)" for negatives,
/// and plain signed decimals.
fn parse_amount(raw: &str) -> Result<f64> {
    let cleaned = raw.trim().replace(['$', ','], "");
    if cleaned.is_empty() {
        bail!("Empty amount");
    }

    let (body, negate) = if cleaned.starts_with('(') && cleaned.ends_with(')') {
        (&cleaned[1..cleaned.len() - 1], true)
    } else {
        (cleaned.as_str(), false)
    };

    let value: f64 = body
        .parse()
        .with_context(|| format!("Invalid amount: {}", raw))?;

    Ok(if negate { -value } else { value })
}

/// Optional amount column: blank cells mean zero.
fn parse_optional_amount(raw: &str) -> Result<f64> {
    if raw.trim().is_empty() {
        Ok(0.0)
    } else {
        parse_amount(raw)
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Ok(date);
        }
    }
    bail!("Unrecognized date: {}", raw)
}

fn reader_for(content: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(false)
        .from_reader(content.as_bytes())
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
        .ok_or_else(|| anyhow!("Missing column: {}", name))
}

fn field<'a>(record: &'a csv::StringRecord, index: usize, line: usize) -> Result<&'a str> {
    record
        .get(index)
        .ok_or_else(|| anyhow!("Line {}: missing field", line))
}

// ============================================================================
// PARSERS
// ============================================================================

/// date,description,amount,balance
pub struct BalanceCsvParser;

impl StatementParser for BalanceCsvParser {
    fn parse(&self, content: &str) -> Result<Vec<RawStatementRow>> {
        let mut reader = reader_for(content);
        let headers = reader.headers()?.clone();
        let date_col = column_index(&headers, "date")?;
        let desc_col = column_index(&headers, "description")?;
        let amount_col = column_index(&headers, "amount")?;
        let balance_col = column_index(&headers, "balance")?;

        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let line = i + 2; // header is line 1
            let record = record.with_context(|| format!("Line {}: malformed CSV", line))?;

            rows.push(RawStatementRow {
                line_number: line,
                date: field(&record, date_col, line)?.to_string(),
                description: field(&record, desc_col, line)?.to_string(),
                amount: parse_amount(field(&record, amount_col, line)?)
                    .with_context(|| format!("Line {}", line))?,
                balance: Some(
                    parse_amount(field(&record, balance_col, line)?)
                        .with_context(|| format!("Line {}", line))?,
                ),
            });
        }

        Ok(rows)
    }

    fn format(&self) -> StatementFormat {
        StatementFormat::BalanceCsv
    }
}

/// date,description,debit,credit,balance
/// Debits and credits are unsigned columns; the signed amount is credit - debit.
pub struct DebitCreditCsvParser;

impl StatementParser for DebitCreditCsvParser {
    fn parse(&self, content: &str) -> Result<Vec<RawStatementRow>> {
        let mut reader = reader_for(content);
        let headers = reader.headers()?.clone();
        let date_col = column_index(&headers, "date")?;
        let desc_col = column_index(&headers, "description")?;
        let debit_col = column_index(&headers, "debit")?;
        let credit_col = column_index(&headers, "credit")?;
        let balance_col = column_index(&headers, "balance")?;

        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let line = i + 2;
            let record = record.with_context(|| format!("Line {}: malformed CSV", line))?;

            let debit = parse_optional_amount(field(&record, debit_col, line)?)
                .with_context(|| format!("Line {}", line))?;
            let credit = parse_optional_amount(field(&record, credit_col, line)?)
                .with_context(|| format!("Line {}", line))?;

            if debit < 0.0 || credit < 0.0 {
                bail!("Line {}: debit/credit columns must be unsigned", line);
            }

            rows.push(RawStatementRow {
                line_number: line,
                date: field(&record, date_col, line)?.to_string(),
                description: field(&record, desc_col, line)?.to_string(),
                amount: credit - debit,
                balance: Some(
                    parse_amount(field(&record, balance_col, line)?)
                        .with_context(|| format!("Line {}", line))?,
                ),
            });
        }

        Ok(rows)
    }

    fn format(&self) -> StatementFormat {
        StatementFormat::DebitCreditCsv
    }
}

/// date,description,amount - no running balance column
pub struct GenericCsvParser;

impl StatementParser for GenericCsvParser {
    fn parse(&self, content: &str) -> Result<Vec<RawStatementRow>> {
        let mut reader = reader_for(content);
        let headers = reader.headers()?.clone();
        let date_col = column_index(&headers, "date")?;
        let desc_col = column_index(&headers, "description")?;
        let amount_col = column_index(&headers, "amount")?;

        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let line = i + 2;
            let record = record.with_context(|| format!("Line {}: malformed CSV", line))?;

            rows.push(RawStatementRow {
                line_number: line,
                date: field(&record, date_col, line)?.to_string(),
                description: field(&record, desc_col, line)?.to_string(),
                amount: parse_amount(field(&record, amount_col, line)?)
                    .with_context(|| format!("Line {}", line))?,
                balance: None,
            });
        }

        Ok(rows)
    }

    fn format(&self) -> StatementFormat {
        StatementFormat::GenericCsv
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Normalize raw rows: parse dates, derive direction from the sign,
/// assign categories.
pub fn normalize(rows: Vec<RawStatementRow>, matcher: &CategoryMatcher) -> Result<Vec<ParsedRow>> {
    rows.into_iter()
        .map(|row| {
            let date = parse_date(&row.date)
                .with_context(|| format!("Line {}", row.line_number))?;

            Ok(ParsedRow {
                date,
                category: matcher.categorize(&row.description),
                description: row.description,
                amount: row.amount,
                direction: Direction::from_amount(row.amount),
                balance_after: row.balance,
            })
        })
        .collect()
}

/// Full pipeline: detect the layout, parse, normalize.
pub fn parse_statement(
    filename: &str,
    content: &str,
    matcher: &CategoryMatcher,
) -> Result<ParsedStatement> {
    let format = detect_format(filename, content)?;
    let parser = get_parser(format);
    let raw = parser.parse(content)?;
    let rows = normalize(raw, matcher)?;

    Ok(ParsedStatement { format, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BALANCE_CSV: &str = "\
date,description,amount,balance
2024-01-02,ACME INVOICE 441,\"$12,500.00\",512500.00
2024-01-03,ADP PAYROLL,(8200.00),504300.00
2024-01-05,MONTHLY SERVICE FEE,-45.00,504255.00
";

    #[test]
    fn test_detect_format() {
        assert_eq!(
            detect_format("jan.csv", "date,description,amount,balance\n").unwrap(),
            StatementFormat::BalanceCsv
        );
        assert_eq!(
            detect_format("jan.csv", "Date,Description,Debit,Credit,Balance\n").unwrap(),
            StatementFormat::DebitCreditCsv
        );
        assert_eq!(
            detect_format("jan.csv", "date,description,amount\n").unwrap(),
            StatementFormat::GenericCsv
        );
    }

    #[test]
    fn test_detect_rejects_non_csv() {
        assert!(detect_format("statement.pdf", "whatever").is_err());
        assert!(detect_format("jan.csv", "").is_err());
        assert!(detect_format("jan.csv", "foo,bar\n").is_err());
    }

    #[test]
    fn test_parse_amount_variants() {
        assert_eq!(parse_amount("1234.5").unwrap(), 1234.5);
        assert_eq!(parse_amount("$1,234.50").unwrap(), 1234.5);
        assert_eq!(parse_amount("(500.00)").unwrap(), -500.0);
        assert_eq!(parse_amount("-42").unwrap(), -42.0);
        assert!(parse_amount("").is_err());
        assert!(parse_amount("abc").is_err());
    }

    #[test]
    fn test_parse_date_variants() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(parse_date("2024-01-02").unwrap(), expected);
        assert_eq!(parse_date("01/02/2024").unwrap(), expected);
        assert_eq!(parse_date("01/02/24").unwrap(), expected);
        assert!(parse_date("Jan 2").is_err());
    }

    #[test]
    fn test_balance_csv_parser() {
        let rows = BalanceCsvParser.parse(BALANCE_CSV).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].amount, 12500.0);
        assert_eq!(rows[0].balance, Some(512500.0));
        assert_eq!(rows[1].amount, -8200.0); // parenthesized negative
        assert_eq!(rows[1].line_number, 3);
        assert_eq!(rows[2].amount, -45.0);
    }

    #[test]
    fn test_debit_credit_parser() {
        let content = "\
date,description,debit,credit,balance
2024-01-02,WIRE IN,,25000.00,125000.00
2024-01-03,VENDOR PAYMENT,4000.00,,121000.00
";
        let rows = DebitCreditCsvParser.parse(content).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].amount, 25000.0);
        assert_eq!(rows[1].amount, -4000.0);
        assert_eq!(rows[1].balance, Some(121000.0));
    }

    #[test]
    fn test_debit_credit_rejects_signed_columns() {
        let content = "\
date,description,debit,credit,balance
2024-01-02,WEIRD,-100.00,,1000.00
";
        assert!(DebitCreditCsvParser.parse(content).is_err());
    }

    #[test]
    fn test_generic_parser_has_no_balance() {
        let content = "date,description,amount\n2024-01-02,DEPOSIT,100.00\n";
        let rows = GenericCsvParser.parse(content).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].balance.is_none());
    }

    #[test]
    fn test_bad_amount_reports_line() {
        let content = "date,description,amount\n2024-01-02,DEPOSIT,oops\n";
        let err = GenericCsvParser.parse(content).unwrap_err();
        assert!(format!("{:#}", err).contains("Line 2"));
    }

    #[test]
    fn test_full_pipeline() {
        let matcher = CategoryMatcher::with_defaults();
        let parsed = parse_statement("jan.csv", BALANCE_CSV, &matcher).unwrap();

        assert_eq!(parsed.format, StatementFormat::BalanceCsv);
        assert_eq!(parsed.rows.len(), 3);

        assert_eq!(parsed.rows[0].direction, Direction::Inflow);
        assert_eq!(parsed.rows[0].category, "Vendor Payments");
        assert_eq!(parsed.rows[1].direction, Direction::Outflow);
        assert_eq!(parsed.rows[1].category, "Payroll");
        assert_eq!(parsed.rows[2].category, "Bank Fees");
        assert_eq!(
            parsed.rows[0].date,
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
        );
    }

    #[test]
    fn test_pipeline_bad_date_fails() {
        let matcher = CategoryMatcher::with_defaults();
        let content = "date,description,amount\nnot-a-date,DEPOSIT,100.00\n";
        assert!(parse_statement("jan.csv", content, &matcher).is_err());
    }
}
