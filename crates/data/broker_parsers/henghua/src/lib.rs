use anyhow::{anyhow, bail, Context, Result};
use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use chrono::{Duration, NaiveDate, NaiveTime};
use models::{BrokerAccount, CashRecord, ClassificationError, ExecutionRank, Side, TradeRecord};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use utils::OutputKind;

pub const PARSER_NAME: &str = "henghua";

const SECONDS_PER_DAY: f64 = 86_400.0;

mod header {
    pub const CONTRACT: &str = "Contract";
    pub const BUY_SELL: &str = "B/S";
    pub const OPEN_CLOSE: &str = "O/C";
    pub const LOTS: &str = "Lots";
    pub const TRADE_PRICE: &str = "Trade Price";
    pub const TRADE_DATE: &str = "Trade Date";
    pub const SETTLEMENT_DATE: &str = "Settlement Date";
    pub const COMMISSION: &str = "Commission";
    pub const TRADE_TIME: &str = "Trade Time";

    pub const CURRENCY: &str = "Currency";
    pub const BALANCE: &str = "Balance";
    pub const DATE: &str = "Date";
}

fn file_date_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{8})").expect("date pattern is valid"))
}

/// HengHua exports are workbooks named like `Trade File 20190117.xlsx` and
/// `Cash 20190117.xlsx`.
pub fn file_kind(file_name: &str) -> Option<OutputKind> {
    let lower = file_name.to_lowercase();
    if !lower.ends_with(".xlsx") {
        return None;
    }
    if lower.contains("trade") {
        Some(OutputKind::Trade)
    } else if lower.contains("cash") {
        Some(OutputKind::Cash)
    } else {
        None
    }
}

pub fn date_from_file_name(file_name: &str) -> Option<NaiveDate> {
    let caps = file_date_pattern().captures(file_name)?;
    NaiveDate::parse_from_str(&caps[1], "%Y%m%d").ok()
}

pub struct HengHuaParser {
    pub account: BrokerAccount,
}

impl Default for HengHuaParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HengHuaParser {
    pub fn new() -> Self {
        Self {
            account: BrokerAccount::new("TEST6C", "HGNH-QUANT"),
        }
    }

    pub fn with_account(account: BrokerAccount) -> Self {
        Self { account }
    }

    pub fn parse_trade_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<TradeRecord>> {
        let range = first_sheet(path.as_ref())?;
        parse_trade_range(&range)
            .with_context(|| format!("Parsing HengHua trade file {}", path.as_ref().display()))
    }

    /// Upload files are named after the trade date of the earliest trade.
    pub fn convert_trade_file(&self, path: &Path, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let trades = self.parse_trade_file(path)?;
        utils::convert_trades(trades, output_dir, &self.account, None)
    }

    pub fn parse_cash_file<P: AsRef<Path>>(&self, path: P, as_of: NaiveDate) -> Result<Vec<CashRecord>> {
        let range = first_sheet(path.as_ref())?;
        parse_cash_range(&range, as_of)
            .with_context(|| format!("Parsing HengHua cash file {}", path.as_ref().display()))
    }

    pub fn convert_cash_file(&self, path: &Path, output_dir: &Path, as_of: NaiveDate) -> Result<PathBuf> {
        let records = self.parse_cash_file(path, as_of)?;
        utils::write_cash_file(&self.account.portfolio, &records, output_dir)
    }
}

fn first_sheet(path: &Path) -> Result<Range<Data>> {
    let mut workbook: Xlsx<_> = open_workbook(path)
        .with_context(|| format!("Failed to open Excel file: {}", path.display()))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .ok_or_else(|| anyhow!("No sheets found in {}", path.display()))?
        .clone();

    workbook
        .worksheet_range(&sheet_name)
        .with_context(|| format!("Failed to read sheet '{}' of {}", sheet_name, path.display()))
}

/// Column positions by trimmed header text.
struct Columns(HashMap<String, usize>);

impl Columns {
    fn from_row(row: &[Data]) -> Self {
        let mut idx = HashMap::new();
        for (i, cell) in row.iter().enumerate() {
            let name = cell.to_string().trim().to_string();
            if !name.is_empty() {
                idx.entry(name).or_insert(i);
            }
        }
        Self(idx)
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.0.get(name).copied()
    }

    fn require(&self, name: &str) -> Result<usize> {
        self.find(name).ok_or_else(|| anyhow!("Missing column '{}'", name))
    }
}

fn is_blank(row: &[Data]) -> bool {
    row.iter().all(|cell| match cell {
        Data::Empty => true,
        Data::String(s) => s.trim().is_empty(),
        _ => false,
    })
}

/// Trades from the first sheet of a trade workbook; row 0 is the header.
pub fn parse_trade_range(range: &Range<Data>) -> Result<Vec<TradeRecord>> {
    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok(Vec::new());
    };
    let cols = Columns::from_row(header_row);

    let contract = cols.require(header::CONTRACT)?;
    let buy_sell = cols.require(header::BUY_SELL)?;
    let open_close = cols.require(header::OPEN_CLOSE)?;
    let lots = cols.require(header::LOTS)?;
    let price = cols.require(header::TRADE_PRICE)?;
    let trade_date = cols.require(header::TRADE_DATE)?;
    let settlement_date = cols.require(header::SETTLEMENT_DATE)?;
    let commission = cols.find(header::COMMISSION);
    let trade_time = cols.require(header::TRADE_TIME)?;

    let mut trades = Vec::new();
    for (index, row) in rows.enumerate() {
        if is_blank(row) {
            continue;
        }
        let line = index + 2;

        let side = create_side(&string_cell(row, buy_sell), &string_cell(row, open_close))
            .with_context(|| format!("Row {}", line))?;
        let date = date_cell(row, trade_date).with_context(|| format!("Row {}: trade date", line))?;
        let time = time_cell(row, trade_time).with_context(|| format!("Row {}: trade time", line))?;

        let record = TradeRecord {
            instrument_id: string_cell(row, contract),
            side,
            quantity: number_cell(row, lots).with_context(|| format!("Row {}: lots", line))?,
            price: number_cell(row, price).with_context(|| format!("Row {}: trade price", line))?,
            trade_date: date,
            settlement_date: date_cell(row, settlement_date)
                .with_context(|| format!("Row {}: settlement date", line))?,
            commission_code: models::COMMISSION_CODE.to_string(),
            commission_amount: match commission {
                Some(col) if !matches!(row.get(col), None | Some(Data::Empty)) => number_cell(row, col)
                    .with_context(|| format!("Row {}: commission", line))?,
                _ => 0.0,
            },
            execution_rank: ExecutionRank::new(date.and_time(time), index),
        };
        record.validate().with_context(|| format!("Row {}", line))?;
        trades.push(record);
    }

    tracing::debug!(parser = PARSER_NAME, trades = trades.len(), "parsed trade rows");
    Ok(trades)
}

/// Cash balances. The header is the first row with both `Currency` and
/// `Balance`; rows without a currency are totals or notes and are skipped.
pub fn parse_cash_range(range: &Range<Data>, as_of: NaiveDate) -> Result<Vec<CashRecord>> {
    let rows: Vec<&[Data]> = range.rows().collect();
    let (header_idx, cols) = rows
        .iter()
        .take(20)
        .enumerate()
        .map(|(i, row)| (i, Columns::from_row(row)))
        .find(|(_, cols)| cols.find(header::CURRENCY).is_some() && cols.find(header::BALANCE).is_some())
        .ok_or_else(|| anyhow!("No header row with '{}' and '{}'", header::CURRENCY, header::BALANCE))?;

    let currency = cols.require(header::CURRENCY)?;
    let balance = cols.require(header::BALANCE)?;
    let date = cols.find(header::DATE);

    let mut records = Vec::new();
    for (idx, row) in rows.iter().enumerate().skip(header_idx + 1) {
        let code = string_cell(row, currency);
        if code.is_empty() {
            continue;
        }
        let line = idx + 1;
        let record_date = match date {
            Some(col) if !matches!(row.get(col), None | Some(Data::Empty)) => {
                date_cell(row, col).with_context(|| format!("Row {}: date", line))?
            }
            _ => as_of,
        };
        records.push(CashRecord {
            date: record_date,
            currency: code,
            balance: number_cell(row, balance).with_context(|| format!("Row {}: balance", line))?,
        });
    }
    Ok(records)
}

fn create_side(buy_sell: &str, open_close: &str) -> Result<Side, ClassificationError> {
    match (buy_sell, open_close) {
        ("B", "O") => Ok(Side::Buy),
        ("B", "C") => Ok(Side::Cover),
        ("S", "O") => Ok(Side::Short),
        ("S", "C") => Ok(Side::Sell),
        _ => Err(ClassificationError::UnknownSide(format!("B/S {} O/C {}", buy_sell, open_close))),
    }
}

fn string_cell(row: &[Data], col: usize) -> String {
    match row.get(col) {
        None | Some(Data::Empty) => String::new(),
        Some(Data::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string().trim().to_string(),
    }
}

fn number_cell(row: &[Data], col: usize) -> Result<f64> {
    match row.get(col) {
        Some(Data::Float(f)) => Ok(*f),
        Some(Data::Int(i)) => Ok(*i as f64),
        Some(Data::String(s)) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            cleaned
                .parse::<f64>()
                .with_context(|| format!("Failed to parse number: {}", s))
        }
        other => Err(anyhow!("Unsupported number cell: {:?}", other)),
    }
}

/// Largest serial Excel can display (9999-12-31).
const MAX_EXCEL_SERIAL: f64 = 2_958_465.0;

fn excel_serial_to_date(serial: f64) -> Result<NaiveDate> {
    if !serial.is_finite() || !(0.0..=MAX_EXCEL_SERIAL).contains(&serial) {
        bail!("Date serial out of range: {}", serial);
    }
    // Excel serial dates count days from 1899-12-30
    let base = NaiveDate::from_ymd_opt(1899, 12, 30).ok_or_else(|| anyhow!("Invalid base date"))?;
    let days = Duration::try_days(serial.floor() as i64)
        .ok_or_else(|| anyhow!("Date serial out of range: {}", serial))?;
    base.checked_add_signed(days)
        .ok_or_else(|| anyhow!("Date out of range: {}", serial))
}

fn date_cell(row: &[Data], col: usize) -> Result<NaiveDate> {
    match row.get(col) {
        Some(Data::DateTime(dt)) => excel_serial_to_date(dt.as_f64()),
        Some(Data::Float(f)) => excel_serial_to_date(*f),
        Some(Data::Int(i)) => excel_serial_to_date(*i as f64),
        Some(Data::DateTimeIso(s)) => {
            let day = s.get(..10).unwrap_or(s.as_str());
            NaiveDate::parse_from_str(day, "%Y-%m-%d")
                .with_context(|| format!("Could not parse date: {}", s))
        }
        Some(Data::String(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("Could not parse date: {}", s)),
        other => Err(anyhow!("Unsupported date cell: {:?}", other)),
    }
}

fn fraction_to_time(value: f64) -> Result<NaiveTime> {
    if !value.is_finite() {
        bail!("Invalid time fraction: {}", value);
    }
    let secs = (value.fract() * SECONDS_PER_DAY).round() as u32 % 86_400;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)
        .ok_or_else(|| anyhow!("Invalid time fraction: {}", value))
}

fn parse_time_string(s: &str) -> Result<NaiveTime> {
    let s = s.trim();
    let clock = s.rsplit('T').next().unwrap_or(s);
    NaiveTime::parse_from_str(clock, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(clock, "%H:%M"))
        .with_context(|| format!("Could not parse time: {}", s))
}

/// Trade time as text (`HH:MM:SS`) or as an Excel day fraction.
fn time_cell(row: &[Data], col: usize) -> Result<NaiveTime> {
    match row.get(col) {
        Some(Data::DateTime(dt)) => fraction_to_time(dt.as_f64()),
        Some(Data::Float(f)) => fraction_to_time(*f),
        Some(Data::Int(_)) => Ok(NaiveTime::MIN),
        Some(Data::String(s)) | Some(Data::DateTimeIso(s)) => parse_time_string(s),
        other => Err(anyhow!("Unsupported time cell: {:?}", other)),
    }
}
