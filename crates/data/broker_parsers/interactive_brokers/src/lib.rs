use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use models::{BrokerAccount, ClassificationError, ExecutionRank, Side, TradeRecord, COMMISSION_CODE};
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};

pub const PARSER_NAME: &str = "ibkr";

/// IB flex-query underlying symbol to Bloomberg root, all quoted as `Index`.
const UNDERLYING_ROOTS: [(&str, &str); 6] = [
    ("VIX", "VX"),
    ("HSI", "HI"),
    ("MHI", "HU"),
    ("DAX", "GX"),
    ("ES", "ES"),
    ("NQ", "NQ"),
];

const YELLOW_KEY: &str = "Index";

/// One row of the `Trades` flex query. Optional columns may be missing from
/// the header altogether.
#[derive(Debug, Deserialize)]
struct FlexTradeRow {
    #[serde(rename = "AssetClass")]
    asset_class: String,
    #[serde(rename = "Symbol", default)]
    symbol: String,
    #[serde(rename = "Description")]
    description: String,
    #[serde(rename = "UnderlyingSymbol")]
    underlying_symbol: String,
    #[serde(rename = "Buy/Sell")]
    buy_sell: String,
    #[serde(rename = "Open/CloseIndicator", default)]
    open_close: String,
    #[serde(rename = "Quantity")]
    quantity: f64,
    #[serde(rename = "TradePrice")]
    trade_price: f64,
    #[serde(rename = "TradeDate")]
    trade_date: String,
    #[serde(rename = "DateTime", default)]
    date_time: Option<String>,
    #[serde(rename = "IBCommission", default)]
    ib_commission: Option<f64>,
    #[serde(rename = "SettleDateTarget", default)]
    settle_date_target: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedIbkr {
    pub trades: Vec<TradeRecord>,
    /// Latest trade date in the file; names the upload files.
    pub reference_date: Option<NaiveDate>,
}

pub struct IbkrTradeParser {
    pub account: BrokerAccount,
}

impl Default for IbkrTradeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl IbkrTradeParser {
    pub fn new() -> Self {
        Self {
            account: BrokerAccount::new("40006-B", "IB-QUANT"),
        }
    }

    pub fn with_account(account: BrokerAccount) -> Self {
        Self { account }
    }

    pub fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<ParsedIbkr> {
        let file = std::fs::File::open(path.as_ref())
            .with_context(|| format!("Cannot open {}", path.as_ref().display()))?;
        self.parse_reader(file)
            .with_context(|| format!("Parsing IB trade file {}", path.as_ref().display()))
    }

    pub fn parse_reader<R: Read>(&self, reader: R) -> Result<ParsedIbkr> {
        let mut csvr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut trades = Vec::new();
        for (index, row) in csvr.deserialize::<FlexTradeRow>().enumerate() {
            let row = row.with_context(|| format!("Malformed row {}", index + 1))?;
            let record = to_trade_record(&row, index)
                .with_context(|| format!("Row {} ({})", index + 1, row.description))?;
            trades.push(record);
        }

        let reference_date = trades.iter().map(|t| t.trade_date).max();
        tracing::debug!(parser = PARSER_NAME, trades = trades.len(), "parsed trade rows");
        Ok(ParsedIbkr { trades, reference_date })
    }

    /// Parses the file and writes one upload file per box-position group.
    pub fn convert_trade_file(&self, path: &Path, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let parsed = self.parse_file(path)?;
        utils::convert_trades(parsed.trades, output_dir, &self.account, parsed.reference_date)
    }
}

/// IB trade exports carry `Trades_Activity` in the name.
pub fn is_trade_file(file_name: &str) -> bool {
    file_name.contains("Trades_Activity") && has_extension(file_name, "csv")
}

fn has_extension(file_name: &str, ext: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn to_trade_record(row: &FlexTradeRow, index: usize) -> Result<TradeRecord> {
    let instrument_id = create_ticker(row)?;
    let side = create_side(&row.buy_sell, &row.open_close)?;
    let trade_date = parse_ib_date(&row.trade_date)?;
    let settlement_date = match row.settle_date_target.as_deref() {
        Some(s) if !s.is_empty() => parse_ib_date(s)?,
        _ => trade_date,
    };
    let timestamp = match row.date_time.as_deref() {
        Some(s) if !s.is_empty() => parse_ib_datetime(s)?,
        _ => trade_date.and_time(chrono::NaiveTime::MIN),
    };

    let record = TradeRecord {
        instrument_id,
        side,
        quantity: row.quantity.abs(),
        price: row.trade_price,
        trade_date,
        settlement_date,
        commission_code: COMMISSION_CODE.to_string(),
        commission_amount: row.ib_commission.unwrap_or(0.0).abs(),
        execution_rank: ExecutionRank::new(timestamp, index),
    };
    record.validate()?;
    Ok(record)
}

/// Futures ticker from the underlying and the expiry in the description,
/// e.g. `HSI 28DEC18` on underlying `HSI` gives `HIZ8 Index`.
fn create_ticker(row: &FlexTradeRow) -> Result<String, ClassificationError> {
    if row.asset_class != "FUT" {
        return Err(ClassificationError::UnsupportedAssetClass(row.asset_class.clone()));
    }

    let root = UNDERLYING_ROOTS
        .iter()
        .find(|(underlying, _)| *underlying == row.underlying_symbol)
        .map(|(_, root)| *root)
        .ok_or_else(|| ClassificationError::UnknownInstrument(row.underlying_symbol.clone()))?;

    let (month, year) = expiry_month_year(&row.description)
        .ok_or_else(|| ClassificationError::MalformedContract(row.description.clone()))?;
    let month_code = utils::month_code_from_abbrev(month)
        .ok_or_else(|| ClassificationError::MalformedContract(row.description.clone()))?;

    let ticker = utils::futures_ticker(root, month_code, &year[1..], YELLOW_KEY);
    if !row.symbol.is_empty() && !ticker.starts_with(row.symbol.as_str()) {
        tracing::debug!(symbol = %row.symbol, %ticker, "IB symbol differs from Bloomberg ticker");
    }
    Ok(ticker)
}

/// `("DEC", "18")` from `HSI 28DEC18`.
fn expiry_month_year(description: &str) -> Option<(&str, &str)> {
    let expiry = description.split_whitespace().nth(1)?;
    if expiry.len() < 5 || !expiry.is_ascii() {
        return None;
    }
    let month = &expiry[expiry.len() - 5..expiry.len() - 2];
    let year = &expiry[expiry.len() - 2..];
    if !year.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((month, year))
}

fn create_side(buy_sell: &str, open_close: &str) -> Result<Side, ClassificationError> {
    match (buy_sell.to_ascii_uppercase().as_str(), open_close.to_ascii_uppercase().as_str()) {
        ("BUY", "O") => Ok(Side::Buy),
        ("BUY", "C") => Ok(Side::Cover),
        ("SELL", "O") => Ok(Side::Short),
        ("SELL", "C") => Ok(Side::Sell),
        _ => Err(ClassificationError::UnknownSide(format!("{}/{}", buy_sell, open_close))),
    }
}

fn parse_ib_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y%m%d").map_err(|e| anyhow!("Invalid IB date '{}': {}", s, e))
}

/// `yyyymmdd;HHMMSS`, the flex-query default; a space separator is accepted too.
fn parse_ib_datetime(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y%m%d;%H%M%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y%m%d %H%M%S"))
        .map_err(|e| anyhow!("Invalid IB timestamp '{}': {}", s, e))
}
