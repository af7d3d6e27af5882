use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use models::{
    BrokerAccount, CashRecord, ClassificationError, ExecutionRank, PositionRecord, Side,
    TradeRecord, COMMISSION_CODE,
};
use regex::Regex;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use utils::OutputKind;

pub const PARSER_NAME: &str = "guangfa";

const DELIMITER: u8 = b'@';

// Trade file columns (trddata), no header row.
mod trade_col {
    pub const SETTLEMENT_DATE: usize = 0;
    pub const TRADE_DATE: usize = 1;
    pub const EXCHANGE: usize = 7;
    pub const ITEM: usize = 8;
    pub const CONTRACT: usize = 9;
    pub const OPEN_CLOSE: usize = 10;
    pub const BUY_QUANTITY: usize = 11;
    pub const SELL_QUANTITY: usize = 12;
    pub const PRICE: usize = 13;
    pub const TIME: usize = 15;
    pub const COMMISSION: usize = 16;
    pub const COUNT: usize = 22;
}

// Cash file columns (cusfund).
mod cash_col {
    pub const CURRENCY: usize = 2;
    pub const CLOSING_BALANCE: usize = 8;
}

// Position file columns (holddata).
mod position_col {
    pub const EXCHANGE: usize = 2;
    pub const ITEM: usize = 3;
    pub const CONTRACT: usize = 4;
    pub const BUY_HOLDING: usize = 5;
    pub const SELL_HOLDING: usize = 6;
    pub const CURRENCY: usize = 7;
}

/// (Item, Exchange) to Bloomberg root and yellow key. Two-letter roots that
/// are a single letter on Bloomberg keep a trailing space.
const TICKER_MAP: [((&str, &str), (&str, &str)); 12] = [
    (("HSI", "HKFE"), ("HI", "Index")),
    (("MHU", "HKFE"), ("HU", "Index")),
    (("SM", "CBOT"), ("SM", "Comdty")),
    (("WH", "CBOT"), ("W ", "Comdty")),
    (("SO", "CBOT"), ("S ", "Comdty")),
    (("HO", "NYMEX"), ("HO", "Comdty")),
    (("RB", "NYMEX"), ("XB", "Comdty")),
    (("CL", "NYMEX"), ("CL", "Comdty")),
    (("BR", "IPE"), ("CO", "Comdty")),
    (("NG", "CME"), ("NG", "Comdty")),
    (("GC", "COMEX"), ("GC", "Comdty")),
    (("AD", "CME"), ("AD", "Curncy")),
];

/// Roots quoted with a two-digit year.
const TWO_DIGIT_YEAR_ROOTS: [&str; 1] = ["NG"];

fn file_name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(trddata|cusfund|holddata)_f(\d{8})\.txt$").expect("file name pattern is valid")
    })
}

/// Report kind of a GuangFa export, from its file name.
pub fn file_kind(file_name: &str) -> Option<OutputKind> {
    let caps = file_name_pattern().captures(file_name)?;
    match &caps[1] {
        "trddata" => Some(OutputKind::Trade),
        "cusfund" => Some(OutputKind::Cash),
        "holddata" => Some(OutputKind::Position),
        _ => None,
    }
}

/// Statement date embedded in the file name, e.g. `8888802200trddata_f20140131.txt`.
pub fn date_from_file_name(file_name: &str) -> Option<NaiveDate> {
    let caps = file_name_pattern().captures(file_name)?;
    NaiveDate::parse_from_str(&caps[2], "%Y%m%d").ok()
}

pub struct GuangFaParser {
    pub account: BrokerAccount,
}

impl Default for GuangFaParser {
    fn default() -> Self {
        Self::new()
    }
}

impl GuangFaParser {
    pub fn new() -> Self {
        Self {
            account: BrokerAccount::new("40006-D", "GF-QUANT"),
        }
    }

    pub fn with_account(account: BrokerAccount) -> Self {
        Self { account }
    }

    pub fn parse_trades<R: Read>(&self, reader: R) -> Result<Vec<TradeRecord>> {
        let mut trades = Vec::new();
        for (index, row) in read_rows(reader)?.into_iter().enumerate() {
            if row.len() < trade_col::COUNT {
                return Err(anyhow!(
                    "Row {} has {} fields, expected {}",
                    index + 1,
                    row.len(),
                    trade_col::COUNT
                ));
            }
            let record = to_trade_record(&row, index)
                .with_context(|| format!("Row {} ({})", index + 1, row[trade_col::CONTRACT]))?;
            trades.push(record);
        }
        tracing::debug!(parser = PARSER_NAME, trades = trades.len(), "parsed trade rows");
        Ok(trades)
    }

    pub fn parse_cash<R: Read>(&self, reader: R, date: NaiveDate) -> Result<Vec<CashRecord>> {
        read_rows(reader)?
            .iter()
            .enumerate()
            .map(|(index, row)| -> Result<CashRecord> {
                let currency = field(row, cash_col::CURRENCY)?.to_string();
                let balance = parse_number(field(row, cash_col::CLOSING_BALANCE)?)
                    .with_context(|| format!("Cash row {}", index + 1))?;
                Ok(CashRecord { date, currency, balance })
            })
            .collect()
    }

    pub fn parse_positions<R: Read>(&self, reader: R, date: NaiveDate) -> Result<Vec<PositionRecord>> {
        read_rows(reader)?
            .iter()
            .enumerate()
            .map(|(index, row)| -> Result<PositionRecord> {
                to_position_record(row, date).with_context(|| format!("Position row {}", index + 1))
            })
            .collect()
    }

    pub fn convert_trade_file(&self, path: &Path, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let reference_date = required_file_date(path)?;
        let trades = self
            .parse_trades(open(path)?)
            .with_context(|| format!("Parsing GuangFa trade file {}", path.display()))?;
        utils::convert_trades(trades, output_dir, &self.account, Some(reference_date))
    }

    pub fn convert_cash_file(&self, path: &Path, output_dir: &Path) -> Result<PathBuf> {
        let date = required_file_date(path)?;
        let records = self
            .parse_cash(open(path)?, date)
            .with_context(|| format!("Parsing GuangFa cash file {}", path.display()))?;
        utils::write_cash_file(&self.account.portfolio, &records, output_dir)
    }

    pub fn convert_position_file(&self, path: &Path, output_dir: &Path) -> Result<PathBuf> {
        let date = required_file_date(path)?;
        let records = self
            .parse_positions(open(path)?, date)
            .with_context(|| format!("Parsing GuangFa position file {}", path.display()))?;
        utils::write_position_file(&self.account.portfolio, &records, output_dir)
    }
}

fn open(path: &Path) -> Result<std::fs::File> {
    std::fs::File::open(path).with_context(|| format!("Cannot open {}", path.display()))
}

fn required_file_date(path: &Path) -> Result<NaiveDate> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(date_from_file_name)
        .ok_or_else(|| anyhow!("No statement date in file name {}", path.display()))
}

/// Reads every `@`-delimited row. Free-text columns may not be UTF-8, so
/// fields are decoded lossily and trimmed.
fn read_rows<R: Read>(reader: R) -> Result<Vec<Vec<String>>> {
    let mut csvr = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(reader);

    let mut rows = Vec::new();
    for rec in csvr.byte_records() {
        let rec = rec?;
        let row: Vec<String> = rec
            .iter()
            .map(|f| String::from_utf8_lossy(f).trim().to_string())
            .collect();
        if row.iter().all(|f| f.is_empty()) {
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}

fn field(row: &[String], index: usize) -> Result<&str> {
    row.get(index)
        .map(|s| s.as_str())
        .ok_or_else(|| anyhow!("Missing column {} in row with {} fields", index + 1, row.len()))
}

/// Numbers may carry thousands separators: `1,414.40`.
fn parse_number(raw: &str) -> Result<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    cleaned
        .parse::<f64>()
        .map_err(|_| anyhow!("Invalid number '{}'", raw))
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| anyhow!("Invalid date '{}': {}", raw, e))
}

fn to_trade_record(row: &[String], index: usize) -> Result<TradeRecord> {
    use trade_col::*;

    let buy = parse_number(&row[BUY_QUANTITY])?;
    let sell = parse_number(&row[SELL_QUANTITY])?;
    let instrument_id = create_ticker(&row[ITEM], &row[EXCHANGE], &row[CONTRACT])?;
    let side = create_side(&row[OPEN_CLOSE], buy, sell)?;

    let trade_date = parse_date(&row[TRADE_DATE])?;
    let timestamp = NaiveDateTime::parse_from_str(
        &format!("{} {}", row[TRADE_DATE], row[TIME]),
        "%Y-%m-%d %H:%M:%S",
    )
    .map_err(|e| anyhow!("Invalid trade time '{} {}': {}", row[TRADE_DATE], row[TIME], e))?;

    let record = TradeRecord {
        instrument_id,
        side,
        quantity: buy.max(sell),
        price: parse_number(&row[PRICE])?,
        trade_date,
        settlement_date: parse_date(&row[SETTLEMENT_DATE])?,
        commission_code: COMMISSION_CODE.to_string(),
        commission_amount: parse_number(&row[COMMISSION])?,
        execution_rank: ExecutionRank::new(timestamp, index),
    };
    record.validate()?;
    Ok(record)
}

fn to_position_record(row: &[String], date: NaiveDate) -> Result<PositionRecord> {
    use position_col::*;

    let instrument_id = create_ticker(
        field(row, ITEM)?,
        field(row, EXCHANGE)?,
        field(row, CONTRACT)?,
    )?;
    let quantity = parse_number(field(row, BUY_HOLDING)?)? - parse_number(field(row, SELL_HOLDING)?)?;
    Ok(PositionRecord {
        date,
        instrument_id,
        currency: field(row, CURRENCY)?.to_string(),
        quantity,
    })
}

/// Bloomberg futures ticker from item, exchange and a `yymm` contract code
/// such as `SO1405`.
pub fn create_ticker(item: &str, exchange: &str, contract: &str) -> Result<String, ClassificationError> {
    let (prefix, yellow_key) = TICKER_MAP
        .iter()
        .find(|((i, e), _)| *i == item && *e == exchange)
        .map(|(_, target)| *target)
        .ok_or_else(|| ClassificationError::UnknownInstrument(format!("{} on {}", item, exchange)))?;

    let malformed = || ClassificationError::MalformedContract(contract.to_string());
    if contract.len() < 4 || !contract.is_ascii() {
        return Err(malformed());
    }
    let tail = &contract[contract.len() - 4..];
    let year = &tail[..2];
    let month: u32 = tail[2..].parse().map_err(|_| malformed())?;
    let month_code = utils::month_code(month).ok_or_else(malformed)?;
    if !year.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }

    let year_digits = if TWO_DIGIT_YEAR_ROOTS.contains(&prefix) { year } else { &year[1..] };
    Ok(utils::futures_ticker(prefix, month_code, year_digits, yellow_key))
}

/// `O` opens and `L` closes; the non-zero quantity column gives the direction.
fn create_side(open_close: &str, buy: f64, sell: f64) -> Result<Side, ClassificationError> {
    match open_close {
        "O" if buy > 0.0 => Ok(Side::Buy),
        "O" if sell > 0.0 => Ok(Side::Short),
        "L" if buy > 0.0 => Ok(Side::Cover),
        "L" if sell > 0.0 => Ok(Side::Sell),
        _ => Err(ClassificationError::UnknownSide(format!(
            "open/close {} buy {} sell {}",
            open_close, buy, sell
        ))),
    }
}
