use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, NaiveDate};
use models::{BrokerAccount, CashRecord, PositionRecord, TradeRecord};
use std::fs;
use std::path::{Path, PathBuf};

use crate::grouping::{partition_into_groups, sort_chronologically, TradeGroup};

/// Output file kinds, used in file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Trade,
    Cash,
    Position,
}

impl OutputKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputKind::Trade => "trade",
            OutputKind::Cash => "cash",
            OutputKind::Position => "position",
        }
    }
}

/// `{portfolio}_{kind}_{yyyy-mm-dd}{suffix}.csv`, e.g. `40006-B_trade_2018-10-22.csv`.
pub fn output_file_name(portfolio: &str, kind: OutputKind, date: NaiveDate, suffix: &str) -> String {
    format!(
        "{}_{}_{}{}.csv",
        portfolio,
        kind.as_str(),
        date.format("%Y-%m-%d"),
        suffix
    )
}

/// The first group keeps the plain name, later ones get `_part2`, `_part3`, ...
pub fn part_suffix(index: usize) -> String {
    if index == 0 {
        String::new()
    } else {
        format!("_part{}", index + 1)
    }
}

/// Date format of the trade upload: `m/d/yy`, no zero padding on month or day.
pub fn upload_date(date: NaiveDate) -> String {
    format!("{}/{}/{:02}", date.month(), date.day(), date.year().rem_euclid(100))
}

/// Whole numbers are written without a fractional part; the upload rejects
/// futures quantities such as `15.0`.
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Cannot create output directory {}", dir.display()))
}

fn trade_row(account: &BrokerAccount, record: &TradeRecord) -> Vec<String> {
    vec![
        account.portfolio.clone(),
        record.instrument_id.clone(),
        account.broker_code.clone(),
        record.side.as_str().to_string(),
        format_number(record.quantity),
        format_number(record.price),
        upload_date(record.trade_date),
        upload_date(record.settlement_date),
        record.commission_code.clone(),
        format_number(record.commission_amount),
    ]
}

/// Deletes upload files for `reference_date` whose part number (the plain
/// file counts as part 1) is above `keep`, so a re-conversion into fewer
/// groups leaves no stale parts behind.
fn remove_stale_parts(
    output_dir: &Path,
    portfolio: &str,
    reference_date: NaiveDate,
    keep: usize,
) -> Result<()> {
    let base = output_file_name(portfolio, OutputKind::Trade, reference_date, "");
    let Some(stem) = base.strip_suffix(".csv") else {
        return Ok(());
    };
    let part_prefix = format!("{}_part", stem);

    let entries = fs::read_dir(output_dir)
        .with_context(|| format!("Cannot read output directory {}", output_dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let part = if name == base {
            Some(1)
        } else {
            name.strip_prefix(&part_prefix)
                .and_then(|rest| rest.strip_suffix(".csv"))
                .and_then(|n| n.parse::<usize>().ok())
        };
        if part.is_some_and(|n| n > keep) {
            fs::remove_file(&path)
                .with_context(|| format!("Cannot remove stale upload file {}", path.display()))?;
            tracing::info!(file = %path.display(), "removed stale trade upload file");
        }
    }
    Ok(())
}

/// Writes one headerless trade upload file per group and returns the paths
/// in group order. Upload files for the same date left over from an earlier
/// conversion with more groups are removed first.
///
/// Columns: Account, BloombergTicker, Broker, Side, Quantity, Price,
/// TradeDate, SettlementDate, Commission Code 1, Commission Amt 1.
pub fn write_trade_files(
    groups: &[TradeGroup],
    output_dir: &Path,
    account: &BrokerAccount,
    reference_date: NaiveDate,
) -> Result<Vec<PathBuf>> {
    ensure_dir(output_dir)?;
    remove_stale_parts(output_dir, &account.portfolio, reference_date, groups.len())?;

    let mut written = Vec::with_capacity(groups.len());
    for (index, group) in groups.iter().enumerate() {
        let path = output_dir.join(output_file_name(
            &account.portfolio,
            OutputKind::Trade,
            reference_date,
            &part_suffix(index),
        ));

        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&path)
            .with_context(|| format!("Cannot create {}", path.display()))?;
        for record in group {
            wtr.write_record(trade_row(account, record))?;
        }
        wtr.flush()
            .with_context(|| format!("Cannot write {}", path.display()))?;

        tracing::info!(file = %path.display(), trades = group.len(), "wrote trade upload file");
        written.push(path);
    }

    Ok(written)
}

/// Sorts, partitions and writes a broker file's trades in one go.
///
/// Without a `reference_date` the files are named after the trade date of
/// the earliest sorted trade. No trades means no files.
pub fn convert_trades(
    records: Vec<TradeRecord>,
    output_dir: &Path,
    account: &BrokerAccount,
    reference_date: Option<NaiveDate>,
) -> Result<Vec<PathBuf>> {
    let sorted = sort_chronologically(records);
    let Some(date) = reference_date.or_else(|| sorted.first().map(|r| r.trade_date)) else {
        return Ok(Vec::new());
    };
    let groups = partition_into_groups(sorted);
    write_trade_files(&groups, output_dir, account, date)
}

/// Writes the cash reconciliation file (`Portfolio,Date,Currency,Balance`).
pub fn write_cash_file(portfolio: &str, records: &[CashRecord], output_dir: &Path) -> Result<PathBuf> {
    let first = records
        .first()
        .ok_or_else(|| anyhow!("No cash records to write for {}", portfolio))?;

    ensure_dir(output_dir)?;
    let path = output_dir.join(output_file_name(portfolio, OutputKind::Cash, first.date, ""));

    let mut wtr = csv::Writer::from_path(&path)
        .with_context(|| format!("Cannot create {}", path.display()))?;
    wtr.write_record(["Portfolio", "Date", "Currency", "Balance"])?;
    for r in records {
        wtr.write_record([
            portfolio.to_string(),
            r.date.format("%Y-%m-%d").to_string(),
            r.currency.clone(),
            format_number(r.balance),
        ])?;
    }
    wtr.flush()
        .with_context(|| format!("Cannot write {}", path.display()))?;

    tracing::info!(file = %path.display(), rows = records.len(), "wrote cash file");
    Ok(path)
}

/// Geneva identifies equities without the ` Equity` yellow key.
pub fn investment_id(ticker: &str) -> &str {
    ticker.strip_suffix(" Equity").unwrap_or(ticker)
}

/// Writes the position reconciliation file
/// (`Portfolio,Date,Investment,Currency,Quantity`).
pub fn write_position_file(
    portfolio: &str,
    records: &[PositionRecord],
    output_dir: &Path,
) -> Result<PathBuf> {
    let first = records
        .first()
        .ok_or_else(|| anyhow!("No position records to write for {}", portfolio))?;

    ensure_dir(output_dir)?;
    let path = output_dir.join(output_file_name(portfolio, OutputKind::Position, first.date, ""));

    let mut wtr = csv::Writer::from_path(&path)
        .with_context(|| format!("Cannot create {}", path.display()))?;
    wtr.write_record(["Portfolio", "Date", "Investment", "Currency", "Quantity"])?;
    for r in records {
        wtr.write_record([
            portfolio.to_string(),
            r.date.format("%Y-%m-%d").to_string(),
            investment_id(&r.instrument_id).to_string(),
            r.currency.clone(),
            format_number(r.quantity),
        ])?;
    }
    wtr.flush()
        .with_context(|| format!("Cannot write {}", path.display()))?;

    tracing::info!(file = %path.display(), rows = records.len(), "wrote position file");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{ExecutionRank, Side, COMMISSION_CODE};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn trade(ticker: &str, side: Side, quantity: f64, index: usize) -> TradeRecord {
        let date = day(2014, 1, 31);
        TradeRecord {
            instrument_id: ticker.to_string(),
            side,
            quantity,
            price: 1262.0,
            trade_date: date,
            settlement_date: date,
            commission_code: COMMISSION_CODE.to_string(),
            commission_amount: 7.5,
            execution_rank: ExecutionRank::new(date.and_hms_opt(22, 0, 0).unwrap(), index),
        }
    }

    #[test]
    fn test_file_names_and_suffixes() {
        assert_eq!(
            output_file_name("40006-D", OutputKind::Trade, day(2014, 1, 31), &part_suffix(0)),
            "40006-D_trade_2014-01-31.csv"
        );
        assert_eq!(part_suffix(1), "_part2");
        assert_eq!(part_suffix(3), "_part4");
        assert_eq!(
            output_file_name("TEST6C", OutputKind::Position, day(2018, 10, 26), ""),
            "TEST6C_position_2018-10-26.csv"
        );
    }

    #[test]
    fn test_upload_date_and_numbers() {
        assert_eq!(upload_date(day(2018, 10, 5)), "10/5/18");
        assert_eq!(upload_date(day(2009, 1, 31)), "1/31/09");
        assert_eq!(format_number(15.0), "15");
        assert_eq!(format_number(3.84), "3.84");
        assert_eq!(format_number(-4.0), "-4");
    }

    #[test]
    fn test_investment_strips_equity_key() {
        assert_eq!(investment_id("SPY US Equity"), "SPY US");
        assert_eq!(investment_id("S H9 Comdty"), "S H9 Comdty");
    }

    #[test]
    fn test_write_trade_files_one_per_group() {
        let dir = tempfile::tempdir().unwrap();
        let account = BrokerAccount::new("40006-D", "GF-QUANT");
        let groups = partition_into_groups(sort_chronologically(vec![
            trade("S K4 Comdty", Side::Short, 2.0, 0),
            trade("S K4 Comdty", Side::Cover, 1.0, 1),
        ]));

        let paths = write_trade_files(&groups, dir.path(), &account, day(2014, 1, 31)).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("40006-D_trade_2014-01-31.csv"));
        assert!(paths[1].ends_with("40006-D_trade_2014-01-31_part2.csv"));

        let first = fs::read_to_string(&paths[0]).unwrap();
        assert_eq!(
            first.trim_end(),
            "40006-D,S K4 Comdty,GF-QUANT,Short,2,1262,1/31/14,1/31/14,Broker Commission,7.5"
        );
        let second = fs::read_to_string(&paths[1]).unwrap();
        assert!(second.starts_with("40006-D,S K4 Comdty,GF-QUANT,Cover,1,"));
    }

    #[test]
    fn test_write_trade_files_without_groups() {
        let dir = tempfile::tempdir().unwrap();
        let account = BrokerAccount::new("40006-B", "IB-QUANT");
        let paths = write_trade_files(&[], dir.path(), &account, day(2018, 10, 22)).unwrap();
        assert!(paths.is_empty());
    }

    #[test]
    fn test_rewrite_with_fewer_groups_removes_old_parts() {
        let dir = tempfile::tempdir().unwrap();
        let account = BrokerAccount::new("40006-D", "GF-QUANT");
        let date = day(2014, 1, 31);
        let three = partition_into_groups(sort_chronologically(vec![
            trade("S K4 Comdty", Side::Short, 2.0, 0),
            trade("S K4 Comdty", Side::Cover, 1.0, 1),
            trade("S K4 Comdty", Side::Short, 1.0, 2),
        ]));
        assert_eq!(write_trade_files(&three, dir.path(), &account, date).unwrap().len(), 3);
        let other_day = dir.path().join("40006-D_trade_2014-02-03_part2.csv");
        let other_portfolio = dir.path().join("40006-B_trade_2014-01-31_part2.csv");
        fs::write(&other_day, "").unwrap();
        fs::write(&other_portfolio, "").unwrap();

        let one = partition_into_groups(vec![trade("S K4 Comdty", Side::Short, 2.0, 0)]);
        let paths = write_trade_files(&one, dir.path(), &account, date).unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].exists());
        assert!(!dir.path().join("40006-D_trade_2014-01-31_part2.csv").exists());
        assert!(!dir.path().join("40006-D_trade_2014-01-31_part3.csv").exists());
        assert!(other_day.exists());
        assert!(other_portfolio.exists());

        write_trade_files(&[], dir.path(), &account, date).unwrap();
        assert!(!paths[0].exists());
    }

    #[test]
    fn test_convert_trades_names_after_earliest_trade() {
        let dir = tempfile::tempdir().unwrap();
        let account = BrokerAccount::new("TEST6C", "HGNH-QUANT");
        let mut late = trade("HIZ8 Index", Side::Buy, 1.0, 0);
        late.trade_date = day(2018, 10, 26);
        late.execution_rank.timestamp = day(2018, 10, 26).and_hms_opt(9, 30, 0).unwrap();
        let mut early = trade("HIZ8 Index", Side::Sell, 1.0, 1);
        early.trade_date = day(2018, 10, 25);
        early.execution_rank.timestamp = day(2018, 10, 25).and_hms_opt(14, 0, 0).unwrap();

        let paths = convert_trades(vec![late, early], dir.path(), &account, None).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("TEST6C_trade_2018-10-25.csv"));
        let first = fs::read_to_string(&paths[0]).unwrap();
        assert!(first.contains(",Sell,"));

        assert!(convert_trades(Vec::new(), dir.path(), &account, None).unwrap().is_empty());
    }

    #[test]
    fn test_write_cash_and_position_files() {
        let dir = tempfile::tempdir().unwrap();
        let date = day(2014, 1, 29);

        let cash = vec![
            CashRecord { date, currency: "HKD".to_string(), balance: 0.0 },
            CashRecord { date, currency: "USD".to_string(), balance: 1026915.92 },
        ];
        let cash_path = write_cash_file("40006-D", &cash, dir.path()).unwrap();
        assert!(cash_path.ends_with("40006-D_cash_2014-01-29.csv"));
        let text = fs::read_to_string(&cash_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Portfolio,Date,Currency,Balance");
        assert_eq!(lines[2], "40006-D,2014-01-29,USD,1026915.92");

        let positions = vec![PositionRecord {
            date,
            instrument_id: "SPY US Equity".to_string(),
            currency: "USD".to_string(),
            quantity: 500.0,
        }];
        let pos_path = write_position_file("40006-D", &positions, dir.path()).unwrap();
        let text = fs::read_to_string(&pos_path).unwrap();
        assert_eq!(text.lines().nth(1), Some("40006-D,2014-01-29,SPY US,USD,500"));
    }

    #[test]
    fn test_empty_cash_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(write_cash_file("40006-D", &[], dir.path()).is_err());
        assert!(write_position_file("40006-D", &[], dir.path()).is_err());
    }
}
