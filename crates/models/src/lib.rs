use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Commission code written next to every broker commission amount.
pub const COMMISSION_CODE: &str = "Broker Commission";

// Settings models
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
	#[default]
	Pretty,
	Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailSettings {
	#[serde(default)]
	pub enabled: bool,
	#[serde(default)]
	pub from: String,
	#[serde(default)]
	pub to: Vec<String>,
	#[serde(default = "default_subject_prefix")]
	pub subject_prefix: String,
	#[serde(default = "default_outbox_dir")]
	pub outbox_dir: String,
}

impl Default for MailSettings {
	fn default() -> Self {
		Self {
			enabled: false,
			from: String::new(),
			to: Vec::new(),
			subject_prefix: default_subject_prefix(),
			outbox_dir: default_outbox_dir(),
		}
	}
}

/// Account and broker codes stamped on every output row for one broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerAccount {
	pub portfolio: String,
	pub broker_code: String,
}

impl BrokerAccount {
	pub fn new(portfolio: impl Into<String>, broker_code: impl Into<String>) -> Self {
		Self {
			portfolio: portfolio.into(),
			broker_code: broker_code.into(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSettings {
	#[serde(default = "default_ib_account")]
	pub interactive_brokers: BrokerAccount,
	#[serde(default = "default_gf_account")]
	pub guangfa: BrokerAccount,
	#[serde(default = "default_hgnh_account")]
	pub henghua: BrokerAccount,
}

impl Default for BrokerSettings {
	fn default() -> Self {
		Self {
			interactive_brokers: default_ib_account(),
			guangfa: default_gf_account(),
			henghua: default_hgnh_account(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
	/// Directory polled for broker exports. Empty means the current directory.
	#[serde(default)]
	pub input_dir: String,
	#[serde(default = "default_output_dir")]
	pub output_dir: String,
	/// Tracking table file, or a directory holding `tracking.json`.
	#[serde(default = "default_tracking_db")]
	pub tracking_db: String,
	#[serde(default = "default_poll_interval")]
	pub poll_interval_secs: u64,
	#[serde(default)]
	pub log_format: LogFormat,
	#[serde(default)]
	pub mail: MailSettings,
	#[serde(default)]
	pub brokers: BrokerSettings,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			input_dir: String::new(),
			output_dir: default_output_dir(),
			tracking_db: default_tracking_db(),
			poll_interval_secs: default_poll_interval(),
			log_format: LogFormat::default(),
			mail: MailSettings::default(),
			brokers: BrokerSettings::default(),
		}
	}
}

fn default_output_dir() -> String { "output".to_string() }
fn default_tracking_db() -> String { "database".to_string() }
fn default_poll_interval() -> u64 { 300 }
fn default_subject_prefix() -> String { "[trade-converter]".to_string() }
fn default_outbox_dir() -> String { "outbox".to_string() }
fn default_ib_account() -> BrokerAccount { BrokerAccount::new("40006-B", "IB-QUANT") }
fn default_gf_account() -> BrokerAccount { BrokerAccount::new("40006-D", "GF-QUANT") }
fn default_hgnh_account() -> BrokerAccount { BrokerAccount::new("TEST6C", "HGNH-QUANT") }

// Classification errors raised by the broker normalizers
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassificationError {
	#[error("cannot classify trade side from {0}")]
	UnknownSide(String),
	#[error("no ticker mapping for {0}")]
	UnknownInstrument(String),
	#[error("unsupported asset class: {0}")]
	UnsupportedAssetClass(String),
	#[error("malformed contract: {0}")]
	MalformedContract(String),
	#[error("trade record has no instrument id")]
	MissingInstrumentId,
	#[error("invalid quantity {0} for {1}")]
	InvalidQuantity(f64, String),
}

// Trade models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
	Long,
	Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
	Buy,
	Cover,
	Short,
	Sell,
}

impl Side {
	/// Buy and Cover trade in the long direction, Short and Sell in the short one.
	pub fn direction(self) -> Direction {
		match self {
			Side::Buy | Side::Cover => Direction::Long,
			Side::Short | Side::Sell => Direction::Short,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Side::Buy => "Buy",
			Side::Cover => "Cover",
			Side::Short => "Short",
			Side::Sell => "Sell",
		}
	}
}

impl fmt::Display for Side {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Side {
	type Err = ClassificationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"buy" => Ok(Side::Buy),
			"cover" => Ok(Side::Cover),
			"short" => Ok(Side::Short),
			"sell" => Ok(Side::Sell),
			_ => Err(ClassificationError::UnknownSide(s.to_string())),
		}
	}
}

/// Sort key of a trade: execution time, ties broken by position in the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExecutionRank {
	pub timestamp: NaiveDateTime,
	pub original_index: usize,
}

impl ExecutionRank {
	pub fn new(timestamp: NaiveDateTime, original_index: usize) -> Self {
		Self { timestamp, original_index }
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
	pub instrument_id: String,
	pub side: Side,
	pub quantity: f64,
	pub price: f64,
	pub trade_date: NaiveDate,
	pub settlement_date: NaiveDate,
	pub commission_code: String,
	pub commission_amount: f64,
	pub execution_rank: ExecutionRank,
}

impl TradeRecord {
	pub fn direction(&self) -> Direction {
		self.side.direction()
	}

	/// Checks what the grouping code takes for granted.
	pub fn validate(&self) -> Result<(), ClassificationError> {
		if self.instrument_id.trim().is_empty() {
			return Err(ClassificationError::MissingInstrumentId);
		}
		if !self.quantity.is_finite() || self.quantity < 0.0 {
			return Err(ClassificationError::InvalidQuantity(
				self.quantity,
				self.instrument_id.clone(),
			));
		}
		Ok(())
	}
}

// Reconciliation models
#[derive(Debug, Clone, PartialEq)]
pub struct CashRecord {
	pub date: NaiveDate,
	pub currency: String,
	pub balance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PositionRecord {
	pub date: NaiveDate,
	pub instrument_id: String,
	pub currency: String,
	pub quantity: f64,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn record(instrument_id: &str, quantity: f64) -> TradeRecord {
		let day = NaiveDate::from_ymd_opt(2018, 10, 25).unwrap();
		TradeRecord {
			instrument_id: instrument_id.to_string(),
			side: Side::Buy,
			quantity,
			price: 25680.0,
			trade_date: day,
			settlement_date: day,
			commission_code: COMMISSION_CODE.to_string(),
			commission_amount: 15.0,
			execution_rank: ExecutionRank::new(day.and_hms_opt(9, 15, 0).unwrap(), 0),
		}
	}

	#[test]
	fn test_side_directions() {
		assert_eq!(Side::Buy.direction(), Direction::Long);
		assert_eq!(Side::Cover.direction(), Direction::Long);
		assert_eq!(Side::Short.direction(), Direction::Short);
		assert_eq!(Side::Sell.direction(), Direction::Short);
	}

	#[test]
	fn test_side_from_str() {
		assert_eq!("Cover".parse::<Side>().unwrap(), Side::Cover);
		assert_eq!(" short ".parse::<Side>().unwrap(), Side::Short);
		assert_eq!(
			"LONG".parse::<Side>(),
			Err(ClassificationError::UnknownSide("LONG".to_string()))
		);
	}

	#[test]
	fn test_execution_rank_breaks_ties_by_index() {
		let ts = NaiveDate::from_ymd_opt(2014, 1, 31).unwrap().and_hms_opt(21, 32, 2).unwrap();
		let later = ts + chrono::Duration::seconds(1);
		assert!(ExecutionRank::new(ts, 0) < ExecutionRank::new(ts, 1));
		assert!(ExecutionRank::new(ts, 9) < ExecutionRank::new(later, 0));
	}

	#[test]
	fn test_validate_rejects_missing_instrument() {
		assert_eq!(record("  ", 1.0).validate(), Err(ClassificationError::MissingInstrumentId));
		assert!(record("HIV8 Index", 1.0).validate().is_ok());
		assert!(matches!(
			record("HIV8 Index", f64::NAN).validate(),
			Err(ClassificationError::InvalidQuantity(_, _))
		));
	}

	#[test]
	fn test_settings_defaults_fill_missing_fields() {
		let settings: Settings = serde_json::from_str(r#"{"input_dir": "/data/in", "mail": {"enabled": true}}"#).unwrap();
		assert_eq!(settings.input_dir, "/data/in");
		assert_eq!(settings.output_dir, "output");
		assert_eq!(settings.poll_interval_secs, 300);
		assert!(settings.mail.enabled);
		assert_eq!(settings.mail.subject_prefix, "[trade-converter]");
		assert_eq!(settings.brokers.guangfa, BrokerAccount::new("40006-D", "GF-QUANT"));
		assert_eq!(settings.log_format, LogFormat::Pretty);
	}
}
