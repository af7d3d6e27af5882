//! One converter per broker. The worker asks each in turn whether it
//! recognises a file name and hands the file to the first that does.

use anyhow::{bail, Result};
use chrono::Local;
use gf_parser::GuangFaParser;
use hgnh_parser::HengHuaParser;
use ibkr_parser::IbkrTradeParser;
use models::BrokerSettings;
use std::path::{Path, PathBuf};
use utils::OutputKind;

pub trait BrokerConverter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Report kind of the file when this broker produced it.
    fn accepts(&self, file_name: &str) -> Option<OutputKind>;

    /// Converts the file and returns the files written.
    fn convert(&self, path: &Path, kind: OutputKind, output_dir: &Path) -> Result<Vec<PathBuf>>;
}

pub struct IbkrConverter(pub IbkrTradeParser);

impl BrokerConverter for IbkrConverter {
    fn name(&self) -> &'static str {
        ibkr_parser::PARSER_NAME
    }

    fn accepts(&self, file_name: &str) -> Option<OutputKind> {
        ibkr_parser::is_trade_file(file_name).then_some(OutputKind::Trade)
    }

    fn convert(&self, path: &Path, kind: OutputKind, output_dir: &Path) -> Result<Vec<PathBuf>> {
        match kind {
            OutputKind::Trade => self.0.convert_trade_file(path, output_dir),
            other => bail!("{} files are not handled for IB", other.as_str()),
        }
    }
}

pub struct GuangFaConverter(pub GuangFaParser);

impl BrokerConverter for GuangFaConverter {
    fn name(&self) -> &'static str {
        gf_parser::PARSER_NAME
    }

    fn accepts(&self, file_name: &str) -> Option<OutputKind> {
        gf_parser::file_kind(file_name)
    }

    fn convert(&self, path: &Path, kind: OutputKind, output_dir: &Path) -> Result<Vec<PathBuf>> {
        match kind {
            OutputKind::Trade => self.0.convert_trade_file(path, output_dir),
            OutputKind::Cash => Ok(vec![self.0.convert_cash_file(path, output_dir)?]),
            OutputKind::Position => Ok(vec![self.0.convert_position_file(path, output_dir)?]),
        }
    }
}

pub struct HengHuaConverter(pub HengHuaParser);

impl BrokerConverter for HengHuaConverter {
    fn name(&self) -> &'static str {
        hgnh_parser::PARSER_NAME
    }

    fn accepts(&self, file_name: &str) -> Option<OutputKind> {
        hgnh_parser::file_kind(file_name)
    }

    fn convert(&self, path: &Path, kind: OutputKind, output_dir: &Path) -> Result<Vec<PathBuf>> {
        match kind {
            OutputKind::Trade => self.0.convert_trade_file(path, output_dir),
            OutputKind::Cash => {
                // Balances without a date column are as of the file-name date.
                let as_of = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .and_then(hgnh_parser::date_from_file_name)
                    .unwrap_or_else(|| Local::now().date_naive());
                Ok(vec![self.0.convert_cash_file(path, output_dir, as_of)?])
            }
            OutputKind::Position => bail!("position files are not handled for HengHua"),
        }
    }
}

/// Every supported broker, stamped with the configured account codes.
pub fn default_converters(brokers: &BrokerSettings) -> Vec<Box<dyn BrokerConverter>> {
    vec![
        Box::new(IbkrConverter(IbkrTradeParser::with_account(
            brokers.interactive_brokers.clone(),
        ))),
        Box::new(GuangFaConverter(GuangFaParser::with_account(brokers.guangfa.clone()))),
        Box::new(HengHuaConverter(HengHuaParser::with_account(brokers.henghua.clone()))),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(file_name: &str) -> Option<(&'static str, OutputKind)> {
        default_converters(&BrokerSettings::default())
            .iter()
            .find_map(|c| c.accepts(file_name).map(|kind| (c.name(), kind)))
    }

    #[test]
    fn test_file_names_route_to_brokers() {
        assert_eq!(route("U123_Trades_Activity_20181022.csv"), Some(("ibkr", OutputKind::Trade)));
        assert_eq!(route("8888802200trddata_f20140131.txt"), Some(("guangfa", OutputKind::Trade)));
        assert_eq!(route("8888802200holddata_f20140129.txt"), Some(("guangfa", OutputKind::Position)));
        assert_eq!(route("Trade File 20190117.xlsx"), Some(("henghua", OutputKind::Trade)));
        assert_eq!(route("Cash 20190117.xlsx"), Some(("henghua", OutputKind::Cash)));
        assert_eq!(route("notes.txt"), None);
        assert_eq!(route("40006-B_trade_2018-10-22.csv"), None);
    }
}
