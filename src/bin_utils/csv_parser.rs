use std::io::Read;

use csv::{DeserializeRecordsIntoIter, Trim};
use serde::Deserialize;

use crate::wallet::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstructionKind {
    Register,
    Deposit,
    Eft,
    Send,
    Goods,
    Buy,
}

/// One row of the batch file. Which columns are used depends on `kind`.
#[derive(Debug, Deserialize)]
pub struct Instruction {
    #[serde(rename = "type")]
    pub kind: InstructionKind,
    pub msisdn: Option<String>,
    pub name: Option<String>,
    pub pin: Option<String>,
    pub target: Option<String>,
    pub amount: Option<Amount>,
    pub reference: Option<String>,
}

/// Parses an instruction list in CSV format, yielding each row with the
/// line it started on. Malformed rows are yielded as errors and parsing
/// continues with the next row.
pub struct CsvInstructionParser<R> {
    iter: DeserializeRecordsIntoIter<R, Instruction>,
}

impl<R> CsvInstructionParser<R>
where
    R: Read,
{
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(source);

        Self {
            iter: reader.into_deserialize(),
        }
    }
}

impl<R> Iterator for CsvInstructionParser<R>
where
    R: Read,
{
    type Item = (u64, Result<Instruction, csv::Error>);

    fn next(&mut self) -> Option<Self::Item> {
        let curr_line = self.iter.reader().position().line();
        self.iter.next().map(|row| (curr_line, row))
    }
}
