//! Output tables.

use anyhow::{Context, Result};
use rust_xlsxwriter::{Format, Workbook};
use std::path::Path;
use strum::IntoEnumIterator;

use crate::models::{OptionLetter, QuestionRecord};

/// Writes the final record table to a file.
pub trait TableSink {
    fn write_table(&self, records: &[QuestionRecord], path: &Path) -> Result<()>;
}

/// Option columns needed for `records`: `A..E`, or `A..J` once any record
/// uses a letter past `E`.
pub fn option_columns(records: &[QuestionRecord]) -> Vec<OptionLetter> {
    let extended = records
        .iter()
        .filter_map(|r| r.options.last_letter())
        .any(|letter| letter > OptionLetter::E);
    let last = if extended { OptionLetter::J } else { OptionLetter::E };
    OptionLetter::iter().filter(|l| *l <= last).collect()
}

/// Column titles: `number, statement, <option letters>, correct_answer, likely_has_non_text_content`.
pub fn header(columns: &[OptionLetter]) -> Vec<String> {
    let mut header = vec!["number".to_string(), "statement".to_string()];
    header.extend(columns.iter().map(|l| l.to_string()));
    header.push("correct_answer".to_string());
    header.push("likely_has_non_text_content".to_string());
    header
}

/// Comma separated table, one row per question.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvSink;

impl CsvSink {
    pub fn write<W: std::io::Write>(&self, records: &[QuestionRecord], out: W) -> Result<()> {
        let columns = option_columns(records);
        let mut writer = csv::Writer::from_writer(out);

        writer.write_record(&header(&columns))?;

        for record in records.iter() {
            let mut row = vec![record.number.to_string(), record.statement.clone()];
            row.extend(columns.iter().map(|l| record.options.get(*l).to_string()));
            row.push(record.correct_answer_text());
            row.push(record.likely_has_non_text_content.to_string());
            writer.write_record(&row)?;
        }
        writer.flush()?;
        return Ok(());
    }
}

impl TableSink for CsvSink {
    fn write_table(&self, records: &[QuestionRecord], path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        self.write(records, file)
    }
}

/// Pretty-printed JSON array of records.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSink;

impl TableSink for JsonSink {
    fn write_table(&self, records: &[QuestionRecord], path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(records)?;
        std::fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))?;
        return Ok(());
    }
}

/// Excel workbook with one `questions` sheet and a bold header row.
///
/// Numbers are written as numbers and the flag as a boolean cell; missing
/// options and answers stay blank.
#[derive(Debug, Clone, Copy, Default)]
pub struct XlsxSink;

impl XlsxSink {
    pub const SHEET_NAME: &'static str = "questions";

    pub fn workbook(&self, records: &[QuestionRecord]) -> Result<Workbook> {
        let columns = option_columns(records);
        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();
        let sheet = workbook.add_worksheet();
        sheet.set_name(XlsxSink::SHEET_NAME)?;

        for (col, title) in header(&columns).iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, title.as_str(), &bold)?;
        }

        for (i, record) in records.iter().enumerate() {
            let row = (i + 1) as u32;
            sheet.write_number(row, 0, record.number)?;
            sheet.write_string(row, 1, record.statement.as_str())?;
            let mut col: u16 = 2;
            for letter in columns.iter() {
                let text = record.options.get(*letter);
                if !text.is_empty() {
                    sheet.write_string(row, col, text)?;
                }
                col += 1;
            }
            if let Some(letter) = record.correct_answer {
                sheet.write_string(row, col, letter.to_string())?;
            }
            sheet.write_boolean(row, col + 1, record.likely_has_non_text_content)?;
        }
        sheet.set_column_width(1, 80)?;
        return Ok(workbook);
    }
}

impl TableSink for XlsxSink {
    fn write_table(&self, records: &[QuestionRecord], path: &Path) -> Result<()> {
        let mut workbook = self.workbook(records)?;
        workbook
            .save(path)
            .with_context(|| format!("cannot write {}", path.display()))?;
        return Ok(());
    }
}

/// Chooses the sink from the file extension: `.xlsx` gives a workbook,
/// `.json` gives JSON, anything else CSV.
pub fn sink_for_path(path: &Path) -> Box<dyn TableSink> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("xlsx") => Box::new(XlsxSink),
        Some(ext) if ext.eq_ignore_ascii_case("json") => Box::new(JsonSink),
        _ => Box::new(CsvSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PdfWorkspace;
    use crate::models::OptionSet;
    use calamine::{open_workbook, Data, Reader, Xlsx};

    fn record(number: u32, letters: &[OptionLetter], answer: Option<OptionLetter>) -> QuestionRecord {
        let mut options = OptionSet::new();
        for letter in letters {
            options.insert(*letter, format!("option {}", letter));
        }
        QuestionRecord {
            number: number,
            statement: format!("Statement, with comma, number {}", number),
            options: options,
            correct_answer: answer,
            likely_has_non_text_content: false,
        }
    }

    #[test]
    fn test_csv_uses_five_option_columns() {
        let records = vec![
            record(1, &[OptionLetter::A, OptionLetter::B, OptionLetter::C], Some(OptionLetter::B)),
            record(2, &[OptionLetter::A, OptionLetter::B, OptionLetter::C, OptionLetter::D], None),
        ];
        let mut out = Vec::new();
        CsvSink.write(&records, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "number,statement,A,B,C,D,E,correct_answer,likely_has_non_text_content");
        assert_eq!(
            lines[1],
            "1,\"Statement, with comma, number 1\",option A,option B,option C,,,B,false"
        );
        assert!(lines[2].ends_with(",option D,,,false"));
    }

    #[test]
    fn test_csv_extends_to_j() {
        let records = vec![record(1, &[OptionLetter::A, OptionLetter::G], None)];
        let columns = option_columns(&records);
        assert_eq!(columns.len(), 10);
        assert_eq!(columns.last(), Some(&OptionLetter::J));
    }

    #[test]
    fn test_sinks_write_files() {
        let workspace = PdfWorkspace::new();
        std::fs::create_dir_all(&workspace.work_dir).unwrap();
        let records = vec![record(1, &[OptionLetter::A], Some(OptionLetter::A))];

        let json_path = workspace.work_dir.join("out.json");
        sink_for_path(&json_path).write_table(&records, &json_path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(value[0]["number"], 1);
        assert_eq!(value[0]["correct_answer"], "A");

        let csv_path = workspace.work_dir.join("out.csv");
        sink_for_path(&csv_path).write_table(&records, &csv_path).unwrap();
        assert!(std::fs::read_to_string(&csv_path).unwrap().starts_with("number,statement"));

        workspace.clean_files().unwrap();
    }

    #[test]
    fn test_xlsx_round_trip() {
        let workspace = PdfWorkspace::new();
        std::fs::create_dir_all(&workspace.work_dir).unwrap();
        let mut flagged = record(2, &[], None);
        flagged.likely_has_non_text_content = true;
        let records = vec![
            record(1, &[OptionLetter::A, OptionLetter::B, OptionLetter::C], Some(OptionLetter::C)),
            flagged,
        ];

        let path = workspace.work_dir.join("out.xlsx");
        sink_for_path(&path).write_table(&records, &path).unwrap();

        let mut workbook: Xlsx<_> = open_workbook(&path).unwrap();
        let range = workbook.worksheet_range(XlsxSink::SHEET_NAME).unwrap();
        let cell = |row: u32, col: u32| range.get_value((row, col)).cloned().unwrap_or(Data::Empty);

        let titles: Vec<String> = (0..10).map(|col| cell(0, col).to_string()).collect();
        assert_eq!(
            titles,
            vec![
                "number",
                "statement",
                "A",
                "B",
                "C",
                "D",
                "E",
                "correct_answer",
                "likely_has_non_text_content",
                ""
            ]
        );
        assert_eq!(cell(1, 0), Data::Float(1.0));
        assert_eq!(cell(1, 1), Data::String("Statement, with comma, number 1".to_string()));
        assert_eq!(cell(1, 4), Data::String("option C".to_string()));
        assert_eq!(cell(1, 5), Data::Empty);
        assert_eq!(cell(1, 7), Data::String("C".to_string()));
        assert_eq!(cell(1, 8), Data::Bool(false));
        assert_eq!(cell(2, 0), Data::Float(2.0));
        assert_eq!(cell(2, 7), Data::Empty);
        assert_eq!(cell(2, 8), Data::Bool(true));

        workspace.clean_files().unwrap();
    }
}
