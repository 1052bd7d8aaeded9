//! Spreadsheet reading: xlsx (OOXML) and CSV into a header + rows grid, then
//! into validated [`StockRecord`]s.
//!
//! Only the first worksheet of a workbook is read. Cells are placed by their
//! `r` reference (`C7`), so sparse rows keep their columns. Values are taken
//! verbatim; trimming store names is the normalizer's job.

use std::io::Read;

use quick_xml::events::{BytesStart, Event};

use crate::error::PipelineError;
use crate::models::{StockRecord, REQUIRED_COLUMNS};

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum cells to process per sheet.
const MAX_CELLS: usize = 1_000_000;
/// Worksheet column limit (`XFD`).
const MAX_COLUMNS: usize = 16_384;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// A single sheet: trimmed header names and data rows of equal width.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub headers: Vec<String>,
    /// Data rows with their 1-based spreadsheet row number.
    pub rows: Vec<(usize, Vec<String>)>,
}

/// Read a spreadsheet from raw bytes. Zip content is treated as xlsx,
/// anything else as CSV.
pub fn read_sheet(bytes: &[u8]) -> Result<Sheet, PipelineError> {
    if bytes.starts_with(ZIP_MAGIC) {
        read_xlsx(bytes)
    } else {
        read_csv(bytes)
    }
}

/// Read a spreadsheet and validate it into stock records in one step.
pub fn read_records(bytes: &[u8]) -> Result<Vec<StockRecord>, PipelineError> {
    read_sheet(bytes)?.into_records()
}

impl Sheet {
    fn from_grid(mut grid: Vec<(usize, Vec<String>)>) -> Result<Self, PipelineError> {
        if grid.is_empty() {
            return Err(PipelineError::InputParse("sheet is empty".to_string()));
        }
        let (_, header_row) = grid.remove(0);
        let headers: Vec<String> = header_row.iter().map(|h| h.trim().to_string()).collect();
        let width = headers.len();
        let rows = grid
            .into_iter()
            .map(|(n, mut cells)| {
                cells.resize(width.max(cells.len()), String::new());
                (n, cells)
            })
            .collect();
        Ok(Self { headers, rows })
    }

    fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Validate the header and convert rows into records.
    ///
    /// A missing required column fails the whole sheet before any row is
    /// looked at. Quantity must be integer-coercible; `"5.0"` is accepted,
    /// `"2.5"` and `"n/a"` are not.
    pub fn into_records(self) -> Result<Vec<StockRecord>, PipelineError> {
        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|c| self.column(c).is_none())
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::InputFormat { missing });
        }

        // All four present, checked above.
        let idx: Vec<usize> = REQUIRED_COLUMNS
            .iter()
            .filter_map(|c| self.column(c))
            .collect();
        let (retailer, sku, store, quantity) = (idx[0], idx[1], idx[2], idx[3]);

        let mut records = Vec::with_capacity(self.rows.len());
        for (row_number, mut cells) in self.rows {
            let qty = parse_quantity(&cells[quantity]).ok_or_else(|| {
                PipelineError::InvalidQuantity {
                    row: row_number,
                    value: cells[quantity].clone(),
                }
            })?;
            records.push(StockRecord {
                retailer: std::mem::take(&mut cells[retailer]),
                sku: std::mem::take(&mut cells[sku]),
                store: std::mem::take(&mut cells[store]),
                quantity: qty,
            });
        }
        Ok(records)
    }
}

fn parse_quantity(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if let Ok(q) = s.parse::<i64>() {
        return Some(q);
    }
    let f = s.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

// ============ CSV ============

fn read_csv(bytes: &[u8]) -> Result<Sheet, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut grid = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = result.map_err(|e| {
            PipelineError::InputParse(format!("CSV parse error at record {}: {}", i + 1, e))
        })?;
        if record.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let line = record
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(i + 1);
        grid.push((line, record.iter().map(|c| c.to_string()).collect()));
    }
    Sheet::from_grid(grid)
}

// ============ XLSX ============

fn ooxml_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::InputParse(e.to_string())
}

fn read_xlsx(bytes: &[u8]) -> Result<Sheet, PipelineError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_err)?;

    let shared_strings = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml")?;
        parse_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let sheet_name = first_worksheet_name(&archive)
        .ok_or_else(|| PipelineError::InputParse("workbook has no worksheets".to_string()))?;
    let sheet_xml = read_zip_entry_bounded(&mut archive, &sheet_name)?;
    let grid = parse_sheet_cells(&sheet_xml, &shared_strings)?;
    Sheet::from_grid(grid)
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, PipelineError> {
    let entry = archive.by_name(name).map_err(ooxml_err)?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(ooxml_err)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(PipelineError::InputParse(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// `xl/worksheets/sheetN.xml` with the lowest N.
fn first_worksheet_name(archive: &zip::ZipArchive<std::io::Cursor<&[u8]>>) -> Option<String> {
    archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .min_by_key(|name| {
            name.trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX)
        })
        .map(|s| s.to_string())
}

/// Each `<si>` becomes one string; rich-text runs are concatenated.
fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, PipelineError> {
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    // Phonetic runs (<rPh>) carry furigana, not cell text.
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => in_phonetic = true,
                b"t" => in_t = !in_phonetic,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"si" {
                    strings.push(String::new());
                }
            }
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().map_err(ooxml_err)?);
                }
            }
            Ok(Event::CData(cd)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&String::from_utf8_lossy(&cd.into_inner()));
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => {
                    if let Some(s) = current.take() {
                        strings.push(s);
                    }
                }
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell type from the `t` attribute.
#[derive(Debug, Clone, Copy, PartialEq)]
enum CellKind {
    Number,
    Shared,
    Inline,
    Str,
    Bool,
    Error,
}

struct CellStart {
    col: Option<usize>,
    kind: CellKind,
}

fn cell_start(e: &BytesStart<'_>) -> Result<CellStart, PipelineError> {
    let mut col = None;
    let mut kind = CellKind::Number;
    for attr in e.attributes() {
        let attr = attr.map_err(ooxml_err)?;
        match attr.key.as_ref() {
            b"r" => col = column_index(&attr.value)?,
            b"t" => {
                kind = match attr.value.as_ref() {
                    b"s" => CellKind::Shared,
                    b"inlineStr" => CellKind::Inline,
                    b"str" => CellKind::Str,
                    b"b" => CellKind::Bool,
                    b"e" => CellKind::Error,
                    _ => CellKind::Number,
                }
            }
            _ => {}
        }
    }
    Ok(CellStart { col, kind })
}

fn row_number(e: &BytesStart<'_>) -> Option<usize> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == b"r")
        .and_then(|a| std::str::from_utf8(&a.value).ok()?.parse().ok())
}

/// Zero-based column index from a cell reference: `A1` → 0, `AB12` → 27.
///
/// `Ok(None)` when the reference has no column letters. References past
/// column `XFD` are rejected.
fn column_index(reference: &[u8]) -> Result<Option<usize>, PipelineError> {
    let mut col = 0usize;
    let mut letters = 0;
    for &b in reference {
        if !b.is_ascii_alphabetic() {
            break;
        }
        col = col
            .checked_mul(26)
            .and_then(|c| c.checked_add((b.to_ascii_uppercase() - b'A' + 1) as usize))
            .filter(|c| *c <= MAX_COLUMNS)
            .ok_or_else(|| {
                PipelineError::InputParse(format!(
                    "cell reference {} is beyond the last column",
                    String::from_utf8_lossy(reference)
                ))
            })?;
        letters += 1;
    }
    if letters == 0 {
        Ok(None)
    } else {
        Ok(Some(col - 1))
    }
}

fn resolve_cell(kind: CellKind, raw: &str, shared_strings: &[String]) -> String {
    match kind {
        CellKind::Shared => raw
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared_strings.get(i).cloned())
            .unwrap_or_default(),
        CellKind::Bool => match raw.trim() {
            "1" => "TRUE".to_string(),
            _ => "FALSE".to_string(),
        },
        CellKind::Number | CellKind::Inline | CellKind::Str | CellKind::Error => raw.to_string(),
    }
}

/// Parse worksheet XML into rows of cell strings, skipping fully blank rows.
fn parse_sheet_cells(
    xml: &[u8],
    shared_strings: &[String],
) -> Result<Vec<(usize, Vec<String>)>, PipelineError> {
    let mut grid: Vec<(usize, Vec<String>)> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut row: Vec<String> = Vec::new();
    let mut row_num = 0usize;
    let mut cell: Option<CellStart> = None;
    let mut value = String::new();
    let mut in_value = false;
    let mut cell_count = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row_num = row_number(&e).unwrap_or(row_num + 1);
                    row.clear();
                }
                b"c" => {
                    cell = Some(cell_start(&e)?);
                    value.clear();
                }
                // <v> for stored values, <t> inside <is> for inline strings
                b"v" | b"t" => in_value = cell.is_some(),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row_num = row_number(&e).unwrap_or(row_num + 1);
                }
                b"c" => {
                    // A cell with no value still claims its column.
                    let start = cell_start(&e)?;
                    let col = start.col.unwrap_or(row.len());
                    if row.len() <= col {
                        row.resize(col + 1, String::new());
                    }
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                value.push_str(&te.unescape().map_err(ooxml_err)?);
            }
            Ok(Event::CData(cd)) if in_value => {
                value.push_str(&String::from_utf8_lossy(&cd.into_inner()));
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(start) = cell.take() {
                        let col = start.col.unwrap_or(row.len());
                        if row.len() <= col {
                            row.resize(col + 1, String::new());
                        }
                        row[col] = resolve_cell(start.kind, &value, shared_strings);
                        cell_count += 1;
                        if cell_count > MAX_CELLS {
                            return Err(PipelineError::InputParse(format!(
                                "sheet exceeds {} cells",
                                MAX_CELLS
                            )));
                        }
                    }
                }
                b"row" => {
                    if !row.iter().all(|c| c.trim().is_empty()) {
                        grid.push((row_num, std::mem::take(&mut row)));
                    }
                    row.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(grid)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Build a minimal xlsx with one worksheet of inline-string and numeric
    /// cells. Numeric-looking strings in `rows` are written as numbers.
    pub(crate) fn xlsx_from_rows(rows: &[Vec<&str>]) -> Vec<u8> {
        let mut sheet = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\"><sheetData>",
        );
        for (r, row) in rows.iter().enumerate() {
            sheet.push_str(&format!("<row r=\"{}\">", r + 1));
            for (c, value) in row.iter().enumerate() {
                let col = (b'A' + c as u8) as char;
                if value.parse::<f64>().is_ok() {
                    sheet.push_str(&format!("<c r=\"{}{}\"><v>{}</v></c>", col, r + 1, value));
                } else {
                    sheet.push_str(&format!(
                        "<c r=\"{}{}\" t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
                        col,
                        r + 1,
                        value.replace('&', "&amp;")
                    ));
                }
            }
            sheet.push_str("</row>");
        }
        sheet.push_str("</sheetData></worksheet>");
        zip_with(&[("xl/worksheets/sheet1.xml", sheet.as_str())])
    }

    pub(crate) fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn reads_inline_and_numeric_cells() {
        let bytes = xlsx_from_rows(&[
            vec!["Retailer", "SKU", "Store", "Quantity"],
            vec!["Currys", "226-802600101", "  website toolstation  ", "0"],
            vec!["Argos", "Air", "Leeds", "3"],
        ]);
        let records = read_records(&bytes).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0],
            StockRecord::new("Currys", "226-802600101", "  website toolstation  ", 0)
        );
        assert_eq!(records[1].quantity, 3);
    }

    #[test]
    fn resolves_shared_strings_with_rich_text_and_sparse_cells() {
        let shared = r#"<?xml version="1.0"?><sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">
<si><t>Retailer</t></si><si><t>SKU</t></si><si><t>Store</t></si><si><t>Quantity</t></si>
<si><r><t>Tool</t></r><r><t>station</t></r></si>
<si><t>Solo &amp; Printer</t></si>
</sst>"#;
        let sheet = r#"<?xml version="1.0"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c><c r="C1" t="s"><v>2</v></c><c r="D1" t="s"><v>3</v></c></row>
<row r="2"/>
<row r="3"><c r="A3" t="s"><v>4</v></c><c r="B3" t="s"><v>5</v></c><c r="D3"><v>1</v></c></row>
</sheetData></worksheet>"#;
        let bytes = zip_with(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        let parsed = read_sheet(&bytes).unwrap();
        assert_eq!(parsed.headers, vec!["Retailer", "SKU", "Store", "Quantity"]);
        assert_eq!(parsed.rows.len(), 1);
        let (row_number, cells) = &parsed.rows[0];
        assert_eq!(*row_number, 3);
        assert_eq!(cells, &vec!["Toolstation", "Solo & Printer", "", "1"]);
    }

    #[test]
    fn first_worksheet_is_the_lowest_numbered() {
        let first = "<worksheet><sheetData><row r=\"1\"><c r=\"A1\" t=\"inlineStr\"><is><t>first</t></is></c></row></sheetData></worksheet>";
        let tenth = "<worksheet><sheetData><row r=\"1\"><c r=\"A1\" t=\"inlineStr\"><is><t>tenth</t></is></c></row></sheetData></worksheet>";
        let bytes = zip_with(&[
            ("xl/worksheets/sheet10.xml", tenth),
            ("xl/worksheets/sheet2.xml", first),
        ]);
        assert_eq!(read_sheet(&bytes).unwrap().headers, vec!["first"]);
    }

    #[test]
    fn reads_csv_with_extra_columns_in_any_order() {
        let csv = "Store,Quantity,Notes,SKU,Retailer\nLeeds,2,x,Air,Argos\n\nYork,1.0,,Solo,Argos\n";
        let records = read_records(csv.as_bytes()).unwrap();
        assert_eq!(
            records,
            vec![
                StockRecord::new("Argos", "Air", "Leeds", 2),
                StockRecord::new("Argos", "Solo", "York", 1),
            ]
        );
    }

    #[test]
    fn missing_columns_are_an_input_format_error() {
        let err = read_records(b"Retailer,SKU,Qty\nArgos,Air,1\n").unwrap_err();
        match err {
            PipelineError::InputFormat { missing } => {
                assert_eq!(missing, vec!["Store", "Quantity"]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn non_integer_quantity_is_rejected_with_row_number() {
        let err = read_records(b"Retailer,SKU,Store,Quantity\nArgos,Air,Leeds,1\nArgos,Air,York,lots\n")
            .unwrap_err();
        match err {
            PipelineError::InvalidQuantity { row, value } => {
                assert_eq!(row, 3);
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let err = read_records(b"Retailer,SKU,Store,Quantity\nArgos,Air,Leeds,2.5\n").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidQuantity { .. }));

        let err = read_records(b"Retailer,SKU,Store,Quantity\nArgos,Air,Leeds,\n").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidQuantity { .. }));
    }

    #[test]
    fn corrupt_zip_is_an_input_parse_error() {
        let mut bytes = ZIP_MAGIC.to_vec();
        bytes.extend_from_slice(b"definitely not a zip");
        assert!(matches!(
            read_sheet(&bytes).unwrap_err(),
            PipelineError::InputParse(_)
        ));
    }

    #[test]
    fn column_index_handles_multi_letter_references() {
        assert_eq!(column_index(b"A1").unwrap(), Some(0));
        assert_eq!(column_index(b"Z9").unwrap(), Some(25));
        assert_eq!(column_index(b"AB12").unwrap(), Some(27));
        assert_eq!(column_index(b"XFD1").unwrap(), Some(16_383));
        assert_eq!(column_index(b"12").unwrap(), None);
        assert!(column_index(b"XFE1").is_err());
    }

    #[test]
    fn out_of_range_cell_reference_is_an_input_parse_error() {
        for reference in ["ZZZZZZZZZZZZZZZZ1", "AAAAAAA1"] {
            let sheet = format!(
                "<worksheet><sheetData><row r=\"1\"><c r=\"{}\" t=\"inlineStr\"><is><t>Retailer</t></is></c></row></sheetData></worksheet>",
                reference
            );
            let bytes = zip_with(&[("xl/worksheets/sheet1.xml", sheet.as_str())]);
            assert!(
                matches!(read_sheet(&bytes), Err(PipelineError::InputParse(_))),
                "{}",
                reference
            );
        }
    }
}
