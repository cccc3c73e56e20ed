//! Minimal FITS reader/writer for extracted echelle spectra.
//!
//! Only what extracted-spectrum files need is supported: the primary
//! header (kept as metadata) and the first `BINTABLE` extension, whose
//! numeric array columns (TFORM `rB`, `rI`, `rJ`, `rK`, `rE`, `rD`) are read
//! one cell per order. Other column types are skipped over.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

use super::loader::{build_order, SPECTRUM_COLUMN, UNCERTAINTY_COLUMN, WAVELENGTH_COLUMN};
use super::model::{Exposure, MetadataValue, ORDER_COLUMN};

pub const BLOCK: usize = 2880;
/// Largest column count a binary table may declare.
const MAX_FIELDS: usize = 999;
const CARD: usize = 80;

/// Errors that can occur while reading a FITS file
#[derive(Error, Debug)]
pub enum FitsError {
    #[error("FITS I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed header: {0}")]
    Header(String),
    #[error("Truncated file: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("No BINTABLE extension found")]
    NoTable,
    #[error("Column not found: {0}")]
    MissingColumn(String),
    #[error("Unsupported column format: {0}")]
    UnsupportedFormat(String),
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Keyword/value cards of one HDU, in file order.
#[derive(Debug, Clone, Default)]
pub struct Header {
    cards: Vec<(String, MetadataValue)>,
}

impl Header {
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.cards.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_int(&self, key: &str) -> Result<i64, FitsError> {
        match self.get(key) {
            Some(MetadataValue::Integer(i)) => Ok(*i),
            other => Err(FitsError::Header(format!("{key} is {other:?}"))),
        }
    }

    /// A non-negative integer card used as a count or byte size.
    fn get_size(&self, key: &str) -> Result<usize, FitsError> {
        let value = self.get_int(key)?;
        usize::try_from(value)
            .map_err(|_| FitsError::Header(format!("{key} = {value} is not a valid size")))
    }

    fn get_size_or(&self, key: &str, default: usize) -> Result<usize, FitsError> {
        match self.get(key) {
            None => Ok(default),
            Some(_) => self.get_size(key),
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(MetadataValue::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    /// Bytes of data following this header (before padding).
    fn data_len(&self) -> Result<usize, FitsError> {
        let naxis = self.get_size("NAXIS")?;
        if naxis == 0 {
            return Ok(0);
        }
        let bitpix = usize::try_from(self.get_int("BITPIX")?.unsigned_abs() / 8)
            .map_err(|_| FitsError::Header("BITPIX out of range".to_string()))?;
        let mut n = 1usize;
        for i in 1..=naxis {
            n = n
                .checked_mul(self.get_size(&format!("NAXIS{i}"))?)
                .ok_or_else(size_overflow)?;
        }
        let pcount = self.get_size_or("PCOUNT", 0)?;
        let gcount = self.get_size_or("GCOUNT", 1)?;
        pcount
            .checked_add(n)
            .and_then(|v| v.checked_mul(gcount))
            .and_then(|v| v.checked_mul(bitpix))
            .ok_or_else(size_overflow)
    }

    /// Cards other than commentary and structural keywords.
    fn metadata(&self) -> BTreeMap<String, MetadataValue> {
        self.cards
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "COMMENT" | "HISTORY" | "" | "END"))
            .cloned()
            .collect()
    }
}

fn size_overflow() -> FitsError {
    FitsError::Header("data size does not fit in memory".to_string())
}

fn padded(len: usize) -> usize {
    len.div_ceil(BLOCK) * BLOCK
}

/// Parse the value field of a card (columns 11-80).
fn parse_value(raw: &str) -> MetadataValue {
    let raw = raw.trim_start();
    if let Some(rest) = raw.strip_prefix('\'') {
        // Quoted string; '' is an escaped quote.
        let mut out = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    out.push('\'');
                    chars.next();
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        return MetadataValue::String(out.trim_end().to_string());
    }

    let value = raw.split('/').next().unwrap_or("").trim();
    match value {
        "" => MetadataValue::Null,
        "T" => MetadataValue::Bool(true),
        "F" => MetadataValue::Bool(false),
        v => {
            if let Ok(i) = v.parse::<i64>() {
                MetadataValue::Integer(i)
            } else if let Ok(f) = v.replace(['D', 'd'], "E").parse::<f64>() {
                MetadataValue::Float(f)
            } else {
                MetadataValue::String(v.to_string())
            }
        }
    }
}

/// Read header cards starting at `offset` up to and including `END`.
/// Returns the header and the offset of the following data.
fn read_header(bytes: &[u8], offset: usize) -> Result<(Header, usize), FitsError> {
    let mut header = Header::default();
    let mut pos = offset;
    loop {
        if pos + CARD > bytes.len() {
            return Err(FitsError::Truncated {
                expected: pos + CARD,
                found: bytes.len(),
            });
        }
        let raw = &bytes[pos..pos + CARD];
        if !raw.is_ascii() {
            return Err(FitsError::Header(format!("non-ASCII card at byte {pos}")));
        }
        let card = std::str::from_utf8(raw)
            .map_err(|_| FitsError::Header(format!("non-ASCII card at byte {pos}")))?;
        pos += CARD;

        let key = card[..8].trim_end().to_string();
        if key == "END" {
            break;
        }
        if &card[8..10] == "= " {
            header.cards.push((key, parse_value(&card[10..])));
        } else if !key.is_empty() {
            header.cards.push((key, MetadataValue::String(card[8..].trim().to_string())));
        }
    }
    Ok((header, offset + padded(pos - offset)))
}

// ---------------------------------------------------------------------------
// Binary table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Column {
    name: String,
    code: char,
    repeat: usize,
    /// Byte offset within a row.
    offset: usize,
    scale: f64,
    zero: f64,
}

/// Parse a TFORM like `7920D` into (repeat, code, bytes).
fn parse_tform(tform: &str) -> Result<(usize, char, usize), FitsError> {
    let tform = tform.trim();
    let split = tform
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(|| FitsError::UnsupportedFormat(tform.to_string()))?;
    let repeat = if split == 0 {
        1
    } else {
        tform[..split]
            .parse::<usize>()
            .map_err(|_| FitsError::UnsupportedFormat(tform.to_string()))?
    };
    let code = tform[split..].chars().next().unwrap_or(' ');
    let bytes = match code {
        'L' | 'B' | 'A' => Some(repeat),
        'X' => Some(repeat.div_ceil(8)),
        'I' => repeat.checked_mul(2),
        'J' | 'E' => repeat.checked_mul(4),
        'K' | 'D' | 'C' | 'P' => repeat.checked_mul(8),
        'M' | 'Q' => repeat.checked_mul(16),
        _ => return Err(FitsError::UnsupportedFormat(tform.to_string())),
    };
    let bytes = bytes.ok_or_else(|| FitsError::UnsupportedFormat(tform.to_string()))?;
    Ok((repeat, code, bytes))
}

/// A `BINTABLE` HDU with its raw rows.
#[derive(Debug)]
pub struct BinTable<'a> {
    columns: Vec<Column>,
    n_rows: usize,
    row_len: usize,
    data: &'a [u8],
}

impl<'a> BinTable<'a> {
    fn new(header: &Header, data: &'a [u8]) -> Result<Self, FitsError> {
        let row_len = header.get_size("NAXIS1")?;
        let n_rows = header.get_size("NAXIS2")?;
        let n_fields = header.get_size("TFIELDS")?;
        if n_fields > MAX_FIELDS {
            return Err(FitsError::Header(format!("TFIELDS = {n_fields} exceeds {MAX_FIELDS}")));
        }
        let table_len = row_len.checked_mul(n_rows).ok_or_else(size_overflow)?;
        if data.len() < table_len {
            return Err(FitsError::Truncated {
                expected: table_len,
                found: data.len(),
            });
        }

        let mut columns = Vec::with_capacity(n_fields);
        let mut offset = 0;
        for i in 1..=n_fields {
            let tform = header
                .get_str(&format!("TFORM{i}"))
                .ok_or_else(|| FitsError::Header(format!("missing TFORM{i}")))?;
            let (repeat, code, bytes) = parse_tform(tform)?;
            let name = header
                .get_str(&format!("TTYPE{i}"))
                .map(str::to_string)
                .unwrap_or_else(|| format!("COL{i}"));
            columns.push(Column {
                name,
                code,
                repeat,
                offset,
                scale: header.get_f64(&format!("TSCAL{i}")).unwrap_or(1.0),
                zero: header.get_f64(&format!("TZERO{i}")).unwrap_or(0.0),
            });
            offset = offset.checked_add(bytes).ok_or_else(size_overflow)?;
        }
        if offset != row_len {
            return Err(FitsError::Header(format!(
                "column widths sum to {offset} bytes but NAXIS1 is {row_len}"
            )));
        }

        Ok(Self {
            columns,
            n_rows,
            row_len,
            data,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Every cell of a numeric column as `f64`, one vector per row.
    pub fn read_f64(&self, name: &str) -> Result<Vec<Vec<f64>>, FitsError> {
        let col = self
            .column(name)
            .ok_or_else(|| FitsError::MissingColumn(name.to_string()))?;
        let width = match col.code {
            'B' => 1,
            'I' => 2,
            'J' | 'E' => 4,
            'K' | 'D' => 8,
            other => {
                return Err(FitsError::UnsupportedFormat(format!(
                    "{} has non-numeric type {other}",
                    col.name
                )))
            }
        };

        Ok((0..self.n_rows)
            .map(|row| {
                let start = row * self.row_len + col.offset;
                self.data[start..start + width * col.repeat]
                    .chunks_exact(width)
                    .map(|b| col.zero + col.scale * decode(col.code, b))
                    .collect()
            })
            .collect())
    }
}

/// Decode one big-endian element.
fn decode(code: char, b: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    buf[..b.len()].copy_from_slice(b);
    match code {
        'B' => b[0] as f64,
        'I' => i16::from_be_bytes([b[0], b[1]]) as f64,
        'J' => i32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64,
        'E' => f32::from_be_bytes([b[0], b[1], b[2], b[3]]) as f64,
        'K' => i64::from_be_bytes(buf) as f64,
        'D' => f64::from_be_bytes(buf),
        _ => f64::NAN,
    }
}

// ---------------------------------------------------------------------------
// Exposure reader
// ---------------------------------------------------------------------------

/// Read an extracted spectrum: primary header + first binary table.
pub fn read_exposure(path: &Path) -> anyhow::Result<Exposure> {
    let bytes = std::fs::read(path).map_err(FitsError::from)?;
    Ok(parse_exposure(&bytes)?)
}

fn parse_exposure(bytes: &[u8]) -> Result<Exposure, FitsError> {
    let (primary, data_start) = read_header(bytes, 0)?;
    if primary.get("SIMPLE") != Some(&MetadataValue::Bool(true)) {
        return Err(FitsError::Header("not a FITS file (SIMPLE != T)".to_string()));
    }
    let primary_end = data_end(bytes, data_start, primary.data_len()?)?;
    let mut offset = data_start + padded(primary_end - data_start);

    while offset < bytes.len() {
        let (header, data_start) = read_header(bytes, offset)?;
        let end = data_end(bytes, data_start, header.data_len()?)?;

        if header.get_str("XTENSION") == Some("BINTABLE") {
            let table = BinTable::new(&header, &bytes[data_start..end])?;
            return table_to_exposure(&primary, &table);
        }
        offset = data_start + padded(end - data_start);
    }
    Err(FitsError::NoTable)
}

/// End of an HDU's data, which must lie inside the file.
fn data_end(bytes: &[u8], start: usize, len: usize) -> Result<usize, FitsError> {
    match start.checked_add(len) {
        Some(end) if end <= bytes.len() => Ok(end),
        _ => Err(FitsError::Truncated {
            expected: start.saturating_add(len),
            found: bytes.len(),
        }),
    }
}

fn table_to_exposure(primary: &Header, table: &BinTable<'_>) -> Result<Exposure, FitsError> {
    let spectrum = table.read_f64(SPECTRUM_COLUMN)?;
    let wavelength = table.read_f64(WAVELENGTH_COLUMN)?;
    let uncertainty = if table.has_column(UNCERTAINTY_COLUMN) {
        Some(table.read_f64(UNCERTAINTY_COLUMN)?)
    } else {
        log::warn!("No '{UNCERTAINTY_COLUMN}' column, using unit uncertainties");
        None
    };
    let order_numbers = if table.has_column(ORDER_COLUMN) {
        Some(table.read_f64(ORDER_COLUMN)?)
    } else {
        None
    };

    let mut orders = Vec::with_capacity(table.n_rows());
    let rows = spectrum.into_iter().zip(wavelength).enumerate();
    for (row, (spec, wave)) in rows {
        let unc = uncertainty.as_ref().map(|u| u[row].clone());
        let order = order_numbers
            .as_ref()
            .and_then(|o| o[row].first().copied())
            .map(|o| o as i64);
        let built = build_order(row, order, spec, unc, wave, BTreeMap::new())
            .map_err(|e| FitsError::Header(format!("{e:#}")))?;
        orders.push(built);
    }
    Ok(Exposure::from_orders(primary.metadata(), orders))
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// One 80-character card; strings start in column 11, other values are
/// right-aligned to column 30.
fn card(key: &str, value: &str) -> String {
    let text = if value.starts_with('\'') {
        format!("{key:<8}= {value:<20}")
    } else {
        format!("{key:<8}= {value:>20}")
    };
    text.chars().chain(std::iter::repeat(' ')).take(CARD).collect()
}

fn push_header(out: &mut Vec<u8>, cards: &[String]) {
    let start = out.len();
    for c in cards {
        out.extend_from_slice(c.as_bytes());
    }
    out.extend_from_slice(format!("{:<80}", "END").as_bytes());
    let len = out.len() - start;
    out.resize(start + padded(len), b' ');
}

fn header_value(v: &MetadataValue) -> Option<String> {
    match v {
        MetadataValue::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
        MetadataValue::Integer(i) => Some(i.to_string()),
        MetadataValue::Float(f) => Some(format!("{f:E}")),
        MetadataValue::Bool(b) => Some(if *b { "T" } else { "F" }.to_string()),
        MetadataValue::Null => None,
    }
}

/// Encode an exposure as primary header + one `BINTABLE` of `D` columns.
///
/// All orders must have the same number of pixels.
pub fn encode_exposure(exposure: &Exposure) -> Result<Vec<u8>, FitsError> {
    let n_pixels = exposure.orders.first().map_or(0, |o| o.len());
    if exposure.orders.iter().any(|o| o.len() != n_pixels || !o.is_consistent()) {
        return Err(FitsError::Header(
            "all orders must have the same number of pixels".to_string(),
        ));
    }

    let mut out = Vec::new();

    let mut primary = vec![
        card("SIMPLE", "T"),
        card("BITPIX", "8"),
        card("NAXIS", "0"),
        card("EXTEND", "T"),
    ];
    for (key, value) in &exposure.header {
        let reserved = matches!(key.as_str(), "SIMPLE" | "BITPIX" | "NAXIS" | "EXTEND");
        if key.len() <= 8 && !reserved {
            if let Some(v) = header_value(value) {
                primary.push(card(key, &v));
            }
        }
    }
    push_header(&mut out, &primary);

    let columns = [ORDER_COLUMN, SPECTRUM_COLUMN, UNCERTAINTY_COLUMN, WAVELENGTH_COLUMN];
    let row_len = 8 + 3 * 8 * n_pixels;
    let mut table = vec![
        card("XTENSION", "'BINTABLE'"),
        card("BITPIX", "8"),
        card("NAXIS", "2"),
        card("NAXIS1", &row_len.to_string()),
        card("NAXIS2", &exposure.len().to_string()),
        card("PCOUNT", "0"),
        card("GCOUNT", "1"),
        card("TFIELDS", &columns.len().to_string()),
    ];
    for (i, name) in columns.iter().enumerate() {
        let repeat = if *name == ORDER_COLUMN { 1 } else { n_pixels };
        table.push(card(&format!("TTYPE{}", i + 1), &format!("'{name}'")));
        table.push(card(&format!("TFORM{}", i + 1), &format!("'{repeat}D'")));
    }
    push_header(&mut out, &table);

    let data_start = out.len();
    for order in &exposure.orders {
        out.extend_from_slice(&(order.order as f64).to_be_bytes());
        for values in [&order.spectrum, &order.uncertainty, &order.wavelength] {
            for v in values.iter() {
                out.extend_from_slice(&v.to_be_bytes());
            }
        }
    }
    let len = out.len() - data_start;
    out.resize(data_start + padded(len), 0);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::EchelleOrder;

    fn exposure() -> Exposure {
        let mut header = BTreeMap::new();
        header.insert("OBJECT".to_string(), MetadataValue::String("LFC".into()));
        header.insert("EXPTIME".to_string(), MetadataValue::Float(30.0));
        let orders = (40..43)
            .map(|n| {
                EchelleOrder::new(
                    n,
                    vec![0.1 * n as f64, 0.5, f64::NAN],
                    vec![0.01; 3],
                    vec![5000.0 + n as f64, 5000.5 + n as f64, 5001.0 + n as f64],
                )
            })
            .collect();
        Exposure::from_orders(header, orders)
    }

    #[test]
    fn test_encoded_exposure_parses_back() {
        let original = exposure();
        let bytes = encode_exposure(&original).unwrap();
        assert_eq!(bytes.len() % BLOCK, 0);

        let parsed = parse_exposure(&bytes).unwrap();
        assert_eq!(parsed.len(), 3);
        for (a, b) in parsed.orders.iter().zip(&original.orders) {
            assert_eq!(a.order, b.order);
            assert_eq!(a.wavelength, b.wavelength);
            assert_eq!(a.spectrum[..2], b.spectrum[..2]);
            assert!(a.spectrum[2].is_nan());
        }
        assert_eq!(parsed.header.get("OBJECT"), Some(&MetadataValue::String("LFC".into())));
        assert_eq!(parsed.header.get("EXPTIME"), Some(&MetadataValue::Float(30.0)));
    }

    #[test]
    fn test_parse_value_forms() {
        assert_eq!(parse_value(" 'O''Hara  ' / name"), MetadataValue::String("O'Hara".into()));
        assert_eq!(parse_value("                   T"), MetadataValue::Bool(true));
        assert_eq!(parse_value("   42 / answer"), MetadataValue::Integer(42));
        assert_eq!(parse_value("  1.5D2"), MetadataValue::Float(150.0));
        assert_eq!(parse_value("   "), MetadataValue::Null);
    }

    #[test]
    fn test_parse_tform() {
        assert_eq!(parse_tform("7920D").unwrap(), (7920, 'D', 63360));
        assert_eq!(parse_tform("E").unwrap(), (1, 'E', 4));
        assert_eq!(parse_tform("16X").unwrap(), (16, 'X', 2));
        assert!(parse_tform("12Z").is_err());
    }

    #[test]
    fn test_not_fits() {
        let bytes = vec![b' '; BLOCK];
        assert!(parse_exposure(&bytes).is_err());
    }

    fn table_header(naxis1: &str, naxis2: &str, tform: &str) -> Vec<u8> {
        let mut out = Vec::new();
        push_header(&mut out, &[card("SIMPLE", "T"), card("BITPIX", "8"), card("NAXIS", "0")]);
        push_header(
            &mut out,
            &[
                card("XTENSION", "'BINTABLE'"),
                card("BITPIX", "8"),
                card("NAXIS", "2"),
                card("NAXIS1", naxis1),
                card("NAXIS2", naxis2),
                card("PCOUNT", "0"),
                card("GCOUNT", "1"),
                card("TFIELDS", "1"),
                card("TTYPE1", "'spectrum'"),
                card("TFORM1", tform),
            ],
        );
        out
    }

    #[test]
    fn test_negative_axis_is_an_error() {
        let bytes = table_header("-1", "3", "'1D'");
        assert!(matches!(parse_exposure(&bytes), Err(FitsError::Header(_))));
    }

    #[test]
    fn test_oversized_table_is_an_error() {
        let huge = i64::MAX.to_string();
        assert!(parse_exposure(&table_header(&huge, &huge, "'1D'")).is_err());
        assert!(parse_exposure(&table_header("8", "1000", "'1D'")).is_err());
        let bytes = table_header("8", "0", &format!("'{}D'", usize::MAX));
        assert!(parse_exposure(&bytes).is_err());
    }

    #[test]
    fn test_date_card_is_text() {
        assert_eq!(
            parse_value(" '2024-03-01T22:15:07' / start of exposure"),
            MetadataValue::String("2024-03-01T22:15:07".into())
        );
    }

    #[test]
    fn test_missing_table() {
        let mut out = Vec::new();
        push_header(&mut out, &[card("SIMPLE", "T"), card("BITPIX", "8"), card("NAXIS", "0")]);
        assert!(matches!(parse_exposure(&out), Err(FitsError::NoTable)));
    }
}
