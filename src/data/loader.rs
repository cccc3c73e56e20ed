use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, AsArray, Float32Array, Float64Array, Int32Array, Int64Array,
    LargeListArray, ListArray, StringArray, BooleanArray,
};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{EchelleOrder, Exposure, MetadataValue, ORDER_COLUMN};

pub const SPECTRUM_COLUMN: &str = "spectrum";
pub const UNCERTAINTY_COLUMN: &str = "uncertainty";
pub const WAVELENGTH_COLUMN: &str = "wavelength";

/// Columns that hold per-pixel arrays (never metadata).
fn is_array_column(name: &str) -> bool {
    [SPECTRUM_COLUMN, UNCERTAINTY_COLUMN, WAVELENGTH_COLUMN].contains(&name)
}

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load an exposure from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.fits` / `.fit` – first binary-table extension, one row per order
/// * `.parquet` – list columns `spectrum`, `uncertainty`, `wavelength`
/// * `.json`    – `[{ "spectrum": [...], "wavelength": [...], ...meta }, ...]`
/// * `.csv`     – the three array columns as semicolon-separated floats
pub fn load_file(path: &Path) -> Result<Exposure> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let exposure = match ext.as_str() {
        "fits" | "fit" | "fts" => super::fits::read_exposure(path)?,
        "parquet" | "pq" => load_parquet(path)?,
        "json" => load_json(path)?,
        "csv" => load_csv(path)?,
        other => bail!("Unsupported file extension: .{other}"),
    };
    log::info!(
        "Loaded {} orders from {}",
        exposure.len(),
        path.display()
    );
    Ok(exposure)
}

/// Assemble one order from its parsed columns.
///
/// The order index comes from the `order` column when present, otherwise
/// from the row number. A missing uncertainty column defaults to ones.
pub(crate) fn build_order(
    row: usize,
    order: Option<i64>,
    spectrum: Vec<f64>,
    uncertainty: Option<Vec<f64>>,
    wavelength: Vec<f64>,
    extra: BTreeMap<String, MetadataValue>,
) -> Result<EchelleOrder> {
    let index = match order {
        Some(o) if o >= 0 => o as usize,
        Some(o) => bail!("Row {row}: negative order index {o}"),
        None => row,
    };
    let uncertainty = uncertainty.unwrap_or_else(|| vec![1.0; spectrum.len()]);

    let mut order = EchelleOrder::new(index, spectrum, uncertainty, wavelength);
    if !order.is_consistent() {
        bail!(
            "Row {row}: spectrum has {} values, uncertainty {}, wavelength {}",
            order.spectrum.len(),
            order.uncertainty.len(),
            order.wavelength.len()
        );
    }
    order.metadata.extend(extra);
    Ok(order)
}

fn warn_missing_uncertainty(missing: bool) {
    if missing {
        log::warn!("No '{UNCERTAINTY_COLUMN}' column, using unit uncertainties");
    }
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented, the default `df.to_json(orient='records')`):
///
/// ```json
/// [
///   {
///     "order": 40,
///     "spectrum":    [0.12, 0.15, ...],
///     "uncertainty": [0.01, 0.01, ...],
///     "wavelength":  [4999.8, 4999.9, ...],
///     "object": "LFC"
///   },
///   ...
/// ]
/// ```
fn load_json(path: &Path) -> Result<Exposure> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root
        .as_array()
        .context("Expected top-level JSON array")?;

    let mut orders = Vec::with_capacity(records.len());
    let mut missing_uncertainty = false;

    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        let spectrum = json_array_to_f64(obj.get(SPECTRUM_COLUMN), i, SPECTRUM_COLUMN)?;
        let wavelength = json_array_to_f64(obj.get(WAVELENGTH_COLUMN), i, WAVELENGTH_COLUMN)?;
        let uncertainty = match obj.get(UNCERTAINTY_COLUMN) {
            Some(v) => Some(json_array_to_f64(Some(v), i, UNCERTAINTY_COLUMN)?),
            None => {
                missing_uncertainty = true;
                None
            }
        };
        let order = match obj.get(ORDER_COLUMN) {
            Some(v) => Some(
                v.as_i64()
                    .with_context(|| format!("Row {i}: '{ORDER_COLUMN}' is not an integer"))?,
            ),
            None => None,
        };

        let mut metadata = BTreeMap::new();
        for (key, val) in obj {
            if is_array_column(key) || key == ORDER_COLUMN {
                continue;
            }
            metadata.insert(key.clone(), json_to_metadata(val));
        }

        orders.push(build_order(i, order, spectrum, uncertainty, wavelength, metadata)?);
    }

    warn_missing_uncertainty(missing_uncertainty);
    Ok(Exposure::from_orders(BTreeMap::new(), orders))
}

fn json_array_to_f64(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("Row {row}: missing or invalid '{col}' array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| match v {
            // NaN/inf are written as null by serde_json.
            JsonValue::Null => Ok(f64::NAN),
            _ => v
                .as_f64()
                .with_context(|| format!("Row {row}, {col}[{j}]: not a number")),
        })
        .collect()
}

fn json_to_metadata(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::String(s) => MetadataValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetadataValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                MetadataValue::Float(f)
            } else {
                MetadataValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => MetadataValue::Bool(*b),
        JsonValue::Null => MetadataValue::Null,
        other => MetadataValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout:  header row with column names.
/// `spectrum`, `uncertainty` and `wavelength` contain semicolon-separated
/// floats: `"0.12;0.14;0.11"`. An integer `order` column is optional.
/// All other columns are treated as metadata.
fn load_csv(path: &Path) -> Result<Exposure> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let position = |name: &str| headers.iter().position(|h| h == name);
    let spectrum_idx = position(SPECTRUM_COLUMN).context("CSV missing 'spectrum' column")?;
    let wavelength_idx = position(WAVELENGTH_COLUMN).context("CSV missing 'wavelength' column")?;
    let uncertainty_idx = position(UNCERTAINTY_COLUMN);
    let order_idx = position(ORDER_COLUMN);

    let mut orders = Vec::new();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let field = |idx: usize| record.get(idx).unwrap_or("");

        let spectrum = parse_semicolon_floats(field(spectrum_idx), row_no, SPECTRUM_COLUMN)?;
        let wavelength = parse_semicolon_floats(field(wavelength_idx), row_no, WAVELENGTH_COLUMN)?;
        let uncertainty = uncertainty_idx
            .map(|idx| parse_semicolon_floats(field(idx), row_no, UNCERTAINTY_COLUMN))
            .transpose()?;
        let order = order_idx
            .map(|idx| {
                field(idx)
                    .trim()
                    .parse::<i64>()
                    .with_context(|| format!("CSV row {row_no}: invalid order"))
            })
            .transpose()?;

        let mut metadata = BTreeMap::new();
        for (col_idx, value) in record.iter().enumerate() {
            let col_name = &headers[col_idx];
            if is_array_column(col_name) || col_name == ORDER_COLUMN {
                continue;
            }
            metadata.insert(col_name.clone(), guess_metadata_type(value));
        }

        orders.push(build_order(row_no, order, spectrum, uncertainty, wavelength, metadata)?);
    }

    warn_missing_uncertainty(uncertainty_idx.is_none());
    Ok(Exposure::from_orders(BTreeMap::new(), orders))
}

fn parse_semicolon_floats(s: &str, row: usize, col: &str) -> Result<Vec<f64>> {
    if s.trim().is_empty() {
        return Ok(Vec::new());
    }
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            tok.trim()
                .parse::<f64>()
                .with_context(|| format!("Row {row}, {col}[{j}]: '{tok}' is not a number"))
        })
        .collect()
}

fn guess_metadata_type(s: &str) -> MetadataValue {
    if s.is_empty() {
        return MetadataValue::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return MetadataValue::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return MetadataValue::Float(f);
    }
    if s == "true" || s == "false" {
        return MetadataValue::Bool(s == "true");
    }
    MetadataValue::String(s.to_string())
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file containing one echelle order per row.
///
/// Expected schema:
/// - `spectrum`, `wavelength`: List<Float64> or LargeList<Float64>
/// - `uncertainty` (optional): same type
/// - `order` (optional): Int32/Int64
/// - Any other columns are treated as metadata (strings, ints, floats, bools)
///
/// Works with files written by both **Pandas** (`df.to_parquet()`) and
/// **Polars** (`df.write_parquet()`).
fn load_parquet(path: &Path) -> Result<Exposure> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut orders = Vec::new();
    let mut missing_uncertainty = false;
    let mut row_offset = 0;

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        let n_rows = batch.num_rows();

        let spectrum_idx = schema
            .index_of(SPECTRUM_COLUMN)
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'spectrum' column"))?;
        let wavelength_idx = schema
            .index_of(WAVELENGTH_COLUMN)
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'wavelength' column"))?;
        let uncertainty_idx = schema.index_of(UNCERTAINTY_COLUMN).ok();
        let order_idx = schema.index_of(ORDER_COLUMN).ok();
        missing_uncertainty |= uncertainty_idx.is_none();

        // Collect metadata column indices (everything except the arrays and order)
        let meta_cols: Vec<(usize, String)> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| !is_array_column(f.name()) && f.name() != ORDER_COLUMN)
            .map(|(i, f)| (i, f.name().clone()))
            .collect();

        for row in 0..n_rows {
            let global_row = row_offset + row;
            let spectrum = extract_f64_list(batch.column(spectrum_idx), row)
                .with_context(|| format!("Row {global_row}: failed to read 'spectrum'"))?;
            let wavelength = extract_f64_list(batch.column(wavelength_idx), row)
                .with_context(|| format!("Row {global_row}: failed to read 'wavelength'"))?;
            let uncertainty = uncertainty_idx
                .map(|idx| extract_f64_list(batch.column(idx), row))
                .transpose()
                .with_context(|| format!("Row {global_row}: failed to read 'uncertainty'"))?;
            let order = match order_idx {
                Some(idx) => match extract_metadata_value(batch.column(idx), row) {
                    MetadataValue::Integer(o) => Some(o),
                    other => bail!("Row {global_row}: order column holds {other}"),
                },
                None => None,
            };

            let mut metadata = BTreeMap::new();
            for (col_idx, col_name) in &meta_cols {
                let col_array = batch.column(*col_idx);
                let value = extract_metadata_value(col_array, row);
                metadata.insert(col_name.clone(), value);
            }

            orders.push(build_order(global_row, order, spectrum, uncertainty, wavelength, metadata)?);
        }
        row_offset += n_rows;
    }

    warn_missing_uncertainty(missing_uncertainty);
    Ok(Exposure::from_orders(BTreeMap::new(), orders))
}

// -- Parquet / Arrow helpers --

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<ListArray>()
                .context("expected ListArray")?;
            list_arr.value(row)
        }
        DataType::LargeList(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<LargeListArray>()
                .context("expected LargeListArray")?;
            list_arr.value(row)
        }
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    // The inner array can be Float64 or Float32
    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.unwrap_or(f32::NAN) as f64).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

/// Extract a single metadata value from an Arrow column at a given row.
fn extract_metadata_value(col: &Arc<dyn Array>, row: usize) -> MetadataValue {
    if col.is_null(row) {
        return MetadataValue::Null;
    }
    match col.data_type() {
        DataType::Utf8 => match col.as_any().downcast_ref::<StringArray>() {
            Some(s) => MetadataValue::String(s.value(row).to_string()),
            None => MetadataValue::Null,
        },
        DataType::LargeUtf8 => {
            let s = col.as_string::<i64>();
            MetadataValue::String(s.value(row).to_string())
        }
        DataType::Int32 => col
            .as_any()
            .downcast_ref::<Int32Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Integer(a.value(row) as i64)),
        DataType::Int64 => col
            .as_any()
            .downcast_ref::<Int64Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Integer(a.value(row))),
        DataType::Float32 => col
            .as_any()
            .downcast_ref::<Float32Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Float(a.value(row) as f64)),
        DataType::Float64 => col
            .as_any()
            .downcast_ref::<Float64Array>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Float(a.value(row))),
        DataType::Boolean => col
            .as_any()
            .downcast_ref::<BooleanArray>()
            .map_or(MetadataValue::Null, |a| MetadataValue::Bool(a.value(row))),
        _ => MetadataValue::String(format!("{:?}", col.data_type())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_json_records() {
        let file = write_temp(
            ".json",
            r#"[
                {"order": 41, "spectrum": [1.0, 2.0], "uncertainty": [0.1, 0.2],
                 "wavelength": [5000.0, 5000.1], "object": "LFC"},
                {"order": 40, "spectrum": [3.0, null], "uncertainty": [0.1, 0.2],
                 "wavelength": [4990.0, 4990.1], "object": "LFC"}
            ]"#,
        );
        let exp = load_file(file.path()).unwrap();
        assert_eq!(exp.len(), 2);
        assert_eq!(exp.orders[0].order, 40);
        assert!(exp.orders[0].spectrum[1].is_nan());
        assert_eq!(
            exp.orders[1].metadata.get("object"),
            Some(&MetadataValue::String("LFC".into()))
        );
        assert_eq!(exp.orders[1].uncertainty, vec![0.1, 0.2]);
    }

    #[test]
    fn test_json_length_mismatch() {
        let file = write_temp(
            ".json",
            r#"[{"spectrum": [1.0, 2.0], "wavelength": [5000.0]}]"#,
        );
        let err = load_file(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("wavelength 1"));
    }

    #[test]
    fn test_csv_without_uncertainty() {
        let file = write_temp(
            ".csv",
            "spectrum,wavelength,fiber\n\"1;2;3\",\"5000;5000.1;5000.2\",sci\n\"4;5;6\",\"5001;5001.1;5001.2\",sci\n",
        );
        let exp = load_file(file.path()).unwrap();
        assert_eq!(exp.len(), 2);
        assert_eq!(exp.orders[1].order, 1);
        assert_eq!(exp.orders[0].uncertainty, vec![1.0; 3]);
        assert_eq!(exp.orders[1].spectrum, vec![4.0, 5.0, 6.0]);
        assert!(exp.column_names.contains(&"fiber".to_string()));
        assert!(exp.column_names.contains(&ORDER_COLUMN.to_string()));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = write_temp(".txt", "nothing");
        assert!(load_file(file.path()).is_err());
    }

    #[test]
    fn test_metadata_type_guessing() {
        assert_eq!(guess_metadata_type(""), MetadataValue::Null);
        assert_eq!(guess_metadata_type("7"), MetadataValue::Integer(7));
        assert_eq!(guess_metadata_type("1.5"), MetadataValue::Float(1.5));
        assert_eq!(guess_metadata_type("true"), MetadataValue::Bool(true));
        assert_eq!(guess_metadata_type("sci"), MetadataValue::String("sci".into()));
    }
}
