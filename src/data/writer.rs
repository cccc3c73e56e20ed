use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Float64Builder, Int64Array, ListArray, ListBuilder,
    StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use serde_json::{Map, Value as JsonValue};

use super::loader::{SPECTRUM_COLUMN, UNCERTAINTY_COLUMN, WAVELENGTH_COLUMN};
use super::model::{EchelleOrder, Exposure, MetadataValue, ORDER_COLUMN};

/// Write an exposure in the format implied by the file extension.
pub fn write_file(exposure: &Exposure, path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "parquet" | "pq" => write_parquet(exposure, path),
        "json" => write_json(exposure, path),
        "csv" => write_csv(exposure, path),
        "fits" | "fit" | "fts" => write_fits(exposure, path),
        other => bail!("Unsupported output format: .{other}"),
    }
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

fn list_array(orders: &[EchelleOrder], values: impl Fn(&EchelleOrder) -> &[f64]) -> ListArray {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for order in orders {
        builder.values().append_slice(values(order));
        builder.append(true);
    }
    builder.finish()
}

/// Arrow type able to hold every value of a metadata column.
fn metadata_type(values: &[&MetadataValue]) -> DataType {
    let non_null = values.iter().filter(|v| !matches!(v, MetadataValue::Null));
    let mut ty: Option<DataType> = None;
    for v in non_null {
        let this = match v {
            MetadataValue::Integer(_) => DataType::Int64,
            MetadataValue::Float(_) => DataType::Float64,
            MetadataValue::Bool(_) => DataType::Boolean,
            _ => DataType::Utf8,
        };
        ty = Some(match (ty, this) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(DataType::Int64), DataType::Float64) | (Some(DataType::Float64), DataType::Int64) => {
                DataType::Float64
            }
            _ => DataType::Utf8,
        });
    }
    ty.unwrap_or(DataType::Utf8)
}

fn metadata_array(values: &[&MetadataValue], ty: &DataType) -> ArrayRef {
    match ty {
        DataType::Int64 => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    MetadataValue::Integer(i) => Some(*i),
                    _ => None,
                })
                .collect::<Int64Array>(),
        ),
        DataType::Float64 => Arc::new(values.iter().map(|v| v.as_f64()).collect::<Float64Array>()),
        DataType::Boolean => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    MetadataValue::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect::<BooleanArray>(),
        ),
        _ => Arc::new(
            values
                .iter()
                .map(|v| match v {
                    MetadataValue::Null => None,
                    other => Some(other.to_string()),
                })
                .collect::<StringArray>(),
        ),
    }
}

/// Write one order per row: `order`, the three array columns and one
/// column per metadata key.
pub fn write_parquet(exposure: &Exposure, path: &Path) -> Result<()> {
    let orders = &exposure.orders;
    let list_type = DataType::List(Arc::new(Field::new("item", DataType::Float64, true)));

    let mut fields = vec![
        Field::new(ORDER_COLUMN, DataType::Int64, false),
        Field::new(SPECTRUM_COLUMN, list_type.clone(), false),
        Field::new(UNCERTAINTY_COLUMN, list_type.clone(), false),
        Field::new(WAVELENGTH_COLUMN, list_type, false),
    ];
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(orders.iter().map(|o| o.order as i64).collect::<Int64Array>()),
        Arc::new(list_array(orders, |o| o.spectrum.as_slice())),
        Arc::new(list_array(orders, |o| o.uncertainty.as_slice())),
        Arc::new(list_array(orders, |o| o.wavelength.as_slice())),
    ];

    for name in exposure.column_names.iter().filter(|c| *c != ORDER_COLUMN) {
        let values: Vec<&MetadataValue> = orders
            .iter()
            .map(|o| o.metadata.get(name).unwrap_or(&MetadataValue::Null))
            .collect();
        let ty = metadata_type(&values);
        columns.push(metadata_array(&values, &ty));
        fields.push(Field::new(name.as_str(), ty, true));
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), columns).context("building record batch")?;

    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    log::info!("Wrote {} orders to {}", orders.len(), path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// JSON / CSV / FITS
// ---------------------------------------------------------------------------

/// Write a records-oriented JSON array, one object per order.
pub fn write_json(exposure: &Exposure, path: &Path) -> Result<()> {
    let records: Vec<JsonValue> = exposure
        .orders
        .iter()
        .map(|o| -> serde_json::Result<JsonValue> {
            let mut obj = Map::new();
            obj.insert(ORDER_COLUMN.to_string(), JsonValue::from(o.order));
            obj.insert(SPECTRUM_COLUMN.to_string(), serde_json::to_value(&o.spectrum)?);
            obj.insert(UNCERTAINTY_COLUMN.to_string(), serde_json::to_value(&o.uncertainty)?);
            obj.insert(WAVELENGTH_COLUMN.to_string(), serde_json::to_value(&o.wavelength)?);
            for (key, value) in o.metadata.iter().filter(|(k, _)| *k != ORDER_COLUMN) {
                obj.insert(key.clone(), serde_json::to_value(value)?);
            }
            Ok(JsonValue::Object(obj))
        })
        .collect::<serde_json::Result<_>>()
        .context("serializing orders")?;

    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer(std::io::BufWriter::new(file), &records).context("writing JSON")?;
    log::info!("Wrote {} orders to {}", records.len(), path.display());
    Ok(())
}

fn semicolon_floats(values: &[f64]) -> String {
    values.iter().map(|v| format!("{v:?}")).collect::<Vec<_>>().join(";")
}

/// CSV cell text that reads back as the same metadata type.
fn csv_cell(value: Option<&MetadataValue>) -> String {
    match value {
        None | Some(MetadataValue::Null) => String::new(),
        Some(MetadataValue::Float(v)) => format!("{v:?}"),
        Some(other) => other.to_string(),
    }
}

/// Write one order per row, arrays as semicolon-separated floats.
pub fn write_csv(exposure: &Exposure, path: &Path) -> Result<()> {
    let metadata: Vec<&String> = exposure
        .column_names
        .iter()
        .filter(|c| c.as_str() != ORDER_COLUMN)
        .collect();

    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    let mut header = vec![ORDER_COLUMN, SPECTRUM_COLUMN, UNCERTAINTY_COLUMN, WAVELENGTH_COLUMN];
    header.extend(metadata.iter().map(|c| c.as_str()));
    writer.write_record(&header).context("writing CSV header")?;

    for o in &exposure.orders {
        let mut row = vec![
            o.order.to_string(),
            semicolon_floats(&o.spectrum),
            semicolon_floats(&o.uncertainty),
            semicolon_floats(&o.wavelength),
        ];
        row.extend(metadata.iter().map(|c| csv_cell(o.metadata.get(*c))));
        writer.write_record(&row).context("writing CSV row")?;
    }
    writer.flush().context("flushing CSV")?;
    log::info!("Wrote {} orders to {}", exposure.len(), path.display());
    Ok(())
}

/// Write a FITS file with a primary header and one binary table.
pub fn write_fits(exposure: &Exposure, path: &Path) -> Result<()> {
    let bytes = super::fits::encode_exposure(exposure)?;
    std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
    log::info!("Wrote {} orders to {}", exposure.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::load_file;
    use std::collections::BTreeMap;

    fn exposure() -> Exposure {
        let orders = [41usize, 40]
            .into_iter()
            .map(|n| {
                let mut o = EchelleOrder::new(
                    n,
                    vec![0.5, 1.5, 0.25],
                    vec![0.1, 0.1, 0.2],
                    vec![5000.0, 5000.1, 5000.2],
                );
                o.metadata
                    .insert("fiber".to_string(), MetadataValue::String("sci".into()));
                if n == 41 {
                    o.metadata.insert("airmass".to_string(), MetadataValue::Float(1.2));
                }
                o
            })
            .collect();
        Exposure::from_orders(BTreeMap::new(), orders)
    }

    fn assert_same_orders(a: &Exposure, b: &Exposure) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.orders.iter().zip(&b.orders) {
            assert_eq!(x.order, y.order);
            assert_eq!(x.spectrum, y.spectrum);
            assert_eq!(x.uncertainty, y.uncertainty);
            assert_eq!(x.wavelength, y.wavelength);
        }
    }

    #[test]
    fn test_parquet_written_and_reloaded() {
        let exp = exposure();
        let file = tempfile::Builder::new().suffix(".parquet").tempfile().unwrap();
        write_file(&exp, file.path()).unwrap();
        let loaded = load_file(file.path()).unwrap();
        assert_same_orders(&exp, &loaded);
        assert_eq!(
            loaded.orders[1].metadata.get("airmass"),
            Some(&MetadataValue::Float(1.2))
        );
        assert_eq!(loaded.orders[0].metadata.get("airmass"), Some(&MetadataValue::Null));
        assert_eq!(
            loaded.orders[0].metadata.get("fiber"),
            Some(&MetadataValue::String("sci".into()))
        );
    }

    #[test]
    fn test_json_written_and_reloaded() {
        let exp = exposure();
        let file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write_file(&exp, file.path()).unwrap();
        let loaded = load_file(file.path()).unwrap();
        assert_same_orders(&exp, &loaded);
        assert!(loaded.orders[0].metadata.get("airmass").is_none());
    }

    #[test]
    fn test_fits_written_and_reloaded() {
        let exp = exposure();
        let file = tempfile::Builder::new().suffix(".fits").tempfile().unwrap();
        write_file(&exp, file.path()).unwrap();
        assert_same_orders(&exp, &load_file(file.path()).unwrap());
    }

    #[test]
    fn test_csv_written_and_reloaded() {
        let exp = exposure();
        let file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        write_file(&exp, file.path()).unwrap();
        let loaded = load_file(file.path()).unwrap();
        assert_same_orders(&exp, &loaded);
        assert_eq!(
            loaded.orders[1].metadata.get("airmass"),
            Some(&MetadataValue::Float(1.2))
        );
        assert_eq!(loaded.orders[0].metadata.get("airmass"), Some(&MetadataValue::Null));
    }

    #[test]
    fn test_all_formats_load_the_same_exposure() {
        let exp = exposure();
        let loaded: Vec<Exposure> = ["parquet", "json", "csv", "fits"]
            .iter()
            .map(|ext| {
                let file = tempfile::Builder::new()
                    .suffix(&format!(".{ext}"))
                    .tempfile()
                    .unwrap();
                write_file(&exp, file.path()).unwrap();
                load_file(file.path()).unwrap()
            })
            .collect();
        for other in &loaded[1..] {
            assert_same_orders(&loaded[0], other);
        }
        for text in &loaded[..3] {
            assert_eq!(
                text.orders[0].metadata.get("fiber"),
                Some(&MetadataValue::String("sci".into()))
            );
        }
    }

    #[test]
    fn test_metadata_type_promotion() {
        let (i, f, s) = (
            MetadataValue::Integer(1),
            MetadataValue::Float(2.5),
            MetadataValue::String("x".into()),
        );
        assert_eq!(metadata_type(&[&i, &MetadataValue::Null]), DataType::Int64);
        assert_eq!(metadata_type(&[&i, &f]), DataType::Float64);
        assert_eq!(metadata_type(&[&i, &s]), DataType::Utf8);
    }

    #[test]
    fn test_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        assert!(write_file(&exposure(), file.path()).is_err());
    }
}
