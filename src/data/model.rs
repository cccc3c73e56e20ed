use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

// ---------------------------------------------------------------------------
// MetadataValue – a header card or per-order metadata cell
// ---------------------------------------------------------------------------

/// A dynamically-typed metadata value (FITS header card or table column).
/// Values of different kinds order by kind first, so `MetadataValue` can
/// key `BTreeMap`s and fill `BTreeSet`s.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl MetadataValue {
    fn rank(&self) -> u8 {
        match self {
            MetadataValue::Null => 0,
            MetadataValue::Bool(_) => 1,
            MetadataValue::Integer(_) => 2,
            MetadataValue::Float(_) => 3,
            MetadataValue::String(_) => 4,
        }
    }
}

// Floats compare with `total_cmp`, which makes the ordering total.
impl Eq for MetadataValue {}

impl PartialOrd for MetadataValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetadataValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (MetadataValue::Bool(a), MetadataValue::Bool(b)) => a.cmp(b),
            (MetadataValue::Integer(a), MetadataValue::Integer(b)) => a.cmp(b),
            (MetadataValue::Float(a), MetadataValue::Float(b)) => a.total_cmp(b),
            (MetadataValue::String(a), MetadataValue::String(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for MetadataValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            MetadataValue::String(s) => s.hash(state),
            MetadataValue::Integer(i) => i.hash(state),
            MetadataValue::Float(f) => f.to_bits().hash(state),
            MetadataValue::Bool(b) => b.hash(state),
            MetadataValue::Null => {}
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Null => write!(f, "-"),
        }
    }
}

impl MetadataValue {
    /// Try to interpret the value as an `f64` for numeric colour mapping.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

/// Name of the metadata column holding the order index.
pub const ORDER_COLUMN: &str = "order";

// ---------------------------------------------------------------------------
// EchelleOrder – one row of the extracted spectrum table
// ---------------------------------------------------------------------------

/// One echelle order: flux, its uncertainty and the wavelength of each pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct EchelleOrder {
    pub order: usize,
    pub spectrum: Vec<f64>,
    pub uncertainty: Vec<f64>,
    /// Wavelength of each pixel in Å.
    pub wavelength: Vec<f64>,
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl EchelleOrder {
    /// Build an order; the order index is also recorded as metadata.
    pub fn new(order: usize, spectrum: Vec<f64>, uncertainty: Vec<f64>, wavelength: Vec<f64>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(ORDER_COLUMN.to_string(), MetadataValue::Integer(order as i64));
        Self {
            order,
            spectrum,
            uncertainty,
            wavelength,
            metadata,
        }
    }

    /// Number of pixels.
    pub fn len(&self) -> usize {
        self.spectrum.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectrum.is_empty()
    }

    /// Whether spectrum, uncertainty and wavelength have the same length.
    pub fn is_consistent(&self) -> bool {
        self.uncertainty.len() == self.spectrum.len() && self.wavelength.len() == self.spectrum.len()
    }
}

// ---------------------------------------------------------------------------
// Exposure – the complete loaded file
// ---------------------------------------------------------------------------

/// A loaded exposure with pre-computed metadata column indices.
#[derive(Debug, Clone, Default)]
pub struct Exposure {
    /// Primary header cards (FITS) or file-level metadata.
    pub header: BTreeMap<String, MetadataValue>,
    /// All orders (rows), sorted by order index.
    pub orders: Vec<EchelleOrder>,
    /// Ordered list of per-order metadata column names.
    pub column_names: Vec<String>,
    /// For each metadata column the sorted set of unique values.
    pub unique_values: BTreeMap<String, BTreeSet<MetadataValue>>,
}

impl Exposure {
    /// Build column indices from the loaded orders.
    pub fn from_orders(header: BTreeMap<String, MetadataValue>, mut orders: Vec<EchelleOrder>) -> Self {
        orders.sort_by_key(|o| o.order);

        let mut column_names_set: BTreeSet<String> = BTreeSet::new();
        let mut unique_values: BTreeMap<String, BTreeSet<MetadataValue>> = BTreeMap::new();

        for o in &orders {
            for (col, val) in &o.metadata {
                column_names_set.insert(col.clone());
                unique_values
                    .entry(col.clone())
                    .or_default()
                    .insert(val.clone());
            }
        }
        let column_names: Vec<String> = column_names_set.into_iter().collect();
        Exposure {
            header,
            orders,
            column_names,
            unique_values,
        }
    }

    /// Number of orders.
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Whether the exposure holds no orders.
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn order(&self, index: usize) -> Option<&EchelleOrder> {
        self.orders
            .binary_search_by_key(&index, |o| o.order)
            .ok()
            .map(|i| &self.orders[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_ordering() {
        let mut set = BTreeSet::new();
        set.insert(MetadataValue::String("b".into()));
        set.insert(MetadataValue::Integer(3));
        set.insert(MetadataValue::Null);
        set.insert(MetadataValue::Integer(1));
        let ordered: Vec<String> = set.iter().map(|v| v.to_string()).collect();
        assert_eq!(ordered, vec!["-", "1", "3", "b"]);
    }

    #[test]
    fn test_exposure_sorted_and_indexed() {
        let mk = |n: usize| EchelleOrder::new(n, vec![1.0; 4], vec![0.1; 4], vec![5000.0; 4]);
        let exp = Exposure::from_orders(BTreeMap::new(), vec![mk(42), mk(40), mk(41)]);
        let idx: Vec<usize> = exp.orders.iter().map(|o| o.order).collect();
        assert_eq!(idx, vec![40, 41, 42]);
        assert_eq!(exp.column_names, vec![ORDER_COLUMN.to_string()]);
        assert_eq!(exp.unique_values[ORDER_COLUMN].len(), 3);
        assert_eq!(exp.order(41).map(|o| o.order), Some(41));
        assert!(exp.order(7).is_none());
    }

    #[test]
    fn test_consistency_check() {
        let mut o = EchelleOrder::new(0, vec![1.0; 4], vec![0.1; 4], vec![5000.0; 4]);
        assert!(o.is_consistent());
        o.wavelength.pop();
        assert!(!o.is_consistent());
    }
}
