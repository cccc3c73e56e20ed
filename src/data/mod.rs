/// Data layer: core types, loading, writing, filtering and synthetic data.
///
/// Architecture:
/// ```text
///  .fits / .parquet / .json / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Exposure   (fits: binary-table reader)
///   └──────────┘
///        │
///        ▼
///   ┌──────────────┐
///   │   Exposure    │  Vec<EchelleOrder>, header, column index
///   └──────────────┘
///        │                         ▲
///        ▼                         │
///   ┌──────────┐             ┌───────────┐
///   │  filter   │            │ synthetic │  LFC / stellar exposures with known truth
///   └──────────┘             └───────────┘
///   metadata predicates            │
///   → visible orders               ▼
///                             ┌──────────┐
///                             │  writer   │  Exposure → .parquet / .json / .fits
///                             └──────────┘
/// ```

pub mod filter;
pub mod fits;
pub mod loader;
pub mod model;
pub mod synthetic;
pub mod writer;
