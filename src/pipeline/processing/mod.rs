// Pipeline processing stages, in run order:
// clean / expand -> identity -> geocode -> aggregate

pub mod aggregate;
pub mod clean;
pub mod expand;
pub mod geocode;
pub mod identity;

pub use aggregate::{AggregationReport, Aggregator, AggregatorConfig};
pub use clean::{CleanOutput, CleanerConfig, CleaningReport, ErrorReport, RecordCleaner};
pub use expand::{DiffAnomaly, ExpanderConfig, ExpansionReport, TimeSeriesExpander};
pub use geocode::{GeocodeReport, GeocodeResolver, GeocodeTable, GeocoderConfig};
pub use identity::{IdAssigner, IdentityReport};
