use crate::domain::mapping::MappingValue;
use crate::error::{MapperError, Result};
use std::io::Read;

/// Reads mapping values from a CSV source with `id` and `fa` columns.
///
/// This reader wraps `csv::Reader` and provides an iterator over `Result<MappingValue>`.
/// It handles whitespace trimming and flexible record lengths automatically; an
/// empty cell means the value is absent.
pub struct MappingReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> MappingReader<R> {
    /// Creates a new `MappingReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes mappings.
    ///
    /// Rows carrying neither an id nor a financial address are reported as
    /// validation errors.
    pub fn mappings(self) -> impl Iterator<Item = Result<MappingValue>> {
        self.reader
            .into_deserialize::<MappingValue>()
            .enumerate()
            .map(|(row, result)| {
                let mapping = result.map_err(MapperError::from)?;
                if mapping.id.is_none() && mapping.fa.is_none() {
                    return Err(MapperError::ValidationError(format!(
                        "row {} has neither id nor fa",
                        row + 1
                    )));
                }
                Ok(mapping)
            })
    }
}
