use crate::config::{TransformStep, UnitTarget};
use crate::error::{PipelineError, Result};
use crate::structs::{Dataset, Value};
use csv::ReaderBuilder;
use log::debug;
use std::collections::HashMap;
use std::path::Path;

/// Applies configured steps in order.
///
/// Every step is all-or-nothing: a value that cannot be converted fails the
/// whole dataset with `MalformedValue` instead of skipping the record.
/// Bad records are filtered during extraction, not here.
///
/// # Errors
///
/// Returns `PipelineError` if:
/// - A step names a field the dataset does not have
/// - A numeric field holds a value that is not a number
/// - A conversion names a unit missing from `rates`, or no rates were supplied
pub fn apply_steps(
    mut dataset: Dataset,
    steps: &[TransformStep],
    rates: Option<&ExchangeRates>,
) -> Result<Dataset> {
    for step in steps {
        debug!("Applying {:?} to {} records", step, dataset.len());
        match step {
            TransformStep::Round { field, places } => round_field(&mut dataset, field, *places)?,
            TransformStep::Scale {
                field,
                divisor,
                places,
                rename_to,
            } => scale_field(&mut dataset, field, *divisor, *places, rename_to.as_deref())?,
            TransformStep::Rename { from, to } => rename_field(&mut dataset, from, to)?,
            TransformStep::Convert {
                source_field,
                targets,
            } => {
                let rates = rates.ok_or_else(|| {
                    PipelineError::Data("unit conversion requires exchange rates".to_string())
                })?;
                convert_units(&mut dataset, source_field, targets, rates)?
            }
        }
    }
    debug!("Transform processing completed successfully");
    Ok(dataset)
}

/// Rounds to `places` decimals, ties to even.
pub fn round_half_even(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round_ties_even() / factor
}

/// Rounds a numeric field in place. Applying it twice changes nothing.
pub fn round_field(dataset: &mut Dataset, field: &str, places: u32) -> Result<()> {
    let values = numeric_column(dataset, field)?
        .into_iter()
        .map(|v| Value::Number(round_half_even(v, places)))
        .collect();
    dataset.replace_column(field, values)
}

/// Divides a numeric field (thousands separators allowed), rounds it, and
/// optionally renames it, e.g. USD millions to USD billions.
pub fn scale_field(
    dataset: &mut Dataset,
    field: &str,
    divisor: f64,
    places: u32,
    rename_to: Option<&str>,
) -> Result<()> {
    if divisor == 0.0 || !divisor.is_finite() {
        return Err(PipelineError::Data(format!(
            "invalid divisor {} for {}",
            divisor, field
        )));
    }
    let values = numeric_column(dataset, field)?
        .into_iter()
        .map(|v| Value::Number(round_half_even(v / divisor, places)))
        .collect();
    dataset.replace_column(field, values)?;
    if let Some(to) = rename_to {
        rename_field(dataset, field, to)?;
    }
    Ok(())
}

/// Metadata-only: values are untouched.
pub fn rename_field(dataset: &mut Dataset, from: &str, to: &str) -> Result<()> {
    dataset.rename_column(from, to)
}

/// Adds one field per target as `source * rate[unit]`, rounded to 2 places.
pub fn convert_units(
    dataset: &mut Dataset,
    source_field: &str,
    targets: &[UnitTarget],
    rates: &ExchangeRates,
) -> Result<()> {
    let multipliers = targets
        .iter()
        .map(|t| rates.rate(&t.unit))
        .collect::<Result<Vec<_>>>()?;
    let source = numeric_column(dataset, source_field)?;

    for (target, multiplier) in targets.iter().zip(multipliers) {
        let values = source
            .iter()
            .map(|v| Value::Number(round_half_even(v * multiplier, 2)))
            .collect();
        dataset.push_column(&target.field, values)?;
    }
    Ok(())
}

fn numeric_column(dataset: &Dataset, field: &str) -> Result<Vec<f64>> {
    dataset
        .column(field)?
        .into_iter()
        .enumerate()
        .map(|(row, value)| {
            value.as_number().ok_or_else(|| PipelineError::MalformedValue {
                field: field.to_string(),
                row,
                value: value.to_string(),
            })
        })
        .collect()
}

/// Unit code to multiplier, read once per run from a side artifact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExchangeRates {
    rates: HashMap<String, f64>,
}

impl ExchangeRates {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            rates: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Reads a delimited file whose first two columns are the unit code and
    /// its multiplier (`Currency,Rate` or `unit_code,multiplier`).
    pub fn from_csv(path: &Path) -> Result<Self> {
        let source = path.display().to_string();
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|e| PipelineError::unavailable(&source, e))?;
        let rate_header = reader
            .headers()
            .map_err(|e| PipelineError::unavailable(&source, e))?
            .get(1)
            .unwrap_or("multiplier")
            .to_string();

        let mut rates = HashMap::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let code = record.get(0).map(str::trim).unwrap_or_default();
            let raw = record.get(1).map(str::trim).unwrap_or_default();
            let multiplier = raw
                .parse::<f64>()
                .ok()
                .filter(|m| m.is_finite() && !code.is_empty())
                .ok_or_else(|| PipelineError::MalformedValue {
                    field: rate_header.clone(),
                    row,
                    value: raw.to_string(),
                })?;
            rates.insert(code.to_string(), multiplier);
        }
        debug!("Loaded {} exchange rates from {}", rates.len(), source);
        Ok(Self { rates })
    }

    pub fn rate(&self, unit: &str) -> Result<f64> {
        self.rates
            .get(unit)
            .copied()
            .ok_or_else(|| PipelineError::UnknownUnit(unit.to_string()))
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}
