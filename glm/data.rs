//! # Observation Table
//!
//! Holds the simulated cohort as a polars `DataFrame` and is the only place that
//! turns table columns into the `ndarray` structures used by the fitting core.
//!
//! - Fixed schema: `PeerRisk`, `ParentingStyle`, `MonthlyIncidents`, in that order.
//! - Every extracted column is checked for nulls, numeric type and finiteness; the
//!   response must additionally hold non-negative integer counts.

use crate::simulate::SimulatedData;
use ndarray::{Array1, Array2, ShapeBuilder};
use polars::prelude::*;
use thiserror::Error;

pub const PEER_RISK: &str = "PeerRisk";
pub const PARENTING_STYLE: &str = "ParentingStyle";
pub const MONTHLY_INCIDENTS: &str = "MonthlyIncidents";

/// Covariate columns in design-matrix order.
pub const COVARIATES: [&str; 2] = [PEER_RISK, PARENTING_STYLE];

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("Failed to assemble the covariate matrix: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
    #[error("The required column '{0}' was not found in the observation table.")]
    ColumnNotFound(String),
    #[error(
        "The column '{column_name}' could not be converted to '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error("Missing or null values were found in the column '{0}'.")]
    MissingValuesFound(String),
    #[error("Non-finite values (NaN or Infinity) were found in the column '{0}'.")]
    NonFiniteValuesFound(String),
    #[error(
        "The response column '{column_name}' must hold non-negative integer counts, found {value} at row {row}."
    )]
    InvalidCount {
        column_name: String,
        row: usize,
        value: f64,
    },
    #[error("The observation table has no rows.")]
    EmptyTable,
}

/// Sample mean and sample variance (ddof = 1) of the response column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResponseSummary {
    pub mean: f64,
    pub variance: f64,
}

impl ResponseSummary {
    /// Variance-to-mean ratio; 1 for Poisson data, above 1 when overdispersed.
    pub fn dispersion_ratio(&self) -> f64 {
        self.variance / self.mean
    }
}

/// The simulated records, one row per subject.
#[derive(Debug, Clone)]
pub struct ObservationTable {
    df: DataFrame,
}

impl ObservationTable {
    pub fn from_simulation(data: &SimulatedData) -> Result<Self, DataError> {
        if data.is_empty() {
            return Err(DataError::EmptyTable);
        }
        let df = DataFrame::new(vec![
            Column::new(PEER_RISK.into(), data.peer_risk.to_vec()),
            Column::new(PARENTING_STYLE.into(), data.parenting_style.to_vec()),
            Column::new(MONTHLY_INCIDENTS.into(), data.monthly_incidents.to_vec()),
        ])?;
        Ok(Self { df })
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    /// The first `n` rows, for the preview.
    pub fn head(&self, n: usize) -> DataFrame {
        self.df.head(Some(n))
    }

    /// Extracts a column as `f64`, rejecting nulls, non-numeric data and non-finite values.
    pub fn numeric_column(&self, column_name: &str) -> Result<Array1<f64>, DataError> {
        let column = self
            .df
            .column(column_name)
            .map_err(|_| DataError::ColumnNotFound(column_name.to_string()))?;
        if column.null_count() > 0 {
            return Err(DataError::MissingValuesFound(column_name.to_string()));
        }

        let casted = column
            .cast(&DataType::Float64)
            .map_err(|_| DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", column.dtype()),
            })?;
        if casted.null_count() > 0 {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", column.dtype()),
            });
        }

        let values: Vec<f64> = casted
            .as_materialized_series()
            .f64()?
            .into_no_null_iter()
            .collect();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
        }
        Ok(Array1::from_vec(values))
    }

    /// The response column, validated as non-negative integer counts.
    pub fn response(&self) -> Result<Array1<f64>, DataError> {
        let y = self.numeric_column(MONTHLY_INCIDENTS)?;
        if let Some((row, &value)) = y
            .iter()
            .enumerate()
            .find(|(_, v)| **v < 0.0 || v.fract() != 0.0)
        {
            return Err(DataError::InvalidCount {
                column_name: MONTHLY_INCIDENTS.to_string(),
                row: row + 1,
                value,
            });
        }
        Ok(y)
    }

    /// Stacks the named columns into an `n x k` matrix.
    pub fn covariates(&self, names: &[&str]) -> Result<Array2<f64>, DataError> {
        let n = self.height();
        let mut buffer = Vec::with_capacity(n * names.len());
        for name in names {
            buffer.extend(self.numeric_column(name)?.iter().copied());
        }
        Ok(Array2::from_shape_vec((n, names.len()).f(), buffer)?)
    }

    pub fn describe_response(&self) -> Result<ResponseSummary, DataError> {
        let y = self.response()?;
        let mean = y.mean().ok_or(DataError::EmptyTable)?;
        // pandas' Series.var uses ddof = 1.
        let variance = if y.len() > 1 { y.var(1.0) } else { f64::NAN };
        Ok(ResponseSummary { mean, variance })
    }
}
