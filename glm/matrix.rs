use ndarray::{Array1, Array2, ArrayView2, Axis, s};
use thiserror::Error;

/// Name given to the column of ones.
pub const INTERCEPT: &str = "const";

#[derive(Error, Debug)]
pub enum DesignError {
    #[error("The design has {columns} covariate columns but {names} column names.")]
    ColumnCountMismatch { columns: usize, names: usize },
}

/// Dense design matrix with named columns; the names label the coefficient rows of
/// the fitted-model summary.
#[derive(Clone, Debug)]
pub struct DesignMatrix {
    matrix: Array2<f64>,
    column_names: Vec<String>,
}

impl DesignMatrix {
    /// Prepends a column of ones named `const` to `covariates`.
    pub fn with_constant(
        covariates: ArrayView2<f64>,
        names: &[&str],
    ) -> Result<Self, DesignError> {
        if covariates.ncols() != names.len() {
            return Err(DesignError::ColumnCountMismatch {
                columns: covariates.ncols(),
                names: names.len(),
            });
        }
        let mut matrix = Array2::<f64>::ones((covariates.nrows(), covariates.ncols() + 1));
        matrix.slice_mut(s![.., 1..]).assign(&covariates);

        let mut column_names = Vec::with_capacity(names.len() + 1);
        column_names.push(INTERCEPT.to_string());
        column_names.extend(names.iter().map(|name| name.to_string()));

        Ok(Self {
            matrix,
            column_names,
        })
    }

    /// The intercept-only design used for null-model comparisons.
    pub fn intercept_only(nrows: usize) -> Self {
        Self {
            matrix: Array2::ones((nrows, 1)),
            column_names: vec![INTERCEPT.to_string()],
        }
    }

    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn matrix_vector_multiply(&self, vector: &Array1<f64>) -> Array1<f64> {
        self.matrix.dot(vector)
    }

    /// `X' W X` for a diagonal weight vector.
    pub fn weighted_gram(&self, weights: &Array1<f64>) -> Array2<f64> {
        let weighted = &self.matrix * &weights.view().insert_axis(Axis(1));
        self.matrix.t().dot(&weighted)
    }

    /// `X' W v` for a diagonal weight vector.
    pub fn weighted_transpose_multiply(
        &self,
        weights: &Array1<f64>,
        vector: &Array1<f64>,
    ) -> Array1<f64> {
        self.matrix.t().dot(&(weights * vector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, array};

    #[test]
    fn constant_column_is_prepended_and_named() {
        let covariates = arr2(&[[1.5, 0.0], [2.5, 1.0], [3.5, 1.0]]);
        let design = DesignMatrix::with_constant(covariates.view(), &["PeerRisk", "ParentingStyle"])
            .unwrap();
        assert_eq!(design.nrows(), 3);
        assert_eq!(design.ncols(), 3);
        assert_eq!(design.view().column(0).to_vec(), vec![1.0, 1.0, 1.0]);
        assert_eq!(design.view().column(1).to_vec(), vec![1.5, 2.5, 3.5]);
        assert_eq!(design.column_names(), &["const", "PeerRisk", "ParentingStyle"]);
    }

    #[test]
    fn weighted_products_match_dense_algebra() {
        let covariates = arr2(&[[1.0], [2.0], [4.0]]);
        let design = DesignMatrix::with_constant(covariates.view(), &["x"]).unwrap();
        let weights = array![1.0, 2.0, 0.5];

        let gram = design.weighted_gram(&weights);
        assert_eq!(gram, arr2(&[[3.5, 7.0], [7.0, 17.0]]));

        let xtwv = design.weighted_transpose_multiply(&weights, &array![1.0, 1.0, 2.0]);
        assert_eq!(xtwv, array![4.0, 9.0]);

        let eta = design.matrix_vector_multiply(&array![0.5, 2.0]);
        assert_eq!(eta, array![2.5, 4.5, 8.5]);
    }

    #[test]
    fn unnamed_covariate_columns_are_rejected() {
        let covariates = arr2(&[[1.0, 0.0], [2.0, 1.0]]);
        let err = DesignMatrix::with_constant(covariates.view(), &["PeerRisk"]).unwrap_err();
        assert!(matches!(
            err,
            DesignError::ColumnCountMismatch {
                columns: 2,
                names: 1
            }
        ));
    }

    #[test]
    fn intercept_only_design_has_a_single_named_column() {
        let design = DesignMatrix::intercept_only(4);
        assert_eq!(design.view().dim(), (4, 1));
        assert_eq!(design.column_names(), &["const"]);
    }
}
