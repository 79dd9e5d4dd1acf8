//! Plain-text regression table in the familiar two-column header layout followed by
//! the coefficient block.

use crate::estimate::FittedModel;
use crate::inference::CoefficientRow;
use std::fmt;

const TABLE_WIDTH: usize = 78;
const TITLE: &str = "Generalized Linear Model Regression Results";

/// Borrowing view of a fitted model that renders its summary table.
pub struct ModelSummary<'a> {
    model: &'a FittedModel,
    dependent: &'a str,
}

impl<'a> ModelSummary<'a> {
    pub fn new(model: &'a FittedModel, dependent: &'a str) -> Self {
        Self { model, dependent }
    }

    fn header_rows(&self) -> Vec<[(String, String); 2]> {
        let model = self.model;
        let stats = &model.statistics;
        let converged = if model.converged() { "True" } else { "False" };
        vec![
            [
                ("Dep. Variable:".into(), self.dependent.to_string()),
                ("No. Observations:".into(), model.n_obs.to_string()),
            ],
            [
                ("Model:".into(), "GLM".into()),
                ("Df Residuals:".into(), stats.df_residuals.to_string()),
            ],
            [
                ("Model Family:".into(), model.family.name().into()),
                ("Df Model:".into(), stats.df_model.to_string()),
            ],
            [
                ("Link Function:".into(), model.family.link().name().into()),
                ("Scale:".into(), format!("{:.4}", 1.0)),
            ],
            [
                ("Method:".into(), "IRLS".into()),
                ("Log-Likelihood:".into(), format!("{:.2}", stats.log_likelihood)),
            ],
            [
                ("No. Iterations:".into(), model.fit.iteration.to_string()),
                ("Deviance:".into(), format!("{:.2}", stats.deviance)),
            ],
            [
                ("converged:".into(), converged.into()),
                ("Pearson chi2:".into(), format!("{:.2}", stats.pearson_chi2)),
            ],
            [
                ("Covariance Type:".into(), "nonrobust".into()),
                (
                    "Pseudo R-squ. (CS):".into(),
                    format!("{:.4}", stats.pseudo_r_squared_cs),
                ),
            ],
            [
                ("AIC:".into(), format!("{:.2}", stats.aic)),
                ("BIC:".into(), format!("{:.2}", stats.bic)),
            ],
        ]
    }
}

fn write_coefficient_row(f: &mut fmt::Formatter<'_>, row: &CoefficientRow) -> fmt::Result {
    writeln!(
        f,
        "{:<18}{:>10.4}{:>10.3}{:>10.3}{:>10.3}{:>10.3}{:>10.3}",
        row.name, row.estimate, row.std_error, row.z_value, row.p_value, row.ci_lower, row.ci_upper
    )
}

impl fmt::Display for ModelSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let double_rule = "=".repeat(TABLE_WIDTH);
        let single_rule = "-".repeat(TABLE_WIDTH);

        writeln!(f, "{TITLE:^TABLE_WIDTH$}")?;
        writeln!(f, "{double_rule}")?;
        for [(left_label, left_value), (right_label, right_value)] in self.header_rows() {
            writeln!(
                f,
                "{left_label:<20}{left_value:>18}   {right_label:<22}{right_value:>15}"
            )?;
        }
        writeln!(f, "{double_rule}")?;

        let tail = (1.0 - self.model.confidence_level) / 2.0;
        writeln!(
            f,
            "{:<18}{:>10}{:>10}{:>10}{:>10}{:>10}{:>10}",
            "",
            "coef",
            "std err",
            "z",
            "P>|z|",
            format!("[{tail:.3}"),
            format!("{:.3}]", 1.0 - tail)
        )?;
        writeln!(f, "{single_rule}")?;
        for row in &self.model.coefficients {
            write_coefficient_row(f, row)?;
        }
        if let Some(alpha) = &self.model.dispersion {
            writeln!(f, "{single_rule}")?;
            write_coefficient_row(f, alpha)?;
        }
        writeln!(f, "{double_rule}")
    }
}
