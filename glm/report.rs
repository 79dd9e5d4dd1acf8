//! Sections of the console report. Each writer takes any `io::Write` sink so the
//! binary can target stdout and tests can capture into a buffer.

use crate::data::{ObservationTable, ResponseSummary};
use crate::diagnostics::OverdispersionReport;
use crate::estimate::FittedModel;
use crate::summary::ModelSummary;
use std::io::{self, Write};

/// Rows shown in the table preview.
pub const PREVIEW_ROWS: usize = 5;

pub fn write_preview(out: &mut impl Write, table: &ObservationTable) -> io::Result<()> {
    writeln!(out, "--- 模拟数据 (前5行) ---")?;
    writeln!(out, "{}", table.head(PREVIEW_ROWS))
}

pub fn write_descriptives(out: &mut impl Write, summary: &ResponseSummary) -> io::Result<()> {
    writeln!(out, "\n--- 数据描述 ---")?;
    writeln!(out, "平均事件数: {:.2}", summary.mean)?;
    writeln!(out, "事件数方差: {:.2}", summary.variance)?;
    writeln!(out, "(注意：方差现在远大于均值，这是'过度离散'的典型标志)\n")
}

pub fn write_model_summary(
    out: &mut impl Write,
    model: &FittedModel,
    dependent: &str,
) -> io::Result<()> {
    writeln!(out, "\n--- 负二项回归模型结果 ---")?;
    write!(out, "{}", ModelSummary::new(model, dependent))
}

pub fn write_comparison(out: &mut impl Write, report: &OverdispersionReport) -> io::Result<()> {
    writeln!(out, "\n--- 泊松模型对比 ---")?;
    writeln!(
        out,
        "Pearson chi2/df (Poisson): {:.3}",
        report.poisson_dispersion_ratio
    )?;
    writeln!(
        out,
        "Pearson chi2/df (NB):      {:.3}",
        report.negative_binomial_dispersion_ratio
    )?;
    writeln!(
        out,
        "AIC (Poisson): {:.2}   AIC (NB): {:.2}",
        report.poisson_aic, report.negative_binomial_aic
    )?;
    writeln!(
        out,
        "LR test (NB vs Poisson): LR = {:.2}, p = {:.3e}",
        report.likelihood_ratio, report.likelihood_ratio_pvalue
    )
}

pub fn write_conclusion(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "\n--- 结论 ---")?;
    writeln!(out, "模型摘要中的 'alpha' 值 (通常在末尾) 是对过度离散的度量。")?;
    writeln!(out, "如果 alpha 显著大于0，说明使用 NB 模型是正确的。")?;
    writeln!(
        out,
        "下一步：如果数据中还有大量的'0'，那么 NB 也不够，就需要你项目中的 ZINB 模型了。"
    )
}
