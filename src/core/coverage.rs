//! Coverage report model and aggregation across matrix instances

use crate::core::{artifact::Artifact, error::CoverageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Line hit counts for one source file. A line present with zero hits is
/// executable but not covered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCoverage {
    pub lines: BTreeMap<u32, u64>,
}

/// Coverage data as published by one instance, or merged from many
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub files: BTreeMap<String, FileCoverage>,
}

impl CoverageReport {
    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Record hits for a line
    pub fn record(&mut self, file: &str, line: u32, hits: u64) {
        *self
            .files
            .entry(file.to_string())
            .or_default()
            .lines
            .entry(line)
            .or_insert(0) += hits;
    }

    /// Combine two reports by summing hit counts per line. Associative and
    /// commutative, so the merged result is independent of input order.
    pub fn merge(mut self, other: &CoverageReport) -> Self {
        for (file, coverage) in &other.files {
            let target = self.files.entry(file.clone()).or_default();
            for (line, hits) in &coverage.lines {
                *target.lines.entry(*line).or_insert(0) += hits;
            }
        }
        self
    }

    pub fn total_lines(&self) -> usize {
        self.files.values().map(|f| f.lines.len()).sum()
    }

    pub fn covered_lines(&self) -> usize {
        self.files
            .values()
            .map(|f| f.lines.values().filter(|hits| **hits > 0).count())
            .sum()
    }

    /// Percentage of executable lines hit at least once. A report with no
    /// executable lines is fully covered.
    pub fn percent(&self) -> f64 {
        let total = self.total_lines();
        if total == 0 {
            return 100.0;
        }
        self.covered_lines() as f64 * 100.0 / total as f64
    }
}

/// Result of aggregating a job's coverage artifacts
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageSummary {
    pub report: CoverageReport,
    pub percent: f64,
    /// Number of reports merged
    pub inputs: usize,
}

/// Merges coverage artifacts from every instance of an upstream job
pub struct CoverageAggregator;

impl CoverageAggregator {
    /// Merge raw reports. Zero reports is an error; one report is returned
    /// unchanged.
    pub fn merge_reports(
        job: &str,
        artifact: &str,
        reports: Vec<CoverageReport>,
    ) -> Result<CoverageSummary, CoverageError> {
        let inputs = reports.len();
        let mut iter = reports.into_iter();
        let first = iter.next().ok_or_else(|| CoverageError::NoCoverageData {
            job: job.to_string(),
            artifact: artifact.to_string(),
        })?;

        let report = iter.fold(first, |acc, next| acc.merge(&next));
        let percent = report.percent();

        Ok(CoverageSummary {
            report,
            percent,
            inputs,
        })
    }

    /// Decode and merge artifacts fetched from the store
    pub fn aggregate(
        job: &str,
        artifact: &str,
        artifacts: &[Artifact],
    ) -> Result<CoverageSummary, CoverageError> {
        let reports = artifacts
            .iter()
            .map(|a| {
                CoverageReport::from_json(&a.data).map_err(|source| CoverageError::Malformed {
                    producer: a.reference.instance.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::merge_reports(job, artifact, reports)
    }
}
