use crate::{config::Configuration, types::RunReport};
use anyhow::Context;
use delegation::verifier::ScenarioResult;
use std::{
    io::{self, Write},
    path::Path,
};

const LOG_TAIL_LINES: usize = 200;

/// One line per recorded step, expected vs actual.
pub(crate) fn summary(out: &mut impl Write, result: &ScenarioResult) -> io::Result<()> {
    for outcome in result.outcomes() {
        writeln!(
            out,
            "{verdict} {step}: expected {expected}, got {actual}",
            verdict = if outcome.passed { "PASS" } else { "FAIL" },
            step = outcome.step,
            expected = outcome.expected,
            actual = outcome.actual,
        )?;
    }
    let failed = result.failures().count();
    writeln!(out, "{} step(s), {} failed", result.len(), failed)
}

/// Best-effort dump of everything useful to diagnose a failed run. Emitted
/// once, after the last step.
pub(crate) fn dump(out: &mut impl Write, config: &Configuration, result: &ScenarioResult) -> io::Result<()> {
    writeln!(out, "==== failed steps ====")?;
    for failure in result.failures() {
        writeln!(out, "--- {}", failure.step)?;
        match failure.detail.as_deref() {
            Some(detail) if !detail.is_empty() => writeln!(out, "{detail}")?,
            _ => writeln!(out, "(no response body)")?,
        }
    }

    for path in &config.log_files {
        writeln!(out, "==== {} ====", path.display())?;
        match tail(path, LOG_TAIL_LINES) {
            Ok(lines) => {
                for line in lines {
                    writeln!(out, "{line}")?;
                }
            }
            Err(e) => writeln!(out, "(unavailable: {e:#})")?,
        }
    }
    Ok(())
}

pub(crate) fn write_report(path: &Path, report: &RunReport) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("write report to {}", path.display()))
}

fn tail(path: &Path, lines: usize) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let content = String::from_utf8_lossy(&content);
    let all: Vec<_> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].iter().map(|l| l.to_string()).collect())
}
