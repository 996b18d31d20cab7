//! Summary of a persisted table file

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use mealrl_rl::TableReport;

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Table file to inspect
    #[arg(default_value = "sarsa_table.json")]
    pub path: PathBuf,

    /// Number of highest values to list
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Number of states to print with their rows
    #[arg(long, default_value_t = 5)]
    pub sample: usize,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Render the report, or `None` when there is no table at the path.
pub fn render(args: &ReportArgs) -> Result<Option<String>> {
    let report = TableReport::load(&args.path, args.top, args.sample)
        .with_context(|| format!("Failed to read {}", args.path.display()))?;

    match report {
        Some(report) if args.json => Ok(Some(serde_json::to_string_pretty(&report)?)),
        Some(report) => Ok(Some(report.to_string())),
        None => Ok(None),
    }
}

pub fn run(args: &ReportArgs) -> Result<()> {
    match render(args)? {
        Some(text) => println!("{text}"),
        None => println!("No Q-table found at {}", args.path.display()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn args_for(path: PathBuf, json: bool) -> ReportArgs {
        ReportArgs {
            path,
            top: 10,
            sample: 5,
            json,
        }
    }

    #[test]
    fn test_missing_table_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let args = args_for(dir.path().join("absent.json"), false);
        assert!(render(&args).unwrap().is_none());
        assert!(run(&args).is_ok());
    }

    #[test]
    fn test_json_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        std::fs::write(&path, r#"{"s1": {"1": 0.5, "2": -1.0}, "s2": {"3": 2.0}}"#).unwrap();

        let text = render(&args_for(path, true)).unwrap().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["states"], 2);
        assert_eq!(value["top"][0]["value"], 2.0);
        assert_eq!(value["top"][0]["action"], "3");
    }

    #[test]
    fn test_text_output_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        std::fs::write(&path, r#"{"s1": {"1": 0.5}}"#).unwrap();

        let text = render(&args_for(path.clone(), false)).unwrap().unwrap();
        assert!(text.contains(&path.display().to_string()));
    }
}
