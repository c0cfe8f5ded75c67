//! # Facts Subcommand
//!
//! Answers a goal against a fact program, optionally seeded with a request
//! document. Exits 1 when the goal has no proof.
//!
//! ```bash
//! cgov facts rules/context.facts --goal 'night_contractor' --input request.json
//! cgov facts rules/context.facts --goal 'role(R)'
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use cgov_facts::{parse_goal, Binding, FactBase, FactEvaluator, FactsConfig};
use clap::Args;
use serde_json::{Map, Value as Json};

use crate::{read_json, EXIT_CHECK_FAILED, EXIT_OK};

/// Arguments for the facts subcommand.
#[derive(Args, Debug)]
pub struct FactsArgs {
    /// Fact program: facts and Horn clauses.
    pub file: PathBuf,

    /// Goal atom, e.g. `role(R)` or `night_contractor`.
    #[arg(long)]
    pub goal: String,

    /// JSON request document added as `input(path, value)` facts.
    #[arg(long)]
    pub input: Option<PathBuf>,
}

/// Execute the facts subcommand.
pub fn run_facts(args: &FactsArgs) -> Result<u8> {
    let src = std::fs::read_to_string(&args.file).with_context(|| format!("failed to read {}", args.file.display()))?;
    let evaluator = FactEvaluator::from_source(FactsConfig::default(), &src)
        .with_context(|| format!("invalid fact program {}", args.file.display()))?;
    let goal = parse_goal(&args.goal).with_context(|| format!("invalid goal {:?}", args.goal))?;

    let mut facts = FactBase::new();
    if let Some(path) = &args.input {
        let input: Json = read_json(path)?;
        let added = facts.extend_from_input(&input);
        tracing::debug!(added, "input facts loaded");
    }

    let answers = evaluator.query(&goal, &facts)?;
    println!("{}", serde_json::to_string_pretty(&to_json(&answers))?);
    Ok(if answers.is_empty() { EXIT_CHECK_FAILED } else { EXIT_OK })
}

/// Bindings as a JSON array of `{variable: value}` objects.
pub fn to_json(answers: &[Binding]) -> Json {
    Json::Array(
        answers
            .iter()
            .map(|b| Json::Object(b.iter().map(|(k, v)| (k.clone(), v.to_json())).collect::<Map<_, _>>()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &str = r#"
        role(R) :- input("requester.roles", R).
        night_contractor :- input("requester.category", "contractor"), input("request.hour", H), H >= 22.
    "#;

    fn setup(input: serde_json::Value) -> (tempfile::TempDir, FactsArgs) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("context.facts"), PROGRAM).unwrap();
        std::fs::write(dir.path().join("input.json"), input.to_string()).unwrap();
        let args = FactsArgs {
            file: dir.path().join("context.facts"),
            goal: "night_contractor".into(),
            input: Some(dir.path().join("input.json")),
        };
        (dir, args)
    }

    #[test]
    fn proven_goal_exits_zero() {
        let (_dir, args) = setup(serde_json::json!({
            "requester": { "category": "contractor" },
            "request": { "hour": 23 }
        }));
        assert_eq!(run_facts(&args).unwrap(), EXIT_OK);
    }

    #[test]
    fn unproven_goal_exits_one() {
        let (_dir, args) = setup(serde_json::json!({
            "requester": { "category": "contractor" },
            "request": { "hour": 9 }
        }));
        assert_eq!(run_facts(&args).unwrap(), EXIT_CHECK_FAILED);
    }

    #[test]
    fn bad_goal_is_an_error() {
        let (_dir, mut args) = setup(serde_json::json!({}));
        args.goal = "role(".into();
        assert!(run_facts(&args).is_err());
    }
}
