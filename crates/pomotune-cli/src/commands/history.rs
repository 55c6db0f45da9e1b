use pomotune_core::{ParameterSpace, Target, TrialOutcome};

use super::open_session;

pub fn run(target: &str, user: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let parsed: Target = target.parse()?;
    let session = open_session()?;
    let records = session.history(user, target)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    let space = ParameterSpace::for_target(parsed);
    println!("{}", space.columns().join("\t"));
    for record in &records {
        let mut cells: Vec<String> = record.parameters.iter().map(|v| format!("{v:.2}")).collect();
        cells.push(match record.outcome {
            TrialOutcome::Completed(score) => format!("{score:.2}"),
            TrialOutcome::Pending => "pending".to_string(),
        });
        println!("{}", cells.join("\t"));
    }
    Ok(())
}
