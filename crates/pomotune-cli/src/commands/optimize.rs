use pomotune_core::Target;

use super::open_session;

/// `round` and `session`: record a score and print the next recommendation
/// in the same shape as the HTTP API.
pub fn run_target(
    target: Target,
    user: &str,
    score: f64,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = open_session()?;
    let json = match target {
        Target::Round => serde_json::to_string_pretty(&session.round_optimizer(user, score)?)?,
        Target::Session => serde_json::to_string_pretty(&session.session_optimizer(user, score)?)?,
    };
    println!("{json}");
    Ok(())
}

/// `propose`: one step by target name, printing the full recommendation.
pub fn run_propose(
    target: &str,
    user: &str,
    score: Option<f64>,
) -> Result<(), Box<dyn std::error::Error>> {
    // Reject unknown targets before the config file is touched.
    target.parse::<Target>()?;
    let session = open_session()?;
    let recommendation = session.run(user, target, score)?;
    println!("{}", serde_json::to_string_pretty(&recommendation)?);
    Ok(())
}
