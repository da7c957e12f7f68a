//! `aegis classify`: Report whether a prompt would be planned first.

use aegis_agent::classifier::PLANNING_THRESHOLD;
use aegis_agent::{Complexity, ComplexityClassifier};

pub async fn run(prompt: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let complexity = ComplexityClassifier::new().assess(prompt);
    if json {
        println!("{}", serde_json::to_string_pretty(&complexity)?);
    } else {
        println!("{}", render(&complexity));
    }
    Ok(())
}

fn render(c: &Complexity) -> String {
    let verdict = if c.requires_planning {
        "plan first"
    } else {
        "execute directly"
    };
    let list = |items: &[String]| {
        if items.is_empty() {
            "-".to_string()
        } else {
            items.join(", ")
        }
    };
    format!(
        "Decision:     {verdict}\n\
         Score:        {} (threshold {PLANNING_THRESHOLD})\n\
         Words:        {}\n\
         Actions:      {}\n\
         Deliverables: {}",
        c.score,
        c.words,
        list(&c.verbs),
        list(&c.deliverables)
    )
}
