//! `aegis budget`: Show the section quotas for a context window.

use std::path::Path;

use aegis_agent::context::Budget;
use aegis_agent::ContextWindowManager;
use aegis_config::EngineConfig;

pub async fn run(
    config_path: Option<&Path>,
    total: Option<usize>,
    model: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    let (total, source) = resolve_window(&config, total, model);
    let budget = ContextWindowManager::new(config.context.clone()).allocate_budget(total);
    println!("{}", render(&budget, &source));
    Ok(())
}

fn resolve_window(config: &EngineConfig, total: Option<usize>, model: Option<&str>) -> (usize, String) {
    match (total, model) {
        (Some(total), _) => (total, "explicit".into()),
        (None, Some(model)) => (config.window_for(model), format!("model {model}")),
        (None, None) => (
            config.window_for(&config.default_model),
            format!("model {}", config.default_model),
        ),
    }
}

fn render(budget: &Budget, source: &str) -> String {
    let rows = [
        ("System prompt", budget.system_prompt),
        ("Memories", budget.memories),
        ("Summary", budget.summary),
        ("Messages", budget.messages),
        ("Reserve", budget.reserve),
    ];
    let mut out = format!("Context window: {} tokens ({source})\n", budget.total());
    for (name, tokens) in rows {
        out.push_str(&format!("  {name:<14} {tokens:>8}\n"));
    }
    out.push_str(&format!("  {:<14} {:>8}", "Prompt total", budget.prompt_tokens()));
    out
}
